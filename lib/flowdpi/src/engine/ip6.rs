// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! IPv6 headers.
//!
//! Flow keys are 32-bit per endpoint, so an IPv6 address is folded to
//! the wrapping sum of its last two 32-bit words. The fold is lossy:
//! two distinct addresses may share a flow.

use super::packet::DiscardReason;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const IPV6_HDR_SZ: usize = core::mem::size_of::<Ipv6HdrRaw>();
pub const IPV6_VERSION: u8 = 6;

/// The Destination Options extension header.
pub const NEXT_HDR_DSTOPTS: u8 = 60;

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct Ipv6HdrRaw {
    pub vsn_class_flow: [u8; 4],
    pub payload_len: [u8; 2],
    pub next_hdr: u8,
    pub hop_limit: u8,
    pub src: [u8; 16],
    pub dst: [u8; 16],
}

impl Default for Ipv6HdrRaw {
    fn default() -> Self {
        Self {
            vsn_class_flow: [0x60, 0x0, 0x0, 0x0],
            payload_len: [0x0; 2],
            next_hdr: 0xFF,
            hop_limit: 255,
            src: [0x0; 16],
            dst: [0x0; 16],
        }
    }
}

/// Fold a 128-bit address into the 32-bit flow key space.
pub fn fold_addr(addr: &[u8; 16]) -> u32 {
    let w2 = u32::from_be_bytes([addr[8], addr[9], addr[10], addr[11]]);
    let w3 = u32::from_be_bytes([addr[12], addr[13], addr[14], addr[15]]);
    w2.wrapping_add(w3)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Ipv6Meta {
    /// The folded source address.
    pub src: u32,
    /// The folded destination address.
    pub dst: u32,
    pub proto: u8,
    /// Where the transport header is expected to start, relative to
    /// the fixed header.
    pub l4_start: usize,
    /// The declared payload length.
    pub l4_len: u16,
}

impl Ipv6Meta {
    pub fn parse(bytes: &[u8]) -> Result<Self, DiscardReason> {
        let (raw, rest) = Ipv6HdrRaw::ref_from_prefix(bytes)
            .map_err(|_| DiscardReason::TruncatedHeader)?;

        if raw.vsn_class_flow[0] >> 4 != IPV6_VERSION {
            return Err(DiscardReason::BadIpVersion);
        }

        let mut proto = raw.next_hdr;
        let mut l4_start = IPV6_HDR_SZ;

        // A single Destination Options header is looked through; the
        // transport protocol is its Next Header field.
        if proto == NEXT_HDR_DSTOPTS {
            let opts = rest.get(..2).ok_or(DiscardReason::TruncatedHeader)?;
            proto = opts[0];
            l4_start += (usize::from(opts[1]) + 1) * 8;
        }

        Ok(Self {
            src: fold_addr(&raw.src),
            dst: fold_addr(&raw.dst),
            proto,
            l4_start,
            l4_len: u16::from_be_bytes(raw.payload_len),
        })
    }
}
