// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! IPv4 headers.

use super::packet::DiscardReason;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const PROTO_ICMP: u8 = 0x1;
pub const PROTO_TCP: u8 = 0x6;
pub const PROTO_UDP: u8 = 0x11;

pub const IPV4_HDR_SZ: usize = core::mem::size_of::<Ipv4HdrRaw>();
pub const IPV4_VERSION: u8 = 4;

/// The fragment offset bits of `frag_and_flags`.
pub const IPV4_FRAG_OFFSET_MASK: u16 = 0x1FFF;

/// Note: For now we keep this unaligned to be safe.
#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct Ipv4HdrRaw {
    pub ver_hdr_len: u8,
    pub dscp_ecn: u8,
    pub total_len: [u8; 2],
    pub ident: [u8; 2],
    pub frag_and_flags: [u8; 2],
    pub ttl: u8,
    pub proto: u8,
    pub csum: [u8; 2],
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

impl Default for Ipv4HdrRaw {
    fn default() -> Self {
        Ipv4HdrRaw {
            ver_hdr_len: 0x45,
            dscp_ecn: 0x0,
            total_len: [0x0; 2],
            ident: [0x0; 2],
            frag_and_flags: [0x40, 0x0],
            ttl: 64,
            proto: 0xFF,
            csum: [0x0; 2],
            src: [0x0; 4],
            dst: [0x0; 4],
        }
    }
}

/// The parts of an IPv4 header the flow key is built from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Ipv4Meta {
    /// Source address as a big-endian numeric value.
    pub src: u32,
    pub dst: u32,
    pub proto: u8,
    /// The header length in bytes, options included.
    pub hdr_len: usize,
    /// `total_len` minus the header length.
    pub l4_len: u16,
    /// The fragment offset, in 8-byte units.
    pub frag_offset: u16,
}

impl Ipv4Meta {
    pub fn parse(bytes: &[u8]) -> Result<Self, DiscardReason> {
        let (raw, _) = Ipv4HdrRaw::ref_from_prefix(bytes)
            .map_err(|_| DiscardReason::TruncatedHeader)?;

        if raw.ver_hdr_len >> 4 != IPV4_VERSION {
            return Err(DiscardReason::BadIpVersion);
        }

        let hdr_len = usize::from(raw.ver_hdr_len & 0x0F) * 4;
        if hdr_len < IPV4_HDR_SZ {
            return Err(DiscardReason::TruncatedHeader);
        }

        let total_len = u16::from_be_bytes(raw.total_len);
        // The hdr_len fits in 60, so the cast is lossless.
        let l4_len = total_len
            .checked_sub(hdr_len as u16)
            .ok_or(DiscardReason::TruncatedHeader)?;

        Ok(Self {
            src: u32::from_be_bytes(raw.src),
            dst: u32::from_be_bytes(raw.dst),
            proto: raw.proto,
            hdr_len,
            l4_len,
            frag_offset: u16::from_be_bytes(raw.frag_and_flags)
                & IPV4_FRAG_OFFSET_MASK,
        })
    }

    pub fn is_later_fragment(&self) -> bool {
        self.frag_offset != 0
    }
}
