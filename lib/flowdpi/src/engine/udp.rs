// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! UDP headers.

use super::packet::DiscardReason;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const UDP_HDR_SZ: usize = core::mem::size_of::<UdpHdrRaw>();

#[repr(C)]
#[derive(
    Clone,
    Debug,
    Default,
    FromBytes,
    Immutable,
    IntoBytes,
    KnownLayout,
    Unaligned,
)]
pub struct UdpHdrRaw {
    pub src_port: [u8; 2],
    pub dst_port: [u8; 2],
    pub length: [u8; 2],
    pub csum: [u8; 2],
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UdpMeta {
    pub src: u16,
    pub dst: u16,
}

impl UdpMeta {
    pub fn parse(bytes: &[u8]) -> Result<Self, DiscardReason> {
        let (raw, _) = UdpHdrRaw::ref_from_prefix(bytes)
            .map_err(|_| DiscardReason::TruncatedTransport)?;

        Ok(Self {
            src: u16::from_be_bytes(raw.src_port),
            dst: u16::from_be_bytes(raw.dst_port),
        })
    }
}
