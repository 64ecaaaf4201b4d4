// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! TCP headers.

use super::packet::DiscardReason;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const TCP_HDR_SZ: usize = core::mem::size_of::<TcpHdrRaw>();

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
pub struct TcpHdrRaw {
    pub src_port: [u8; 2],
    pub dst_port: [u8; 2],
    pub seq: [u8; 4],
    pub ack: [u8; 4],
    pub offset: u8,
    pub flags: u8,
    pub win: [u8; 2],
    pub csum: [u8; 2],
    pub urg: [u8; 2],
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TcpMeta {
    pub src: u16,
    pub dst: u16,
    /// The header length in bytes, from the data offset field.
    pub hdr_len: usize,
}

impl TcpMeta {
    pub fn parse(bytes: &[u8]) -> Result<Self, DiscardReason> {
        let (raw, _) = TcpHdrRaw::ref_from_prefix(bytes)
            .map_err(|_| DiscardReason::TruncatedTransport)?;

        Ok(Self {
            src: u16::from_be_bytes(raw.src_port),
            dst: u16::from_be_bytes(raw.dst_port),
            hdr_len: usize::from(raw.offset >> 4) * 4,
        })
    }
}
