// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The captured packet as handed over by the capture layer.

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub const ETHER_TYPE_IPV4: u16 = 0x0800;
pub const ETHER_TYPE_IPV6: u16 = 0x86DD;

/// Wire overhead not present in the captured length (preamble, FCS,
/// inter-frame gap), added to the wire byte count.
pub const WIRE_OVERHEAD: u64 = 24;

/// Only the low 12 bits of the 802.1Q TCI are the VLAN id.
pub const VLAN_ID_MASK: u16 = 0x0FFF;

/// Why a packet was dropped before reaching the flow table.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum DiscardReason {
    /// A non-initial IPv4 fragment whose first fragment was not seen.
    Fragment,

    /// The declared transport length is below the protocol minimum, or
    /// the captured bytes cannot hold the transport header.
    TruncatedTransport,

    /// The captured bytes cannot hold the network header.
    TruncatedHeader,

    /// Neither IPv4 nor IPv6, or an ethertype that disagrees with the
    /// version field.
    BadIpVersion,
}

impl Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Fragment => "non-initial fragment",
            Self::TruncatedTransport => "truncated transport header",
            Self::TruncatedHeader => "truncated network header",
            Self::BadIpVersion => "bad IP version",
        };
        write!(f, "{s}")
    }
}

/// Pointers and metadata for one captured frame.
///
/// The capture layer has already located the network header (and
/// usually the transport header) within `frame`.
#[derive(Clone, Copy, Debug)]
pub struct PacketMeta<'a> {
    /// Capture timestamp, seconds part.
    pub ts_secs: u64,

    /// Capture timestamp, microseconds part.
    pub ts_usecs: u32,

    /// The original length of the packet on the wire.
    pub wire_len: u32,

    /// The captured bytes, starting at the link layer.
    pub frame: &'a [u8],

    /// Offset of the network header within `frame`.
    pub l3_offset: usize,

    /// Offset of the transport header within `frame`. When absent it
    /// directly follows the network header.
    pub l4_offset: Option<usize>,

    /// The ethertype of the network header.
    pub ethertype: u16,

    /// The raw 802.1Q tag control bytes, if the frame was tagged.
    pub vlan_tag: Option<[u8; 2]>,

    /// Set by the capture layer when the first fragment of this
    /// packet's datagram has been seen.
    pub frag_first_seen: bool,
}

impl<'a> PacketMeta<'a> {
    /// Describe an untagged frame whose network header sits at
    /// `l3_offset`.
    pub fn new(
        frame: &'a [u8],
        l3_offset: usize,
        ethertype: u16,
        ts_secs: u64,
        ts_usecs: u32,
    ) -> Self {
        Self {
            ts_secs,
            ts_usecs,
            wire_len: u32::try_from(frame.len()).unwrap_or(u32::MAX),
            frame,
            l3_offset,
            l4_offset: None,
            ethertype,
            vlan_tag: None,
            frag_first_seen: false,
        }
    }

    pub fn vlan_id(&self) -> u16 {
        match self.vlan_tag {
            Some(tag) => u16::from_be_bytes(tag) & VLAN_ID_MASK,
            None => 0,
        }
    }

    /// The network header onwards, limited to what the wire length
    /// says is IP payload.
    pub fn l3_bytes(&self) -> Option<&'a [u8]> {
        let ip = self.frame.get(self.l3_offset..)?;
        let ip_size = self.ip_size() as usize;
        Some(&ip[..ip.len().min(ip_size)])
    }

    /// The number of bytes from the network header to the end of the
    /// packet on the wire.
    pub fn ip_size(&self) -> u32 {
        let off = u32::try_from(self.l3_offset).unwrap_or(u32::MAX);
        self.wire_len.saturating_sub(off)
    }
}
