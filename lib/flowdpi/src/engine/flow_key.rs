// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Direction-independent flow identity.

use super::ip4::Ipv4Meta;
use super::ip4::PROTO_TCP;
use super::ip4::PROTO_UDP;
use super::ip6::IPV6_HDR_SZ;
use super::ip6::Ipv6Meta;
use super::packet::DiscardReason;
use super::packet::ETHER_TYPE_IPV4;
use super::packet::ETHER_TYPE_IPV6;
use super::packet::PacketMeta;
use super::tcp::TCP_HDR_SZ;
use super::tcp::TcpMeta;
use super::udp::UDP_HDR_SZ;
use super::udp::UdpMeta;
use core::cmp::Ordering;
use core::fmt;
use core::hash::Hash;
use core::hash::Hasher;
use core::net::Ipv4Addr;
use flowdpi_api::IpVersion;
use serde::Deserialize;
use serde::Serialize;

/// The canonical identity of a flow.
///
/// Both directions of a conversation produce the same key: the
/// numerically lower address (and its port) always comes first. When
/// both addresses are equal the ports are ordered instead.
///
/// Ordering and equality consider `(vlan_id, lower_addr, lower_port,
/// upper_addr, upper_port, protocol)` only. The `ip_version` is
/// informational, so a folded IPv6 tuple and an IPv4 tuple with the
/// same 32-bit values are the same flow.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct FlowKey {
    pub vlan_id: u16,
    pub protocol: u8,
    pub lower_addr: u32,
    pub upper_addr: u32,
    pub lower_port: u16,
    pub upper_port: u16,
    pub ip_version: IpVersion,
}

impl FlowKey {
    /// Build the canonical key for a packet travelling from `src` to
    /// `dst`, and report whether the source is the lower endpoint.
    pub fn new(
        vlan_id: u16,
        protocol: u8,
        ip_version: IpVersion,
        src: (u32, u16),
        dst: (u32, u16),
    ) -> (Self, bool) {
        let src_is_lower = src.0 < dst.0 || (src.0 == dst.0 && src.1 <= dst.1);
        let (lower, upper) = if src_is_lower { (src, dst) } else { (dst, src) };

        let key = Self {
            vlan_id,
            protocol,
            lower_addr: lower.0,
            upper_addr: upper.0,
            lower_port: lower.1,
            upper_port: upper.1,
            ip_version,
        };

        (key, src_is_lower)
    }

    /// Select the shard this key lives in.
    pub fn shard_index(&self, shard_count: u32) -> usize {
        let sum = u32::from(self.vlan_id)
            .wrapping_add(self.lower_addr)
            .wrapping_add(self.upper_addr)
            .wrapping_add(u32::from(self.protocol))
            .wrapping_add(u32::from(self.lower_port))
            .wrapping_add(u32::from(self.upper_port));

        (sum % shard_count.max(1)) as usize
    }

    fn tuple(&self) -> (u16, u32, u16, u32, u16, u8) {
        (
            self.vlan_id,
            self.lower_addr,
            self.lower_port,
            self.upper_addr,
            self.upper_port,
            self.protocol,
        )
    }
}

impl PartialEq for FlowKey {
    fn eq(&self, other: &Self) -> bool {
        self.tuple() == other.tuple()
    }
}

impl Eq for FlowKey {}

impl PartialOrd for FlowKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FlowKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tuple().cmp(&other.tuple())
    }
}

impl Hash for FlowKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tuple().hash(state);
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.ip_version {
            IpVersion::V4 => write!(
                f,
                "{}:{}:{}:{}:{}:{}",
                self.vlan_id,
                self.protocol,
                Ipv4Addr::from(self.lower_addr),
                self.lower_port,
                Ipv4Addr::from(self.upper_addr),
                self.upper_port,
            ),

            IpVersion::V6 => write!(
                f,
                "{}:{}:{:#010x}:{}:{:#010x}:{}",
                self.vlan_id,
                self.protocol,
                self.lower_addr,
                self.lower_port,
                self.upper_addr,
                self.upper_port,
            ),
        }
    }
}

/// The result of deriving a key from a packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DerivedKey {
    pub key: FlowKey,
    /// Is the packet's source the key's lower endpoint?
    pub src_to_dst: bool,
    pub src_port: u16,
    pub dst_port: u16,
    /// Offset of the transport payload within the frame.
    pub payload_offset: usize,
    pub payload_len: u16,
}

struct L3Tuple {
    src: u32,
    dst: u32,
    proto: u8,
    l4_offset: usize,
    /// The declared transport length. For IPv6 this still counts any
    /// extension header in front of the transport header.
    l4_len: u16,
    /// Extension header bytes between the network and transport
    /// headers.
    ext_len: usize,
    version: IpVersion,
}

fn parse_l3(pkt: &PacketMeta) -> Result<L3Tuple, DiscardReason> {
    let l3 = pkt
        .frame
        .get(pkt.l3_offset..)
        .ok_or(DiscardReason::TruncatedHeader)?;

    match pkt.ethertype {
        ETHER_TYPE_IPV4 => {
            let ip = Ipv4Meta::parse(l3)?;
            if ip.is_later_fragment() && !pkt.frag_first_seen {
                return Err(DiscardReason::Fragment);
            }

            Ok(L3Tuple {
                src: ip.src,
                dst: ip.dst,
                proto: ip.proto,
                l4_offset: pkt.l3_offset + ip.hdr_len,
                l4_len: ip.l4_len,
                ext_len: 0,
                version: IpVersion::V4,
            })
        }

        ETHER_TYPE_IPV6 => {
            let ip = Ipv6Meta::parse(l3)?;
            Ok(L3Tuple {
                src: ip.src,
                dst: ip.dst,
                proto: ip.proto,
                l4_offset: pkt.l3_offset + ip.l4_start,
                l4_len: ip.l4_len,
                ext_len: ip.l4_start - IPV6_HDR_SZ,
                version: IpVersion::V6,
            })
        }

        _ => Err(DiscardReason::BadIpVersion),
    }
}

/// Derive the flow key of a captured packet.
///
/// # Errors
///
/// The packet is malformed for flow tracking purposes; see
/// [`DiscardReason`].
pub fn derive(pkt: &PacketMeta) -> Result<DerivedKey, DiscardReason> {
    let l3 = parse_l3(pkt)?;
    let l4_offset = pkt.l4_offset.unwrap_or(l3.l4_offset);
    let l4_len = usize::from(l3.l4_len);
    // The payload window ends where the transport segment does.
    let seg_len = l4_len.saturating_sub(l3.ext_len);
    let l4 = || {
        pkt.frame.get(l4_offset..).ok_or(DiscardReason::TruncatedTransport)
    };

    let (src_port, dst_port, payload_start, payload_len) = match l3.proto {
        PROTO_TCP => {
            if l4_len < TCP_HDR_SZ {
                return Err(DiscardReason::TruncatedTransport);
            }

            let tcp = TcpMeta::parse(l4()?)?;
            let start = tcp.hdr_len.min(seg_len);
            (tcp.src, tcp.dst, start, seg_len.saturating_sub(tcp.hdr_len))
        }

        PROTO_UDP => {
            if l4_len < UDP_HDR_SZ {
                return Err(DiscardReason::TruncatedTransport);
            }

            let udp = UdpMeta::parse(l4()?)?;
            let len = seg_len.saturating_sub(UDP_HDR_SZ);
            (udp.src, udp.dst, UDP_HDR_SZ, len)
        }

        _ => (0, 0, 0, seg_len),
    };

    let (key, src_to_dst) = FlowKey::new(
        pkt.vlan_id(),
        l3.proto,
        l3.version,
        (l3.src, src_port),
        (l3.dst, dst_port),
    );

    Ok(DerivedKey {
        key,
        src_to_dst,
        src_port,
        dst_port,
        payload_offset: l4_offset + payload_start,
        // Bounded by the u16 l4_len.
        payload_len: payload_len as u16,
    })
}
