// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Builders for captured frames.

use flowdpi::engine::ip4::IPV4_HDR_SZ;
use flowdpi::engine::ip4::Ipv4HdrRaw;
use flowdpi::engine::ip4::PROTO_ICMP;
use flowdpi::engine::ip4::PROTO_TCP;
use flowdpi::engine::ip4::PROTO_UDP;
use flowdpi::engine::ip6::IPV6_HDR_SZ;
use flowdpi::engine::ip6::Ipv6HdrRaw;
use flowdpi::engine::ip6::NEXT_HDR_DSTOPTS;
use flowdpi::engine::packet::ETHER_TYPE_IPV4;
use flowdpi::engine::packet::ETHER_TYPE_IPV6;
use flowdpi::engine::packet::PacketMeta;
use flowdpi::engine::tcp::TCP_HDR_SZ;
use flowdpi::engine::tcp::TcpHdrRaw;
use flowdpi::engine::udp::UDP_HDR_SZ;
use flowdpi::engine::udp::UdpHdrRaw;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;
use zerocopy::IntoBytes;

pub const ETHER_HDR_SZ: usize = 14;
pub const ETHER_TYPE_VLAN: u16 = 0x8100;
pub const VLAN_TAG_SZ: usize = 4;

pub const SRC_MAC: [u8; 6] = [0xA8, 0x40, 0x25, 0x00, 0x00, 0x01];
pub const DST_MAC: [u8; 6] = [0xA8, 0x40, 0x25, 0x00, 0x00, 0x02];

/// A captured frame plus the metadata a capture layer would supply.
#[derive(Clone, Debug)]
pub struct TestPkt {
    pub frame: Vec<u8>,
    pub l3_offset: usize,
    pub ethertype: u16,
    pub vlan_tag: Option<[u8; 2]>,
    pub ts_secs: u64,
    pub ts_usecs: u32,
    /// Overrides the wire length, which defaults to the frame length.
    pub wire_len: Option<u32>,
    pub frag_first_seen: bool,
}

impl TestPkt {
    fn new(l3: Vec<u8>, ethertype: u16) -> Self {
        let mut frame = Vec::with_capacity(ETHER_HDR_SZ + l3.len());
        frame.extend_from_slice(&DST_MAC);
        frame.extend_from_slice(&SRC_MAC);
        frame.extend_from_slice(&ethertype.to_be_bytes());
        frame.extend_from_slice(&l3);

        Self {
            frame,
            l3_offset: ETHER_HDR_SZ,
            ethertype,
            vlan_tag: None,
            ts_secs: 0,
            ts_usecs: 0,
            wire_len: None,
            frag_first_seen: false,
        }
    }

    /// Set the capture timestamp.
    pub fn at(mut self, secs: u64, usecs: u32) -> Self {
        self.ts_secs = secs;
        self.ts_usecs = usecs;
        self
    }

    /// Set the capture timestamp from milliseconds.
    pub fn at_millis(self, millis: u64) -> Self {
        let usecs = ((millis % 1_000) * 1_000) as u32;
        self.at(millis / 1_000, usecs)
    }

    /// Insert an 802.1Q tag carrying `tci`.
    pub fn with_vlan(mut self, tci: u16) -> Self {
        let tci = tci.to_be_bytes();
        let at = 2 * SRC_MAC.len();
        let mut tag = ETHER_TYPE_VLAN.to_be_bytes().to_vec();
        tag.extend_from_slice(&tci);
        let _ = self.frame.splice(at..at, tag);
        self.l3_offset += VLAN_TAG_SZ;
        self.vlan_tag = Some(tci);
        self
    }

    pub fn with_wire_len(mut self, len: u32) -> Self {
        self.wire_len = Some(len);
        self
    }

    pub fn with_frag_first_seen(mut self) -> Self {
        self.frag_first_seen = true;
        self
    }

    /// The network header onwards.
    pub fn l3(&self) -> &[u8] {
        &self.frame[self.l3_offset..]
    }

    pub fn meta(&self) -> PacketMeta<'_> {
        let mut meta = PacketMeta::new(
            &self.frame,
            self.l3_offset,
            self.ethertype,
            self.ts_secs,
            self.ts_usecs,
        );
        if let Some(len) = self.wire_len {
            meta.wire_len = len;
        }
        meta.vlan_tag = self.vlan_tag;
        meta.frag_first_seen = self.frag_first_seen;
        meta
    }
}

fn tcp_hdr(sport: u16, dport: u16) -> TcpHdrRaw {
    TcpHdrRaw {
        src_port: sport.to_be_bytes(),
        dst_port: dport.to_be_bytes(),
        seq: 1u32.to_be_bytes(),
        // Data offset 5 words, no options.
        offset: 0x50,
        // ACK|PSH
        flags: 0x18,
        win: 64240u16.to_be_bytes(),
        ..Default::default()
    }
}

fn udp_hdr(sport: u16, dport: u16, payload_len: usize) -> UdpHdrRaw {
    UdpHdrRaw {
        src_port: sport.to_be_bytes(),
        dst_port: dport.to_be_bytes(),
        length: ((UDP_HDR_SZ + payload_len) as u16).to_be_bytes(),
        ..Default::default()
    }
}

fn ipv4(
    proto: u8,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    l4: &[u8],
    frag_and_flags: u16,
) -> TestPkt {
    let hdr = Ipv4HdrRaw {
        total_len: ((IPV4_HDR_SZ + l4.len()) as u16).to_be_bytes(),
        frag_and_flags: frag_and_flags.to_be_bytes(),
        proto,
        src: src.octets(),
        dst: dst.octets(),
        ..Default::default()
    };
    let mut l3 = hdr.as_bytes().to_vec();
    l3.extend_from_slice(l4);
    TestPkt::new(l3, ETHER_TYPE_IPV4)
}

fn ipv6(next_hdr: u8, src: Ipv6Addr, dst: Ipv6Addr, rest: &[u8]) -> TestPkt {
    let hdr = Ipv6HdrRaw {
        payload_len: (rest.len() as u16).to_be_bytes(),
        next_hdr,
        src: src.octets(),
        dst: dst.octets(),
        ..Default::default()
    };
    let mut l3 = hdr.as_bytes().to_vec();
    l3.extend_from_slice(rest);
    TestPkt::new(l3, ETHER_TYPE_IPV6)
}

fn tcp_segment(sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
    let mut l4 = tcp_hdr(sport, dport).as_bytes().to_vec();
    l4.extend_from_slice(payload);
    l4
}

fn udp_datagram(sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
    let mut l4 = udp_hdr(sport, dport, payload.len()).as_bytes().to_vec();
    l4.extend_from_slice(payload);
    l4
}

pub fn ipv4_tcp(
    src: (Ipv4Addr, u16),
    dst: (Ipv4Addr, u16),
    payload: &[u8],
) -> TestPkt {
    let l4 = tcp_segment(src.1, dst.1, payload);
    ipv4(PROTO_TCP, src.0, dst.0, &l4, 0x4000)
}

pub fn ipv4_udp(
    src: (Ipv4Addr, u16),
    dst: (Ipv4Addr, u16),
    payload: &[u8],
) -> TestPkt {
    let l4 = udp_datagram(src.1, dst.1, payload);
    ipv4(PROTO_UDP, src.0, dst.0, &l4, 0x4000)
}

/// An ICMP echo request.
pub fn ipv4_icmp(src: Ipv4Addr, dst: Ipv4Addr) -> TestPkt {
    let l4 = [8, 0, 0, 0, 0, 1, 0, 1];
    ipv4(PROTO_ICMP, src, dst, &l4, 0)
}

/// A UDP datagram fragment at `offset` (in 8-byte units). Offset zero
/// carries the UDP header; later fragments carry raw payload only.
pub fn ipv4_fragment(
    src: (Ipv4Addr, u16),
    dst: (Ipv4Addr, u16),
    offset: u16,
    payload: &[u8],
) -> TestPkt {
    // MF set.
    let flags = 0x2000 | (offset & 0x1FFF);
    if offset == 0 {
        let l4 = udp_datagram(src.1, dst.1, payload);
        ipv4(PROTO_UDP, src.0, dst.0, &l4, flags)
    } else {
        ipv4(PROTO_UDP, src.0, dst.0, payload, flags)
    }
}

/// A UDP datagram whose IPv4 total length claims only
/// `declared_l4_len` transport bytes.
pub fn ipv4_udp_short(
    src: (Ipv4Addr, u16),
    dst: (Ipv4Addr, u16),
    declared_l4_len: u16,
) -> TestPkt {
    let mut pkt = ipv4_udp(src, dst, &[]);
    let total = (IPV4_HDR_SZ as u16 + declared_l4_len).to_be_bytes();
    let at = pkt.l3_offset + 2;
    pkt.frame[at..at + 2].copy_from_slice(&total);
    pkt
}

pub fn ipv6_udp(
    src: (Ipv6Addr, u16),
    dst: (Ipv6Addr, u16),
    payload: &[u8],
) -> TestPkt {
    let l4 = udp_datagram(src.1, dst.1, payload);
    ipv6(PROTO_UDP, src.0, dst.0, &l4)
}

pub fn ipv6_tcp(
    src: (Ipv6Addr, u16),
    dst: (Ipv6Addr, u16),
    payload: &[u8],
) -> TestPkt {
    let l4 = tcp_segment(src.1, dst.1, payload);
    ipv6(PROTO_TCP, src.0, dst.0, &l4)
}

/// A TCP segment behind an 8-byte Destination Options header.
pub fn ipv6_dstopts_tcp(
    src: (Ipv6Addr, u16),
    dst: (Ipv6Addr, u16),
    payload: &[u8],
) -> TestPkt {
    // Next Header TCP, length 0, PadN over the remaining 4 bytes.
    let mut rest = vec![PROTO_TCP, 0, 1, 4, 0, 0, 0, 0];
    rest.extend_from_slice(&tcp_segment(src.1, dst.1, payload));
    ipv6(NEXT_HDR_DSTOPTS, src.0, dst.0, &rest)
}

/// The size of the network and transport headers built above.
pub const fn hdrs_len(ipv6: bool, tcp: bool) -> usize {
    let l3 = if ipv6 { IPV6_HDR_SZ } else { IPV4_HDR_SZ };
    let l4 = if tcp { TCP_HDR_SZ } else { UDP_HDR_SZ };
    ETHER_HDR_SZ + l3 + l4
}

fn two_bytes(frame: &[u8], off: usize) -> Option<[u8; 2]> {
    frame.get(off..off + 2)?.try_into().ok()
}

/// Locate the network header of an Ethernet frame, the way a capture
/// layer would.
pub fn parse_frame(
    frame: &[u8],
    ts_secs: u64,
    ts_usecs: u32,
    wire_len: u32,
) -> Option<PacketMeta<'_>> {
    let mut off = 2 * SRC_MAC.len();
    let mut ethertype = u16::from_be_bytes(two_bytes(frame, off)?);
    let mut vlan_tag = None;
    off += 2;

    if ethertype == ETHER_TYPE_VLAN {
        vlan_tag = Some(two_bytes(frame, off)?);
        ethertype = u16::from_be_bytes(two_bytes(frame, off + 2)?);
        off += VLAN_TAG_SZ;
    }

    let mut meta = PacketMeta::new(frame, off, ethertype, ts_secs, ts_usecs);
    meta.wire_len = wire_len;
    meta.vlan_tag = vlan_tag;
    Some(meta)
}
