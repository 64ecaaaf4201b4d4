// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Routines for building and replaying packet captures.

use super::packet::TestPkt;
use super::packet::parse_frame;
use flowdpi::engine::packet::PacketMeta;
use pcap_parser::Linktype;
use pcap_parser::ToVec;
use pcap_parser::pcap;
use pcap_parser::pcap::LegacyPcapBlock;
use pcap_parser::pcap::PcapHeader;
use std::io::Write;

pub const SNAPLEN: u32 = 65535;

/// Build a packet capture from a series of packets.
pub struct PcapBuilder<W: Write> {
    out: W,
}

impl<W: Write> PcapBuilder<W> {
    /// Create a new pcap builder, writing the capture to `out`.
    pub fn new(mut out: W) -> Self {
        let mut hdr = PcapHeader {
            magic_number: 0xa1b2c3d4,
            version_major: 2,
            version_minor: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen: SNAPLEN,
            network: Linktype::ETHERNET,
        };

        out.write_all(&hdr.to_vec().unwrap()).unwrap();
        Self { out }
    }

    /// Add a packet to the capture, stamped with its own timestamp.
    pub fn add_pkt(&mut self, pkt: &TestPkt) {
        let caplen = pkt.frame.len() as u32;
        let mut block = LegacyPcapBlock {
            ts_sec: pkt.ts_secs as u32,
            ts_usec: pkt.ts_usecs,
            caplen,
            origlen: pkt.wire_len.unwrap_or(caplen),
            data: &pkt.frame,
        };

        self.out.write_all(&block.to_vec().unwrap()).unwrap();
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// One frame read back from a capture.
#[derive(Clone, Debug)]
pub struct CapturedFrame {
    pub ts_sec: u32,
    pub ts_usec: u32,
    pub origlen: u32,
    pub data: Vec<u8>,
}

impl CapturedFrame {
    /// Locate the headers as a capture layer would. Returns `None` for
    /// a frame too short to carry an Ethernet header.
    pub fn meta(&self) -> Option<PacketMeta<'_>> {
        parse_frame(
            &self.data,
            u64::from(self.ts_sec),
            self.ts_usec,
            self.origlen,
        )
    }
}

/// Read every frame of a little-endian pcap capture.
pub fn read_pcap(bytes: &[u8]) -> Vec<CapturedFrame> {
    let (mut rest, hdr) = match pcap::parse_pcap_header(bytes) {
        Ok(res) => res,
        Err(e) => panic!("failed to get header: {e:?}"),
    };
    assert_eq!(hdr.network, Linktype::ETHERNET);

    let mut frames = vec![];
    while !rest.is_empty() {
        let block = match pcap::parse_pcap_frame(rest) {
            Ok((next, block)) => {
                rest = next;
                block
            }

            Err(e) => panic!("failed to get next block: {e:?}"),
        };

        frames.push(CapturedFrame {
            ts_sec: block.ts_sec,
            ts_usec: block.ts_usec,
            origlen: block.origlen,
            data: block.data.to_vec(),
        });
    }

    frames
}
