// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Shared setup for the flowdpi benchmarks.

use flowdpi::engine::AllocError;
use flowdpi::engine::DpiEngine;
use flowdpi::engine::FlowKey;
use flowdpi::engine::time::Moment;
use flowdpi_api::Verdict;
use flowdpi_test_utils::TestPkt;
use flowdpi_test_utils::ipv4_tcp;
use flowdpi_test_utils::ipv4_udp;
use std::net::Ipv4Addr;

/// An engine which never recognises anything, so every flow runs its
/// full packet budget. Guesses from the lower port.
#[derive(Debug, Default)]
pub struct BudgetEngine {
    pub classified: u64,
}

#[derive(Debug)]
pub struct Scratch([u8; 64]);

impl Default for Scratch {
    fn default() -> Self {
        Self([0; 64])
    }
}

impl DpiEngine for BudgetEngine {
    type IdentityState = Scratch;
    type InspectionState = Scratch;

    fn new_identity_state(&mut self) -> Result<Scratch, AllocError> {
        Ok(Scratch::default())
    }

    fn new_inspection_state(&mut self) -> Result<Scratch, AllocError> {
        Ok(Scratch::default())
    }

    fn classify(
        &mut self,
        flow: &mut Scratch,
        ip: &[u8],
        _ts: Moment,
        _local: &mut Scratch,
        _remote: &mut Scratch,
    ) -> Verdict {
        self.classified += 1;
        let n = ip.len().min(flow.0.len());
        flow.0[..n].copy_from_slice(&ip[..n]);
        Verdict::UNKNOWN
    }

    fn giveup(&mut self, _flow: &mut Scratch) -> Verdict {
        Verdict::UNKNOWN
    }

    fn guess(&mut self, key: &FlowKey) -> Verdict {
        Verdict::new(key.lower_port, 0)
    }
}

/// `flows` distinct client flows, alternating UDP and TCP, each
/// carrying `per_flow` packets. Packets are 1ms apart.
pub fn flow_mix(flows: u32, per_flow: u32) -> Vec<TestPkt> {
    let server = (Ipv4Addr::new(10, 99, 0, 1), 443);
    let mut pkts = Vec::with_capacity((flows * per_flow) as usize);

    for round in 0..per_flow {
        for i in 0..flows {
            let [_, b, c, d] = i.to_be_bytes();
            let port = 20000 + (i % 1000) as u16;
            let client = (Ipv4Addr::new(10, b, c, d), port);
            let pkt = if i % 2 == 0 {
                ipv4_udp(client, server, b"0123456789abcdef")
            } else {
                ipv4_tcp(server, client, b"0123456789abcdef")
            };
            pkts.push(pkt.at_millis(u64::from(round * flows + i)));
        }
    }

    pkts
}
