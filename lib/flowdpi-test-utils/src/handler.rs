// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A flow handler that remembers every callback.

use flowdpi::engine::classify::FlowHandler;
use flowdpi::engine::dpi::DpiEngine;
use flowdpi::engine::flow_key::FlowKey;
use flowdpi::engine::flow_table::FlowRecord;
use flowdpi_api::FlowStatus;
use flowdpi_api::Verdict;

/// A copy of a record as seen by a callback.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Completion {
    pub key: FlowKey,
    pub verdict: Verdict,
    pub status: FlowStatus,
    pub packets: u64,
    pub bytes: u64,
    /// Was the engine state still attached during the callback?
    pub held_blobs: bool,
}

impl<E: DpiEngine> From<&FlowRecord<E>> for Completion {
    fn from(rec: &FlowRecord<E>) -> Self {
        Self {
            key: *rec.key(),
            verdict: rec.verdict(),
            status: rec.status(),
            packets: rec.packet_count(),
            bytes: rec.byte_count(),
            held_blobs: rec.has_blobs(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Recorder {
    pub detected: Vec<Completion>,
    pub giveup: Vec<Completion>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of callbacks of either kind.
    pub fn total(&self) -> usize {
        self.detected.len() + self.giveup.len()
    }

    /// Every callback for `key`, detected first.
    pub fn for_key(&self, key: &FlowKey) -> Vec<Completion> {
        self.detected
            .iter()
            .chain(self.giveup.iter())
            .filter(|c| &c.key == key)
            .copied()
            .collect()
    }
}

impl<E: DpiEngine> FlowHandler<E> for Recorder {
    fn on_detected(&mut self, flow: &FlowRecord<E>) {
        self.detected.push(flow.into());
    }

    fn on_giveup(&mut self, flow: &FlowRecord<E>) {
        self.giveup.push(flow.into());
    }
}
