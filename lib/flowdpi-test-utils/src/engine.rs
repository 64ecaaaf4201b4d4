// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A scripted DPI engine.

use flowdpi::engine::dpi::AllocError;
use flowdpi::engine::dpi::DpiEngine;
use flowdpi::engine::flow_key::FlowKey;
use flowdpi::engine::time::Moment;
use flowdpi_api::Verdict;
use std::cell::Cell;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::rc::Rc;

/// Tracks every blob the engine hands out.
#[derive(Debug, Default)]
pub struct BlobCounters {
    created: Cell<u64>,
    dropped: Cell<u64>,
    double_drops: Cell<u64>,
    live: RefCell<BTreeSet<u64>>,
}

impl BlobCounters {
    pub fn created(&self) -> u64 {
        self.created.get()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.get()
    }

    /// Drops of a blob id that was not live.
    pub fn double_drops(&self) -> u64 {
        self.double_drops.get()
    }

    pub fn live(&self) -> usize {
        self.live.borrow().len()
    }

    pub fn is_live(&self, id: u64) -> bool {
        self.live.borrow().contains(&id)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlobKind {
    Identity,
    Inspection,
}

/// An engine-owned piece of state.
#[derive(Debug)]
pub struct MockBlob {
    pub id: u64,
    pub kind: BlobKind,
    counters: Rc<BlobCounters>,
}

impl Drop for MockBlob {
    fn drop(&mut self) {
        let c = &self.counters;
        c.dropped.set(c.dropped.get() + 1);
        if !c.live.borrow_mut().remove(&self.id) {
            c.double_drops.set(c.double_drops.get() + 1);
        }
    }
}

/// One call to [`DpiEngine::classify()`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClassifyCall {
    pub flow: u64,
    pub local: u64,
    pub remote: u64,
    pub ip_len: usize,
    pub ts: Moment,
}

/// A [`DpiEngine`] whose answers are set up front.
///
/// Each `classify()` call pops the next scripted verdict. Once the
/// script runs dry, payload rules are consulted, then `UNKNOWN`.
#[derive(Debug)]
pub struct MockEngine {
    counters: Rc<BlobCounters>,
    next_id: u64,
    script: VecDeque<Verdict>,
    payload_rules: Vec<(Vec<u8>, Verdict)>,
    giveup_verdict: Verdict,
    guess_verdict: Verdict,
    allocs_left: Option<u64>,
    pub calls: Vec<ClassifyCall>,
    pub giveup_calls: u64,
    pub guess_calls: u64,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            counters: Rc::new(BlobCounters::default()),
            next_id: 1,
            script: VecDeque::new(),
            payload_rules: vec![],
            giveup_verdict: Verdict::UNKNOWN,
            guess_verdict: Verdict::UNKNOWN,
            allocs_left: None,
            calls: vec![],
            giveup_calls: 0,
            guess_calls: 0,
        }
    }

    /// Answer the next classify calls with `verdicts`, in order.
    pub fn with_script<I>(mut self, verdicts: I) -> Self
    where
        I: IntoIterator<Item = Verdict>,
    {
        self.script.extend(verdicts);
        self
    }

    /// Return `verdict` for any packet containing `needle`.
    pub fn detect_payload(mut self, needle: &[u8], verdict: Verdict) -> Self {
        self.payload_rules.push((needle.to_vec(), verdict));
        self
    }

    pub fn giveup_with(mut self, verdict: Verdict) -> Self {
        self.giveup_verdict = verdict;
        self
    }

    pub fn guess_with(mut self, verdict: Verdict) -> Self {
        self.guess_verdict = verdict;
        self
    }

    /// Let only `n` more blob allocations succeed.
    pub fn fail_allocs_after(mut self, n: u64) -> Self {
        self.allocs_left = Some(n);
        self
    }

    pub fn blob_counters(&self) -> Rc<BlobCounters> {
        Rc::clone(&self.counters)
    }

    fn alloc(&mut self, kind: BlobKind) -> Option<MockBlob> {
        if let Some(left) = self.allocs_left.as_mut() {
            if *left == 0 {
                return None;
            }
            *left -= 1;
        }

        let id = self.next_id;
        self.next_id += 1;
        let c = &self.counters;
        c.created.set(c.created.get() + 1);
        c.live.borrow_mut().insert(id);
        Some(MockBlob { id, kind, counters: Rc::clone(c) })
    }
}

impl DpiEngine for MockEngine {
    type IdentityState = MockBlob;
    type InspectionState = MockBlob;

    fn new_identity_state(&mut self) -> Result<MockBlob, AllocError> {
        self.alloc(BlobKind::Identity).ok_or(AllocError::Identity)
    }

    fn new_inspection_state(&mut self) -> Result<MockBlob, AllocError> {
        self.alloc(BlobKind::Inspection).ok_or(AllocError::Inspection)
    }

    fn classify(
        &mut self,
        flow: &mut MockBlob,
        ip: &[u8],
        ts: Moment,
        local: &mut MockBlob,
        remote: &mut MockBlob,
    ) -> Verdict {
        assert_eq!(flow.kind, BlobKind::Inspection);
        assert_eq!(local.kind, BlobKind::Identity);
        assert_eq!(remote.kind, BlobKind::Identity);
        assert!(self.counters.is_live(flow.id), "use after release");

        self.calls.push(ClassifyCall {
            flow: flow.id,
            local: local.id,
            remote: remote.id,
            ip_len: ip.len(),
            ts,
        });

        if let Some(v) = self.script.pop_front() {
            return v;
        }

        self.payload_rules
            .iter()
            .find(|(needle, _)| {
                !needle.is_empty()
                    && ip.windows(needle.len()).any(|w| w == needle.as_slice())
            })
            .map_or(Verdict::UNKNOWN, |(_, v)| *v)
    }

    fn giveup(&mut self, flow: &mut MockBlob) -> Verdict {
        assert!(self.counters.is_live(flow.id), "give-up after release");
        self.giveup_calls += 1;
        self.giveup_verdict
    }

    fn guess(&mut self, _key: &FlowKey) -> Verdict {
        self.guess_calls += 1;
        self.guess_verdict
    }
}
