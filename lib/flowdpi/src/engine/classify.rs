// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The per-flow classification state machine.
//!
//! A flow is `Open` while the engine is consulted. It becomes
//! `Completed` once the engine names an application protocol or the
//! transport's packet budget is spent. Completion fires exactly one
//! handler callback and then drops the engine state; later packets get
//! the cached verdict.

use super::dpi::DpiEngine;
use super::flow_table::FlowRecord;
use super::ip4::PROTO_TCP;
use super::ip4::PROTO_UDP;
use super::stat::WorkflowStats;
use super::time::Moment;
use crate::provider::flow_completed_probe;
use flowdpi_api::FlowStatus;
use flowdpi_api::Verdict;
use flowdpi_api::WorkflowCfg;
use slog::Logger;
use slog::debug;
use slog::o;
use slog::trace;

/// Receives flows as they complete.
///
/// The record is passed after its final verdict is set and before its
/// engine state is dropped.
pub trait FlowHandler<E: DpiEngine> {
    /// The engine named an application protocol.
    fn on_detected(&mut self, _flow: &FlowRecord<E>) {}

    /// The flow completed without a concrete application protocol.
    fn on_giveup(&mut self, _flow: &FlowRecord<E>) {}
}

impl<E: DpiEngine> FlowHandler<E> for () {}

/// The result of driving one packet through a flow.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Inspection {
    /// The engine was consulted and the flow is still open.
    Inspecting(Verdict),
    /// This packet completed the flow.
    Completed(Verdict),
    /// The flow was already complete; the engine was not consulted.
    Cached(Verdict),
}

impl Inspection {
    pub fn verdict(&self) -> Verdict {
        match self {
            Self::Inspecting(v) | Self::Completed(v) | Self::Cached(v) => *v,
        }
    }
}

/// Why a flow is being completed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompleteReason {
    /// Detected, or the packet budget ran out.
    Inspected,
    /// Idle eviction or teardown.
    Forced,
}

pub struct Classifier {
    log: Logger,
    udp_giveup_packets: u64,
    tcp_giveup_packets: u64,
    protocol_guess: bool,
}

impl Classifier {
    pub fn new(log: &Logger, cfg: &WorkflowCfg) -> Self {
        Self {
            log: log.new(o!("component" => "classify")),
            udp_giveup_packets: cfg.udp_giveup_packets,
            tcp_giveup_packets: cfg.tcp_giveup_packets,
            protocol_guess: cfg.protocol_guess,
        }
    }

    /// Has this open flow used up its packet budget?
    pub fn budget_spent<E: DpiEngine>(&self, rec: &FlowRecord<E>) -> bool {
        match rec.key().protocol {
            PROTO_UDP => rec.packet_count() > self.udp_giveup_packets,
            PROTO_TCP => rec.packet_count() > self.tcp_giveup_packets,
            _ => false,
        }
    }

    /// Feed the current packet of `rec` to the engine.
    ///
    /// The record's counters must already account for this packet.
    #[allow(clippy::too_many_arguments)]
    pub fn inspect<E, H>(
        &self,
        engine: &mut E,
        handler: &mut H,
        stats: &mut WorkflowStats,
        rec: &mut FlowRecord<E>,
        forward: bool,
        ip: &[u8],
        now: Moment,
    ) -> Inspection
    where
        E: DpiEngine,
        H: FlowHandler<E>,
    {
        if rec.status() == FlowStatus::Completed {
            return Inspection::Cached(rec.verdict());
        }

        let Some(blobs) = rec.blobs_mut() else {
            return Inspection::Cached(rec.verdict());
        };

        let (flow, local, remote) = blobs.split(forward);
        let verdict = engine.classify(flow, ip, now, local, remote);
        rec.set_verdict(verdict);

        trace!(
            self.log,
            "inspected";
            "flow" => %rec.key(),
            "packets" => rec.packet_count(),
            "forward" => forward,
            "verdict" => %verdict,
        );

        if verdict.is_detected() || self.budget_spent(rec) {
            let reason = CompleteReason::Inspected;
            self.complete(engine, handler, stats, rec, reason);
            Inspection::Completed(rec.verdict())
        } else {
            Inspection::Inspecting(verdict)
        }
    }

    /// Complete `rec` regardless of its budget.
    ///
    /// Returns `false` if the flow was already complete.
    pub fn force_complete<E, H>(
        &self,
        engine: &mut E,
        handler: &mut H,
        stats: &mut WorkflowStats,
        rec: &mut FlowRecord<E>,
    ) -> bool
    where
        E: DpiEngine,
        H: FlowHandler<E>,
    {
        if rec.status() == FlowStatus::Completed {
            return false;
        }

        self.complete(engine, handler, stats, rec, CompleteReason::Forced);
        true
    }

    fn complete<E, H>(
        &self,
        engine: &mut E,
        handler: &mut H,
        stats: &mut WorkflowStats,
        rec: &mut FlowRecord<E>,
        reason: CompleteReason,
    ) where
        E: DpiEngine,
        H: FlowHandler<E>,
    {
        if !rec.verdict().is_detected() {
            if let Some(blobs) = rec.blobs_mut() {
                let verdict = engine.giveup(&mut blobs.inspection);
                rec.set_verdict(verdict);
            }
        }

        if reason == CompleteReason::Forced
            && self.protocol_guess
            && !rec.verdict().is_detected()
        {
            let verdict = engine.guess(rec.key());
            rec.set_verdict(verdict);
        }

        rec.mark_completed();
        let verdict = rec.verdict();

        if verdict.is_detected() {
            stats.flows_detected += 1;
            handler.on_detected(rec);
        } else {
            stats.flows_giveup += 1;
            handler.on_giveup(rec);
        }

        debug!(
            self.log,
            "flow completed";
            "flow" => %rec.key(),
            "verdict" => %verdict,
            "packets" => rec.packet_count(),
            "reason" => ?reason,
        );
        flow_completed_probe(rec.key(), verdict, rec.packet_count());

        rec.release();
    }
}
