// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The per-packet entry point.

use super::classify::Classifier;
use super::classify::FlowHandler;
use super::classify::Inspection;
use super::dpi::DpiEngine;
use super::flow_key;
use super::flow_key::FlowKey;
use super::flow_table::FlowRecord;
use super::flow_table::FlowTable;
use super::flow_table::Lookup;
use super::idle::IdleScanner;
use super::packet::DiscardReason;
use super::packet::PacketMeta;
use super::packet::WIRE_OVERHEAD;
use super::stat::StatProvider;
use super::stat::WorkflowStats;
use super::stat::WorkflowStatsSnap;
use super::time::Moment;
use super::time::PacketClock;
use flowdpi_api::FlowError;
use flowdpi_api::Verdict;
use flowdpi_api::WorkflowCfg;
use slog::Logger;
use slog::debug;
use slog::info;
use slog::o;
use slog::trace;

/// The outcome of [`Workflow::process_packet()`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessResult {
    /// The packet was malformed and never reached a flow.
    Discarded(DiscardReason),

    /// The packet belonged to a new flow for which the engine could
    /// not allocate state.
    NoFlow,

    /// The engine was consulted and the flow is still open.
    Inspecting(Verdict),

    /// This packet completed the flow.
    Completed(Verdict),

    /// The flow was already complete.
    Cached(Verdict),
}

impl ProcessResult {
    /// The flow's verdict, [`Verdict::UNKNOWN`] when there is no flow.
    pub fn verdict(&self) -> Verdict {
        match self {
            Self::Discarded(_) | Self::NoFlow => Verdict::UNKNOWN,
            Self::Inspecting(v) | Self::Completed(v) | Self::Cached(v) => *v,
        }
    }
}

impl From<Inspection> for ProcessResult {
    fn from(i: Inspection) -> Self {
        match i {
            Inspection::Inspecting(v) => Self::Inspecting(v),
            Inspection::Completed(v) => Self::Completed(v),
            Inspection::Cached(v) => Self::Cached(v),
        }
    }
}

/// A flow classification pipeline.
///
/// A workflow is owned by one thread and processes packets in capture
/// order. The engine and handler are owned for its whole life.
pub struct Workflow<E: DpiEngine, H: FlowHandler<E>> {
    log: Logger,
    cfg: WorkflowCfg,
    engine: E,
    handler: H,
    table: FlowTable<E>,
    classifier: Classifier,
    scanner: IdleScanner,
    clock: PacketClock,
    stats: WorkflowStats,
    halted: bool,
}

impl<E: DpiEngine, H: FlowHandler<E>> Workflow<E, H> {
    pub fn new(
        engine: E,
        handler: H,
        cfg: WorkflowCfg,
        log: &Logger,
    ) -> Result<Self, FlowError> {
        cfg.validate()?;

        let log = log.new(o!("workflow" => "flowdpi"));
        info!(
            log,
            "workflow created";
            "shards" => cfg.shard_count,
            "max_flows" => cfg.max_flows,
            "idle_timeout_ms" => cfg.idle_timeout_ms,
            "protocol_guess" => cfg.protocol_guess,
        );

        Ok(Self {
            table: FlowTable::new(&log, cfg.shard_count, cfg.max_flows),
            classifier: Classifier::new(&log, &cfg),
            scanner: IdleScanner::new(&log, &cfg),
            clock: PacketClock::new(),
            stats: WorkflowStats::new(),
            halted: false,
            engine,
            handler,
            cfg,
            log,
        })
    }

    /// Process one captured packet.
    ///
    /// # Errors
    ///
    /// [`FlowError::MaxCapacity`] if the packet starts a new flow while
    /// the table is full. The workflow is halted from then on and
    /// every later call returns [`FlowError::Halted`].
    pub fn process_packet(
        &mut self,
        pkt: &PacketMeta,
    ) -> Result<ProcessResult, FlowError> {
        if self.halted {
            return Err(FlowError::Halted { limit: self.cfg.max_flows });
        }

        self.stats.raw_packets += 1;
        let now = self.clock.advance(pkt.ts_secs, pkt.ts_usecs);

        let res = self.handle_packet(pkt, now)?;
        self.scanner.maybe_sweep(
            now,
            &mut self.table,
            &mut self.engine,
            &mut self.handler,
            &self.classifier,
            &mut self.stats,
        );

        Ok(res)
    }

    fn handle_packet(
        &mut self,
        pkt: &PacketMeta,
        now: Moment,
    ) -> Result<ProcessResult, FlowError> {
        let derived = match flow_key::derive(pkt) {
            Ok(d) => d,
            Err(reason) => {
                trace!(self.log, "discarded"; "reason" => %reason);
                self.stats.discarded_packets += 1;
                return Ok(ProcessResult::Discarded(reason));
            }
        };

        let lookup = self.table.lookup_or_insert(
            &mut self.engine,
            &derived.key,
            derived.src_to_dst,
            now,
        );

        let hit = match lookup {
            Ok(Lookup::Found(hit)) => hit,
            Ok(Lookup::NoFlow(_)) => {
                self.stats.alloc_failures += 1;
                self.stats.discarded_packets += 1;
                return Ok(ProcessResult::NoFlow);
            }
            Err(e) => {
                self.halted = true;
                return Err(e);
            }
        };

        if hit.created {
            self.stats.flows_created += 1;
        }

        self.stats.ip_packets += 1;
        self.stats.ip_bytes += u64::from(pkt.wire_len);
        self.stats.wire_bytes += u64::from(pkt.wire_len) + WIRE_OVERHEAD;

        hit.record.hit(pkt.wire_len, now);
        let ip = pkt.l3_bytes().unwrap_or_default();
        let res = self.classifier.inspect(
            &mut self.engine,
            &mut self.handler,
            &mut self.stats,
            hit.record,
            hit.forward,
            ip,
            now,
        );

        Ok(res.into())
    }

    /// Complete every open flow and empty the table.
    ///
    /// Open flows go through give-up (and the port guess, if enabled)
    /// and reach the handler just as with idle eviction.
    pub fn drain(&mut self) {
        for rec in self.table.iter_mut() {
            self.classifier.force_complete(
                &mut self.engine,
                &mut self.handler,
                &mut self.stats,
                rec,
            );
        }

        debug!(self.log, "drained"; "flows" => self.table.len());
        self.table.clear();
    }

    pub fn stats(&self) -> WorkflowStatsSnap {
        self.stats.snapshot()
    }

    /// The number of flow records in the table.
    pub fn num_flows(&self) -> u64 {
        self.table.len()
    }

    pub fn flow(&self, key: &FlowKey) -> Option<&FlowRecord<E>> {
        self.table.get(key)
    }

    pub fn flows(&self) -> impl Iterator<Item = &FlowRecord<E>> {
        self.table.iter()
    }

    pub fn table(&self) -> &FlowTable<E> {
        &self.table
    }

    pub fn scanner(&self) -> &IdleScanner {
        &self.scanner
    }

    pub fn cfg(&self) -> &WorkflowCfg {
        &self.cfg
    }

    /// The latest moment on the packet clock.
    pub fn now(&self) -> Moment {
        self.clock.now()
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }
}
