// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Idle flow eviction.
//!
//! At most once per scan period, one shard is swept for flows whose
//! last packet is older than the idle timeout. Shards are visited
//! round-robin. Candidates are force-completed during the walk and
//! queued; the queue is then drained out of the shard, so the walk
//! itself never changes the map's structure.

use super::classify::Classifier;
use super::classify::FlowHandler;
use super::dpi::DpiEngine;
use super::flow_key::FlowKey;
use super::flow_table::FlowTable;
use super::flow_table::Ttl;
use super::stat::WorkflowStats;
use super::time::Moment;
use crate::provider::flow_expired_probe;
use flowdpi_api::WorkflowCfg;
use slog::Logger;
use slog::debug;
use slog::o;

/// What a single sweep did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SweepSummary {
    pub shard: usize,
    pub expired: usize,
}

pub struct IdleScanner {
    log: Logger,
    ttl: Ttl,
    period_ms: u64,
    budget: usize,
    cursor: usize,
    last_scan: Moment,
    pending: Vec<FlowKey>,
}

impl IdleScanner {
    pub fn new(log: &Logger, cfg: &WorkflowCfg) -> Self {
        let budget = cfg.idle_scan_budget.max(1) as usize;

        Self {
            log: log.new(o!("component" => "idle")),
            ttl: Ttl::new_millis(cfg.idle_timeout_ms),
            period_ms: cfg.idle_scan_period_ms,
            budget,
            cursor: 0,
            last_scan: Moment::default(),
            pending: Vec::with_capacity(budget),
        }
    }

    /// The shard the next sweep visits.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn last_scan(&self) -> Moment {
        self.last_scan
    }

    pub fn is_due(&self, now: Moment) -> bool {
        now.delta_as_millis(self.last_scan) >= self.period_ms
    }

    /// Sweep the next shard if the scan period has elapsed.
    pub fn maybe_sweep<E, H>(
        &mut self,
        now: Moment,
        table: &mut FlowTable<E>,
        engine: &mut E,
        handler: &mut H,
        classifier: &Classifier,
        stats: &mut WorkflowStats,
    ) -> Option<SweepSummary>
    where
        E: DpiEngine,
        H: FlowHandler<E>,
    {
        if !self.is_due(now) {
            return None;
        }

        Some(self.sweep(now, table, engine, handler, classifier, stats))
    }

    /// Sweep the shard under the cursor and advance it.
    pub fn sweep<E, H>(
        &mut self,
        now: Moment,
        table: &mut FlowTable<E>,
        engine: &mut E,
        handler: &mut H,
        classifier: &Classifier,
        stats: &mut WorkflowStats,
    ) -> SweepSummary
    where
        E: DpiEngine,
        H: FlowHandler<E>,
    {
        let idx = self.cursor;
        debug_assert!(self.pending.is_empty());

        if let Some(shard) = table.shard_mut(idx) {
            for (key, rec) in shard.iter_mut() {
                if self.pending.len() == self.budget {
                    break;
                }

                if rec.is_idle(now, self.ttl) {
                    classifier.force_complete(engine, handler, stats, rec);
                    self.pending.push(*key);
                }
            }
        }

        let expired = self.pending.len();
        for key in self.pending.drain(..) {
            if let Some(rec) = table.remove_from_shard(idx, &key) {
                flow_expired_probe(&key, rec.last_seen(), now);
                stats.flows_expired += 1;
            }
        }

        if expired > 0 {
            debug!(
                self.log,
                "idle sweep";
                "shard" => idx,
                "expired" => expired,
                "remaining" => table.len(),
            );
        }

        self.cursor = (idx + 1) % table.shard_count() as usize;
        self.last_scan = now;
        stats.idle_sweeps += 1;

        SweepSummary { shard: idx, expired }
    }
}
