// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The sharded flow table.
//!
//! Flows are spread over a fixed number of shards by a cheap sum of
//! their key fields. Each shard is an ordered map, which lets the idle
//! scanner sweep one shard at a time without touching the others.

use super::dpi::AllocError;
use super::dpi::DpiEngine;
use super::dpi::FlowBlobs;
use super::flow_key::FlowKey;
use super::time::Moment;
use crate::provider::flow_created_probe;
use core::fmt;
use flowdpi_api::FlowError;
use flowdpi_api::FlowStatus;
use flowdpi_api::Verdict;
use slog::Logger;
use slog::crit;
use slog::debug;
use slog::error;
use slog::o;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

pub type Shard<E> = BTreeMap<FlowKey, FlowRecord<E>>;

/// The Time To Live in milliseconds.
#[derive(Clone, Copy, Debug)]
pub struct Ttl(u64);

impl Ttl {
    pub const fn new_millis(millis: u64) -> Self {
        Ttl(millis)
    }

    /// Has more than the TTL passed since `last_hit`?
    pub fn is_expired(&self, last_hit: Moment, now: Moment) -> bool {
        now.delta_as_millis(last_hit) > self.0
    }
}

/// The state of one flow.
pub struct FlowRecord<E: DpiEngine> {
    key: FlowKey,
    packet_count: u64,
    byte_count: u64,
    first_seen: Moment,
    last_seen: Moment,
    status: FlowStatus,
    verdict: Verdict,
    direction_of_first_packet: bool,
    blobs: Option<FlowBlobs<E>>,
}

impl<E: DpiEngine> FlowRecord<E> {
    fn new(
        key: FlowKey,
        src_to_dst: bool,
        now: Moment,
        blobs: FlowBlobs<E>,
    ) -> Self {
        Self {
            key,
            packet_count: 0,
            byte_count: 0,
            first_seen: now,
            last_seen: now,
            status: FlowStatus::Open,
            verdict: Verdict::UNKNOWN,
            direction_of_first_packet: src_to_dst,
            blobs: Some(blobs),
        }
    }

    pub fn key(&self) -> &FlowKey {
        &self.key
    }

    pub fn packet_count(&self) -> u64 {
        self.packet_count
    }

    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }

    pub fn first_seen(&self) -> Moment {
        self.first_seen
    }

    pub fn last_seen(&self) -> Moment {
        self.last_seen
    }

    pub fn status(&self) -> FlowStatus {
        self.status
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    /// The `src_to_dst` bit of the packet which created this flow.
    pub fn direction_of_first_packet(&self) -> bool {
        self.direction_of_first_packet
    }

    /// Is the engine state still held?
    pub fn has_blobs(&self) -> bool {
        self.blobs.is_some()
    }

    /// Does a packet with this `src_to_dst` bit travel in the same
    /// direction as the first packet?
    pub fn is_forward(&self, src_to_dst: bool) -> bool {
        src_to_dst == self.direction_of_first_packet
    }

    pub fn is_idle(&self, now: Moment, ttl: Ttl) -> bool {
        ttl.is_expired(self.last_seen, now)
    }

    /// Account for a packet of `wire_len` bytes seen at `now`.
    pub(crate) fn hit(&mut self, wire_len: u32, now: Moment) {
        self.packet_count += 1;
        self.byte_count += u64::from(wire_len);
        self.last_seen = now;
    }

    pub(crate) fn blobs_mut(&mut self) -> Option<&mut FlowBlobs<E>> {
        self.blobs.as_mut()
    }

    pub(crate) fn set_verdict(&mut self, verdict: Verdict) {
        self.verdict = verdict;
    }

    pub(crate) fn mark_completed(&mut self) {
        self.status = FlowStatus::Completed;
    }

    /// Drop the engine state. Returns `false` if it was already gone.
    pub(crate) fn release(&mut self) -> bool {
        self.blobs.take().is_some()
    }
}

impl<E: DpiEngine> fmt::Debug for FlowRecord<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FlowRecord")
            .field("key", &self.key)
            .field("packet_count", &self.packet_count)
            .field("byte_count", &self.byte_count)
            .field("first_seen", &self.first_seen)
            .field("last_seen", &self.last_seen)
            .field("status", &self.status)
            .field("verdict", &self.verdict)
            .field("direction_of_first_packet", &self.direction_of_first_packet)
            .field("has_blobs", &self.blobs.is_some())
            .finish()
    }
}

/// A flow found or created by [`FlowTable::lookup_or_insert()`].
pub struct FlowHit<'a, E: DpiEngine> {
    pub record: &'a mut FlowRecord<E>,
    /// Does the packet travel in the first packet's direction?
    pub forward: bool,
    pub created: bool,
}

pub enum Lookup<'a, E: DpiEngine> {
    Found(FlowHit<'a, E>),
    /// The engine could not supply state for a new flow. The table is
    /// unchanged.
    NoFlow(AllocError),
}

impl<E: DpiEngine> fmt::Debug for Lookup<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Found(hit) => f.debug_tuple("Found").field(hit).finish(),
            Self::NoFlow(e) => f.debug_tuple("NoFlow").field(e).finish(),
        }
    }
}

impl<E: DpiEngine> fmt::Debug for FlowHit<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FlowHit")
            .field("record", &self.record)
            .field("forward", &self.forward)
            .field("created", &self.created)
            .finish()
    }
}

pub struct FlowTable<E: DpiEngine> {
    log: Logger,
    shards: Vec<Shard<E>>,
    limit: u64,
    flow_count: u64,
}

impl<E: DpiEngine> FlowTable<E> {
    pub fn new(log: &Logger, shard_count: u32, limit: u64) -> Self {
        let shard_count = shard_count.max(1);
        let mut shards = Vec::with_capacity(shard_count as usize);
        shards.resize_with(shard_count as usize, BTreeMap::new);

        Self {
            log: log.new(o!("component" => "flow_table")),
            shards,
            limit,
            flow_count: 0,
        }
    }

    /// Return the record for `key`, creating it if needed.
    ///
    /// # Errors
    ///
    /// If the key is new and the table already holds `limit` flows,
    /// [`FlowError::MaxCapacity`] is returned and nothing is modified.
    pub fn lookup_or_insert<'a>(
        &'a mut self,
        engine: &mut E,
        key: &FlowKey,
        src_to_dst: bool,
        now: Moment,
    ) -> Result<Lookup<'a, E>, FlowError> {
        let idx = key.shard_index(self.shard_count());
        let at_capacity = self.flow_count >= self.limit;

        match self.shards[idx].entry(*key) {
            Entry::Occupied(entry) => {
                let record = entry.into_mut();
                let forward = record.is_forward(src_to_dst);
                Ok(Lookup::Found(FlowHit { record, forward, created: false }))
            }

            Entry::Vacant(entry) => {
                if at_capacity {
                    crit!(
                        self.log,
                        "maximum flow count exceeded";
                        "limit" => self.limit,
                        "flow" => %key,
                    );
                    return Err(FlowError::MaxCapacity(self.limit));
                }

                let blobs = match FlowBlobs::new(engine) {
                    Ok(blobs) => blobs,
                    Err(e) => {
                        error!(
                            self.log,
                            "cannot create flow";
                            "flow" => %key,
                            "err" => %e,
                        );
                        return Ok(Lookup::NoFlow(e));
                    }
                };

                debug!(
                    self.log,
                    "flow created";
                    "flow" => %key,
                    "shard" => idx,
                );
                flow_created_probe(key, idx);
                self.flow_count += 1;

                let rec = FlowRecord::new(*key, src_to_dst, now, blobs);
                let record = entry.insert(rec);
                Ok(Lookup::Found(FlowHit {
                    record,
                    forward: true,
                    created: true,
                }))
            }
        }
    }

    pub fn get(&self, key: &FlowKey) -> Option<&FlowRecord<E>> {
        self.shards[self.index_of(key)].get(key)
    }

    /// Remove every flow, dropping whatever engine state is left. Open
    /// flows must be force-completed first.
    pub(crate) fn clear(&mut self) {
        self.shards.iter_mut().for_each(|s| s.clear());
        self.flow_count = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlowRecord<E>> {
        self.shards.iter().flat_map(|s| s.values())
    }

    pub(crate) fn iter_mut(
        &mut self,
    ) -> impl Iterator<Item = &mut FlowRecord<E>> {
        self.shards.iter_mut().flat_map(|s| s.values_mut())
    }

    pub(crate) fn shard_mut(&mut self, idx: usize) -> Option<&mut Shard<E>> {
        self.shards.get_mut(idx)
    }

    /// Remove `key` from shard `idx`.
    pub(crate) fn remove_from_shard(
        &mut self,
        idx: usize,
        key: &FlowKey,
    ) -> Option<FlowRecord<E>> {
        let removed = self.shards.get_mut(idx)?.remove(key);
        if removed.is_some() {
            self.flow_count -= 1;
        }
        removed
    }

    pub fn shard_len(&self, idx: usize) -> usize {
        self.shards.get(idx).map_or(0, |s| s.len())
    }

    pub fn shard_count(&self) -> u32 {
        self.shards.len() as u32
    }

    /// Get the number of flows in this table.
    pub fn len(&self) -> u64 {
        self.flow_count
    }

    fn index_of(&self, key: &FlowKey) -> usize {
        key.shard_index(self.shard_count())
    }
}
