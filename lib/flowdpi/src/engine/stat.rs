// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Named counters.

use core::ops::AddAssign;
use core::ops::SubAssign;
pub use stat_macro::StatProvider;

/// A provider of named `u64` counters.
///
/// Rather than implementing this trait manually, derive it.
///
/// ```
/// use flowdpi::engine::stat::StatProvider;
/// use flowdpi::engine::stat::StatU64;
///
/// #[derive(StatProvider)]
/// pub struct SomeStats {
///     bytes_in: StatU64,
///     errors_in: StatU64,
/// }
///
/// let mut stats = SomeStats::new();
/// stats.bytes_in += 54;
/// assert_eq!(stats.snapshot().bytes_in, 54);
/// ```
pub trait StatProvider {
    const FIELD_NAMES: &'static [&'static str];
    type Snap;

    fn new() -> Self;

    fn num_fields(&self) -> usize {
        Self::FIELD_NAMES.len()
    }

    /// Return a snapshot of the stats. This is how you obtain a copy,
    /// as opposed to the traditional clone().
    fn snapshot(&self) -> Self::Snap;
}

/// A 64-bit unsigned counter.
#[derive(Debug, Default)]
pub struct StatU64 {
    value: u64,
}

impl StatU64 {
    pub const fn new() -> Self {
        Self { value: 0 }
    }

    pub fn set(&mut self, val: u64) {
        self.value = val;
    }

    pub fn val(&self) -> u64 {
        self.value
    }

    pub fn incr(&mut self) {
        self.value = self.value.wrapping_add(1);
    }
}

impl AddAssign<u64> for StatU64 {
    #[inline]
    fn add_assign(&mut self, other: u64) {
        self.value = self.value.wrapping_add(other);
    }
}

impl SubAssign<u64> for StatU64 {
    #[inline]
    fn sub_assign(&mut self, other: u64) {
        self.value = self.value.wrapping_sub(other);
    }
}

/// Counters kept by a [`Workflow`](super::workflow::Workflow).
#[derive(Debug, StatProvider)]
pub struct WorkflowStats {
    /// Every packet handed to the workflow.
    pub raw_packets: StatU64,
    /// Packets that reached a flow.
    pub ip_packets: StatU64,
    pub ip_bytes: StatU64,
    /// `ip_bytes` plus per-packet wire overhead.
    pub wire_bytes: StatU64,
    /// Packets that did not reach a flow.
    pub discarded_packets: StatU64,
    pub flows_created: StatU64,
    pub flows_detected: StatU64,
    pub flows_giveup: StatU64,
    /// Flows removed by the idle scanner.
    pub flows_expired: StatU64,
    pub alloc_failures: StatU64,
    pub idle_sweeps: StatU64,
}
