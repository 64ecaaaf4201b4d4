// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Moments on the packet clock.
//!
//! All flow timing is derived from capture timestamps rather than the
//! wall clock, which makes a capture replay fully deterministic.

use core::fmt;
use core::ops::Add;
use core::time::Duration;
use serde::Deserialize;
use serde::Serialize;

/// The number of milliseconds in a second.
pub const MILLIS: u64 = 1_000;
/// The number of microseconds in a millisecond.
pub const MICROS_PER_MILLI: u32 = 1_000;

/// A point on the packet clock, with millisecond resolution.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct Moment {
    millis: u64,
}

impl Moment {
    pub const fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    /// Convert a capture timestamp. Sub-millisecond precision is
    /// truncated.
    pub const fn from_capture(secs: u64, usecs: u32) -> Self {
        let millis = secs
            .wrapping_mul(MILLIS)
            .wrapping_add((usecs / MICROS_PER_MILLI) as u64);
        Self { millis }
    }

    /// Compute the delta between `self` and `earlier` in milliseconds.
    ///
    /// An `earlier` that is actually later yields zero.
    pub fn delta_as_millis(&self, earlier: Moment) -> u64 {
        self.millis.saturating_sub(earlier.millis)
    }

    pub const fn raw_millis(&self) -> u64 {
        self.millis
    }
}

impl Add<Duration> for Moment {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        let delta = u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX);
        Self { millis: self.millis.saturating_add(delta) }
    }
}

impl fmt::Display for Moment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:03}", self.millis / MILLIS, self.millis % MILLIS)
    }
}

/// A clock which never runs backwards.
///
/// A capture timestamp older than the latest one seen is replaced by
/// the latest.
#[derive(Clone, Copy, Debug, Default)]
pub struct PacketClock {
    last: Moment,
}

impl PacketClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock to the given capture timestamp and return the
    /// resulting moment.
    pub fn advance(&mut self, secs: u64, usecs: u32) -> Moment {
        let ts = Moment::from_capture(secs, usecs);
        if ts > self.last {
            self.last = ts;
        }
        self.last
    }

    /// The latest moment observed.
    pub fn now(&self) -> Moment {
        self.last
    }
}
