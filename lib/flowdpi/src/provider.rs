// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Probe points for the flow lifecycle.
//!
//! Each function fires the matching USDT probe when flowdpi is built
//! with the `usdt` feature and compiles to nothing otherwise. The
//! probe arguments are only rendered when a consumer has enabled the
//! probe.

use crate::engine::flow_key::FlowKey;
use crate::engine::time::Moment;
use flowdpi_api::Verdict;

#[allow(unused_variables)]
pub fn flow_created_probe(key: &FlowKey, shard: usize) {
    cfg_if! {
        if #[cfg(feature = "usdt")] {
            crate::flowdpi_provider::flow__created!(
                || (key.to_string(), shard as u64)
            );
        } else {
            let (_, _) = (key, shard);
        }
    }
}

#[allow(unused_variables)]
pub fn flow_completed_probe(key: &FlowKey, verdict: Verdict, packets: u64) {
    cfg_if! {
        if #[cfg(feature = "usdt")] {
            crate::flowdpi_provider::flow__completed!(
                || (key.to_string(), verdict.master.0, verdict.app.0, packets)
            );
        } else {
            let (_, _, _) = (key, verdict, packets);
        }
    }
}

#[allow(unused_variables)]
pub fn flow_expired_probe(key: &FlowKey, last_seen: Moment, now: Moment) {
    cfg_if! {
        if #[cfg(feature = "usdt")] {
            crate::flowdpi_provider::flow__expired!(
                || (key.to_string(), last_seen.raw_millis(), now.raw_millis())
            );
        } else {
            let (_, _, _) = (key, last_seen, now);
        }
    }
}
