// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Workflow configuration.

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub const DEF_SHARD_COUNT: u32 = 512;
pub const DEF_MAX_FLOWS: u64 = 200_000_000;
pub const DEF_IDLE_TIMEOUT_MS: u64 = 30_000;
pub const DEF_IDLE_SCAN_PERIOD_MS: u64 = 10;
pub const DEF_IDLE_SCAN_BUDGET: u32 = 1024;
pub const DEF_UDP_GIVEUP_PACKETS: u64 = 8;
pub const DEF_TCP_GIVEUP_PACKETS: u64 = 10;

/// Tunables for a single flow workflow.
///
/// Every field has a default, so an empty document deserializes to
/// [`WorkflowCfg::default()`]. The values are fixed once the workflow
/// is built.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct WorkflowCfg {
    /// The number of independent flow table shards.
    pub shard_count: u32,

    /// The maximum number of flow records across all shards.
    pub max_flows: u64,

    /// A flow with no packets for longer than this is evicted.
    pub idle_timeout_ms: u64,

    /// The minimum packet-clock time between two idle sweeps.
    pub idle_scan_period_ms: u64,

    /// The maximum number of flows evicted by a single sweep.
    pub idle_scan_budget: u32,

    /// An unclassified UDP flow gives up once it has seen more than
    /// this many packets.
    pub udp_giveup_packets: u64,

    /// An unclassified TCP flow gives up once it has seen more than
    /// this many packets.
    pub tcp_giveup_packets: u64,

    /// Ask the engine for a port-based guess when a flow is forced to
    /// complete without a verdict.
    pub protocol_guess: bool,
}

impl Default for WorkflowCfg {
    fn default() -> Self {
        Self {
            shard_count: DEF_SHARD_COUNT,
            max_flows: DEF_MAX_FLOWS,
            idle_timeout_ms: DEF_IDLE_TIMEOUT_MS,
            idle_scan_period_ms: DEF_IDLE_SCAN_PERIOD_MS,
            idle_scan_budget: DEF_IDLE_SCAN_BUDGET,
            udp_giveup_packets: DEF_UDP_GIVEUP_PACKETS,
            tcp_giveup_packets: DEF_TCP_GIVEUP_PACKETS,
            protocol_guess: false,
        }
    }
}

impl WorkflowCfg {
    pub fn validate(&self) -> Result<(), CfgError> {
        if self.shard_count == 0 {
            return Err(CfgError::ZeroShards);
        }

        if self.max_flows == 0 {
            return Err(CfgError::ZeroMaxFlows);
        }

        if self.idle_scan_budget == 0 {
            return Err(CfgError::ZeroScanBudget);
        }

        Ok(())
    }
}

/// Why a [`WorkflowCfg`] was rejected.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum CfgError {
    ZeroShards,
    ZeroMaxFlows,
    ZeroScanBudget,
}

impl Display for CfgError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::ZeroShards => "shard_count must be non-zero",
            Self::ZeroMaxFlows => "max_flows must be non-zero",
            Self::ZeroScanBudget => "idle_scan_budget must be non-zero",
        };
        write!(f, "{s}")
    }
}
