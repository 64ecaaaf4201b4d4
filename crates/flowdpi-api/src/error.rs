// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use super::cfg::CfgError;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// Errors surfaced by a flow workflow.
///
/// Malformed packets and engine allocation failures are not errors;
/// they are reported through the per-packet result.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum FlowError {
    BadConfig(CfgError),

    /// The flow table holds its configured maximum of flows and a new
    /// tuple arrived. This is fatal for the pipeline.
    MaxCapacity(u64),

    /// A previous [`FlowError::MaxCapacity`] stopped the workflow.
    Halted {
        limit: u64,
    },
}

impl FlowError {
    /// Should the host stop processing packets?
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::BadConfig(_) => false,
            Self::MaxCapacity(_) | Self::Halted { .. } => true,
        }
    }
}

impl From<CfgError> for FlowError {
    fn from(e: CfgError) -> Self {
        Self::BadConfig(e)
    }
}

impl Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadConfig(e) => write!(f, "bad config: {e}"),
            Self::MaxCapacity(limit) => {
                write!(f, "flow table at max capacity ({limit} flows)")
            }
            Self::Halted { limit } => {
                write!(f, "workflow halted after reaching {limit} flows")
            }
        }
    }
}

impl core::error::Error for FlowError {}
