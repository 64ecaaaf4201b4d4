// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Types shared between the flowdpi engine and its hosts.

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(test)]
#[macro_use]
extern crate std;

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub mod cfg;
pub mod error;

pub use cfg::*;
pub use error::*;

/// An application or master protocol identifier, as assigned by the
/// DPI engine.
///
/// The engine owns the numbering. The only value flowdpi interprets is
/// [`ProtocolId::UNKNOWN`].
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
#[serde(transparent)]
pub struct ProtocolId(pub u16);

impl ProtocolId {
    /// The "not yet recognized" sentinel.
    pub const UNKNOWN: Self = Self(0);

    pub const fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN.0
    }
}

impl From<u16> for ProtocolId {
    fn from(val: u16) -> Self {
        Self(val)
    }
}

impl Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_unknown() { write!(f, "unknown") } else { self.0.fmt(f) }
    }
}

/// The classification result of a flow.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub struct Verdict {
    /// The carrier protocol, e.g. TLS for an HTTPS-borne service.
    pub master: ProtocolId,
    /// The application protocol.
    pub app: ProtocolId,
}

impl Verdict {
    pub const UNKNOWN: Self =
        Self { master: ProtocolId::UNKNOWN, app: ProtocolId::UNKNOWN };

    pub const fn new(master: u16, app: u16) -> Self {
        Self { master: ProtocolId(master), app: ProtocolId(app) }
    }

    /// Does this verdict name a concrete application protocol?
    pub const fn is_detected(&self) -> bool {
        !self.app.is_unknown()
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.master, self.app)
    }
}

/// Classification status of a flow record.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub enum FlowStatus {
    /// The DPI engine is still being consulted.
    #[default]
    Open,
    /// Terminal. The verdict is final and the engine state is gone.
    Completed,
}

impl Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Open => "OPEN",
            Self::Completed => "COMPLETED",
        };
        write!(f, "{s}")
    }
}

/// The network layer version a flow was first seen on.
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
pub enum IpVersion {
    #[default]
    V4,
    V6,
}

impl Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::V4 => "IPv4",
            Self::V6 => "IPv6",
        };
        write!(f, "{s}")
    }
}
