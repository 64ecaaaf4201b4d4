// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The boundary to the protocol recognition engine.
//!
//! How protocols are recognized is entirely the engine's business.
//! flowdpi only decides when the engine is consulted and what happens
//! with its verdict.

use super::flow_key::FlowKey;
use super::time::Moment;
use core::fmt;
use core::fmt::Display;
use flowdpi_api::Verdict;

/// The engine could not provide state for a new flow.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AllocError {
    Identity,
    Inspection,
}

impl Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Identity => "endpoint identity state",
            Self::Inspection => "flow inspection state",
        };
        write!(f, "failed to allocate {s}")
    }
}

impl core::error::Error for AllocError {}

/// A DPI engine.
///
/// The engine hands out opaque per-endpoint identity state and
/// per-flow inspection state. flowdpi owns that state for the life of
/// the flow and drops it exactly once. All calls are total: only
/// allocation may fail.
pub trait DpiEngine {
    /// Per-endpoint state, one for each side of a flow.
    type IdentityState;

    /// Per-flow inspection state.
    type InspectionState;

    fn new_identity_state(&mut self) -> Result<Self::IdentityState, AllocError>;

    fn new_inspection_state(
        &mut self,
    ) -> Result<Self::InspectionState, AllocError>;

    /// Inspect one packet of a flow.
    ///
    /// `ip` starts at the network header. `local` is the identity of
    /// this packet's sender, `remote` that of its receiver.
    fn classify(
        &mut self,
        flow: &mut Self::InspectionState,
        ip: &[u8],
        ts: Moment,
        local: &mut Self::IdentityState,
        remote: &mut Self::IdentityState,
    ) -> Verdict;

    /// Produce a best-effort verdict from whatever the engine has seen
    /// so far.
    fn giveup(&mut self, flow: &mut Self::InspectionState) -> Verdict;

    /// Guess a protocol from the key alone (typically from well-known
    /// ports).
    fn guess(&mut self, _key: &FlowKey) -> Verdict {
        Verdict::UNKNOWN
    }
}

/// The engine state owned by an open flow.
pub struct FlowBlobs<E: DpiEngine + ?Sized> {
    pub src_identity: E::IdentityState,
    pub dst_identity: E::IdentityState,
    pub inspection: E::InspectionState,
}

impl<E: DpiEngine + ?Sized> FlowBlobs<E> {
    /// Request all three pieces of state. On failure whatever was
    /// already handed out is dropped before returning.
    pub fn new(engine: &mut E) -> Result<Self, AllocError> {
        let inspection = engine.new_inspection_state()?;
        let src_identity = engine.new_identity_state()?;
        let dst_identity = engine.new_identity_state()?;
        Ok(Self { src_identity, dst_identity, inspection })
    }

    /// Split into `(inspection, local, remote)` for a packet going in
    /// the flow's original direction (`forward`) or the reverse.
    pub fn split(
        &mut self,
        forward: bool,
    ) -> (
        &mut E::InspectionState,
        &mut E::IdentityState,
        &mut E::IdentityState,
    ) {
        let Self { src_identity, dst_identity, inspection } = self;
        if forward {
            (inspection, src_identity, dst_identity)
        } else {
            (inspection, dst_identity, src_identity)
        }
    }
}

impl<E: DpiEngine + ?Sized> fmt::Debug for FlowBlobs<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FlowBlobs").finish_non_exhaustive()
    }
}
