// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The flow classification engine.

pub mod classify;
pub mod dpi;
pub mod flow_key;
pub mod flow_table;
pub mod idle;
pub mod ip4;
pub mod ip6;
pub mod packet;
pub mod stat;
pub mod tcp;
pub mod time;
pub mod udp;
pub mod workflow;

pub use classify::FlowHandler;
pub use dpi::AllocError;
pub use dpi::DpiEngine;
pub use flow_key::FlowKey;
pub use flow_table::FlowRecord;
pub use packet::DiscardReason;
pub use packet::PacketMeta;
pub use workflow::ProcessResult;
pub use workflow::Workflow;
