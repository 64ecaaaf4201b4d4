// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Per-packet flow tracking and DPI driving.
//!
//! A [`Workflow`](engine::workflow::Workflow) turns each captured packet
//! into a canonical [`FlowKey`](engine::flow_key::FlowKey), finds or
//! creates the flow's record in a sharded table, feeds the packet to a
//! [`DpiEngine`](engine::dpi::DpiEngine) until a verdict is reached or
//! the packet budget runs out, and periodically evicts flows that have
//! gone quiet.

#![allow(clippy::len_without_is_empty)]
#![allow(non_snake_case)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]
// Enable features needed for USDT, if needed.
#![cfg_attr(all(feature = "usdt", not(usdt_stable_asm)), feature(asm))]
#![cfg_attr(
    all(feature = "usdt", target_os = "macos", not(usdt_stable_asm_sym)),
    feature(asm_sym)
)]

#[macro_use]
extern crate cfg_if;

// This is needed so that the stat-macro (`#[derive(StatProvider)]`)
// can use fully-qualified type paths.
extern crate self as flowdpi;

pub use flowdpi_api as api;

pub mod engine;
pub mod provider;

// ================================================================
// DTrace USDT Provider
//
// Flow lifecycle probes, available when built with the `usdt`
// feature. The host must call `usdt::register_probes()` once.
// ================================================================
#[cfg(feature = "usdt")]
#[usdt::provider]
mod flowdpi_provider {
    fn flow__created(flow: &str, shard: u64) {}
    fn flow__completed(flow: &str, master: u16, app: u16, packets: u64) {}
    fn flow__expired(flow: &str, last_seen: u64, now: u64) {}
}
