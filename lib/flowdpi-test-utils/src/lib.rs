// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Common routines for integration tests.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

pub mod engine;
pub mod handler;
pub mod packet;
pub mod pcap;

// Let's make our lives easier and pub use a bunch of stuff.
pub use engine::BlobCounters;
pub use engine::MockEngine;
pub use flowdpi::engine::DiscardReason;
pub use flowdpi::engine::FlowKey;
pub use flowdpi::engine::PacketMeta;
pub use flowdpi::engine::ProcessResult;
pub use flowdpi::engine::Workflow;
pub use flowdpi::engine::stat::WorkflowStatsSnap;
pub use flowdpi::engine::time::Moment;
pub use flowdpi_api::FlowError;
pub use flowdpi_api::FlowStatus;
pub use flowdpi_api::IpVersion;
pub use flowdpi_api::ProtocolId;
pub use flowdpi_api::Verdict;
pub use flowdpi_api::WorkflowCfg;
pub use handler::Completion;
pub use handler::Recorder;
pub use packet::*;
pub use pcap::PcapBuilder;
pub use pcap::read_pcap;
use slog::Drain;
use slog::Logger;
use slog::o;

pub type TestWorkflow = Workflow<MockEngine, Recorder>;

/// A logger for tests, filtered by `RUST_LOG` (errors only when unset).
pub fn test_logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain);
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!("unit" => "test"))
}

/// A logger which drops everything.
pub fn quiet_logger() -> Logger {
    Logger::root(slog::Discard, o!())
}

/// Build a workflow around a [`MockEngine`] and a [`Recorder`].
pub fn workflow(engine: MockEngine, cfg: WorkflowCfg) -> TestWorkflow {
    Workflow::new(engine, Recorder::new(), cfg, &test_logger()).unwrap()
}

/// Run `pkt` through `wf`, expecting no error.
pub fn process(wf: &mut TestWorkflow, pkt: &TestPkt) -> ProcessResult {
    wf.process_packet(&pkt.meta()).unwrap()
}

/// Expect `res` to have been discarded for `reason`.
pub fn assert_discarded(res: ProcessResult, reason: DiscardReason) {
    assert_eq!(res, ProcessResult::Discarded(reason));
}
