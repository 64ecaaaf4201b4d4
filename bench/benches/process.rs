// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use criterion::BatchSize;
use criterion::Criterion;
use criterion::Throughput;
use criterion::criterion_group;
use criterion::criterion_main;
use flowdpi::engine::PacketMeta;
use flowdpi::engine::Workflow;
use flowdpi::engine::flow_key;
use flowdpi_api::WorkflowCfg;
use flowdpi_bench::BudgetEngine;
use flowdpi_bench::flow_mix;
use flowdpi_test_utils::ipv4_udp;
use flowdpi_test_utils::ipv6_dstopts_tcp;
use flowdpi_test_utils::quiet_logger;
use std::hint::black_box;
use std::net::Ipv4Addr;

type BenchWorkflow = Workflow<BudgetEngine, ()>;

fn new_workflow(cfg: WorkflowCfg) -> BenchWorkflow {
    Workflow::new(BudgetEngine::default(), (), cfg, &quiet_logger()).unwrap()
}

fn run(mut wf: BenchWorkflow, metas: &[PacketMeta]) -> BenchWorkflow {
    for meta in metas {
        let _ = wf.process_packet(black_box(meta));
    }
    wf
}

pub fn derive(c: &mut Criterion) {
    let v4 = ipv4_udp(
        (Ipv4Addr::new(10, 0, 0, 1), 5353),
        (Ipv4Addr::new(10, 0, 0, 2), 53),
        b"query",
    );
    let v6 = ipv6_dstopts_tcp(
        ("fd00::1".parse().unwrap(), 40000),
        ("fd00::2".parse().unwrap(), 443),
        b"hello",
    );
    let (m4, m6) = (v4.meta(), v6.meta());

    let mut c = c.benchmark_group("derive");
    c.bench_function("IPv4/UDP", |b| {
        b.iter(|| flow_key::derive(black_box(&m4)))
    });
    c.bench_function("IPv6/DSTOPTS/TCP", |b| {
        b.iter(|| flow_key::derive(black_box(&m6)))
    });
}

pub fn cached(c: &mut Criterion) {
    let mut wf = new_workflow(WorkflowCfg::default());
    let pkt = ipv4_udp(
        (Ipv4Addr::new(10, 0, 0, 1), 5353),
        (Ipv4Addr::new(10, 0, 0, 2), 53),
        b"query",
    );
    let meta = pkt.meta();

    // Run the flow past its budget.
    for _ in 0..=wf.cfg().udp_giveup_packets {
        wf.process_packet(&meta).unwrap();
    }

    c.bench_function("cached verdict", |b| {
        b.iter(|| wf.process_packet(black_box(&meta)))
    });
}

pub fn replay(c: &mut Criterion) {
    let pkts = flow_mix(4096, 12);
    let metas: Vec<_> = pkts.iter().map(|p| p.meta()).collect();

    // A short timeout, so the idle scanner has work to do.
    let evicting = WorkflowCfg {
        idle_timeout_ms: 1_000,
        protocol_guess: true,
        ..Default::default()
    };

    let mut c = c.benchmark_group("replay");
    c.throughput(Throughput::Elements(metas.len() as u64));
    c.sample_size(20);

    c.bench_function("4096 flows", |b| {
        b.iter_batched(
            || new_workflow(WorkflowCfg::default()),
            |wf| run(wf, &metas),
            BatchSize::LargeInput,
        )
    });

    c.bench_function("4096 flows with eviction", |b| {
        b.iter_batched(
            || new_workflow(evicting.clone()),
            |wf| run(wf, &metas),
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, derive, cached, replay);
criterion_main!(benches);
