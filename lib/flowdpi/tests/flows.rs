// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Flow tracking and classification through a full workflow.

use flowdpi::engine::flow_key;
use flowdpi_test_utils::*;
use itertools::Itertools;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;

const CLIENT: (Ipv4Addr, u16) = (Ipv4Addr::new(10, 0, 0, 1), 40000);
const SERVER: (Ipv4Addr, u16) = (Ipv4Addr::new(10, 0, 0, 2), 53);
const OTHER: (Ipv4Addr, u16) = (Ipv4Addr::new(10, 0, 0, 9), 443);

const DNS: Verdict = Verdict::new(5, 0);
const HTTP: Verdict = Verdict::new(7, 0);
const HTTP_GOOGLE: Verdict = Verdict::new(7, 126);

fn key_of(pkt: &TestPkt) -> FlowKey {
    flow_key::derive(&pkt.meta()).unwrap().key
}

#[test]
fn reversed_packets_share_a_key() {
    let hosts = [
        (Ipv4Addr::new(10, 0, 0, 1), 40000),
        (Ipv4Addr::new(10, 0, 0, 2), 53),
        (Ipv4Addr::new(192, 168, 1, 1), 53),
        (Ipv4Addr::new(10, 0, 0, 1), 53),
    ];

    for pair in hosts.iter().permutations(2) {
        let (a, b) = (*pair[0], *pair[1]);
        for (fwd, rev) in [
            (ipv4_udp(a, b, b"x"), ipv4_udp(b, a, b"y")),
            (ipv4_tcp(a, b, b"x"), ipv4_tcp(b, a, b"")),
        ] {
            let f = flow_key::derive(&fwd.meta()).unwrap();
            let r = flow_key::derive(&rev.meta()).unwrap();
            assert_eq!(f.key, r.key, "{a:?} <-> {b:?}");
            assert_ne!(f.src_to_dst, r.src_to_dst);
            assert!(f.key.lower_addr <= f.key.upper_addr);
        }
    }
}

#[test]
fn ipv6_reversed_packets_share_a_key() {
    let a = ("fd00::1".parse::<Ipv6Addr>().unwrap(), 5353);
    let b = ("fd00::2".parse::<Ipv6Addr>().unwrap(), 5353);
    let f = key_of(&ipv6_udp(a, b, b"q"));
    let r = key_of(&ipv6_udp(b, a, b"r"));
    assert_eq!(f, r);
    assert_eq!(f.ip_version, IpVersion::V6);
    assert_eq!((f.lower_addr, f.upper_addr), (1, 2));
}

#[test]
fn both_directions_reach_one_record() {
    let mut wf = workflow(MockEngine::new(), WorkflowCfg::default());

    process(&mut wf, &ipv4_udp(CLIENT, SERVER, b"query"));
    process(&mut wf, &ipv4_udp(SERVER, CLIENT, b"answer"));
    process(&mut wf, &ipv4_udp(CLIENT, SERVER, b"query"));

    assert_eq!(wf.num_flows(), 1);
    let snap = wf.stats();
    assert_eq!(snap.flows_created, 1);
    assert_eq!(snap.ip_packets, 3);

    let rec = wf.flows().next().unwrap();
    assert_eq!(rec.packet_count(), 3);
    assert!(rec.direction_of_first_packet());

    // The identities swap places for the reply.
    let calls = &wf.engine().calls;
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().map(|c| c.flow).all_equal());
    assert_eq!(calls[0].local, calls[1].remote);
    assert_eq!(calls[0].remote, calls[1].local);
    assert_eq!(calls[0].local, calls[2].local);
}

#[test]
fn first_packet_from_upper_endpoint() {
    let mut wf = workflow(MockEngine::new(), WorkflowCfg::default());

    // SERVER has the larger address.
    process(&mut wf, &ipv4_udp(SERVER, CLIENT, b"a"));
    process(&mut wf, &ipv4_udp(CLIENT, SERVER, b"b"));

    let rec = wf.flows().next().unwrap();
    assert!(!rec.direction_of_first_packet());
    let calls = &wf.engine().calls;
    assert_eq!(calls[0].local, calls[1].remote);
}

#[test]
fn detected_flow_returns_cached_verdict() {
    let engine = MockEngine::new().with_script([Verdict::UNKNOWN, HTTP_GOOGLE]);
    let mut wf = workflow(engine, WorkflowCfg::default());
    let pkt = ipv4_tcp(CLIENT, OTHER, b"GET / HTTP/1.1\r\n");

    assert_eq!(
        process(&mut wf, &pkt),
        ProcessResult::Inspecting(Verdict::UNKNOWN)
    );
    assert_eq!(process(&mut wf, &pkt), ProcessResult::Completed(HTTP_GOOGLE));
    for _ in 0..3 {
        assert_eq!(process(&mut wf, &pkt), ProcessResult::Cached(HTTP_GOOGLE));
    }

    assert_eq!(wf.engine().calls.len(), 2);
    assert_eq!(wf.engine().giveup_calls, 0);

    let rec = wf.flow(&key_of(&pkt)).unwrap();
    assert_eq!(rec.status(), FlowStatus::Completed);
    assert_eq!(rec.verdict(), HTTP_GOOGLE);
    assert_eq!(rec.packet_count(), 5);
    assert!(!rec.has_blobs());

    let rec = wf.handler();
    assert!(rec.giveup.is_empty());
    assert_eq!(rec.detected.len(), 1);
    let done = rec.detected[0];
    assert_eq!(done.packets, 2);
    assert_eq!(done.status, FlowStatus::Completed);
    assert!(done.held_blobs);

    let snap = wf.stats();
    assert_eq!(snap.flows_detected, 1);
    assert_eq!(snap.flows_giveup, 0);
    assert_eq!(wf.num_flows(), 1);
}

#[test]
fn detection_by_payload() {
    let engine = MockEngine::new().detect_payload(b"Host: google", HTTP_GOOGLE);
    let mut wf = workflow(engine, WorkflowCfg::default());

    let syn = ipv4_tcp(CLIENT, OTHER, b"");
    let req = ipv4_tcp(CLIENT, OTHER, b"GET / HTTP/1.1\r\nHost: google\r\n");
    assert_eq!(
        process(&mut wf, &syn),
        ProcessResult::Inspecting(Verdict::UNKNOWN)
    );
    assert_eq!(process(&mut wf, &req), ProcessResult::Completed(HTTP_GOOGLE));

    // The engine sees the packet from the network header on.
    assert_eq!(wf.engine().calls[1].ip_len, req.l3().len());
}

#[test]
fn udp_gives_up_on_ninth_packet() {
    let engine = MockEngine::new().giveup_with(DNS);
    let mut wf = workflow(engine, WorkflowCfg::default());
    let pkt = ipv4_udp(CLIENT, SERVER, b"\x12\x34");

    for i in 1..=8 {
        let res = process(&mut wf, &pkt);
        assert_eq!(res, ProcessResult::Inspecting(Verdict::UNKNOWN), "{i}");
        assert_eq!(wf.handler().total(), 0);
    }

    assert_eq!(process(&mut wf, &pkt), ProcessResult::Completed(DNS));
    assert_eq!(process(&mut wf, &pkt), ProcessResult::Cached(DNS));

    let rec = wf.handler();
    assert_eq!(rec.giveup.len(), 1);
    assert!(rec.detected.is_empty());
    assert_eq!(rec.giveup[0].packets, 9);
    assert_eq!(rec.giveup[0].verdict, DNS);
    assert_eq!(wf.engine().calls.len(), 9);
    assert_eq!(wf.engine().giveup_calls, 1);
    assert_eq!(wf.stats().flows_giveup, 1);
}

#[test]
fn tcp_gives_up_on_eleventh_packet() {
    let mut wf = workflow(MockEngine::new(), WorkflowCfg::default());
    let pkt = ipv4_tcp(CLIENT, OTHER, b"\x16\x03\x01");

    for _ in 1..=10 {
        assert!(matches!(
            process(&mut wf, &pkt),
            ProcessResult::Inspecting(_)
        ));
    }

    assert_eq!(
        process(&mut wf, &pkt),
        ProcessResult::Completed(Verdict::UNKNOWN)
    );
    assert_eq!(wf.handler().giveup.len(), 1);
    assert_eq!(wf.handler().giveup[0].packets, 11);
    assert_eq!(wf.engine().calls.len(), 11);
}

#[test]
fn budget_follows_config() {
    let cfg = WorkflowCfg { udp_giveup_packets: 2, ..Default::default() };
    let mut wf = workflow(MockEngine::new(), cfg);
    let pkt = ipv4_udp(CLIENT, SERVER, b"");

    process(&mut wf, &pkt);
    process(&mut wf, &pkt);
    assert!(matches!(process(&mut wf, &pkt), ProcessResult::Completed(_)));
}

#[test]
fn giveup_may_still_detect() {
    let engine = MockEngine::new().giveup_with(HTTP_GOOGLE);
    let cfg = WorkflowCfg { udp_giveup_packets: 0, ..Default::default() };
    let mut wf = workflow(engine, cfg);

    let res = process(&mut wf, &ipv4_udp(CLIENT, SERVER, b""));
    assert_eq!(res, ProcessResult::Completed(HTTP_GOOGLE));
    assert_eq!(wf.handler().detected.len(), 1);
    assert!(wf.handler().giveup.is_empty());
}

#[test]
fn master_only_verdict_keeps_inspecting() {
    let engine = MockEngine::new().with_script([HTTP, HTTP_GOOGLE]);
    let mut wf = workflow(engine, WorkflowCfg::default());
    let pkt = ipv4_tcp(CLIENT, OTHER, b"");

    assert_eq!(process(&mut wf, &pkt), ProcessResult::Inspecting(HTTP));
    assert_eq!(process(&mut wf, &pkt), ProcessResult::Completed(HTTP_GOOGLE));
}

#[test]
fn other_protocols_have_no_budget() {
    let mut wf = workflow(MockEngine::new(), WorkflowCfg::default());
    let ping = ipv4_icmp(CLIENT.0, SERVER.0);

    for _ in 0..50 {
        assert!(matches!(
            process(&mut wf, &ping),
            ProcessResult::Inspecting(_)
        ));
    }

    let key = key_of(&ping);
    assert_eq!((key.lower_port, key.upper_port), (0, 0));
    assert_eq!(wf.handler().total(), 0);

    wf.drain();
    assert_eq!(wf.handler().giveup.len(), 1);
    assert_eq!(wf.handler().giveup[0].packets, 50);
}

#[test]
fn capacity_is_fatal() {
    let cfg = WorkflowCfg { max_flows: 1, ..Default::default() };
    let mut wf = workflow(MockEngine::new(), cfg);

    process(&mut wf, &ipv4_udp(CLIENT, SERVER, b""));
    // Known tuples still get through at capacity.
    process(&mut wf, &ipv4_udp(SERVER, CLIENT, b""));

    let second = ipv4_udp(CLIENT, OTHER, b"");
    assert_eq!(
        wf.process_packet(&second.meta()),
        Err(FlowError::MaxCapacity(1))
    );
    assert!(wf.is_halted());
    assert!(FlowError::MaxCapacity(1).is_fatal());

    let first = ipv4_udp(CLIENT, SERVER, b"");
    assert_eq!(
        wf.process_packet(&first.meta()),
        Err(FlowError::Halted { limit: 1 })
    );
    assert_eq!(wf.num_flows(), 1);
    assert_eq!(wf.stats().flows_created, 1);
}

#[test]
fn alloc_failure_leaves_table_alone() {
    // Enough for one flow plus the inspection state of the next.
    let engine = MockEngine::new().fail_allocs_after(4);
    let blobs = engine.blob_counters();
    let mut wf = workflow(engine, WorkflowCfg::default());

    process(&mut wf, &ipv4_udp(CLIENT, SERVER, b""));
    let res = process(&mut wf, &ipv4_udp(CLIENT, OTHER, b""));
    assert_eq!(res, ProcessResult::NoFlow);
    assert_eq!(res.verdict(), Verdict::UNKNOWN);

    assert_eq!(wf.num_flows(), 1);
    assert_eq!(blobs.created(), 4);
    assert_eq!(blobs.dropped(), 1);
    assert_eq!(blobs.live(), 3);

    let snap = wf.stats();
    assert_eq!(snap.alloc_failures, 1);
    assert_eq!(snap.discarded_packets, 1);
    assert_eq!(snap.flows_created, 1);
    assert_eq!(snap.raw_packets, 2);
    assert_eq!(snap.ip_packets, 1);

    // The known flow is unaffected.
    let res = process(&mut wf, &ipv4_udp(SERVER, CLIENT, b""));
    assert!(matches!(res, ProcessResult::Inspecting(_)));
}

#[test]
fn blobs_are_released_exactly_once() {
    let engine = MockEngine::new()
        .detect_payload(b"hello", HTTP_GOOGLE)
        .giveup_with(DNS);
    let blobs = engine.blob_counters();
    let cfg = WorkflowCfg { idle_timeout_ms: 1_000, ..Default::default() };
    let mut wf = workflow(engine, cfg);

    let peers: Vec<_> =
        (1..=20).map(|i| (Ipv4Addr::new(172, 16, 0, i), 1000)).collect();

    // Detected flows.
    for peer in &peers[..5] {
        process(&mut wf, &ipv4_tcp(CLIENT, *peer, b"hello").at_millis(0));
    }

    // Flows that run out of budget.
    for peer in &peers[5..10] {
        for _ in 0..9 {
            process(&mut wf, &ipv4_udp(CLIENT, *peer, b"").at_millis(0));
        }
    }

    // Flows that are still open when drained.
    for peer in &peers[10..] {
        process(&mut wf, &ipv4_udp(CLIENT, *peer, b"").at_millis(100));
    }

    assert_eq!(blobs.created(), 60);
    assert_eq!(blobs.live(), 30);

    wf.drain();
    assert_eq!(wf.num_flows(), 0);
    assert_eq!(blobs.dropped(), blobs.created());
    assert_eq!(blobs.double_drops(), 0);
    assert_eq!(blobs.live(), 0);

    let rec = wf.handler();
    assert_eq!(rec.detected.len(), 5);
    assert_eq!(rec.giveup.len(), 15);
    assert!(rec.detected.iter().chain(&rec.giveup).all(|c| c.held_blobs));
    assert!(rec.giveup.iter().all(|c| c.verdict == DNS));
    assert!(rec.giveup.iter().map(|c| c.key).all_unique());
}

#[test]
fn drain_leaves_completed_flows_alone() {
    let engine = MockEngine::new().with_script([HTTP_GOOGLE]);
    let mut wf = workflow(engine, WorkflowCfg::default());

    process(&mut wf, &ipv4_tcp(CLIENT, OTHER, b""));
    process(&mut wf, &ipv4_udp(CLIENT, SERVER, b""));
    wf.drain();

    assert_eq!(wf.handler().detected.len(), 1);
    assert_eq!(wf.handler().giveup.len(), 1);
    assert_eq!(wf.engine().giveup_calls, 1);
    assert_eq!(wf.stats().flows_giveup, 1);
}

#[test]
fn malformed_packets_are_counted() {
    let mut wf = workflow(MockEngine::new(), WorkflowCfg::default());

    let later = ipv4_fragment(CLIENT, SERVER, 185, &[0xAB; 64]);
    assert_discarded(process(&mut wf, &later), DiscardReason::Fragment);

    let first = ipv4_fragment(CLIENT, SERVER, 0, &[0xAB; 64]);
    assert!(matches!(
        process(&mut wf, &first),
        ProcessResult::Inspecting(_)
    ));

    let short = ipv4_udp_short(CLIENT, SERVER, 4);
    assert_discarded(
        process(&mut wf, &short),
        DiscardReason::TruncatedTransport,
    );

    let mut cut = ipv4_tcp(CLIENT, OTHER, b"");
    cut.frame.truncate(ETHER_HDR_SZ + 12);
    assert_discarded(process(&mut wf, &cut), DiscardReason::TruncatedHeader);

    let mut arp = ipv4_udp(CLIENT, SERVER, b"");
    arp.ethertype = 0x0806;
    assert_discarded(process(&mut wf, &arp), DiscardReason::BadIpVersion);

    let snap = wf.stats();
    assert_eq!(snap.raw_packets, 5);
    assert_eq!(snap.discarded_packets, 4);
    assert_eq!(snap.ip_packets, 1);
    assert_eq!(snap.flows_created, 1);
    assert_eq!(wf.num_flows(), 1);
    assert_eq!(wf.engine().calls.len(), 1);
}

#[test]
fn later_fragment_accepted_once_first_seen() {
    let mut wf = workflow(MockEngine::new(), WorkflowCfg::default());
    let first = ipv4_fragment(CLIENT, SERVER, 0, &[0; 32]);
    let ports = [CLIENT.1.to_be_bytes(), SERVER.1.to_be_bytes()].concat();
    let mut rest = ports;
    rest.extend_from_slice(&[0; 28]);
    let later = ipv4_fragment(CLIENT, SERVER, 5, &rest).with_frag_first_seen();

    process(&mut wf, &first);
    assert!(matches!(
        process(&mut wf, &later),
        ProcessResult::Inspecting(_)
    ));
    assert_eq!(wf.stats().discarded_packets, 0);
}

#[test]
fn byte_accounting() {
    let mut wf = workflow(MockEngine::new(), WorkflowCfg::default());
    let small = ipv4_udp(CLIENT, SERVER, b"");
    let big = ipv4_udp(SERVER, CLIENT, &[0; 1000]);
    let clipped = ipv4_udp(CLIENT, SERVER, &[0; 64]).with_wire_len(1514);

    process(&mut wf, &small);
    process(&mut wf, &big);
    process(&mut wf, &clipped);

    let wire = (small.frame.len() + big.frame.len() + 1514) as u64;
    let snap = wf.stats();
    assert_eq!(snap.ip_bytes, wire);
    assert_eq!(snap.wire_bytes, wire + 3 * 24);
    assert_eq!(wf.flows().next().unwrap().byte_count(), wire);
}

#[test]
fn vlan_id_is_masked() {
    let mut wf = workflow(MockEngine::new(), WorkflowCfg::default());

    // Priority bits differ, VLAN id 5 in both.
    let a = ipv4_udp(CLIENT, SERVER, b"").with_vlan(0x2005);
    let b = ipv4_udp(SERVER, CLIENT, b"").with_vlan(0xE005);
    let c = ipv4_udp(CLIENT, SERVER, b"").with_vlan(0x0006);
    let untagged = ipv4_udp(CLIENT, SERVER, b"");

    for pkt in [&a, &b, &c, &untagged] {
        process(&mut wf, pkt);
    }

    assert_eq!(key_of(&a).vlan_id, 5);
    assert_eq!(key_of(&a), key_of(&b));
    assert_eq!(key_of(&untagged).vlan_id, 0);
    assert_eq!(wf.num_flows(), 3);
    assert_eq!(wf.flow(&key_of(&a)).unwrap().packet_count(), 2);
}

#[test]
fn ipv6_addresses_fold_to_32_bits() {
    let mut wf = workflow(MockEngine::new(), WorkflowCfg::default());
    let a = "2001:db8:1::1:2".parse::<Ipv6Addr>().unwrap();
    let b = "2001:db8:1::1:3".parse::<Ipv6Addr>().unwrap();
    // Same low 64 bits, different prefix.
    let a2 = "fd00:aaaa::1:2".parse::<Ipv6Addr>().unwrap();

    process(&mut wf, &ipv6_udp((a, 1000), (b, 2000), b""));
    process(&mut wf, &ipv6_udp((b, 2000), (a2, 1000), b""));

    // An IPv4 tuple with the folded addresses is the same flow.
    let v4a = Ipv4Addr::new(0, 1, 0, 2);
    let v4b = Ipv4Addr::new(0, 1, 0, 3);
    process(&mut wf, &ipv4_udp((v4a, 1000), (v4b, 2000), b""));

    assert_eq!(wf.num_flows(), 1);
    let rec = wf.flows().next().unwrap();
    assert_eq!(rec.packet_count(), 3);
    assert_eq!(rec.key().ip_version, IpVersion::V6);
    assert_eq!(rec.key().lower_addr, 0x0001_0002);
}

#[test]
fn ipv6_destination_options() {
    let mut wf = workflow(MockEngine::new(), WorkflowCfg::default());
    let a = ("fd00::10".parse::<Ipv6Addr>().unwrap(), 33000);
    let b = ("fd00::20".parse::<Ipv6Addr>().unwrap(), 443);

    let pkt = ipv6_dstopts_tcp(a, b, b"\x16\x03");
    let derived = flow_key::derive(&pkt.meta()).unwrap();
    assert_eq!(derived.key.protocol, 6);
    assert_eq!((derived.src_port, derived.dst_port), (33000, 443));
    assert_eq!(derived.payload_offset, hdrs_len(true, true) + 8);
    assert_eq!(derived.payload_len, 2);
    let end = derived.payload_offset + usize::from(derived.payload_len);
    assert_eq!(end, pkt.frame.len());

    // Same flow as the plain segment.
    process(&mut wf, &pkt);
    process(&mut wf, &ipv6_tcp(b, a, b""));
    assert_eq!(wf.num_flows(), 1);
}

#[test]
fn packet_clock_never_goes_back() {
    let cfg = WorkflowCfg { idle_timeout_ms: 60_000, ..Default::default() };
    let mut wf = workflow(MockEngine::new(), cfg);
    let pkt = ipv4_udp(CLIENT, SERVER, b"");

    process(&mut wf, &pkt.clone().at(10, 500_000));
    process(&mut wf, &pkt.clone().at(5, 0));
    assert_eq!(wf.now(), Moment::from_millis(10_500));

    let calls = &wf.engine().calls;
    assert_eq!(calls[1].ts, Moment::from_millis(10_500));

    let rec = wf.flows().next().unwrap();
    assert_eq!(rec.first_seen(), Moment::from_millis(10_500));
    assert_eq!(rec.last_seen(), Moment::from_millis(10_500));

    process(&mut wf, &pkt.at(11, 999));
    assert_eq!(wf.now(), Moment::from_millis(11_000));
}

#[test]
fn guess_on_forced_completion() {
    let engine = MockEngine::new().guess_with(DNS);
    let cfg = WorkflowCfg { protocol_guess: true, ..Default::default() };
    let mut wf = workflow(engine, cfg);

    // Budget completion does not guess.
    for _ in 0..9 {
        process(&mut wf, &ipv4_udp(CLIENT, SERVER, b""));
    }
    assert_eq!(wf.engine().guess_calls, 0);

    process(&mut wf, &ipv4_udp(CLIENT, OTHER, b""));
    wf.drain();

    assert_eq!(wf.engine().guess_calls, 1);
    let rec = wf.handler();
    assert_eq!(rec.giveup.len(), 2);
    assert!(rec.detected.is_empty());
    assert_eq!(rec.giveup[1].verdict, DNS);
}

#[test]
fn guess_can_name_an_app() {
    let engine = MockEngine::new().guess_with(HTTP_GOOGLE);
    let cfg = WorkflowCfg { protocol_guess: true, ..Default::default() };
    let mut wf = workflow(engine, cfg);

    process(&mut wf, &ipv4_tcp(CLIENT, OTHER, b""));
    wf.drain();
    assert_eq!(wf.handler().detected.len(), 1);
    assert_eq!(wf.handler().detected[0].verdict, HTTP_GOOGLE);
    assert_eq!(wf.stats().flows_detected, 1);
}

#[test]
fn no_guess_unless_enabled() {
    let engine = MockEngine::new().guess_with(HTTP_GOOGLE);
    let mut wf = workflow(engine, WorkflowCfg::default());

    process(&mut wf, &ipv4_tcp(CLIENT, OTHER, b""));
    wf.drain();
    assert_eq!(wf.engine().guess_calls, 0);
    assert_eq!(wf.handler().giveup.len(), 1);
}
