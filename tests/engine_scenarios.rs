// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Link engine behaviour scenarios
//!
//! Drives a single `LinkEngine` with real encoded frames and a manual clock,
//! and checks neighbor table, DR and Join/Prune output after each step.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use pimd::logging::{Logger, MemorySink, Severity};
use pimd::pim::frame::{build_hello, decode_frame, encapsulate, LinkAddress, PimFrame};
use pimd::pim::{EngineParams, LinkEngine};
use pimd::protocols::internet_checksum;
use pimd::protocols::pim::{
    JoinPruneMessage, PimHelloBuilder, ALL_PIM_ROUTERS, ALL_PIM_ROUTERS_MAC, PIM_JOIN_PRUNE,
};
use pimd::services::{AttachmentPoint, ManualClock};
use pimd::testing::RecordingTransport;
use pimd::McastRoute;
use pnet::util::MacAddr;

const SELF_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const PEER_A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
const PEER_B: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 3);

struct Fixture {
    engine: LinkEngine,
    transport: Arc<RecordingTransport>,
    clock: Arc<ManualClock>,
    log: Arc<MemorySink>,
}

fn link(ip: Ipv4Addr) -> LinkAddress {
    LinkAddress {
        mac: MacAddr::new(0x02, 0, 0, 0, 0, ip.octets()[3]),
        ip,
        vlan: None,
    }
}

fn fixture() -> Fixture {
    fixture_with(EngineParams::default())
}

fn fixture_with(params: EngineParams) -> Fixture {
    let transport = Arc::new(RecordingTransport::new());
    let clock = Arc::new(ManualClock::new());
    let (logger, log) = Logger::memory();
    let engine = LinkEngine::with_generation_id(
        AttachmentPoint::new("of:0001", 1),
        "eth0",
        link(SELF_IP),
        params,
        0xcafe,
        transport.clone(),
        clock.clone(),
        logger,
    );
    Fixture {
        engine,
        transport,
        clock,
        log,
    }
}

fn hello(from: Ipv4Addr, holdtime: u16, priority: u32, genid: u32) -> PimFrame {
    let raw = build_hello(
        &link(from),
        &PimHelloBuilder::new(holdtime, priority, genid),
    )
    .unwrap();
    decode_frame(&raw).unwrap()
}

fn route() -> McastRoute {
    McastRoute::new(Ipv4Addr::new(192, 168, 10, 5), Ipv4Addr::new(239, 10, 0, 1))
}

fn join_prune_frames(transport: &RecordingTransport) -> Vec<JoinPruneMessage> {
    transport
        .frames()
        .into_iter()
        .filter_map(|(_, raw)| decode_frame(&raw).ok())
        .filter(|f| f.header.msg_type == PIM_JOIN_PRUNE)
        .map(|f| JoinPruneMessage::parse(f.body()).unwrap())
        .collect()
}

#[test]
fn identical_hellos_only_refresh_timestamp() {
    let mut f = fixture();
    f.engine.process_hello(&hello(PEER_A, 105, 1, 11));
    let first = f.engine.neighbor(PEER_A).unwrap().clone();
    let dr = f.engine.dr();

    f.clock.advance(Duration::from_secs(20));
    f.engine.process_hello(&hello(PEER_A, 105, 1, 11));

    let second = f.engine.neighbor(PEER_A).unwrap();
    assert_eq!(f.engine.neighbor_count(), 2);
    assert_eq!(&first, second);
    assert_eq!(second.up_since, first.up_since);
    assert_eq!(second.last_refresh, first.last_refresh + Duration::from_secs(20));
    assert_eq!(f.engine.dr(), dr);
}

#[test]
fn zero_holdtime_removes_peer_and_reelects() {
    let mut f = fixture();
    f.engine.process_hello(&hello(PEER_A, 105, 1, 11));
    f.engine.process_hello(&hello(PEER_B, 65535, 1, 22));
    assert_eq!(f.engine.dr(), PEER_B);

    f.engine.process_hello(&hello(PEER_B, 0, 1, 22));
    assert!(f.engine.neighbor(PEER_B).is_none());
    assert_eq!(f.engine.dr(), PEER_A);

    f.engine.process_hello(&hello(PEER_A, 0, 1, 11));
    assert_eq!(f.engine.neighbor_count(), 1);
    assert_eq!(f.engine.dr(), SELF_IP);
}

#[test]
fn expiry_happens_only_in_timeout_sweep() {
    let mut f = fixture();
    f.engine.process_hello(&hello(PEER_A, 30, 1, 11));

    f.clock.advance(Duration::from_secs(31));
    // Unrelated Hello traffic must not expire A
    f.engine.process_hello(&hello(PEER_B, 105, 1, 22));
    assert!(f.engine.neighbor(PEER_A).is_some());

    f.engine.check_neighbor_timeouts();
    assert!(f.engine.neighbor(PEER_A).is_none());
    assert!(f.engine.neighbor(PEER_B).is_some());
}

#[test]
fn neighbor_at_exact_deadline_survives() {
    let mut f = fixture();
    f.engine.process_hello(&hello(PEER_A, 30, 1, 11));
    f.clock.advance(Duration::from_secs(30));
    f.engine.check_neighbor_timeouts();
    assert!(f.engine.neighbor(PEER_A).is_some());
}

#[test]
fn self_record_never_expires() {
    let mut f = fixture();
    for _ in 0..10 {
        f.clock.advance(Duration::from_secs(3600));
        f.engine.check_neighbor_timeouts();
    }
    assert!(f.engine.neighbor(SELF_IP).is_some());
    assert!(f.engine.is_dr());
}

#[test]
fn join_refresh_follows_join_period() {
    let mut f = fixture();
    f.engine
        .add_route(route(), PEER_A, MacAddr::new(0x02, 0, 0, 0, 0, 2));
    assert_eq!(join_prune_frames(&f.transport).len(), 1);

    f.clock.advance(Duration::from_secs(59));
    assert_eq!(f.engine.send_joins(), 0);
    f.clock.advance(Duration::from_secs(1));
    assert_eq!(f.engine.send_joins(), 1);
    assert_eq!(f.engine.send_joins(), 0);

    f.clock.advance(Duration::from_secs(30));
    assert_eq!(f.engine.send_joins(), 0);
    f.clock.advance(Duration::from_secs(30));
    assert_eq!(f.engine.send_joins(), 1);

    let messages = join_prune_frames(&f.transport);
    assert_eq!(messages.len(), 3);
    assert!(messages.iter().all(|m| m.holdtime == 210));
}

#[test]
fn dr_follows_priority_then_address_and_expiry() {
    let mut f = fixture();
    assert_eq!(f.engine.dr(), SELF_IP);

    f.engine.process_hello(&hello(PEER_A, 105, 1, 0x1111));
    assert_eq!(f.engine.dr(), PEER_A);

    f.engine.process_hello(&hello(PEER_B, 105, 5, 0x2222));
    assert_eq!(f.engine.dr(), PEER_B);

    // A keeps refreshing, B goes silent
    f.clock.advance(Duration::from_secs(60));
    f.engine.process_hello(&hello(PEER_A, 105, 1, 0x1111));
    f.clock.advance(Duration::from_secs(46));
    f.engine.check_neighbor_timeouts();

    assert!(f.engine.neighbor(PEER_B).is_none());
    assert_eq!(f.engine.dr(), PEER_A);
}

#[test]
fn add_then_remove_route_sends_join_then_prune() {
    let mut f = fixture();
    let mac = MacAddr::new(0x02, 0, 0, 0, 0, 2);

    f.engine.add_route(route(), PEER_A, mac);
    let frames = f.transport.frames();
    assert_eq!(frames.len(), 1);
    let join_frame = decode_frame(&frames[0].1).unwrap();
    assert_eq!(join_frame.dst_mac, mac);

    f.engine.remove_route(&route());
    let messages = join_prune_frames(&f.transport);
    assert_eq!(messages.len(), 2);

    let join = &messages[0];
    assert_eq!(join.upstream, PEER_A);
    assert_eq!(join.groups[0].group, route().group);
    assert_eq!(join.groups[0].joins[0].address, route().source);
    assert!(join.groups[0].prunes.is_empty());

    let prune = &messages[1];
    assert_eq!(prune.holdtime, 0);
    assert!(prune.groups[0].joins.is_empty());
    assert_eq!(prune.groups[0].prunes[0].address, route().source);

    assert!(f.engine.route(&route()).is_none());
    f.clock.advance(Duration::from_secs(600));
    assert_eq!(f.engine.send_joins(), 0);
    assert_eq!(f.transport.frames().len(), 2);
}

#[test]
fn removing_unknown_route_sends_nothing() {
    let mut f = fixture();
    f.engine.remove_route(&route());
    assert!(f.transport.frames().is_empty());
}

/// Hello from `from` carrying `body` as options, with a valid PIM checksum
fn raw_hello(from: Ipv4Addr, body: &[u8]) -> PimFrame {
    let mut message = vec![0x20, 0x00, 0x00, 0x00];
    message.extend_from_slice(body);
    let checksum = internet_checksum(&message);
    message[2..4].copy_from_slice(&checksum.to_be_bytes());

    let raw = encapsulate(
        &link(from),
        MacAddr::from(ALL_PIM_ROUTERS_MAC),
        ALL_PIM_ROUTERS,
        &message,
    )
    .unwrap();
    decode_frame(&raw).unwrap()
}

#[test]
fn malformed_hello_leaves_neighbor_untouched() {
    let mut f = fixture();
    f.engine.process_hello(&hello(PEER_A, 105, 5, 0xabcd));
    let learned = f.engine.neighbor(PEER_A).unwrap().clone();

    // Holdtime option declares 200 bytes, only 2 follow
    f.clock.advance(Duration::from_secs(10));
    f.engine
        .process_hello(&raw_hello(PEER_A, &[0x00, 0x01, 0x00, 0xc8, 0x00, 0x69]));

    let current = f.engine.neighbor(PEER_A).unwrap();
    assert_eq!(current, &learned);
    assert_eq!(current.last_refresh, learned.last_refresh);
    assert_eq!(current.dr_priority, 5);
    assert_eq!(current.generation_id, 0xabcd);
    assert_eq!(f.engine.dr(), PEER_A);
    assert!(f.log.contains(Severity::Warning, "Dropping malformed Hello"));
}

#[test]
fn short_known_option_does_not_create_neighbor() {
    let mut f = fixture();
    // Generation ID option with a 2-byte value
    f.engine
        .process_hello(&raw_hello(PEER_B, &[0x00, 0x14, 0x00, 0x02, 0xab, 0xcd]));

    assert!(f.engine.neighbor(PEER_B).is_none());
    assert_eq!(f.engine.dr(), SELF_IP);
    assert!(f.log.contains(Severity::Warning, "Dropping malformed Hello"));
}

#[test]
fn huge_hello_interval_is_never_due_again() {
    let mut f = fixture_with(EngineParams {
        hello_interval: Duration::MAX,
        ..EngineParams::default()
    });

    assert!(f.engine.send_hello());
    f.clock.advance(Duration::from_secs(86_400));
    assert!(!f.engine.send_hello());
    assert_eq!(f.transport.frames().len(), 1);
}

#[test]
fn huge_join_period_saturates_holdtime() {
    let mut f = fixture_with(EngineParams {
        join_period: Duration::from_secs(u64::MAX / 2),
        ..EngineParams::default()
    });

    f.engine
        .add_route(route(), PEER_A, MacAddr::new(0x02, 0, 0, 0, 0, 2));
    f.clock.advance(Duration::from_secs(86_400));
    assert_eq!(f.engine.send_joins(), 0);

    let messages = join_prune_frames(&f.transport);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].holdtime, u16::MAX);
}
