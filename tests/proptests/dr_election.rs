// SPDX-License-Identifier: Apache-2.0 OR MIT
//! DR election consistency
//!
//! A random sequence of Hellos (including priority changes and goodbyes),
//! clock steps and timeout sweeps is applied to one engine. After every step
//! the incrementally maintained DR must equal a full election over the
//! current neighbor table.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use pimd::logging::Logger;
use pimd::pim::frame::{build_hello, decode_frame, LinkAddress};
use pimd::pim::neighbor::elect_dr;
use pimd::pim::{EngineParams, LinkEngine};
use pimd::protocols::pim::PimHelloBuilder;
use pimd::services::{AttachmentPoint, ManualClock};
use pimd::testing::RecordingTransport;
use pnet::util::MacAddr;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Step {
    Hello { peer: u8, priority: u32, holdtime: u16 },
    Advance(u64),
    Sweep,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (2u8..8, 0u32..4, prop_oneof![Just(0u16), Just(10), Just(30), Just(105)])
            .prop_map(|(peer, priority, holdtime)| Step::Hello { peer, priority, holdtime }),
        2 => (0u64..40).prop_map(Step::Advance),
        2 => Just(Step::Sweep),
    ]
}

fn peer_link(peer: u8) -> LinkAddress {
    LinkAddress {
        mac: MacAddr::new(0x02, 0, 0, 0, 0, peer),
        ip: Ipv4Addr::new(10, 0, 0, peer),
        vlan: None,
    }
}

proptest! {
    #[test]
    fn incremental_dr_matches_full_election(
        local_priority in 0u32..4,
        steps in prop::collection::vec(step(), 1..60),
    ) {
        let clock = Arc::new(ManualClock::new());
        let (logger, _) = Logger::memory();
        let params = EngineParams {
            priority: local_priority,
            ..EngineParams::default()
        };
        let mut engine = LinkEngine::with_generation_id(
            AttachmentPoint::new("of:0001", 1),
            "eth0",
            peer_link(1),
            params,
            1,
            Arc::new(RecordingTransport::new()),
            clock.clone(),
            logger,
        );

        for step in steps {
            match step {
                Step::Hello { peer, priority, holdtime } => {
                    let raw = build_hello(
                        &peer_link(peer),
                        &PimHelloBuilder::new(holdtime, priority, u32::from(peer)),
                    )
                    .unwrap();
                    engine.process_hello(&decode_frame(&raw).unwrap());
                }
                Step::Advance(secs) => clock.advance(Duration::from_secs(secs)),
                Step::Sweep => {
                    engine.check_neighbor_timeouts();
                }
            }

            prop_assert_eq!(Some(engine.dr()), elect_dr(engine.neighbors()));
            prop_assert!(engine.neighbor(Ipv4Addr::new(10, 0, 0, 1)).is_some());
        }
    }
}
