// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Decoder robustness
//!
//! Arbitrary bytes, and valid frames with corrupted bytes, are fed to every
//! decoding entry point. Any `Ok` or `Err` is acceptable; a panic is not.

use std::net::Ipv4Addr;

use pimd::pim::frame::{build_hello, build_join_prune, decode_frame, LinkAddress};
use pimd::protocols::pim::{
    parse_message, HelloMessage, JoinPruneMessage, LanPruneDelay, PimHelloBuilder,
    PimHelloOption, DEFAULT_OVERRIDE_INTERVAL, DEFAULT_PROPAGATION_DELAY,
};
use pimd::McastRoute;
use pnet::util::MacAddr;
use proptest::prelude::*;

fn sender() -> LinkAddress {
    LinkAddress {
        mac: MacAddr::new(0x02, 0, 0, 0, 0, 0x02),
        ip: Ipv4Addr::new(10, 0, 0, 2),
        vlan: Some(100),
    }
}

fn valid_frames() -> Vec<Vec<u8>> {
    let hello = build_hello(
        &sender(),
        &PimHelloBuilder::new(105, 1, 0xdead_beef).with_lan_prune_delay(LanPruneDelay::new(
            DEFAULT_PROPAGATION_DELAY,
            DEFAULT_OVERRIDE_INTERVAL,
        )),
    )
    .unwrap();
    let join = build_join_prune(
        &sender(),
        &McastRoute::new(Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::new(239, 1, 1, 1)),
        Ipv4Addr::new(10, 0, 0, 1),
        MacAddr::new(0x02, 0, 0, 0, 0, 0x01),
        210,
        true,
    )
    .unwrap();
    vec![hello, join]
}

proptest! {
    /// Every decoder returns without panicking on arbitrary input
    #[test]
    fn decoders_never_panic(input in any::<Vec<u8>>()) {
        let _ = decode_frame(&input);
        let _ = parse_message(&input);
        let _ = HelloMessage::parse(&input);
        let _ = PimHelloOption::parse_all(&input);
        let _ = JoinPruneMessage::parse(&input);
    }

    /// Corrupting and truncating real frames is handled gracefully
    #[test]
    fn corrupted_frames_never_panic(
        which in 0usize..2,
        offset in any::<prop::sample::Index>(),
        value in any::<u8>(),
        cut in any::<prop::sample::Index>(),
    ) {
        let mut frame = valid_frames().swap_remove(which);
        let at = offset.index(frame.len());
        frame[at] = value;
        let _ = decode_frame(&frame);

        frame.truncate(cut.index(frame.len()));
        if let Ok(decoded) = decode_frame(&frame) {
            let _ = HelloMessage::parse(decoded.body());
            let _ = JoinPruneMessage::parse(decoded.body());
        }
    }
}
