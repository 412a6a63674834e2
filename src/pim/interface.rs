// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Per-link PIM state
//!
//! A [`LinkEngine`] runs PIM on one attachment point: it sends Hellos,
//! tracks neighbors and the Designated Router, keeps upstream Join state for
//! the (S,G) routes sourced through this link, and records downstream join
//! interest addressed to us.
//!
//! The engine never schedules anything. Every operation reads the clock and
//! decides from timestamps; the periodic sweeps in `scheduler` only call in.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pnet::util::MacAddr;
use serde::Serialize;

use super::frame::{build_hello, build_join_prune, LinkAddress, PimFrame};
use super::neighbor::{elect_dr, PimNeighbor};
use crate::logging::{Facility, Logger, Severity};
use crate::mroute::{DownstreamEntry, JoinPruneIntent, McastRoute};
use crate::protocols::pim::{
    join_prune_holdtime, HelloMessage, JoinPruneMessage, LanPruneDelay, PimHelloBuilder,
    DEFAULT_DR_PRIORITY, DEFAULT_HELLO_HOLDTIME, DEFAULT_HELLO_PERIOD, DEFAULT_JOIN_PRUNE_PERIOD,
    DEFAULT_OVERRIDE_INTERVAL, DEFAULT_PROPAGATION_DELAY,
};
use crate::services::{AttachmentPoint, Clock, PacketTransport};
use crate::{log_debug, log_info, log_kv, log_warning};

/// Locally advertised PIM parameters for one link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineParams {
    pub hello_interval: Duration,
    /// Holdtime in seconds advertised in our Hellos
    pub holdtime: u16,
    pub priority: u32,
    pub propagation_delay: Duration,
    pub override_interval: Duration,
    /// Upstream Join refresh period
    pub join_period: Duration,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            hello_interval: DEFAULT_HELLO_PERIOD,
            holdtime: DEFAULT_HELLO_HOLDTIME.as_secs() as u16,
            priority: DEFAULT_DR_PRIORITY,
            propagation_delay: DEFAULT_PROPAGATION_DELAY,
            override_interval: DEFAULT_OVERRIDE_INTERVAL,
            join_period: DEFAULT_JOIN_PRUNE_PERIOD,
        }
    }
}

/// Upstream state for one (S,G) route sourced through this link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamState {
    pub next_hop: Ipv4Addr,
    pub next_hop_mac: MacAddr,
    /// When the last Join went out; `None` until the first one is sent
    pub last_join: Option<Instant>,
}

/// Diagnostic view of one neighbor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NeighborSnapshot {
    pub address: Ipv4Addr,
    pub mac: String,
    pub dr_priority: u32,
    pub generation_id: u32,
    pub holdtime: u16,
    pub uptime_secs: u64,
    /// `None` for the local router
    pub expires_in_secs: Option<u64>,
    pub is_dr: bool,
    pub is_self: bool,
}

/// Diagnostic view of one link engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineSnapshot {
    pub interface: String,
    pub attachment_point: String,
    pub address: Ipv4Addr,
    pub dr: Ipv4Addr,
    pub neighbors: Vec<NeighborSnapshot>,
}

/// PIM state machine for a single link
pub struct LinkEngine {
    attachment_point: AttachmentPoint,
    interface_name: String,
    link: LinkAddress,
    params: EngineParams,
    generation_id: u32,
    /// Includes the self-record keyed by our own address
    neighbors: HashMap<Ipv4Addr, PimNeighbor>,
    dr: Ipv4Addr,
    routes: HashMap<McastRoute, UpstreamState>,
    /// Downstream join state and its expiry
    downstream: HashMap<DownstreamEntry, Instant>,
    last_hello: Option<Instant>,
    transport: Arc<dyn PacketTransport>,
    clock: Arc<dyn Clock>,
    logger: Logger,
}

impl LinkEngine {
    /// Create an engine with a random generation ID
    pub fn new(
        attachment_point: AttachmentPoint,
        interface_name: impl Into<String>,
        link: LinkAddress,
        params: EngineParams,
        transport: Arc<dyn PacketTransport>,
        clock: Arc<dyn Clock>,
        logger: Logger,
    ) -> Self {
        Self::with_generation_id(
            attachment_point,
            interface_name,
            link,
            params,
            rand::random(),
            transport,
            clock,
            logger,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_generation_id(
        attachment_point: AttachmentPoint,
        interface_name: impl Into<String>,
        link: LinkAddress,
        params: EngineParams,
        generation_id: u32,
        transport: Arc<dyn PacketTransport>,
        clock: Arc<dyn Clock>,
        logger: Logger,
    ) -> Self {
        let now = clock.now();
        let mut self_record = PimNeighbor::new(
            link.ip,
            link.mac,
            params.holdtime,
            params.priority,
            generation_id,
            now,
        );
        self_record.lan_prune_delay = Some(LanPruneDelay::new(
            params.propagation_delay,
            params.override_interval,
        ));

        let mut neighbors = HashMap::new();
        neighbors.insert(link.ip, self_record);

        Self {
            attachment_point,
            interface_name: interface_name.into(),
            link,
            params,
            generation_id,
            neighbors,
            dr: link.ip,
            routes: HashMap::new(),
            downstream: HashMap::new(),
            last_hello: None,
            transport,
            clock,
            logger,
        }
    }

    pub fn attachment_point(&self) -> &AttachmentPoint {
        &self.attachment_point
    }

    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    pub fn local_address(&self) -> Ipv4Addr {
        self.link.ip
    }

    pub fn link_address(&self) -> &LinkAddress {
        &self.link
    }

    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    pub fn generation_id(&self) -> u32 {
        self.generation_id
    }

    pub fn last_hello(&self) -> Option<Instant> {
        self.last_hello
    }

    /// All neighbor records, the self-record included
    pub fn neighbors(&self) -> impl Iterator<Item = &PimNeighbor> {
        self.neighbors.values()
    }

    pub fn neighbor(&self, address: Ipv4Addr) -> Option<&PimNeighbor> {
        self.neighbors.get(&address)
    }

    /// Number of records, the self-record included
    pub fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }

    /// Current Designated Router
    pub fn dr(&self) -> Ipv4Addr {
        self.dr
    }

    pub fn is_dr(&self) -> bool {
        self.dr == self.link.ip
    }

    pub fn routes(&self) -> impl Iterator<Item = (&McastRoute, &UpstreamState)> {
        self.routes.iter()
    }

    pub fn route(&self, route: &McastRoute) -> Option<&UpstreamState> {
        self.routes.get(route)
    }

    /// Downstream join entries with their expiry
    pub fn downstream(&self) -> impl Iterator<Item = (&DownstreamEntry, &Instant)> {
        self.downstream.iter()
    }

    fn hello_builder(&self, holdtime: u16) -> PimHelloBuilder {
        PimHelloBuilder::new(holdtime, self.params.priority, self.generation_id).with_lan_prune_delay(
            LanPruneDelay::new(self.params.propagation_delay, self.params.override_interval),
        )
    }

    fn transmit_hello(&self, holdtime: u16) -> bool {
        match build_hello(&self.link, &self.hello_builder(holdtime)) {
            Ok(frame) => {
                self.transport.transmit(&self.attachment_point, frame);
                true
            }
            Err(e) => {
                log_warning!(
                    self.logger,
                    Facility::LinkEngine,
                    &format!("Failed to build Hello on {}: {}", self.interface_name, e)
                );
                false
            }
        }
    }

    /// Send a Hello if the hello interval has elapsed since the last one.
    /// Returns true if a Hello went out.
    pub fn send_hello(&mut self) -> bool {
        let now = self.clock.now();
        if let Some(last) = self.last_hello {
            // An interval too large to represent is never due
            match last.checked_add(self.params.hello_interval) {
                Some(due) if due <= now => {}
                _ => return false,
            }
        }

        if !self.transmit_hello(self.params.holdtime) {
            return false;
        }
        self.last_hello = Some(now);
        log_debug!(
            self.logger,
            Facility::LinkEngine,
            &format!(
                "Sent Hello on {} (genid {:#010x})",
                self.interface_name, self.generation_id
            )
        );
        true
    }

    /// Hello with holdtime 0 so that neighbors drop us immediately
    pub fn send_goodbye(&self) {
        if self.transmit_hello(0) {
            log_info!(
                self.logger,
                Facility::LinkEngine,
                &format!("Sent goodbye Hello on {}", self.interface_name)
            );
        }
    }

    /// Apply a received Hello to the neighbor table
    pub fn process_hello(&mut self, frame: &PimFrame) {
        if frame.src_ip == self.link.ip {
            log_debug!(
                self.logger,
                Facility::Neighbor,
                &format!("Ignoring own Hello on {}", self.interface_name)
            );
            return;
        }

        let hello = match HelloMessage::parse(frame.body()) {
            Ok(hello) => hello,
            Err(e) => {
                log_warning!(
                    self.logger,
                    Facility::Codec,
                    &format!(
                        "Dropping malformed Hello from {} on {}: {}",
                        frame.src_ip, self.interface_name, e
                    )
                );
                return;
            }
        };

        let now = self.clock.now();
        let mut incoming = PimNeighbor::from_hello(frame.src_ip, frame.src_mac, &hello, now);
        let address = incoming.address;

        match self.neighbors.get_mut(&address) {
            None if incoming.holdtime == 0 => {
                log_debug!(
                    self.logger,
                    Facility::Neighbor,
                    &format!(
                        "Ignoring goodbye from unknown neighbor {} on {}",
                        address, self.interface_name
                    )
                );
            }
            None => {
                self.neighbors.insert(address, incoming);
                self.log_neighbor_event(
                    address,
                    &format!(
                        "Neighbor {} up on {} (priority {})",
                        address,
                        self.interface_name,
                        hello.dr_priority.unwrap_or(DEFAULT_DR_PRIORITY)
                    ),
                );
                self.neighbor_changed(address);
            }
            Some(existing) if *existing == incoming => {
                existing.refresh(now);
                existing.lan_prune_delay = incoming.lan_prune_delay;
            }
            Some(_) if incoming.holdtime == 0 => {
                self.neighbors.remove(&address);
                self.log_neighbor_event(
                    address,
                    &format!("Neighbor {} left {}", address, self.interface_name),
                );
                self.neighbor_removed(address);
            }
            Some(existing) => {
                if existing.generation_id == incoming.generation_id {
                    incoming.up_since = existing.up_since;
                } else {
                    log_info!(
                        self.logger,
                        Facility::Neighbor,
                        &format!(
                            "Neighbor {} on {} restarted (genid {:#010x} -> {:#010x})",
                            address,
                            self.interface_name,
                            existing.generation_id,
                            incoming.generation_id
                        )
                    );
                }
                *existing = incoming;
                self.neighbor_changed(address);
            }
        }
    }

    /// Incremental election after `address` was inserted or replaced
    fn neighbor_changed(&mut self, address: Ipv4Addr) {
        if address == self.dr {
            self.recompute_dr();
            return;
        }
        let challenger_wins = match (self.neighbors.get(&address), self.neighbors.get(&self.dr)) {
            (Some(challenger), Some(current)) => challenger.beats(current),
            (Some(_), None) => true,
            _ => false,
        };
        if challenger_wins {
            self.set_dr(address);
        }
    }

    /// Election after `address` was removed from the table
    fn neighbor_removed(&mut self, address: Ipv4Addr) {
        if address == self.dr {
            self.recompute_dr();
        }
    }

    fn recompute_dr(&mut self) {
        let elected = elect_dr(self.neighbors.values()).unwrap_or(self.link.ip);
        self.set_dr(elected);
    }

    fn set_dr(&mut self, dr: Ipv4Addr) {
        if dr == self.dr {
            return;
        }
        let previous = self.dr.to_string();
        let elected = dr.to_string();
        log_kv!(
            self.logger,
            Severity::Notice,
            Facility::LinkEngine,
            &format!("DR on {} changed: {} -> {}", self.interface_name, previous, elected),
            "iface" => self.interface_name.as_str(),
            "previous" => previous.as_str(),
            "dr" => elected.as_str()
        );
        self.dr = dr;
    }

    /// Neighbor up/down at notice severity, tagged with peer and interface
    fn log_neighbor_event(&self, address: Ipv4Addr, message: &str) {
        let peer = address.to_string();
        log_kv!(
            self.logger,
            Severity::Notice,
            Facility::Neighbor,
            message,
            "peer" => peer.as_str(),
            "iface" => self.interface_name.as_str()
        );
    }

    /// Drop expired neighbors and expired downstream join state.
    ///
    /// Returns a prune intent for every downstream entry that timed out.
    pub fn check_neighbor_timeouts(&mut self) -> Vec<JoinPruneIntent> {
        let now = self.clock.now();
        let local = self.link.ip;

        let expired: Vec<Ipv4Addr> = self
            .neighbors
            .values()
            .filter(|n| n.address != local && n.is_expired(now))
            .map(|n| n.address)
            .collect();

        let mut dr_lost = false;
        for address in expired {
            self.neighbors.remove(&address);
            dr_lost |= address == self.dr;
            self.log_neighbor_event(
                address,
                &format!("Neighbor {} on {} timed out", address, self.interface_name),
            );
        }
        if dr_lost {
            self.recompute_dr();
        }

        let stale: Vec<DownstreamEntry> = self
            .downstream
            .iter()
            .filter(|(_, expiry)| now > **expiry)
            .map(|(entry, _)| *entry)
            .collect();

        stale
            .into_iter()
            .map(|entry| {
                self.downstream.remove(&entry);
                log_info!(
                    self.logger,
                    Facility::LinkEngine,
                    &format!(
                        "Downstream join {} on {} expired",
                        entry, self.interface_name
                    )
                );
                JoinPruneIntent::Prune { entry }
            })
            .collect()
    }

    /// Apply a received Join/Prune addressed to this router.
    ///
    /// Returns the downstream interest changes it caused.
    pub fn process_join_prune(&mut self, frame: &PimFrame) -> Vec<JoinPruneIntent> {
        let message = match JoinPruneMessage::parse(frame.body()) {
            Ok(message) => message,
            Err(e) => {
                log_warning!(
                    self.logger,
                    Facility::Codec,
                    &format!(
                        "Dropping malformed Join/Prune from {} on {}: {}",
                        frame.src_ip, self.interface_name, e
                    )
                );
                return Vec::new();
            }
        };

        if message.upstream != self.link.ip {
            log_debug!(
                self.logger,
                Facility::LinkEngine,
                &format!(
                    "Join/Prune from {} on {} is for {}, not us",
                    frame.src_ip, self.interface_name, message.upstream
                )
            );
            return Vec::new();
        }

        let now = self.clock.now();
        let holdtime = Duration::from_secs(u64::from(message.holdtime));
        let mut intents = Vec::new();

        for group in &message.groups {
            for source in &group.joins {
                let entry = if source.wildcard {
                    DownstreamEntry::any_source(group.group)
                } else if source.rpt {
                    log_debug!(
                        self.logger,
                        Facility::LinkEngine,
                        &format!(
                            "Ignoring (S,G,rpt) join for ({}, {})",
                            source.address, group.group
                        )
                    );
                    continue;
                } else {
                    DownstreamEntry::source_group(source.address, group.group)
                };

                if self.downstream.insert(entry, now + holdtime).is_none() {
                    log_info!(
                        self.logger,
                        Facility::LinkEngine,
                        &format!(
                            "Downstream join {} from {} on {}",
                            entry, frame.src_ip, self.interface_name
                        )
                    );
                    intents.push(JoinPruneIntent::Join { entry, holdtime });
                }
            }

            for source in &group.prunes {
                let entry = if source.wildcard {
                    DownstreamEntry::any_source(group.group)
                } else if source.rpt {
                    continue;
                } else {
                    DownstreamEntry::source_group(source.address, group.group)
                };

                if self.downstream.remove(&entry).is_some() {
                    log_info!(
                        self.logger,
                        Facility::LinkEngine,
                        &format!(
                            "Downstream prune {} from {} on {}",
                            entry, frame.src_ip, self.interface_name
                        )
                    );
                    intents.push(JoinPruneIntent::Prune { entry });
                }
            }
        }

        intents
    }

    fn transmit_join_prune(&self, route: &McastRoute, state: &UpstreamState, is_join: bool) -> bool {
        let holdtime = if is_join {
            join_prune_holdtime(self.params.join_period)
                .as_secs()
                .min(u64::from(u16::MAX)) as u16
        } else {
            0
        };

        match build_join_prune(
            &self.link,
            route,
            state.next_hop,
            state.next_hop_mac,
            holdtime,
            is_join,
        ) {
            Ok(frame) => {
                self.transport.transmit(&self.attachment_point, frame);
                log_debug!(
                    self.logger,
                    Facility::LinkEngine,
                    &format!(
                        "Sent {} {} to {} on {}",
                        if is_join { "Join" } else { "Prune" },
                        route,
                        state.next_hop,
                        self.interface_name
                    )
                );
                true
            }
            Err(e) => {
                log_warning!(
                    self.logger,
                    Facility::LinkEngine,
                    &format!("Failed to build Join/Prune for {}: {}", route, e)
                );
                false
            }
        }
    }

    /// Start sourcing `route` through `next_hop` and send a Join right away
    pub fn add_route(&mut self, route: McastRoute, next_hop: Ipv4Addr, next_hop_mac: MacAddr) {
        let mut state = UpstreamState {
            next_hop,
            next_hop_mac,
            last_join: None,
        };

        if let Some(previous) = self.routes.get(&route).copied() {
            if previous.next_hop == next_hop && previous.next_hop_mac == next_hop_mac {
                return;
            }
            if previous.last_join.is_some() {
                self.transmit_join_prune(&route, &previous, false);
            }
        }

        if self.transmit_join_prune(&route, &state, true) {
            state.last_join = Some(self.clock.now());
        }
        self.routes.insert(route, state);
        log_info!(
            self.logger,
            Facility::LinkEngine,
            &format!(
                "Route {} sourced via {} on {}",
                route, next_hop, self.interface_name
            )
        );
    }

    /// Stop sourcing `route`, pruning it upstream if it was joined
    pub fn remove_route(&mut self, route: &McastRoute) {
        let Some(state) = self.routes.remove(route) else {
            return;
        };
        if state.last_join.is_some() {
            self.transmit_join_prune(route, &state, false);
        }
        log_info!(
            self.logger,
            Facility::LinkEngine,
            &format!("Route {} removed from {}", route, self.interface_name)
        );
    }

    /// Refresh upstream Joins that are due. Returns the number sent.
    pub fn send_joins(&mut self) -> usize {
        let now = self.clock.now();
        let period = self.params.join_period;

        let due: Vec<(McastRoute, UpstreamState)> = self
            .routes
            .iter()
            .filter(|(_, state)| match state.last_join {
                Some(last) => now.saturating_duration_since(last) >= period,
                None => true,
            })
            .map(|(route, state)| (*route, *state))
            .collect();

        let mut sent = 0;
        for (route, state) in due {
            if self.transmit_join_prune(&route, &state, true) {
                if let Some(entry) = self.routes.get_mut(&route) {
                    entry.last_join = Some(now);
                }
                sent += 1;
            }
        }
        sent
    }

    /// Update advertised parameters in place
    pub fn apply_params(&mut self, params: EngineParams) {
        if params == self.params {
            return;
        }
        self.params = params;

        let local = self.link.ip;
        if let Some(record) = self.neighbors.get_mut(&local) {
            record.holdtime = params.holdtime;
            record.dr_priority = params.priority;
            record.lan_prune_delay = Some(LanPruneDelay::new(
                params.propagation_delay,
                params.override_interval,
            ));
        }
        self.neighbor_changed(local);

        log_info!(
            self.logger,
            Facility::LinkEngine,
            &format!(
                "Parameters updated on {} (priority {}, hello {}s, holdtime {}s)",
                self.interface_name,
                params.priority,
                params.hello_interval.as_secs(),
                params.holdtime
            )
        );
    }

    /// Routes currently sourced through this link
    pub fn route_keys(&self) -> Vec<McastRoute> {
        self.routes.keys().copied().collect()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let now = self.clock.now();
        let mut neighbors: Vec<NeighborSnapshot> = self
            .neighbors
            .values()
            .map(|n| {
                let is_self = n.address == self.link.ip;
                NeighborSnapshot {
                    address: n.address,
                    mac: n.mac.to_string(),
                    dr_priority: n.dr_priority,
                    generation_id: n.generation_id,
                    holdtime: n.holdtime,
                    uptime_secs: n.uptime(now).as_secs(),
                    expires_in_secs: (!is_self)
                        .then(|| n.expires_at().saturating_duration_since(now).as_secs()),
                    is_dr: n.address == self.dr,
                    is_self,
                }
            })
            .collect();
        neighbors.sort_by_key(|n| n.address);

        EngineSnapshot {
            interface: self.interface_name.clone(),
            attachment_point: self.attachment_point.to_string(),
            address: self.link.ip,
            dr: self.dr,
            neighbors,
        }
    }
}

impl std::fmt::Debug for LinkEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkEngine")
            .field("attachment_point", &self.attachment_point)
            .field("interface", &self.interface_name)
            .field("address", &self.link.ip)
            .field("dr", &self.dr)
            .field("neighbors", &self.neighbors.len())
            .field("routes", &self.routes.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pim::frame::decode_frame;
    use crate::protocols::pim::{JoinPruneBuilder, JoinPruneGroup, JoinPruneSource, PIM_JOIN_PRUNE};
    use crate::protocols::PacketBuilder;
    use crate::services::ManualClock;
    use crate::testing::RecordingTransport;

    struct Harness {
        engine: LinkEngine,
        transport: Arc<RecordingTransport>,
        clock: Arc<ManualClock>,
    }

    const LOCAL: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

    fn peer_link(ip: Ipv4Addr) -> LinkAddress {
        LinkAddress {
            mac: MacAddr::new(0x02, 0, 0, 0, 0, ip.octets()[3]),
            ip,
            vlan: None,
        }
    }

    fn harness() -> Harness {
        let transport = Arc::new(RecordingTransport::new());
        let clock = Arc::new(ManualClock::new());
        let (logger, _) = Logger::memory();
        let engine = LinkEngine::with_generation_id(
            AttachmentPoint::new("of:0001", 1),
            "eth0",
            peer_link(LOCAL),
            EngineParams::default(),
            0x1234,
            transport.clone(),
            clock.clone(),
            logger,
        );
        Harness {
            engine,
            transport,
            clock,
        }
    }

    fn hello_from(ip: Ipv4Addr, holdtime: u16, priority: u32, genid: u32) -> PimFrame {
        let raw = build_hello(&peer_link(ip), &PimHelloBuilder::new(holdtime, priority, genid)).unwrap();
        decode_frame(&raw).unwrap()
    }

    fn join_prune_from(ip: Ipv4Addr, builder: JoinPruneBuilder) -> PimFrame {
        let raw = crate::pim::frame::encapsulate(
            &peer_link(ip),
            MacAddr::broadcast(),
            crate::protocols::pim::ALL_PIM_ROUTERS,
            &builder.build(),
        )
        .unwrap();
        decode_frame(&raw).unwrap()
    }

    #[test]
    fn test_new_engine_is_its_own_dr() {
        let h = harness();
        assert_eq!(h.engine.dr(), LOCAL);
        assert!(h.engine.is_dr());
        assert_eq!(h.engine.neighbor_count(), 1);
        assert_eq!(h.engine.generation_id(), 0x1234);
    }

    #[test]
    fn test_neighbor_and_dr_events_carry_context() {
        let (logger, sink) = Logger::memory();
        let mut engine = LinkEngine::with_generation_id(
            AttachmentPoint::new("of:0001", 1),
            "eth0",
            peer_link(LOCAL),
            EngineParams::default(),
            0x1234,
            Arc::new(RecordingTransport::new()),
            Arc::new(ManualClock::new()),
            logger,
        );
        engine.process_hello(&hello_from(Ipv4Addr::new(10, 0, 0, 2), 105, 1, 1));

        let entries = sink.entries();
        let up = entries
            .iter()
            .find(|e| e.facility == Facility::Neighbor && e.severity == Severity::Notice)
            .unwrap();
        let kvs: Vec<(&str, &str)> = up.get_kvs().iter().map(|kv| (kv.key(), kv.value())).collect();
        assert_eq!(kvs, vec![("peer", "10.0.0.2"), ("iface", "eth0")]);

        let dr = entries
            .iter()
            .find(|e| e.get_message().starts_with("DR on eth0 changed"))
            .unwrap();
        assert!(dr
            .get_kvs()
            .iter()
            .any(|kv| kv.key() == "dr" && kv.value() == "10.0.0.2"));
    }

    #[test]
    fn test_hello_interval_gate() {
        let mut h = harness();
        assert!(h.engine.send_hello());
        assert!(!h.engine.send_hello());
        h.clock.advance(Duration::from_secs(29));
        assert!(!h.engine.send_hello());
        h.clock.advance(Duration::from_secs(1));
        assert!(h.engine.send_hello());
        assert_eq!(h.transport.frames().len(), 2);
    }

    #[test]
    fn test_own_hello_is_ignored() {
        let mut h = harness();
        h.engine.process_hello(&hello_from(LOCAL, 105, 99, 1));
        assert_eq!(h.engine.neighbor(LOCAL).unwrap().dr_priority, 1);
    }

    #[test]
    fn test_genid_change_resets_uptime() {
        let mut h = harness();
        let peer = Ipv4Addr::new(10, 0, 0, 2);
        h.engine.process_hello(&hello_from(peer, 105, 1, 7));
        let first_up = h.engine.neighbor(peer).unwrap().up_since;

        h.clock.advance(Duration::from_secs(10));
        h.engine.process_hello(&hello_from(peer, 105, 5, 7));
        assert_eq!(h.engine.neighbor(peer).unwrap().up_since, first_up);

        h.clock.advance(Duration::from_secs(10));
        h.engine.process_hello(&hello_from(peer, 105, 5, 8));
        assert_ne!(h.engine.neighbor(peer).unwrap().up_since, first_up);
    }

    #[test]
    fn test_goodbye_from_unknown_neighbor_is_ignored() {
        let mut h = harness();
        h.engine.process_hello(&hello_from(Ipv4Addr::new(10, 0, 0, 9), 0, 1, 7));
        assert_eq!(h.engine.neighbor_count(), 1);
    }

    #[test]
    fn test_priority_change_reelects() {
        let mut h = harness();
        let peer = Ipv4Addr::new(10, 0, 0, 2);
        h.engine.process_hello(&hello_from(peer, 105, 1, 7));
        assert_eq!(h.engine.dr(), peer);

        h.engine.apply_params(EngineParams {
            priority: 10,
            ..EngineParams::default()
        });
        assert_eq!(h.engine.dr(), LOCAL);

        h.engine.apply_params(EngineParams::default());
        assert_eq!(h.engine.dr(), peer);
    }

    #[test]
    fn test_downstream_join_and_prune() {
        let mut h = harness();
        let peer = Ipv4Addr::new(10, 0, 0, 2);
        let source = Ipv4Addr::new(192, 168, 1, 10);
        let group = Ipv4Addr::new(239, 1, 1, 1);

        let join = JoinPruneBuilder::new(LOCAL, 210).add_source(source, group, true);
        let intents = h.engine.process_join_prune(&join_prune_from(peer, join.clone()));
        assert_eq!(intents.len(), 1);
        assert!(intents[0].is_join());

        // Refresh only
        assert!(h.engine.process_join_prune(&join_prune_from(peer, join)).is_empty());

        let prune = JoinPruneBuilder::new(LOCAL, 210).add_source(source, group, false);
        let intents = h.engine.process_join_prune(&join_prune_from(peer, prune.clone()));
        assert_eq!(
            intents,
            vec![JoinPruneIntent::Prune {
                entry: DownstreamEntry::source_group(source, group)
            }]
        );

        // Untracked prune
        assert!(h.engine.process_join_prune(&join_prune_from(peer, prune)).is_empty());
    }

    #[test]
    fn test_join_prune_for_other_router_is_ignored() {
        let mut h = harness();
        let join = JoinPruneBuilder::new(Ipv4Addr::new(10, 0, 0, 3), 210).add_source(
            Ipv4Addr::new(192, 168, 1, 10),
            Ipv4Addr::new(239, 1, 1, 1),
            true,
        );
        let frame = join_prune_from(Ipv4Addr::new(10, 0, 0, 2), join);
        assert_eq!(frame.header.msg_type, PIM_JOIN_PRUNE);
        assert!(h.engine.process_join_prune(&frame).is_empty());
        assert_eq!(h.engine.downstream().count(), 0);
    }

    #[test]
    fn test_wildcard_join_and_expiry() {
        let mut h = harness();
        let group = Ipv4Addr::new(239, 2, 2, 2);
        let join = JoinPruneBuilder::new(LOCAL, 10).add_group(JoinPruneGroup {
            group,
            joins: vec![JoinPruneSource::wildcard(Ipv4Addr::new(10, 9, 9, 9))],
            prunes: vec![],
        });
        let intents = h
            .engine
            .process_join_prune(&join_prune_from(Ipv4Addr::new(10, 0, 0, 2), join));
        assert_eq!(intents[0].entry(), &DownstreamEntry::any_source(group));

        h.clock.advance(Duration::from_secs(10));
        assert!(h.engine.check_neighbor_timeouts().is_empty());
        h.clock.advance(Duration::from_millis(1));
        assert_eq!(
            h.engine.check_neighbor_timeouts(),
            vec![JoinPruneIntent::Prune {
                entry: DownstreamEntry::any_source(group)
            }]
        );
    }

    #[test]
    fn test_next_hop_change_prunes_old_upstream() {
        let mut h = harness();
        let route = McastRoute::new(Ipv4Addr::new(192, 168, 1, 10), Ipv4Addr::new(239, 1, 1, 1));
        h.engine
            .add_route(route, Ipv4Addr::new(10, 0, 0, 2), MacAddr::new(2, 0, 0, 0, 0, 2));
        h.engine
            .add_route(route, Ipv4Addr::new(10, 0, 0, 2), MacAddr::new(2, 0, 0, 0, 0, 2));
        assert_eq!(h.transport.frames().len(), 1);

        h.engine
            .add_route(route, Ipv4Addr::new(10, 0, 0, 3), MacAddr::new(2, 0, 0, 0, 0, 3));
        let frames = h.transport.frames();
        assert_eq!(frames.len(), 3);

        let prune = JoinPruneMessage::parse(decode_frame(&frames[1].1).unwrap().body()).unwrap();
        assert_eq!(prune.upstream, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(prune.holdtime, 0);
        let join = JoinPruneMessage::parse(decode_frame(&frames[2].1).unwrap().body()).unwrap();
        assert_eq!(join.upstream, Ipv4Addr::new(10, 0, 0, 3));
        assert_eq!(h.engine.route(&route).unwrap().next_hop, Ipv4Addr::new(10, 0, 0, 3));
    }

    #[test]
    fn test_snapshot_marks_self_and_dr() {
        let mut h = harness();
        h.engine
            .process_hello(&hello_from(Ipv4Addr::new(10, 0, 0, 2), 105, 1, 7));
        let snapshot = h.engine.snapshot();
        assert_eq!(snapshot.neighbors.len(), 2);
        assert!(snapshot.neighbors[0].is_self);
        assert_eq!(snapshot.neighbors[0].expires_in_secs, None);
        assert!(snapshot.neighbors[1].is_dr);
        assert_eq!(snapshot.neighbors[1].expires_in_secs, Some(105));
    }
}
