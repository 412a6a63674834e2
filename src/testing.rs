// SPDX-License-Identifier: Apache-2.0 OR MIT
//! In-memory collaborators for unit and integration tests
//!
//! [`TestEnvironment`] wires a recording transport, static interface, route
//! and host tables, a recording multicast route directory and a
//! [`ManualClock`] into a [`Services`] bundle.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use ipnetwork::Ipv4Network;
use pnet::util::MacAddr;

use crate::mroute::{JoinPruneIntent, McastRoute};
use crate::services::{
    AttachmentPoint, HostEntry, HostService, InterfaceInfo, InterfaceService, ManualClock,
    MulticastRouteDirectory, PacketTransport, Services, UnicastRoute, UnicastRouteService,
};

/// Device id used for every attachment point created by the fixtures
pub const TEST_DEVICE: &str = "of:0001";

/// Transport that keeps every transmitted frame
#[derive(Debug, Default)]
pub struct RecordingTransport {
    frames: Mutex<Vec<(AttachmentPoint, Vec<u8>)>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every frame sent so far, in order
    pub fn frames(&self) -> Vec<(AttachmentPoint, Vec<u8>)> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Frames sent on one attachment point
    pub fn frames_on(&self, attachment_point: &AttachmentPoint) -> Vec<Vec<u8>> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(ap, _)| ap == attachment_point)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    /// Drain and return everything sent so far
    pub fn take(&self) -> Vec<(AttachmentPoint, Vec<u8>)> {
        std::mem::take(&mut *self.frames.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl PacketTransport for RecordingTransport {
    fn transmit(&self, attachment_point: &AttachmentPoint, frame: Vec<u8>) {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((attachment_point.clone(), frame));
    }
}

#[derive(Debug, Default)]
pub struct StaticInterfaces {
    interfaces: RwLock<Vec<InterfaceInfo>>,
}

impl StaticInterfaces {
    /// Insert or replace (by name)
    pub fn upsert(&self, info: InterfaceInfo) {
        let mut interfaces = self
            .interfaces
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        interfaces.retain(|i| i.name != info.name);
        interfaces.push(info);
    }

    pub fn remove(&self, name: &str) -> Option<InterfaceInfo> {
        let mut interfaces = self
            .interfaces
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let idx = interfaces.iter().position(|i| i.name == name)?;
        Some(interfaces.remove(idx))
    }
}

impl InterfaceService for StaticInterfaces {
    fn interfaces(&self) -> Vec<InterfaceInfo> {
        self.interfaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug, Default)]
pub struct StaticUnicastRoutes {
    routes: RwLock<Vec<UnicastRoute>>,
}

impl StaticUnicastRoutes {
    pub fn add(&self, route: UnicastRoute) {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(route);
    }
}

impl UnicastRouteService for StaticUnicastRoutes {
    fn longest_prefix_match(&self, destination: Ipv4Addr) -> Option<UnicastRoute> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.prefix.contains(destination))
            .max_by_key(|r| r.prefix.prefix())
            .copied()
    }
}

#[derive(Debug, Default)]
pub struct StaticHosts {
    hosts: RwLock<Vec<HostEntry>>,
}

impl StaticHosts {
    pub fn add(&self, host: HostEntry) {
        self.hosts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(host);
    }
}

impl HostService for StaticHosts {
    fn hosts_by_ip(&self, ip: Ipv4Addr) -> Vec<HostEntry> {
        self.hosts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|h| h.ip == ip)
            .copied()
            .collect()
    }
}

/// Route directory with a settable route list that records every intent
#[derive(Debug, Default)]
pub struct RecordingRouteDirectory {
    routes: RwLock<Vec<McastRoute>>,
    intents: Mutex<Vec<(AttachmentPoint, JoinPruneIntent)>>,
}

impl RecordingRouteDirectory {
    pub fn add(&self, route: McastRoute) {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(route);
    }

    pub fn intents(&self) -> Vec<(AttachmentPoint, JoinPruneIntent)> {
        self.intents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MulticastRouteDirectory for RecordingRouteDirectory {
    fn routes(&self) -> Vec<McastRoute> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn join_prune(&self, attachment_point: &AttachmentPoint, intent: &JoinPruneIntent) {
        self.intents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((attachment_point.clone(), intent.clone()));
    }
}

/// MAC given to the interface on `port`
pub fn interface_mac(port: u32) -> MacAddr {
    MacAddr::new(0x02, 0x00, 0x00, 0x00, 0x01, port as u8)
}

/// All fakes, shared through `Arc` so tests can keep poking at them
#[derive(Debug, Default)]
pub struct TestEnvironment {
    pub transport: Arc<RecordingTransport>,
    pub interfaces: Arc<StaticInterfaces>,
    pub unicast_routes: Arc<StaticUnicastRoutes>,
    pub hosts: Arc<StaticHosts>,
    pub mcast_routes: Arc<RecordingRouteDirectory>,
    pub clock: Arc<ManualClock>,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn services(&self) -> Services {
        Services {
            transport: self.transport.clone(),
            interfaces: self.interfaces.clone(),
            unicast_routes: self.unicast_routes.clone(),
            hosts: self.hosts.clone(),
            mcast_routes: self.mcast_routes.clone(),
            clock: self.clock.clone(),
        }
    }

    /// Register interface `name` on port `port` of [`TEST_DEVICE`]
    ///
    /// # Panics
    ///
    /// Panics if `cidr` is not an IPv4 network.
    pub fn add_interface(
        &self,
        name: &str,
        port: u32,
        cidr: &str,
        vlan: Option<u16>,
    ) -> InterfaceInfo {
        let info = interface_info(name, port, cidr, vlan);
        self.interfaces.upsert(info.clone());
        info
    }

    /// # Panics
    ///
    /// Panics if `prefix` is not an IPv4 network.
    pub fn add_unicast_route(&self, prefix: &str, next_hop: Ipv4Addr) {
        self.unicast_routes.add(UnicastRoute {
            prefix: parse_network(prefix),
            next_hop,
        });
    }

    pub fn add_host(&self, ip: Ipv4Addr, mac: MacAddr, vlan: Option<u16>) {
        self.hosts.add(HostEntry { ip, mac, vlan });
    }
}

/// Build an [`InterfaceInfo`] without registering it
///
/// # Panics
///
/// Panics if `cidr` is not an IPv4 network.
pub fn interface_info(name: &str, port: u32, cidr: &str, vlan: Option<u16>) -> InterfaceInfo {
    InterfaceInfo {
        name: name.to_string(),
        attachment_point: AttachmentPoint::new(TEST_DEVICE, port),
        addresses: vec![parse_network(cidr)],
        mac: interface_mac(port),
        vlan,
    }
}

fn parse_network(cidr: &str) -> Ipv4Network {
    cidr.parse()
        .unwrap_or_else(|e| panic!("invalid IPv4 network {cidr:?}: {e}"))
}
