// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Collaborator seams
//!
//! The engine layer never talks to the network, the interface inventory or
//! the unicast RIB directly. Everything it needs from the outside goes
//! through the traits in this module, bundled into [`Services`].

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use ipnetwork::Ipv4Network;
use pnet::util::MacAddr;
use serde::{Deserialize, Serialize};

use crate::mroute::{JoinPruneIntent, McastRoute};

/// Switch port (device + port number) a link engine is bound to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttachmentPoint {
    pub device: String,
    pub port: u32,
}

impl AttachmentPoint {
    pub fn new(device: impl Into<String>, port: u32) -> Self {
        Self {
            device: device.into(),
            port,
        }
    }
}

impl fmt::Display for AttachmentPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.port)
    }
}

/// Logical interface as reported by the interface service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub attachment_point: AttachmentPoint,
    /// IPv4 addresses with prefix length
    pub addresses: Vec<Ipv4Network>,
    pub mac: MacAddr,
    pub vlan: Option<u16>,
}

impl InterfaceInfo {
    /// First configured IPv4 address, used as the PIM source address
    pub fn primary_address(&self) -> Option<Ipv4Addr> {
        self.addresses.first().map(|net| net.ip())
    }

    /// True if `ip` falls inside one of the interface subnets
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.addresses.iter().any(|net| net.contains(ip))
    }
}

/// Interface inventory change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceEvent {
    Added(InterfaceInfo),
    Updated(InterfaceInfo),
    Removed(InterfaceInfo),
}

/// Result of a unicast longest-prefix-match lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnicastRoute {
    pub prefix: Ipv4Network,
    pub next_hop: Ipv4Addr,
}

/// Host known to the host service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostEntry {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub vlan: Option<u16>,
}

/// Outbound frame delivery
pub trait PacketTransport: Send + Sync {
    /// Emit a fully formed link-layer frame on the given attachment point
    fn transmit(&self, attachment_point: &AttachmentPoint, frame: Vec<u8>);
}

/// Interface inventory
pub trait InterfaceService: Send + Sync {
    fn interfaces(&self) -> Vec<InterfaceInfo>;

    fn interface_by_name(&self, name: &str) -> Option<InterfaceInfo> {
        self.interfaces().into_iter().find(|i| i.name == name)
    }

    /// Interface whose subnet contains `ip`
    fn matching_interface(&self, ip: Ipv4Addr) -> Option<InterfaceInfo> {
        self.interfaces().into_iter().find(|i| i.contains(ip))
    }
}

/// Unicast RIB lookups
pub trait UnicastRouteService: Send + Sync {
    fn longest_prefix_match(&self, destination: Ipv4Addr) -> Option<UnicastRoute>;
}

/// Host (IP to MAC) lookups
pub trait HostService: Send + Sync {
    fn hosts_by_ip(&self, ip: Ipv4Addr) -> Vec<HostEntry>;
}

/// Multicast route directory
pub trait MulticastRouteDirectory: Send + Sync {
    /// Routes currently requested
    fn routes(&self) -> Vec<McastRoute>;

    /// Downstream interest learned on `attachment_point`
    fn join_prune(&self, _attachment_point: &AttachmentPoint, _intent: &JoinPruneIntent) {}
}

/// Monotonic time source
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared handles to every collaborator
#[derive(Clone)]
pub struct Services {
    pub transport: Arc<dyn PacketTransport>,
    pub interfaces: Arc<dyn InterfaceService>,
    pub unicast_routes: Arc<dyn UnicastRouteService>,
    pub hosts: Arc<dyn HostService>,
    pub mcast_routes: Arc<dyn MulticastRouteDirectory>,
    pub clock: Arc<dyn Clock>,
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}
