// SPDX-License-Identifier: Apache-2.0 OR MIT
//! PIM neighbor records and DR candidate ordering

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use pnet::util::MacAddr;

use crate::protocols::pim::{HelloMessage, LanPruneDelay, DEFAULT_DR_PRIORITY, DEFAULT_HELLO_HOLDTIME};

/// A router seen on the link, or the local router itself
///
/// Two records compare equal when they advertise the same options (address,
/// MAC, generation ID, holdtime, DR priority). Refresh timestamps and the
/// LAN prune delay do not take part in equality.
#[derive(Debug, Clone)]
pub struct PimNeighbor {
    /// Neighbor's IP address
    pub address: Ipv4Addr,
    /// Source MAC of the neighbor's Hellos
    pub mac: MacAddr,
    /// Holdtime in seconds; 0 means the neighbor is leaving
    pub holdtime: u16,
    /// DR priority from Hello
    pub dr_priority: u32,
    /// Generation ID from Hello
    pub generation_id: u32,
    /// LAN Prune Delay, if advertised
    pub lan_prune_delay: Option<LanPruneDelay>,
    /// First time this neighbor was seen with its current generation ID
    pub up_since: Instant,
    /// Last time a Hello was received
    pub last_refresh: Instant,
}

impl PimNeighbor {
    /// Create a new neighbor entry
    pub fn new(
        address: Ipv4Addr,
        mac: MacAddr,
        holdtime: u16,
        dr_priority: u32,
        generation_id: u32,
        now: Instant,
    ) -> Self {
        Self {
            address,
            mac,
            holdtime,
            dr_priority,
            generation_id,
            lan_prune_delay: None,
            up_since: now,
            last_refresh: now,
        }
    }

    /// Build a record from a decoded Hello, applying protocol defaults for
    /// any option the sender left out
    pub fn from_hello(address: Ipv4Addr, mac: MacAddr, hello: &HelloMessage, now: Instant) -> Self {
        let mut neighbor = Self::new(
            address,
            mac,
            hello
                .holdtime
                .unwrap_or(DEFAULT_HELLO_HOLDTIME.as_secs() as u16),
            hello.dr_priority.unwrap_or(DEFAULT_DR_PRIORITY),
            hello.generation_id.unwrap_or(0),
            now,
        );
        neighbor.lan_prune_delay = hello.lan_prune_delay;
        neighbor
    }

    /// Stamp the last-refresh time
    pub fn refresh(&mut self, now: Instant) {
        self.last_refresh = now;
    }

    pub fn expires_at(&self) -> Instant {
        self.last_refresh + Duration::from_secs(u64::from(self.holdtime))
    }

    /// Check if the neighbor has expired
    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at()
    }

    /// Time since the neighbor came up
    pub fn uptime(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.up_since)
    }

    /// True if this record wins a DR election against `other`
    pub fn beats(&self, other: &PimNeighbor) -> bool {
        self.dr_key() > other.dr_key()
    }

    /// Ordering key for DR election: priority first, then address
    pub fn dr_key(&self) -> (u32, Ipv4Addr) {
        (self.dr_priority, self.address)
    }
}

impl PartialEq for PimNeighbor {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
            && self.mac == other.mac
            && self.generation_id == other.generation_id
            && self.holdtime == other.holdtime
            && self.dr_priority == other.dr_priority
    }
}

impl Eq for PimNeighbor {}

/// Full recompute: the highest `(priority, address)` among `candidates`
pub fn elect_dr<'a, I>(candidates: I) -> Option<Ipv4Addr>
where
    I: IntoIterator<Item = &'a PimNeighbor>,
{
    candidates
        .into_iter()
        .max_by_key(|n| n.dr_key())
        .map(|n| n.address)
}
