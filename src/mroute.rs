// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Multicast route types shared between the engine and the route directory
//!
//! - [`McastRoute`]: an (S,G) route the router is asked to pull traffic for.
//!   Each one is sourced upstream by exactly one link engine.
//! - [`DownstreamEntry`] / [`JoinPruneIntent`]: (S,G) or (*,G) interest that a
//!   downstream router expressed towards us in a Join/Prune message.
//! - [`RouteEvent`]: add/withdraw notifications from the route directory.

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// (S,G) multicast route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct McastRoute {
    /// Source address
    pub source: Ipv4Addr,
    /// Multicast group address
    pub group: Ipv4Addr,
}

impl McastRoute {
    pub fn new(source: Ipv4Addr, group: Ipv4Addr) -> Self {
        Self { source, group }
    }
}

impl fmt::Display for McastRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.source, self.group)
    }
}

/// Route directory notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteEvent {
    /// A route was learned; it should be joined upstream
    Added(McastRoute),
    /// A route was withdrawn; it should be pruned upstream
    Removed(McastRoute),
}

/// Downstream join state key. `source == None` is a (*,G) entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DownstreamEntry {
    pub source: Option<Ipv4Addr>,
    pub group: Ipv4Addr,
}

impl DownstreamEntry {
    pub fn source_group(source: Ipv4Addr, group: Ipv4Addr) -> Self {
        Self {
            source: Some(source),
            group,
        }
    }

    pub fn any_source(group: Ipv4Addr) -> Self {
        Self {
            source: None,
            group,
        }
    }

    /// True for (*,G) entries
    pub fn is_wildcard(&self) -> bool {
        self.source.is_none()
    }
}

impl fmt::Display for DownstreamEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source {
            Some(source) => write!(f, "({}, {})", source, self.group),
            None => write!(f, "(*, {})", self.group),
        }
    }
}

/// Interest change learned from an inbound Join/Prune message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinPruneIntent {
    /// A downstream router started asking for this entry
    Join {
        entry: DownstreamEntry,
        holdtime: Duration,
    },
    /// A downstream router stopped asking for this entry (explicit prune
    /// or join state expiry)
    Prune { entry: DownstreamEntry },
}

impl JoinPruneIntent {
    pub fn entry(&self) -> &DownstreamEntry {
        match self {
            JoinPruneIntent::Join { entry, .. } | JoinPruneIntent::Prune { entry } => entry,
        }
    }

    pub fn is_join(&self) -> bool {
        matches!(self, JoinPruneIntent::Join { .. })
    }
}
