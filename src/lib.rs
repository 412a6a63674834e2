// SPDX-License-Identifier: Apache-2.0 OR MIT
//! PIM-SM link engine
//!
//! Per-link neighbor discovery and Designated Router election, plus
//! upstream Join/Prune refresh for (S,G) routes. Network I/O, the interface
//! inventory and the unicast RIB are reached through the traits in
//! [`services`]; [`pim::EngineManager`] ties them together.

#[macro_use]
pub mod logging;

pub mod config;
pub mod mroute;
pub mod pim;
pub mod protocols;
pub mod services;

/// In-memory collaborators for tests, enabled by the `testing` feature
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{ConfigError, InterfaceConfig, PimConfig};
pub use mroute::{DownstreamEntry, JoinPruneIntent, McastRoute, RouteEvent};
pub use pim::{EngineManager, LinkEngine};
pub use services::{AttachmentPoint, Services};
