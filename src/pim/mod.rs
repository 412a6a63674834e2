// SPDX-License-Identifier: Apache-2.0 OR MIT
//! PIM-SM link engines
//!
//! - `neighbor`: neighbor records and DR ordering
//! - `frame`: Ethernet/VLAN/IPv4 framing of PIM messages
//! - `interface`: per-link state machine ([`LinkEngine`])
//! - `binding`: (S,G) route to link resolution
//! - `manager`: engine registry, frame dispatch, sweeps ([`EngineManager`])
//! - `scheduler`: tokio tasks driving the sweeps

pub mod binding;
pub mod frame;
pub mod interface;
pub mod manager;
pub mod neighbor;
pub mod scheduler;

pub use binding::RouteBinding;
pub use frame::{decode_frame, FrameError, LinkAddress, PimFrame};
pub use interface::{EngineParams, EngineSnapshot, LinkEngine, NeighborSnapshot, UpstreamState};
pub use manager::{EngineHandle, EngineManager};
pub use neighbor::PimNeighbor;
pub use scheduler::{run_receiver, InboundFrame, SchedulerHandle, SweepIntervals};
