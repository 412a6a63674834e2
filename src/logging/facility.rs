// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging facilities (component identifiers)

use serde::{Deserialize, Serialize};

/// Logging facility - identifies which component generated the log message
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Facility {
    /// Engine lifecycle, frame dispatch, route events
    Manager = 0,
    /// Per-link Hello, DR election and Join/Prune state
    LinkEngine = 1,
    /// Neighbor table changes
    Neighbor = 2,
    /// Frame encoding and decoding
    Codec = 3,
    /// Route to link resolution
    Binding = 4,
    /// Periodic sweep tasks
    Scheduler = 5,
    /// Configuration loading and validation
    Config = 6,

    /// Test harness and fixtures
    Test = 12,

    /// Fallback for uncategorized messages
    Unknown = 255,
}

impl Facility {
    /// Get facility code as u8
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Get facility name as static string
    pub const fn as_str(self) -> &'static str {
        match self {
            Facility::Manager => "Manager",
            Facility::LinkEngine => "LinkEngine",
            Facility::Neighbor => "Neighbor",
            Facility::Codec => "Codec",
            Facility::Binding => "Binding",
            Facility::Scheduler => "Scheduler",
            Facility::Config => "Config",
            Facility::Test => "Test",
            Facility::Unknown => "Unknown",
        }
    }

    /// Create from u8 value (returns Unknown if invalid)
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Facility::Manager,
            1 => Facility::LinkEngine,
            2 => Facility::Neighbor,
            3 => Facility::Codec,
            4 => Facility::Binding,
            5 => Facility::Scheduler,
            6 => Facility::Config,
            12 => Facility::Test,
            _ => Facility::Unknown,
        }
    }
}

impl std::fmt::Display for Facility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
