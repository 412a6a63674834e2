// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Configuration file types and parsing for pimd.
//!
//! JSON5 configuration format supporting:
//! - Per-interface PIM enablement and Hello parameters
//! - Global Join/Prune period and sweep intervals
//! - Comments and trailing commas
//!
//! ```json5
//! {
//!   // Interfaces PIM runs on
//!   interfaces: [
//!     { interface: "eth0", priority: 10 },
//!     { interface: "eth1", enabled: false },
//!   ],
//!   join_period_secs: 60,
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use thiserror::Error;

use crate::pim::interface::EngineParams;
use crate::protocols::pim::{
    DEFAULT_DR_PRIORITY, DEFAULT_HELLO_HOLDTIME, DEFAULT_HELLO_PERIOD, DEFAULT_JOIN_PRUNE_PERIOD,
    DEFAULT_OVERRIDE_INTERVAL, DEFAULT_PROPAGATION_DELAY,
};

const DEFAULT_HELLO_TICK_MS: u64 = 1000;
const DEFAULT_TIMEOUT_TICK_MS: u64 = 250;
const DEFAULT_JOIN_TICK_MS: u64 = 5000;

/// Upper bound for the sweep ticks (one hour)
const MAX_TICK_MS: u64 = 3_600_000;

fn default_true() -> bool {
    true
}

fn default_join_period_secs() -> u64 {
    DEFAULT_JOIN_PRUNE_PERIOD.as_secs()
}

fn default_hello_tick_ms() -> u64 {
    DEFAULT_HELLO_TICK_MS
}

fn default_timeout_tick_ms() -> u64 {
    DEFAULT_TIMEOUT_TICK_MS
}

fn default_join_tick_ms() -> u64 {
    DEFAULT_JOIN_TICK_MS
}

/// Startup/running configuration (JSON5 file format)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PimConfig {
    /// Per-interface PIM settings
    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,

    /// Upstream Join refresh period in seconds
    #[serde(default = "default_join_period_secs")]
    pub join_period_secs: u64,

    /// Hello sweep interval in milliseconds
    #[serde(default = "default_hello_tick_ms")]
    pub hello_tick_ms: u64,

    /// Neighbor timeout sweep interval in milliseconds
    #[serde(default = "default_timeout_tick_ms")]
    pub timeout_tick_ms: u64,

    /// Join refresh sweep interval in milliseconds
    #[serde(default = "default_join_tick_ms")]
    pub join_tick_ms: u64,
}

impl Default for PimConfig {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            join_period_secs: default_join_period_secs(),
            hello_tick_ms: DEFAULT_HELLO_TICK_MS,
            timeout_tick_ms: DEFAULT_TIMEOUT_TICK_MS,
            join_tick_ms: DEFAULT_JOIN_TICK_MS,
        }
    }
}

/// PIM settings for one interface
///
/// Unset fields fall back to the protocol defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterfaceConfig {
    /// Network interface name
    pub interface: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Hello interval in seconds (default 30)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hello_interval: Option<u64>,

    /// Advertised holdtime in seconds (default 105)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_time: Option<u16>,

    /// DR priority (default 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,

    /// LAN propagation delay in milliseconds (default 500)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub propagation_delay: Option<u64>,

    /// Override interval in milliseconds (default 2500)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_interval: Option<u64>,
}

impl InterfaceConfig {
    /// Enabled interface with every parameter at its default
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            enabled: true,
            hello_interval: None,
            hold_time: None,
            priority: None,
            propagation_delay: None,
            override_interval: None,
        }
    }

    /// Resolve into engine parameters
    pub fn params(&self, join_period: Duration) -> EngineParams {
        EngineParams {
            hello_interval: self
                .hello_interval
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_HELLO_PERIOD),
            holdtime: self
                .hold_time
                .unwrap_or(DEFAULT_HELLO_HOLDTIME.as_secs() as u16),
            priority: self.priority.unwrap_or(DEFAULT_DR_PRIORITY),
            propagation_delay: self
                .propagation_delay
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_PROPAGATION_DELAY),
            override_interval: self
                .override_interval
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_OVERRIDE_INTERVAL),
            join_period,
        }
    }
}

impl PimConfig {
    /// Load configuration from a JSON5 file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))?;
        Self::parse(&content)
    }

    /// Load and validate, with the file path attached to any error
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = Self::load_from_file(path)?;
        config
            .validate()
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Serialize configuration to JSON5 string (with pretty formatting)
    pub fn to_json5(&self) -> String {
        // json5 has no pretty printer; plain JSON is valid JSON5
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Save configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_json5();
        std::fs::write(path, content)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for (idx, iface) in self.interfaces.iter().enumerate() {
            validate_interface_name(&iface.interface)?;

            if let Some(prev_idx) = seen.insert(iface.interface.as_str(), idx) {
                return Err(ConfigError::DuplicateInterface {
                    name: iface.interface.clone(),
                    indices: (prev_idx, idx),
                });
            }

            for (field, value) in [
                ("hello_interval", iface.hello_interval),
                ("hold_time", iface.hold_time.map(u64::from)),
            ] {
                if value == Some(0) {
                    return Err(ConfigError::InvalidTimer {
                        context: format!("interface {} {}", iface.interface, field),
                        reason: "must be greater than zero".to_string(),
                    });
                }
            }

            // hold_time is bounded by the 16-bit Hello option, so this also
            // caps hello_interval
            let hold = iface
                .hold_time
                .unwrap_or(DEFAULT_HELLO_HOLDTIME.as_secs() as u16);
            if let Some(hello) = iface.hello_interval {
                if u64::from(hold) < hello {
                    return Err(ConfigError::InvalidTimer {
                        context: format!("interface {} hold_time", iface.interface),
                        reason: format!(
                            "hold_time {}s is shorter than hello_interval {}s",
                            hold, hello
                        ),
                    });
                }
            }
        }

        for (name, value) in [
            ("join_period_secs", self.join_period_secs),
            ("hello_tick_ms", self.hello_tick_ms),
            ("timeout_tick_ms", self.timeout_tick_ms),
            ("join_tick_ms", self.join_tick_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidTimer {
                    context: name.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        // The Join/Prune holdtime (3.5 periods) must fit the 16-bit wire field
        if u128::from(self.join_period_secs) * 7 / 2 > u128::from(u16::MAX) {
            return Err(ConfigError::InvalidTimer {
                context: "join_period_secs".to_string(),
                reason: format!(
                    "{}s gives a Join/Prune holdtime above {}s",
                    self.join_period_secs,
                    u16::MAX
                ),
            });
        }

        for (name, value) in [
            ("hello_tick_ms", self.hello_tick_ms),
            ("timeout_tick_ms", self.timeout_tick_ms),
            ("join_tick_ms", self.join_tick_ms),
        ] {
            if value > MAX_TICK_MS {
                return Err(ConfigError::InvalidTimer {
                    context: name.to_string(),
                    reason: format!("must not exceed {}ms", MAX_TICK_MS),
                });
            }
        }

        Ok(())
    }

    /// Interfaces with PIM enabled
    pub fn enabled_interfaces(&self) -> impl Iterator<Item = &InterfaceConfig> {
        self.interfaces.iter().filter(|i| i.enabled)
    }

    pub fn interface(&self, name: &str) -> Option<&InterfaceConfig> {
        self.interfaces.iter().find(|i| i.interface == name)
    }

    pub fn join_period(&self) -> Duration {
        Duration::from_secs(self.join_period_secs)
    }

    pub fn hello_tick(&self) -> Duration {
        Duration::from_millis(self.hello_tick_ms)
    }

    pub fn timeout_tick(&self) -> Duration {
        Duration::from_millis(self.timeout_tick_ms)
    }

    pub fn join_tick(&self) -> Duration {
        Duration::from_millis(self.join_tick_ms)
    }
}

/// Validate an interface name
fn validate_interface_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::InvalidInterfaceName {
            name: name.to_string(),
            reason: "interface name cannot be empty".to_string(),
        });
    }
    if name.len() > 15 {
        // Linux IFNAMSIZ limit
        return Err(ConfigError::InvalidInterfaceName {
            name: name.to_string(),
            reason: "interface name too long (max 15 chars)".to_string(),
        });
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ConfigError::InvalidInterfaceName {
            name: name.to_string(),
            reason: "interface name contains invalid characters".to_string(),
        });
    }
    if name.chars().next().map(|c| c.is_ascii_digit()) == Some(true) {
        return Err(ConfigError::InvalidInterfaceName {
            name: name.to_string(),
            reason: "interface name cannot start with a digit".to_string(),
        });
    }
    Ok(())
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {1}", path = .0.display())]
    IoError(PathBuf, String),

    #[error("failed to parse config: {0}")]
    ParseError(String),

    #[error("duplicate interface '{name}' (entries {first} and {second})", first = .indices.0, second = .indices.1)]
    DuplicateInterface {
        name: String,
        indices: (usize, usize),
    },

    #[error("invalid interface name '{name}': {reason}")]
    InvalidInterfaceName { name: String, reason: String },

    #[error("invalid timer {context}: {reason}")]
    InvalidTimer { context: String, reason: String },
}
