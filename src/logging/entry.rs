// SPDX-License-Identifier: Apache-2.0 OR MIT
// Log entry structure

use super::{Facility, Severity};
use chrono::{DateTime, Utc};

/// Key-value pair for structured logging
#[derive(Clone, PartialEq, Eq)]
pub struct KeyValue {
    key: String,
    value: String,
}

impl KeyValue {
    /// Create new key-value pair
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    /// Get key as string slice
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get value as string slice
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Debug for KeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// A single log record as handed to a sink
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub severity: Severity,
    pub facility: Facility,
    pub timestamp: DateTime<Utc>,
    message: String,
    kvs: Vec<KeyValue>,
}

impl LogEntry {
    /// Create a new log entry stamped with the current wall-clock time
    pub fn new(severity: Severity, facility: Facility, message: &str) -> Self {
        Self {
            severity,
            facility,
            timestamp: Utc::now(),
            message: message.to_string(),
            kvs: Vec::new(),
        }
    }

    /// Attach a key-value pair
    pub fn add_kv(&mut self, key: &str, value: &str) {
        self.kvs.push(KeyValue::new(key, value));
    }

    /// Get the message text
    pub fn get_message(&self) -> &str {
        &self.message
    }

    /// Get attached key-value pairs
    pub fn get_kvs(&self) -> &[KeyValue] {
        &self.kvs
    }
}
