// SPDX-License-Identifier: Apache-2.0 OR MIT
// Output sinks for log entries

use super::entry::LogEntry;
use super::Severity;
use std::io::Write;
use std::sync::{Mutex, PoisonError};

/// Output sink for log entries
///
/// Sinks are shared between all clones of a `Logger`, so writes take `&self`.
pub trait LogSink: Send + Sync {
    /// Write a log entry to the sink
    fn write_entry(&self, entry: &LogEntry);

    /// Flush any buffered output
    fn flush(&self) {}
}

fn format_text(entry: &LogEntry) -> String {
    // Format: [SEVERITY] [Facility] message key1=value1 key2=value2
    let kvs = entry.get_kvs();
    if kvs.is_empty() {
        format!(
            "[{}] [{}] {}",
            entry.severity,
            entry.facility.as_str(),
            entry.get_message()
        )
    } else {
        let kv_str: Vec<String> = kvs.iter().map(|kv| format!("{:?}", kv)).collect();
        format!(
            "[{}] [{}] {} {}",
            entry.severity,
            entry.facility.as_str(),
            entry.get_message(),
            kv_str.join(" ")
        )
    }
}

/// Standard error sink (plain text lines)
#[derive(Debug, Default)]
pub struct StderrSink;

impl StderrSink {
    pub fn new() -> Self {
        Self
    }
}

impl LogSink for StderrSink {
    fn write_entry(&self, entry: &LogEntry) {
        let _ = writeln!(std::io::stderr().lock(), "{}", format_text(entry));
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// JSON lines on stderr, one object per entry
#[derive(Debug, Default)]
pub struct JsonSink;

impl JsonSink {
    pub fn new() -> Self {
        Self
    }

    fn render(entry: &LogEntry) -> serde_json::Value {
        let mut obj = serde_json::json!({
            "timestamp": entry.timestamp.to_rfc3339(),
            "level": entry.severity.as_str(),
            "facility": entry.facility.as_str(),
            "message": entry.get_message(),
        });
        if let Some(map) = obj.as_object_mut() {
            for kv in entry.get_kvs() {
                map.insert(
                    kv.key().to_string(),
                    serde_json::Value::String(kv.value().to_string()),
                );
            }
        }
        obj
    }
}

impl LogSink for JsonSink {
    fn write_entry(&self, entry: &LogEntry) {
        eprintln!("{}", Self::render(entry));
    }
}

/// In-memory sink, used by tests to assert on emitted log lines
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// True if some entry at `severity` contains `needle` in its message
    pub fn contains(&self, severity: Severity, needle: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|e| e.severity == severity && e.get_message().contains(needle))
    }

    /// Drop all captured entries
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl LogSink for MemorySink {
    fn write_entry(&self, entry: &LogEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::Facility;

    #[test]
    fn test_format_text_with_kvs() {
        let mut entry = LogEntry::new(Severity::Notice, Facility::Neighbor, "neighbor up");
        entry.add_kv("peer", "10.0.0.2");
        assert_eq!(
            format_text(&entry),
            "[NOTICE] [Neighbor] neighbor up peer=10.0.0.2"
        );
    }

    #[test]
    fn test_json_render() {
        let mut entry = LogEntry::new(Severity::Warning, Facility::Codec, "bad checksum");
        entry.add_kv("iface", "eth1");
        let value = JsonSink::render(&entry);
        assert_eq!(value["level"], "WARNING");
        assert_eq!(value["facility"], "Codec");
        assert_eq!(value["message"], "bad checksum");
        assert_eq!(value["iface"], "eth1");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_memory_sink_capture() {
        let sink = MemorySink::new();
        sink.write_entry(&LogEntry::new(
            Severity::Info,
            Facility::Manager,
            "engine created on eth0",
        ));
        assert!(sink.contains(Severity::Info, "engine created"));
        assert!(!sink.contains(Severity::Warning, "engine created"));
        sink.clear();
        assert!(sink.entries().is_empty());
    }
}
