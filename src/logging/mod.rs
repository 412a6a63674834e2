// SPDX-License-Identifier: Apache-2.0 OR MIT
// Structured, facility-tagged logging for the PIM engine
//
// Every component holds a cloned `Logger` handle. Filtering happens in the
// handle (global level plus per-facility overrides); accepted entries are
// handed to a `LogSink`.

mod consumer;
mod entry;
mod facility;
mod logger;
#[macro_use]
mod macros;
mod severity;

// Public exports
pub use consumer::{JsonSink, LogSink, MemorySink, StderrSink};
pub use entry::{KeyValue, LogEntry};
pub use facility::Facility;
pub use logger::Logger;
pub use severity::Severity;
