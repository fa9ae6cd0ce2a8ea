//! Trace export functionality
//!
//! Exports completed interaction traces to the Chrome Trace Event Format for
//! visualization in Perfetto or chrome://tracing.

pub mod chrome_trace;

pub use chrome_trace::{ChromeTrace, ChromeTraceEvent, ChromeTraceExporter};
