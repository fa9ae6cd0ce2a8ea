use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use calltrace_common::CompletionReason;

use crate::domain::{ExportError, Timestamp};
use crate::engine::{InteractionTrace, LifecycleListener};

/// Chrome Trace Event format
/// Spec: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU/preview
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChromeTraceEvent {
    /// Event name (span display name)
    pub name: String,
    /// Category for filtering/coloring ("method" or "network")
    pub cat: String,
    /// Phase: "X" = complete, "M" = metadata
    pub ph: String,
    /// Timestamp in microseconds, relative to the first exported trace
    pub ts: f64,
    /// Duration in microseconds (complete events only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dur: Option<f64>,
    /// One "process" per interaction trace
    pub pid: u32,
    /// Thread the span ran on
    pub tid: u64,
    /// Optional arguments (metadata)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<HashMap<String, JsonValue>>,
}

/// Chrome Trace Format container
#[derive(Debug, Serialize, Deserialize)]
pub struct ChromeTrace {
    #[serde(rename = "traceEvents")]
    pub trace_events: Vec<ChromeTraceEvent>,
    #[serde(rename = "displayTimeUnit")]
    pub display_time_unit: String,
}

#[derive(Debug, Default)]
struct ExporterState {
    events: Vec<ChromeTraceEvent>,
    /// Thread names seen per (pid, tid)
    threads: BTreeMap<(u32, u64), String>,
    traces: u32,
    origin: Option<Timestamp>,
}

/// Chrome trace exporter for timeline visualization
///
/// Collects completed interaction traces, either fed directly with
/// [`ChromeTraceExporter::add_trace`] or by registering the exporter as a
/// lifecycle listener, and writes them as a single JSON document loadable in
/// Perfetto or `chrome://tracing`.
///
/// Every event stays in memory until the exporter is dropped, so it suits
/// bounded runs such as a replay. Do not attach it to a long-lived controller.
#[derive(Debug, Default)]
pub struct ChromeTraceExporter {
    state: Mutex<ExporterState>,
}

impl ChromeTraceExporter {
    /// Create a new Chrome trace exporter
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add every completed span of `trace` as a complete ("X") event
    pub fn add_trace(&self, trace: &InteractionTrace, reason: Option<CompletionReason>) {
        let mut state = self.state.lock();
        state.traces += 1;
        let pid = state.traces;
        let origin = *state.origin.get_or_insert(trace.started_at());

        let mut process_args = HashMap::new();
        process_args.insert("name".to_string(), serde_json::json!(trace.name()));
        state.events.push(metadata_event("process_name", pid, 0, process_args));

        for span in trace.spans() {
            let Some(total) = span.total_duration() else {
                continue;
            };

            // Span params first so reserved keys below win on collision
            let mut args: HashMap<String, JsonValue> = span.params().clone();
            args.insert("span_id".to_string(), serde_json::json!(span.id().to_string()));
            args.insert("scope".to_string(), serde_json::json!(span.scope()));
            args.insert(
                "exclusive_ms".to_string(),
                serde_json::json!(span.exclusive_time().as_millis()),
            );
            if span.exclusive_time_clamped() {
                args.insert("exclusive_clamped".to_string(), serde_json::json!(true));
            }
            if span.is_root() {
                args.insert("trace_id".to_string(), serde_json::json!(trace.id().to_string()));
                if let Some(reason) = reason {
                    args.insert("completion".to_string(), serde_json::json!(reason.as_str()));
                }
                if trace.dropped_spans() > 0 {
                    args.insert("dropped_spans".to_string(), serde_json::json!(trace.dropped_spans()));
                }
            }

            let tid = span.thread_id().0;
            state.threads.entry((pid, tid)).or_insert_with(|| span.thread_name().to_string());
            state.events.push(ChromeTraceEvent {
                name: span.display_name().to_string(),
                cat: span.kind().as_str().to_string(),
                ph: "X".to_string(), // Complete
                ts: relative_micros(span.entry_time(), origin),
                dur: Some(micros(total.0)),
                pid,
                tid,
                args: Some(args),
            });
        }
    }

    /// Export the collected traces to any writer (file, stdout, buffer, etc.)
    ///
    /// # Errors
    /// Returns an error if serialization or the underlying writer fails
    pub fn export<W: Write>(&self, writer: W) -> Result<(), ExportError> {
        let state = self.state.lock();
        let mut all_events = state.events.clone();

        // Generate thread name metadata events
        for (&(pid, tid), name) in &state.threads {
            let mut args = HashMap::new();
            args.insert("name".to_string(), serde_json::json!(name));
            all_events.push(metadata_event("thread_name", pid, tid, args));
        }

        let trace = ChromeTrace { trace_events: all_events, display_time_unit: "ms".to_string() };
        serde_json::to_writer_pretty(writer, &trace)?;
        Ok(())
    }

    /// Export to `path`, creating or truncating the file
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written
    pub fn export_to_file(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.export(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Number of span events collected (metadata excluded)
    pub fn event_count(&self) -> usize {
        self.state.lock().events.iter().filter(|event| event.ph == "X").count()
    }

    pub fn trace_count(&self) -> u32 {
        self.state.lock().traces
    }
}

impl LifecycleListener for ChromeTraceExporter {
    fn on_trace_complete(&self, trace: &Arc<InteractionTrace>, reason: CompletionReason) {
        self.add_trace(trace, Some(reason));
    }
}

fn metadata_event(
    name: &str,
    pid: u32,
    tid: u64,
    args: HashMap<String, JsonValue>,
) -> ChromeTraceEvent {
    ChromeTraceEvent {
        name: name.to_string(),
        cat: String::new(),
        ph: "M".to_string(), // Metadata
        ts: 0.0,
        dur: None,
        pid,
        tid,
        args: Some(args),
    }
}

#[allow(clippy::cast_precision_loss)]
fn micros(nanos: u64) -> f64 {
    nanos as f64 / 1000.0
}

fn relative_micros(ts: Timestamp, origin: Timestamp) -> f64 {
    micros(ts.saturating_since(origin).0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ThreadId;
    use crate::engine::{activity_metric_scope, SpanIndex, ThreadInfo};
    use calltrace_common::SpanKind;

    fn sample_trace() -> InteractionTrace {
        let thread = ThreadInfo { id: ThreadId(42), name: "testThread".to_string() };
        let scope = activity_metric_scope("Display Main", true);
        let mut trace =
            InteractionTrace::with_root("Display Main", thread.clone(), true, Timestamp(1_000_000));
        let net = trace
            .add_span(SpanIndex::ROOT, "GET /items", SpanKind::Network, thread, scope, Timestamp(1_500_000), 2000)
            .unwrap();
        trace.close_span(net, Timestamp(3_500_000)).unwrap();
        trace.complete(Timestamp(4_000_000), CompletionReason::Finished);
        trace
    }

    #[test]
    fn test_add_trace_emits_complete_events() {
        let exporter = ChromeTraceExporter::new();
        exporter.add_trace(&sample_trace(), Some(CompletionReason::Finished));

        assert_eq!(exporter.event_count(), 2);
        assert_eq!(exporter.trace_count(), 1);

        let mut buffer = Vec::new();
        exporter.export(&mut buffer).unwrap();
        let parsed: ChromeTrace = serde_json::from_slice(&buffer).unwrap();

        let net = parsed.trace_events.iter().find(|e| e.name == "GET /items").unwrap();
        assert_eq!(net.cat, "network");
        assert_eq!(net.tid, 42);
        assert!((net.ts - 500.0).abs() < f64::EPSILON);
        assert_eq!(net.dur, Some(2000.0));
    }

    #[test]
    fn test_thread_name_metadata() {
        let exporter = ChromeTraceExporter::new();
        exporter.add_trace(&sample_trace(), None);

        let mut buffer = Vec::new();
        exporter.export(&mut buffer).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&buffer).unwrap();

        assert_eq!(json["displayTimeUnit"], "ms");
        let events = json["traceEvents"].as_array().unwrap();
        let thread_meta = events.iter().find(|e| e["name"] == "thread_name").unwrap();
        assert_eq!(thread_meta["args"]["name"], "testThread");
        let process_meta = events.iter().find(|e| e["name"] == "process_name").unwrap();
        assert_eq!(process_meta["args"]["name"], "Display Main");
    }
}
