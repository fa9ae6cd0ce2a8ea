//! Hotspot analysis for completed interaction traces.
//!
//! Aggregates a trace's spans by display name to find the methods that took
//! the most *exclusive* time, i.e. time not explained by their children.
//!
//! # Architecture
//!
//! - **`analyze_hotspots()`** - Batch analysis of one completed trace
//! - **`HotspotStats`** - Incremental aggregation across many traces
//!
//! ## Data Flow
//!
//! ```text
//! on_trace_complete(trace)
//!     │
//!     ├──► analyze_hotspots(trace)      ← one-off report (CLI)
//!     │
//!     └──► HotspotStats.record_trace()  ← running totals (MeasurementAggregator)
//! ```

// Percentage calculations intentionally convert u64 to f64
#![allow(clippy::cast_precision_loss)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use calltrace_common::SpanKind;

use crate::domain::{Duration, ThreadId};
use crate::engine::{InteractionTrace, Span};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Maximum distinct call paths kept per hotspot.
const MAX_CALL_PATHS_PER_HOTSPOT: usize = 5;

// =============================================================================
// METHOD HOTSPOT (OUTPUT TYPE)
// =============================================================================

/// A method with its aggregated timing.
///
/// ```text
/// HOTSPOTS  Display Checkout (412.00ms)
/// ─────────────────────────────────────────
///   loadCart          180.20ms  43.7%  x3
///   GET /cart         121.00ms  29.4%  x1
/// ```
#[derive(Debug, Clone)]
pub struct MethodHotspot {
    /// Span display name
    pub name: String,

    pub kind: SpanKind,

    /// Number of spans with this name
    pub calls: usize,

    /// Sum of the spans' exclusive times
    pub exclusive_time: Duration,

    /// Sum of the spans' total durations
    pub total_time: Duration,

    /// `exclusive_time` as a share of the trace's total duration (0.0 - 100.0)
    pub percentage: f64,

    /// Calls per thread
    pub threads: HashMap<ThreadId, usize>,

    /// Distinct ancestor chains (root first) leading to this method
    pub call_paths: Vec<Arc<Vec<String>>>,
}

/// Rank the non-root spans of a completed trace by exclusive time
///
/// Open spans (possible only while the trace is running) are skipped.
#[must_use]
pub fn analyze_hotspots(trace: &InteractionTrace) -> Vec<MethodHotspot> {
    let denominator = trace.duration().unwrap_or_default();
    let mut by_name: HashMap<&str, MethodHotspot> = HashMap::new();
    let mut seen_paths: HashMap<&str, HashSet<Vec<String>>> = HashMap::new();

    for span in trace.spans().iter().filter(|span| !span.is_root()) {
        let Some(total) = span.total_duration() else {
            continue;
        };

        let entry = by_name.entry(span.display_name()).or_insert_with(|| MethodHotspot {
            name: span.display_name().to_string(),
            kind: span.kind(),
            calls: 0,
            exclusive_time: Duration::ZERO,
            total_time: Duration::ZERO,
            percentage: 0.0,
            threads: HashMap::new(),
            call_paths: Vec::new(),
        });
        entry.calls += 1;
        entry.exclusive_time = entry.exclusive_time.saturating_add(span.exclusive_time());
        entry.total_time = entry.total_time.saturating_add(total);
        *entry.threads.entry(span.thread_id()).or_insert(0) += 1;

        let path = call_path(trace, span);
        let seen = seen_paths.entry(span.display_name()).or_default();
        if entry.call_paths.len() < MAX_CALL_PATHS_PER_HOTSPOT && seen.insert(path.clone()) {
            entry.call_paths.push(Arc::new(path));
        }
    }

    let mut hotspots: Vec<MethodHotspot> = by_name
        .into_values()
        .map(|mut hotspot| {
            hotspot.percentage = share(hotspot.exclusive_time, denominator);
            hotspot
        })
        .collect();

    hotspots.sort_by(|a, b| b.exclusive_time.cmp(&a.exclusive_time).then(a.name.cmp(&b.name)));
    hotspots
}

/// Display names from the root down to `span`'s parent
fn call_path(trace: &InteractionTrace, span: &Span) -> Vec<String> {
    let mut path = Vec::new();
    let mut parent = span.parent();
    while let Some(span) = parent.and_then(|index| trace.span(index)) {
        path.push(span.display_name().to_string());
        parent = span.parent();
    }
    path.reverse();
    path
}

fn share(part: Duration, whole: Duration) -> f64 {
    if whole.0 == 0 {
        0.0
    } else {
        (part.0 as f64 / whole.0 as f64) * 100.0
    }
}

// =============================================================================
// HOTSPOT STATS (AGGREGATOR)
// =============================================================================

/// Running totals for one (metric scope, method) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementStats {
    pub count: u64,
    pub total_time: Duration,
    pub exclusive_time: Duration,
    pub min_time: Duration,
    pub max_time: Duration,
}

impl MeasurementStats {
    fn new(total: Duration, exclusive: Duration) -> Self {
        Self { count: 1, total_time: total, exclusive_time: exclusive, min_time: total, max_time: total }
    }

    fn record(&mut self, total: Duration, exclusive: Duration) {
        self.count += 1;
        self.total_time = self.total_time.saturating_add(total);
        self.exclusive_time = self.exclusive_time.saturating_add(exclusive);
        self.min_time = self.min_time.min(total);
        self.max_time = self.max_time.max(total);
    }
}

/// Incremental aggregation of completed traces
///
/// Keyed by `(metric scope, display name)`, so the same method measured in
/// different interactions (or in foreground vs. background) stays separate.
#[derive(Debug, Default)]
pub struct HotspotStats {
    methods: HashMap<(String, String), MeasurementStats>,
    traces: u64,
}

impl HotspotStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold every completed span of `trace` into the totals
    pub fn record_trace(&mut self, trace: &InteractionTrace) {
        self.traces += 1;
        for span in trace.spans() {
            let Some(total) = span.total_duration() else {
                continue;
            };
            let key = (span.scope().to_string(), span.display_name().to_string());
            self.methods
                .entry(key)
                .and_modify(|stats| stats.record(total, span.exclusive_time()))
                .or_insert_with(|| MeasurementStats::new(total, span.exclusive_time()));
        }
    }

    #[must_use]
    pub fn traces(&self) -> u64 {
        self.traces
    }

    #[must_use]
    pub fn get(&self, scope: &str, name: &str) -> Option<&MeasurementStats> {
        self.methods.get(&(scope.to_string(), name.to_string()))
    }

    /// All entries, largest exclusive time first
    #[must_use]
    pub fn ranked(&self) -> Vec<(&str, &str, MeasurementStats)> {
        let mut ranked: Vec<_> = self
            .methods
            .iter()
            .map(|((scope, name), stats)| (scope.as_str(), name.as_str(), *stats))
            .collect();
        ranked.sort_by(|a, b| b.2.exclusive_time.cmp(&a.2.exclusive_time).then(a.1.cmp(b.1)));
        ranked
    }
}
