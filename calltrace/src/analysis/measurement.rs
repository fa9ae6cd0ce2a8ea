//! Metrics collaborator: turns completed traces into measurements
//!
//! Registered as a lifecycle listener, the aggregator records every span of
//! every completed trace under its metric scope, and counts completions by
//! reason so healthy and unhealthy timeouts can be reported separately.

use std::collections::BTreeMap;
use std::sync::Arc;

use calltrace_common::CompletionReason;
use log::debug;
use parking_lot::Mutex;

use super::hotspot_analyzer::{HotspotStats, MeasurementStats};
use crate::domain::{Duration, ThreadId};
use crate::engine::{InteractionTrace, LifecycleListener};

/// One span, flattened into a metric record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measurement {
    pub scope: String,
    pub name: String,
    pub thread_id: ThreadId,
    pub total_time: Duration,
    pub exclusive_time: Duration,
}

/// Measurement records for every completed span of `trace`, in call order
#[must_use]
pub fn measurements(trace: &InteractionTrace) -> Vec<Measurement> {
    trace
        .spans()
        .iter()
        .filter_map(|span| {
            Some(Measurement {
                scope: span.scope().to_string(),
                name: span.display_name().to_string(),
                thread_id: span.thread_id(),
                total_time: span.total_duration()?,
                exclusive_time: span.exclusive_time(),
            })
        })
        .collect()
}

#[derive(Debug, Default)]
struct AggregatorState {
    stats: HotspotStats,
    completions: BTreeMap<&'static str, u64>,
}

#[derive(Debug, Default)]
pub struct MeasurementAggregator {
    state: Mutex<AggregatorState>,
}

impl MeasurementAggregator {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn traces(&self) -> u64 {
        self.state.lock().stats.traces()
    }

    pub fn get(&self, scope: &str, name: &str) -> Option<MeasurementStats> {
        self.state.lock().stats.get(scope, name).copied()
    }

    /// Completed traces per [`CompletionReason::as_str`]
    pub fn completions(&self) -> BTreeMap<&'static str, u64> {
        self.state.lock().completions.clone()
    }

    /// `(scope, name, stats)` rows, largest exclusive time first
    pub fn ranked(&self) -> Vec<(String, String, MeasurementStats)> {
        self.state
            .lock()
            .stats
            .ranked()
            .into_iter()
            .map(|(scope, name, stats)| (scope.to_string(), name.to_string(), stats))
            .collect()
    }
}

impl LifecycleListener for MeasurementAggregator {
    fn on_trace_complete(&self, trace: &Arc<InteractionTrace>, reason: CompletionReason) {
        let mut state = self.state.lock();
        state.stats.record_trace(trace);
        *state.completions.entry(reason.as_str()).or_insert(0) += 1;
        debug!("Aggregated {} spans from {}", trace.span_count(), trace.name());
    }
}
