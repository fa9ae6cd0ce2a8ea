//! Supportability counters
//!
//! Data-quality anomalies and forced completions are never surfaced as errors
//! to instrumented code. They are counted here instead, under the
//! `Supportability/AgentHealth/...` metric names, so a metrics collaborator
//! can report them:
//! - Negative exclusive time clamped to zero
//! - Owners handed to `unload_trace_context` without a trace field
//! - Mutations that arrived after their span or trace completed
//! - Enters dropped because a trace hit its span limit
//! - Healthy and unhealthy forced completions
//! - Lifecycle events dropped by a full listener channel

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use calltrace_common::{
    SUPPORTABILITY_EVENTS_DROPPED, SUPPORTABILITY_INVALID_CONTEXT_OWNER,
    SUPPORTABILITY_MUTATION_AFTER_COMPLETE, SUPPORTABILITY_NEGATIVE_EXCLUSIVE_TIME,
    SUPPORTABILITY_SPANS_DROPPED, SUPPORTABILITY_TRACES_HEALTHY, SUPPORTABILITY_TRACES_UNHEALTHY,
};

#[derive(Debug, Default)]
pub struct Supportability {
    pub negative_exclusive_time: AtomicU64,
    pub invalid_context_owner: AtomicU64,
    pub mutation_after_complete: AtomicU64,
    pub spans_dropped: AtomicU64,
    pub traces_healthy: AtomicU64,
    pub traces_unhealthy: AtomicU64,
    pub events_dropped: AtomicU64,
}

impl Supportability {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: usize) {
        if n > 0 {
            counter.fetch_add(u64::try_from(n).unwrap_or(u64::MAX), Ordering::Relaxed);
        }
    }

    /// Current value of every counter, keyed by metric name
    ///
    /// Zero counters are included so consumers see a stable key set.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        [
            (SUPPORTABILITY_NEGATIVE_EXCLUSIVE_TIME, &self.negative_exclusive_time),
            (SUPPORTABILITY_INVALID_CONTEXT_OWNER, &self.invalid_context_owner),
            (SUPPORTABILITY_MUTATION_AFTER_COMPLETE, &self.mutation_after_complete),
            (SUPPORTABILITY_SPANS_DROPPED, &self.spans_dropped),
            (SUPPORTABILITY_TRACES_HEALTHY, &self.traces_healthy),
            (SUPPORTABILITY_TRACES_UNHEALTHY, &self.traces_unhealthy),
            (SUPPORTABILITY_EVENTS_DROPPED, &self.events_dropped),
        ]
        .into_iter()
        .map(|(name, counter)| (name, counter.load(Ordering::Relaxed)))
        .collect()
    }

    /// Value of one counter by metric name, `None` for unknown names
    #[must_use]
    pub fn get(&self, metric: &str) -> Option<u64> {
        self.snapshot().get(metric).copied()
    }
}
