//! Interaction trace: the span tree of one user interaction
//!
//! Spans live in an arena owned by the trace and refer to each other by
//! [`SpanIndex`]. Index 0 is the root; a child is always pushed after its
//! parent, so walking the arena backwards visits children before parents.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use calltrace_common::{
    CompletionReason, SampleType, SpanKind, ACTIVITY_BACKGROUND_METRIC_PREFIX,
    ACTIVITY_DISPLAY_NAME_PREFIX, ACTIVITY_METRIC_PREFIX, TRACE_VERSION,
};
use log::{debug, warn};

use super::history::ActivitySighting;
use super::platform::{PlatformContext, ThreadInfo};
use super::span::{Span, SpanIndex};
use crate::domain::{Duration, SpanId, Timestamp, TraceError, TraceId};

// ============================================================================
// Naming
// ============================================================================

/// Display name for a non-custom interaction, e.g. `"Display LoginActivity"`
#[must_use]
pub fn activity_display_name(name: &str) -> String {
    format!("{ACTIVITY_DISPLAY_NAME_PREFIX}{name}")
}

/// Metric scope for spans of the interaction `name`
#[must_use]
pub fn activity_metric_scope(name: &str, background: bool) -> String {
    if background {
        format!("{ACTIVITY_BACKGROUND_METRIC_PREFIX}{name}")
    } else {
        format!("{ACTIVITY_METRIC_PREFIX}{name}")
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Lightweight description of a trace, handed to lifecycle listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceInfo {
    pub id: TraceId,
    pub name: String,
    pub started_at: Timestamp,
    pub metric_scope: String,
}

/// One vitals measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: Timestamp,
    pub value: f64,
}

/// Resource samples collected while the interaction ran
pub type Vitals = BTreeMap<SampleType, Vec<Sample>>;

/// Count and total time of the completed network spans in a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkSummary {
    pub count: usize,
    pub total_time: Duration,
}

// ============================================================================
// Interaction Trace
// ============================================================================

#[derive(Debug)]
pub struct InteractionTrace {
    id: TraceId,
    name: String,
    spans: Vec<Span>,
    started_at: Timestamp,
    last_updated_at: Timestamp,
    completion: Option<CompletionReason>,
    params: BTreeMap<String, String>,
    previous_activity: Option<ActivitySighting>,
    report_attempt_count: u32,
    dropped_spans: usize,
    late_child_charges: usize,
    /// Whether the trace started off the UI thread; fixes the scope prefix
    background: bool,
    vitals: OnceLock<Vitals>,
}

impl InteractionTrace {
    /// Create a trace whose root span was entered on the calling thread
    ///
    /// The metric scope follows `platform`: foreground when the caller is
    /// the UI thread, background otherwise.
    #[must_use]
    pub fn new(name: impl Into<String>, platform: &dyn PlatformContext) -> Self {
        Self::with_root(
            name,
            ThreadInfo::capture(Some(platform)),
            !platform.is_ui_thread(),
            Timestamp::now(),
        )
    }

    /// Create a trace with an explicit root thread, UI state and start time
    ///
    /// The root span's scope is derived from `name` and `background`, and
    /// follows the trace through renames.
    #[must_use]
    pub fn with_root(
        name: impl Into<String>,
        thread: ThreadInfo,
        background: bool,
        started_at: Timestamp,
    ) -> Self {
        let name = name.into();
        let scope = activity_metric_scope(&name, background);
        let root = Span::new(name.clone(), SpanKind::Method, None, scope, thread, started_at);
        let params = BTreeMap::from([
            ("traceVersion".to_string(), TRACE_VERSION.to_string()),
            ("type".to_string(), "ACTIVITY".to_string()),
        ]);

        Self {
            id: TraceId(root.id().0),
            name,
            spans: vec![root],
            started_at,
            last_updated_at: started_at,
            completion: None,
            params,
            previous_activity: None,
            report_attempt_count: 0,
            dropped_spans: 0,
            late_child_charges: 0,
            background,
            vitals: OnceLock::new(),
        }
    }

    /// Open a child span under `parent`
    ///
    /// # Errors
    /// - `AlreadyComplete` if the trace has completed
    /// - `TraceOversized` if the trace already holds `limit` spans
    #[allow(clippy::too_many_arguments)]
    pub fn add_span(
        &mut self,
        parent: SpanIndex,
        name: impl Into<String>,
        kind: SpanKind,
        thread: ThreadInfo,
        scope: String,
        entry_time: Timestamp,
        limit: usize,
    ) -> Result<SpanIndex, TraceError> {
        if self.is_complete() {
            return Err(TraceError::AlreadyComplete(format!("trace {}", self.id)));
        }
        if self.is_oversized(limit) {
            self.dropped_spans += 1;
            return Err(TraceError::TraceOversized { trace: self.id, limit });
        }

        let parent_id = self
            .spans
            .get(parent.0)
            .map(Span::id)
            .ok_or(TraceError::NoOpenSpan)?;
        let index = SpanIndex(self.spans.len());
        self.spans.push(Span::new(
            name.into(),
            kind,
            Some((parent, parent_id)),
            scope,
            thread,
            entry_time,
        ));
        self.spans[parent.0].add_child(index);
        Ok(index)
    }

    /// Close the span at `index` and charge its duration to its parent
    ///
    /// A parent that already closed (possible when it ran on another thread)
    /// keeps its exclusive time; the late charge is counted instead.
    ///
    /// # Errors
    /// `AlreadyComplete` if the span was already closed; `NoOpenSpan` if the
    /// index does not belong to this trace.
    pub fn close_span(
        &mut self,
        index: SpanIndex,
        exit_time: Timestamp,
    ) -> Result<Duration, TraceError> {
        let span = self.spans.get_mut(index.0).ok_or(TraceError::NoOpenSpan)?;
        let duration = span.close(exit_time)?;

        if let Some(parent) = span.parent() {
            if self.spans[parent.0].add_child_time(duration).is_err() {
                debug!("Parent of span {} closed before it; duration not charged", index.0);
                self.late_child_charges += 1;
            }
        }
        Ok(duration)
    }

    /// Finalize the trace, closing every span still open at `exit_time`
    ///
    /// Returns `false` (and changes nothing) if the trace was already
    /// complete.
    pub fn complete(&mut self, exit_time: Timestamp, reason: CompletionReason) -> bool {
        if self.is_complete() {
            warn!("Attempted to double complete trace {}", self.id);
            return false;
        }

        let mut forced = 0usize;
        for index in (1..self.spans.len()).rev() {
            if !self.spans[index].is_complete() {
                forced += 1;
                let _ = self.close_span(SpanIndex(index), exit_time);
            }
        }
        if forced > 0 {
            debug!("Closed {forced} open spans while completing trace {}", self.name);
        }

        let _ = self.close_span(SpanIndex::ROOT, exit_time);
        self.last_updated_at = self.last_updated_at.max(exit_time);
        self.completion = Some(reason);
        true
    }

    /// Bump `last_updated_at`; called on every enter and exit
    pub fn touch(&mut self, now: Timestamp) {
        self.last_updated_at = self.last_updated_at.max(now);
    }

    /// Rename the interaction; the root span takes the same name and scope
    ///
    /// # Errors
    /// `AlreadyComplete` if the trace has completed.
    pub fn rename(&mut self, name: impl Into<String>) -> Result<(), TraceError> {
        if self.is_complete() {
            return Err(TraceError::AlreadyComplete(format!("trace {}", self.id)));
        }
        let name = name.into();
        let scope = activity_metric_scope(&name, self.background);
        let root = &mut self.spans[SpanIndex::ROOT.0];
        root.set_display_name(name.clone())?;
        root.set_scope(scope);
        self.name = name;
        Ok(())
    }

    /// Mutable access to an open span, for attaching parameters
    pub(crate) fn span_mut(&mut self, index: SpanIndex) -> Option<&mut Span> {
        self.spans.get_mut(index.0)
    }

    // ========================================================================
    // Health predicates
    // ========================================================================

    #[must_use]
    pub fn is_oversized(&self, limit: usize) -> bool {
        self.spans.len() >= limit
    }

    /// No enter/exit activity for longer than `timeout`
    #[must_use]
    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.is_stale_at(timeout, Timestamp::now())
    }

    #[must_use]
    pub fn is_stale_at(&self, timeout: Duration, now: Timestamp) -> bool {
        now.saturating_since(self.last_updated_at) > timeout
    }

    /// Running for longer than `timeout` since the trace started
    #[must_use]
    pub fn is_overlong(&self, timeout: Duration) -> bool {
        self.is_overlong_at(timeout, Timestamp::now())
    }

    #[must_use]
    pub fn is_overlong_at(&self, timeout: Duration, now: Timestamp) -> bool {
        now.saturating_since(self.started_at) > timeout
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> TraceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Span {
        &self.spans[SpanIndex::ROOT.0]
    }

    pub fn span(&self, index: SpanIndex) -> Option<&Span> {
        self.spans.get(index.0)
    }

    /// All spans in creation order, root first
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Children of `span` in call order
    pub fn children<'a>(&'a self, span: &'a Span) -> impl Iterator<Item = &'a Span> + 'a {
        span.children().iter().filter_map(|&index| self.span(index))
    }

    pub fn find(&self, id: SpanId) -> Option<SpanIndex> {
        self.spans.iter().position(|span| span.id() == id).map(SpanIndex)
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    pub fn has_children(&self) -> bool {
        !self.root().children().is_empty()
    }

    pub fn has_open_spans(&self) -> bool {
        self.spans.iter().any(|span| !span.is_complete())
    }

    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    pub fn last_updated_at(&self) -> Timestamp {
        self.last_updated_at
    }

    /// Overwrite the start time; used by health tests to age a trace
    pub fn set_started_at(&mut self, started_at: Timestamp) {
        self.started_at = started_at;
    }

    /// Overwrite the last-activity time; used by health tests to idle a trace
    pub fn set_last_updated_at(&mut self, last_updated_at: Timestamp) {
        self.last_updated_at = last_updated_at;
    }

    pub fn is_complete(&self) -> bool {
        self.completion.is_some()
    }

    pub fn completion_reason(&self) -> Option<CompletionReason> {
        self.completion
    }

    /// Root span duration, `None` while the trace is running
    pub fn duration(&self) -> Option<Duration> {
        self.root().total_duration()
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn info(&self) -> TraceInfo {
        TraceInfo {
            id: self.id,
            name: self.name.clone(),
            started_at: self.started_at,
            metric_scope: self.metric_scope(),
        }
    }

    /// Scope of the interaction under its current name
    pub fn metric_scope(&self) -> String {
        activity_metric_scope(&self.name, self.background)
    }

    pub fn previous_activity(&self) -> Option<&ActivitySighting> {
        self.previous_activity.as_ref()
    }

    pub(crate) fn set_previous_activity(&mut self, sighting: Option<ActivitySighting>) {
        self.previous_activity = sighting;
    }

    pub fn report_attempt_count(&self) -> u32 {
        self.report_attempt_count
    }

    pub fn increment_report_attempt_count(&mut self) {
        self.report_attempt_count = self.report_attempt_count.saturating_add(1);
    }

    /// Enters dropped after the span limit was reached
    pub fn dropped_spans(&self) -> usize {
        self.dropped_spans
    }

    pub(crate) fn record_dropped_span(&mut self) {
        self.dropped_spans += 1;
    }

    /// Child durations that arrived after their parent had closed
    pub fn late_child_charges(&self) -> usize {
        self.late_child_charges
    }

    /// Spans whose exclusive time had to be clamped to zero
    pub fn clamped_span_count(&self) -> usize {
        self.spans.iter().filter(|span| span.exclusive_time_clamped()).count()
    }

    pub fn network_summary(&self) -> NetworkSummary {
        self.spans
            .iter()
            .filter(|span| span.kind() == SpanKind::Network)
            .filter_map(Span::total_duration)
            .fold(NetworkSummary::default(), |acc, duration| NetworkSummary {
                count: acc.count + 1,
                total_time: acc.total_time.saturating_add(duration),
            })
    }

    // ========================================================================
    // Vitals
    // ========================================================================

    /// Attach resource samples to a completed trace, once
    ///
    /// # Errors
    /// - `NotComplete` while the trace is still running
    /// - `VitalsAlreadySet` on a second attempt
    pub fn set_vitals(&self, vitals: Vitals) -> Result<(), TraceError> {
        if !self.is_complete() {
            return Err(TraceError::NotComplete(self.id));
        }
        self.vitals.set(vitals).map_err(|_| TraceError::VitalsAlreadySet(self.id))
    }

    pub fn vitals(&self) -> Option<&Vitals> {
        self.vitals.get()
    }

    /// Vitals samples taken while the trace was running
    pub fn vitals_within_trace(&self) -> Vitals {
        let end = self.last_updated_at;
        self.vitals()
            .map(|vitals| {
                vitals
                    .iter()
                    .map(|(kind, samples)| {
                        let kept = samples.iter().filter(|s| s.timestamp <= end).copied().collect();
                        (*kind, kept)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ThreadId;

    fn thread() -> ThreadInfo {
        ThreadInfo { id: ThreadId(1), name: "main".to_string() }
    }

    fn trace_at(start: u64) -> InteractionTrace {
        InteractionTrace::with_root("Display Login", thread(), false, Timestamp(start))
    }

    fn child(trace: &mut InteractionTrace, parent: SpanIndex, name: &str, at: u64) -> SpanIndex {
        trace
            .add_span(parent, name, SpanKind::Method, thread(), String::new(), Timestamp(at), 2000)
            .unwrap()
    }

    #[test]
    fn test_naming_helpers() {
        assert_eq!(activity_display_name("Login"), "Display Login");
        assert_eq!(activity_metric_scope("Login", false), "Mobile/Activity/Name/Login");
        assert_eq!(activity_metric_scope("Login", true), "Mobile/Activity/Background/Name/Login");
    }

    #[test]
    fn test_root_mirrors_trace() {
        let trace = trace_at(0);
        assert_eq!(trace.id().0, trace.root().id().0);
        assert_eq!(trace.name(), trace.root().display_name());
        assert_eq!(trace.params()["traceVersion"], "1.0");
        assert_eq!(trace.params()["type"], "ACTIVITY");
        assert!(!trace.has_children());
    }

    #[test]
    fn test_exclusive_time_conservation() {
        let mut trace = trace_at(0);
        let a = child(&mut trace, SpanIndex::ROOT, "a", 100);
        let b = child(&mut trace, a, "b", 200);
        trace.close_span(b, Timestamp(500)).unwrap();
        trace.close_span(a, Timestamp(900)).unwrap();
        assert!(trace.complete(Timestamp(1_000), CompletionReason::Finished));

        for span in trace.spans() {
            let children: Duration =
                trace.children(span).filter_map(Span::total_duration).sum();
            assert_eq!(
                span.exclusive_time().saturating_add(children),
                span.total_duration().unwrap(),
                "span {}",
                span.display_name()
            );
        }
        assert_eq!(trace.span(a).unwrap().exclusive_time(), Duration(500));
        assert_eq!(trace.root().exclusive_time(), Duration(200));
    }

    #[test]
    fn test_complete_closes_open_spans() {
        let mut trace = trace_at(0);
        let a = child(&mut trace, SpanIndex::ROOT, "a", 10);
        let b = child(&mut trace, a, "b", 20);

        assert!(trace.complete(Timestamp(100), CompletionReason::HealthyTimeout));

        assert!(!trace.has_open_spans());
        assert_eq!(trace.span(b).unwrap().exit_time(), Some(Timestamp(100)));
        assert_eq!(trace.span(a).unwrap().exclusive_time(), Duration(10));
        assert_eq!(trace.completion_reason(), Some(CompletionReason::HealthyTimeout));
    }

    #[test]
    fn test_double_complete_is_noop() {
        let mut trace = trace_at(0);
        assert!(trace.complete(Timestamp(10), CompletionReason::Finished));
        assert!(!trace.complete(Timestamp(99), CompletionReason::UnhealthyTimeout));
        assert_eq!(trace.duration(), Some(Duration(10)));
        assert_eq!(trace.completion_reason(), Some(CompletionReason::Finished));
    }

    #[test]
    fn test_completed_trace_rejects_mutation() {
        let mut trace = trace_at(0);
        trace.complete(Timestamp(10), CompletionReason::Finished);

        let err = trace
            .add_span(SpanIndex::ROOT, "late", SpanKind::Method, thread(), String::new(), Timestamp(20), 2000)
            .unwrap_err();
        assert!(matches!(err, TraceError::AlreadyComplete(_)));
        assert!(trace.rename("other").is_err());
        assert_eq!(trace.span_count(), 1);
    }

    #[test]
    fn test_span_limit() {
        let mut trace = trace_at(0);
        trace
            .add_span(SpanIndex::ROOT, "a", SpanKind::Method, thread(), String::new(), Timestamp(1), 2)
            .unwrap();
        let err = trace
            .add_span(SpanIndex::ROOT, "b", SpanKind::Method, thread(), String::new(), Timestamp(2), 2)
            .unwrap_err();

        assert!(matches!(err, TraceError::TraceOversized { limit: 2, .. }));
        assert!(trace.is_oversized(2));
        assert_eq!(trace.dropped_spans(), 1);
    }

    #[test]
    fn test_late_child_charge_is_counted() {
        let mut trace = trace_at(0);
        let a = child(&mut trace, SpanIndex::ROOT, "a", 10);
        let b = child(&mut trace, a, "b", 20);
        trace.close_span(a, Timestamp(30)).unwrap();
        trace.close_span(b, Timestamp(50)).unwrap();

        assert_eq!(trace.late_child_charges(), 1);
        assert_eq!(trace.span(a).unwrap().exclusive_time(), Duration(20));
    }

    #[test]
    fn test_health_predicates() {
        let start = Timestamp(1_000_000_000);
        let mut trace = trace_at(start.0);
        let now = start.saturating_add(Duration::from_millis(600));

        assert!(trace.is_stale_at(Duration::from_millis(500), now));
        assert!(!trace.is_overlong_at(Duration::from_millis(60_000), now));

        trace.touch(now);
        assert!(!trace.is_stale_at(Duration::from_millis(500), now));
    }

    #[test]
    fn test_rename_updates_root() {
        let mut trace = trace_at(0);
        trace.rename("Display Checkout").unwrap();
        assert_eq!(trace.name(), "Display Checkout");
        assert_eq!(trace.root().display_name(), "Display Checkout");
        assert_eq!(trace.root().scope(), "Mobile/Activity/Name/Display Checkout");
        assert_eq!(trace.info().metric_scope, "Mobile/Activity/Name/Display Checkout");
    }

    #[test]
    fn test_background_scope_survives_rename() {
        let mut trace = InteractionTrace::with_root("Display Sync", thread(), true, Timestamp(0));
        trace.rename("Display SyncAll").unwrap();
        assert_eq!(trace.metric_scope(), "Mobile/Activity/Background/Name/Display SyncAll");
        assert_eq!(trace.root().scope(), trace.metric_scope());
    }

    #[test]
    fn test_network_summary_counts_completed_network_spans() {
        let mut trace = trace_at(0);
        let net = trace
            .add_span(SpanIndex::ROOT, "GET /", SpanKind::Network, thread(), String::new(), Timestamp(10), 2000)
            .unwrap();
        trace.close_span(net, Timestamp(40)).unwrap();
        trace
            .add_span(SpanIndex::ROOT, "POST /", SpanKind::Network, thread(), String::new(), Timestamp(50), 2000)
            .unwrap();

        let summary = trace.network_summary();
        assert_eq!(summary.count, 1);
        assert_eq!(summary.total_time, Duration(30));
    }

    #[test]
    fn test_vitals_only_after_completion_and_once() {
        let mut trace = trace_at(0);
        let samples = Vitals::from([(
            SampleType::Memory,
            vec![
                Sample { timestamp: Timestamp(5), value: 12.5 },
                Sample { timestamp: Timestamp(500), value: 13.0 },
            ],
        )]);

        assert!(matches!(trace.set_vitals(samples.clone()), Err(TraceError::NotComplete(_))));

        trace.complete(Timestamp(100), CompletionReason::Finished);
        trace.set_vitals(samples.clone()).unwrap();
        assert!(matches!(trace.set_vitals(samples), Err(TraceError::VitalsAlreadySet(_))));

        let within = trace.vitals_within_trace();
        assert_eq!(within[&SampleType::Memory].len(), 1);
    }
}
