//! One timed node in an interaction trace
//!
//! A span is mutable only while it is open. `close()` freezes it and computes
//! its exclusive time; every later mutation is rejected with
//! [`TraceError::AlreadyComplete`].

use std::collections::HashMap;

use calltrace_common::SpanKind;
use log::warn;
use serde_json::Value;

use super::platform::ThreadInfo;
use crate::domain::{Duration, SpanId, ThreadId, Timestamp, TraceError};

/// Position of a span inside its trace's span arena
///
/// Only meaningful together with the [`InteractionTrace`](super::InteractionTrace)
/// that produced it. The root is always at index 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanIndex(pub(crate) usize);

impl SpanIndex {
    pub const ROOT: SpanIndex = SpanIndex(0);

    #[must_use]
    pub fn get(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct Span {
    id: SpanId,
    parent_id: Option<SpanId>,
    parent: Option<SpanIndex>,
    display_name: String,
    scope: String,
    kind: SpanKind,
    entry_time: Timestamp,
    exit_time: Option<Timestamp>,
    thread: ThreadInfo,
    children: Vec<SpanIndex>,
    child_exclusive_time: Duration,
    exclusive_time: Duration,
    exclusive_clamped: bool,
    params: HashMap<String, Value>,
}

impl Span {
    pub(crate) fn new(
        display_name: String,
        kind: SpanKind,
        parent: Option<(SpanIndex, SpanId)>,
        scope: String,
        thread: ThreadInfo,
        entry_time: Timestamp,
    ) -> Self {
        Self {
            id: SpanId::generate(),
            parent_id: parent.map(|(_, id)| id),
            parent: parent.map(|(idx, _)| idx),
            display_name,
            scope,
            kind,
            entry_time,
            exit_time: None,
            thread,
            children: Vec::new(),
            child_exclusive_time: Duration::ZERO,
            exclusive_time: Duration::ZERO,
            exclusive_clamped: false,
            params: HashMap::new(),
        }
    }

    /// Close the span at `exit_time` and return its total duration
    ///
    /// Exclusive time is `total - child_exclusive_time`. If that would be
    /// negative (children overlapping from other threads, or a clock anomaly)
    /// it is clamped to zero and [`Span::exclusive_time_clamped`] reports it.
    ///
    /// # Errors
    /// `AlreadyComplete` if the span was closed before; the span is unchanged.
    pub fn close(&mut self, exit_time: Timestamp) -> Result<Duration, TraceError> {
        if self.is_complete() {
            warn!("Attempted to double complete span {}", self.id);
            return Err(TraceError::AlreadyComplete(format!("span {}", self.id)));
        }

        let total = exit_time.saturating_since(self.entry_time);
        let exclusive = total.checked_sub(self.child_exclusive_time);
        if exclusive.is_none() || exit_time < self.entry_time {
            warn!(
                "Negative exclusive time for span {} ({}): total={} children={}",
                self.display_name, self.id, total, self.child_exclusive_time
            );
            self.exclusive_clamped = true;
        }

        self.exclusive_time = exclusive.unwrap_or(Duration::ZERO);
        self.exit_time = Some(exit_time);
        Ok(total)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.exit_time.is_some()
    }

    pub(crate) fn add_child(&mut self, child: SpanIndex) {
        self.children.push(child);
    }

    /// Add a completed child's total duration to this span's accumulator
    pub(crate) fn add_child_time(&mut self, duration: Duration) -> Result<(), TraceError> {
        if self.is_complete() {
            return Err(TraceError::AlreadyComplete(format!("span {}", self.id)));
        }
        self.child_exclusive_time = self.child_exclusive_time.saturating_add(duration);
        Ok(())
    }

    pub(crate) fn set_display_name(&mut self, name: String) -> Result<(), TraceError> {
        if self.is_complete() {
            return Err(TraceError::AlreadyComplete(format!("span {}", self.id)));
        }
        self.display_name = name;
        Ok(())
    }

    pub(crate) fn set_scope(&mut self, scope: String) {
        self.scope = scope;
    }

    /// Attach a parameter to an open span
    ///
    /// # Errors
    /// `AlreadyComplete` once the span has exited.
    pub fn set_param(&mut self, key: impl Into<String>, value: Value) -> Result<(), TraceError> {
        if self.is_complete() {
            return Err(TraceError::AlreadyComplete(format!("span {}", self.id)));
        }
        self.params.insert(key.into(), value);
        Ok(())
    }

    pub fn id(&self) -> SpanId {
        self.id
    }

    pub fn parent_id(&self) -> Option<SpanId> {
        self.parent_id
    }

    pub fn parent(&self) -> Option<SpanIndex> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Metric scope derived at entry from the trace name and platform state
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn kind(&self) -> SpanKind {
        self.kind
    }

    pub fn entry_time(&self) -> Timestamp {
        self.entry_time
    }

    pub fn exit_time(&self) -> Option<Timestamp> {
        self.exit_time
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread.id
    }

    pub fn thread_name(&self) -> &str {
        &self.thread.name
    }

    /// Children in call order
    pub fn children(&self) -> &[SpanIndex] {
        &self.children
    }

    pub fn child_exclusive_time(&self) -> Duration {
        self.child_exclusive_time
    }

    /// Zero until the span completes
    pub fn exclusive_time(&self) -> Duration {
        self.exclusive_time
    }

    pub fn exclusive_time_clamped(&self) -> bool {
        self.exclusive_clamped
    }

    /// `exit_time - entry_time`, `None` while open
    pub fn total_duration(&self) -> Option<Duration> {
        self.exit_time.map(|exit| exit.saturating_since(self.entry_time))
    }

    pub fn params(&self) -> &HashMap<String, Value> {
        &self.params
    }
}
