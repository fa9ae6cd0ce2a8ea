//! Cross-thread trace context hand-off
//!
//! Work that hops threads (a task submitted to a pool, a callback run later)
//! carries a [`TraceField`]. The submitting thread loads it with
//! [`TraceController::current_context`](super::TraceController::current_context);
//! the worker passes it to
//! [`TraceController::enter_with_context`](super::TraceController::enter_with_context)
//! so its spans nest under the submitter's span, and calls
//! [`TraceController::unload_trace_context`](super::TraceController::unload_trace_context)
//! when done.

use crate::domain::{SpanId, TraceId};

/// Address of one span in one trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
}

/// Slot for a [`SpanContext`], embedded in types that cross threads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceField {
    context: Option<SpanContext>,
}

impl TraceField {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, context: SpanContext) {
        self.context = Some(context);
    }

    pub fn get(&self) -> Option<&SpanContext> {
        self.context.as_ref()
    }

    pub fn take(&mut self) -> Option<SpanContext> {
        self.context.take()
    }

    pub fn is_loaded(&self) -> bool {
        self.context.is_some()
    }
}
