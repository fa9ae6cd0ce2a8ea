//! Test-only access to controller internals
//!
//! Health-check tests need to age the active trace without sleeping for the
//! configured timeouts. This trait is the one sanctioned way to reach into
//! the active trace; nothing in the tracing path depends on it.

use super::controller::TraceController;
use super::trace::InteractionTrace;
use crate::domain::TraceError;

pub trait TraceInternals {
    /// Run `f` with mutable access to the active trace
    ///
    /// # Errors
    /// `TracingInactive` when no trace is active.
    fn with_active_trace_mut<R>(
        &self,
        f: impl FnOnce(&mut InteractionTrace) -> R,
    ) -> Result<R, TraceError>;

    /// Entries on all per-thread stacks that still expect an `exit()`
    fn open_entry_count(&self) -> usize;
}

impl TraceInternals for TraceController {
    fn with_active_trace_mut<R>(
        &self,
        f: impl FnOnce(&mut InteractionTrace) -> R,
    ) -> Result<R, TraceError> {
        self.with_session_trace_mut(f)
    }

    fn open_entry_count(&self) -> usize {
        self.count_open_entries()
    }
}
