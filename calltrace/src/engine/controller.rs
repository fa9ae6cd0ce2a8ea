//! Trace controller: the state machine behind every instrumented call
//!
//! ```text
//!             start_tracing               root exit, end_trace,
//!  Inactive ───────────────▶ Active ───── health tick, replacement ──▶ Inactive
//!     ▲                        │              (on_trace_complete)
//!     └───────── halt ─────────┘
//! ```
//!
//! At most one interaction trace is active. Every OS thread keeps its own
//! stack of open spans inside that trace; a thread without a stack nests its
//! first span under the root. All shared state sits behind one mutex, and
//! listeners are invoked only after it is released.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use calltrace_common::{CompletionReason, SpanKind};
use log::{debug, error, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use super::context::{SpanContext, TraceField};
use super::history::{ActivityHistory, ActivitySighting};
use super::listener::{LifecycleListener, ListenerSet};
use super::platform::{PlatformContext, StdPlatformContext, ThreadInfo};
use super::span::{Span, SpanIndex};
use super::trace::{activity_display_name, activity_metric_scope, InteractionTrace, TraceInfo};
use crate::config::TracerConfig;
use crate::diagnostics::Supportability;
use crate::domain::{SpanId, Timestamp, TraceError, TraceId};

type ThreadKey = std::thread::ThreadId;

fn thread_key() -> ThreadKey {
    std::thread::current().id()
}

// ============================================================================
// Session State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StackEntry {
    /// A span this thread entered and must exit
    Span(SpanIndex),
    /// A span handed over from another thread; parent only, never exited here
    Seed(SpanIndex),
    /// An enter refused by the span limit, kept so its exit stays balanced
    Dropped,
}

#[derive(Debug)]
struct ActiveSession {
    trace: InteractionTrace,
    stacks: HashMap<ThreadKey, Vec<StackEntry>>,
}

impl ActiveSession {
    fn new(trace: InteractionTrace, owner: ThreadKey) -> Self {
        let stacks = HashMap::from([(owner, vec![StackEntry::Span(SpanIndex::ROOT)])]);
        Self { trace, stacks }
    }

    /// Entry a new enter on `key` nests under
    fn current(&self, key: ThreadKey) -> StackEntry {
        self.stacks
            .get(&key)
            .and_then(|stack| stack.last().copied())
            .unwrap_or(StackEntry::Span(SpanIndex::ROOT))
    }

    fn current_span(&self, key: ThreadKey, limit: usize) -> Result<SpanIndex, TraceError> {
        match self.current(key) {
            StackEntry::Span(index) | StackEntry::Seed(index) => Ok(index),
            StackEntry::Dropped => Err(TraceError::TraceOversized { trace: self.trace.id(), limit }),
        }
    }

    fn push(&mut self, key: ThreadKey, entry: StackEntry) {
        self.stacks.entry(key).or_default().push(entry);
    }

    /// Pop the calling thread's top entry; seeds are never popped
    fn pop(&mut self, key: ThreadKey) -> Option<StackEntry> {
        let stack = self.stacks.get_mut(&key)?;
        if matches!(stack.last(), Some(StackEntry::Seed(_))) {
            return None;
        }
        let entry = stack.pop();
        if stack.is_empty() {
            self.stacks.remove(&key);
        }
        entry
    }

    /// Give a thread without lineage the handed-over span as its parent
    fn seed(&mut self, key: ThreadKey, context: SpanContext) -> Result<(), TraceError> {
        if self.stacks.contains_key(&key) {
            return Ok(());
        }
        let mismatch =
            TraceError::ContextMismatch { trace: self.trace.id(), span: context.span_id };
        if context.trace_id != self.trace.id() {
            return Err(mismatch);
        }
        let index = self.trace.find(context.span_id).ok_or(mismatch)?;
        self.push(key, StackEntry::Seed(index));
        Ok(())
    }

    fn open_span(
        &mut self,
        key: ThreadKey,
        name: &str,
        kind: SpanKind,
        thread: ThreadInfo,
        scope: String,
        limit: usize,
    ) -> Result<SpanId, TraceError> {
        let now = Timestamp::now();
        self.trace.touch(now);

        let parent = match self.current(key) {
            StackEntry::Span(index) | StackEntry::Seed(index) => index,
            StackEntry::Dropped => {
                self.trace.record_dropped_span();
                self.push(key, StackEntry::Dropped);
                return Err(TraceError::TraceOversized { trace: self.trace.id(), limit });
            }
        };

        match self.trace.add_span(parent, name, kind, thread, scope, now, limit) {
            Ok(index) => {
                self.push(key, StackEntry::Span(index));
                self.trace.span(index).map(Span::id).ok_or(TraceError::NoOpenSpan)
            }
            Err(err @ TraceError::TraceOversized { .. }) => {
                self.push(key, StackEntry::Dropped);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    fn open_entries(&self) -> usize {
        self.stacks
            .values()
            .flatten()
            .filter(|entry| !matches!(entry, StackEntry::Seed(_)))
            .count()
    }
}

#[derive(Default)]
struct ControllerState {
    session: Option<ActiveSession>,
    listeners: ListenerSet,
    history: ActivityHistory,
}

/// A listener notification collected under the lock, delivered after it
enum Notice {
    Started(TraceInfo),
    Entered,
    Exited,
    Renamed(TraceInfo),
    Completed(Arc<InteractionTrace>, CompletionReason),
}

fn dispatch(listeners: &[Arc<dyn LifecycleListener>], notices: &[Notice]) {
    for notice in notices {
        for listener in listeners {
            match notice {
                Notice::Started(info) => listener.on_trace_start(info),
                Notice::Entered => listener.on_enter_method(),
                Notice::Exited => listener.on_exit_method(),
                Notice::Renamed(info) => listener.on_trace_rename(info),
                Notice::Completed(trace, reason) => listener.on_trace_complete(trace, *reason),
            }
        }
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Coordinates the single active interaction trace
///
/// Construct one per process (or per test) and share it behind an `Arc`.
/// Every method is callable from any thread.
pub struct TraceController {
    config: TracerConfig,
    enabled: AtomicBool,
    /// Mirrors `state.session.is_some()` for the lock-free inactive fast path
    active: AtomicBool,
    state: Mutex<ControllerState>,
    platform: RwLock<Option<Arc<dyn PlatformContext>>>,
    last_known_background: AtomicBool,
    stats: Arc<Supportability>,
}

impl Default for TraceController {
    fn default() -> Self {
        Self::new(TracerConfig::default())
    }
}

impl TraceController {
    /// Controller with the `std::thread` platform context
    #[must_use]
    pub fn new(config: TracerConfig) -> Self {
        Self::with_platform(config, Some(Arc::new(StdPlatformContext::new())))
    }

    /// Controller with an explicit platform context, or none at all
    ///
    /// Without a context every thread is reported as id 0 named "main", and
    /// the metric scope keeps whatever foreground/background state was last
    /// observed (foreground initially).
    #[must_use]
    pub fn with_platform(config: TracerConfig, platform: Option<Arc<dyn PlatformContext>>) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            config,
            active: AtomicBool::new(false),
            state: Mutex::new(ControllerState::default()),
            platform: RwLock::new(platform),
            last_known_background: AtomicBool::new(false),
            stats: Arc::new(Supportability::new()),
        }
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<Supportability> {
        &self.stats
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Turn interaction tracing on or off; disabling halts the active trace
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        if !enabled {
            self.halt();
        }
    }

    pub fn set_platform_context(&self, platform: Option<Arc<dyn PlatformContext>>) {
        *self.platform.write() = platform;
    }

    pub fn is_tracing_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    /// Register `listener`; the controller keeps only a weak reference
    pub fn add_listener<L: LifecycleListener + 'static>(&self, listener: &Arc<L>) {
        let weak: Weak<L> = Arc::downgrade(listener);
        let weak: Weak<dyn LifecycleListener> = weak;
        if !self.state.lock().listeners.add(weak) {
            debug!("Lifecycle listener already registered");
        }
    }

    pub fn remove_listener<L: LifecycleListener + 'static>(&self, listener: &Arc<L>) -> bool {
        let weak: Weak<L> = Arc::downgrade(listener);
        let weak: Weak<dyn LifecycleListener> = weak;
        self.state.lock().listeners.remove(&weak)
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start an interaction trace named exactly `name`
    ///
    /// An already active trace is completed first (reason `Replaced`), and
    /// its completion is announced before the new trace's start. Returns
    /// `None` when tracing is disabled.
    pub fn start_tracing(&self, name: impl Into<String>) -> Option<TraceId> {
        self.start_trace(name.into())
    }

    /// Start an interaction trace, prefixing `"Display "` unless `custom_name`
    pub fn start_tracing_with(&self, name: &str, custom_name: bool) -> Option<TraceId> {
        let name = if custom_name { name.to_string() } else { activity_display_name(name) };
        self.start_trace(name)
    }

    fn start_trace(&self, name: String) -> Option<TraceId> {
        if !self.is_enabled() {
            debug!("Interaction tracing disabled, not starting {name}");
            return None;
        }

        let platform = self.platform();
        let thread = ThreadInfo::capture(platform.as_deref());
        let background = self.observe_background(platform.as_deref());
        info!("Started interaction trace {name}");

        let (id, notices, listeners) = {
            let mut state = self.state.lock();
            let now = Timestamp::now();
            let mut notices = Vec::with_capacity(2);

            // The active flag stays set while the old session is swapped out.
            if let Some(previous) = state.session.take() {
                debug!("Completing {} before starting {name}", previous.trace.name());
                notices.push(self.finish(&mut state, previous, now, CompletionReason::Replaced));
            }

            let mut trace = InteractionTrace::with_root(name.clone(), thread, background, now);
            trace.set_previous_activity(state.history.last().cloned());
            state.history.record(ActivitySighting::new(name, now));

            let id = trace.id();
            notices.push(Notice::Started(trace.info()));
            self.install(&mut state, ActiveSession::new(trace, thread_key()));
            (id, notices, state.listeners.snapshot())
        };

        dispatch(&listeners, &notices);
        Some(id)
    }

    /// Enter a span on the calling thread
    ///
    /// # Errors
    /// - `TracingInactive` when no trace is active
    /// - `TraceOversized` when the span limit is reached; the matching
    ///   `exit()` is still expected and succeeds
    pub fn enter(&self, name: &str, kind: SpanKind) -> Result<SpanId, TraceError> {
        self.enter_inner(None, name, kind)
    }

    /// Enter a span, nesting under `context` if this thread has no lineage yet
    ///
    /// The handed-over span becomes this thread's parent until
    /// [`TraceController::unload_trace_context`]; it is never exited here.
    ///
    /// # Errors
    /// As [`TraceController::enter`], plus `ContextMismatch` when `context`
    /// does not address a span of the active trace.
    pub fn enter_with_context(
        &self,
        context: Option<&SpanContext>,
        name: &str,
        kind: SpanKind,
    ) -> Result<SpanId, TraceError> {
        self.enter_inner(context.copied(), name, kind)
    }

    fn enter_inner(
        &self,
        context: Option<SpanContext>,
        name: &str,
        kind: SpanKind,
    ) -> Result<SpanId, TraceError> {
        if !self.is_tracing_active() {
            return Err(TraceError::TracingInactive);
        }

        let platform = self.platform();
        let thread = ThreadInfo::capture(platform.as_deref());
        let background = self.observe_background(platform.as_deref());
        let key = thread_key();

        let (span_id, listeners) = {
            let mut state = self.state.lock();
            let session = state.session.as_mut().ok_or(TraceError::TracingInactive)?;
            if let Some(context) = context {
                session.seed(key, context)?;
            }
            let scope = activity_metric_scope(session.trace.name(), background);
            let opened = session.open_span(key, name, kind, thread, scope, self.config.max_spans);
            if let Err(TraceError::TraceOversized { .. }) = opened {
                Supportability::inc(&self.stats.spans_dropped);
                debug!("Span limit reached, dropping {name}");
            }
            (opened?, state.listeners.snapshot())
        };

        trace!("enter {name} ({})", kind.as_str());
        dispatch(&listeners, &[Notice::Entered]);
        Ok(span_id)
    }

    /// Enter a network span, first exiting a network span left open on this
    /// thread
    ///
    /// # Errors
    /// As [`TraceController::enter`].
    pub fn enter_network_segment(&self, name: &str) -> Result<SpanId, TraceError> {
        if self.top_span_kind()? == Some(SpanKind::Network) {
            self.exit()?;
        }
        self.enter(name, SpanKind::Network)
    }

    fn top_span_kind(&self) -> Result<Option<SpanKind>, TraceError> {
        let state = self.state.lock();
        let session = state.session.as_ref().ok_or(TraceError::TracingInactive)?;
        Ok(match session.current(thread_key()) {
            StackEntry::Span(index) => session.trace.span(index).map(Span::kind),
            StackEntry::Seed(_) | StackEntry::Dropped => None,
        })
    }

    /// Exit the calling thread's innermost span
    ///
    /// Exiting the root completes the trace (reason `Finished`).
    ///
    /// # Errors
    /// - `TracingInactive` when no trace is active
    /// - `NoOpenSpan` when this thread has nothing left to exit
    pub fn exit(&self) -> Result<(), TraceError> {
        if !self.is_tracing_active() {
            return Err(TraceError::TracingInactive);
        }
        let key = thread_key();

        let (notices, listeners) = {
            let mut state = self.state.lock();
            let session = state.session.as_mut().ok_or(TraceError::TracingInactive)?;
            let entry = session.pop(key).ok_or(TraceError::NoOpenSpan)?;
            let now = Timestamp::now();
            session.trace.touch(now);

            let mut notices = Vec::with_capacity(2);
            match entry {
                StackEntry::Dropped | StackEntry::Seed(_) => {}
                StackEntry::Span(SpanIndex::ROOT) => {
                    notices.push(Notice::Exited);
                    if let Some(finished) = self.take_session(&mut state) {
                        notices.push(self.finish(
                            &mut state,
                            finished,
                            now,
                            CompletionReason::Finished,
                        ));
                    }
                }
                StackEntry::Span(index) => {
                    session.trace.close_span(index, now)?;
                    notices.push(Notice::Exited);
                }
            }
            (notices, state.listeners.snapshot())
        };

        trace!("exit");
        dispatch(&listeners, &notices);
        Ok(())
    }

    /// Rename the active interaction and its root span
    ///
    /// Every activity sighting recorded under the old name takes the new one.
    ///
    /// # Errors
    /// `TracingInactive` when no trace is active.
    pub fn rename(&self, name: impl Into<String>) -> Result<(), TraceError> {
        let name = name.into();

        let (info, listeners) = {
            let mut state = self.state.lock();
            let session = state.session.as_mut().ok_or(TraceError::TracingInactive)?;
            let previous = session.trace.name().to_string();
            session.trace.rename(name.clone())?;
            let info = session.trace.info();
            state.history.rename(&previous, &name);
            (info, state.listeners.snapshot())
        };

        debug!("Renamed interaction trace to {name}");
        dispatch(&listeners, &[Notice::Renamed(info)]);
        Ok(())
    }

    /// Complete the active trace if its id is `id` (reason `Ended`)
    ///
    /// Returns whether a trace was completed.
    pub fn end_trace(&self, id: TraceId) -> bool {
        let (notice, listeners) = {
            let mut state = self.state.lock();
            if state.session.as_ref().map(|session| session.trace.id()) != Some(id) {
                debug!("end_trace({id}) does not match the active trace");
                return false;
            }
            let Some(session) = self.take_session(&mut state) else {
                return false;
            };
            let notice = self.finish(&mut state, session, Timestamp::now(), CompletionReason::Ended);
            (notice, state.listeners.snapshot())
        };

        dispatch(&listeners, &[notice]);
        true
    }

    /// Drop the active trace without completing it or notifying anyone
    pub fn halt(&self) {
        let mut state = self.state.lock();
        if let Some(session) = self.take_session(&mut state) {
            state.history.end_last(Timestamp::now());
            info!("Halted interaction trace {}", session.trace.name());
        }
    }

    // ========================================================================
    // Parameters and accessors
    // ========================================================================

    /// Set a parameter on the calling thread's current span
    ///
    /// # Errors
    /// `TracingInactive` when no trace is active; `AlreadyComplete` if the
    /// current span was handed over from a thread that has since exited it.
    pub fn set_param(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<(), TraceError> {
        let mut state = self.state.lock();
        let session = state.session.as_mut().ok_or(TraceError::TracingInactive)?;
        let index = session.current_span(thread_key(), self.config.max_spans)?;
        let span = session.trace.span_mut(index).ok_or(TraceError::NoOpenSpan)?;
        let result = span.set_param(key, value.into());
        if let Err(TraceError::AlreadyComplete(_)) = result {
            Supportability::inc(&self.stats.mutation_after_complete);
        }
        result
    }

    /// Parameters of the calling thread's current span
    ///
    /// # Errors
    /// `TracingInactive` when no trace is active.
    pub fn get_params(&self) -> Result<HashMap<String, Value>, TraceError> {
        let state = self.state.lock();
        let session = state.session.as_ref().ok_or(TraceError::TracingInactive)?;
        let index = session.current_span(thread_key(), self.config.max_spans)?;
        session
            .trace
            .span(index)
            .map(|span| span.params().clone())
            .ok_or(TraceError::NoOpenSpan)
    }

    /// Snapshot of the active trace
    ///
    /// # Errors
    /// `TracingInactive` when no trace is active.
    pub fn current_trace(&self) -> Result<TraceInfo, TraceError> {
        let state = self.state.lock();
        state
            .session
            .as_ref()
            .map(|session| session.trace.info())
            .ok_or(TraceError::TracingInactive)
    }

    /// Copy of the calling thread's current span (the root if it has none)
    ///
    /// # Errors
    /// `TracingInactive` when no trace is active.
    pub fn current_span(&self) -> Result<Span, TraceError> {
        let state = self.state.lock();
        let session = state.session.as_ref().ok_or(TraceError::TracingInactive)?;
        let index = session.current_span(thread_key(), self.config.max_spans)?;
        session.trace.span(index).cloned().ok_or(TraceError::NoOpenSpan)
    }

    /// Address of the calling thread's current span, for handing to another
    /// thread
    ///
    /// # Errors
    /// `TracingInactive` when no trace is active.
    pub fn current_context(&self) -> Result<SpanContext, TraceError> {
        let state = self.state.lock();
        let session = state.session.as_ref().ok_or(TraceError::TracingInactive)?;
        let index = session.current_span(thread_key(), self.config.max_spans)?;
        let span_id = session.trace.span(index).map(Span::id).ok_or(TraceError::NoOpenSpan)?;
        Ok(SpanContext { trace_id: session.trace.id(), span_id })
    }

    /// Run `f` against the active trace while holding the controller lock
    ///
    /// `f` must not call back into the controller.
    ///
    /// # Errors
    /// `TracingInactive` when no trace is active.
    pub fn with_current_trace<R>(&self, f: impl FnOnce(&InteractionTrace) -> R) -> Result<R, TraceError> {
        let state = self.state.lock();
        state.session.as_ref().map(|session| f(&session.trace)).ok_or(TraceError::TracingInactive)
    }

    /// Metric scope for `name` given the calling thread's UI state
    pub fn metric_scope(&self, name: &str) -> String {
        let platform = self.platform();
        activity_metric_scope(name, self.observe_background(platform.as_deref()))
    }

    // ========================================================================
    // Context hand-off
    // ========================================================================

    /// Detach the calling worker thread from the trace and clear `owner`'s
    /// trace field
    ///
    /// A no-op when tracing is inactive or on the UI thread. An `owner` that
    /// is not a [`TraceField`] is counted as an invalid context owner.
    pub fn unload_trace_context(&self, owner: &mut dyn Any) {
        if !self.is_tracing_active() {
            return;
        }
        if self.platform().is_some_and(|platform| platform.is_ui_thread()) {
            return;
        }

        if let Some(session) = self.state.lock().session.as_mut() {
            session.stacks.remove(&thread_key());
        }

        let owner_type = (*owner).type_id();
        match owner.downcast_mut::<TraceField>() {
            Some(field) => {
                field.take();
            }
            None => {
                Supportability::inc(&self.stats.invalid_context_owner);
                let err = TraceError::InvalidContextOwner(format!("{owner_type:?}"));
                error!("unload_trace_context: {err}");
            }
        }
    }

    // ========================================================================
    // Harvest hooks
    // ========================================================================

    /// Health check of the active trace, run on every harvest tick
    ///
    /// A trace idle for longer than the healthy timeout is completed as
    /// healthy; otherwise a trace older than the unhealthy timeout is
    /// completed as unhealthy. Returns the completion reason if one fired.
    pub fn on_harvest_tick(&self) -> Option<CompletionReason> {
        if !self.is_enabled() {
            return None;
        }

        let (notice, reason, listeners) = {
            let mut state = self.state.lock();
            let session = state.session.as_ref()?;
            let now = Timestamp::now();

            let reason = if session.trace.is_stale_at(self.config.healthy_timeout(), now) {
                info!("Completing idle interaction trace {}", session.trace.name());
                CompletionReason::HealthyTimeout
            } else if session.trace.is_overlong_at(self.config.unhealthy_timeout(), now) {
                warn!(
                    "Interaction trace {} exceeded {}ms, completing as unhealthy",
                    session.trace.name(),
                    self.config.unhealthy_timeout_ms
                );
                CompletionReason::UnhealthyTimeout
            } else {
                debug!("Interaction trace {} is still active", session.trace.name());
                return None;
            };

            let session = self.take_session(&mut state)?;
            let notice = self.finish(&mut state, session, now, reason);
            (notice, reason, state.listeners.snapshot())
        };

        dispatch(&listeners, &[notice]);
        Some(reason)
    }

    /// A harvest upload failed; the active trace will be reported again
    pub fn on_harvest_send_failed(&self) {
        if let Some(session) = self.state.lock().session.as_mut() {
            session.trace.increment_report_attempt_count();
        }
    }

    // ========================================================================
    // Activity history
    // ========================================================================

    pub fn activity_history(&self) -> Vec<ActivitySighting> {
        self.state.lock().history.snapshot()
    }

    pub fn clear_activity_history(&self) {
        self.state.lock().history.clear();
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn platform(&self) -> Option<Arc<dyn PlatformContext>> {
        self.platform.read().clone()
    }

    /// Whether the calling thread counts as background
    ///
    /// Falls back to the last observed state without a platform context.
    fn observe_background(&self, platform: Option<&dyn PlatformContext>) -> bool {
        match platform {
            Some(platform) => {
                let background = !platform.is_ui_thread();
                self.last_known_background.store(background, Ordering::Relaxed);
                background
            }
            None => self.last_known_background.load(Ordering::Relaxed),
        }
    }

    fn install(&self, state: &mut ControllerState, session: ActiveSession) {
        state.session = Some(session);
        self.active.store(true, Ordering::Release);
    }

    fn take_session(&self, state: &mut ControllerState) -> Option<ActiveSession> {
        let session = state.session.take();
        self.active.store(false, Ordering::Release);
        session
    }

    /// Complete `session`'s trace and account for it; exactly one caller
    /// reaches this per trace because the session was taken out of the state
    fn finish(
        &self,
        state: &mut ControllerState,
        mut session: ActiveSession,
        now: Timestamp,
        reason: CompletionReason,
    ) -> Notice {
        session.trace.complete(now, reason);
        state.history.end_last(now);
        let trace = session.trace;

        Supportability::add(&self.stats.negative_exclusive_time, trace.clamped_span_count());
        Supportability::add(&self.stats.mutation_after_complete, trace.late_child_charges());
        match reason {
            CompletionReason::HealthyTimeout => Supportability::inc(&self.stats.traces_healthy),
            CompletionReason::UnhealthyTimeout => {
                Supportability::inc(&self.stats.traces_unhealthy);
            }
            CompletionReason::Finished | CompletionReason::Replaced | CompletionReason::Ended => {}
        }

        info!(
            "Completed interaction trace {} ({}): {} spans, {} dropped",
            trace.name(),
            reason.as_str(),
            trace.span_count(),
            trace.dropped_spans()
        );
        Notice::Completed(Arc::new(trace), reason)
    }

    pub(crate) fn with_session_trace_mut<R>(
        &self,
        f: impl FnOnce(&mut InteractionTrace) -> R,
    ) -> Result<R, TraceError> {
        let mut state = self.state.lock();
        state
            .session
            .as_mut()
            .map(|session| f(&mut session.trace))
            .ok_or(TraceError::TracingInactive)
    }

    pub(crate) fn count_open_entries(&self) -> usize {
        self.state.lock().session.as_ref().map_or(0, ActiveSession::open_entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> TraceController {
        TraceController::with_platform(TracerConfig::default(), None)
    }

    #[test]
    fn test_seeded_parent_is_never_exited() {
        let tc = controller();
        tc.start_tracing("Display Main").unwrap();
        let context = tc.current_context().unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                tc.enter_with_context(Some(&context), "worker", SpanKind::Method).unwrap();
                tc.exit().unwrap();
                assert_eq!(tc.exit(), Err(TraceError::NoOpenSpan));
            });
        });

        assert!(tc.is_tracing_active());
        let worker_parent = tc
            .with_current_trace(|trace| trace.spans()[1].parent())
            .unwrap();
        assert_eq!(worker_parent, Some(SpanIndex::ROOT));
    }

    #[test]
    fn test_context_from_other_trace_is_rejected() {
        let tc = controller();
        tc.start_tracing("first").unwrap();
        let stale = tc.current_context().unwrap();
        tc.start_tracing("second").unwrap();

        let err = std::thread::scope(|s| {
            s.spawn(|| tc.enter_with_context(Some(&stale), "late", SpanKind::Method))
                .join()
                .unwrap()
        })
        .unwrap_err();

        assert!(matches!(err, TraceError::ContextMismatch { .. }));
    }

    #[test]
    fn test_dropped_enters_stay_balanced() {
        let config = TracerConfig { max_spans: 2, ..TracerConfig::default() };
        let tc = TraceController::with_platform(config, None);
        tc.start_tracing("small").unwrap();

        tc.enter("kept", SpanKind::Method).unwrap();
        assert!(matches!(
            tc.enter("dropped", SpanKind::Method),
            Err(TraceError::TraceOversized { limit: 2, .. })
        ));
        assert!(tc.enter("nested", SpanKind::Method).is_err());
        assert_eq!(tc.count_open_entries(), 4);

        tc.exit().unwrap();
        tc.exit().unwrap();
        assert_eq!(tc.current_span().unwrap().display_name(), "kept");
        tc.exit().unwrap();
        tc.exit().unwrap();

        assert!(!tc.is_tracing_active());
        assert_eq!(tc.stats().spans_dropped.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_thread_without_stack_nests_under_root() {
        let tc = controller();
        tc.start_tracing("root").unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                tc.enter("background", SpanKind::Method).unwrap();
                tc.exit().unwrap();
                assert_eq!(tc.exit(), Err(TraceError::NoOpenSpan));
            });
        });

        let (count, parent) = tc
            .with_current_trace(|trace| (trace.span_count(), trace.spans()[1].parent()))
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(parent, Some(SpanIndex::ROOT));
        assert!(tc.is_tracing_active());
    }

    #[test]
    fn test_disabled_controller_is_inert() {
        let tc = controller();
        tc.set_enabled(false);

        assert_eq!(tc.start_tracing("ignored"), None);
        assert_eq!(tc.enter("m", SpanKind::Method), Err(TraceError::TracingInactive));
        assert_eq!(tc.on_harvest_tick(), None);
    }

    #[test]
    fn test_disabling_halts_active_trace() {
        let tc = controller();
        tc.start_tracing("active").unwrap();
        tc.set_enabled(false);
        assert!(!tc.is_tracing_active());
        assert_eq!(tc.current_trace(), Err(TraceError::TracingInactive));
    }
}
