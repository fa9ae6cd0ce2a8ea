//! Lifecycle listeners
//!
//! The controller holds listeners weakly: dropping the last `Arc` to a
//! listener unregisters it. Notifications are delivered on the thread that
//! caused them, after the controller has released its lock, so a listener
//! may call back into the controller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use calltrace_common::CompletionReason;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::warn;

use super::trace::{InteractionTrace, TraceInfo};
use crate::diagnostics::Supportability;

/// Observer of interaction trace lifecycle events
///
/// Every method defaults to a no-op so implementors only override what they
/// need. Callbacks run synchronously on the instrumented thread and should
/// return quickly.
pub trait LifecycleListener: Send + Sync {
    fn on_trace_start(&self, _trace: &TraceInfo) {}

    fn on_enter_method(&self) {}

    fn on_exit_method(&self) {}

    fn on_trace_rename(&self, _trace: &TraceInfo) {}

    /// The trace is final: every span is closed and nothing will mutate it
    fn on_trace_complete(&self, _trace: &Arc<InteractionTrace>, _reason: CompletionReason) {}
}

/// Registered listeners, in registration order
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: Vec<Weak<dyn LifecycleListener>>,
}

impl ListenerSet {
    /// Returns false if `listener` was already registered
    pub(crate) fn add(&mut self, listener: Weak<dyn LifecycleListener>) -> bool {
        if self.listeners.iter().any(|known| same_listener(known, &listener)) {
            return false;
        }
        self.listeners.push(listener);
        true
    }

    pub(crate) fn remove(&mut self, listener: &Weak<dyn LifecycleListener>) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|known| !same_listener(known, listener));
        self.listeners.len() != before
    }

    /// Live listeners in registration order; dead entries are pruned
    pub(crate) fn snapshot(&mut self) -> Vec<Arc<dyn LifecycleListener>> {
        self.listeners.retain(|listener| listener.strong_count() > 0);
        self.listeners.iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn len(&mut self) -> usize {
        self.listeners.retain(|listener| listener.strong_count() > 0);
        self.listeners.len()
    }
}

fn same_listener(a: &Weak<dyn LifecycleListener>, b: &Weak<dyn LifecycleListener>) -> bool {
    a.as_ptr().cast::<()>() == b.as_ptr().cast::<()>()
}

// ============================================================================
// Channel Listener
// ============================================================================

/// A lifecycle notification, as forwarded by [`ChannelListener`]
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    TraceStarted(TraceInfo),
    MethodEntered,
    MethodExited,
    TraceRenamed(TraceInfo),
    TraceCompleted { trace: Arc<InteractionTrace>, reason: CompletionReason },
}

/// Forwards lifecycle events into a bounded channel
///
/// Instrumented threads never block on a slow consumer: when the channel is
/// full the event is dropped and counted.
pub struct ChannelListener {
    tx: Sender<LifecycleEvent>,
    dropped: AtomicU64,
    stats: Option<Arc<Supportability>>,
}

impl ChannelListener {
    #[must_use]
    pub fn bounded(capacity: usize) -> (Arc<Self>, Receiver<LifecycleEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Arc::new(Self { tx, dropped: AtomicU64::new(0), stats: None }), rx)
    }

    /// Like [`ChannelListener::bounded`], also counting drops in `stats`
    #[must_use]
    pub fn bounded_with_stats(
        capacity: usize,
        stats: Arc<Supportability>,
    ) -> (Arc<Self>, Receiver<LifecycleEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Arc::new(Self { tx, dropped: AtomicU64::new(0), stats: Some(stats) }), rx)
    }

    /// Events lost to a full or disconnected channel
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn forward(&self, event: LifecycleEvent) {
        let Err(err) = self.tx.try_send(event) else {
            return;
        };

        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(stats) = &self.stats {
            Supportability::inc(&stats.events_dropped);
        }
        if matches!(err, TrySendError::Full(_)) && dropped.is_power_of_two() {
            warn!("Lifecycle channel full, {dropped} events dropped so far");
        }
    }
}

impl LifecycleListener for ChannelListener {
    fn on_trace_start(&self, trace: &TraceInfo) {
        self.forward(LifecycleEvent::TraceStarted(trace.clone()));
    }

    fn on_enter_method(&self) {
        self.forward(LifecycleEvent::MethodEntered);
    }

    fn on_exit_method(&self) {
        self.forward(LifecycleEvent::MethodExited);
    }

    fn on_trace_rename(&self, trace: &TraceInfo) {
        self.forward(LifecycleEvent::TraceRenamed(trace.clone()));
    }

    fn on_trace_complete(&self, trace: &Arc<InteractionTrace>, reason: CompletionReason) {
        self.forward(LifecycleEvent::TraceCompleted { trace: Arc::clone(trace), reason });
    }
}
