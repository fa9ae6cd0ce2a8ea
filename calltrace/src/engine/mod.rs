//! Call-stack tracing engine
//!
//! - [`span`]: one timed node with exclusive-time accounting
//! - [`trace`]: the span tree of one interaction, plus naming helpers
//! - [`controller`]: the single-active-trace state machine
//! - [`listener`]: lifecycle observers, including a channel forwarder
//! - [`platform`]: thread identity and UI-thread detection
//! - [`context`]: cross-thread span hand-off
//! - [`history`]: sightings of past interactions
//! - [`testing`]: explicit test access to the active trace

pub mod context;
pub mod controller;
pub mod history;
pub mod listener;
pub mod platform;
pub mod span;
pub mod testing;
pub mod trace;

pub use context::{SpanContext, TraceField};
pub use controller::TraceController;
pub use history::ActivitySighting;
pub use listener::{ChannelListener, LifecycleEvent, LifecycleListener};
pub use platform::{PlatformContext, StdPlatformContext, ThreadInfo};
pub use span::{Span, SpanIndex};
pub use trace::{
    activity_display_name, activity_metric_scope, InteractionTrace, NetworkSummary, Sample,
    TraceInfo, Vitals,
};
