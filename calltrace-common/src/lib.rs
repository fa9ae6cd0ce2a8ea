//! # Shared Constants and Kinds (Instrumentation ↔ Engine)
//!
//! Defines the small, dependency-free vocabulary shared between instrumented
//! call sites and the tracing engine. Everything here is `Copy` and usable
//! from `no_std` code so that the injected call sites never pull in the
//! engine's allocation-heavy types.
//!
//! ## Key Items
//!
//! - [`SpanKind`] - Method vs. network span
//! - [`CompletionReason`] - Why an interaction trace was finalized
//! - [`SampleType`] - Vitals sample categories attached after completion
//! - Metric-scope prefixes and supportability metric names

#![no_std]

// ============================================================================
// Timing Defaults
// ============================================================================

/// Idle time after which an active trace is completed as *healthy*.
///
/// Measured against the trace's `last_updated_at`, which every enter/exit bumps.
pub const DEFAULT_HEALTHY_TIMEOUT_MS: u64 = 500;

/// Absolute age after which an active trace is completed as *unhealthy*.
///
/// Measured against the trace's `started_at`. A trace this old almost always
/// has an `enter` without a matching `exit`.
pub const DEFAULT_UNHEALTHY_TIMEOUT_MS: u64 = 60_000;

/// Default period of the harvest tick that drives health checks.
pub const DEFAULT_HARVEST_INTERVAL_MS: u64 = 60_000;

/// Maximum number of spans recorded in one interaction trace.
///
/// Enters beyond this limit are dropped (but still balanced by their exits).
pub const MAX_SPANS: usize = 2000;

/// Version tag stamped into every trace's parameters.
pub const TRACE_VERSION: &str = "1.0";

// ============================================================================
// Naming
// ============================================================================

/// Metric scope prefix for traces observed on the UI thread.
pub const ACTIVITY_METRIC_PREFIX: &str = "Mobile/Activity/Name/";

/// Metric scope prefix for traces observed off the UI thread.
pub const ACTIVITY_BACKGROUND_METRIC_PREFIX: &str = "Mobile/Activity/Background/Name/";

/// Prefix applied to non-custom interaction names.
pub const ACTIVITY_DISPLAY_NAME_PREFIX: &str = "Display ";

/// Thread name reported when no platform context can supply one.
pub const DEFAULT_THREAD_NAME: &str = "main";

// ============================================================================
// Supportability Metric Names
// ============================================================================

/// Root of all agent-health counters.
pub const SUPPORTABILITY_AGENT: &str = "Supportability/AgentHealth/";

/// Traces completed by the healthy (idle) timeout.
pub const SUPPORTABILITY_TRACES_HEALTHY: &str = "Supportability/AgentHealth/HealthyActivityTraces";

/// Traces completed by the unhealthy (absolute age) timeout.
pub const SUPPORTABILITY_TRACES_UNHEALTHY: &str =
    "Supportability/AgentHealth/UnhealthyActivityTraces";

/// `unload_trace_context` was handed an owner without a trace field.
pub const SUPPORTABILITY_INVALID_CONTEXT_OWNER: &str =
    "Supportability/AgentHealth/TraceFieldInterface/unloadTraceContext/InvalidContextOwner";

/// A span's exclusive time came out negative and was clamped to zero.
pub const SUPPORTABILITY_NEGATIVE_EXCLUSIVE_TIME: &str =
    "Supportability/AgentHealth/Tracing/NegativeExclusiveTime";

/// A mutation arrived after its span or trace had completed.
pub const SUPPORTABILITY_MUTATION_AFTER_COMPLETE: &str =
    "Supportability/AgentHealth/Tracing/MutationAfterComplete";

/// An enter was dropped because the trace reached its span limit.
pub const SUPPORTABILITY_SPANS_DROPPED: &str = "Supportability/AgentHealth/Tracing/SpansDropped";

/// A lifecycle event could not be forwarded because a listener channel was full.
pub const SUPPORTABILITY_EVENTS_DROPPED: &str = "Supportability/AgentHealth/Tracing/EventsDropped";

// ============================================================================
// Shared Kinds
// ============================================================================

/// What a span measures
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SpanKind {
    /// An instrumented method call
    #[default]
    Method = 0,
    /// A network request segment
    Network = 1,
}

impl SpanKind {
    /// Stable lowercase name, used for export categories and span params
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SpanKind::Method => "method",
            SpanKind::Network => "network",
        }
    }
}

/// Why an interaction trace was finalized
///
/// Carried in the completion notification so that metrics collaborators can
/// count normal completions and timeout completions separately.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionReason {
    /// The root span exited normally
    Finished = 0,
    /// A new trace was started while this one was active
    Replaced = 1,
    /// Ended explicitly by id
    Ended = 2,
    /// No enter/exit activity for longer than the healthy timeout
    HealthyTimeout = 3,
    /// Older than the unhealthy timeout (likely a missing `exit()`)
    UnhealthyTimeout = 4,
}

impl CompletionReason {
    /// True for both timeout-driven completions
    #[must_use]
    pub const fn is_forced(self) -> bool {
        matches!(self, CompletionReason::HealthyTimeout | CompletionReason::UnhealthyTimeout)
    }

    /// True only for the pathological (unhealthy) timeout
    #[must_use]
    pub const fn is_unhealthy(self) -> bool {
        matches!(self, CompletionReason::UnhealthyTimeout)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            CompletionReason::Finished => "finished",
            CompletionReason::Replaced => "replaced",
            CompletionReason::Ended => "ended",
            CompletionReason::HealthyTimeout => "healthy_timeout",
            CompletionReason::UnhealthyTimeout => "unhealthy_timeout",
        }
    }
}

/// Vitals sample category
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SampleType {
    Memory = 0,
    Cpu = 1,
}

impl SampleType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SampleType::Memory => "MEMORY",
            SampleType::Cpu => "CPU",
        }
    }
}
