//! Structured error types for calltrace
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::{SpanId, TraceId};
use thiserror::Error;

/// Failures of a single tracing operation
///
/// None of these are fatal: instrumented call sites are expected to branch on
/// `TracingInactive` (the common case when interaction tracing is off) and
/// ignore everything else.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TraceError {
    #[error("No interaction trace is active")]
    TracingInactive,

    #[error("{0} has already completed")]
    AlreadyComplete(String),

    #[error("Trace {0} has not completed yet")]
    NotComplete(TraceId),

    #[error("No open span on the calling thread")]
    NoOpenSpan,

    #[error("Trace {trace} reached its limit of {limit} spans")]
    TraceOversized { trace: TraceId, limit: usize },

    #[error("Owner does not hold a trace field: {0}")]
    InvalidContextOwner(String),

    #[error("Span {span} does not belong to the active trace {trace}")]
    ContextMismatch { trace: TraceId, span: SpanId },

    #[error("Vitals already attached to trace {0}")]
    VitalsAlreadySet(TraceId),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Failed to parse replay script: {0}")]
    ScriptParseFailed(String),

    #[error("Step {step} failed: {source}")]
    StepFailed {
        step: usize,
        #[source]
        source: TraceError,
    },

    #[error("Replay thread '{0}' stopped responding")]
    WorkerGone(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
