//! # calltrace - Call-Stack Tracing for Interaction Performance
//!
//! calltrace records what an application does while it responds to a user
//! interaction (an activity coming to the foreground, a tapped button) as a
//! tree of timed spans. Instrumented code brackets methods with `enter` and
//! `exit`; the engine keeps one interaction trace active at a time, charges
//! each span's time to its parent so exclusive time falls out, and completes
//! the trace when the root exits, a newer interaction replaces it, or the
//! health monitor decides it has gone idle or run too long.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Instrumented Application                     │
//! │   start_tracing / enter / exit / rename / unload_trace_context │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ any thread
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  TraceController (engine)                       │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐        │
//! │  │ per-thread   │──▶│ Interaction  │◀──│   Health     │        │
//! │  │ span stacks  │   │    Trace     │   │ (harvest)    │        │
//! │  └──────────────┘   └──────┬───────┘   └──────────────┘        │
//! │                            │ complete                           │
//! │                            ▼                                    │
//! │                   ┌──────────────────┐                          │
//! │                   │ LifecycleListener│ (weak, outside the lock) │
//! │                   └────────┬─────────┘                          │
//! └────────────────────────────┼────────────────────────────────────┘
//!                              ▼
//!          ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//!          │   Analysis   │  │    Export    │  │   Channel    │
//!          │ (measurement)│  │ (trace.json) │  │  forwarder   │
//!          └──────────────┘  └──────────────┘  └──────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`engine`]: spans, interaction traces, the controller, listeners,
//!   platform context and cross-thread context hand-off
//! - [`harvest`]: a background thread driving the health monitor
//! - [`analysis`]: hotspots and per-scope measurements of completed traces
//! - [`export`]: Chrome Trace Event Format JSON for Perfetto
//! - [`replay`]: JSON step scripts run on named threads, for the CLI and tests
//! - [`config`]: timeouts and limits
//! - [`diagnostics`]: supportability counters
//! - [`domain`]: identifiers, time types and errors
//! - [`cli`]: command-line argument parsing
//!
//! ## Typical Usage
//!
//! ```bash
//! # Replay a script and print call trees
//! calltrace replay checkout.json
//!
//! # Also export the completed traces for ui.perfetto.dev
//! calltrace replay checkout.json --export trace.json
//! ```
//!
//! ## Key Concepts
//!
//! - **Exclusive time**: a span's duration minus the time charged by its children
//! - **Metric scope**: `Mobile/Activity/Name/<trace>`, or
//!   `Mobile/Activity/Background/Name/<trace>` off the UI thread
//! - **Healthy timeout**: idle time after which a trace completes normally
//! - **Unhealthy timeout**: age after which a trace is cut off as overlong

pub mod analysis;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod domain;
pub mod engine;
pub mod export;
pub mod harvest;
pub mod replay;

pub use config::TracerConfig;
pub use engine::{InteractionTrace, LifecycleListener, PlatformContext, Span, TraceController};
