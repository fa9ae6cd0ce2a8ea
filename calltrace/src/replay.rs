//! Scripted replay of instrumentation calls
//!
//! A replay script is a JSON list of steps, each naming the logical thread it
//! runs on. Every logical thread becomes a real OS thread carrying that name,
//! so per-thread stacks and UI-thread detection behave exactly as they would
//! under real instrumentation. Steps execute one at a time, in script order.
//!
//! ```json
//! {
//!   "name": "checkout",
//!   "steps": [
//!     { "op": "start", "name": "Checkout", "custom_name": true },
//!     { "op": "enter", "name": "loadCart" },
//!     { "op": "enter", "name": "decode", "thread": "worker", "context_from": "main" },
//!     { "op": "exit", "thread": "worker" },
//!     { "op": "unload", "thread": "worker" },
//!     { "op": "exit" },
//!     { "op": "exit" }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use calltrace_common::{CompletionReason, SpanKind, DEFAULT_THREAD_NAME};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{ReplayError, TraceError, TraceId};
use crate::engine::{
    ChannelListener, InteractionTrace, LifecycleEvent, SpanContext, TraceController, TraceField,
};

/// How long the driver waits for a replay thread to finish one step
const STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the channel collecting completed traces during a replay
const EVENT_CAPACITY: usize = 4096;

fn default_thread() -> String {
    DEFAULT_THREAD_NAME.to_string()
}

// ============================================================================
// Script
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Start {
        name: String,
        #[serde(default)]
        custom_name: bool,
        #[serde(default = "default_thread")]
        thread: String,
    },
    Enter {
        name: String,
        #[serde(default = "default_thread")]
        thread: String,
        /// Nest under the current span of this logical thread
        #[serde(default)]
        context_from: Option<String>,
    },
    Network {
        name: String,
        #[serde(default = "default_thread")]
        thread: String,
    },
    Exit {
        #[serde(default = "default_thread")]
        thread: String,
    },
    Rename {
        name: String,
        #[serde(default = "default_thread")]
        thread: String,
    },
    Param {
        key: String,
        value: Value,
        #[serde(default = "default_thread")]
        thread: String,
    },
    Unload {
        #[serde(default = "default_thread")]
        thread: String,
    },
    Sleep {
        ms: u64,
    },
    Tick,
    /// End the most recently started trace by id
    End,
    Halt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayScript {
    #[serde(default)]
    pub name: Option<String>,
    pub steps: Vec<Step>,
}

impl ReplayScript {
    /// Parse a script from JSON text
    ///
    /// # Errors
    /// `Json` for malformed input; `ScriptParseFailed` for a script with no
    /// steps or a `context_from` naming the entering thread itself.
    pub fn parse(json: &str) -> Result<Self, ReplayError> {
        let script: Self = serde_json::from_str(json)?;
        script.validate()?;
        Ok(script)
    }

    /// # Errors
    /// As [`ReplayScript::parse`], plus `Io` if the file cannot be read.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    fn validate(&self) -> Result<(), ReplayError> {
        if self.steps.is_empty() {
            return Err(ReplayError::ScriptParseFailed("script has no steps".to_string()));
        }
        for (index, step) in self.steps.iter().enumerate() {
            if let Step::Enter { thread, context_from: Some(from), .. } = step {
                if from == thread {
                    return Err(ReplayError::ScriptParseFailed(format!(
                        "step {index}: thread '{thread}' cannot take context from itself"
                    )));
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Clone)]
pub struct CompletedTrace {
    pub trace: Arc<InteractionTrace>,
    pub reason: CompletionReason,
}

#[derive(Debug, Default)]
pub struct ReplayReport {
    pub steps_run: usize,
    /// Steps whose operation failed, with the failure (lenient mode only)
    pub failed_steps: Vec<(usize, TraceError)>,
    /// Completed traces in completion order
    pub completed: Vec<CompletedTrace>,
    /// A trace was still active when the script ended
    pub left_active: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayOptions {
    /// Abort on the first failed step instead of recording it
    pub strict: bool,
}

// ============================================================================
// Replay threads
// ============================================================================

/// What a replay thread hands back after running one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    Done,
    Started(Option<TraceId>),
    Context(SpanContext),
}

type StepResult = Result<Reply, TraceError>;
type Job = Box<dyn FnOnce(&TraceController) -> StepResult + Send>;

struct ReplayThread {
    jobs: Sender<Job>,
    replies: Receiver<StepResult>,
}

/// Named OS threads, spawned on first use, each running jobs in order
struct ReplayThreads<'scope, 'env> {
    scope: &'scope std::thread::Scope<'scope, 'env>,
    controller: &'env TraceController,
    threads: HashMap<String, ReplayThread>,
}

impl<'scope, 'env> ReplayThreads<'scope, 'env> {
    fn new(scope: &'scope std::thread::Scope<'scope, 'env>, controller: &'env TraceController) -> Self {
        Self { scope, controller, threads: HashMap::new() }
    }

    /// Run `job` on the thread named `name` and wait for its result
    ///
    /// The outer `Result` is the driver's own failure; the inner one is the
    /// traced operation's.
    fn run(
        &mut self,
        name: &str,
        job: impl FnOnce(&TraceController) -> StepResult + Send + 'static,
    ) -> Result<StepResult, ReplayError> {
        if !self.threads.contains_key(name) {
            let thread = self.spawn(name)?;
            self.threads.insert(name.to_string(), thread);
        }
        let gone = || ReplayError::WorkerGone(name.to_string());
        let thread = self.threads.get(name).ok_or_else(gone)?;

        thread.jobs.send(Box::new(job)).map_err(|_| gone())?;
        thread.replies.recv_timeout(STEP_TIMEOUT).map_err(|_| gone())
    }

    fn spawn(&self, name: &str) -> Result<ReplayThread, ReplayError> {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let (reply_tx, reply_rx) = crossbeam_channel::unbounded();
        let controller = self.controller;

        std::thread::Builder::new().name(name.to_string()).spawn_scoped(self.scope, move || {
            for job in job_rx {
                if reply_tx.send(job(controller)).is_err() {
                    break;
                }
            }
        })?;
        debug!("Spawned replay thread {name}");
        Ok(ReplayThread { jobs: job_tx, replies: reply_rx })
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Run `script` against `controller`
///
/// # Errors
/// - `StepFailed` in strict mode when a step's operation fails
/// - `WorkerGone` if a replay thread stops responding
/// - `Io` if a replay thread cannot be spawned
pub fn replay(
    controller: &TraceController,
    script: &ReplayScript,
    options: ReplayOptions,
) -> Result<ReplayReport, ReplayError> {
    let (listener, events) =
        ChannelListener::bounded_with_stats(EVENT_CAPACITY, Arc::clone(controller.stats()));
    controller.add_listener(&listener);
    info!(
        "Replaying {} ({} steps)",
        script.name.as_deref().unwrap_or("script"),
        script.steps.len()
    );

    let result = std::thread::scope(|scope| -> Result<ReplayReport, ReplayError> {
        let mut threads = ReplayThreads::new(scope, controller);
        let mut driver = Driver { controller, fields: HashMap::new(), last_started: None };
        let mut report = ReplayReport::default();

        for (index, step) in script.steps.iter().enumerate() {
            debug!("step {index}: {step:?}");
            let outcome = driver.run_step(&mut threads, step)?;

            report.steps_run += 1;
            if let Err(source) = outcome {
                if options.strict {
                    return Err(ReplayError::StepFailed { step: index, source });
                }
                warn!("Step {index} failed: {source}");
                report.failed_steps.push((index, source));
            }
        }
        Ok(report)
    });
    controller.remove_listener(&listener);
    let mut report = result?;

    report.left_active = controller.is_tracing_active();
    report.completed = events
        .try_iter()
        .filter_map(|event| match event {
            LifecycleEvent::TraceCompleted { trace, reason } => Some(CompletedTrace { trace, reason }),
            _ => None,
        })
        .collect();
    if listener.dropped() > 0 {
        warn!("{} lifecycle events were dropped during replay", listener.dropped());
    }
    Ok(report)
}

/// Driver-side state carried between steps
struct Driver<'a> {
    controller: &'a TraceController,
    /// Trace fields loaded for threads that entered with a handed-over context
    fields: HashMap<String, TraceField>,
    last_started: Option<TraceId>,
}

impl Driver<'_> {
    fn run_step(
        &mut self,
        threads: &mut ReplayThreads<'_, '_>,
        step: &Step,
    ) -> Result<Result<(), TraceError>, ReplayError> {
        let reply = match step {
            Step::Start { name, custom_name, thread } => {
                let (name, custom) = (name.clone(), *custom_name);
                threads.run(thread, move |tc| Ok(Reply::Started(tc.start_tracing_with(&name, custom))))?
            }
            Step::Enter { name, thread, context_from } => {
                let context = match context_from {
                    Some(from) => match threads.run(from, |tc| tc.current_context().map(Reply::Context))? {
                        Ok(Reply::Context(context)) => Some(context),
                        Ok(_) => None,
                        Err(err) => return Ok(Err(err)),
                    },
                    None => None,
                };
                if let Some(context) = context {
                    self.fields.entry(thread.clone()).or_default().load(context);
                }
                let name = name.clone();
                threads.run(thread, move |tc| {
                    tc.enter_with_context(context.as_ref(), &name, SpanKind::Method).map(|_| Reply::Done)
                })?
            }
            Step::Network { name, thread } => {
                let name = name.clone();
                threads.run(thread, move |tc| tc.enter_network_segment(&name).map(|_| Reply::Done))?
            }
            Step::Exit { thread } => threads.run(thread, |tc| tc.exit().map(|()| Reply::Done))?,
            Step::Rename { name, thread } => {
                let name = name.clone();
                threads.run(thread, move |tc| tc.rename(name).map(|()| Reply::Done))?
            }
            Step::Param { key, value, thread } => {
                let (key, value) = (key.clone(), value.clone());
                threads.run(thread, move |tc| tc.set_param(key, value).map(|()| Reply::Done))?
            }
            Step::Unload { thread } => {
                let mut field = self.fields.remove(thread).unwrap_or_default();
                threads.run(thread, move |tc| {
                    tc.unload_trace_context(&mut field);
                    Ok(Reply::Done)
                })?
            }
            Step::Sleep { ms } => {
                std::thread::sleep(Duration::from_millis(*ms));
                Ok(Reply::Done)
            }
            Step::Tick => {
                if let Some(reason) = self.controller.on_harvest_tick() {
                    info!("Harvest tick completed the active trace ({})", reason.as_str());
                }
                Ok(Reply::Done)
            }
            Step::End => {
                if let Some(id) = self.last_started {
                    self.controller.end_trace(id);
                }
                Ok(Reply::Done)
            }
            Step::Halt => {
                self.controller.halt();
                Ok(Reply::Done)
            }
        };

        if let Ok(Reply::Started(Some(id))) = reply {
            self.last_started = Some(id);
        }
        Ok(reply.map(drop))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TracerConfig;

    #[test]
    fn test_parse_defaults_thread_to_main() {
        let script = ReplayScript::parse(r#"{"steps": [{"op": "exit"}]}"#).unwrap();
        assert_eq!(script.steps, vec![Step::Exit { thread: "main".to_string() }]);
    }

    #[test]
    fn test_parse_rejects_empty_and_self_context() {
        assert!(matches!(
            ReplayScript::parse(r#"{"steps": []}"#),
            Err(ReplayError::ScriptParseFailed(_))
        ));
        assert!(matches!(
            ReplayScript::parse(
                r#"{"steps": [{"op": "enter", "name": "x", "thread": "a", "context_from": "a"}]}"#
            ),
            Err(ReplayError::ScriptParseFailed(_))
        ));
        assert!(matches!(ReplayScript::parse("{"), Err(ReplayError::Json(_))));
    }

    #[test]
    fn test_strict_mode_stops_at_failed_step() {
        let controller = TraceController::new(TracerConfig::default());
        let script = ReplayScript::parse(r#"{"steps": [{"op": "enter", "name": "orphan"}]}"#).unwrap();

        let err = replay(&controller, &script, ReplayOptions { strict: true }).unwrap_err();
        assert!(matches!(
            err,
            ReplayError::StepFailed { step: 0, source: TraceError::TracingInactive }
        ));
    }

    #[test]
    fn test_lenient_mode_records_failures() {
        let controller = TraceController::new(TracerConfig::default());
        let script = ReplayScript::parse(
            r#"{"steps": [
                {"op": "exit"},
                {"op": "start", "name": "Main"},
                {"op": "exit"}
            ]}"#,
        )
        .unwrap();

        let report = replay(&controller, &script, ReplayOptions::default()).unwrap();

        assert_eq!(report.steps_run, 3);
        assert_eq!(report.failed_steps, vec![(0, TraceError::TracingInactive)]);
        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.completed[0].trace.name(), "Display Main");
        assert!(!report.left_active);
    }
}
