//! # calltrace - Main Entry Point
//!
//! `calltrace replay SCRIPT` drives a trace controller from a JSON step
//! script, then prints each completed interaction trace as a call tree with
//! its hotspots. `--export` additionally writes a Chrome trace for Perfetto.

use anyhow::{Context, Result};
use calltrace::analysis::{analyze_hotspots, MeasurementAggregator};
use calltrace::cli::{Args, Command, ReplayArgs};
use calltrace::config::TracerConfig;
use calltrace::domain::ReplayError;
use calltrace::engine::{InteractionTrace, Span, TraceController};
use calltrace::export::ChromeTraceExporter;
use calltrace::harvest::HarvestLoop;
use calltrace::replay::{replay, ReplayOptions, ReplayReport, ReplayScript};
use clap::Parser;
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

/// Hotspots shown per trace
const TOP_HOTSPOTS: usize = 10;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = err.to_string().to_lowercase();
    if msg.contains("invalid config") || msg.contains("failed to parse replay script") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    match args.command {
        Command::Replay(replay_args) => run_replay(&replay_args),
    }
}

/// Config file first, then individual flag overrides
fn load_config(args: &ReplayArgs) -> Result<TracerConfig> {
    let mut config = match &args.config {
        Some(path) => TracerConfig::from_file(path)?,
        None => TracerConfig::default(),
    };
    if let Some(ms) = args.healthy_timeout_ms {
        config.healthy_timeout_ms = ms;
    }
    if let Some(ms) = args.unhealthy_timeout_ms {
        config.unhealthy_timeout_ms = ms;
    }
    if let Some(max) = args.max_spans {
        config.max_spans = max;
    }
    if let Some(ms) = args.harvest_interval_ms {
        config.harvest_interval_ms = ms;
    }
    Ok(config)
}

/// Read and validate a script; unreadable files are not usage errors
fn load_script(path: &Path) -> Result<ReplayScript> {
    ReplayScript::from_file(path).map_err(|err| {
        let context = match err {
            ReplayError::Io(_) => format!("Failed to read replay script {}", path.display()),
            _ => format!("Failed to parse replay script {}", path.display()),
        };
        anyhow::Error::new(err).context(context)
    })
}

fn run_replay(args: &ReplayArgs) -> Result<()> {
    let config = load_config(args)?;
    let script = load_script(&args.script)?;

    // The harvest loop only runs when asked for; scripted `tick` steps cover
    // the deterministic case.
    let harvest_interval = args.harvest_interval_ms.map(|_| config.harvest_interval());
    let controller = Arc::new(TraceController::new(config));
    let aggregator = MeasurementAggregator::new();
    controller.add_listener(&aggregator);
    let exporter = args.export.as_ref().map(|_| ChromeTraceExporter::new());
    if let Some(exporter) = &exporter {
        controller.add_listener(exporter);
    }

    let harvest = match harvest_interval {
        Some(interval) => Some(HarvestLoop::spawn(Arc::clone(&controller), interval)?),
        None => None,
    };
    let report = replay(&controller, &script, ReplayOptions { strict: args.strict });
    if let Some(harvest) = harvest {
        info!("Harvest loop completed {} traces", harvest.stop());
    }
    let report = report?;

    if !args.quiet {
        print_report(&report);
        if args.measurements {
            print_measurements(&aggregator);
        }
    }

    if report.left_active {
        warn!("A trace was still active when the script ended; it was not reported");
    }
    for (step, err) in &report.failed_steps {
        warn!("step {step}: {err}");
    }

    if let (Some(path), Some(exporter)) = (&args.export, &exporter) {
        exporter
            .export_to_file(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Exported {} spans to {}", exporter.event_count(), path.display());
        if !args.quiet {
            println!("Exported {} traces to {}", exporter.trace_count(), path.display());
        }
    }

    let completions = aggregator.completions();
    if !completions.is_empty() {
        let summary: Vec<String> =
            completions.iter().map(|(reason, count)| format!("{reason}={count}")).collect();
        info!("Completions: {}", summary.join(" "));
    }
    let stats = controller.stats().snapshot();
    info!("Supportability: {stats:?}");
    Ok(())
}

fn print_report(report: &ReplayReport) {
    println!(
        "Replayed {} steps, {} failed, {} traces completed",
        report.steps_run,
        report.failed_steps.len(),
        report.completed.len()
    );

    for completed in &report.completed {
        let trace = &completed.trace;
        println!();
        println!(
            "TRACE  {} ({}, {:.2}ms, {} spans)",
            trace.name(),
            completed.reason.as_str(),
            trace.duration().unwrap_or_default().as_millis(),
            trace.span_count()
        );
        println!("{}", "─".repeat(60));
        print_span(trace, trace.root(), 0);

        let hotspots = analyze_hotspots(trace);
        if !hotspots.is_empty() {
            println!();
            println!("HOTSPOTS");
            for hotspot in hotspots.iter().take(TOP_HOTSPOTS) {
                println!(
                    "  {:<32} {:>10.2}ms {:>6.1}%  x{}",
                    hotspot.name,
                    hotspot.exclusive_time.as_millis(),
                    hotspot.percentage,
                    hotspot.calls
                );
            }
        }
    }
}

fn print_measurements(aggregator: &MeasurementAggregator) {
    println!();
    println!("MEASUREMENTS  ({} traces)", aggregator.traces());
    for (scope, name, stats) in aggregator.ranked() {
        println!(
            "  {:<32} {:>10.2}ms excl {:>10.2}ms total  x{}  [{}]",
            name,
            stats.exclusive_time.as_millis(),
            stats.total_time.as_millis(),
            stats.count,
            scope
        );
    }
}

fn print_span(trace: &InteractionTrace, span: &Span, depth: usize) {
    let total = span
        .total_duration()
        .map_or_else(|| "open".to_string(), |d| format!("{:.2}ms", d.as_millis()));
    println!(
        "{:indent$}{} [{}] {} (self {:.2}ms) @{}",
        "",
        span.display_name(),
        span.kind().as_str(),
        total,
        span.exclusive_time().as_millis(),
        span.thread_name(),
        indent = depth * 2
    );
    for child in trace.children(span) {
        print_span(trace, child, depth + 1);
    }
}
