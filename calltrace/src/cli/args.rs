//! CLI argument definitions

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "calltrace",
    about = "Replay and inspect interaction traces",
    after_help = "\
EXAMPLES:
    calltrace replay checkout.json                     Print trace trees and hotspots
    calltrace replay checkout.json --export out.json   Also write a Chrome trace
    RUST_LOG=debug calltrace replay checkout.json      Log every controller decision"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Drive a trace controller from a JSON step script
    Replay(ReplayArgs),
}

#[derive(ClapArgs)]
pub struct ReplayArgs {
    /// Replay script (JSON)
    #[arg(value_name = "SCRIPT")]
    pub script: PathBuf,

    /// Export completed traces in Chrome Trace Event Format
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Tracer config file (JSON); flags below override it
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Idle time before a trace completes as healthy
    #[arg(long, value_name = "MS")]
    pub healthy_timeout_ms: Option<u64>,

    /// Age at which a trace completes as unhealthy
    #[arg(long, value_name = "MS")]
    pub unhealthy_timeout_ms: Option<u64>,

    /// Span limit per trace
    #[arg(long, value_name = "N")]
    pub max_spans: Option<usize>,

    /// Run the health check in the background at this period while replaying
    #[arg(long, value_name = "MS")]
    pub harvest_interval_ms: Option<u64>,

    /// Print per-method measurements aggregated over all completed traces
    #[arg(long)]
    pub measurements: bool,

    /// Fail on the first step whose operation fails
    #[arg(long)]
    pub strict: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}
