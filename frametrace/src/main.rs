//! # frametrace - Main Entry Point
//!
//! Converts a captured call-tree snapshot into a trace file:
//! - `--input tree.json`: load, filter, render and report the event count
//! - `--input tree.json --perfetto trace.json`: also write the trace
//!
//! The snapshot goes through the same path as a live profiled region: it is
//! replayed by a recorder, bracketed by the session coordinator, filtered and
//! rendered, then handed to the collector.

use anyhow::{Context, Result};
use clap::Parser;
use frametrace::cli::Args;
use frametrace::domain::ConfigError;
use frametrace::export::{TraceCollector, TraceEventExporter};
use frametrace::frame::FrameSnapshot;
use frametrace::profiling::{RecordingMode, ReplayRecorder};
use frametrace_common::Args as EventArgs;
use log::{debug, info};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

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
    match err.downcast_ref::<ConfigError>() {
        Some(ConfigError::OutputIsDirectory(_)) => EXIT_USAGE,
        _ => EXIT_ERROR,
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let config = args.trace_config();
    // Fail before reading anything if the output cannot be written.
    config.validate()?;

    let snapshot = FrameSnapshot::from_file(&args.input)?;
    let tree = snapshot.to_tree();
    debug!("Loaded {} frames from {}", tree.len(), args.input.display());

    let profiler = config.profiler(ReplayRecorder::new([tree]));
    let collector = TraceCollector::new();
    collector.attach(&profiler);

    let batch = profiler
        .session(
            args.root_name.as_str(),
            RecordingMode::from_async(args.is_async),
            EventArgs::new(),
        )
        .finish()
        .with_context(|| format!("Failed to render call tree from {}", args.input.display()))?;
    info!("Rendered {} events", batch.len());

    match config.output() {
        Some(path) => {
            let written = collector
                .write(&TraceEventExporter::new(), path)
                .with_context(|| format!("Failed to write trace to {}", path.display()))?;
            if !args.quiet {
                println!("export: {} ({written} events)", path.display());
            }
        }
        None => {
            if !args.quiet {
                println!("events: {}", collector.len());
            }
        }
    }
    Ok(())
}
