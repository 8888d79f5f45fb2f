//! CLI argument definitions

use crate::config::TraceConfig;
use crate::frame::ExclusionRules;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "frametrace",
    version,
    about = "Convert captured call trees into Perfetto / Chrome trace files",
    after_help = "\
EXAMPLES:
    frametrace --input tree.json                              Report the event count only
    frametrace --input tree.json --perfetto trace.json        Write a trace file
    frametrace --input tree.json --perfetto trace.json \\
        --exclude /usr/lib/python3/site-packages/_pytest     Hide harness frames"
)]
pub struct Args {
    /// The file path for the trace file (Trace Event Format JSON)
    #[arg(long, value_name = "FILE")]
    pub perfetto: Option<PathBuf>,

    /// Captured call-tree snapshot to convert (JSON)
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Remove frames whose file lives under PREFIX, promoting their children (repeatable)
    #[arg(long, value_name = "PREFIX")]
    pub exclude: Vec<PathBuf>,

    /// Treat frames named NAME as bookkeeping and render only their children (repeatable)
    #[arg(long, value_name = "NAME")]
    pub synthetic: Vec<String>,

    /// Name of the region wrapping the rendered frames
    #[arg(long, value_name = "NAME", default_value = "call")]
    pub root_name: String,

    /// Mark the region as recorded from async code
    #[arg(long = "async")]
    pub is_async: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Run configuration described by these arguments. Not yet validated.
    #[must_use]
    pub fn trace_config(&self) -> TraceConfig {
        let exclusions = ExclusionRules::new(self.exclude.iter().cloned());
        let mut config = TraceConfig::new().with_exclusions(exclusions);
        if let Some(path) = &self.perfetto {
            config = config.with_output(path);
        }
        self.synthetic
            .iter()
            .fold(config, |config, name| config.with_synthetic_frame(name.as_str()))
    }
}
