//! Trace export functionality
//!
//! Collects finished event batches in memory and writes them out in the Trace
//! Event Format for visualization in Perfetto or chrome://tracing.

pub mod chrome_trace;
pub mod collector;

pub use chrome_trace::TraceEventExporter;
pub use collector::TraceCollector;
