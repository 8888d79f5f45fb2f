//! # frametrace - Call-Tree Profiles as Trace Event Timelines
//!
//! frametrace turns the call trees captured while a test (or request handler)
//! runs into Trace Event Format JSON, viewable in Perfetto or
//! `chrome://tracing`. Each profiled region becomes a nested stack of
//! begin/end spans on the track of the thread that ran it.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │             Test harness / web framework / CLI                  │
//! │   lifecycle notifications           profiled regions            │
//! └──────────┬─────────────────────────────────┬────────────────────┘
//!            │                                 │
//!            ▼                                 ▼
//! ┌─────────────────────┐      ┌─────────────────────────────────────┐
//! │   TestRunTracer     │      │         Profiler (session)          │
//! │   (harness)         │      │  ThreadRegistry ─► logical tid      │
//! │                     │      │  Recorder ─► CallTree               │
//! │                     │      │  filter_excluded ─► Renderer        │
//! │                     │      │  Subscribers ─► batch fan-out       │
//! └──────────┬──────────┘      └──────────────────┬──────────────────┘
//!            │                                    │
//!            ▼                                    ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │            TraceCollector ─► TraceEventExporter ─► trace.json   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`frame`]: Arena call tree, harness-frame hoisting, JSON snapshots
//! - [`render`]: Depth-first rendering of a tree into begin/end events
//! - [`profiling`]: Recorder seam, scoped sessions, thread ids, subscribers
//! - [`export`]: In-memory collection and Trace Event Format output
//! - [`harness`]: Test-run lifecycle tracing
//! - [`routes`]: Profiled request handlers
//! - [`config`] / [`cli`]: Run configuration and command-line parsing
//! - [`domain`]: Identity types and error enums
//!
//! ## Typical Usage
//!
//! ```bash
//! # Convert a captured call tree into a trace file
//! frametrace --input tree.json --perfetto trace.json --exclude /opt/harness
//! ```

pub mod cli;
pub mod config;
pub mod domain;
pub mod export;
pub mod frame;
pub mod harness;
pub mod profiling;
pub mod render;
pub mod routes;
