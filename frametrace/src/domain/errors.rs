//! Structured error types for frametrace
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::{FrameId, Tid};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures of the frame filter and renderer.
///
/// None of these are expected for trees produced by a recorder; they signal a
/// broken caller contract and are fatal to the operation that hit them.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("The root frame '{identifier}' cannot be hoisted")]
    RootCannotBeHoisted { identifier: String },

    #[error("{0} does not exist in this call tree")]
    UnknownFrame(FrameId),

    #[error("{child} is not listed among the children of its parent {parent}")]
    NotAChild { parent: FrameId, child: FrameId },

    #[error("Frame '{identifier}' closes at {close:?}, before it opens at {open:?}")]
    InvertedInterval {
        identifier: String,
        open: Duration,
        close: Duration,
    },
}

/// A correlation lookup in the coordinating layer found nothing.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("No {what} start was recorded for thread {thread}")]
    MissingCorrelationData { what: &'static str, thread: String },

    #[error("Span '{what}' closed on {tid} while '{open}' was still open")]
    MismatchedSpan {
        what: &'static str,
        open: &'static str,
        tid: Tid,
    },
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write trace file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("The provided path must not be a directory: {0}")]
    OutputIsDirectory(PathBuf),

    #[error("Failed to read call-tree snapshot {path}: {source}")]
    SnapshotUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid call-tree snapshot {path}: {source}")]
    SnapshotInvalid {
        path: PathBuf,
        source: serde_json::Error,
    },
}
