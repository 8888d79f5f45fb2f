//! Profiled request handlers
//!
//! Wraps a web endpoint so every request it serves becomes a profiled region
//! named after the endpoint. Requests served by different worker threads show
//! up on their own tracks, each with its own logical thread id.
//!
//! ```text
//! router.route("/items", profiled(profiler, "read_items", read_items))
//!
//! TID:1  [read_items][dumping frames]      [read_items][dumping frames]
//! TID:2            [read_items][dumping frames]
//! ```

use crate::domain::FrameError;
use crate::profiling::{Profiler, Recorder, RecordingMode};
use frametrace_common::Args;
use std::future::Future;
use std::sync::Arc;

/// Wrap a synchronous handler so each call runs in a region named `endpoint`.
///
/// The handler's result comes back wrapped in `Ok`, or as the [`FrameError`]
/// that made its region unrenderable. A panic in the handler propagates after
/// the region's events are published.
pub fn profiled<R, A, T, F>(
    profiler: Arc<Profiler<R>>,
    endpoint: impl Into<String>,
    handler: F,
) -> impl Fn(A) -> Result<T, FrameError> + Send + Sync
where
    R: Recorder,
    F: Fn(A) -> T + Send + Sync,
{
    let endpoint = endpoint.into();
    move |request| {
        profiler.profile(endpoint.as_str(), RecordingMode::Sync, Args::new(), || {
            handler(request)
        })
    }
}

/// Drive an async handler's future inside a region named `endpoint`, with
/// the recorder in async mode.
///
/// # Errors
/// Returns [`FrameError`] if the region's captured call tree is malformed.
pub async fn profiled_async<R, Fut>(
    profiler: &Profiler<R>,
    endpoint: &str,
    handler: Fut,
) -> Result<Fut::Output, FrameError>
where
    R: Recorder,
    Fut: Future,
{
    let session = profiler.session(endpoint, RecordingMode::Async, Args::new());
    let output = handler.await;
    session.finish().map(|_| output)
}
