//! Scoped profiling sessions.
//!
//! [`Profiler::session`] opens a region and returns a [`ScopedSession`] guard.
//! [`ScopedSession::finish`] closes the region and publishes its batch; if the
//! guard is dropped instead (an early return, or a panic unwinding through it)
//! the batch is published all the same:
//!
//! ```text
//! B <root_frame_name>          cat=test     entry wall-clock time
//!   B/E ... rendered frames    cat=runtime  entry + frame offsets
//! E                                         region end
//! B [dumping frames]           cat=pytest
//! E                                         rendering done
//! ```
//!
//! The last pair makes the cost of rendering itself visible in the trace.

use super::recorder::{Recorder, RecordingMode};
use super::subscribers::{EventBatch, Subscribers};
use super::thread_registry::ThreadRegistry;
use crate::domain::{FrameError, Pid, Tid, Timestamp};
use crate::frame::ExclusionRules;
use crate::render::{Renderer, SyntheticFrames};
use frametrace_common::{Args, Category, TraceEvent};
use log::{debug, error};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Name of the span covering the rendering of a captured tree.
pub const DUMPING_FRAMES: &str = "[dumping frames]";

/// Wall clock anchored at session entry that never runs backwards.
struct SessionClock {
    origin: Timestamp,
    started: Instant,
    floor: Timestamp,
}

impl SessionClock {
    fn start(origin: Timestamp) -> Self {
        Self {
            origin,
            started: Instant::now(),
            floor: origin,
        }
    }

    fn raise_floor(&mut self, at_least: Timestamp) {
        self.floor = self.floor.max(at_least);
    }

    fn now(&mut self) -> Timestamp {
        let now = self.origin.offset_by(self.started.elapsed());
        self.raise_floor(now);
        self.floor
    }
}

/// Coordinates profiled regions across threads and publishes their events.
///
/// Shared by reference (or `Arc`) between every thread that profiles; the
/// thread registry, the subscriber list and the per-thread clock floors are
/// the only shared state.
pub struct Profiler<R: Recorder> {
    recorder: R,
    threads: ThreadRegistry,
    subscribers: Subscribers,
    exclusions: ExclusionRules,
    renderer: Renderer,
    floors: Mutex<HashMap<Tid, Timestamp>>,
}

impl<R: Recorder> Profiler<R> {
    /// Create a profiler. The renderer skips the recorder's synthetic frames.
    pub fn new(recorder: R, exclusions: ExclusionRules) -> Self {
        let renderer = Renderer::new(recorder.synthetic_frames());
        Self {
            recorder,
            threads: ThreadRegistry::new(),
            subscribers: Subscribers::new(),
            exclusions,
            renderer,
            floors: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_pid(mut self, pid: Pid) -> Self {
        self.renderer = self.renderer.with_pid(pid);
        self
    }

    /// Replace the synthetic frame names taken from the recorder.
    #[must_use]
    pub fn with_synthetic_frames(mut self, synthetic: SyntheticFrames) -> Self {
        self.renderer = Renderer::new(synthetic).with_pid(self.renderer.pid());
        self
    }

    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    pub fn exclusions(&self) -> &ExclusionRules {
        &self.exclusions
    }

    pub fn pid(&self) -> Pid {
        self.renderer.pid()
    }

    pub fn synthetic_frames(&self) -> &SyntheticFrames {
        self.renderer.synthetic_frames()
    }

    /// Logical id of the calling thread, allocated on first use.
    pub fn current_tid(&self) -> Tid {
        self.threads.resolve_current()
    }

    /// Wall-clock time for an event on `tid`.
    ///
    /// A recorder may report frames that end after the wall clock reads at
    /// region close, so a published region can end slightly in the future.
    /// Stamps taken here never precede the last event published for `tid`.
    pub fn now_on(&self, tid: Tid) -> Timestamp {
        let now = Timestamp::now();
        self.floors().get(&tid).map_or(now, |floor| now.max(*floor))
    }

    fn floors(&self) -> MutexGuard<'_, HashMap<Tid, Timestamp>> {
        self.floors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn raise_floor(&self, tid: Tid, at_least: Timestamp) {
        let mut floors = self.floors();
        let floor = floors.entry(tid).or_insert(at_least);
        *floor = (*floor).max(at_least);
    }

    /// Register a batch consumer. Subscribe before recording starts.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&EventBatch) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback);
    }

    /// Publish a batch to every subscriber, returning how many accepted it.
    pub fn notify(&self, batch: &EventBatch) -> usize {
        self.subscribers.notify(batch)
    }

    /// Open a profiled region on the calling thread.
    pub fn session(
        &self,
        root_frame_name: impl Into<String>,
        mode: RecordingMode,
        args: Args,
    ) -> ScopedSession<'_, R> {
        let tid = self.threads.resolve_current();
        let clock = SessionClock::start(self.now_on(tid));
        let begin = TraceEvent::begin_with_args(
            root_frame_name,
            Category::TEST,
            clock.origin,
            self.pid(),
            tid,
            args,
        );
        let handle = self.recorder.start_recording(mode);
        debug!("Opened {mode:?} session on {tid}");
        ScopedSession {
            profiler: self,
            open: Some(OpenSession {
                handle,
                tid,
                clock,
                begin,
            }),
        }
    }

    /// Run `f` inside a profiled region. The region's events are published
    /// before this returns, also when `f` panics.
    ///
    /// # Errors
    /// Returns [`FrameError`] if the captured tree is malformed. The bracket
    /// events are published regardless and `f`'s value is dropped.
    pub fn profile<T>(
        &self,
        root_frame_name: impl Into<String>,
        mode: RecordingMode,
        args: Args,
        f: impl FnOnce() -> T,
    ) -> Result<T, FrameError> {
        let session = self.session(root_frame_name, mode, args);
        let value = f();
        session.finish().map(|_| value)
    }

    fn close(&self, open: OpenSession<R::Handle>) -> Result<EventBatch, FrameError> {
        let OpenSession {
            handle,
            tid,
            mut clock,
            begin,
        } = open;
        let pid = self.pid();
        let snapshot = self.recorder.stop_recording(handle);
        if let Some(tree) = &snapshot {
            clock.raise_floor(clock.origin.offset_by(tree.span_end()));
        }

        let region_end = TraceEvent::end(clock.now(), pid, tid);
        let dumping_begin =
            TraceEvent::begin(DUMPING_FRAMES, Category::HARNESS, clock.now(), pid, tid);
        let rendered = match snapshot {
            Some(mut tree) => self
                .renderer
                .render_filtered(&mut tree, &self.exclusions, clock.origin, tid),
            None => Ok(Vec::new()),
        };
        let dumping_end = TraceEvent::end(clock.now(), pid, tid);
        self.raise_floor(tid, dumping_end.timestamp());

        let (frames, failure) = match rendered {
            Ok(frames) => (frames, None),
            Err(e) => (Vec::new(), Some(e)),
        };
        let mut events = Vec::with_capacity(frames.len() + 4);
        events.push(begin);
        events.extend(frames);
        events.extend([region_end, dumping_begin, dumping_end]);

        let batch: EventBatch = Arc::from(events);
        let delivered = self.notify(&batch);
        debug!(
            "Closed session on {tid}: {} events to {delivered} subscriber(s)",
            batch.len()
        );
        match failure {
            Some(e) => Err(e),
            None => Ok(batch),
        }
    }
}

struct OpenSession<H> {
    handle: H,
    tid: Tid,
    clock: SessionClock,
    begin: TraceEvent,
}

/// An open profiled region.
///
/// Close it with [`finish`](Self::finish) to see rendering errors. Dropping
/// it unclosed, as happens when a panic unwinds through the region, still
/// publishes the batch but can only log a rendering error.
#[must_use = "the region closes as soon as the session is dropped"]
pub struct ScopedSession<'p, R: Recorder> {
    profiler: &'p Profiler<R>,
    open: Option<OpenSession<R::Handle>>,
}

impl<R: Recorder> ScopedSession<'_, R> {
    /// Logical thread id this region's events are stamped with.
    pub fn tid(&self) -> Option<Tid> {
        self.open.as_ref().map(|open| open.tid)
    }

    /// Close the region now and return the published batch.
    ///
    /// The bracket events are published even when rendering fails; the
    /// rendered frames are then left out and the error is returned.
    ///
    /// # Errors
    /// Returns [`FrameError`] if the captured tree is malformed.
    pub fn finish(mut self) -> Result<EventBatch, FrameError> {
        match self.open.take() {
            Some(open) => self.profiler.close(open),
            None => Ok(Arc::from(Vec::new())),
        }
    }
}

impl<R: Recorder> Drop for ScopedSession<'_, R> {
    fn drop(&mut self) {
        if let Some(open) = self.open.take() {
            if let Err(e) = self.profiler.close(open) {
                error!("Dropped rendered frames of a profiled region: {e}");
            }
        }
    }
}
