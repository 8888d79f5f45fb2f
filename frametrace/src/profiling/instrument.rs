//! Instrumentation-based recorder with RAII frame guards.
//!
//! Instrumented code calls [`InstrumentingRecorder::enter`] at the top of each
//! function it wants to see in the trace. The returned [`FrameGuard`] closes the
//! frame when it drops, on any exit path.
//!
//! Frames go to the innermost active recording of the calling thread. A thread
//! with no active recording pays one lock and records nothing, so guards can be
//! left in code that is only sometimes profiled.
//!
//! Every recording's tree is rooted at a synthetic [`ROOT_FRAME`] spanning the
//! whole recording, with the top-level instrumented calls as its children.

use super::recorder::{Recorder, RecordingMode};
use crate::domain::FrameId;
use crate::frame::{CallFrame, CallTree};
use crate::render::{SyntheticFrames, AWAIT_FRAME};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Instant;

/// Identifier of the synthetic frame every recorded tree hangs from.
pub const ROOT_FRAME: &str = "[root]";

struct ActiveRecording {
    id: u64,
    mode: RecordingMode,
    started: Instant,
    tree: CallTree,
    /// Frames entered but not yet closed, innermost last.
    open: Vec<FrameId>,
}

impl ActiveRecording {
    fn close_through(&mut self, frame: FrameId) {
        let now = self.started.elapsed();
        while let Some(open) = self.open.pop() {
            if self.tree.close(open, now).is_err() {
                warn!("Open {open} vanished from recording {}", self.id);
            }
            if open == frame {
                break;
            }
        }
    }
}

/// Token returned by [`InstrumentingRecorder::start_recording`].
#[derive(Debug)]
pub struct RecordingHandle {
    id: u64,
    thread: ThreadId,
}

/// Records frames entered through [`enter`](Self::enter) while a recording is
/// active on the calling thread.
#[derive(Default)]
pub struct InstrumentingRecorder {
    next_id: AtomicU64,
    active: Mutex<HashMap<ThreadId, Vec<ActiveRecording>>>,
}

impl InstrumentingRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn active(&self) -> MutexGuard<'_, HashMap<ThreadId, Vec<ActiveRecording>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a frame in the calling thread's innermost recording.
    pub fn enter(&self, name: &str, file: Option<&str>, line: Option<u32>) -> FrameGuard<'_> {
        let thread = thread::current().id();
        let mut active = self.active();
        let Some(recording) = active.get_mut(&thread).and_then(|stack| stack.last_mut()) else {
            return FrameGuard::inert(self);
        };

        let offset = recording.started.elapsed();
        let mut frame = CallFrame::new(name).with_interval(offset, offset);
        if let Some(file) = file {
            frame = frame.with_location(file, line);
        }
        let parent = recording.open.last().copied().unwrap_or(recording.tree.root());
        match recording.tree.add_child(parent, frame) {
            Ok(id) => {
                recording.open.push(id);
                FrameGuard {
                    recorder: self,
                    slot: Some((thread, recording.id, id)),
                }
            }
            Err(e) => {
                warn!("Failed to record frame '{name}': {e}");
                FrameGuard::inert(self)
            }
        }
    }

    /// Mark a suspension point in async code.
    ///
    /// In [`RecordingMode::Async`] recordings this opens an [`AWAIT_FRAME`]
    /// that lasts until the guard drops; hold it across the `.await`. Sync
    /// recordings charge the wait to the enclosing frame and record nothing.
    pub fn await_point(&self) -> FrameGuard<'_> {
        let thread = thread::current().id();
        let is_async = self
            .active()
            .get(&thread)
            .and_then(|stack| stack.last())
            .is_some_and(|recording| recording.mode == RecordingMode::Async);
        if is_async {
            self.enter(AWAIT_FRAME, None, None)
        } else {
            FrameGuard::inert(self)
        }
    }

    fn close(&self, thread: ThreadId, recording_id: u64, frame: FrameId) {
        let mut active = self.active();
        let recording = active
            .get_mut(&thread)
            .and_then(|stack| stack.iter_mut().find(|r| r.id == recording_id));
        // The recording may already be stopped; its frames were closed then.
        if let Some(recording) = recording {
            if recording.open.contains(&frame) {
                recording.close_through(frame);
            }
        }
    }
}

impl Recorder for InstrumentingRecorder {
    type Handle = RecordingHandle;

    fn start_recording(&self, mode: RecordingMode) -> RecordingHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let thread = thread::current().id();
        self.active().entry(thread).or_default().push(ActiveRecording {
            id,
            mode,
            started: Instant::now(),
            tree: CallTree::new(CallFrame::new(ROOT_FRAME)),
            open: Vec::new(),
        });
        debug!("Started recording {id} ({mode:?}) on {thread:?}");
        RecordingHandle { id, thread }
    }

    fn stop_recording(&self, handle: RecordingHandle) -> Option<CallTree> {
        let mut active = self.active();
        let stack = active.get_mut(&handle.thread)?;
        let position = stack.iter().position(|r| r.id == handle.id)?;
        let mut recording = stack.remove(position);
        if stack.is_empty() {
            active.remove(&handle.thread);
        }
        drop(active);

        if let Some(&outermost) = recording.open.first() {
            recording.close_through(outermost);
        }
        let elapsed = recording.started.elapsed();
        let root = recording.tree.root();
        if recording.tree.close(root, elapsed).is_err() {
            return None;
        }
        let captured = recording
            .tree
            .get(root)
            .is_ok_and(|frame| !frame.children().is_empty());
        debug!(
            "Stopped recording {} after {elapsed:?} ({} frames)",
            handle.id,
            recording.tree.len() - 1
        );
        captured.then_some(recording.tree)
    }

    fn synthetic_frames(&self) -> SyntheticFrames {
        SyntheticFrames::default().with(ROOT_FRAME)
    }
}

/// Closes its frame on drop. Inert guards (no active recording) do nothing.
#[must_use = "the frame closes as soon as the guard is dropped"]
pub struct FrameGuard<'a> {
    recorder: &'a InstrumentingRecorder,
    slot: Option<(ThreadId, u64, FrameId)>,
}

impl<'a> FrameGuard<'a> {
    fn inert(recorder: &'a InstrumentingRecorder) -> Self {
        Self { recorder, slot: None }
    }

    /// Whether this guard is attached to a recording.
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.slot.is_some()
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if let Some((thread, recording, frame)) = self.slot.take() {
            self.recorder.close(thread, recording, frame);
        }
    }
}
