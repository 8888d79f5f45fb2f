//! The recorder seam
//!
//! A recorder is whatever actually watches the code run: a sampling profiler,
//! an instrumentation collector, or a canned tree replayed in tests. The
//! coordinator only needs to start it, stop it, and get back one call tree.

use crate::frame::CallTree;
use crate::render::SyntheticFrames;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// How the recorder attributes time on the recording thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingMode {
    /// Plain synchronous code: everything between start and stop belongs to
    /// the frames on the stack.
    #[default]
    Sync,
    /// Cooperatively scheduled code: time spent suspended at an await point is
    /// marked as such instead of being charged to the awaiting frame.
    Async,
}

impl RecordingMode {
    #[must_use]
    pub fn from_async(is_async: bool) -> Self {
        if is_async {
            RecordingMode::Async
        } else {
            RecordingMode::Sync
        }
    }
}

/// A source of captured call trees.
///
/// `start_recording` and `stop_recording` are always called in pairs on the
/// same thread, and recordings may nest (a fixture set up inside another
/// profiled region).
pub trait Recorder: Send + Sync {
    /// Token tying a `stop_recording` call to its `start_recording`.
    type Handle: Send;

    fn start_recording(&self, mode: RecordingMode) -> Self::Handle;

    /// Stop the recording and return what was captured.
    ///
    /// `None` means nothing was recorded (the region finished faster than the
    /// recorder could observe). This is not an error.
    fn stop_recording(&self, handle: Self::Handle) -> Option<CallTree>;

    /// Names of bookkeeping frames this recorder inserts into its trees.
    fn synthetic_frames(&self) -> SyntheticFrames {
        SyntheticFrames::default()
    }
}

/// Recorder handing back pre-captured trees, one per recording, in order.
///
/// Used to convert snapshots captured elsewhere and to script trees in tests.
/// Once the queue is empty every recording comes back empty.
#[derive(Debug, Default)]
pub struct ReplayRecorder {
    trees: Mutex<VecDeque<CallTree>>,
    synthetic: Option<SyntheticFrames>,
}

impl ReplayRecorder {
    pub fn new(trees: impl IntoIterator<Item = CallTree>) -> Self {
        Self {
            trees: Mutex::new(trees.into_iter().collect()),
            synthetic: None,
        }
    }

    /// Override the synthetic frame names reported to the renderer.
    #[must_use]
    pub fn with_synthetic_frames(mut self, synthetic: SyntheticFrames) -> Self {
        self.synthetic = Some(synthetic);
        self
    }

    /// Trees not yet handed out.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.trees.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Recorder for ReplayRecorder {
    type Handle = ();

    fn start_recording(&self, _mode: RecordingMode) {}

    fn stop_recording(&self, _handle: ()) -> Option<CallTree> {
        self.trees
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn synthetic_frames(&self) -> SyntheticFrames {
        self.synthetic.clone().unwrap_or_default()
    }
}
