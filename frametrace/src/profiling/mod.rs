//! Profiling core modules
//!
//! Everything between "a region starts" and "a batch of events is published":
//! - The recorder seam and its two implementations (instrumentation, replay)
//! - Logical thread id allocation
//! - Scoped sessions that bracket, render and publish each region
//! - Subscriber fan-out

pub mod instrument;
pub mod recorder;
pub mod session;
pub mod subscribers;
pub mod thread_registry;

pub use instrument::{FrameGuard, InstrumentingRecorder, RecordingHandle, ROOT_FRAME};
pub use recorder::{Recorder, RecordingMode, ReplayRecorder};
pub use session::{Profiler, ScopedSession, DUMPING_FRAMES};
pub use subscribers::{EventBatch, Subscribers};
pub use thread_registry::ThreadRegistry;
