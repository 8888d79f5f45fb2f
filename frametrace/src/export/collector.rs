//! In-memory event sink
//!
//! A [`TraceCollector`] accumulates every event of a run, in arrival order,
//! until the run ends and the whole trace is written at once. Clones share the
//! same buffer, so one clone can be handed to the profiler as a subscriber
//! while another is kept for appending harness events and writing the file.

use super::chrome_trace::TraceEventExporter;
use crate::domain::ExportError;
use crate::profiling::{EventBatch, Profiler, Recorder};
use frametrace_common::TraceEvent;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Default)]
pub struct TraceCollector {
    events: Arc<Mutex<Vec<TraceEvent>>>,
}

impl TraceCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn events(&self) -> MutexGuard<'_, Vec<TraceEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe this collector to every batch `profiler` publishes.
    pub fn attach<R: Recorder>(&self, profiler: &Profiler<R>) {
        let sink = self.clone();
        profiler.subscribe(move |batch: &EventBatch| {
            sink.extend(batch);
            Ok(())
        });
    }

    pub fn push(&self, event: TraceEvent) {
        self.events().push(event);
    }

    pub fn extend(&self, events: &[TraceEvent]) {
        self.events().extend_from_slice(events);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events().is_empty()
    }

    /// Copy of everything collected so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TraceEvent> {
        self.events().clone()
    }

    /// Write everything collected so far to `path`.
    ///
    /// # Errors
    /// Returns [`ExportError`] if the file cannot be written.
    pub fn write(&self, exporter: &TraceEventExporter, path: &Path) -> Result<usize, ExportError> {
        let events = self.snapshot();
        exporter.write_to_path(&events, path)?;
        Ok(events.len())
    }
}
