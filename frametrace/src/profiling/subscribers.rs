//! Fan-out of finished event batches.
//!
//! Subscribers are called synchronously, in registration order, on the thread
//! that closed the profiled region. A subscriber that returns an error or
//! panics is logged and skipped; the remaining subscribers still receive the
//! batch.

use frametrace_common::TraceEvent;
use log::warn;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

/// Events produced by one profiled region. Read-only once published.
pub type EventBatch = Arc<[TraceEvent]>;

type Callback = Arc<dyn Fn(&EventBatch) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
pub struct Subscribers {
    callbacks: RwLock<Vec<Callback>>,
}

impl Subscribers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&EventBatch) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `batch` to every subscriber. Returns how many accepted it.
    pub fn notify(&self, batch: &EventBatch) -> usize {
        // Snapshot the list so a callback may subscribe without deadlocking.
        let callbacks: Vec<Callback> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut delivered = 0;
        for (index, callback) in callbacks.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(batch))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(
                    "Subscriber #{index} failed on a batch of {} events: {e:#}",
                    batch.len()
                ),
                Err(_) => warn!(
                    "Subscriber #{index} panicked on a batch of {} events",
                    batch.len()
                ),
            }
        }
        delivered
    }
}
