//! Native thread → logical thread id mapping.
//!
//! The trace viewer draws one track per `tid`. OS thread ids are large and
//! meaningless to a reader, so every thread that enters a profiled region is
//! given the next small id instead: the first thread seen is `1`, the next `2`,
//! and so on. Ids are never reused or removed for the registry's lifetime.

use crate::domain::{CorrelationError, Tid};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

#[derive(Debug, Default)]
pub struct ThreadRegistry {
    ids: Mutex<HashMap<ThreadId, Tid>>,
}

impl ThreadRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn ids(&self) -> MutexGuard<'_, HashMap<ThreadId, Tid>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Logical id of `thread`, allocating the next one on first sight.
    pub fn resolve(&self, thread: ThreadId) -> Tid {
        let mut ids = self.ids();
        let next = Tid(u32::try_from(ids.len() + 1).unwrap_or(u32::MAX));
        *ids.entry(thread).or_insert(next)
    }

    /// Logical id of the calling thread.
    pub fn resolve_current(&self) -> Tid {
        self.resolve(thread::current().id())
    }

    /// Logical id of a thread that must already have been seen.
    ///
    /// # Errors
    /// Returns [`CorrelationError::MissingCorrelationData`] if `thread` never
    /// entered a profiled region.
    pub fn lookup(&self, thread: ThreadId) -> Result<Tid, CorrelationError> {
        self.ids()
            .get(&thread)
            .copied()
            .ok_or_else(|| CorrelationError::MissingCorrelationData {
                what: "thread id",
                thread: format!("{thread:?}"),
            })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    #[test]
    fn test_ids_start_at_one_and_are_stable() {
        let registry = ThreadRegistry::new();
        assert_eq!(registry.resolve_current(), Tid(1));
        assert_eq!(registry.resolve_current(), Tid(1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ids_assigned_in_first_seen_order() {
        let registry = ThreadRegistry::new();
        let main = registry.resolve_current();
        let other =
            thread::scope(|scope| scope.spawn(|| registry.resolve_current()).join().unwrap());
        assert_eq!(main, Tid(1));
        assert_eq!(other, Tid(2));
    }

    #[test]
    fn test_concurrent_resolves_get_distinct_dense_ids() {
        let registry = ThreadRegistry::new();
        let barrier = Barrier::new(8);
        let mut ids: Vec<u32> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        registry.resolve_current().0
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        ids.sort_unstable();
        assert_eq!(ids, (1..=8).collect::<Vec<u32>>());
    }

    #[test]
    fn test_lookup_of_unseen_thread_fails() {
        let registry = ThreadRegistry::new();
        let unseen = thread::scope(|scope| scope.spawn(|| thread::current().id()).join().unwrap());
        assert!(matches!(
            registry.lookup(unseen),
            Err(CorrelationError::MissingCorrelationData { .. })
        ));

        let tid = registry.resolve(unseen);
        assert_eq!(registry.lookup(unseen), Ok(tid));
    }
}
