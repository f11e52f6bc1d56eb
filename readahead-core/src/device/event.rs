//! Cross-stream completion events
//!
//! An event is recorded into one stream and waited on from another. A wait
//! resolves against the most recent record enqueued before it, mirroring
//! how device runtimes order work across streams. A fault travels with the
//! record that carried it; later healthy records of the same event are clean.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use super::types::StreamId;

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

struct EventInner {
    id: u64,
    /// Records handed to a stream so far
    enqueued: AtomicU64,
    /// Highest record target executed
    completed: watch::Sender<u64>,
    /// Record targets executed by a faulted stream
    faulted: Mutex<BTreeMap<u64, StreamId>>,
}

/// Completion event shared between streams
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    /// Create a new event with nothing recorded
    pub fn new() -> Self {
        let (completed, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(EventInner {
                id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
                enqueued: AtomicU64::new(0),
                completed,
                faulted: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Reserve the target for a record being enqueued
    pub(crate) fn next_target(&self) -> u64 {
        self.inner.enqueued.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Target a wait enqueued now must reach
    pub(crate) fn pending_target(&self) -> u64 {
        self.inner.enqueued.load(Ordering::Acquire)
    }

    /// Mark a record as executed
    pub(crate) fn complete(&self, target: u64) {
        self.inner.completed.send_modify(|current| {
            if target > *current {
                *current = target;
            }
        });
    }

    /// Suspend until the record with `target` has executed
    pub(crate) async fn wait_for(&self, target: u64) {
        if target == 0 {
            return;
        }
        let mut receiver = self.inner.completed.subscribe();
        // The sender lives as long as `self`, so this cannot observe a close.
        let _ = receiver.wait_for(|done| *done >= target).await;
    }

    pub(crate) fn mark_faulted(&self, target: u64, stream: StreamId) {
        self.inner.faulted.lock().insert(target, stream);
    }

    /// Faulted stream behind record `target`, if it was skipped
    pub(crate) fn faulted_at(&self, target: u64) -> Option<StreamId> {
        self.inner.faulted.lock().get(&target).copied()
    }

    /// First stream that recorded this event while faulted, if any
    pub fn faulted_by(&self) -> Option<StreamId> {
        self.inner.faulted.lock().values().next().copied()
    }

    /// True once every record enqueued so far has executed
    pub fn query(&self) -> bool {
        *self.inner.completed.borrow() >= self.pending_target()
    }

    /// Wait for every record enqueued so far
    pub async fn synchronize(&self) {
        self.wait_for(self.pending_target()).await;
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.inner.id)
            .field("enqueued", &self.pending_target())
            .field("completed", &*self.inner.completed.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_resolves_on_record() {
        let event = Event::new();
        assert!(event.query());

        let target = event.next_target();
        assert!(!event.query());

        let waiter = {
            let event = event.clone();
            tokio::spawn(async move { event.wait_for(target).await })
        };
        event.complete(target);
        waiter.await.unwrap();
        assert!(event.query());
    }

    #[test]
    fn test_fault_stays_with_its_record() {
        let event = Event::new();
        let first = event.next_target();
        let second = event.next_target();
        event.mark_faulted(first, 7);
        event.complete(second);

        assert_eq!(event.faulted_at(first), Some(7));
        assert_eq!(event.faulted_at(second), None);
        assert_eq!(event.faulted_by(), Some(7));
    }
}
