//! Event Intake Queue.
//!
//! A bounded queue that never blocks the producer: when it is full, the
//! oldest queued event is discarded to make room for the new one.  With the
//! default capacity of one, the consumer always sees the freshest frame and
//! never works through a backlog, at the price of skipping frames.
//!
//! Enqueue and dequeue each take the same mutex, so an overflow drop and a
//! concurrent pop cannot interleave.  A [`tokio::sync::Notify`] wakes a
//! consumer parked in [`IntakeQueue::notified`]; a push that happens while
//! nobody is waiting leaves a permit behind, so no wake-up is lost.  A second
//! notifier backs [`IntakeQueue::drained`] for callers waiting for the
//! backlog to empty.
//!
//! # Example
//!
//! ```rust
//! use permanence_middleware::intake::IntakeQueue;
//! use permanence_types::PerceptionEvent;
//!
//! let queue = IntakeQueue::default();
//! queue.push(PerceptionEvent::speech("asr", "explore"));
//! let newest = PerceptionEvent::speech("asr", "pause");
//! queue.push(newest.clone());
//!
//! assert_eq!(queue.len(), 1);
//! assert_eq!(queue.try_pop(), Some(newest));
//! assert_eq!(queue.dropped(), 1);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use permanence_types::{PerceptionEvent, UpdateKind};
use tokio::sync::Notify;
use tracing::debug;

/// Capacity used by the tracker: one slot.
pub const DEFAULT_INTAKE_CAPACITY: usize = 1;

struct Inner {
    capacity: usize,
    slots: Mutex<VecDeque<PerceptionEvent>>,
    ready: Notify,
    drained: Notify,
    dropped: AtomicU64,
}

/// Shared handle to the intake queue.  Clone it cheaply – all clones share
/// the same slots.
#[derive(Clone)]
pub struct IntakeQueue {
    inner: Arc<Inner>,
}

impl IntakeQueue {
    /// Create a queue holding at most `capacity` events (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                capacity,
                slots: Mutex::new(VecDeque::with_capacity(capacity)),
                ready: Notify::new(),
                drained: Notify::new(),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Upstream entry point: enqueue `event` only if it is an
    /// [`UpdateKind::Add`].  Returns whether the event was accepted.
    pub fn process_update(&self, kind: UpdateKind, event: PerceptionEvent) -> bool {
        if kind != UpdateKind::Add {
            debug!(event_id = %event.id, ?kind, "ignoring non-add update");
            return false;
        }
        self.push(event);
        true
    }

    /// Enqueue `event`, discarding the oldest queued event if full.
    pub fn push(&self, event: PerceptionEvent) {
        {
            let mut slots = self.lock();
            while slots.len() >= self.inner.capacity {
                if let Some(stale) = slots.pop_front() {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(event_id = %stale.id, "intake full; dropping oldest event");
                }
            }
            slots.push_back(event);
        }
        self.inner.ready.notify_one();
    }

    /// Dequeue the oldest event, if any.
    pub fn try_pop(&self) -> Option<PerceptionEvent> {
        let (event, empty) = {
            let mut slots = self.lock();
            (slots.pop_front(), slots.is_empty())
        };
        if empty {
            self.inner.drained.notify_waiters();
        }
        event
    }

    /// Discard everything queued and return how many events were dropped.
    pub fn clear(&self) -> usize {
        let n = {
            let mut slots = self.lock();
            let n = slots.len();
            slots.clear();
            n
        };
        self.inner.drained.notify_waiters();
        n
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Total events discarded by overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Resolve once a push has happened since the last wake-up.
    ///
    /// May resolve spuriously; callers re-check with
    /// [`try_pop`][Self::try_pop].
    pub async fn notified(&self) {
        self.inner.ready.notified().await
    }

    /// Resolve once the queue is empty.  An event the consumer has already
    /// taken may still be in progress.
    pub async fn drained(&self) {
        loop {
            let mut notified = std::pin::pin!(self.inner.drained.notified());
            // Register before checking so a pop in between is not missed.
            notified.as_mut().enable();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<PerceptionEvent>> {
        self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for IntakeQueue {
    fn default() -> Self {
        Self::new(DEFAULT_INTAKE_CAPACITY)
    }
}
