//! Per-agent priority inbox.
//!
//! Envelopes are delivered exactly once: a duplicate envelope id is
//! dropped on push. Dequeue order is priority first, then arrival order
//! within a priority tier (a monotonic sequence number breaks ties, so
//! two envelopes at the same priority never reorder).

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::core::envelope::{Envelope, EnvelopeId, Priority};
use crate::error::{Error, Result};

struct QueuedEnvelope {
    envelope: Envelope,
    seq: u64,
}

impl PartialEq for QueuedEnvelope {
    fn eq(&self, other: &Self) -> bool {
        self.envelope.priority == other.envelope.priority && self.seq == other.seq
    }
}

impl Eq for QueuedEnvelope {}

impl Ord for QueuedEnvelope {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority wins, then lower seq (earlier arrival).
        self.envelope
            .priority
            .cmp(&other.envelope.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedEnvelope {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct InboxInner {
    heap: BinaryHeap<QueuedEnvelope>,
    /// Ids of every envelope ever accepted, for duplicate suppression.
    seen: HashSet<EnvelopeId>,
}

/// A single agent's mailbox. Cheap to clone; all clones share the queue.
#[derive(Clone)]
pub struct Inbox {
    inner: Arc<Mutex<InboxInner>>,
    seq: Arc<AtomicU64>,
    notify: Arc<Notify>,
}

impl Inbox {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(InboxInner {
                heap: BinaryHeap::new(),
                seen: HashSet::new(),
            })),
            seq: Arc::new(AtomicU64::new(0)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Enqueue an envelope. Returns false when the envelope id was
    /// already delivered (duplicate suppressed).
    pub fn push(&self, envelope: Envelope) -> bool {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !inner.seen.insert(envelope.id) {
            return false;
        }
        let seq = self.seq.fetch_add(1, AtomicOrdering::SeqCst);
        inner.heap.push(QueuedEnvelope { envelope, seq });
        drop(inner);
        self.notify.notify_one();
        true
    }

    /// Put a previously dequeued envelope back. Bypasses the duplicate
    /// guard (the id is already marked seen) and re-enters the queue at
    /// the tail of its priority tier.
    pub fn requeue(&self, envelope: Envelope) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.seen.insert(envelope.id);
        let seq = self.seq.fetch_add(1, AtomicOrdering::SeqCst);
        inner.heap.push(QueuedEnvelope { envelope, seq });
        drop(inner);
        self.notify.notify_one();
    }

    /// Dequeue the highest-priority envelope, or `Err(Empty)` when the
    /// inbox has nothing pending.
    pub fn try_recv(&self) -> Result<Envelope> {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner
            .heap
            .pop()
            .map(|q| q.envelope)
            .ok_or(Error::Empty)
    }

    /// Wait for the next envelope. Returns as soon as one is available.
    pub async fn recv(&self) -> Envelope {
        loop {
            let notified = self.notify.notified();
            if let Ok(env) = self.try_recv() {
                return env;
            }
            notified.await;
        }
    }

    /// Number of pending envelopes.
    pub fn depth(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.heap.len(),
            Err(poisoned) => poisoned.into_inner().heap.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    /// Priority of the envelope that would be dequeued next, if any.
    pub fn peek_priority(&self) -> Option<Priority> {
        match self.inner.lock() {
            Ok(guard) => guard.heap.peek().map(|q| q.envelope.priority),
            Err(poisoned) => poisoned.into_inner().heap.peek().map(|q| q.envelope.priority),
        }
    }
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new()
    }
}
