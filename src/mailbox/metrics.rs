//! Atomic mailbox metrics.
//!
//! Lock-free counters shared between producers, the worker and status
//! probes. Queue depth is derived from the enqueue/dequeue counters
//! because an unbounded channel does not expose an exact length.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicU64, Ordering};

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

// Layer 3: Internal module imports
// (none)

/// Shared counters for one server's mailbox.
#[derive(Debug, Default)]
pub struct MailboxMetrics {
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
    last_message_at: RwLock<Option<DateTime<Utc>>>,
}

impl MailboxMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dequeued(&self) {
        self.dequeued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        *self.last_message_at.write() = Some(Utc::now());
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Envelopes accepted into the queue so far.
    pub fn enqueued_count(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Envelopes fully handled by the worker.
    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Envelopes discarded during shutdown drain.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Approximate number of envelopes waiting in the queue.
    pub fn queue_depth(&self) -> u64 {
        let enqueued = self.enqueued.load(Ordering::Relaxed);
        let dequeued = self.dequeued.load(Ordering::Relaxed);
        enqueued.saturating_sub(dequeued)
    }

    /// When the worker last finished handling an envelope.
    pub fn last_message_at(&self) -> Option<DateTime<Utc>> {
        *self.last_message_at.read()
    }
}
