//! Per-server mailbox: an unbounded MPSC queue with atomic metrics.
//!
//! Producers (call/cast sites, timers, supervisors) enqueue envelopes
//! concurrently; the single worker for the server is the only consumer.

pub mod metrics;
pub mod queue;

pub use metrics::MailboxMetrics;
pub(crate) use queue::{mailbox, Mailbox, MailboxSender};
