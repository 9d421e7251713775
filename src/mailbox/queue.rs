//! Unbounded MPSC mailbox over tokio channels.
//!
//! Enqueue never blocks; FIFO order is preserved per sender. The
//! receiving half is owned by the server's worker, which closes the
//! channel on shutdown and drains whatever is left.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use tokio::sync::mpsc;

// Layer 3: Internal module imports
use super::metrics::MailboxMetrics;
use crate::message::Envelope;
use crate::server::GenServer;

/// Create a connected mailbox pair sharing one metrics block.
pub(crate) fn mailbox<B: GenServer>(
    metrics: Arc<MailboxMetrics>,
) -> (MailboxSender<B>, Mailbox<B>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MailboxSender {
            tx,
            metrics: Arc::clone(&metrics),
        },
        Mailbox { rx, metrics },
    )
}

/// Producer half. Cloned into every handle and context.
pub(crate) struct MailboxSender<B: GenServer> {
    tx: mpsc::UnboundedSender<Envelope<B>>,
    metrics: Arc<MailboxMetrics>,
}

impl<B: GenServer> MailboxSender<B> {
    /// Enqueue an envelope. Returns `false` once the worker has closed
    /// the queue.
    pub(crate) fn send(&self, envelope: Envelope<B>) -> bool {
        match self.tx.send(envelope) {
            Ok(()) => {
                self.metrics.record_enqueued();
                true
            }
            Err(_) => false,
        }
    }
}

impl<B: GenServer> Clone for MailboxSender<B> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

/// Consumer half. Owned by the worker task.
pub(crate) struct Mailbox<B: GenServer> {
    rx: mpsc::UnboundedReceiver<Envelope<B>>,
    metrics: Arc<MailboxMetrics>,
}

impl<B: GenServer> Mailbox<B> {
    /// Wait for the next envelope. `None` once closed and drained.
    pub(crate) async fn recv(&mut self) -> Option<Envelope<B>> {
        let envelope = self.rx.recv().await?;
        self.metrics.record_dequeued();
        Some(envelope)
    }

    /// Non-blocking dequeue, used while draining during shutdown.
    pub(crate) fn try_recv(&mut self) -> Option<Envelope<B>> {
        let envelope = self.rx.try_recv().ok()?;
        self.metrics.record_dequeued();
        Some(envelope)
    }

    /// Stop accepting new envelopes. Already-queued envelopes remain
    /// available for draining.
    pub(crate) fn close(&mut self) {
        self.rx.close();
    }
}
