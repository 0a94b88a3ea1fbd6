//! Single-slot measurement handoff.
//!
//! The decoder runs inside a router subscription and must never block, or
//! it would back up that subscription's queue. [`MailboxSender::try_push`]
//! therefore never waits: if the previous measurement has not been drained
//! yet, the new one is discarded. The pending measurement is never
//! overwritten.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use bbq_types::Measurement;

use crate::metrics::PipelineMetrics;

/// Result of [`MailboxSender::try_push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The slot was empty and now holds the measurement.
    Delivered,
    /// The slot was occupied; the measurement was discarded.
    Dropped,
    /// The receiving side is gone.
    Closed,
}

/// Create a connected sender/receiver pair with a capacity of one.
pub fn mailbox() -> (MailboxSender, MailboxReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (
        MailboxSender { tx, metrics: None },
        MailboxReceiver { rx },
    )
}

/// Producer side of the mailbox. Cloning shares the same slot.
#[derive(Debug, Clone)]
pub struct MailboxSender {
    tx: mpsc::Sender<Measurement>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl MailboxSender {
    /// Count push outcomes in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Offer a measurement without waiting.
    pub fn try_push(&self, measurement: Measurement) -> PushOutcome {
        let outcome = match self.tx.try_send(measurement) {
            Ok(()) => PushOutcome::Delivered,
            Err(TrySendError::Full(dropped)) => {
                debug!(captured_at = %dropped.captured_at, "Mailbox occupied, dropping measurement");
                PushOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => PushOutcome::Closed,
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_push(outcome);
        }
        outcome
    }

    /// Whether the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of the mailbox.
#[derive(Debug)]
pub struct MailboxReceiver {
    rx: mpsc::Receiver<Measurement>,
}

impl MailboxReceiver {
    /// Wait for the next measurement and empty the slot.
    ///
    /// Returns `None` once every sender is gone and the slot is empty.
    pub async fn drain(&mut self) -> Option<Measurement> {
        self.rx.recv().await
    }

    /// Take the pending measurement, if any, without waiting.
    pub fn try_drain(&mut self) -> Option<Measurement> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn sample(first: i16) -> Measurement {
        Measurement::new([first, 0, 0, 0, 0, 0], OffsetDateTime::now_utc())
    }

    #[tokio::test]
    async fn test_second_push_is_dropped_until_drained() {
        let (tx, mut rx) = mailbox();

        assert_eq!(tx.try_push(sample(1)), PushOutcome::Delivered);
        assert_eq!(tx.try_push(sample(2)), PushOutcome::Dropped);

        assert_eq!(rx.drain().await.unwrap().temperatures[0], 1);
        assert_eq!(tx.try_push(sample(3)), PushOutcome::Delivered);
        assert_eq!(rx.drain().await.unwrap().temperatures[0], 3);
    }

    #[tokio::test]
    async fn test_pending_value_is_never_overwritten() {
        let (tx, mut rx) = mailbox();
        tx.try_push(sample(10));
        for t in 11..20 {
            assert_eq!(tx.try_push(sample(t)), PushOutcome::Dropped);
        }
        assert_eq!(rx.drain().await.unwrap().temperatures[0], 10);
        assert!(rx.try_drain().is_none());
    }

    #[tokio::test]
    async fn test_clones_share_the_slot() {
        let (tx, mut rx) = mailbox();
        let other = tx.clone();
        assert_eq!(tx.try_push(sample(1)), PushOutcome::Delivered);
        assert_eq!(other.try_push(sample(2)), PushOutcome::Dropped);
        assert_eq!(rx.try_drain().unwrap().temperatures[0], 1);
    }

    #[tokio::test]
    async fn test_drain_waits_for_push() {
        let (tx, mut rx) = mailbox();
        let consumer = tokio::spawn(async move { rx.drain().await });

        tokio::task::yield_now().await;
        assert!(!consumer.is_finished());

        tx.try_push(sample(42));
        let got = consumer.await.unwrap().unwrap();
        assert_eq!(got.temperatures[0], 42);
    }

    #[tokio::test]
    async fn test_closed_ends() {
        let (tx, mut rx) = mailbox();
        tx.try_push(sample(1));
        drop(tx);
        // the pending value is still delivered before the end
        assert!(rx.drain().await.is_some());
        assert!(rx.drain().await.is_none());

        let (tx, rx) = mailbox();
        drop(rx);
        assert!(tx.is_closed());
        assert_eq!(tx.try_push(sample(1)), PushOutcome::Closed);
    }

    #[tokio::test]
    async fn test_outcomes_are_counted() {
        let metrics = PipelineMetrics::shared();
        let (tx, mut rx) = mailbox();
        let tx = tx.with_metrics(Arc::clone(&metrics));

        tx.try_push(sample(1));
        tx.try_push(sample(2));
        rx.drain().await;
        tx.try_push(sample(3));

        let snap = metrics.snapshot();
        assert_eq!(snap.mailbox_delivered, 2);
        assert_eq!(snap.mailbox_dropped, 1);
    }
}
