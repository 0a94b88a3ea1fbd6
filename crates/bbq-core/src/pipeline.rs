//! Mailbox consumer: persist, then publish.
//!
//! The pipeline task drains the [`MailboxReceiver`], hands each measurement
//! to the optional [`TemperatureSink`] and then fans it out through the
//! [`Broadcaster`]. A persistence error is logged and counted and never
//! stops the loop.

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bbq_types::{Measurement, PROBE_COUNT};

use crate::broadcast::Broadcaster;
use crate::error::Result;
use crate::mailbox::MailboxReceiver;
use crate::metrics::PipelineMetrics;

/// Time-series persistence for measurements.
#[async_trait]
pub trait TemperatureSink: Send + Sync {
    /// Store one set of readings captured at `at`.
    ///
    /// Disconnected probes carry [`bbq_types::PROBE_DISCONNECTED`].
    async fn push_temperatures(&self, readings: &[i16; PROBE_COUNT], at: OffsetDateTime)
    -> Result<()>;
}

/// Drains the mailbox into the sink and the broadcaster.
pub struct Pipeline {
    broadcaster: Arc<Broadcaster>,
    metrics: Arc<PipelineMetrics>,
    sink: Option<Arc<dyn TemperatureSink>>,
    latest: watch::Sender<Option<Measurement>>,
}

impl Pipeline {
    /// Create a pipeline that only publishes.
    pub fn new(broadcaster: Arc<Broadcaster>, metrics: Arc<PipelineMetrics>) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            broadcaster,
            metrics,
            sink: None,
            latest,
        }
    }

    /// Persist every measurement to `sink` before publishing it.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn TemperatureSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Watch the most recent processed measurement.
    pub fn latest(&self) -> watch::Receiver<Option<Measurement>> {
        self.latest.subscribe()
    }

    /// Persist and publish a single measurement.
    pub async fn process(&self, measurement: Measurement) {
        if let Some(sink) = &self.sink
            && let Err(e) = sink
                .push_temperatures(&measurement.temperatures, measurement.captured_at)
                .await
        {
            self.metrics.record_persistence_failure();
            warn!(error = %e, "Failed to persist measurement");
        }

        self.latest.send_replace(Some(measurement));

        let observers = self.broadcaster.publish(measurement).await;
        self.metrics.record_published();
        debug!(observers, temperatures = ?measurement.temperatures, "Measurement published");
    }

    /// Process measurements until the mailbox closes or `token` is cancelled.
    ///
    /// Returns the number of measurements processed.
    pub async fn run(self, mut mailbox: MailboxReceiver, token: CancellationToken) -> u64 {
        let mut processed = 0u64;
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => {
                    info!(processed, "Pipeline cancelled");
                    break;
                }
                next = mailbox.drain() => next,
            };
            match next {
                Some(measurement) => {
                    self.process(measurement).await;
                    processed += 1;
                }
                None => {
                    info!(processed, "Mailbox closed, pipeline finished");
                    break;
                }
            }
        }
        processed
    }
}
