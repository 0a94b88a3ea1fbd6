//! Multi-observer fan-out of measurements.
//!
//! Each [`Observer`] owns a small bounded sink. [`Broadcaster::publish`]
//! captures the observer set under a read lock, releases it, and then offers
//! the measurement to every captured observer without waiting. An observer
//! whose sink is full misses that measurement; the others and the publisher
//! carry on. Subscribing and unsubscribing take the write lock briefly.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, trace};

use bbq_types::Measurement;

use crate::metrics::PipelineMetrics;

/// Default capacity of each observer's sink.
pub const DEFAULT_OBSERVER_BUFFER: usize = 1;

/// Identity of a subscribed observer, used for removal.
pub type ObserverId = u64;

/// Fans measurements out to a dynamic set of observers.
#[derive(Debug)]
pub struct Broadcaster {
    observers: RwLock<HashMap<ObserverId, mpsc::Sender<Measurement>>>,
    next_id: AtomicU64,
    buffer: usize,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    /// Create a broadcaster with [`DEFAULT_OBSERVER_BUFFER`] per observer.
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_OBSERVER_BUFFER)
    }

    /// Create a broadcaster whose observers buffer up to `buffer` measurements.
    ///
    /// A zero buffer is raised to one.
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            observers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
            metrics: None,
        }
    }

    /// Track the live observer count and per-observer drops in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Add a new observer.
    pub async fn subscribe(&self) -> Observer {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        self.observers.write().await.insert(id, tx);
        if let Some(metrics) = &self.metrics {
            metrics.observer_added();
        }
        debug!(id, "Observer subscribed");
        Observer { id, rx }
    }

    /// Remove an observer. Unknown ids are ignored.
    ///
    /// Returns whether the observer was present.
    pub async fn unsubscribe(&self, id: ObserverId) -> bool {
        let removed = self.observers.write().await.remove(&id).is_some();
        if removed {
            if let Some(metrics) = &self.metrics {
                metrics.observer_removed();
            }
            debug!(id, "Observer unsubscribed");
        }
        removed
    }

    /// Deliver `measurement` to every observer subscribed when the call starts.
    ///
    /// Never waits on an observer. One whose sink is full skips this
    /// measurement (counted as an observer drop); one whose receiver was
    /// dropped is removed. Returns the number of observers that accepted it.
    pub async fn publish(&self, measurement: Measurement) -> usize {
        let targets: Vec<(ObserverId, mpsc::Sender<Measurement>)> = self
            .observers
            .read()
            .await
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut accepted = 0;
        let mut dead = Vec::new();
        for (id, tx) in &targets {
            match tx.try_send(measurement) {
                Ok(()) => accepted += 1,
                Err(TrySendError::Full(_)) => {
                    trace!(id, "Observer is behind, measurement skipped");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_observer_drop();
                    }
                }
                Err(TrySendError::Closed(_)) => dead.push(*id),
            }
        }
        for id in dead {
            self.unsubscribe(id).await;
        }

        accepted
    }

    /// Number of subscribed observers.
    pub async fn observer_count(&self) -> usize {
        self.observers.read().await.len()
    }
}

/// A subscribed observer's receiving end.
#[derive(Debug)]
pub struct Observer {
    id: ObserverId,
    rx: mpsc::Receiver<Measurement>,
}

impl Observer {
    /// Identity to pass to [`Broadcaster::unsubscribe`].
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Wait for the next measurement.
    ///
    /// Returns `None` once the observer has been unsubscribed and its buffer
    /// is empty.
    pub async fn recv(&mut self) -> Option<Measurement> {
        self.rx.recv().await
    }

    /// Take a buffered measurement without waiting.
    pub fn try_recv(&mut self) -> Option<Measurement> {
        self.rx.try_recv().ok()
    }
}
