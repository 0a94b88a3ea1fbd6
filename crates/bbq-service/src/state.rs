//! Application state shared across handlers.
//!
//! Live measurements reach WebSocket clients through the core
//! [`Broadcaster`]: every connection owns one observer with a small bounded
//! buffer, so a slow client misses measurements instead of holding up the
//! others. The latest measurement is kept in a `watch` channel fed by the
//! pipeline and served to new clients and `/api/latest`.

use std::sync::Arc;

use bbq_core::{Broadcaster, Measurement, PROBE_COUNT, PipelineMetrics};
use bbq_store::Store;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{Mutex, watch};

use crate::config::Config;

/// The store as shared between the pipeline sink and the API.
pub type SharedStore = Arc<Mutex<Store>>;

/// Shared application state.
pub struct AppState {
    /// Effective configuration.
    pub config: Config,
    /// Fan-out to WebSocket viewers.
    pub broadcaster: Arc<Broadcaster>,
    /// Pipeline counters.
    pub metrics: Arc<PipelineMetrics>,
    /// Most recent processed measurement.
    pub latest: watch::Receiver<Option<Measurement>>,
    /// The data store, absent when storage is disabled.
    pub store: Option<SharedStore>,
    /// When the service started.
    pub started_at: OffsetDateTime,
}

impl AppState {
    /// Create new application state.
    pub fn new(
        config: Config,
        broadcaster: Arc<Broadcaster>,
        metrics: Arc<PipelineMetrics>,
        latest: watch::Receiver<Option<Measurement>>,
        store: Option<SharedStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            broadcaster,
            metrics,
            latest,
            store,
            started_at: OffsetDateTime::now_utc(),
        })
    }

    /// The most recent processed measurement, if any.
    pub fn latest_measurement(&self) -> Option<Measurement> {
        *self.latest.borrow()
    }
}

/// A measurement as sent to HTTP and WebSocket clients.
///
/// Disconnected probes are `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementEvent {
    /// Probe readings in channel order.
    pub temperatures: [Option<i16>; PROBE_COUNT],
    /// Number of connected probes.
    pub connected: usize,
    /// Arrival time of the notification.
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
}

impl From<Measurement> for MeasurementEvent {
    fn from(m: Measurement) -> Self {
        let mut temperatures = [None; PROBE_COUNT];
        for (i, slot) in temperatures.iter_mut().enumerate() {
            *slot = m.probe(i);
        }
        Self {
            temperatures,
            connected: m.connected_probes(),
            captured_at: m.captured_at,
        }
    }
}
