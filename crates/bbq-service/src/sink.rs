//! Persistence sink backed by the SQLite store.

use async_trait::async_trait;
use bbq_core::{Measurement, PROBE_COUNT, TemperatureSink};
use time::OffsetDateTime;

use crate::state::SharedStore;

/// Writes every processed measurement to the [`bbq_store::Store`].
#[derive(Clone)]
pub struct StoreSink {
    store: SharedStore,
}

impl StoreSink {
    /// Create a sink writing to `store`.
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TemperatureSink for StoreSink {
    async fn push_temperatures(
        &self,
        readings: &[i16; PROBE_COUNT],
        at: OffsetDateTime,
    ) -> bbq_core::Result<()> {
        let store = self.store.lock().await;
        store
            .insert_measurement(&Measurement::new(*readings, at))
            .map(|_| ())
            .map_err(|e| bbq_core::Error::Persistence(e.to_string()))
    }
}
