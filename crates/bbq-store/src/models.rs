//! Data models for stored data.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use bbq_types::{Measurement, PROBE_COUNT, PROBE_DISCONNECTED};

/// A measurement stored in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMeasurement {
    /// Database row ID.
    pub id: i64,
    /// When the notification arrived.
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    /// Probe readings; disconnected probes hold [`PROBE_DISCONNECTED`].
    pub temperatures: [i16; PROBE_COUNT],
}

impl StoredMeasurement {
    /// Convert back to a [`Measurement`].
    pub fn to_measurement(&self) -> Measurement {
        Measurement::new(self.temperatures, self.captured_at)
    }

    pub(crate) fn from_columns(
        id: i64,
        captured_at: OffsetDateTime,
        probes: [Option<i16>; PROBE_COUNT],
    ) -> Self {
        Self {
            id,
            captured_at,
            temperatures: probes.map(|p| p.unwrap_or(PROBE_DISCONNECTED)),
        }
    }
}

impl From<StoredMeasurement> for Measurement {
    fn from(stored: StoredMeasurement) -> Self {
        stored.to_measurement()
    }
}

/// Column values for a measurement; the sentinel becomes `NULL`.
pub(crate) fn probe_columns(measurement: &Measurement) -> [Option<i16>; PROBE_COUNT] {
    measurement
        .temperatures
        .map(|t| (t != PROBE_DISCONNECTED).then_some(t))
}
