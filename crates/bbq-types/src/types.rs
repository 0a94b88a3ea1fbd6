//! Core types for thermometer measurements.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;

/// Number of temperature probes reported in every notification.
pub const PROBE_COUNT: usize = 6;

/// Reading reported for a probe that is unplugged or out of range.
///
/// The sensor signals this with a non-zero high byte; it is never a real
/// temperature.
pub const PROBE_DISCONNECTED: i16 = i16::MIN;

/// Minimum number of bytes required to parse a [`Measurement`].
pub const MIN_TEMPERATURE_BYTES: usize = PROBE_COUNT * 2;

/// One temperature notification from the thermometer.
///
/// Readings are in whole degrees as reported by the sensor. A probe that is
/// not connected reads [`PROBE_DISCONNECTED`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Measurement {
    /// Probe readings in channel order.
    pub temperatures: [i16; PROBE_COUNT],
    /// Arrival time of the notification (the device sends no timestamp).
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub captured_at: OffsetDateTime,
}

impl Measurement {
    /// Create a measurement from already-decoded readings.
    pub fn new(temperatures: [i16; PROBE_COUNT], captured_at: OffsetDateTime) -> Self {
        Self {
            temperatures,
            captured_at,
        }
    }

    /// Parse the temperature characteristic payload.
    ///
    /// The payload is six `(low, high)` byte pairs. When `high` is zero the
    /// reading is `low`; any other `high` marks the probe as disconnected and
    /// yields [`PROBE_DISCONNECTED`]. Bytes past the sixth pair are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InsufficientBytes`] if `data` contains fewer than
    /// [`MIN_TEMPERATURE_BYTES`] (12) bytes.
    #[must_use = "parsing returns a Result that should be handled"]
    pub fn from_bytes(data: &[u8], captured_at: OffsetDateTime) -> Result<Self, ParseError> {
        use bytes::Buf;

        if data.len() < MIN_TEMPERATURE_BYTES {
            return Err(ParseError::InsufficientBytes {
                expected: MIN_TEMPERATURE_BYTES,
                actual: data.len(),
            });
        }

        let mut buf = data;
        let mut temperatures = [PROBE_DISCONNECTED; PROBE_COUNT];
        for slot in temperatures.iter_mut() {
            let low = buf.get_u8();
            let high = buf.get_u8();
            if high == 0 {
                *slot = i16::from(low);
            }
        }

        Ok(Self {
            temperatures,
            captured_at,
        })
    }

    /// Reading of a single probe, or `None` if it is disconnected or the
    /// index is out of range.
    #[must_use]
    pub fn probe(&self, index: usize) -> Option<i16> {
        self.temperatures
            .get(index)
            .copied()
            .filter(|&t| t != PROBE_DISCONNECTED)
    }

    /// Number of probes currently reporting a temperature.
    #[must_use]
    pub fn connected_probes(&self) -> usize {
        self.temperatures
            .iter()
            .filter(|&&t| t != PROBE_DISCONNECTED)
            .count()
    }
}
