//! Platform-agnostic types for six-probe BLE BBQ thermometers.
//!
//! This crate provides the measurement type and protocol constants shared by
//! the transport-facing core (bbq-core), the persistence layer and the
//! service.
//!
//! # Features
//!
//! - [`Measurement`] with the sensor's disconnected-probe sentinel
//! - UUID constants for the vendor GATT service
//! - Error types for payload parsing
//!
//! # Example
//!
//! ```
//! use bbq_types::{Measurement, PROBE_DISCONNECTED};
//! use time::OffsetDateTime;
//!
//! let bytes = [0x14, 0x00, 0x00, 0x01, 0x05, 0x00, 0, 0, 0, 0, 0, 0];
//! let m = Measurement::from_bytes(&bytes, OffsetDateTime::now_utc()).unwrap();
//! assert_eq!(m.temperatures[0], 20);
//! assert_eq!(m.temperatures[1], PROBE_DISCONNECTED);
//! ```

pub mod error;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{MIN_TEMPERATURE_BYTES, Measurement, PROBE_COUNT, PROBE_DISCONNECTED};
pub use uuid as uuids;

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn at() -> time::OffsetDateTime {
        datetime!(2024-06-01 12:00:00 UTC)
    }

    // --- Measurement parsing tests ---

    #[test]
    fn test_parse_mixed_probes() {
        let bytes: [u8; 12] = [
            0x14, 0x00, // probe 1 = 20
            0x00, 0x01, // probe 2 disconnected (high byte set)
            0x05, 0x00, // probe 3 = 5
            0x00, 0x00, // probe 4 = 0
            0x00, 0x00, // probe 5 = 0
            0x00, 0x00, // probe 6 = 0
        ];

        let m = Measurement::from_bytes(&bytes, at()).unwrap();

        assert_eq!(m.temperatures, [20, PROBE_DISCONNECTED, 5, 0, 0, 0]);
        assert_eq!(m.captured_at, at());
    }

    #[test]
    fn test_parse_low_byte_is_unsigned() {
        // 0xFF with a zero high byte is 255, never negative
        let bytes: [u8; 12] = [0xFF, 0x00, 0x80, 0x00, 0, 0, 0, 0, 0, 0, 0, 0];

        let m = Measurement::from_bytes(&bytes, at()).unwrap();
        assert_eq!(m.temperatures[0], 255);
        assert_eq!(m.temperatures[1], 128);
    }

    #[test]
    fn test_parse_all_disconnected() {
        let bytes: [u8; 12] = [
            0xF6, 0xFF, 0xF6, 0xFF, 0xF6, 0xFF, 0xF6, 0xFF, 0xF6, 0xFF, 0xF6, 0xFF,
        ];

        let m = Measurement::from_bytes(&bytes, at()).unwrap();
        assert_eq!(m.temperatures, [PROBE_DISCONNECTED; PROBE_COUNT]);
        assert_eq!(m.connected_probes(), 0);
    }

    #[test]
    fn test_parse_insufficient_bytes() {
        let bytes: [u8; 11] = [0; 11];

        let err = Measurement::from_bytes(&bytes, at()).unwrap_err();
        assert_eq!(
            err,
            ParseError::InsufficientBytes {
                expected: 12,
                actual: 11
            }
        );
        assert!(err.to_string().contains("requires 12 bytes"));
    }

    #[test]
    fn test_parse_empty() {
        assert!(Measurement::from_bytes(&[], at()).is_err());
    }

    #[test]
    fn test_parse_extra_bytes_ignored() {
        let mut bytes = vec![0x19, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        bytes.extend_from_slice(&[0xAA, 0xBB, 0xCC]);

        let m = Measurement::from_bytes(&bytes, at()).unwrap();
        assert_eq!(m.temperatures[0], 25);
    }

    #[test]
    fn test_probe_accessor() {
        let m = Measurement::new([20, PROBE_DISCONNECTED, 5, 0, 0, 0], at());

        assert_eq!(m.probe(0), Some(20));
        assert_eq!(m.probe(1), None);
        assert_eq!(m.probe(2), Some(5));
        assert_eq!(m.probe(6), None);
        assert_eq!(m.connected_probes(), 5);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_measurement_serialization() {
        let m = Measurement::new([20, PROBE_DISCONNECTED, 5, 0, 0, 0], at());

        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"temperatures\":[20,-32768,5,0,0,0]"));
        assert!(json.contains("2024-06-01T12:00:00Z"));

        let back: Measurement = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn sentinel_iff_high_byte_set(data in proptest::collection::vec(any::<u8>(), 12..24)) {
                let m = Measurement::from_bytes(&data, at()).unwrap();
                for i in 0..PROBE_COUNT {
                    let (low, high) = (data[2 * i], data[2 * i + 1]);
                    if high == 0 {
                        prop_assert_eq!(m.temperatures[i], i16::from(low));
                    } else {
                        prop_assert_eq!(m.temperatures[i], PROBE_DISCONNECTED);
                    }
                }
            }

            #[test]
            fn short_payloads_never_parse(data in proptest::collection::vec(any::<u8>(), 0..12)) {
                prop_assert!(Measurement::from_bytes(&data, at()).is_err());
            }
        }
    }
}
