//! Temperature notification decoding.
//!
//! A temperature update arrives as a `PropertiesChanged` signal whose body is
//! `(interface, changed properties, invalidated properties)`. The `Value`
//! entry of the changed map carries the six-probe payload parsed by
//! [`Measurement::from_bytes`].
//!
//! Signals that do not have this shape are expected (other properties such
//! as `Notifying` change on the same path) and are rejected without logging
//! above trace level.

use thiserror::Error;
use time::OffsetDateTime;
use tracing::trace;

use bbq_types::Measurement;

use crate::value::Value;

/// Key of the characteristic value in the changed-properties map.
pub const VALUE_PROPERTY: &str = "Value";

/// Why a signal body was not decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum MalformedPayload {
    /// The body does not have exactly three elements.
    #[error("expected 3 body elements, got {0}")]
    Arity(usize),
    /// Element 0 is not a string.
    #[error("interface element is a {0}, not a string")]
    InterfaceType(&'static str),
    /// Element 0 names a different interface.
    #[error("signal is for interface {0}")]
    OtherInterface(String),
    /// Element 1 is not a map.
    #[error("changed properties element is a {0}, not a map")]
    PropertiesType(&'static str),
    /// The changed map has no `Value` entry.
    #[error("no Value in changed properties")]
    MissingValue,
    /// The `Value` entry is not a byte sequence.
    #[error("Value is a {0}, not bytes")]
    ValueType(&'static str),
    /// The payload is shorter than six probe pairs.
    #[error("payload has {0} bytes, need 12")]
    TooShort(usize),
}

/// Decode a property-change body into a measurement stamped with the current time.
///
/// Returns `None` for any body that is not a temperature update from
/// `interface`.
pub fn decode(interface: &str, body: &[Value]) -> Option<Measurement> {
    decode_at(interface, body, OffsetDateTime::now_utc())
}

/// Like [`decode`] with an explicit capture time.
pub fn decode_at(interface: &str, body: &[Value], at: OffsetDateTime) -> Option<Measurement> {
    match try_decode_at(interface, body, at) {
        Ok(m) => Some(m),
        Err(reason) => {
            trace!(%reason, "Ignoring notification");
            None
        }
    }
}

/// Decode a property-change body, reporting why it was rejected.
pub fn try_decode_at(
    interface: &str,
    body: &[Value],
    at: OffsetDateTime,
) -> Result<Measurement, MalformedPayload> {
    let [iface, changed, _invalidated] = body else {
        return Err(MalformedPayload::Arity(body.len()));
    };

    let iface = iface
        .as_str()
        .ok_or(MalformedPayload::InterfaceType(iface.type_name()))?;
    if iface != interface {
        return Err(MalformedPayload::OtherInterface(iface.to_string()));
    }

    let changed = changed
        .as_map()
        .ok_or(MalformedPayload::PropertiesType(changed.type_name()))?;
    let value = changed
        .get(VALUE_PROPERTY)
        .ok_or(MalformedPayload::MissingValue)?;
    let bytes = value
        .as_bytes()
        .ok_or(MalformedPayload::ValueType(value.type_name()))?;

    Measurement::from_bytes(bytes, at).map_err(|_| MalformedPayload::TooShort(bytes.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::CHARACTERISTIC_INTERFACE;
    use crate::value::ValueMap;
    use bbq_types::{MIN_TEMPERATURE_BYTES, PROBE_DISCONNECTED};
    use time::macros::datetime;

    const SAMPLE: [u8; 12] = [
        0x14, 0x00, 0x00, 0x01, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];

    fn at() -> OffsetDateTime {
        datetime!(2024-06-01 18:30:00 UTC)
    }

    fn body_with(changed: ValueMap) -> Vec<Value> {
        vec![
            Value::from(CHARACTERISTIC_INTERFACE),
            Value::Map(changed),
            Value::Array(vec![]),
        ]
    }

    fn value_map(value: Value) -> ValueMap {
        ValueMap::from([(VALUE_PROPERTY.to_string(), value)])
    }

    #[test]
    fn test_decode_sample() {
        let body = body_with(value_map(Value::from(SAMPLE.to_vec())));
        let m = decode_at(CHARACTERISTIC_INTERFACE, &body, at()).unwrap();
        assert_eq!(m.temperatures, [20, PROBE_DISCONNECTED, 5, 0, 0, 0]);
        assert_eq!(m.captured_at, at());
    }

    #[test]
    fn test_decode_stamps_arrival_time() {
        let before = OffsetDateTime::now_utc();
        let body = body_with(value_map(Value::from(SAMPLE.to_vec())));
        let m = decode(CHARACTERISTIC_INTERFACE, &body).unwrap();
        assert!(m.captured_at >= before);
    }

    #[test]
    fn test_wrong_arity() {
        let mut body = body_with(value_map(Value::from(SAMPLE.to_vec())));
        body.pop();
        assert_eq!(
            try_decode_at(CHARACTERISTIC_INTERFACE, &body, at()),
            Err(MalformedPayload::Arity(2))
        );
        body.push(Value::Array(vec![]));
        body.push(Value::Bool(true));
        assert!(decode_at(CHARACTERISTIC_INTERFACE, &body, at()).is_none());
        assert!(decode_at(CHARACTERISTIC_INTERFACE, &[], at()).is_none());
    }

    #[test]
    fn test_wrong_interface() {
        let mut body = body_with(value_map(Value::from(SAMPLE.to_vec())));
        body[0] = Value::from("org.bluez.Device1");
        assert_eq!(
            try_decode_at(CHARACTERISTIC_INTERFACE, &body, at()),
            Err(MalformedPayload::OtherInterface("org.bluez.Device1".into()))
        );

        body[0] = Value::Uint(1);
        assert_eq!(
            try_decode_at(CHARACTERISTIC_INTERFACE, &body, at()),
            Err(MalformedPayload::InterfaceType("uint"))
        );
    }

    #[test]
    fn test_missing_value_key() {
        // Notifying toggles arrive on the same path and member
        let changed = ValueMap::from([("Notifying".to_string(), Value::Bool(true))]);
        let body = body_with(changed);
        assert_eq!(
            try_decode_at(CHARACTERISTIC_INTERFACE, &body, at()),
            Err(MalformedPayload::MissingValue)
        );
    }

    #[test]
    fn test_value_not_bytes() {
        let body = body_with(value_map(Value::from("hot")));
        assert_eq!(
            try_decode_at(CHARACTERISTIC_INTERFACE, &body, at()),
            Err(MalformedPayload::ValueType("string"))
        );
    }

    #[test]
    fn test_properties_not_a_map() {
        let body = vec![
            Value::from(CHARACTERISTIC_INTERFACE),
            Value::Array(vec![]),
            Value::Array(vec![]),
        ];
        assert_eq!(
            try_decode_at(CHARACTERISTIC_INTERFACE, &body, at()),
            Err(MalformedPayload::PropertiesType("array"))
        );
    }

    #[test]
    fn test_short_payload() {
        let body = body_with(value_map(Value::from(vec![0x14, 0x00, 0x15])));
        assert_eq!(
            try_decode_at(CHARACTERISTIC_INTERFACE, &body, at()),
            Err(MalformedPayload::TooShort(3))
        );
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..32)) {
                let body = body_with(value_map(Value::from(bytes.clone())));
                let decoded = decode_at(CHARACTERISTIC_INTERFACE, &body, at());
                prop_assert_eq!(decoded.is_some(), bytes.len() >= MIN_TEMPERATURE_BYTES);
            }

            #[test]
            fn readings_are_sentinel_or_unsigned_byte(bytes in proptest::collection::vec(any::<u8>(), 12..16)) {
                let body = body_with(value_map(Value::from(bytes)));
                let m = decode_at(CHARACTERISTIC_INTERFACE, &body, at()).unwrap();
                for t in m.temperatures {
                    prop_assert!(t == PROBE_DISCONNECTED || (0..=255).contains(&t));
                }
            }
        }
    }
}
