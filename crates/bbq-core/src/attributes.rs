//! Flat discovery snapshots.
//!
//! An [`AttributeStore`] is what an object-manager query returns: every
//! object path on the bus mapped to the interfaces it implements and their
//! attributes. It is only read by the graph builder.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::value::Value;

/// Interface implemented by remote peripherals.
pub const DEVICE_INTERFACE: &str = "org.bluez.Device1";
/// Interface implemented by GATT services.
pub const SERVICE_INTERFACE: &str = "org.bluez.GattService1";
/// Interface implemented by GATT characteristics.
pub const CHARACTERISTIC_INTERFACE: &str = "org.bluez.GattCharacteristic1";
/// Interface implemented by GATT descriptors.
pub const DESCRIPTOR_INTERFACE: &str = "org.bluez.GattDescriptor1";
/// Standard properties interface; property-change signals come from it.
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
/// Member name of the property-change signal.
pub const PROPERTIES_CHANGED: &str = "PropertiesChanged";

/// Attributes of one interface, by name.
pub type Attributes = HashMap<String, Value>;

/// One object from a discovery snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawObject {
    /// Object path.
    pub path: String,
    /// Interface name to attributes.
    pub interfaces: HashMap<String, Attributes>,
}

impl RawObject {
    /// Create an object with no interfaces.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            interfaces: HashMap::new(),
        }
    }

    /// Add an interface with its attributes (builder style).
    #[must_use]
    pub fn with_interface<I, K, V>(mut self, interface: &str, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.interfaces.insert(
            interface.to_owned(),
            attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Whether the object implements `interface`.
    pub fn implements(&self, interface: &str) -> bool {
        self.interfaces.contains_key(interface)
    }

    /// Raw attribute lookup.
    pub fn attribute(&self, interface: &str, name: &str) -> Option<&Value> {
        self.interfaces.get(interface)?.get(name)
    }

    /// Required string attribute.
    pub fn require_str(&self, interface: &str, name: &str) -> Result<&str> {
        let value = self.require(interface, name)?;
        value
            .as_str()
            .ok_or_else(|| self.wrong_type(name, "string", value))
    }

    /// Required object-path attribute.
    pub fn require_object_path(&self, interface: &str, name: &str) -> Result<&str> {
        let value = self.require(interface, name)?;
        value
            .as_object_path()
            .ok_or_else(|| self.wrong_type(name, "object path", value))
    }

    /// Optional string attribute; a present value of another type reads as `None`.
    pub fn optional_str(&self, interface: &str, name: &str) -> Option<&str> {
        self.attribute(interface, name).and_then(Value::as_str)
    }

    fn require(&self, interface: &str, name: &str) -> Result<&Value> {
        self.attribute(interface, name)
            .ok_or_else(|| Error::MissingAttribute {
                path: self.path.clone(),
                interface: interface.to_owned(),
                attribute: name.to_owned(),
            })
    }

    fn wrong_type(&self, name: &str, expected: &str, got: &Value) -> Error {
        Error::InvalidAttribute {
            path: self.path.clone(),
            attribute: name.to_owned(),
            reason: format!("expected {}, got {}", expected, got.type_name()),
        }
    }
}

/// Discovery snapshot keyed by object path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeStore {
    objects: HashMap<String, RawObject>,
}

impl AttributeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object, replacing any previous object at the same path.
    pub fn insert(&mut self, object: RawObject) {
        self.objects.insert(object.path.clone(), object);
    }

    /// Look up an object by path.
    pub fn get(&self, path: &str) -> Option<&RawObject> {
        self.objects.get(path)
    }

    /// Iterate over all objects in unspecified order.
    pub fn objects(&self) -> impl Iterator<Item = &RawObject> {
        self.objects.values()
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl FromIterator<RawObject> for AttributeStore {
    fn from_iter<T: IntoIterator<Item = RawObject>>(iter: T) -> Self {
        let mut store = Self::new();
        for object in iter {
            store.insert(object);
        }
        store
    }
}
