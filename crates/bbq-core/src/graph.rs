//! Resource graph construction.
//!
//! Discovery hands back a flat [`AttributeStore`]. [`build`] links it into a
//! tree of [`Device`] → [`Service`] → [`Characteristic`] → [`Descriptor`] by
//! resolving the parent path each child carries as an attribute. Children are
//! owned by value and keyed by UUID; the only link back to the parent is its
//! path string.
//!
//! The build is all-or-nothing: a child that names an unknown parent, a
//! malformed UUID, or two siblings sharing a UUID fails the whole build.

use std::collections::BTreeMap;

use tracing::debug;
use uuid::Uuid;

use crate::attributes::{
    AttributeStore, CHARACTERISTIC_INTERFACE, DESCRIPTOR_INTERFACE, DEVICE_INTERFACE, RawObject,
    SERVICE_INTERFACE,
};
use crate::error::{EntityKind, Error, Result};

/// A remote peripheral and everything discovered under it.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    /// Object path.
    pub path: String,
    /// Advertised name, if the peripheral reported one.
    pub name: Option<String>,
    /// Hardware address.
    pub address: Option<String>,
    /// User-facing alias.
    pub alias: Option<String>,
    /// Services keyed by UUID.
    pub services: BTreeMap<Uuid, Service>,
}

/// A GATT service.
#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    /// Object path.
    pub path: String,
    /// Service UUID.
    pub uuid: Uuid,
    /// Whether this is a primary service.
    pub primary: bool,
    /// Path of the owning device.
    pub device: String,
    /// Characteristics keyed by UUID.
    pub characteristics: BTreeMap<Uuid, Characteristic>,
}

/// A GATT characteristic.
#[derive(Debug, Clone, PartialEq)]
pub struct Characteristic {
    /// Object path.
    pub path: String,
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Path of the owning service.
    pub service: String,
    /// Access flags such as `read`, `write` or `notify`.
    pub flags: Vec<String>,
    /// Descriptors keyed by UUID.
    pub descriptors: BTreeMap<Uuid, Descriptor>,
}

/// A GATT descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    /// Object path.
    pub path: String,
    /// Descriptor UUID.
    pub uuid: Uuid,
    /// Path of the owning characteristic.
    pub characteristic: String,
}

impl Device {
    /// Look up a service by UUID.
    pub fn service(&self, uuid: Uuid) -> Result<&Service> {
        self.services
            .get(&uuid)
            .ok_or_else(|| Error::not_found(EntityKind::Service, uuid))
    }

    /// Find a characteristic in any of this device's services.
    pub fn characteristic(&self, uuid: Uuid) -> Result<&Characteristic> {
        for service in self.services.values() {
            match service.characteristic(uuid) {
                Ok(c) => return Ok(c),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::not_found(EntityKind::Characteristic, uuid))
    }

    /// Find a descriptor anywhere under this device.
    pub fn descriptor(&self, uuid: Uuid) -> Result<&Descriptor> {
        for service in self.services.values() {
            match service.descriptor(uuid) {
                Ok(d) => return Ok(d),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::not_found(EntityKind::Descriptor, uuid))
    }
}

impl Service {
    /// Look up a characteristic of this service by UUID.
    pub fn characteristic(&self, uuid: Uuid) -> Result<&Characteristic> {
        self.characteristics
            .get(&uuid)
            .ok_or_else(|| Error::not_found(EntityKind::Characteristic, uuid))
    }

    /// Find a descriptor under any characteristic of this service.
    pub fn descriptor(&self, uuid: Uuid) -> Result<&Descriptor> {
        self.characteristics
            .values()
            .find_map(|c| c.descriptors.get(&uuid))
            .ok_or_else(|| Error::not_found(EntityKind::Descriptor, uuid))
    }
}

impl Characteristic {
    /// Look up a descriptor of this characteristic by UUID.
    pub fn descriptor(&self, uuid: Uuid) -> Result<&Descriptor> {
        self.descriptors
            .get(&uuid)
            .ok_or_else(|| Error::not_found(EntityKind::Descriptor, uuid))
    }

    /// Whether the characteristic advertises `flag` (e.g. `"notify"`).
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }
}

/// Build the resource graph and return the devices named `name`.
///
/// Every device in the store is linked before filtering, so a malformed
/// object under an unrelated device still fails the build.
///
/// # Errors
///
/// - [`Error::AmbiguousObject`] if an object exposes two known interfaces
/// - [`Error::MissingAttribute`] / [`Error::InvalidAttribute`] for a missing or
///   malformed `UUID` or parent attribute
/// - [`Error::DanglingReference`] if a parent path is not in the store
/// - [`Error::DuplicateUuid`] if two siblings share a UUID
pub fn build(store: &AttributeStore, name: &str) -> Result<Vec<Device>> {
    let devices = build_all(store)?;
    let matched: Vec<Device> = devices
        .into_iter()
        .filter(|d| d.name.as_deref() == Some(name))
        .collect();
    debug!(name, matched = matched.len(), "Resource graph built");
    Ok(matched)
}

/// Build the resource graph and return every device, named or not.
pub fn build_all(store: &AttributeStore) -> Result<Vec<Device>> {
    let Classified {
        mut devices,
        mut services,
        mut characteristics,
        descriptors,
    } = classify(store)?;

    for (path, descriptor) in descriptors {
        let parent = characteristics
            .get_mut(&descriptor.characteristic)
            .ok_or_else(|| Error::DanglingReference {
                child_kind: EntityKind::Descriptor,
                child: path,
                parent_kind: EntityKind::Characteristic,
                parent: descriptor.characteristic.clone(),
            })?;
        attach(
            EntityKind::Descriptor,
            &parent.path,
            &mut parent.descriptors,
            descriptor.uuid,
            descriptor,
            |d| &d.path,
        )?;
    }

    for (path, characteristic) in characteristics {
        let parent = services
            .get_mut(&characteristic.service)
            .ok_or_else(|| Error::DanglingReference {
                child_kind: EntityKind::Characteristic,
                child: path,
                parent_kind: EntityKind::Service,
                parent: characteristic.service.clone(),
            })?;
        attach(
            EntityKind::Characteristic,
            &parent.path,
            &mut parent.characteristics,
            characteristic.uuid,
            characteristic,
            |c| &c.path,
        )?;
    }

    for (path, service) in services {
        let parent = devices
            .get_mut(&service.device)
            .ok_or_else(|| Error::DanglingReference {
                child_kind: EntityKind::Service,
                child: path,
                parent_kind: EntityKind::Device,
                parent: service.device.clone(),
            })?;
        attach(
            EntityKind::Service,
            &parent.path,
            &mut parent.services,
            service.uuid,
            service,
            |s| &s.path,
        )?;
    }

    Ok(devices.into_values().collect())
}

#[derive(Default)]
struct Classified {
    devices: BTreeMap<String, Device>,
    services: BTreeMap<String, Service>,
    characteristics: BTreeMap<String, Characteristic>,
    descriptors: BTreeMap<String, Descriptor>,
}

fn classify(store: &AttributeStore) -> Result<Classified> {
    let mut out = Classified::default();

    let mut objects: Vec<&RawObject> = store.objects().collect();
    objects.sort_by(|a, b| a.path.cmp(&b.path));

    for object in objects {
        let Some(kind) = kind_of(object)? else {
            continue;
        };
        let path = object.path.clone();
        match kind {
            EntityKind::Device => {
                let device = Device {
                    path: path.clone(),
                    name: object
                        .optional_str(DEVICE_INTERFACE, "Name")
                        .map(str::to_owned),
                    address: object
                        .optional_str(DEVICE_INTERFACE, "Address")
                        .map(str::to_owned),
                    alias: object
                        .optional_str(DEVICE_INTERFACE, "Alias")
                        .map(str::to_owned),
                    services: BTreeMap::new(),
                };
                out.devices.insert(path, device);
            }
            EntityKind::Service => {
                let service = Service {
                    path: path.clone(),
                    uuid: uuid_of(object, SERVICE_INTERFACE)?,
                    primary: object
                        .attribute(SERVICE_INTERFACE, "Primary")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false),
                    device: object
                        .require_object_path(SERVICE_INTERFACE, "Device")?
                        .to_owned(),
                    characteristics: BTreeMap::new(),
                };
                out.services.insert(path, service);
            }
            EntityKind::Characteristic => {
                let characteristic = Characteristic {
                    path: path.clone(),
                    uuid: uuid_of(object, CHARACTERISTIC_INTERFACE)?,
                    service: object
                        .require_object_path(CHARACTERISTIC_INTERFACE, "Service")?
                        .to_owned(),
                    flags: object
                        .attribute(CHARACTERISTIC_INTERFACE, "Flags")
                        .map(|v| v.string_list())
                        .unwrap_or_default(),
                    descriptors: BTreeMap::new(),
                };
                out.characteristics.insert(path, characteristic);
            }
            EntityKind::Descriptor => {
                let descriptor = Descriptor {
                    path: path.clone(),
                    uuid: uuid_of(object, DESCRIPTOR_INTERFACE)?,
                    characteristic: object
                        .require_object_path(DESCRIPTOR_INTERFACE, "Characteristic")?
                        .to_owned(),
                };
                out.descriptors.insert(path, descriptor);
            }
        }
    }

    Ok(out)
}

const KNOWN_INTERFACES: [(&str, EntityKind); 4] = [
    (DEVICE_INTERFACE, EntityKind::Device),
    (SERVICE_INTERFACE, EntityKind::Service),
    (CHARACTERISTIC_INTERFACE, EntityKind::Characteristic),
    (DESCRIPTOR_INTERFACE, EntityKind::Descriptor),
];

fn kind_of(object: &RawObject) -> Result<Option<EntityKind>> {
    let mut found = KNOWN_INTERFACES
        .iter()
        .filter(|(iface, _)| object.implements(iface))
        .map(|&(_, kind)| kind);

    match (found.next(), found.next()) {
        (Some(first), Some(second)) => Err(Error::AmbiguousObject {
            path: object.path.clone(),
            first,
            second,
        }),
        (kind, None) => Ok(kind),
        (None, Some(_)) => Ok(None),
    }
}

fn uuid_of(object: &RawObject, interface: &str) -> Result<Uuid> {
    let raw = object.require_str(interface, "UUID")?;
    Uuid::parse_str(raw).map_err(|e| Error::InvalidAttribute {
        path: object.path.clone(),
        attribute: "UUID".to_string(),
        reason: format!("{raw:?} is not a UUID: {e}"),
    })
}

fn attach<T>(
    kind: EntityKind,
    parent: &str,
    children: &mut BTreeMap<Uuid, T>,
    uuid: Uuid,
    child: T,
    path_of: impl Fn(&T) -> &String,
) -> Result<()> {
    if let Some(existing) = children.get(&uuid) {
        return Err(Error::DuplicateUuid {
            kind,
            parent: parent.to_string(),
            uuid,
            first: path_of(existing).clone(),
            second: path_of(&child).clone(),
        });
    }
    children.insert(uuid, child);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::thermometer_objects;
    use crate::value::Value;
    use bbq_types::uuids::{
        CLIENT_CHARACTERISTIC_CONFIG, COMMAND, TEMPERATURES, THERMOMETER_SERVICE,
    };

    const DEV: &str = "/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF";
    const SVC: &str = "/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF/service0010";
    const CHR: &str = "/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF/service0010/char0011";
    const DSC: &str = "/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF/service0010/char0011/desc0013";

    fn device(path: &str, name: &str) -> RawObject {
        RawObject::new(path).with_interface(DEVICE_INTERFACE, [("Name", Value::from(name))])
    }

    fn service(path: &str, device: &str, uuid: Uuid) -> RawObject {
        RawObject::new(path).with_interface(
            SERVICE_INTERFACE,
            [
                ("UUID", Value::from(uuid.to_string())),
                ("Device", Value::object_path(device)),
                ("Primary", Value::from(true)),
            ],
        )
    }

    fn characteristic(path: &str, service: &str, uuid: Uuid) -> RawObject {
        RawObject::new(path).with_interface(
            CHARACTERISTIC_INTERFACE,
            [
                ("UUID", Value::from(uuid.to_string())),
                ("Service", Value::object_path(service)),
                (
                    "Flags",
                    Value::Array(vec![Value::from("read"), Value::from("notify")]),
                ),
            ],
        )
    }

    fn descriptor(path: &str, characteristic: &str, uuid: Uuid) -> RawObject {
        RawObject::new(path).with_interface(
            DESCRIPTOR_INTERFACE,
            [
                ("UUID", Value::from(uuid.to_string())),
                ("Characteristic", Value::object_path(characteristic)),
            ],
        )
    }

    #[test]
    fn test_dangling_descriptor_fails_build() {
        let store: AttributeStore = [
            device(DEV, "BBQ"),
            service(SVC, DEV, THERMOMETER_SERVICE),
            characteristic(CHR, SVC, TEMPERATURES),
            descriptor(DSC, "/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF/missing", CLIENT_CHARACTERISTIC_CONFIG),
        ]
        .into_iter()
        .collect();

        let err = build(&store, "BBQ").unwrap_err();
        match &err {
            Error::DanglingReference {
                child_kind,
                child,
                parent_kind,
                parent,
            } => {
                assert_eq!(*child_kind, EntityKind::Descriptor);
                assert_eq!(child, DSC);
                assert_eq!(*parent_kind, EntityKind::Characteristic);
                assert_eq!(parent, "/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF/missing");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("depends on unknown characteristic"));
    }

    #[test]
    fn test_dangling_service_fails_build() {
        let store: AttributeStore = [service(SVC, DEV, THERMOMETER_SERVICE)]
            .into_iter()
            .collect();

        let err = build_all(&store).unwrap_err();
        assert!(matches!(
            err,
            Error::DanglingReference {
                child_kind: EntityKind::Service,
                parent_kind: EntityKind::Device,
                ..
            }
        ));
    }

    #[test]
    fn test_filter_by_name_keeps_full_tree() {
        let mut store = AttributeStore::new();
        for obj in thermometer_objects("/org/bluez/hci0/dev_01", "BBQ") {
            store.insert(obj);
        }
        for obj in thermometer_objects("/org/bluez/hci0/dev_02", "Other") {
            store.insert(obj);
        }

        let devices = build(&store, "BBQ").unwrap();
        assert_eq!(devices.len(), 1);

        let bbq = &devices[0];
        assert_eq!(bbq.path, "/org/bluez/hci0/dev_01");
        assert_eq!(bbq.name.as_deref(), Some("BBQ"));

        let svc = bbq.service(THERMOMETER_SERVICE).unwrap();
        assert!(svc.primary);
        assert_eq!(svc.device, bbq.path);

        let temps = svc.characteristic(TEMPERATURES).unwrap();
        assert!(temps.path.starts_with(&svc.path));
        assert!(temps.has_flag("notify"));
        let cccd = temps.descriptor(CLIENT_CHARACTERISTIC_CONFIG).unwrap();
        assert_eq!(cccd.characteristic, temps.path);

        // device-wide searches
        assert_eq!(bbq.characteristic(COMMAND).unwrap().uuid, COMMAND);
        assert_eq!(
            bbq.descriptor(CLIENT_CHARACTERISTIC_CONFIG).unwrap().uuid,
            CLIENT_CHARACTERISTIC_CONFIG
        );
    }

    #[test]
    fn test_no_matching_name() {
        let store: AttributeStore = thermometer_objects("/org/bluez/hci0/dev_01", "Other")
            .into_iter()
            .collect();
        assert!(build(&store, "BBQ").unwrap().is_empty());
        assert_eq!(build_all(&store).unwrap().len(), 1);
    }

    #[test]
    fn test_unnamed_device_never_matches() {
        let store: AttributeStore = [RawObject::new(DEV).with_interface(
            DEVICE_INTERFACE,
            [("Address", Value::from("AA:BB:CC:DD:EE:FF"))],
        )]
        .into_iter()
        .collect();

        assert!(build(&store, "BBQ").unwrap().is_empty());
        let all = build_all(&store).unwrap();
        assert_eq!(all[0].address.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_unknown_objects_ignored() {
        let store: AttributeStore = [
            RawObject::new("/org/bluez/hci0")
                .with_interface("org.bluez.Adapter1", [("Powered", Value::from(true))]),
            device(DEV, "BBQ"),
        ]
        .into_iter()
        .collect();

        let devices = build(&store, "BBQ").unwrap();
        assert_eq!(devices.len(), 1);
        assert!(devices[0].services.is_empty());
    }

    #[test]
    fn test_missing_uuid_is_an_error() {
        let store: AttributeStore = [
            device(DEV, "BBQ"),
            RawObject::new(SVC)
                .with_interface(SERVICE_INTERFACE, [("Device", Value::object_path(DEV))]),
        ]
        .into_iter()
        .collect();

        let err = build(&store, "BBQ").unwrap_err();
        assert!(matches!(err, Error::MissingAttribute { ref attribute, .. } if attribute == "UUID"));
    }

    #[test]
    fn test_malformed_uuid_is_an_error() {
        let store: AttributeStore = [
            device(DEV, "BBQ"),
            RawObject::new(SVC).with_interface(
                SERVICE_INTERFACE,
                [
                    ("UUID", Value::from("not-a-uuid")),
                    ("Device", Value::object_path(DEV)),
                ],
            ),
        ]
        .into_iter()
        .collect();

        let err = build(&store, "BBQ").unwrap_err();
        assert!(matches!(err, Error::InvalidAttribute { .. }));
    }

    #[test]
    fn test_duplicate_uuid_is_an_error() {
        let store: AttributeStore = [
            device(DEV, "BBQ"),
            service(SVC, DEV, THERMOMETER_SERVICE),
            characteristic(CHR, SVC, TEMPERATURES),
            characteristic(&format!("{SVC}/char0020"), SVC, TEMPERATURES),
        ]
        .into_iter()
        .collect();

        let err = build(&store, "BBQ").unwrap_err();
        match err {
            Error::DuplicateUuid {
                kind,
                uuid,
                first,
                second,
                ..
            } => {
                assert_eq!(kind, EntityKind::Characteristic);
                assert_eq!(uuid, TEMPERATURES);
                assert_eq!(first, CHR);
                assert_eq!(second, format!("{SVC}/char0020"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_ambiguous_object() {
        let store: AttributeStore = [RawObject::new(DEV)
            .with_interface(DEVICE_INTERFACE, [("Name", Value::from("BBQ"))])
            .with_interface(
                SERVICE_INTERFACE,
                [("UUID", Value::from(THERMOMETER_SERVICE.to_string()))],
            )]
        .into_iter()
        .collect();

        let err = build(&store, "BBQ").unwrap_err();
        assert!(matches!(
            err,
            Error::AmbiguousObject {
                first: EntityKind::Device,
                second: EntityKind::Service,
                ..
            }
        ));
    }

    #[test]
    fn test_lookup_miss_is_not_found() {
        let store: AttributeStore = [device(DEV, "BBQ"), service(SVC, DEV, THERMOMETER_SERVICE)]
            .into_iter()
            .collect();
        let devices = build(&store, "BBQ").unwrap();

        let err = devices[0].characteristic(TEMPERATURES).unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(
            err,
            Error::NotFound {
                kind: EntityKind::Characteristic,
                ..
            }
        ));
        assert!(devices[0].service(COMMAND).unwrap_err().is_not_found());
    }
}
