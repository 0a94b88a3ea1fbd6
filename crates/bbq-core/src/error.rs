//! Error types for bbq-core.
//!
//! This module defines the errors raised while building the resource graph,
//! looking up GATT entities and talking to the bus.
//!
//! # Error Recovery Strategies
//!
//! | Error Type | Strategy | Rationale |
//! |------------|----------|-----------|
//! | [`Error::DanglingReference`] | Re-discover, then rebuild | Snapshot was stale or partial |
//! | [`Error::MissingAttribute`] | Re-discover, then rebuild | Object was still being populated |
//! | [`Error::NotFound`] | Keep searching other scopes | Normal miss during lookups |
//! | [`Error::RemoteCallFailed`] | Abort the setup step | Transport rejected the call |
//! | [`Error::Timeout`] | Abort the setup step | Remote side did not answer |
//! | [`Error::Cancelled`] | Stop | Shutdown was requested |
//!
//! Payload decoding never produces an error: a malformed notification is
//! skipped (see [`crate::decode`]). A dropped measurement in the mailbox is an
//! outcome, not an error (see [`crate::mailbox::PushOutcome`]).

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in the thermometer pipeline.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A child object names a parent that is absent from the discovery snapshot.
    #[error("{child_kind} {child} depends on unknown {parent_kind} {parent}")]
    DanglingReference {
        /// Kind of the child entity.
        child_kind: EntityKind,
        /// Object path of the child.
        child: String,
        /// Kind of the missing parent.
        parent_kind: EntityKind,
        /// Parent object path the child referenced.
        parent: String,
    },

    /// A required attribute is absent from an object.
    #[error("{path}: missing attribute {interface}.{attribute}")]
    MissingAttribute {
        /// Object path.
        path: String,
        /// Interface the attribute was expected on.
        interface: String,
        /// Attribute name.
        attribute: String,
    },

    /// An attribute is present but has the wrong shape.
    #[error("{path}: invalid attribute {attribute}: {reason}")]
    InvalidAttribute {
        /// Object path.
        path: String,
        /// Attribute name.
        attribute: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Two children of the same parent share a UUID.
    #[error("{parent} has two {kind}s with UUID {uuid} ({first} and {second})")]
    DuplicateUuid {
        /// Kind of the colliding children.
        kind: EntityKind,
        /// Parent object path.
        parent: String,
        /// Colliding UUID.
        uuid: Uuid,
        /// Object path of the child attached first.
        first: String,
        /// Object path of the child attached second.
        second: String,
    },

    /// An object exposes more than one GATT/device interface.
    #[error("{path} exposes both {first} and {second}")]
    AmbiguousObject {
        /// Object path.
        path: String,
        /// First known interface found.
        first: EntityKind,
        /// Second known interface found.
        second: EntityKind,
    },

    /// A lookup by UUID found nothing.
    #[error("{kind} not found: {uuid}")]
    NotFound {
        /// Kind of entity looked up.
        kind: EntityKind,
        /// UUID that was not found.
        uuid: Uuid,
    },

    /// A remote procedure call returned an error.
    #[error("Remote call {interface}.{method} on {path} failed: {reason}")]
    RemoteCallFailed {
        /// Target object path.
        path: String,
        /// Interface of the method.
        interface: String,
        /// Method name.
        method: String,
        /// Transport-provided reason.
        reason: String,
    },

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// The bus connection itself failed.
    #[error("Bus error: {0}")]
    Bus(String),

    /// The persistence sink rejected a measurement.
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// The four kinds of object in the resource graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A remote peripheral.
    Device,
    /// A primary or secondary GATT service.
    Service,
    /// A GATT characteristic.
    Characteristic,
    /// A GATT descriptor.
    Descriptor,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device => write!(f, "device"),
            Self::Service => write!(f, "service"),
            Self::Characteristic => write!(f, "characteristic"),
            Self::Descriptor => write!(f, "descriptor"),
        }
    }
}

impl Error {
    /// Create a not-found error for a UUID lookup.
    pub fn not_found(kind: EntityKind, uuid: Uuid) -> Self {
        Self::NotFound { kind, uuid }
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a remote call failure.
    pub fn remote_call_failed(
        path: impl Into<String>,
        interface: impl Into<String>,
        method: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::RemoteCallFailed {
            path: path.into(),
            interface: interface.into(),
            method: method.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether this is a lookup miss that multi-scope searches should skip.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type alias using bbq-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dangling_reference_display() {
        let err = Error::DanglingReference {
            child_kind: EntityKind::Characteristic,
            child: "/org/bluez/hci0/dev_1/service0010/char0011".to_string(),
            parent_kind: EntityKind::Service,
            parent: "/org/bluez/hci0/dev_1/service0099".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "characteristic /org/bluez/hci0/dev_1/service0010/char0011 depends on unknown service /org/bluez/hci0/dev_1/service0099"
        );
    }

    #[test]
    fn test_not_found() {
        let uuid = bbq_types::uuids::TEMPERATURES;
        let err = Error::not_found(EntityKind::Characteristic, uuid);
        assert!(err.is_not_found());
        assert!(err.to_string().contains("0000fff5"));
        assert!(err.to_string().starts_with("characteristic not found"));
    }

    #[test]
    fn test_remote_call_failed_display() {
        let err = Error::remote_call_failed(
            "/org/bluez/hci0/dev_1",
            "org.bluez.Device1",
            "Connect",
            "Software caused connection abort",
        );
        let msg = err.to_string();
        assert!(msg.contains("org.bluez.Device1.Connect"));
        assert!(msg.contains("connection abort"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_timeout_display() {
        let err = Error::timeout("StartNotify", Duration::from_secs(10));
        assert!(err.to_string().contains("StartNotify"));
        assert!(err.to_string().contains("10s"));
    }

    #[test]
    fn test_entity_kind_display() {
        assert_eq!(EntityKind::Device.to_string(), "device");
        assert_eq!(EntityKind::Descriptor.to_string(), "descriptor");
    }
}
