//! Raw bus notifications and the rules that select them.

use std::fmt;

use crate::attributes::{PROPERTIES_CHANGED, PROPERTIES_INTERFACE};
use crate::value::Value;

/// A notification as it arrives from the bus, before any decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSignal {
    /// Object path of the sender.
    pub path: String,
    /// Interface the signal was emitted on.
    pub interface: String,
    /// Signal name.
    pub member: String,
    /// Ordered, untyped body elements.
    pub body: Vec<Value>,
}

impl RawSignal {
    /// Create a signal.
    pub fn new(
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        body: Vec<Value>,
    ) -> Self {
        Self {
            path: path.into(),
            interface: interface.into(),
            member: member.into(),
            body,
        }
    }
}

/// Selects signals by exact `(path, interface, member)` equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchRule {
    /// Sender object path.
    pub path: String,
    /// Interface name.
    pub interface: String,
    /// Signal name.
    pub member: String,
}

impl MatchRule {
    /// Create a rule matching all three fields.
    pub fn new(
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            interface: interface.into(),
            member: member.into(),
        }
    }

    /// Rule for property-change notifications emitted by `path`.
    pub fn properties_changed(path: impl Into<String>) -> Self {
        Self::new(path, PROPERTIES_INTERFACE, PROPERTIES_CHANGED)
    }

    /// Whether `signal` satisfies this rule.
    pub fn matches(&self, signal: &RawSignal) -> bool {
        self.path == signal.path
            && self.interface == signal.interface
            && self.member == signal.member
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{}", self.path, self.interface, self.member)
    }
}
