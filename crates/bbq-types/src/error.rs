//! Error types for data parsing in bbq-types.

use thiserror::Error;

/// Errors that can occur when parsing thermometer payloads.
///
/// This error type is platform-agnostic and does not include
/// transport errors (those belong in bbq-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The payload is shorter than the fixed layout requires.
    #[error("Insufficient bytes: requires {expected} bytes, got {actual}")]
    InsufficientBytes {
        /// Required payload length.
        expected: usize,
        /// Length actually received.
        actual: usize,
    },

    /// The payload has the right length but an unusable value.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias using bbq-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
