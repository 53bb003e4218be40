//! Error types for protocol parsing in bluecontrol-types.

use thiserror::Error;

/// Errors that can occur when encoding commands or decoding notifications.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in bluecontrol-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The parameter name is not one of the known tokens.
    #[error("Unknown parameter: '{0}'")]
    UnknownParameter(String),

    /// A SET value did not parse as the number kind the dialect requires.
    #[error("Invalid {expected} value: '{value}'")]
    InvalidNumber {
        /// The rejected value.
        value: String,
        /// The number kind the dialect expected ("integer" or "number").
        expected: &'static str,
    },

    /// The parameter has no channel in the active dialect's layout.
    #[error("Parameter '{0}' is not available in this dialect")]
    UnsupportedParameter(String),

    /// A SET value or raw message was empty.
    #[error("Empty value")]
    EmptyValue,

    /// Notification payload was not valid UTF-8.
    #[error("Payload is not valid UTF-8 ({len} bytes)")]
    InvalidUtf8 {
        /// Length of the rejected payload.
        len: usize,
    },

    /// The `all` pseudo-parameter was used where a single parameter is required.
    #[error("'all' does not name a single parameter")]
    AggregateTarget,
}

/// Result type alias using bluecontrol-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
