//! Error types for bluecontrol-core.
//!
//! Every failure a session can hit is returned to the caller as an
//! [`Error`] value. None of them tear the session down: after an error the
//! session keeps running and accepts further requests.
//!
//! ## Recovery
//!
//! | Error Type | Strategy |
//! |------------|----------|
//! | [`Error::PermissionDenied`] | Ask the user for the capability, then retry |
//! | [`Error::LinkFailure`] | Retry `connect`, possibly after a new scan |
//! | [`Error::LinkLost`] | The session reconnects on its own unless disconnected manually |
//! | [`Error::NotConnected`] | Call `connect` first |
//! | [`Error::WriteCharacteristicUnbound`] | Wait for the session to reach `Ready` |
//! | [`Error::Protocol`] | Fix the command; retrying the same input will fail again |
//! | [`Error::DescriptorMissing`] | Firmware problem; that parameter will never notify |
//! | [`Error::AggregateUnsupported`] | Set parameters one at a time |
//! | [`Error::Timeout`] | Retry; BLE operations time out under interference |
//! | [`Error::InvalidConfig`] | Fix the configuration and restart |

use std::time::Duration;

use thiserror::Error;

use bluecontrol_types::ParseError;

use crate::permission::Capability;

/// Errors that can occur while driving a bluecontrol peripheral.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy stack error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// The permission authority refused a capability.
    #[error("Permission denied: {capability} capability not granted")]
    PermissionDenied {
        /// The capability that was refused.
        capability: Capability,
    },

    /// The peripheral or stack rejected a connection attempt.
    #[error("Connection to {address} failed: {reason}")]
    LinkFailure {
        /// Address of the peripheral.
        address: String,
        /// Reason reported by the platform.
        reason: String,
    },

    /// The link dropped unexpectedly.
    #[error("Link to {address} lost")]
    LinkLost {
        /// Address of the peripheral.
        address: String,
    },

    /// Operation attempted while not connected.
    #[error("Not connected to device")]
    NotConnected,

    /// A write was attempted before the command characteristic was discovered.
    #[error("Command characteristic not bound")]
    WriteCharacteristicUnbound,

    /// A command failed validation, or a notification could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// A read characteristic has no notification configuration descriptor.
    #[error("Characteristic {uuid} has no notification descriptor")]
    DescriptorMissing {
        /// UUID of the characteristic.
        uuid: String,
    },

    /// A required characteristic was not found on the peripheral.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
    },

    /// The `all` pseudo-parameter has no wire representation.
    #[error("Setting 'all' parameters at once is not supported by the protocol")]
    AggregateUnsupported,

    /// Device not found.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The session task has stopped.
    #[error("Session closed")]
    SessionClosed,

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a permission error.
    pub fn permission_denied(capability: Capability) -> Self {
        Self::PermissionDenied { capability }
    }

    /// Create a link failure error.
    pub fn link_failure(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LinkFailure {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Create a descriptor missing error.
    pub fn descriptor_missing(uuid: impl ToString) -> Self {
        Self::DescriptorMissing {
            uuid: uuid.to_string(),
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl ToString) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.to_string(),
        }
    }

    /// Create a device not found error.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound(identifier.into())
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Result type alias using bluecontrol-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
