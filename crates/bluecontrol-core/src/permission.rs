//! Permission checks performed before radio operations.
//!
//! Host platforms gate scanning and connecting behind user-granted
//! capabilities. The session asks a [`PermissionAuthority`] before every
//! operation that needs one and fails with
//! [`Error::PermissionDenied`](crate::Error::PermissionDenied) when refused.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A platform capability required by a session operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Start or stop scanning.
    Scan,
    /// Connect, disconnect, discover services, subscribe and write.
    Connect,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Scan => f.write_str("scan"),
            Capability::Connect => f.write_str("connect"),
        }
    }
}

/// Decides whether a capability is currently granted.
///
/// Closures implement this trait, so a test can pass
/// `|cap| cap != Capability::Scan` directly.
pub trait PermissionAuthority: Send + Sync {
    /// Whether `capability` is granted right now.
    fn granted(&self, capability: Capability) -> bool;
}

impl<F> PermissionAuthority for F
where
    F: Fn(Capability) -> bool + Send + Sync,
{
    fn granted(&self, capability: Capability) -> bool {
        self(capability)
    }
}

/// Grants every capability. Used on desktop platforms, where the OS asks the
/// user on first radio access.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysGranted;

impl PermissionAuthority for AlwaysGranted {
    fn granted(&self, _capability: Capability) -> bool {
        true
    }
}
