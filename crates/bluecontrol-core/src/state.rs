//! Observable session state.
//!
//! The session task owns a [`SessionSnapshot`] and publishes a copy after
//! every change. Callers read it through
//! [`SessionHandle::snapshot`](crate::SessionHandle::snapshot) or watch it
//! with [`SessionHandle::subscribe`](crate::SessionHandle::subscribe); they
//! never mutate it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use bluecontrol_types::{ParameterName, PeripheralHandle};

/// Link lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Nothing in progress.
    #[default]
    Idle,
    /// Scanning with no link.
    Scanning,
    /// Waiting for the link to come up.
    Connecting,
    /// Link is up; waiting for the settle delay or for discovery to finish.
    ServiceDiscovery,
    /// Characteristics are bound and commands can be sent.
    Ready,
    /// The link went down, failed or was torn down by the user.
    Disconnected,
}

impl SessionState {
    /// Whether a link exists or is being established.
    pub fn has_link(self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::ServiceDiscovery | SessionState::Ready
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Scanning => "scanning",
            SessionState::Connecting => "connecting",
            SessionState::ServiceDiscovery => "service discovery",
            SessionState::Ready => "ready",
            SessionState::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Whether a locally held value has been confirmed by the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueStatus {
    /// Set locally, not yet confirmed.
    Pending,
    /// Confirmed by a platform callback or a notification.
    Confirmed,
}

/// A value tagged with its confirmation status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tracked<T> {
    /// The value.
    pub value: T,
    /// Whether it has been confirmed.
    pub status: ValueStatus,
}

impl<T> Tracked<T> {
    /// A value set optimistically.
    pub fn pending(value: T) -> Self {
        Self {
            value,
            status: ValueStatus::Pending,
        }
    }

    /// A confirmed value.
    pub fn confirmed(value: T) -> Self {
        Self {
            value,
            status: ValueStatus::Confirmed,
        }
    }

    /// Whether the value is still awaiting confirmation.
    pub fn is_pending(&self) -> bool {
        self.status == ValueStatus::Pending
    }
}

/// Last known value of one parameter.
///
/// `value` is what callers should display. `confirmed` is the last value the
/// peripheral itself reported; a failed write rolls `value` back to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterValue {
    /// Displayed value, possibly pending.
    pub value: Tracked<String>,
    /// Last value reported by the peripheral.
    pub confirmed: Option<String>,
}

impl ParameterValue {
    pub(crate) fn from_peripheral(value: String) -> Self {
        Self {
            confirmed: Some(value.clone()),
            value: Tracked::confirmed(value),
        }
    }

    /// The displayed value.
    pub fn as_str(&self) -> &str {
        &self.value.value
    }

    /// Whether the displayed value is awaiting confirmation.
    pub fn is_pending(&self) -> bool {
        self.value.is_pending()
    }
}

/// Everything a presentation layer needs to render a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Link lifecycle state.
    pub state: SessionState,
    /// Whether the platform scan is running.
    pub scanning: bool,
    /// Discovered peripherals, de-duplicated by address, in discovery order.
    pub discovered: Vec<PeripheralHandle>,
    /// The device being connected to or connected.
    pub connected_device: Option<Tracked<PeripheralHandle>>,
    /// Set by `disconnect()`; suppresses automatic reconnects until the next link-up.
    pub manual_disconnect: bool,
    /// Whether the command characteristic is bound.
    pub write_bound: bool,
    /// Parameters whose notifications are enabled.
    pub subscribed: BTreeSet<ParameterName>,
    /// Last known value per parameter.
    pub parameters: BTreeMap<ParameterName, ParameterValue>,
    /// Most recent decoded notification text.
    pub last_message: Option<String>,
    /// Number of consecutive reconnect attempts since the last successful link-up.
    pub reconnect_attempt: u32,
}

impl SessionSnapshot {
    /// Whether the link is up and the command characteristic is bound.
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready && self.write_bound
    }

    /// Whether the link is confirmed up.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            SessionState::ServiceDiscovery | SessionState::Ready
        )
    }

    /// Displayed value of `param`, if any.
    pub fn value(&self, param: ParameterName) -> Option<&str> {
        self.parameters.get(&param).map(ParameterValue::as_str)
    }
}
