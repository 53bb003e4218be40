//! Session event system.
//!
//! Besides the state snapshot, a session broadcasts a [`SessionEvent`] for
//! everything that happens: discoveries, state changes, notifications and
//! errors that were not returned to a caller (failures inside platform
//! callbacks have nobody to return to).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use bluecontrol_types::{ParameterName, PeripheralHandle};

use crate::state::SessionState;

/// Events emitted by a session.
///
/// All events are serializable for logging, persistence, and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SessionEvent {
    /// A new peripheral was discovered during scanning.
    Discovered { device: PeripheralHandle },
    /// The session moved to a new state.
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// The link came up.
    Connected { device: PeripheralHandle },
    /// The link went down or was torn down.
    Disconnected {
        device: PeripheralHandle,
        reason: DisconnectReason,
    },
    /// A reconnect attempt was scheduled.
    ReconnectScheduled {
        device: PeripheralHandle,
        attempt: u32,
        delay_ms: u64,
    },
    /// The reconnect policy allows no further attempts.
    ReconnectExhausted {
        device: PeripheralHandle,
        attempts: u32,
    },
    /// The command characteristic was bound and notifications enabled.
    Ready {
        device: PeripheralHandle,
        subscribed: Vec<ParameterName>,
    },
    /// A parameter value changed (locally or from the peripheral).
    ValueChanged {
        param: ParameterName,
        value: String,
        pending: bool,
    },
    /// A notification was decoded.
    Message { text: String },
    /// A write finished on the peripheral.
    WriteCompleted {
        param: Option<ParameterName>,
        success: bool,
    },
    /// An error occurred outside a caller's request.
    Error { error: String },
}

/// Reason for disconnection.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DisconnectReason {
    /// `disconnect()` was called.
    UserRequested,
    /// The link dropped unexpectedly.
    LinkLost,
    /// The connection attempt failed.
    LinkFailure(String),
    /// A connection to a different peripheral replaced this one.
    Superseded,
}

/// Sender for session events.
pub type EventSender = broadcast::Sender<SessionEvent>;

/// Receiver for session events.
pub type EventReceiver = broadcast::Receiver<SessionEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: SessionEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
