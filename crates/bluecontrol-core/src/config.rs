//! Session configuration.

use std::time::Duration;

use bluecontrol_types::Dialect;

use crate::error::{Error, Result};
use crate::reconnect::ReconnectPolicy;
use crate::store::DEFAULT_ADDRESS_KEY;

/// Delay between link-up and service discovery.
///
/// Some peripheral firmware answers GATT requests only after a short pause
/// following link establishment.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(600);

/// Configuration for a [`DeviceSession`](crate::DeviceSession).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use bluecontrol_core::{ReconnectPolicy, SessionConfig};
/// use bluecontrol_types::Dialect;
///
/// let config = SessionConfig::new()
///     .dialect(Dialect::legacy())
///     .settle_delay(Duration::from_millis(800))
///     .reconnect(ReconnectPolicy::exponential().max_attempts(10));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Protocol dialect spoken by the peripheral.
    pub dialect: Dialect,
    /// Delay between link-up and service discovery.
    pub settle_delay: Duration,
    /// Reconnect policy after unexpected drops.
    pub reconnect: ReconnectPolicy,
    /// Capacity of the request mailbox.
    pub mailbox_capacity: usize,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Key passed to the address store on link-up.
    pub address_key: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            reconnect: ReconnectPolicy::default(),
            mailbox_capacity: 32,
            event_capacity: 100,
            address_key: DEFAULT_ADDRESS_KEY.to_string(),
        }
    }
}

impl SessionConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the protocol dialect.
    #[must_use]
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Set the settle delay.
    #[must_use]
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the reconnect policy.
    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set the request mailbox capacity.
    #[must_use]
    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the address store key.
    #[must_use]
    pub fn address_key(mut self, key: impl Into<String>) -> Self {
        self.address_key = key.into();
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.mailbox_capacity == 0 {
            return Err(Error::invalid_config("mailbox_capacity must be > 0"));
        }
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be > 0"));
        }
        if self.address_key.trim().is_empty() {
            return Err(Error::invalid_config("address_key must not be empty"));
        }
        self.reconnect.validate()
    }
}
