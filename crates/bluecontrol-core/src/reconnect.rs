//! Reconnect policy applied when a link drops unexpectedly.
//!
//! The default reproduces the behaviour peripherals in the field were built
//! against: one attempt a fixed second after each drop, repeated for as long
//! as the drops keep coming. Bounded and exponential policies are available
//! for long-running hosts that should eventually give up.
//!
//! ```
//! use std::time::Duration;
//! use bluecontrol_core::ReconnectPolicy;
//!
//! let policy = ReconnectPolicy::exponential()
//!     .max_attempts(5)
//!     .initial_delay(Duration::from_millis(500));
//! assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
//! assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
//! ```

use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};

/// Delay before reconnecting after an unexpected drop.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// When and how often to reconnect after an unexpected link loss.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Maximum number of consecutive attempts (None = unlimited).
    pub max_attempts: Option<u32>,
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay (for exponential backoff).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to use exponential backoff.
    pub use_exponential_backoff: bool,
    /// Whether to add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay: DEFAULT_RECONNECT_DELAY,
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            use_exponential_backoff: false,
            jitter: false,
        }
    }
}

impl ReconnectPolicy {
    /// Fixed 1 s delay, unlimited attempts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed delay, unlimited attempts.
    pub fn fixed_delay(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            ..Default::default()
        }
    }

    /// Exponential backoff from 1 s, capped at 60 s, unlimited attempts.
    pub fn exponential() -> Self {
        Self {
            use_exponential_backoff: true,
            ..Default::default()
        }
    }

    /// Never reconnect automatically.
    pub fn disabled() -> Self {
        Self {
            max_attempts: Some(0),
            ..Default::default()
        }
    }

    /// Set maximum number of consecutive attempts.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Allow unlimited attempts.
    #[must_use]
    pub fn unlimited(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Set delay before the first attempt.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay cap.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier for exponential backoff.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable exponential backoff.
    #[must_use]
    pub fn exponential_backoff(mut self, enabled: bool) -> Self {
        self.use_exponential_backoff = enabled;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Whether attempt number `attempt` (1-based) is still allowed.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max)
    }

    /// Calculate the delay for a given attempt number (0-based), without jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if !self.use_exponential_backoff {
            return self.initial_delay;
        }

        let delay_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let delay_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }

    /// Delay for attempt `attempt` (0-based) with jitter applied if enabled.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if self.jitter {
            let jitter_factor = 1.0 + (rand::rng().random::<f64>() * 0.25);
            delay.mul_f64(jitter_factor)
        } else {
            delay
        }
    }

    /// Validate the policy and return an error if invalid.
    ///
    /// Checks that:
    /// - `backoff_multiplier` is >= 1.0
    /// - `initial_delay` is > 0
    /// - `max_delay` >= `initial_delay`
    pub fn validate(&self) -> Result<()> {
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(Error::invalid_config("backoff_multiplier must be >= 1.0"));
        }
        if self.initial_delay.is_zero() {
            return Err(Error::invalid_config("initial_delay must be > 0"));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::invalid_config("max_delay must be >= initial_delay"));
        }
        Ok(())
    }
}
