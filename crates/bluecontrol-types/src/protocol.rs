//! The GET/SET text protocol and its dialects.
//!
//! Commands are plain UTF-8 strings written to the command characteristic:
//!
//! | Command | Per-parameter layout | Single-channel layout |
//! |---------|----------------------|-----------------------|
//! | get     | `GET voltage`        | `GET`                 |
//! | set     | `SET voltage 12.5`   | `SET 12.5`            |
//!
//! Notifications carry the value of one parameter as text, either raw
//! (`12.5`) or prefixed (`Value:12.5`).
//!
//! Peripheral firmware generations disagree on token case, numeric
//! validation and payload prefix, so every one of those choices lives in a
//! [`Dialect`] rather than being hard-coded.

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};
use crate::types::{ChannelLayout, ParameterName};

/// Prefix used by value-prefixed notification payloads.
pub const VALUE_PREFIX: &str = "Value:";

/// Case of the parameter token inside commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TokenCase {
    /// `SET voltage 12`
    #[default]
    Lower,
    /// `SET VOLTAGE 12`
    Upper,
}

/// Validation applied to SET values before they are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum NumericRule {
    /// Values must parse as a signed integer.
    Integer,
    /// Values must parse as a finite decimal number.
    #[default]
    Float,
    /// Any non-empty value is sent as-is.
    Unchecked,
}

impl NumericRule {
    fn expected(self) -> &'static str {
        match self {
            NumericRule::Integer => "integer",
            NumericRule::Float | NumericRule::Unchecked => "number",
        }
    }

    /// Check a value against this rule.
    pub fn check(self, value: &str) -> ParseResult<()> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ParseError::EmptyValue);
        }
        let ok = match self {
            NumericRule::Integer => value.parse::<i64>().is_ok(),
            NumericRule::Float => value.parse::<f64>().is_ok_and(f64::is_finite),
            NumericRule::Unchecked => true,
        };
        if ok {
            Ok(())
        } else {
            Err(ParseError::InvalidNumber {
                value: value.to_string(),
                expected: self.expected(),
            })
        }
    }
}

/// Shape of notification payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PayloadFormat {
    /// The trimmed payload is the value.
    #[default]
    Raw,
    /// Only payloads starting with `Value:` carry a value; anything else is
    /// surfaced as a message without touching the parameter.
    ValuePrefixed,
}

/// Strictness of raw writes that bypass the command encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RawWritePolicy {
    /// Send the message exactly as given.
    Verbatim,
    /// The last space-separated token must parse as a number.
    #[default]
    NumericSuffix,
}

/// A command for the peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask the peripheral to report a parameter.
    Get(ParameterName),
    /// Set a parameter to a new value.
    Set {
        /// Parameter to change.
        param: ParameterName,
        /// New value, as text.
        value: String,
    },
}

impl Command {
    /// The parameter this command addresses.
    pub fn param(&self) -> ParameterName {
        match self {
            Command::Get(param) | Command::Set { param, .. } => *param,
        }
    }
}

/// A decoded notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// The trimmed notification text, surfaced verbatim as the last message.
    pub message: String,
    /// The parameter value carried by the payload, if any.
    pub value: Option<String>,
}

/// A protocol dialect.
///
/// # Example
///
/// ```
/// use bluecontrol_types::{Command, Dialect, ParameterName, TokenCase};
///
/// let dialect = Dialect::multi_channel();
/// let cmd = Command::Set { param: ParameterName::Voltage, value: "12.5".into() };
/// assert_eq!(dialect.encode(&cmd).unwrap(), "SET voltage 12.5");
///
/// let upper = Dialect::multi_channel().token_case(TokenCase::Upper);
/// assert_eq!(upper.encode(&cmd).unwrap(), "SET VOLTAGE 12.5");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Dialect {
    /// Read characteristic layout.
    pub layout: ChannelLayout,
    /// Case of parameter tokens in commands.
    pub token_case: TokenCase,
    /// Validation applied to SET values.
    pub numeric: NumericRule,
    /// Shape of notification payloads.
    pub payload: PayloadFormat,
    /// Strictness of raw writes.
    pub raw_writes: RawWritePolicy,
    /// Delay in milliseconds after the command characteristic is bound before
    /// an automatic `GET` is sent. `None` disables the automatic fetch.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub initial_fetch_ms: Option<u64>,
}

impl Default for Dialect {
    fn default() -> Self {
        Self::multi_channel()
    }
}

impl Dialect {
    /// The first firmware generation: one read channel, integer values,
    /// `Value:` prefixed notifications and an automatic `GET` 500 ms after
    /// the command characteristic is found.
    pub fn legacy() -> Self {
        Self {
            layout: ChannelLayout::SingleChannel,
            token_case: TokenCase::Lower,
            numeric: NumericRule::Integer,
            payload: PayloadFormat::ValuePrefixed,
            raw_writes: RawWritePolicy::Verbatim,
            initial_fetch_ms: Some(500),
        }
    }

    /// The later firmware generation: one read channel per parameter,
    /// decimal values and raw notifications.
    pub fn multi_channel() -> Self {
        Self {
            layout: ChannelLayout::PerParameter,
            token_case: TokenCase::Lower,
            numeric: NumericRule::Float,
            payload: PayloadFormat::Raw,
            raw_writes: RawWritePolicy::NumericSuffix,
            initial_fetch_ms: None,
        }
    }

    /// Look up a preset by name (`legacy`, `multi_channel`/`multi-channel`).
    pub fn preset(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "legacy" => Some(Self::legacy()),
            "multi_channel" | "multi" => Some(Self::multi_channel()),
            _ => None,
        }
    }

    /// Set the token case.
    #[must_use]
    pub fn token_case(mut self, case: TokenCase) -> Self {
        self.token_case = case;
        self
    }

    /// Set the SET value validation rule.
    #[must_use]
    pub fn numeric(mut self, rule: NumericRule) -> Self {
        self.numeric = rule;
        self
    }

    /// Set the raw write policy.
    #[must_use]
    pub fn raw_writes(mut self, policy: RawWritePolicy) -> Self {
        self.raw_writes = policy;
        self
    }

    /// Set the automatic fetch delay.
    #[must_use]
    pub fn initial_fetch(mut self, delay: Option<Duration>) -> Self {
        self.initial_fetch_ms = delay.map(|d| d.as_millis() as u64);
        self
    }

    /// Automatic fetch delay, if enabled.
    pub fn initial_fetch_delay(&self) -> Option<Duration> {
        self.initial_fetch_ms.map(Duration::from_millis)
    }

    /// Parameters that have a read channel in this dialect.
    pub fn parameters(&self) -> &'static [ParameterName] {
        self.layout.parameters()
    }

    /// The parameter token as it appears on the wire.
    pub fn token(&self, param: ParameterName) -> String {
        match self.token_case {
            TokenCase::Lower => param.token().to_string(),
            TokenCase::Upper => param.token().to_ascii_uppercase(),
        }
    }

    /// Encode a command into its wire string.
    ///
    /// SET values are validated according to [`Dialect::numeric`]; GET is
    /// never validated.
    pub fn encode(&self, command: &Command) -> ParseResult<String> {
        let param = command.param();
        if !self.parameters().contains(&param) {
            return Err(ParseError::UnsupportedParameter(param.token().to_string()));
        }

        match (command, self.layout) {
            (Command::Get(_), ChannelLayout::PerParameter) => {
                Ok(format!("GET {}", self.token(param)))
            }
            (Command::Get(_), ChannelLayout::SingleChannel) => Ok("GET".to_string()),
            (Command::Set { value, .. }, layout) => {
                self.numeric.check(value)?;
                let value = value.trim();
                Ok(match layout {
                    ChannelLayout::PerParameter => format!("SET {} {}", self.token(param), value),
                    ChannelLayout::SingleChannel => format!("SET {}", value),
                })
            }
        }
    }

    /// Check a raw message against [`Dialect::raw_writes`].
    pub fn check_raw(&self, message: &str) -> ParseResult<()> {
        if message.is_empty() {
            return Err(ParseError::EmptyValue);
        }
        match self.raw_writes {
            RawWritePolicy::Verbatim => Ok(()),
            RawWritePolicy::NumericSuffix => {
                let suffix = message.split(' ').next_back().unwrap_or_default();
                NumericRule::Float.check(suffix)
            }
        }
    }

    /// Decode a notification payload.
    pub fn decode(&self, payload: &[u8]) -> ParseResult<Decoded> {
        let text = std::str::from_utf8(payload).map_err(|_| ParseError::InvalidUtf8 {
            len: payload.len(),
        })?;
        let message = text.trim().to_string();
        let value = match self.payload {
            PayloadFormat::Raw => Some(message.clone()),
            PayloadFormat::ValuePrefixed => message
                .strip_prefix(VALUE_PREFIX)
                .map(|rest| rest.trim().to_string()),
        };
        Ok(Decoded { message, value })
    }
}


/// Property-based tests for the codec.
///
/// # Running Tests
///
/// ```bash
/// cargo test -p bluecontrol-types protocol::proptests
/// ```
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn any_param() -> impl Strategy<Value = ParameterName> {
        proptest::sample::select(ParameterName::ALL.to_vec())
    }

    proptest! {
        /// Decoding arbitrary bytes never panics.
        #[test]
        fn decode_never_panics(data: Vec<u8>) {
            let _ = Dialect::multi_channel().decode(&data);
            let _ = Dialect::legacy().decode(&data);
        }

        /// Decoded messages never carry surrounding whitespace.
        #[test]
        fn decoded_message_is_trimmed(text in "\\PC{0,32}") {
            let decoded = Dialect::multi_channel().decode(text.as_bytes()).unwrap();
            prop_assert_eq!(decoded.message.as_str(), decoded.message.trim());
        }

        /// Every finite float is accepted by the float rule and encoded verbatim.
        #[test]
        fn finite_floats_encode(param in any_param(), value in -1.0e6f64..1.0e6) {
            let text = value.to_string();
            let encoded = Dialect::multi_channel()
                .encode(&Command::Set { param, value: text.clone() })
                .unwrap();
            prop_assert_eq!(encoded, format!("SET {} {}", param.token(), text));
        }

        /// Every integer is accepted by the legacy dialect.
        #[test]
        fn integers_encode_in_legacy(value: i32) {
            let encoded = Dialect::legacy()
                .encode(&Command::Set { param: ParameterName::Current, value: value.to_string() })
                .unwrap();
            prop_assert_eq!(encoded, format!("SET {}", value));
        }

        /// Alphabetic values are never accepted by a numeric rule.
        #[test]
        fn alphabetic_values_rejected(param in any_param(), value in "[a-zA-Z]{1,8}") {
            prop_assume!(!["inf", "infinity", "nan"].contains(&value.to_ascii_lowercase().as_str()));
            let result = Dialect::multi_channel().encode(&Command::Set { param, value });
            let rejected = matches!(result, Err(ParseError::InvalidNumber { .. }));
            prop_assert!(rejected);
        }
    }
}
