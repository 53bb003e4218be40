//! Core types for bluecontrol peripherals.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParseError;
use crate::uuid as uuids;

/// A controllable quantity on the peripheral.
///
/// Each parameter has its own notifying read characteristic in the
/// per-parameter layout and is named by a lowercase token in commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ParameterName {
    /// Output current.
    Current,
    /// Output voltage.
    Voltage,
    /// Stimulation frequency.
    Frequency,
    /// Left channel frequency.
    LFreq,
    /// Right channel frequency.
    RFreq,
    /// Output volume.
    Volume,
}

impl ParameterName {
    /// All parameters in characteristic table order.
    pub const ALL: [ParameterName; 6] = [
        ParameterName::Current,
        ParameterName::Voltage,
        ParameterName::Frequency,
        ParameterName::LFreq,
        ParameterName::RFreq,
        ParameterName::Volume,
    ];

    /// The lowercase wire token for this parameter.
    pub fn token(self) -> &'static str {
        match self {
            ParameterName::Current => "current",
            ParameterName::Voltage => "voltage",
            ParameterName::Frequency => "frequency",
            ParameterName::LFreq => "l_freq",
            ParameterName::RFreq => "r_freq",
            ParameterName::Volume => "volume",
        }
    }

    /// The notifying characteristic that carries this parameter's telemetry
    /// in the per-parameter layout.
    pub fn read_uuid(self) -> Uuid {
        match self {
            ParameterName::Current => uuids::READ_CURRENT,
            ParameterName::Voltage => uuids::READ_VOLTAGE,
            ParameterName::Frequency => uuids::READ_FREQUENCY,
            ParameterName::LFreq => uuids::READ_L_FREQ,
            ParameterName::RFreq => uuids::READ_R_FREQ,
            ParameterName::Volume => uuids::READ_VOLUME,
        }
    }

    /// Reverse lookup of [`ParameterName::read_uuid`].
    pub fn from_read_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.read_uuid() == uuid)
    }
}

impl fmt::Display for ParameterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for ParameterName {
    type Err = ParseError;

    /// Parse a parameter token, ignoring case.
    ///
    /// `all` is rejected with [`ParseError::AggregateTarget`]; use
    /// [`ParameterTarget`] where the pseudo-parameter is acceptable.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if lower == "all" {
            return Err(ParseError::AggregateTarget);
        }
        Self::ALL
            .into_iter()
            .find(|p| p.token() == lower)
            .ok_or_else(|| ParseError::UnknownParameter(s.to_string()))
    }
}

/// Target of a get/set request: a single parameter or the `all` pseudo-parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterTarget {
    /// One named parameter.
    One(ParameterName),
    /// Every parameter at once.
    All,
}

impl FromStr for ParameterTarget {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<ParameterName>() {
            Ok(param) => Ok(ParameterTarget::One(param)),
            Err(ParseError::AggregateTarget) => Ok(ParameterTarget::All),
            Err(e) => Err(e),
        }
    }
}

impl From<ParameterName> for ParameterTarget {
    fn from(param: ParameterName) -> Self {
        ParameterTarget::One(param)
    }
}

impl fmt::Display for ParameterTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterTarget::One(p) => p.fmt(f),
            ParameterTarget::All => f.write_str("all"),
        }
    }
}

/// A discovered peripheral.
///
/// Two handles are equal when their addresses match; the advertised name is
/// informational and may change between scan results.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeripheralHandle {
    address: String,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none", default))]
    name: Option<String>,
}

impl PeripheralHandle {
    /// Create a handle from a platform address (MAC or platform UUID).
    pub fn new(address: impl AsRef<str>) -> Self {
        Self {
            address: address.as_ref().trim().to_ascii_uppercase(),
            name: None,
        }
    }

    /// Create a handle with an advertised name.
    pub fn with_name(address: impl AsRef<str>, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(address)
        }
    }

    /// The normalised platform address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The advertised name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether this handle refers to the given address.
    pub fn matches_address(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address.trim())
    }
}

impl PartialEq for PeripheralHandle {
    fn eq(&self, other: &Self) -> bool {
        self.address.eq_ignore_ascii_case(&other.address)
    }
}

impl Eq for PeripheralHandle {}

impl Hash for PeripheralHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.address.bytes() {
            byte.to_ascii_uppercase().hash(state);
        }
    }
}

impl fmt::Display for PeripheralHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => f.write_str(&self.address),
        }
    }
}

/// How the peripheral lays out its read characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ChannelLayout {
    /// One notifying characteristic per parameter; commands name the parameter.
    #[default]
    PerParameter,
    /// A single notifying characteristic carrying `current`; commands carry no
    /// parameter token.
    SingleChannel,
}

impl ChannelLayout {
    /// Parameters that have a read channel in this layout.
    pub fn parameters(self) -> &'static [ParameterName] {
        match self {
            ChannelLayout::PerParameter => &ParameterName::ALL,
            ChannelLayout::SingleChannel => &[ParameterName::Current],
        }
    }
}

/// What a discovered characteristic is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicRole {
    /// Notifying telemetry channel for one parameter.
    Read(ParameterName),
    /// The command characteristic.
    Write,
    /// Not part of the protocol.
    Unknown,
}

impl CharacteristicRole {
    /// Classify a characteristic UUID against the fixed table for `layout`.
    pub fn classify(uuid: Uuid, layout: ChannelLayout) -> Self {
        if uuid == uuids::COMMAND_WRITE {
            return CharacteristicRole::Write;
        }
        match ParameterName::from_read_uuid(uuid) {
            Some(param) if layout.parameters().contains(&param) => CharacteristicRole::Read(param),
            _ => CharacteristicRole::Unknown,
        }
    }
}
