//! Platform-agnostic protocol types for bluecontrol peripherals.
//!
//! This crate holds everything about the peripheral that does not need a
//! Bluetooth stack: the parameter set, the characteristic UUID table and the
//! GET/SET text protocol with its dialects. `bluecontrol-core` builds the
//! BLE session on top of it.
//!
//! # Example
//!
//! ```
//! use bluecontrol_types::{Command, Dialect, ParameterName};
//!
//! let dialect = Dialect::multi_channel();
//! let wire = dialect.encode(&Command::Get(ParameterName::Volume)).unwrap();
//! assert_eq!(wire, "GET volume");
//!
//! let decoded = dialect.decode(b"0.75\n").unwrap();
//! assert_eq!(decoded.value.as_deref(), Some("0.75"));
//! ```

pub mod error;
pub mod protocol;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use protocol::{
    Command, Decoded, Dialect, NumericRule, PayloadFormat, RawWritePolicy, TokenCase,
    VALUE_PREFIX,
};
pub use types::{
    ChannelLayout, CharacteristicRole, ParameterName, ParameterTarget, PeripheralHandle,
};
pub use uuid as uuids;
