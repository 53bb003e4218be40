//! BLE session engine for bluecontrol peripherals.
//!
//! A bluecontrol peripheral exposes six parameters (current, voltage,
//! frequency, left frequency, right frequency, volume). Each one reports
//! through its own notifying characteristic, and a single writable
//! characteristic accepts text commands such as `GET volume` or
//! `SET voltage 12.5`.
//!
//! This crate drives one peripheral at a time through a [`DeviceSession`]:
//!
//! - **Scanning**: de-duplicated discovery list
//! - **Connection lifecycle**: settle delay, service discovery, notification setup
//! - **Auto-reconnection**: after unexpected drops, unless the user disconnected
//! - **Parameter values**: optimistic local updates confirmed by notifications
//! - **Observation**: a [`watch`](tokio::sync::watch) snapshot plus broadcast events
//!
//! The Bluetooth stack sits behind the [`BlePlatform`] trait.
//! [`BtleplugPlatform`] talks to real adapters; [`MockPlatform`] is scripted
//! for tests.
//!
//! # Platform Differences
//!
//! On Linux and Windows peripherals are identified by their MAC address. On
//! macOS CoreBluetooth hides the address and a per-host UUID is used instead;
//! store whichever identifier the scan reported.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use bluecontrol_core::{BtleplugPlatform, Collaborators, DeviceSession, SessionConfig, SessionState};
//! use bluecontrol_types::ParameterName;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let platform = Arc::new(BtleplugPlatform::new().await?);
//!     let collaborators = Collaborators::new().message_sink(|msg| println!("<- {msg}"));
//!     let session = DeviceSession::spawn(platform, SessionConfig::default(), collaborators).await?;
//!
//!     session.start_scan().await?;
//!     let snapshot = session
//!         .wait_for(Duration::from_secs(10), |s| !s.discovered.is_empty())
//!         .await?;
//!     session.stop_scan().await?;
//!
//!     session.connect(&snapshot.discovered[0]).await?;
//!     session.wait_for_state(SessionState::Ready, Duration::from_secs(20)).await?;
//!     session.get_value(ParameterName::Volume).await?;
//!     Ok(())
//! }
//! ```

pub mod btle;
pub mod config;
pub mod error;
pub mod events;
pub mod mock;
pub mod permission;
pub mod platform;
pub mod reconnect;
pub mod session;
pub mod state;
pub mod store;

// Re-export the protocol crate's modules
pub use bluecontrol_types::protocol;
pub use bluecontrol_types::types;
pub use bluecontrol_types::uuids;

pub use btle::{BtleplugPlatform, PlatformTimeouts, get_adapter};
pub use config::{DEFAULT_SETTLE_DELAY, SessionConfig};
pub use error::{Error, Result};
pub use events::{
    DisconnectReason, EventDispatcher, EventReceiver, EventSender, SessionEvent,
};
pub use mock::{MOCK_SERVICE_UUID, MockPlatform, PlatformCall};
pub use permission::{AlwaysGranted, Capability, PermissionAuthority};
pub use platform::{
    BlePlatform, CharacteristicProperties, EventSink, GattCharacteristic, GattService, LinkId,
    PlatformEvent,
};
pub use reconnect::{DEFAULT_RECONNECT_DELAY, ReconnectPolicy};
pub use session::{Collaborators, DeviceSession, MessageSink, SessionHandle};
pub use state::{ParameterValue, SessionSnapshot, SessionState, Tracked, ValueStatus};
pub use store::{AddressStore, DEFAULT_ADDRESS_KEY, MemoryAddressStore};

// Re-export the types most callers need alongside a session
pub use bluecontrol_types::{
    ChannelLayout, Command, Dialect, ParameterName, ParameterTarget, ParseError, PeripheralHandle,
};
