//! The seam between a session and a Bluetooth stack.
//!
//! A [`BlePlatform`] accepts requests and returns as soon as the request is
//! submitted. Completions arrive later as [`PlatformEvent`]s pushed into the
//! [`EventSink`] the session attached, the same shape every host stack uses
//! for its GATT callbacks. The session is the only consumer of those events,
//! so all state changes happen on its task.
//!
//! Two implementations ship with this crate:
//!
//! - [`BtleplugPlatform`](crate::BtleplugPlatform) drives real adapters.
//! - [`MockPlatform`](crate::MockPlatform) is scripted for tests.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use bluecontrol_types::PeripheralHandle;
use bluecontrol_types::uuids::CLIENT_CHARACTERISTIC_CONFIG;

use crate::error::Result;

/// Properties of a GATT characteristic relevant to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicProperties {
    /// Supports reads.
    pub read: bool,
    /// Supports writes with response.
    pub write: bool,
    /// Supports writes without response.
    pub write_without_response: bool,
    /// Supports notifications.
    pub notify: bool,
    /// Supports indications.
    pub indicate: bool,
}

/// A discovered GATT characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUIDs of its descriptors.
    pub descriptors: Vec<Uuid>,
    /// Supported operations.
    pub properties: CharacteristicProperties,
}

impl GattCharacteristic {
    /// A notifying characteristic with the notification descriptor.
    pub fn notifying(uuid: Uuid) -> Self {
        Self {
            uuid,
            descriptors: vec![CLIENT_CHARACTERISTIC_CONFIG],
            properties: CharacteristicProperties {
                read: true,
                notify: true,
                ..Default::default()
            },
        }
    }

    /// A writable characteristic without descriptors.
    pub fn writable(uuid: Uuid) -> Self {
        Self {
            uuid,
            descriptors: Vec::new(),
            properties: CharacteristicProperties {
                write: true,
                write_without_response: true,
                ..Default::default()
            },
        }
    }

    /// Whether the characteristic has a descriptor with `uuid`.
    pub fn has_descriptor(&self, uuid: Uuid) -> bool {
        self.descriptors.contains(&uuid)
    }

    /// Whether notifications can be enabled through the standard descriptor.
    pub fn has_notification_descriptor(&self) -> bool {
        self.has_descriptor(CLIENT_CHARACTERISTIC_CONFIG)
    }
}

/// A discovered GATT service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    /// Service UUID.
    pub uuid: Uuid,
    /// Its characteristics.
    pub characteristics: Vec<GattCharacteristic>,
}

/// Identifies one connection attempt and the link it opens.
///
/// The session picks a fresh id for every [`BlePlatform::connect`] and the
/// platform tags the matching [`PlatformEvent::LinkUp`] and
/// [`PlatformEvent::LinkDown`] with it, so teardown of a released link can
/// never be mistaken for a later link to the same peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct LinkId(pub u64);

impl LinkId {
    /// The id that follows this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Completion or unsolicited event from a platform.
#[derive(Debug)]
pub enum PlatformEvent {
    /// A peripheral was seen while scanning.
    ScanResult(PeripheralHandle),
    /// A connection attempt finished.
    LinkUp {
        /// Peripheral the attempt was for.
        handle: PeripheralHandle,
        /// Id passed to `connect`.
        link: LinkId,
        /// Outcome of the attempt.
        result: Result<()>,
    },
    /// A link went down.
    LinkDown {
        /// Address of the peripheral.
        address: String,
        /// Id of the link that went down.
        link: LinkId,
    },
    /// Service discovery finished.
    ServicesDiscovered {
        /// Peripheral the discovery ran on.
        handle: PeripheralHandle,
        /// Discovered services, or the failure.
        result: Result<Vec<GattService>>,
    },
    /// A notifying characteristic changed.
    CharacteristicChanged {
        /// Characteristic UUID.
        uuid: Uuid,
        /// New raw value.
        value: Vec<u8>,
    },
    /// A characteristic write finished.
    WriteCompleted {
        /// Characteristic UUID.
        uuid: Uuid,
        /// Outcome of the write.
        result: Result<()>,
    },
}

/// Where a platform delivers its [`PlatformEvent`]s.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<PlatformEvent>,
}

impl EventSink {
    /// Create a sink and the receiver that drains it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PlatformEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver an event. Returns `false` once the session has stopped.
    pub fn send(&self, event: PlatformEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Whether the receiving session has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A Bluetooth stack as seen by a session.
///
/// Every request method returns once the request has been submitted. A
/// returned error means the request could not be submitted at all; failures
/// after submission are reported through [`PlatformEvent`]s.
#[async_trait]
pub trait BlePlatform: Send + Sync {
    /// Register the sink that receives this platform's events.
    async fn attach(&self, sink: EventSink) -> Result<()>;

    /// Start scanning; results arrive as [`PlatformEvent::ScanResult`].
    async fn start_scan(&self) -> Result<()>;

    /// Stop scanning.
    async fn stop_scan(&self) -> Result<()>;

    /// Open a link; completes with [`PlatformEvent::LinkUp`] carrying `link`.
    /// Every later [`PlatformEvent::LinkDown`] for this link carries it too.
    async fn connect(&self, handle: &PeripheralHandle, link: LinkId) -> Result<()>;

    /// Tear a link down; completes with exactly one [`PlatformEvent::LinkDown`]
    /// for the current link.
    async fn disconnect(&self, handle: &PeripheralHandle) -> Result<()>;

    /// Release platform resources held for a peripheral.
    async fn close(&self, handle: &PeripheralHandle) -> Result<()>;

    /// Discover services; completes with [`PlatformEvent::ServicesDiscovered`].
    async fn discover_services(&self, handle: &PeripheralHandle) -> Result<()>;

    /// Enable notifications on a characteristic by writing its notification
    /// descriptor. Values then arrive as [`PlatformEvent::CharacteristicChanged`].
    ///
    /// Fails with [`Error::DescriptorMissing`](crate::Error::DescriptorMissing)
    /// when the characteristic has no such descriptor.
    async fn enable_notifications(
        &self,
        handle: &PeripheralHandle,
        characteristic: &GattCharacteristic,
    ) -> Result<()>;

    /// Write a value; completes with [`PlatformEvent::WriteCompleted`].
    async fn write(&self, handle: &PeripheralHandle, characteristic: Uuid, value: Vec<u8>)
    -> Result<()>;
}
