//! Scripted platform for testing.
//!
//! [`MockPlatform`] implements [`BlePlatform`] without any radio. It records
//! every request and, by default, answers each one with the event a healthy
//! peripheral would produce. Tests can switch that off and push events by
//! hand with [`MockPlatform::emit`], or inject failures.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bluecontrol_core::MockPlatform;
//!
//! let mock = Arc::new(MockPlatform::new());
//! mock.set_fail_writes(true);
//! assert!(mock.calls().is_empty());
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;
use uuid::{Uuid, uuid};

use bluecontrol_types::{ChannelLayout, ParameterName, PeripheralHandle, uuids};

use crate::error::{Error, Result};
use crate::platform::{
    BlePlatform, EventSink, GattCharacteristic, GattService, LinkId, PlatformEvent,
};

/// Service UUID the mock reports its characteristics under.
pub const MOCK_SERVICE_UUID: Uuid = uuid!("0000ffa0-0000-1000-8000-00805f9b34fb");

/// A request recorded by [`MockPlatform`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    /// `start_scan`
    StartScan,
    /// `stop_scan`
    StopScan,
    /// `connect`
    Connect(PeripheralHandle),
    /// `disconnect`
    Disconnect(PeripheralHandle),
    /// `close`
    Close(PeripheralHandle),
    /// `discover_services`
    DiscoverServices(PeripheralHandle),
    /// `enable_notifications`
    EnableNotifications(Uuid),
    /// `write`, with the payload decoded as text.
    Write {
        /// Target characteristic.
        uuid: Uuid,
        /// Payload text.
        payload: String,
    },
}

/// A scripted [`BlePlatform`] for tests.
pub struct MockPlatform {
    sink: Mutex<Option<EventSink>>,
    calls: Mutex<Vec<PlatformCall>>,
    advertised: Mutex<Vec<PeripheralHandle>>,
    services: Mutex<Vec<GattService>>,
    /// Open link per address.
    links: Mutex<HashMap<String, LinkId>>,
    /// Answer requests with completion events.
    auto_respond: AtomicBool,
    /// Complete connection attempts with a failure.
    reject_connect: AtomicBool,
    /// Complete service discovery with a failure.
    fail_discovery: AtomicBool,
    /// Complete writes with a failure.
    fail_writes: AtomicBool,
    /// Refuse write submission outright.
    reject_writes: AtomicBool,
}

impl std::fmt::Debug for MockPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPlatform")
            .field("attached", &self.is_attached())
            .field("calls", &lock(&self.calls).len())
            .field("auto_respond", &self.auto_respond.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockPlatform {
    /// A mock exposing the full per-parameter characteristic table.
    pub fn new() -> Self {
        Self::with_services(Self::standard_services(ChannelLayout::PerParameter))
    }

    /// A mock exposing the given services.
    pub fn with_services(services: Vec<GattService>) -> Self {
        Self {
            sink: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            advertised: Mutex::new(Vec::new()),
            services: Mutex::new(services),
            links: Mutex::new(HashMap::new()),
            auto_respond: AtomicBool::new(true),
            reject_connect: AtomicBool::new(false),
            fail_discovery: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            reject_writes: AtomicBool::new(false),
        }
    }

    /// The services a healthy peripheral exposes for `layout`.
    pub fn standard_services(layout: ChannelLayout) -> Vec<GattService> {
        let mut characteristics = vec![GattCharacteristic::writable(uuids::COMMAND_WRITE)];
        characteristics.extend(
            layout
                .parameters()
                .iter()
                .map(|p: &ParameterName| GattCharacteristic::notifying(p.read_uuid())),
        );
        vec![GattService {
            uuid: MOCK_SERVICE_UUID,
            characteristics,
        }]
    }

    /// Devices reported when a scan starts.
    pub fn set_advertised(&self, devices: Vec<PeripheralHandle>) {
        *lock(&self.advertised) = devices;
    }

    /// Replace the services reported by discovery.
    pub fn set_services(&self, services: Vec<GattService>) {
        *lock(&self.services) = services;
    }

    /// Enable or disable automatic completion events.
    pub fn set_auto_respond(&self, enabled: bool) {
        self.auto_respond.store(enabled, Ordering::Relaxed);
    }

    /// Make connection attempts complete with a failure.
    pub fn set_reject_connect(&self, reject: bool) {
        self.reject_connect.store(reject, Ordering::Relaxed);
    }

    /// Make service discovery complete with a failure.
    pub fn set_fail_discovery(&self, fail: bool) {
        self.fail_discovery.store(fail, Ordering::Relaxed);
    }

    /// Make writes complete with a failure.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Refuse write submission.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::Relaxed);
    }

    /// Whether a session has attached.
    pub fn is_attached(&self) -> bool {
        lock(&self.sink).is_some()
    }

    /// Push an event to the attached session. Returns `false` if none is attached.
    pub fn emit(&self, event: PlatformEvent) -> bool {
        match lock(&self.sink).as_ref() {
            Some(sink) => sink.send(event),
            None => false,
        }
    }

    /// Deliver a notification.
    pub fn notify(&self, characteristic: Uuid, text: &str) -> bool {
        self.emit(PlatformEvent::CharacteristicChanged {
            uuid: characteristic,
            value: text.as_bytes().to_vec(),
        })
    }

    /// Drop the open link as if the peripheral went out of range. Returns
    /// `false` if no link to `handle` is open.
    pub fn drop_link(&self, handle: &PeripheralHandle) -> bool {
        let address = handle.address().to_string();
        let Some(link) = lock(&self.links).remove(&address) else {
            return false;
        };
        self.emit(PlatformEvent::LinkDown { address, link })
    }

    /// Id of the open link to `handle`, if any.
    pub fn current_link(&self, handle: &PeripheralHandle) -> Option<LinkId> {
        lock(&self.links).get(handle.address()).copied()
    }

    /// All recorded requests, oldest first.
    pub fn calls(&self) -> Vec<PlatformCall> {
        lock(&self.calls).clone()
    }

    /// Forget recorded requests.
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Number of `connect` requests for `handle`.
    pub fn connect_count(&self, handle: &PeripheralHandle) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| matches!(c, PlatformCall::Connect(h) if h == handle))
            .count()
    }

    /// Payloads of every write, oldest first.
    pub fn writes(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                PlatformCall::Write { payload, .. } => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: PlatformCall) {
        debug!(?call, "mock platform request");
        lock(&self.calls).push(call);
    }

    fn respond(&self, event: PlatformEvent) {
        if self.auto_respond.load(Ordering::Relaxed) {
            self.emit(event);
        }
    }
}

#[async_trait]
impl BlePlatform for MockPlatform {
    async fn attach(&self, sink: EventSink) -> Result<()> {
        *lock(&self.sink) = Some(sink);
        Ok(())
    }

    async fn start_scan(&self) -> Result<()> {
        self.record(PlatformCall::StartScan);
        let advertised = lock(&self.advertised).clone();
        for handle in advertised {
            self.respond(PlatformEvent::ScanResult(handle));
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record(PlatformCall::StopScan);
        Ok(())
    }

    async fn connect(&self, handle: &PeripheralHandle, link: LinkId) -> Result<()> {
        self.record(PlatformCall::Connect(handle.clone()));
        let result = if self.reject_connect.load(Ordering::Relaxed) {
            Err(Error::link_failure(handle.address(), "mock connection rejected"))
        } else {
            lock(&self.links).insert(handle.address().to_string(), link);
            Ok(())
        };
        self.respond(PlatformEvent::LinkUp {
            handle: handle.clone(),
            link,
            result,
        });
        Ok(())
    }

    async fn disconnect(&self, handle: &PeripheralHandle) -> Result<()> {
        self.record(PlatformCall::Disconnect(handle.clone()));
        let address = handle.address().to_string();
        if let Some(link) = lock(&self.links).remove(&address) {
            self.respond(PlatformEvent::LinkDown { address, link });
        }
        Ok(())
    }

    async fn close(&self, handle: &PeripheralHandle) -> Result<()> {
        self.record(PlatformCall::Close(handle.clone()));
        Ok(())
    }

    async fn discover_services(&self, handle: &PeripheralHandle) -> Result<()> {
        self.record(PlatformCall::DiscoverServices(handle.clone()));
        let result = if self.fail_discovery.load(Ordering::Relaxed) {
            Err(Error::link_failure(handle.address(), "mock discovery failed"))
        } else {
            Ok(lock(&self.services).clone())
        };
        self.respond(PlatformEvent::ServicesDiscovered {
            handle: handle.clone(),
            result,
        });
        Ok(())
    }

    async fn enable_notifications(
        &self,
        _handle: &PeripheralHandle,
        characteristic: &GattCharacteristic,
    ) -> Result<()> {
        self.record(PlatformCall::EnableNotifications(characteristic.uuid));
        if !characteristic.has_notification_descriptor() {
            return Err(Error::descriptor_missing(characteristic.uuid));
        }
        Ok(())
    }

    async fn write(
        &self,
        _handle: &PeripheralHandle,
        characteristic: Uuid,
        value: Vec<u8>,
    ) -> Result<()> {
        self.record(PlatformCall::Write {
            uuid: characteristic,
            payload: String::from_utf8_lossy(&value).into_owned(),
        });
        if self.reject_writes.load(Ordering::Relaxed) {
            return Err(Error::link_failure("mock", "write rejected"));
        }
        let result = if self.fail_writes.load(Ordering::Relaxed) {
            Err(Error::link_failure("mock", "write failed"))
        } else {
            Ok(())
        };
        self.respond(PlatformEvent::WriteCompleted {
            uuid: characteristic,
            result,
        });
        Ok(())
    }
}
