//! [`BlePlatform`] on top of btleplug.
//!
//! btleplug exposes blocking-style async calls; this module turns them into
//! the submit-then-complete shape a session expects. Long operations run on
//! spawned tasks and report back through the attached [`EventSink`]. Writes
//! go through a single writer task so their completions arrive in order.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use bluecontrol_types::PeripheralHandle;

use crate::error::{Error, Result};
use crate::platform::{
    BlePlatform, CharacteristicProperties, EventSink, GattCharacteristic, GattService, LinkId,
    PlatformEvent,
};

/// Timeouts for btleplug operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformTimeouts {
    /// Link establishment.
    pub connect: Duration,
    /// Service discovery.
    pub discovery: Duration,
    /// A single characteristic write.
    pub write: Duration,
    /// Enabling notifications on one characteristic.
    pub subscribe: Duration,
}

impl Default for PlatformTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            discovery: Duration::from_secs(10),
            write: Duration::from_secs(10),
            subscribe: Duration::from_secs(10),
        }
    }
}

impl PlatformTimeouts {
    /// Set the connect timeout.
    #[must_use]
    pub fn connect(mut self, timeout: Duration) -> Self {
        self.connect = timeout;
        self
    }

    /// Set the discovery timeout.
    #[must_use]
    pub fn discovery(mut self, timeout: Duration) -> Self {
        self.discovery = timeout;
        self
    }

    /// Set the write timeout.
    #[must_use]
    pub fn write(mut self, timeout: Duration) -> Self {
        self.write = timeout;
        self
    }

    /// Set the subscribe timeout.
    #[must_use]
    pub fn subscribe(mut self, timeout: Duration) -> Self {
        self.subscribe = timeout;
        self
    }
}

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or_else(|| Error::device_not_found("no Bluetooth adapter"))
}

struct WriteJob {
    peripheral: Peripheral,
    characteristic: Characteristic,
    value: Vec<u8>,
}

#[derive(Default)]
struct Inner {
    sink: RwLock<Option<EventSink>>,
    peripherals: Mutex<HashMap<String, Peripheral>>,
    links: Mutex<HashMap<String, LinkId>>,
    notification_tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    writer: Mutex<Option<mpsc::UnboundedSender<WriteJob>>>,
}

impl Inner {
    fn emit(&self, event: PlatformEvent) -> bool {
        let sink = self
            .sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match sink {
            Some(sink) => sink.send(event),
            None => false,
        }
    }

    fn remember(&self, identifier: &str, peripheral: Peripheral) {
        self.peripherals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key(identifier), peripheral);
    }

    fn lookup(&self, identifier: &str) -> Option<Peripheral> {
        self.peripherals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key(identifier))
            .cloned()
    }

    /// Record an open link. A late attempt never replaces a newer link.
    fn open_link(&self, identifier: &str, link: LinkId) {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key(identifier))
            .and_modify(|current| *current = (*current).max(link))
            .or_insert(link);
    }

    /// Forget the open link to a peripheral. Only the caller that gets the
    /// id back reports the link as down.
    fn take_link(&self, identifier: &str) -> Option<LinkId> {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key(identifier))
    }

    fn identifier_of(&self, id: &PeripheralId) -> Option<String> {
        self.peripherals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(_, p)| p.id() == *id)
            .map(|(identifier, _)| identifier.clone())
    }
}

/// A [`BlePlatform`] backed by the host Bluetooth stack.
pub struct BtleplugPlatform {
    adapter: Adapter,
    timeouts: PlatformTimeouts,
    inner: Arc<Inner>,
}

impl std::fmt::Debug for BtleplugPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleplugPlatform")
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl BtleplugPlatform {
    /// Use the first available adapter.
    pub async fn new() -> Result<Self> {
        Ok(Self::with_adapter(get_adapter().await?))
    }

    /// Use a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            timeouts: PlatformTimeouts::default(),
            inner: Arc::new(Inner::default()),
        }
    }

    /// Set operation timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: PlatformTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Find the btleplug peripheral for a handle, falling back to the
    /// adapter's peripheral list for devices not seen by a scan.
    async fn peripheral(&self, handle: &PeripheralHandle) -> Result<Peripheral> {
        if let Some(peripheral) = self.inner.lookup(handle.address()) {
            return Ok(peripheral);
        }

        for peripheral in self.adapter.peripherals().await? {
            let address = peripheral.address().to_string();
            let identifier = create_identifier(&address, &peripheral.id());
            if handle.matches_address(&identifier) {
                self.inner.remember(&identifier, peripheral.clone());
                return Ok(peripheral);
            }
        }
        Err(Error::device_not_found(handle.address()))
    }

    fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Result<Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| Error::characteristic_not_found(uuid))
    }

    fn spawn_event_pump(&self) -> JoinHandle<()> {
        let adapter = self.adapter.clone();
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    warn!(error = %e, "Could not subscribe to adapter events");
                    return;
                }
            };

            while let Some(event) = events.next().await {
                match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        let Ok(peripheral) = adapter.peripheral(&id).await else {
                            continue;
                        };
                        let Ok(Some(properties)) = peripheral.properties().await else {
                            continue;
                        };
                        let identifier =
                            create_identifier(&properties.address.to_string(), &id);
                        let handle = match properties.local_name {
                            Some(name) => PeripheralHandle::with_name(&identifier, name),
                            None => PeripheralHandle::new(&identifier),
                        };
                        inner.remember(&identifier, peripheral);
                        if !inner.emit(PlatformEvent::ScanResult(handle)) {
                            break;
                        }
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        let Some(address) = inner.identifier_of(&id) else {
                            continue;
                        };
                        // A late report for a link that was already replaced.
                        if let Ok(peripheral) = adapter.peripheral(&id).await
                            && peripheral.is_connected().await.unwrap_or(false)
                        {
                            debug!(%address, "Ignoring disconnect for a connected device");
                            continue;
                        }
                        if let Some(link) = inner.take_link(&address) {
                            debug!(%address, %link, "Adapter reported disconnect");
                            inner.emit(PlatformEvent::LinkDown { address, link });
                        }
                    }
                    _ => {}
                }
            }
            debug!("Adapter event stream ended");
        })
    }

    fn spawn_writer(&self) -> (mpsc::UnboundedSender<WriteJob>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriteJob>();
        let inner = Arc::clone(&self.inner);
        let limit = self.timeouts.write;

        let task = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let uuid = job.characteristic.uuid;
                let result = bounded(
                    limit,
                    format!("write characteristic {uuid}"),
                    job.peripheral
                        .write(&job.characteristic, &job.value, WriteType::WithResponse),
                )
                .await;
                if !inner.emit(PlatformEvent::WriteCompleted { uuid, result }) {
                    break;
                }
            }
        });
        (tx, task)
    }
}

impl Drop for BtleplugPlatform {
    fn drop(&mut self) {
        for task in self
            .inner
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
        for (_, task) in self
            .inner
            .notification_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
        {
            task.abort();
        }
    }
}

#[async_trait]
impl BlePlatform for BtleplugPlatform {
    async fn attach(&self, sink: EventSink) -> Result<()> {
        *self.inner.sink.write().unwrap_or_else(PoisonError::into_inner) = Some(sink);

        let pump = self.spawn_event_pump();
        let (writer, writer_task) = self.spawn_writer();
        *self.inner.writer.lock().unwrap_or_else(PoisonError::into_inner) = Some(writer);

        let mut background = self
            .inner
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for task in background.drain(..) {
            task.abort();
        }
        background.extend([pump, writer_task]);
        Ok(())
    }

    async fn start_scan(&self) -> Result<()> {
        info!("Starting BLE scan");
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(device = %handle))]
    async fn connect(&self, handle: &PeripheralHandle, link: LinkId) -> Result<()> {
        let peripheral = self.peripheral(handle).await?;
        let inner = Arc::clone(&self.inner);
        let handle = handle.clone();
        let limit = self.timeouts.connect;

        tokio::spawn(async move {
            let result = bounded(limit, "connect to device", peripheral.connect()).await;
            if result.is_ok() {
                inner.open_link(handle.address(), link);
            }
            inner.emit(PlatformEvent::LinkUp {
                handle,
                link,
                result,
            });
        });
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(device = %handle))]
    async fn disconnect(&self, handle: &PeripheralHandle) -> Result<()> {
        let peripheral = self.peripheral(handle).await?;
        let inner = Arc::clone(&self.inner);
        let address = handle.address().to_string();
        let link = self.inner.take_link(&address);
        let limit = self.timeouts.connect;

        tokio::spawn(async move {
            if let Err(e) = bounded(limit, "disconnect from device", peripheral.disconnect()).await
            {
                warn!(error = %e, "Disconnect did not complete cleanly");
            }
            // Not every backend reports its own disconnects as adapter events.
            if let Some(link) = link {
                inner.emit(PlatformEvent::LinkDown { address, link });
            }
        });
        Ok(())
    }

    async fn close(&self, handle: &PeripheralHandle) -> Result<()> {
        let task = self
            .inner
            .notification_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key(handle.address()));
        if let Some(task) = task {
            task.abort();
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(device = %handle))]
    async fn discover_services(&self, handle: &PeripheralHandle) -> Result<()> {
        let peripheral = self.peripheral(handle).await?;
        let inner = Arc::clone(&self.inner);
        let handle = handle.clone();
        let limit = self.timeouts.discovery;

        tokio::spawn(async move {
            let result = bounded(limit, "discover services", peripheral.discover_services())
                .await
                .map(|()| {
                    let services: Vec<GattService> =
                        peripheral.services().into_iter().map(convert_service).collect();
                    debug!(count = services.len(), "Found services");
                    services
                });
            inner.emit(PlatformEvent::ServicesDiscovered { handle, result });
        });
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(device = %handle, uuid = %characteristic.uuid))]
    async fn enable_notifications(
        &self,
        handle: &PeripheralHandle,
        characteristic: &GattCharacteristic,
    ) -> Result<()> {
        if !characteristic.has_notification_descriptor() {
            return Err(Error::descriptor_missing(characteristic.uuid));
        }
        let peripheral = self.peripheral(handle).await?;
        let target = Self::find_characteristic(&peripheral, characteristic.uuid)?;
        bounded(
            self.timeouts.subscribe,
            format!("subscribe to {}", characteristic.uuid),
            peripheral.subscribe(&target),
        )
        .await?;

        let key = key(handle.address());
        let running = self
            .inner
            .notification_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .is_some_and(|task| !task.is_finished());
        if running {
            return Ok(());
        }

        let mut stream = peripheral.notifications().await?;
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                let event = PlatformEvent::CharacteristicChanged {
                    uuid: notification.uuid,
                    value: notification.value,
                };
                if !inner.emit(event) {
                    break;
                }
            }
        });
        if let Some(previous) = self
            .inner
            .notification_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, task)
        {
            previous.abort();
        }
        Ok(())
    }

    async fn write(
        &self,
        handle: &PeripheralHandle,
        characteristic: Uuid,
        value: Vec<u8>,
    ) -> Result<()> {
        let peripheral = self.peripheral(handle).await?;
        let characteristic = Self::find_characteristic(&peripheral, characteristic)?;
        let writer = self
            .inner
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::SessionClosed)?;

        writer
            .send(WriteJob {
                peripheral,
                characteristic,
                value,
            })
            .map_err(|_| Error::SessionClosed)
    }
}

async fn bounded<T>(
    limit: Duration,
    operation: impl Into<String>,
    future: impl Future<Output = btleplug::Result<T>>,
) -> Result<T> {
    match timeout(limit, future).await {
        Ok(result) => result.map_err(Error::from),
        Err(_) => Err(Error::timeout(operation, limit)),
    }
}

fn key(identifier: &str) -> String {
    identifier.to_ascii_uppercase()
}

/// Format a peripheral ID as a string.
fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// On macOS, addresses read as all zeros; the peripheral ID identifies the
/// device instead.
fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if address == "00:00:00:00:00:00" {
        format_peripheral_id(peripheral_id)
    } else {
        address.to_string()
    }
}

fn convert_service(service: Service) -> GattService {
    GattService {
        uuid: service.uuid,
        characteristics: service
            .characteristics
            .into_iter()
            .map(convert_characteristic)
            .collect(),
    }
}

fn convert_characteristic(characteristic: Characteristic) -> GattCharacteristic {
    let flags = characteristic.properties;
    GattCharacteristic {
        uuid: characteristic.uuid,
        descriptors: characteristic.descriptors.iter().map(|d| d.uuid).collect(),
        properties: CharacteristicProperties {
            read: flags.contains(CharPropFlags::READ),
            write: flags.contains(CharPropFlags::WRITE),
            write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
            notify: flags.contains(CharPropFlags::NOTIFY),
            indicate: flags.contains(CharPropFlags::INDICATE),
        },
    }
}
