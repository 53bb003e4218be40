//! The device session.
//!
//! A session owns one BLE link and everything attached to it. It runs as a
//! single tokio task; every input reaches that task as a message:
//!
//! - requests from [`SessionHandle`]s, each answered through a oneshot reply,
//! - [`PlatformEvent`]s from the attached [`BlePlatform`],
//! - timer firings (settle delay, reconnect delay, initial fetch).
//!
//! Nothing outside the task touches session state. Callers observe it
//! through a [`watch`] channel of [`SessionSnapshot`]s and a broadcast
//! channel of [`SessionEvent`]s.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use bluecontrol_core::{BtleplugPlatform, Collaborators, DeviceSession, SessionConfig, SessionState};
//! use bluecontrol_types::{ParameterName, PeripheralHandle};
//!
//! # async fn example() -> bluecontrol_core::Result<()> {
//! let platform = Arc::new(BtleplugPlatform::new().await?);
//! let session = DeviceSession::spawn(platform, SessionConfig::default(), Collaborators::default()).await?;
//!
//! session.connect(&PeripheralHandle::new("AA:BB:CC:DD:EE:FF")).await?;
//! session.wait_for_state(SessionState::Ready, Duration::from_secs(20)).await?;
//! session.set_value(ParameterName::Voltage, "12.5").await?;
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use bluecontrol_types::{
    CharacteristicRole, Command, Dialect, ParameterName, ParameterTarget, PeripheralHandle,
};

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::events::{DisconnectReason, EventDispatcher, EventReceiver, SessionEvent};
use crate::permission::{AlwaysGranted, Capability, PermissionAuthority};
use crate::platform::{
    BlePlatform, EventSink, GattCharacteristic, GattService, LinkId, PlatformEvent,
};
use crate::state::{ParameterValue, SessionSnapshot, SessionState, Tracked};
use crate::store::{AddressStore, MemoryAddressStore};

/// Callback invoked with every decoded notification string.
pub type MessageSink = Arc<dyn Fn(&str) + Send + Sync>;

/// External collaborators a session calls out to.
#[derive(Clone)]
pub struct Collaborators {
    /// Checked before every radio operation.
    pub permissions: Arc<dyn PermissionAuthority>,
    /// Receives the device address on every successful link-up.
    pub store: Arc<dyn AddressStore>,
    /// Receives every decoded notification.
    pub message_sink: Option<MessageSink>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            permissions: Arc::new(AlwaysGranted),
            store: Arc::new(MemoryAddressStore::new()),
            message_sink: None,
        }
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("message_sink", &self.message_sink.is_some())
            .finish_non_exhaustive()
    }
}

impl Collaborators {
    /// Default collaborators: everything granted, addresses kept in memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the permission authority.
    #[must_use]
    pub fn permissions(mut self, authority: impl PermissionAuthority + 'static) -> Self {
        self.permissions = Arc::new(authority);
        self
    }

    /// Set the address store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn AddressStore>) -> Self {
        self.store = store;
        self
    }

    /// Set the message sink.
    #[must_use]
    pub fn message_sink(mut self, sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.message_sink = Some(Arc::new(sink));
        self
    }
}

#[derive(Debug)]
enum Request {
    StartScan,
    StopScan,
    Connect(PeripheralHandle),
    Disconnect,
    Get(ParameterName),
    Set { param: ParameterName, value: String },
    Raw(String),
    ClearDiscovered,
    Shutdown,
}

struct Envelope {
    request: Request,
    reply: oneshot::Sender<Result<()>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TimerKind {
    Settle,
    Reconnect,
    InitialFetch,
}

#[derive(Debug, Clone, Copy)]
struct TimerFired {
    kind: TimerKind,
    generation: u64,
}

struct PendingTimer {
    generation: u64,
    cancel: CancellationToken,
}

/// At most one pending timer per kind. A firing is honoured only if its
/// generation still matches the pending slot, so a timer that lost the race
/// against its own cancellation is ignored.
struct Timers {
    tx: mpsc::UnboundedSender<TimerFired>,
    next_generation: u64,
    slots: HashMap<TimerKind, PendingTimer>,
}

impl Timers {
    fn new(tx: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            tx,
            next_generation: 0,
            slots: HashMap::new(),
        }
    }

    fn schedule(&mut self, kind: TimerKind, delay: Duration) {
        self.cancel(kind);
        self.next_generation += 1;
        let generation = self.next_generation;
        let cancel = CancellationToken::new();
        let task_token = cancel.clone();
        let tx = self.tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = task_token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(TimerFired { kind, generation });
                }
            }
        });

        self.slots.insert(kind, PendingTimer { generation, cancel });
    }

    /// Cancel a pending timer. Returns whether one was pending.
    fn cancel(&mut self, kind: TimerKind) -> bool {
        match self.slots.remove(&kind) {
            Some(timer) => {
                timer.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn cancel_all(&mut self) {
        for (_, timer) in self.slots.drain() {
            timer.cancel.cancel();
        }
    }

    fn take_if_current(&mut self, fired: TimerFired) -> bool {
        match self.slots.get(&fired.kind) {
            Some(timer) if timer.generation == fired.generation => {
                self.slots.remove(&fired.kind);
                true
            }
            _ => false,
        }
    }
}

/// Entry point for creating sessions.
#[derive(Debug)]
pub struct DeviceSession;

impl DeviceSession {
    /// Validate `config`, attach to `platform` and start the session task.
    ///
    /// The session starts [`SessionState::Idle`] and runs until
    /// [`SessionHandle::shutdown`] is called or every handle is dropped.
    pub async fn spawn(
        platform: Arc<dyn BlePlatform>,
        config: SessionConfig,
        collaborators: Collaborators,
    ) -> Result<SessionHandle> {
        config.validate()?;

        let (sink, platform_rx) = EventSink::channel();
        platform.attach(sink).await?;

        let (request_tx, request_rx) = mpsc::channel(config.mailbox_capacity);
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionSnapshot::default());
        let events = EventDispatcher::new(config.event_capacity);

        let handle = SessionHandle {
            requests: request_tx,
            state: state_rx,
            events: events.clone(),
            dialect: config.dialect.clone(),
        };

        let actor = SessionActor {
            platform,
            config,
            collaborators,
            snapshot: SessionSnapshot::default(),
            state_tx,
            events,
            timers: Timers::new(timer_tx),
            link: None,
            link_id: LinkId::default(),
            reconnect_target: None,
            reconnecting: false,
            write_characteristic: None,
            routes: HashMap::new(),
            in_flight: VecDeque::new(),
        };
        tokio::spawn(actor.run(request_rx, platform_rx, timer_rx));

        Ok(handle)
    }
}

/// Cloneable handle to a running session.
///
/// Requests are fire-and-forget relative to the peripheral: they return once
/// the session has validated them and handed them to the platform, not when
/// the peripheral confirms. Watch [`SessionHandle::subscribe`] or
/// [`SessionHandle::events`] for confirmations.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    requests: mpsc::Sender<Envelope>,
    state: watch::Receiver<SessionSnapshot>,
    events: EventDispatcher,
    dialect: Dialect,
}

impl SessionHandle {
    async fn call(&self, request: Request) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Envelope { request, reply })
            .await
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Start scanning. Discovered devices accumulate in
    /// [`SessionSnapshot::discovered`].
    pub async fn start_scan(&self) -> Result<()> {
        self.call(Request::StartScan).await
    }

    /// Stop scanning. Idempotent.
    pub async fn stop_scan(&self) -> Result<()> {
        self.call(Request::StopScan).await
    }

    /// Connect to a peripheral. The link comes up asynchronously.
    pub async fn connect(&self, handle: &PeripheralHandle) -> Result<()> {
        self.call(Request::Connect(handle.clone())).await
    }

    /// Tear down the link and suppress automatic reconnects until the next
    /// successful connection. A no-op when there is no link.
    pub async fn disconnect(&self) -> Result<()> {
        self.call(Request::Disconnect).await
    }

    /// Ask the peripheral to report `param`.
    pub async fn get_value(&self, param: ParameterName) -> Result<()> {
        self.call(Request::Get(param)).await
    }

    /// Ask the peripheral to report every parameter of the dialect, one
    /// `GET` per parameter.
    pub async fn get_all(&self) -> Result<()> {
        for param in self.dialect.parameters() {
            self.get_value(*param).await?;
        }
        Ok(())
    }

    /// [`get_value`](Self::get_value) for a user-supplied target; `all`
    /// expands to [`get_all`](Self::get_all).
    pub async fn get_value_named(&self, target: &str) -> Result<()> {
        match target.parse::<ParameterTarget>()? {
            ParameterTarget::One(param) => self.get_value(param).await,
            ParameterTarget::All => self.get_all().await,
        }
    }

    /// Set `param` to `value`.
    ///
    /// The value is validated against the dialect before anything is sent.
    /// The local value becomes pending immediately and is confirmed by the
    /// next notification for `param`, or rolled back if the write fails.
    pub async fn set_value(&self, param: ParameterName, value: impl Into<String>) -> Result<()> {
        self.call(Request::Set {
            param,
            value: value.into(),
        })
        .await
    }

    /// [`set_value`](Self::set_value) for a user-supplied target.
    ///
    /// The `all` pseudo-parameter has no wire message; it is rejected with
    /// [`Error::AggregateUnsupported`] and nothing is sent.
    pub async fn set_value_named(&self, target: &str, value: impl Into<String>) -> Result<()> {
        match target.parse::<ParameterTarget>()? {
            ParameterTarget::One(param) => self.set_value(param, value).await,
            ParameterTarget::All => {
                warn!("'all' has no wire representation; nothing sent");
                Err(Error::AggregateUnsupported)
            }
        }
    }

    /// Write a raw message to the command characteristic, checked against
    /// the dialect's raw write policy.
    pub async fn write_characteristic(&self, message: impl Into<String>) -> Result<()> {
        self.call(Request::Raw(message.into())).await
    }

    /// Forget discovered devices.
    pub async fn clear_discovered(&self) -> Result<()> {
        self.call(Request::ClearDiscovered).await
    }

    /// Stop scanning, tear down the link and end the session task.
    pub async fn shutdown(&self) -> Result<()> {
        self.call(Request::Shutdown).await
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// A receiver that is notified on every snapshot change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.clone()
    }

    /// A receiver for session events.
    pub fn events(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// The dialect this session speaks.
    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    /// Whether the session task has stopped.
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }

    /// Wait until `predicate` holds for the snapshot.
    pub async fn wait_for<F>(&self, timeout: Duration, mut predicate: F) -> Result<SessionSnapshot>
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut rx = self.state.clone();
        match tokio::time::timeout(timeout, rx.wait_for(|s| predicate(s))).await {
            Ok(Ok(snapshot)) => Ok(snapshot.clone()),
            Ok(Err(_)) => Err(Error::SessionClosed),
            Err(_) => Err(Error::timeout("wait for session state", timeout)),
        }
    }

    /// Wait until the session reaches `state`.
    pub async fn wait_for_state(
        &self,
        state: SessionState,
        timeout: Duration,
    ) -> Result<SessionSnapshot> {
        self.wait_for(timeout, |s| s.state == state).await
    }
}

struct SessionActor {
    platform: Arc<dyn BlePlatform>,
    config: SessionConfig,
    collaborators: Collaborators,
    snapshot: SessionSnapshot,
    state_tx: watch::Sender<SessionSnapshot>,
    events: EventDispatcher,
    timers: Timers,
    /// Peripheral the current link belongs to. `Some` exactly while the
    /// state is Connecting, ServiceDiscovery or Ready.
    link: Option<PeripheralHandle>,
    /// Id handed to the platform for the latest connection attempt.
    link_id: LinkId,
    reconnect_target: Option<PeripheralHandle>,
    /// Whether the pending connection attempt came from the reconnect timer.
    reconnecting: bool,
    write_characteristic: Option<Uuid>,
    routes: HashMap<Uuid, ParameterName>,
    /// Writes awaiting completion, oldest first. SETs carry their parameter.
    in_flight: VecDeque<Option<ParameterName>>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<Envelope>,
        mut platform_rx: mpsc::UnboundedReceiver<PlatformEvent>,
        mut timer_rx: mpsc::UnboundedReceiver<TimerFired>,
    ) {
        info!(dialect = ?self.config.dialect.layout, "Session started");

        loop {
            tokio::select! {
                envelope = requests.recv() => {
                    let Some(Envelope { request, reply }) = envelope else {
                        debug!("All session handles dropped");
                        self.shutdown().await;
                        break;
                    };
                    let stop = matches!(request, Request::Shutdown);
                    let result = self.handle_request(request).await;
                    self.publish();
                    let _ = reply.send(result);
                    if stop {
                        break;
                    }
                }
                Some(event) = platform_rx.recv() => {
                    self.handle_platform_event(event).await;
                    self.publish();
                }
                Some(fired) = timer_rx.recv() => {
                    self.handle_timer(fired).await;
                    self.publish();
                }
            }
        }

        self.publish();
        info!("Session stopped");
    }

    fn publish(&self) {
        self.state_tx.send_if_modified(|current| {
            if *current == self.snapshot {
                false
            } else {
                *current = self.snapshot.clone();
                true
            }
        });
    }

    fn set_state(&mut self, state: SessionState) {
        let from = self.snapshot.state;
        if from == state {
            return;
        }
        debug!(%from, to = %state, "State change");
        self.snapshot.state = state;
        self.events.send(SessionEvent::StateChanged { from, to: state });
    }

    fn report(&self, error: Error) {
        self.events.send(SessionEvent::Error {
            error: error.to_string(),
        });
    }

    fn require(&self, capability: Capability) -> Result<()> {
        if self.collaborators.permissions.granted(capability) {
            Ok(())
        } else {
            warn!(%capability, "Permission denied");
            Err(Error::permission_denied(capability))
        }
    }

    // --- Requests ---

    async fn handle_request(&mut self, request: Request) -> Result<()> {
        match request {
            Request::StartScan => self.start_scan().await,
            Request::StopScan => self.stop_scan().await,
            Request::Connect(handle) => self.connect(handle).await,
            Request::Disconnect => self.disconnect().await,
            Request::Get(param) => self.send_command(Command::Get(param)).await,
            Request::Set { param, value } => self.set_value(param, value).await,
            Request::Raw(message) => self.write_raw(message).await,
            Request::ClearDiscovered => {
                self.snapshot.discovered.clear();
                Ok(())
            }
            Request::Shutdown => {
                self.shutdown().await;
                Ok(())
            }
        }
    }

    async fn start_scan(&mut self) -> Result<()> {
        self.require(Capability::Scan)?;
        if self.snapshot.scanning {
            debug!("Scan already running");
            return Ok(());
        }

        self.platform.start_scan().await?;
        self.snapshot.scanning = true;
        if !self.snapshot.state.has_link() {
            self.set_state(SessionState::Scanning);
        }
        info!("Scan started");
        Ok(())
    }

    async fn stop_scan(&mut self) -> Result<()> {
        self.require(Capability::Scan)?;
        if !self.snapshot.scanning {
            return Ok(());
        }

        self.snapshot.scanning = false;
        if self.snapshot.state == SessionState::Scanning {
            self.set_state(SessionState::Idle);
        }
        info!(
            discovered = self.snapshot.discovered.len(),
            "Scan stopped"
        );
        self.platform.stop_scan().await
    }

    async fn connect(&mut self, handle: PeripheralHandle) -> Result<()> {
        self.require(Capability::Connect)?;
        if self.link.as_ref() == Some(&handle) {
            debug!(device = %handle, "Already connected or connecting");
            return Ok(());
        }

        self.timers.cancel(TimerKind::Reconnect);
        self.reconnect_target = None;
        if let Some(previous) = self.link.take() {
            info!(device = %previous, "Replacing existing link");
            self.release_link(&previous, DisconnectReason::Superseded)
                .await;
        }

        self.snapshot.reconnect_attempt = 0;
        self.begin_connect(handle, false).await
    }

    async fn begin_connect(&mut self, handle: PeripheralHandle, reconnecting: bool) -> Result<()> {
        self.timers.cancel(TimerKind::Settle);
        self.timers.cancel(TimerKind::InitialFetch);
        self.link = Some(handle.clone());
        self.link_id = self.link_id.next();
        self.reconnecting = reconnecting;
        self.snapshot.connected_device = Some(Tracked::pending(handle.clone()));
        self.set_state(SessionState::Connecting);
        info!(device = %handle, link = %self.link_id, reconnecting, "Connecting");

        if let Err(e) = self.platform.connect(&handle, self.link_id).await {
            error!(device = %handle, error = %e, "Failed to start connection");
            self.link = None;
            self.reconnecting = false;
            self.snapshot.connected_device = None;
            self.set_state(SessionState::Disconnected);
            return Err(e);
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.require(Capability::Connect)?;
        let reconnect_pending = self.timers.cancel(TimerKind::Reconnect);
        self.reconnect_target = None;

        match self.link.take() {
            Some(handle) => {
                info!(device = %handle, "Disconnecting");
                self.snapshot.manual_disconnect = true;
                self.release_link(&handle, DisconnectReason::UserRequested)
                    .await;
            }
            None if reconnect_pending => {
                info!("Cancelled pending reconnect");
                self.snapshot.manual_disconnect = true;
            }
            None => debug!("No link to disconnect"),
        }
        Ok(())
    }

    /// Tear down a link the session is giving up on. The platform's
    /// link-down for it arrives later and only closes the handle.
    async fn release_link(&mut self, handle: &PeripheralHandle, reason: DisconnectReason) {
        if let Err(e) = self.platform.disconnect(handle).await {
            warn!(device = %handle, error = %e, "Platform disconnect failed");
            self.report(e);
        }
        self.clear_link_state();
        self.set_state(SessionState::Disconnected);
        self.events.send(SessionEvent::Disconnected {
            device: handle.clone(),
            reason,
        });
    }

    fn clear_link_state(&mut self) {
        self.timers.cancel(TimerKind::Settle);
        self.timers.cancel(TimerKind::InitialFetch);
        self.reconnecting = false;
        self.write_characteristic = None;
        self.routes.clear();
        let unfinished: Vec<ParameterName> = self.in_flight.drain(..).flatten().collect();
        for param in unfinished {
            self.rollback(param);
        }
        self.snapshot.write_bound = false;
        self.snapshot.subscribed.clear();
        self.snapshot.connected_device = None;
    }

    async fn close_quietly(&self, handle: &PeripheralHandle) {
        if let Err(e) = self.platform.close(handle).await {
            debug!(device = %handle, error = %e, "Platform close failed");
        }
    }

    async fn set_value(&mut self, param: ParameterName, value: String) -> Result<()> {
        let value = value.trim().to_string();
        let command = Command::Set {
            param,
            value: value.clone(),
        };
        let wire = self.config.dialect.encode(&command).map_err(|e| {
            warn!(%param, %value, error = %e, "Rejected SET");
            Error::from(e)
        })?;
        let (handle, characteristic) = self.command_target()?;

        let slot = self
            .snapshot
            .parameters
            .entry(param)
            .or_insert_with(|| ParameterValue {
                value: Tracked::pending(String::new()),
                confirmed: None,
            });
        slot.value = Tracked::pending(value.clone());
        self.events.send(SessionEvent::ValueChanged {
            param,
            value,
            pending: true,
        });

        self.in_flight.push_back(Some(param));
        if let Err(e) = self.write(&handle, characteristic, wire).await {
            self.in_flight.pop_back();
            self.rollback(param);
            return Err(e);
        }
        Ok(())
    }

    async fn send_command(&mut self, command: Command) -> Result<()> {
        let wire = self.config.dialect.encode(&command)?;
        let (handle, characteristic) = self.command_target()?;
        self.submit(&handle, characteristic, wire).await
    }

    async fn write_raw(&mut self, message: String) -> Result<()> {
        self.config.dialect.check_raw(&message).map_err(|e| {
            warn!(%message, error = %e, "Rejected raw write");
            Error::from(e)
        })?;
        let (handle, characteristic) = self.command_target()?;
        self.submit(&handle, characteristic, message).await
    }

    async fn submit(
        &mut self,
        handle: &PeripheralHandle,
        characteristic: Uuid,
        message: String,
    ) -> Result<()> {
        self.in_flight.push_back(None);
        if let Err(e) = self.write(handle, characteristic, message).await {
            self.in_flight.pop_back();
            return Err(e);
        }
        Ok(())
    }

    fn command_target(&self) -> Result<(PeripheralHandle, Uuid)> {
        let Some(characteristic) = self.write_characteristic else {
            warn!("Command characteristic not bound; write rejected");
            return Err(Error::WriteCharacteristicUnbound);
        };
        let handle = self.link.clone().ok_or(Error::NotConnected)?;
        self.require(Capability::Connect)?;
        Ok((handle, characteristic))
    }

    async fn write(
        &self,
        handle: &PeripheralHandle,
        characteristic: Uuid,
        message: String,
    ) -> Result<()> {
        debug!(%message, "Writing command");
        self.platform
            .write(handle, characteristic, message.into_bytes())
            .await
            .inspect_err(|e| error!(error = %e, "Write submission failed"))
    }

    fn rollback(&mut self, param: ParameterName) {
        let Some(slot) = self.snapshot.parameters.get_mut(&param) else {
            return;
        };
        if !slot.is_pending() {
            return;
        }
        match slot.confirmed.clone() {
            Some(previous) => {
                debug!(%param, %previous, "Rolling back");
                slot.value = Tracked::confirmed(previous.clone());
                self.events.send(SessionEvent::ValueChanged {
                    param,
                    value: previous,
                    pending: false,
                });
            }
            None => {
                self.snapshot.parameters.remove(&param);
            }
        }
    }

    async fn shutdown(&mut self) {
        self.timers.cancel_all();
        self.reconnect_target = None;
        if self.snapshot.scanning {
            self.snapshot.scanning = false;
            if let Err(e) = self.platform.stop_scan().await {
                warn!(error = %e, "Failed to stop scan during shutdown");
            }
        }
        if let Some(handle) = self.link.take() {
            self.snapshot.manual_disconnect = true;
            self.release_link(&handle, DisconnectReason::UserRequested)
                .await;
            self.close_quietly(&handle).await;
        }
        if self.snapshot.state == SessionState::Scanning {
            self.set_state(SessionState::Idle);
        }
    }

    // --- Platform events ---

    async fn handle_platform_event(&mut self, event: PlatformEvent) {
        match event {
            PlatformEvent::ScanResult(handle) => self.on_scan_result(handle),
            PlatformEvent::LinkUp {
                handle,
                link,
                result,
            } => self.on_link_up(handle, link, result).await,
            PlatformEvent::LinkDown { address, link } => self.on_link_down(address, link).await,
            PlatformEvent::ServicesDiscovered { handle, result } => {
                self.on_services_discovered(handle, result).await
            }
            PlatformEvent::CharacteristicChanged { uuid, value } => {
                self.on_characteristic_changed(uuid, &value)
            }
            PlatformEvent::WriteCompleted { uuid, result } => self.on_write_completed(uuid, result),
        }
    }

    fn on_scan_result(&mut self, handle: PeripheralHandle) {
        if !self.snapshot.scanning {
            return;
        }
        if let Some(existing) = self.snapshot.discovered.iter_mut().find(|d| **d == handle) {
            if existing.name().is_none() && handle.name().is_some() {
                *existing = handle;
            }
            return;
        }
        debug!(device = %handle, "Discovered device");
        self.snapshot.discovered.push(handle.clone());
        self.events.send(SessionEvent::Discovered { device: handle });
    }

    /// Whether `address` belongs to the peripheral of the current link.
    fn owns_address(&self, address: &str) -> bool {
        self.link.as_ref().is_some_and(|h| h.matches_address(address))
    }

    async fn on_link_up(&mut self, handle: PeripheralHandle, link: LinkId, result: Result<()>) {
        if link != self.link_id
            || self.link.as_ref() != Some(&handle)
            || self.snapshot.state != SessionState::Connecting
        {
            if self.owns_address(handle.address()) {
                // The platform shares one connection per peripheral.
                debug!(device = %handle, %link, "Ignoring link-up for a replaced attempt");
                return;
            }
            warn!(device = %handle, %link, "Tearing down stale link");
            if result.is_ok()
                && let Err(e) = self.platform.disconnect(&handle).await
            {
                debug!(device = %handle, error = %e, "Stale link disconnect failed");
            }
            self.close_quietly(&handle).await;
            return;
        }

        match result {
            Ok(()) => {
                info!(device = %handle, "Link established");
                self.snapshot.manual_disconnect = false;
                self.snapshot.reconnect_attempt = 0;
                self.reconnecting = false;
                self.snapshot.connected_device = Some(Tracked::confirmed(handle.clone()));
                self.set_state(SessionState::ServiceDiscovery);
                self.events.send(SessionEvent::Connected {
                    device: handle.clone(),
                });
                self.save_address(&handle);
                self.timers
                    .schedule(TimerKind::Settle, self.config.settle_delay);
            }
            Err(e) => {
                warn!(device = %handle, error = %e, "Connection attempt failed");
                let retry = self.reconnecting;
                self.close_quietly(&handle).await;
                self.link = None;
                self.reconnecting = false;
                self.snapshot.connected_device = None;
                self.set_state(SessionState::Disconnected);
                self.events.send(SessionEvent::Disconnected {
                    device: handle.clone(),
                    reason: DisconnectReason::LinkFailure(e.to_string()),
                });
                if retry {
                    self.schedule_reconnect(handle);
                }
            }
        }
    }

    fn save_address(&self, handle: &PeripheralHandle) {
        match self
            .collaborators
            .store
            .save(&self.config.address_key, handle.address())
        {
            Ok(()) => debug!(device = %handle, "Saved device address"),
            Err(e) => {
                warn!(device = %handle, error = %e, "Failed to save device address");
                self.report(e);
            }
        }
    }

    async fn on_link_down(&mut self, address: String, link: LinkId) {
        if !self.owns_address(&address) {
            debug!(%address, %link, "Link-down for a released link");
            self.close_quietly(&PeripheralHandle::new(&address)).await;
            return;
        }
        let Some(handle) = self.link.clone().filter(|_| link == self.link_id) else {
            debug!(
                %address,
                %link,
                current = %self.link_id,
                "Ignoring link-down for a replaced link"
            );
            return;
        };

        warn!(device = %handle, %link, "Link lost");
        self.link = None;
        self.clear_link_state();
        self.set_state(SessionState::Disconnected);
        self.close_quietly(&handle).await;
        self.events.send(SessionEvent::Disconnected {
            device: handle.clone(),
            reason: DisconnectReason::LinkLost,
        });

        if self.snapshot.manual_disconnect {
            info!(device = %handle, "Manually disconnected; not reconnecting");
        } else {
            self.schedule_reconnect(handle);
        }
    }

    fn schedule_reconnect(&mut self, handle: PeripheralHandle) {
        let attempt = self.snapshot.reconnect_attempt.saturating_add(1);
        if !self.config.reconnect.allows(attempt) {
            warn!(
                device = %handle,
                attempts = self.snapshot.reconnect_attempt,
                "Reconnect attempts exhausted"
            );
            self.reconnect_target = None;
            self.events.send(SessionEvent::ReconnectExhausted {
                device: handle,
                attempts: self.snapshot.reconnect_attempt,
            });
            return;
        }

        let delay = self.config.reconnect.next_delay(attempt - 1);
        info!(device = %handle, attempt, ?delay, "Scheduling reconnect");
        self.snapshot.reconnect_attempt = attempt;
        self.reconnect_target = Some(handle.clone());
        self.timers.schedule(TimerKind::Reconnect, delay);
        self.events.send(SessionEvent::ReconnectScheduled {
            device: handle,
            attempt,
            delay_ms: delay.as_millis() as u64,
        });
    }

    async fn on_services_discovered(
        &mut self,
        handle: PeripheralHandle,
        result: Result<Vec<GattService>>,
    ) {
        if self.link.as_ref() != Some(&handle)
            || self.snapshot.state != SessionState::ServiceDiscovery
        {
            debug!(device = %handle, "Ignoring discovery result for a stale link");
            return;
        }
        let services = match result {
            Ok(services) => services,
            Err(e) => {
                error!(device = %handle, error = %e, "Service discovery failed");
                self.report(e);
                return;
            }
        };

        let layout = self.config.dialect.layout;
        self.routes.clear();
        self.write_characteristic = None;
        self.snapshot.subscribed.clear();

        for service in &services {
            debug!(service = %service.uuid, "Service");
            for characteristic in &service.characteristics {
                match CharacteristicRole::classify(characteristic.uuid, layout) {
                    CharacteristicRole::Read(param) => {
                        self.subscribe(&handle, characteristic, param).await
                    }
                    CharacteristicRole::Write if self.write_characteristic.is_none() => {
                        debug!(uuid = %characteristic.uuid, "Bound command characteristic");
                        self.write_characteristic = Some(characteristic.uuid);
                    }
                    CharacteristicRole::Write => {
                        debug!(uuid = %characteristic.uuid, "Ignoring duplicate command characteristic");
                    }
                    CharacteristicRole::Unknown => {
                        debug!(uuid = %characteristic.uuid, "Ignoring characteristic");
                    }
                }
            }
        }

        self.snapshot.write_bound = self.write_characteristic.is_some();
        if !self.snapshot.write_bound {
            warn!(device = %handle, "Command characteristic not found; writes will be rejected");
        }
        self.set_state(SessionState::Ready);
        info!(
            device = %handle,
            subscribed = self.snapshot.subscribed.len(),
            "Session ready"
        );
        self.events.send(SessionEvent::Ready {
            device: handle,
            subscribed: self.snapshot.subscribed.iter().copied().collect(),
        });

        if self.snapshot.write_bound
            && let Some(delay) = self.config.dialect.initial_fetch_delay()
        {
            self.timers.schedule(TimerKind::InitialFetch, delay);
        }
    }

    async fn subscribe(
        &mut self,
        handle: &PeripheralHandle,
        characteristic: &GattCharacteristic,
        param: ParameterName,
    ) {
        if let Err(e) = self.require(Capability::Connect) {
            self.report(e);
            return;
        }
        match self
            .platform
            .enable_notifications(handle, characteristic)
            .await
        {
            Ok(()) => {
                debug!(%param, uuid = %characteristic.uuid, "Notifications enabled");
                self.routes.insert(characteristic.uuid, param);
                self.snapshot.subscribed.insert(param);
            }
            Err(e) => {
                warn!(%param, error = %e, "Could not enable notifications; parameter will not update");
                self.report(e);
            }
        }
    }

    fn on_characteristic_changed(&mut self, uuid: Uuid, value: &[u8]) {
        let Some(&param) = self.routes.get(&uuid) else {
            debug!(%uuid, "Notification from an unrouted characteristic");
            return;
        };
        let decoded = match self.config.dialect.decode(value) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(%param, error = %e, "Undecodable notification");
                self.report(e.into());
                return;
            }
        };

        debug!(%param, message = %decoded.message, "Received notification");
        self.snapshot.last_message = Some(decoded.message.clone());
        if let Some(sink) = &self.collaborators.message_sink {
            sink(&decoded.message);
        }
        self.events.send(SessionEvent::Message {
            text: decoded.message,
        });

        if let Some(value) = decoded.value {
            self.snapshot
                .parameters
                .insert(param, ParameterValue::from_peripheral(value.clone()));
            self.events.send(SessionEvent::ValueChanged {
                param,
                value,
                pending: false,
            });
        }
    }

    fn on_write_completed(&mut self, uuid: Uuid, result: Result<()>) {
        let Some(param) = self.in_flight.pop_front() else {
            debug!(%uuid, "Write completion with nothing in flight");
            return;
        };
        match result {
            Ok(()) => {
                debug!(?param, "Write completed");
                self.events.send(SessionEvent::WriteCompleted {
                    param,
                    success: true,
                });
            }
            Err(e) => {
                warn!(?param, error = %e, "Write failed");
                // Listeners learn of the failure before the restored value.
                self.events.send(SessionEvent::WriteCompleted {
                    param,
                    success: false,
                });
                if let Some(param) = param {
                    self.rollback(param);
                }
            }
        }
    }

    // --- Timers ---

    async fn handle_timer(&mut self, fired: TimerFired) {
        if !self.timers.take_if_current(fired) {
            debug!(kind = ?fired.kind, "Ignoring superseded timer");
            return;
        }
        match fired.kind {
            TimerKind::Settle => self.on_settled().await,
            TimerKind::Reconnect => self.on_reconnect_due().await,
            TimerKind::InitialFetch => self.on_initial_fetch().await,
        }
    }

    async fn on_settled(&mut self) {
        let Some(handle) = self.link.clone() else {
            return;
        };
        if self.snapshot.state != SessionState::ServiceDiscovery {
            return;
        }
        if let Err(e) = self.require(Capability::Connect) {
            self.report(e);
            return;
        }
        debug!(device = %handle, "Discovering services");
        if let Err(e) = self.platform.discover_services(&handle).await {
            error!(device = %handle, error = %e, "Failed to start service discovery");
            self.report(e);
        }
    }

    async fn on_reconnect_due(&mut self) {
        let Some(handle) = self.reconnect_target.take() else {
            return;
        };
        if self.snapshot.manual_disconnect || self.link.is_some() {
            debug!(device = %handle, "Reconnect no longer needed");
            return;
        }
        if let Err(e) = self.require(Capability::Connect) {
            self.report(e);
            return;
        }
        if self.begin_connect(handle.clone(), true).await.is_err() {
            self.schedule_reconnect(handle);
        }
    }

    async fn on_initial_fetch(&mut self) {
        let Some(&param) = self.config.dialect.parameters().first() else {
            return;
        };
        debug!(%param, "Sending initial fetch");
        if let Err(e) = self.send_command(Command::Get(param)).await {
            warn!(error = %e, "Initial fetch failed");
            self.report(e);
        }
    }
}
