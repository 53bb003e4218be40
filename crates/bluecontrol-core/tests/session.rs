//! Session behaviour against the scripted platform.
//!
//! All tests run on a paused clock, so settle and reconnect delays elapse
//! instantly once every task is idle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bluecontrol_core::{
    Capability, ChannelLayout, Collaborators, DEFAULT_ADDRESS_KEY, DeviceSession, Dialect,
    DisconnectReason, Error, GattCharacteristic, GattService, LinkId, MOCK_SERVICE_UUID,
    MemoryAddressStore, MockPlatform, ParameterName, PeripheralHandle, PlatformCall,
    PlatformEvent, ReconnectPolicy, SessionConfig, SessionEvent, SessionHandle, SessionState,
};
use bluecontrol_types::{TokenCase, uuids};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::sleep;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(30);

fn device() -> PeripheralHandle {
    PeripheralHandle::with_name("AA:BB:CC:DD:EE:01", "BlueControl")
}

fn other_device() -> PeripheralHandle {
    PeripheralHandle::with_name("AA:BB:CC:DD:EE:02", "BlueControl 2")
}

async fn spawn(mock: &Arc<MockPlatform>, config: SessionConfig) -> SessionHandle {
    spawn_with(mock, config, Collaborators::default()).await
}

async fn spawn_with(
    mock: &Arc<MockPlatform>,
    config: SessionConfig,
    collaborators: Collaborators,
) -> SessionHandle {
    DeviceSession::spawn(mock.clone(), config, collaborators)
        .await
        .unwrap()
}

async fn ready_session(mock: &Arc<MockPlatform>, config: SessionConfig) -> SessionHandle {
    let session = spawn(mock, config).await;
    session.connect(&device()).await.unwrap();
    session
        .wait_for_state(SessionState::Ready, WAIT)
        .await
        .unwrap();
    session
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}

// =============================================================================
// Scanning
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_scan_deduplicates_discovered_devices() {
    let mock = Arc::new(MockPlatform::new());
    mock.set_advertised(vec![
        device(),
        PeripheralHandle::new("aa:bb:cc:dd:ee:01"),
        other_device(),
        device(),
    ]);
    let session = spawn(&mock, SessionConfig::default()).await;

    session.start_scan().await.unwrap();
    let snapshot = session
        .wait_for(WAIT, |s| s.discovered.len() == 2)
        .await
        .unwrap();
    assert_eq!(snapshot.state, SessionState::Scanning);
    assert!(snapshot.scanning);

    // A restarted scan reports the same devices again.
    session.stop_scan().await.unwrap();
    session.start_scan().await.unwrap();
    sleep(Duration::from_millis(100)).await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.discovered.len(), 2);
    assert_eq!(snapshot.discovered[0].name(), Some("BlueControl"));
}

#[tokio::test(start_paused = true)]
async fn test_stop_scan_is_idempotent() {
    let mock = Arc::new(MockPlatform::new());
    let session = spawn(&mock, SessionConfig::default()).await;

    session.stop_scan().await.unwrap();
    session.start_scan().await.unwrap();
    session.stop_scan().await.unwrap();
    session.stop_scan().await.unwrap();

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert!(!snapshot.scanning);
    assert_eq!(
        mock.calls()
            .iter()
            .filter(|c| **c == PlatformCall::StopScan)
            .count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_scan_results_ignored_when_not_scanning() {
    let mock = Arc::new(MockPlatform::new());
    let session = spawn(&mock, SessionConfig::default()).await;

    mock.emit(PlatformEvent::ScanResult(device()));
    sleep(Duration::from_millis(10)).await;

    assert!(session.snapshot().discovered.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_clear_discovered() {
    let mock = Arc::new(MockPlatform::new());
    mock.set_advertised(vec![device()]);
    let session = spawn(&mock, SessionConfig::default()).await;

    session.start_scan().await.unwrap();
    session
        .wait_for(WAIT, |s| s.discovered.len() == 1)
        .await
        .unwrap();
    session.clear_discovered().await.unwrap();
    assert!(session.snapshot().discovered.is_empty());
}

// =============================================================================
// Connection lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_ready_subscribes_every_parameter_and_binds_write_once() {
    let mut services = MockPlatform::standard_services(ChannelLayout::PerParameter);
    services.push(GattService {
        uuid: Uuid::from_u128(0x1234),
        characteristics: vec![
            GattCharacteristic::writable(uuids::COMMAND_WRITE),
            GattCharacteristic::notifying(Uuid::from_u128(0x5678)),
        ],
    });
    let mock = Arc::new(MockPlatform::with_services(services));
    let session = ready_session(&mock, SessionConfig::default()).await;

    let snapshot = session.snapshot();
    assert!(snapshot.write_bound);
    assert_eq!(
        snapshot.subscribed.iter().copied().collect::<Vec<_>>(),
        ParameterName::ALL.to_vec()
    );
    let enabled = mock
        .calls()
        .iter()
        .filter(|c| matches!(c, PlatformCall::EnableNotifications(_)))
        .count();
    assert_eq!(enabled, 6);
    assert_eq!(
        snapshot.connected_device.as_ref().map(|d| d.value.clone()),
        Some(device())
    );
    assert!(!snapshot.connected_device.unwrap().is_pending());

    session.get_value(ParameterName::Volume).await.unwrap();
    assert_eq!(mock.writes(), vec!["GET volume".to_string()]);
    assert!(mock.calls().contains(&PlatformCall::Write {
        uuid: uuids::COMMAND_WRITE,
        payload: "GET volume".to_string(),
    }));
}

#[tokio::test(start_paused = true)]
async fn test_service_discovery_waits_for_settle_delay() {
    let mock = Arc::new(MockPlatform::new());
    mock.set_auto_respond(false);
    let session = spawn(&mock, SessionConfig::default()).await;

    session.connect(&device()).await.unwrap();
    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Connecting);
    assert!(snapshot.connected_device.unwrap().is_pending());

    mock.set_auto_respond(true);
    mock.emit(PlatformEvent::LinkUp {
        handle: device(),
        link: mock.current_link(&device()).unwrap(),
        result: Ok(()),
    });
    let snapshot = session
        .wait_for_state(SessionState::ServiceDiscovery, WAIT)
        .await
        .unwrap();
    assert!(!snapshot.connected_device.unwrap().is_pending());

    let discovered = |mock: &MockPlatform| {
        mock.calls()
            .iter()
            .any(|c| matches!(c, PlatformCall::DiscoverServices(_)))
    };
    sleep(Duration::from_millis(599)).await;
    assert!(!discovered(&mock));
    sleep(Duration::from_millis(2)).await;
    assert!(discovered(&mock));
}

#[tokio::test(start_paused = true)]
async fn test_address_saved_on_link_up() {
    let mock = Arc::new(MockPlatform::new());
    let store = Arc::new(MemoryAddressStore::new());
    let session = spawn_with(
        &mock,
        SessionConfig::default(),
        Collaborators::new().store(store.clone()),
    )
    .await;

    session.connect(&device()).await.unwrap();
    session
        .wait_for_state(SessionState::Ready, WAIT)
        .await
        .unwrap();

    assert_eq!(
        store.get(DEFAULT_ADDRESS_KEY).as_deref(),
        Some("AA:BB:CC:DD:EE:01")
    );
    assert_eq!(store.write_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_to_same_device_is_noop() {
    let mock = Arc::new(MockPlatform::new());
    let session = ready_session(&mock, SessionConfig::default()).await;

    session.connect(&device()).await.unwrap();
    assert_eq!(mock.connect_count(&device()), 1);
    assert_eq!(session.snapshot().state, SessionState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_failed_connection_does_not_reconnect() {
    let mock = Arc::new(MockPlatform::new());
    mock.set_reject_connect(true);
    let session = spawn(&mock, SessionConfig::default()).await;
    let mut events = session.events();

    session.connect(&device()).await.unwrap();
    let snapshot = session
        .wait_for_state(SessionState::Disconnected, WAIT)
        .await
        .unwrap();
    assert!(snapshot.connected_device.is_none());

    sleep(Duration::from_secs(10)).await;
    assert_eq!(mock.connect_count(&device()), 1);
    assert!(mock.calls().contains(&PlatformCall::Close(device())));
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        SessionEvent::Disconnected {
            reason: DisconnectReason::LinkFailure(_),
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn test_stale_link_up_is_torn_down() {
    let mock = Arc::new(MockPlatform::new());
    mock.set_auto_respond(false);
    let session = spawn(&mock, SessionConfig::default()).await;

    session.connect(&device()).await.unwrap();
    session.connect(&other_device()).await.unwrap();
    mock.emit(PlatformEvent::LinkUp {
        handle: device(),
        link: LinkId(1),
        result: Ok(()),
    });
    mock.emit(PlatformEvent::LinkUp {
        handle: other_device(),
        link: mock.current_link(&other_device()).unwrap(),
        result: Ok(()),
    });
    mock.set_auto_respond(true);

    let snapshot = session
        .wait_for_state(SessionState::Ready, WAIT)
        .await
        .unwrap();
    assert_eq!(snapshot.connected_device.unwrap().value, other_device());

    let calls = mock.calls();
    assert!(calls.contains(&PlatformCall::Disconnect(device())));
    assert!(calls.contains(&PlatformCall::Close(device())));
    assert!(!calls.contains(&PlatformCall::DiscoverServices(device())));
}

#[tokio::test(start_paused = true)]
async fn test_missing_descriptor_skips_parameter() {
    let mut services = MockPlatform::standard_services(ChannelLayout::PerParameter);
    for characteristic in &mut services[0].characteristics {
        if characteristic.uuid == uuids::READ_VOLTAGE {
            characteristic.descriptors.clear();
        }
    }
    let mock = Arc::new(MockPlatform::with_services(services));
    let session = spawn(&mock, SessionConfig::default()).await;
    let mut events = session.events();

    session.connect(&device()).await.unwrap();
    let snapshot = session
        .wait_for_state(SessionState::Ready, WAIT)
        .await
        .unwrap();

    assert_eq!(snapshot.subscribed.len(), 5);
    assert!(!snapshot.subscribed.contains(&ParameterName::Voltage));
    assert!(snapshot.write_bound);
    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, SessionEvent::Error { .. }))
    );

    // Notifications on the unsubscribed characteristic are not routed.
    mock.notify(uuids::READ_VOLTAGE, "12.5");
    sleep(Duration::from_millis(10)).await;
    assert_eq!(session.snapshot().value(ParameterName::Voltage), None);
}

#[tokio::test(start_paused = true)]
async fn test_discovery_failure_stays_in_service_discovery() {
    let mock = Arc::new(MockPlatform::new());
    mock.set_fail_discovery(true);
    let session = spawn(&mock, SessionConfig::default()).await;

    session.connect(&device()).await.unwrap();
    sleep(Duration::from_secs(2)).await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::ServiceDiscovery);
    assert!(!snapshot.write_bound);
}

// =============================================================================
// Disconnect and reconnect
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_unexpected_drop_reconnects_once_after_delay() {
    let mock = Arc::new(MockPlatform::new());
    let session = ready_session(&mock, SessionConfig::default()).await;
    mock.clear_calls();

    mock.drop_link(&device());
    let snapshot = session
        .wait_for_state(SessionState::Disconnected, WAIT)
        .await
        .unwrap();
    assert!(snapshot.connected_device.is_none());
    assert!(!snapshot.write_bound);
    assert!(snapshot.subscribed.is_empty());
    assert!(mock.calls().contains(&PlatformCall::Close(device())));

    sleep(Duration::from_millis(999)).await;
    assert_eq!(mock.connect_count(&device()), 0);
    sleep(Duration::from_millis(2)).await;
    assert_eq!(mock.connect_count(&device()), 1);

    session
        .wait_for_state(SessionState::Ready, WAIT)
        .await
        .unwrap();
    sleep(Duration::from_secs(10)).await;
    assert_eq!(mock.connect_count(&device()), 1);
    assert_eq!(session.snapshot().reconnect_attempt, 0);
}

#[tokio::test(start_paused = true)]
async fn test_manual_disconnect_suppresses_reconnect() {
    let mock = Arc::new(MockPlatform::new());
    let session = ready_session(&mock, SessionConfig::default()).await;
    let mut events = session.events();
    mock.clear_calls();

    session.disconnect().await.unwrap();
    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Disconnected);
    assert!(snapshot.manual_disconnect);
    assert!(snapshot.connected_device.is_none());

    sleep(Duration::from_secs(10)).await;
    assert_eq!(mock.connect_count(&device()), 0);
    assert!(mock.calls().contains(&PlatformCall::Close(device())));
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        SessionEvent::Disconnected {
            reason: DisconnectReason::UserRequested,
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn test_late_link_down_does_not_drop_new_link() {
    let mock = Arc::new(MockPlatform::new());
    let session = ready_session(&mock, SessionConfig::default()).await;
    let released = mock.current_link(&device()).unwrap();

    session.disconnect().await.unwrap();
    session.connect(&device()).await.unwrap();
    session
        .wait_for_state(SessionState::Ready, WAIT)
        .await
        .unwrap();
    assert_ne!(mock.current_link(&device()), Some(released));
    mock.clear_calls();

    // The adapter reports the released link a second time.
    mock.emit(PlatformEvent::LinkDown {
        address: device().address().to_string(),
        link: released,
    });
    sleep(Duration::from_secs(10)).await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Ready);
    assert_eq!(snapshot.reconnect_attempt, 0);
    assert!(!snapshot.manual_disconnect);
    assert!(snapshot.write_bound);
    assert_eq!(mock.connect_count(&device()), 0);
    assert!(!mock.calls().contains(&PlatformCall::Close(device())));
}

#[tokio::test(start_paused = true)]
async fn test_late_link_up_for_replaced_attempt_is_ignored() {
    let mock = Arc::new(MockPlatform::new());
    mock.set_auto_respond(false);
    let session = spawn(&mock, SessionConfig::default()).await;

    session.connect(&device()).await.unwrap();
    let first = mock.current_link(&device()).unwrap();
    session.disconnect().await.unwrap();
    session.connect(&device()).await.unwrap();
    let second = mock.current_link(&device()).unwrap();
    assert_ne!(first, second);

    mock.emit(PlatformEvent::LinkUp {
        handle: device(),
        link: first,
        result: Ok(()),
    });
    sleep(Duration::from_millis(10)).await;
    assert_eq!(session.snapshot().state, SessionState::Connecting);

    mock.set_auto_respond(true);
    mock.emit(PlatformEvent::LinkUp {
        handle: device(),
        link: second,
        result: Ok(()),
    });
    session
        .wait_for_state(SessionState::Ready, WAIT)
        .await
        .unwrap();
    assert_eq!(mock.connect_count(&device()), 2);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_scanning_is_noop() {
    let mock = Arc::new(MockPlatform::new());
    let session = spawn(&mock, SessionConfig::default()).await;

    session.start_scan().await.unwrap();
    session.disconnect().await.unwrap();

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Scanning);
    assert!(!snapshot.manual_disconnect);
    assert!(
        !mock
            .calls()
            .iter()
            .any(|c| matches!(c, PlatformCall::Disconnect(_)))
    );
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_reconnect() {
    let mock = Arc::new(MockPlatform::new());
    let session = ready_session(&mock, SessionConfig::default()).await;
    mock.clear_calls();

    mock.drop_link(&device());
    session
        .wait_for_state(SessionState::Disconnected, WAIT)
        .await
        .unwrap();
    session.disconnect().await.unwrap();

    sleep(Duration::from_secs(10)).await;
    assert_eq!(mock.connect_count(&device()), 0);
    assert!(session.snapshot().manual_disconnect);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_gives_up_after_max_attempts() {
    let mock = Arc::new(MockPlatform::new());
    let config = SessionConfig::default().reconnect(ReconnectPolicy::new().max_attempts(2));
    let session = ready_session(&mock, config).await;
    let mut events = session.events();
    mock.clear_calls();
    mock.set_reject_connect(true);

    mock.drop_link(&device());
    sleep(Duration::from_secs(10)).await;

    assert_eq!(mock.connect_count(&device()), 2);
    assert_eq!(session.snapshot().state, SessionState::Disconnected);
    let events = drain(&mut events);
    let scheduled = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::ReconnectScheduled { .. }))
        .count();
    assert_eq!(scheduled, 2);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, SessionEvent::ReconnectExhausted { attempts: 2, .. }))
    );
}

#[tokio::test(start_paused = true)]
async fn test_exponential_reconnect_delays() {
    let mock = Arc::new(MockPlatform::new());
    let policy = ReconnectPolicy::exponential()
        .initial_delay(Duration::from_millis(100))
        .max_attempts(3);
    let session = ready_session(&mock, SessionConfig::default().reconnect(policy)).await;
    let mut events = session.events();
    mock.set_reject_connect(true);

    mock.drop_link(&device());
    sleep(Duration::from_secs(10)).await;

    let delays: Vec<u64> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::ReconnectScheduled { delay_ms, .. } => Some(delay_ms),
            _ => None,
        })
        .collect();
    assert_eq!(delays, vec![100, 200, 400]);
}

// =============================================================================
// Values
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_set_value_confirmed_by_notification() {
    let mock = Arc::new(MockPlatform::new());
    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = messages.clone();
    let session = spawn_with(
        &mock,
        SessionConfig::default(),
        Collaborators::new().message_sink(move |msg: &str| sink.lock().unwrap().push(msg.to_string())),
    )
    .await;
    session.connect(&device()).await.unwrap();
    session
        .wait_for_state(SessionState::Ready, WAIT)
        .await
        .unwrap();

    session
        .set_value(ParameterName::Voltage, "12.5")
        .await
        .unwrap();
    assert_eq!(mock.writes(), vec!["SET voltage 12.5".to_string()]);
    let snapshot = session.snapshot();
    assert_eq!(snapshot.value(ParameterName::Voltage), Some("12.5"));
    assert!(snapshot.parameters[&ParameterName::Voltage].is_pending());

    mock.notify(uuids::READ_VOLTAGE, "12.5\n");
    let snapshot = session
        .wait_for(WAIT, |s| {
            s.parameters
                .get(&ParameterName::Voltage)
                .is_some_and(|v| !v.is_pending())
        })
        .await
        .unwrap();
    assert_eq!(snapshot.value(ParameterName::Voltage), Some("12.5"));
    assert_eq!(snapshot.last_message.as_deref(), Some("12.5"));
    assert_eq!(*messages.lock().unwrap(), vec!["12.5".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_uppercase_dialect_tokens() {
    let mock = Arc::new(MockPlatform::new());
    let config =
        SessionConfig::default().dialect(Dialect::multi_channel().token_case(TokenCase::Upper));
    let session = ready_session(&mock, config).await;

    session
        .set_value(ParameterName::Voltage, "12.5")
        .await
        .unwrap();
    session.get_value(ParameterName::LFreq).await.unwrap();

    assert_eq!(
        mock.writes(),
        vec!["SET VOLTAGE 12.5".to_string(), "GET L_FREQ".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_invalid_value_sends_nothing() {
    let mock = Arc::new(MockPlatform::new());
    let session = ready_session(&mock, SessionConfig::default()).await;
    mock.notify(uuids::READ_VOLTAGE, "10");
    session
        .wait_for(WAIT, |s| s.value(ParameterName::Voltage) == Some("10"))
        .await
        .unwrap();

    let result = session.set_value(ParameterName::Voltage, "abc").await;
    assert!(matches!(result, Err(Error::Protocol(_))));
    let result = session.set_value(ParameterName::Volume, "").await;
    assert!(matches!(result, Err(Error::Protocol(_))));

    assert!(mock.writes().is_empty());
    let snapshot = session.snapshot();
    assert_eq!(snapshot.value(ParameterName::Voltage), Some("10"));
    assert!(!snapshot.parameters[&ParameterName::Voltage].is_pending());
    assert_eq!(snapshot.value(ParameterName::Volume), None);
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_rolls_back_value() {
    let mock = Arc::new(MockPlatform::new());
    let session = ready_session(&mock, SessionConfig::default()).await;
    mock.notify(uuids::READ_VOLTAGE, "12.5");
    session
        .wait_for(WAIT, |s| s.value(ParameterName::Voltage) == Some("12.5"))
        .await
        .unwrap();

    mock.set_fail_writes(true);
    session
        .set_value(ParameterName::Voltage, "14")
        .await
        .unwrap();

    let snapshot = session
        .wait_for(WAIT, |s| {
            s.parameters
                .get(&ParameterName::Voltage)
                .is_some_and(|v| !v.is_pending())
        })
        .await
        .unwrap();
    assert_eq!(snapshot.value(ParameterName::Voltage), Some("12.5"));
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_reported_before_rollback() {
    let mock = Arc::new(MockPlatform::new());
    let session = ready_session(&mock, SessionConfig::default()).await;
    mock.notify(uuids::READ_VOLTAGE, "10");
    session
        .wait_for(WAIT, |s| s.value(ParameterName::Voltage) == Some("10"))
        .await
        .unwrap();
    let mut events = session.events();

    mock.set_fail_writes(true);
    session
        .set_value(ParameterName::Voltage, "12.5")
        .await
        .unwrap();
    sleep(Duration::from_millis(10)).await;

    let voltage: Vec<SessionEvent> = drain(&mut events)
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                SessionEvent::ValueChanged {
                    param: ParameterName::Voltage,
                    ..
                } | SessionEvent::WriteCompleted {
                    param: Some(ParameterName::Voltage),
                    ..
                }
            )
        })
        .collect();
    assert_eq!(
        voltage,
        vec![
            SessionEvent::ValueChanged {
                param: ParameterName::Voltage,
                value: "12.5".to_string(),
                pending: true,
            },
            SessionEvent::WriteCompleted {
                param: Some(ParameterName::Voltage),
                success: false,
            },
            SessionEvent::ValueChanged {
                param: ParameterName::Voltage,
                value: "10".to_string(),
                pending: false,
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_rejected_write_rolls_back_immediately() {
    let mock = Arc::new(MockPlatform::new());
    let session = ready_session(&mock, SessionConfig::default()).await;
    mock.set_reject_writes(true);

    let result = session.set_value(ParameterName::Volume, "0.5").await;
    assert!(result.is_err());
    assert_eq!(session.snapshot().value(ParameterName::Volume), None);
}

#[tokio::test(start_paused = true)]
async fn test_writes_rejected_until_command_characteristic_bound() {
    let mock = Arc::new(MockPlatform::with_services(vec![GattService {
        uuid: MOCK_SERVICE_UUID,
        characteristics: vec![GattCharacteristic::notifying(uuids::READ_VOLUME)],
    }]));
    let session = spawn(&mock, SessionConfig::default()).await;

    let result = session.set_value(ParameterName::Volume, "1").await;
    assert!(matches!(result, Err(Error::WriteCharacteristicUnbound)));

    session.connect(&device()).await.unwrap();
    let snapshot = session
        .wait_for_state(SessionState::Ready, WAIT)
        .await
        .unwrap();
    assert!(!snapshot.write_bound);

    let result = session.get_value(ParameterName::Volume).await;
    assert!(matches!(result, Err(Error::WriteCharacteristicUnbound)));
    let result = session.write_characteristic("SET volume 1").await;
    assert!(matches!(result, Err(Error::WriteCharacteristicUnbound)));
    assert!(mock.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_all_target() {
    let mock = Arc::new(MockPlatform::new());
    let session = ready_session(&mock, SessionConfig::default()).await;

    let result = session.set_value_named("all", "1").await;
    assert!(matches!(result, Err(Error::AggregateUnsupported)));
    assert!(mock.writes().is_empty());

    session.get_value_named("ALL").await.unwrap();
    assert_eq!(mock.writes().len(), 6);

    let result = session.set_value_named("bogus", "1").await;
    assert!(matches!(result, Err(Error::Protocol(_))));
}

#[tokio::test(start_paused = true)]
async fn test_raw_write_checks_numeric_suffix() {
    let mock = Arc::new(MockPlatform::new());
    let session = ready_session(&mock, SessionConfig::default()).await;

    session.write_characteristic("SET volume 0.5").await.unwrap();
    let result = session.write_characteristic("SET volume loud").await;
    assert!(matches!(result, Err(Error::Protocol(_))));

    assert_eq!(mock.writes(), vec!["SET volume 0.5".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_notification_is_reported() {
    let mock = Arc::new(MockPlatform::new());
    let session = ready_session(&mock, SessionConfig::default()).await;
    let mut events = session.events();

    mock.emit(PlatformEvent::CharacteristicChanged {
        uuid: uuids::READ_CURRENT,
        value: vec![0xff, 0xfe],
    });
    mock.notify(Uuid::from_u128(0x9999), "ignored");
    sleep(Duration::from_millis(10)).await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.value(ParameterName::Current), None);
    assert_eq!(snapshot.last_message, None);
    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, SessionEvent::Error { .. }))
    );
}

// =============================================================================
// Legacy dialect
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_legacy_dialect_fetches_after_ready() {
    let mock = Arc::new(MockPlatform::with_services(MockPlatform::standard_services(
        ChannelLayout::SingleChannel,
    )));
    let session = ready_session(&mock, SessionConfig::default().dialect(Dialect::legacy())).await;

    sleep(Duration::from_millis(499)).await;
    assert!(mock.writes().is_empty());
    sleep(Duration::from_millis(2)).await;
    assert_eq!(mock.writes(), vec!["GET".to_string()]);

    mock.notify(uuids::READ_CURRENT, "Value: 42\r\n");
    let snapshot = session
        .wait_for(WAIT, |s| s.value(ParameterName::Current).is_some())
        .await
        .unwrap();
    assert_eq!(snapshot.value(ParameterName::Current), Some("42"));
    assert_eq!(snapshot.last_message.as_deref(), Some("Value: 42"));

    assert!(
        session
            .set_value(ParameterName::Current, "12.5")
            .await
            .is_err()
    );
    assert!(
        session
            .set_value(ParameterName::Voltage, "12")
            .await
            .is_err()
    );
    session
        .set_value(ParameterName::Current, "12")
        .await
        .unwrap();
    assert_eq!(mock.writes().last().map(String::as_str), Some("SET 12"));
}

// =============================================================================
// Permissions and shutdown
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_permission_denied() {
    let mock = Arc::new(MockPlatform::new());
    let session = spawn_with(
        &mock,
        SessionConfig::default(),
        Collaborators::new().permissions(|cap: Capability| cap != Capability::Scan),
    )
    .await;

    let result = session.start_scan().await;
    assert!(matches!(
        result,
        Err(Error::PermissionDenied {
            capability: Capability::Scan
        })
    ));
    assert!(!mock.calls().contains(&PlatformCall::StartScan));
    assert_eq!(session.snapshot().state, SessionState::Idle);

    // Connecting is still allowed.
    session.connect(&device()).await.unwrap();
    session
        .wait_for_state(SessionState::Ready, WAIT)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_connect_denied_without_permission() {
    let mock = Arc::new(MockPlatform::new());
    let session = spawn_with(
        &mock,
        SessionConfig::default(),
        Collaborators::new().permissions(|_: Capability| false),
    )
    .await;

    let result = session.connect(&device()).await;
    assert!(matches!(result, Err(Error::PermissionDenied { .. })));
    assert!(mock.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_tears_down_link() {
    let mock = Arc::new(MockPlatform::new());
    let session = ready_session(&mock, SessionConfig::default()).await;

    session.shutdown().await.unwrap();
    assert!(mock.calls().contains(&PlatformCall::Disconnect(device())));

    let result = session.start_scan().await;
    assert!(matches!(result, Err(Error::SessionClosed)));
    assert!(session.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_config_rejected() {
    let mock = Arc::new(MockPlatform::new());
    let result =
        DeviceSession::spawn(mock.clone(), SessionConfig::default().mailbox_capacity(0), Collaborators::default())
            .await;
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
    assert!(!mock.is_attached());
}

// =============================================================================
// Property tests
// =============================================================================

mod proptests {
    use super::*;
    use proptest::prelude::*;

    const ADDRESSES: [&str; 4] = [
        "AA:BB:CC:DD:EE:01",
        "AA:BB:CC:DD:EE:02",
        "AA:BB:CC:DD:EE:03",
        "AA:BB:CC:DD:EE:04",
    ];

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap()
    }

    proptest! {
        /// However often and in whatever case devices are advertised, each
        /// address appears once in the discovered list.
        #[test]
        fn discovered_list_has_unique_addresses(
            seen in prop::collection::vec((0usize..4, any::<bool>()), 1..40),
            restarts in 0usize..3,
        ) {
            let advertised: Vec<PeripheralHandle> = seen
                .iter()
                .map(|(i, lower)| {
                    let address = if *lower {
                        ADDRESSES[*i].to_ascii_lowercase()
                    } else {
                        ADDRESSES[*i].to_string()
                    };
                    PeripheralHandle::new(address)
                })
                .collect();
            let mut expected: Vec<usize> = seen.iter().map(|(i, _)| *i).collect();
            expected.sort_unstable();
            expected.dedup();

            let discovered = runtime().block_on(async {
                let mock = Arc::new(MockPlatform::new());
                mock.set_advertised(advertised);
                let session = spawn(&mock, SessionConfig::default()).await;
                for _ in 0..=restarts {
                    session.start_scan().await.unwrap();
                    session.stop_scan().await.unwrap();
                }
                session.start_scan().await.unwrap();
                sleep(Duration::from_millis(10)).await;
                session.snapshot().discovered
            });

            prop_assert_eq!(discovered.len(), expected.len());
            for (i, a) in discovered.iter().enumerate() {
                for b in &discovered[i + 1..] {
                    prop_assert!(!a.matches_address(b.address()));
                }
            }
        }
    }
}
