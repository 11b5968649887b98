mod common;

use ble_central::ble::uuids::{
    BATTERY_LEVEL_UUID, BATTERY_SERVICE_UUID, DEVICE_INFO_SERVICE_UUID, MODEL_NUMBER_UUID,
};
use ble_central::{
    AdapterError, AdapterEvent, CharPropFlags, Characteristic, ConnectionManager, Device,
    DeviceChange, Error, GattEvent, PeripheralHandle, Service, WriteMode,
};
use bytes::Bytes;
use common::{advertise, powered_manager, settle, AdapterCall, FakeAdapter};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(2);

fn battery_level() -> Characteristic {
    Characteristic::new(
        BATTERY_LEVEL_UUID,
        BATTERY_SERVICE_UUID,
        CharPropFlags::READ | CharPropFlags::NOTIFY | CharPropFlags::WRITE,
    )
}

fn gatt(manager: &ConnectionManager, event: GattEvent) {
    manager.handle_event(AdapterEvent::Gatt {
        identifier: "AA-1".to_string(),
        event,
    });
}

/// A connected device with the battery service fully discovered.
fn connected_device() -> (Arc<FakeAdapter>, ConnectionManager, Arc<Device>) {
    let (adapter, manager) = powered_manager();
    advertise(&manager, "AA-1", "Sensor-01", -60);
    let device = manager
        .connect_peripheral(&PeripheralHandle::new("AA-1"))
        .unwrap();
    manager.handle_event(AdapterEvent::PeripheralConnected(PeripheralHandle::new("AA-1")));

    gatt(
        &manager,
        GattEvent::ServicesDiscovered {
            services: vec![Service::primary(BATTERY_SERVICE_UUID)],
            error: None,
        },
    );
    gatt(
        &manager,
        GattEvent::CharacteristicsDiscovered {
            service: BATTERY_SERVICE_UUID,
            characteristics: vec![battery_level()],
            error: None,
        },
    );

    (adapter, manager, device)
}

fn spawn_read(device: &Arc<Device>, timeout: Duration) -> tokio::task::JoinHandle<ble_central::Result<Bytes>> {
    let device = device.clone();
    tokio::spawn(async move { device.read_characteristic(&battery_level(), timeout).await })
}

#[tokio::test]
async fn test_discovery_cascades_from_services_to_characteristics() {
    let (adapter, _manager, device) = connected_device();

    assert_eq!(
        adapter.calls(),
        vec![
            AdapterCall::Connect("AA-1".into()),
            AdapterCall::DiscoverServices("AA-1".into()),
            AdapterCall::DiscoverCharacteristics("AA-1".into(), BATTERY_SERVICE_UUID),
        ]
    );
    assert_eq!(device.services(), vec![Service::primary(BATTERY_SERVICE_UUID)]);
    assert_eq!(device.characteristics(&BATTERY_SERVICE_UUID), vec![battery_level()]);
    assert_eq!(device.characteristic(&BATTERY_LEVEL_UUID).unwrap(), battery_level());
    assert_eq!(device.cached_value(&BATTERY_LEVEL_UUID), Some(Bytes::new()));
}

#[tokio::test]
async fn test_unknown_characteristic_lookup_fails() {
    let (_adapter, _manager, device) = connected_device();

    assert!(matches!(
        device.characteristic(&MODEL_NUMBER_UUID),
        Err(Error::CharacteristicNotFound { .. })
    ));
    assert!(device.characteristics(&DEVICE_INFO_SERVICE_UUID).is_empty());
}

#[tokio::test]
async fn test_read_value_reaches_caller_and_subscriber() {
    let (adapter, manager, device) = connected_device();
    let mut notifications = device.subscribe_to_notifications(&battery_level()).unwrap();
    assert_eq!(
        adapter.count(&AdapterCall::SetNotify("AA-1".into(), BATTERY_LEVEL_UUID, true)),
        1
    );

    let read = spawn_read(&device, TIMEOUT);
    settle(|| device.pending_reads(&BATTERY_LEVEL_UUID) == 1).await;
    assert_eq!(
        adapter.count(&AdapterCall::Read("AA-1".into(), BATTERY_LEVEL_UUID)),
        1
    );

    gatt(
        &manager,
        GattEvent::ValueUpdated {
            characteristic: BATTERY_LEVEL_UUID,
            result: Ok(Bytes::from_static(&[0x01, 0x02])),
        },
    );

    assert_eq!(read.await.unwrap().unwrap(), Bytes::from_static(&[0x01, 0x02]));
    assert_eq!(
        notifications.next().await.unwrap().unwrap(),
        Bytes::from_static(&[0x01, 0x02])
    );
    assert_eq!(
        device.cached_value(&BATTERY_LEVEL_UUID),
        Some(Bytes::from_static(&[0x01, 0x02]))
    );
}

#[tokio::test]
async fn test_concurrent_reads_share_one_response() {
    let (_adapter, manager, device) = connected_device();

    let first = spawn_read(&device, TIMEOUT);
    let second = spawn_read(&device, TIMEOUT);
    settle(|| device.pending_reads(&BATTERY_LEVEL_UUID) == 2).await;

    gatt(
        &manager,
        GattEvent::ValueUpdated {
            characteristic: BATTERY_LEVEL_UUID,
            result: Ok(Bytes::from_static(&[0x55])),
        },
    );

    assert_eq!(first.await.unwrap().unwrap(), Bytes::from_static(&[0x55]));
    assert_eq!(second.await.unwrap().unwrap(), Bytes::from_static(&[0x55]));
    assert_eq!(device.pending_reads(&BATTERY_LEVEL_UUID), 0);
}

#[tokio::test]
async fn test_read_error_fails_waiters_and_ends_subscription() {
    let (_adapter, manager, device) = connected_device();
    let mut notifications = device.subscribe_to_notifications(&battery_level()).unwrap();

    let read = spawn_read(&device, TIMEOUT);
    settle(|| device.pending_reads(&BATTERY_LEVEL_UUID) == 1).await;

    gatt(
        &manager,
        GattEvent::ValueUpdated {
            characteristic: BATTERY_LEVEL_UUID,
            result: Err(AdapterError::with_code(2, "read not permitted")),
        },
    );

    assert!(matches!(read.await.unwrap(), Err(Error::Adapter(e)) if e.code == Some(2)));
    assert!(matches!(notifications.next().await, Some(Err(Error::Adapter(_)))));
    assert!(notifications.next().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_read_times_out_without_response() {
    let (_adapter, _manager, device) = connected_device();
    let started = tokio::time::Instant::now();

    let result = device
        .read_characteristic(&battery_level(), Duration::from_millis(500))
        .await;

    assert!(matches!(result, Err(Error::ReadTimeout)));
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(device.pending_reads(&BATTERY_LEVEL_UUID), 0);
}

#[tokio::test(start_paused = true)]
async fn test_value_after_read_timeout_updates_cache() {
    let (_adapter, manager, device) = connected_device();

    let result = device
        .read_characteristic(&battery_level(), Duration::from_millis(500))
        .await;
    assert!(matches!(result, Err(Error::ReadTimeout)));

    gatt(
        &manager,
        GattEvent::ValueUpdated {
            characteristic: BATTERY_LEVEL_UUID,
            result: Ok(Bytes::from_static(&[0x09])),
        },
    );

    assert_eq!(device.pending_reads(&BATTERY_LEVEL_UUID), 0);
    assert_eq!(
        device.cached_value(&BATTERY_LEVEL_UUID),
        Some(Bytes::from_static(&[0x09]))
    );
}

#[tokio::test]
async fn test_notification_without_pending_read() {
    let (_adapter, manager, device) = connected_device();
    let mut notifications = device.subscribe_to_notifications(&battery_level()).unwrap();

    gatt(
        &manager,
        GattEvent::ValueUpdated {
            characteristic: BATTERY_LEVEL_UUID,
            result: Ok(Bytes::from_static(&[0x2A])),
        },
    );

    assert_eq!(
        notifications.next().await.unwrap().unwrap(),
        Bytes::from_static(&[0x2A])
    );
    assert_eq!(device.pending_reads(&BATTERY_LEVEL_UUID), 0);
}

#[tokio::test]
async fn test_acknowledged_write_waits_for_confirmation() {
    let (adapter, manager, device) = connected_device();

    let write = tokio::spawn({
        let device = device.clone();
        async move {
            device
                .write_characteristic(&battery_level(), vec![0x10u8], WriteMode::WithResponse, TIMEOUT)
                .await
        }
    });
    settle(|| device.pending_writes(&BATTERY_LEVEL_UUID) == 1).await;
    assert_eq!(
        adapter.count(&AdapterCall::Write(
            "AA-1".into(),
            BATTERY_LEVEL_UUID,
            Bytes::from_static(&[0x10]),
            WriteMode::WithResponse
        )),
        1
    );

    gatt(
        &manager,
        GattEvent::WriteConfirmed {
            characteristic: BATTERY_LEVEL_UUID,
            result: Ok(()),
        },
    );

    write.await.unwrap().unwrap();
    assert_eq!(device.pending_writes(&BATTERY_LEVEL_UUID), 0);
}

#[tokio::test(start_paused = true)]
async fn test_acknowledged_write_times_out() {
    let (_adapter, _manager, device) = connected_device();

    let result = device
        .write_characteristic(&battery_level(), Bytes::from_static(&[1]), WriteMode::WithResponse, TIMEOUT)
        .await;

    assert!(matches!(result, Err(Error::WriteTimeout)));
    assert!(result.unwrap_err().is_timeout());
}

#[tokio::test(start_paused = true)]
async fn test_write_confirmation_after_timeout_is_dropped() {
    let (_adapter, manager, device) = connected_device();

    let result = device
        .write_characteristic(&battery_level(), Bytes::from_static(&[1]), WriteMode::WithResponse, TIMEOUT)
        .await;
    assert!(matches!(result, Err(Error::WriteTimeout)));

    gatt(
        &manager,
        GattEvent::WriteConfirmed {
            characteristic: BATTERY_LEVEL_UUID,
            result: Ok(()),
        },
    );

    assert_eq!(device.pending_writes(&BATTERY_LEVEL_UUID), 0);
}

#[tokio::test]
async fn test_unacknowledged_write_completes_immediately() {
    let (adapter, _manager, device) = connected_device();

    device
        .write_characteristic(&battery_level(), Bytes::from_static(&[7]), WriteMode::WithoutResponse, TIMEOUT)
        .await
        .unwrap();

    assert_eq!(device.pending_writes(&BATTERY_LEVEL_UUID), 0);
    assert_eq!(
        adapter.count(&AdapterCall::Write(
            "AA-1".into(),
            BATTERY_LEVEL_UUID,
            Bytes::from_static(&[7]),
            WriteMode::WithoutResponse
        )),
        1
    );
}

#[tokio::test]
async fn test_disconnect_fails_pending_operations() {
    let (_adapter, manager, device) = connected_device();

    let read = spawn_read(&device, TIMEOUT);
    settle(|| device.pending_reads(&BATTERY_LEVEL_UUID) == 1).await;

    manager.handle_event(AdapterEvent::PeripheralDisconnected {
        peripheral: PeripheralHandle::new("AA-1"),
        error: None,
    });

    assert!(matches!(read.await.unwrap(), Err(Error::Disconnected)));
}

#[tokio::test]
async fn test_gatt_events_for_disconnected_devices_are_dropped() {
    let (_adapter, manager, device) = connected_device();
    manager.handle_event(AdapterEvent::PeripheralDisconnected {
        peripheral: PeripheralHandle::new("AA-1"),
        error: None,
    });

    gatt(
        &manager,
        GattEvent::ValueUpdated {
            characteristic: BATTERY_LEVEL_UUID,
            result: Ok(Bytes::from_static(&[9])),
        },
    );

    assert_eq!(device.cached_value(&BATTERY_LEVEL_UUID), Some(Bytes::new()));
}

#[tokio::test]
async fn test_discovery_failure_surfaces_as_last_error() {
    let (_adapter, manager, device) = connected_device();
    let mut changes = device.subscribe_changes();

    gatt(
        &manager,
        GattEvent::ServicesDiscovered {
            services: Vec::new(),
            error: Some(AdapterError::new("insufficient authentication")),
        },
    );

    assert!(matches!(
        changes.recv().await.unwrap(),
        DeviceChange::DiscoveryFailed(_)
    ));
    settle(|| manager.last_error().is_some()).await;
    assert!(matches!(manager.last_error().as_deref(), Some(Error::Adapter(_))));
    // The previously discovered layout is kept
    assert_eq!(device.services(), vec![Service::primary(BATTERY_SERVICE_UUID)]);
}

#[tokio::test]
async fn test_change_callback_fires_for_values() {
    let (_adapter, manager, device) = connected_device();
    let changes = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let handle = device.on_changed({
        let changes = changes.clone();
        move |change| changes.lock().push(change)
    });

    gatt(
        &manager,
        GattEvent::ValueUpdated {
            characteristic: BATTERY_LEVEL_UUID,
            result: Ok(Bytes::from_static(&[0x64])),
        },
    );

    settle(|| !changes.lock().is_empty()).await;
    assert_eq!(
        *changes.lock(),
        vec![DeviceChange::ValueUpdated(BATTERY_LEVEL_UUID)]
    );
    handle.unregister();
}
