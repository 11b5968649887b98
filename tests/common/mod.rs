//! Shared fixtures for integration tests.

#![allow(dead_code)]

use ble_central::{
    AdapterError, AdapterEvent, AdapterState, Advertisement, Characteristic, ConnectionManager,
    ManagerConfig, PeripheralHandle, RadioAdapter, WriteMode,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// A request issued to the fake adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterCall {
    Scan(Option<Vec<Uuid>>),
    StopScan,
    Connect(String),
    CancelConnection(String),
    DiscoverServices(String),
    DiscoverCharacteristics(String, Uuid),
    Read(String, Uuid),
    Write(String, Uuid, Bytes, WriteMode),
    SetNotify(String, Uuid, bool),
}

/// Adapter that records every request and never produces events itself.
#[derive(Default)]
pub struct FakeAdapter {
    calls: Mutex<Vec<AdapterCall>>,
    fail_connect: AtomicBool,
}

impl FakeAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call recorded so far.
    pub fn calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls equal to `call`.
    pub fn count(&self, call: &AdapterCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    /// Make connect requests fail to issue.
    pub fn fail_connects(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: AdapterCall) {
        self.calls.lock().push(call);
    }
}

impl RadioAdapter for FakeAdapter {
    fn scan(&self, services: Option<Vec<Uuid>>) -> Result<(), AdapterError> {
        self.record(AdapterCall::Scan(services));
        Ok(())
    }

    fn stop_scan(&self) -> Result<(), AdapterError> {
        self.record(AdapterCall::StopScan);
        Ok(())
    }

    fn connect(&self, peripheral: &PeripheralHandle) -> Result<(), AdapterError> {
        self.record(AdapterCall::Connect(peripheral.identifier.clone()));
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(AdapterError::with_code(3, "radio busy"));
        }
        Ok(())
    }

    fn cancel_connection(&self, peripheral: &PeripheralHandle) -> Result<(), AdapterError> {
        self.record(AdapterCall::CancelConnection(peripheral.identifier.clone()));
        Ok(())
    }

    fn discover_services(
        &self,
        peripheral: &PeripheralHandle,
        _filter: Option<Vec<Uuid>>,
    ) -> Result<(), AdapterError> {
        self.record(AdapterCall::DiscoverServices(peripheral.identifier.clone()));
        Ok(())
    }

    fn discover_characteristics(
        &self,
        peripheral: &PeripheralHandle,
        service: Uuid,
        _filter: Option<Vec<Uuid>>,
    ) -> Result<(), AdapterError> {
        self.record(AdapterCall::DiscoverCharacteristics(
            peripheral.identifier.clone(),
            service,
        ));
        Ok(())
    }

    fn read_value(
        &self,
        peripheral: &PeripheralHandle,
        characteristic: &Characteristic,
    ) -> Result<(), AdapterError> {
        self.record(AdapterCall::Read(
            peripheral.identifier.clone(),
            characteristic.uuid,
        ));
        Ok(())
    }

    fn write_value(
        &self,
        peripheral: &PeripheralHandle,
        characteristic: &Characteristic,
        value: Bytes,
        mode: WriteMode,
    ) -> Result<(), AdapterError> {
        self.record(AdapterCall::Write(
            peripheral.identifier.clone(),
            characteristic.uuid,
            value,
            mode,
        ));
        Ok(())
    }

    fn set_notify_value(
        &self,
        peripheral: &PeripheralHandle,
        characteristic: &Characteristic,
        enabled: bool,
    ) -> Result<(), AdapterError> {
        self.record(AdapterCall::SetNotify(
            peripheral.identifier.clone(),
            characteristic.uuid,
            enabled,
        ));
        Ok(())
    }
}

/// Install a log subscriber controlled by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A manager over a fresh fake adapter with the radio powered on.
pub fn powered_manager() -> (Arc<FakeAdapter>, ConnectionManager) {
    init_tracing();
    let adapter = FakeAdapter::new();
    let manager = ConnectionManager::new(adapter.clone(), ManagerConfig::default())
        .expect("default config is valid");
    manager.handle_event(AdapterEvent::PowerStateChanged(AdapterState::PoweredOn));
    (adapter, manager)
}

/// Deliver an advertisement for `identifier`.
pub fn advertise(manager: &ConnectionManager, identifier: &str, name: &str, rssi: i16) {
    manager.handle_event(AdapterEvent::PeripheralDiscovered {
        peripheral: PeripheralHandle::with_name(identifier, name),
        advertisement: Advertisement::with_local_name(name),
        rssi,
    });
}

/// Identifiers of a device snapshot, in snapshot order.
pub fn ids(devices: &[Arc<ble_central::Device>]) -> Vec<String> {
    devices.iter().map(|d| d.identifier().to_string()).collect()
}

/// Yield until `condition` holds, giving spawned tasks a chance to run.
pub async fn settle(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
