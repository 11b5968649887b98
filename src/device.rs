//! Per-peripheral state.
//!
//! A [`Device`] tracks advertisement metadata, the discovered GATT layout,
//! cached characteristic values, pending reads and writes, and notification
//! channels for one peripheral.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::ble::adapter::{GattEvent, PeripheralHandle, RadioAdapter, RSSI_UNAVAILABLE};
use crate::ble::advertisement::Advertisement;
use crate::ble::gatt::{Characteristic, Service, WriteMode};
use crate::error::{AdapterError, Error, Result};
use crate::notification::{NotificationEvent, NotificationStream};
use crate::waiters::{wait_or_expire, OnDrop, WaiterRegistry};

/// Callback handle for unregistering callbacks.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

impl std::fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandle").field("id", &self.id).finish()
    }
}

/// Connection state for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Connected to the device.
    Connected,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if a connection attempt is in flight.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Change notification emitted by a device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceChange {
    /// The service list was replaced.
    ServicesDiscovered,
    /// The characteristic list of a service was replaced.
    CharacteristicsDiscovered(Uuid),
    /// A characteristic value was cached.
    ValueUpdated(Uuid),
    /// Service or characteristic discovery failed.
    DiscoveryFailed(AdapterError),
}

/// Options applied to each device created by a manager.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DeviceOptions {
    pub(crate) notification_capacity: usize,
    pub(crate) stale_timeout: Duration,
}

/// Mutable metadata and GATT cache.
struct DeviceState {
    /// Platform or advertised name.
    name: Option<String>,
    /// Last advertisement payload.
    advertisement: Advertisement,
    /// Last signal strength.
    rssi: i16,
    /// Time of the last discovery event.
    last_seen: DateTime<Utc>,
    /// Discovered services in adapter order.
    services: Vec<Service>,
    /// Characteristics by service UUID.
    characteristics: HashMap<Uuid, Vec<Characteristic>>,
    /// Last known value by characteristic UUID.
    values: HashMap<Uuid, Bytes>,
}

impl DeviceState {
    fn new(name: Option<String>) -> Self {
        Self {
            name,
            advertisement: Advertisement::default(),
            rssi: RSSI_UNAVAILABLE,
            last_seen: Utc::now(),
            services: Vec::new(),
            characteristics: HashMap::new(),
            values: HashMap::new(),
        }
    }
}

/// Pending reads and writes keyed by characteristic UUID.
#[derive(Default)]
struct CharacteristicWaiters {
    reads: WaiterRegistry<Uuid, Bytes>,
    writes: WaiterRegistry<Uuid, ()>,
}

/// A discovered peripheral.
pub struct Device {
    /// Stable identity string.
    identifier: String,
    /// Handle used for adapter requests.
    peripheral: PeripheralHandle,
    /// Creation order, used to order snapshots.
    sequence: u64,
    /// The radio adapter.
    adapter: Arc<dyn RadioAdapter>,
    /// Metadata and GATT cache.
    state: RwLock<DeviceState>,
    /// Connection state, maintained by the manager.
    connection_state: RwLock<ConnectionState>,
    /// Pending characteristic operations.
    waiters: Mutex<CharacteristicWaiters>,
    /// Notification channels by characteristic UUID.
    notifications: Mutex<HashMap<Uuid, broadcast::Sender<NotificationEvent>>>,
    /// Change notification channel.
    change_tx: broadcast::Sender<DeviceChange>,
    /// Callback ID counter.
    callback_counter: AtomicU64,
    options: DeviceOptions,
}

impl Device {
    /// Create a device for a peripheral with empty metadata.
    pub(crate) fn new(
        peripheral: PeripheralHandle,
        adapter: Arc<dyn RadioAdapter>,
        sequence: u64,
        options: DeviceOptions,
    ) -> Self {
        let (change_tx, _) = broadcast::channel(options.notification_capacity);

        Self {
            identifier: peripheral.identifier.clone(),
            state: RwLock::new(DeviceState::new(peripheral.name.clone())),
            peripheral,
            sequence,
            adapter,
            connection_state: RwLock::new(ConnectionState::Disconnected),
            waiters: Mutex::new(CharacteristicWaiters::default()),
            notifications: Mutex::new(HashMap::new()),
            change_tx,
            callback_counter: AtomicU64::new(0),
            options,
        }
    }

    /// Replace advertisement, signal strength and last-seen time.
    pub(crate) fn update(
        &self,
        peripheral: &PeripheralHandle,
        advertisement: Advertisement,
        rssi: i16,
        timestamp: DateTime<Utc>,
    ) {
        let mut state = self.state.write();
        if peripheral.name.is_some() {
            state.name = peripheral.name.clone();
        }
        state.advertisement = advertisement;
        state.rssi = rssi;
        state.last_seen = timestamp;
    }

    pub(crate) fn set_connection_state(&self, new_state: ConnectionState) {
        let old_state = std::mem::replace(&mut *self.connection_state.write(), new_state);
        if old_state != new_state {
            debug!(
                "Device {} connection state changed: {} -> {}",
                self.identifier, old_state, new_state
            );
        }
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }

    // === Identification ===

    /// Get the stable identity string.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Get the adapter handle for this device.
    pub fn peripheral(&self) -> &PeripheralHandle {
        &self.peripheral
    }

    /// Get the display name: the platform name, else the advertised local name.
    pub fn name(&self) -> Option<String> {
        let state = self.state.read();
        state
            .name
            .clone()
            .or_else(|| state.advertisement.local_name.clone())
    }

    // === Advertisement ===

    /// Get the last advertisement payload.
    pub fn advertisement(&self) -> Advertisement {
        self.state.read().advertisement.clone()
    }

    /// Get the last signal strength in dBm.
    pub fn rssi(&self) -> i16 {
        self.state.read().rssi
    }

    /// Get the time of the last discovery event.
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.state.read().last_seen
    }

    /// Check if the device has not advertised for longer than `timeout`.
    pub fn is_stale_after(&self, timeout: Duration) -> bool {
        let elapsed = Utc::now().signed_duration_since(self.last_seen());
        elapsed.to_std().map(|e| e > timeout).unwrap_or(false)
    }

    /// Check if the device has not advertised within the configured stale timeout.
    pub fn is_stale(&self) -> bool {
        self.is_stale_after(self.options.stale_timeout)
    }

    // === Connection ===

    /// Get the current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection_state.read()
    }

    // === GATT layout ===

    /// Get the discovered services.
    pub fn services(&self) -> Vec<Service> {
        self.state.read().services.clone()
    }

    /// Get the discovered characteristics of a service.
    pub fn characteristics(&self, service: &Uuid) -> Vec<Characteristic> {
        self.state
            .read()
            .characteristics
            .get(service)
            .cloned()
            .unwrap_or_default()
    }

    /// Find a discovered characteristic by UUID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CharacteristicNotFound`] if no discovered service has it.
    pub fn characteristic(&self, uuid: &Uuid) -> Result<Characteristic> {
        self.state
            .read()
            .characteristics
            .values()
            .flatten()
            .find(|c| c.uuid == *uuid)
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }

    /// Get the last known value of a characteristic.
    pub fn cached_value(&self, uuid: &Uuid) -> Option<Bytes> {
        self.state.read().values.get(uuid).cloned()
    }

    /// Request service discovery, optionally limited to `filter`.
    ///
    /// Characteristic discovery follows automatically for every service found.
    pub fn discover_services(&self, filter: Option<Vec<Uuid>>) -> Result<()> {
        debug!("Discovering services on {}", self.identifier);
        self.adapter
            .discover_services(&self.peripheral, filter)
            .map_err(Error::Adapter)
    }

    /// Request characteristic discovery for one service.
    pub fn discover_characteristics(&self, service: Uuid, filter: Option<Vec<Uuid>>) -> Result<()> {
        debug!(
            "Discovering characteristics of {} on {}",
            service, self.identifier
        );
        self.adapter
            .discover_characteristics(&self.peripheral, service, filter)
            .map_err(Error::Adapter)
    }

    // === Characteristic I/O ===

    /// Read a characteristic value.
    ///
    /// Concurrent reads of the same characteristic share the first adapter
    /// response. The call fails with [`Error::ReadTimeout`] if no value
    /// arrives within `timeout`.
    pub async fn read_characteristic(
        &self,
        characteristic: &Characteristic,
        timeout: Duration,
    ) -> Result<Bytes> {
        let key = characteristic.uuid;
        let (id, receiver) = self.waiters.lock().reads.register(key);
        let _withdraw = OnDrop::new(|| {
            self.waiters.lock().reads.remove(&key, id);
        });

        if let Err(e) = self.adapter.read_value(&self.peripheral, characteristic) {
            self.waiters.lock().reads.remove(&key, id);
            return Err(Error::Adapter(e));
        }
        trace!("Read issued for {} on {}", key, self.identifier);

        wait_or_expire(receiver, timeout, || {
            let expired = self.waiters.lock().reads.drain(&key);
            if !expired.is_empty() {
                debug!(
                    "Read of {} on {} timed out ({} waiters)",
                    key,
                    self.identifier,
                    expired.len()
                );
            }
            expired.resolve_with(|| Err(Error::ReadTimeout));
        })
        .await
    }

    /// Write a characteristic value.
    ///
    /// Acknowledged writes wait for the peripheral's confirmation and fail
    /// with [`Error::WriteTimeout`] if none arrives within `timeout`.
    /// Unacknowledged writes complete as soon as the adapter accepts them.
    pub async fn write_characteristic(
        &self,
        characteristic: &Characteristic,
        value: impl Into<Bytes>,
        mode: WriteMode,
        timeout: Duration,
    ) -> Result<()> {
        let key = characteristic.uuid;
        let value = value.into();

        if mode == WriteMode::WithoutResponse {
            trace!(
                "Writing {} bytes without response to {} on {}",
                value.len(),
                key,
                self.identifier
            );
            return self
                .adapter
                .write_value(&self.peripheral, characteristic, value, mode)
                .map_err(Error::Adapter);
        }

        let (id, receiver) = self.waiters.lock().writes.register(key);
        let _withdraw = OnDrop::new(|| {
            self.waiters.lock().writes.remove(&key, id);
        });

        trace!(
            "Writing {} bytes to {} on {}",
            value.len(),
            key,
            self.identifier
        );
        if let Err(e) = self
            .adapter
            .write_value(&self.peripheral, characteristic, value, mode)
        {
            self.waiters.lock().writes.remove(&key, id);
            return Err(Error::Adapter(e));
        }

        wait_or_expire(receiver, timeout, || {
            let expired = self.waiters.lock().writes.drain(&key);
            if !expired.is_empty() {
                debug!("Write to {} on {} timed out", key, self.identifier);
            }
            expired.resolve_with(|| Err(Error::WriteTimeout));
        })
        .await
    }

    /// Enable or disable notifications for a characteristic.
    pub fn set_notify(&self, characteristic: &Characteristic, enabled: bool) -> Result<()> {
        debug!(
            "Setting notify={} for {} on {}",
            enabled, characteristic.uuid, self.identifier
        );
        self.adapter
            .set_notify_value(&self.peripheral, characteristic, enabled)
            .map_err(Error::Adapter)
    }

    /// Enable notifications and subscribe to the characteristic's value updates.
    ///
    /// The subscription observes reads, notifications and write confirmations
    /// that happen after this call.
    pub fn subscribe_to_notifications(
        &self,
        characteristic: &Characteristic,
    ) -> Result<NotificationStream> {
        let receiver = self.notification_channel(characteristic.uuid).subscribe();
        self.set_notify(characteristic, true)?;
        Ok(NotificationStream::new(characteristic.uuid, receiver))
    }

    // === Change notifications ===

    /// Subscribe to device change notifications.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<DeviceChange> {
        self.change_tx.subscribe()
    }

    /// Register a callback for device changes.
    pub fn on_changed<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(DeviceChange) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.change_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => callback(change),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    // === Adapter callbacks ===

    /// Apply a GATT event delivered by the adapter.
    pub(crate) fn handle_gatt_event(&self, event: GattEvent) {
        match event {
            GattEvent::ServicesDiscovered { services, error } => {
                self.handle_services_discovered(services, error)
            }
            GattEvent::CharacteristicsDiscovered {
                service,
                characteristics,
                error,
            } => self.handle_characteristics_discovered(service, characteristics, error),
            GattEvent::ValueUpdated {
                characteristic,
                result,
            } => self.handle_value_updated(characteristic, result),
            GattEvent::WriteConfirmed {
                characteristic,
                result,
            } => self.handle_write_confirmed(characteristic, result),
            GattEvent::NotifyStateChanged {
                characteristic,
                result,
            } => match result {
                Ok(enabled) => trace!(
                    "Notify state for {} on {} is now {}",
                    characteristic,
                    self.identifier,
                    enabled
                ),
                Err(e) => warn!(
                    "Notify state change for {} on {} failed: {}",
                    characteristic, self.identifier, e
                ),
            },
        }
    }

    fn handle_services_discovered(&self, services: Vec<Service>, error: Option<AdapterError>) {
        if let Some(error) = error {
            warn!("Service discovery on {} failed: {}", self.identifier, error);
            self.notify_change(DeviceChange::DiscoveryFailed(error));
            return;
        }

        debug!(
            "Discovered {} services on {}",
            services.len(),
            self.identifier
        );
        self.state.write().services = services.clone();
        self.notify_change(DeviceChange::ServicesDiscovered);

        for service in services {
            if let Err(e) = self.discover_characteristics(service.uuid, None) {
                warn!(
                    "Failed to request characteristics of {} on {}: {}",
                    service.uuid, self.identifier, e
                );
            }
        }
    }

    fn handle_characteristics_discovered(
        &self,
        service: Uuid,
        characteristics: Vec<Characteristic>,
        error: Option<AdapterError>,
    ) {
        if let Some(error) = error {
            warn!(
                "Characteristic discovery for {} on {} failed: {}",
                service, self.identifier, error
            );
            self.notify_change(DeviceChange::DiscoveryFailed(error));
            return;
        }

        debug!(
            "Discovered {} characteristics in {} on {}",
            characteristics.len(),
            service,
            self.identifier
        );

        {
            let mut state = self.state.write();
            for characteristic in &characteristics {
                state.values.entry(characteristic.uuid).or_default();
            }
            state.characteristics.insert(service, characteristics.clone());
        }
        for characteristic in &characteristics {
            self.notification_channel(characteristic.uuid);
        }

        self.notify_change(DeviceChange::CharacteristicsDiscovered(service));
    }

    fn handle_value_updated(&self, characteristic: Uuid, result: std::result::Result<Bytes, AdapterError>) {
        match result {
            Ok(value) => {
                trace!(
                    "Value of {} on {}: {:02X?}",
                    characteristic,
                    self.identifier,
                    &value[..std::cmp::min(value.len(), 20)]
                );
                self.state
                    .write()
                    .values
                    .insert(characteristic, value.clone());
                self.publish(characteristic, Ok(value.clone()));
                self.waiters.lock().reads.drain(&characteristic).succeed(value);
                self.notify_change(DeviceChange::ValueUpdated(characteristic));
            }
            Err(error) => {
                debug!(
                    "Value update for {} on {} failed: {}",
                    characteristic, self.identifier, error
                );
                self.publish(characteristic, Err(error.clone()));
                self.waiters
                    .lock()
                    .reads
                    .drain(&characteristic)
                    .resolve_with(|| Err(Error::Adapter(error.clone())));
            }
        }
    }

    fn handle_write_confirmed(&self, characteristic: Uuid, result: std::result::Result<(), AdapterError>) {
        let drained = self.waiters.lock().writes.drain(&characteristic);
        match result {
            Ok(()) => {
                trace!(
                    "Write to {} on {} confirmed ({} waiters)",
                    characteristic,
                    self.identifier,
                    drained.len()
                );
                drained.succeed(());
                let value = self.cached_value(&characteristic).unwrap_or_default();
                self.publish(characteristic, Ok(value));
            }
            Err(error) => {
                debug!(
                    "Write to {} on {} failed: {}",
                    characteristic, self.identifier, error
                );
                drained.resolve_with(|| Err(Error::Adapter(error.clone())));
                self.publish(characteristic, Err(error));
            }
        }
    }

    /// Fail every pending read and write after the link dropped.
    pub(crate) fn handle_disconnected(&self) {
        let (reads, writes) = {
            let mut waiters = self.waiters.lock();
            (waiters.reads.drain_all(), waiters.writes.drain_all())
        };
        if !reads.is_empty() || !writes.is_empty() {
            debug!(
                "Failing {} reads and {} writes on {} after disconnect",
                reads.len(),
                writes.len(),
                self.identifier
            );
        }
        reads.resolve_with(|| Err(Error::Disconnected));
        writes.resolve_with(|| Err(Error::Disconnected));
    }

    /// Number of reads pending for a characteristic.
    pub fn pending_reads(&self, characteristic: &Uuid) -> usize {
        self.waiters.lock().reads.pending_for(characteristic)
    }

    /// Number of writes pending for a characteristic.
    pub fn pending_writes(&self, characteristic: &Uuid) -> usize {
        self.waiters.lock().writes.pending_for(characteristic)
    }

    // === Internal ===

    /// Get or create the notification channel of a characteristic.
    fn notification_channel(&self, characteristic: Uuid) -> broadcast::Sender<NotificationEvent> {
        self.notifications
            .lock()
            .entry(characteristic)
            .or_insert_with(|| broadcast::channel(self.options.notification_capacity).0)
            .clone()
    }

    fn publish(&self, characteristic: Uuid, event: NotificationEvent) {
        let _ = self.notification_channel(characteristic).send(event);
    }

    fn notify_change(&self, change: DeviceChange) {
        let _ = self.change_tx.send(change);
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("identifier", &self.identifier)
            .field("name", &self.name())
            .field("connection_state", &self.connection_state())
            .finish()
    }
}
