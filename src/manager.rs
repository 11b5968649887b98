//! Connection manager for discovering and connecting BLE peripherals.
//!
//! The manager owns the radio adapter, tracks which devices are discovered,
//! connecting or connected, applies scan filters and resolves connect
//! waiters. Every adapter event is funnelled through
//! [`ConnectionManager::handle_event`], which never awaits.
//!
//! Connect failures leave a device in the discovered view. A disconnect
//! evicts it entirely, so it must be rediscovered before it reappears.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::adapter::{
    AdapterEvent, AdapterState, Authorization, PeripheralHandle, RadioAdapter, RSSI_UNAVAILABLE,
};
use crate::ble::advertisement::Advertisement;
use crate::config::ManagerConfig;
use crate::device::{CallbackHandle, ConnectionState, Device, DeviceChange, DeviceOptions};
use crate::error::{AdapterError, Error, Result};
use crate::filter::ScanFilter;
use crate::waiters::{wait_or_expire, OnDrop, WaiterRegistry};

/// Snapshot of a device view, ordered by first discovery.
pub type DeviceList = Vec<Arc<Device>>;

/// Registries guarded by the manager's single writer lock.
#[derive(Default)]
struct Registry {
    discovered: HashMap<String, Arc<Device>>,
    connecting: HashMap<String, Arc<Device>>,
    connected: HashMap<String, Arc<Device>>,
    /// Pending connect callers by identifier.
    connect_waiters: WaiterRegistry<String, ()>,
    /// Manager subscriptions to device change notifications.
    change_subscriptions: HashMap<String, CallbackHandle>,
    /// Filter applied to discovery events while scanning.
    scan_filter: Option<Arc<dyn ScanFilter>>,
}

fn snapshot(devices: &HashMap<String, Arc<Device>>) -> DeviceList {
    let mut list: DeviceList = devices.values().cloned().collect();
    list.sort_by_key(|d| d.sequence());
    list
}

/// Published observable state.
struct Published {
    powered_on: watch::Sender<bool>,
    scanning: watch::Sender<bool>,
    last_error: watch::Sender<Option<Arc<Error>>>,
    discovered: watch::Sender<DeviceList>,
    connecting: watch::Sender<DeviceList>,
    connected: watch::Sender<DeviceList>,
}

impl Published {
    fn new() -> Self {
        Self {
            powered_on: watch::channel(false).0,
            scanning: watch::channel(false).0,
            last_error: watch::channel(None).0,
            discovered: watch::channel(Vec::new()).0,
            connecting: watch::channel(Vec::new()).0,
            connected: watch::channel(Vec::new()).0,
        }
    }
}

struct Inner {
    adapter: Arc<dyn RadioAdapter>,
    config: ManagerConfig,
    registry: Mutex<Registry>,
    published: Published,
    /// Accepted discovery events.
    discovery_tx: broadcast::Sender<Arc<Device>>,
    /// Creation order counter for devices.
    device_counter: AtomicU64,
    /// Callback ID counter.
    callback_counter: AtomicU64,
    /// Event loop task handle.
    event_loop: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Central coordinator for one radio.
///
/// Cloning yields another handle to the same manager.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager for an adapter.
    ///
    /// Events must be delivered through [`handle_event`](Self::handle_event)
    /// or an event loop started with [`spawn_event_loop`](Self::spawn_event_loop).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(adapter: Arc<dyn RadioAdapter>, config: ManagerConfig) -> Result<Self> {
        config.validate()?;
        let (discovery_tx, _) = broadcast::channel(config.discovery_capacity);

        Ok(Self {
            inner: Arc::new(Inner {
                adapter,
                config,
                registry: Mutex::new(Registry::default()),
                published: Published::new(),
                discovery_tx,
                device_counter: AtomicU64::new(0),
                callback_counter: AtomicU64::new(0),
                event_loop: Mutex::new(None),
            }),
        })
    }

    /// Create a manager backed by the system's first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn with_btleplug(config: ManagerConfig) -> Result<Self> {
        let (adapter, events) = crate::ble::platform::BtleplugAdapter::new().await?;
        let manager = Self::new(Arc::new(adapter), config)?;
        manager.spawn_event_loop(events);
        Ok(manager)
    }

    /// Start feeding adapter events from `events` into the manager.
    ///
    /// The loop ends when the sender side is dropped or on [`shutdown`](Self::shutdown).
    pub fn spawn_event_loop(&self, mut events: mpsc::UnboundedReceiver<AdapterEvent>) {
        let weak = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match weak.upgrade() {
                    Some(inner) => ConnectionManager { inner }.handle_event(event),
                    None => break,
                }
            }
            debug!("Connection manager event loop ended");
        });

        if let Some(previous) = self.inner.event_loop.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    // === Scanning ===

    /// Start scanning for peripherals.
    ///
    /// Ignored while the radio is not powered on. `services` restricts the
    /// adapter scan; `filter` is applied to every discovery event until
    /// [`stop_scan`](Self::stop_scan).
    pub fn start_scan(
        &self,
        services: Option<Vec<Uuid>>,
        filter: Option<Arc<dyn ScanFilter>>,
    ) -> Result<()> {
        if !self.is_powered_on() {
            debug!("Radio not powered on, ignoring scan request");
            return Ok(());
        }

        info!("Starting BLE scan");
        self.inner.adapter.scan(services).map_err(Error::Adapter)?;
        self.inner.registry.lock().scan_filter = filter;
        self.inner.published.scanning.send_replace(true);
        Ok(())
    }

    /// Stop scanning. Safe to call when not scanning.
    pub fn stop_scan(&self) -> Result<()> {
        self.inner.registry.lock().scan_filter = None;
        let was_scanning = self.inner.published.scanning.send_replace(false);

        if was_scanning {
            info!("Stopping BLE scan");
            self.inner.adapter.stop_scan().map_err(Error::Adapter)?;
        }
        Ok(())
    }

    // === Connections ===

    /// Start connecting to a peripheral without waiting for the outcome.
    ///
    /// Creates the device if this is the first reference to the peripheral.
    /// Calling again while connecting re-issues the adapter request.
    pub fn connect_peripheral(&self, peripheral: &PeripheralHandle) -> Result<Arc<Device>> {
        self.begin_connect(peripheral, None)
    }

    /// Connect to a device, waiting up to the configured connect timeout.
    pub async fn connect(&self, device: &Arc<Device>) -> Result<()> {
        self.connect_with_timeout(device, self.inner.config.connect_timeout)
            .await
    }

    /// Connect to a device, waiting up to `timeout`.
    ///
    /// Returns immediately if the device is already connected. Concurrent
    /// callers for the same device share one connection attempt and observe
    /// the same outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectTimeout`] if no outcome arrives in time, or
    /// [`Error::ConnectionFailed`] if the adapter reports a failure.
    pub async fn connect_with_timeout(&self, device: &Arc<Device>, timeout: Duration) -> Result<()> {
        let identifier = device.identifier().to_string();

        let (id, receiver, needs_connect) = {
            let mut registry = self.inner.registry.lock();
            if registry.connected.contains_key(&identifier) {
                debug!("Device {} already connected", identifier);
                return Ok(());
            }
            let needs_connect = !registry.connecting.contains_key(&identifier);
            let (id, receiver) = registry.connect_waiters.register(identifier.clone());
            (id, receiver, needs_connect)
        };
        let _withdraw = OnDrop::new(|| self.withdraw_connect(&identifier, id));

        if needs_connect {
            if let Err(e) = self.begin_connect(device.peripheral(), Some(device)) {
                debug!("Connect to {} could not be issued: {}", identifier, e);
            }
        }

        wait_or_expire(receiver, timeout, || self.expire_connect(&identifier)).await
    }

    /// Disconnect a peripheral.
    ///
    /// Local state changes once the adapter confirms the disconnect.
    pub fn disconnect(&self, peripheral: &PeripheralHandle) -> Result<()> {
        info!("Disconnecting from {}", peripheral.identifier);
        self.inner
            .adapter
            .cancel_connection(peripheral)
            .map_err(Error::Adapter)
    }

    /// Disconnect every connecting or connected device.
    pub fn disconnect_all(&self) {
        let peripherals: Vec<PeripheralHandle> = {
            let registry = self.inner.registry.lock();
            registry
                .connecting
                .values()
                .chain(registry.connected.values())
                .map(|d| d.peripheral().clone())
                .collect()
        };

        for peripheral in peripherals {
            if let Err(e) = self.disconnect(&peripheral) {
                warn!("Error disconnecting {}: {}", peripheral.identifier, e);
            }
        }
    }

    /// Stop scanning, disconnect everything and stop the event loop.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down connection manager");

        self.stop_scan()?;
        self.disconnect_all();

        let handle = self.inner.event_loop.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }

        let drained = self.inner.registry.lock().connect_waiters.drain_all();
        drained.resolve_with(|| Err(Error::Internal("connection manager shut down".to_string())));

        Ok(())
    }

    // === Observable state ===

    /// Check if the radio is powered on.
    pub fn is_powered_on(&self) -> bool {
        *self.inner.published.powered_on.borrow()
    }

    /// Check if scanning is active.
    pub fn is_scanning(&self) -> bool {
        *self.inner.published.scanning.borrow()
    }

    /// Get the last ambient or operation error.
    pub fn last_error(&self) -> Option<Arc<Error>> {
        self.inner.published.last_error.borrow().clone()
    }

    /// Get the discovered devices.
    pub fn discovered_devices(&self) -> DeviceList {
        self.inner.published.discovered.borrow().clone()
    }

    /// Get the devices with a connection attempt in flight.
    pub fn connecting_devices(&self) -> DeviceList {
        self.inner.published.connecting.borrow().clone()
    }

    /// Get the connected devices.
    pub fn connected_devices(&self) -> DeviceList {
        self.inner.published.connected.borrow().clone()
    }

    /// Watch the powered-on flag.
    pub fn watch_powered_on(&self) -> watch::Receiver<bool> {
        self.inner.published.powered_on.subscribe()
    }

    /// Watch the scanning flag.
    pub fn watch_scanning(&self) -> watch::Receiver<bool> {
        self.inner.published.scanning.subscribe()
    }

    /// Watch the last error.
    pub fn watch_last_error(&self) -> watch::Receiver<Option<Arc<Error>>> {
        self.inner.published.last_error.subscribe()
    }

    /// Watch the discovered devices.
    pub fn watch_discovered(&self) -> watch::Receiver<DeviceList> {
        self.inner.published.discovered.subscribe()
    }

    /// Watch the connecting devices.
    pub fn watch_connecting(&self) -> watch::Receiver<DeviceList> {
        self.inner.published.connecting.subscribe()
    }

    /// Watch the connected devices.
    pub fn watch_connected(&self) -> watch::Receiver<DeviceList> {
        self.inner.published.connected.subscribe()
    }

    // === Lookups ===

    /// Get a discovered device by identifier.
    pub fn device(&self, identifier: &str) -> Option<Arc<Device>> {
        self.inner.registry.lock().discovered.get(identifier).cloned()
    }

    /// Get the device with the strongest signal that is not stale.
    pub fn nearest_device(&self) -> Option<Arc<Device>> {
        self.devices_by_signal().into_iter().next()
    }

    /// Get non-stale discovered devices, strongest signal first.
    ///
    /// Devices without a signal reading sort last.
    pub fn devices_by_signal(&self) -> DeviceList {
        let mut devices: DeviceList = self
            .discovered_devices()
            .into_iter()
            .filter(|d| !d.is_stale())
            .collect();

        devices.sort_by_key(|d| {
            let rssi = match d.rssi() {
                RSSI_UNAVAILABLE => i16::MIN,
                rssi => rssi,
            };
            std::cmp::Reverse(rssi)
        });
        devices
    }

    /// Number of callers waiting on a connection to `identifier`.
    pub fn pending_connects(&self, identifier: &str) -> usize {
        self.inner
            .registry
            .lock()
            .connect_waiters
            .pending_for(&identifier.to_string())
    }

    /// Subscribe to accepted discovery events.
    pub fn subscribe_discovered(&self) -> broadcast::Receiver<Arc<Device>> {
        self.inner.discovery_tx.subscribe()
    }

    /// Register a callback for accepted discovery events.
    pub fn on_device_discovered<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(Arc<Device>) + Send + Sync + 'static,
    {
        let callback_id = self.inner.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.inner.discovery_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(device) => callback(device),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    // === Adapter events ===

    /// Apply one adapter event.
    ///
    /// This is the single entry point for adapter callbacks. It resolves
    /// waiters and publishes state but never blocks on the adapter.
    pub fn handle_event(&self, event: AdapterEvent) {
        match event {
            AdapterEvent::PowerStateChanged(state) => self.handle_power_state(state),
            AdapterEvent::AuthorizationChanged(authorization) => {
                self.handle_authorization(authorization)
            }
            AdapterEvent::PeripheralDiscovered {
                peripheral,
                advertisement,
                rssi,
            } => self.handle_discovered(peripheral, advertisement, rssi),
            AdapterEvent::PeripheralConnected(peripheral) => self.handle_connected(&peripheral),
            AdapterEvent::PeripheralConnectFailed { peripheral, error } => {
                self.handle_connect_failed(&peripheral, error.unwrap_or_else(AdapterError::unknown))
            }
            AdapterEvent::PeripheralDisconnected { peripheral, error } => {
                self.handle_disconnected(&peripheral, error)
            }
            AdapterEvent::Gatt { identifier, event } => {
                let device = self.inner.registry.lock().connected.get(&identifier).cloned();
                match device {
                    Some(device) => device.handle_gatt_event(event),
                    None => debug!("Ignoring GATT event for unconnected device {}", identifier),
                }
            }
        }
    }

    fn handle_power_state(&self, state: AdapterState) {
        let powered_on = state.is_powered_on();
        let was_powered_on = self.inner.published.powered_on.send_replace(powered_on);
        if was_powered_on != powered_on {
            info!("Radio state changed: {:?}", state);
        }

        if !powered_on {
            self.inner.registry.lock().scan_filter = None;
            self.inner.published.scanning.send_replace(false);
        }

        if state == AdapterState::Unauthorized {
            self.set_last_error(Error::PermissionDenied);
        }
    }

    fn handle_authorization(&self, authorization: Authorization) {
        debug!("Bluetooth authorization: {:?}", authorization);
        if authorization.is_denied() {
            warn!("Bluetooth permission denied ({:?})", authorization);
            self.set_last_error(Error::PermissionDenied);
        }
    }

    fn handle_discovered(&self, peripheral: PeripheralHandle, advertisement: Advertisement, rssi: i16) {
        let device = {
            let mut registry = self.inner.registry.lock();

            if let Some(filter) = &registry.scan_filter {
                if !filter.matches(&peripheral, &advertisement, rssi) {
                    trace!("Scan filter rejected {}", peripheral.identifier);
                    return;
                }
            }

            let known = registry.discovered.get(&peripheral.identifier).cloned();
            let device = match known {
                Some(device) => device,
                None => {
                    let device = self.create_device(&peripheral);
                    info!(
                        "Discovered new device {} ({:?})",
                        peripheral.identifier,
                        peripheral.name.as_deref().or(advertisement.local_name.as_deref())
                    );
                    self.register_discovered(&mut registry, device.clone());
                    device
                }
            };

            device.update(&peripheral, advertisement, rssi, Utc::now());

            self.publish_discovered(&registry);
            if registry.connecting.contains_key(&peripheral.identifier) {
                self.publish_connecting(&registry);
            }
            device
        };

        let _ = self.inner.discovery_tx.send(device);
    }

    fn handle_connected(&self, peripheral: &PeripheralHandle) {
        let identifier = &peripheral.identifier;

        let (device, waiters) = {
            let mut registry = self.inner.registry.lock();
            let Some(device) = registry.discovered.get(identifier).cloned() else {
                warn!("Connected event for unknown device {}, ignoring", identifier);
                return;
            };

            registry.connecting.remove(identifier);
            registry
                .connected
                .insert(identifier.clone(), device.clone());
            device.set_connection_state(ConnectionState::Connected);

            self.publish_connecting(&registry);
            self.publish_connected(&registry);
            (device, registry.connect_waiters.drain(identifier))
        };

        info!("Connected to {}", identifier);

        if let Err(e) = device.discover_services(None) {
            warn!("Service discovery on {} could not be issued: {}", identifier, e);
        }

        waiters.succeed(());
    }

    fn handle_connect_failed(&self, peripheral: &PeripheralHandle, cause: AdapterError) {
        let identifier = &peripheral.identifier;
        warn!("Connection to {} failed: {}", identifier, cause);

        let waiters = {
            let mut registry = self.inner.registry.lock();
            if let Some(device) = registry.connecting.remove(identifier) {
                device.set_connection_state(ConnectionState::Disconnected);
            }
            self.publish_connecting(&registry);
            registry.connect_waiters.drain(identifier)
        };

        self.set_last_error(Error::ConnectionFailed {
            cause: cause.clone(),
        });
        waiters.resolve_with(|| {
            Err(Error::ConnectionFailed {
                cause: cause.clone(),
            })
        });
    }

    fn expire_connect(&self, identifier: &str) {
        let (expired, device) = {
            let mut registry = self.inner.registry.lock();
            let expired = registry.connect_waiters.drain(&identifier.to_string());
            if expired.is_empty() {
                return;
            }

            let device = registry.connecting.remove(identifier);
            if let Some(device) = &device {
                device.set_connection_state(ConnectionState::Disconnected);
                self.publish_connecting(&registry);
            }
            (expired, device)
        };

        warn!(
            "Connection to {} timed out ({} waiters)",
            identifier,
            expired.len()
        );
        self.set_last_error(Error::ConnectTimeout);
        expired.resolve_with(|| Err(Error::ConnectTimeout));

        if let Some(device) = device {
            if let Err(e) = self.inner.adapter.cancel_connection(device.peripheral()) {
                debug!("Cancelling timed-out connection to {} failed: {}", identifier, e);
            }
        }
    }

    /// Withdraw one connect waiter whose caller went away.
    ///
    /// If it was the last waiter, the attempt is abandoned so a later
    /// connect issues a fresh request.
    fn withdraw_connect(&self, identifier: &str, id: u64) {
        let abandoned = {
            let mut registry = self.inner.registry.lock();
            if registry.connect_waiters.remove(&identifier.to_string(), id) != Some(0) {
                return;
            }

            let device = registry.connecting.remove(identifier);
            if let Some(device) = &device {
                device.set_connection_state(ConnectionState::Disconnected);
                self.publish_connecting(&registry);
            }
            device
        };

        if let Some(device) = abandoned {
            debug!("Connect to {} abandoned by its last caller", identifier);
            if let Err(e) = self.inner.adapter.cancel_connection(device.peripheral()) {
                debug!("Cancelling abandoned connection to {} failed: {}", identifier, e);
            }
        }
    }

    fn handle_disconnected(&self, peripheral: &PeripheralHandle, error: Option<AdapterError>) {
        let identifier = &peripheral.identifier;

        let (device, aborted, subscription) = {
            let mut registry = self.inner.registry.lock();
            let connected = registry.connected.remove(identifier);
            let connecting = registry.connecting.remove(identifier);
            let discovered = registry.discovered.remove(identifier);
            let subscription = registry.change_subscriptions.remove(identifier);

            let aborted = registry.connect_waiters.drain(identifier);

            self.publish_connecting(&registry);
            self.publish_connected(&registry);
            self.publish_discovered(&registry);
            (connected.or(connecting).or(discovered), aborted, subscription)
        };
        drop(subscription);

        match &error {
            Some(e) => info!("Disconnected from {}: {}", identifier, e),
            None => info!("Disconnected from {}", identifier),
        }

        if let Some(device) = device {
            device.set_connection_state(ConnectionState::Disconnected);
            device.handle_disconnected();
        }

        if !aborted.is_empty() {
            let cause = error.unwrap_or_else(|| AdapterError::new("disconnected while connecting"));
            aborted.resolve_with(|| {
                Err(Error::ConnectionFailed {
                    cause: cause.clone(),
                })
            });
        }
    }

    // === Internal ===

    /// Ensure a device is registered and mark it connecting, then issue the adapter connect.
    fn begin_connect(
        &self,
        peripheral: &PeripheralHandle,
        existing: Option<&Arc<Device>>,
    ) -> Result<Arc<Device>> {
        let device = {
            let mut registry = self.inner.registry.lock();
            let device = match registry.discovered.get(&peripheral.identifier).cloned() {
                Some(device) => device,
                None => {
                    let device = existing
                        .cloned()
                        .unwrap_or_else(|| self.create_device(peripheral));
                    self.register_discovered(&mut registry, device.clone());
                    self.publish_discovered(&registry);
                    device
                }
            };

            if !registry.connected.contains_key(&peripheral.identifier) {
                registry
                    .connecting
                    .insert(peripheral.identifier.clone(), device.clone());
                device.set_connection_state(ConnectionState::Connecting);
                self.publish_connecting(&registry);
            }
            device
        };

        info!("Connecting to {}", peripheral.identifier);
        if let Err(cause) = self.inner.adapter.connect(peripheral) {
            self.handle_connect_failed(peripheral, cause.clone());
            return Err(Error::ConnectionFailed { cause });
        }

        Ok(device)
    }

    fn create_device(&self, peripheral: &PeripheralHandle) -> Arc<Device> {
        let sequence = self.inner.device_counter.fetch_add(1, Ordering::SeqCst);
        Arc::new(Device::new(
            peripheral.clone(),
            self.inner.adapter.clone(),
            sequence,
            DeviceOptions {
                notification_capacity: self.inner.config.notification_capacity,
                stale_timeout: self.inner.config.stale_timeout,
            },
        ))
    }

    /// Insert into the discovered view and follow the device's changes.
    fn register_discovered(&self, registry: &mut Registry, device: Arc<Device>) {
        let identifier = device.identifier().to_string();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let subscription = device.on_changed(move |change| {
            if let Some(inner) = weak.upgrade() {
                ConnectionManager { inner }.handle_device_change(change);
            }
        });

        registry.change_subscriptions.insert(identifier.clone(), subscription);
        registry.discovered.insert(identifier, device);
    }

    fn handle_device_change(&self, change: DeviceChange) {
        if let DeviceChange::DiscoveryFailed(error) = &change {
            self.set_last_error(Error::Adapter(error.clone()));
        }

        let registry = self.inner.registry.lock();
        self.publish_discovered(&registry);
        self.publish_connecting(&registry);
        self.publish_connected(&registry);
    }

    fn set_last_error(&self, error: Error) {
        self.inner
            .published
            .last_error
            .send_replace(Some(Arc::new(error)));
    }

    fn publish_discovered(&self, registry: &Registry) {
        self.inner
            .published
            .discovered
            .send_replace(snapshot(&registry.discovered));
    }

    fn publish_connecting(&self, registry: &Registry) {
        self.inner
            .published
            .connecting
            .send_replace(snapshot(&registry.connecting));
    }

    fn publish_connected(&self, registry: &Registry) {
        self.inner
            .published
            .connected
            .send_replace(snapshot(&registry.connected));
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("powered_on", &self.is_powered_on())
            .field("scanning", &self.is_scanning())
            .field("discovered", &self.discovered_devices().len())
            .field("connecting", &self.connecting_devices().len())
            .field("connected", &self.connected_devices().len())
            .finish()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop.get_mut().take() {
            handle.abort();
        }
    }
}
