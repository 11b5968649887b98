//! Radio adapter backed by btleplug.
//!
//! Each request is issued on a spawned task and reports its outcome as an
//! [`AdapterEvent`]. A background task turns central events into discovery,
//! disconnect and power state events.

use btleplug::api::{
    Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter as CentralScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::adapter::{
    AdapterEvent, AdapterResult, AdapterState, GattEvent, PeripheralHandle, RadioAdapter,
    RSSI_UNAVAILABLE,
};
use crate::ble::advertisement::Advertisement;
use crate::ble::gatt::{Characteristic, Service, WriteMode};
use crate::error::{AdapterError, Error, Result};

/// State shared with spawned request tasks.
struct Shared {
    events: mpsc::UnboundedSender<AdapterEvent>,
    /// Peripherals seen by the central, by identifier.
    peripherals: RwLock<HashMap<String, Peripheral>>,
    /// Notification pumps of connected peripherals.
    connected: Mutex<HashMap<String, JoinHandle<()>>>,
    scanning: AtomicBool,
}

impl Shared {
    fn emit(&self, event: AdapterEvent) {
        if self.events.send(event).is_err() {
            trace!("Adapter event dropped, no receiver");
        }
    }

    fn emit_gatt(&self, identifier: &str, event: GattEvent) {
        self.emit(AdapterEvent::Gatt {
            identifier: identifier.to_string(),
            event,
        });
    }

    /// Emit a disconnect once per connection.
    fn mark_disconnected(&self, identifier: &str, error: Option<AdapterError>) {
        if let Some(pump) = self.connected.lock().remove(identifier) {
            pump.abort();
            self.emit(AdapterEvent::PeripheralDisconnected {
                peripheral: PeripheralHandle::new(identifier),
                error,
            });
        }
    }
}

/// [`RadioAdapter`] for the system Bluetooth stack.
pub struct BtleplugAdapter {
    adapter: Adapter,
    shared: Arc<Shared>,
    runtime: Handle,
    central_pump: JoinHandle<()>,
}

impl BtleplugAdapter {
    /// Open the first Bluetooth adapter.
    ///
    /// Returns the adapter and the receiver its events are delivered on.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<(Self, mpsc::UnboundedReceiver<AdapterEvent>)> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Self::with_adapter(adapter).await
    }

    /// Wrap a specific btleplug adapter.
    pub async fn with_adapter(
        adapter: Adapter,
    ) -> Result<(Self, mpsc::UnboundedReceiver<AdapterEvent>)> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            events: events_tx,
            peripherals: RwLock::new(HashMap::new()),
            connected: Mutex::new(HashMap::new()),
            scanning: AtomicBool::new(false),
        });

        let central_events = adapter.events().await.map_err(Error::Bluetooth)?;

        let initial_state = match adapter.adapter_state().await {
            Ok(state) => adapter_state(state),
            Err(e) => {
                warn!("Adapter state unavailable, assuming powered on: {}", e);
                AdapterState::PoweredOn
            }
        };
        shared.emit(AdapterEvent::PowerStateChanged(initial_state));

        let central_pump = {
            let adapter = adapter.clone();
            let shared = shared.clone();
            tokio::spawn(async move {
                let mut central_events = central_events;
                while let Some(event) = central_events.next().await {
                    handle_central_event(event, &adapter, &shared).await;
                }
                debug!("Central event stream ended");
            })
        };

        Ok((
            Self {
                adapter,
                shared,
                runtime: Handle::current(),
                central_pump,
            },
            events_rx,
        ))
    }

    fn peripheral(&self, handle: &PeripheralHandle) -> std::result::Result<Peripheral, AdapterError> {
        self.shared
            .peripherals
            .read()
            .get(&handle.identifier)
            .cloned()
            .ok_or_else(|| AdapterError::new(format!("unknown peripheral {}", handle.identifier)))
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(task);
    }
}

impl RadioAdapter for BtleplugAdapter {
    fn scan(&self, services: Option<Vec<Uuid>>) -> AdapterResult {
        self.shared.scanning.store(true, Ordering::SeqCst);

        let adapter = self.adapter.clone();
        let filter = CentralScanFilter {
            services: services.unwrap_or_default(),
        };
        self.spawn(async move {
            if let Err(e) = adapter.start_scan(filter).await {
                error!("Failed to start scan: {}", e);
            }
        });
        Ok(())
    }

    fn stop_scan(&self) -> AdapterResult {
        self.shared.scanning.store(false, Ordering::SeqCst);

        let adapter = self.adapter.clone();
        self.spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        });
        Ok(())
    }

    fn connect(&self, handle: &PeripheralHandle) -> AdapterResult {
        let peripheral = self.peripheral(handle)?;
        let shared = self.shared.clone();
        let handle = handle.clone();

        self.spawn(async move {
            match peripheral.connect().await {
                Ok(()) => {
                    let pump = spawn_notification_pump(peripheral, shared.clone(), &handle.identifier);
                    if let Some(previous) = shared
                        .connected
                        .lock()
                        .insert(handle.identifier.clone(), pump)
                    {
                        previous.abort();
                    }
                    shared.emit(AdapterEvent::PeripheralConnected(handle));
                }
                Err(e) => shared.emit(AdapterEvent::PeripheralConnectFailed {
                    peripheral: handle,
                    error: Some(AdapterError::from(e)),
                }),
            }
        });
        Ok(())
    }

    fn cancel_connection(&self, handle: &PeripheralHandle) -> AdapterResult {
        let peripheral = self.peripheral(handle)?;
        let shared = self.shared.clone();
        let identifier = handle.identifier.clone();

        self.spawn(async move {
            match peripheral.disconnect().await {
                Ok(()) => shared.mark_disconnected(&identifier, None),
                Err(e) => warn!("Failed to disconnect {}: {}", identifier, e),
            }
        });
        Ok(())
    }

    fn discover_services(&self, handle: &PeripheralHandle, filter: Option<Vec<Uuid>>) -> AdapterResult {
        let peripheral = self.peripheral(handle)?;
        let shared = self.shared.clone();
        let identifier = handle.identifier.clone();

        self.spawn(async move {
            let event = match peripheral.discover_services().await {
                Ok(()) => GattEvent::ServicesDiscovered {
                    services: peripheral
                        .services()
                        .iter()
                        .filter(|s| matches_filter(&filter, &s.uuid))
                        .map(Service::from)
                        .collect(),
                    error: None,
                },
                Err(e) => GattEvent::ServicesDiscovered {
                    services: Vec::new(),
                    error: Some(AdapterError::from(e)),
                },
            };
            shared.emit_gatt(&identifier, event);
        });
        Ok(())
    }

    fn discover_characteristics(
        &self,
        handle: &PeripheralHandle,
        service: Uuid,
        filter: Option<Vec<Uuid>>,
    ) -> AdapterResult {
        let peripheral = self.peripheral(handle)?;

        // btleplug resolves characteristics during service discovery.
        let event = match peripheral.services().iter().find(|s| s.uuid == service) {
            Some(found) => GattEvent::CharacteristicsDiscovered {
                service,
                characteristics: found
                    .characteristics
                    .iter()
                    .filter(|c| matches_filter(&filter, &c.uuid))
                    .map(Characteristic::from)
                    .collect(),
                error: None,
            },
            None => GattEvent::CharacteristicsDiscovered {
                service,
                characteristics: Vec::new(),
                error: Some(AdapterError::new(format!("service {} not discovered", service))),
            },
        };
        self.shared.emit_gatt(&handle.identifier, event);
        Ok(())
    }

    fn read_value(&self, handle: &PeripheralHandle, characteristic: &Characteristic) -> AdapterResult {
        let peripheral = self.peripheral(handle)?;
        let target = platform_characteristic(&peripheral, characteristic)?;
        let shared = self.shared.clone();
        let identifier = handle.identifier.clone();

        self.spawn(async move {
            let result = peripheral
                .read(&target)
                .await
                .map(Bytes::from)
                .map_err(AdapterError::from);
            shared.emit_gatt(
                &identifier,
                GattEvent::ValueUpdated {
                    characteristic: target.uuid,
                    result,
                },
            );
        });
        Ok(())
    }

    fn write_value(
        &self,
        handle: &PeripheralHandle,
        characteristic: &Characteristic,
        value: Bytes,
        mode: WriteMode,
    ) -> AdapterResult {
        let peripheral = self.peripheral(handle)?;
        let target = platform_characteristic(&peripheral, characteristic)?;
        let shared = self.shared.clone();
        let identifier = handle.identifier.clone();

        self.spawn(async move {
            let result = peripheral
                .write(&target, &value, mode.into())
                .await
                .map_err(AdapterError::from);

            match mode {
                WriteMode::WithResponse => shared.emit_gatt(
                    &identifier,
                    GattEvent::WriteConfirmed {
                        characteristic: target.uuid,
                        result,
                    },
                ),
                WriteMode::WithoutResponse => {
                    if let Err(e) = result {
                        warn!("Write without response to {} failed: {}", target.uuid, e);
                    }
                }
            }
        });
        Ok(())
    }

    fn set_notify_value(
        &self,
        handle: &PeripheralHandle,
        characteristic: &Characteristic,
        enabled: bool,
    ) -> AdapterResult {
        let peripheral = self.peripheral(handle)?;
        let target = platform_characteristic(&peripheral, characteristic)?;
        let shared = self.shared.clone();
        let identifier = handle.identifier.clone();

        self.spawn(async move {
            let result = if enabled {
                peripheral.subscribe(&target).await
            } else {
                peripheral.unsubscribe(&target).await
            };
            shared.emit_gatt(
                &identifier,
                GattEvent::NotifyStateChanged {
                    characteristic: target.uuid,
                    result: result.map(|()| enabled).map_err(AdapterError::from),
                },
            );
        });
        Ok(())
    }
}

impl Drop for BtleplugAdapter {
    fn drop(&mut self) {
        self.central_pump.abort();
        for (_, pump) in self.shared.connected.lock().drain() {
            pump.abort();
        }
    }
}

/// Translate a central event into adapter events.
async fn handle_central_event(event: CentralEvent, adapter: &Adapter, shared: &Arc<Shared>) {
    match event {
        CentralEvent::DeviceDiscovered(id)
        | CentralEvent::DeviceUpdated(id)
        | CentralEvent::ManufacturerDataAdvertisement { id, .. }
        | CentralEvent::ServiceDataAdvertisement { id, .. }
        | CentralEvent::ServicesAdvertisement { id, .. } => {
            if shared.scanning.load(Ordering::SeqCst) {
                process_peripheral(adapter, id, shared).await;
            }
        }
        CentralEvent::DeviceConnected(id) => {
            debug!("Device connected: {:?}", id);
        }
        CentralEvent::DeviceDisconnected(id) => {
            debug!("Device disconnected: {:?}", id);
            shared.mark_disconnected(&id.to_string(), None);
        }
        CentralEvent::StateUpdate(state) => {
            shared.emit(AdapterEvent::PowerStateChanged(adapter_state(state)));
        }
        #[allow(unreachable_patterns)]
        _ => {}
    }
}

/// Report a peripheral's current advertisement.
async fn process_peripheral(adapter: &Adapter, id: PeripheralId, shared: &Shared) {
    let peripheral = match adapter.peripheral(&id).await {
        Ok(p) => p,
        Err(e) => {
            trace!("Failed to get peripheral: {}", e);
            return;
        }
    };

    let properties = match peripheral.properties().await {
        Ok(Some(p)) => p,
        _ => return,
    };

    let identifier = id.to_string();
    let handle = PeripheralHandle {
        identifier: identifier.clone(),
        name: properties.local_name.clone(),
    };

    shared.peripherals.write().insert(identifier, peripheral);
    shared.emit(AdapterEvent::PeripheralDiscovered {
        peripheral: handle,
        advertisement: Advertisement::from(&properties),
        rssi: properties.rssi.unwrap_or(RSSI_UNAVAILABLE),
    });
}

/// Forward notifications of a connected peripheral as value updates.
fn spawn_notification_pump(peripheral: Peripheral, shared: Arc<Shared>, identifier: &str) -> JoinHandle<()> {
    let identifier = identifier.to_string();

    tokio::spawn(async move {
        let mut notifications = match peripheral.notifications().await {
            Ok(n) => n,
            Err(e) => {
                error!("Failed to get notifications stream for {}: {}", identifier, e);
                return;
            }
        };

        while let Some(notification) = notifications.next().await {
            trace!(
                "Notification from {} on {}: {} bytes",
                notification.uuid,
                identifier,
                notification.value.len()
            );
            shared.emit_gatt(
                &identifier,
                GattEvent::ValueUpdated {
                    characteristic: notification.uuid,
                    result: Ok(Bytes::from(notification.value)),
                },
            );
        }

        debug!("Notification stream for {} ended", identifier);
    })
}

fn platform_characteristic(
    peripheral: &Peripheral,
    characteristic: &Characteristic,
) -> std::result::Result<btleplug::api::Characteristic, AdapterError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == characteristic.uuid && c.service_uuid == characteristic.service_uuid)
        .ok_or_else(|| AdapterError::new(format!("characteristic {} not found", characteristic.uuid)))
}

fn matches_filter(filter: &Option<Vec<Uuid>>, uuid: &Uuid) -> bool {
    filter.as_ref().map_or(true, |wanted| wanted.contains(uuid))
}

fn adapter_state(state: CentralState) -> AdapterState {
    match state {
        CentralState::PoweredOn => AdapterState::PoweredOn,
        CentralState::PoweredOff => AdapterState::PoweredOff,
        _ => AdapterState::Unknown,
    }
}
