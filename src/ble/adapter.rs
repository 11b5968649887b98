//! Radio adapter capability.
//!
//! The adapter is the boundary to the platform BLE stack. Requests are
//! issued through [`RadioAdapter`] and complete later as [`AdapterEvent`]s
//! delivered over a channel to the [`ConnectionManager`](crate::ConnectionManager).

use bytes::Bytes;
use uuid::Uuid;

use crate::ble::advertisement::Advertisement;
use crate::ble::gatt::{Characteristic, Service, WriteMode};
use crate::error::AdapterError;

/// Signal strength reported when the adapter has no RSSI reading.
pub const RSSI_UNAVAILABLE: i16 = 127;

/// Result of issuing a request to the adapter.
pub type AdapterResult = std::result::Result<(), AdapterError>;

/// Opaque handle to a peripheral, supplied by the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralHandle {
    /// Stable identity string used as the key for the peripheral.
    pub identifier: String,
    /// Name reported by the platform, if any.
    pub name: Option<String>,
}

impl PeripheralHandle {
    /// Create a handle for an identifier with no platform name.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            name: None,
        }
    }

    /// Create a handle with a platform-reported name.
    pub fn with_name(identifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            name: Some(name.into()),
        }
    }
}

/// Power state of the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AdapterState {
    /// State not yet reported.
    #[default]
    Unknown,
    /// The radio is resetting.
    Resetting,
    /// This platform has no BLE central support.
    Unsupported,
    /// The application is not allowed to use the radio.
    Unauthorized,
    /// The radio is off.
    PoweredOff,
    /// The radio is on and ready.
    PoweredOn,
}

impl AdapterState {
    /// Check if the radio is ready for scanning and connections.
    pub fn is_powered_on(&self) -> bool {
        matches!(self, Self::PoweredOn)
    }
}

/// Bluetooth authorization granted to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Authorization {
    /// The user has not been asked yet.
    #[default]
    NotDetermined,
    /// Use is restricted by policy.
    Restricted,
    /// The user denied access.
    Denied,
    /// Access granted.
    Allowed,
}

impl Authorization {
    /// Check if this authorization prevents Bluetooth use.
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied | Self::Restricted)
    }
}

/// Per-peripheral GATT completion events.
#[derive(Debug, Clone, PartialEq)]
pub enum GattEvent {
    /// Service discovery finished.
    ServicesDiscovered {
        /// Discovered services, in adapter order.
        services: Vec<Service>,
        /// Failure reported by the adapter.
        error: Option<AdapterError>,
    },
    /// Characteristic discovery for one service finished.
    CharacteristicsDiscovered {
        /// The service the characteristics belong to.
        service: Uuid,
        /// Discovered characteristics.
        characteristics: Vec<Characteristic>,
        /// Failure reported by the adapter.
        error: Option<AdapterError>,
    },
    /// A characteristic value arrived, either from a read or a notification.
    ValueUpdated {
        /// The characteristic whose value changed.
        characteristic: Uuid,
        /// The new value, or the adapter failure.
        result: std::result::Result<Bytes, AdapterError>,
    },
    /// The peripheral acknowledged a write.
    WriteConfirmed {
        /// The written characteristic.
        characteristic: Uuid,
        /// Confirmation outcome.
        result: std::result::Result<(), AdapterError>,
    },
    /// Notification delivery was enabled or disabled.
    NotifyStateChanged {
        /// The characteristic whose notify state changed.
        characteristic: Uuid,
        /// New notify state, or the adapter failure.
        result: std::result::Result<bool, AdapterError>,
    },
}

/// Events produced by the radio adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    /// The radio power state changed.
    PowerStateChanged(AdapterState),
    /// The application's Bluetooth authorization changed.
    AuthorizationChanged(Authorization),
    /// A peripheral advertisement was received.
    PeripheralDiscovered {
        /// The advertising peripheral.
        peripheral: PeripheralHandle,
        /// Parsed advertisement payload.
        advertisement: Advertisement,
        /// Signal strength in dBm.
        rssi: i16,
    },
    /// A connection was established.
    PeripheralConnected(PeripheralHandle),
    /// A connection attempt failed.
    PeripheralConnectFailed {
        /// The peripheral that could not be connected.
        peripheral: PeripheralHandle,
        /// Failure reported by the adapter.
        error: Option<AdapterError>,
    },
    /// A connection ended.
    PeripheralDisconnected {
        /// The peripheral that disconnected.
        peripheral: PeripheralHandle,
        /// Failure reported by the adapter, if the link was lost.
        error: Option<AdapterError>,
    },
    /// A GATT event for a connected peripheral.
    Gatt {
        /// Identifier of the peripheral.
        identifier: String,
        /// The event.
        event: GattEvent,
    },
}

/// Platform BLE radio driver, as consumed by this crate.
///
/// Every operation only issues a request. Completion is reported later via
/// [`AdapterEvent`]s, so implementations must never block on the radio.
#[cfg_attr(test, mockall::automock)]
pub trait RadioAdapter: Send + Sync {
    /// Start scanning, optionally restricted to peripherals advertising `services`.
    fn scan(&self, services: Option<Vec<Uuid>>) -> AdapterResult;

    /// Stop scanning.
    fn stop_scan(&self) -> AdapterResult;

    /// Start connecting to a peripheral.
    fn connect(&self, peripheral: &PeripheralHandle) -> AdapterResult;

    /// Cancel a pending connection or disconnect an established one.
    fn cancel_connection(&self, peripheral: &PeripheralHandle) -> AdapterResult;

    /// Discover services, optionally only those in `filter`.
    fn discover_services(
        &self,
        peripheral: &PeripheralHandle,
        filter: Option<Vec<Uuid>>,
    ) -> AdapterResult;

    /// Discover the characteristics of one service.
    fn discover_characteristics(
        &self,
        peripheral: &PeripheralHandle,
        service: Uuid,
        filter: Option<Vec<Uuid>>,
    ) -> AdapterResult;

    /// Read a characteristic value.
    fn read_value(
        &self,
        peripheral: &PeripheralHandle,
        characteristic: &Characteristic,
    ) -> AdapterResult;

    /// Write a characteristic value.
    fn write_value(
        &self,
        peripheral: &PeripheralHandle,
        characteristic: &Characteristic,
        value: Bytes,
        mode: WriteMode,
    ) -> AdapterResult;

    /// Enable or disable notifications for a characteristic.
    fn set_notify_value(
        &self,
        peripheral: &PeripheralHandle,
        characteristic: &Characteristic,
        enabled: bool,
    ) -> AdapterResult;
}
