// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # ble-central
//!
//! An asynchronous Bluetooth Low Energy central-role connection manager.
//!
//! The crate discovers peripherals, filters advertisements, tracks which
//! devices are discovered, connecting or connected, and turns the
//! callback-driven radio interface into awaitable operations with timeouts.
//!
//! ## Features
//!
//! - **Discovery**: Scan with service restrictions and composable filters
//! - **Connections**: Awaitable connects shared by concurrent callers
//! - **Characteristic I/O**: Reads and writes with per-call timeouts
//! - **Notifications**: Per-characteristic value streams
//! - **Observable State**: `watch` channels for every registry view
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ble_central::{ConnectionManager, ManagerConfig, NameFilter, Result};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let manager = ConnectionManager::with_btleplug(ManagerConfig::default()).await?;
//!
//!     // Wait for the radio to report its state
//!     let mut powered_on = manager.watch_powered_on();
//!     let _ = powered_on.wait_for(|on| *on).await;
//!
//!     manager.start_scan(None, Some(Arc::new(NameFilter::new("sensor"))))?;
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!
//!     if let Some(device) = manager.nearest_device() {
//!         println!("Connecting to {} ({} dBm)", device.identifier(), device.rssi());
//!         manager.connect(&device).await?;
//!
//!         for service in device.services() {
//!             println!("  Service {}", service.uuid);
//!         }
//!     }
//!
//!     manager.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Custom adapters
//!
//! Any type implementing [`RadioAdapter`] can drive the manager. Feed its
//! events through [`ConnectionManager::handle_event`] or attach a channel
//! with [`ConnectionManager::spawn_event_loop`].
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod device;
pub mod error;
pub mod filter;
pub mod manager;
pub mod notification;

mod waiters;

// Re-exports for convenience
pub use config::ManagerConfig;
pub use device::{CallbackHandle, ConnectionState, Device, DeviceChange};
pub use error::{AdapterError, Error, Result};
pub use filter::{CompositeFilter, CompositeMode, NameFilter, ScanFilter, ServiceFilter};
pub use manager::{ConnectionManager, DeviceList};
pub use notification::NotificationStream;

// Re-export commonly used types from submodules
pub use ble::{
    AdapterEvent, AdapterState, Advertisement, Authorization, CharPropFlags, Characteristic,
    GattEvent, PeripheralHandle, RadioAdapter, Service, WriteMode, RSSI_UNAVAILABLE,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<ConnectionManager>();
        let _ = std::any::TypeId::of::<Device>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<NameFilter>();
        let _ = std::any::TypeId::of::<CompositeFilter>();
        let _ = std::any::TypeId::of::<NotificationStream>();
        let _ = std::any::TypeId::of::<AdapterEvent>();
    }
}
