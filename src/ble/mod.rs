//! BLE building blocks.
//!
//! This module defines the radio adapter boundary, the advertisement and
//! GATT data types exchanged across it, and the btleplug backend.

pub mod adapter;
pub mod advertisement;
pub mod gatt;
pub mod platform;
pub mod uuids;

pub use adapter::{
    AdapterEvent, AdapterResult, AdapterState, Authorization, GattEvent, PeripheralHandle,
    RadioAdapter, RSSI_UNAVAILABLE,
};
pub use advertisement::Advertisement;
pub use gatt::{CharPropFlags, Characteristic, Service, WriteMode};
pub use platform::BtleplugAdapter;
pub use uuids::*;
