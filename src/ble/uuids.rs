//! Bluetooth SIG UUID helpers.
//!
//! Contains the base UUID expansion for 16-bit assigned numbers and a few
//! generic service and characteristic UUIDs.

use uuid::Uuid;

/// The Bluetooth Base UUID (`00000000-0000-1000-8000-00805f9b34fb`).
pub const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit SIG-assigned number to a full 128-bit UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Recover the 16-bit assigned number from a UUID built on the base UUID.
pub fn uuid_to_u16(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    let short = (value >> 96) as u32;
    if value & !(0xFFFF_FFFF << 96) == BLUETOOTH_BASE_UUID && short <= u16::MAX as u32 {
        Some(short as u16)
    } else {
        None
    }
}

/// Generic Access service UUID.
pub const GENERIC_ACCESS_SERVICE_UUID: Uuid = uuid_from_u16(0x1800);
/// Device Name characteristic UUID.
pub const DEVICE_NAME_UUID: Uuid = uuid_from_u16(0x2A00);

/// Standard BLE Device Information Service UUID.
pub const DEVICE_INFO_SERVICE_UUID: Uuid = uuid_from_u16(0x180A);
/// Manufacturer Name characteristic UUID.
pub const MANUFACTURER_NAME_UUID: Uuid = uuid_from_u16(0x2A29);
/// Model Number characteristic UUID.
pub const MODEL_NUMBER_UUID: Uuid = uuid_from_u16(0x2A24);
/// Firmware Revision characteristic UUID.
pub const FIRMWARE_REVISION_UUID: Uuid = uuid_from_u16(0x2A26);

/// Battery service UUID.
pub const BATTERY_SERVICE_UUID: Uuid = uuid_from_u16(0x180F);
/// Battery Level characteristic UUID.
pub const BATTERY_LEVEL_UUID: Uuid = uuid_from_u16(0x2A19);
