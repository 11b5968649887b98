//! GATT service and characteristic descriptions.

use uuid::Uuid;

pub use btleplug::api::CharPropFlags;

/// A service discovered on a connected peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Service {
    /// Service UUID.
    pub uuid: Uuid,
    /// Whether this is a primary service.
    pub primary: bool,
}

impl Service {
    /// Create a primary service description.
    pub fn primary(uuid: Uuid) -> Self {
        Self {
            uuid,
            primary: true,
        }
    }
}

impl From<&btleplug::api::Service> for Service {
    fn from(service: &btleplug::api::Service) -> Self {
        Self {
            uuid: service.uuid,
            primary: service.primary,
        }
    }
}

/// A characteristic discovered within a service.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Characteristic {
    /// Characteristic UUID. Values and waiters are keyed by this.
    pub uuid: Uuid,
    /// UUID of the owning service.
    pub service_uuid: Uuid,
    /// Supported operations.
    pub properties: CharPropFlags,
}

impl Characteristic {
    /// Create a characteristic description.
    pub fn new(uuid: Uuid, service_uuid: Uuid, properties: CharPropFlags) -> Self {
        Self {
            uuid,
            service_uuid,
            properties,
        }
    }

    /// Check if the characteristic supports reads.
    pub fn can_read(&self) -> bool {
        self.properties.contains(CharPropFlags::READ)
    }

    /// Check if the characteristic supports acknowledged writes.
    pub fn can_write(&self) -> bool {
        self.properties.contains(CharPropFlags::WRITE)
    }

    /// Check if the characteristic supports notifications or indications.
    pub fn can_notify(&self) -> bool {
        self.properties
            .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
    }
}

impl From<&btleplug::api::Characteristic> for Characteristic {
    fn from(characteristic: &btleplug::api::Characteristic) -> Self {
        Self {
            uuid: characteristic.uuid,
            service_uuid: characteristic.service_uuid,
            properties: characteristic.properties,
        }
    }
}

/// Delivery mode for characteristic writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WriteMode {
    /// The peripheral acknowledges the write.
    #[default]
    WithResponse,
    /// Fire-and-forget write with no acknowledgement.
    WithoutResponse,
}

impl From<WriteMode> for btleplug::api::WriteType {
    fn from(mode: WriteMode) -> Self {
        match mode {
            WriteMode::WithResponse => Self::WithResponse,
            WriteMode::WithoutResponse => Self::WithoutResponse,
        }
    }
}
