//! Advertisement payloads.

use std::collections::HashMap;
use uuid::Uuid;

/// Advertisement payload received from a peripheral before connection.
///
/// Each discovery event carries a complete payload; a device replaces its
/// stored advertisement wholesale rather than merging fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Advertisement {
    /// Advertised local name.
    pub local_name: Option<String>,
    /// Advertised service UUIDs.
    pub service_uuids: Vec<Uuid>,
    /// Manufacturer-specific data keyed by company identifier.
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    /// Service data keyed by service UUID.
    pub service_data: HashMap<Uuid, Vec<u8>>,
    /// Advertised transmit power in dBm.
    pub tx_power_level: Option<i16>,
}

impl Advertisement {
    /// Create an advertisement carrying only a local name.
    pub fn with_local_name(name: impl Into<String>) -> Self {
        Self {
            local_name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Add an advertised service UUID.
    pub fn with_service(mut self, uuid: Uuid) -> Self {
        self.service_uuids.push(uuid);
        self
    }

    /// Check if the advertisement lists a service.
    pub fn advertises_service(&self, uuid: &Uuid) -> bool {
        self.service_uuids.contains(uuid)
    }

    /// Manufacturer data for a company identifier.
    pub fn manufacturer_data(&self, company_id: u16) -> Option<&[u8]> {
        self.manufacturer_data.get(&company_id).map(Vec::as_slice)
    }

    /// Check if the payload carries no fields at all.
    pub fn is_empty(&self) -> bool {
        self.local_name.is_none()
            && self.service_uuids.is_empty()
            && self.manufacturer_data.is_empty()
            && self.service_data.is_empty()
            && self.tx_power_level.is_none()
    }
}

impl From<&btleplug::api::PeripheralProperties> for Advertisement {
    fn from(properties: &btleplug::api::PeripheralProperties) -> Self {
        Self {
            local_name: properties.local_name.clone(),
            service_uuids: properties.services.clone(),
            manufacturer_data: properties.manufacturer_data.clone(),
            service_data: properties.service_data.clone(),
            tx_power_level: properties.tx_power_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::{uuid_from_u16, BATTERY_SERVICE_UUID};

    #[test]
    fn test_default_is_empty() {
        assert!(Advertisement::default().is_empty());
        assert!(!Advertisement::with_local_name("Sensor").is_empty());
    }

    #[test]
    fn test_advertises_service() {
        let adv = Advertisement::default().with_service(BATTERY_SERVICE_UUID);
        assert!(adv.advertises_service(&BATTERY_SERVICE_UUID));
        assert!(!adv.advertises_service(&uuid_from_u16(0x1809)));
    }

    #[test]
    fn test_manufacturer_data_lookup() {
        let mut adv = Advertisement::default();
        adv.manufacturer_data.insert(0x004C, vec![0x02, 0x15]);

        assert_eq!(adv.manufacturer_data(0x004C), Some(&[0x02, 0x15][..]));
        assert_eq!(adv.manufacturer_data(0x0059), None);
    }
}
