//! Turns device property snapshots into [`AdvertisementRecord`]s.

use super::transport::{DeviceProperties, PROPERTY_MANUFACTURER_DATA};
use crate::advertisement::AdvertisementRecord;
use crate::codec::RUUVI_MANUFACTURER_ID;
use crate::mac_address::canonicalize;

/// Only a manufacturer data change produces a new packet. RSSI-only updates
/// are ignored.
pub fn should_emit<S: AsRef<str>>(changed: &[S]) -> bool {
    changed
        .iter()
        .any(|name| name.as_ref() == PROPERTY_MANUFACTURER_DATA)
}

/// Build a record from whatever properties the device exposed.
///
/// Missing properties leave the field at its zero value. When a device
/// carries several manufacturer data entries the Ruuvi one wins, otherwise
/// the lowest company id is used.
pub fn assemble(properties: DeviceProperties) -> AdvertisementRecord {
    let DeviceProperties {
        address,
        name,
        rssi,
        mut manufacturer_data,
    } = properties;

    let (manufacturer_id, manufacturer_data) = match manufacturer_data
        .remove_entry(&RUUVI_MANUFACTURER_ID)
    {
        Some(entry) => entry,
        None => manufacturer_data.pop_first().unwrap_or_default(),
    };

    AdvertisementRecord {
        mac: address.map(|mac| canonicalize(&mac)).unwrap_or_default(),
        device_name: name.unwrap_or_default(),
        manufacturer_id,
        manufacturer_data,
        signal_strength: rssi.unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_should_emit_only_on_manufacturer_data() {
        assert!(should_emit(&["ManufacturerData"]));
        assert!(should_emit(&["RSSI", "ManufacturerData"]));
        assert!(!should_emit(&["RSSI"]));
        assert!(!should_emit(&["Name", "Alias"]));
        assert!(!should_emit::<&str>(&[]));
    }

    #[test]
    fn test_assemble_full_snapshot() {
        let properties = DeviceProperties {
            address: Some("cb:b8:33:4c:88:4f".to_string()),
            name: Some("Ruuvi 884F".to_string()),
            rssi: Some(-71),
            manufacturer_data: BTreeMap::from([(0x0499, vec![0x05, 0x12, 0xFC])]),
        };

        let record = assemble(properties);
        assert_eq!(record.mac, "CB:B8:33:4C:88:4F");
        assert_eq!(record.device_name, "Ruuvi 884F");
        assert_eq!(record.manufacturer_id, 0x0499);
        assert_eq!(record.manufacturer_data, vec![0x05, 0x12, 0xFC]);
        assert_eq!(record.signal_strength, -71);
    }

    #[test]
    fn test_assemble_missing_properties_default_to_zero() {
        let record = assemble(DeviceProperties::default());
        assert_eq!(record, AdvertisementRecord::default());
    }

    #[test]
    fn test_assemble_prefers_ruuvi_entry() {
        let properties = DeviceProperties {
            address: Some("CB:B8:33:4C:88:4F".to_string()),
            manufacturer_data: BTreeMap::from([
                (0x004C, vec![0x02, 0x15]),
                (0x0499, vec![0x03, 0x29]),
            ]),
            ..Default::default()
        };

        let record = assemble(properties);
        assert_eq!(record.manufacturer_id, 0x0499);
        assert_eq!(record.manufacturer_data, vec![0x03, 0x29]);
    }

    #[test]
    fn test_assemble_other_manufacturer() {
        let properties = DeviceProperties {
            manufacturer_data: BTreeMap::from([(0x0075, vec![0x42]), (0x004C, vec![0x10])]),
            ..Default::default()
        };

        let record = assemble(properties);
        assert_eq!(record.manufacturer_id, 0x004C);
        assert_eq!(record.manufacturer_data, vec![0x10]);
    }
}
