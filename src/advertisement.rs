//! A single BLE advertisement as seen through the platform Bluetooth service.

use std::fmt;

/// One advertisement observed for a tracked device.
///
/// Built by the listener from the device's property snapshot every time its
/// manufacturer data changes. Properties the platform did not report are left
/// at their zero value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisementRecord {
    /// MAC address in canonical `XX:XX:XX:XX:XX:XX` form
    pub mac: String,
    /// Advertised device name, empty if the device has none
    pub device_name: String,
    /// Bluetooth SIG company identifier of the manufacturer data
    pub manufacturer_id: u16,
    /// Vendor-specific payload, without the company identifier
    pub manufacturer_data: Vec<u8>,
    /// Received signal strength in dBm
    pub signal_strength: i16,
}

impl fmt::Display for AdvertisementRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BLE packet MAC: {}", self.mac)?;
        if self.device_name.is_empty() {
            writeln!(f, "Device name: {{unnamed}}")?;
        } else {
            writeln!(f, "Device name: {}", self.device_name)?;
        }
        writeln!(f, "Signal strength: {}", self.signal_strength)?;
        writeln!(f, "Manufacturer id: {:#06x}", self.manufacturer_id)?;
        write!(f, "Manufacturer data:")?;
        for byte in &self.manufacturer_data {
            write!(f, " {byte:02x}")?;
        }
        writeln!(f)
    }
}
