//! Decoded RuuviTag measurements.
//!
//! All values are in the units the tag reports:
//! - Temperature in Celsius
//! - Humidity in percent (0-100)
//! - Pressure in Pascals
//! - Acceleration in g (standard gravity)
//! - Battery voltage in Volts
//! - TX power in dBm
//!
//! Fields that failed validation hold an invalid marker instead of a value:
//! NaN for floats, the type's maximum for unsigned integers and
//! [`INVALID_TX_POWER`] for the transmit power.

use std::fmt;

/// Marker for an invalid pressure reading.
pub const INVALID_PRESSURE: u32 = u32::MAX;
/// Marker for an invalid transmit power reading.
pub const INVALID_TX_POWER: i8 = i8::MIN;
/// Marker for an invalid movement counter.
pub const INVALID_MOVEMENT_COUNTER: u8 = u8::MAX;

/// Measurement decoded from data format 5 (RAWv2).
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement5 {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: u32,
    /// Acceleration along the x, y and z axes
    pub acceleration: [f64; 3],
    pub battery_voltage: f64,
    pub tx_power: i8,
    pub movement_counter: u8,
    pub measurement_sequence: u16,
    /// MAC address from the payload; empty if it disagreed with the advertiser
    pub mac: String,
    /// RSSI of the advertisement the measurement came from
    pub signal_strength: i16,
    pub contains_errors: bool,
    /// Field errors joined with `" - "`, empty when `contains_errors` is false
    pub error_msg: String,
}

/// Measurement decoded from data format 3 (RAWv1).
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement3 {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: u32,
    pub acceleration: [f64; 3],
    pub battery_voltage: f64,
    /// Advertiser MAC address; format 3 does not embed one
    pub mac: String,
    pub signal_strength: i16,
    pub contains_errors: bool,
    pub error_msg: String,
}

/// Either kind of decoded measurement.
#[derive(Debug, Clone, PartialEq)]
pub enum Measurement {
    Format5(Measurement5),
    Format3(Measurement3),
}

fn magnitude([x, y, z]: [f64; 3]) -> f64 {
    x.hypot(y).hypot(z)
}

impl Measurement5 {
    /// Length of the acceleration vector, NaN if any axis is invalid.
    pub fn acceleration_total(&self) -> f64 {
        magnitude(self.acceleration)
    }
}

impl Measurement3 {
    /// Length of the acceleration vector.
    pub fn acceleration_total(&self) -> f64 {
        magnitude(self.acceleration)
    }
}

impl Measurement {
    pub fn data_format(&self) -> u8 {
        match self {
            Measurement::Format5(_) => 5,
            Measurement::Format3(_) => 3,
        }
    }

    pub fn mac(&self) -> &str {
        match self {
            Measurement::Format5(m) => &m.mac,
            Measurement::Format3(m) => &m.mac,
        }
    }

    pub fn contains_errors(&self) -> bool {
        match self {
            Measurement::Format5(m) => m.contains_errors,
            Measurement::Format3(m) => m.contains_errors,
        }
    }

    pub fn error_msg(&self) -> &str {
        match self {
            Measurement::Format5(m) => &m.error_msg,
            Measurement::Format3(m) => &m.error_msg,
        }
    }
}

impl fmt::Display for Measurement5 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Data from MAC {}", self.mac)?;
        writeln!(f, "Ruuvi data format: 5")?;
        writeln!(f, "Temperature: {}", self.temperature)?;
        writeln!(f, "Pressure: {}", self.pressure)?;
        writeln!(f, "Humidity: {}", self.humidity)?;
        writeln!(f, "Acceleration-x: {}", self.acceleration[0])?;
        writeln!(f, "Acceleration-y: {}", self.acceleration[1])?;
        writeln!(f, "Acceleration-z: {}", self.acceleration[2])?;
        writeln!(f, "Battery voltage: {}", self.battery_voltage)?;
        writeln!(f, "Tx power: {}", self.tx_power)?;
        writeln!(f, "Movement counter: {}", self.movement_counter)?;
        writeln!(f, "Measurement sequence: {}", self.measurement_sequence)?;
        writeln!(f, "Rssi signal strength: {}", self.signal_strength)?;
        if self.contains_errors {
            writeln!(f, "Errors: {}", self.error_msg)?;
        }
        Ok(())
    }
}

impl fmt::Display for Measurement3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Data from MAC {}", self.mac)?;
        writeln!(f, "Ruuvi data format: 3")?;
        writeln!(f, "Temperature: {}", self.temperature)?;
        writeln!(f, "Pressure: {}", self.pressure)?;
        writeln!(f, "Humidity: {}", self.humidity)?;
        writeln!(f, "Acceleration-x: {}", self.acceleration[0])?;
        writeln!(f, "Acceleration-y: {}", self.acceleration[1])?;
        writeln!(f, "Acceleration-z: {}", self.acceleration[2])?;
        writeln!(f, "Battery voltage: {}", self.battery_voltage)?;
        writeln!(f, "Rssi signal strength: {}", self.signal_strength)?;
        if self.contains_errors {
            writeln!(f, "Errors: {}", self.error_msg)?;
        }
        Ok(())
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Measurement::Format5(m) => m.fmt(f),
            Measurement::Format3(m) => m.fmt(f),
        }
    }
}
