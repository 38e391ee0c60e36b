//! InfluxDB line protocol output formatter.

use crate::measurement::{
    INVALID_MOVEMENT_COUNTER, INVALID_PRESSURE, INVALID_TX_POWER, Measurement, Measurement3,
    Measurement5,
};
use crate::output::OutputFormatter;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Field values for InfluxDB line protocol
#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    String(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Integer(num) => write!(f, "{num}i"),
            FieldValue::String(s) => {
                write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
            }
        }
    }
}

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<String, String>,
    pub field_set: BTreeMap<String, FieldValue>,
    pub timestamp: Option<SystemTime>,
}

fn fmt_tags(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in data_point.tag_set.iter() {
        write!(fmt, ",{}={}", key, escape_tag(value))?;
    }
    Ok(())
}

/// Commas, spaces and equals signs must be escaped in tag values.
fn escape_tag(value: &str) -> String {
    value
        .replace(',', "\\,")
        .replace(' ', "\\ ")
        .replace('=', "\\=")
}

fn fmt_fields(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (i, (key, value)) in data_point.field_set.iter().enumerate() {
        if i > 0 {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}={}", key, value)?;
    }
    Ok(())
}

fn fmt_timestamp(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    if let Some(since_epoch) = data_point
        .timestamp
        .and_then(|time| time.duration_since(SystemTime::UNIX_EPOCH).ok())
    {
        write!(fmt, " {}", since_epoch.as_nanos())?;
    }
    Ok(())
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.measurement)?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)?;
        fmt_timestamp(self, fmt)
    }
}

/// InfluxDB line protocol formatter.
///
/// Tags carry the MAC address and the data format. Fields holding an invalid
/// marker are left out, and an `errors` field counts whether the decoder
/// flagged the measurement.
pub struct InfluxDbFormatter {
    /// The measurement name in InfluxDB
    measurement_name: String,
}

impl InfluxDbFormatter {
    /// Convert humidity from percent (0-100) to fraction (0-1).
    #[inline]
    fn humidity_fraction(percent: f64) -> f64 {
        percent / 100.0
    }

    /// Convert pressure from Pascals to kilopascals.
    #[inline]
    fn pressure_kpa(pascals: u32) -> f64 {
        f64::from(pascals) / 1000.0
    }

    pub fn new(measurement_name: String) -> Self {
        Self { measurement_name }
    }

    fn tag_set(&self, measurement: &Measurement) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        // A format 5 payload whose MAC disagreed with the advertiser has none.
        if !measurement.mac().is_empty() {
            tags.insert("mac".to_string(), measurement.mac().to_string());
        }
        tags.insert(
            "data_format".to_string(),
            measurement.data_format().to_string(),
        );
        tags
    }

    fn field_set(&self, measurement: &Measurement) -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();

        macro_rules! add {
            ($name:literal, $val:expr) => {
                if let Some(v) = $val {
                    fields.insert($name.into(), v);
                }
            };
        }

        let float = |v: f64| (!v.is_nan()).then_some(FieldValue::Float(v));

        let (common, signal_strength, contains_errors) = match measurement {
            Measurement::Format5(m) => {
                add!(
                    "tx_power",
                    (m.tx_power != INVALID_TX_POWER).then(|| FieldValue::Integer(m.tx_power.into()))
                );
                add!(
                    "movement_counter",
                    (m.movement_counter != INVALID_MOVEMENT_COUNTER)
                        .then(|| FieldValue::Integer(m.movement_counter.into()))
                );
                add!(
                    "measurement_sequence_number",
                    Some(FieldValue::Integer(m.measurement_sequence.into()))
                );
                (Common::from(m), m.signal_strength, m.contains_errors)
            }
            Measurement::Format3(m) => (Common::from(m), m.signal_strength, m.contains_errors),
        };

        add!("temperature", float(common.temperature));
        add!("humidity", float(Self::humidity_fraction(common.humidity)));
        add!(
            "pressure",
            (common.pressure != INVALID_PRESSURE)
                .then(|| FieldValue::Float(Self::pressure_kpa(common.pressure)))
        );
        add!("battery_potential", float(common.battery_voltage));
        add!("acceleration_x", float(common.acceleration[0]));
        add!("acceleration_y", float(common.acceleration[1]));
        add!("acceleration_z", float(common.acceleration[2]));
        add!("acceleration_total", float(common.acceleration_total));
        add!("rssi", Some(FieldValue::Integer(signal_strength.into())));
        add!("errors", Some(FieldValue::Integer(i64::from(contains_errors))));

        fields
    }

    fn to_data_point(&self, measurement: &Measurement, timestamp: Option<SystemTime>) -> DataPoint {
        DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set: self.tag_set(measurement),
            field_set: self.field_set(measurement),
            timestamp,
        }
    }
}

/// Fields both formats carry.
struct Common {
    temperature: f64,
    humidity: f64,
    pressure: u32,
    acceleration: [f64; 3],
    acceleration_total: f64,
    battery_voltage: f64,
}

impl From<&Measurement5> for Common {
    fn from(m: &Measurement5) -> Self {
        Self {
            temperature: m.temperature,
            humidity: m.humidity,
            pressure: m.pressure,
            acceleration: m.acceleration,
            acceleration_total: m.acceleration_total(),
            battery_voltage: m.battery_voltage,
        }
    }
}

impl From<&Measurement3> for Common {
    fn from(m: &Measurement3) -> Self {
        Self {
            temperature: m.temperature,
            humidity: m.humidity,
            pressure: m.pressure,
            acceleration: m.acceleration,
            acceleration_total: m.acceleration_total(),
            battery_voltage: m.battery_voltage,
        }
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(&self, measurement: &Measurement, timestamp: Option<SystemTime>) -> String {
        format!("{}", self.to_data_point(measurement, timestamp))
    }
}
