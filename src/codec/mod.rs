//! RuuviTag manufacturer-data decoding.
//!
//! Decoders are pure functions over an [`AdvertisementRecord`]. Each one runs
//! in one of two modes:
//!
//! - lenient (`strict == false`): every field is decoded, fields failing
//!   validation get their invalid marker, and the failures are collected in
//!   `error_msg` with `contains_errors` set.
//! - strict (`strict == true`): the first failing field aborts decoding and
//!   its [`DecodeError`] is returned.
//!
//! A payload shorter than its format requires is rejected in both modes.
//!
//! See: https://github.com/ruuvi/ruuvi-sensor-protocols

mod format3;
mod format5;

pub use format3::{FORMAT3_PAYLOAD_LEN, decode_format_3};
pub use format5::{FORMAT5_PAYLOAD_LEN, decode_format_5};

use crate::advertisement::AdvertisementRecord;
use crate::measurement::Measurement;
use std::fmt;
use thiserror::Error;

/// Ruuvi Innovations Ltd. Bluetooth SIG company identifier.
pub const RUUVI_MANUFACTURER_ID: u16 = 0x0499;

/// Data format announced by the first byte of the manufacturer data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataFormat {
    /// RAWv1
    Format3,
    /// Eddystone URL
    Format4,
    /// RAWv2
    Format5,
    /// Encrypted environmental
    Format8,
    /// Ruuvi manufacturer id with an unrecognised format byte
    Unknown,
    /// Manufacturer id is not Ruuvi's
    NotRuuviTag,
}

impl DataFormat {
    /// The format number, if the format was recognised.
    pub fn number(self) -> Option<u8> {
        match self {
            DataFormat::Format3 => Some(3),
            DataFormat::Format4 => Some(4),
            DataFormat::Format5 => Some(5),
            DataFormat::Format8 => Some(8),
            DataFormat::Unknown | DataFormat::NotRuuviTag => None,
        }
    }
}

/// A measurement field subject to validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Temperature,
    Humidity,
    Pressure,
    AccelerationX,
    AccelerationY,
    AccelerationZ,
    BatteryVoltage,
    TxPower,
    MovementCounter,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Temperature => "Temperature",
            Field::Humidity => "Humidity",
            Field::Pressure => "Pressure",
            Field::AccelerationX => "X-acceleration",
            Field::AccelerationY => "Y-acceleration",
            Field::AccelerationZ => "Z-acceleration",
            Field::BatteryVoltage => "Battery voltage",
            Field::TxPower => "Tx power",
            Field::MovementCounter => "Movement counter",
        };
        f.write_str(name)
    }
}

/// Errors produced while decoding RuuviTag payloads.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Not a RuuviTag advertisement (manufacturer id {0:#06x})")]
    NotRuuviTag(u16),
    #[error("Unsupported data format {0}")]
    UnsupportedFormat(u8),
    #[error("Data format {format} payload truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        format: u8,
        expected: usize,
        actual: usize,
    },
    #[error("Expected data size {expected}, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("Expected data format {expected}, got {actual}")]
    WrongFormat { expected: u8, actual: u8 },
    #[error("{field} raw value {raw:#x} invalid")]
    Sentinel { field: Field, raw: u16 },
    #[error("Humidity {0} above 40000 (100%) invalid")]
    HumidityOutOfRange(u16),
    #[error("Receiver and packet MAC addresses differ ({advertised} != {payload})")]
    MacMismatch { advertised: String, payload: String },
}

/// Identify which Ruuvi data format an advertisement carries.
pub fn identify_format(record: &AdvertisementRecord) -> DataFormat {
    if record.manufacturer_id != RUUVI_MANUFACTURER_ID {
        return DataFormat::NotRuuviTag;
    }

    match record.manufacturer_data.first() {
        Some(3) => DataFormat::Format3,
        Some(4) => DataFormat::Format4,
        Some(5) => DataFormat::Format5,
        Some(8) => DataFormat::Format8,
        _ => DataFormat::Unknown,
    }
}

/// Decode an advertisement with whichever decoder its format calls for.
pub fn decode(record: &AdvertisementRecord, strict: bool) -> Result<Measurement, DecodeError> {
    match identify_format(record) {
        DataFormat::Format5 => decode_format_5(record, strict).map(Measurement::Format5),
        DataFormat::Format3 => decode_format_3(record, strict).map(Measurement::Format3),
        DataFormat::NotRuuviTag => Err(DecodeError::NotRuuviTag(record.manufacturer_id)),
        DataFormat::Format4 | DataFormat::Format8 | DataFormat::Unknown => Err(
            DecodeError::UnsupportedFormat(record.manufacturer_data.first().copied().unwrap_or(0)),
        ),
    }
}

/// Field validation shared by every decoder.
///
/// In strict mode the first reported error is handed back to the caller; in
/// lenient mode it is recorded and decoding carries on.
#[derive(Debug)]
pub(crate) struct Validator {
    strict: bool,
    errors: Vec<String>,
}

impl Validator {
    pub(crate) fn new(strict: bool) -> Self {
        Self {
            strict,
            errors: Vec::new(),
        }
    }

    pub(crate) fn report(&mut self, error: DecodeError) -> Result<(), DecodeError> {
        if self.strict {
            return Err(error);
        }
        self.errors.push(error.to_string());
        Ok(())
    }

    /// Unwrap a decoded field, substituting `invalid` for a failed one.
    pub(crate) fn field<T>(
        &mut self,
        value: Result<T, DecodeError>,
        invalid: T,
    ) -> Result<T, DecodeError> {
        match value {
            Ok(value) => Ok(value),
            Err(error) => {
                self.report(error)?;
                Ok(invalid)
            }
        }
    }

    /// Returns `(contains_errors, error_msg)`.
    pub(crate) fn finish(self) -> (bool, String) {
        (!self.errors.is_empty(), self.errors.join(" - "))
    }
}

/// Reject payloads too short to hold every field of `format`.
pub(crate) fn ensure_len(data: &[u8], format: u8, expected: usize) -> Result<(), DecodeError> {
    if data.len() < expected {
        return Err(DecodeError::Truncated {
            format,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

pub(crate) fn be_u16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

pub(crate) fn be_i16(data: &[u8], at: usize) -> i16 {
    i16::from_be_bytes([data[at], data[at + 1]])
}
