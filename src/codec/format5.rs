//! Data format 5 (RAWv2), 24 bytes, all fields big-endian.
//!
//! | offset | field                                    |
//! |--------|------------------------------------------|
//! | 0      | format tag, `0x05`                       |
//! | 1-2    | temperature, i16 in 0.005 °C             |
//! | 3-4    | humidity, u16 in 0.0025 %                |
//! | 5-6    | pressure, u16 in Pa with 50000 Pa offset |
//! | 7-12   | acceleration x/y/z, i16 in mg            |
//! | 13-14  | battery (11 bits) and tx power (5 bits)  |
//! | 15     | movement counter                         |
//! | 16-17  | measurement sequence                     |
//! | 18-23  | MAC address                              |

use super::{DecodeError, Field, Validator, be_i16, be_u16, ensure_len};
use crate::advertisement::AdvertisementRecord;
use crate::mac_address::{MacAddress, canonicalize};
use crate::measurement::{
    INVALID_MOVEMENT_COUNTER, INVALID_PRESSURE, INVALID_TX_POWER, Measurement5,
};

pub const FORMAT5_PAYLOAD_LEN: usize = 24;
const FORMAT_TAG: u8 = 5;

fn temperature(raw: i16) -> Result<f64, DecodeError> {
    if raw == i16::MIN {
        return Err(DecodeError::Sentinel {
            field: Field::Temperature,
            raw: 0x8000,
        });
    }
    Ok(f64::from(raw) * 0.005)
}

fn humidity(raw: u16) -> Result<f64, DecodeError> {
    match raw {
        u16::MAX => Err(DecodeError::Sentinel {
            field: Field::Humidity,
            raw,
        }),
        40_001.. => Err(DecodeError::HumidityOutOfRange(raw)),
        _ => Ok(f64::from(raw) * 0.0025),
    }
}

fn pressure(raw: u16) -> Result<u32, DecodeError> {
    if raw == u16::MAX {
        return Err(DecodeError::Sentinel {
            field: Field::Pressure,
            raw,
        });
    }
    Ok(u32::from(raw) + 50_000)
}

fn acceleration(field: Field, raw: i16) -> Result<f64, DecodeError> {
    if raw == i16::MIN {
        return Err(DecodeError::Sentinel { field, raw: 0x8000 });
    }
    Ok(f64::from(raw) / 1000.0)
}

/// Top 11 bits of the power word, millivolts above 1600 mV.
fn battery_voltage(raw: u16) -> Result<f64, DecodeError> {
    if raw == 0x7FF {
        return Err(DecodeError::Sentinel {
            field: Field::BatteryVoltage,
            raw,
        });
    }
    Ok(f64::from(raw + 1600) / 1000.0)
}

/// Bottom 5 bits of the power word, 2 dBm steps from -40 dBm.
fn tx_power(raw: u8) -> Result<i8, DecodeError> {
    if raw == 0x1F {
        return Err(DecodeError::Sentinel {
            field: Field::TxPower,
            raw: u16::from(raw),
        });
    }
    Ok(2 * (raw as i8) - 40)
}

fn movement_counter(raw: u8) -> Result<u8, DecodeError> {
    if raw == u8::MAX {
        return Err(DecodeError::Sentinel {
            field: Field::MovementCounter,
            raw: u16::from(raw),
        });
    }
    Ok(raw)
}

/// Decode a data format 5 advertisement.
///
/// The MAC address embedded in the payload must match `record.mac`; when it
/// does not, the error is reported and the result's `mac` is left empty.
///
/// # Errors
/// [`DecodeError::Truncated`] for payloads under 24 bytes. In strict mode,
/// the first field that fails validation.
pub fn decode_format_5(
    record: &AdvertisementRecord,
    strict: bool,
) -> Result<Measurement5, DecodeError> {
    let data = record.manufacturer_data.as_slice();
    ensure_len(data, FORMAT_TAG, FORMAT5_PAYLOAD_LEN)?;

    let mut check = Validator::new(strict);

    if data.len() != FORMAT5_PAYLOAD_LEN {
        check.report(DecodeError::Length {
            expected: FORMAT5_PAYLOAD_LEN,
            actual: data.len(),
        })?;
    }
    if data[0] != FORMAT_TAG {
        check.report(DecodeError::WrongFormat {
            expected: FORMAT_TAG,
            actual: data[0],
        })?;
    }

    let temperature = check.field(temperature(be_i16(data, 1)), f64::NAN)?;
    let humidity = check.field(humidity(be_u16(data, 3)), f64::NAN)?;
    let pressure = check.field(pressure(be_u16(data, 5)), INVALID_PRESSURE)?;
    let acceleration = [
        check.field(acceleration(Field::AccelerationX, be_i16(data, 7)), f64::NAN)?,
        check.field(acceleration(Field::AccelerationY, be_i16(data, 9)), f64::NAN)?,
        check.field(acceleration(Field::AccelerationZ, be_i16(data, 11)), f64::NAN)?,
    ];

    let power = be_u16(data, 13);
    let battery_voltage = check.field(battery_voltage(power >> 5), f64::NAN)?;
    let tx_power = check.field(tx_power((power & 0x1F) as u8), INVALID_TX_POWER)?;
    let movement_counter = check.field(movement_counter(data[15]), INVALID_MOVEMENT_COUNTER)?;
    let measurement_sequence = be_u16(data, 16);

    let mut mac_bytes = [0u8; 6];
    mac_bytes.copy_from_slice(&data[18..FORMAT5_PAYLOAD_LEN]);
    let payload_mac = MacAddress(mac_bytes).to_string();
    let mac = if payload_mac == canonicalize(&record.mac) {
        payload_mac
    } else {
        check.report(DecodeError::MacMismatch {
            advertised: record.mac.clone(),
            payload: payload_mac,
        })?;
        String::new()
    };

    let (contains_errors, error_msg) = check.finish();

    Ok(Measurement5 {
        temperature,
        humidity,
        pressure,
        acceleration,
        battery_voltage,
        tx_power,
        movement_counter,
        measurement_sequence,
        mac,
        signal_strength: record.signal_strength,
        contains_errors,
        error_msg,
    })
}
