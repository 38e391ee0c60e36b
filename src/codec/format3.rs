//! Data format 3 (RAWv1), 14 bytes.
//!
//! Humidity in 0.5 % steps at byte 1, temperature as a sign-and-magnitude
//! integer part at byte 2 with hundredths at byte 3, pressure at 4-5 with a
//! 50000 Pa offset, acceleration x/y/z as i16 mg at 6-11 and battery voltage
//! in millivolts at 12-13. There is no MAC address in the payload.

use super::{DecodeError, Validator, be_i16, be_u16, ensure_len};
use crate::advertisement::AdvertisementRecord;
use crate::measurement::Measurement3;

pub const FORMAT3_PAYLOAD_LEN: usize = 14;
const FORMAT_TAG: u8 = 3;

fn temperature(integer: u8, fraction: u8) -> f64 {
    let magnitude = f64::from(integer & 0x7F) + f64::from(fraction) * 0.01;
    if integer & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Decode a data format 3 advertisement.
///
/// # Errors
/// [`DecodeError::Truncated`] for payloads under 14 bytes. In strict mode, a
/// wrong format tag or an over-long payload.
pub fn decode_format_3(
    record: &AdvertisementRecord,
    strict: bool,
) -> Result<Measurement3, DecodeError> {
    let data = record.manufacturer_data.as_slice();
    ensure_len(data, FORMAT_TAG, FORMAT3_PAYLOAD_LEN)?;

    let mut check = Validator::new(strict);

    if data.len() != FORMAT3_PAYLOAD_LEN {
        check.report(DecodeError::Length {
            expected: FORMAT3_PAYLOAD_LEN,
            actual: data.len(),
        })?;
    }
    if data[0] != FORMAT_TAG {
        check.report(DecodeError::WrongFormat {
            expected: FORMAT_TAG,
            actual: data[0],
        })?;
    }

    let (contains_errors, error_msg) = check.finish();

    Ok(Measurement3 {
        humidity: f64::from(data[1]) * 0.5,
        temperature: temperature(data[2], data[3]),
        pressure: u32::from(be_u16(data, 4)) + 50_000,
        acceleration: [
            f64::from(be_i16(data, 6)) / 1000.0,
            f64::from(be_i16(data, 8)) / 1000.0,
            f64::from(be_i16(data, 10)) / 1000.0,
        ],
        battery_voltage: f64::from(be_u16(data, 12)) / 1000.0,
        mac: record.mac.clone(),
        signal_strength: record.signal_strength,
        contains_errors,
        error_msg,
    })
}
