//! Bluetooth MAC addresses.
//!
//! BlueZ and the RuuviTag payload both carry addresses, the former as a
//! `XX:XX:XX:XX:XX:XX` string and the latter as six raw bytes. This type is
//! the meeting point for both and always renders the canonical uppercase form.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A Bluetooth MAC address stored as a compact 6-byte array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Errors returned when parsing a MAC address string or byte slice.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseMacError {
    #[error("invalid MAC address: expected 6 parts, got {0}")]
    InvalidLength(usize),
    #[error("invalid MAC address: part {0} has wrong length")]
    InvalidPartLength(usize),
    #[error("invalid MAC address: '{0}' is not valid hex")]
    InvalidHex(String),
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 6 {
            return Err(ParseMacError::InvalidLength(parts.len()));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(ParseMacError::InvalidPartLength(i));
            }
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| ParseMacError::InvalidHex(part.to_string()))?;
        }

        Ok(MacAddress(bytes))
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

#[cfg(feature = "bluer")]
impl From<MacAddress> for bluer::Address {
    fn from(addr: MacAddress) -> Self {
        bluer::Address(addr.0)
    }
}

/// Bring a MAC string into canonical uppercase form.
///
/// Strings that do not parse as a MAC address are only uppercased, so that
/// lookups keyed by whatever the platform reported still line up.
pub fn canonicalize(mac: &str) -> String {
    mac.parse::<MacAddress>()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| mac.trim().to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let addr = MacAddress([0xCB, 0xB8, 0x33, 0x4C, 0x88, 0x4F]);
        assert_eq!(addr.to_string(), "CB:B8:33:4C:88:4F");
    }

    #[test]
    fn test_display_pads_with_zeros() {
        let addr = MacAddress([0x00, 0x01, 0x02, 0x03, 0x04, 0x05]);
        assert_eq!(addr.to_string(), "00:01:02:03:04:05");
    }

    #[test]
    fn test_from_str_lowercase() {
        let addr: MacAddress = "cb:b8:33:4c:88:4f".parse().unwrap();
        assert_eq!(addr.0, [0xCB, 0xB8, 0x33, 0x4C, 0x88, 0x4F]);
    }

    #[test]
    fn test_from_str_invalid() {
        assert_eq!(
            "invalid".parse::<MacAddress>(),
            Err(ParseMacError::InvalidLength(1))
        );
        assert_eq!(
            "AA:BB:CCC:DD:EE:FF".parse::<MacAddress>(),
            Err(ParseMacError::InvalidPartLength(2))
        );
        assert!(matches!(
            "AA:BB:CC:DD:EE:GG".parse::<MacAddress>(),
            Err(ParseMacError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_canonicalize() {
        assert_eq!(canonicalize("cb:b8:33:4c:88:4f"), "CB:B8:33:4C:88:4F");
        assert_eq!(canonicalize(" CB:B8:33:4C:88:4F "), "CB:B8:33:4C:88:4F");
        assert_eq!(canonicalize("not-a-mac"), "NOT-A-MAC");
    }
}
