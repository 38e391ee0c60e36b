//! `ruuvi-gateway` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup and
//! process exit codes. Discovery lives in [`crate::listener`], payload decoding
//! in [`crate::codec`], and [`crate::app`] wires the two to an output sink where
//! it can be tested deterministically with an injected transport and injected
//! output streams.

pub mod advertisement;
pub mod app;
pub mod codec;
pub mod listener;
pub mod mac_address;
pub mod measurement;
pub mod output;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::AdvertisementRecord;
pub use codec::{DataFormat, DecodeError, decode, decode_format_3, decode_format_5, identify_format};
#[cfg(feature = "bluer")]
pub use listener::bluer::BluezTransport;
pub use listener::{DiscoveryState, ListenError, Listener, Transport, TransportError};
pub use mac_address::MacAddress;
pub use measurement::{Measurement, Measurement3, Measurement5};
pub use output::OutputFormatter;
pub use output::influxdb::InfluxDbFormatter;
