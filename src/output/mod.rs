//! Metrics sinks for decoded measurements.
//!
//! The gateway writes one line per measurement. InfluxDB line protocol is the
//! only format for now; it is what Telegraf's `execd` input consumes.

pub mod influxdb;

use crate::measurement::Measurement;
use std::time::SystemTime;

/// Trait for formatting measurements into output lines.
pub trait OutputFormatter: Send + Sync {
    /// Format a measurement received at `timestamp`.
    fn format(&self, measurement: &Measurement, timestamp: Option<SystemTime>) -> String;
}
