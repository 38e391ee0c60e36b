//! Core application runner (business logic) for `ruuvi-gateway`.
//!
//! This module is decoupled from CLI parsing, logging setup and process exit
//! codes so it can be tested deterministically with an in-memory transport.

use crate::advertisement::AdvertisementRecord;
use crate::codec::{self, DataFormat};
use crate::listener::{ListenError, Listener, Transport};
use crate::mac_address::MacAddress;
use crate::output::OutputFormatter;
use crate::output::influxdb::InfluxDbFormatter;
use clap::Parser;
use std::io;
use std::io::Write;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Configuration for the gateway.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Bluetooth adapter to listen on. An empty name picks the default adapter.
    #[arg(long, default_value = "hci0")]
    pub adapter: String,

    /// Ignore a RuuviTag. May be given multiple times.
    /// Format: --blacklist DE:AD:BE:EF:00:00
    #[arg(long = "blacklist", value_name = "MAC")]
    pub blacklist: Vec<MacAddress>,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "ruuvi_measurement")]
    pub influxdb_measurement: String,

    /// Drop packets on the first invalid field instead of reporting partial data
    #[arg(long)]
    pub strict: bool,

    /// Verbose output, print decode errors and debug logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Listen(#[from] ListenError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Build a listener that forwards every advertisement into a channel.
pub fn channel_listener(
    options: &Options,
    transport: Arc<dyn Transport>,
) -> (Listener, mpsc::UnboundedReceiver<AdvertisementRecord>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let listener = Listener::new(
        move |record| {
            // The receiver is gone once the run loop stopped.
            let _ = tx.send(record);
        },
        options.adapter.clone(),
        transport,
    );
    for mac in &options.blacklist {
        listener.blacklist(&mac.to_string());
    }
    (listener, rx)
}

fn write_record(
    options: &Options,
    formatter: &dyn OutputFormatter,
    record: &AdvertisementRecord,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> io::Result<()> {
    if codec::identify_format(record) == DataFormat::NotRuuviTag {
        debug!(mac = %record.mac, id = record.manufacturer_id, "Skipping non-Ruuvi advertisement");
        return Ok(());
    }

    match codec::decode(record, options.strict) {
        Ok(measurement) => {
            if options.verbose && measurement.contains_errors() {
                writeln!(err, "{}: {}", record.mac, measurement.error_msg())?;
            }
            let line = formatter.format(&measurement, Some(SystemTime::now()));
            writeln!(out, "{line}")
        }
        Err(decode_err) => {
            if options.verbose {
                writeln!(err, "{}: {decode_err}", record.mac)?;
            }
            Ok(())
        }
    }
}

/// Run the gateway until the listener stops, writing formatted output to
/// `out` and verbose errors to `err`.
///
/// - Advertisements from other manufacturers are skipped.
/// - Decoded measurements are written to `out` as InfluxDB lines.
/// - Decode errors are written to `err` only when `options.verbose` is true.
pub async fn run_with_io(
    options: Options,
    listener: &Listener,
    mut records: mpsc::UnboundedReceiver<AdvertisementRecord>,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<(), RunError> {
    let formatter = InfluxDbFormatter::new(options.influxdb_measurement.clone());

    let consume = async {
        while let Some(record) = records.recv().await {
            write_record(&options, &formatter, &record, out, err)?;
        }
        Ok::<(), io::Error>(())
    };

    // `None` when the output side gave up first.
    let listened = tokio::select! {
        result = listener.start() => Some(result),
        result = consume => {
            listener.stop();
            result?;
            None
        }
    };

    if let Some(result) = listened {
        result?;
        // Flush whatever was emitted before the listener returned.
        while let Ok(record) = records.try_recv() {
            write_record(&options, &formatter, &record, out, err)?;
        }
    }

    Ok(())
}
