use clap::Parser;
use ruuvi_gateway::app::{self, Options, RunError};
use ruuvi_gateway::{BluezTransport, Transport};
use std::panic::{self, PanicHookInfo};
use std::sync::Arc;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

/// Log to stderr so stdout carries nothing but line protocol.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// SIGINT and SIGTERM listeners. Signals arriving after `install` are kept
/// until `recv` is polled.
struct ShutdownSignals {
    interrupt: Signal,
    terminate: Signal,
}

impl ShutdownSignals {
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for either signal, returning the name of the one received.
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

/// Listen until SIGINT, SIGTERM or until discovery is lost, writing
/// measurements to stdout.
async fn run(options: Options) -> Result<(), RunError> {
    let transport: Arc<dyn Transport> = Arc::new(BluezTransport::new());
    let (listener, records) = app::channel_listener(&options, transport);
    let listener = Arc::new(listener);

    match ShutdownSignals::install() {
        Ok(mut signals) => {
            let stopper = Arc::clone(&listener);
            tokio::spawn(async move {
                let name = signals.recv().await;
                info!(signal = name, "Stopping");
                stopper.stop();
            });
        }
        Err(e) => warn!(error = %e, "Cannot install signal handlers"),
    }

    let mut out = std::io::stdout().lock();
    let mut err = std::io::stderr();
    app::run_with_io(options, &listener, records, &mut out, &mut err).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd, Telegraf execd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_logging(options.verbose);

    match run(options).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            error!("{why}");
            std::process::exit(EXIT_ERROR);
        }
    }
}
