//! Core application runner (business logic) for `wxbeacon2-listener`.
//!
//! This module is intentionally decoupled from CLI parsing and process exit codes
//! so it can be tested deterministically.

use crate::dedup::SequenceFilter;
use crate::filter::Target;
use crate::gate::DispatchGate;
use crate::mac_address::MacAddress;
use crate::output::{OutputFormat, OutputFormatter};
use crate::reading::Reading;
use crate::scanner::{Backend, ScanError, Scanner};
use clap::Parser;
use std::future::Future;
use std::io;
use std::io::Write;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Channel buffer size between the reading callback and the output loop.
pub const READING_CHANNEL_BUFFER_SIZE: usize = 100;

/// Configuration for the core run loop.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Only accept readings from this beacon (e.g. --device aa:bb:cc:dd:ee:ff).
    /// Without it, every WxBeacon2 in range is reported.
    #[arg(long)]
    pub device: Option<MacAddress>,

    /// Output format
    #[arg(long, default_value_t, value_enum)]
    pub format: OutputFormat,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "wxbeacon2")]
    pub influxdb_measurement: String,

    /// Print every received advertisement, even when the beacon has not taken
    /// a new sample since the previous one.
    #[arg(long)]
    pub keep_duplicates: bool,

    /// Verbose logging, including advertisements that were not handled
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn write_reading(
    formatter: &dyn OutputFormatter,
    reading: &Reading,
    out: &mut dyn Write,
) -> io::Result<()> {
    tracing::debug!(data = %reading.log_fields(), "packet received");
    writeln!(out, "{}", formatter.format(reading))
}

/// Build the reading callback: optional per-device dedup, then hand-off to the output loop.
fn forward_readings(
    dedup: Option<SequenceFilter>,
    tx: mpsc::Sender<Reading>,
) -> impl Fn(Reading) + Send + Sync + 'static {
    let dedup = dedup.map(Arc::new);
    move |reading: Reading| {
        if dedup.as_ref().is_some_and(|d| !d.is_new(&reading)) {
            return;
        }
        if let Err(error) = tx.try_send(reading) {
            tracing::warn!(%error, "dropping reading");
        }
    }
}

/// Run the listener, writing one formatted line per reading to `out`.
///
/// - Readings pass through per-device sequence dedup unless `options.keep_duplicates`.
/// - Returns when the backend closes its event stream, or when `shutdown`
///   completes, in which case the listener is stopped first.
pub async fn run_with_io(
    options: Options,
    scanner: &dyn Scanner,
    shutdown: impl Future<Output = ()>,
    out: &mut dyn Write,
) -> Result<(), RunError> {
    let formatter = options.format.formatter(&options.influxdb_measurement);
    let dedup = (!options.keep_duplicates).then(SequenceFilter::new);
    let (tx, mut rx) = mpsc::channel(READING_CHANNEL_BUFFER_SIZE);

    let mut gate = DispatchGate::new(Target::from(options.device), forward_readings(dedup, tx));
    gate.start(scanner, options.backend).await?;

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            Some(reading) = rx.recv() => write_reading(formatter.as_ref(), &reading, out)?,
            result = gate.wait() => {
                result?;
                break;
            }
            () = &mut shutdown => {
                gate.stop().await?;
                break;
            }
        }
    }

    // Readings delivered right before the listener stopped
    while let Ok(reading) = rx.try_recv() {
        write_reading(formatter.as_ref(), &reading, out)?;
    }

    Ok(())
}
