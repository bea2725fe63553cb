//! BLE scanner abstraction.
//!
//! A backend turns a Bluetooth adapter into a stream of [`ScanEvent`]s and a
//! [`Central`] handle used to start and stop scanning. The dispatch gate owns
//! both; nothing here knows about WxBeacon2 payloads.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::mac_address::MacAddress;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// The listener was stopped without being started, or stopped twice
    #[error("device not initialized")]
    NotInitialized,
    /// The listener is already running
    #[error("device already started")]
    AlreadyStarted,
}

/// Channel buffer size for scan events.
pub const SCAN_EVENT_CHANNEL_BUFFER_SIZE: usize = 100;

/// Manufacturer specific data of one advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManufacturerData {
    /// Bluetooth SIG company identifier
    pub company_id: u16,
    /// The AD payload as broadcast, starting with the little-endian company id
    pub data: Vec<u8>,
}

impl ManufacturerData {
    /// Build from a company id and the bytes that follow it on air.
    pub fn from_parts(company_id: u16, rest: &[u8]) -> Self {
        let mut data = Vec::with_capacity(2 + rest.len());
        data.extend_from_slice(&company_id.to_le_bytes());
        data.extend_from_slice(rest);
        Self { company_id, data }
    }
}

/// One received advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub address: MacAddress,
    /// Advertised local name, empty when none was broadcast
    pub name: String,
    pub manufacturer_data: Option<ManufacturerData>,
    /// Received signal strength in dBm
    pub rssi: i16,
}

/// Power state of the Bluetooth adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

/// Events produced by a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    StateChanged(AdapterState),
    Discovered(Advertisement),
}

/// Boxed future returned by [`Central`] operations.
pub type CentralFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ScanError>> + Send + 'a>>;

/// Scan control of an opened adapter.
pub trait Central: Send {
    /// Start a passive scan. With `allow_duplicates`, repeated advertisements
    /// of an unchanged payload are delivered too.
    fn scan(&mut self, allow_duplicates: bool) -> CentralFuture<'_>;

    /// Stop scanning, keeping the adapter open.
    fn stop_scanning(&mut self) -> CentralFuture<'_>;

    /// Stop scanning and release the adapter.
    fn stop(&mut self) -> CentralFuture<'_>;
}

/// An opened backend: the control handle and its event stream.
pub struct Connection {
    pub central: Box<dyn Central>,
    pub events: mpsc::Receiver<ScanEvent>,
}

/// Boxed future returned by [`Scanner::open`].
pub type OpenFuture<'a> = Pin<Box<dyn Future<Output = Result<Connection, ScanError>> + Send + 'a>>;

/// Opens a backend. Abstracted so the gate can be tested without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn open(&self, backend: Backend) -> OpenFuture<'_>;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn open(&self, backend: Backend) -> OpenFuture<'_> {
        Box::pin(open(backend))
    }
}

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
        }
    }
}

/// Open the adapter through `backend`.
///
/// Adapter initialization failures are returned here; scanning itself only
/// starts once the adapter reports [`AdapterState::PoweredOn`].
pub async fn open(backend: Backend) -> Result<Connection, ScanError> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::open().await,
        #[cfg(feature = "hci")]
        Backend::Hci => hci::open().await,
    }
}
