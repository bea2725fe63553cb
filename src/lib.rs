//! `wxbeacon2-listener` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing and process exit codes.
//! The core “business logic” lives in [`crate::app`] where it can be tested
//! deterministically with injected scanner + injected output streams.
//!
//! Advertisements flow from a [`scanner`] backend through the [`gate`], which
//! runs each one through [`filter()`] and hands accepted [`Reading`]s to the
//! caller's callback.

pub mod app;
pub mod decoder;
pub mod dedup;
pub mod filter;
pub mod gate;
pub mod logging;
pub mod mac_address;
pub mod output;
pub mod reading;
pub mod scanner;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use dedup::SequenceFilter;
pub use filter::{OMRON_COMPANY_ID, Rejected, Target, filter};
pub use gate::{DispatchGate, Router};
pub use mac_address::{MacAddress, ParseMacError};
pub use output::influxdb::InfluxDbFormatter;
pub use output::text::TextFormatter;
pub use output::{OutputFormat, OutputFormatter};
pub use reading::{Common, EpReading, FieldValue, ImReading, Reading, Variant};
pub use scanner::{Advertisement, Backend, ManufacturerData, ScanError, Scanner};
