//! Output formatters for WxBeacon2 readings.
//!
//! Each formatter turns one [`Reading`] into one line of output.

pub mod influxdb;
pub mod text;

use crate::reading::Reading;

/// Trait for formatting readings into output lines.
pub trait OutputFormatter: Send + Sync {
    /// Format a reading as a single line, without the trailing newline.
    fn format(&self, reading: &Reading) -> String;
}

/// Output formats selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable `Key:value` rendering
    #[default]
    Text,
    /// InfluxDB line protocol, for Telegraf `execd` inputs
    Influxdb,
}

impl OutputFormat {
    /// Build the formatter for this format.
    ///
    /// `measurement` is only used by the line protocol formatter.
    pub fn formatter(self, measurement: &str) -> Box<dyn OutputFormatter> {
        match self {
            OutputFormat::Text => Box::new(text::TextFormatter),
            OutputFormat::Influxdb => Box::new(influxdb::InfluxDbFormatter::new(measurement)),
        }
    }
}
