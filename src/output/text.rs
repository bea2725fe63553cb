//! Human-readable output.

use crate::output::OutputFormatter;
use crate::reading::Reading;

/// Renders readings with their `Display` implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextFormatter;

impl OutputFormatter for TextFormatter {
    fn format(&self, reading: &Reading) -> String {
        reading.to_string()
    }
}
