//! InfluxDB line protocol output formatter.

use crate::output::OutputFormatter;
use crate::reading::{FieldValue, Reading};
use std::collections::BTreeMap;
use std::fmt;

/// Projection keys that become tags instead of fields, with their tag names.
const TAG_KEYS: [(&str, &str); 2] = [("deviceId", "device"), ("type", "type")];

/// Field value as written in line protocol: integers get the `i` suffix,
/// strings are quoted.
struct LineValue<'a>(&'a FieldValue);

impl fmt::Display for LineValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Int(num) => write!(f, "{num}i"),
            FieldValue::UInt(num) => write!(f, "{num}i"),
            FieldValue::Str(s) => write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        }
    }
}

/// Escape commas, spaces and equals signs in measurement names, tag keys and tag values.
fn escape_key(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, ',' | ' ' | '=') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<String, String>,
    pub field_set: BTreeMap<String, FieldValue>,
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", escape_key(&self.measurement))?;
        for (key, value) in &self.tag_set {
            write!(fmt, ",{}={}", escape_key(key), escape_key(value))?;
        }
        for (i, (key, value)) in self.field_set.iter().enumerate() {
            let separator = if i == 0 { ' ' } else { ',' };
            write!(fmt, "{separator}{}={}", escape_key(key), LineValue(value))?;
        }
        Ok(())
    }
}

/// InfluxDB line protocol formatter.
///
/// Device address and layout become tags; all numeric values of the
/// reading's projection become fields. No timestamp is written, the
/// collector assigns one on receipt.
pub struct InfluxDbFormatter {
    /// The measurement name in InfluxDB
    measurement_name: String,
}

impl InfluxDbFormatter {
    pub fn new(measurement_name: impl Into<String>) -> Self {
        Self {
            measurement_name: measurement_name.into(),
        }
    }

    fn to_data_point(&self, reading: &Reading) -> DataPoint {
        let mut tag_set = BTreeMap::new();
        let mut field_set = BTreeMap::new();

        for (key, value) in reading.fields() {
            match TAG_KEYS.iter().find(|(field, _)| *field == key) {
                Some((_, tag)) => {
                    tag_set.insert((*tag).to_string(), value.to_string());
                }
                None => {
                    field_set.insert(key.to_string(), value);
                }
            }
        }

        DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set,
            field_set,
        }
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(&self, reading: &Reading) -> String {
        self.to_data_point(reading).to_string()
    }
}
