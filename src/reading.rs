//! Decoded WxBeacon2 readings.
//!
//! A beacon advertises one of two payload layouts, told apart by its
//! advertised name: `IM` carries an accelerometer, `EP` carries derived
//! comfort indices instead. Both share the environmental header in
//! [`Common`].

use crate::mac_address::MacAddress;
use std::fmt;

/// The two payload layouts a WxBeacon2 advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// Motion layout, advertised under the name `IM`.
    Im,
    /// Environmental layout, advertised under the name `EP`.
    Ep,
}

impl Variant {
    /// Map an advertised local name to a payload layout.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "IM" => Some(Variant::Im),
            "EP" => Some(Variant::Ep),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Im => "IM",
            Variant::Ep => "EP",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields present in both payload layouts.
///
/// Units:
/// - Temperature in Celsius
/// - Relative humidity in percent
/// - Ambient light in lux
/// - Pressure in hPa
/// - Sound noise in dB
/// - Battery voltage in Volts
#[derive(Debug, Clone, PartialEq)]
pub struct Common {
    /// Received signal strength in dBm
    pub rssi: i16,
    /// Address of the beacon that sent the advertisement
    pub device_id: MacAddress,
    /// Firmware sample counter, wraps at 256
    pub sequence: u8,
    pub temperature: f64,
    pub relative_humidity: f64,
    pub ambient_light: u16,
    pub uv_index: f64,
    pub pressure: f64,
    pub sound_noise: f64,
    pub battery_voltage: f64,
}

/// Reading from the `IM` layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ImReading {
    pub common: Common,
    /// Raw accelerometer words, unscaled
    pub acceleration_x: u16,
    pub acceleration_y: u16,
    pub acceleration_z: u16,
}

/// Reading from the `EP` layout.
#[derive(Debug, Clone, PartialEq)]
pub struct EpReading {
    pub common: Common,
    pub discomfort_index: f64,
    pub heat_stroke: f64,
}

/// A decoded advertisement from either layout.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Im(ImReading),
    Ep(EpReading),
}

/// A single value of the structured projection returned by [`Reading::fields`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(s) => f.write_str(s),
            FieldValue::Int(n) => write!(f, "{n}"),
            FieldValue::UInt(n) => write!(f, "{n}"),
            FieldValue::Float(n) => write!(f, "{n}"),
        }
    }
}

impl Reading {
    pub fn variant(&self) -> Variant {
        match self {
            Reading::Im(_) => Variant::Im,
            Reading::Ep(_) => Variant::Ep,
        }
    }

    pub fn common(&self) -> &Common {
        match self {
            Reading::Im(r) => &r.common,
            Reading::Ep(r) => &r.common,
        }
    }

    pub fn device_id(&self) -> MacAddress {
        self.common().device_id
    }

    /// The firmware sample counter of this reading.
    pub fn sequence(&self) -> u8 {
        self.common().sequence
    }

    /// Structured key/value projection of the reading, in a stable order.
    ///
    /// Keys are the names used by log pipelines: `type`, `deviceId`, `rssi`,
    /// `sequence`, the environmental fields, the layout specific fields and
    /// finally `vBattery`.
    pub fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        let c = self.common();
        let mut fields = vec![
            ("type", FieldValue::Str(self.variant().as_str().to_string())),
            ("deviceId", FieldValue::Str(c.device_id.to_string())),
            ("rssi", FieldValue::Int(i64::from(c.rssi))),
            ("sequence", FieldValue::UInt(u64::from(c.sequence))),
            ("temperature", FieldValue::Float(c.temperature)),
            ("relativeHumidity", FieldValue::Float(c.relative_humidity)),
            ("ambientLight", FieldValue::UInt(u64::from(c.ambient_light))),
            ("uvIndex", FieldValue::Float(c.uv_index)),
            ("pressure", FieldValue::Float(c.pressure)),
            ("soundNoise", FieldValue::Float(c.sound_noise)),
        ];

        match self {
            Reading::Im(r) => {
                fields.push(("accelerationX", FieldValue::UInt(u64::from(r.acceleration_x))));
                fields.push(("accelerationY", FieldValue::UInt(u64::from(r.acceleration_y))));
                fields.push(("accelerationZ", FieldValue::UInt(u64::from(r.acceleration_z))));
            }
            Reading::Ep(r) => {
                fields.push(("discomfortIndex", FieldValue::Float(r.discomfort_index)));
                fields.push(("heatStroke", FieldValue::Float(r.heat_stroke)));
            }
        }

        fields.push(("vBattery", FieldValue::Float(c.battery_voltage)));
        fields
    }

    /// Render [`Reading::fields`] as `key=value` pairs for a log event.
    pub fn log_fields(&self) -> LogFields<'_> {
        LogFields(self)
    }
}

/// logfmt view of a reading, see [`Reading::log_fields`].
pub struct LogFields<'a>(&'a Reading);

impl fmt::Display for LogFields<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.fields().iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

fn fmt_common_head(variant: Variant, c: &Common, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
        f,
        "Type:{variant} DeviceId:{} RSSI:{} Sequence:{} Temp:{} Humid:{} AmbientLight:{} \
         UVIndex:{} Pressure:{} SoundNoise:{}",
        c.device_id,
        c.rssi,
        c.sequence,
        c.temperature,
        c.relative_humidity,
        c.ambient_light,
        c.uv_index,
        c.pressure,
        c.sound_noise
    )
}

impl fmt::Display for ImReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_common_head(Variant::Im, &self.common, f)?;
        write!(
            f,
            " AccelerationX:{} AccelerationY:{} AccelerationZ:{} VBattery:{}",
            self.acceleration_x, self.acceleration_y, self.acceleration_z, self.common.battery_voltage
        )
    }
}

impl fmt::Display for EpReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_common_head(Variant::Ep, &self.common, f)?;
        write!(
            f,
            " DiscomfortIndex:{} HeatStroke:{} VBattery:{}",
            self.discomfort_index, self.heat_stroke, self.common.battery_voltage
        )
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Im(r) => r.fmt(f),
            Reading::Ep(r) => r.fmt(f),
        }
    }
}
