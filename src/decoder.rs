//! WxBeacon2 manufacturer data decoder.
//!
//! The buffer is the manufacturer specific AD payload as broadcast, company
//! identifier included, so the first sensor byte sits at offset 2. All 16-bit
//! words are little-endian:
//!
//! | Offset | Field                         | Rule              |
//! |--------|-------------------------------|-------------------|
//! | 2      | sequence                      | raw byte          |
//! | 3-4    | temperature                   | `i16 / 100` °C    |
//! | 5-6    | relative humidity             | `u16 / 100` %     |
//! | 7-8    | ambient light                 | `u16` lux         |
//! | 9-10   | UV index                      | `u16 / 100`       |
//! | 11-12  | pressure                      | `u16 / 10` hPa    |
//! | 13-14  | sound noise                   | `u16 / 100` dB    |
//! | 15-16  | IM accel X / EP discomfort    | `u16` / `u16/100` |
//! | 17-18  | IM accel Y / EP heat stroke   | `u16` / `u16/100` |
//! | 19-20  | IM accel Z                    | `u16`             |
//! | 21     | battery                       | `(i8 + 100) / 100` V |

use crate::mac_address::MacAddress;
use crate::reading::{Common, EpReading, ImReading, Reading, Variant};

/// Number of manufacturer data bytes both layouts need.
pub const PAYLOAD_LEN: usize = 22;

/// A manufacturer data buffer already checked to hold [`PAYLOAD_LEN`] bytes.
pub type Payload = [u8; PAYLOAD_LEN];

#[inline]
fn word(payload: &Payload, offset: usize) -> u16 {
    u16::from_le_bytes([payload[offset], payload[offset + 1]])
}

#[inline]
fn hundredths(payload: &Payload, offset: usize) -> f64 {
    f64::from(word(payload, offset)) / 100.0
}

/// The battery byte is a signed offset from 1.00 V in hundredths: `(i8 + 100) / 100`.
#[inline]
fn battery_voltage(raw: u8) -> f64 {
    (f64::from(raw as i8) + 100.0) / 100.0
}

fn decode_common(device_id: MacAddress, rssi: i16, payload: &Payload) -> Common {
    Common {
        rssi,
        device_id,
        sequence: payload[2],
        temperature: f64::from(word(payload, 3) as i16) / 100.0,
        relative_humidity: hundredths(payload, 5),
        ambient_light: word(payload, 7),
        uv_index: hundredths(payload, 9),
        pressure: f64::from(word(payload, 11)) / 10.0,
        sound_noise: hundredths(payload, 13),
        battery_voltage: battery_voltage(payload[21]),
    }
}

/// Decode the motion (`IM`) layout.
pub fn decode_im(device_id: MacAddress, rssi: i16, payload: &Payload) -> ImReading {
    ImReading {
        common: decode_common(device_id, rssi, payload),
        acceleration_x: word(payload, 15),
        acceleration_y: word(payload, 17),
        acceleration_z: word(payload, 19),
    }
}

/// Decode the environmental (`EP`) layout. Bytes 19-20 are not used.
pub fn decode_ep(device_id: MacAddress, rssi: i16, payload: &Payload) -> EpReading {
    EpReading {
        common: decode_common(device_id, rssi, payload),
        discomfort_index: hundredths(payload, 15),
        heat_stroke: hundredths(payload, 17),
    }
}

/// Decode `payload` using the layout of `variant`.
pub fn decode(variant: Variant, device_id: MacAddress, rssi: i16, payload: &Payload) -> Reading {
    match variant {
        Variant::Im => Reading::Im(decode_im(device_id, rssi, payload)),
        Variant::Ep => Reading::Ep(decode_ep(device_id, rssi, payload)),
    }
}
