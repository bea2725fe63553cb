//! Recognizing WxBeacon2 advertisements among arbitrary BLE traffic.

use crate::decoder::{PAYLOAD_LEN, Payload, decode};
use crate::mac_address::{MacAddress, ParseMacError};
use crate::reading::{Reading, Variant};
use crate::scanner::Advertisement;
use std::str::FromStr;
use thiserror::Error;

/// OMRON Corporation Bluetooth SIG company identifier.
pub const OMRON_COMPANY_ID: u16 = 0x02D5;

/// Which devices a listener accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    /// Every WxBeacon2 in range.
    #[default]
    Any,
    /// Only the beacon with this address.
    Device(MacAddress),
}

impl Target {
    pub fn matches(&self, address: MacAddress) -> bool {
        match self {
            Target::Any => true,
            Target::Device(target) => *target == address,
        }
    }
}

/// An empty string selects [`Target::Any`].
impl FromStr for Target {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            Ok(Target::Any)
        } else {
            s.parse().map(Target::Device)
        }
    }
}

impl From<Option<MacAddress>> for Target {
    fn from(address: Option<MacAddress>) -> Self {
        address.map_or(Target::Any, Target::Device)
    }
}

/// Why an advertisement was not decoded.
///
/// None of these are failures: a scanner sees plenty of unrelated traffic.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejected {
    #[error("no manufacturer data")]
    NoManufacturerData,
    #[error("company id {0:#06x} is not OMRON")]
    ForeignCompany(u16),
    #[error("device {0} is not the target")]
    OtherDevice(MacAddress),
    #[error("truncated payload: {0} bytes, need at least {len}", len = PAYLOAD_LEN)]
    Truncated(usize),
    #[error("unknown device variant {0:?}")]
    UnknownVariant(String),
}

/// Decode `advertisement` if it is a WxBeacon2 packet from `target`.
///
/// Checks run in order: company id, device address, payload length,
/// advertised name. The decoder only ever sees a full-length payload.
pub fn filter(advertisement: &Advertisement, target: &Target) -> Result<Reading, Rejected> {
    let manufacturer = advertisement
        .manufacturer_data
        .as_ref()
        .ok_or(Rejected::NoManufacturerData)?;
    if manufacturer.company_id != OMRON_COMPANY_ID {
        return Err(Rejected::ForeignCompany(manufacturer.company_id));
    }

    if !target.matches(advertisement.address) {
        return Err(Rejected::OtherDevice(advertisement.address));
    }

    let payload: &Payload = manufacturer
        .data
        .get(..PAYLOAD_LEN)
        .and_then(|head| head.try_into().ok())
        .ok_or(Rejected::Truncated(manufacturer.data.len()))?;

    let variant = Variant::from_name(&advertisement.name)
        .ok_or_else(|| Rejected::UnknownVariant(advertisement.name.clone()))?;

    Ok(decode(
        variant,
        advertisement.address,
        advertisement.rssi,
        payload,
    ))
}
