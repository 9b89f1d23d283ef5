use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ControlError, Result};

/// Supported white-point range of the bulbs we target.
pub const KELVIN_MIN: u16 = 2500;
pub const KELVIN_MAX: u16 = 9000;

/**
A hardware (MAC) address in canonical form.

Construction goes through [`parse_identifier`], which accepts `:` or `-`
separated hex pairs in any case; the canonical rendering is always
lowercase and colon-separated, so identifiers compare and hash reliably
no matter how the operator typed them.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HardwareId([u8; 6]);

impl HardwareId {
    pub fn from_octets(octets: [u8; 6]) -> Self {
        HardwareId(octets)
    }

    /// The raw octets, in transmission order.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for HardwareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a, b, c, d, e, g
        )
    }
}

impl FromStr for HardwareId {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        parse_identifier(s)
    }
}

impl Serialize for HardwareId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HardwareId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_identifier(&text).map_err(de::Error::custom)
    }
}

/// A validated hue/saturation/brightness/kelvin tuple.
///
/// Only constructible through [`validate_color`] (or field-by-field from
/// already-validated `u16`s), so a `ColorSpec` handed to the transport is
/// always inside the supported ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorSpec {
    pub hue: u16,
    pub saturation: u16,
    pub brightness: u16,
    pub kelvin: u16,
}

/// Parses a strict IPv4 dotted-quad: exactly four parts, digits only, each
/// in `0..=255`. Rejects everything else with [`ControlError::InvalidAddress`].
pub fn parse_address(text: &str) -> Result<Ipv4Addr> {
    let invalid = || ControlError::InvalidAddress(text.to_string());

    let parts: Vec<&str> = text.split('.').collect();
    if parts.len() != 4 {
        return Err(invalid());
    }

    let mut octets = [0u8; 4];
    for (octet, part) in octets.iter_mut().zip(parts) {
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        // A three-digit part can still exceed 255; the u8 parse catches it.
        *octet = part.parse().map_err(|_| invalid())?;
    }
    Ok(Ipv4Addr::from(octets))
}

/// Parses a hardware identifier: exactly six two-digit hex pairs separated
/// uniformly by `:` or `-`, any case. Normalizes to the canonical lowercase
/// colon-separated form.
pub fn parse_identifier(text: &str) -> Result<HardwareId> {
    let invalid = || ControlError::InvalidIdentifier(text.to_string());

    let separator = if text.contains(':') { ':' } else { '-' };
    let parts: Vec<&str> = text.split(separator).collect();
    if parts.len() != 6 {
        return Err(invalid());
    }

    let mut octets = [0u8; 6];
    for (octet, part) in octets.iter_mut().zip(parts) {
        // Mixed separators leave the other one inside a part and fail here.
        if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
    }
    Ok(HardwareId(octets))
}

/// Validates a brightness level against the device's `0..=65535` scale.
pub fn validate_brightness(value: i64) -> Result<u16> {
    in_range("brightness", value, 0, i64::from(u16::MAX))
}

/**
Validates a full color tuple. Hue, saturation and brightness share the
`0..=65535` scale; kelvin is restricted to the supported white-point range.
Any field out of range fails the whole call, nothing is clamped.
*/
pub fn validate_color(hue: i64, saturation: i64, brightness: i64, kelvin: i64) -> Result<ColorSpec> {
    let max = i64::from(u16::MAX);
    Ok(ColorSpec {
        hue: in_range("hue", hue, 0, max)?,
        saturation: in_range("saturation", saturation, 0, max)?,
        brightness: in_range("brightness", brightness, 0, max)?,
        kelvin: in_range(
            "kelvin",
            kelvin,
            i64::from(KELVIN_MIN),
            i64::from(KELVIN_MAX),
        )?,
    })
}

fn in_range(field: &'static str, value: i64, min: i64, max: i64) -> Result<u16> {
    if value < min || value > max {
        return Err(ControlError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(value as u16)
}
