//! KNX Datapoint Types (DPT)
//!
//! Encoding and decoding between typed values and the raw byte strings
//! carried in cEMI payloads. Types are selected by their standard string
//! key, `DPT-<family>` or `DPST-<family>-<subtype>` (case-sensitive);
//! a `DPST` key selects subtype-specific handling where the family has
//! any (DPST-5-1 percent and DPST-5-3 angle scaling), and falls back to
//! the family rule otherwise.
//!
//! ## Supported families
//!
//! | Width | Families |
//! |-------|----------|
//! | 1 byte (1/2/4 bits) | 1, 2, 3 |
//! | 1 byte | 4, 5, 6 (signed), 17, 18, 20, 26 |
//! | 2 bytes | 7, 8 (signed), 9 (float) |
//! | 3 bytes | 10, 11, 30, 206, 232, 240, 250 |
//! | 4 bytes | 12, 13/15/27 (signed), 14 (float), 241 |
//! | 6 bytes | 219, 222, 229, 245, 249, 251 |
//! | 8 bytes | 19, 29 (signed), 230 |
//! | 14 bytes | 16 (Latin-1 text) |
//!
//! ## Usage
//!
//! ```
//! use knx_tunnel::dpt::{decode_datapoint, encode_datapoint, DptRole, DptValue};
//!
//! let mut buf = [0u8; 2];
//! let role = DptRole::default();
//! let len = encode_datapoint("DPST-9-1", &DptValue::Float(21.5), &role, &mut buf)?;
//! let value = decode_datapoint("DPST-9-1", &buf[..len], &role)?;
//! assert_eq!(value, DptValue::Float(21.52));
//! # Ok::<(), knx_tunnel::KnxError>(())
//! ```

use crate::error::{KnxError, Result};
use crate::knx_log;

mod bits;
mod float;
mod numeric;
mod text;

/// Maximum UTF-8 length of a decoded DPT-16 string (14 Latin-1 bytes,
/// each at most 2 bytes in UTF-8)
pub const MAX_TEXT_SIZE: usize = 28;

/// A decoded datapoint value
///
/// Each type string deterministically selects exactly one of these
/// representations; encoding with a mismatched variant fails with a
/// wrong-value-kind error.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DptValue {
    /// 1-bit types (family 1)
    Bool(bool),
    /// Signed integer types
    Signed(i64),
    /// Unsigned integer and bit-field types
    Unsigned(u64),
    /// Floating point types (families 9 and 14)
    Float(f64),
    /// 14-byte Latin-1 text (family 16)
    Text(heapless::String<MAX_TEXT_SIZE>),
}

impl DptValue {
    /// Build a text value, truncating to what fits in 14 Latin-1 bytes
    pub fn text(value: &str) -> Self {
        let mut out = heapless::String::new();
        for c in value.chars().take(crate::dpt::text::TEXT_WIDTH) {
            if out.push(c).is_err() {
                break;
            }
        }
        Self::Text(out)
    }

    /// The boolean payload, for `Bool` values
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric value as `f64`; `None` for `Bool` and `Text`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Signed(v) => Some(*v as f64),
            Self::Unsigned(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Bool(_) | Self::Text(_) => None,
        }
    }

    /// The text payload, for `Text` values
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for DptValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<u64> for DptValue {
    fn from(value: u64) -> Self {
        Self::Unsigned(value)
    }
}

impl From<u32> for DptValue {
    fn from(value: u32) -> Self {
        Self::Unsigned(u64::from(value))
    }
}

impl From<i64> for DptValue {
    fn from(value: i64) -> Self {
        Self::Signed(value)
    }
}

impl From<i32> for DptValue {
    fn from(value: i32) -> Self {
        Self::Signed(i64::from(value))
    }
}

impl From<f64> for DptValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// Linear mapping between a device byte range and a logical value range
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScaleRange {
    /// Smallest raw value on the device side
    pub device_min: f64,
    /// Largest raw value on the device side
    pub device_max: f64,
    /// Logical value mapped to `device_min`
    pub logical_min: f64,
    /// Logical value mapped to `device_max`
    pub logical_max: f64,
}

impl ScaleRange {
    /// Create a new scale mapping
    pub const fn new(device_min: f64, device_max: f64, logical_min: f64, logical_max: f64) -> Self {
        Self {
            device_min,
            device_max,
            logical_min,
            logical_max,
        }
    }
}

/// Per-parameter conversion options applied around the type codec
///
/// A role belongs to the group object a value travels through, not to
/// the DPT itself: two objects of the same type can scale or invert
/// differently.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DptRole {
    /// Invert 1-bit values in both directions
    pub invert: bool,
    /// Linear scaling applied to numeric values in both directions
    pub scale: Option<ScaleRange>,
}

impl DptRole {
    /// Role with inversion enabled and no scaling
    pub const fn inverted() -> Self {
        Self {
            invert: true,
            scale: None,
        }
    }

    /// Role with the given scale mapping
    pub const fn scaled(scale: ScaleRange) -> Self {
        Self {
            invert: false,
            scale: Some(scale),
        }
    }
}

/// Round half away from zero, the rounding used throughout this module
pub(crate) fn round_half_away(value: f64) -> f64 {
    if value >= 0.0 {
        (value + 0.5) as i64 as f64
    } else {
        (value - 0.5) as i64 as f64
    }
}

/// Map `x` from one linear range onto another, unrounded
fn scale(x: f64, from_min: f64, from_max: f64, to_min: f64, to_max: f64) -> f64 {
    (((x - from_min) * (to_max - to_min)) / (from_max - from_min)) + to_min
}

/// Byte-level codec selected for one type string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Codec {
    Bool,
    /// Low bits of a single byte (families 2 and 3)
    Masked(u8),
    /// Big-endian unsigned integer of the given byte width
    Unsigned(usize),
    /// Big-endian signed integer of the given byte width
    Signed(usize),
    /// 2-byte KNX float
    Float16,
    /// 4-byte IEEE 754 float
    Float32,
    /// DPST-5-1, 0-100 percent over one byte
    Percent,
    /// DPST-5-3, 0-360 degrees over one byte
    Angle,
    /// DPT-16, 14 bytes of Latin-1 text
    Text,
}

impl Codec {
    fn resolve(family: u16, subtype: Option<u16>) -> Option<Self> {
        Some(match family {
            1 => Self::Bool,
            2 => Self::Masked(0x03),
            3 => Self::Masked(0x0F),
            4 | 17 | 18 | 20 | 26 => Self::Unsigned(1),
            5 => match subtype {
                Some(1) => Self::Percent,
                Some(3) => Self::Angle,
                _ => Self::Unsigned(1),
            },
            6 => Self::Signed(1),
            7 => Self::Unsigned(2),
            8 => Self::Signed(2),
            9 => Self::Float16,
            10 | 11 | 30 | 206 | 232 | 240 | 250 => Self::Unsigned(3),
            12 | 241 => Self::Unsigned(4),
            13 | 15 | 27 => Self::Signed(4),
            14 => Self::Float32,
            16 => Self::Text,
            19 | 230 => Self::Unsigned(8),
            29 => Self::Signed(8),
            219 | 222 | 229 | 245 | 249 | 251 => Self::Unsigned(6),
            _ => return None,
        })
    }

    /// Whether role scaling applies to this codec's values
    const fn is_numeric(self) -> bool {
        !matches!(self, Self::Bool | Self::Text)
    }
}

/// Split a type string into family and optional subtype
fn parse_type(dpt_type: &str) -> Option<(u16, Option<u16>)> {
    if let Some(rest) = dpt_type.strip_prefix("DPST-") {
        let (family, subtype) = rest.split_once('-')?;
        Some((family.parse().ok()?, Some(subtype.parse().ok()?)))
    } else if let Some(rest) = dpt_type.strip_prefix("DPT-") {
        Some((rest.parse().ok()?, None))
    } else {
        None
    }
}

fn resolve_type(dpt_type: &str) -> Result<Codec> {
    let codec = parse_type(dpt_type).and_then(|(family, subtype)| Codec::resolve(family, subtype));
    match codec {
        Some(codec) => Ok(codec),
        None => {
            knx_log!(warn, "unsupported datapoint type {}", dpt_type);
            Err(KnxError::unsupported_dpt())
        }
    }
}

/// Apply role scaling to a value leaving the device (decode direction)
fn scale_decoded(value: DptValue, range: &ScaleRange) -> DptValue {
    if range.device_max == range.device_min {
        knx_log!(warn, "empty device range in scale mapping, value passed through");
        return value;
    }
    let Some(x) = value.as_f64() else {
        return value;
    };
    let scaled = round_half_away(scale(
        x,
        range.device_min,
        range.device_max,
        range.logical_min,
        range.logical_max,
    ));
    rescaled_as(&value, scaled)
}

/// Apply inverse role scaling to a value headed to the device (encode
/// direction)
fn scale_encoded(value: &DptValue, range: &ScaleRange) -> DptValue {
    if range.logical_max == range.logical_min {
        knx_log!(warn, "empty logical range in scale mapping, value passed through");
        return value.clone();
    }
    let Some(x) = value.as_f64() else {
        return value.clone();
    };
    let scaled = round_half_away(scale(
        x,
        range.logical_min,
        range.logical_max,
        range.device_min,
        range.device_max,
    ));
    rescaled_as(value, scaled)
}

/// Store a scaled number back into the kind of the value it came from
fn rescaled_as(original: &DptValue, scaled: f64) -> DptValue {
    match original {
        DptValue::Unsigned(_) => {
            if scaled <= 0.0 {
                DptValue::Unsigned(0)
            } else {
                DptValue::Unsigned(scaled as u64)
            }
        }
        DptValue::Signed(_) => DptValue::Signed(scaled as i64),
        // Scaled floats keep the rounded result; group objects that scale
        // are integer-valued on the logical side
        DptValue::Float(_) => DptValue::Float(scaled),
        other => other.clone(),
    }
}

/// Encode a typed value into the wire bytes of the given datapoint type.
///
/// Role scaling (logical range to device range) is applied before
/// packing; the invert flag applies to 1-bit types.
///
/// Returns the number of bytes written.
///
/// # Errors
///
/// Returns an error for an unknown type string, a value of the wrong
/// kind for the type, a value outside the type's range, or a too-small
/// buffer.
pub fn encode_datapoint(
    dpt_type: &str,
    value: &DptValue,
    role: &DptRole,
    buf: &mut [u8],
) -> Result<usize> {
    let codec = resolve_type(dpt_type)?;

    let scaled;
    let value = match &role.scale {
        Some(range) if codec.is_numeric() => {
            scaled = scale_encoded(value, range);
            &scaled
        }
        _ => value,
    };

    match codec {
        Codec::Bool => bits::encode_bool(value, role.invert, buf),
        Codec::Masked(mask) => bits::encode_masked(value, mask, buf),
        Codec::Unsigned(width) => numeric::encode_unsigned(value, width, buf),
        Codec::Signed(width) => numeric::encode_signed(value, width, buf),
        Codec::Percent => numeric::encode_percent(value, buf),
        Codec::Angle => numeric::encode_angle(value, buf),
        Codec::Float16 => float::encode_float16(value, buf),
        Codec::Float32 => float::encode_float32(value, buf),
        Codec::Text => text::encode_text(value, buf),
    }
}

/// Decode the wire bytes of the given datapoint type into a typed value.
///
/// Role scaling (device range to logical range) is applied to numeric
/// results; the invert flag applies to 1-bit types.
///
/// # Errors
///
/// Returns an error for an unknown type string or input shorter than
/// the type's width.
pub fn decode_datapoint(dpt_type: &str, data: &[u8], role: &DptRole) -> Result<DptValue> {
    let codec = resolve_type(dpt_type)?;

    let value = match codec {
        Codec::Bool => bits::decode_bool(data, role.invert),
        Codec::Masked(mask) => bits::decode_masked(data, mask),
        Codec::Unsigned(width) => numeric::decode_unsigned(data, width),
        Codec::Signed(width) => numeric::decode_signed(data, width),
        Codec::Percent => numeric::decode_percent(data),
        Codec::Angle => numeric::decode_angle(data),
        Codec::Float16 => float::decode_float16(data),
        Codec::Float32 => float::decode_float32(data),
        Codec::Text => text::decode_text(data),
    }?;

    Ok(match &role.scale {
        Some(range) if codec.is_numeric() => scale_decoded(value, range),
        _ => value,
    })
}

/// Encoded byte width of a datapoint type
///
/// # Errors
///
/// Returns an error for an unknown type string.
pub fn type_width(dpt_type: &str) -> Result<usize> {
    Ok(match resolve_type(dpt_type)? {
        Codec::Bool | Codec::Masked(_) | Codec::Percent | Codec::Angle => 1,
        Codec::Unsigned(width) | Codec::Signed(width) => width,
        Codec::Float16 => 2,
        Codec::Float32 => 4,
        Codec::Text => text::TEXT_WIDTH,
    })
}
