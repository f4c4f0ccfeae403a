//! Big-endian integer types of 1 to 8 bytes
//!
//! Covers the unsigned counter and status families (4, 5, 7, 10, 11,
//! 12, 17, 18, 19, 20, 26, 30, 206, 219, 222, 229, 230, 232, 240, 241,
//! 245, 249, 250, 251) and the signed ones (6, 8, 13, 15, 27, 29), all
//! packed most significant byte first. The composite families (date,
//! time, combined status) are carried as their raw big-endian integer;
//! splitting their sub-fields is left to the caller.
//!
//! The two scaled one-byte subtypes live here as well:
//!
//! - DPST-5-1: percent, `byte = round(value * 2.55)`
//! - DPST-5-3: angle in degrees, `byte = round(value / 1.4117647)`

use crate::dpt::{round_half_away, DptValue};
use crate::error::{KnxError, Result};

/// Degrees per count for DPST-5-3 (360 / 255)
const ANGLE_STEP: f64 = 1.411_764_7;

/// Integer value for an unsigned encode, rounding floats
fn to_unsigned(value: &DptValue) -> Result<u64> {
    match value {
        DptValue::Unsigned(v) => Ok(*v),
        DptValue::Signed(v) => u64::try_from(*v).map_err(|_| KnxError::dpt_value_out_of_range()),
        DptValue::Float(v) => {
            let rounded = round_half_away(*v);
            if rounded < 0.0 || rounded >= u64::MAX as f64 {
                Err(KnxError::dpt_value_out_of_range())
            } else {
                Ok(rounded as u64)
            }
        }
        DptValue::Bool(_) | DptValue::Text(_) => Err(KnxError::dpt_wrong_value_kind()),
    }
}

/// Integer value for a signed encode, rounding floats
fn to_signed(value: &DptValue) -> Result<i64> {
    match value {
        DptValue::Signed(v) => Ok(*v),
        DptValue::Unsigned(v) => i64::try_from(*v).map_err(|_| KnxError::dpt_value_out_of_range()),
        DptValue::Float(v) => {
            let rounded = round_half_away(*v);
            if rounded < i64::MIN as f64 || rounded >= i64::MAX as f64 {
                Err(KnxError::dpt_value_out_of_range())
            } else {
                Ok(rounded as i64)
            }
        }
        DptValue::Bool(_) | DptValue::Text(_) => Err(KnxError::dpt_wrong_value_kind()),
    }
}

/// Write the low `width` bytes of `raw`, most significant first
fn put_be(raw: u64, width: usize, buf: &mut [u8]) -> Result<usize> {
    if buf.len() < width {
        return Err(KnxError::buffer_too_small());
    }
    for (i, slot) in buf[..width].iter_mut().enumerate() {
        *slot = (raw >> (8 * (width - 1 - i))) as u8;
    }
    Ok(width)
}

/// Read `width` bytes, most significant first
fn get_be(data: &[u8], width: usize) -> Result<u64> {
    if data.len() < width {
        return Err(KnxError::dpt_too_short());
    }
    let mut raw = 0u64;
    for &byte in &data[..width] {
        raw = (raw << 8) | u64::from(byte);
    }
    Ok(raw)
}

pub(super) fn encode_unsigned(value: &DptValue, width: usize, buf: &mut [u8]) -> Result<usize> {
    let v = to_unsigned(value)?;
    if width < 8 && v >> (8 * width) != 0 {
        return Err(KnxError::dpt_value_out_of_range());
    }
    put_be(v, width, buf)
}

pub(super) fn decode_unsigned(data: &[u8], width: usize) -> Result<DptValue> {
    Ok(DptValue::Unsigned(get_be(data, width)?))
}

pub(super) fn encode_signed(value: &DptValue, width: usize, buf: &mut [u8]) -> Result<usize> {
    let v = to_signed(value)?;
    if width < 8 {
        let max = (1i64 << (8 * width - 1)) - 1;
        if v > max || v < -max - 1 {
            return Err(KnxError::dpt_value_out_of_range());
        }
    }
    put_be(v as u64, width, buf)
}

pub(super) fn decode_signed(data: &[u8], width: usize) -> Result<DptValue> {
    let raw = get_be(data, width)?;
    let shift = 64 - 8 * width as u32;
    Ok(DptValue::Signed(((raw << shift) as i64) >> shift))
}

pub(super) fn encode_percent(value: &DptValue, buf: &mut [u8]) -> Result<usize> {
    let Some(v) = value.as_f64() else {
        return Err(KnxError::dpt_wrong_value_kind());
    };
    let scaled = round_half_away(v * 2.55);
    if !(0.0..=255.0).contains(&scaled) {
        return Err(KnxError::dpt_value_out_of_range());
    }
    put_be(scaled as u64, 1, buf)
}

pub(super) fn decode_percent(data: &[u8]) -> Result<DptValue> {
    let raw = get_be(data, 1)?;
    Ok(DptValue::Unsigned(
        round_half_away(raw as f64 / 2.55) as u64
    ))
}

pub(super) fn encode_angle(value: &DptValue, buf: &mut [u8]) -> Result<usize> {
    let Some(v) = value.as_f64() else {
        return Err(KnxError::dpt_wrong_value_kind());
    };
    let scaled = round_half_away(v / ANGLE_STEP);
    if !(0.0..=255.0).contains(&scaled) {
        return Err(KnxError::dpt_value_out_of_range());
    }
    put_be(scaled as u64, 1, buf)
}

pub(super) fn decode_angle(data: &[u8]) -> Result<DptValue> {
    let raw = get_be(data, 1)?;
    Ok(DptValue::Unsigned(
        round_half_away(raw as f64 * ANGLE_STEP) as u64
    ))
}
