//! Floating point types (families 9 and 14)
//!
//! Family 9 is the KNX 2-byte float used by most sensor values
//! (temperature, lux, humidity). Family 14 is a plain IEEE 754 binary32
//! in big-endian byte order.
//!
//! ## 2-byte float format
//!
//! ```text
//! MSB                        LSB
//! S E E E E M M M   M M M M M M M M
//! ```
//!
//! - S: sign of the 12-bit two's complement mantissa
//! - E: 4-bit exponent (power of two)
//! - M: mantissa low bits, value in hundredths
//!
//! `value = (mantissa << exponent) / 100`, giving a range of
//! -671088.64 to 670760.96 with resolution degrading as magnitude
//! grows. Values beyond that range saturate to `0x7FFF` and log an
//! error instead of failing the send.

use crate::dpt::{round_half_away, DptValue};
use crate::error::{KnxError, Result};
use crate::knx_log;

/// Largest mantissa of the 2-byte float
const F16_MANTISSA_MAX: f64 = 2047.0;
/// Smallest mantissa of the 2-byte float
const F16_MANTISSA_MIN: f64 = -2048.0;
/// Largest exponent of the 2-byte float
const F16_EXPONENT_MAX: u16 = 15;

pub(super) fn encode_float16(value: &DptValue, buf: &mut [u8]) -> Result<usize> {
    let Some(v) = value.as_f64() else {
        return Err(KnxError::dpt_wrong_value_kind());
    };
    if buf.len() < 2 {
        return Err(KnxError::buffer_too_small());
    }

    // Scale to hundredths, then halve until the mantissa fits
    let mut scaled = v * 100.0;
    let mut exponent = 0u16;
    let mut mantissa = round_half_away(scaled);
    while !(F16_MANTISSA_MIN..=F16_MANTISSA_MAX).contains(&mantissa) {
        if exponent == F16_EXPONENT_MAX {
            knx_log!(error, "value {} exceeds 2-byte float range, saturating", v);
            buf[0..2].copy_from_slice(&0x7FFFu16.to_be_bytes());
            return Ok(2);
        }
        exponent += 1;
        scaled /= 2.0;
        mantissa = round_half_away(scaled);
    }

    let m = mantissa as i32;
    let raw = if m < 0 {
        0x8000 | (exponent << 11) | ((2048 + m) as u16 & 0x07FF)
    } else {
        (exponent << 11) | m as u16
    };
    buf[0..2].copy_from_slice(&raw.to_be_bytes());
    Ok(2)
}

pub(super) fn decode_float16(data: &[u8]) -> Result<DptValue> {
    if data.len() < 2 {
        return Err(KnxError::dpt_too_short());
    }
    let raw = u16::from_be_bytes([data[0], data[1]]);
    let exponent = (raw >> 11) & 0x0F;
    let mut mantissa = i32::from(raw & 0x07FF);
    if raw & 0x8000 != 0 {
        mantissa -= 2048;
    }
    Ok(DptValue::Float(f64::from(mantissa << exponent) / 100.0))
}

pub(super) fn encode_float32(value: &DptValue, buf: &mut [u8]) -> Result<usize> {
    let Some(v) = value.as_f64() else {
        return Err(KnxError::dpt_wrong_value_kind());
    };
    if buf.len() < 4 {
        return Err(KnxError::buffer_too_small());
    }
    buf[0..4].copy_from_slice(&(v as f32).to_be_bytes());
    Ok(4)
}

pub(super) fn decode_float32(data: &[u8]) -> Result<DptValue> {
    if data.len() < 4 {
        return Err(KnxError::dpt_too_short());
    }
    let raw = f32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    Ok(DptValue::Float(f64::from(raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_float_eq(actual: f64, expected: f64, epsilon: f64) {
        let diff = if actual > expected {
            actual - expected
        } else {
            expected - actual
        };
        assert!(diff <= epsilon, "expected {expected}, got {actual}");
    }

    fn decoded_f64(data: &[u8]) -> f64 {
        match decode_float16(data).unwrap() {
            DptValue::Float(v) => v,
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn test_float16_known_values() {
        let mut buf = [0u8; 2];

        encode_float16(&DptValue::Float(-30.0), &mut buf).unwrap();
        assert_eq!(buf, [0x8A, 0x24]);
        assert_eq!(decoded_f64(&buf), -30.0);

        encode_float16(&DptValue::Float(21.6), &mut buf).unwrap();
        assert_eq!(buf, [0x0C, 0x38]);
        assert_eq!(decoded_f64(&buf), 21.6);

        encode_float16(&DptValue::Float(0.0), &mut buf).unwrap();
        assert_eq!(buf, [0x00, 0x00]);
        assert_eq!(decoded_f64(&buf), 0.0);
    }

    #[test]
    fn test_float16_positive_limit() {
        let mut buf = [0u8; 2];
        encode_float16(&DptValue::Float(670_760.96), &mut buf).unwrap();
        assert_eq!(buf, [0x7F, 0xFF]);
        assert_eq!(decoded_f64(&buf), 670_760.96);
    }

    #[test]
    fn test_float16_negative_limit() {
        let mut buf = [0u8; 2];
        encode_float16(&DptValue::Float(-671_088.64), &mut buf).unwrap();
        assert_eq!(buf, [0xF8, 0x00]);
        assert_eq!(decoded_f64(&buf), -671_088.64);
    }

    #[test]
    fn test_float16_boundary_round_trips() {
        let mut buf = [0u8; 2];
        for v in [0.0, 670_760.96, -273.0] {
            encode_float16(&DptValue::Float(v), &mut buf).unwrap();
            // Resolution is 0.16 at this exponent, allow quantization
            assert_float_eq(decoded_f64(&buf), v, 0.1);
        }
    }

    #[test]
    fn test_float16_exponent_grows_with_magnitude() {
        // 40.96 needs two halvings: mantissa 1024, exponent 2
        let mut buf = [0u8; 2];
        encode_float16(&DptValue::Float(40.96), &mut buf).unwrap();
        assert_eq!(buf, [0x14, 0x00]);
        assert_eq!(decoded_f64(&buf), 40.96);
    }

    #[test]
    fn test_float16_saturates_beyond_range() {
        let mut buf = [0u8; 2];
        encode_float16(&DptValue::Float(1.0e9), &mut buf).unwrap();
        assert_eq!(buf, [0x7F, 0xFF]);
        encode_float16(&DptValue::Float(-1.0e9), &mut buf).unwrap();
        assert_eq!(buf, [0x7F, 0xFF]);
    }

    #[test]
    fn test_float16_accepts_integer_kinds() {
        let mut buf = [0u8; 2];
        encode_float16(&DptValue::Unsigned(25), &mut buf).unwrap();
        assert_eq!(decoded_f64(&buf), 25.0);
        encode_float16(&DptValue::Signed(-25), &mut buf).unwrap();
        assert_eq!(decoded_f64(&buf), -25.0);
    }

    #[test]
    fn test_float16_rejects_bad_input() {
        let mut buf = [0u8; 2];
        assert!(encode_float16(&DptValue::Bool(true), &mut buf).is_err());
        assert!(encode_float16(&DptValue::Float(1.0), &mut [0u8; 1]).is_err());
        assert!(decode_float16(&[0x0C]).is_err());
    }

    #[test]
    fn test_float32_known_bytes() {
        let mut buf = [0u8; 4];
        encode_float32(&DptValue::Float(1.0), &mut buf).unwrap();
        assert_eq!(buf, [0x3F, 0x80, 0x00, 0x00]);
        assert_eq!(decode_float32(&buf).unwrap(), DptValue::Float(1.0));
    }

    #[test]
    fn test_float32_round_trip() {
        let mut buf = [0u8; 4];
        for v in [-60.5, 0.25, 1536.0] {
            encode_float32(&DptValue::Float(v), &mut buf).unwrap();
            assert_eq!(decode_float32(&buf).unwrap(), DptValue::Float(v));
        }
    }

    #[test]
    fn test_float32_too_short() {
        assert!(decode_float32(&[0x3F, 0x80, 0x00]).is_err());
    }
}
