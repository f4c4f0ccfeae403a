//! Single-byte bit-field types (families 1, 2 and 3)
//!
//! Family 1 is the plain boolean (switch, enable, alarm); only the LSB
//! of the data byte carries information. Family 2 stacks a control bit
//! on the value bit, family 3 is the 4-bit dimming/blinds step code.
//! Families 2 and 3 travel as the low bits of one byte and are exposed
//! as raw `Unsigned` bit fields rather than split into their sub-bits.
//!
//! ## Format
//!
//! - Family 1: `0000 000v`
//! - Family 2: `0000 00cv` (c = control, v = value)
//! - Family 3: `0000 csss` (c = direction, sss = step code)

use crate::dpt::DptValue;
use crate::error::{KnxError, Result};

pub(super) fn encode_bool(value: &DptValue, invert: bool, buf: &mut [u8]) -> Result<usize> {
    let Some(v) = value.as_bool() else {
        return Err(KnxError::dpt_wrong_value_kind());
    };
    if buf.is_empty() {
        return Err(KnxError::buffer_too_small());
    }
    buf[0] = u8::from(v != invert);
    Ok(1)
}

pub(super) fn decode_bool(data: &[u8], invert: bool) -> Result<DptValue> {
    let Some(&byte) = data.first() else {
        return Err(KnxError::dpt_too_short());
    };
    // Only the LSB matters, mask out upper bits
    Ok(DptValue::Bool(((byte & 0x01) != 0) != invert))
}

pub(super) fn encode_masked(value: &DptValue, mask: u8, buf: &mut [u8]) -> Result<usize> {
    let DptValue::Unsigned(v) = value else {
        return Err(KnxError::dpt_wrong_value_kind());
    };
    if *v > u64::from(mask) {
        return Err(KnxError::dpt_value_out_of_range());
    }
    if buf.is_empty() {
        return Err(KnxError::buffer_too_small());
    }
    buf[0] = (*v as u8) & mask;
    Ok(1)
}

pub(super) fn decode_masked(data: &[u8], mask: u8) -> Result<DptValue> {
    let Some(&byte) = data.first() else {
        return Err(KnxError::dpt_too_short());
    };
    Ok(DptValue::Unsigned(u64::from(byte & mask)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_bool() {
        let mut buf = [0u8; 1];
        assert_eq!(
            encode_bool(&DptValue::Bool(true), false, &mut buf).unwrap(),
            1
        );
        assert_eq!(buf[0], 0x01);
        encode_bool(&DptValue::Bool(false), false, &mut buf).unwrap();
        assert_eq!(buf[0], 0x00);
    }

    #[test]
    fn test_encode_bool_inverted() {
        let mut buf = [0u8; 1];
        encode_bool(&DptValue::Bool(true), true, &mut buf).unwrap();
        assert_eq!(buf[0], 0x00);
        encode_bool(&DptValue::Bool(false), true, &mut buf).unwrap();
        assert_eq!(buf[0], 0x01);
    }

    #[test]
    fn test_decode_bool_ignores_upper_bits() {
        assert_eq!(decode_bool(&[0xFF], false).unwrap(), DptValue::Bool(true));
        assert_eq!(decode_bool(&[0xFE], false).unwrap(), DptValue::Bool(false));
    }

    #[test]
    fn test_decode_bool_inverted() {
        assert_eq!(decode_bool(&[0x00], true).unwrap(), DptValue::Bool(true));
        assert_eq!(decode_bool(&[0x01], true).unwrap(), DptValue::Bool(false));
    }

    #[test]
    fn test_bool_rejects_non_bool_values() {
        let mut buf = [0u8; 1];
        assert!(encode_bool(&DptValue::Unsigned(1), false, &mut buf).is_err());
        assert!(encode_bool(&DptValue::Float(1.0), false, &mut buf).is_err());
    }

    #[test]
    fn test_empty_input() {
        assert!(decode_bool(&[], false).is_err());
        assert!(decode_masked(&[], 0x0F).is_err());
    }

    #[test]
    fn test_masked_two_bit() {
        let mut buf = [0u8; 1];
        encode_masked(&DptValue::Unsigned(0x03), 0x03, &mut buf).unwrap();
        assert_eq!(buf[0], 0x03);
        assert!(encode_masked(&DptValue::Unsigned(0x04), 0x03, &mut buf).is_err());
        assert_eq!(
            decode_masked(&[0xFF], 0x03).unwrap(),
            DptValue::Unsigned(0x03)
        );
    }

    #[test]
    fn test_masked_four_bit_dimming_step() {
        // Dim up with step code 4
        let mut buf = [0u8; 1];
        encode_masked(&DptValue::Unsigned(0x0C), 0x0F, &mut buf).unwrap();
        assert_eq!(buf[0], 0x0C);
        assert_eq!(
            decode_masked(&[0x0C], 0x0F).unwrap(),
            DptValue::Unsigned(0x0C)
        );
    }
}
