//! 14-byte character string (family 16)
//!
//! A fixed 14-byte field of Latin-1 characters, right-padded with zero
//! bytes. Decoding stops at the first NUL or at the end of the input,
//! so shorter payloads are accepted. Characters outside Latin-1 have no
//! representation and encode as `?`.

use crate::dpt::DptValue;
use crate::error::{KnxError, Result};

/// Wire width of a family 16 string
pub(super) const TEXT_WIDTH: usize = 14;

pub(super) fn encode_text(value: &DptValue, buf: &mut [u8]) -> Result<usize> {
    let Some(s) = value.as_text() else {
        return Err(KnxError::dpt_wrong_value_kind());
    };
    if buf.len() < TEXT_WIDTH {
        return Err(KnxError::buffer_too_small());
    }
    let mut len = 0;
    for c in s.chars().take(TEXT_WIDTH) {
        let code = u32::from(c);
        buf[len] = if code <= 0xFF { code as u8 } else { b'?' };
        len += 1;
    }
    buf[len..TEXT_WIDTH].fill(0);
    Ok(TEXT_WIDTH)
}

pub(super) fn decode_text(data: &[u8]) -> Result<DptValue> {
    let mut out = heapless::String::new();
    for &byte in data.iter().take(TEXT_WIDTH) {
        if byte == 0 {
            break;
        }
        // 14 Latin-1 chars fit the string even when all go to 2-byte UTF-8
        let _ = out.push(char::from(byte));
    }
    Ok(DptValue::Text(out))
}
