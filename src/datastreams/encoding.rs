//! Compact wire codec for the pathway propagation format: unsigned LEB128
//! varints for timestamps and fixed little-endian u64 for hashes.

use crate::error::EncodingError;

/// Appends `value` to `buf` as an unsigned LEB128 varint (at most 10 bytes).
pub fn encode_var_u64(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Reads an unsigned LEB128 varint from the front of `buf`, returning the
/// value and the remaining bytes.
pub fn decode_var_u64(buf: &[u8]) -> Result<(u64, &[u8]), EncodingError> {
    let mut value: u64 = 0;
    for (i, byte) in buf.iter().enumerate() {
        if i >= 10 || (i == 9 && *byte > 1) {
            return Err(EncodingError::Overflow);
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, &buf[i + 1..]));
        }
    }
    Err(EncodingError::Truncated)
}

pub fn encode_u64_le(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Reads a fixed 8-byte little-endian u64 from the front of `buf`.
pub fn decode_u64_le(buf: &[u8]) -> Result<(u64, &[u8]), EncodingError> {
    let slice = buf.get(..8).ok_or(EncodingError::Truncated)?;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(slice);
    Ok((u64::from_le_bytes(bytes), &buf[8..]))
}
