use crate::{dex_err, error::DexError, Result};

/// Largest number of bytes a 32-bit LEB128 value can occupy.
pub const MAX_LEB128_SIZE: usize = 5;

#[inline]
pub fn decode_uleb128(data: &[u8], pos: &mut usize) -> Result<u32> {
    if *pos > data.len() {
        return dex_err!(TruncatedLeb128 { offset: *pos });
    }
    let mut cursor = &data[*pos..];
    let remaining = cursor.len();
    match leb128::read::unsigned(&mut cursor) {
        Ok(value) => {
            *pos += remaining - cursor.len();
            Ok(value as u32)
        }
        Err(_) => dex_err!(TruncatedLeb128 { offset: *pos }),
    }
}

#[inline]
pub fn decode_sleb128(data: &[u8], pos: &mut usize) -> Result<i32> {
    if *pos > data.len() {
        return dex_err!(TruncatedLeb128 { offset: *pos });
    }
    let mut cursor = &data[*pos..];
    let remaining = cursor.len();
    match leb128::read::signed(&mut cursor) {
        Ok(value) => {
            *pos += remaining - cursor.len();
            Ok(value as i32)
        }
        Err(_) => dex_err!(TruncatedLeb128 { offset: *pos }),
    }
}

/// The "plus one" variant reserves the encoded value 0 for "no index".
#[inline]
pub fn decode_uleb128p1(data: &[u8], pos: &mut usize) -> Result<i32> {
    Ok(decode_uleb128(data, pos)? as i32 - 1)
}

#[inline]
pub fn encode_uleb128(value: u32) -> ([u8; MAX_LEB128_SIZE], usize) {
    let mut buf = [0u8; MAX_LEB128_SIZE];
    let mut cursor = &mut buf[..];
    // A u32 always fits in five bytes, the writer cannot fail.
    let len = leb128::write::unsigned(&mut cursor, value as u64).unwrap();
    (buf, len)
}

#[inline]
pub fn encode_sleb128(value: i32) -> ([u8; MAX_LEB128_SIZE], usize) {
    let mut buf = [0u8; MAX_LEB128_SIZE];
    let mut cursor = &mut buf[..];
    let len = leb128::write::signed(&mut cursor, value as i64).unwrap();
    (buf, len)
}

#[inline]
pub fn encode_uleb128p1(value: i32) -> ([u8; MAX_LEB128_SIZE], usize) {
    encode_uleb128((value + 1) as u32)
}

/// Number of bytes `value` occupies once encoded.
#[inline]
pub fn uleb128_size(value: u32) -> usize {
    encode_uleb128(value).1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uleb128_round_trip() {
        for value in [0u32, 1, 0x7f, 0x80, 0x3fff, 0x4000, 0xffff, u32::MAX] {
            let (buf, len) = encode_uleb128(value);
            let mut pos = 0;
            assert_eq!(decode_uleb128(&buf[..len], &mut pos).unwrap(), value);
            assert_eq!(pos, len);
        }
    }

    #[test]
    fn sleb128_round_trip() {
        for value in [0i32, 1, -1, 63, -64, 64, -65, i32::MAX, i32::MIN] {
            let (buf, len) = encode_sleb128(value);
            let mut pos = 0;
            assert_eq!(decode_sleb128(&buf[..len], &mut pos).unwrap(), value);
            assert_eq!(pos, len);
        }
    }

    #[test]
    fn uleb128p1_reserves_zero() {
        let (buf, len) = encode_uleb128p1(-1);
        assert_eq!(&buf[..len], &[0]);
        let mut pos = 0;
        assert_eq!(decode_uleb128p1(&buf[..len], &mut pos).unwrap(), -1);
    }

    #[test]
    fn truncated_input_is_an_error() {
        let mut pos = 0;
        assert!(decode_uleb128(&[0x80, 0x80], &mut pos).is_err());
    }
}
