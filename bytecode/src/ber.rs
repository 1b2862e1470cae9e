//! BER variable-length unsigned integers.
//!
//! Each byte carries 7 payload bits; the high bit is set on every byte
//! except the last. Groups are written most-significant first, so `128`
//! encodes as `[0x81, 0x00]`.

use crate::DecodeError;

/// Longest encoding of a `u64` (64 bits / 7 bits per byte, rounded up).
pub const MAX_LEN: usize = 10;

/// Append the BER encoding of `value` to `buf`.
pub fn write_uint(buf: &mut Vec<u8>, value: u64) {
    let len = uint_len(value);
    for i in (0..len).rev() {
        let group = ((value >> (7 * i)) & 0x7F) as u8;
        if i == 0 {
            buf.push(group);
        } else {
            buf.push(group | 0x80);
        }
    }
}

/// Number of bytes [`write_uint`] will produce for `value`.
pub fn uint_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Decode one BER integer starting at `*pos`, advancing `pos` past it.
pub fn read_uint(bytes: &[u8], pos: &mut usize) -> Result<u64, DecodeError> {
    let start = *pos;
    let mut value: u64 = 0;
    loop {
        let Some(&byte) = bytes.get(*pos) else {
            return Err(DecodeError::Truncated { offset: start });
        };
        *pos += 1;
        if value > (u64::MAX >> 7) {
            return Err(DecodeError::Overlong { offset: start });
        }
        value = (value << 7) | u64::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        if *pos - start >= MAX_LEN {
            return Err(DecodeError::Overlong { offset: start });
        }
    }
}

/// Append a BER length followed by the raw bytes.
pub fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_uint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Decode a length-prefixed byte string starting at `*pos`.
pub fn read_bytes<'a>(
    bytes: &'a [u8],
    pos: &mut usize,
) -> Result<&'a [u8], DecodeError> {
    let start = *pos;
    let len = read_uint(bytes, pos)?;
    let len = usize::try_from(len)
        .map_err(|_| DecodeError::Truncated { offset: start })?;
    let end = pos
        .checked_add(len)
        .filter(|end| *end <= bytes.len())
        .ok_or(DecodeError::Truncated { offset: start })?;
    let payload = &bytes[*pos..end];
    *pos = end;
    Ok(payload)
}

/// Zigzag-encode a signed value so small magnitudes stay short.
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        write_uint(&mut buf, value);
        buf
    }

    #[test]
    fn boundary_values() {
        assert_eq!(encode(0), vec![0x00]);
        assert_eq!(encode(127), vec![0x7F]);
        assert_eq!(encode(128), vec![0x81, 0x00]);
        assert_eq!(encode(16383), vec![0xFF, 0x7F]);
        assert_eq!(encode(16384), vec![0x81, 0x80, 0x00]);
    }

    #[test]
    fn boundary_round_trip() {
        for value in [0, 1, 127, 128, 16383, 16384, u32::MAX as u64, u64::MAX] {
            let buf = encode(value);
            assert_eq!(buf.len(), uint_len(value));
            let mut pos = 0;
            assert_eq!(read_uint(&buf, &mut pos).unwrap(), value);
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn truncated_varint() {
        let mut pos = 0;
        assert_eq!(
            read_uint(&[0x81], &mut pos),
            Err(DecodeError::Truncated { offset: 0 })
        );
    }

    #[test]
    fn overlong_varint() {
        let bytes = [0xFF; 11];
        let mut pos = 0;
        assert!(matches!(
            read_uint(&bytes, &mut pos),
            Err(DecodeError::Overlong { .. })
        ));
    }

    #[test]
    fn byte_string_bounds() {
        let mut buf = Vec::new();
        write_bytes(&mut buf, b"puts");
        let mut pos = 0;
        assert_eq!(read_bytes(&buf, &mut pos).unwrap(), b"puts");
        assert_eq!(pos, 5);

        let mut pos = 0;
        assert!(read_bytes(&buf[..3], &mut pos).is_err());
    }

    #[test]
    fn zigzag_round_trip() {
        for v in [-1000, -1, 0, 1, 1000, i64::MAX, i64::MIN] {
            assert_eq!(zigzag_decode(zigzag_encode(v)), v);
        }
    }
}
