//! Unsigned LEB128 integers: 7 data bits per byte, least significant group
//! first, high bit set on every byte except the last.

use bytes::BufMut;
use unsigned_varint::{decode, encode};

use crate::error::ProtocolError;

/// Append the encoding of `value` to `buf`.
pub fn put(buf: &mut impl BufMut, value: u64) {
    let mut scratch = encode::u64_buffer();
    buf.put_slice(encode::u64(value, &mut scratch));
}

/// Decode one varint from the start of `bytes`.
///
/// Returns the value and the number of bytes consumed. Offsets in errors are
/// relative to `bytes`. Encodings padded with trailing zero groups are
/// accepted; decoding stops at the first byte without the continuation bit.
pub fn decode(bytes: &[u8]) -> Result<(u64, usize), ProtocolError> {
    match decode::u64(bytes) {
        Ok((value, rest)) => Ok((value, bytes.len() - rest.len())),
        Err(decode::Error::NotMinimal) => Ok(padded(bytes)),
        Err(decode::Error::Insufficient) => Err(ProtocolError::UnterminatedVarint { offset: 0 }),
        Err(decode::Error::Overflow) => Err(ProtocolError::VarintOverflow { offset: 0 }),
        Err(_) => Err(ProtocolError::InvalidVarint { offset: 0 }),
    }
}

/// Decode a terminated encoding that ends in a zero group, which the strict
/// decoder refuses. Only called once the terminator is known to lie within
/// ten bytes.
fn padded(bytes: &[u8]) -> (u64, usize) {
    let mut value = 0u64;
    for (i, &b) in bytes.iter().enumerate() {
        value |= u64::from(b & 0x7F) << (7 * i);
        if b & 0x80 == 0 {
            return (value, i + 1);
        }
    }
    (value, bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        put(&mut out, value);
        out
    }

    fn expected_len(n: u64) -> usize {
        let bits = 64 - n.leading_zeros() as usize;
        bits.div_ceil(7).max(1)
    }

    #[test]
    fn test_known_encodings() {
        assert_eq!(encode(0), vec![0x00]);
        assert_eq!(encode(1), vec![0x01]);
        assert_eq!(encode(127), vec![0x7F]);
        assert_eq!(encode(128), vec![0x80, 0x01]);
        assert_eq!(encode(0x3FFF), vec![0xFF, 0x7F]);
        assert_eq!(encode(165), vec![0xA5, 0x01]);
    }

    #[test]
    fn test_decode_length_matches_bit_length() {
        let samples = [
            0u64,
            1,
            127,
            128,
            300,
            0x3FFF,
            0x4000,
            100_180,
            1_801_393_098_134,
            u32::MAX as u64,
            u64::MAX >> 1,
            u64::MAX,
        ];
        for n in samples {
            let bytes = encode(n);
            assert_eq!(bytes.len(), expected_len(n), "length for {n}");
            assert_eq!(decode(&bytes).unwrap(), (n, bytes.len()), "value {n}");
        }
    }

    #[test]
    fn test_decode_stops_at_terminator() {
        // Two varints back to back: 992 then 5.
        let bytes = [0xE0, 0x07, 0x05];
        assert_eq!(decode(&bytes).unwrap(), (992, 2));
        assert_eq!(decode(&bytes[2..]).unwrap(), (5, 1));
    }

    #[test]
    fn test_unterminated_is_an_error() {
        assert_eq!(
            decode(&[0x80, 0x80]),
            Err(ProtocolError::UnterminatedVarint { offset: 0 })
        );
        assert_eq!(
            decode(&[]),
            Err(ProtocolError::UnterminatedVarint { offset: 0 })
        );
    }

    #[test]
    fn test_padded_encodings() {
        assert_eq!(decode(&[0x80, 0x00]).unwrap(), (0, 2));
        assert_eq!(decode(&[0x81, 0x80, 0x00, 0x07]).unwrap(), (1, 3));
        assert_eq!(decode(&[0xE0, 0x87, 0x80, 0x00]).unwrap(), (992, 4));
    }

    #[test]
    fn test_overflow_is_an_error() {
        let mut bytes = vec![0xFF; 10];
        bytes.push(0x01);
        assert_eq!(
            decode(&bytes),
            Err(ProtocolError::VarintOverflow { offset: 0 })
        );
    }
}
