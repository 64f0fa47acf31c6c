//! Ruby's packed signed integer.
//!
//! Counts, lengths, table indices, and `i`-tagged integer values all share
//! this encoding. The first byte classifies the value:
//!
//! - `0x00`: zero.
//! - `0x01..=0x04`: that many little-endian payload bytes, positive.
//! - `0xFC..=0xFF`: `256 - b` payload bytes, negative; each payload byte is
//!   stored complemented.
//! - `0x05..=0x7F`: the value `b - 5`, inline.
//! - `0x80..=0xFB`: a small negative value, inline.
//!
//! Payloads beyond 4 bytes are unrepresentable: Ruby's reader takes first
//! bytes 5..0x7F as inline values, and its writer dumps integers outside the
//! ±2³² band as bignums (which this decoder rejects).

use crate::cursor::Cursor;
use crate::types::Error;
use crate::types::Result;

/// Decodes one packed integer, advancing the cursor past it.
pub(crate) fn read(cursor: &mut Cursor<'_>) -> Result<i64> {
    let b = cursor.read_byte()?;
    // Zero must be classified before the inline rules: the positive inline
    // rule would read it as -5.
    if b == 0 {
        return Ok(0);
    }
    match b {
        1..=4 => {
            let mut value: i64 = 0;
            for i in 0..usize::from(b) {
                value |= i64::from(cursor.read_byte()?) << (8 * i);
            }
            Ok(value)
        }
        0xFC..=0xFF => {
            let n = usize::from(0xFF - b) + 1;
            let mut accum: i64 = 0;
            for i in 0..n {
                accum |= i64::from(0xFF - cursor.read_byte()?) << (8 * i);
            }
            Ok(-(accum + 1))
        }
        5..=0x7F => Ok(i64::from(b) - 5),
        _ => Ok(-(i64::from(b ^ 0xFF) + 1) + 5),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Error;

    /// Ruby's `w_long`, restricted to the wire-representable band.
    fn encode(value: i64) -> Vec<u8> {
        assert!((-(1i64 << 32)..(1i64 << 32)).contains(&value));
        let mut buf = Vec::new();
        if value == 0 {
            buf.push(0);
            return buf;
        }
        if 0 < value && value < 123 {
            buf.push(value as u8 + 5);
            return buf;
        }
        if -124 < value && value < 0 {
            buf.push((value - 5) as i8 as u8);
            return buf;
        }
        let mut bytes = [0u8; 4];
        let mut x = value;
        let mut len = 0;
        for (i, slot) in bytes.iter_mut().enumerate() {
            *slot = (x & 0xFF) as u8;
            x >>= 8;
            len = i + 1;
            if x == 0 || x == -1 {
                break;
            }
        }
        let count = if value < 0 { -(len as i64) as i8 as u8 } else { len as u8 };
        buf.push(count);
        buf.extend_from_slice(&bytes[..len]);
        buf
    }

    fn decode(buf: &[u8]) -> Result<(i64, usize)> {
        let mut cursor = Cursor::new(buf);
        let value = read(&mut cursor)?;
        Ok((value, cursor.pos()))
    }

    #[test]
    fn boundary_classes_roundtrip() -> Result<()> {
        let boundaries: &[i64] = &[
            0,
            1,
            -1,
            4,
            -4,
            5,
            -5,
            122,
            -122,
            123,
            -123,
            255,
            -255,
            256,
            -256,
            (1 << 16) - 1,
            -((1 << 16) - 1),
            1 << 16,
            (1 << 24) - 1,
            -((1 << 24) - 1),
            1 << 24,
            (1 << 31) - 1,
            -((1 << 31) - 1),
            1 << 31,
            -(1 << 31),
            (1 << 32) - 1,
            -((1 << 32) - 1),
            -(1 << 32),
        ];
        for &expected in boundaries {
            let buf = encode(expected);
            let (value, consumed) = decode(&buf)?;
            assert_eq!(value, expected, "roundtrip of {}", expected);
            assert_eq!(consumed, buf.len(), "length of {}", expected);
        }
        Ok(())
    }

    #[test]
    fn known_encodings() -> Result<()> {
        // Zero takes the length-first branch, not the inline rule.
        assert_eq!(decode(&[0x00])?, (0, 1));
        assert_eq!(decode(&[0x06])?, (1, 1));
        assert_eq!(decode(&[0x2F])?, (42, 1));
        assert_eq!(decode(&[0x7F])?, (122, 1));
        assert_eq!(decode(&[0xFA])?, (-1, 1));
        assert_eq!(decode(&[0x80])?, (-123, 1));
        assert_eq!(decode(&[0x01, 0xFF])?, (255, 2));
        assert_eq!(decode(&[0x02, 0x00, 0x01])?, (256, 3));
        assert_eq!(decode(&[0xFF, 0x00])?, (-256, 2));
        assert_eq!(decode(&[0xFC, 0x00, 0x00, 0x00, 0x00])?, (-(1 << 32), 5));
        Ok(())
    }

    #[test]
    fn truncated_payload() {
        assert!(matches!(decode(&[0x02, 0x01]), Err(Error::Incomplete)));
        assert!(matches!(decode(&[0xFC, 0x01, 0x02]), Err(Error::Incomplete)));
        assert!(matches!(decode(&[]), Err(Error::Incomplete)));
    }
}
