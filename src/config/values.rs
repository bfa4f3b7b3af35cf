//! # Value Codec Primitives
//!
//! Binary encoding of the scalar value families stored by the
//! configuration store. Every encoded value must be bit-stable across
//! versions: readers and writers agree on the format purely through the
//! key's family, with no external schema.
//!
//! ## String Values
//!
//! ```text
//! null:      0x00                                  (1 byte)
//! non-null:  0x01 | length: u32 BE | UTF-16BE bytes (length + 5 bytes)
//! ```
//!
//! The length counts the UTF-16BE payload bytes, not characters. No byte
//! order mark is written or accepted.
//!
//! ## Integer Values
//!
//! Four bytes, big-endian, two's-complement.
//!
//! ## Failure
//!
//! All decoders bounds-check before reading; malformed input fails with
//! the offending offset in the message. Callers add the key context.

use eyre::{bail, ensure, Result};

const NULL_TAG: u8 = 0;
const PRESENT_TAG: u8 = 1;

/// Appends a string value to `buf`.
pub fn append_string_value(buf: &mut Vec<u8>, value: Option<&str>) {
    match value {
        None => buf.push(NULL_TAG),
        Some(text) => {
            let payload: Vec<u8> = text
                .encode_utf16()
                .flat_map(|unit| unit.to_be_bytes())
                .collect();

            buf.push(PRESENT_TAG);
            buf.extend((payload.len() as u32).to_be_bytes());
            buf.extend(payload);
        }
    }
}

/// Encodes a string value into a fresh buffer.
pub fn encode_string_value(value: Option<&str>) -> Vec<u8> {
    let mut buf = Vec::new();
    append_string_value(&mut buf, value);
    buf
}

/// Decodes the string value starting at `start`.
pub fn decode_string_value(raw: &[u8], start: usize) -> Result<Option<String>> {
    ensure!(
        start < raw.len(),
        "unexpected end of data reading string tag at offset {}",
        start
    );

    match raw[start] {
        NULL_TAG => Ok(None),
        PRESENT_TAG => {
            let length = decode_int_value(raw, start + 1)? as usize;
            let payload_start = start + 5;
            ensure!(
                payload_start + length <= raw.len(),
                "unexpected end of data reading string payload at offset {}",
                payload_start
            );
            ensure!(
                length % 2 == 0,
                "odd UTF-16 payload length {} at offset {}",
                length,
                payload_start
            );

            let units: Vec<u16> = raw[payload_start..payload_start + length]
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();

            let text = String::from_utf16(&units).map_err(|e| {
                eyre::eyre!("invalid UTF-16 payload at offset {}: {}", payload_start, e)
            })?;
            Ok(Some(text))
        }
        tag => bail!("invalid string tag {:#04x} at offset {}", tag, start),
    }
}

/// The on-wire size of the string value starting at `start`: 1 for null,
/// payload length + 5 otherwise.
pub fn string_value_size(raw: &[u8], start: usize) -> Result<usize> {
    ensure!(
        start < raw.len(),
        "unexpected end of data reading string tag at offset {}",
        start
    );

    match raw[start] {
        NULL_TAG => Ok(1),
        PRESENT_TAG => Ok(decode_int_value(raw, start + 1)? as usize + 5),
        tag => bail!("invalid string tag {:#04x} at offset {}", tag, start),
    }
}

/// Appends a big-endian i32 to `buf`.
pub fn append_int_value(buf: &mut Vec<u8>, value: i32) {
    buf.extend(value.to_be_bytes());
}

/// Encodes a big-endian i32 into a fresh buffer.
pub fn encode_int_value(value: i32) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// Decodes the big-endian i32 starting at `start`.
pub fn decode_int_value(raw: &[u8], start: usize) -> Result<i32> {
    ensure!(
        start + 4 <= raw.len(),
        "unexpected end of data reading integer at offset {}",
        start
    );

    Ok(i32::from_be_bytes([
        raw[start],
        raw[start + 1],
        raw[start + 2],
        raw[start + 3],
    ]))
}

/// Reads a string value and advances `pos` past it.
pub fn take_string_value(raw: &[u8], pos: &mut usize) -> Result<Option<String>> {
    let value = decode_string_value(raw, *pos)?;
    *pos += string_value_size(raw, *pos)?;
    Ok(value)
}

/// Reads a big-endian i32 and advances `pos` past it.
pub fn take_int_value(raw: &[u8], pos: &mut usize) -> Result<i32> {
    let value = decode_int_value(raw, *pos)?;
    *pos += 4;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_string_is_one_byte() {
        let encoded = encode_string_value(None);
        assert_eq!(encoded, vec![0]);
        assert_eq!(decode_string_value(&encoded, 0).unwrap(), None);
        assert_eq!(string_value_size(&encoded, 0).unwrap(), 1);
    }

    #[test]
    fn string_roundtrip_preserves_content() {
        for text in ["", "config", "yyyy-MM-dd HH:mm:ss", "uberraschung", "日本語"] {
            let encoded = encode_string_value(Some(text));
            assert_eq!(
                decode_string_value(&encoded, 0).unwrap().as_deref(),
                Some(text)
            );
        }
    }

    #[test]
    fn string_size_accounting_matches_utf16_length() {
        let text = "cluster";
        let encoded = encode_string_value(Some(text));

        let utf16_len = text.encode_utf16().count() * 2;
        assert_eq!(encoded.len(), utf16_len + 5);
        assert_eq!(string_value_size(&encoded, 0).unwrap(), utf16_len + 5);

        // Supplementary-plane characters take two UTF-16 units.
        let clef = "\u{1D11E}";
        let encoded = encode_string_value(Some(clef));
        assert_eq!(string_value_size(&encoded, 0).unwrap(), 4 + 5);
    }

    #[test]
    fn string_encoding_is_utf16be_without_bom() {
        let encoded = encode_string_value(Some("A"));
        assert_eq!(encoded, vec![1, 0, 0, 0, 2, 0x00, 0x41]);
    }

    #[test]
    fn string_decode_at_offset() {
        let mut buf = vec![0xaa, 0xbb];
        append_string_value(&mut buf, Some("x"));
        assert_eq!(decode_string_value(&buf, 2).unwrap().as_deref(), Some("x"));
    }

    #[test]
    fn truncated_string_fails_with_offset() {
        let mut encoded = encode_string_value(Some("config"));
        encoded.truncate(7);

        let err = decode_string_value(&encoded, 0).unwrap_err();
        assert!(err.to_string().contains("offset 5"));
    }

    #[test]
    fn invalid_tag_fails() {
        let err = decode_string_value(&[7], 0).unwrap_err();
        assert!(err.to_string().contains("invalid string tag"));
    }

    #[test]
    fn empty_input_fails() {
        assert!(decode_string_value(&[], 0).is_err());
        assert!(decode_int_value(&[0, 1], 0).is_err());
    }

    #[test]
    fn int_roundtrip_is_big_endian() {
        for value in [0, 1, -1, 23, i32::MIN, i32::MAX] {
            let encoded = encode_int_value(value);
            assert_eq!(decode_int_value(&encoded, 0).unwrap(), value);
        }

        assert_eq!(encode_int_value(1), vec![0, 0, 0, 1]);
        assert_eq!(encode_int_value(-1), vec![0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn take_helpers_advance_position() {
        let mut buf = Vec::new();
        append_int_value(&mut buf, 42);
        append_string_value(&mut buf, Some("ab"));
        append_string_value(&mut buf, None);
        append_int_value(&mut buf, -7);

        let mut pos = 0;
        assert_eq!(take_int_value(&buf, &mut pos).unwrap(), 42);
        assert_eq!(
            take_string_value(&buf, &mut pos).unwrap().as_deref(),
            Some("ab")
        );
        assert_eq!(take_string_value(&buf, &mut pos).unwrap(), None);
        assert_eq!(take_int_value(&buf, &mut pos).unwrap(), -7);
        assert_eq!(pos, buf.len());
    }
}
