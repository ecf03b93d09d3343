//! Response text recovery.
//!
//! Raw frames can carry artifacts of the transport path: a two-byte non-data
//! prefix, an echoed command or stray terminator ahead of the real answer, and
//! trailing whitespace. [`normalize_response`] strips them heuristically. It is
//! not a parser; it only knows the shapes seen on the wire.

use super::TERMINATOR;
use crate::error::{LinkError, LinkResult};

/// Decode a raw frame as ASCII.
///
/// Frames are only reinterpreted as text here; any byte above 0x7F is reported
/// with its offset instead of being replaced.
pub fn decode_frame(frame: &[u8]) -> LinkResult<String> {
    match frame.iter().position(|b| !b.is_ascii()) {
        Some(idx) => Err(LinkError::Encoding(format!(
            "byte 0x{:02X} at offset {} is not ASCII",
            frame[idx], idx
        ))),
        None => Ok(frame.iter().map(|&b| char::from(b)).collect()),
    }
}

/// Recover the instrument's answer from decoded frame text.
///
/// - fewer than three characters: returned trimmed
/// - leading NUL: returned verbatim (the instrument's "no data" sentinel)
/// - otherwise the text is trimmed, a two-character prefix is dropped unless
///   both characters are hex digits, and if at least two characters follow the
///   last carriage return only that trailing segment (trimmed) is kept
pub fn normalize_response(raw: &str) -> String {
    if raw.chars().count() < 3 {
        return raw.trim().to_string();
    }
    if raw.starts_with('\0') {
        return raw.to_string();
    }

    let trimmed = strip_non_hex_prefix(raw.trim());
    let terminator = char::from(TERMINATOR);

    match trimmed.rfind(terminator) {
        Some(idx) => {
            let tail = &trimmed[idx + terminator.len_utf8()..];
            if tail.chars().count() > 1 {
                tail.trim().to_string()
            } else {
                trimmed.to_string()
            }
        }
        None => trimmed.to_string(),
    }
}

fn strip_non_hex_prefix(text: &str) -> &str {
    let mut chars = text.char_indices();
    let (Some((_, first)), Some((_, second)), Some((third, _))) =
        (chars.next(), chars.next(), chars.next())
    else {
        return text;
    };
    if first == '\0' || (first.is_ascii_hexdigit() && second.is_ascii_hexdigit()) {
        text
    } else {
        &text[third..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nul_sentinel_is_untouched() {
        assert_eq!(normalize_response("\0XY"), "\0XY");
        assert_eq!(normalize_response("\0XY \r\n"), "\0XY \r\n");
    }

    #[test]
    fn test_short_input_is_trimmed() {
        assert_eq!(normalize_response("1\r"), "1");
        assert_eq!(normalize_response(" 0"), "0");
        assert_eq!(normalize_response(""), "");
    }

    #[test]
    fn test_non_hex_prefix_is_stripped() {
        assert_eq!(normalize_response("XY*IDN TSL-570\r"), "*IDN TSL-570");
        assert_eq!(normalize_response("\u{1}\u{2}1550.000\r"), "1550.000");
    }

    #[test]
    fn test_hex_prefix_is_payload() {
        assert_eq!(normalize_response("1550.000\r"), "1550.000");
        assert_eq!(normalize_response("0A3F"), "0A3F");
        assert_eq!(normalize_response("  42\r\n"), "42");
        // 'A' and 'B' are hex digits, so this prefix is kept
        assert_eq!(normalize_response("AB*IDN TSL-570\r"), "AB*IDN TSL-570");
    }

    #[test]
    fn test_keeps_segment_after_last_terminator() {
        assert_eq!(normalize_response("12WAV?\r1515.000\r\n"), "1515.000");
        assert_eq!(normalize_response("00\r\r  3  "), "3");
    }

    #[test]
    fn test_single_trailing_character_keeps_whole_text() {
        // only one character after the terminator: not enough to be an answer
        assert_eq!(normalize_response("12AB\rX"), "12AB\rX");
    }

    #[test]
    fn test_short_after_trim_skips_prefix_strip() {
        assert_eq!(normalize_response("  ZZ  "), "ZZ");
    }

    #[test]
    fn test_decode_frame() {
        assert_eq!(decode_frame(b"TSL-570\r").unwrap(), "TSL-570\r");
        let err = decode_frame(b"OK\xFF").unwrap_err();
        assert!(matches!(err, LinkError::Encoding(_)));
        assert!(err.to_string().contains("offset 2"));
    }
}
