//! Outbound command encoding.
//!
//! Every command on the wire is 7-bit ASCII ending in exactly one carriage
//! return. Callers may pass commands with or without the terminator; anything
//! after an embedded terminator is dropped rather than sent as a second command.

use super::TERMINATOR;
use crate::error::{LinkError, LinkResult};
use bytes::{BufMut, Bytes, BytesMut};

/// Normalize a command to its wire form.
///
/// # Errors
/// - [`LinkError::InvalidCommand`] if the terminator is the first character
/// - [`LinkError::Encoding`] if the payload contains non-ASCII characters
pub fn encode_command(command: &str) -> LinkResult<Bytes> {
    let terminator = char::from(TERMINATOR);

    let payload = match command.find(terminator) {
        Some(0) => {
            return Err(LinkError::InvalidCommand(
                "terminator cannot be the first character".to_string(),
            ))
        }
        Some(idx) => &command[..idx],
        None => command,
    };

    if let Some((idx, ch)) = payload.char_indices().find(|(_, c)| !c.is_ascii()) {
        return Err(LinkError::Encoding(format!(
            "non-ASCII character {:?} at byte {} in command {:?}",
            ch, idx, payload
        )));
    }

    let mut wire = BytesMut::with_capacity(payload.len() + 1);
    wire.put_slice(payload.as_bytes());
    wire.put_u8(TERMINATOR);
    Ok(wire.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_single_terminator() {
        for cmd in ["*IDN?", "WAV 1515.0", "TN", "a", ""] {
            let wire = encode_command(cmd).unwrap();
            assert!(wire.starts_with(cmd.as_bytes()));
            assert_eq!(wire.len(), cmd.len() + 1);
            assert_eq!(wire.last(), Some(&b'\r'));
            assert_eq!(wire.iter().filter(|&&b| b == b'\r').count(), 1);
        }
    }

    #[test]
    fn test_leading_terminator_is_rejected() {
        for cmd in ["\r", "\rPOW?", "\r\r"] {
            assert!(matches!(
                encode_command(cmd),
                Err(LinkError::InvalidCommand(_))
            ));
        }
    }

    #[test]
    fn test_truncates_at_first_terminator() {
        assert_eq!(&encode_command("POW?\rWAV?\r").unwrap()[..], b"POW?\r");
        assert_eq!(&encode_command("SS1575.0\r\r").unwrap()[..], b"SS1575.0\r");
        assert_eq!(&encode_command("TA\r").unwrap()[..], b"TA\r");
    }

    #[test]
    fn test_non_ascii_is_rejected() {
        let err = encode_command("WAV 1550µm").unwrap_err();
        assert!(matches!(err, LinkError::Encoding(_)));
        assert!(err.to_string().contains("byte 8"));
    }

    #[test]
    fn test_non_ascii_after_terminator_is_discarded() {
        assert_eq!(&encode_command("POW?\rµ").unwrap()[..], b"POW?\r");
    }
}
