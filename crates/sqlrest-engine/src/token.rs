//! Reversible obfuscation of session identifiers.
//!
//! A token is the unpadded standard base64 encoding of an indicator byte
//! followed by the session GUID. The indicator carries the privacy flag in its
//! case (`a..y` private, `A..Y` public) plus a rotation offset derived from the
//! clock, which decoding ignores. Private payload bytes are XOR-folded with the
//! salt starting at salt offset one; public payloads are stored as-is.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::{STANDARD as BASE64, STANDARD_NO_PAD as BASE64_NO_PAD};
use thiserror::Error;

const ROTATIONS: u8 = 25;

/// Decoded form of a session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    /// Session GUID.
    pub guid: String,
    /// Whether the token was salted with the host name.
    pub private: bool,
}

/// Errors raised when a token cannot be decoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// The token text is empty or decodes to no bytes.
    #[error("session token is empty")]
    Empty,
    /// The token is not valid base64.
    #[error("session token is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The indicator byte is not an ASCII letter.
    #[error("session token has an invalid indicator byte {0:#04x}")]
    Indicator(u8),
    /// The payload does not decode to UTF-8, usually because of a wrong salt.
    #[error("session token payload is not valid UTF-8")]
    Utf8,
}

/// Encodes `guid` using a rotation derived from the current time.
#[must_use]
pub fn encode(private: bool, guid: &str, salt: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis());
    let rotation = millis
        .checked_rem(u128::from(ROTATIONS))
        .and_then(|offset| u8::try_from(offset).ok())
        .unwrap_or(0);
    encode_with_rotation(private, guid, salt, rotation)
}

/// Encodes `guid` with an explicit rotation offset.
///
/// Offsets beyond the rotation window wrap around.
#[must_use]
pub fn encode_with_rotation(private: bool, guid: &str, salt: &str, rotation: u8) -> String {
    let base = if private { b'a' } else { b'A' };
    let offset = rotation.checked_rem(ROTATIONS).unwrap_or(0);

    let mut bytes = Vec::with_capacity(guid.len().saturating_add(1));
    bytes.push(base.saturating_add(offset));
    bytes.extend_from_slice(guid.as_bytes());
    if private {
        fold_salt(&mut bytes, salt.as_bytes());
    }

    BASE64_NO_PAD.encode(bytes)
}

/// Decodes a token produced by [`encode`].
///
/// Missing `=` padding is restored before decoding.
///
/// # Errors
///
/// Returns [`TokenError`] when the token is not base64, carries an invalid
/// indicator, or does not decode to UTF-8.
pub fn decode(token: &str, salt: &str) -> Result<SessionToken, TokenError> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return Err(TokenError::Empty);
    }

    let mut padded = trimmed.to_owned();
    let remainder = padded.len() & 3;
    if remainder != 0 {
        padded.extend(std::iter::repeat_n('=', 4 - remainder));
    }

    let mut bytes = BASE64.decode(padded)?;
    let Some(&indicator) = bytes.first() else {
        return Err(TokenError::Empty);
    };

    let private = match indicator {
        b'a'..=b'z' => true,
        b'A'..=b'Z' => false,
        other => return Err(TokenError::Indicator(other)),
    };
    if private {
        fold_salt(&mut bytes, salt.as_bytes());
    }

    bytes.remove(0);
    let guid = String::from_utf8(bytes).map_err(|_| TokenError::Utf8)?;
    Ok(SessionToken { guid, private })
}

/// XORs every byte after the indicator with the salt, aligned so that the
/// byte at position `i` uses salt byte `i mod salt.len()`.
fn fold_salt(bytes: &mut [u8], salt: &[u8]) {
    if salt.is_empty() {
        return;
    }
    for (byte, key) in bytes.iter_mut().zip(salt.iter().cycle()).skip(1) {
        *byte ^= key;
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const SALT: &str = "db.example.com";

    #[rstest]
    #[case::private_aligned(true, "abcdefgh")]
    #[case::private_unaligned(true, "0f5c2a9e-41d2-4c77-a0b3-4d2d7f0e1c9b")]
    #[case::public_aligned(false, "abcdefgh")]
    #[case::public_unaligned(false, "guid-1")]
    #[case::private_empty(true, "")]
    fn round_trips_tokens(#[case] private: bool, #[case] guid: &str) {
        let token = encode(private, guid, SALT);
        assert!(!token.ends_with('='), "token must be unpadded: {token}");

        let decoded = decode(&token, SALT).expect("decode token");
        assert_eq!(decoded.guid, guid);
        assert_eq!(decoded.private, private);
    }

    #[test]
    fn round_trips_every_rotation() {
        for rotation in 0..ROTATIONS {
            for guid in ["a", "ab", "abc", "abcd"] {
                let token = encode_with_rotation(true, guid, SALT, rotation);
                let decoded = decode(&token, SALT).expect("decode rotated token");
                assert_eq!(decoded.guid, guid, "rotation {rotation}");
                assert!(decoded.private);
            }
        }
    }

    #[test]
    fn indicator_encodes_privacy_and_rotation() {
        let private = BASE64
            .decode(format!("{}==", encode_with_rotation(true, "x", SALT, 3)))
            .expect("base64");
        let public = BASE64
            .decode(format!("{}==", encode_with_rotation(false, "x", SALT, 3)))
            .expect("base64");
        assert_eq!(private.first(), Some(&b'd'));
        assert_eq!(public.first(), Some(&b'D'));
        assert_eq!(public.get(1), Some(&b'x'));
    }

    #[test]
    fn private_tokens_hide_the_guid() {
        let token = encode_with_rotation(true, "session-guid", SALT, 0);
        let raw = BASE64_NO_PAD.decode(&token).expect("base64");
        assert_ne!(raw.get(1..), Some(&b"session-guid"[..]));
    }

    #[test]
    fn wrong_salt_does_not_recover_private_guid() {
        let token = encode_with_rotation(true, "session-guid", SALT, 7);
        let decoded = decode(&token, "other.host");
        assert!(decoded.map_or(true, |token| token.guid != "session-guid"));
    }

    #[test]
    fn public_tokens_ignore_the_salt() {
        let token = encode_with_rotation(false, "session-guid", SALT, 7);
        let decoded = decode(&token, "other.host").expect("decode public token");
        assert_eq!(decoded.guid, "session-guid");
    }

    #[test]
    fn accepts_padded_tokens() {
        let token = format!("{}=", encode_with_rotation(false, "ab", SALT, 0));
        let decoded = decode(&token, SALT).expect("decode padded token");
        assert_eq!(decoded.guid, "ab");
    }

    #[rstest]
    #[case::empty("", TokenError::Empty)]
    #[case::whitespace("   ", TokenError::Empty)]
    #[case::digit_indicator("MWFi", TokenError::Indicator(b'1'))]
    fn rejects_malformed_tokens(#[case] token: &str, #[case] expected: TokenError) {
        assert_eq!(decode(token, SALT), Err(expected));
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(matches!(decode("!!!", SALT), Err(TokenError::Base64(_))));
    }
}
