//! Ciphertext token framing.
//!
//! Every symmetric ciphertext is serialized as:
//! ```text
//! [magic:5 ASCII bytes][base64url-nopad(nonce || tag || payload)]
//! ```
//! The magic header names the backend (and its version). The field order
//! inside the base64 body is fixed per backend.

use crate::error::Error;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

/// Length of the ASCII magic header.
pub const MAGIC_HEADER_SIZE: usize = 5;

/// A 5-byte ASCII magic header.
pub type MagicHeader = [u8; MAGIC_HEADER_SIZE];

/// Serializes a raw ciphertext body under the given magic header.
#[must_use]
pub fn encode_token(magic: &MagicHeader, body: &[u8]) -> String {
    let mut token = String::with_capacity(MAGIC_HEADER_SIZE + body.len().div_ceil(3) * 4);
    token.extend(magic.iter().copied().map(char::from));
    URL_SAFE_NO_PAD.encode_string(body, &mut token);
    token
}

/// Returns the magic header prefix of a token, if the token is long enough.
#[must_use]
pub fn token_header(token: &str) -> Option<&[u8]> {
    token.as_bytes().get(..MAGIC_HEADER_SIZE)
}

/// Checks the magic header and decodes the body of a token.
///
/// The header is compared before anything else is parsed so that a token
/// from another backend is rejected without attempting decryption.
///
/// # Errors
///
/// Returns `Error::InvalidCiphertext` on header mismatch, invalid base64, or
/// a body shorter than `min_body_len`.
pub fn decode_token(
    magic: &MagicHeader,
    token: &str,
    min_body_len: usize,
) -> Result<Vec<u8>, Error> {
    match token_header(token) {
        Some(header) if header == magic => {}
        _ => {
            return Err(Error::InvalidCiphertext(
                "magic header does not match the active backend".to_string(),
            ))
        }
    }

    let body = URL_SAFE_NO_PAD
        .decode(&token.as_bytes()[MAGIC_HEADER_SIZE..])
        .map_err(|_| {
            Error::InvalidCiphertext("ciphertext body is not valid base64url".to_string())
        })?;

    if body.len() < min_body_len {
        return Err(Error::InvalidCiphertext(format!(
            "ciphertext too short: {} bytes (minimum {min_body_len})",
            body.len()
        )));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: &MagicHeader = b"test:";

    #[test]
    fn test_token_round_trip() {
        let body = vec![1, 2, 3, 4, 5, 250, 251, 252];
        let token = encode_token(MAGIC, &body);
        assert!(token.starts_with("test:"));
        assert_eq!(decode_token(MAGIC, &token, 8).unwrap(), body);
    }

    #[test]
    fn test_token_is_url_safe() {
        let token = encode_token(MAGIC, &[0xFB, 0xFF, 0xBF]);
        assert!(!token[MAGIC_HEADER_SIZE..].contains(['+', '/', '=']));
    }

    #[test]
    fn test_header_mismatch() {
        let token = encode_token(b"othr:", &[0u8; 16]);
        let result = decode_token(MAGIC, &token, 0);
        assert!(matches!(result, Err(Error::InvalidCiphertext(_))));
    }

    #[test]
    fn test_short_token() {
        assert!(matches!(decode_token(MAGIC, "tes", 0), Err(Error::InvalidCiphertext(_))));
        let token = encode_token(MAGIC, &[0u8; 4]);
        assert!(matches!(decode_token(MAGIC, &token, 5), Err(Error::InvalidCiphertext(_))));
    }

    #[test]
    fn test_invalid_base64() {
        let result = decode_token(MAGIC, "test:***", 0);
        assert!(matches!(result, Err(Error::InvalidCiphertext(_))));
    }

    #[test]
    fn test_token_header() {
        assert_eq!(token_header("nacl:abc"), Some(&b"nacl:"[..]));
        assert_eq!(token_header("nac"), None);
    }
}
