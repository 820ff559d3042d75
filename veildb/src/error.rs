//! Error types for `VeilDB` operations.

use std::fmt;

/// Main error type for `VeilDB` operations.
///
/// The variants follow the failure classes of the library: misuse is a
/// [`Error::Configuration`], tampering or a wrong key is always an
/// [`Error::InvalidCiphertext`], and neither is ever retried internally.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Programmer error: unregistered field, type mismatch, bad index or
    /// primary-key setup. Raised before any cryptographic work.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A primitive failed or is unavailable (RNG failure, bad parameters).
    #[error("cryptographic operation failed: {0}")]
    CryptoOperation(String),

    /// Header mismatch, undersized payload, tag or checksum failure.
    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    /// The row is missing a registered field.
    #[error("missing field in row: {0}")]
    MissingField(String),

    /// Key provider operation failed
    #[error("key provider error: {0}")]
    KeyProvider(#[from] KeyProviderError),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` for failures that signal tampering or a wrong key.
    #[must_use]
    pub const fn is_invalid_ciphertext(&self) -> bool {
        matches!(self, Self::InvalidCiphertext(_))
    }
}

/// Errors specific to key provider operations.
#[derive(Debug)]
pub enum KeyProviderError {
    /// No key is available for the requested source
    KeyNotFound(String),

    /// The stored key is not a supported 32-byte encoding
    InvalidKey(String),

    /// I/O operation failed
    Io(std::io::Error),
}

impl fmt::Display for KeyProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyNotFound(source) => write!(f, "key not found: {source}"),
            Self::InvalidKey(msg) => write!(f, "invalid key: {msg}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for KeyProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for KeyProviderError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidCiphertext("header mismatch".to_string());
        assert_eq!(err.to_string(), "invalid ciphertext: header mismatch");
        assert!(err.is_invalid_ciphertext());

        let err = Error::MissingField("ssn".to_string());
        assert_eq!(err.to_string(), "missing field in row: ssn");
        assert!(!err.is_invalid_ciphertext());
    }

    #[test]
    fn test_key_provider_error_conversion() {
        let err: Error = KeyProviderError::KeyNotFound("tenant_a".to_string()).into();
        assert_eq!(err.to_string(), "key provider error: key not found: tenant_a");
    }
}
