//! Symmetric key material.

use crate::error::Error;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use secrecy::{ExposeSecret, SecretVec};
use std::fmt;

/// Size of every symmetric key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// A 256-bit symmetric key.
///
/// The bytes live in a [`SecretVec`] and are overwritten when the key is
/// dropped. Zeroing is best-effort: copies made by the allocator or by
/// primitives that take the key by value are outside our control.
pub struct SymmetricKey {
    bytes: SecretVec<u8>,
}

impl SymmetricKey {
    /// Creates a key from exactly [`KEY_SIZE`] raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if `bytes` is not 32 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != KEY_SIZE {
            return Err(Error::Configuration(format!(
                "symmetric key must be {KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self { bytes: SecretVec::new(bytes.to_vec()) })
    }

    /// Parses a key given as raw bytes, hex, or base64 (standard or URL-safe,
    /// padded or not).
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the value does not decode to 32 bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use veildb::key::SymmetricKey;
    ///
    /// let key = SymmetricKey::from_encoded(
    ///     "4e1c44f87b4cdf21808762970b356891db180a9dd9850e7baf2a79ff3ab8a2fc",
    /// ).expect("valid hex key");
    /// assert_eq!(key.as_bytes().len(), 32);
    /// ```
    pub fn from_encoded(encoded: &str) -> Result<Self, Error> {
        let trimmed = encoded.trim();
        if trimmed.len() == KEY_SIZE * 2 {
            if let Ok(decoded) = hex::decode(trimmed) {
                return Self::from_owned(decoded);
            }
        }
        for engine in [&URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD] {
            if let Ok(decoded) = engine.decode(trimmed) {
                if decoded.len() == KEY_SIZE {
                    return Self::from_owned(decoded);
                }
            }
        }
        if encoded.len() == KEY_SIZE {
            return Self::from_bytes(encoded.as_bytes());
        }
        Err(Error::Configuration(
            "key is not a raw, hex or base64 encoded 32-byte value".to_string(),
        ))
    }

    /// Generates a fresh random key from the operating system RNG.
    ///
    /// # Errors
    ///
    /// Returns `Error::CryptoOperation` if the RNG fails.
    pub fn generate() -> Result<Self, Error> {
        let bytes = crate::util::random_bytes(KEY_SIZE)?;
        Self::from_owned(bytes)
    }

    /// Exposes the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.expose_secret()
    }

    /// Hex encoding of the key, for writing key files.
    #[must_use]
    pub fn to_hex(&self) -> zeroize::Zeroizing<String> {
        zeroize::Zeroizing::new(hex::encode(self.as_bytes()))
    }

    fn from_owned(bytes: Vec<u8>) -> Result<Self, Error> {
        let secret = SecretVec::new(bytes);
        if secret.expose_secret().len() != KEY_SIZE {
            return Err(Error::Configuration(format!(
                "symmetric key must be {KEY_SIZE} bytes, got {}",
                secret.expose_secret().len()
            )));
        }
        Ok(Self { bytes: secret })
    }
}

impl Clone for SymmetricKey {
    fn clone(&self) -> Self {
        Self { bytes: SecretVec::new(self.as_bytes().to_vec()) }
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKey").field("bytes", &"[REDACTED]").finish()
    }
}
