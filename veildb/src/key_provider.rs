//! Key provider abstraction for key management.

use crate::error::{Error, KeyProviderError};
use crate::key::SymmetricKey;

/// Supplies the master key that every table, field and index key is
/// derived from.
///
/// The library never caches the returned key: it asks the provider again on
/// every derivation, so a provider that reads mutable configuration rotates
/// keys as soon as that configuration changes.
///
/// Implementations must be thread-safe (`Send + Sync`) to support
/// concurrent encryption operations.
///
/// # Example
///
/// ```rust,ignore
/// use veildb::key_provider::KeyProvider;
///
/// struct TenantProvider { /* ... */ }
///
/// impl KeyProvider for TenantProvider {
///     fn get_symmetric_key(&self) -> Result<SymmetricKey, KeyProviderError> {
///         // Look up the active tenant's key
///     }
/// }
/// ```
pub trait KeyProvider: Send + Sync {
    /// Returns the current master key.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::KeyNotFound` if no key is available and
    /// `KeyProviderError::InvalidKey` if the stored key is malformed.
    fn get_symmetric_key(&self) -> Result<SymmetricKey, KeyProviderError>;
}

/// Key provider holding a single key supplied as a string.
///
/// Accepts the encodings understood by [`SymmetricKey::from_encoded`].
#[derive(Clone)]
pub struct StringProvider {
    key: SymmetricKey,
}

impl StringProvider {
    /// Creates a provider from a raw, hex or base64 encoded 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the key cannot be decoded.
    pub fn new(encoded: &str) -> Result<Self, Error> {
        Ok(Self { key: SymmetricKey::from_encoded(encoded)? })
    }

    /// Wraps an existing key.
    #[must_use]
    pub const fn from_key(key: SymmetricKey) -> Self {
        Self { key }
    }
}

impl KeyProvider for StringProvider {
    fn get_symmetric_key(&self) -> Result<SymmetricKey, KeyProviderError> {
        Ok(self.key.clone())
    }
}

impl std::fmt::Debug for StringProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StringProvider").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_provider_returns_same_key() {
        let provider = StringProvider::new(&"ab".repeat(32)).unwrap();
        let k1 = provider.get_symmetric_key().unwrap();
        let k2 = provider.get_symmetric_key().unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
        assert_eq!(k1.as_bytes(), &[0xAB; 32]);
    }

    #[test]
    fn test_string_provider_rejects_bad_key() {
        assert!(StringProvider::new("not a key").is_err());
    }
}
