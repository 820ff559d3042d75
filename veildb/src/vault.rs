//! Key access and per-field cryptographic operations.
//!
//! The [`Vault`] pairs a [`KeyProvider`] with a [`Backend`]. Every call asks
//! the provider for the master key and re-derives the field or index key it
//! needs, so a provider that starts returning a new key takes effect on the
//! next call.

use crate::backend::Backend;
use crate::blind_index::BlindIndex;
use crate::compound_index::CompoundIndex;
use crate::context::{IndexContext, COMPOUND_SPECIAL};
use crate::error::Error;
use crate::kdf::{derive_root_key, derive_subkey, KeyPurpose};
use crate::key::SymmetricKey;
use crate::key_provider::KeyProvider;
use crate::row::Row;
use std::sync::Arc;

/// Entry point for field encryption and blind indexing.
///
/// # Example
///
/// ```
/// use veildb::backend::Backend;
/// use veildb::key_provider::StringProvider;
/// use veildb::vault::Vault;
///
/// # fn main() -> Result<(), veildb::error::Error> {
/// let provider = StringProvider::new(&"4e".repeat(32))?;
/// let vault = Vault::new(provider, Backend::Standard);
///
/// let token = vault.encrypt_field("contacts", "email", b"alice@example.com", b"")?;
/// let plaintext = vault.decrypt_field("contacts", "email", &token, b"")?;
/// assert_eq!(plaintext, b"alice@example.com");
/// # Ok(())
/// # }
/// ```
pub struct Vault<P: KeyProvider> {
    provider: Arc<P>,
    backend: Backend,
}

impl<P: KeyProvider> Clone for Vault<P> {
    fn clone(&self) -> Self {
        Self { provider: Arc::clone(&self.provider), backend: self.backend }
    }
}

impl<P: KeyProvider> std::fmt::Debug for Vault<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").field("backend", &self.backend).finish_non_exhaustive()
    }
}

impl<P: KeyProvider> Vault<P> {
    /// Creates a vault that owns its key provider.
    pub fn new(provider: P, backend: Backend) -> Self {
        Self { provider: Arc::new(provider), backend }
    }

    /// Creates a vault over a shared key provider.
    pub const fn from_shared(provider: Arc<P>, backend: Backend) -> Self {
        Self { provider, backend }
    }

    /// The same key provider under another backend.
    #[must_use]
    pub fn with_backend(&self, backend: Backend) -> Self {
        Self { provider: Arc::clone(&self.provider), backend }
    }

    /// The active backend.
    #[must_use]
    pub const fn backend(&self) -> Backend {
        self.backend
    }

    /// The key provider.
    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn master_key(&self) -> Result<SymmetricKey, Error> {
        Ok(self.provider.get_symmetric_key()?)
    }

    /// The key used for whole-file stream encryption.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyProvider` if the provider fails.
    pub fn file_key(&self) -> Result<SymmetricKey, Error> {
        self.master_key()
    }

    /// Derives the encryption key for `table.field`.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyProvider` if the provider fails.
    pub fn field_key(&self, table: &str, field: &str) -> Result<SymmetricKey, Error> {
        derive_root_key(&self.master_key()?, table, KeyPurpose::FieldEncryption(field))
    }

    /// Derives the blind index root key for `table.field`.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyProvider` if the provider fails.
    pub fn blind_index_root_key(&self, table: &str, field: &str) -> Result<SymmetricKey, Error> {
        derive_root_key(&self.master_key()?, table, KeyPurpose::BlindIndexRoot(field))
    }

    /// Derives the key of one blind index.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyProvider` if the provider fails.
    pub fn index_key(&self, context: &IndexContext) -> Result<SymmetricKey, Error> {
        let root = self.blind_index_root_key(context.table_name(), context.field_name())?;
        derive_subkey(&root, context)
    }

    /// Encrypts one field value.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyProvider` or `Error::CryptoOperation`.
    pub fn encrypt_field(
        &self,
        table: &str,
        field: &str,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<String, Error> {
        self.backend.encrypt(plaintext, &self.field_key(table, field)?, aad)
    }

    /// Decrypts one field value.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCiphertext` if the token was not produced for
    /// this field, key and AAD under the active backend.
    pub fn decrypt_field(
        &self,
        table: &str,
        field: &str,
        token: &str,
        aad: &[u8],
    ) -> Result<Vec<u8>, Error> {
        self.backend.decrypt(token, &self.field_key(table, field)?, aad)
    }

    /// Computes the raw blind index of `plaintext` for `table.field`.
    ///
    /// # Errors
    ///
    /// Propagates key, transformation and hashing errors.
    pub fn blind_index(
        &self,
        table: &str,
        field: &str,
        index: &BlindIndex,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let context = IndexContext::new(table, field, index.name());
        tracing::debug!(%context, fast = index.is_fast(), "computing blind index");
        index.digest(self.backend, &self.index_key(&context)?, plaintext)
    }

    /// Computes the raw compound index of `row`.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingField` if a source column is absent.
    pub fn compound_index(
        &self,
        table: &str,
        index: &CompoundIndex,
        row: &Row,
    ) -> Result<Vec<u8>, Error> {
        let context = IndexContext::compound(table, index.name());
        tracing::debug!(%context, fast = index.is_fast(), "computing compound index");
        index.digest(self.backend, &self.index_key(&context)?, row)
    }

    /// Storage column tag for an index; pass [`COMPOUND_SPECIAL`] as the
    /// field for compound indexes.
    ///
    /// # Errors
    ///
    /// Returns `Error::CryptoOperation` if the keyed hash cannot be built.
    pub fn index_type_column(
        &self,
        table: &str,
        field: &str,
        index: &str,
    ) -> Result<String, Error> {
        self.backend.index_type_tag(&IndexContext::new(table, field, index))
    }

    /// Storage column tag for a compound index.
    ///
    /// # Errors
    ///
    /// Returns `Error::CryptoOperation` if the keyed hash cannot be built.
    pub fn compound_index_type_column(&self, table: &str, index: &str) -> Result<String, Error> {
        self.index_type_column(table, COMPOUND_SPECIAL, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KeyProviderError;
    use crate::key_provider::StringProvider;
    use std::sync::Mutex;

    fn vault(backend: Backend) -> Vault<StringProvider> {
        Vault::new(StringProvider::from_key(SymmetricKey::from_bytes(&[7u8; 32]).unwrap()), backend)
    }

    /// Returns whatever key was last stored.
    struct SwappableProvider(Mutex<SymmetricKey>);

    impl KeyProvider for SwappableProvider {
        fn get_symmetric_key(&self) -> Result<SymmetricKey, KeyProviderError> {
            self.0
                .lock()
                .map(|k| k.clone())
                .map_err(|_| KeyProviderError::KeyNotFound("poisoned".into()))
        }
    }

    #[test]
    fn test_field_round_trip() {
        for backend in Backend::ALL {
            let v = vault(backend);
            let token = v.encrypt_field("users", "email", b"a@b.c", b"1").unwrap();
            assert_eq!(v.decrypt_field("users", "email", &token, b"1").unwrap(), b"a@b.c");
        }
    }

    #[test]
    fn test_field_keys_are_bound_to_column() {
        let v = vault(Backend::Standard);
        let token = v.encrypt_field("users", "email", b"a@b.c", b"").unwrap();
        let err = v.decrypt_field("users", "phone", &token, b"").unwrap_err();
        assert!(err.is_invalid_ciphertext());
        let err = v.decrypt_field("admins", "email", &token, b"").unwrap_err();
        assert!(err.is_invalid_ciphertext());
    }

    #[test]
    fn test_key_is_read_on_every_call() {
        let first = SymmetricKey::from_bytes(&[1u8; 32]).unwrap();
        let provider = Arc::new(SwappableProvider(Mutex::new(first)));
        let v = Vault::from_shared(Arc::clone(&provider), Backend::Boring);
        let token = v.encrypt_field("t", "f", b"x", b"").unwrap();

        *provider.0.lock().unwrap() = SymmetricKey::from_bytes(&[2u8; 32]).unwrap();
        assert!(v.decrypt_field("t", "f", &token, b"").is_err());
    }

    #[test]
    fn test_blind_index_domain_separation() {
        let v = vault(Backend::Standard);
        let index = BlindIndex::new("idx", 64).with_fast(true);
        let base = v.blind_index("users", "email", &index, b"value").unwrap();
        assert_eq!(base, v.blind_index("users", "email", &index, b"value").unwrap());
        assert_ne!(base, v.blind_index("admins", "email", &index, b"value").unwrap());
        assert_ne!(base, v.blind_index("users", "phone", &index, b"value").unwrap());
        let renamed = BlindIndex::new("idx2", 64).with_fast(true);
        assert_ne!(base, v.blind_index("users", "email", &renamed, b"value").unwrap());
    }

    #[test]
    fn test_type_columns_differ_by_backend_family() {
        let standard = vault(Backend::Standard).index_type_column("t", "f", "i").unwrap();
        let boring = vault(Backend::Boring).index_type_column("t", "f", "i").unwrap();
        let fips = vault(Backend::Fips).index_type_column("t", "f", "i").unwrap();
        assert_eq!(standard, boring);
        assert_ne!(standard, fips);
        let compound = vault(Backend::Standard).compound_index_type_column("t", "i").unwrap();
        assert_ne!(standard, compound);
    }
}
