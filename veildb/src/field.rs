//! Single-field encryption.

use crate::blind_index::BlindIndex;
use crate::error::Error;
use crate::key_provider::KeyProvider;
use crate::row::{IndexMap, IndexOutput};
use crate::vault::Vault;

/// Encrypts one column and computes its blind indexes.
///
/// Unlike [`crate::row::EncryptedRow`], values are raw bytes and AAD is
/// supplied by the caller as-is.
///
/// # Example
///
/// ```
/// use veildb::backend::Backend;
/// use veildb::blind_index::BlindIndex;
/// use veildb::field::EncryptedField;
/// use veildb::key_provider::StringProvider;
/// use veildb::transform::Lowercase;
/// use veildb::vault::Vault;
///
/// # fn main() -> Result<(), veildb::error::Error> {
/// let vault = Vault::new(StringProvider::new(&"4e".repeat(32))?, Backend::Standard);
/// let mut email = EncryptedField::new(vault, "users", "email");
/// email.add_blind_index(
///     BlindIndex::new("email_idx", 32).with_transform(Lowercase).with_fast(true),
/// )?;
///
/// let (token, indexes) = email.prepare_for_storage(b"Alice@Example.com", b"user:1")?;
/// assert_eq!(email.decrypt_value(&token, b"user:1")?, b"Alice@Example.com");
/// assert_eq!(
///     indexes["email_idx"].value(),
///     email.get_blind_index(b"alice@example.com", "email_idx")?.value()
/// );
/// # Ok(())
/// # }
/// ```
pub struct EncryptedField<P: KeyProvider> {
    vault: Vault<P>,
    table: String,
    field: String,
    blind_indexes: Vec<BlindIndex>,
    typed_indexes: bool,
}

impl<P: KeyProvider> Clone for EncryptedField<P> {
    fn clone(&self) -> Self {
        Self {
            vault: self.vault.clone(),
            table: self.table.clone(),
            field: self.field.clone(),
            blind_indexes: self.blind_indexes.clone(),
            typed_indexes: self.typed_indexes,
        }
    }
}

impl<P: KeyProvider> std::fmt::Debug for EncryptedField<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedField")
            .field("table", &self.table)
            .field("field", &self.field)
            .field("backend", &self.vault.backend())
            .field("blind_indexes", &self.blind_indexes)
            .finish_non_exhaustive()
    }
}

impl<P: KeyProvider> EncryptedField<P> {
    /// Creates a field with no indexes. Indexes are typed by default.
    pub fn new(vault: Vault<P>, table: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            vault,
            table: table.into(),
            field: field.into(),
            blind_indexes: Vec::new(),
            typed_indexes: true,
        }
    }

    /// Registers a blind index.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the name is already registered.
    pub fn add_blind_index(&mut self, index: BlindIndex) -> Result<&mut Self, Error> {
        if self.blind_indexes.iter().any(|i| i.name() == index.name()) {
            return Err(Error::Configuration(format!(
                "index {} is already registered on {}.{}",
                index.name(),
                self.table,
                self.field
            )));
        }
        self.blind_indexes.push(index);
        Ok(self)
    }

    /// Returns indexes as bare values instead of `{type, value}` pairs.
    pub fn set_flat_indexes(&mut self, flat: bool) -> &mut Self {
        self.typed_indexes = !flat;
        self
    }

    /// The table name.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// The column name.
    #[must_use]
    pub fn field_name(&self) -> &str {
        &self.field
    }

    /// The vault used for keys and primitives.
    #[must_use]
    pub const fn vault(&self) -> &Vault<P> {
        &self.vault
    }

    /// The same field under another vault. Used when rotating.
    #[must_use]
    pub fn with_vault(&self, vault: Vault<P>) -> Self {
        Self { vault, ..self.clone() }
    }

    /// Encrypts a value.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyProvider` or `Error::CryptoOperation`.
    pub fn encrypt_value(&self, plaintext: &[u8], aad: &[u8]) -> Result<String, Error> {
        tracing::debug!(table = %self.table, field = %self.field, "encrypting field");
        self.vault.encrypt_field(&self.table, &self.field, plaintext, aad)
    }

    /// Decrypts a value.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCiphertext` if the token does not authenticate.
    pub fn decrypt_value(&self, token: &str, aad: &[u8]) -> Result<Vec<u8>, Error> {
        tracing::debug!(table = %self.table, field = %self.field, "decrypting field");
        self.vault.decrypt_field(&self.table, &self.field, token, aad)
    }

    /// Computes one blind index.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if no index has this name.
    pub fn get_blind_index(&self, plaintext: &[u8], name: &str) -> Result<IndexOutput, Error> {
        let index = self.blind_indexes.iter().find(|i| i.name() == name).ok_or_else(|| {
            Error::Configuration(format!("no index named {name} on {}.{}", self.table, self.field))
        })?;
        self.compute(index, plaintext)
    }

    /// Computes every registered blind index.
    ///
    /// # Errors
    ///
    /// Propagates key and hashing errors.
    pub fn get_all_blind_indexes(&self, plaintext: &[u8]) -> Result<IndexMap, Error> {
        self.blind_indexes
            .iter()
            .map(|index| Ok((index.name().to_string(), self.compute(index, plaintext)?)))
            .collect()
    }

    fn compute(&self, index: &BlindIndex, plaintext: &[u8]) -> Result<IndexOutput, Error> {
        let digest = self.vault.blind_index(&self.table, &self.field, index, plaintext)?;
        let value = hex::encode(digest);
        if self.typed_indexes {
            let type_tag = self.vault.index_type_column(&self.table, &self.field, index.name())?;
            Ok(IndexOutput::Typed { type_tag, value })
        } else {
            Ok(IndexOutput::Flat(value))
        }
    }

    /// Encrypts a value and computes its blind indexes.
    ///
    /// # Errors
    ///
    /// See [`EncryptedField::encrypt_value`] and
    /// [`EncryptedField::get_all_blind_indexes`].
    pub fn prepare_for_storage(
        &self,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<(String, IndexMap), Error> {
        let indexes = self.get_all_blind_indexes(plaintext)?;
        Ok((self.encrypt_value(plaintext, aad)?, indexes))
    }
}
