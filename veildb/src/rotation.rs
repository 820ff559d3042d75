//! Key and backend rotation.
//!
//! A rotator pairs the policy that wrote existing ciphertexts with the policy
//! that should write them from now on. Staleness is decided from the magic
//! header first; only tokens whose header already matches the new backend
//! are trial-decrypted to detect a same-backend key change.

use crate::backend::Backend;
use crate::error::Error;
use crate::field::EncryptedField;
use crate::key_provider::KeyProvider;
use crate::row::{EncryptedRow, IndexMap, Row};
use serde_json::Value;

/// Where a ciphertext stands relative to the new policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RotationStatus {
    /// Written by the new policy.
    Current,
    /// Written by the old policy under a different backend.
    StaleBackend,
    /// Same backend, but only the old key decrypts it.
    StaleKey,
}

impl RotationStatus {
    /// Whether the ciphertext should be rewritten.
    #[must_use]
    pub const fn is_stale(self) -> bool {
        !matches!(self, Self::Current)
    }
}

fn header_status(old: Backend, new: Backend, token: &str) -> Result<Option<RotationStatus>, Error> {
    if new.owns_token(token) {
        Ok(None)
    } else if old.owns_token(token) {
        Ok(Some(RotationStatus::StaleBackend))
    } else {
        Err(Error::InvalidCiphertext(
            "ciphertext header matches neither the old nor the new backend".to_string(),
        ))
    }
}

/// Rotates the ciphertexts of one column.
///
/// # Example
///
/// ```
/// use veildb::backend::Backend;
/// use veildb::field::EncryptedField;
/// use veildb::key_provider::StringProvider;
/// use veildb::rotation::{FieldRotator, RotationStatus};
/// use veildb::vault::Vault;
///
/// # fn main() -> Result<(), veildb::error::Error> {
/// let provider = StringProvider::new(&"4e".repeat(32))?;
/// let old = EncryptedField::new(Vault::new(provider.clone(), Backend::Boring), "users", "email");
/// let new = EncryptedField::new(Vault::new(provider, Backend::Fips), "users", "email");
///
/// let token = old.encrypt_value(b"a@b.c", b"")?;
/// let rotator = FieldRotator::new(old, new);
/// assert_eq!(rotator.status(&token, b"")?, RotationStatus::StaleBackend);
///
/// let (rotated, _indexes) = rotator.prepare_for_update(&token, b"", b"")?;
/// assert!(!rotator.needs_re_encrypt(&rotated, b"")?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FieldRotator<P: KeyProvider> {
    old: EncryptedField<P>,
    new: EncryptedField<P>,
}

impl<P: KeyProvider> FieldRotator<P> {
    /// Creates a rotator from the old and new field policies.
    pub const fn new(old: EncryptedField<P>, new: EncryptedField<P>) -> Self {
        Self { old, new }
    }

    /// Classifies a token.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCiphertext` if neither policy can read it.
    pub fn status(&self, token: &str, aad: &[u8]) -> Result<RotationStatus, Error> {
        let (old_backend, new_backend) = (self.old.vault().backend(), self.new.vault().backend());
        if let Some(status) = header_status(old_backend, new_backend, token)? {
            tracing::debug!(field = %self.new.field_name(), ?status, "rotation decided by header");
            return Ok(status);
        }
        let status = match self.new.decrypt_value(token, aad) {
            Ok(_) => RotationStatus::Current,
            Err(e) if e.is_invalid_ciphertext() && old_backend == new_backend => {
                self.old.decrypt_value(token, aad)?;
                RotationStatus::StaleKey
            }
            Err(e) => return Err(e),
        };
        tracing::debug!(
            field = %self.new.field_name(),
            ?status,
            "rotation decided by trial decryption"
        );
        Ok(status)
    }

    /// Whether a token should be rewritten under the new policy.
    ///
    /// # Errors
    ///
    /// See [`FieldRotator::status`].
    pub fn needs_re_encrypt(&self, token: &str, aad: &[u8]) -> Result<bool, Error> {
        Ok(self.status(token, aad)?.is_stale())
    }

    /// Decrypts a token with whichever policy wrote it and re-encrypts it
    /// under the new one, returning fresh blind indexes too.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCiphertext` if neither policy can read it.
    pub fn prepare_for_update(
        &self,
        token: &str,
        old_aad: &[u8],
        new_aad: &[u8],
    ) -> Result<(String, IndexMap), Error> {
        let plaintext = zeroize::Zeroizing::new(match self.status(token, old_aad)? {
            RotationStatus::Current => self.new.decrypt_value(token, old_aad)?,
            RotationStatus::StaleBackend | RotationStatus::StaleKey => {
                self.old.decrypt_value(token, old_aad)?
            }
        });
        self.new.prepare_for_storage(&plaintext, new_aad)
    }
}

/// Rotates whole rows of one table.
#[derive(Debug, Clone)]
pub struct RowRotator<P: KeyProvider> {
    old: EncryptedRow<P>,
    new: EncryptedRow<P>,
}

impl<P: KeyProvider> RowRotator<P> {
    /// Creates a rotator from the old and new row policies.
    pub const fn new(old: EncryptedRow<P>, new: EncryptedRow<P>) -> Self {
        Self { old, new }
    }

    /// Classifies an encrypted row. The row is stale if any column is.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCiphertext` if neither policy can read it and
    /// `Error::MissingField` if a registered column is absent.
    pub fn status(&self, row: &Row) -> Result<RotationStatus, Error> {
        let (old_backend, new_backend) = (self.old.vault().backend(), self.new.vault().backend());
        for column in self.new.field_names() {
            if let Some(Value::String(token)) = row.get(column) {
                if let Some(status) = header_status(old_backend, new_backend, token)? {
                    tracing::debug!(
                        table = %self.new.table_name(),
                        column,
                        ?status,
                        "rotation decided by header"
                    );
                    return Ok(status);
                }
            }
        }
        let status = match self.new.decrypt_row(row) {
            Ok(_) => RotationStatus::Current,
            Err(e) if e.is_invalid_ciphertext() && old_backend == new_backend => {
                self.old.decrypt_row(row)?;
                RotationStatus::StaleKey
            }
            Err(e) => return Err(e),
        };
        tracing::debug!(
            table = %self.new.table_name(),
            ?status,
            "rotation decided by trial decryption"
        );
        Ok(status)
    }

    /// Whether a row should be rewritten under the new policy.
    ///
    /// # Errors
    ///
    /// See [`RowRotator::status`].
    pub fn needs_re_encrypt(&self, row: &Row) -> Result<bool, Error> {
        Ok(self.status(row)?.is_stale())
    }

    /// Decrypts a row with whichever policy wrote it and re-encrypts it under
    /// the new one, returning fresh indexes too.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCiphertext` if neither policy can read it.
    pub fn prepare_for_update(&self, row: &Row) -> Result<(Row, IndexMap), Error> {
        let plaintext = match self.status(row)? {
            RotationStatus::Current => self.new.decrypt_row(row)?,
            RotationStatus::StaleBackend | RotationStatus::StaleKey => self.old.decrypt_row(row)?,
        };
        self.new.prepare_row_for_storage(&plaintext)
    }
}
