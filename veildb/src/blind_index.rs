//! Blind index descriptors.
//!
//! A blind index is a deterministic keyed digest of a (transformed)
//! plaintext, stored next to the ciphertext so the column can be searched
//! for equality without decrypting it. The index key is derived per
//! `(table, field, index)`, so equal plaintexts in different columns never
//! produce equal indexes.

use crate::backend::{Backend, HashConfig};
use crate::error::Error;
use crate::key::SymmetricKey;
use crate::transform::{apply_all, Transformation};
use std::fmt;
use std::sync::Arc;

/// Default index output size in bits.
pub const DEFAULT_BIT_LENGTH: u32 = 256;

/// A named blind index over one field.
///
/// Slow hashing is the default; use [`BlindIndex::with_fast`] only for
/// high-entropy inputs where brute-forcing the plaintext domain is
/// infeasible anyway.
///
/// # Example
///
/// ```
/// use veildb::blind_index::BlindIndex;
/// use veildb::transform::Lowercase;
///
/// let index = BlindIndex::new("email_idx", 32).with_transform(Lowercase).with_fast(true);
/// assert_eq!(index.name(), "email_idx");
/// assert!(index.is_fast());
/// ```
#[derive(Clone)]
pub struct BlindIndex {
    name: String,
    bit_length: u32,
    transforms: Vec<Arc<dyn Transformation>>,
    fast: bool,
    hash_config: HashConfig,
}

impl BlindIndex {
    /// Creates a slow blind index with no transformations.
    pub fn new(name: impl Into<String>, bit_length: u32) -> Self {
        Self {
            name: name.into(),
            bit_length,
            transforms: Vec::new(),
            fast: false,
            hash_config: HashConfig::default(),
        }
    }

    /// Appends a transformation to the pipeline.
    #[must_use]
    pub fn with_transform(mut self, transform: impl Transformation + 'static) -> Self {
        self.transforms.push(Arc::new(transform));
        self
    }

    /// Selects the fast (`true`) or slow (`false`) digest.
    #[must_use]
    pub fn with_fast(mut self, fast: bool) -> Self {
        self.fast = fast;
        self
    }

    /// Sets the slow-hash cost parameters.
    #[must_use]
    pub fn with_hash_config(mut self, hash_config: HashConfig) -> Self {
        self.hash_config = hash_config;
        self
    }

    /// Index name, unique per field.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Output size in bits.
    #[must_use]
    pub const fn bit_length(&self) -> u32 {
        self.bit_length
    }

    /// Whether the fast digest is used.
    #[must_use]
    pub const fn is_fast(&self) -> bool {
        self.fast
    }

    /// Slow-hash cost parameters.
    #[must_use]
    pub const fn hash_config(&self) -> &HashConfig {
        &self.hash_config
    }

    /// Applies the transformation pipeline to a plaintext.
    ///
    /// # Errors
    ///
    /// Propagates transformation errors.
    pub fn transform(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        apply_all(&self.transforms, plaintext)
    }

    /// Transforms and digests `plaintext` under an already-derived index key.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` for an unsupported bit length, or
    /// propagates transformation and hashing errors.
    pub fn digest(
        &self,
        backend: Backend,
        key: &SymmetricKey,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let transformed = self.transform(plaintext)?;
        digest(backend, key, &transformed, self.bit_length, self.fast, &self.hash_config)
    }
}

impl fmt::Debug for BlindIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlindIndex")
            .field("name", &self.name)
            .field("bit_length", &self.bit_length)
            .field("transforms", &self.transforms.len())
            .field("fast", &self.fast)
            .field("hash_config", &self.hash_config)
            .finish()
    }
}

/// Fast or slow digest of already-transformed input.
pub(crate) fn digest(
    backend: Backend,
    key: &SymmetricKey,
    input: &[u8],
    bit_length: u32,
    fast: bool,
    hash_config: &HashConfig,
) -> Result<Vec<u8>, Error> {
    if fast {
        backend.blind_index_fast(input, key, bit_length)
    } else {
        backend.blind_index_slow(input, key, bit_length, hash_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{LastFourDigits, Lowercase};

    fn key() -> SymmetricKey {
        SymmetricKey::from_bytes(&[42u8; 32]).unwrap()
    }

    #[test]
    fn test_blind_index_deterministic() {
        let index = BlindIndex::new("idx", 32).with_fast(true);
        let a = index.digest(Backend::Standard, &key(), b"alice@example.com").unwrap();
        let b = index.digest(Backend::Standard, &key(), b"alice@example.com").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn test_transform_applied_before_digest() {
        let index = BlindIndex::new("idx", 64).with_transform(Lowercase).with_fast(true);
        let a = index.digest(Backend::Fips, &key(), b"Alice@Example.com").unwrap();
        let b = index.digest(Backend::Fips, &key(), b"alice@example.com").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_keys_differ() {
        let index = BlindIndex::new("idx", 64).with_fast(true);
        let other = SymmetricKey::from_bytes(&[43u8; 32]).unwrap();
        let a = index.digest(Backend::Boring, &key(), b"value").unwrap();
        let b = index.digest(Backend::Boring, &other, b"value").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_slow_is_default() {
        let index = BlindIndex::new("ssn_last4", 16).with_transform(LastFourDigits);
        assert!(!index.is_fast());
        let digest = index.digest(Backend::Standard, &key(), b"123-45-6789").unwrap();
        assert_eq!(digest.len(), 2);
        assert_eq!(digest, index.digest(Backend::Standard, &key(), b"999-99-6789").unwrap());
    }

    #[test]
    fn test_invalid_bit_length() {
        let index = BlindIndex::new("idx", 0).with_fast(true);
        let result = index.digest(Backend::Standard, &key(), b"v");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_debug_lists_transform_count() {
        let index = BlindIndex::new("idx", 8).with_transform(Lowercase);
        assert!(format!("{index:?}").contains("transforms: 1"));
    }
}
