//! Key derivation hierarchy.
//!
//! ```text
//! master key (from the KeyProvider)
//!   ├── HKDF-SHA384(salt = table, info = FIELD_ENCRYPTION tag || field)  → field key
//!   └── HKDF-SHA384(salt = table, info = BLIND_INDEX_ROOT tag || field)  → index root key
//!         └── HMAC-SHA256(root, pack(table, field, index))               → per-index key
//! ```
//!
//! Keys are re-derived on every access; nothing here caches.

use crate::context::IndexContext;
use crate::error::Error;
use crate::key::{SymmetricKey, KEY_SIZE};
use crate::util::pack;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384};
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Purpose tag prepended to the HKDF info for field encryption keys.
const FIELD_ENCRYPTION_TAG: [u8; 32] = [0xB4; 32];

/// Purpose tag prepended to the HKDF info for blind index root keys.
const BLIND_INDEX_ROOT_TAG: [u8; 32] = [0x7E; 32];

/// What a root key is used for. Each purpose yields an independent key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose<'a> {
    /// Encrypting the named field.
    FieldEncryption(&'a str),
    /// Deriving per-index keys for the named field.
    BlindIndexRoot(&'a str),
}

impl KeyPurpose<'_> {
    fn info(&self) -> Vec<u8> {
        let (tag, field) = match self {
            Self::FieldEncryption(field) => (&FIELD_ENCRYPTION_TAG, field),
            Self::BlindIndexRoot(field) => (&BLIND_INDEX_ROOT_TAG, field),
        };
        let mut info = Vec::with_capacity(tag.len() + field.len());
        info.extend_from_slice(tag);
        info.extend_from_slice(field.as_bytes());
        info
    }
}

/// Derives a root key for `table` from the master key using HKDF-SHA384.
///
/// The table name is the HKDF salt and the purpose tag (plus field name) is
/// the info string.
///
/// # Errors
///
/// Returns `Error::CryptoOperation` if the HKDF expansion fails.
///
/// # Example
///
/// ```
/// use veildb::kdf::{derive_root_key, KeyPurpose};
/// use veildb::key::SymmetricKey;
///
/// let master = SymmetricKey::from_bytes(&[1u8; 32]).unwrap();
/// let fenc = derive_root_key(&master, "users", KeyPurpose::FieldEncryption("email")).unwrap();
/// let bidx = derive_root_key(&master, "users", KeyPurpose::BlindIndexRoot("email")).unwrap();
/// assert_ne!(fenc.as_bytes(), bidx.as_bytes());
/// ```
pub fn derive_root_key(
    master: &SymmetricKey,
    table: &str,
    purpose: KeyPurpose<'_>,
) -> Result<SymmetricKey, Error> {
    tracing::trace!(table, ?purpose, "deriving root key");
    let okm = hkdf_sha384(master.as_bytes(), table.as_bytes(), &purpose.info(), KEY_SIZE)?;
    SymmetricKey::from_bytes(&okm)
}

/// Derives the per-index key from a blind index root key.
///
/// Computed as `HMAC-SHA256(root, pack(table, field, index))`. Changing any
/// of the three names yields an independent key; this is what keeps indexes
/// of different columns from colliding.
///
/// # Errors
///
/// Returns `Error::CryptoOperation` if the HMAC cannot be keyed.
pub fn derive_subkey(root: &SymmetricKey, context: &IndexContext) -> Result<SymmetricKey, Error> {
    tracing::trace!(%context, "deriving blind index key");
    let mut mac = HmacSha256::new_from_slice(root.as_bytes())
        .map_err(|e| Error::CryptoOperation(format!("invalid root key: {e}")))?;
    mac.update(&context.packed());
    SymmetricKey::from_bytes(&mac.finalize().into_bytes())
}

/// Derives the key for one leaf of a JSON document from the field key.
///
/// # Errors
///
/// Returns `Error::CryptoOperation` if the HMAC cannot be keyed.
pub fn derive_path_key(field_key: &SymmetricKey, path: &[&[u8]]) -> Result<SymmetricKey, Error> {
    let mut mac = HmacSha256::new_from_slice(field_key.as_bytes())
        .map_err(|e| Error::CryptoOperation(format!("invalid field key: {e}")))?;
    mac.update(&pack(path));
    SymmetricKey::from_bytes(&mac.finalize().into_bytes())
}

/// HKDF-SHA384 with an explicit salt, returning `len` bytes.
pub(crate) fn hkdf_sha384(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
    len: usize,
) -> Result<Zeroizing<Vec<u8>>, Error> {
    let hkdf = Hkdf::<Sha384>::new(Some(salt), ikm);
    let mut okm = Zeroizing::new(vec![0u8; len]);
    hkdf.expand(info, &mut okm)
        .map_err(|e| Error::CryptoOperation(format!("HKDF expand failed: {e}")))?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn master() -> SymmetricKey {
        SymmetricKey::from_bytes(&[1u8; 32]).unwrap()
    }

    #[test]
    fn test_root_key_deterministic() {
        let k1 = derive_root_key(&master(), "users", KeyPurpose::FieldEncryption("email")).unwrap();
        let k2 = derive_root_key(&master(), "users", KeyPurpose::FieldEncryption("email")).unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_root_key_purposes_are_independent() {
        let fenc =
            derive_root_key(&master(), "users", KeyPurpose::FieldEncryption("email")).unwrap();
        let bidx =
            derive_root_key(&master(), "users", KeyPurpose::BlindIndexRoot("email")).unwrap();
        assert_ne!(fenc.as_bytes(), bidx.as_bytes());
    }

    #[test]
    fn test_root_key_different_tables_and_fields() {
        let a = derive_root_key(&master(), "users", KeyPurpose::FieldEncryption("email")).unwrap();
        let b = derive_root_key(&master(), "admins", KeyPurpose::FieldEncryption("email")).unwrap();
        let c = derive_root_key(&master(), "users", KeyPurpose::FieldEncryption("phone")).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn test_root_key_different_masters() {
        let other = SymmetricKey::from_bytes(&[2u8; 32]).unwrap();
        let a = derive_root_key(&master(), "users", KeyPurpose::BlindIndexRoot("email")).unwrap();
        let b = derive_root_key(&other, "users", KeyPurpose::BlindIndexRoot("email")).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_subkey_domain_separation() {
        let root =
            derive_root_key(&master(), "users", KeyPurpose::BlindIndexRoot("email")).unwrap();
        let base = derive_subkey(&root, &IndexContext::new("users", "email", "idx")).unwrap();
        let again = derive_subkey(&root, &IndexContext::new("users", "email", "idx")).unwrap();
        assert_eq!(base.as_bytes(), again.as_bytes());

        for other in [
            IndexContext::new("admins", "email", "idx"),
            IndexContext::new("users", "phone", "idx"),
            IndexContext::new("users", "email", "idx2"),
        ] {
            let key = derive_subkey(&root, &other).unwrap();
            assert_ne!(base.as_bytes(), key.as_bytes(), "context {other} must change the key");
        }
    }

    #[test]
    fn test_path_key_depends_on_path() {
        let a = derive_path_key(&master(), &[b"address".as_slice(), b"zip".as_slice()]).unwrap();
        let b = derive_path_key(&master(), &[b"address".as_slice(), b"city".as_slice()]).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_hkdf_sha384_length() {
        let okm = hkdf_sha384(&[3u8; 32], b"salt", b"info", 48).unwrap();
        assert_eq!(okm.len(), 48);
    }
}
