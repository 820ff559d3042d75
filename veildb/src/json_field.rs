//! Encryption of selected leaves inside a JSON document.
//!
//! A [`JsonFieldMap`] lists the paths to encrypt and the type of each leaf.
//! Every leaf is encrypted under its own key, derived from the column's field
//! key and the path, so a ciphertext cannot be moved to another position in
//! the document. Leaves not listed in the map are left as they are.

use crate::error::Error;
use crate::kdf::derive_path_key;
use crate::key::SymmetricKey;
use crate::key_provider::KeyProvider;
use crate::row::FieldType;
use crate::util::le64;
use crate::vault::Vault;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use zeroize::Zeroizing;

/// Hex length of the CRC32 prefix of a serialized field map.
const CHECKSUM_HEX_LEN: usize = 8;

/// One step into a JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl PathSegment {
    fn key_material(&self) -> Vec<u8> {
        match self {
            Self::Key(key) => [b"k".as_slice(), key.as_bytes()].concat(),
            Self::Index(index) => [b"i".as_slice(), &le64(*index)].concat(),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, ".{key}"),
            Self::Index(index) => write!(f, "[{index}]"),
        }
    }
}

fn display_path(path: &[PathSegment]) -> String {
    path.iter().map(ToString::to_string).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct MappedField {
    path: Vec<PathSegment>,
    #[serde(rename = "type")]
    field_type: FieldType,
}

/// Paths of a JSON document to encrypt, with the type of each leaf.
///
/// Serialized as the lowercase hex CRC32 (IEEE) of the JSON body followed by
/// the body itself; a document whose CRC does not match is rejected.
///
/// # Example
///
/// ```
/// use veildb::json_field::JsonFieldMap;
/// use veildb::row::FieldType;
///
/// let mut map = JsonFieldMap::new();
/// map.add_field(["patient", "ssn"], FieldType::Text)
///     .add_field(["visits", "0", "notes"], FieldType::OptionalText);
///
/// let stored = map.to_json().unwrap();
/// assert_eq!(JsonFieldMap::from_json(&stored).unwrap(), map);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonFieldMap {
    fields: Vec<MappedField>,
}

impl JsonFieldMap {
    /// An empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the type of a path.
    pub fn add_field<I, S>(&mut self, path: I, field_type: FieldType) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PathSegment>,
    {
        let path: Vec<PathSegment> = path.into_iter().map(Into::into).collect();
        match self.fields.iter_mut().find(|f| f.path == path) {
            Some(existing) => existing.field_type = field_type,
            None => self.fields.push(MappedField { path, field_type }),
        }
        self
    }

    /// Mapped paths in insertion order.
    pub fn paths(&self) -> impl Iterator<Item = (&[PathSegment], FieldType)> {
        self.fields.iter().map(|f| (f.path.as_slice(), f.field_type))
    }

    /// Number of mapped paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no path is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Serializes the map with its CRC32 prefix.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if serialization fails.
    pub fn to_json(&self) -> Result<String, Error> {
        let body = serde_json::to_string(self)
            .map_err(|e| Error::Configuration(format!("failed to serialize field map: {e}")))?;
        Ok(format!("{}{body}", crc32_hex(&body)))
    }

    /// Parses a map produced by [`JsonFieldMap::to_json`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the checksum does not match or the
    /// body is not a valid field map.
    pub fn from_json(stored: &str) -> Result<Self, Error> {
        let (Some(checksum), Some(body)) =
            (stored.get(..CHECKSUM_HEX_LEN), stored.get(CHECKSUM_HEX_LEN..))
        else {
            return Err(Error::Configuration("field map is too short".to_string()));
        };
        if !checksum.eq_ignore_ascii_case(&crc32_hex(body)) {
            return Err(Error::Configuration("field map CRC mismatch".to_string()));
        }
        serde_json::from_str(body)
            .map_err(|e| Error::Configuration(format!("invalid field map: {e}")))
    }
}

fn crc32_hex(body: &str) -> String {
    format!("{:08x}", crc32fast::hash(body.as_bytes()))
}

fn locate_mut<'a>(root: &'a mut Value, path: &[PathSegment]) -> Option<&'a mut Value> {
    path.iter().try_fold(root, |node, segment| match segment {
        PathSegment::Key(key) => node.as_object_mut()?.get_mut(key),
        PathSegment::Index(index) => node.as_array_mut()?.get_mut(*index),
    })
}

/// Encrypts the mapped leaves of JSON documents stored in one column.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use veildb::backend::Backend;
/// use veildb::json_field::{EncryptedJsonField, JsonFieldMap};
/// use veildb::key_provider::StringProvider;
/// use veildb::row::FieldType;
/// use veildb::vault::Vault;
///
/// # fn main() -> Result<(), veildb::error::Error> {
/// let vault = Vault::new(StringProvider::new(&"4e".repeat(32))?, Backend::Standard);
/// let mut map = JsonFieldMap::new();
/// map.add_field(["patient", "ssn"], FieldType::Text);
/// let field = EncryptedJsonField::new(vault, "records", "document", map);
///
/// let doc = json!({"patient": {"name": "Ada", "ssn": "123-45-6789"}});
/// let stored = field.encrypt_json(&doc, b"")?;
/// assert_eq!(stored["patient"]["name"], "Ada");
/// assert_ne!(stored["patient"]["ssn"], doc["patient"]["ssn"]);
/// assert_eq!(field.decrypt_json(&stored, b"")?, doc);
/// # Ok(())
/// # }
/// ```
pub struct EncryptedJsonField<P: KeyProvider> {
    vault: Vault<P>,
    table: String,
    field: String,
    map: JsonFieldMap,
    strict: bool,
}

impl<P: KeyProvider> fmt::Debug for EncryptedJsonField<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedJsonField")
            .field("table", &self.table)
            .field("field", &self.field)
            .field("map", &self.map)
            .field("strict", &self.strict)
            .finish_non_exhaustive()
    }
}

impl<P: KeyProvider> EncryptedJsonField<P> {
    /// Creates a strict JSON field: every mapped path must be present.
    pub fn new(
        vault: Vault<P>,
        table: impl Into<String>,
        field: impl Into<String>,
        map: JsonFieldMap,
    ) -> Self {
        Self { vault, table: table.into(), field: field.into(), map, strict: true }
    }

    /// In non-strict mode, mapped paths missing from a document are skipped.
    #[must_use]
    pub const fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// The field map.
    #[must_use]
    pub const fn field_map(&self) -> &JsonFieldMap {
        &self.map
    }

    fn leaf_key(
        &self,
        field_key: &SymmetricKey,
        path: &[PathSegment],
    ) -> Result<SymmetricKey, Error> {
        let material: Vec<Vec<u8>> = path.iter().map(PathSegment::key_material).collect();
        let parts: Vec<&[u8]> = material.iter().map(Vec::as_slice).collect();
        derive_path_key(field_key, &parts)
    }

    fn leaf<'a>(
        &self,
        doc: &'a mut Value,
        path: &[PathSegment],
    ) -> Result<Option<&'a mut Value>, Error> {
        match locate_mut(doc, path) {
            Some(leaf) => Ok(Some(leaf)),
            None if self.strict => Err(Error::MissingField(display_path(path))),
            None => Ok(None),
        }
    }

    /// Returns a copy of `doc` with every mapped leaf encrypted.
    ///
    /// Optional leaves that are `null` stay `null`.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingField` for an absent path in strict mode and
    /// `Error::Configuration` if a leaf does not match its type.
    pub fn encrypt_json(&self, doc: &Value, aad: &[u8]) -> Result<Value, Error> {
        tracing::debug!(
            table = %self.table,
            field = %self.field,
            leaves = self.map.len(),
            "encrypting JSON"
        );
        let field_key = self.vault.field_key(&self.table, &self.field)?;
        let mut out = doc.clone();
        for (path, field_type) in self.map.paths() {
            let Some(leaf) = self.leaf(&mut out, path)? else {
                continue;
            };
            let Some(encoded) = field_type.encode(&display_path(path), leaf)? else {
                continue;
            };
            let key = self.leaf_key(&field_key, path)?;
            *leaf = Value::String(self.vault.backend().encrypt(&encoded, &key, aad)?);
        }
        Ok(out)
    }

    /// Returns a copy of `doc` with every mapped leaf decrypted.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCiphertext` if a leaf fails to authenticate or
    /// decode, or is `null` for a non-optional type.
    pub fn decrypt_json(&self, doc: &Value, aad: &[u8]) -> Result<Value, Error> {
        tracing::debug!(
            table = %self.table,
            field = %self.field,
            leaves = self.map.len(),
            "decrypting JSON"
        );
        let field_key = self.vault.field_key(&self.table, &self.field)?;
        let mut out = doc.clone();
        for (path, field_type) in self.map.paths() {
            let Some(leaf) = self.leaf(&mut out, path)? else {
                continue;
            };
            let name = display_path(path);
            let value = match &*leaf {
                Value::Null if field_type.is_optional() => continue,
                Value::String(token) => {
                    let key = self.leaf_key(&field_key, path)?;
                    let plaintext = Zeroizing::new(self.vault.backend().decrypt(token, &key, aad)?);
                    field_type.decode(&name, &plaintext)?
                }
                _ => {
                    return Err(Error::InvalidCiphertext(format!(
                        "JSON leaf {name} does not hold a ciphertext"
                    )))
                }
            };
            *leaf = value;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::key_provider::StringProvider;
    use serde_json::json;

    fn field(map: JsonFieldMap) -> EncryptedJsonField<StringProvider> {
        let key = SymmetricKey::from_bytes(&[8u8; 32]).unwrap();
        let vault = Vault::new(StringProvider::from_key(key), Backend::Boring);
        EncryptedJsonField::new(vault, "records", "doc", map)
    }

    fn doc() -> Value {
        json!({
            "name": "Ada",
            "ssn": "123-45-6789",
            "visits": [{"cost": 12.5, "paid": true}, {"cost": 3.0, "paid": null}],
            "age": 36
        })
    }

    fn map() -> JsonFieldMap {
        let mut map = JsonFieldMap::new();
        map.add_field(["ssn"], FieldType::Text)
            .add_field([PathSegment::from("visits"), 0.into(), "cost".into()], FieldType::Float)
            .add_field(
                [PathSegment::from("visits"), 1.into(), "paid".into()],
                FieldType::OptionalBoolean,
            )
            .add_field(["age"], FieldType::Integer);
        map
    }

    #[test]
    fn test_round_trip() {
        let f = field(map());
        let encrypted = f.encrypt_json(&doc(), b"aad").unwrap();
        assert_eq!(encrypted["name"], json!("Ada"));
        assert!(encrypted["visits"][0]["cost"].is_string());
        assert_eq!(encrypted["visits"][0]["paid"], json!(true));
        assert_eq!(encrypted["visits"][1]["paid"], Value::Null);
        assert_eq!(f.decrypt_json(&encrypted, b"aad").unwrap(), doc());
        assert!(f.decrypt_json(&encrypted, b"other").is_err());
    }

    #[test]
    fn test_leaf_ciphertexts_are_bound_to_path() {
        let mut map = JsonFieldMap::new();
        map.add_field(["a"], FieldType::Text).add_field(["b"], FieldType::Text);
        let f = field(map);
        let mut encrypted = f.encrypt_json(&json!({"a": "x", "b": "y"}), b"").unwrap();
        let a = encrypted["a"].clone();
        encrypted["b"] = a;
        assert!(f.decrypt_json(&encrypted, b"").unwrap_err().is_invalid_ciphertext());
    }

    #[test]
    fn test_missing_path_strict_and_lenient() {
        let partial = json!({"ssn": "1", "visits": [], "age": 1});
        let strict = field(map());
        let missing = strict.encrypt_json(&partial, b"");
        assert!(matches!(missing, Err(Error::MissingField(p)) if p == ".visits[0].cost"));

        let lenient = field(map()).with_strict(false);
        let encrypted = lenient.encrypt_json(&partial, b"").unwrap();
        assert_eq!(lenient.decrypt_json(&encrypted, b"").unwrap(), partial);
    }

    #[test]
    fn test_key_and_index_segments_differ() {
        let key = SymmetricKey::from_bytes(&[1u8; 32]).unwrap();
        let f = field(JsonFieldMap::new());
        let by_key = f.leaf_key(&key, &[PathSegment::from("0")]).unwrap();
        let by_index = f.leaf_key(&key, &[PathSegment::from(0)]).unwrap();
        assert_ne!(by_key.as_bytes(), by_index.as_bytes());
    }

    #[test]
    fn test_field_map_checksum() {
        let stored = map().to_json().unwrap();
        assert_eq!(JsonFieldMap::from_json(&stored).unwrap(), map());

        let tampered = stored.replace("\"float\"", "\"text\"");
        assert!(matches!(JsonFieldMap::from_json(&tampered), Err(Error::Configuration(_))));
        assert!(JsonFieldMap::from_json("abc").is_err());
    }

    #[test]
    fn test_field_map_crc32_format() {
        let body = r#"{"fields":[{"path":["a"],"type":"text"}]}"#;
        let crc = crc32fast::hash(body.as_bytes());
        let mut expected = JsonFieldMap::new();
        expected.add_field(["a"], FieldType::Text);

        let stored = format!("{crc:08x}{body}");
        assert_eq!(expected.to_json().unwrap(), stored);
        assert_eq!(JsonFieldMap::from_json(&stored).unwrap(), expected);
        assert_eq!(JsonFieldMap::from_json(&format!("{crc:08X}{body}")).unwrap(), expected);

        let wrong = format!("{:08x}{body}", crc ^ 1);
        assert!(matches!(JsonFieldMap::from_json(&wrong), Err(Error::Configuration(_))));
        let blake2_prefixed = format!("{}{body}", "0".repeat(32));
        assert!(JsonFieldMap::from_json(&blake2_prefixed).is_err());
    }

    #[test]
    fn test_field_map_replaces_duplicate_path() {
        let mut map = JsonFieldMap::new();
        map.add_field(["a"], FieldType::Text).add_field(["a"], FieldType::OptionalText);
        assert_eq!(map.len(), 1);
        assert_eq!(map.paths().next().map(|(_, t)| t), Some(FieldType::OptionalText));
    }
}
