//! Row-level encryption.
//!
//! An [`EncryptedRow`] describes one table: which columns are encrypted and
//! with what type, which AAD each column binds, and which blind and compound
//! indexes to compute. Rows are `serde_json` objects; columns that are not
//! registered pass through untouched.
//!
//! Values are encoded before encryption so that ciphertext length does not
//! leak magnitude:
//!
//! | Type      | Encoding                                   |
//! |-----------|--------------------------------------------|
//! | boolean   | 1 byte: `0` null, `1` false, `2` true       |
//! | integer   | `i64`, 8 bytes little-endian               |
//! | float     | IEEE 754 binary64, 8 bytes little-endian   |
//! | text      | UTF-8 bytes, unmodified                    |

use crate::aad::Aad;
use crate::blind_index::BlindIndex;
use crate::compound_index::CompoundIndex;
use crate::context::COMPOUND_SPECIAL;
use crate::error::Error;
use crate::key_provider::KeyProvider;
use crate::vault::Vault;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::{BTreeMap, HashMap};
use zeroize::Zeroizing;

/// A database row: column name to JSON value.
pub type Row = Map<String, Value>;

/// Blind indexes of a row, keyed by index name.
pub type IndexMap = BTreeMap<String, IndexOutput>;

/// The declared type of an encrypted column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Boolean,
    Integer,
    Float,
    Text,
    OptionalBoolean,
    OptionalInteger,
    OptionalFloat,
    OptionalText,
}

const BOOL_NULL: u8 = 0;
const BOOL_FALSE: u8 = 1;
const BOOL_TRUE: u8 = 2;

impl FieldType {
    /// Whether `null` is an acceptable value.
    #[must_use]
    pub const fn is_optional(self) -> bool {
        matches!(
            self,
            Self::OptionalBoolean | Self::OptionalInteger | Self::OptionalFloat | Self::OptionalText
        )
    }

    const fn base(self) -> Self {
        match self {
            Self::OptionalBoolean => Self::Boolean,
            Self::OptionalInteger => Self::Integer,
            Self::OptionalFloat => Self::Float,
            Self::OptionalText => Self::Text,
            other => other,
        }
    }

    /// Encodes a value for encryption. `Ok(None)` means an optional `null`,
    /// which is stored as-is.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the value does not match the type.
    pub fn encode(self, column: &str, value: &Value) -> Result<Option<Zeroizing<Vec<u8>>>, Error> {
        let mismatch = || Error::Configuration(format!("column {column} is not a valid {self:?}"));
        if value.is_null() {
            return if self.is_optional() {
                Ok(None)
            } else {
                Err(Error::Configuration(format!("column {column} is not optional but is null")))
            };
        }

        let bytes = match (self.base(), value) {
            (Self::Boolean, Value::Bool(b)) => vec![if *b { BOOL_TRUE } else { BOOL_FALSE }],
            (Self::Integer, Value::Number(n)) => {
                n.as_i64().ok_or_else(mismatch)?.to_le_bytes().to_vec()
            }
            (Self::Float, Value::Number(n)) => {
                n.as_f64().ok_or_else(mismatch)?.to_le_bytes().to_vec()
            }
            (Self::Text, Value::String(s)) => s.as_bytes().to_vec(),
            _ => return Err(mismatch()),
        };
        Ok(Some(Zeroizing::new(bytes)))
    }

    /// Decodes decrypted bytes back into a value.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCiphertext` if the bytes are malformed for the
    /// type, or decode to `null` for a non-optional type.
    pub fn decode(self, column: &str, bytes: &[u8]) -> Result<Value, Error> {
        let malformed =
            || Error::InvalidCiphertext(format!("column {column} does not decode as {self:?}"));
        let value = match self.base() {
            Self::Boolean => match bytes {
                [BOOL_NULL] => Value::Null,
                [BOOL_FALSE] => Value::Bool(false),
                [BOOL_TRUE] => Value::Bool(true),
                _ => return Err(malformed()),
            },
            Self::Integer => {
                let raw: [u8; 8] = bytes.try_into().map_err(|_| malformed())?;
                Value::Number(i64::from_le_bytes(raw).into())
            }
            Self::Float => {
                let raw: [u8; 8] = bytes.try_into().map_err(|_| malformed())?;
                Value::Number(Number::from_f64(f64::from_le_bytes(raw)).ok_or_else(malformed)?)
            }
            _ => Value::String(String::from_utf8(bytes.to_vec()).map_err(|_| malformed())?),
        };
        if value.is_null() && !self.is_optional() {
            return Err(Error::InvalidCiphertext(format!(
                "non-optional column {column} decrypted to null"
            )));
        }
        Ok(value)
    }
}

/// One computed blind index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexOutput {
    /// Index value plus the storage column tag.
    Typed {
        #[serde(rename = "type")]
        type_tag: String,
        value: String,
    },
    /// The bare hex index value.
    Flat(String),
}

impl IndexOutput {
    /// The hex-encoded index value.
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::Typed { value, .. } | Self::Flat(value) => value,
        }
    }
}

/// Encryption policy for the rows of one table.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use veildb::backend::Backend;
/// use veildb::blind_index::BlindIndex;
/// use veildb::key_provider::StringProvider;
/// use veildb::row::{EncryptedRow, FieldType};
/// use veildb::transform::LastFourDigits;
/// use veildb::vault::Vault;
///
/// # fn main() -> Result<(), veildb::error::Error> {
/// let vault = Vault::new(StringProvider::new(&"4e".repeat(32))?, Backend::Boring);
/// let mut contacts = EncryptedRow::new(vault, "contacts");
/// contacts
///     .add_field("ssn", FieldType::Text)
///     .add_field("hivstatus", FieldType::OptionalBoolean)
///     .set_primary_key("id");
/// contacts.add_blind_index(
///     "ssn",
///     BlindIndex::new("contact_ssn_last_four", 16).with_transform(LastFourDigits).with_fast(true),
/// )?;
///
/// let row = json!({"id": 7, "ssn": "123-45-6789", "hivstatus": null});
/// let (stored, indexes) = contacts.prepare_row_for_storage(row.as_object().unwrap())?;
/// assert_ne!(stored["ssn"], row["ssn"]);
/// assert!(indexes.contains_key("contact_ssn_last_four"));
/// assert_eq!(&contacts.decrypt_row(&stored)?, row.as_object().unwrap());
/// # Ok(())
/// # }
/// ```
pub struct EncryptedRow<P: KeyProvider> {
    vault: Vault<P>,
    table: String,
    fields: BTreeMap<String, FieldType>,
    aad_sources: HashMap<String, Aad>,
    blind_indexes: BTreeMap<String, Vec<BlindIndex>>,
    compound_indexes: Vec<CompoundIndex>,
    primary_key: Option<String>,
    typed_indexes: bool,
}

impl<P: KeyProvider> Clone for EncryptedRow<P> {
    fn clone(&self) -> Self {
        Self {
            vault: self.vault.clone(),
            table: self.table.clone(),
            fields: self.fields.clone(),
            aad_sources: self.aad_sources.clone(),
            blind_indexes: self.blind_indexes.clone(),
            compound_indexes: self.compound_indexes.clone(),
            primary_key: self.primary_key.clone(),
            typed_indexes: self.typed_indexes,
        }
    }
}

impl<P: KeyProvider> std::fmt::Debug for EncryptedRow<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedRow")
            .field("table", &self.table)
            .field("backend", &self.vault.backend())
            .field("fields", &self.fields)
            .field("blind_indexes", &self.blind_indexes)
            .field("compound_indexes", &self.compound_indexes)
            .field("primary_key", &self.primary_key)
            .finish_non_exhaustive()
    }
}

impl<P: KeyProvider> EncryptedRow<P> {
    /// Creates an empty policy for `table`. Indexes are typed by default.
    pub fn new(vault: Vault<P>, table: impl Into<String>) -> Self {
        Self {
            vault,
            table: table.into(),
            fields: BTreeMap::new(),
            aad_sources: HashMap::new(),
            blind_indexes: BTreeMap::new(),
            compound_indexes: Vec::new(),
            primary_key: None,
            typed_indexes: true,
        }
    }

    /// Registers an encrypted column.
    pub fn add_field(&mut self, name: impl Into<String>, field_type: FieldType) -> &mut Self {
        self.fields.insert(name.into(), field_type);
        self
    }

    /// Registers an encrypted column that binds `aad`.
    pub fn add_field_with_aad(
        &mut self,
        name: impl Into<String>,
        field_type: FieldType,
        aad: Aad,
    ) -> &mut Self {
        let name = name.into();
        self.aad_sources.insert(name.clone(), aad);
        self.add_field(name, field_type)
    }

    /// Binds every encrypted column to the value of the primary key column.
    ///
    /// This stops ciphertexts from being swapped between rows.
    pub fn set_primary_key(&mut self, column: impl Into<String>) -> &mut Self {
        self.primary_key = Some(column.into());
        self
    }

    /// Returns indexes as bare values instead of `{type, value}` pairs.
    pub fn set_flat_indexes(&mut self, flat: bool) -> &mut Self {
        self.typed_indexes = !flat;
        self
    }

    /// Registers a blind index on an encrypted column.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the column is not registered or the
    /// index name is already used in this table.
    pub fn add_blind_index(&mut self, column: &str, index: BlindIndex) -> Result<&mut Self, Error> {
        if !self.fields.contains_key(column) {
            return Err(Error::Configuration(format!(
                "cannot index unregistered column {column} of table {}",
                self.table
            )));
        }
        self.check_index_name(index.name())?;
        self.blind_indexes.entry(column.to_string()).or_default().push(index);
        Ok(self)
    }

    /// Registers a compound index.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the index name is already used in
    /// this table.
    pub fn add_compound_index(&mut self, index: CompoundIndex) -> Result<&mut Self, Error> {
        self.check_index_name(index.name())?;
        self.compound_indexes.push(index);
        Ok(self)
    }

    fn check_index_name(&self, name: &str) -> Result<(), Error> {
        let taken = self.blind_indexes.values().flatten().any(|i| i.name() == name)
            || self.compound_indexes.iter().any(|i| i.name() == name);
        if taken {
            return Err(Error::Configuration(format!(
                "index {name} is already registered on table {}",
                self.table
            )));
        }
        Ok(())
    }

    /// The table name.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// The vault used for keys and primitives.
    #[must_use]
    pub const fn vault(&self) -> &Vault<P> {
        &self.vault
    }

    /// The declared type of a column, if registered.
    #[must_use]
    pub fn field_type(&self, column: &str) -> Option<FieldType> {
        self.fields.get(column).copied()
    }

    /// Registered encrypted columns, sorted.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// The same policy under another vault. Used when rotating.
    #[must_use]
    pub fn with_vault(&self, vault: Vault<P>) -> Self {
        Self { vault, ..self.clone() }
    }

    /// The AAD bound to `column`, if any.
    fn aad_for(&self, column: &str) -> Option<Aad> {
        let source = self.aad_sources.get(column);
        let primary = self.primary_key.as_deref().map(Aad::field);
        match (source, primary) {
            (Some(source), Some(primary)) => Some(source.merge(&primary)),
            (Some(source), None) => Some(source.clone()),
            (None, primary) => primary,
        }
    }

    fn aad_bytes(&self, column: &str, row: &Row) -> Vec<u8> {
        self.aad_for(column).map(|aad| aad.canonicalize(row)).unwrap_or_default()
    }

    /// Rejects policies whose AAD would read ciphertext instead of plaintext.
    fn validate(&self) -> Result<(), Error> {
        if let Some(pk) = &self.primary_key {
            if self.fields.contains_key(pk) {
                return Err(Error::Configuration(format!(
                    "primary key column {pk} cannot be encrypted"
                )));
            }
        }
        for (column, aad) in &self.aad_sources {
            if let Some(source) = aad.field_names().find(|name| self.fields.contains_key(*name)) {
                return Err(Error::Configuration(format!(
                    "AAD of column {column} references encrypted column {source}"
                )));
            }
        }
        Ok(())
    }

    fn require_fields(&self, row: &Row) -> Result<(), Error> {
        match self.fields.keys().find(|column| !row.contains_key(*column)) {
            Some(missing) => Err(Error::MissingField(missing.clone())),
            None => Ok(()),
        }
    }

    /// Encrypts every registered column; other columns are copied as-is.
    ///
    /// All registered columns must be present before anything is encrypted.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingField` for an absent column and
    /// `Error::Configuration` for a type mismatch or an invalid policy.
    pub fn encrypt_row(&self, row: &Row) -> Result<Row, Error> {
        self.validate()?;
        self.require_fields(row)?;
        tracing::debug!(table = %self.table, fields = self.fields.len(), "encrypting row");

        let mut out = row.clone();
        for (column, field_type) in &self.fields {
            let Some(encoded) = field_type.encode(column, &row[column])? else {
                continue;
            };
            let aad = self.aad_bytes(column, row);
            let token = self.vault.encrypt_field(&self.table, column, &encoded, &aad)?;
            out.insert(column.clone(), Value::String(token));
        }
        Ok(out)
    }

    /// Decrypts every registered column.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCiphertext` if any column fails to authenticate
    /// or decode, or a non-optional column is `null`.
    pub fn decrypt_row(&self, row: &Row) -> Result<Row, Error> {
        self.validate()?;
        self.require_fields(row)?;
        tracing::debug!(table = %self.table, fields = self.fields.len(), "decrypting row");

        let mut out = row.clone();
        for (column, field_type) in &self.fields {
            let value = match &row[column] {
                Value::Null if field_type.is_optional() => Value::Null,
                Value::String(token) => {
                    let aad = self.aad_bytes(column, row);
                    let plaintext =
                        Zeroizing::new(self.vault.decrypt_field(&self.table, column, token, &aad)?);
                    field_type.decode(column, &plaintext)?
                }
                _ => {
                    return Err(Error::InvalidCiphertext(format!(
                        "column {column} does not hold a ciphertext"
                    )))
                }
            };
            out.insert(column.clone(), value);
        }
        Ok(out)
    }

    fn index_output(&self, field: &str, index: &str, raw: &[u8]) -> Result<IndexOutput, Error> {
        let value = hex::encode(raw);
        if self.typed_indexes {
            let type_tag = self.vault.index_type_column(&self.table, field, index)?;
            Ok(IndexOutput::Typed { type_tag, value })
        } else {
            Ok(IndexOutput::Flat(value))
        }
    }

    /// Computes one blind or compound index of a plaintext row.
    ///
    /// Returns `None` when the indexed column is an optional `null`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if no index has this name.
    pub fn get_blind_index(&self, name: &str, row: &Row) -> Result<Option<IndexOutput>, Error> {
        for (column, indexes) in &self.blind_indexes {
            if let Some(index) = indexes.iter().find(|i| i.name() == name) {
                return self.compute_blind_index(column, index, row);
            }
        }
        if let Some(index) = self.compound_indexes.iter().find(|i| i.name() == name) {
            return self.compute_compound_index(index, row).map(Some);
        }
        Err(Error::Configuration(format!("no index named {name} on table {}", self.table)))
    }

    fn compute_blind_index(
        &self,
        column: &str,
        index: &BlindIndex,
        row: &Row,
    ) -> Result<Option<IndexOutput>, Error> {
        let value = row.get(column).ok_or_else(|| Error::MissingField(column.to_string()))?;
        let field_type = self
            .field_type(column)
            .ok_or_else(|| Error::Configuration(format!("column {column} is not registered")))?;
        let Some(encoded) = field_type.encode(column, value)? else {
            return Ok(None);
        };
        let raw = self.vault.blind_index(&self.table, column, index, &encoded)?;
        self.index_output(column, index.name(), &raw).map(Some)
    }

    fn compute_compound_index(
        &self,
        index: &CompoundIndex,
        row: &Row,
    ) -> Result<IndexOutput, Error> {
        let raw = self.vault.compound_index(&self.table, index, row)?;
        self.index_output(COMPOUND_SPECIAL, index.name(), &raw)
    }

    /// Computes every registered index of a plaintext row.
    ///
    /// Indexes over optional columns that are `null` are left out.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingField` if an indexed column is absent.
    pub fn get_all_blind_indexes(&self, row: &Row) -> Result<IndexMap, Error> {
        let mut out = IndexMap::new();
        for (column, indexes) in &self.blind_indexes {
            for index in indexes {
                if let Some(output) = self.compute_blind_index(column, index, row)? {
                    out.insert(index.name().to_string(), output);
                }
            }
        }
        for index in &self.compound_indexes {
            out.insert(index.name().to_string(), self.compute_compound_index(index, row)?);
        }
        Ok(out)
    }

    /// Encrypts the row and computes its indexes.
    ///
    /// # Errors
    ///
    /// See [`EncryptedRow::encrypt_row`] and
    /// [`EncryptedRow::get_all_blind_indexes`].
    pub fn prepare_row_for_storage(&self, row: &Row) -> Result<(Row, IndexMap), Error> {
        let indexes = self.get_all_blind_indexes(row)?;
        let encrypted = self.encrypt_row(row)?;
        Ok((encrypted, indexes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::key::SymmetricKey;
    use crate::key_provider::StringProvider;
    use crate::transform::{LastFourDigits, Lowercase};
    use serde_json::json;

    fn vault(backend: Backend) -> Vault<StringProvider> {
        Vault::new(StringProvider::from_key(SymmetricKey::from_bytes(&[9u8; 32]).unwrap()), backend)
    }

    fn obj(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn contacts(backend: Backend) -> EncryptedRow<StringProvider> {
        let mut row = EncryptedRow::new(vault(backend), "contacts");
        row.add_field("active", FieldType::Boolean)
            .add_field("age", FieldType::Integer)
            .add_field("score", FieldType::Float)
            .add_field("name", FieldType::Text)
            .add_field("notes", FieldType::OptionalText)
            .add_field("vip", FieldType::OptionalBoolean);
        row
    }

    fn sample() -> Row {
        obj(json!({
            "id": 12,
            "active": true,
            "age": -42,
            "score": 3.75,
            "name": "Ada",
            "notes": null,
            "vip": false,
            "plain": "untouched"
        }))
    }

    #[test]
    fn test_typed_round_trip() {
        for backend in Backend::ALL {
            let table = contacts(backend);
            let encrypted = table.encrypt_row(&sample()).unwrap();
            assert_eq!(encrypted["plain"], json!("untouched"));
            assert_eq!(encrypted["notes"], Value::Null);
            let magic = std::str::from_utf8(backend.magic_header()).unwrap();
            assert!(encrypted["name"].as_str().unwrap().starts_with(magic));

            let decrypted = table.decrypt_row(&encrypted).unwrap();
            assert_eq!(decrypted["age"], json!(-42));
            assert!((decrypted["score"].as_f64().unwrap() - 3.75).abs() < f64::EPSILON);
            assert_eq!(decrypted, sample());
        }
    }

    #[test]
    fn test_fixed_width_encoding() {
        let table = contacts(Backend::Standard);
        let small = table.encrypt_row(&sample()).unwrap();
        let mut big_row = sample();
        big_row.insert("age".into(), json!(i64::MAX));
        let big = table.encrypt_row(&big_row).unwrap();
        assert_eq!(small["age"].as_str().unwrap().len(), big["age"].as_str().unwrap().len());
    }

    #[test]
    fn test_missing_field_before_encryption() {
        let mut row = sample();
        row.remove("score");
        let result = contacts(Backend::Standard).encrypt_row(&row);
        assert!(matches!(result, Err(Error::MissingField(f)) if f == "score"));
    }

    #[test]
    fn test_type_mismatch() {
        let mut row = sample();
        row.insert("age".into(), json!("forty"));
        let result = contacts(Backend::Standard).encrypt_row(&row);
        assert!(matches!(result, Err(Error::Configuration(_))));

        let mut row = sample();
        row.insert("name".into(), Value::Null);
        let result = contacts(Backend::Standard).encrypt_row(&row);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_non_optional_null_rejected_on_decrypt() {
        let table = contacts(Backend::Standard);
        let mut encrypted = table.encrypt_row(&sample()).unwrap();
        encrypted.insert("name".into(), Value::Null);
        assert!(table.decrypt_row(&encrypted).unwrap_err().is_invalid_ciphertext());
    }

    #[test]
    fn test_boolean_null_byte_rejected_for_non_optional() {
        assert!(FieldType::Boolean.decode("b", &[0]).unwrap_err().is_invalid_ciphertext());
        assert_eq!(FieldType::OptionalBoolean.decode("b", &[0]).unwrap(), Value::Null);
        assert!(FieldType::Integer.decode("i", &[0; 4]).is_err());
    }

    #[test]
    fn test_primary_key_prevents_row_swap() {
        let mut table = contacts(Backend::Standard);
        table.set_primary_key("id");
        let a = table.encrypt_row(&sample()).unwrap();

        let mut moved = a.clone();
        moved.insert("id".into(), json!(13));
        assert!(table.decrypt_row(&moved).unwrap_err().is_invalid_ciphertext());
        assert_eq!(table.decrypt_row(&a).unwrap(), sample());
    }

    #[test]
    fn test_encrypted_primary_key_rejected() {
        let mut table = contacts(Backend::Standard);
        table.set_primary_key("name");
        assert!(matches!(table.encrypt_row(&sample()), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_aad_from_encrypted_column_rejected() {
        let mut table = contacts(Backend::Standard);
        table.add_field_with_aad("secret", FieldType::Text, Aad::field("name"));
        let mut row = sample();
        row.insert("secret".into(), json!("s"));
        assert!(matches!(table.encrypt_row(&row), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_field_aad_binding() {
        let mut table = EncryptedRow::new(vault(Backend::Fips), "t");
        table.add_field_with_aad(
            "secret",
            FieldType::Text,
            Aad::field("tenant").with_literal("v1"),
        );
        let row = obj(json!({"tenant": "acme", "secret": "s3cr3t"}));
        let mut encrypted = table.encrypt_row(&row).unwrap();
        assert_eq!(table.decrypt_row(&encrypted).unwrap(), row);

        encrypted.insert("tenant".into(), json!("evil"));
        assert!(table.decrypt_row(&encrypted).is_err());
    }

    #[test]
    fn test_blind_index_registration() {
        let mut table = contacts(Backend::Standard);
        assert!(table.add_blind_index("unknown", BlindIndex::new("i", 16)).is_err());
        table.add_blind_index("name", BlindIndex::new("name_idx", 16)).unwrap();
        assert!(table.add_blind_index("age", BlindIndex::new("name_idx", 16)).is_err());
        assert!(table.add_compound_index(CompoundIndex::new("name_idx", ["name"], 16)).is_err());
    }

    #[test]
    fn test_typed_and_flat_indexes() {
        let mut table = contacts(Backend::Standard);
        table
            .add_blind_index(
                "name",
                BlindIndex::new("name_idx", 32).with_transform(Lowercase).with_fast(true),
            )
            .unwrap()
            .add_blind_index("notes", BlindIndex::new("notes_idx", 32).with_fast(true))
            .unwrap()
            .add_compound_index(CompoundIndex::new("age_name", ["age", "name"], 32).with_fast(true))
            .unwrap();

        let indexes = table.get_all_blind_indexes(&sample()).unwrap();
        assert_eq!(indexes.len(), 2, "null optional column is not indexed");
        let IndexOutput::Typed { type_tag, value } = &indexes["name_idx"] else {
            panic!("expected typed output");
        };
        let expected_tag = table.vault().index_type_column("contacts", "name", "name_idx").unwrap();
        assert_eq!(type_tag, &expected_tag);
        assert_eq!(value.len(), 8);

        let mut upper = sample();
        upper.insert("name".into(), json!("ADA"));
        assert_eq!(
            table.get_blind_index("name_idx", &upper).unwrap().unwrap().value(),
            indexes["name_idx"].value()
        );

        table.set_flat_indexes(true);
        let flat = table.get_all_blind_indexes(&sample()).unwrap();
        assert_eq!(flat["age_name"], IndexOutput::Flat(indexes["age_name"].value().to_string()));
        assert_eq!(
            serde_json::to_string(&flat["name_idx"]).unwrap(),
            format!("\"{}\"", indexes["name_idx"].value())
        );
        assert!(table.get_blind_index("nope", &sample()).is_err());
    }

    #[test]
    fn test_typed_output_serializes_with_type_key() {
        let output = IndexOutput::Typed { type_tag: "abcd".into(), value: "0102".into() };
        assert_eq!(serde_json::to_string(&output).unwrap(), r#"{"type":"abcd","value":"0102"}"#);
    }

    #[test]
    fn test_prepare_row_for_storage() {
        let mut table = EncryptedRow::new(vault(Backend::Boring), "contacts");
        table.add_field("ssn", FieldType::Text).set_primary_key("id");
        table
            .add_blind_index(
                "ssn",
                BlindIndex::new("ssn_last4", 16).with_transform(LastFourDigits).with_fast(true),
            )
            .unwrap();

        let row = obj(json!({"id": 1, "ssn": "123-45-6789"}));
        let (stored, indexes) = table.prepare_row_for_storage(&row).unwrap();
        assert_ne!(stored["ssn"], row["ssn"]);
        assert_eq!(indexes["ssn_last4"].value().len(), 4);
        assert_eq!(table.decrypt_row(&stored).unwrap(), row);
    }

    #[test]
    fn test_field_type_serde() {
        assert_eq!(serde_json::to_string(&FieldType::OptionalText).unwrap(), "\"optional_text\"");
        let parsed: FieldType = serde_json::from_str("\"integer\"").unwrap();
        assert_eq!(parsed, FieldType::Integer);
    }
}
