//! Compound blind indexes over several columns.
//!
//! The selected columns are transformed, packed with [`CompoundPacker`] into
//! one ordered JSON object and digested like a single-field blind index. A
//! search then matches the conjunction of all columns with one token.

use crate::aad::value_to_string;
use crate::backend::{Backend, HashConfig};
use crate::blind_index::digest;
use crate::error::Error;
use crate::key::SymmetricKey;
use crate::row::Row;
use crate::transform::{apply_all, CompoundPacker, RowTransformation, Transformation};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A named blind index over an ordered list of columns.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use veildb::compound_index::CompoundIndex;
/// use veildb::transform::LastFourDigits;
///
/// let index = CompoundIndex::new("ssnlast4_hivstatus", ["ssn", "hivstatus"], 32)
///     .with_column_transform("ssn", LastFourDigits)
///     .with_fast(true);
///
/// let row = json!({"ssn": "123-45-6789", "hivstatus": true});
/// let packed = index.packed(row.as_object().unwrap()).unwrap();
/// assert_eq!(packed, br#"{"ssn":"0400000000000000Njc4OQ==","hivstatus":true}"#);
/// ```
#[derive(Clone)]
pub struct CompoundIndex {
    name: String,
    columns: Vec<String>,
    column_transforms: HashMap<String, Vec<Arc<dyn Transformation>>>,
    bit_length: u32,
    fast: bool,
    hash_config: HashConfig,
    row_transform: Option<Arc<dyn RowTransformation>>,
    packer: CompoundPacker,
}

impl CompoundIndex {
    /// Creates a slow compound index over `columns`, in that order.
    pub fn new<I, S>(name: impl Into<String>, columns: I, bit_length: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            column_transforms: HashMap::new(),
            bit_length,
            fast: false,
            hash_config: HashConfig::default(),
            row_transform: None,
            packer: CompoundPacker,
        }
    }

    /// Appends a transformation for one column.
    #[must_use]
    pub fn with_column_transform(
        mut self,
        column: impl Into<String>,
        transform: impl Transformation + 'static,
    ) -> Self {
        self.column_transforms.entry(column.into()).or_default().push(Arc::new(transform));
        self
    }

    /// Replaces column packing with a whole-row transformation.
    #[must_use]
    pub fn with_row_transform(mut self, transform: impl RowTransformation + 'static) -> Self {
        self.row_transform = Some(Arc::new(transform));
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

    /// Index name, unique per table.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source columns in packing order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
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

    /// The bytes that get digested for `row`.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingField` if a source column is absent, or
    /// `Error::Configuration` if packing fails.
    pub fn packed(&self, row: &Row) -> Result<Vec<u8>, Error> {
        if let Some(transform) = &self.row_transform {
            return transform.transform_row(row);
        }

        let mut packed = Map::new();
        for column in &self.columns {
            let value = row.get(column).ok_or_else(|| Error::MissingField(column.clone()))?;
            let leaf = match self.column_transforms.get(column) {
                Some(transforms) if !transforms.is_empty() => {
                    let input = value_to_string(Some(value));
                    let output = apply_all(transforms, input.as_bytes())?;
                    Value::String(CompoundPacker::pack_bytes(&output))
                }
                _ => self.packer.pack(value)?,
            };
            packed.insert(column.clone(), leaf);
        }
        Ok(self.packer.serialize(&packed)?.into_bytes())
    }

    /// Packs and digests `row` under an already-derived index key.
    ///
    /// # Errors
    ///
    /// Propagates packing and hashing errors.
    pub fn digest(
        &self,
        backend: Backend,
        key: &SymmetricKey,
        row: &Row,
    ) -> Result<Vec<u8>, Error> {
        let packed = self.packed(row)?;
        digest(backend, key, &packed, self.bit_length, self.fast, &self.hash_config)
    }
}

impl fmt::Debug for CompoundIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompoundIndex")
            .field("name", &self.name)
            .field("columns", &self.columns)
            .field("bit_length", &self.bit_length)
            .field("fast", &self.fast)
            .field("row_transform", &self.row_transform.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{FirstInitialLastName, LastFourDigits};
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn key() -> SymmetricKey {
        SymmetricKey::from_bytes(&[1u8; 32]).unwrap()
    }

    #[test]
    fn test_packing_matches_reference_string() {
        let index = CompoundIndex::new("ssnlast4_hivstatus", ["ssn", "hivstatus"], 32)
            .with_column_transform("ssn", LastFourDigits);
        let packed = index.packed(&row(json!({"ssn": "123-45-6789", "hivstatus": true}))).unwrap();
        assert_eq!(
            String::from_utf8(packed).unwrap(),
            r#"{"ssn":"0400000000000000Njc4OQ==","hivstatus":true}"#
        );
    }

    #[test]
    fn test_binary_transform_output_is_packed_exactly() {
        let ff = CompoundIndex::new("i", ["c"], 32)
            .with_column_transform("c", |_: &[u8]| -> Result<Vec<u8>, Error> { Ok(vec![0xff]) });
        let fe = CompoundIndex::new("i", ["c"], 32)
            .with_column_transform("c", |_: &[u8]| -> Result<Vec<u8>, Error> { Ok(vec![0xfe]) });
        let r = row(json!({"c": "anything"}));

        let packed_ff = ff.packed(&r).unwrap();
        assert_eq!(packed_ff, br#"{"c":"0100000000000000/w=="}"#);
        assert_ne!(packed_ff, fe.packed(&r).unwrap());

        let ff = ff.with_fast(true);
        let fe = fe.with_fast(true);
        assert_ne!(
            ff.digest(Backend::Boring, &key(), &r).unwrap(),
            fe.digest(Backend::Boring, &key(), &r).unwrap()
        );
    }

    #[test]
    fn test_column_order_is_declaration_order() {
        let r = row(json!({"a": "x", "b": "y"}));
        let ab = CompoundIndex::new("i", ["a", "b"], 32).packed(&r).unwrap();
        let ba = CompoundIndex::new("i", ["b", "a"], 32).packed(&r).unwrap();
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_missing_column() {
        let index = CompoundIndex::new("i", ["ssn", "hivstatus"], 32);
        let result = index.packed(&row(json!({"ssn": "123"})));
        assert!(matches!(result, Err(Error::MissingField(c)) if c == "hivstatus"));
    }

    #[test]
    fn test_row_transform_overrides_packing() {
        let index = CompoundIndex::new("name_idx", ["first", "last"], 32)
            .with_row_transform(FirstInitialLastName::new("first", "last"))
            .with_fast(true);
        let jane = row(json!({"first": "Jane", "last": "Doe"}));
        let initial = row(json!({"first": "J", "last": "doe"}));
        let a = index.digest(Backend::Standard, &key(), &jane).unwrap();
        let b = index.digest(Backend::Standard, &key(), &initial).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_digest_distinguishes_values() {
        let index = CompoundIndex::new("i", ["a", "b"], 64).with_fast(true);
        let x = index.digest(Backend::Fips, &key(), &row(json!({"a": "1", "b": "23"}))).unwrap();
        let y = index.digest(Backend::Fips, &key(), &row(json!({"a": "12", "b": "3"}))).unwrap();
        assert_ne!(x, y);
    }
}
