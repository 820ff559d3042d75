//! Value transformations applied before blind indexing.
//!
//! Transformations normalize or reduce a plaintext so that the resulting
//! index matches on something other than the exact value (case-insensitive
//! email, last four digits of an SSN, first initial plus last name).

use crate::error::Error;
use crate::row::Row;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Value};

/// Maximum nesting depth accepted by [`CompoundPacker`].
pub const MAX_PACK_DEPTH: usize = 255;

/// A pure function over one field's bytes.
pub trait Transformation: Send + Sync {
    /// Transforms the input.
    ///
    /// # Errors
    ///
    /// Implementations return `Error::Configuration` for inputs they cannot
    /// handle.
    fn transform(&self, input: &[u8]) -> Result<Vec<u8>, Error>;
}

/// A pure function over a whole row, replacing compound packing.
pub trait RowTransformation: Send + Sync {
    /// Produces the bytes to index from the row.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingField` if a needed column is absent.
    fn transform_row(&self, row: &Row) -> Result<Vec<u8>, Error>;
}

impl<F> Transformation for F
where
    F: Fn(&[u8]) -> Result<Vec<u8>, Error> + Send + Sync,
{
    fn transform(&self, input: &[u8]) -> Result<Vec<u8>, Error> {
        self(input)
    }
}

/// ASCII/Unicode lowercase.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lowercase;

impl Transformation for Lowercase {
    fn transform(&self, input: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(String::from_utf8_lossy(input).to_lowercase().into_bytes())
    }
}

/// Keeps only ASCII digits.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigitsOnly;

impl Transformation for DigitsOnly {
    fn transform(&self, input: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(input.iter().copied().filter(u8::is_ascii_digit).collect())
    }
}

/// The last four digits, left-padded with `0` when fewer are present.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastFourDigits;

impl Transformation for LastFourDigits {
    fn transform(&self, input: &[u8]) -> Result<Vec<u8>, Error> {
        let digits = DigitsOnly.transform(input)?;
        let tail = &digits[digits.len().saturating_sub(4)..];
        let mut out = vec![b'0'; 4 - tail.len()];
        out.extend_from_slice(tail);
        Ok(out)
    }
}

/// The first character (not byte) of the input.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstCharacter;

impl Transformation for FirstCharacter {
    fn transform(&self, input: &[u8]) -> Result<Vec<u8>, Error> {
        let text = String::from_utf8_lossy(input);
        Ok(text.chars().next().map(String::from).unwrap_or_default().into_bytes())
    }
}

/// Lowercased first initial of one column followed by another column.
///
/// For fuzzy name matching: `("Jane", "Doe")` and `("J.", "doe")` index
/// identically.
#[derive(Debug, Clone)]
pub struct FirstInitialLastName {
    first_name: String,
    last_name: String,
}

impl FirstInitialLastName {
    /// Reads the two named columns.
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self { first_name: first_name.into(), last_name: last_name.into() }
    }

    fn column<'a>(row: &'a Row, name: &str) -> Result<&'a Value, Error> {
        row.get(name).ok_or_else(|| Error::MissingField(name.to_string()))
    }
}

impl RowTransformation for FirstInitialLastName {
    fn transform_row(&self, row: &Row) -> Result<Vec<u8>, Error> {
        let first = crate::aad::value_to_string(Some(Self::column(row, &self.first_name)?));
        let last = crate::aad::value_to_string(Some(Self::column(row, &self.last_name)?));
        let mut out: String = first.chars().take(1).collect();
        out.push_str(&last);
        Ok(out.to_lowercase().into_bytes())
    }
}

/// Deterministic packing of compound index inputs.
///
/// String leaves become `hex(LE64(len)) || base64(value)` so that no
/// combination of values can imitate another; numbers are packed through
/// their decimal text; booleans and nulls are kept. Arrays and objects are
/// packed element-wise up to [`MAX_PACK_DEPTH`]. Transformation output is
/// packed as raw bytes with [`CompoundPacker::pack_bytes`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CompoundPacker;

impl CompoundPacker {
    /// Packs a string leaf.
    #[must_use]
    pub fn pack_string(value: &str) -> String {
        Self::pack_bytes(value.as_bytes())
    }

    /// Packs a raw byte leaf, such as the output of a hashing transformation.
    #[must_use]
    pub fn pack_bytes(value: &[u8]) -> String {
        let mut out = hex::encode(crate::util::le64(value.len()));
        STANDARD.encode_string(value, &mut out);
        out
    }

    /// Packs one value.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if nesting exceeds [`MAX_PACK_DEPTH`].
    pub fn pack(&self, value: &Value) -> Result<Value, Error> {
        self.pack_at(value, 0)
    }

    fn pack_at(&self, value: &Value, depth: usize) -> Result<Value, Error> {
        if depth > MAX_PACK_DEPTH {
            return Err(Error::Configuration(format!(
                "compound index input nested deeper than {MAX_PACK_DEPTH} levels"
            )));
        }
        Ok(match value {
            Value::String(s) => Value::String(Self::pack_string(s)),
            Value::Number(n) => Value::String(Self::pack_string(&n.to_string())),
            Value::Bool(_) | Value::Null => value.clone(),
            Value::Array(items) => Value::Array(
                items.iter().map(|item| self.pack_at(item, depth + 1)).collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), self.pack_at(v, depth + 1)?)))
                    .collect::<Result<Map<_, _>, Error>>()?,
            ),
        })
    }

    /// Serializes an ordered map of packed values.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if serialization fails.
    pub fn serialize(&self, packed: &Map<String, Value>) -> Result<String, Error> {
        serde_json::to_string(packed)
            .map_err(|e| {
                Error::Configuration(format!("failed to serialize compound index input: {e}"))
            })
    }
}

/// Runs `input` through each transformation in order.
///
/// # Errors
///
/// Propagates the first transformation error.
pub fn apply_all<T: AsRef<dyn Transformation>>(
    transforms: &[T],
    input: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut value = input.to_vec();
    for transform in transforms {
        value = transform.as_ref().transform(&value)?;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_builtin_transforms() {
        assert_eq!(Lowercase.transform(b"Alice@Example.COM").unwrap(), b"alice@example.com");
        assert_eq!(DigitsOnly.transform(b"123-45-6789").unwrap(), b"123456789");
        assert_eq!(LastFourDigits.transform(b"123-45-6789").unwrap(), b"6789");
        assert_eq!(LastFourDigits.transform(b"x12").unwrap(), b"0012");
        assert_eq!(FirstCharacter.transform("Élan".as_bytes()).unwrap(), "É".as_bytes());
        assert!(FirstCharacter.transform(b"").unwrap().is_empty());
    }

    #[test]
    fn test_pipeline_order() {
        let transforms: Vec<Arc<dyn Transformation>> =
            vec![Arc::new(DigitsOnly), Arc::new(LastFourDigits)];
        assert_eq!(apply_all(&transforms, b"555-123-4567").unwrap(), b"4567");
    }

    #[test]
    fn test_closure_transformation() {
        let reverse =
            |input: &[u8]| -> Result<Vec<u8>, Error> { Ok(input.iter().rev().copied().collect()) };
        assert_eq!(reverse.transform(b"abc").unwrap(), b"cba");
    }

    #[test]
    fn test_first_initial_last_name() {
        let transform = FirstInitialLastName::new("first", "last");
        let a = json!({"first": "Jane", "last": "Doe"});
        let b = json!({"first": "j.", "last": "DOE"});
        let a = transform.transform_row(a.as_object().unwrap()).unwrap();
        let b = transform.transform_row(b.as_object().unwrap()).unwrap();
        assert_eq!(a, b"jdoe");
        assert_eq!(a, b);

        let missing = json!({"first": "Jane"});
        assert!(matches!(
            transform.transform_row(missing.as_object().unwrap()),
            Err(Error::MissingField(f)) if f == "last"
        ));
    }

    #[test]
    fn test_pack_string() {
        assert_eq!(CompoundPacker::pack_string("6789"), "0400000000000000Njc4OQ==");
        assert_eq!(CompoundPacker::pack_string(""), "0000000000000000");
        assert_eq!(CompoundPacker::pack_bytes(&[0xff]), "0100000000000000/w==");
        assert_ne!(CompoundPacker::pack_bytes(&[0xff]), CompoundPacker::pack_bytes(&[0xfe]));
    }

    #[test]
    fn test_pack_values() {
        let packer = CompoundPacker;
        assert_eq!(packer.pack(&json!(true)).unwrap(), json!(true));
        assert_eq!(packer.pack(&json!(null)).unwrap(), json!(null));
        assert_eq!(packer.pack(&json!(12)).unwrap(), json!("0200000000000000MTI="));
        assert_eq!(
            packer.pack(&json!(["a", ["b"]])).unwrap(),
            json!(["0100000000000000YQ==", ["0100000000000000Yg=="]])
        );
    }

    #[test]
    fn test_pack_depth_limit() {
        let mut deep = json!("leaf");
        for _ in 0..=MAX_PACK_DEPTH {
            deep = json!([deep]);
        }
        assert!(matches!(CompoundPacker.pack(&deep), Err(Error::Configuration(_))));

        let mut shallow = json!("leaf");
        for _ in 0..MAX_PACK_DEPTH {
            shallow = json!([shallow]);
        }
        assert!(CompoundPacker.pack(&shallow).is_ok());
    }
}
