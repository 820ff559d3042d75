//! Additional authenticated data bound to field ciphertexts.
//!
//! An [`Aad`] names row columns and literal strings whose values are
//! authenticated (but not encrypted) alongside a ciphertext. Moving a
//! ciphertext to a row with different values for those columns makes it
//! undecryptable.
//!
//! Canonical encoding, with names and literals sorted:
//! ```text
//! LE64(total) || LE64(field count) || LE64(literal count)
//!   || (LE64(len) || name || LE64(len) || value)*   for each field
//!   || (LE64(len) || literal)*                      for each literal
//! ```

use crate::row::Row;
use crate::util::le64;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// A set of column references and literals to authenticate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aad {
    /// Column name to a frozen value; `None` means "read from the row".
    fields: BTreeMap<String, Option<String>>,
    literals: BTreeSet<String>,
    legacy: bool,
}

impl Aad {
    /// An empty AAD. Canonicalizes to the three zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// AAD over a single row column.
    #[must_use]
    pub fn field(name: impl Into<String>) -> Self {
        Self::new().with_field(name)
    }

    /// AAD over a single literal string.
    #[must_use]
    pub fn literal(value: impl Into<String>) -> Self {
        Self::new().with_literal(value)
    }

    /// Adds a row column reference.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>) -> Self {
        self.add_field(name);
        self
    }

    /// Adds a literal string.
    #[must_use]
    pub fn with_literal(mut self, value: impl Into<String>) -> Self {
        self.add_literal(value);
        self
    }

    /// Switches to the legacy encoding. Only for reading old ciphertexts.
    #[must_use]
    pub fn with_legacy(mut self, legacy: bool) -> Self {
        self.legacy = legacy;
        self
    }

    /// Adds a row column reference in place.
    pub fn add_field(&mut self, name: impl Into<String>) {
        self.fields.entry(name.into()).or_insert(None);
    }

    /// Adds a literal string in place.
    pub fn add_literal(&mut self, value: impl Into<String>) {
        self.literals.insert(value.into());
    }

    /// Column names referenced by this AAD, sorted.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.literals.is_empty()
    }

    /// Whether the legacy encoding is active.
    #[must_use]
    pub const fn is_legacy(&self) -> bool {
        self.legacy
    }

    /// Union of both AADs. The result always uses the canonical encoding.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut fields = self.fields.clone();
        for (name, value) in &other.fields {
            match fields.get_mut(name) {
                Some(existing @ None) => existing.clone_from(value),
                Some(Some(_)) => {}
                None => {
                    fields.insert(name.clone(), value.clone());
                }
            }
        }
        Self {
            fields,
            literals: self.literals.union(&other.literals).cloned().collect(),
            legacy: false,
        }
    }

    /// Resolves every column reference against `row` and freezes the values.
    ///
    /// Later changes to the row no longer affect the returned AAD.
    #[must_use]
    pub fn collapsed(&self, row: &Row) -> Self {
        let fields = self
            .fields
            .iter()
            .map(|(name, frozen)| {
                let value = frozen.clone().unwrap_or_else(|| value_to_string(row.get(name)));
                (name.clone(), Some(value))
            })
            .collect();
        Self { fields, literals: self.literals.clone(), legacy: self.legacy }
    }

    /// The deterministic byte string authenticated with the ciphertext.
    #[must_use]
    pub fn canonicalize(&self, row: &Row) -> Vec<u8> {
        let resolved: Vec<(&str, String)> = self
            .fields
            .iter()
            .map(|(name, frozen)| {
                let value = frozen.clone().unwrap_or_else(|| value_to_string(row.get(name)));
                (name.as_str(), value)
            })
            .collect();

        if self.legacy {
            match (resolved.as_slice(), self.literals.len()) {
                ([], 0) => return Vec::new(),
                ([(_, value)], 0) => return value.as_bytes().to_vec(),
                ([], 1) => {
                    if let Some(literal) = self.literals.first() {
                        return literal.as_bytes().to_vec();
                    }
                }
                _ => {}
            }
        }

        let mut out = Vec::new();
        out.extend_from_slice(&le64(resolved.len() + self.literals.len()));
        out.extend_from_slice(&le64(resolved.len()));
        out.extend_from_slice(&le64(self.literals.len()));
        for (name, value) in &resolved {
            out.extend_from_slice(&le64(name.len()));
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(&le64(value.len()));
            out.extend_from_slice(value.as_bytes());
        }
        for literal in &self.literals {
            out.extend_from_slice(&le64(literal.len()));
            out.extend_from_slice(literal.as_bytes());
        }
        out
    }
}

/// String form of a row value as bound into AAD.
///
/// Strings are used as-is, `null` and missing values are empty, everything
/// else is its JSON text. Booleans are therefore bound as `"true"` and
/// `"false"`, not `"1"` and `""`; interoperating writers must use the same
/// form or AAD verification fails.
#[must_use]
pub fn value_to_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    }
}
