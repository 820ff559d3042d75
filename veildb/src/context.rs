//! Context types for key derivation and index naming.

use crate::util::pack;
use std::fmt;

/// Column name used in place of a field for compound indexes.
pub const COMPOUND_SPECIAL: &str = "special__compound__indexes";

/// Context identifying a single blind index: `(table, field, index)`.
///
/// The triple is packed with length prefixes before it is used as key
/// derivation input, so `("ab", "c", ..)` and `("a", "bc", ..)` never collide.
///
/// # Example
///
/// ```
/// use veildb::context::IndexContext;
///
/// let ctx = IndexContext::new("contacts", "ssn", "contact_ssn_last_four");
/// assert_eq!(ctx.to_string(), "contacts|ssn|contact_ssn_last_four");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexContext {
    table_name: String,
    field_name: String,
    index_name: String,
}

impl IndexContext {
    /// Creates a new index context.
    #[must_use]
    pub fn new(
        table_name: impl Into<String>,
        field_name: impl Into<String>,
        index_name: impl Into<String>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            field_name: field_name.into(),
            index_name: index_name.into(),
        }
    }

    /// Context for a compound index, which spans several fields.
    #[must_use]
    pub fn compound(table_name: impl Into<String>, index_name: impl Into<String>) -> Self {
        Self::new(table_name, COMPOUND_SPECIAL, index_name)
    }

    /// Returns the table name.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Returns the field name.
    #[must_use]
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Returns the index name.
    #[must_use]
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Length-prefixed packing of the triple.
    #[must_use]
    pub fn packed(&self) -> Vec<u8> {
        pack(&[
            self.table_name.as_bytes(),
            self.field_name.as_bytes(),
            self.index_name.as_bytes(),
        ])
    }

    /// Length-prefixed packing of `(field, index)`, used for type tags.
    #[must_use]
    pub fn packed_field_and_index(&self) -> Vec<u8> {
        pack(&[self.field_name.as_bytes(), self.index_name.as_bytes()])
    }
}

/// Human-readable form for logs only; never used as key material.
impl fmt::Display for IndexContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.table_name, self.field_name, self.index_name)
    }
}
