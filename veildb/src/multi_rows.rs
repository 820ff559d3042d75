//! Encryption of related rows from several tables at once.
//!
//! Input is a JSON object keyed by table name, each value being one row.
//! Tables without a registered [`EncryptedRow`] pass through untouched.

use crate::blind_index::BlindIndex;
use crate::compound_index::CompoundIndex;
use crate::error::Error;
use crate::key_provider::KeyProvider;
use crate::row::{EncryptedRow, FieldType, IndexMap, Row};
use crate::vault::Vault;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Rows of several tables, keyed by table name.
pub type MultiRow = Map<String, Value>;

/// Row policies for several tables sharing one vault.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use veildb::backend::Backend;
/// use veildb::key_provider::StringProvider;
/// use veildb::multi_rows::EncryptedMultiRows;
/// use veildb::row::FieldType;
/// use veildb::vault::Vault;
///
/// # fn main() -> Result<(), veildb::error::Error> {
/// let vault = Vault::new(StringProvider::new(&"4e".repeat(32))?, Backend::Fips);
/// let mut rows = EncryptedMultiRows::new(vault);
/// rows.add_field("users", "email", FieldType::Text)
///     .add_field("orders", "total", FieldType::Float);
///
/// let input = json!({
///     "users": {"id": 1, "email": "a@b.c"},
///     "orders": {"id": 9, "total": 12.5},
///     "audit": {"event": "login"}
/// });
/// let stored = rows.encrypt_many_rows(input.as_object().unwrap())?;
/// assert_eq!(stored["audit"], input["audit"]);
/// assert_eq!(&rows.decrypt_many_rows(&stored)?, input.as_object().unwrap());
/// # Ok(())
/// # }
/// ```
pub struct EncryptedMultiRows<P: KeyProvider> {
    vault: Vault<P>,
    tables: BTreeMap<String, EncryptedRow<P>>,
}

impl<P: KeyProvider> std::fmt::Debug for EncryptedMultiRows<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedMultiRows").field("tables", &self.tables).finish_non_exhaustive()
    }
}

impl<P: KeyProvider> EncryptedMultiRows<P> {
    /// Creates an empty set of table policies.
    pub const fn new(vault: Vault<P>) -> Self {
        Self { vault, tables: BTreeMap::new() }
    }

    /// Registers a table, returning its policy for further configuration.
    pub fn add_table(&mut self, table: &str) -> &mut EncryptedRow<P> {
        self.tables
            .entry(table.to_string())
            .or_insert_with(|| EncryptedRow::new(self.vault.clone(), table))
    }

    /// Registers an encrypted column, creating the table if needed.
    pub fn add_field(&mut self, table: &str, column: &str, field_type: FieldType) -> &mut Self {
        self.add_table(table).add_field(column, field_type);
        self
    }

    /// Registers a blind index on a column of a registered table.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the table or column is unknown.
    pub fn add_blind_index(
        &mut self,
        table: &str,
        column: &str,
        index: BlindIndex,
    ) -> Result<&mut Self, Error> {
        self.table_mut(table)?.add_blind_index(column, index)?;
        Ok(self)
    }

    /// Registers a compound index on a registered table.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the table is unknown.
    pub fn add_compound_index(
        &mut self,
        table: &str,
        index: CompoundIndex,
    ) -> Result<&mut Self, Error> {
        self.table_mut(table)?.add_compound_index(index)?;
        Ok(self)
    }

    /// Applies flat or typed index output to every table.
    pub fn set_flat_indexes(&mut self, flat: bool) -> &mut Self {
        for table in self.tables.values_mut() {
            table.set_flat_indexes(flat);
        }
        self
    }

    /// The policy of a registered table.
    #[must_use]
    pub fn table(&self, table: &str) -> Option<&EncryptedRow<P>> {
        self.tables.get(table)
    }

    /// Mutable policy of a registered table.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the table is unknown.
    pub fn table_mut(&mut self, table: &str) -> Result<&mut EncryptedRow<P>, Error> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| Error::Configuration(format!("table {table} is not registered")))
    }

    /// Names of the registered tables, sorted.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    fn map_rows(
        &self,
        rows: &MultiRow,
        op: impl Fn(&EncryptedRow<P>, &Row) -> Result<Row, Error>,
    ) -> Result<MultiRow, Error> {
        let mut out = rows.clone();
        for (name, policy) in &self.tables {
            let Some(value) = rows.get(name) else {
                continue;
            };
            let row = as_row(name, value)?;
            out.insert(name.clone(), Value::Object(op(policy, row)?));
        }
        Ok(out)
    }

    /// Encrypts the row of every registered table present in `rows`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if a registered table is not an
    /// object, or propagates [`EncryptedRow::encrypt_row`] errors.
    pub fn encrypt_many_rows(&self, rows: &MultiRow) -> Result<MultiRow, Error> {
        tracing::debug!(tables = self.tables.len(), "encrypting rows");
        self.map_rows(rows, EncryptedRow::encrypt_row)
    }

    /// Decrypts the row of every registered table present in `rows`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if a registered table is not an
    /// object, or propagates [`EncryptedRow::decrypt_row`] errors.
    pub fn decrypt_many_rows(&self, rows: &MultiRow) -> Result<MultiRow, Error> {
        tracing::debug!(tables = self.tables.len(), "decrypting rows");
        self.map_rows(rows, EncryptedRow::decrypt_row)
    }

    /// Computes every index of every registered table present in `rows`.
    ///
    /// # Errors
    ///
    /// Propagates [`EncryptedRow::get_all_blind_indexes`] errors.
    pub fn get_blind_indexes_for_all_tables(
        &self,
        rows: &MultiRow,
    ) -> Result<BTreeMap<String, IndexMap>, Error> {
        let mut out = BTreeMap::new();
        for (name, policy) in &self.tables {
            if let Some(value) = rows.get(name) {
                out.insert(name.clone(), policy.get_all_blind_indexes(as_row(name, value)?)?);
            }
        }
        Ok(out)
    }

    /// Encrypts all rows and computes all indexes.
    ///
    /// # Errors
    ///
    /// See [`EncryptedMultiRows::encrypt_many_rows`].
    pub fn prepare_for_storage(
        &self,
        rows: &MultiRow,
    ) -> Result<(MultiRow, BTreeMap<String, IndexMap>), Error> {
        let indexes = self.get_blind_indexes_for_all_tables(rows)?;
        Ok((self.encrypt_many_rows(rows)?, indexes))
    }
}

fn as_row<'a>(table: &str, value: &'a Value) -> Result<&'a Row, Error> {
    value
        .as_object()
        .ok_or_else(|| Error::Configuration(format!("row for table {table} is not an object")))
}
