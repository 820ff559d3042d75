//! # `VeilDB`
//!
//! Searchable field-level encryption for untrusted data stores.
//!
//! ## Features
//!
//! - Three interchangeable backends behind one API: XChaCha20-Poly1305
//!   (`Standard`), AES-256-CTR with HMAC-SHA-384 (`Fips`), and XChaCha20
//!   with a BLAKE2b MAC (`Boring`)
//! - Per-table, per-column keys derived from one master key
//! - Blind indexes and compound blind indexes for equality search
//! - AAD binding of ciphertexts to other columns of the row
//! - Typed row, multi-table and JSON document encryption
//! - Chunked two-pass file encryption with truncation detection
//! - Key and backend rotation helpers
//!
//! ## Example
//!
//! ```
//! use serde_json::json;
//! use veildb::prelude::*;
//!
//! # fn main() -> Result<(), veildb::error::Error> {
//! let vault = Vault::new(StringProvider::new(&"4e".repeat(32))?, Backend::Standard);
//!
//! let mut users = EncryptedRow::new(vault, "users");
//! users.add_field("email", FieldType::Text).set_primary_key("id");
//! users.add_blind_index(
//!     "email",
//!     BlindIndex::new("email_idx", 32).with_transform(Lowercase).with_fast(true),
//! )?;
//!
//! let row = json!({"id": 1, "email": "Alice@Example.com"});
//! let (stored, indexes) = users.prepare_row_for_storage(row.as_object().unwrap())?;
//! assert!(indexes.contains_key("email_idx"));
//! assert_eq!(&users.decrypt_row(&stored)?, row.as_object().unwrap());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod aad;
pub mod backend;
pub mod blind_index;
pub mod compound_index;
pub mod context;
pub mod error;
pub mod field;
pub mod file;
pub(crate) mod hash;
pub mod header;
pub mod json_field;
pub mod kdf;
pub mod key;
pub mod key_provider;
pub mod multi_rows;
pub mod rotation;
pub mod row;
pub mod stream;
pub mod transform;
pub(crate) mod util;
pub mod vault;

pub mod prelude {
    //! Convenience re-exports for common use.
    pub use crate::aad::Aad;
    pub use crate::backend::{Backend, HashConfig};
    pub use crate::blind_index::BlindIndex;
    pub use crate::compound_index::CompoundIndex;
    pub use crate::error::{Error, KeyProviderError};
    pub use crate::field::EncryptedField;
    pub use crate::file::EncryptedFile;
    pub use crate::json_field::{EncryptedJsonField, JsonFieldMap};
    pub use crate::key::SymmetricKey;
    pub use crate::key_provider::{KeyProvider, StringProvider};
    pub use crate::multi_rows::EncryptedMultiRows;
    pub use crate::rotation::{FieldRotator, RotationStatus, RowRotator};
    pub use crate::row::{EncryptedRow, FieldType, IndexOutput, Row};
    pub use crate::transform::{
        DigitsOnly, FirstCharacter, FirstInitialLastName, LastFourDigits, Lowercase,
    };
    pub use crate::vault::Vault;
}
