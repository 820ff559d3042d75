//! Basic usage example for `VeilDB`.

use serde_json::json;
use std::path::PathBuf;
use veildb::prelude::*;
use veildb_key_file::FileKeyProvider;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("VeilDB Basic Usage Example");
    println!("==========================\n");

    // Create a key file if it doesn't exist
    let key_path = PathBuf::from("./example_master.key");
    if !key_path.exists() {
        println!("Initializing key file at {}...", key_path.display());
        FileKeyProvider::init(&key_path)?;
        println!("✓ Key file initialized\n");
    }

    let vault = Vault::new(FileKeyProvider::new(&key_path), Backend::Standard);
    println!("✓ Vault created with the {:?} backend\n", vault.backend());

    // Describe the table
    let mut contacts = EncryptedRow::new(vault.clone(), "contacts");
    contacts
        .add_field("email", FieldType::Text)
        .add_field("ssn", FieldType::Text)
        .add_field("hivstatus", FieldType::OptionalBoolean)
        .set_primary_key("id");
    contacts
        .add_blind_index("email", BlindIndex::new("contact_email", 32).with_transform(Lowercase))?
        .add_blind_index(
            "ssn",
            BlindIndex::new("contact_ssn_last_four", 16).with_transform(LastFourDigits),
        )?
        .add_compound_index(
            CompoundIndex::new("contact_ssnlast4_hivstatus", ["ssn", "hivstatus"], 32)
                .with_column_transform("ssn", LastFourDigits),
        )?;

    let row = json!({
        "id": 42,
        "email": "Alice@Example.com",
        "ssn": "123-45-6789",
        "hivstatus": false,
        "created_at": "2024-01-01"
    });
    let row = row.as_object().ok_or("row must be an object")?;

    // Encrypt the row and compute its search indexes
    let (stored, indexes) = contacts.prepare_row_for_storage(row)?;
    println!("Stored row:\n{}\n", serde_json::to_string_pretty(&stored)?);
    println!("Indexes:\n{}\n", serde_json::to_string_pretty(&indexes)?);

    // Decrypt it again
    let decrypted = contacts.decrypt_row(&stored)?;
    assert_eq!(&decrypted, row);
    println!("✓ Round-trip verification successful\n");

    // Look up by email without decrypting anything
    let query = json!({"id": 0, "email": "alice@example.com", "ssn": "", "hivstatus": null});
    let query = query.as_object().ok_or("query must be an object")?;
    let search = contacts.get_blind_index("contact_email", query)?.ok_or("no index value")?;
    assert_eq!(search.value(), indexes["contact_email"].value());
    println!("✓ Search value {} matches the stored index\n", search.value());

    // Encrypt a whole file
    let files = EncryptedFile::new(vault);
    std::fs::write("./example_report.txt", b"quarterly numbers")?;
    files.encrypt_file("./example_report.txt", "./example_report.txt.enc")?;
    files.decrypt_file("./example_report.txt.enc", "./example_report.out.txt")?;
    println!("✓ File encrypted and decrypted\n");

    println!("==========================");
    println!("All operations successful!");
    println!("\nNote: {} and the example_report files can be deleted manually", key_path.display());

    Ok(())
}
