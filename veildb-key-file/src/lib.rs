//! File-based key provider for `VeilDB`.
//!
//! The key file holds a single 32-byte master key, either raw or encoded as
//! hex or base64. It is read again on every key request, so replacing the
//! file rotates the key for every subsequent operation.

#![warn(clippy::pedantic, clippy::nursery)]

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use veildb::error::KeyProviderError;
use veildb::key::{SymmetricKey, KEY_SIZE};
use veildb::key_provider::KeyProvider;
use zeroize::Zeroizing;

/// Key provider backed by a single key file.
///
/// # Example
///
/// ```
/// use veildb::key_provider::KeyProvider;
/// use veildb_key_file::FileKeyProvider;
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("master.key");
///
/// FileKeyProvider::init(&path).unwrap();
/// let provider = FileKeyProvider::new(&path);
/// assert_eq!(provider.get_symmetric_key().unwrap().as_bytes().len(), 32);
/// ```
#[derive(Debug, Clone)]
pub struct FileKeyProvider {
    path: PathBuf,
}

impl FileKeyProvider {
    /// Creates a provider reading `path`. The file is not opened until a key
    /// is requested.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the key file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes a freshly generated hex-encoded key to `path`.
    ///
    /// On Unix the file is created with `0600` permissions. An existing file
    /// is never overwritten.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::Io` if the file exists or cannot be written,
    /// and `KeyProviderError::InvalidKey` if key generation fails.
    pub fn init(path: impl AsRef<Path>) -> Result<Self, KeyProviderError> {
        let path = path.as_ref();
        let key =
            SymmetricKey::generate().map_err(|e| KeyProviderError::InvalidKey(e.to_string()))?;

        let mut file = create_private(path)?;
        file.write_all(key.to_hex().as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;

        tracing::debug!(path = %path.display(), "initialized key file");
        Ok(Self::new(path))
    }
}

#[cfg(unix)]
fn create_private(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new().write(true).create_new(true).mode(0o600).open(path)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> io::Result<fs::File> {
    fs::OpenOptions::new().write(true).create_new(true).open(path)
}

impl KeyProvider for FileKeyProvider {
    fn get_symmetric_key(&self) -> Result<SymmetricKey, KeyProviderError> {
        let contents = Zeroizing::new(fs::read(&self.path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => KeyProviderError::KeyNotFound(self.path.display().to_string()),
            _ => KeyProviderError::Io(e),
        })?);

        let key = if contents.len() == KEY_SIZE {
            SymmetricKey::from_bytes(&contents)
        } else {
            let text = std::str::from_utf8(&contents).map_err(|_| {
                KeyProviderError::InvalidKey(format!(
                    "{} is neither raw nor text encoded",
                    self.path.display()
                ))
            })?;
            SymmetricKey::from_encoded(text)
        };
        key.map_err(|e| KeyProviderError::InvalidKey(format!("{}: {e}", self.path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_and_read() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("master.key");

        let provider = FileKeyProvider::init(&path).expect("Failed to initialize key");
        let first = provider.get_symmetric_key().expect("Failed to read key");
        let second = provider.get_symmetric_key().expect("Failed to read key");
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("master.key");
        FileKeyProvider::init(&path).expect("Failed to initialize key");
        assert!(matches!(FileKeyProvider::init(&path), Err(KeyProviderError::Io(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_init_sets_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("master.key");
        FileKeyProvider::init(&path).expect("Failed to initialize key");
        let mode = fs::metadata(&path).expect("Failed to stat key").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_replacing_file_rotates_key() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("master.key");
        fs::write(&path, "11".repeat(32)).expect("Failed to write key");

        let provider = FileKeyProvider::new(&path);
        assert_eq!(provider.get_symmetric_key().unwrap().as_bytes(), &[0x11; 32]);

        fs::write(&path, [0x22u8; 32]).expect("Failed to write key");
        assert_eq!(provider.get_symmetric_key().unwrap().as_bytes(), &[0x22; 32]);
    }

    #[test]
    fn test_missing_and_invalid_files() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let missing = FileKeyProvider::new(dir.path().join("absent.key"));
        assert!(matches!(missing.get_symmetric_key(), Err(KeyProviderError::KeyNotFound(_))));

        let path = dir.path().join("short.key");
        fs::write(&path, "abcd").expect("Failed to write key");
        assert!(matches!(
            FileKeyProvider::new(&path).get_symmetric_key(),
            Err(KeyProviderError::InvalidKey(_))
        ));
    }
}
