//! Whole-file encryption on top of the chunked stream protocol.
//!
//! Output files are written to a temporary file in the destination
//! directory and moved into place only after the whole operation succeeded,
//! so a failed decryption never leaves partial plaintext behind.

use crate::backend::Backend;
use crate::error::Error;
use crate::key::SymmetricKey;
use crate::key_provider::KeyProvider;
use crate::stream::{self, DEFAULT_CHUNK_SIZE, SALT_SIZE};
use crate::util::random_bytes;
use crate::vault::Vault;
use secrecy::{ExposeSecret, SecretString};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Encrypts and decrypts files and seekable streams.
///
/// # Example
///
/// ```
/// use std::io::Cursor;
/// use veildb::backend::Backend;
/// use veildb::file::EncryptedFile;
/// use veildb::key_provider::StringProvider;
/// use veildb::vault::Vault;
///
/// # fn main() -> Result<(), veildb::error::Error> {
/// let vault = Vault::new(StringProvider::new(&"4e".repeat(32))?, Backend::Boring);
/// let files = EncryptedFile::new(vault).with_chunk_size(1024);
///
/// let plaintext = vec![7u8; 5000];
/// let mut ciphertext = Cursor::new(Vec::new());
/// files.encrypt_stream(&mut Cursor::new(&plaintext), &mut ciphertext)?;
///
/// ciphertext.set_position(0);
/// assert!(files.is_stream_encrypted(&mut ciphertext)?);
/// let mut decrypted = Vec::new();
/// files.decrypt_stream(&mut ciphertext, &mut decrypted)?;
/// assert_eq!(decrypted, plaintext);
/// # Ok(())
/// # }
/// ```
pub struct EncryptedFile<P: KeyProvider> {
    vault: Vault<P>,
    chunk_size: usize,
    aad: Vec<u8>,
}

impl<P: KeyProvider> std::fmt::Debug for EncryptedFile<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFile")
            .field("backend", &self.vault.backend())
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl<P: KeyProvider> EncryptedFile<P> {
    /// Creates a file encryptor with the default chunk size.
    pub const fn new(vault: Vault<P>) -> Self {
        Self { vault, chunk_size: DEFAULT_CHUNK_SIZE, aad: Vec::new() }
    }

    /// Sets the plaintext chunk size. Decryption must use the same size.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Binds additional authenticated data to every stream.
    #[must_use]
    pub fn with_aad(mut self, aad: impl Into<Vec<u8>>) -> Self {
        self.aad = aad.into();
        self
    }

    /// The active backend.
    #[must_use]
    pub const fn backend(&self) -> Backend {
        self.vault.backend()
    }

    /// The plaintext chunk size.
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn random_salt() -> Result<[u8; SALT_SIZE], Error> {
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&random_bytes(SALT_SIZE)?);
        Ok(salt)
    }

    fn password_key(&self, password: &SecretString, salt: &[u8]) -> Result<SymmetricKey, Error> {
        tracing::debug!(backend = ?self.backend(), "deriving stream key from password");
        self.backend().derive_key_from_password(password.expose_secret().as_bytes(), salt)
    }

    fn encrypt_with<R: Read + ?Sized, W: Write + Seek + ?Sized>(
        &self,
        input: &mut R,
        output: &mut W,
        key: &SymmetricKey,
        salt: &[u8; SALT_SIZE],
    ) -> Result<(), Error> {
        self.backend().encrypt_stream(input, output, key, salt, &self.aad, self.chunk_size)
    }

    fn decrypt_with<R: Read + Seek + ?Sized, W: Write + ?Sized>(
        &self,
        input: &mut R,
        output: &mut W,
        key: &SymmetricKey,
    ) -> Result<(), Error> {
        self.backend().decrypt_stream(input, output, key, &self.aad, self.chunk_size)
    }

    /// Encrypts a stream under the vault's master key.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` on read, write or seek failures.
    pub fn encrypt_stream<R: Read + ?Sized, W: Write + Seek + ?Sized>(
        &self,
        input: &mut R,
        output: &mut W,
    ) -> Result<(), Error> {
        self.encrypt_with(input, output, &self.vault.file_key()?, &Self::random_salt()?)
    }

    /// Decrypts a stream encrypted under the vault's master key.
    ///
    /// Nothing is written to `output` unless the whole stream authenticates.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCiphertext` if the stream fails to
    /// authenticate.
    pub fn decrypt_stream<R: Read + Seek + ?Sized, W: Write + ?Sized>(
        &self,
        input: &mut R,
        output: &mut W,
    ) -> Result<(), Error> {
        self.decrypt_with(input, output, &self.vault.file_key()?)
    }

    /// Encrypts a stream under a key derived from `password`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` on read, write or seek failures.
    pub fn encrypt_stream_with_password<R: Read + ?Sized, W: Write + Seek + ?Sized>(
        &self,
        input: &mut R,
        output: &mut W,
        password: &SecretString,
    ) -> Result<(), Error> {
        let salt = Self::random_salt()?;
        let key = self.password_key(password, &salt)?;
        self.encrypt_with(input, output, &key, &salt)
    }

    /// Decrypts a password-encrypted stream. The salt is read from the header.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCiphertext` for a wrong password or a tampered
    /// stream.
    pub fn decrypt_stream_with_password<R: Read + Seek + ?Sized, W: Write + ?Sized>(
        &self,
        input: &mut R,
        output: &mut W,
        password: &SecretString,
    ) -> Result<(), Error> {
        let salt = stream::read_salt(self.backend(), input)?;
        let key = self.password_key(password, &salt)?;
        self.decrypt_with(input, output, &key)
    }

    /// Whether a stream starts with the active backend's magic header.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` on read or seek failures.
    pub fn is_stream_encrypted<R: Read + Seek + ?Sized>(
        &self,
        input: &mut R,
    ) -> Result<bool, Error> {
        stream::has_magic_header(self.backend(), input)
    }

    /// Whether a file starts with the active backend's magic header.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be opened or read.
    pub fn is_file_encrypted(&self, path: impl AsRef<Path>) -> Result<bool, Error> {
        self.is_stream_encrypted(&mut File::open(path)?)
    }

    /// Encrypts `input` into `output` under the vault's master key.
    ///
    /// `input` and `output` may be the same path.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` on filesystem failures.
    pub fn encrypt_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<(), Error> {
        let key = self.vault.file_key()?;
        let salt = Self::random_salt()?;
        process_file(input.as_ref(), output.as_ref(), |src, dst| {
            self.encrypt_with(src, dst, &key, &salt)
        })
    }

    /// Decrypts `input` into `output` under the vault's master key.
    ///
    /// `output` is only created or replaced if decryption succeeded.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCiphertext` if the file fails to authenticate.
    pub fn decrypt_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<(), Error> {
        let key = self.vault.file_key()?;
        process_file(input.as_ref(), output.as_ref(), |src, dst| self.decrypt_with(src, dst, &key))
    }

    /// Encrypts a file under a key derived from `password`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` on filesystem failures.
    pub fn encrypt_file_with_password(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        password: &SecretString,
    ) -> Result<(), Error> {
        process_file(input.as_ref(), output.as_ref(), |src, dst| {
            self.encrypt_stream_with_password(src, dst, password)
        })
    }

    /// Decrypts a password-encrypted file.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCiphertext` for a wrong password or a tampered
    /// file.
    pub fn decrypt_file_with_password(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        password: &SecretString,
    ) -> Result<(), Error> {
        process_file(input.as_ref(), output.as_ref(), |src, dst| {
            self.decrypt_stream_with_password(src, dst, password)
        })
    }
}

fn same_file(a: &Path, b: &Path) -> io::Result<bool> {
    if !b.exists() {
        return Ok(false);
    }
    Ok(a.canonicalize()? == b.canonicalize()?)
}

/// Runs `op` from `input` into a temporary file next to `output`, then moves
/// it into place. When both paths name the same file the input is first
/// copied into an anonymous scratch file.
fn process_file<F>(input: &Path, output: &Path, op: F) -> Result<(), Error>
where
    F: FnOnce(&mut File, &mut NamedTempFile) -> Result<(), Error>,
{
    let mut source = File::open(input)?;
    if same_file(input, output)? {
        tracing::debug!(
            path = %input.display(),
            "input and output are the same file; using scratch copy"
        );
        let mut scratch = tempfile::tempfile()?;
        io::copy(&mut source, &mut scratch)?;
        scratch.seek(SeekFrom::Start(0))?;
        source = scratch;
    }

    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(dir)?;
    op(&mut source, &mut staged)?;
    staged.as_file().sync_all()?;
    staged.persist(output).map_err(|e| e.error)?;
    Ok(())
}
