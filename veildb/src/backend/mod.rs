//! Cryptographic backends.
//!
//! A [`Backend`] selects one fixed primitive suite. The set is closed: each
//! variant owns one of three magic headers, and a ciphertext is only ever
//! decrypted by the backend whose header it carries.
//!
//! | Backend    | Encryption                       | Fast index      | Slow index        |
//! |------------|----------------------------------|-----------------|-------------------|
//! | `Standard` | XChaCha20-Poly1305               | BLAKE2b         | Argon2id          |
//! | `Fips`     | AES-256-CTR + HMAC-SHA-384       | PBKDF2 (1 iter) | PBKDF2 (≥ 50 000) |
//! | `Boring`   | XChaCha20 + keyed BLAKE2b-256    | BLAKE2b         | Argon2id          |

mod asymmetric;
mod boring;
pub(crate) mod fips;
mod modern;

pub use asymmetric::{AsymmetricPublicKey, AsymmetricSecretKey, RSA_KEY_BITS};

use crate::context::IndexContext;
use crate::error::Error;
use crate::header::{token_header, MagicHeader};
use crate::key::SymmetricKey;
use crate::stream;
use serde::{Deserialize, Serialize};
use std::io::{Read, Seek, Write};

/// Largest supported blind index output.
pub const MAX_BIT_LENGTH: u32 = 512;

fn authentication_failed() -> Error {
    Error::InvalidCiphertext("authentication failed: wrong key, AAD or tampered data".to_string())
}

/// Cost parameters for slow blind indexes.
///
/// Every field is optional; unset or too-low values fall back to the
/// backend's floor (Argon2id: 2 passes and 64 MiB, PBKDF2: 50 000
/// iterations).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashConfig {
    /// Argon2id passes.
    pub ops_limit: Option<u32>,
    /// Argon2id memory in KiB.
    pub mem_limit_kib: Option<u32>,
    /// PBKDF2 iterations.
    pub iterations: Option<u32>,
}

/// The primitive suite used for encryption and indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// XChaCha20-Poly1305, BLAKE2b, Argon2id, X25519/Ed25519.
    #[default]
    Standard,
    /// AES-256-CTR, HMAC-SHA-384, PBKDF2, RSA-OAEP/PSS.
    Fips,
    /// XChaCha20 with a separate BLAKE2b authenticator.
    Boring,
}

impl Backend {
    /// All backends, in declaration order.
    pub const ALL: [Self; 3] = [Self::Standard, Self::Fips, Self::Boring];

    /// The 5-byte ASCII prefix of every token this backend produces.
    #[must_use]
    pub const fn magic_header(self) -> &'static MagicHeader {
        match self {
            Self::Standard => modern::MAGIC,
            Self::Fips => fips::MAGIC,
            Self::Boring => boring::MAGIC,
        }
    }

    /// Identifies the backend that produced a token (or stream) from its header.
    #[must_use]
    pub fn from_header(header: &[u8]) -> Option<Self> {
        let prefix = header.get(..crate::header::MAGIC_HEADER_SIZE)?;
        Self::ALL.into_iter().find(|backend| backend.magic_header().as_slice() == prefix)
    }

    /// Identifies the backend that produced a token.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        token_header(token).and_then(Self::from_header)
    }

    /// Whether `token` carries this backend's header.
    #[must_use]
    pub fn owns_token(self, token: &str) -> bool {
        token_header(token) == Some(self.magic_header().as_slice())
    }

    /// Encrypts `plaintext` and binds `aad` to the ciphertext.
    ///
    /// # Errors
    ///
    /// Returns `Error::CryptoOperation` if the RNG or a primitive fails.
    ///
    /// # Example
    ///
    /// ```
    /// use veildb::backend::Backend;
    /// use veildb::key::SymmetricKey;
    ///
    /// let key = SymmetricKey::generate().unwrap();
    /// let token = Backend::Boring.encrypt(b"secret", &key, b"row-42").unwrap();
    /// assert!(token.starts_with("brng:"));
    /// assert_eq!(Backend::Boring.decrypt(&token, &key, b"row-42").unwrap(), b"secret");
    /// ```
    pub fn encrypt(
        self,
        plaintext: &[u8],
        key: &SymmetricKey,
        aad: &[u8],
    ) -> Result<String, Error> {
        match self {
            Self::Standard => modern::encrypt(plaintext, key, aad),
            Self::Fips => fips::encrypt(plaintext, key, aad),
            Self::Boring => boring::encrypt(plaintext, key, aad),
        }
    }

    /// Verifies and decrypts a token.
    ///
    /// The header is checked before anything else; no plaintext is produced
    /// unless the tag verifies.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCiphertext` on header mismatch, a truncated
    /// body, or an authentication failure (wrong key, wrong AAD, tampering).
    pub fn decrypt(self, token: &str, key: &SymmetricKey, aad: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            Self::Standard => modern::decrypt(token, key, aad),
            Self::Fips => fips::decrypt(token, key, aad),
            Self::Boring => boring::decrypt(token, key, aad),
        }
    }

    /// Computes a cheap keyed digest of `plaintext`, `bit_length` bits long.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if `bit_length` is not in `1..=512`.
    pub fn blind_index_fast(
        self,
        plaintext: &[u8],
        key: &SymmetricKey,
        bit_length: u32,
    ) -> Result<Vec<u8>, Error> {
        check_bit_length(bit_length)?;
        match self {
            Self::Standard | Self::Boring => modern::blind_index_fast(plaintext, key, bit_length),
            Self::Fips => Ok(fips::blind_index_fast(plaintext, key, bit_length)),
        }
    }

    /// Computes a deliberately expensive keyed digest of `plaintext`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if `bit_length` is not in `1..=512`,
    /// or `Error::CryptoOperation` if the password hash rejects the
    /// parameters.
    pub fn blind_index_slow(
        self,
        plaintext: &[u8],
        key: &SymmetricKey,
        bit_length: u32,
        config: &HashConfig,
    ) -> Result<Vec<u8>, Error> {
        check_bit_length(bit_length)?;
        match self {
            Self::Standard | Self::Boring => {
                modern::blind_index_slow(plaintext, key, bit_length, config)
            }
            Self::Fips => Ok(fips::blind_index_slow(plaintext, key, bit_length, config)),
        }
    }

    /// Short opaque name for the storage column of an index.
    ///
    /// Not secret and not a security boundary.
    ///
    /// # Errors
    ///
    /// Returns `Error::CryptoOperation` if the keyed hash cannot be built.
    pub fn index_type_tag(self, context: &IndexContext) -> Result<String, Error> {
        match self {
            Self::Standard | Self::Boring => modern::index_type_tag(context),
            Self::Fips => fips::index_type_tag(context),
        }
    }

    /// Derives a stream key from a password and the header salt.
    ///
    /// # Errors
    ///
    /// Returns `Error::CryptoOperation` if the password hash fails.
    pub fn derive_key_from_password(
        self,
        password: &[u8],
        salt: &[u8],
    ) -> Result<SymmetricKey, Error> {
        match self {
            Self::Standard | Self::Boring => modern::derive_key_from_password(password, salt),
            Self::Fips => fips::derive_key_from_password(password, salt),
        }
    }

    /// Generates a key pair of the type this backend uses.
    ///
    /// # Errors
    ///
    /// Returns `Error::CryptoOperation` if key generation fails.
    pub fn generate_keypair(self) -> Result<AsymmetricSecretKey, Error> {
        asymmetric::generate_keypair(self)
    }

    /// Encrypts `plaintext` to the holder of `public`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the key type does not match the
    /// backend.
    pub fn seal(self, plaintext: &[u8], public: &AsymmetricPublicKey) -> Result<String, Error> {
        asymmetric::seal(self, plaintext, public)
    }

    /// Decrypts a message produced by [`Backend::seal`].
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCiphertext` if the message is malformed or was
    /// not sealed to this key.
    pub fn open(self, sealed: &str, secret: &AsymmetricSecretKey) -> Result<Vec<u8>, Error> {
        asymmetric::open(self, sealed, secret)
    }

    /// Signs `message`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the key type does not match the
    /// backend.
    pub fn sign(self, message: &[u8], secret: &AsymmetricSecretKey) -> Result<Vec<u8>, Error> {
        asymmetric::sign(self, message, secret)
    }

    /// Verifies a signature produced by [`Backend::sign`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the key type does not match the
    /// backend.
    pub fn verify(
        self,
        message: &[u8],
        signature: &[u8],
        public: &AsymmetricPublicKey,
    ) -> Result<bool, Error> {
        asymmetric::verify(self, message, signature, public)
    }

    /// Encrypts a stream in fixed-size chunks, back-patching the tag.
    ///
    /// `salt` is stored in the header; it is the password salt when the key
    /// was derived from a password and random otherwise.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` on read, write or seek failures and
    /// `Error::Configuration` for a zero chunk size.
    pub fn encrypt_stream<R: Read + ?Sized, W: Write + Seek + ?Sized>(
        self,
        input: &mut R,
        output: &mut W,
        key: &SymmetricKey,
        salt: &[u8; stream::SALT_SIZE],
        aad: &[u8],
        chunk_size: usize,
    ) -> Result<(), Error> {
        stream::encrypt(self, input, output, key, salt, aad, chunk_size)
    }

    /// Verifies then decrypts a stream in two passes. `output` is written
    /// only after every chunk verified.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCiphertext` if the overall tag or any chunk
    /// checksum fails, or if chunks were added or removed between passes.
    pub fn decrypt_stream<R: Read + Seek + ?Sized, W: Write + ?Sized>(
        self,
        input: &mut R,
        output: &mut W,
        key: &SymmetricKey,
        aad: &[u8],
        chunk_size: usize,
    ) -> Result<(), Error> {
        stream::decrypt(self, input, output, key, aad, chunk_size)
    }

    /// Byte offset of the 16-byte salt in this backend's stream header.
    #[must_use]
    pub const fn stream_salt_offset(self) -> usize {
        stream::salt_offset(self)
    }
}

fn check_bit_length(bit_length: u32) -> Result<(), Error> {
    if bit_length == 0 || bit_length > MAX_BIT_LENGTH {
        return Err(Error::Configuration(format!(
            "blind index bit length must be between 1 and {MAX_BIT_LENGTH}, got {bit_length}"
        )));
    }
    Ok(())
}
