//! Chunked two-pass stream encryption.
//!
//! Stream layout:
//! ```text
//! Standard / Boring: magic(5) || tag(32) || salt(16) || nonce(24)                 || chunk*
//! Fips:              magic(5) || tag(48) || salt(16) || hkdf_salt(32) || iv(16)   || chunk*
//! ```
//!
//! Encryption is a single pass: the tag position is filled with zeros, the
//! chunks are streamed through the cipher and a running MAC, and the final
//! tag is written back over the placeholder.
//!
//! Decryption needs a seekable input and reads it twice. The first pass
//! recomputes the running MAC and records a short keyed checksum per chunk;
//! nothing is written. The second pass re-reads every chunk, checks it against
//! its recorded checksum and decrypts it into a spooled scratch buffer.
//! Leftover or surplus checksums mean the input changed between passes. The
//! output only receives plaintext once every checksum has been consumed.
//!
//! Each chunk starts at keystream block `index * ceil(chunk_size / block)`,
//! so chunk keystreams never overlap.

use crate::backend::fips::{self, Aes256Ctr, HmacSha384};
use crate::backend::Backend;
use crate::error::Error;
use crate::hash::{
    chunk_checksum, keyed_hash_256, running_mac, verify_chunk_checksum, Blake2bMac256,
};
use crate::header::MAGIC_HEADER_SIZE;
use crate::kdf::hkdf_sha384;
use crate::key::{SymmetricKey, KEY_SIZE};
use crate::util::{le64, random_bytes, read_full};
use chacha20::cipher::consts::U10;
use chacha20::cipher::generic_array::GenericArray;
use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::ChaCha20;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::io::{self, Read, Seek, SeekFrom, Write};
use tempfile::SpooledTempFile;
use zeroize::{Zeroize, Zeroizing};

/// Default plaintext chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Size of the salt stored in every stream header.
pub const SALT_SIZE: usize = 16;

const CHECKSUM_SIZE: usize = 16;

/// Decrypted plaintext above this size is staged on disk instead of in memory.
const SPOOL_LIMIT: usize = 1 << 20;
const CHECKSUM_INFO: &[u8] = b"chunk-checksum";

const CHACHA_BLOCK_SIZE: u64 = 64;
const AES_BLOCK_SIZE: u64 = 16;

const fn tag_size(backend: Backend) -> usize {
    match backend {
        Backend::Standard | Backend::Boring => 32,
        Backend::Fips => fips::MAC_SIZE,
    }
}

const fn nonce_size(backend: Backend) -> usize {
    match backend {
        Backend::Standard | Backend::Boring => 24,
        Backend::Fips => fips::HKDF_SALT_SIZE + fips::IV_SIZE,
    }
}

/// Byte offset of the salt within the header.
pub(crate) const fn salt_offset(backend: Backend) -> usize {
    MAGIC_HEADER_SIZE + tag_size(backend)
}

/// Total header length before the first chunk.
pub(crate) const fn header_size(backend: Backend) -> usize {
    salt_offset(backend) + SALT_SIZE + nonce_size(backend)
}

enum Keystream {
    ChaCha(ChaCha20),
    Aes(Box<Aes256Ctr>),
}

impl Keystream {
    /// Encrypts or decrypts chunk `index` in place.
    fn apply(&mut self, index: u64, chunk_size: usize, chunk: &mut [u8]) -> Result<(), Error> {
        let block = match self {
            Self::ChaCha(_) => CHACHA_BLOCK_SIZE,
            Self::Aes(_) => AES_BLOCK_SIZE,
        };
        let blocks_per_chunk = (chunk_size as u64).div_ceil(block);
        let position = index
            .checked_mul(blocks_per_chunk)
            .and_then(|b| b.checked_mul(block))
            .ok_or_else(|| {
                Error::CryptoOperation("stream too long for the keystream".to_string())
            })?;

        let seek = match self {
            Self::ChaCha(cipher) => cipher.try_seek(position),
            Self::Aes(cipher) => cipher.try_seek(position),
        };
        seek.map_err(|_| Error::CryptoOperation("stream too long for the keystream".to_string()))?;

        let result = match self {
            Self::ChaCha(cipher) => cipher.try_apply_keystream(chunk),
            Self::Aes(cipher) => cipher.try_apply_keystream(chunk),
        };
        result.map_err(|_| Error::CryptoOperation("keystream exhausted".to_string()))
    }
}

enum RunningMac {
    Blake2b(Blake2bMac256),
    Hmac(Box<HmacSha384>),
}

impl RunningMac {
    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Blake2b(mac) => mac.update(data),
            Self::Hmac(mac) => mac.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Self::Blake2b(mac) => mac.finalize().into_bytes().to_vec(),
            Self::Hmac(mac) => mac.finalize().into_bytes().to_vec(),
        }
    }

    /// Constant-time comparison against the stored tag.
    fn verify(self, expected: &[u8]) -> bool {
        match self {
            Self::Blake2b(mac) => mac.verify_slice(expected).is_ok(),
            Self::Hmac(mac) => mac.verify_slice(expected).is_ok(),
        }
    }
}

enum ChecksumKey {
    Blake2b(Zeroizing<[u8; 32]>),
    Hmac(Zeroizing<Vec<u8>>),
}

impl ChecksumKey {
    fn hmac(key: &[u8]) -> Result<Hmac<Sha256>, Error> {
        <Hmac<Sha256> as Mac>::new_from_slice(key)
            .map_err(|e| Error::CryptoOperation(format!("invalid HMAC key: {e}")))
    }

    fn compute(&self, chunk: &[u8]) -> Result<[u8; CHECKSUM_SIZE], Error> {
        match self {
            Self::Blake2b(key) => chunk_checksum(key.as_slice(), chunk),
            Self::Hmac(key) => {
                let mut mac = Self::hmac(key)?;
                mac.update(chunk);
                let mut out = [0u8; CHECKSUM_SIZE];
                out.copy_from_slice(&mac.finalize().into_bytes()[..CHECKSUM_SIZE]);
                Ok(out)
            }
        }
    }

    fn verify(&self, chunk: &[u8], expected: &[u8]) -> Result<bool, Error> {
        match self {
            Self::Blake2b(key) => verify_chunk_checksum(key.as_slice(), chunk, expected),
            Self::Hmac(key) => {
                let mut mac = Self::hmac(key)?;
                mac.update(chunk);
                Ok(mac.verify_truncated_left(expected).is_ok())
            }
        }
    }
}

/// Per-stream primitives derived from the key and the header nonce.
struct StreamState {
    keystream: Keystream,
    mac: RunningMac,
    checksum: ChecksumKey,
}

impl StreamState {
    fn new(backend: Backend, key: &SymmetricKey, nonce: &[u8]) -> Result<Self, Error> {
        match backend {
            Backend::Standard | Backend::Boring => {
                let (subkey_input, tail) = nonce.split_at(16);
                let mut subkey = chacha20::hchacha::<U10>(
                    GenericArray::from_slice(key.as_bytes()),
                    GenericArray::from_slice(subkey_input),
                );
                let subkey_bytes = Zeroizing::new(subkey.to_vec());
                subkey.as_mut_slice().zeroize();

                let mut iv = [0u8; 12];
                iv[4..].copy_from_slice(tail);
                let cipher = ChaCha20::new_from_slices(&subkey_bytes, &iv)
                    .map_err(|e| {
                        Error::CryptoOperation(format!("invalid ChaCha20 parameters: {e}"))
                    })?;

                Ok(Self {
                    keystream: Keystream::ChaCha(cipher),
                    mac: RunningMac::Blake2b(running_mac(&subkey_bytes)?),
                    checksum: ChecksumKey::Blake2b(Zeroizing::new(keyed_hash_256(
                        &subkey_bytes,
                        &[CHECKSUM_INFO],
                    )?)),
                })
            }
            Backend::Fips => {
                let (hkdf_salt, iv) = nonce.split_at(fips::HKDF_SALT_SIZE);
                let (enc_key, mac_key) = fips::split_key(key, hkdf_salt)?;
                Ok(Self {
                    keystream: Keystream::Aes(Box::new(fips::ctr_cipher(&enc_key, iv)?)),
                    mac: RunningMac::Hmac(Box::new(fips::hmac_sha384(&mac_key)?)),
                    checksum: ChecksumKey::Hmac(hkdf_sha384(
                        &mac_key,
                        hkdf_salt,
                        CHECKSUM_INFO,
                        KEY_SIZE,
                    )?),
                })
            }
        }
    }
}

fn check_chunk_size(chunk_size: usize) -> Result<(), Error> {
    if chunk_size == 0 {
        return Err(Error::Configuration("chunk size must be greater than zero".to_string()));
    }
    Ok(())
}

fn tampered(message: &str) -> Error {
    tracing::warn!(reason = message, "stream authentication failed");
    Error::InvalidCiphertext(message.to_string())
}

pub(crate) fn encrypt<R: Read + ?Sized, W: Write + Seek + ?Sized>(
    backend: Backend,
    input: &mut R,
    output: &mut W,
    key: &SymmetricKey,
    salt: &[u8; SALT_SIZE],
    aad: &[u8],
    chunk_size: usize,
) -> Result<(), Error> {
    check_chunk_size(chunk_size)?;
    let start = output.stream_position()?;
    let magic = backend.magic_header();
    let nonce = random_bytes(nonce_size(backend))?;
    let mut state = StreamState::new(backend, key, &nonce)?;

    output.write_all(magic)?;
    output.write_all(&vec![0u8; tag_size(backend)])?;
    output.write_all(salt)?;
    output.write_all(&nonce)?;
    for part in [magic.as_slice(), salt.as_slice(), nonce.as_slice(), aad] {
        state.mac.update(part);
    }

    let mut buf = Zeroizing::new(vec![0u8; chunk_size]);
    let mut total: usize = 0;
    let mut index: u64 = 0;
    loop {
        let n = read_full(input, &mut buf)?;
        if n == 0 {
            break;
        }
        let chunk = &mut buf[..n];
        state.keystream.apply(index, chunk_size, chunk)?;
        state.mac.update(chunk);
        output.write_all(chunk)?;
        total += n;
        index += 1;
        if n < chunk_size {
            break;
        }
    }

    state.mac.update(&le64(aad.len()));
    state.mac.update(&le64(total));
    let tag = state.mac.finalize();

    let end = output.stream_position()?;
    output.seek(SeekFrom::Start(start + MAGIC_HEADER_SIZE as u64))?;
    output.write_all(&tag)?;
    output.seek(SeekFrom::Start(end))?;
    output.flush()?;

    tracing::debug!(?backend, chunks = index, bytes = total, "stream encrypted");
    Ok(())
}

pub(crate) fn decrypt<R: Read + Seek + ?Sized, W: Write + ?Sized>(
    backend: Backend,
    input: &mut R,
    output: &mut W,
    key: &SymmetricKey,
    aad: &[u8],
    chunk_size: usize,
) -> Result<(), Error> {
    check_chunk_size(chunk_size)?;
    let start = input.stream_position()?;
    let magic = backend.magic_header();

    let mut header = vec![0u8; header_size(backend)];
    if read_full(input, &mut header)? < header.len() {
        return Err(tampered("stream header is truncated"));
    }
    if &header[..MAGIC_HEADER_SIZE] != magic.as_slice() {
        return Err(Error::InvalidCiphertext(
            "stream magic header does not match the active backend".to_string(),
        ));
    }
    let (tag, rest) = header[MAGIC_HEADER_SIZE..].split_at(tag_size(backend));
    let (salt, nonce) = rest.split_at(SALT_SIZE);

    let mut state = StreamState::new(backend, key, nonce)?;
    for part in [magic.as_slice(), salt, nonce, aad] {
        state.mac.update(part);
    }

    // Pass 1: authenticate, recording a checksum per chunk.
    let mut buf = Zeroizing::new(vec![0u8; chunk_size]);
    let mut checksums = Vec::new();
    let mut total: usize = 0;
    loop {
        let n = read_full(input, &mut buf)?;
        if n == 0 {
            break;
        }
        let chunk = &buf[..n];
        state.mac.update(chunk);
        checksums.push(state.checksum.compute(chunk)?);
        total += n;
        if n < chunk_size {
            break;
        }
    }
    state.mac.update(&le64(aad.len()));
    state.mac.update(&le64(total));

    let StreamState { mut keystream, mac, checksum } = state;
    if !mac.verify(tag) {
        return Err(tampered("stream authentication tag mismatch"));
    }
    tracing::trace!(?backend, chunks = checksums.len(), "stream tag verified");

    // Pass 2: re-read, check each chunk against pass 1, then decrypt it.
    input.seek(SeekFrom::Start(start + header.len() as u64))?;
    let mut staged = SpooledTempFile::new(SPOOL_LIMIT);
    let mut expected = checksums.iter();
    let mut index: u64 = 0;
    loop {
        let n = read_full(input, &mut buf)?;
        if n == 0 {
            break;
        }
        let Some(sum) = expected.next() else {
            return Err(tampered("stream grew after authentication"));
        };
        let chunk = &mut buf[..n];
        if !checksum.verify(chunk, sum)? {
            return Err(tampered("chunk checksum mismatch"));
        }
        keystream.apply(index, chunk_size, chunk)?;
        staged.write_all(chunk)?;
        index += 1;
        if n < chunk_size {
            break;
        }
    }
    if expected.next().is_some() {
        return Err(tampered("stream shrank after authentication"));
    }
    staged.seek(SeekFrom::Start(0))?;
    io::copy(&mut staged, output)?;
    output.flush()?;

    tracing::debug!(?backend, chunks = index, bytes = total, "stream decrypted");
    Ok(())
}

/// Reads the header salt and restores the stream position.
pub(crate) fn read_salt<R: Read + Seek + ?Sized>(
    backend: Backend,
    input: &mut R,
) -> Result<[u8; SALT_SIZE], Error> {
    let start = input.stream_position()?;
    let mut header = vec![0u8; salt_offset(backend) + SALT_SIZE];
    let n = read_full(input, &mut header)?;
    input.seek(SeekFrom::Start(start))?;

    if n < header.len() || &header[..MAGIC_HEADER_SIZE] != backend.magic_header().as_slice() {
        return Err(Error::InvalidCiphertext(
            "stream magic header does not match the active backend".to_string(),
        ));
    }
    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(&header[salt_offset(backend)..]);
    Ok(salt)
}

/// Whether the stream starts with `backend`'s magic header. Restores the position.
pub(crate) fn has_magic_header<R: Read + Seek + ?Sized>(
    backend: Backend,
    input: &mut R,
) -> Result<bool, Error> {
    let start = input.stream_position()?;
    let mut magic = [0u8; MAGIC_HEADER_SIZE];
    let n = read_full(input, &mut magic)?;
    input.seek(SeekFrom::Start(start))?;
    Ok(n == MAGIC_HEADER_SIZE && &magic == backend.magic_header())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};

    fn key() -> SymmetricKey {
        SymmetricKey::from_bytes(&[11u8; 32]).unwrap()
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn encrypt_bytes(backend: Backend, plaintext: &[u8], aad: &[u8], chunk_size: usize) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        let salt = [3u8; SALT_SIZE];
        encrypt(backend, &mut &plaintext[..], &mut out, &key(), &salt, aad, chunk_size).unwrap();
        out.into_inner()
    }

    fn decrypt_bytes(
        backend: Backend,
        ciphertext: Vec<u8>,
        aad: &[u8],
        chunk_size: usize,
    ) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        decrypt(backend, &mut Cursor::new(ciphertext), &mut out, &key(), aad, chunk_size)?;
        Ok(out)
    }

    /// Changes the underlying data the first time the reader rewinds.
    struct MutatesBetweenPasses {
        inner: Cursor<Vec<u8>>,
        mutate: Option<Box<dyn FnOnce(&mut Vec<u8>)>>,
    }

    impl Read for MutatesBetweenPasses {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl Seek for MutatesBetweenPasses {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            if matches!(pos, SeekFrom::Start(_)) {
                if let Some(mutate) = self.mutate.take() {
                    mutate(self.inner.get_mut());
                }
            }
            self.inner.seek(pos)
        }
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(salt_offset(Backend::Standard), 37);
        assert_eq!(salt_offset(Backend::Boring), 37);
        assert_eq!(salt_offset(Backend::Fips), 53);
        assert_eq!(header_size(Backend::Standard), 77);
        assert_eq!(header_size(Backend::Fips), 117);
    }

    #[test]
    fn test_round_trip_multi_chunk() {
        let plaintext = sample(DEFAULT_CHUNK_SIZE * 3 + 100);
        for backend in Backend::ALL {
            let ciphertext = encrypt_bytes(backend, &plaintext, b"", DEFAULT_CHUNK_SIZE);
            assert_eq!(ciphertext.len(), header_size(backend) + plaintext.len());
            let salt_at = salt_offset(backend);
            assert_eq!(&ciphertext[salt_at..salt_at + SALT_SIZE], &[3u8; SALT_SIZE]);
            let decrypted = decrypt_bytes(backend, ciphertext, b"", DEFAULT_CHUNK_SIZE).unwrap();
            assert_eq!(decrypted, plaintext);
        }
    }

    #[test]
    fn test_round_trip_edge_sizes() {
        for backend in Backend::ALL {
            for len in [0, 1, 63, 64, 65, 100, 128] {
                let plaintext = sample(len);
                let ciphertext = encrypt_bytes(backend, &plaintext, b"aad", 64);
                let decrypted = decrypt_bytes(backend, ciphertext, b"aad", 64).unwrap();
                assert_eq!(decrypted, plaintext, "{backend:?} {len}");
            }
        }
    }

    #[test]
    fn test_odd_chunk_size_keystreams_do_not_overlap() {
        let plaintext = vec![0u8; 100];
        let ciphertext = encrypt_bytes(Backend::Standard, &plaintext, b"", 10);
        let body = &ciphertext[header_size(Backend::Standard)..];
        assert_ne!(&body[..10], &body[10..20]);
        assert_eq!(decrypt_bytes(Backend::Standard, ciphertext, b"", 10).unwrap(), plaintext);
    }

    #[test]
    fn test_tag_is_back_patched() {
        let ciphertext = encrypt_bytes(Backend::Boring, b"data", b"", 16);
        assert_ne!(&ciphertext[MAGIC_HEADER_SIZE..salt_offset(Backend::Boring)], &[0u8; 32]);
    }

    #[test]
    fn test_truncated_trailing_chunk_rejected() {
        let plaintext = sample(DEFAULT_CHUNK_SIZE * 2 + 10);
        for backend in Backend::ALL {
            let mut ciphertext = encrypt_bytes(backend, &plaintext, b"", DEFAULT_CHUNK_SIZE);
            ciphertext.truncate(ciphertext.len() - 10);
            let err = decrypt_bytes(backend, ciphertext, b"", DEFAULT_CHUNK_SIZE).unwrap_err();
            assert!(err.is_invalid_ciphertext());
        }
    }

    #[test]
    fn test_tampered_chunk_rejected() {
        let plaintext = sample(500);
        for backend in Backend::ALL {
            let mut ciphertext = encrypt_bytes(backend, &plaintext, b"", 128);
            let last = ciphertext.len() - 1;
            ciphertext[last] ^= 0x01;
            let err = decrypt_bytes(backend, ciphertext, b"", 128).unwrap_err();
            assert!(err.is_invalid_ciphertext());
        }
    }

    #[test]
    fn test_wrong_aad_rejected() {
        let ciphertext = encrypt_bytes(Backend::Standard, b"payload", b"file-1", 64);
        assert!(decrypt_bytes(Backend::Standard, ciphertext, b"file-2", 64).is_err());
    }

    #[test]
    fn test_wrong_backend_rejected() {
        let ciphertext = encrypt_bytes(Backend::Standard, b"payload", b"", 64);
        assert!(matches!(
            decrypt_bytes(Backend::Boring, ciphertext, b"", 64),
            Err(Error::InvalidCiphertext(_))
        ));
    }

    #[test]
    fn test_chunk_removed_between_passes() {
        let plaintext = sample(64 * 4);
        for backend in Backend::ALL {
            let ciphertext = encrypt_bytes(backend, &plaintext, b"", 64);
            let mut reader = MutatesBetweenPasses {
                inner: Cursor::new(ciphertext),
                mutate: Some(Box::new(|data: &mut Vec<u8>| data.truncate(data.len() - 64))),
            };
            let mut out = Vec::new();
            let err = decrypt(backend, &mut reader, &mut out, &key(), b"", 64).unwrap_err();
            assert!(err.is_invalid_ciphertext(), "{backend:?}");
            assert!(out.is_empty(), "{backend:?} released {} bytes", out.len());
        }
    }

    #[test]
    fn test_chunk_appended_between_passes() {
        let plaintext = sample(64 * 2);
        let ciphertext = encrypt_bytes(Backend::Fips, &plaintext, b"", 64);
        let mut reader = MutatesBetweenPasses {
            inner: Cursor::new(ciphertext),
            mutate: Some(Box::new(|data: &mut Vec<u8>| data.extend_from_slice(&[0u8; 64]))),
        };
        let mut out = Vec::new();
        let err = decrypt(Backend::Fips, &mut reader, &mut out, &key(), b"", 64).unwrap_err();
        assert!(err.is_invalid_ciphertext());
        assert!(out.is_empty());
    }

    #[test]
    fn test_chunk_modified_between_passes_releases_nothing() {
        let plaintext = sample(64);
        let ciphertext = encrypt_bytes(Backend::Standard, &plaintext, b"", 64);
        let mut reader = MutatesBetweenPasses {
            inner: Cursor::new(ciphertext),
            mutate: Some(Box::new(|data: &mut Vec<u8>| {
                let last = data.len() - 1;
                data[last] ^= 0xFF;
            })),
        };
        let mut out = Vec::new();
        assert!(decrypt(Backend::Standard, &mut reader, &mut out, &key(), b"", 64).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let mut out = Cursor::new(Vec::new());
        let salt = [0u8; SALT_SIZE];
        let result = encrypt(Backend::Standard, &mut &b"x"[..], &mut out, &key(), &salt, b"", 0);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_read_salt_and_magic() {
        for backend in Backend::ALL {
            let mut cursor = Cursor::new(encrypt_bytes(backend, b"x", b"", 64));
            assert_eq!(read_salt(backend, &mut cursor).unwrap(), [3u8; SALT_SIZE]);
            assert!(has_magic_header(backend, &mut cursor).unwrap());
            assert_eq!(cursor.position(), 0);
        }
        let mut plain = Cursor::new(b"plain text file".to_vec());
        assert!(!has_magic_header(Backend::Standard, &mut plain).unwrap());
        assert!(read_salt(Backend::Standard, &mut plain).is_err());
    }
}
