//! Keyed and unkeyed BLAKE2b helpers.

use crate::error::Error;
use blake2::digest::consts::{U16, U32, U64, U8};
use blake2::digest::Mac;
use blake2::{Blake2b, Blake2bMac, Digest};

/// Running keyed BLAKE2b-256, the stream authenticator.
pub(crate) type Blake2bMac256 = Blake2bMac<U32>;

/// Keyed BLAKE2b-128, used for per-chunk checksums.
pub(crate) type Blake2bMac128 = Blake2bMac<U16>;

fn keyed<M: Mac + blake2::digest::KeyInit>(key: &[u8], parts: &[&[u8]]) -> Result<M, Error> {
    let mut mac = <M as Mac>::new_from_slice(key)
        .map_err(|_| Error::CryptoOperation("BLAKE2b key must be 1 to 64 bytes".to_string()))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac)
}

fn to_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

/// Keyed BLAKE2b-256 over the concatenation of `parts`.
pub(crate) fn keyed_hash_256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32], Error> {
    let mac = keyed::<Blake2bMac256>(key, parts)?;
    Ok(to_array(&mac.finalize().into_bytes()))
}

/// Keyed BLAKE2b-512 over `data`.
pub(crate) fn keyed_hash_512(key: &[u8], data: &[u8]) -> Result<[u8; 64], Error> {
    let mac = keyed::<Blake2bMac<U64>>(key, &[data])?;
    Ok(to_array(&mac.finalize().into_bytes()))
}

/// Keyed BLAKE2b-64, a short non-security-critical tag.
pub(crate) fn keyed_hash_64(key: &[u8], data: &[u8]) -> Result<[u8; 8], Error> {
    let mac = keyed::<Blake2bMac<U8>>(key, &[data])?;
    Ok(to_array(&mac.finalize().into_bytes()))
}

/// Constant-time check of a keyed BLAKE2b-256 tag.
pub(crate) fn verify_keyed_hash_256(
    key: &[u8],
    parts: &[&[u8]],
    expected: &[u8],
) -> Result<bool, Error> {
    let mac = keyed::<Blake2bMac256>(key, parts)?;
    Ok(mac.verify_slice(expected).is_ok())
}

/// Keyed BLAKE2b-128 of one chunk.
pub(crate) fn chunk_checksum(key: &[u8], chunk: &[u8]) -> Result<[u8; 16], Error> {
    let mac = keyed::<Blake2bMac128>(key, &[chunk])?;
    Ok(to_array(&mac.finalize().into_bytes()))
}

/// Constant-time check of a chunk checksum.
pub(crate) fn verify_chunk_checksum(
    key: &[u8],
    chunk: &[u8],
    expected: &[u8],
) -> Result<bool, Error> {
    let mac = keyed::<Blake2bMac128>(key, &[chunk])?;
    Ok(mac.verify_slice(expected).is_ok())
}

/// Starts a running keyed BLAKE2b-256.
pub(crate) fn running_mac(key: &[u8]) -> Result<Blake2bMac256, Error> {
    keyed::<Blake2bMac256>(key, &[])
}

/// Unkeyed BLAKE2b-128.
pub(crate) fn hash_128(data: &[u8]) -> [u8; 16] {
    to_array(&Blake2b::<U16>::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyed_hash_depends_on_key() {
        let a = keyed_hash_256(&[1u8; 32], &[b"data"]).unwrap();
        let b = keyed_hash_256(&[2u8; 32], &[b"data"]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_keyed_hash_parts_concatenate() {
        let split = keyed_hash_256(&[1u8; 32], &[b"da", b"ta"]).unwrap();
        let whole = keyed_hash_256(&[1u8; 32], &[b"data"]).unwrap();
        assert_eq!(split, whole);
    }

    #[test]
    fn test_verify_keyed_hash() {
        let tag = keyed_hash_256(&[1u8; 32], &[b"data"]).unwrap();
        assert!(verify_keyed_hash_256(&[1u8; 32], &[b"data"], &tag).unwrap());
        assert!(!verify_keyed_hash_256(&[1u8; 32], &[b"datA"], &tag).unwrap());
        assert!(!verify_keyed_hash_256(&[1u8; 32], &[b"data"], &tag[..16]).unwrap());
    }

    #[test]
    fn test_chunk_checksum() {
        let sum = chunk_checksum(&[3u8; 32], b"chunk").unwrap();
        assert!(verify_chunk_checksum(&[3u8; 32], b"chunk", &sum).unwrap());
        assert!(!verify_chunk_checksum(&[3u8; 32], b"chunK", &sum).unwrap());
    }

    #[test]
    fn test_oversized_key_rejected() {
        assert!(matches!(keyed_hash_256(&[0u8; 65], &[b"x"]), Err(Error::CryptoOperation(_))));
    }

    #[test]
    fn test_hash_128_deterministic() {
        assert_eq!(hash_128(b"users"), hash_128(b"users"));
        assert_ne!(hash_128(b"users"), hash_128(b"admins"));
    }
}
