//! Standard backend: XChaCha20-Poly1305, BLAKE2b and Argon2id.

use super::{authentication_failed, HashConfig};
use crate::context::IndexContext;
use crate::error::Error;
use crate::hash::{hash_128, keyed_hash_512, keyed_hash_64};
use crate::header::{decode_token, encode_token, MagicHeader};
use crate::key::{SymmetricKey, KEY_SIZE};
use crate::util::{and_mask, bytes_for_bits, random_bytes};
use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use zeroize::Zeroizing;

pub(super) const MAGIC: &MagicHeader = b"nacl:";

const NONCE_SIZE: usize = 24;
const TAG_SIZE: usize = 16;

/// Argon2id floors, matching libsodium's interactive limits.
pub(super) const MIN_OPS_LIMIT: u32 = 2;
pub(super) const MIN_MEM_LIMIT_KIB: u32 = 64 * 1024;

/// Argon2id passes for password-derived stream keys.
const PASSWORD_OPS_LIMIT: u32 = 3;

/// Argon2id output is never shorter than this, whatever the bit length.
const MIN_SLOW_HASH_LEN: usize = 16;

/// AEAD associated data: `magic || nonce || aad`.
fn bound_aad(nonce: &[u8], aad: &[u8]) -> Vec<u8> {
    let mut bound = Vec::with_capacity(MAGIC.len() + nonce.len() + aad.len());
    bound.extend_from_slice(MAGIC);
    bound.extend_from_slice(nonce);
    bound.extend_from_slice(aad);
    bound
}

fn cipher(key: &SymmetricKey) -> Result<XChaCha20Poly1305, Error> {
    XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|e| Error::CryptoOperation(format!("invalid key: {e}")))
}

/// Body layout: `nonce(24) || ciphertext || tag(16)`.
pub(super) fn encrypt(plaintext: &[u8], key: &SymmetricKey, aad: &[u8]) -> Result<String, Error> {
    let nonce = random_bytes(NONCE_SIZE)?;
    let ciphertext = cipher(key)?
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload { msg: plaintext, aad: &bound_aad(&nonce, aad) },
        )
        .map_err(|e| Error::CryptoOperation(format!("XChaCha20-Poly1305 encryption failed: {e}")))?;

    let mut body = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    body.extend_from_slice(&nonce);
    body.extend_from_slice(&ciphertext);
    Ok(encode_token(MAGIC, &body))
}

pub(super) fn decrypt(token: &str, key: &SymmetricKey, aad: &[u8]) -> Result<Vec<u8>, Error> {
    let body = decode_token(MAGIC, token, NONCE_SIZE + TAG_SIZE)?;
    let (nonce, ciphertext) = body.split_at(NONCE_SIZE);

    cipher(key)?
        .decrypt(
            XNonce::from_slice(nonce),
            Payload { msg: ciphertext, aad: &bound_aad(nonce, aad) },
        )
        .map_err(|_| authentication_failed())
}

/// Keyed BLAKE2b, truncated to `bit_length` bits.
pub(super) fn blind_index_fast(
    plaintext: &[u8],
    key: &SymmetricKey,
    bit_length: u32,
) -> Result<Vec<u8>, Error> {
    let digest = Zeroizing::new(keyed_hash_512(key.as_bytes(), plaintext)?);
    Ok(and_mask(&digest[..], bit_length))
}

/// Argon2id with the key's BLAKE2b-128 as salt, truncated to `bit_length` bits.
pub(super) fn blind_index_slow(
    plaintext: &[u8],
    key: &SymmetricKey,
    bit_length: u32,
    config: &HashConfig,
) -> Result<Vec<u8>, Error> {
    let ops_limit = config.ops_limit.unwrap_or(MIN_OPS_LIMIT).max(MIN_OPS_LIMIT);
    let mem_limit = config.mem_limit_kib.unwrap_or(MIN_MEM_LIMIT_KIB).max(MIN_MEM_LIMIT_KIB);
    let out_len = bytes_for_bits(bit_length).max(MIN_SLOW_HASH_LEN);
    let salt = hash_128(key.as_bytes());

    let hash = argon2id(plaintext, &salt, ops_limit, mem_limit, out_len)?;
    Ok(and_mask(&hash, bit_length))
}

pub(super) fn argon2id(
    password: &[u8],
    salt: &[u8],
    ops_limit: u32,
    mem_limit_kib: u32,
    out_len: usize,
) -> Result<Zeroizing<Vec<u8>>, Error> {
    let params = Params::new(mem_limit_kib, ops_limit, 1, Some(out_len))
        .map_err(|e| Error::CryptoOperation(format!("invalid Argon2id params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut out = Zeroizing::new(vec![0u8; out_len]);
    argon2
        .hash_password_into(password, salt, &mut out)
        .map_err(|e| Error::CryptoOperation(format!("Argon2id failed: {e}")))?;
    Ok(out)
}

/// Stream key from a password, bound to the 16-byte header salt.
pub(super) fn derive_key_from_password(
    password: &[u8],
    salt: &[u8],
) -> Result<SymmetricKey, Error> {
    let key = argon2id(password, salt, PASSWORD_OPS_LIMIT, MIN_MEM_LIMIT_KIB, KEY_SIZE)?;
    SymmetricKey::from_bytes(&key)
}

/// Keyed BLAKE2b-64 of `(field, index)` under a key hashed from the table name.
pub(super) fn index_type_tag(context: &IndexContext) -> Result<String, Error> {
    let table_key = hash_128(context.table_name().as_bytes());
    let tag = keyed_hash_64(&table_key, &context.packed_field_and_index())?;
    Ok(hex::encode(tag))
}
