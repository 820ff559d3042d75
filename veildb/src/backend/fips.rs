//! FIPS backend: AES-256-CTR + HMAC-SHA-384, HKDF-SHA-384 and PBKDF2.
//!
//! Each message draws a random 32-byte HKDF salt; the field key is split into
//! an encryption key and an authentication key under that salt, so no two
//! messages share a cipher key.

use super::{authentication_failed, HashConfig};
use crate::context::IndexContext;
use crate::error::Error;
use crate::header::{decode_token, encode_token, MagicHeader};
use crate::kdf::hkdf_sha384;
use crate::key::{SymmetricKey, KEY_SIZE};
use crate::util::{and_mask, bytes_for_bits, pack, random_bytes};
use aes::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha2::Sha384;
use zeroize::Zeroizing;

pub(super) const MAGIC: &MagicHeader = b"fips:";

pub(crate) type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;
pub(crate) type HmacSha384 = Hmac<Sha384>;

pub(crate) const HKDF_SALT_SIZE: usize = 32;
pub(crate) const IV_SIZE: usize = 16;
pub(crate) const MAC_SIZE: usize = 48;

pub(crate) const ENCRYPTION_INFO: &[u8] = b"AES-256-CTR";
pub(crate) const AUTHENTICATION_INFO: &[u8] = b"HMAC-SHA-384";

/// Minimum PBKDF2 iterations for slow blind indexes.
pub(super) const MIN_SLOW_ITERATIONS: u32 = 50_000;

const PASSWORD_ITERATIONS: u32 = 100_000;

/// Splits the field key under a per-message salt.
pub(crate) fn split_key(
    key: &SymmetricKey,
    hkdf_salt: &[u8],
) -> Result<(Zeroizing<Vec<u8>>, Zeroizing<Vec<u8>>), Error> {
    let enc_key = hkdf_sha384(key.as_bytes(), hkdf_salt, ENCRYPTION_INFO, KEY_SIZE)?;
    let mac_key = hkdf_sha384(key.as_bytes(), hkdf_salt, AUTHENTICATION_INFO, MAC_SIZE)?;
    Ok((enc_key, mac_key))
}

pub(crate) fn ctr_cipher(enc_key: &[u8], iv: &[u8]) -> Result<Aes256Ctr, Error> {
    Aes256Ctr::new_from_slices(enc_key, iv)
        .map_err(|e| Error::CryptoOperation(format!("invalid AES-256-CTR parameters: {e}")))
}

pub(crate) fn hmac_sha384(key: &[u8]) -> Result<HmacSha384, Error> {
    <HmacSha384 as Mac>::new_from_slice(key)
        .map_err(|e| Error::CryptoOperation(format!("invalid HMAC key: {e}")))
}

fn authenticator(
    mac_key: &[u8],
    hkdf_salt: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<HmacSha384, Error> {
    let mut mac = hmac_sha384(mac_key)?;
    mac.update(&pack(&[MAGIC.as_slice(), hkdf_salt, iv, ciphertext, aad]));
    Ok(mac)
}

/// Body layout: `hkdf_salt(32) || iv(16) || mac(48) || ciphertext`.
pub(super) fn encrypt(plaintext: &[u8], key: &SymmetricKey, aad: &[u8]) -> Result<String, Error> {
    let hkdf_salt = random_bytes(HKDF_SALT_SIZE)?;
    let iv = random_bytes(IV_SIZE)?;
    let (enc_key, mac_key) = split_key(key, &hkdf_salt)?;

    let mut ciphertext = plaintext.to_vec();
    ctr_cipher(&enc_key, &iv)?.apply_keystream(&mut ciphertext);
    let mac = authenticator(&mac_key, &hkdf_salt, &iv, &ciphertext, aad)?.finalize().into_bytes();

    let mut body = Vec::with_capacity(HKDF_SALT_SIZE + IV_SIZE + MAC_SIZE + ciphertext.len());
    body.extend_from_slice(&hkdf_salt);
    body.extend_from_slice(&iv);
    body.extend_from_slice(&mac);
    body.extend_from_slice(&ciphertext);
    Ok(encode_token(MAGIC, &body))
}

pub(super) fn decrypt(token: &str, key: &SymmetricKey, aad: &[u8]) -> Result<Vec<u8>, Error> {
    let body = decode_token(MAGIC, token, HKDF_SALT_SIZE + IV_SIZE + MAC_SIZE)?;
    let (hkdf_salt, rest) = body.split_at(HKDF_SALT_SIZE);
    let (iv, rest) = rest.split_at(IV_SIZE);
    let (mac, ciphertext) = rest.split_at(MAC_SIZE);

    let (enc_key, mac_key) = split_key(key, hkdf_salt)?;
    authenticator(&mac_key, hkdf_salt, iv, ciphertext, aad)?
        .verify_slice(mac)
        .map_err(|_| authentication_failed())?;

    let mut plaintext = ciphertext.to_vec();
    ctr_cipher(&enc_key, iv)?.apply_keystream(&mut plaintext);
    Ok(plaintext)
}

fn pbkdf2_sha384(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    out_len: usize,
) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(vec![0u8; out_len]);
    pbkdf2::pbkdf2_hmac::<Sha384>(password, salt, iterations, &mut out);
    out
}

/// PBKDF2-SHA-384 with a single iteration, salted with the index key.
pub(super) fn blind_index_fast(plaintext: &[u8], key: &SymmetricKey, bit_length: u32) -> Vec<u8> {
    let out_len = bytes_for_bits(bit_length);
    and_mask(&pbkdf2_sha384(plaintext, key.as_bytes(), 1, out_len), bit_length)
}

/// PBKDF2-SHA-384 with at least 50 000 iterations.
pub(super) fn blind_index_slow(
    plaintext: &[u8],
    key: &SymmetricKey,
    bit_length: u32,
    config: &HashConfig,
) -> Vec<u8> {
    let iterations = config.iterations.unwrap_or(MIN_SLOW_ITERATIONS).max(MIN_SLOW_ITERATIONS);
    let out_len = bytes_for_bits(bit_length);
    and_mask(&pbkdf2_sha384(plaintext, key.as_bytes(), iterations, out_len), bit_length)
}

pub(super) fn derive_key_from_password(
    password: &[u8],
    salt: &[u8],
) -> Result<SymmetricKey, Error> {
    SymmetricKey::from_bytes(&pbkdf2_sha384(password, salt, PASSWORD_ITERATIONS, KEY_SIZE))
}

/// HMAC-SHA-384 of `(field, index)` keyed by the table name, first 8 bytes.
pub(super) fn index_type_tag(context: &IndexContext) -> Result<String, Error> {
    let mut mac = hmac_sha384(context.table_name().as_bytes())?;
    mac.update(&context.packed_field_and_index());
    Ok(hex::encode(&mac.finalize().into_bytes()[..8]))
}
