//! Boring backend: XChaCha20 with a separate keyed BLAKE2b authenticator.
//!
//! Encrypt-then-MAC for deployments that cannot use a combined AEAD. The tag
//! is verified in constant time before any keystream is applied.

use super::authentication_failed;
use crate::error::Error;
use crate::hash::{keyed_hash_256, verify_keyed_hash_256};
use crate::header::{decode_token, encode_token, MagicHeader};
use crate::key::SymmetricKey;
use crate::util::{le64, random_bytes};
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::XChaCha20;
use zeroize::Zeroizing;

pub(super) const MAGIC: &MagicHeader = b"brng:";

const NONCE_SIZE: usize = 24;
const TAG_SIZE: usize = 32;

const ENCRYPTION_INFO: &[u8] = b"brng:encryption";
const AUTHENTICATION_INFO: &[u8] = b"brng:authentication";

/// Splits the field key into independent cipher and MAC keys.
fn split_key(key: &SymmetricKey) -> Result<(Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>), Error> {
    let enc_key = Zeroizing::new(keyed_hash_256(key.as_bytes(), &[ENCRYPTION_INFO])?);
    let mac_key = Zeroizing::new(keyed_hash_256(key.as_bytes(), &[AUTHENTICATION_INFO])?);
    Ok((enc_key, mac_key))
}

fn apply_keystream(enc_key: &[u8; 32], nonce: &[u8], data: &mut [u8]) -> Result<(), Error> {
    let mut cipher = XChaCha20::new_from_slices(enc_key, nonce)
        .map_err(|e| Error::CryptoOperation(format!("invalid XChaCha20 parameters: {e}")))?;
    cipher.apply_keystream(data);
    Ok(())
}

/// The authenticated transcript, `magic || nonce || len(aad) || aad || len(ct) || ct`.
fn transcript<'a>(
    nonce: &'a [u8],
    aad: &'a [u8],
    ciphertext: &'a [u8],
    lengths: &'a ([u8; 8], [u8; 8]),
) -> [&'a [u8]; 6] {
    [MAGIC.as_slice(), nonce, &lengths.0, aad, &lengths.1, ciphertext]
}

/// Body layout: `nonce(24) || tag(32) || ciphertext`.
pub(super) fn encrypt(plaintext: &[u8], key: &SymmetricKey, aad: &[u8]) -> Result<String, Error> {
    let (enc_key, mac_key) = split_key(key)?;
    let nonce = random_bytes(NONCE_SIZE)?;

    let mut ciphertext = plaintext.to_vec();
    apply_keystream(&enc_key, &nonce, &mut ciphertext)?;

    let lengths = (le64(aad.len()), le64(ciphertext.len()));
    let tag = keyed_hash_256(mac_key.as_slice(), &transcript(&nonce, aad, &ciphertext, &lengths))?;

    let mut body = Vec::with_capacity(NONCE_SIZE + TAG_SIZE + ciphertext.len());
    body.extend_from_slice(&nonce);
    body.extend_from_slice(&tag);
    body.extend_from_slice(&ciphertext);
    Ok(encode_token(MAGIC, &body))
}

pub(super) fn decrypt(token: &str, key: &SymmetricKey, aad: &[u8]) -> Result<Vec<u8>, Error> {
    let body = decode_token(MAGIC, token, NONCE_SIZE + TAG_SIZE)?;
    let (nonce, rest) = body.split_at(NONCE_SIZE);
    let (tag, ciphertext) = rest.split_at(TAG_SIZE);

    let (enc_key, mac_key) = split_key(key)?;
    let lengths = (le64(aad.len()), le64(ciphertext.len()));
    let parts = transcript(nonce, aad, ciphertext, &lengths);
    if !verify_keyed_hash_256(mac_key.as_slice(), &parts, tag)? {
        return Err(authentication_failed());
    }

    let mut plaintext = ciphertext.to_vec();
    apply_keystream(&enc_key, nonce, &mut plaintext)?;
    Ok(plaintext)
}
