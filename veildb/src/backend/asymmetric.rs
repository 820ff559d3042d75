//! Hybrid public-key encryption and signatures.
//!
//! Sealed messages are `base64url(encapsulated key) || "." || token`, where
//! the token is the backend's symmetric ciphertext under the encapsulated
//! key, with the encapsulation bound as AAD.
//!
//! - Curve25519 (`Standard`, `Boring`): ephemeral X25519 exchange, message
//!   key = keyed BLAKE2b-256(shared secret, ephemeral pk || recipient pk).
//!   Signatures are Ed25519.
//! - RSA (`Fips`): a random 32-byte key wrapped with RSA-OAEP-SHA-256,
//!   message key = HMAC-SHA-384(random key, RSA ciphertext) truncated to 32
//!   bytes, so the key is bound to its own wrapper. Signatures are
//!   RSA-PSS-SHA-384.

use super::Backend;
use crate::error::Error;
use crate::hash::keyed_hash_256;
use crate::key::{SymmetricKey, KEY_SIZE};
use crate::util::random_bytes;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ed25519_dalek::{Signature as Ed25519Signature, Signer, SigningKey, VerifyingKey};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rsa::pss;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Sha256, Sha384};
use std::fmt;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Modulus size for generated RSA keys.
pub const RSA_KEY_BITS: usize = 3072;

const X25519_PUBLIC_SIZE: usize = 32;
const SEPARATOR: char = '.';

/// A private key for sealing and signing.
pub enum AsymmetricSecretKey {
    /// X25519 exchange key plus Ed25519 signing key.
    Curve25519 {
        exchange: StaticSecret,
        signing: SigningKey,
    },
    /// RSA key used for both OAEP and PSS.
    Rsa(Box<RsaPrivateKey>),
}

/// The public half of an [`AsymmetricSecretKey`].
#[derive(Clone, PartialEq, Eq)]
pub enum AsymmetricPublicKey {
    /// X25519 exchange key plus Ed25519 verifying key.
    Curve25519 {
        exchange: X25519PublicKey,
        verifying: VerifyingKey,
    },
    /// RSA public key.
    Rsa(Box<RsaPublicKey>),
}

impl AsymmetricSecretKey {
    /// Returns the matching public key.
    #[must_use]
    pub fn public_key(&self) -> AsymmetricPublicKey {
        match self {
            Self::Curve25519 { exchange, signing } => AsymmetricPublicKey::Curve25519 {
                exchange: X25519PublicKey::from(exchange),
                verifying: signing.verifying_key(),
            },
            Self::Rsa(private) => {
                AsymmetricPublicKey::Rsa(Box::new(RsaPublicKey::from(private.as_ref())))
            }
        }
    }
}

impl fmt::Debug for AsymmetricSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Curve25519 { .. } => f.write_str("AsymmetricSecretKey::Curve25519([REDACTED])"),
            Self::Rsa(_) => f.write_str("AsymmetricSecretKey::Rsa([REDACTED])"),
        }
    }
}

impl fmt::Debug for AsymmetricPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Curve25519 { exchange, .. } => f
                .debug_struct("AsymmetricPublicKey::Curve25519")
                .field("exchange", &hex::encode(exchange.as_bytes()))
                .finish_non_exhaustive(),
            Self::Rsa(_) => f.write_str("AsymmetricPublicKey::Rsa"),
        }
    }
}

fn mismatch(backend: Backend) -> Error {
    Error::Configuration(format!("key type does not match the {backend:?} backend"))
}

pub(super) fn generate_keypair(backend: Backend) -> Result<AsymmetricSecretKey, Error> {
    match backend {
        Backend::Standard | Backend::Boring => Ok(AsymmetricSecretKey::Curve25519 {
            exchange: StaticSecret::random_from_rng(OsRng),
            signing: SigningKey::generate(&mut OsRng),
        }),
        Backend::Fips => {
            let private = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
                .map_err(|e| Error::CryptoOperation(format!("RSA key generation failed: {e}")))?;
            Ok(AsymmetricSecretKey::Rsa(Box::new(private)))
        }
    }
}

fn x25519_message_key(
    shared: &x25519_dalek::SharedSecret,
    ephemeral: &X25519PublicKey,
    recipient: &X25519PublicKey,
) -> Result<SymmetricKey, Error> {
    if !shared.was_contributory() {
        return Err(Error::CryptoOperation(
            "X25519 exchange produced a low-order result".to_string(),
        ));
    }
    let key = Zeroizing::new(keyed_hash_256(
        shared.as_bytes(),
        &[ephemeral.as_bytes(), recipient.as_bytes()],
    )?);
    SymmetricKey::from_bytes(key.as_slice())
}

fn rsa_message_key(random_key: &[u8], wrapped: &[u8]) -> Result<SymmetricKey, Error> {
    let mut mac = <Hmac<Sha384> as Mac>::new_from_slice(random_key)
        .map_err(|e| Error::CryptoOperation(format!("invalid HMAC key: {e}")))?;
    mac.update(wrapped);
    SymmetricKey::from_bytes(&mac.finalize().into_bytes()[..KEY_SIZE])
}

/// Produces `(encapsulated key, message key)` for the recipient.
fn encapsulate(public: &AsymmetricPublicKey) -> Result<(Vec<u8>, SymmetricKey), Error> {
    match public {
        AsymmetricPublicKey::Curve25519 { exchange, .. } => {
            let ephemeral = EphemeralSecret::random_from_rng(OsRng);
            let ephemeral_public = X25519PublicKey::from(&ephemeral);
            let shared = ephemeral.diffie_hellman(exchange);
            let key = x25519_message_key(&shared, &ephemeral_public, exchange)?;
            Ok((ephemeral_public.as_bytes().to_vec(), key))
        }
        AsymmetricPublicKey::Rsa(public) => {
            let random_key = Zeroizing::new(random_bytes(KEY_SIZE)?);
            let wrapped = public
                .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &random_key)
                .map_err(|e| Error::CryptoOperation(format!("RSA-OAEP encryption failed: {e}")))?;
            let key = rsa_message_key(&random_key, &wrapped)?;
            Ok((wrapped, key))
        }
    }
}

fn decapsulate(secret: &AsymmetricSecretKey, encapsulated: &[u8]) -> Result<SymmetricKey, Error> {
    match secret {
        AsymmetricSecretKey::Curve25519 { exchange, .. } => {
            let bytes: [u8; X25519_PUBLIC_SIZE] = encapsulated
                .try_into()
                .map_err(|_| {
                    Error::InvalidCiphertext("malformed X25519 encapsulation".to_string())
                })?;
            let ephemeral_public = X25519PublicKey::from(bytes);
            let shared = exchange.diffie_hellman(&ephemeral_public);
            x25519_message_key(&shared, &ephemeral_public, &X25519PublicKey::from(exchange))
                .map_err(|_| Error::InvalidCiphertext("invalid X25519 encapsulation".to_string()))
        }
        AsymmetricSecretKey::Rsa(private) => {
            let random_key = Zeroizing::new(
                private
                    .decrypt(Oaep::new::<Sha256>(), encapsulated)
                    .map_err(|_| {
                        Error::InvalidCiphertext("RSA-OAEP decryption failed".to_string())
                    })?,
            );
            rsa_message_key(&random_key, encapsulated)
        }
    }
}

const fn key_matches(backend: Backend, curve: bool) -> bool {
    match backend {
        Backend::Standard | Backend::Boring => curve,
        Backend::Fips => !curve,
    }
}

pub(super) fn seal(
    backend: Backend,
    plaintext: &[u8],
    public: &AsymmetricPublicKey,
) -> Result<String, Error> {
    if !key_matches(backend, matches!(public, AsymmetricPublicKey::Curve25519 { .. })) {
        return Err(mismatch(backend));
    }
    let (encapsulated, key) = encapsulate(public)?;
    let token = backend.encrypt(plaintext, &key, &encapsulated)?;

    let mut sealed = URL_SAFE_NO_PAD.encode(&encapsulated);
    sealed.push(SEPARATOR);
    sealed.push_str(&token);
    Ok(sealed)
}

pub(super) fn open(
    backend: Backend,
    sealed: &str,
    secret: &AsymmetricSecretKey,
) -> Result<Vec<u8>, Error> {
    if !key_matches(backend, matches!(secret, AsymmetricSecretKey::Curve25519 { .. })) {
        return Err(mismatch(backend));
    }
    let (encoded, token) = sealed
        .split_once(SEPARATOR)
        .ok_or_else(|| Error::InvalidCiphertext("sealed message has no separator".to_string()))?;
    let encapsulated = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| {
            Error::InvalidCiphertext("encapsulated key is not valid base64url".to_string())
        })?;

    let key = decapsulate(secret, &encapsulated)?;
    backend.decrypt(token, &key, &encapsulated)
}

pub(super) fn sign(
    backend: Backend,
    message: &[u8],
    secret: &AsymmetricSecretKey,
) -> Result<Vec<u8>, Error> {
    match (backend, secret) {
        (Backend::Standard | Backend::Boring, AsymmetricSecretKey::Curve25519 { signing, .. }) => {
            Ok(signing.sign(message).to_bytes().to_vec())
        }
        (Backend::Fips, AsymmetricSecretKey::Rsa(private)) => {
            let signing = pss::SigningKey::<Sha384>::new(private.as_ref().clone());
            Ok(signing.sign_with_rng(&mut OsRng, message).to_vec())
        }
        _ => Err(mismatch(backend)),
    }
}

/// Malformed signatures verify as `false`.
pub(super) fn verify(
    backend: Backend,
    message: &[u8],
    signature: &[u8],
    public: &AsymmetricPublicKey,
) -> Result<bool, Error> {
    match (backend, public) {
        (
            Backend::Standard | Backend::Boring,
            AsymmetricPublicKey::Curve25519 { verifying, .. },
        ) => {
            let Ok(signature) = Ed25519Signature::from_slice(signature) else {
                return Ok(false);
            };
            Ok(verifying.verify_strict(message, &signature).is_ok())
        }
        (Backend::Fips, AsymmetricPublicKey::Rsa(public)) => {
            use rsa::signature::Verifier;

            let Ok(signature) = pss::Signature::try_from(signature) else {
                return Ok(false);
            };
            let verifying = pss::VerifyingKey::<Sha384>::new(public.as_ref().clone());
            Ok(verifying.verify(message, &signature).is_ok())
        }
        _ => Err(mismatch(backend)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curve_seal_open() {
        let secret = generate_keypair(Backend::Standard).unwrap();
        let sealed = seal(Backend::Standard, b"attack at dawn", &secret.public_key()).unwrap();
        assert!(sealed.contains(".nacl:"));
        assert_eq!(open(Backend::Standard, &sealed, &secret).unwrap(), b"attack at dawn");
    }

    #[test]
    fn test_curve_wrong_recipient() {
        let secret = generate_keypair(Backend::Boring).unwrap();
        let other = generate_keypair(Backend::Boring).unwrap();
        let sealed = seal(Backend::Boring, b"secret", &secret.public_key()).unwrap();
        assert!(matches!(open(Backend::Boring, &sealed, &other), Err(Error::InvalidCiphertext(_))));
    }

    #[test]
    fn test_tampered_encapsulation() {
        let secret = generate_keypair(Backend::Standard).unwrap();
        let sealed = seal(Backend::Standard, b"secret", &secret.public_key()).unwrap();
        let (encoded, token) = sealed.split_once('.').unwrap();
        let mut epk = URL_SAFE_NO_PAD.decode(encoded).unwrap();
        epk[0] ^= 0x01;
        let forged = format!("{}.{token}", URL_SAFE_NO_PAD.encode(epk));
        assert!(open(Backend::Standard, &forged, &secret).is_err());
    }

    #[test]
    fn test_ed25519_sign_verify() {
        let secret = generate_keypair(Backend::Standard).unwrap();
        let public = secret.public_key();
        let signature = sign(Backend::Standard, b"message", &secret).unwrap();
        assert!(verify(Backend::Standard, b"message", &signature, &public).unwrap());
        assert!(!verify(Backend::Standard, b"massage", &signature, &public).unwrap());
        assert!(!verify(Backend::Standard, b"message", &signature[..10], &public).unwrap());
    }

    #[test]
    fn test_rsa_seal_and_sign() {
        let secret = generate_keypair(Backend::Fips).unwrap();
        let public = secret.public_key();

        let sealed = seal(Backend::Fips, b"fips payload", &public).unwrap();
        assert_eq!(open(Backend::Fips, &sealed, &secret).unwrap(), b"fips payload");

        let signature = sign(Backend::Fips, b"message", &secret).unwrap();
        assert!(verify(Backend::Fips, b"message", &signature, &public).unwrap());
        assert!(!verify(Backend::Fips, b"other", &signature, &public).unwrap());
    }

    #[test]
    fn test_backend_key_mismatch() {
        let secret = generate_keypair(Backend::Standard).unwrap();
        assert!(matches!(
            seal(Backend::Fips, b"x", &secret.public_key()),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(sign(Backend::Fips, b"x", &secret), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = generate_keypair(Backend::Standard).unwrap();
        assert!(format!("{secret:?}").contains("REDACTED"));
    }
}
