// Cryptographic Primitives
// RSA signing, RSA key wrapping, AES-CTR stream encryption, SHA-256 content hashing.

//! # Crypto Primitives
//!
//! The signing, encryption and hashing building blocks the log engine is built
//! on: RSA-PKCS1v15 signatures over log entries, RSA-PKCS1v15 key wrapping for
//! change-mode secret distribution, AES-256-CTR for value encryption, and
//! SHA-256 + base64url for content addressing.

use aes::cipher::{KeyIvInit, StreamCipher};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

const AES_KEY_LEN: usize = 32;
const AES_IV_LEN: usize = 16;
pub const DEFAULT_RSA_BITS: usize = 2048;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("signature verification failed")]
    SignatureVerificationFailed,
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("malformed key encoding: {0}")]
    MalformedKey(String),
    #[error("ciphertext too short to contain an IV")]
    CiphertextTooShort,
}

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// base64url (with padding) encoding of a SHA-256 digest. This is the
/// `EncodedHash` representation used as the stable identity of a log entry,
/// a value, or a CDL.
pub fn hash_and_encode(data: &[u8]) -> String {
    URL_SAFE.encode(sha256(data))
}

/// Verify that `data` hashes to `expected_encoded_hash`.
pub fn validate_encoded_hash(data: &[u8], expected_encoded_hash: &str) -> Result<(), CryptoError> {
    let actual = hash_and_encode(data);
    if actual != expected_encoded_hash {
        return Err(CryptoError::DecryptionFailed(
            "hash does not match expected encoded hash".into(),
        ));
    }
    Ok(())
}

pub fn encode_base64url(data: &[u8]) -> String {
    URL_SAFE.encode(data)
}

pub fn decode_base64url(s: &str) -> Result<Vec<u8>, CryptoError> {
    URL_SAFE
        .decode(s)
        .map_err(|e| CryptoError::MalformedKey(format!("invalid base64url: {e}")))
}

/// An RSA key pair used both to sign log entries and to unwrap change-mode
/// secrets addressed to this node.
pub struct RsaKeyPair {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl RsaKeyPair {
    /// Generate a fresh key pair. Defaults to 2048 bits.
    pub fn generate(bits: usize) -> Result<Self, CryptoError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| CryptoError::KeyGenerationFailed(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            private_key,
            public_key,
        })
    }

    pub fn public_key(&self) -> RsaPublicKeyHandle {
        RsaPublicKeyHandle(self.public_key.clone())
    }

    /// PKCS1 DER bytes, base64url-encoded -- the wire format used for the
    /// private key field in configuration.
    pub fn to_base64url_pkcs1(&self) -> Result<String, CryptoError> {
        let der = self
            .private_key
            .to_pkcs1_der()
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        Ok(encode_base64url(der.as_bytes()))
    }

    pub fn from_base64url_pkcs1(s: &str) -> Result<Self, CryptoError> {
        let bytes = decode_base64url(s)?;
        let private_key = RsaPrivateKey::from_pkcs1_der(&bytes)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Sign the SHA-256 digest of `canonical_form` with RSA-PKCS1v15.
    pub fn sign(&self, canonical_form: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let digest = sha256(canonical_form);
        self.private_key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|e| CryptoError::EncryptionFailed(format!("rsa sign failed: {e}")))
    }

    /// Decrypt an RSA-PKCS1v15-wrapped secret addressed to this node (the
    /// change-mode key-distribution path).
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.private_key
            .decrypt(Pkcs1v15Encrypt, ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(format!("rsa decrypt failed: {e}")))
    }
}

/// A detached RSA public key, as stored in a node's public-key table.
#[derive(Clone)]
pub struct RsaPublicKeyHandle(RsaPublicKey);

impl RsaPublicKeyHandle {
    /// PKIX DER bytes, base64url-encoded -- the wire format used for
    /// per-node public keys in configuration.
    pub fn to_base64url_pkix(&self) -> Result<String, CryptoError> {
        let der = self
            .0
            .to_public_key_der()
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        Ok(encode_base64url(der.as_bytes()))
    }

    pub fn from_base64url_pkix(s: &str) -> Result<Self, CryptoError> {
        let bytes = decode_base64url(s)?;
        let key = RsaPublicKey::from_public_key_der(&bytes)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        Ok(Self(key))
    }

    /// Verify an RSA-PKCS1v15 signature over the SHA-256 digest of
    /// `canonical_form`.
    pub fn verify(&self, canonical_form: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let digest = sha256(canonical_form);
        self.0
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }

    /// RSA-PKCS1v15-encrypt `secret` for this key's owner (change-mode key
    /// distribution).
    pub fn encrypt(&self, secret: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.0
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, secret)
            .map_err(|e| CryptoError::EncryptionFailed(format!("rsa encrypt failed: {e}")))
    }

    pub fn from_rsa_public_key(key: RsaPublicKey) -> Self {
        Self(key)
    }
}

/// Generate a fresh random AES-256 key.
pub fn generate_aes_key() -> [u8; AES_KEY_LEN] {
    let mut key = [0u8; AES_KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

/// Encrypt `plaintext` under `key` (must be 32 bytes) with AES-256-CTR.
/// Returns `IV || ciphertext`; the IV is generated fresh per call.
pub fn encrypt_value(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if key.len() != AES_KEY_LEN {
        return Err(CryptoError::InvalidKeyLength {
            expected: AES_KEY_LEN,
            actual: key.len(),
        });
    }
    let mut iv = [0u8; AES_IV_LEN];
    OsRng.fill_bytes(&mut iv);
    let mut buf = plaintext.to_vec();
    let mut cipher = Aes256Ctr::new(key.into(), &iv.into());
    cipher.apply_keystream(&mut buf);

    let mut out = Vec::with_capacity(AES_IV_LEN + buf.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&buf);
    Ok(out)
}

/// Decrypt a value previously produced by [`encrypt_value`] under `key`.
/// A wrong key silently produces garbage rather than an error, matching the
/// round-trip-encryption testable property: AES-CTR has no integrity check
/// of its own.
pub fn decrypt_value(key: &[u8], iv_and_ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if key.len() != AES_KEY_LEN {
        return Err(CryptoError::InvalidKeyLength {
            expected: AES_KEY_LEN,
            actual: key.len(),
        });
    }
    if iv_and_ciphertext.len() < AES_IV_LEN {
        return Err(CryptoError::CiphertextTooShort);
    }
    let (iv, ciphertext) = iv_and_ciphertext.split_at(AES_IV_LEN);
    let mut buf = ciphertext.to_vec();
    let mut cipher = Aes256Ctr::new(key.into(), iv.into());
    cipher.apply_keystream(&mut buf);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_encode_round_trips_through_validate() {
        let data = b"some canonical bytes";
        let encoded = hash_and_encode(data);
        assert!(validate_encoded_hash(data, &encoded).is_ok());
        assert!(validate_encoded_hash(b"different bytes", &encoded).is_err());
    }

    #[test]
    fn rsa_sign_and_verify() {
        let pair = RsaKeyPair::generate(2048).unwrap();
        let public = pair.public_key();
        let message = b"LE[...]";
        let signature = pair.sign(message).unwrap();
        public.verify(message, &signature).unwrap();
        assert!(public.verify(b"tampered", &signature).is_err());
    }

    #[test]
    fn rsa_key_pair_round_trips_through_base64url() {
        let pair = RsaKeyPair::generate(2048).unwrap();
        let encoded = pair.to_base64url_pkcs1().unwrap();
        let restored = RsaKeyPair::from_base64url_pkcs1(&encoded).unwrap();
        let message = b"round trip";
        let signature = restored.sign(message).unwrap();
        pair.public_key().verify(message, &signature).unwrap();
    }

    #[test]
    fn rsa_public_key_round_trips_through_base64url_pkix() {
        let pair = RsaKeyPair::generate(2048).unwrap();
        let encoded = pair.public_key().to_base64url_pkix().unwrap();
        let restored = RsaPublicKeyHandle::from_base64url_pkix(&encoded).unwrap();
        let message = b"pkix round trip";
        let signature = pair.sign(message).unwrap();
        restored.verify(message, &signature).unwrap();
    }

    #[test]
    fn rsa_encrypt_decrypt_round_trip_for_change_mode_secret() {
        let pair = RsaKeyPair::generate(2048).unwrap();
        let secret = generate_aes_key();
        let wrapped = pair.public_key().encrypt(&secret).unwrap();
        let unwrapped = pair.decrypt(&wrapped).unwrap();
        assert_eq!(&secret[..], &unwrapped[..]);
    }

    #[test]
    fn aes_ctr_round_trip() {
        let key = generate_aes_key();
        let plaintext = b"the quick brown fox";
        let ciphertext = encrypt_value(&key, plaintext).unwrap();
        assert_eq!(ciphertext.len(), AES_IV_LEN + plaintext.len());
        let decrypted = decrypt_value(&key, &ciphertext).unwrap();
        assert_eq!(&decrypted[..], &plaintext[..]);
    }

    #[test]
    fn aes_ctr_wrong_key_does_not_error_but_differs() {
        let key = generate_aes_key();
        let other_key = generate_aes_key();
        let plaintext = b"the quick brown fox";
        let ciphertext = encrypt_value(&key, plaintext).unwrap();
        let garbage = decrypt_value(&other_key, &ciphertext).unwrap();
        assert_ne!(&garbage[..], &plaintext[..]);
    }

    #[test]
    fn aes_ctr_rejects_wrong_key_length() {
        let bad_key = vec![0u8; 16];
        assert!(matches!(
            encrypt_value(&bad_key, b"x"),
            Err(CryptoError::InvalidKeyLength { .. })
        ));
    }
}
