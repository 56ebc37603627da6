// Binary codec: canonical object serialization and hash of canonical form.

//! Two distinct encodings are provided on purpose:
//!
//! - [`Canonical`] + [`canonical_hash`]: a deterministic byte rendering used
//!   only as a hash/signature domain. It must never change shape for an
//!   already-shipped type, since changing it would change every prior hash.
//! - [`encode`]/[`decode`] (and the base64url line variants): the portable
//!   tagged-union wire/storage form, built on `bincode`. This one is allowed
//!   to gain fields over time; it is not a hash domain.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("failed to encode value: {0}")]
    Encode(String),
    #[error("failed to decode value: {0}")]
    Decode(String),
    #[error("malformed base64url in encoded line: {0}")]
    MalformedLine(String),
}

/// Implemented by every hashed/signed type (`LogEntry`, `Message` variants,
/// `VersionVector`, the CDL payload) to produce a deterministic byte
/// rendering independent of the storage encoding.
pub trait Canonical {
    fn canonical_bytes(&self) -> Vec<u8>;
}

/// The `EncodedHash` of a canonical rendering: base64url(sha256(canonical_bytes)).
pub fn canonical_hash<T: Canonical>(value: &T) -> String {
    covenant_crypto::hash_and_encode(&value.canonical_bytes())
}

/// Serialize `value` into the portable wire/storage form.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(value).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Deserialize a value previously produced by [`encode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Encode `value` as a single base64url-text log-file line (no trailing
/// newline; callers append one when writing).
pub fn encode_line<T: Serialize>(value: &T) -> Result<String, CodecError> {
    let bytes = encode(value)?;
    Ok(covenant_crypto::encode_base64url(&bytes))
}

/// Decode a log-file line previously produced by [`encode_line`].
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, CodecError> {
    let bytes = covenant_crypto::decode_base64url(line)
        .map_err(|e| CodecError::MalformedLine(e.to_string()))?;
    decode(&bytes)
}
