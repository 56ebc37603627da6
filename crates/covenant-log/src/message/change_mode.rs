// ChangeMode message: per-directory key rotation.

use std::collections::HashMap;

use covenant_codec::Canonical;
use serde::{Deserialize, Serialize};

use crate::types::{Dir, NodeId};

/// `roq` ("random oracle query") is `hash(new_secret)`; `readers`/`writers`
/// map node id to `base64url(RSA-encrypt(pubkey, new_secret))`. The owner is
/// inserted into `writers` at construction time by the issuing side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeMode {
    pub directory: Dir,
    pub roq: String,
    pub readers: HashMap<NodeId, String>,
    pub writers: HashMap<NodeId, String>,
}

impl Canonical for ChangeMode {
    fn canonical_bytes(&self) -> Vec<u8> {
        let mut readers: Vec<String> = self
            .readers
            .iter()
            .map(|(n, k)| format!("[{n}:{k}]"))
            .collect();
        readers.sort();
        let mut writers: Vec<String> = self
            .writers
            .iter()
            .map(|(n, k)| format!("[{n}:{k}]"))
            .collect();
        writers.sort();
        format!(
            "ChMod{{{},{},R{{{}}},W{{{}}}}}",
            self.directory,
            self.roq,
            readers.join(","),
            writers.join(",")
        )
        .into_bytes()
    }
}

/// Construct a ChangeMode for issuing, wrapping `new_secret` for every
/// reader/writer's public key. The owner (`issuer`) is always added to
/// `writers`.
pub fn build(
    issuer: &NodeId,
    directory: Dir,
    new_secret: &[u8],
    readers: &[NodeId],
    writers: &[NodeId],
    public_keys: &HashMap<NodeId, covenant_crypto::RsaPublicKeyHandle>,
) -> Result<ChangeMode, crate::error::LogError> {
    let roq = covenant_crypto::hash_and_encode(new_secret);
    let mut writer_map = HashMap::new();
    for w in writers {
        let pk = public_keys
            .get(w)
            .ok_or_else(|| crate::error::LogError::ConfigIncomplete(format!("public key for {w}")))?;
        let wrapped = pk.encrypt(new_secret)?;
        writer_map.insert(w.clone(), covenant_crypto::encode_base64url(&wrapped));
    }
    if !writer_map.contains_key(issuer) {
        let pk = public_keys
            .get(issuer)
            .ok_or_else(|| crate::error::LogError::ConfigIncomplete(format!("public key for {issuer}")))?;
        let wrapped = pk.encrypt(new_secret)?;
        writer_map.insert(issuer.clone(), covenant_crypto::encode_base64url(&wrapped));
    }
    let mut reader_map = HashMap::new();
    for r in readers {
        if writer_map.contains_key(r) {
            continue;
        }
        let pk = public_keys
            .get(r)
            .ok_or_else(|| crate::error::LogError::ConfigIncomplete(format!("public key for {r}")))?;
        let wrapped = pk.encrypt(new_secret)?;
        reader_map.insert(r.clone(), covenant_crypto::encode_base64url(&wrapped));
    }
    Ok(ChangeMode {
        directory,
        roq,
        readers: reader_map,
        writers: writer_map,
    })
}

/// Decrypt the secret addressed to `me` from an encrypted-key entry,
/// verifying `hash(secret) == roq`.
pub fn extract_key(
    encoded_encrypted_key: &str,
    private_key: &covenant_crypto::RsaKeyPair,
    roq: &str,
) -> Result<Vec<u8>, crate::error::LogError> {
    let encrypted = covenant_crypto::decode_base64url(encoded_encrypted_key)?;
    let key = private_key.decrypt(&encrypted)?;
    covenant_crypto::validate_encoded_hash(&key, roq)
        .map_err(|_| crate::error::LogError::HashMismatch(roq.to_string()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_wraps_secret_for_every_principal_and_extract_recovers_it() {
        let owner = NodeId::new("A");
        let reader = NodeId::new("B");
        let owner_pair = covenant_crypto::RsaKeyPair::generate(2048).unwrap();
        let reader_pair = covenant_crypto::RsaKeyPair::generate(2048).unwrap();
        let mut public_keys = HashMap::new();
        public_keys.insert(owner.clone(), owner_pair.public_key());
        public_keys.insert(reader.clone(), reader_pair.public_key());

        let secret = covenant_crypto::generate_aes_key();
        let cm = build(&owner, Dir("d".into()), &secret, &[reader.clone()], &[], &public_keys).unwrap();
        assert!(cm.writers.contains_key(&owner));
        assert!(cm.readers.contains_key(&reader));

        let owner_key = extract_key(&cm.writers[&owner], &owner_pair, &cm.roq).unwrap();
        assert_eq!(owner_key, secret);
        let reader_key = extract_key(&cm.readers[&reader], &reader_pair, &cm.roq).unwrap();
        assert_eq!(reader_key, secret);
    }
}
