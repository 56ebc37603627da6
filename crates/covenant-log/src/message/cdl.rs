// CDL (Cut Deletion List) message: a version vector agreed by all
// non-blacklisted nodes identifying the prefix of history safe to truncate.

use std::collections::HashMap;

use covenant_codec::Canonical;
use serde::{Deserialize, Serialize};

use crate::types::{version_vector_canonical, NodeId, VersionVector};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cdl {
    pub to_be_deleted: VersionVector,
    pub signatures: HashMap<NodeId, Vec<u8>>,
}

/// Signatures cover only `to_be_deleted`, not the full CDL (a fresh node
/// signing and appending its own signature never invalidates another node's
/// signature over the same cut).
pub fn signing_bytes(cdl: &Cdl) -> Vec<u8> {
    version_vector_canonical(&cdl.to_be_deleted).into_bytes()
}

impl Canonical for Cdl {
    fn canonical_bytes(&self) -> Vec<u8> {
        let mut sigs: Vec<String> = cdl_signature_strings(self);
        sigs.sort();
        format!(
            "CDL{{TBD{{{}}},Sig{{{}}}}}",
            version_vector_canonical(&self.to_be_deleted),
            sigs.join(",")
        )
        .into_bytes()
    }
}

fn cdl_signature_strings(cdl: &Cdl) -> Vec<String> {
    cdl.signatures
        .iter()
        .map(|(n, s)| format!("[{n}:{}]", covenant_crypto::encode_base64url(s)))
        .collect()
}

/// The CDL's own identity hash is over `to_be_deleted` alone (so every
/// partial copy of the same cut -- with different signature sets so far --
/// hashes identically and merges into one `LocalCDLs` entry).
pub fn encoded_hash(cdl: &Cdl) -> crate::types::EncodedHash {
    crate::types::EncodedHash(covenant_crypto::hash_and_encode(&signing_bytes(cdl)))
}
