// LogEntry: the signed, append-only unit of the distributed log.

use covenant_codec::Canonical;
use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::types::{version_vector_canonical, EncodedHash, NodeId, Timestamp, VersionVector};

/// Sentinel `accept_stamp` for an entry that has not yet been finalized by
/// the commit pipeline (unstamped, unsigned, locally authored).
pub const UNSTAMPED: Timestamp = Timestamp(-1);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Entries the issuer had observed when authoring this entry. Not
    /// necessarily exhaustive on the wire -- only the delta since the
    /// issuer's last own entry; see `dvv::build_full_dvv`.
    pub dvv: VersionVector,
    pub message: Message,
    pub accept_stamp: Timestamp,
    pub node_id: NodeId,
    /// Empty until `sign` is called at commit time.
    pub signature: Vec<u8>,
}

impl LogEntry {
    /// A fresh, unstamped, unsigned entry ready to be finalized by the
    /// commit pipeline.
    pub fn new_unstamped(node_id: NodeId, message: Message) -> Self {
        Self {
            dvv: VersionVector::new(),
            message,
            accept_stamp: UNSTAMPED,
            node_id,
            signature: Vec::new(),
        }
    }

    pub fn is_unstamped(&self) -> bool {
        self.accept_stamp == UNSTAMPED
    }

    pub fn sign(&mut self, private_key: &covenant_crypto::RsaKeyPair) -> Result<(), crate::error::LogError> {
        let sig = private_key.sign(&self.canonical_bytes())?;
        self.signature = sig;
        Ok(())
    }

    pub fn verify_signature(
        &self,
        public_key: &covenant_crypto::RsaPublicKeyHandle,
    ) -> Result<(), crate::error::LogError> {
        public_key
            .verify(&self.canonical_bytes(), &self.signature)
            .map_err(|_| crate::error::LogError::SignatureInvalid(self.node_id.0.clone()))
    }

    pub fn encoded_hash(&self) -> EncodedHash {
        EncodedHash(covenant_codec::canonical_hash(self))
    }
}

impl Canonical for LogEntry {
    /// The signature domain: `dvv`, `message`, `accept_stamp`, `node_id`,
    /// rendered as `LE[accept_stamp,node_id,DVV{dvv},message]`. The signature
    /// covers this deterministic string, not raw struct bytes, so re-ordering
    /// map iteration never changes the hash.
    fn canonical_bytes(&self) -> Vec<u8> {
        format!(
            "LE[{},{},DVV{{{}}},{}]",
            self.accept_stamp,
            self.node_id,
            version_vector_canonical(&self.dvv),
            canonical_message_string(&self.message),
        )
        .into_bytes()
    }
}

fn canonical_message_string(message: &Message) -> String {
    String::from_utf8_lossy(&message.canonical_bytes()).into_owned()
}
