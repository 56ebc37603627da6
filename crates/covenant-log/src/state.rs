// In-memory log state: every derived index the engine rebuilds by replaying
// the durable log, plus the indices that are not themselves persisted
// directly but are part of a snapshot (sequential log is the only index that
// strictly needs persisting; everything else here is reconstructible, but we
// snapshot the whole thing for fast startup per spec 4.8).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entry::LogEntry;
use crate::message::Cdl;
use crate::types::{Dir, EncodedHash, Key, KeyInfo, NodeId, Pom, Timestamp, VersionInfo, VersionVector};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogState {
    pub my_node_id: NodeId,
    pub default_key: Vec<u8>,

    /// SHA-256 of this node's own public key (derived from its private key),
    /// so a later `open` can detect the private key changing underneath an
    /// existing snapshot without ever persisting the private key itself.
    pub identity_fingerprint: Vec<u8>,
    /// Base64url-PKIX encoding of every configured peer's public key, keyed
    /// by node id -- public values, so persisting them verbatim lets `open`
    /// compare the configured key set byte-for-byte against what a prior run
    /// saw.
    pub known_public_keys: HashMap<NodeId, String>,

    /// The only index that is the durable source of truth: every other field
    /// here is a cache rebuilt from it plus the log file.
    pub sequential_log: HashMap<NodeId, Vec<Arc<LogEntry>>>,
    pub log_indexed_by_hash: HashMap<EncodedHash, Arc<LogEntry>>,
    pub entry_node_map: HashMap<EncodedHash, NodeId>,
    pub version_vector: VersionVector,
    /// This node's own DVV delta: what its next own entry will claim as
    /// dependencies (reset to a fresh single-entry map after each own commit).
    pub dvv: VersionVector,
    pub logical_clock: Timestamp,

    pub checkpoint: HashMap<Key, HashMap<NodeId, Arc<LogEntry>>>,
    pub read_key_info: HashMap<NodeId, HashMap<Dir, Vec<KeyInfo>>>,
    pub write_key_info: HashMap<NodeId, HashMap<Dir, Vec<KeyInfo>>>,

    /// Hashes of values confirmed present in the content store.
    pub values: HashSet<EncodedHash>,

    pub blacklist: HashMap<NodeId, Pom>,
    pub local_cdls: HashMap<EncodedHash, Cdl>,
    pub ack_faulty_set: HashMap<EncodedHash, HashSet<NodeId>>,
}

impl LogState {
    pub fn new(my_node_id: NodeId, default_key: Vec<u8>) -> Self {
        Self {
            my_node_id,
            default_key,
            identity_fingerprint: Vec::new(),
            known_public_keys: HashMap::new(),
            sequential_log: HashMap::new(),
            log_indexed_by_hash: HashMap::new(),
            entry_node_map: HashMap::new(),
            version_vector: VersionVector::new(),
            dvv: VersionVector::new(),
            logical_clock: Timestamp(1),
            checkpoint: HashMap::new(),
            read_key_info: HashMap::new(),
            write_key_info: HashMap::new(),
            values: HashSet::new(),
            blacklist: HashMap::new(),
            local_cdls: HashMap::new(),
            ack_faulty_set: HashMap::new(),
        }
    }

    pub fn has_entry(&self, node_id: &NodeId, hash: &EncodedHash) -> bool {
        match self.log_indexed_by_hash.get(hash) {
            Some(existing) => &existing.node_id == node_id,
            None => false,
        }
    }

    pub fn is_blocked(&self, node_id: &NodeId) -> bool {
        self.blacklist.contains_key(node_id)
    }

    pub fn observed(&self, node_id: &NodeId, accept_stamp: Timestamp) -> bool {
        self.version_vector
            .get(node_id)
            .map(|vi| vi.accept_stamp >= accept_stamp)
            .unwrap_or(false)
    }

    pub fn last_entry_of(&self, node_id: &NodeId) -> Option<&Arc<LogEntry>> {
        self.sequential_log.get(node_id).and_then(|v| v.last())
    }

    pub fn last_version_info_of(&self, node_id: &NodeId) -> Option<VersionInfo> {
        self.last_entry_of(node_id).map(|e| VersionInfo {
            accept_stamp: e.accept_stamp,
            hash_of_entry: e.encoded_hash(),
        })
    }

    /// Binary search within a node's strictly-ascending sequential log for
    /// the entry with exactly `accept_stamp`.
    pub fn entry_at_stamp(&self, node_id: &NodeId, accept_stamp: Timestamp) -> Option<&Arc<LogEntry>> {
        let log = self.sequential_log.get(node_id)?;
        let idx = log.binary_search_by_key(&accept_stamp, |e| e.accept_stamp).ok()?;
        log.get(idx)
    }

    /// The entry immediately after the one identified by `version_info`
    /// within `virtual_node_id`'s branch: the sibling used to detect a fork.
    pub fn entry_after(&self, virtual_node_id: &NodeId, version_info: &VersionInfo) -> Option<(usize, Arc<LogEntry>)> {
        let log = self.sequential_log.get(virtual_node_id)?;
        for (i, entry) in log.iter().enumerate().rev() {
            if let Some(prev) = entry.dvv.get(&entry.node_id) {
                if prev.hash_of_entry == version_info.hash_of_entry {
                    return Some((i, entry.clone()));
                }
            }
        }
        None
    }
}
