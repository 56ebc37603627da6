// Data model: NodeID, Timestamp, EncodedHash, VersionInfo/VersionVector, Key.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LogError;

/// A node identifier, or a virtual node identifier of the form
/// `<node_id>.<hash>` allocated on fork detection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The real node id underlying a (possibly virtual) node id: the prefix
    /// before the first `.`.
    pub fn real_node_id(&self) -> NodeId {
        match self.0.find('.') {
            Some(idx) => NodeId(self.0[..idx].to_string()),
            None => self.clone(),
        }
    }

    /// Allocate the virtual node id for a fork branch ending in `entry_hash`.
    pub fn virtualize(&self, entry_hash: &EncodedHash) -> NodeId {
        NodeId(format!("{}.{}", self.0, entry_hash.0))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotone Lamport clock value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn succ(self) -> Timestamp {
        Timestamp(self.0 + 1)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// base64url(SHA-256(canonical form)); the stable identity of a log entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EncodedHash(pub String);

impl fmt::Display for EncodedHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `{ accept_stamp, hash_of_entry }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub accept_stamp: Timestamp,
    pub hash_of_entry: EncodedHash,
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.accept_stamp, self.hash_of_entry)
    }
}

/// `NodeID -> VersionInfo`.
pub type VersionVector = HashMap<NodeId, VersionInfo>;

pub fn version_vector_canonical(vv: &VersionVector) -> String {
    let mut parts: Vec<String> = vv
        .iter()
        .map(|(node, vi)| format!("[{node}:{vi}]"))
        .collect();
    parts.sort();
    parts.join(",")
}

/// Directory component of a `Key`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dir(pub String);

impl fmt::Display for Dir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `<owner_node_id>/<dir>/<path>`, validated against the key grammar.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(pub String);

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

const MAX_KEY_LEN: usize = 80;

fn is_component_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// Validate `key` against `^[A-Za-z0-9_]+/[A-Za-z0-9_]+/([A-Za-z0-9._]+/)*[A-Za-z0-9._]+$`,
/// length <= 80.
pub fn validate_key(key: &Key) -> Result<(), LogError> {
    if key.0.len() > MAX_KEY_LEN {
        return Err(LogError::InvalidKey(key.0.clone()));
    }
    let parts: Vec<&str> = key.0.split('/').collect();
    if parts.len() < 3 {
        return Err(LogError::InvalidKey(key.0.clone()));
    }
    let owner = parts[0];
    let dir = parts[1];
    let path_parts = &parts[2..];
    if owner.is_empty() || !owner.chars().all(is_component_char) {
        return Err(LogError::InvalidKey(key.0.clone()));
    }
    if dir.is_empty() || !dir.chars().all(is_component_char) {
        return Err(LogError::InvalidKey(key.0.clone()));
    }
    for p in path_parts {
        if p.is_empty() || !p.chars().all(is_path_char) {
            return Err(LogError::InvalidKey(key.0.clone()));
        }
    }
    Ok(())
}

/// Split a validated key into `(owner, dir, path)`.
pub fn split_key(key: &Key) -> Result<(NodeId, Dir, String), LogError> {
    validate_key(key)?;
    let parts: Vec<&str> = key.0.splitn(3, '/').collect();
    Ok((
        NodeId::new(parts[0]),
        Dir(parts[1].to_string()),
        parts[2].to_string(),
    ))
}

/// One entry in `ReadKeyInfo[owner][dir]` / `WriteKeyInfo[owner][dir]`: the
/// state installed by a single ChangeMode, ordered ascending by
/// `accept_stamp` within each directory's sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyInfo {
    pub secret_key: Option<Vec<u8>>,
    pub accept_stamp: Timestamp,
    pub writers: std::collections::HashSet<NodeId>,
}

/// Proof of Misbehavior: two distinct entries from `node_id` sharing common
/// history without forming a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pom {
    pub node_id: NodeId,
    pub hash1: EncodedHash,
    pub hash2: EncodedHash,
}

impl fmt::Display for Pom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "POM[{},{},{}]", self.node_id, self.hash1, self.hash2)
    }
}

pub fn blacklist_canonical(bl: &HashMap<NodeId, Pom>) -> String {
    let mut parts: Vec<String> = bl
        .iter()
        .map(|(node, pom)| format!("[{node}:{pom}]"))
        .collect();
    parts.sort();
    parts.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_keys_accepted() {
        assert!(validate_key(&Key("A/dir/path".into())).is_ok());
        assert!(validate_key(&Key("A/dir/sub.path".into())).is_ok());
        assert!(validate_key(&Key("A_1/dir_2/a/b/c.d".into())).is_ok());
    }

    #[test]
    fn keys_missing_components_rejected() {
        assert!(validate_key(&Key("A/dir".into())).is_err());
        assert!(validate_key(&Key("A".into())).is_err());
    }

    #[test]
    fn keys_with_bad_chars_rejected() {
        assert!(validate_key(&Key("A/di-r/path".into())).is_err());
        assert!(validate_key(&Key("A/dir/pa th".into())).is_err());
    }

    #[test]
    fn keys_over_max_length_rejected() {
        let long_path = "a".repeat(90);
        let key = Key(format!("A/dir/{long_path}"));
        assert!(validate_key(&key).is_err());
    }

    #[test]
    fn split_key_extracts_owner_dir_path() {
        let (owner, dir, path) = split_key(&Key("A/dir/a/b.c".into())).unwrap();
        assert_eq!(owner, NodeId::new("A"));
        assert_eq!(dir, Dir("dir".into()));
        assert_eq!(path, "a/b.c");
    }

    #[test]
    fn virtual_node_id_prefix_roundtrips_to_real_node_id() {
        let real = NodeId::new("A");
        let hash = EncodedHash("h1".into());
        let virt = real.virtualize(&hash);
        assert_eq!(virt.0, "A.h1");
        assert_eq!(virt.real_node_id(), real);
    }
}
