// Update message: writes a value under a key.

use std::collections::HashMap;

use covenant_codec::Canonical;
use serde::{Deserialize, Serialize};

use crate::error::LogError;
use crate::types::{split_key, EncodedHash, Key, NodeId};

/// `value` is present only in a locally authored entry before persist; after
/// persist it is elided (`#[serde(skip)]`) and `hash_of_value` is the
/// integrity anchor for the encrypted payload on disk/remote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub key: Key,
    pub hash_of_value: EncodedHash,
    #[serde(skip)]
    pub value: Option<Vec<u8>>,
}

impl Canonical for Update {
    fn canonical_bytes(&self) -> Vec<u8> {
        format!("Update[{},{}]", self.key, self.hash_of_value).into_bytes()
    }
}

/// `update.check`: verifies value integrity (if present) and write
/// permission. ACL enforcement itself lives in `access_control` and is
/// invoked by the engine's message dispatch, since it needs the full engine
/// state and the entry's DVV.
pub fn check_value_integrity(update: &Update) -> Result<(), LogError> {
    if let Some(value) = &update.value {
        covenant_crypto::validate_encoded_hash(value, &update.hash_of_value.0)
            .map_err(|_| LogError::HashMismatch(update.hash_of_value.0.clone()))?;
    }
    Ok(())
}

pub fn owner_of(update: &Update) -> Result<NodeId, LogError> {
    let (owner, _, _) = split_key(&update.key)?;
    Ok(owner)
}

/// `getConcurrentLogEntries`: among `existing` (the current checkpoint entry
/// set for this key), keep only those the new entry's full dvv does NOT
/// dominate -- i.e. entries concurrent with (not observed by) the new entry.
pub fn concurrent_entries<'a>(
    full_dvv: &HashMap<NodeId, crate::types::VersionInfo>,
    existing: impl IntoIterator<Item = (&'a NodeId, &'a crate::entry::LogEntry)>,
) -> Vec<NodeId> {
    existing
        .into_iter()
        .filter_map(|(vnode, candidate)| {
            let known_stamp = full_dvv
                .get(vnode)
                .map(|vi| vi.accept_stamp)
                .unwrap_or(crate::types::Timestamp(-1));
            if known_stamp < candidate.accept_stamp {
                Some(vnode.clone())
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_integrity_check_passes_for_matching_hash() {
        let value = b"ciphertext".to_vec();
        let hash = EncodedHash(covenant_crypto::hash_and_encode(&value));
        let update = Update {
            key: Key("A/dir/k".into()),
            hash_of_value: hash,
            value: Some(value),
        };
        assert!(check_value_integrity(&update).is_ok());
    }

    #[test]
    fn value_integrity_check_fails_for_mismatching_hash() {
        let update = Update {
            key: Key("A/dir/k".into()),
            hash_of_value: EncodedHash("wrong".into()),
            value: Some(b"ciphertext".to_vec()),
        };
        assert!(matches!(
            check_value_integrity(&update),
            Err(LogError::HashMismatch(_))
        ));
    }
}
