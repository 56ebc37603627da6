// Recursive full-DVV expansion.
//
// A log entry's wire DVV need not be exhaustive: an issuer only lists
// entries changed since its own last entry. `build_full_dvv` reconstructs
// the full causal closure by walking stored dependents. Cycles are
// impossible since hashes are content-defined (an entry can never depend,
// even transitively, on itself), so the walk always terminates; results are
// memoized to cap the cost of repeated ACL/proposeCut lookups over the same
// history.
//
// A fork can later reassign `hash`'s vnode in `entry_node_map` (see
// `fork::join_fork`), so the cache key is `(hash, vnode)`, not just `hash`:
// keying on the hash alone would let a lookup made after such a reassignment
// silently return a closure keyed under the stale pre-fork vnode. A stale
// `(hash, old_vnode)` entry just sits unused once that happens; it is swept
// away the next time a GC round clears the whole cache.

use dashmap::DashMap;

use crate::state::LogState;
use crate::types::{EncodedHash, NodeId, VersionInfo, VersionVector};

#[derive(Default)]
pub struct DvvCache {
    per_entry: DashMap<(EncodedHash, NodeId), VersionVector>,
}

impl DvvCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.per_entry.clear();
    }
}

/// The full transitive closure "as of" `hash`: `hash`'s own virtual-node
/// version info plus everything its own entry (transitively) depends on.
fn full_dvv_of_hash(state: &LogState, cache: &DvvCache, hash: &EncodedHash) -> VersionVector {
    let entry = match state.log_indexed_by_hash.get(hash) {
        Some(e) => e.clone(),
        None => return VersionVector::new(),
    };
    let vnode = state
        .entry_node_map
        .get(hash)
        .cloned()
        .unwrap_or_else(|| entry.node_id.clone());

    let cache_key = (hash.clone(), vnode.clone());
    if let Some(hit) = cache.per_entry.get(&cache_key) {
        return hit.clone();
    }

    let mut result = VersionVector::new();
    result.insert(
        vnode,
        VersionInfo {
            accept_stamp: entry.accept_stamp,
            hash_of_entry: hash.clone(),
        },
    );
    for dep_vi in entry.dvv.values() {
        let dep_closure = full_dvv_of_hash(state, cache, &dep_vi.hash_of_entry);
        merge_keep_max(&mut result, &dep_closure);
    }
    cache.per_entry.insert(cache_key, result.clone());
    result
}

fn merge_keep_max(into: &mut VersionVector, from: &VersionVector) {
    for (node, vi) in from {
        match into.get(node) {
            Some(existing) if existing.accept_stamp >= vi.accept_stamp => {}
            _ => {
                into.insert(node.clone(), vi.clone());
            }
        }
    }
}

/// Build the full causal closure implied by a (possibly partial) `dvv`.
pub fn build_full_dvv(state: &LogState, dvv: &VersionVector, cache: &DvvCache) -> VersionVector {
    let mut result = VersionVector::new();
    for vi in dvv.values() {
        let closure = full_dvv_of_hash(state, cache, &vi.hash_of_entry);
        merge_keep_max(&mut result, &closure);
    }
    result
}

/// The accept stamp of `node`'s last contribution as claimed by the fully
/// expanded `dvv`, or `None` if `node` is not represented.
pub fn version_of(dvv: &VersionVector, node: &NodeId) -> Option<&VersionInfo> {
    dvv.get(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::LogEntry;
    use crate::message::{Message, Update};
    use crate::types::{Key, Timestamp};
    use std::sync::Arc;

    fn insert_entry(state: &mut LogState, node: &str, stamp: i64, dvv: VersionVector) -> EncodedHash {
        let update = Update {
            key: Key(format!("{node}/dir/k")),
            hash_of_value: EncodedHash("v".into()),
            value: None,
        };
        let mut entry = LogEntry::new_unstamped(NodeId::new(node), Message::Update(update));
        entry.accept_stamp = Timestamp(stamp);
        entry.dvv = dvv;
        let hash = entry.encoded_hash();
        let arc = Arc::new(entry);
        state
            .sequential_log
            .entry(NodeId::new(node))
            .or_default()
            .push(arc.clone());
        state.log_indexed_by_hash.insert(hash.clone(), arc);
        state.entry_node_map.insert(hash.clone(), NodeId::new(node));
        hash
    }

    #[test]
    fn full_dvv_expands_transitive_chain() {
        let mut state = LogState::new(NodeId::new("self"), vec![]);
        let h1 = insert_entry(&mut state, "A", 1, VersionVector::new());
        let mut dvv2 = VersionVector::new();
        dvv2.insert(
            NodeId::new("A"),
            VersionInfo {
                accept_stamp: Timestamp(1),
                hash_of_entry: h1.clone(),
            },
        );
        let h2 = insert_entry(&mut state, "A", 2, dvv2);

        let mut partial = VersionVector::new();
        partial.insert(
            NodeId::new("A"),
            VersionInfo {
                accept_stamp: Timestamp(2),
                hash_of_entry: h2.clone(),
            },
        );
        let cache = DvvCache::new();
        let full = build_full_dvv(&state, &partial, &cache);
        assert_eq!(full.len(), 1);
        assert_eq!(full[&NodeId::new("A")].accept_stamp, Timestamp(2));
    }

    #[test]
    fn full_dvv_merges_multiple_node_branches() {
        let mut state = LogState::new(NodeId::new("self"), vec![]);
        let ha = insert_entry(&mut state, "A", 1, VersionVector::new());
        let hb = insert_entry(&mut state, "B", 1, VersionVector::new());

        let mut partial = VersionVector::new();
        partial.insert(
            NodeId::new("A"),
            VersionInfo {
                accept_stamp: Timestamp(1),
                hash_of_entry: ha,
            },
        );
        partial.insert(
            NodeId::new("B"),
            VersionInfo {
                accept_stamp: Timestamp(1),
                hash_of_entry: hb,
            },
        );
        let cache = DvvCache::new();
        let full = build_full_dvv(&state, &partial, &cache);
        assert_eq!(full.len(), 2);
    }
}
