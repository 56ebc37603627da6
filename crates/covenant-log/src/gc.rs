// The multi-round GC protocol's cut proposal, readiness check, signature
// quorum, and the actual collapse-and-truncate.
//
// `perform_gc` mirrors what a restart does: replay the log up through the
// agreed cut into a fresh `LogState` (picking up blacklist/key-rotation/
// checkpoint state exactly as a live node would), collapse the per-vnode
// history the cut covers down to its tip, persist that as a new snapshot,
// keep only the entries past the cut in the log file, then replay those
// remaining entries on top so the live engine ends up in the same state a
// fresh `LogEngine::open` against the new snapshot+log would produce.

use std::collections::HashMap;
use std::sync::Arc;

use crate::dvv;
use crate::engine::LogEngine;
use crate::entry::LogEntry;
use crate::error::LogError;
use crate::fork;
use crate::message::Cdl;
use crate::state::LogState;
use crate::types::{EncodedHash, NodeId, VersionInfo, VersionVector};

/// propose a cut: for every known node, the oldest version any other node's
/// last entry transitively depends on. Deleting up to (and including) this
/// point can never strand a still-needed dependency.
pub fn propose_cut(state: &LogState, cache: &dvv::DvvCache) -> VersionVector {
    let mut valid_cut = VersionVector::new();
    for node_id in all_known_nodes(state) {
        let Some(last_entry) = state.last_entry_of(&node_id) else {
            continue;
        };
        let full = dvv::build_full_dvv(state, &last_entry.dvv, cache);
        for (depend_node_id, version_info) in &full {
            match valid_cut.get(depend_node_id) {
                None => {
                    valid_cut.insert(depend_node_id.clone(), version_info.clone());
                }
                Some(existing) if version_info.accept_stamp < existing.accept_stamp => {
                    valid_cut.insert(depend_node_id.clone(), version_info.clone());
                }
                _ => {}
            }
        }
    }
    valid_cut
}

fn all_known_nodes(state: &LogState) -> Vec<NodeId> {
    state.sequential_log.keys().cloned().collect()
}

/// Drop any vnode from a proposed cut whose own history isn't ready to lose
/// everything up to that point (see `ready_to_delete`), rather than let one
/// cautious vnode block the whole round. Excluded vnodes simply keep their
/// full history past this GC round; a later round can pick them up once
/// they've accumulated a cushion.
pub fn filter_ready(state: &LogState, cut: VersionVector) -> VersionVector {
    cut.into_iter()
        .filter(|(vnode, vi)| ready_to_delete(state, vnode, vi))
        .collect()
}

/// Whether the vnode can safely lose everything up to and including
/// `cut_version` without stranding its own most recent contribution: either
/// the vnode's history continues past the cut, or the cut already names the
/// vnode's current tip (nothing left to strand).
pub fn ready_to_delete(state: &LogState, vnode: &NodeId, cut_version: &VersionInfo) -> bool {
    let Some(log) = state.sequential_log.get(vnode) else {
        return false;
    };
    let Some(tip) = log.last() else {
        return false;
    };
    if tip.encoded_hash() == cut_version.hash_of_entry {
        return true;
    }
    tip.accept_stamp > cut_version.accept_stamp
}

/// Whether `record` carries a valid signature from every node not currently
/// blacklisted.
pub fn is_fully_signed(
    state: &LogState,
    record: &Cdl,
    public_keys: &HashMap<NodeId, covenant_crypto::RsaPublicKeyHandle>,
) -> bool {
    for node_id in public_keys.keys() {
        if state.blacklist.contains_key(node_id) {
            continue;
        }
        match record.signatures.get(node_id) {
            Some(sig) => {
                let signing_bytes = crate::message::cdl::signing_bytes(record);
                if public_keys[node_id].verify(&signing_bytes, sig).is_err() {
                    return false;
                }
            }
            None => return false,
        }
    }
    true
}

/// Collapse `state`'s `sequential_log`/`log_indexed_by_hash`/`entry_node_map`
/// to one entry per vnode (its current tip). `entry_node_map` is rebuilt from
/// scratch over the *retained* index so no stale hash survives the prune.
fn collapse_to_cut(state: &mut LogState) {
    let mut new_indexed = HashMap::new();
    for entries in state.sequential_log.values_mut() {
        if let Some(tip) = entries.last().cloned() {
            *entries = vec![tip.clone()];
            new_indexed.insert(tip.encoded_hash(), tip);
        }
    }
    state.log_indexed_by_hash = new_indexed;
    state.entry_node_map.retain(|hash, _| state.log_indexed_by_hash.contains_key(hash));
}

/// Replay `lines` into a fresh `LogState` seeded from `node_id`/`default_key`,
/// applying `engine`'s check+fork+memory-update pipeline to each.
fn replay_into(
    engine: &LogEngine,
    node_id: NodeId,
    default_key: Vec<u8>,
    lines: &[String],
    now_unix_seconds: i64,
) -> Result<LogState, LogError> {
    let mut state = LogState::new(node_id, default_key);
    for line in lines {
        let entry: LogEntry = covenant_codec::decode_line(line)?;
        engine.check(&state, &entry, now_unix_seconds)?;
        let (_pom, vnode, _hash) = fork::detect_and_join_fork(&mut state, &entry);
        engine.apply_memory_update(&mut state, vnode, Arc::new(entry));
    }
    Ok(state)
}

/// Run a GC round to completion: collapse everything `record.to_be_deleted`
/// covers into a fresh snapshot, truncate the log file down to what remains,
/// and bring the live engine's state in line with what a restart against the
/// new snapshot+log would produce.
pub fn perform_gc(engine: &LogEngine, record: &Cdl, now_unix_seconds: i64) -> Result<(), LogError> {
    let lines = engine.log_file.read_all_lines()?;

    let mut collapsed_lines = Vec::new();
    let mut retained_lines = Vec::new();
    {
        let state = engine.state.lock();
        for line in &lines {
            let entry: LogEntry = covenant_codec::decode_line(line)?;
            let hash = entry.encoded_hash();
            let vnode = state.entry_node_map.get(&hash).cloned().unwrap_or_else(|| entry.node_id.clone());
            let past_cut = record
                .to_be_deleted
                .get(&vnode)
                .map(|cut| cut.accept_stamp >= entry.accept_stamp)
                .unwrap_or(false);
            if past_cut {
                collapsed_lines.push(line.clone());
            } else {
                retained_lines.push(line.clone());
            }
        }
    }

    let node_id = engine.node_id().clone();
    let default_key = engine.state.lock().default_key.clone();

    let mut collapsed_state = replay_into(engine, node_id.clone(), default_key.clone(), &collapsed_lines, now_unix_seconds)?;
    collapse_to_cut(&mut collapsed_state);

    let snapshot_bytes = covenant_codec::encode(&collapsed_state)?;
    engine.snapshot.write_snapshot(now_unix_seconds as u64, &snapshot_bytes)?;

    let retained_body = if retained_lines.is_empty() {
        String::new()
    } else {
        format!("{}\n", retained_lines.join("\n"))
    };
    let new_log_path = engine.log_file.path().with_extension("gc_new");
    std::fs::write(&new_log_path, retained_body.as_bytes()).map_err(|e| LogError::from(covenant_store::StoreError::from(e)))?;
    engine.log_file.replace_with(&new_log_path)?;

    let mut rebuilt_state = collapsed_state;
    for line in &retained_lines {
        let entry: LogEntry = covenant_codec::decode_line(line)?;
        engine.check(&rebuilt_state, &entry, now_unix_seconds)?;
        let (_pom, vnode, _hash) = fork::detect_and_join_fork(&mut rebuilt_state, &entry);
        engine.apply_memory_update(&mut rebuilt_state, vnode, Arc::new(entry));
    }
    rebuilt_state.local_cdls.remove(&crate::message::cdl::encoded_hash(record));

    *engine.state.lock() = rebuilt_state;
    engine.dvv_cache.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, Update};
    use crate::types::{Key, Timestamp};

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
        state.sequential_log.entry(NodeId::new(node)).or_default().push(arc.clone());
        state.log_indexed_by_hash.insert(hash.clone(), arc);
        state.entry_node_map.insert(hash.clone(), NodeId::new(node));
        hash
    }

    #[test]
    fn ready_to_delete_true_when_history_continues_past_cut() {
        let mut state = LogState::new(NodeId::new("self"), vec![]);
        let h1 = insert_entry(&mut state, "A", 1, VersionVector::new());
        let _h2 = insert_entry(&mut state, "A", 2, VersionVector::new());
        let cut = VersionInfo {
            accept_stamp: Timestamp(1),
            hash_of_entry: h1,
        };
        assert!(ready_to_delete(&state, &NodeId::new("A"), &cut));
    }

    #[test]
    fn ready_to_delete_true_when_cut_is_exactly_the_tip() {
        let mut state = LogState::new(NodeId::new("self"), vec![]);
        let h1 = insert_entry(&mut state, "A", 1, VersionVector::new());
        let cut = VersionInfo {
            accept_stamp: Timestamp(1),
            hash_of_entry: h1,
        };
        assert!(ready_to_delete(&state, &NodeId::new("A"), &cut));
    }

    #[test]
    fn ready_to_delete_false_for_unknown_vnode() {
        let state = LogState::new(NodeId::new("self"), vec![]);
        let cut = VersionInfo {
            accept_stamp: Timestamp(1),
            hash_of_entry: EncodedHash("x".into()),
        };
        assert!(!ready_to_delete(&state, &NodeId::new("ghost"), &cut));
    }

    #[test]
    fn collapse_to_cut_keeps_only_tip_per_vnode_and_prunes_entry_node_map() {
        let mut state = LogState::new(NodeId::new("self"), vec![]);
        let h1 = insert_entry(&mut state, "A", 1, VersionVector::new());
        let h2 = insert_entry(&mut state, "A", 2, VersionVector::new());
        collapse_to_cut(&mut state);
        assert_eq!(state.sequential_log.get(&NodeId::new("A")).map(|v| v.len()), Some(1));
        assert!(!state.entry_node_map.contains_key(&h1));
        assert!(state.entry_node_map.contains_key(&h2));
        assert!(!state.log_indexed_by_hash.contains_key(&h1));
    }

    #[test]
    fn filter_ready_drops_vnodes_whose_tip_would_be_stranded() {
        let mut state = LogState::new(NodeId::new("self"), vec![]);
        let h1 = insert_entry(&mut state, "A", 1, VersionVector::new());
        let mut cut = VersionVector::new();
        // A's only entry is its tip; cutting at a *different*, unknown hash
        // would strand it, so A must be dropped from the cut.
        cut.insert(
            NodeId::new("A"),
            VersionInfo {
                accept_stamp: Timestamp(1),
                hash_of_entry: EncodedHash("not-the-tip".into()),
            },
        );
        let filtered = filter_ready(&state, cut);
        assert!(!filtered.contains_key(&NodeId::new("A")));

        // Cutting exactly at the tip is fine.
        let mut cut2 = VersionVector::new();
        cut2.insert(
            NodeId::new("A"),
            VersionInfo {
                accept_stamp: Timestamp(1),
                hash_of_entry: h1,
            },
        );
        let filtered2 = filter_ready(&state, cut2);
        assert!(filtered2.contains_key(&NodeId::new("A")));
    }

    #[test]
    fn propose_cut_picks_the_oldest_transitively_depended_version() {
        let mut state = LogState::new(NodeId::new("self"), vec![]);
        let ha1 = insert_entry(&mut state, "A", 1, VersionVector::new());
        let _ha2 = insert_entry(&mut state, "A", 2, VersionVector::new());
        let mut dvv_b = VersionVector::new();
        dvv_b.insert(
            NodeId::new("A"),
            VersionInfo {
                accept_stamp: Timestamp(1),
                hash_of_entry: ha1.clone(),
            },
        );
        insert_entry(&mut state, "B", 1, dvv_b);

        let cache = dvv::DvvCache::new();
        let cut = propose_cut(&state, &cache);
        // B's only entry depends on A's stamp-1 entry, so the cut for A must
        // not move past stamp 1 even though A's own tip is at stamp 2.
        assert_eq!(cut.get(&NodeId::new("A")).map(|vi| vi.accept_stamp), Some(Timestamp(1)));
    }
}
