// Fork (equivocation) detection and joining.
//
//   A<-B<-C
//      |
//   A<-B<-C'
//
// If a newly received entry claims `B` as its predecessor but this node has
// already accepted a different successor `C` to `B`, the issuer signed two
// incompatible continuations of the same history: a fork. `B` is the common
// history; `C` and `C'` become two virtual-node branches so replication can
// keep tracking both without conflating them, and the issuer is recorded in
// the blacklist with a `Pom` (proof of misbehavior) naming both hashes.

use std::sync::Arc;

use crate::entry::LogEntry;
use crate::message::Message;
use crate::state::LogState;
use crate::types::{EncodedHash, NodeId, Pom};

/// Find the entry (if any) that shares common history with `entry`: the
/// existing entry claiming the same predecessor `entry` claims. Returns
/// `(existing_entry, virtual_node_id_of_existing_branch, fork_index)`.
fn log_entry_share_common_history(
    state: &LogState,
    entry: &LogEntry,
) -> (Option<Arc<LogEntry>>, NodeId, i64) {
    match entry.dvv.get(&entry.node_id) {
        None => {
            // `entry` is the first entry ever issued by its node id: a fork
            // can only be with another claimed "first" entry.
            let virtual_node_id = entry.node_id.clone();
            match state.sequential_log.get(&virtual_node_id).and_then(|v| v.first()) {
                Some(existing) => (Some(existing.clone()), virtual_node_id, 0),
                None => (None, virtual_node_id, -1),
            }
        }
        Some(claimed_prev) => {
            let virtual_node_id = state
                .entry_node_map
                .get(&claimed_prev.hash_of_entry)
                .cloned()
                .unwrap_or_else(|| entry.node_id.clone());
            match state.entry_after(&virtual_node_id, claimed_prev) {
                Some((idx, existing)) => (Some(existing), virtual_node_id, idx as i64),
                None => (None, virtual_node_id, -1),
            }
        }
    }
}

/// Split `old_virtual_node_id`'s branch at index `i` (inclusive): entries
/// `[i..]` move to `new_virtual_node_id`, `[..i]` stay. Rewrites every index
/// that names the moved entries.
fn join_fork(state: &mut LogState, old_virtual_node_id: &NodeId, new_virtual_node_id: &NodeId, i: usize) {
    let old_log = state
        .sequential_log
        .get_mut(old_virtual_node_id)
        .expect("fork point must be within an existing branch");
    let moved = old_log.split_off(i);
    state.sequential_log.insert(new_virtual_node_id.clone(), moved);

    let moved = state.sequential_log.get(new_virtual_node_id).unwrap().clone();
    for log_entry in &moved {
        let hash = log_entry.encoded_hash();
        state.entry_node_map.insert(hash, new_virtual_node_id.clone());
        if let Message::Update(update) = &log_entry.message {
            if let Some(per_node) = state.checkpoint.get_mut(&update.key) {
                let moves = per_node
                    .get(old_virtual_node_id)
                    .map(|existing| Arc::ptr_eq(existing, log_entry))
                    .unwrap_or(false);
                if moves {
                    per_node.remove(old_virtual_node_id);
                    per_node.insert(new_virtual_node_id.clone(), log_entry.clone());
                }
            }
        }
    }

    match state.last_entry_of(new_virtual_node_id) {
        Some(last_entry) => {
            let version_info = crate::types::VersionInfo {
                accept_stamp: last_entry.accept_stamp,
                hash_of_entry: last_entry.encoded_hash(),
            };
            if state.dvv.remove(old_virtual_node_id).is_some() {
                state.dvv.insert(new_virtual_node_id.clone(), version_info.clone());
            }
            state
                .version_vector
                .insert(new_virtual_node_id.clone(), version_info);
        }
        None => unreachable!("a fork branch being created must be non-empty"),
    }

    match state.last_entry_of(old_virtual_node_id) {
        Some(last_entry) => {
            let version_info = crate::types::VersionInfo {
                accept_stamp: last_entry.accept_stamp,
                hash_of_entry: last_entry.encoded_hash(),
            };
            state
                .version_vector
                .insert(old_virtual_node_id.clone(), version_info);
        }
        None => {
            state.version_vector.remove(old_virtual_node_id);
        }
    }
}

/// Check `entry` for equivocation against recorded history and, if found,
/// join the fork into two virtual branches. Returns the proof of
/// misbehavior (if any) and the virtual node id `entry` itself should be
/// filed under once committed.
pub fn detect_and_join_fork(state: &mut LogState, entry: &LogEntry) -> (Option<Pom>, NodeId, EncodedHash) {
    let new_hash = entry.encoded_hash();
    let (existing_entry, old_virtual_node_id, fork_index) = log_entry_share_common_history(state, entry);

    let existing_entry = match existing_entry {
        Some(e) => e,
        None => return (None, entry.node_id.clone(), new_hash),
    };

    let existing_hash = existing_entry.encoded_hash();
    if existing_hash == new_hash {
        // Re-delivery of an entry this node already has, not a fork.
        return (None, old_virtual_node_id, new_hash);
    }

    let pom = Pom {
        node_id: entry.node_id.clone(),
        hash1: new_hash.clone(),
        hash2: existing_hash.clone(),
    };
    state.blacklist.insert(entry.node_id.clone(), pom.clone());

    let virtual_node_id_1 = entry.node_id.virtualize(&existing_hash);
    let virtual_node_id_2 = entry.node_id.virtualize(&new_hash);
    debug_assert!(
        state
            .sequential_log
            .get(&virtual_node_id_1)
            .map(|v| v.is_empty())
            .unwrap_or(true),
        "virtual node id must not already be in use"
    );

    join_fork(state, &old_virtual_node_id, &virtual_node_id_1, fork_index as usize);
    state.entry_node_map.insert(new_hash.clone(), virtual_node_id_2.clone());

    (Some(pom), virtual_node_id_2, new_hash)
}
