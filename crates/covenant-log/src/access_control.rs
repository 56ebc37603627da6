// Access control as a pure function of an already-accepted DVV claim: every
// Update/ChangeMode carries the accept_stamp its issuer observed for the
// governing directory, and permission is decided against the KeyInfo in
// force *at that stamp*, not the newest one. This is what keeps the ACL
// monotone: a later ChangeMode can never retroactively invalidate a write
// that was permitted when it happened.

use crate::state::LogState;
use crate::types::{Dir, KeyInfo, NodeId, Timestamp};

/// The `KeyInfo` in force for `(owner, dir)` as of `at_stamp`, from `table`
/// (pass `read_key_info` or `write_key_info`). `None` if the directory has
/// never been placed under a ChangeMode, or `at_stamp` predates the first
/// one.
pub(crate) fn key_info_as_of<'a>(
    table: &'a std::collections::HashMap<NodeId, std::collections::HashMap<Dir, Vec<KeyInfo>>>,
    owner: &NodeId,
    dir: &Dir,
    at_stamp: Timestamp,
) -> Option<&'a KeyInfo> {
    let sequence = table.get(owner)?.get(dir)?;
    // Entries are appended in ascending accept_stamp order (state.rs
    // invariant); partition_point finds the first entry *after* at_stamp.
    let idx = sequence.partition_point(|ki| ki.accept_stamp <= at_stamp);
    if idx == 0 {
        None
    } else {
        Some(&sequence[idx - 1])
    }
}

/// Whether `writer` was permitted to write under `(owner, dir)` as of
/// `at_stamp`. A directory with no ChangeMode history is open to its owner
/// only.
pub fn can_write(state: &LogState, owner: &NodeId, dir: &Dir, writer: &NodeId, at_stamp: Timestamp) -> bool {
    match key_info_as_of(&state.write_key_info, owner, dir, at_stamp) {
        Some(ki) => ki.writers.contains(writer),
        None => writer == owner,
    }
}

/// The symmetric key governing `(owner, dir)` as of `at_stamp`, or `None` if
/// the directory is unencrypted at that point in its history. `None` is also
/// returned for a caller who was never granted read access (their `KeyInfo`
/// record carries no `secret_key`).
pub fn read_key(state: &LogState, owner: &NodeId, dir: &Dir, at_stamp: Timestamp) -> Option<Vec<u8>> {
    key_info_as_of(&state.read_key_info, owner, dir, at_stamp)?.secret_key.clone()
}

/// The symmetric key a writer uses to encrypt a new value under `(owner,
/// dir)` as of `at_stamp`. Distinct table from `read_key`: a reader who is
/// not also a writer never has a `WriteKeyInfo` secret, even when their
/// `ReadKeyInfo` secret is populated.
pub fn write_key(state: &LogState, owner: &NodeId, dir: &Dir, at_stamp: Timestamp) -> Option<Vec<u8>> {
    key_info_as_of(&state.write_key_info, owner, dir, at_stamp)?.secret_key.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ki(stamp: i64, writers: &[&str]) -> KeyInfo {
        KeyInfo {
            secret_key: None,
            accept_stamp: Timestamp(stamp),
            writers: writers.iter().map(|w| NodeId::new(*w)).collect(),
        }
    }

    #[test]
    fn owner_can_write_with_no_change_mode_history() {
        let state = LogState::new(NodeId::new("self"), vec![]);
        let owner = NodeId::new("A");
        assert!(can_write(&state, &owner, &Dir("d".into()), &owner, Timestamp(5)));
        assert!(!can_write(
            &state,
            &owner,
            &Dir("d".into()),
            &NodeId::new("B"),
            Timestamp(5)
        ));
    }

    #[test]
    fn write_permission_resolved_at_claimed_stamp_not_latest() {
        let mut state = LogState::new(NodeId::new("self"), vec![]);
        let owner = NodeId::new("A");
        let dir = Dir("d".into());
        state
            .write_key_info
            .entry(owner.clone())
            .or_default()
            .insert(dir.clone(), vec![ki(10, &["A", "B"]), ki(20, &["A"])]);

        // At stamp 15, B was still a writer even though the later
        // ChangeMode at 20 dropped B.
        assert!(can_write(&state, &owner, &dir, &NodeId::new("B"), Timestamp(15)));
        assert!(!can_write(&state, &owner, &dir, &NodeId::new("B"), Timestamp(25)));
    }

    #[test]
    fn stamp_before_first_change_mode_has_no_permission_entry() {
        let mut state = LogState::new(NodeId::new("self"), vec![]);
        let owner = NodeId::new("A");
        let dir = Dir("d".into());
        state
            .write_key_info
            .entry(owner.clone())
            .or_default()
            .insert(dir.clone(), vec![ki(10, &["A", "B"])]);

        assert!(!can_write(&state, &owner, &dir, &NodeId::new("B"), Timestamp(5)));
        assert!(can_write(&state, &owner, &dir, &owner, Timestamp(5)));
    }

    #[test]
    fn read_key_tracks_rotation() {
        let mut state = LogState::new(NodeId::new("self"), vec![]);
        let owner = NodeId::new("A");
        let dir = Dir("d".into());
        let mut first = ki(10, &["A"]);
        first.secret_key = Some(vec![1, 2, 3]);
        let mut second = ki(20, &["A"]);
        second.secret_key = Some(vec![4, 5, 6]);
        state
            .read_key_info
            .entry(owner.clone())
            .or_default()
            .insert(dir.clone(), vec![first, second]);

        assert_eq!(read_key(&state, &owner, &dir, Timestamp(15)), Some(vec![1, 2, 3]));
        assert_eq!(read_key(&state, &owner, &dir, Timestamp(25)), Some(vec![4, 5, 6]));
        assert_eq!(read_key(&state, &owner, &dir, Timestamp(5)), None);
    }
}
