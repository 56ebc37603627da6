// End-to-end scenarios exercising the commit pipeline, access control, and
// fork handling across more than one engine. Anti-entropy/RPC transport
// itself lives in covenant-net; here peer delivery is simulated directly by
// handing an already-signed entry (plus its value, for Updates) from one
// engine to another's `commit_remote`, which is exactly what an anti-entropy
// pull does once it has the bytes in hand.

use std::collections::HashMap;
use std::path::Path;

use covenant_crypto::{RsaKeyPair, RsaPublicKeyHandle};
use covenant_log::message::Update;
use covenant_log::{Dir, EncodedHash, EngineConfig, GcRoundState, Key, LogEngine, LogEntry, LogError, Message, NodeId, Timestamp, VersionInfo};

/// An engine plus an independent copy of its own signing key, needed
/// because `EngineConfig` takes ownership of the key pair the engine signs
/// with -- test fixtures that author their own entries (fork/revoke below)
/// need a second handle to the same key.
struct Node {
    engine: LogEngine,
    private_key: RsaKeyPair,
}

fn open_node(dir: &Path, node_id: &str, private_key: RsaKeyPair, public_keys: HashMap<NodeId, RsaPublicKeyHandle>) -> Node {
    let fixture_key = RsaKeyPair::from_base64url_pkcs1(&private_key.to_base64url_pkcs1().unwrap()).unwrap();
    let base = dir.join(node_id);
    let config = EngineConfig {
        node_id: NodeId::new(node_id),
        default_key: format!("default-key-for-{node_id}").into_bytes(),
        private_key,
        public_keys,
        log_path: base.join("log.txt"),
        journal_path: base.join("journal.txt"),
        snapshot_dir: base.join("snapshots"),
        value_dir: base.join("values"),
    };
    Node {
        engine: LogEngine::open(config, 1_000).unwrap(),
        private_key: fixture_key,
    }
}

/// Simulate anti-entropy delivering `hash` from `from` to `to`: value first
/// (if the message carries one), then the signed entry itself.
fn deliver(from: &Node, to: &Node, hash: &EncodedHash, now: i64) {
    let entry = (*from.engine.entry_by_hash(hash).unwrap()).clone();
    if let Message::Update(update) = &entry.message {
        if !to.engine.has_value(&update.hash_of_value) {
            let bytes = from.engine.read_value(&update.hash_of_value).unwrap();
            to.engine.write_value(&update.hash_of_value, &bytes).unwrap();
        }
    }
    to.engine.commit_remote(entry, now).unwrap();
}

fn three_node_keys() -> (HashMap<NodeId, RsaPublicKeyHandle>, RsaKeyPair, RsaKeyPair, RsaKeyPair) {
    let key_a = RsaKeyPair::generate(2048).unwrap();
    let key_b = RsaKeyPair::generate(2048).unwrap();
    let key_c = RsaKeyPair::generate(2048).unwrap();
    let mut public_keys = HashMap::new();
    public_keys.insert(NodeId::new("A"), key_a.public_key());
    public_keys.insert(NodeId::new("B"), key_b.public_key());
    public_keys.insert(NodeId::new("C"), key_c.public_key());
    (public_keys, key_a, key_b, key_c)
}

/// Build (but do not commit) a signed Update authored by `author`, claiming
/// `dep_hash` on `dep_node` as its sole dependency.
fn build_update(author: &Node, dep_node: &NodeId, dep: &VersionInfo, key: &Key, plaintext: &[u8], accept_stamp: i64) -> LogEntry {
    let secret = covenant_crypto::generate_aes_key();
    let ciphertext = covenant_crypto::encrypt_value(&secret, plaintext).unwrap();
    let hash_of_value = EncodedHash(covenant_crypto::hash_and_encode(&ciphertext));
    let update = Update {
        key: key.clone(),
        hash_of_value,
        value: Some(ciphertext),
    };
    let mut entry = LogEntry::new_unstamped(author.engine.node_id().clone(), Message::Update(update));
    entry.accept_stamp = Timestamp(accept_stamp);
    entry.dvv.insert(dep_node.clone(), dep.clone());
    entry.sign(&author.private_key).unwrap();
    entry
}

#[test]
fn single_node_put_get() {
    let tmp = tempfile::tempdir().unwrap();
    let key_a = RsaKeyPair::generate(2048).unwrap();
    let mut public_keys = HashMap::new();
    public_keys.insert(NodeId::new("A"), key_a.public_key());
    let node = open_node(tmp.path(), "A", key_a, public_keys);

    let key = Key("A/d/k".to_string());
    node.engine.put(key.clone(), b"world".to_vec(), 1_000).unwrap();
    assert_eq!(node.engine.get(&key).unwrap(), vec![b"world".to_vec()]);

    node.engine.put(key.clone(), b"world2".to_vec(), 1_001).unwrap();
    assert_eq!(node.engine.get(&key).unwrap(), vec![b"world2".to_vec()]);
}

#[test]
fn change_mode_then_cross_node_read() {
    let tmp = tempfile::tempdir().unwrap();
    let (public_keys, key_a, key_b, key_c) = three_node_keys();
    let a = open_node(tmp.path(), "A", key_a, public_keys.clone());
    let b = open_node(tmp.path(), "B", key_b, public_keys.clone());
    let c = open_node(tmp.path(), "C", key_c, public_keys);

    let key = Key("A/dir/x".to_string());
    let h1 = a.engine.put(key.clone(), b"v1".to_vec(), 1_000).unwrap();
    deliver(&a, &b, &h1, 1_000);

    // No ChangeMode has ever touched A/dir: B is not the owner, so the read
    // is denied rather than silently falling back to a default key.
    assert!(matches!(b.engine.get(&key), Err(LogError::ReadAccessDenied(_))));

    let secret = covenant_crypto::generate_aes_key();
    let cm_hash = a
        .engine
        .change_mode(Dir("dir".to_string()), &secret, &[NodeId::new("B")], &[], 1_001)
        .unwrap();
    deliver(&a, &b, &cm_hash, 1_001);

    let h2 = a.engine.put(key.clone(), b"v2".to_vec(), 1_002).unwrap();
    deliver(&a, &b, &h2, 1_002);
    assert_eq!(b.engine.get(&key).unwrap(), vec![b"v2".to_vec()]);

    // C never received the ChangeMode, so it still has no read key for
    // A/dir even once it learns the same update.
    deliver(&a, &c, &cm_hash, 1_001);
    deliver(&a, &c, &h2, 1_002);
    assert!(matches!(c.engine.get(&key), Err(LogError::ReadAccessDenied(_))));
}

#[test]
fn fork_detection_blacklists_issuer_and_keeps_both_branches() {
    let tmp = tempfile::tempdir().unwrap();
    let (public_keys, key_a, _key_b, key_c) = three_node_keys();

    // `a` signs two divergent continuations of the same history with the
    // same key, simulating a node that equivocates.
    let a = open_node(tmp.path(), "A", key_a, public_keys.clone());
    let c = open_node(tmp.path(), "C", key_c, public_keys);

    let base_key = Key("A/dir/one".to_string());
    let h_base = a.engine.put(base_key, b"base".to_vec(), 1_000).unwrap();
    deliver(&a, &c, &h_base, 1_000);
    let base_vi = a.engine.last_version_info_of(&NodeId::new("A")).unwrap();

    // Two divergent updates to the same key, both claiming `h_base` as their
    // only dependency -- a real equivocation, not a legitimate next step.
    let target_key = Key("A/dir/target".to_string());
    let e1 = build_update(&a, &NodeId::new("A"), &base_vi, &target_key, b"branch-1", 1_001);
    let e2 = build_update(&a, &NodeId::new("A"), &base_vi, &target_key, b"branch-2", 1_001);
    let h1 = e1.encoded_hash();
    let h2 = e2.encoded_hash();

    a.engine.commit_remote(e1.clone(), 1_001).unwrap();
    c.engine.commit_remote(e1, 1_001).unwrap();
    // `e2` never reaches `a` (it already moved its own tip to `e1`), but `c`
    // learns it exactly as anti-entropy would deliver a divergent entry
    // discovered via a third party.
    c.engine.commit_remote(e2, 1_002).unwrap();

    assert!(c.engine.is_blocked(&NodeId::new("A")));
    assert!(c.engine.entry_by_hash(&h1).is_some());
    assert!(c.engine.entry_by_hash(&h2).is_some());
}

#[test]
fn revoke_stops_future_writes_but_not_past_ones() {
    let tmp = tempfile::tempdir().unwrap();
    let (public_keys, key_a, key_b, _key_c) = three_node_keys();
    let a = open_node(tmp.path(), "A", key_a, public_keys.clone());
    let b = open_node(tmp.path(), "B", key_b, public_keys);

    let grant_secret = covenant_crypto::generate_aes_key();
    let grant_hash = a
        .engine
        .change_mode(Dir("dir".to_string()), &grant_secret, &[], &[NodeId::new("B")], 1_000)
        .unwrap();
    deliver(&a, &b, &grant_hash, 1_000);

    // B writes under A/dir while the grant holds, claiming A's tip (the
    // grant itself) as its dependency.
    let a_tip = a.engine.last_version_info_of(&NodeId::new("A")).unwrap();
    let before_key = Key("A/dir/before".to_string());
    let entry_before = build_update(&b, &NodeId::new("A"), &a_tip, &before_key, b"ok", 1_001);
    let h_before = entry_before.encoded_hash();
    a.engine.commit_remote(entry_before, 1_001).unwrap();
    assert!(a.engine.entry_by_hash(&h_before).is_some());

    let revoke_secret = covenant_crypto::generate_aes_key();
    let revoke_hash = a
        .engine
        .change_mode(Dir("dir".to_string()), &revoke_secret, &[], &[], 1_002)
        .unwrap();
    deliver(&a, &b, &revoke_hash, 1_002);

    let a_tip_after_revoke = a.engine.last_version_info_of(&NodeId::new("A")).unwrap();
    let after_key = Key("A/dir/after".to_string());
    let entry_after = build_update(&b, &NodeId::new("A"), &a_tip_after_revoke, &after_key, b"denied", 1_003);
    assert!(matches!(
        a.engine.commit_remote(entry_after, 1_003),
        Err(LogError::WriteAccessDenied(_))
    ));
}

/// Drive `async_handle` to completion on `engine`: a reply from one call may
/// itself need async handling, so keep following replies until none is
/// produced.
fn drive_async(engine: &LogEngine, mut hash: EncodedHash, now: i64) {
    loop {
        let entry = engine.entry_by_hash(&hash).unwrap();
        match engine.async_handle(&entry, now).unwrap() {
            Some(next) => hash = next,
            None => break,
        }
    }
}

#[test]
fn gc_cycle_collapses_history_and_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let key_a = RsaKeyPair::generate(2048).unwrap();
    let fixture_key = RsaKeyPair::from_base64url_pkcs1(&key_a.to_base64url_pkcs1().unwrap()).unwrap();
    let mut public_keys = HashMap::new();
    public_keys.insert(NodeId::new("A"), key_a.public_key());

    let base = tmp.path().join("A");
    let config = EngineConfig {
        node_id: NodeId::new("A"),
        default_key: b"default-key-for-A".to_vec(),
        private_key: key_a,
        public_keys: public_keys.clone(),
        log_path: base.join("log.txt"),
        journal_path: base.join("journal.txt"),
        snapshot_dir: base.join("snapshots"),
        value_dir: base.join("values"),
    };
    let engine = LogEngine::open(config, 1_000).unwrap();

    let key = Key("A/dir/k".to_string());
    engine.put(key.clone(), b"before-gc".to_vec(), 1_000).unwrap();

    // `gc` commits the FaultySet and already drives its own self-reply (the
    // self-Ack) one level; pick up the cascade from there so that entry
    // isn't processed twice: self-Ack -> quorum reached (one configured node
    // signing for itself) -> Cdl -> fully signed -> perform_gc.
    engine.gc(1_001).unwrap();
    let self_ack = engine.last_version_info_of(&NodeId::new("A")).unwrap();
    drive_async(&engine, self_ack.hash_of_entry, 1_001);

    assert_eq!(engine.get(&key).unwrap(), vec![b"before-gc".to_vec()]);
    let lines_after_gc = std::fs::read_to_string(base.join("log.txt")).unwrap();
    // The cut lands at the FaultySet: the original Update and the FaultySet
    // itself collapse into the new snapshot, leaving the self-Ack and the
    // Cdl as the two lines still past the cut.
    assert_eq!(lines_after_gc.lines().count(), 2);

    drop(engine);

    // Restart: load the snapshot written by the GC round, replay the
    // retained log lines atop it, and confirm the data survives.
    let config2 = EngineConfig {
        node_id: NodeId::new("A"),
        default_key: b"default-key-for-A".to_vec(),
        private_key: fixture_key,
        public_keys,
        log_path: base.join("log.txt"),
        journal_path: base.join("journal.txt"),
        snapshot_dir: base.join("snapshots"),
        value_dir: base.join("values"),
    };
    let reopened = LogEngine::open(config2, 1_002).unwrap();
    assert_eq!(reopened.get(&key).unwrap(), vec![b"before-gc".to_vec()]);
    assert_eq!(reopened.gc_round_state(), GcRoundState::Idle);

    reopened.put(key.clone(), b"after-restart".to_vec(), 1_003).unwrap();
    assert_eq!(reopened.get(&key).unwrap(), vec![b"after-restart".to_vec()]);
}
