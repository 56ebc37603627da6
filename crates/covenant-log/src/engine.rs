// LogEngine: the commit pipeline, message dispatch, and startup replay.
//
// Every mutation to `LogState` happens while holding `commit_lock`; `check`
// and every message's synchronous `handle` run inside that same critical
// section, matching the single process-wide commit mutex the concurrency
// model calls for. Background replication and gossip live in covenant-net
// and call back into `commit_remote`/`async_handle`; nothing here is async.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use covenant_codec::Canonical;
use covenant_crypto::{RsaKeyPair, RsaPublicKeyHandle};
use covenant_store::{JournalEntry, JournalStorage, LogFileStorage, SnapshotManager, ValueStore};
use parking_lot::Mutex;

use crate::access_control;
use crate::dvv::{self, DvvCache};
use crate::entry::LogEntry;
use crate::error::LogError;
use crate::fork;
use crate::message::{Ack, Cdl, ChangeMode, FaultySet, Message, Nack, Update};
use crate::state::LogState;
use crate::types::{split_key, Dir, EncodedHash, Key, NodeId, Timestamp, VersionInfo, VersionVector};

/// Everything the engine needs at startup. A narrower cousin of
/// `covenant_config::NodeConfig` -- just the fields the log engine itself
/// consumes; the surrounding crate owns loading and validating the rest.
pub struct EngineConfig {
    pub node_id: NodeId,
    pub default_key: Vec<u8>,
    pub private_key: RsaKeyPair,
    pub public_keys: HashMap<NodeId, RsaPublicKeyHandle>,
    pub log_path: PathBuf,
    pub journal_path: PathBuf,
    pub snapshot_dir: PathBuf,
    pub value_dir: PathBuf,
}

/// GC round state as observed by the initiator or a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GcRoundState {
    Idle,
    FaultySetSent(EncodedHash),
    CdlProposed(EncodedHash),
    Collecting,
}

pub struct LogEngine {
    node_id: NodeId,
    default_key: Vec<u8>,
    private_key: RsaKeyPair,
    pub(crate) public_keys: HashMap<NodeId, RsaPublicKeyHandle>,
    pub(crate) state: Mutex<LogState>,
    pub(crate) dvv_cache: DvvCache,
    pub(crate) log_file: LogFileStorage,
    journal: JournalStorage,
    pub(crate) snapshot: SnapshotManager,
    values: ValueStore,
    gc_round: Mutex<GcRoundState>,
}

/// Defense against stamp-exhaustion: no `accept_stamp` may exceed 1000x the
/// current wall clock, bounding how far a malicious issuer can pre-claim
/// timestamps.
const STAMP_FANOUT: i64 = 1000;

impl LogEngine {
    /// Open (or create) the engine's on-disk state, loading the latest
    /// snapshot if one exists and replaying the durable log atop it.
    pub fn open(config: EngineConfig, now_unix_seconds: i64) -> Result<Self, LogError> {
        let log_file = LogFileStorage::open(&config.log_path)?;
        let journal = JournalStorage::open(&config.journal_path)?;
        let snapshot = SnapshotManager::open(&config.snapshot_dir)?;
        let values = ValueStore::open(&config.value_dir)?;

        // A fingerprint of the public key derived from `private_key`, not the
        // private key itself -- two distinct private keys essentially never
        // share a public key, so this is as good as comparing the private
        // key directly without ever writing it to a snapshot.
        let identity_fingerprint = covenant_crypto::sha256(config.private_key.public_key().to_base64url_pkix()?.as_bytes()).to_vec();
        let known_public_keys: HashMap<NodeId, String> = config
            .public_keys
            .iter()
            .map(|(node, key)| Ok::<_, LogError>((node.clone(), key.to_base64url_pkix()?)))
            .collect::<Result<_, _>>()?;

        let state = match snapshot.read_latest()? {
            Some(bytes) => {
                let loaded: LogState = covenant_codec::decode(&bytes)?;
                if loaded.my_node_id != config.node_id
                    || loaded.default_key != config.default_key
                    || loaded.identity_fingerprint != identity_fingerprint
                    || loaded.known_public_keys != known_public_keys
                {
                    return Err(LogError::ConfigMismatch(
                        "snapshot's node_id/default_key/private_key/public_keys differ from current configuration".into(),
                    ));
                }
                loaded
            }
            None => {
                let mut fresh = LogState::new(config.node_id.clone(), config.default_key.clone());
                fresh.identity_fingerprint = identity_fingerprint;
                fresh.known_public_keys = known_public_keys;
                fresh
            }
        };

        let engine = Self {
            node_id: config.node_id,
            default_key: config.default_key,
            private_key: config.private_key,
            public_keys: config.public_keys,
            state: Mutex::new(state),
            dvv_cache: DvvCache::new(),
            log_file,
            journal,
            snapshot,
            values,
            gc_round: Mutex::new(GcRoundState::Idle),
        };
        engine.replay(now_unix_seconds)?;
        engine.repopulate_values()?;
        Ok(engine)
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn gc_round_state(&self) -> GcRoundState {
        self.gc_round.lock().clone()
    }

    /// Whether `node_id` is on the local blacklist (a faulty/equivocating
    /// node); gossip and anti-entropy skip these when choosing peers to
    /// exchange with.
    pub fn is_blocked(&self, node_id: &NodeId) -> bool {
        self.state.lock().is_blocked(node_id)
    }

    /// Whether the local log already reflects `node_id` up to and including
    /// `accept_stamp` -- the check `anyNewLogEntriesOfNode` runs against a
    /// peer's advertised `<nodeId>.latestUpdate` pointer before bothering
    /// with a full anti-entropy pass.
    pub fn has_observed(&self, node_id: &NodeId, accept_stamp: Timestamp) -> bool {
        self.state.lock().observed(node_id, accept_stamp)
    }

    /// The most recent `(accept_stamp, hash)` this node has committed for
    /// `node_id`, if any.
    pub fn last_version_info_of(&self, node_id: &NodeId) -> Option<VersionInfo> {
        self.state.lock().last_version_info_of(node_id)
    }

    /// Look up a committed entry by its content hash.
    pub fn entry_by_hash(&self, hash: &EncodedHash) -> Option<Arc<LogEntry>> {
        self.state.lock().log_indexed_by_hash.get(hash).cloned()
    }

    /// Whether the value store already holds the ciphertext for `hash`.
    pub fn has_value(&self, hash: &EncodedHash) -> bool {
        self.values.has(&hash.0)
    }

    /// Fetch a value's raw (still-encrypted) bytes by content hash, for
    /// serving a peer's `GetValue` RPC.
    pub fn read_value(&self, hash: &EncodedHash) -> Result<Vec<u8>, LogError> {
        self.values.read(&hash.0).map_err(LogError::from)
    }

    /// Store a value's raw (still-encrypted) bytes fetched from a peer,
    /// ahead of committing the entry that references it -- anti-entropy's
    /// value-before-header ordering. Rejects a content mismatch rather than
    /// persisting it.
    pub fn write_value(&self, hash: &EncodedHash, bytes: &[u8]) -> Result<(), LogError> {
        self.values.write(&hash.0, bytes).map_err(LogError::from)
    }

    /// Record that `hash` has been synced from/to a peer, so a restart does
    /// not redo anti-entropy work already reflected on disk.
    pub fn mark_synced(&self, hash: &EncodedHash) -> Result<(), LogError> {
        self.journal.mark_synced(&hash.0).map_err(LogError::from)
    }

    /// Commit a fully-formed entry received from a peer during anti-entropy.
    /// Identical to `commit`; named separately so call sites read clearly.
    pub fn commit_remote(&self, entry: LogEntry, now_unix_seconds: i64) -> Result<EncodedHash, LogError> {
        self.commit(entry, now_unix_seconds)
    }

    fn repopulate_values(&self) -> Result<(), LogError> {
        let hashes = self.values.list_hashes()?;
        let mut state = self.state.lock();
        for h in hashes {
            state.values.insert(EncodedHash(h));
        }
        Ok(())
    }

    /// Replay the durable log atop whatever state was loaded from a
    /// snapshot. Entries already reflected in that state are skipped;
    /// everything past it runs the same check/fork/memory-update pipeline a
    /// live commit would, but without re-appending to the log file (the
    /// bytes are already durable). Message-level `async_handle` only runs
    /// for entries the journal doesn't already mark `Reply:`.
    fn replay(&self, now_unix_seconds: i64) -> Result<(), LogError> {
        let (_synced, replied) = self.journal.read_all()?;
        let replied: std::collections::HashSet<String> = replied.into_iter().collect();

        let mut to_async_handle = Vec::new();
        {
            let mut state = self.state.lock();
            for line in self.log_file.read_all_lines()? {
                let entry: LogEntry = covenant_codec::decode_line(&line)?;
                let hash = entry.encoded_hash();
                if state.log_indexed_by_hash.contains_key(&hash) {
                    continue;
                }
                self.check(&state, &entry, now_unix_seconds)?;
                let (pom, vnode, hash) = fork::detect_and_join_fork(&mut state, &entry);
                let _ = pom;
                let arc = Arc::new(entry);
                self.apply_memory_update(&mut state, vnode, arc.clone());
                if !replied.contains(&hash.0) && matches!(arc.message, Message::FaultySet(_) | Message::Ack(_) | Message::Nack(_) | Message::Cdl(_)) {
                    to_async_handle.push(arc);
                }
            }
        }
        for entry in to_async_handle {
            self.async_handle(&entry, now_unix_seconds)?;
        }
        Ok(())
    }

    /// Validates a prospective entry against the current state: signature,
    /// dependency closure, access control, and replay. Fork detection runs
    /// separately so callers can distinguish "reject" from "fork".
    pub(crate) fn check(&self, state: &LogState, entry: &LogEntry, now_unix_seconds: i64) -> Result<(), LogError> {
        let hash = entry.encoded_hash();
        if state.has_entry(&entry.node_id, &hash) {
            return Err(LogError::AlreadySeen(hash.0));
        }
        if state.is_blocked(&entry.node_id) {
            return Err(LogError::Blocked(entry.node_id.0.clone()));
        }
        let public_key = self
            .public_keys
            .get(&entry.node_id)
            .ok_or_else(|| LogError::ConfigIncomplete(format!("public key for {}", entry.node_id)))?;
        entry.verify_signature(public_key)?;
        for (claimed_node, vi) in &entry.dvv {
            let resolved = state
                .log_indexed_by_hash
                .get(&vi.hash_of_entry)
                .ok_or_else(|| LogError::DependencyMissing(vi.hash_of_entry.0.clone()))?;
            if &resolved.node_id != claimed_node {
                return Err(LogError::DependencyMismatch {
                    hash: vi.hash_of_entry.0.clone(),
                    claimed_node: claimed_node.0.clone(),
                    actual_node: resolved.node_id.0.clone(),
                });
            }
        }
        if entry.accept_stamp.0 > STAMP_FANOUT * now_unix_seconds {
            return Err(LogError::StampOutOfRange);
        }
        self.message_check(state, entry)?;
        Ok(())
    }

    fn message_check(&self, state: &LogState, entry: &LogEntry) -> Result<(), LogError> {
        match &entry.message {
            Message::Update(update) => self.check_update(state, entry, update),
            Message::ChangeMode(_) => Ok(()),
            Message::FaultySet(_) => Ok(()),
            Message::Ack(_) => Ok(()),
            Message::Nack(_) => Ok(()),
            Message::Cdl(cdl) => self.check_cdl(entry, cdl),
        }
    }

    fn check_update(&self, state: &LogState, entry: &LogEntry, update: &Update) -> Result<(), LogError> {
        crate::message::update::check_value_integrity(update)?;
        let (owner, dir, _path) = split_key(&update.key)?;
        if entry.node_id != owner {
            let full = dvv::build_full_dvv(state, &entry.dvv, &self.dvv_cache);
            let owner_vi = full
                .get(&owner)
                .ok_or_else(|| LogError::DependencyMissing(format!("no observed version of owner {owner}")))?;
            if !access_control::can_write(state, &owner, &dir, &entry.node_id, owner_vi.accept_stamp) {
                return Err(LogError::WriteAccessDenied(update.key.0.clone()));
            }
        }
        Ok(())
    }

    fn check_cdl(&self, entry: &LogEntry, cdl: &Cdl) -> Result<(), LogError> {
        let public_key = self
            .public_keys
            .get(&entry.node_id)
            .ok_or_else(|| LogError::ConfigIncomplete(format!("public key for {}", entry.node_id)))?;
        if let Some(sig) = cdl.signatures.get(&entry.node_id) {
            public_key
                .verify(&crate::message::cdl::signing_bytes(cdl), sig)
                .map_err(|_| LogError::CdlSignatureInvalid(entry.node_id.0.clone()))?;
        }
        Ok(())
    }

    /// Commit a fully-formed entry: `dvv`, `accept_stamp`, and `signature`
    /// must already be set by the caller (locally authored entries are
    /// stamped+signed by `put`/`change_mode`/etc. before reaching here;
    /// anti-entropy-sourced entries already carry the issuer's own
    /// signature). Runs `check`, persists, then updates memory state.
    pub fn commit(&self, entry: LogEntry, now_unix_seconds: i64) -> Result<EncodedHash, LogError> {
        let mut state = self.state.lock();
        self.commit_locked(&mut state, entry, now_unix_seconds)
    }

    fn commit_locked(
        &self,
        state: &mut LogState,
        entry: LogEntry,
        now_unix_seconds: i64,
    ) -> Result<EncodedHash, LogError> {
        self.check(state, &entry, now_unix_seconds)?;

        if let Message::Update(update) = &entry.message {
            if let Some(value) = &update.value {
                self.values.write(&update.hash_of_value.0, value)?;
            }
        }
        let line = covenant_codec::encode_line(&entry)?;
        self.log_file.append_line(&line)?;

        let (_pom, vnode, hash) = fork::detect_and_join_fork(state, &entry);
        let arc = Arc::new(entry);
        self.apply_memory_update(state, vnode, arc.clone());
        Ok(hash)
    }

    /// Applies the entry to in-memory state, then runs the message's
    /// synchronous `handle`.
    pub(crate) fn apply_memory_update(&self, state: &mut LogState, vnode: NodeId, entry: Arc<LogEntry>) {
        let hash = entry.encoded_hash();
        state.sequential_log.entry(vnode.clone()).or_default().push(entry.clone());
        state.log_indexed_by_hash.insert(hash.clone(), entry.clone());
        state.entry_node_map.insert(hash.clone(), vnode.clone());
        state.version_vector.insert(
            vnode.clone(),
            VersionInfo {
                accept_stamp: entry.accept_stamp,
                hash_of_entry: hash.clone(),
            },
        );

        if entry.node_id == self.node_id {
            state.logical_clock = entry.accept_stamp.succ();
            let mut fresh = VersionVector::new();
            fresh.insert(
                vnode.clone(),
                VersionInfo {
                    accept_stamp: entry.accept_stamp,
                    hash_of_entry: hash.clone(),
                },
            );
            state.dvv = fresh;
        } else {
            if state.logical_clock <= entry.accept_stamp {
                state.logical_clock = entry.accept_stamp.succ();
            }
            state.dvv.insert(
                vnode.clone(),
                VersionInfo {
                    accept_stamp: entry.accept_stamp,
                    hash_of_entry: hash,
                },
            );
        }

        self.message_handle(state, &vnode, &entry);
    }

    fn message_handle(&self, state: &mut LogState, vnode: &NodeId, entry: &Arc<LogEntry>) {
        match &entry.message {
            Message::Update(update) => self.handle_update(state, vnode, entry, update),
            Message::ChangeMode(cm) => self.handle_change_mode(state, entry, cm),
            Message::FaultySet(fs) => self.handle_faulty_set(state, entry, fs),
            Message::Ack(_) => {}
            Message::Nack(_) => {}
            Message::Cdl(cdl) => self.handle_cdl(state, entry, cdl),
        }
    }

    fn handle_update(&self, state: &mut LogState, vnode: &NodeId, entry: &Arc<LogEntry>, update: &Update) {
        let full = dvv::build_full_dvv(state, &entry.dvv, &self.dvv_cache);
        let checkpoint = state.checkpoint.entry(update.key.clone()).or_default();
        let surviving: Vec<NodeId> = crate::message::update::concurrent_entries(
            &full,
            checkpoint.iter().map(|(n, e)| (n, e.as_ref())),
        );
        let mut next: HashMap<NodeId, Arc<LogEntry>> = HashMap::new();
        for n in surviving {
            if let Some(e) = checkpoint.get(&n) {
                next.insert(n, e.clone());
            }
        }
        next.insert(vnode.clone(), entry.clone());
        *checkpoint = next;
    }

    fn handle_change_mode(&self, state: &mut LogState, entry: &Arc<LogEntry>, cm: &ChangeMode) {
        let owner = entry.node_id.clone();
        let writers: std::collections::HashSet<NodeId> = cm.writers.keys().cloned().collect();

        let write_secret = cm
            .writers
            .get(&self.node_id)
            .and_then(|wrapped| crate::message::change_mode::extract_key(wrapped, &self.private_key, &cm.roq).ok());
        state
            .write_key_info
            .entry(owner.clone())
            .or_default()
            .entry(cm.directory.clone())
            .or_default()
            .push(crate::types::KeyInfo {
                secret_key: write_secret.clone(),
                accept_stamp: entry.accept_stamp,
                writers: writers.clone(),
            });

        let read_secret = write_secret.or_else(|| {
            cm.readers
                .get(&self.node_id)
                .and_then(|wrapped| crate::message::change_mode::extract_key(wrapped, &self.private_key, &cm.roq).ok())
        });
        state
            .read_key_info
            .entry(owner)
            .or_default()
            .entry(cm.directory.clone())
            .or_default()
            .push(crate::types::KeyInfo {
                secret_key: read_secret,
                accept_stamp: entry.accept_stamp,
                writers,
            });
    }

    fn handle_faulty_set(&self, state: &mut LogState, entry: &Arc<LogEntry>, fs: &FaultySet) {
        for (node, pom) in &fs.poms {
            state.blacklist.entry(node.clone()).or_insert_with(|| pom.clone());
        }
        if entry.node_id == self.node_id {
            let hash = crate::message::faulty_set::encoded_hash(fs);
            state.ack_faulty_set.insert(hash, std::collections::HashSet::new());
        }
    }

    fn handle_cdl(&self, state: &mut LogState, entry: &Arc<LogEntry>, cdl: &Cdl) {
        let hash = crate::message::cdl::encoded_hash(cdl);
        let record = state.local_cdls.entry(hash).or_insert_with(|| Cdl {
            to_be_deleted: cdl.to_be_deleted.clone(),
            signatures: HashMap::new(),
        });
        if let Some(sig) = cdl.signatures.get(&entry.node_id) {
            record.signatures.insert(entry.node_id.clone(), sig.clone());
        }
    }

    /// `async_handle`: the reply-producing half of FaultySet/Ack/Nack/Cdl
    /// handling. Returns the hash of any reply entry committed. Always marks
    /// the originating entry "replied" in the journal, matching the
    /// reference's behavior of recording this even when no reply was sent.
    pub fn async_handle(&self, entry: &Arc<LogEntry>, now_unix_seconds: i64) -> Result<Option<EncodedHash>, LogError> {
        let reply = match &entry.message {
            Message::FaultySet(fs) => self.async_handle_faulty_set(entry, fs, now_unix_seconds)?,
            Message::Ack(ack) => self.async_handle_ack(entry, ack, now_unix_seconds)?,
            Message::Nack(nack) => self.async_handle_nack(nack)?,
            Message::Cdl(cdl) => self.async_handle_cdl(entry, cdl, now_unix_seconds)?,
            _ => None,
        };
        self.journal.mark_replied(&entry.encoded_hash().0)?;
        Ok(reply)
    }

    fn async_handle_faulty_set(
        &self,
        entry: &Arc<LogEntry>,
        fs: &FaultySet,
        now_unix_seconds: i64,
    ) -> Result<Option<EncodedHash>, LogError> {
        // Every node that processes a FaultySet replies, including the
        // initiator replying to its own: with a single configured node the
        // quorum can only ever be satisfied by that self-reply.
        let fs_hash = crate::message::faulty_set::encoded_hash(fs);
        let delta: HashMap<NodeId, crate::types::Pom> = {
            let state = self.state.lock();
            state
                .blacklist
                .iter()
                .filter(|(n, _)| !fs.poms.contains_key(*n))
                .map(|(n, p)| (n.clone(), p.clone()))
                .collect()
        };
        let message = if delta.is_empty() {
            Message::Ack(Ack {
                initiator: entry.node_id.clone(),
                hash_of_faulty_set: fs_hash,
            })
        } else {
            Message::Nack(Nack {
                initiator: entry.node_id.clone(),
                hash_of_faulty_set: fs_hash,
                new_poms: delta,
            })
        };
        Ok(Some(self.commit_local(message, now_unix_seconds)?))
    }

    fn async_handle_ack(
        &self,
        entry: &Arc<LogEntry>,
        ack: &Ack,
        now_unix_seconds: i64,
    ) -> Result<Option<EncodedHash>, LogError> {
        if ack.initiator != self.node_id {
            return Ok(None);
        }
        let mut complete = false;
        {
            let mut state = self.state.lock();
            if let Some(set) = state.ack_faulty_set.get_mut(&ack.hash_of_faulty_set) {
                set.insert(entry.node_id.clone());
                // Same universe as `gc::is_fully_signed`: every configured node,
                // not just the ones that happen to have written an entry yet.
                let non_blacklisted = self
                    .public_keys
                    .keys()
                    .filter(|n| !state.blacklist.contains_key(n))
                    .count();
                complete = set.len() >= non_blacklisted;
            }
        }
        if !complete {
            return Ok(None);
        }
        let cut = {
            let state = self.state.lock();
            let cut = crate::gc::propose_cut(&state, &self.dvv_cache);
            crate::gc::filter_ready(&state, cut)
        };
        let mut cdl = Cdl {
            to_be_deleted: cut,
            signatures: HashMap::new(),
        };
        let sig = self.private_key.sign(&crate::message::cdl::signing_bytes(&cdl))?;
        cdl.signatures.insert(self.node_id.clone(), sig);
        let hash = self.commit_local(Message::Cdl(cdl), now_unix_seconds)?;
        self.state.lock().ack_faulty_set.remove(&ack.hash_of_faulty_set);
        *self.gc_round.lock() = GcRoundState::CdlProposed(hash.clone());
        Ok(Some(hash))
    }

    fn async_handle_nack(&self, nack: &Nack) -> Result<Option<EncodedHash>, LogError> {
        if nack.initiator != self.node_id {
            return Ok(None);
        }
        self.state.lock().ack_faulty_set.remove(&nack.hash_of_faulty_set);
        *self.gc_round.lock() = GcRoundState::Idle;
        Ok(None)
    }

    fn async_handle_cdl(
        &self,
        entry: &Arc<LogEntry>,
        cdl: &Cdl,
        now_unix_seconds: i64,
    ) -> Result<Option<EncodedHash>, LogError> {
        let hash = crate::message::cdl::encoded_hash(cdl);
        let already_signed = self
            .state
            .lock()
            .local_cdls
            .get(&hash)
            .map(|record| record.signatures.contains_key(&self.node_id))
            .unwrap_or(false);

        let mut reply = None;
        if !already_signed {
            let ready = {
                let state = self.state.lock();
                cdl.to_be_deleted
                    .iter()
                    .all(|(vnode, vi)| crate::gc::ready_to_delete(&state, vnode, vi))
            };
            if ready {
                let sig = self.private_key.sign(&crate::message::cdl::signing_bytes(cdl))?;
                let mut mine = Cdl {
                    to_be_deleted: cdl.to_be_deleted.clone(),
                    signatures: HashMap::new(),
                };
                mine.signatures.insert(self.node_id.clone(), sig);
                reply = Some(self.commit_local(Message::Cdl(mine), now_unix_seconds)?);
            }
        }

        let fully_signed = {
            let state = self.state.lock();
            state
                .local_cdls
                .get(&hash)
                .map(|record| crate::gc::is_fully_signed(&state, record, &self.public_keys))
                .unwrap_or(false)
        };
        if fully_signed {
            let record = self.state.lock().local_cdls.get(&hash).cloned();
            if let Some(record) = record {
                *self.gc_round.lock() = GcRoundState::Collecting;
                crate::gc::perform_gc(self, &record, now_unix_seconds)?;
                *self.gc_round.lock() = GcRoundState::Idle;
            }
        }
        Ok(reply)
    }

    /// Build, stamp, sign, and commit a locally authored non-Update entry
    /// (FaultySet/Ack/Nack/Cdl). Shares the stamping rules every entry gets
    /// but skips the Update-only encryption step.
    /// `now_unix_seconds` is supplied by the caller rather than read from a
    /// clock here, the same way `LogEngine::open`/`put` take it: keeps the
    /// commit pipeline free of hidden time sources.
    fn commit_local(&self, message: Message, now_unix_seconds: i64) -> Result<EncodedHash, LogError> {
        let mut state = self.state.lock();
        let mut entry = LogEntry::new_unstamped(self.node_id.clone(), message);
        entry.accept_stamp = state.logical_clock;
        entry.dvv = state.dvv.clone();
        entry.sign(&self.private_key)?;
        self.commit_locked(&mut state, entry, now_unix_seconds)
    }

    /// Start a GC round: commit and async-handle a FaultySet of the current
    /// blacklist.
    pub fn gc(&self, now_unix_seconds: i64) -> Result<EncodedHash, LogError> {
        let poms = self.state.lock().blacklist.clone();
        let hash = self.commit_local(Message::FaultySet(FaultySet { poms }), now_unix_seconds)?;
        *self.gc_round.lock() = GcRoundState::FaultySetSent(hash.clone());
        let arc = {
            let state = self.state.lock();
            state.log_indexed_by_hash.get(&hash).cloned()
        };
        if let Some(arc) = arc {
            self.async_handle(&arc, now_unix_seconds)?;
        }
        Ok(hash)
    }

    /// Put `plaintext` under `key`, encrypting it under the current write
    /// key for `(owner, dir)` and stamping/signing the resulting Update.
    pub fn put(&self, key: Key, plaintext: Vec<u8>, now_unix_seconds: i64) -> Result<EncodedHash, LogError> {
        let (owner, dir, _path) = split_key(&key)?;
        let mut state = self.state.lock();

        let write_key = if owner == self.node_id {
            access_control::key_info_as_of(&state.write_key_info, &owner, &dir, Timestamp(i64::MAX))
                .and_then(|ki| ki.secret_key.clone())
                .unwrap_or_else(|| self.default_key.clone())
        } else {
            let observed = state
                .version_vector
                .get(&owner)
                .ok_or_else(|| LogError::WriteAccessDenied(key.0.clone()))?
                .accept_stamp;
            if !access_control::can_write(&state, &owner, &dir, &self.node_id, observed) {
                return Err(LogError::WriteAccessDenied(key.0.clone()));
            }
            access_control::key_info_as_of(&state.write_key_info, &owner, &dir, observed)
                .and_then(|ki| ki.secret_key.clone())
                .ok_or_else(|| LogError::WriteAccessDenied(key.0.clone()))?
        };

        let ciphertext = covenant_crypto::encrypt_value(&write_key, &plaintext)?;
        let hash_of_value = EncodedHash(covenant_crypto::hash_and_encode(&ciphertext));
        let update = Update {
            key,
            hash_of_value,
            value: Some(ciphertext),
        };
        let mut entry = LogEntry::new_unstamped(self.node_id.clone(), Message::Update(update));
        entry.accept_stamp = state.logical_clock;
        entry.dvv = state.dvv.clone();
        entry.sign(&self.private_key)?;
        self.commit_locked(&mut state, entry, now_unix_seconds)
    }

    /// Issue a ChangeMode rotating `(directory)`'s key. `readers`/`writers`
    /// name the node ids granted access; the issuer is always added to
    /// `writers`.
    pub fn change_mode(
        &self,
        directory: Dir,
        new_secret: &[u8],
        readers: &[NodeId],
        writers: &[NodeId],
        now_unix_seconds: i64,
    ) -> Result<EncodedHash, LogError> {
        let cm = crate::message::change_mode::build(
            &self.node_id,
            directory,
            new_secret,
            readers,
            writers,
            &self.public_keys,
        )?;
        self.commit_local(Message::ChangeMode(cm), now_unix_seconds)
    }

    /// Read the latest value(s) checkpointed for `key` across every
    /// surviving (possibly concurrent) branch.
    pub fn get(&self, key: &Key) -> Result<Vec<Vec<u8>>, LogError> {
        let state = self.state.lock();
        let (owner, dir, _path) = split_key(key)?;
        let entries = state
            .checkpoint
            .get(key)
            .ok_or_else(|| LogError::KeyNotFound(key.0.clone()))?;
        if entries.is_empty() {
            return Err(LogError::KeyNotFound(key.0.clone()));
        }
        entries
            .values()
            .map(|entry| self.decrypt_update(&state, entry, &owner, &dir))
            .collect()
    }

    fn decrypt_update(
        &self,
        state: &LogState,
        entry: &Arc<LogEntry>,
        owner: &NodeId,
        dir: &Dir,
    ) -> Result<Vec<u8>, LogError> {
        let Message::Update(update) = &entry.message else {
            return Err(LogError::MalformedEntry("checkpoint entry is not an Update".into()));
        };
        let full = dvv::build_full_dvv(state, &entry.dvv, &self.dvv_cache);
        let owner_stamp = if entry.node_id == *owner {
            entry.accept_stamp
        } else {
            full.get(owner)
                .ok_or_else(|| LogError::DependencyMissing(format!("no observed version of owner {owner}")))?
                .accept_stamp
        };
        let key = match access_control::key_info_as_of(&state.read_key_info, owner, dir, owner_stamp) {
            None if *owner == self.node_id => self.default_key.clone(),
            None => return Err(LogError::ReadAccessDenied(update.key.0.clone())),
            Some(ki) => ki
                .secret_key
                .clone()
                .ok_or_else(|| LogError::ReadAccessDenied(update.key.0.clone()))?,
        };
        let ciphertext = self.values.read(&update.hash_of_value.0)?;
        covenant_crypto::decrypt_value(&key, &ciphertext).map_err(LogError::from)
    }
}
