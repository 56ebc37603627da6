// Anti-entropy exchanger: "does a peer have updates we don't" plus "pull
// them in dependency order". Grounded on
// `examples/original_source/src/teapot/logex/logex.go`'s `antiEntropy` and
// `anyNewLogEntriesOfNode`.

use std::collections::HashSet;
use std::sync::Arc;

use covenant_log::{EncodedHash, LogEngine, LogEntry, Message, NodeId, Timestamp, VersionInfo};

use crate::adaptor::{Adaptor, RemoteStore};
use crate::error::NetError;
use crate::rpc::RpcClient;

const BLOB_RETRIES: usize = 3;

/// Ties one node's engine to the transport it uses to reach every other
/// node: the blob store first, the peer-RPC client as fallback.
pub struct Exchanger<A: Adaptor> {
    engine: Arc<LogEngine>,
    store: RemoteStore<A>,
    rpc: RpcClient,
    node_bucket_map: std::collections::HashMap<NodeId, String>,
}

impl<A: Adaptor> Exchanger<A> {
    pub fn new(
        engine: Arc<LogEngine>,
        store: RemoteStore<A>,
        rpc: RpcClient,
        node_bucket_map: std::collections::HashMap<NodeId, String>,
    ) -> Self {
        Self {
            engine,
            store,
            rpc,
            node_bucket_map,
        }
    }

    /// Whether `node_id` is blacklisted locally; gossip skips these.
    pub fn is_blocked(&self, node_id: &NodeId) -> bool {
        self.engine.is_blocked(node_id)
    }

    fn bucket_for(&self, node_id: &NodeId) -> Result<&str, NetError> {
        self.node_bucket_map
            .get(node_id)
            .map(String::as_str)
            .ok_or_else(|| NetError::UnknownNode(node_id.0.clone()))
    }

    /// Whether `node_id` has published an update we have not yet observed.
    /// Checks the blob transport's `<nodeId>.latestUpdate` pointer up to 3
    /// times, then falls back to the peer-RPC `GetLastLogEntryInfoOfNode`.
    pub async fn any_new_log_entries_of_node(&self, node_id: &NodeId) -> Result<Option<VersionInfo>, NetError> {
        let bucket = self.bucket_for(node_id)?;
        let pointer_key = format!("{node_id}.latestUpdate");
        for _ in 0..BLOB_RETRIES {
            match self.store.get_text_from(bucket, &pointer_key).await {
                Ok(text) => return Ok(self.parse_latest_update(node_id, &text)?),
                Err(_) => continue,
            }
        }
        match self.rpc.get_last_log_entry_info_of_node(node_id).await? {
            Some(vi) if !self.engine.has_observed(node_id, vi.accept_stamp) => Ok(Some(vi)),
            _ => Ok(None),
        }
    }

    fn parse_latest_update(&self, node_id: &NodeId, text: &str) -> Result<Option<VersionInfo>, NetError> {
        let (stamp, hash) = text
            .split_once(',')
            .ok_or_else(|| NetError::Malformed(format!("malformed latestUpdate pointer: {text}")))?;
        let accept_stamp: i64 = stamp
            .parse()
            .map_err(|_| NetError::Malformed(format!("non-numeric accept_stamp: {stamp}")))?;
        let accept_stamp = Timestamp(accept_stamp);
        if self.engine.has_observed(node_id, accept_stamp) {
            return Ok(None);
        }
        Ok(Some(VersionInfo {
            accept_stamp,
            hash_of_entry: EncodedHash(hash.to_string()),
        }))
    }

    async fn get_entry_by_encoded_hash_remotely(
        &self,
        node_id: &NodeId,
        hash: &EncodedHash,
    ) -> Result<LogEntry, NetError> {
        let bucket = self.bucket_for(node_id)?;
        for _ in 0..BLOB_RETRIES {
            if let Ok(bytes) = self.store.get_binary_from(bucket, &hash.0).await {
                if let Ok(entry) = covenant_codec::decode::<LogEntry>(&bytes) {
                    return Ok(entry);
                }
            }
        }
        self.rpc.get_entry_by_encoded_hash(node_id, hash).await
    }

    async fn get_value_remotely(&self, node_id: &NodeId, hash: &EncodedHash) -> Result<Vec<u8>, NetError> {
        let bucket = self.bucket_for(node_id)?;
        for _ in 0..BLOB_RETRIES {
            if let Ok(bytes) = self.store.get_binary_from(bucket, &hash.0).await {
                return Ok(bytes);
            }
        }
        self.rpc.get_value(node_id, hash).await
    }

    /// Pull `version_info`'s entry and every dependency it transitively
    /// references that we don't already have, then commit the whole closure
    /// in dependency order (leaves first). A forward pass discovers the
    /// closure onto a growing `Vec` used as a work stack; a reverse pass
    /// commits, since dependencies were always discovered after the entries
    /// that reference them.
    pub async fn anti_entropy(
        &self,
        node_id: &NodeId,
        version_info: VersionInfo,
        now_unix_seconds: i64,
    ) -> Result<(), NetError> {
        let target = self
            .get_entry_by_encoded_hash_remotely(node_id, &version_info.hash_of_entry)
            .await?;
        let mut seen = HashSet::new();
        seen.insert(target.encoded_hash());
        let mut stack = vec![target];

        let mut i = 0;
        while i < stack.len() {
            let deps: Vec<(NodeId, VersionInfo)> = stack[i]
                .dvv
                .iter()
                .map(|(n, vi)| (n.clone(), vi.clone()))
                .collect();
            for (dep_node, dep_vi) in deps {
                if self.engine.entry_by_hash(&dep_vi.hash_of_entry).is_some() {
                    continue;
                }
                if !seen.insert(dep_vi.hash_of_entry.clone()) {
                    continue;
                }
                let dep_entry = self
                    .get_entry_by_encoded_hash_remotely(&dep_node, &dep_vi.hash_of_entry)
                    .await?;
                if dep_entry.encoded_hash() != dep_vi.hash_of_entry {
                    return Err(NetError::HashMismatch(dep_vi.hash_of_entry.0.clone()));
                }
                stack.push(dep_entry);
            }
            i += 1;
        }

        let mut committed = HashSet::new();
        for entry in stack.into_iter().rev() {
            let hash = entry.encoded_hash();
            if !committed.insert(hash) {
                continue;
            }
            if let Message::Update(update) = &entry.message {
                if !self.engine.has_value(&update.hash_of_value) {
                    let value = self.get_value_remotely(&entry.node_id, &update.hash_of_value).await?;
                    self.engine.write_value(&update.hash_of_value, &value)?;
                }
            }
            let committed_hash = self.engine.commit_remote(entry, now_unix_seconds)?;
            if let Some(arc) = self.engine.entry_by_hash(&committed_hash) {
                self.engine.async_handle(&arc, now_unix_seconds)?;
            }
        }
        Ok(())
    }
}
