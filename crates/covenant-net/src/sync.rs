// Remote-sync worker: pushes locally committed entries (and their values)
// out to the blob store so peers can pull them via anti-entropy. An
// unbounded work channel feeds a single task; each entry's value is synced
// strictly before the entry itself, each step retried with a fixed backoff
// except when the backend rejects the credentials outright, which stops
// the worker entirely rather than retrying forever.

use std::sync::Arc;
use std::time::Duration;

use covenant_log::{LogEngine, LogEntry, Message};
use tokio::sync::mpsc;
use tracing::warn;

use crate::adaptor::{Adaptor, RemoteStore};
use crate::error::NetError;

const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Handle used by commit call sites to enqueue an entry for remote sync
/// without blocking on the network.
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::UnboundedSender<Arc<LogEntry>>,
}

impl SyncHandle {
    /// Enqueue `entry`. Silently dropped if the worker has already exited
    /// (e.g. after a `CredentialsInvalid` shutdown) -- sync is best-effort;
    /// anti-entropy is the backstop that keeps peers eventually consistent.
    pub fn enqueue(&self, entry: Arc<LogEntry>) {
        let _ = self.tx.send(entry);
    }
}

/// Start the worker as a background task and return a handle to feed it.
pub fn spawn<A: Adaptor + 'static>(engine: Arc<LogEngine>, store: RemoteStore<A>, my_bucket: String) -> SyncHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run(engine, store, my_bucket, rx));
    SyncHandle { tx }
}

async fn run<A: Adaptor>(
    engine: Arc<LogEngine>,
    store: RemoteStore<A>,
    my_bucket: String,
    mut rx: mpsc::UnboundedReceiver<Arc<LogEntry>>,
) {
    while let Some(entry) = rx.recv().await {
        if let Err(NetError::CredentialsInvalid(reason)) = sync_one(&engine, &store, &my_bucket, &entry).await {
            warn!(%reason, "remote sync worker stopping: credentials rejected");
            return;
        }
    }
}

/// Sync one entry: its value first (if it carries one), then its header,
/// retrying each step with `RETRY_BACKOFF` until it succeeds or the backend
/// reports invalid credentials, in which case the whole worker exits.
async fn sync_one<A: Adaptor>(
    engine: &Arc<LogEngine>,
    store: &RemoteStore<A>,
    my_bucket: &str,
    entry: &Arc<LogEntry>,
) -> Result<(), NetError> {
    if let Message::Update(update) = &entry.message {
        loop {
            match do_sync_value(engine, store, my_bucket, &update.hash_of_value).await {
                Ok(()) => break,
                Err(NetError::CredentialsInvalid(reason)) => return Err(NetError::CredentialsInvalid(reason)),
                Err(err) => {
                    warn!(%err, hash = %update.hash_of_value, "value sync failed, retrying");
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
            }
        }
    }
    loop {
        match do_sync_log_entry(engine, store, my_bucket, entry).await {
            Ok(()) => return Ok(()),
            Err(NetError::CredentialsInvalid(reason)) => return Err(NetError::CredentialsInvalid(reason)),
            Err(err) => {
                warn!(%err, "log entry sync failed, retrying");
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
        }
    }
}

async fn do_sync_value<A: Adaptor>(
    engine: &Arc<LogEngine>,
    store: &RemoteStore<A>,
    my_bucket: &str,
    hash: &covenant_log::EncodedHash,
) -> Result<(), NetError> {
    let value = engine.read_value(hash)?;
    store.put_binary_to(my_bucket, &hash.0, &value).await?;
    engine.mark_synced(hash)?;
    Ok(())
}

async fn do_sync_log_entry<A: Adaptor>(
    engine: &Arc<LogEngine>,
    store: &RemoteStore<A>,
    my_bucket: &str,
    entry: &Arc<LogEntry>,
) -> Result<(), NetError> {
    let hash = entry.encoded_hash();
    let bytes = covenant_codec::encode(entry.as_ref())?;
    store.put_binary_to(my_bucket, &hash.0, &bytes).await?;
    if entry.node_id == *engine.node_id() {
        let pointer = format!("{},{}", entry.accept_stamp, hash);
        let pointer_key = format!("{}.latestUpdate", entry.node_id);
        store.put_text_to(my_bucket, &pointer_key, &pointer).await?;
    }
    engine.mark_synced(&hash)?;
    Ok(())
}
