use thiserror::Error;

/// Structural, crypto/integrity, causal, access, transport, and GC error
/// kinds. Transport errors are surfaced here too since `covenant-net` depends
/// on this crate's `Result` type for anti-entropy commit errors.
#[derive(Error, Debug)]
pub enum LogError {
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("malformed log entry: {0}")]
    MalformedEntry(String),
    #[error("malformed journal line: {0}")]
    MalformedJournalLine(String),
    #[error("configuration incomplete: missing {0}")]
    ConfigIncomplete(String),
    #[error("snapshot is inconsistent with current configuration: {0}")]
    ConfigMismatch(String),

    #[error("signature invalid for entry from {0}")]
    SignatureInvalid(String),
    #[error("hash mismatch for {0}")]
    HashMismatch(String),

    #[error("entry already seen: {0}")]
    AlreadySeen(String),
    #[error("dependency missing: {0}")]
    DependencyMissing(String),
    #[error("dependency mismatch: entry {hash} claimed by {claimed_node} but was issued by {actual_node}")]
    DependencyMismatch {
        hash: String,
        claimed_node: String,
        actual_node: String,
    },
    #[error("accept stamp out of range")]
    StampOutOfRange,

    #[error("read access denied for key {0}")]
    ReadAccessDenied(String),
    #[error("write access denied for key {0}")]
    WriteAccessDenied(String),
    #[error("node {0} is blocked")]
    Blocked(String),

    #[error("remote store unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("no such bucket: {0}")]
    NoSuchBucket(String),
    #[error("credentials invalid: {0}")]
    CredentialsInvalid(String),

    #[error("CDL signature invalid for node {0}")]
    CdlSignatureInvalid(String),
    #[error("CDL is not fully signed")]
    CdlIncomplete,
    #[error("entry not ready to delete: {0}")]
    NotReadyToDelete(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("value not present locally: {0}")]
    NotLocal(String),

    #[error(transparent)]
    Crypto(#[from] covenant_crypto::CryptoError),
    #[error(transparent)]
    Codec(#[from] covenant_codec::CodecError),
    #[error(transparent)]
    Store(#[from] covenant_store::StoreError),
}
