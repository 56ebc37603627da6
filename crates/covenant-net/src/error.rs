// Transport-level error taxonomy: everything that can go wrong fetching an
// entry/value from a peer, as opposed to `LogError`'s "this entry is invalid"
// taxonomy. `From<LogError>` lets the exchanger propagate a rejected commit
// without needing to wrap it by hand at every call site.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("no addressing information for node {0}")]
    UnknownNode(String),
    #[error("no such bucket: {0}")]
    NoSuchBucket(String),
    #[error("credentials invalid: {0}")]
    CredentialsInvalid(String),
    #[error("remote entry/value not found: {0}")]
    NotFound(String),
    #[error("fetched value does not hash to the expected value: {0}")]
    HashMismatch(String),
    #[error("malformed remote response: {0}")]
    Malformed(String),
    #[error("peer rpc failed: {0}")]
    RpcFailed(String),
    #[error("remote store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Log(#[from] covenant_log::LogError),
    #[error(transparent)]
    Codec(#[from] covenant_codec::CodecError),
}
