use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("content hash mismatch for {hash}")]
    HashMismatch { hash: String },
    #[error("value {0} is not present locally")]
    NotLocal(String),
    #[error("malformed journal line: {0}")]
    MalformedJournalLine(String),
    #[error("no snapshot present")]
    NoSnapshot,
    #[error("crypto error: {0}")]
    Crypto(#[from] covenant_crypto::CryptoError),
}
