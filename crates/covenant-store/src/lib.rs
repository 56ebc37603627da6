// Content store, log storage, journal, and snapshot manager.
//
//! On-disk persistence primitives for the log engine: the content-addressed
//! value store, the append-only log file and its streaming iterator, the
//! append-only sync/reply journal, and the timestamp-ordered snapshot
//! manager. None of these know the shape of a `LogEntry` or the in-memory
//! log state; they operate on bytes and base64url text lines, keeping the
//! engine's data model out of the persistence layer.

pub mod error;
pub mod journal;
pub mod log_file;
pub mod snapshot;
pub mod value_store;

pub use error::StoreError;
pub use journal::{JournalEntry, JournalStorage};
pub use log_file::{LogFileIterator, LogFileStorage};
pub use snapshot::SnapshotManager;
pub use value_store::ValueStore;
