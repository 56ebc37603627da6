// Journal: append-only audit file recording which entries were synced/replied.
//
// Lines are `Sync:<hash>` or `Reply:<hash>`. A restarted node replays this
// file to skip already-performed async actions for entries already on disk.

use std::path::PathBuf;

use crate::error::StoreError;
use crate::log_file::LogFileStorage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Sync(String),
    Reply(String),
}

impl JournalEntry {
    fn to_line(&self) -> String {
        match self {
            JournalEntry::Sync(hash) => format!("Sync:{hash}"),
            JournalEntry::Reply(hash) => format!("Reply:{hash}"),
        }
    }

    fn parse(line: &str) -> Result<Self, StoreError> {
        let (tag, hash) = line
            .split_once(':')
            .ok_or_else(|| StoreError::MalformedJournalLine(line.to_string()))?;
        match tag {
            "Sync" => Ok(JournalEntry::Sync(hash.to_string())),
            "Reply" => Ok(JournalEntry::Reply(hash.to_string())),
            _ => Err(StoreError::MalformedJournalLine(line.to_string())),
        }
    }
}

pub struct JournalStorage {
    file: LogFileStorage,
}

impl JournalStorage {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Ok(Self {
            file: LogFileStorage::open(path)?,
        })
    }

    pub fn write(&self, entry: JournalEntry) -> Result<(), StoreError> {
        self.file.append_line(&entry.to_line())
    }

    pub fn mark_synced(&self, hash: &str) -> Result<(), StoreError> {
        self.write(JournalEntry::Sync(hash.to_string()))
    }

    pub fn mark_replied(&self, hash: &str) -> Result<(), StoreError> {
        self.write(JournalEntry::Reply(hash.to_string()))
    }

    /// Replay the full journal, returning the set of hashes already synced
    /// and the set already replied.
    pub fn read_all(&self) -> Result<(Vec<String>, Vec<String>), StoreError> {
        let mut synced = Vec::new();
        let mut replied = Vec::new();
        for line in self.file.read_all_lines()? {
            match JournalEntry::parse(&line)? {
                JournalEntry::Sync(hash) => synced.push(hash),
                JournalEntry::Reply(hash) => replied.push(hash),
            }
        }
        Ok((synced, replied))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_replay_separates_sync_and_reply() {
        let tmp = tempfile::tempdir().unwrap();
        let journal = JournalStorage::open(tmp.path().join("journal.txt")).unwrap();
        journal.mark_synced("hashA").unwrap();
        journal.mark_replied("hashB").unwrap();
        journal.mark_synced("hashC").unwrap();

        let (synced, replied) = journal.read_all().unwrap();
        assert_eq!(synced, vec!["hashA".to_string(), "hashC".to_string()]);
        assert_eq!(replied, vec!["hashB".to_string()]);
    }

    #[test]
    fn malformed_line_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("journal.txt");
        std::fs::write(&path, b"NotATag:hash\n").unwrap();
        let journal = JournalStorage::open(&path).unwrap();
        assert!(matches!(
            journal.read_all(),
            Err(StoreError::MalformedJournalLine(_))
        ));
    }
}
