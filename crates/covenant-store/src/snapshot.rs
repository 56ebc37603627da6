// Snapshot manager: timestamp-ordered, serialized log-state snapshots on disk.
//
// Each snapshot lives at `<snapshot_dir>/<unix-seconds>/snapshot.log`. This
// crate treats the payload as an opaque byte blob; the caller (covenant-log)
// is responsible for encoding/decoding its in-memory state into it.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

pub struct SnapshotManager {
    dir: PathBuf,
}

const SNAPSHOT_FILE_NAME: &str = "snapshot.log";

impl SnapshotManager {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// List every snapshot folder name (unix-seconds strings), ascending.
    pub fn list_all(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if name.parse::<u64>().is_ok() {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names.sort_by_key(|n| n.parse::<u64>().unwrap_or(0));
        Ok(names)
    }

    pub fn latest_name(&self) -> Result<Option<String>, StoreError> {
        Ok(self.list_all()?.into_iter().last())
    }

    /// Persist a new snapshot directory named by `unix_seconds`, returning its
    /// folder name. The caller supplies the timestamp (this crate never reads
    /// the system clock so behavior stays deterministic under test).
    pub fn write_snapshot(&self, unix_seconds: u64, bytes: &[u8]) -> Result<String, StoreError> {
        let name = unix_seconds.to_string();
        let folder = self.dir.join(&name);
        if let Err(e) = fs::create_dir_all(&folder) {
            let _ = fs::remove_dir_all(&folder);
            return Err(e.into());
        }
        let path = folder.join(SNAPSHOT_FILE_NAME);
        let write_result = (|| -> Result<(), StoreError> {
            let mut f = fs::File::create(&path)?;
            f.write_all(bytes)?;
            f.sync_all()?;
            Ok(())
        })();
        if let Err(e) = write_result {
            let _ = fs::remove_dir_all(&folder);
            return Err(e);
        }
        Ok(name)
    }

    pub fn read_snapshot(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.dir.join(name).join(SNAPSHOT_FILE_NAME);
        Ok(fs::read(path)?)
    }

    pub fn read_latest(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match self.latest_name()? {
            Some(name) => Ok(Some(self.read_snapshot(&name)?)),
            None => Ok(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_snapshot_yields_none() {
        let tmp = tempfile::tempdir().unwrap();
        let sm = SnapshotManager::open(tmp.path()).unwrap();
        assert!(sm.read_latest().unwrap().is_none());
        assert!(sm.list_all().unwrap().is_empty());
    }

    #[test]
    fn snapshots_are_ordered_by_timestamp_not_string() {
        let tmp = tempfile::tempdir().unwrap();
        let sm = SnapshotManager::open(tmp.path()).unwrap();
        sm.write_snapshot(2, b"second").unwrap();
        sm.write_snapshot(9, b"ninth").unwrap();
        sm.write_snapshot(100, b"hundredth").unwrap();

        let all = sm.list_all().unwrap();
        assert_eq!(all, vec!["2".to_string(), "9".to_string(), "100".to_string()]);
        assert_eq!(sm.read_latest().unwrap().unwrap(), b"hundredth".to_vec());
    }

    #[test]
    fn read_snapshot_by_name_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let sm = SnapshotManager::open(tmp.path()).unwrap();
        let name = sm.write_snapshot(42, b"payload").unwrap();
        assert_eq!(sm.read_snapshot(&name).unwrap(), b"payload".to_vec());
    }
}
