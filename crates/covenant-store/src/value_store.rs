// Content store: hash-keyed blob read/write on local disk with integrity check.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// Files live under `<value_dir>/<base64url-hash>`; each file's SHA-256 hash
/// equals its filename. Integrity is checked on both write and read.
pub struct ValueStore {
    dir: PathBuf,
}

impl ValueStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, encoded_hash: &str) -> PathBuf {
        self.dir.join(encoded_hash)
    }

    /// Write `bytes` under `encoded_hash`, rejecting the write if the bytes do
    /// not actually hash to `encoded_hash` -- content-addressed storage is
    /// only as trustworthy as this check.
    pub fn write(&self, encoded_hash: &str, bytes: &[u8]) -> Result<(), StoreError> {
        covenant_crypto::validate_encoded_hash(bytes, encoded_hash).map_err(|_| {
            StoreError::HashMismatch {
                hash: encoded_hash.to_string(),
            }
        })?;
        let final_path = self.path_for(encoded_hash);
        let tmp_path = self.dir.join(format!(".{encoded_hash}.tmp"));
        {
            let mut f = fs::File::create(&tmp_path)?;
            f.write_all(bytes)?;
            f.sync_all()?;
        }
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    /// Read the value stored under `encoded_hash`, re-verifying its hash.
    /// A file present on disk whose content no longer matches its name is
    /// treated the same as corruption, not a hit: `HashMismatch`, not
    /// `NotLocal`.
    pub fn read(&self, encoded_hash: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(encoded_hash);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotLocal(encoded_hash.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        covenant_crypto::validate_encoded_hash(&bytes, encoded_hash).map_err(|_| {
            StoreError::HashMismatch {
                hash: encoded_hash.to_string(),
            }
        })?;
        Ok(bytes)
    }

    pub fn has(&self, encoded_hash: &str) -> bool {
        self.path_for(encoded_hash).is_file()
    }

    /// Scan the directory and return every hash whose file is present,
    /// skipping the temp-write sentinel files (`.<hash>.tmp`). Used at
    /// startup to repopulate the in-memory "values on hand" set.
    pub fn list_hashes(&self) -> Result<Vec<String>, StoreError> {
        let mut hashes = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') {
                continue;
            }
            hashes.push(name.into_owned());
        }
        Ok(hashes)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
