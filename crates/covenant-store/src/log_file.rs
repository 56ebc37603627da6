// Log storage: append-only framed file; sequential iterator.
//
// Each record is one base64url-text line. A trailing partial line (no
// terminating newline, e.g. a crash mid-append) is treated as clean EOF
// rather than an error: the reader silently drops it, and the next
// successful append finds the file exactly as long as the last complete
// record left it (appends are O_APPEND, never truncating).

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::StoreError;

pub struct LogFileStorage {
    path: PathBuf,
}

impl LogFileStorage {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if !path.exists() {
            File::create(&path)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_line(&self, line: &str) -> Result<(), StoreError> {
        let mut f = OpenOptions::new().append(true).open(&self.path)?;
        f.write_all(line.as_bytes())?;
        f.write_all(b"\n")?;
        Ok(())
    }

    /// Read every complete line in the file, in append order, dropping an
    /// unterminated trailing line if present.
    pub fn read_all_lines(&self) -> Result<Vec<String>, StoreError> {
        let bytes = std::fs::read(&self.path)?;
        Ok(split_complete_lines(&bytes))
    }

    /// Atomically replace this log file's contents with `new_path`'s,
    /// leaving `new_path` gone and this file holding what it held. Used by
    /// the GC cutover to swap in the post-cut log file.
    pub fn replace_with(&self, new_path: &Path) -> Result<(), StoreError> {
        std::fs::rename(new_path, &self.path)?;
        Ok(())
    }
}

fn split_complete_lines(bytes: &[u8]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'\n' {
            if let Ok(s) = std::str::from_utf8(&bytes[start..i]) {
                if !s.is_empty() {
                    lines.push(s.to_string());
                }
            }
            start = i + 1;
        }
    }
    // Any bytes after the last '\n' are a partial/torn trailing record; drop
    // them rather than surfacing a parse error.
    lines
}

/// Buffered, streaming variant for large log files; functionally equivalent
/// to `read_all_lines` but avoids holding the whole file in memory at once.
pub struct LogFileIterator {
    reader: BufReader<File>,
}

impl LogFileIterator {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
        })
    }
}

impl Iterator for LogFileIterator {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let mut buf = String::new();
        match self.reader.read_line(&mut buf) {
            Ok(0) => None,
            Ok(_) => {
                if buf.ends_with('\n') {
                    buf.truncate(buf.len() - 1);
                    Some(buf)
                } else {
                    // Partial trailing line: treat as EOF.
                    None
                }
            }
            Err(_) => None,
        }
    }
}
