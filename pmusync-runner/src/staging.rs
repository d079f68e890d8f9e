//! Result assembler: the run's local staging file.
//!
//! One file per run, named after the anchor date. Each successful payload is
//! appended as a new line; the file is opened and closed on every append so no
//! handle is held across the network calls.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
#[error("staging file {path}: {source}")]
pub struct StagingError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

#[derive(Debug)]
pub struct StagingFile {
    path: PathBuf,
    fragments: usize,
}

impl StagingFile {
    /// Create (or truncate) the staging file.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, StagingError> {
        let path = path.into();
        let wrap = |source| StagingError {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(wrap)?;
        }
        fs::File::create(&path).map_err(wrap)?;
        Ok(Self { path, fragments: 0 })
    }

    /// Append a payload as a new line. Empty payloads are skipped.
    ///
    /// Returns `Ok(false)` when nothing was written.
    pub fn append(&mut self, payload: &str) -> Result<bool, StagingError> {
        if payload.trim().is_empty() {
            return Ok(false);
        }
        let wrap = |source| StagingError {
            path: self.path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(wrap)?;
        writeln!(file, "{payload}").map_err(wrap)?;
        file.flush().map_err(wrap)?;
        self.fragments += 1;
        Ok(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Payloads appended so far.
    pub fn fragments(&self) -> usize {
        self.fragments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_line_per_payload() {
        let dir = tempfile::tempdir().unwrap();
        let mut staging = StagingFile::create(dir.path().join("20150118.json")).unwrap();

        assert!(staging.append("{\"a\":1}\n{\"a\":2}").unwrap());
        assert!(!staging.append("").unwrap());
        assert!(!staging.append("  \n").unwrap());
        assert!(staging.append("{\"a\":3}").unwrap());

        let content = fs::read_to_string(staging.path()).unwrap();
        assert_eq!(content, "{\"a\":1}\n{\"a\":2}\n{\"a\":3}\n");
        assert_eq!(staging.fragments(), 2);
    }

    #[test]
    fn create_truncates_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("20150118.json");
        fs::write(&path, "stale\n").unwrap();

        let staging = StagingFile::create(&path).unwrap();

        assert_eq!(fs::read_to_string(staging.path()).unwrap(), "");
    }
}
