//! Archival handoff: compress the staging file, upload the archive, remove local files.
//!
//! Each step is recorded in the summary log as a milestone on success or a `!`
//! event on failure. A failed step skips the steps that depend on it; local files
//! are only removed after a successful upload.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use pmusync_core::config::CompressionConfig;

use crate::audit::{Milestone, SummaryLog};
use crate::storage::BlobStore;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("cannot run compressor '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("compressor '{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("compressor produced no output at {0}")]
    MissingOutput(PathBuf),

    #[error("cannot prepare archive path {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Turns the staging file into a compressed archive.
pub trait Compressor {
    fn compress(&self, source: &Path, target: &Path) -> Result<(), ArchiveError>;
}

impl<T: Compressor + ?Sized> Compressor for &T {
    fn compress(&self, source: &Path, target: &Path) -> Result<(), ArchiveError> {
        (**self).compress(source, target)
    }
}

/// Runs an external program, e.g. `7za a -tbzip2 <target> <source> -mx=9`.
#[derive(Debug, Clone)]
pub struct CommandCompressor {
    program: String,
    args: Vec<String>,
}

impl CommandCompressor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(cfg: &CompressionConfig) -> Self {
        Self::new(cfg.program.clone(), cfg.args.clone())
    }

    /// Arguments with `{source}` and `{target}` substituted.
    pub fn command_args(&self, source: &Path, target: &Path) -> Vec<OsString> {
        let source = source.to_string_lossy();
        let target = target.to_string_lossy();
        self.args
            .iter()
            .map(|a| {
                OsString::from(
                    a.replace("{source}", &source)
                        .replace("{target}", &target),
                )
            })
            .collect()
    }
}

impl Compressor for CommandCompressor {
    fn compress(&self, source: &Path, target: &Path) -> Result<(), ArchiveError> {
        // 7za adds to an existing archive instead of replacing it.
        if target.exists() {
            fs::remove_file(target).map_err(|e| ArchiveError::Io {
                path: target.to_path_buf(),
                source: e,
            })?;
        }

        let output = Command::new(&self.program)
            .args(self.command_args(source, target))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ArchiveError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(ArchiveError::Failed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if !target.is_file() {
            return Err(ArchiveError::MissingOutput(target.to_path_buf()));
        }
        Ok(())
    }
}

/// `20150118.json` + `bz2` -> `20150118.json.bz2`, next to the staging file.
pub fn archive_path(staging: &Path, extension: &str) -> PathBuf {
    let mut name = staging.file_name().map(OsString::from).unwrap_or_default();
    name.push(".");
    name.push(extension.trim_start_matches('.'));
    staging.with_file_name(name)
}

/// How far the handoff got.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum HandoffStatus {
    Completed { archive_key: String },
    CompressionFailed(String),
    UploadFailed(String),
    CleanupFailed(String),
}

impl HandoffStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, HandoffStatus::Completed { .. })
    }
}

pub struct ArchivalHandoff<'a> {
    compressor: &'a dyn Compressor,
    store: &'a dyn BlobStore,
    extension: &'a str,
}

impl<'a> ArchivalHandoff<'a> {
    pub fn new(compressor: &'a dyn Compressor, store: &'a dyn BlobStore, extension: &'a str) -> Self {
        Self {
            compressor,
            store,
            extension,
        }
    }

    /// Compress, upload and clean up. `Err` only when the summary log cannot be written.
    pub fn run(&self, staging: &Path, summary: &SummaryLog) -> io::Result<HandoffStatus> {
        let archive = archive_path(staging, self.extension);
        let archive_key = archive
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if let Err(e) = self.compressor.compress(staging, &archive) {
            warn!(error = %e, "compression failed");
            summary.event(&format!("Output file not compressed: {e}"))?;
            return Ok(HandoffStatus::CompressionFailed(e.to_string()));
        }
        summary.milestone(&Milestone::OutputCompressed)?;

        if let Err(e) = self.store.upload(&archive, &archive_key) {
            warn!(error = %e, key = %archive_key, "archive upload failed");
            summary.event(&format!("Output file not uploaded: {e}"))?;
            return Ok(HandoffStatus::UploadFailed(e.to_string()));
        }
        info!(key = %archive_key, store = %self.store.describe(), "archive uploaded");
        summary.milestone(&Milestone::OutputUploaded)?;

        if let Err(reason) = remove_local_files(&[staging, archive.as_path()]) {
            warn!(error = %reason, "local cleanup failed");
            summary.event(&format!("Local files not removed: {reason}"))?;
            return Ok(HandoffStatus::CleanupFailed(reason));
        }
        summary.milestone(&Milestone::LocalFilesRemoved)?;

        Ok(HandoffStatus::Completed { archive_key })
    }
}

/// Try every path; the error lists each one that could not be removed.
fn remove_local_files(paths: &[&Path]) -> Result<(), String> {
    let failures: Vec<String> = paths
        .iter()
        .filter_map(|p| match fs::remove_file(p) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Some(format!("{}: {e}", p.display())),
            _ => None,
        })
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures.join("; "))
    }
}
