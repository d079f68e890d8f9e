//! Object storage adapters for the archive and the summary log.
//!
//! - `fs`: a local directory standing in for a bucket (default).
//! - `cloud`: S3 via `object_store`, compiled with the `s3` feature.
//!
//! [`build_store`] picks the adapter from the configured URI
//! (`file:///srv/pmu-data`, `/srv/pmu-data`, `s3://pmu-data/daily`).

mod fs;
pub use fs::FsBlobStore;

#[cfg(feature = "s3")]
mod cloud;
#[cfg(feature = "s3")]
pub use cloud::S3BlobStore;

use std::path::{Path, PathBuf};

use thiserror::Error;
use url::Url;

use pmusync_core::config::StorageConfig;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O on '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid storage URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("unsupported storage backend: {0}")]
    Unsupported(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A flat key/value object store.
pub trait BlobStore {
    /// Fetch `key` into `dest`. `Ok(false)` when the object does not exist.
    fn download(&self, key: &str, dest: &Path) -> Result<bool, StorageError>;

    /// Store the file at `src` under `key`, replacing any existing object.
    fn upload(&self, src: &Path, key: &str) -> Result<(), StorageError>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

impl<T: BlobStore + ?Sized> BlobStore for Box<T> {
    fn download(&self, key: &str, dest: &Path) -> Result<bool, StorageError> {
        (**self).download(key, dest)
    }

    fn upload(&self, src: &Path, key: &str) -> Result<(), StorageError> {
        (**self).upload(src, key)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Build the storage backend named by `cfg.uri`.
pub fn build_store(cfg: &StorageConfig) -> Result<Box<dyn BlobStore>, StorageError> {
    let uri = cfg.uri.trim();
    let invalid = |reason: String| StorageError::InvalidUri {
        uri: uri.to_string(),
        reason,
    };

    if !uri.contains("://") {
        return Ok(Box::new(FsBlobStore::new(PathBuf::from(uri))));
    }

    let parsed = Url::parse(uri).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "file" => {
            let root = parsed
                .to_file_path()
                .map_err(|_| invalid("not an absolute file path".into()))?;
            Ok(Box::new(FsBlobStore::new(root)))
        }
        "s3" => {
            #[cfg(feature = "s3")]
            {
                Ok(Box::new(S3BlobStore::new(&parsed, cfg.region.as_deref())?))
            }

            #[cfg(not(feature = "s3"))]
            {
                Err(StorageError::Unsupported(
                    "built without the `s3` feature; rebuild with `--features s3`".into(),
                ))
            }
        }
        other => Err(StorageError::Unsupported(format!("scheme '{other}'"))),
    }
}
