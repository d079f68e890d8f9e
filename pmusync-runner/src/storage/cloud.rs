use std::fs;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{Error as ObjectStoreError, ObjectStore};
use tokio::runtime::Runtime;
use tracing::debug;
use url::Url;

use super::{BlobStore, StorageError};

/// S3 bucket (optionally under a key prefix), driven from a private tokio runtime.
///
/// Credentials come from the usual `AWS_*` environment variables.
pub struct S3BlobStore {
    runtime: Runtime,
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
}

impl S3BlobStore {
    pub fn new(uri: &Url, region: Option<&str>) -> Result<Self, StorageError> {
        let bucket = uri
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| StorageError::InvalidUri {
                uri: uri.to_string(),
                reason: "missing bucket".into(),
            })?
            .to_string();
        let prefix = uri.path().trim_matches('/').to_string();

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket.clone());
        if let Some(region) = region {
            builder = builder.with_region(region);
        }
        let store = builder
            .build()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let runtime = Runtime::new().map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(Self {
            runtime,
            store: Arc::new(store),
            bucket,
            prefix,
        })
    }

    fn object_path(&self, key: &str) -> ObjectPath {
        let key = key.trim_start_matches('/');
        if self.prefix.is_empty() {
            ObjectPath::from(key)
        } else {
            ObjectPath::from(format!("{}/{key}", self.prefix))
        }
    }
}

impl BlobStore for S3BlobStore {
    fn download(&self, key: &str, dest: &Path) -> Result<bool, StorageError> {
        let location = self.object_path(key);
        let store = Arc::clone(&self.store);
        let fetched = self.runtime.block_on(async move {
            let result = store.get(&location).await?;
            result.bytes().await
        });

        let data = match fetched {
            Ok(data) => data,
            Err(ObjectStoreError::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(StorageError::Backend(e.to_string())),
        };
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                key: key.to_string(),
                source,
            })?;
        }
        fs::write(dest, &data).map_err(|source| StorageError::Io {
            key: key.to_string(),
            source,
        })?;
        debug!(key, bytes = data.len(), "downloaded object");
        Ok(true)
    }

    fn upload(&self, src: &Path, key: &str) -> Result<(), StorageError> {
        let data = fs::read(src).map_err(|source| StorageError::Io {
            key: key.to_string(),
            source,
        })?;
        let len = data.len();
        let location = self.object_path(key);
        let store = Arc::clone(&self.store);
        self.runtime
            .block_on(async move { store.put(&location, Bytes::from(data)).await.map(|_| ()) })
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        debug!(key, bytes = len, "uploaded object");
        Ok(())
    }

    fn describe(&self) -> String {
        if self.prefix.is_empty() {
            format!("s3://{}", self.bucket)
        } else {
            format!("s3://{}/{}", self.bucket, self.prefix)
        }
    }
}
