use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use super::{BlobStore, StorageError};

/// A local directory used as a bucket; keys are relative paths below it.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(key.trim_start_matches('/'));
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if key.trim().is_empty() || escapes {
            return Err(StorageError::Backend(format!(
                "key '{key}' escapes the store root"
            )));
        }
        Ok(self.root.join(rel))
    }
}

fn io_err(key: &str) -> impl Fn(io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        key: key.to_string(),
        source,
    }
}

/// Copying a file onto itself truncates it, so both ends are resolved first.
fn refuse_same_file(key: &str, object: &Path, local: &Path) -> Result<(), StorageError> {
    match (fs::canonicalize(object), fs::canonicalize(local)) {
        (Ok(a), Ok(b)) if a == b => Err(StorageError::Backend(format!(
            "object '{key}' and {} are the same file",
            local.display()
        ))),
        _ => Ok(()),
    }
}

impl BlobStore for FsBlobStore {
    fn download(&self, key: &str, dest: &Path) -> Result<bool, StorageError> {
        let object = self.object_path(key)?;
        if !object.is_file() {
            return Ok(false);
        }
        refuse_same_file(key, &object, dest)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(io_err(key))?;
        }
        fs::copy(&object, dest).map_err(io_err(key))?;
        Ok(true)
    }

    fn upload(&self, src: &Path, key: &str) -> Result<(), StorageError> {
        let object = self.object_path(key)?;
        refuse_same_file(key, &object, src)?;
        if let Some(parent) = object.parent() {
            fs::create_dir_all(parent).map_err(io_err(key))?;
        }
        fs::copy(src, &object).map_err(io_err(key))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_then_download() {
        let bucket = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(bucket.path());

        let src = work.path().join("20150118.json.bz2");
        fs::write(&src, b"compressed").unwrap();
        store.upload(&src, "20150118.json.bz2").unwrap();
        assert!(bucket.path().join("20150118.json.bz2").is_file());

        let dest = work.path().join("copy");
        assert!(store.download("20150118.json.bz2", &dest).unwrap());
        assert_eq!(fs::read(&dest).unwrap(), b"compressed");
    }

    #[test]
    fn missing_object_downloads_nothing() {
        let bucket = tempfile::tempdir().unwrap();
        let dest = bucket.path().join("out");
        let store = FsBlobStore::new(bucket.path());

        assert!(!store.download("log.dat", &dest).unwrap());
        assert!(!dest.exists());
    }

    #[test]
    fn rejects_parent_traversal() {
        let store = FsBlobStore::new("/srv/pmu-data");
        assert!(store.object_path("../etc/passwd").is_err());
        assert!(store.object_path("").is_err());
        assert_eq!(
            store.object_path("daily/log.dat").unwrap(),
            PathBuf::from("/srv/pmu-data/daily/log.dat")
        );
    }

    #[test]
    fn copy_onto_itself_is_refused() {
        let bucket = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(bucket.path());
        let object = bucket.path().join("log.dat");
        fs::write(&object, "# earlier run\n").unwrap();
        let aliased = bucket.path().join(".").join("log.dat");

        assert!(matches!(
            store.download("log.dat", &aliased),
            Err(StorageError::Backend(_))
        ));
        assert!(matches!(
            store.upload(&aliased, "log.dat"),
            Err(StorageError::Backend(_))
        ));
        assert_eq!(fs::read_to_string(&object).unwrap(), "# earlier run\n");
    }

    #[test]
    fn upload_of_missing_source_is_io_error() {
        let bucket = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(bucket.path());
        assert!(matches!(
            store.upload(&bucket.path().join("nope"), "x"),
            Err(StorageError::Io { .. })
        ));
    }
}
