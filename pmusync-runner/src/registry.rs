//! Instrument registry loader.
//!
//! The historian archive directory holds an `<instance>_archive.d` file and, next to
//! it, a CSV export of the archive metadata (`<instance>_dbase.csv`) with columns
//! `historian_id,name,system_name,description,enabled`.
//!
//! Only enabled frequency measurements are collected: the description contains
//! `Frequency` and does not contain `Delta`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use pmusync_core::{Instrument, InstrumentSet};

/// Marker identifying the active archive file in the archive directory.
pub const ARCHIVE_MARKER: &str = "archive.d";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("cannot scan archive directory {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("archive file name '{0}' has no instance prefix")]
    InvalidArchiveName(String),

    #[error("metadata export {0} not found")]
    MetadataNotFound(PathBuf),

    #[error("cannot read metadata export {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Source of the instruments to collect.
pub trait InstrumentRegistry {
    /// Load the filtered instrument set; `Ok(None)` when no archive exists.
    fn load(&self) -> Result<Option<InstrumentSet>, RegistryError>;
}

/// One row of the metadata export.
#[derive(Debug, Deserialize)]
struct MetadataRecord {
    historian_id: i32,
    system_name: String,
    description: String,
    enabled: String,
}

impl MetadataRecord {
    fn is_enabled(&self) -> bool {
        matches!(
            self.enabled.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "y"
        )
    }
}

/// Frequency measurements, excluding their delta variants.
pub fn is_frequency_measurement(description: &str) -> bool {
    description.contains("Frequency") && !description.contains("Delta")
}

/// Reads the registry from a historian archive directory.
#[derive(Debug, Clone)]
pub struct ArchiveRegistry {
    directory: PathBuf,
}

impl ArchiveRegistry {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// The active archive file, if any. With several candidates the last by name wins.
    pub fn locate_archive(&self) -> Result<Option<PathBuf>, RegistryError> {
        let scan_err = |source| RegistryError::Scan {
            path: self.directory.clone(),
            source,
        };
        let mut candidates = Vec::new();
        for entry in fs::read_dir(&self.directory).map_err(scan_err)? {
            let entry = entry.map_err(scan_err)?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.contains(ARCHIVE_MARKER) && entry.path().is_file() {
                candidates.push(entry.path());
            }
        }
        candidates.sort();
        Ok(candidates.pop())
    }

    /// `<dir>/<instance>_dbase.csv` for an archive `<dir>/<instance>_archive.d`.
    pub fn metadata_path(archive: &Path) -> Result<PathBuf, RegistryError> {
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let instance = name
            .rfind('_')
            .map(|i| &name[..i])
            .filter(|prefix| !prefix.is_empty())
            .ok_or_else(|| RegistryError::InvalidArchiveName(name.clone()))?;
        Ok(archive.with_file_name(format!("{instance}_dbase.csv")))
    }

    fn read_metadata(path: &Path) -> Result<InstrumentSet, RegistryError> {
        let metadata_err = |source| RegistryError::Metadata {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(metadata_err)?;

        let mut set = InstrumentSet::new();
        let mut scanned = 0usize;
        for row in reader.deserialize::<MetadataRecord>() {
            let record = row.map_err(metadata_err)?;
            scanned += 1;
            if !record.is_enabled() || !is_frequency_measurement(&record.description) {
                continue;
            }
            let id = record.historian_id;
            if !set.insert(Instrument::new(id, record.system_name)) {
                warn!(historian_id = id, "duplicate historian id in metadata; keeping the first");
            }
        }
        debug!(scanned, kept = set.len(), "metadata export read");
        Ok(set)
    }
}

impl InstrumentRegistry for ArchiveRegistry {
    fn load(&self) -> Result<Option<InstrumentSet>, RegistryError> {
        let Some(archive) = self.locate_archive()? else {
            info!(directory = %self.directory.display(), "no archive found");
            return Ok(None);
        };
        let metadata = Self::metadata_path(&archive)?;
        if !metadata.is_file() {
            return Err(RegistryError::MetadataNotFound(metadata));
        }
        let set = Self::read_metadata(&metadata)?;
        info!(archive = %archive.display(), instruments = set.len(), "registry loaded");
        Ok(Some(set))
    }
}

/// Fixed instrument list, e.g. for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    instruments: Option<InstrumentSet>,
}

impl StaticRegistry {
    pub fn new(instruments: InstrumentSet) -> Self {
        Self {
            instruments: Some(instruments),
        }
    }

    /// A registry whose archive is missing.
    pub fn missing() -> Self {
        Self { instruments: None }
    }
}

impl InstrumentRegistry for StaticRegistry {
    fn load(&self) -> Result<Option<InstrumentSet>, RegistryError> {
        Ok(self.instruments.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmusync_core::InstrumentId;

    const EXPORT: &str = "\
historian_id,name,system_name,description,enabled
1,PPA:1,PMU_SUL,Frequency,true
2,PPA:2,PMU_SUL,Delta Frequency,true
3,PPA:3,PMU_NORTE,Frequency,false
4,PPA:4,PMU_NORTE,Phase Angle,true
5,PPA:5,PMU_NE,Frequency,1
5,PPA:6,PMU_DUP,Frequency,1
";

    fn archive_dir(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }

    #[test]
    fn loads_enabled_frequency_measurements_in_order() {
        let dir = archive_dir(&[("ppa_archive.d", ""), ("ppa_dbase.csv", EXPORT)]);
        let set = ArchiveRegistry::new(dir.path()).load().unwrap().unwrap();

        assert_eq!(set.ids(), vec![InstrumentId(1), InstrumentId(5)]);
        let names: Vec<&str> = set.iter().map(|i| i.display_name.as_str()).collect();
        assert_eq!(names, vec!["PMU_SUL", "PMU_NE"]);
    }

    #[test]
    fn missing_archive_is_not_an_error() {
        let dir = archive_dir(&[("ppa_dbase.csv", EXPORT)]);
        assert!(ArchiveRegistry::new(dir.path()).load().unwrap().is_none());
    }

    #[test]
    fn missing_metadata_export_is_an_error() {
        let dir = archive_dir(&[("ppa_archive.d", "")]);
        assert!(matches!(
            ArchiveRegistry::new(dir.path()).load(),
            Err(RegistryError::MetadataNotFound(_))
        ));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("nope");
        assert!(matches!(
            ArchiveRegistry::new(gone).load(),
            Err(RegistryError::Scan { .. })
        ));
    }

    #[test]
    fn metadata_path_uses_instance_prefix() {
        let p = ArchiveRegistry::metadata_path(Path::new("/data/ppa_archive.d")).unwrap();
        assert_eq!(p, PathBuf::from("/data/ppa_dbase.csv"));
        assert!(ArchiveRegistry::metadata_path(Path::new("/data/archive.d")).is_err());
    }

    #[test]
    fn frequency_filter() {
        assert!(is_frequency_measurement("PMU Frequency"));
        assert!(!is_frequency_measurement("Frequency Delta"));
        assert!(!is_frequency_measurement("frequency"));
    }
}
