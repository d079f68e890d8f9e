//! Collector configuration, loaded from a TOML file.
//!
//! ```toml
//! [archive]
//! directory = "/opt/openPDC/Archive"
//!
//! [schedule]
//! time = "02:30"
//! repetition = "daily"                 # or { once = "19/01/2015" }
//! daylight_saving = { start = "18/10/2015", end = "21/02/2016" }
//!
//! [storage]
//! uri = "s3://pmu-data"
//! ```
//!
//! Everything is validated on load, so a malformed setting fails the run before
//! any request is made.

use std::num::{NonZeroU32, NonZeroUsize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::envelope::EnvelopeMode;
use crate::query::http::DEFAULT_BASE_URL;
use crate::query::RetryPolicy;
use crate::window::{PlanError, RemainderPolicy, Repetition, ScheduleConfig, MAX_PLAN_HOURS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid schedule: {0}")]
    Plan(#[from] PlanError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorConfig {
    pub archive: ArchiveConfig,
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub output: OutputConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
}

/// `[archive]`: where the historian archive and its metadata export live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub directory: PathBuf,
}

/// `[query]`: historian endpoint and retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub base_url: String,
    pub subset_size: NonZeroUsize,
    pub timeout_secs: u64,
    pub attempt_limit: NonZeroU32,
    pub retry_delay_ms: u64,
    pub envelope: EnvelopeMode,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            subset_size: NonZeroUsize::MIN.saturating_add(3),
            timeout_secs: 60,
            attempt_limit: NonZeroU32::MIN.saturating_add(2),
            retry_delay_ms: 0,
            envelope: EnvelopeMode::Text,
        }
    }
}

impl QueryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempt_limit: self.attempt_limit,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

/// `[output]`: local working files. Relative log paths resolve against `staging_dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub staging_dir: PathBuf,
    pub attempt_log: PathBuf,
    pub summary_log: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from("."),
            attempt_log: PathBuf::from("attempts.log"),
            summary_log: PathBuf::from("log.dat"),
        }
    }
}

impl OutputConfig {
    pub fn attempt_log_path(&self) -> PathBuf {
        self.staging_dir.join(&self.attempt_log)
    }

    pub fn summary_log_path(&self) -> PathBuf {
        self.staging_dir.join(&self.summary_log)
    }
}

/// `[storage]`: object storage receiving the archive and the summary log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `file:///dir`, a bare directory path, or `s3://bucket[/prefix]`.
    pub uri: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default = "default_summary_log_key")]
    pub summary_log_key: String,
}

impl StorageConfig {
    /// Directory behind a bare path or `file://` URI; `None` for remote stores.
    pub fn local_root(&self) -> Option<PathBuf> {
        let uri = self.uri.trim();
        if !uri.contains("://") {
            return Some(PathBuf::from(uri));
        }
        url::Url::parse(uri)
            .ok()
            .filter(|u| u.scheme() == "file")?
            .to_file_path()
            .ok()
    }
}

/// `path` with `.` components dropped.
fn lexical(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn default_summary_log_key() -> String {
    "log.dat".to_string()
}

/// `[compression]`: external compressor invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub program: String,
    /// Arguments; `{source}` and `{target}` are replaced with the file paths.
    pub args: Vec<String>,
    pub extension: String,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            program: "7za".to_string(),
            args: ["a", "-tbzip2", "{target}", "{source}", "-mx=9"]
                .into_iter()
                .map(String::from)
                .collect(),
            extension: "bz2".to_string(),
        }
    }
}

impl CollectorConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: CollectorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the repetition mode with a one-off run on `date`.
    pub fn with_once_date(mut self, date: NaiveDate) -> Self {
        self.schedule.repetition = Repetition::Once(date.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let schedule = &self.schedule;
        if schedule.window_hours == 0 {
            return Err(PlanError::ZeroWindow.into());
        }
        for (field, hours) in [
            ("window_hours", schedule.window_hours),
            ("horizon_hours", schedule.horizon_hours),
        ] {
            if hours > MAX_PLAN_HOURS {
                return Err(PlanError::TooLong { field, hours }.into());
            }
        }
        if schedule.remainder == RemainderPolicy::Reject
            && schedule.horizon_hours % schedule.window_hours != 0
        {
            return Err(PlanError::HorizonNotMultiple {
                horizon_hours: schedule.horizon_hours,
                window_hours: schedule.window_hours,
            }
            .into());
        }
        if let Some(dst) = schedule.daylight_saving {
            if dst.start > dst.end {
                return Err(ConfigError::Invalid(format!(
                    "daylight_saving start {} is after end {}",
                    dst.start.0, dst.end.0
                )));
            }
        }

        if self.query.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "query.timeout_secs must be greater than zero".into(),
            ));
        }
        url::Url::parse(&self.query.base_url).map_err(|e| {
            ConfigError::Invalid(format!("query.base_url '{}': {e}", self.query.base_url))
        })?;

        if self.storage.uri.trim().is_empty() {
            return Err(ConfigError::Invalid("storage.uri is empty".into()));
        }
        if self.storage.summary_log_key.trim().is_empty() {
            return Err(ConfigError::Invalid("storage.summary_log_key is empty".into()));
        }
        if let Some(root) = self.storage.local_root() {
            let object = root.join(self.storage.summary_log_key.trim_start_matches('/'));
            let local = self.output.summary_log_path();
            if lexical(&object) == lexical(&local) {
                return Err(ConfigError::Invalid(format!(
                    "storage.summary_log_key and output.summary_log are the same file ({})",
                    local.display()
                )));
            }
        }

        let compression = &self.compression;
        if compression.program.trim().is_empty() {
            return Err(ConfigError::Invalid("compression.program is empty".into()));
        }
        for placeholder in ["{source}", "{target}"] {
            if !compression.args.iter().any(|a| a.contains(placeholder)) {
                return Err(ConfigError::Invalid(format!(
                    "compression.args must contain {placeholder}"
                )));
            }
        }
        if compression.extension.trim_matches('.').is_empty() {
            return Err(ConfigError::Invalid("compression.extension is empty".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::TimeOfDay;

    const MINIMAL: &str = r#"
[archive]
directory = "/opt/openPDC/Archive"

[schedule]
time = "02:30"

[storage]
uri = "file:///var/pmu-data"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = CollectorConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(cfg.schedule.time, TimeOfDay::new(2, 30, 0).unwrap());
        assert_eq!(cfg.schedule.repetition, Repetition::Daily);
        assert_eq!(cfg.schedule.horizon_hours, 24);
        assert_eq!(cfg.schedule.window_hours, 4);
        assert_eq!(cfg.query.subset_size.get(), 4);
        assert_eq!(cfg.query.attempt_limit.get(), 3);
        assert_eq!(cfg.query.retry_policy().delay, Duration::ZERO);
        assert_eq!(cfg.query.envelope, EnvelopeMode::Text);
        assert_eq!(cfg.storage.summary_log_key, "log.dat");
        assert_eq!(cfg.compression.program, "7za");
        assert_eq!(cfg.output.summary_log_path(), PathBuf::from("./log.dat"));
    }

    #[test]
    fn full_config_round_trips_settings() {
        let toml = r#"
[archive]
directory = "D:/openPDC/Archive"

[schedule]
time = "3"
repetition = { once = "19/01/2015" }
daylight_saving = { start = "18/10/2015", end = "2016-02-21" }
horizon_hours = 12
window_hours = 2
remainder = "reject"

[query]
base_url = "http://historian:6152/historian/timeseriesdata/read/historic"
subset_size = 6
timeout_secs = 30
attempt_limit = 5
retry_delay_ms = 250
envelope = "structural"

[output]
staging_dir = "/tmp/pmusync"

[storage]
uri = "s3://pmu-data/daily"
region = "us-east-1"

[compression]
program = "7z"
args = ["a", "-tbzip2", "{target}", "{source}", "-mx=9"]
extension = "bz2"
"#;
        let cfg = CollectorConfig::from_toml(toml).unwrap();
        assert_eq!(
            cfg.schedule.repetition,
            Repetition::Once(NaiveDate::from_ymd_opt(2015, 1, 19).unwrap().into())
        );
        assert_eq!(cfg.schedule.time.hour, 3);
        assert_eq!(cfg.schedule.remainder, RemainderPolicy::Reject);
        assert_eq!(cfg.query.subset_size.get(), 6);
        assert_eq!(cfg.query.retry_policy().delay, Duration::from_millis(250));
        assert_eq!(cfg.query.envelope, EnvelopeMode::Structural);
        assert_eq!(cfg.storage.region.as_deref(), Some("us-east-1"));
        assert_eq!(
            cfg.output.attempt_log_path(),
            PathBuf::from("/tmp/pmusync/attempts.log")
        );
    }

    #[test]
    fn shipped_example_config_is_valid() {
        let example = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../pmusync.example.toml"));
        let cfg = CollectorConfig::from_toml(example).unwrap();
        assert_eq!(cfg.schedule.repetition, Repetition::Daily);
        assert!(cfg.schedule.daylight_saving.is_some());
        assert_eq!(cfg.compression, CompressionConfig::default());
    }

    #[test]
    fn malformed_time_is_a_parse_error() {
        let bad = MINIMAL.replace("02:30", "25:00");
        assert!(matches!(
            CollectorConfig::from_toml(&bad),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn zero_subset_size_is_rejected() {
        let bad = format!("{MINIMAL}\n[query]\nsubset_size = 0\n");
        assert!(CollectorConfig::from_toml(&bad).is_err());
    }

    #[test]
    fn reject_policy_checks_remainder_at_load() {
        let bad = MINIMAL.replace(
            "time = \"02:30\"",
            "time = \"02:30\"\nwindow_hours = 5\nremainder = \"reject\"",
        );
        assert!(matches!(
            CollectorConfig::from_toml(&bad),
            Err(ConfigError::Plan(PlanError::HorizonNotMultiple { .. }))
        ));
    }

    #[test]
    fn oversized_window_is_rejected_at_load() {
        let bad = MINIMAL.replace(
            "time = \"02:30\"",
            "time = \"02:30\"\nhorizon_hours = 4000000000\nwindow_hours = 4000000000",
        );
        assert!(matches!(
            CollectorConfig::from_toml(&bad),
            Err(ConfigError::Plan(PlanError::TooLong { .. }))
        ));

        let year = MINIMAL.replace(
            "time = \"02:30\"",
            &format!("time = \"02:30\"\nhorizon_hours = {MAX_PLAN_HOURS}\nwindow_hours = 24"),
        );
        assert!(CollectorConfig::from_toml(&year).is_ok());
    }

    #[test]
    fn summary_log_inside_local_store_is_rejected() {
        let with_output = |output: &str| format!("{MINIMAL}\n[output]\n{output}\n");

        for staging in ["/var/pmu-data", "/var/pmu-data/./"] {
            let toml = with_output(&format!("staging_dir = \"{staging}\""));
            assert!(
                matches!(CollectorConfig::from_toml(&toml), Err(ConfigError::Invalid(_))),
                "staging_dir {staging} accepted"
            );
        }

        let renamed = with_output("staging_dir = \"/var/pmu-data\"\nsummary_log = \"local.dat\"");
        assert!(CollectorConfig::from_toml(&renamed).is_ok());

        let bare = MINIMAL.replace("file:///var/pmu-data", ".");
        assert!(matches!(
            CollectorConfig::from_toml(&bare),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn remote_store_has_no_local_root() {
        let mut cfg = CollectorConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(cfg.storage.local_root(), Some(PathBuf::from("/var/pmu-data")));
        cfg.storage.uri = "s3://pmu-data".into();
        assert_eq!(cfg.storage.local_root(), None);
    }

    #[test]
    fn inverted_daylight_saving_interval_is_rejected() {
        let bad = MINIMAL.replace(
            "time = \"02:30\"",
            "time = \"02:30\"\ndaylight_saving = { start = \"21/02/2016\", end = \"18/10/2015\" }",
        );
        assert!(matches!(
            CollectorConfig::from_toml(&bad),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn once_override_replaces_daily() {
        let cfg = CollectorConfig::from_toml(MINIMAL)
            .unwrap()
            .with_once_date(NaiveDate::from_ymd_opt(2015, 1, 19).unwrap());
        assert!(matches!(cfg.schedule.repetition, Repetition::Once(_)));
    }
}
