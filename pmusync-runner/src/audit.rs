//! Audit and summary logging.
//!
//! Two independent plain-text sinks:
//! - the attempt log, recreated every run, one line per historian request;
//! - the summary log, downloaded at run start and re-uploaded at the end, so it
//!   accumulates milestones and failures across runs.
//!
//! Summary lines look like `# Output file generated (36 fragments) - 19-Jan-2015 03:12:45`
//! for milestones and `! ... - <timestamp>` for failed or empty pairs.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use tracing::warn;

use pmusync_core::{AttemptObserver, AttemptOutcome, QueryAttempt, QueryError, Subset, TimeWindow};

const SUMMARY_TIMESTAMP: &str = "%d-%b-%Y %H:%M:%S";
const ATTEMPT_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S%.3f";
const RUN_SEPARATOR: &str =
    "# ================================================================";

/// Lifecycle stages of a run recorded in the summary log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Milestone {
    InstrumentsLoaded { count: usize },
    CallsPlanned { subsets: usize, windows: usize },
    CallsStarted,
    OutputGenerated { fragments: usize },
    OutputCompressed,
    OutputUploaded,
    LocalFilesRemoved,
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Milestone::InstrumentsLoaded { count } => write!(f, "Instruments loaded ({count})"),
            Milestone::CallsPlanned { subsets, windows } => write!(
                f,
                "Number of calls computed ({subsets} subsets x {windows} windows = {})",
                subsets * windows
            ),
            Milestone::CallsStarted => f.write_str("Service calls started"),
            Milestone::OutputGenerated { fragments } => {
                write!(f, "Output file generated ({fragments} fragments)")
            }
            Milestone::OutputCompressed => f.write_str("Output file compressed"),
            Milestone::OutputUploaded => f.write_str("Output file uploaded"),
            Milestone::LocalFilesRemoved => f.write_str("Local files removed"),
        }
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn append_line(path: &Path, line: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    file.flush()
}

/// The durable cross-run summary log.
#[derive(Debug, Clone)]
pub struct SummaryLog {
    path: PathBuf,
}

impl SummaryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn milestone(&self, milestone: &Milestone) -> io::Result<()> {
        let line = format!("# {milestone} - {}", now().format(SUMMARY_TIMESTAMP));
        append_line(&self.path, &line)
    }

    /// Record a failure or informational event.
    pub fn event(&self, message: &str) -> io::Result<()> {
        let line = format!("! {message} - {}", now().format(SUMMARY_TIMESTAMP));
        append_line(&self.path, &line)
    }

    /// The historian answered with no samples for this pair.
    pub fn no_data(&self, subset: &Subset<'_>, window: &TimeWindow) -> io::Result<()> {
        self.event(&format!(
            "No data returned for subset [{}] window {window}",
            subset.query_param()
        ))
    }

    /// The attempt limit was reached for this pair.
    pub fn data_not_produced(
        &self,
        subset: &Subset<'_>,
        window: &TimeWindow,
        attempts: u32,
        last_error: &QueryError,
    ) -> io::Result<()> {
        self.event(&format!(
            "Data not produced for subset [{}] window {window} after {attempts} attempts: {last_error}",
            subset.query_param()
        ))
    }

    /// Close the run's block.
    pub fn separator(&self) -> io::Result<()> {
        append_line(&self.path, RUN_SEPARATOR)
    }
}

/// The per-run attempt log. Write failures are reported but never stop the run.
#[derive(Debug)]
pub struct AttemptLog {
    path: PathBuf,
    lines: usize,
}

impl AttemptLog {
    /// Create (or truncate) the attempt log.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::File::create(&path)?;
        Ok(Self { path, lines: 0 })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Attempts written so far.
    pub fn lines(&self) -> usize {
        self.lines
    }

    fn write_attempt(&mut self, attempt: &QueryAttempt<'_>) -> io::Result<()> {
        append_line(&self.path, &format_attempt(now(), attempt))?;
        self.lines += 1;
        Ok(())
    }
}

impl AttemptObserver for AttemptLog {
    fn on_attempt(&mut self, attempt: &QueryAttempt<'_>) {
        if let Err(e) = self.write_attempt(attempt) {
            warn!(path = %self.path.display(), error = %e, "cannot write attempt log");
        }
    }
}

pub fn format_attempt(at: NaiveDateTime, attempt: &QueryAttempt<'_>) -> String {
    let result = match &attempt.outcome {
        AttemptOutcome::Succeeded { bytes } => format!("ok ({bytes} bytes)"),
        AttemptOutcome::Empty => "empty".to_string(),
        AttemptOutcome::Transient(err) => format!("failed: {err}"),
        AttemptOutcome::Exhausted(err) => format!("exhausted: {err}"),
    };
    format!(
        "{} subset={} window={} attempt={}/{} {result}",
        at.format(ATTEMPT_TIMESTAMP),
        attempt.subset.query_param(),
        attempt.window,
        attempt.number,
        attempt.limit,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use pmusync_core::InstrumentId;

    fn window() -> TimeWindow {
        let start = NaiveDate::from_ymd_opt(2015, 1, 18)
            .unwrap()
            .and_hms_opt(2, 30, 0)
            .unwrap();
        TimeWindow::starting_at(start, Duration::hours(4))
    }

    #[test]
    fn summary_log_appends_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.dat");
        fs::write(&path, "# previous run\n").unwrap();

        let log = SummaryLog::new(&path);
        log.milestone(&Milestone::CallsStarted).unwrap();
        let ids = [InstrumentId(3), InstrumentId(4)];
        log.no_data(&Subset { index: 0, ids: &ids }, &window()).unwrap();
        log.separator().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "# previous run");
        assert!(lines[1].starts_with("# Service calls started - "));
        assert!(lines[2].starts_with("! No data returned for subset [3,4] window 2015-01-18 02:30:00.000"));
        assert_eq!(lines[3], RUN_SEPARATOR);
    }

    #[test]
    fn milestone_text() {
        assert_eq!(
            Milestone::CallsPlanned {
                subsets: 3,
                windows: 6
            }
            .to_string(),
            "Number of calls computed (3 subsets x 6 windows = 18)"
        );
    }

    #[test]
    fn attempt_line_format() {
        let ids = [InstrumentId(1), InstrumentId(2)];
        let subset = Subset { index: 0, ids: &ids };
        let w = window();
        let attempt = QueryAttempt {
            subset: &subset,
            window: &w,
            number: 2,
            limit: 3,
            outcome: AttemptOutcome::Transient(QueryError::Timeout("30s".into())),
        };
        let at = NaiveDate::from_ymd_opt(2015, 1, 19)
            .unwrap()
            .and_hms_opt(3, 0, 0)
            .unwrap();

        assert_eq!(
            format_attempt(at, &attempt),
            "2015-01-19 03:00:00.000 subset=1,2 window=2015-01-18 02:30:00.000..2015-01-18 06:29:59.999 \
             attempt=2/3 failed: request timed out: 30s"
        );
    }

    #[test]
    fn attempt_log_is_recreated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attempts.log");
        fs::write(&path, "old\n").unwrap();

        let mut log = AttemptLog::create(&path).unwrap();
        let ids = [InstrumentId(1)];
        let subset = Subset { index: 0, ids: &ids };
        let w = window();
        log.on_attempt(&QueryAttempt {
            subset: &subset,
            window: &w,
            number: 1,
            limit: 3,
            outcome: AttemptOutcome::Empty,
        });

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.ends_with("attempt=1/3 empty\n"));
        assert_eq!(log.lines(), 1);
    }
}
