//! Run orchestration.
//!
//! One run: plan the windows, fetch the summary log, load the registry, query every
//! (subset, window) pair in order, assemble the staging file, hand it off to storage,
//! and re-upload the summary log.

use std::fs;
use std::io;
use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use pmusync_core::{
    partition, subset_count, CollectorConfig, HistorianSource, InstrumentId, Outcome, PlanError,
    RetryingClient, TimeWindow, WindowPlan,
};

use crate::archive::{ArchivalHandoff, Compressor, HandoffStatus};
use crate::audit::{AttemptLog, Milestone, SummaryLog};
use crate::registry::{InstrumentRegistry, RegistryError};
use crate::staging::{StagingError, StagingFile};
use crate::storage::{BlobStore, StorageError};

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error("cannot write log: {0}")]
    Log(#[from] io::Error),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    RegistryNotFound,
}

/// What a run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub anchor: NaiveDateTime,
    pub output_file: String,
    pub instruments: usize,
    pub subsets: usize,
    pub windows_per_subset: usize,
    /// Requests issued, retries included.
    pub attempts: usize,
    pub succeeded: usize,
    pub no_data: usize,
    pub exhausted: usize,
    pub fragments: usize,
    pub handoff: Option<HandoffStatus>,
}

impl RunReport {
    fn empty(status: RunStatus, plan: &WindowPlan) -> Self {
        Self {
            status,
            anchor: plan.anchor(),
            output_file: plan.output_file_name(),
            instruments: 0,
            subsets: 0,
            windows_per_subset: plan.count(),
            attempts: 0,
            succeeded: 0,
            no_data: 0,
            exhausted: 0,
            fragments: 0,
            handoff: None,
        }
    }

    /// Pairs planned for this run.
    pub fn pairs(&self) -> usize {
        self.subsets * self.windows_per_subset
    }

    /// The run got all the way through the handoff.
    pub fn is_clean(&self) -> bool {
        match self.status {
            RunStatus::RegistryNotFound => true,
            RunStatus::Completed => self.handoff.as_ref().is_some_and(HandoffStatus::is_completed),
        }
    }
}

/// Dry-run view of a run: the windows and subsets that would be queried.
#[derive(Debug, Clone, Serialize)]
pub struct RunPreview {
    pub anchor: NaiveDateTime,
    pub daylight_saving_applied: bool,
    pub output_file: String,
    pub windows: Vec<TimeWindow>,
    /// `None` when the registry has no archive.
    pub subsets: Option<Vec<Vec<InstrumentId>>>,
}

/// Plan a run for `today` without touching storage or the historian.
pub fn preview(
    config: &CollectorConfig,
    registry: &dyn InstrumentRegistry,
    today: NaiveDate,
) -> Result<RunPreview, RunError> {
    let plan = WindowPlan::build(&config.schedule, today)?;
    let subsets = registry.load()?.map(|set| {
        let ids = set.ids();
        partition(&ids, config.query.subset_size)
            .map(|s| s.ids.to_vec())
            .collect()
    });
    Ok(RunPreview {
        anchor: plan.anchor(),
        daylight_saving_applied: plan.daylight_saving_applied(),
        output_file: plan.output_file_name(),
        windows: plan.windows().collect(),
        subsets,
    })
}

/// The collaborators of one run.
pub struct Collector<'a> {
    config: &'a CollectorConfig,
    registry: &'a dyn InstrumentRegistry,
    source: &'a dyn HistorianSource,
    store: &'a dyn BlobStore,
    compressor: &'a dyn Compressor,
}

impl<'a> Collector<'a> {
    pub fn new(
        config: &'a CollectorConfig,
        registry: &'a dyn InstrumentRegistry,
        source: &'a dyn HistorianSource,
        store: &'a dyn BlobStore,
        compressor: &'a dyn Compressor,
    ) -> Self {
        Self {
            config,
            registry,
            source,
            store,
            compressor,
        }
    }

    /// Execute one run for `today`.
    pub fn run(&self, today: NaiveDate) -> Result<RunReport, RunError> {
        let cfg = self.config;
        let plan = WindowPlan::build(&cfg.schedule, today)?;
        info!(
            anchor = %plan.anchor(),
            windows = plan.count(),
            daylight_saving = plan.daylight_saving_applied(),
            "run planned"
        );

        let staging_dir = &cfg.output.staging_dir;
        fs::create_dir_all(staging_dir).map_err(|source| RunError::Io {
            path: staging_dir.clone(),
            source,
        })?;

        let summary_path = cfg.output.summary_log_path();
        let summary_key = cfg.storage.summary_log_key.as_str();
        if self.store.download(summary_key, &summary_path)? {
            info!(key = summary_key, store = %self.store.describe(), "summary log downloaded");
        } else {
            warn!(key = summary_key, store = %self.store.describe(), "no summary log in storage; starting a new one");
        }

        let Some(instruments) = self.registry.load()? else {
            info!("no instrument archive found; nothing to collect");
            return Ok(RunReport::empty(RunStatus::RegistryNotFound, &plan));
        };

        let summary = SummaryLog::new(&summary_path);
        let ids = instruments.ids();
        let subset_size = cfg.query.subset_size;
        let mut report = RunReport::empty(RunStatus::Completed, &plan);
        report.instruments = ids.len();
        report.subsets = subset_count(ids.len(), subset_size);

        summary.milestone(&Milestone::InstrumentsLoaded { count: ids.len() })?;
        summary.milestone(&Milestone::CallsPlanned {
            subsets: report.subsets,
            windows: report.windows_per_subset,
        })?;

        let mut attempt_log = AttemptLog::create(cfg.output.attempt_log_path())?;
        let mut staging = StagingFile::create(staging_dir.join(plan.output_file_name()))?;
        let client = RetryingClient::new(self.source, cfg.query.retry_policy(), cfg.query.envelope);
        let windows: Vec<TimeWindow> = plan.windows().collect();

        summary.milestone(&Milestone::CallsStarted)?;
        for subset in partition(&ids, subset_size) {
            for window in &windows {
                let outcome = client.query(&subset, window, &mut attempt_log);
                report.attempts += outcome.attempts() as usize;
                match outcome {
                    Outcome::Success { payload, .. } => {
                        staging.append(&payload)?;
                        report.succeeded += 1;
                    }
                    Outcome::NoData { .. } => {
                        report.no_data += 1;
                        summary.no_data(&subset, window)?;
                    }
                    Outcome::Exhausted {
                        attempts,
                        last_error,
                    } => {
                        report.exhausted += 1;
                        summary.data_not_produced(&subset, window, attempts, &last_error)?;
                    }
                }
            }
            info!(subset = %subset, "subset done");
        }

        report.fragments = staging.fragments();
        summary.milestone(&Milestone::OutputGenerated {
            fragments: report.fragments,
        })?;

        let handoff = ArchivalHandoff::new(self.compressor, self.store, &cfg.compression.extension)
            .run(staging.path(), &summary)?;
        summary.separator()?;
        report.handoff = Some(handoff);

        self.store.upload(&summary_path, summary_key)?;
        if let Err(e) = fs::remove_file(&summary_path) {
            warn!(path = %summary_path.display(), error = %e, "cannot remove local summary log");
        }

        info!(
            attempts = report.attempts,
            succeeded = report.succeeded,
            no_data = report.no_data,
            exhausted = report.exhausted,
            "run finished"
        );
        Ok(report)
    }
}
