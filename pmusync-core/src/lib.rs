//! pmusync core: domain types and the collection scheduling logic.
//!
//! - Domain types (instruments, instrument set, time windows)
//! - Calendar parsing (time of day, regional dates, daylight-saving interval)
//! - Time window planner with the daylight-saving correction
//! - Subset partitioner
//! - Historian response envelope stripping
//! - Retrying historian client (trait seam + blocking HTTP implementation)
//! - TOML configuration model

pub mod calendar;
pub mod config;
pub mod domain;
pub mod envelope;
pub mod partition;
pub mod query;
pub mod window;

pub use calendar::{CalendarDate, CalendarError, DaylightSaving, TimeOfDay};
pub use config::{CollectorConfig, ConfigError};
pub use domain::{Instrument, InstrumentId, InstrumentSet, TimeWindow};
pub use envelope::EnvelopeMode;
pub use partition::{partition, subset_count, Subset, Subsets};
pub use query::{
    AttemptObserver, AttemptOutcome, HistorianSource, HttpHistorian, NoopObserver, Outcome,
    QueryAttempt, QueryError, RetryPolicy, RetryingClient,
};
pub use window::{PlanError, RemainderPolicy, Repetition, ScheduleConfig, WindowPlan};
