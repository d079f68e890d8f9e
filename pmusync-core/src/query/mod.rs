//! Retrying historian query client.
//!
//! One request per (subset, window). Every failed attempt (network error, timeout,
//! non-2xx status, unparseable body) counts against the attempt limit; after the
//! last one the pair ends as [`Outcome::Exhausted`]. A successful but empty
//! payload ends as [`Outcome::NoData`] and is not retried.
//!
//! Failures are returned as values. Nothing in this module aborts a run.

pub mod http;

use std::num::NonZeroU32;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::TimeWindow;
use crate::envelope::EnvelopeMode;
use crate::partition::Subset;

pub use http::HttpHistorian;

/// Failure of a single attempt.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response body: {0}")]
    Malformed(String),

    #[error("invalid request URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP client error: {0}")]
    Client(String),
}

/// Source of historical samples (the remote historian).
///
/// Implementations perform exactly one request per call and return the raw body.
pub trait HistorianSource {
    /// Read samples of the comma-joined `ids` over `window`.
    fn read(&self, ids: &str, window: &TimeWindow) -> Result<String, QueryError>;
}

impl<T: HistorianSource + ?Sized> HistorianSource for &T {
    fn read(&self, ids: &str, window: &TimeWindow) -> Result<String, QueryError> {
        (**self).read(ids, window)
    }
}

impl<T: HistorianSource + ?Sized> HistorianSource for Box<T> {
    fn read(&self, ids: &str, window: &TimeWindow) -> Result<String, QueryError> {
        (**self).read(ids, window)
    }
}

/// Result of one attempt, as reported to an [`AttemptObserver`].
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Succeeded { bytes: usize },
    Empty,
    Transient(QueryError),
    Exhausted(QueryError),
}

/// One request against the historian.
#[derive(Debug, Clone)]
pub struct QueryAttempt<'a> {
    pub subset: &'a Subset<'a>,
    pub window: &'a TimeWindow,
    pub number: u32,
    pub limit: u32,
    pub outcome: AttemptOutcome,
}

/// Receives every attempt, e.g. to write the attempt log.
pub trait AttemptObserver {
    fn on_attempt(&mut self, attempt: &QueryAttempt<'_>);
}

/// Observer that discards attempts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl AttemptObserver for NoopObserver {
    fn on_attempt(&mut self, _attempt: &QueryAttempt<'_>) {}
}

/// Terminal outcome of a (subset, window) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success { payload: String, attempts: u32 },
    NoData { attempts: u32 },
    Exhausted { attempts: u32, last_error: QueryError },
}

impl Outcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Outcome::Success { attempts, .. }
            | Outcome::NoData { attempts }
            | Outcome::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Attempt limit and inter-attempt delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempt_limit: NonZeroU32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_limit: NonZeroU32::MIN.saturating_add(2),
            delay: Duration::ZERO,
        }
    }
}

/// Drives a [`HistorianSource`] through the retry loop.
pub struct RetryingClient<S> {
    source: S,
    policy: RetryPolicy,
    envelope: EnvelopeMode,
}

impl<S: HistorianSource> RetryingClient<S> {
    pub fn new(source: S, policy: RetryPolicy, envelope: EnvelopeMode) -> Self {
        Self {
            source,
            policy,
            envelope,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Query one (subset, window) pair until it succeeds or the attempt limit is reached.
    pub fn query(
        &self,
        subset: &Subset<'_>,
        window: &TimeWindow,
        observer: &mut dyn AttemptObserver,
    ) -> Outcome {
        let ids = subset.query_param();
        let limit = self.policy.attempt_limit.get();
        let mut number = 1;

        loop {
            debug!(subset = %ids, window = %window, attempt = number, "querying historian");
            let result = self
                .source
                .read(&ids, window)
                .and_then(|body| {
                    self.envelope
                        .strip(&body)
                        .map_err(|e| QueryError::Malformed(e.to_string()))
                });

            match result {
                Ok(payload) if payload.trim().is_empty() => {
                    report(observer, subset, window, number, limit, AttemptOutcome::Empty);
                    return Outcome::NoData { attempts: number };
                }
                Ok(payload) => {
                    report(
                        observer,
                        subset,
                        window,
                        number,
                        limit,
                        AttemptOutcome::Succeeded {
                            bytes: payload.len(),
                        },
                    );
                    return Outcome::Success {
                        payload,
                        attempts: number,
                    };
                }
                Err(err) if number >= limit => {
                    warn!(subset = %ids, window = %window, attempts = number, error = %err, "attempt limit reached");
                    report(
                        observer,
                        subset,
                        window,
                        number,
                        limit,
                        AttemptOutcome::Exhausted(err.clone()),
                    );
                    return Outcome::Exhausted {
                        attempts: number,
                        last_error: err,
                    };
                }
                Err(err) => {
                    debug!(subset = %ids, attempt = number, error = %err, "attempt failed, retrying");
                    report(
                        observer,
                        subset,
                        window,
                        number,
                        limit,
                        AttemptOutcome::Transient(err),
                    );
                    if !self.policy.delay.is_zero() {
                        std::thread::sleep(self.policy.delay);
                    }
                    number += 1;
                }
            }
        }
    }
}

fn report(
    observer: &mut dyn AttemptObserver,
    subset: &Subset<'_>,
    window: &TimeWindow,
    number: u32,
    limit: u32,
    outcome: AttemptOutcome,
) {
    observer.on_attempt(&QueryAttempt {
        subset,
        window,
        number,
        limit,
        outcome,
    });
}
