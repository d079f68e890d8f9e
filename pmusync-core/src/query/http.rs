//! Blocking HTTP client for the historian's historic read endpoint.
//!
//! `GET <base>/<ids>/<start>/<end>/json` with timestamps in `dd-MMM-yyyy HH:mm:ss.fff`.

use std::time::Duration;

use chrono::NaiveDateTime;
use url::Url;

use super::{HistorianSource, QueryError};
use crate::domain::TimeWindow;

pub const DEFAULT_BASE_URL: &str = "http://localhost:6152/historian/timeseriesdata/read/historic";

const TIMESTAMP_FORMAT: &str = "%d-%b-%Y %H:%M:%S%.3f";

/// Longest error body kept in a [`QueryError::Status`].
const MAX_ERROR_BODY: usize = 200;

pub struct HttpHistorian {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpHistorian {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, QueryError> {
        Url::parse(base_url).map_err(|e| QueryError::InvalidUrl(format!("{base_url}: {e}")))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pmusync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| QueryError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build the request URL for a subset and window.
    pub fn request_url(&self, ids: &str, window: &TimeWindow) -> Result<Url, QueryError> {
        let raw = format!(
            "{}/{}/{}/{}/json",
            self.base_url,
            ids,
            format_timestamp(window.start),
            format_timestamp(window.end)
        );
        Url::parse(&raw).map_err(|e| QueryError::InvalidUrl(format!("{raw}: {e}")))
    }
}

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

impl HistorianSource for HttpHistorian {
    fn read(&self, ids: &str, window: &TimeWindow) -> Result<String, QueryError> {
        let url = self.request_url(ids, window)?;

        let resp = self.client.get(url).send().map_err(|e| {
            if e.is_timeout() {
                QueryError::Timeout(e.to_string())
            } else {
                QueryError::Network(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let mut body = resp.text().unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(QueryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        resp.text().map_err(|e| {
            if e.is_timeout() {
                QueryError::Timeout(e.to_string())
            } else {
                QueryError::Malformed(e.to_string())
            }
        })
    }
}
