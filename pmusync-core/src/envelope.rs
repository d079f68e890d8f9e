//! Envelope stripping for historian responses.
//!
//! The historian answers `{"TimeSeriesDataPoints":[{...},{...}]}`. The staging file
//! holds one data point object per line, so the envelope is removed and the
//! element separators become newlines.
//!
//! [`EnvelopeMode::Text`] is a plain text substitution. It never fails: a body with
//! a different shape passes through partially rewritten, and a `]}` or `},{`
//! inside a data point is rewritten too. [`EnvelopeMode::Structural`] parses the
//! envelope and re-emits each element's exact source text, which matches the
//! text transform byte for byte on compact well-formed input.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

pub const ENVELOPE_OPEN: &str = "{\"TimeSeriesDataPoints\":[";
pub const ENVELOPE_CLOSE: &str = "]}";
const ELEMENT_SEPARATOR: &str = "},{";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeMode {
    #[default]
    Text,
    Structural,
}

#[derive(Deserialize)]
struct Envelope<'a> {
    #[serde(rename = "TimeSeriesDataPoints", borrow)]
    points: Vec<&'a RawValue>,
}

impl EnvelopeMode {
    /// Convert a response body to newline-separated data points.
    pub fn strip(self, body: &str) -> Result<String, serde_json::Error> {
        match self {
            EnvelopeMode::Text => Ok(strip_text(body)),
            EnvelopeMode::Structural => strip_structural(body),
        }
    }
}

pub fn strip_text(body: &str) -> String {
    body.replace(ENVELOPE_OPEN, "")
        .replace(ENVELOPE_CLOSE, "")
        .replace(ELEMENT_SEPARATOR, "}\n{")
}

pub fn strip_structural(body: &str) -> Result<String, serde_json::Error> {
    if body.trim().is_empty() {
        return Ok(String::new());
    }
    let envelope: Envelope<'_> = serde_json::from_str(body)?;
    Ok(envelope
        .points
        .iter()
        .map(|p| p.get())
        .collect::<Vec<_>>()
        .join("\n"))
}
