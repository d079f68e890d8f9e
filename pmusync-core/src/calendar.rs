//! Calendar primitives read from configuration: time of day, dates, and the
//! regional daylight-saving interval.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CalendarError {
    #[error("invalid time of day '{0}' (expected H, HH:mm or HH:mm:ss)")]
    InvalidTime(String),

    #[error("invalid date '{0}' (expected dd/MM/yyyy or yyyy-MM-dd)")]
    InvalidDate(String),
}

/// Configured start time of a run, e.g. `02:30` or `3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32, second: u32) -> Result<Self, CalendarError> {
        if hour > 23 || minute > 59 || second > 59 {
            return Err(CalendarError::InvalidTime(format!(
                "{hour:02}:{minute:02}:{second:02}"
            )));
        }
        Ok(Self {
            hour,
            minute,
            second,
        })
    }

    pub fn as_naive_time(&self) -> NaiveTime {
        // Components are range-checked on construction.
        NaiveTime::from_hms_opt(self.hour, self.minute, self.second).unwrap_or(NaiveTime::MIN)
    }
}

impl FromStr for TimeOfDay {
    type Err = CalendarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CalendarError::InvalidTime(s.to_string());
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.is_empty() || parts.len() > 3 {
            return Err(invalid());
        }
        let mut fields = [0u32; 3];
        for (slot, part) in fields.iter_mut().zip(&parts) {
            if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            *slot = part.parse().map_err(|_| invalid())?;
        }
        TimeOfDay::new(fields[0], fields[1], fields[2]).map_err(|_| invalid())
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = CalendarError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

/// A date accepted in either the regional `dd/MM/yyyy` form or ISO `yyyy-MM-dd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CalendarDate(pub NaiveDate);

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"];

impl FromStr for CalendarDate {
    type Err = CalendarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
            .map(CalendarDate)
            .ok_or_else(|| CalendarError::InvalidDate(s.to_string()))
    }
}

impl TryFrom<String> for CalendarDate {
    type Error = CalendarError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CalendarDate> for String {
    fn from(d: CalendarDate) -> Self {
        d.0.format("%Y-%m-%d").to_string()
    }
}

impl From<NaiveDate> for CalendarDate {
    fn from(d: NaiveDate) -> Self {
        CalendarDate(d)
    }
}

/// Inclusive date interval during which the regional clock runs one hour ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaylightSaving {
    pub start: CalendarDate,
    pub end: CalendarDate,
}

impl DaylightSaving {
    pub fn contains(&self, day: NaiveDate) -> bool {
        day >= self.start.0 && day <= self.end.0
    }
}
