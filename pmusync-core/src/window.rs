//! Time window planner.
//!
//! Derives the run's anchor timestamp from the repetition mode and the configured
//! time of day, applies the regional daylight-saving correction once, and tiles
//! `[anchor, anchor + horizon)` with contiguous windows of `window_hours` each.
//!
//! All windows of a run share one output file named after the anchor date, no
//! matter how many calendar days the horizon spans.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::calendar::{CalendarDate, DaylightSaving, TimeOfDay};
use crate::domain::TimeWindow;

#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    #[error("window_hours must be greater than zero")]
    ZeroWindow,

    #[error("horizon of {horizon_hours}h is not a multiple of the {window_hours}h window")]
    HorizonNotMultiple { horizon_hours: u32, window_hours: u32 },

    #[error("{field} of {hours}h exceeds the {max}h limit", max = MAX_PLAN_HOURS)]
    TooLong { field: &'static str, hours: u32 },
}

/// Upper bound for `horizon_hours` and `window_hours`: one leap year.
pub const MAX_PLAN_HOURS: u32 = 366 * 24;

/// When a run collects data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Repetition {
    /// Yesterday at the configured time of day.
    Daily,
    /// An explicit date at the configured time of day.
    Once(CalendarDate),
}

/// What to do when the horizon is not an exact multiple of the window length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemainderPolicy {
    /// Integer division; the remainder is not collected.
    #[default]
    Truncate,
    /// Refuse to plan.
    Reject,
    /// Add one more window, which runs past the horizon.
    Extend,
}

/// `[schedule]` section of the collector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub time: TimeOfDay,
    #[serde(default = "default_repetition")]
    pub repetition: Repetition,
    #[serde(default)]
    pub daylight_saving: Option<DaylightSaving>,
    #[serde(default = "default_horizon_hours")]
    pub horizon_hours: u32,
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,
    #[serde(default)]
    pub remainder: RemainderPolicy,
}

fn default_repetition() -> Repetition {
    Repetition::Daily
}

fn default_horizon_hours() -> u32 {
    24
}

fn default_window_hours() -> u32 {
    4
}

/// The planned sequence of windows for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowPlan {
    anchor: NaiveDateTime,
    window_hours: u32,
    count: usize,
    daylight_saving_applied: bool,
}

impl WindowPlan {
    /// Plan the run for `today`.
    pub fn build(schedule: &ScheduleConfig, today: NaiveDate) -> Result<Self, PlanError> {
        let count = window_count(
            schedule.horizon_hours,
            schedule.window_hours,
            schedule.remainder,
        )?;
        let daylight_saving_applied = schedule
            .daylight_saving
            .map_or(false, |dst| dst.contains(today));
        let anchor = anchor_start(
            schedule.repetition,
            schedule.time,
            daylight_saving_applied,
            today,
        );

        Ok(Self {
            anchor,
            window_hours: schedule.window_hours,
            count,
            daylight_saving_applied,
        })
    }

    pub fn anchor(&self) -> NaiveDateTime {
        self.anchor
    }

    pub fn anchor_date(&self) -> NaiveDate {
        self.anchor.date()
    }

    /// Number of windows per subset.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn window_length(&self) -> Duration {
        Duration::hours(i64::from(self.window_hours))
    }

    pub fn daylight_saving_applied(&self) -> bool {
        self.daylight_saving_applied
    }

    /// Windows in chronological order, each starting where the previous one ended.
    ///
    /// Stops early rather than overflow at the end of the representable calendar.
    pub fn windows(&self) -> impl Iterator<Item = TimeWindow> + '_ {
        let length = self.window_length();
        std::iter::successors(Some(self.anchor), move |start| start.checked_add_signed(length))
            .take(self.count)
            .map_while(move |start| {
                let end = start
                    .checked_add_signed(length)?
                    .checked_sub_signed(Duration::milliseconds(1))?;
                Some(TimeWindow { start, end })
            })
    }

    /// Local staging file name: `yyyyMMdd.json` of the anchor date.
    pub fn output_file_name(&self) -> String {
        format!("{}.json", self.anchor.format("%Y%m%d"))
    }
}

/// Anchor timestamp of a run.
///
/// The daylight-saving correction moves the anchor one hour back, so a configured
/// `00:xx` lands on 23:xx of the previous day.
pub fn anchor_start(
    repetition: Repetition,
    time: TimeOfDay,
    daylight_saving: bool,
    today: NaiveDate,
) -> NaiveDateTime {
    let date = match repetition {
        Repetition::Daily => today.pred_opt().unwrap_or(today),
        Repetition::Once(date) => date.0,
    };
    let start = date.and_time(time.as_naive_time());
    if daylight_saving {
        start.checked_sub_signed(Duration::hours(1)).unwrap_or(start)
    } else {
        start
    }
}

/// Number of windows covering `horizon_hours` under the given remainder policy.
pub fn window_count(
    horizon_hours: u32,
    window_hours: u32,
    policy: RemainderPolicy,
) -> Result<usize, PlanError> {
    if window_hours == 0 {
        return Err(PlanError::ZeroWindow);
    }
    for (field, hours) in [("window_hours", window_hours), ("horizon_hours", horizon_hours)] {
        if hours > MAX_PLAN_HOURS {
            return Err(PlanError::TooLong { field, hours });
        }
    }
    let whole = (horizon_hours / window_hours) as usize;
    let remainder = horizon_hours % window_hours;
    if remainder == 0 {
        return Ok(whole);
    }
    match policy {
        RemainderPolicy::Truncate => {
            warn!(
                horizon_hours,
                window_hours,
                dropped_hours = remainder,
                "horizon is not a multiple of the window; trailing hours are not collected"
            );
            Ok(whole)
        }
        RemainderPolicy::Reject => Err(PlanError::HorizonNotMultiple {
            horizon_hours,
            window_hours,
        }),
        RemainderPolicy::Extend => Ok(whole + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn schedule(time: &str) -> ScheduleConfig {
        ScheduleConfig {
            time: time.parse().unwrap(),
            repetition: Repetition::Daily,
            daylight_saving: None,
            horizon_hours: 24,
            window_hours: 4,
            remainder: RemainderPolicy::Truncate,
        }
    }

    #[test]
    fn daily_anchors_on_yesterday() {
        let plan = WindowPlan::build(&schedule("02:30"), date(2015, 1, 19)).unwrap();
        assert_eq!(
            plan.anchor(),
            date(2015, 1, 18).and_hms_opt(2, 30, 0).unwrap()
        );
        assert_eq!(plan.output_file_name(), "20150118.json");
        assert!(!plan.daylight_saving_applied());
    }

    #[test]
    fn once_anchors_on_explicit_date() {
        let mut s = schedule("03:00:15");
        s.repetition = Repetition::Once(date(2015, 1, 19).into());
        let plan = WindowPlan::build(&s, date(2020, 6, 1)).unwrap();
        assert_eq!(
            plan.anchor(),
            date(2015, 1, 19).and_hms_opt(3, 0, 15).unwrap()
        );
    }

    #[test]
    fn six_contiguous_windows_for_a_day() {
        let plan = WindowPlan::build(&schedule("02:30"), date(2015, 1, 19)).unwrap();
        let windows: Vec<TimeWindow> = plan.windows().collect();
        assert_eq!(windows.len(), 6);
        assert_eq!(
            windows[0].end,
            date(2015, 1, 18).and_hms_milli_opt(6, 29, 59, 999).unwrap()
        );
        assert_eq!(
            windows[5].start,
            date(2015, 1, 18).and_hms_opt(22, 30, 0).unwrap()
        );
        assert_eq!(
            windows[5].end,
            date(2015, 1, 19).and_hms_milli_opt(2, 29, 59, 999).unwrap()
        );
        // One file even though the windows cross midnight.
        assert_eq!(plan.output_file_name(), "20150118.json");
    }

    #[test]
    fn daylight_saving_moves_anchor_back_one_hour() {
        let mut s = schedule("03:00");
        s.daylight_saving = Some(DaylightSaving {
            start: "18/10/2015".parse().unwrap(),
            end: "21/02/2016".parse().unwrap(),
        });

        let inside = WindowPlan::build(&s, date(2015, 12, 1)).unwrap();
        assert!(inside.daylight_saving_applied());
        assert_eq!(inside.anchor(), date(2015, 11, 30).and_hms_opt(2, 0, 0).unwrap());

        let outside = WindowPlan::build(&s, date(2016, 3, 1)).unwrap();
        assert!(!outside.daylight_saving_applied());
        assert_eq!(outside.anchor(), date(2016, 2, 29).and_hms_opt(3, 0, 0).unwrap());
    }

    #[test]
    fn daylight_saving_at_midnight_rolls_to_previous_day() {
        let anchor = anchor_start(
            Repetition::Once(date(2015, 12, 1).into()),
            "00:15".parse().unwrap(),
            true,
            date(2015, 12, 2),
        );
        assert_eq!(anchor, date(2015, 11, 30).and_hms_opt(23, 15, 0).unwrap());
    }

    #[test]
    fn remainder_policies() {
        assert_eq!(window_count(24, 5, RemainderPolicy::Truncate), Ok(4));
        assert_eq!(window_count(24, 5, RemainderPolicy::Extend), Ok(5));
        assert_eq!(
            window_count(24, 5, RemainderPolicy::Reject),
            Err(PlanError::HorizonNotMultiple {
                horizon_hours: 24,
                window_hours: 5
            })
        );
        assert_eq!(window_count(24, 4, RemainderPolicy::Reject), Ok(6));
        assert_eq!(window_count(3, 4, RemainderPolicy::Truncate), Ok(0));
        assert_eq!(window_count(24, 0, RemainderPolicy::Truncate), Err(PlanError::ZeroWindow));
    }

    #[test]
    fn oversized_horizon_or_window_is_refused() {
        assert_eq!(
            window_count(4_000_000_000, 4_000_000_000, RemainderPolicy::Truncate),
            Err(PlanError::TooLong {
                field: "window_hours",
                hours: 4_000_000_000
            })
        );
        assert_eq!(
            window_count(MAX_PLAN_HOURS + 1, 4, RemainderPolicy::Truncate),
            Err(PlanError::TooLong {
                field: "horizon_hours",
                hours: MAX_PLAN_HOURS + 1
            })
        );
        assert_eq!(
            window_count(MAX_PLAN_HOURS, MAX_PLAN_HOURS, RemainderPolicy::Reject),
            Ok(1)
        );
    }

    #[test]
    fn windows_stop_at_the_end_of_the_calendar() {
        let mut s = schedule("02:30");
        s.repetition = Repetition::Once(NaiveDate::MAX.into());
        let plan = WindowPlan::build(&s, date(2015, 1, 19)).unwrap();

        let windows: Vec<TimeWindow> = plan.windows().collect();

        assert!(windows.len() < plan.count());
        for w in &windows {
            assert!(w.end > w.start);
        }
    }
}
