//! Domain types: instruments, the ordered instrument set, and time windows.

use std::collections::HashSet;
use std::fmt;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Historian point number of a monitored measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentId(pub i32);

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A monitored measurement point. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: InstrumentId,
    pub display_name: String,
}

impl Instrument {
    pub fn new(id: i32, display_name: impl Into<String>) -> Self {
        Self {
            id: InstrumentId(id),
            display_name: display_name.into(),
        }
    }
}

/// Instruments in registry scan order, unique by id.
#[derive(Debug, Clone, Default)]
pub struct InstrumentSet {
    instruments: Vec<Instrument>,
    seen: HashSet<InstrumentId>,
}

impl InstrumentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an instrument, keeping the first occurrence of a duplicate id.
    ///
    /// Returns `false` when the id was already present.
    pub fn insert(&mut self, instrument: Instrument) -> bool {
        if !self.seen.insert(instrument.id) {
            return false;
        }
        self.instruments.push(instrument);
        true
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instrument> {
        self.instruments.iter()
    }

    /// Ids in insertion order.
    pub fn ids(&self) -> Vec<InstrumentId> {
        self.instruments.iter().map(|i| i.id).collect()
    }

    pub fn contains(&self, id: InstrumentId) -> bool {
        self.seen.contains(&id)
    }
}

impl FromIterator<Instrument> for InstrumentSet {
    fn from_iter<T: IntoIterator<Item = Instrument>>(iter: T) -> Self {
        let mut set = InstrumentSet::new();
        for instrument in iter {
            set.insert(instrument);
        }
        set
    }
}

/// A bounded interval of historical samples: `[start, end]` with millisecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeWindow {
    /// Window starting at `start` spanning `length`; the end is inclusive, one millisecond
    /// before the next window's start.
    pub fn starting_at(start: NaiveDateTime, length: Duration) -> Self {
        Self {
            start,
            end: start + length - Duration::milliseconds(1),
        }
    }

    /// `end - start`, i.e. the window length minus one millisecond.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.end.format("%Y-%m-%d %H:%M:%S%.3f")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn duplicate_ids_keep_first_occurrence() {
        let set: InstrumentSet = vec![
            Instrument::new(7, "PMU-A"),
            Instrument::new(3, "PMU-B"),
            Instrument::new(7, "PMU-C"),
        ]
        .into_iter()
        .collect();

        assert_eq!(set.len(), 2);
        assert_eq!(set.ids(), vec![InstrumentId(7), InstrumentId(3)]);
        assert_eq!(set.iter().next().unwrap().display_name, "PMU-A");
    }

    #[test]
    fn window_end_is_one_millisecond_before_next_start() {
        let start = NaiveDate::from_ymd_opt(2015, 1, 18)
            .unwrap()
            .and_hms_opt(2, 30, 0)
            .unwrap();
        let w = TimeWindow::starting_at(start, Duration::hours(4));
        assert_eq!(w.end + Duration::milliseconds(1), start + Duration::hours(4));
        assert_eq!(w.duration(), Duration::hours(4) - Duration::milliseconds(1));
        assert_eq!(
            w.to_string(),
            "2015-01-18 02:30:00.000..2015-01-18 06:29:59.999"
        );
    }
}
