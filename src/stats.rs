// Read-only derivations over the per-day session history

use crate::models::{DateKey, DayCount, DayOutcomes, OutcomeTag};
use chrono::{Datelike, Days};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Completed sessions and outcome tags keyed by local calendar day
///
/// The two maps are filled independently and may disagree in count. A day
/// that was never recorded reads as zero everywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsHistory {
    pub counts: BTreeMap<DateKey, u32>,
    pub outcomes: BTreeMap<DateKey, Vec<OutcomeTag>>,
}

/// Productive/interrupted tags on one day
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeTally {
    pub productive: u32,
    pub interrupted: u32,
}

impl StatsHistory {
    pub fn from_records(counts: Vec<DayCount>, outcomes: Vec<DayOutcomes>) -> Self {
        Self {
            counts: counts.into_iter().map(|day| (day.date, day.count)).collect(),
            outcomes: outcomes.into_iter().map(|day| (day.date, day.tags)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty() && self.outcomes.is_empty()
    }

    /// Sum the counts of every day the predicate accepts
    pub fn sum_range<P>(&self, predicate: P) -> u32
    where
        P: Fn(DateKey) -> bool,
    {
        self.counts
            .iter()
            .filter(|(date, _)| predicate(**date))
            .map(|(_, count)| *count)
            .sum()
    }

    pub fn daily_total(&self, date: DateKey) -> u32 {
        self.counts.get(&date).copied().unwrap_or(0)
    }

    /// The Sunday that opens the week containing `date`
    pub fn week_start(date: DateKey) -> DateKey {
        let offset = u64::from(date.date().weekday().num_days_from_sunday());
        date.date()
            .checked_sub_days(Days::new(offset))
            .map(DateKey::from)
            .unwrap_or(date)
    }

    /// Total of the seven days starting at `week_start`
    pub fn weekly_total(&self, week_start: DateKey) -> u32 {
        self.days_from(week_start, 7)
    }

    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    /// Total of the `days` calendar days ending with `today`
    pub fn trailing_total(&self, today: DateKey, days: u32) -> u32 {
        if days == 0 {
            return 0;
        }
        let first = today
            .date()
            .checked_sub_days(Days::new(u64::from(days - 1)))
            .map(DateKey::from)
            .unwrap_or(today);
        self.counts.range(first..=today).map(|(_, count)| *count).sum()
    }

    fn days_from(&self, first: DateKey, days: u64) -> u32 {
        match first.date().checked_add_days(Days::new(days - 1)) {
            Some(last) => self.counts.range(first..=DateKey::from(last)).map(|(_, count)| *count).sum(),
            None => self.counts.range(first..).map(|(_, count)| *count).sum(),
        }
    }

    /// Years that have at least one recorded day, ascending
    pub fn years(&self) -> Vec<i32> {
        let mut years: Vec<i32> = self.counts.keys().map(|date| date.year()).collect();
        years.dedup();
        years
    }

    /// Recorded days of one year in date order
    pub fn year_series(&self, year: i32) -> Vec<(DateKey, u32)> {
        self.counts
            .iter()
            .filter(|(date, _)| date.year() == year)
            .map(|(date, count)| (*date, *count))
            .collect()
    }

    pub fn outcome_tally(&self, date: DateKey) -> OutcomeTally {
        let mut tally = OutcomeTally::default();
        for tag in self.outcomes.get(&date).map(Vec::as_slice).unwrap_or_default() {
            match tag {
                OutcomeTag::Productive => tally.productive += 1,
                OutcomeTag::Interrupted => tally.interrupted += 1,
            }
        }
        tally
    }

    /// `date,cycles` rows sorted by date
    pub fn to_csv(&self) -> String {
        let mut csv = String::from("date,cycles\n");
        for (date, count) in &self.counts {
            let _ = writeln!(csv, "{},{}", date, count);
        }
        csv
    }
}
