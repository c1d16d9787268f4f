use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DashboardError, Result};
use crate::models::FactRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuickRange {
    Yesterday,
    Last7Days,
    Last30Days,
}

impl QuickRange {
    pub fn label(self) -> &'static str {
        match self {
            QuickRange::Yesterday => "Yesterday",
            QuickRange::Last7Days => "Last 7 Days",
            QuickRange::Last30Days => "Last 30 Days",
        }
    }
}

/// Explicit bounds typed by the user; either side may be left open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn is_empty(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }
}

/// Inclusive day interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl TimeWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.from && date <= self.to
    }

    /// An inverted window holds no dates.
    pub fn is_empty(&self) -> bool {
        self.from > self.to
    }

    pub fn length_days(&self) -> i64 {
        ((self.to - self.from).num_days() + 1).max(1)
    }

    /// The period of equal length that ends the day before this one starts.
    pub fn previous(&self) -> Result<TimeWindow> {
        let to = shift(self.from, -1)?;
        let from = shift(to, -(self.length_days() - 1))?;
        Ok(TimeWindow { from, to })
    }

    /// `count` consecutive days ending at `to`, oldest first.
    pub fn trailing_days(&self, count: i64) -> Result<Vec<NaiveDate>> {
        (0..count)
            .rev()
            .map(|offset| shift(self.to, -offset))
            .collect()
    }
}

/// Latest fact date, or today when there are no facts.
pub fn anchor_date(facts: &[FactRecord]) -> NaiveDate {
    facts
        .iter()
        .map(|fact| fact.date)
        .max()
        .unwrap_or_else(|| Utc::now().date_naive())
}

/// Window for a quick range and explicit bounds. Explicit bounds win on
/// their side; bounds that cross yield an empty window.
pub fn resolve(quick: Option<QuickRange>, range: DateRange, anchor: NaiveDate) -> Result<TimeWindow> {
    let (mut from, mut to) = match quick {
        Some(QuickRange::Yesterday) => {
            let day = shift(anchor, -1)?;
            (day, day)
        }
        Some(QuickRange::Last30Days) => (shift(anchor, -29)?, anchor),
        Some(QuickRange::Last7Days) | None => (shift(anchor, -6)?, anchor),
    };
    if let Some(explicit) = range.from {
        from = explicit;
    }
    if let Some(explicit) = range.to {
        to = explicit;
    }
    Ok(TimeWindow { from, to })
}

fn shift(date: NaiveDate, days: i64) -> Result<NaiveDate> {
    date.checked_add_signed(Duration::days(days))
        .ok_or(DashboardError::DateOutOfRange)
}
