use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Serialize;

use super::activity::EntityKind;
use crate::error::Result;
use crate::metrics::{format_decimal, per_active, round2, round_half_up, wow, Change};
use crate::models::{FactRecord, RosterRecord};
use crate::window::TimeWindow;

const TREND_DAYS: i64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendCard {
    pub title: &'static str,
    pub value: String,
    pub change: Change,
    pub days: Vec<NaiveDate>,
    pub points: Vec<f64>,
}

impl TrendCard {
    /// Change between the last two points, `+N%` style.
    pub fn change_label(&self) -> String {
        self.change.signed()
    }
}

#[derive(Debug, Default)]
struct Day<'d> {
    sessions: f64,
    minutes: f64,
    diagnostics: f64,
    active: BTreeSet<&'d str>,
    schools: BTreeSet<&'d str>,
    deltas: BTreeMap<&'d str, i64>,
}

impl Day<'_> {
    fn progressed(&self) -> usize {
        self.deltas.values().filter(|d| **d > 0).count()
    }
}

/// Daily series over the last five days of `window`, built from facts that
/// already passed the window predicate.
pub fn compute<'d, I>(window: TimeWindow, rows: I) -> Result<Vec<TrendCard>>
where
    I: IntoIterator<Item = (&'d FactRecord, &'d RosterRecord)>,
{
    let days = window.trailing_days(TREND_DAYS)?;
    let mut by_day: BTreeMap<NaiveDate, Day<'d>> = BTreeMap::new();
    for (fact, record) in rows {
        let day = by_day.entry(fact.date).or_default();
        day.sessions += fact.sessions;
        day.minutes += fact.time_minutes;
        day.diagnostics += fact.diagnostics_completed;
        *day.deltas.entry(record.student_id.as_str()).or_insert(0) += fact.milestone_delta();
        if fact.is_engaged() {
            day.active.insert(record.student_id.as_str());
            if let Some(school) = EntityKind::Schools.key_of(record) {
                day.schools.insert(school);
            }
        }
    }

    let active = series(&days, &by_day, |d| d.active.len() as f64);
    let schools = series(&days, &by_day, |d| d.schools.len() as f64);
    let progressed = series(&days, &by_day, |d| d.progressed() as f64);
    let sessions = series(&days, &by_day, |d| per_active(d.sessions, d.active.len()));
    let minutes = series(&days, &by_day, |d| per_active(d.minutes, d.active.len()));
    let diagnostics = series(&days, &by_day, |d| d.diagnostics);

    let card = |title: &'static str, raw: &[f64], shown: Vec<f64>, value: String| TrendCard {
        title,
        value,
        change: last_change(raw),
        days: days.clone(),
        points: shown,
    };
    let last = |points: &[f64]| points.last().copied().unwrap_or(0.0);

    Ok(vec![
        card("Active Students", &active, active.clone(), format_decimal(last(&active))),
        card("Active Schools", &schools, schools.clone(), format_decimal(last(&schools))),
        card(
            "Students Progressed",
            &progressed,
            progressed.clone(),
            format_decimal(last(&progressed)),
        ),
        card(
            "Sessions per Student",
            &sessions,
            sessions.iter().copied().map(round2).collect(),
            format_decimal(last(&sessions)),
        ),
        card(
            "Avg Time Spent per student (7d)",
            &minutes,
            minutes.iter().copied().map(round_half_up).collect(),
            format!("{} mins", round_half_up(last(&minutes)) as i64),
        ),
        card(
            "Diagnostics Completed",
            &diagnostics,
            diagnostics.clone(),
            format_decimal(last(&diagnostics)),
        ),
    ])
}

fn series<F>(days: &[NaiveDate], by_day: &BTreeMap<NaiveDate, Day<'_>>, f: F) -> Vec<f64>
where
    F: Fn(&Day<'_>) -> f64,
{
    let empty = Day::default();
    days.iter()
        .map(|d| f(by_day.get(d).unwrap_or(&empty)))
        .collect()
}

fn last_change(points: &[f64]) -> Change {
    match points {
        [.., prev, curr] => wow(*curr, *prev),
        _ => wow(0.0, 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterConfig;
    use crate::metrics::Direction;
    use crate::models::Dataset;
    use crate::testing::{day, fact, progress, roster};

    #[test]
    fn five_points_end_at_the_window_end() {
        let dataset = Dataset::new(
            vec![roster("S1", "SC1", "A1", "A", true), roster("S2", "SC2", "A1", "A", false)],
            vec![
                fact("S1", 15, "Math", 2.0, 30.0),
                fact("S1", 16, "Math", 1.0, 10.0),
                fact("S2", 16, "Math", 3.0, 20.0),
                progress("S2", 16, "English", 0, 2),
                fact("S1", 9, "Math", 5.0, 50.0),
            ],
        );
        let window = TimeWindow { from: day(10), to: day(16) };
        let config = FilterConfig::default();
        let cards = compute(window, config.facts_in(window).select(&dataset)).unwrap();
        assert_eq!(cards.len(), 6);

        let active = &cards[0];
        assert_eq!(active.days.first(), Some(&day(12)));
        assert_eq!(active.points, vec![0.0, 0.0, 0.0, 1.0, 2.0]);
        assert_eq!(active.value, "2");
        assert_eq!(active.change_label(), "+100%");

        let schools = &cards[1];
        assert_eq!(schools.points, vec![0.0, 0.0, 0.0, 1.0, 2.0]);

        let progressed = &cards[2];
        assert_eq!(progressed.points.last(), Some(&1.0));

        // Day 16: 5 sessions and 40 minutes over 2 active students.
        let sessions = &cards[3];
        assert_eq!(sessions.value, "2.5");
        assert_eq!(sessions.change.direction, Direction::Up);
        assert_eq!(sessions.change_label(), "+25%");

        let minutes = &cards[4];
        assert_eq!(minutes.value, "20 mins");
        assert_eq!(minutes.points.last(), Some(&20.0));
        assert_eq!(minutes.change_label(), "-33%");
    }

    #[test]
    fn empty_windows_read_flat() {
        let window = TimeWindow { from: day(10), to: day(16) };
        let cards = compute(window, std::iter::empty::<(&FactRecord, &RosterRecord)>()).unwrap();
        for card in cards {
            assert_eq!(card.points, vec![0.0; 5]);
            assert_eq!(card.change_label(), "+0%");
        }
    }
}
