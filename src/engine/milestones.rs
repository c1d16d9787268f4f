use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::metrics::pct_num;
use crate::models::FactRecord;

pub const LEVELS: usize = 10;

/// A student's milestone at the first and last observation of a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MilestoneSnapshot {
    pub start: i64,
    pub current: i64,
}

impl MilestoneSnapshot {
    pub fn improvement(&self) -> i64 {
        self.current - self.start
    }
}

struct Span {
    first: NaiveDate,
    last: NaiveDate,
    snapshot: MilestoneSnapshot,
}

/// First-seen start and last-seen current milestone per (student, subject).
///
/// On a date tie the earliest row read keeps the start and the latest row
/// read supplies the current value. Unlike the summed delta this ignores
/// whatever happened between the two observations.
pub fn snapshot_milestone_delta<'d, I>(facts: I) -> BTreeMap<(&'d str, &'d str), MilestoneSnapshot>
where
    I: IntoIterator<Item = &'d FactRecord>,
{
    let mut spans: BTreeMap<(&'d str, &'d str), Span> = BTreeMap::new();
    for fact in facts {
        let key = (fact.student_id.as_str(), fact.subject.label());
        match spans.get_mut(&key) {
            Some(span) => {
                if fact.date < span.first {
                    span.first = fact.date;
                    span.snapshot.start = fact.start_milestone;
                }
                if fact.date >= span.last {
                    span.last = fact.date;
                    span.snapshot.current = fact.current_milestone;
                }
            }
            None => {
                spans.insert(
                    key,
                    Span {
                        first: fact.date,
                        last: fact.date,
                        snapshot: MilestoneSnapshot {
                            start: fact.start_milestone,
                            current: fact.current_milestone,
                        },
                    },
                );
            }
        }
    }
    spans
        .into_iter()
        .map(|(key, span)| (key, span.snapshot))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MilestoneDistribution {
    pub subject: String,
    /// Students per starting level, 0..=9 with outliers clamped.
    pub initial: [usize; LEVELS],
    pub current: [usize; LEVELS],
    pub progressed: usize,
    pub students: usize,
}

impl MilestoneDistribution {
    pub fn progressed_pct(&self) -> i64 {
        pct_num(self.progressed as f64, self.students as f64)
    }
}

fn bucket(level: i64) -> usize {
    level.clamp(0, LEVELS as i64 - 1) as usize
}

/// One histogram pair per subject over already filtered facts.
pub fn distributions<'d, I>(subjects: &[String], facts: I) -> Vec<MilestoneDistribution>
where
    I: IntoIterator<Item = &'d FactRecord>,
{
    let snapshots = snapshot_milestone_delta(facts);
    subjects
        .iter()
        .map(|subject| {
            let mut dist = MilestoneDistribution {
                subject: subject.clone(),
                initial: [0; LEVELS],
                current: [0; LEVELS],
                progressed: 0,
                students: 0,
            };
            for snapshot in snapshots
                .iter()
                .filter(|((_, subj), _)| *subj == subject.as_str())
                .map(|(_, snapshot)| snapshot)
            {
                dist.initial[bucket(snapshot.start)] += 1;
                dist.current[bucket(snapshot.current)] += 1;
                dist.students += 1;
                if snapshot.improvement() > 0 {
                    dist.progressed += 1;
                }
            }
            dist
        })
        .collect()
}
