use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::metrics::per_active;
use crate::models::{FactRecord, RosterRecord};

/// The four entity kinds that coverage and KPIs count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum EntityKind {
    Students,
    Schools,
    Mandals,
    Districts,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Students,
        EntityKind::Schools,
        EntityKind::Mandals,
        EntityKind::Districts,
    ];

    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Students => "Students",
            EntityKind::Schools => "Schools",
            EntityKind::Mandals => "Mandals",
            EntityKind::Districts => "Districts",
        }
    }

    /// Identity of the entity a roster record belongs to. Schools are keyed by
    /// id, mandals and districts by name. Blank keys belong to nothing.
    pub fn key_of(self, record: &RosterRecord) -> Option<&str> {
        let key = match self {
            EntityKind::Students => record.student_id.as_str(),
            EntityKind::Schools => record.school_id.as_str(),
            EntityKind::Mandals => record.mandal.as_str(),
            EntityKind::Districts => record.district.as_str(),
        };
        (!key.is_empty()).then_some(key)
    }
}

/// Distinct entities reached by a collection of roster records.
pub fn entity_image<'d, I>(kind: EntityKind, records: I) -> BTreeSet<&'d str>
where
    I: IntoIterator<Item = &'d RosterRecord>,
{
    records
        .into_iter()
        .filter_map(|record| kind.key_of(record))
        .collect()
}

/// One student's accumulated facts over some filtered slice.
#[derive(Debug, Clone, Copy)]
pub struct StudentActivity<'d> {
    pub record: &'d RosterRecord,
    pub sessions: f64,
    pub time_minutes: f64,
    pub diagnostics: f64,
    pub milestone_delta: i64,
    pub engaged: bool,
}

impl<'d> StudentActivity<'d> {
    fn new(record: &'d RosterRecord) -> Self {
        Self {
            record,
            sessions: 0.0,
            time_minutes: 0.0,
            diagnostics: 0.0,
            milestone_delta: 0,
            engaged: false,
        }
    }

    pub fn progressed(&self) -> bool {
        self.milestone_delta > 0
    }
}

/// Per-student totals over an already filtered set of joined facts.
#[derive(Debug, Clone, Default)]
pub struct Activity<'d> {
    students: BTreeMap<&'d str, StudentActivity<'d>>,
    pub total_sessions: f64,
    pub total_time: f64,
    pub total_diagnostics: f64,
}

impl<'d> Activity<'d> {
    pub fn collect<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (&'d FactRecord, &'d RosterRecord)>,
    {
        let mut activity = Activity::default();
        for (fact, record) in rows {
            let entry = activity
                .students
                .entry(record.student_id.as_str())
                .or_insert_with(|| StudentActivity::new(record));
            entry.sessions += fact.sessions;
            entry.time_minutes += fact.time_minutes;
            entry.diagnostics += fact.diagnostics_completed;
            entry.milestone_delta += fact.milestone_delta();
            entry.engaged |= fact.is_engaged();

            activity.total_sessions += fact.sessions;
            activity.total_time += fact.time_minutes;
            activity.total_diagnostics += fact.diagnostics_completed;
        }
        activity
    }

    /// Every student with at least one fact in the slice, engaged or not.
    pub fn students(&self) -> impl Iterator<Item = &StudentActivity<'d>> + '_ {
        self.students.values()
    }

    pub fn get(&self, student_id: &str) -> Option<&StudentActivity<'d>> {
        self.students.get(student_id)
    }

    pub fn active(&self) -> impl Iterator<Item = &StudentActivity<'d>> + '_ {
        self.students.values().filter(|s| s.engaged)
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    pub fn is_active(&self, student_id: &str) -> bool {
        self.get(student_id).is_some_and(|s| s.engaged)
    }

    /// Active entities of `kind`, optionally restricted to target or
    /// non-target students.
    pub fn active_entities(&self, kind: EntityKind, target: Option<bool>) -> BTreeSet<&'d str> {
        entity_image(
            kind,
            self.active()
                .filter(|s| target.map_or(true, |t| s.record.target == t))
                .map(|s| s.record),
        )
    }

    /// Milestone delta summed over every row of the slice.
    pub fn summed_milestone_delta(&self, student_id: &str) -> i64 {
        self.get(student_id).map_or(0, |s| s.milestone_delta)
    }

    pub fn progressed(&self) -> impl Iterator<Item = &StudentActivity<'d>> + '_ {
        self.students.values().filter(|s| s.progressed())
    }

    pub fn progressed_split(&self) -> (usize, usize) {
        self.progressed().fold((0, 0), |(t, nt), s| {
            if s.record.target {
                (t + 1, nt)
            } else {
                (t, nt + 1)
            }
        })
    }

    pub fn sessions_per_active(&self) -> f64 {
        per_active(self.total_sessions, self.active_count())
    }

    pub fn time_per_active(&self) -> f64 {
        per_active(self.total_time, self.active_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fact, roster};

    #[test]
    fn activity_needs_sessions_or_minutes() {
        let ro = vec![roster("S1", "SC1", "A1", "A", true), roster("S2", "SC2", "A1", "A", false)];
        let facts = vec![
            fact("S1", 1, "Math", 0.0, 5.0),
            fact("S2", 1, "Math", 0.0, 0.0),
        ];
        let activity = Activity::collect(facts.iter().zip(ro.iter()));
        assert_eq!(activity.students().count(), 2);
        assert_eq!(activity.active_count(), 1);
        assert!(activity.is_active("S1"));
        assert!(!activity.is_active("S2"));
    }

    #[test]
    fn repeated_rows_accumulate() {
        let ro = roster("S1", "SC1", "A1", "A", true);
        let mut first = fact("S1", 1, "Math", 2.0, 10.0);
        first.start_milestone = 1;
        first.current_milestone = 2;
        let mut second = fact("S1", 1, "Math", 1.0, 5.0);
        second.start_milestone = 2;
        second.current_milestone = 1;
        let facts = [first, second];
        let activity = Activity::collect(facts.iter().map(|f| (f, &ro)));
        let student = activity.get("S1").unwrap();
        assert_eq!(student.sessions, 3.0);
        assert_eq!(student.time_minutes, 15.0);
        assert_eq!(activity.summed_milestone_delta("S1"), 0);
        assert_eq!(activity.progressed().count(), 0);
    }

    #[test]
    fn entity_images_skip_blank_keys() {
        let mut blank = roster("S2", "", "", "A", true);
        blank.school_name.clear();
        let records = vec![roster("S1", "SC1", "A1", "A", true), blank];
        assert_eq!(entity_image(EntityKind::Schools, &records).len(), 1);
        assert_eq!(entity_image(EntityKind::Mandals, &records).len(), 1);
        assert_eq!(entity_image(EntityKind::Districts, &records).len(), 1);
        assert_eq!(entity_image(EntityKind::Students, &records).len(), 2);
    }
}
