//! Fixture builders shared by the unit tests.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::models::{FactRecord, RosterRecord, Subject};

/// A day in March 2024.
pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

/// Roster entry whose school id and school name are both `school`.
pub fn roster(student: &str, school: &str, mandal: &str, district: &str, target: bool) -> RosterRecord {
    RosterRecord {
        student_id: student.to_string(),
        school_id: school.to_string(),
        school_name: school.to_string(),
        mandal: mandal.to_string(),
        district: district.to_string(),
        grade: "5".to_string(),
        target,
        extra: BTreeMap::new(),
    }
}

pub fn fact(student: &str, d: u32, subject: &str, sessions: f64, minutes: f64) -> FactRecord {
    FactRecord {
        date: day(d),
        student_id: student.to_string(),
        subject: Subject::normalize(subject),
        sessions,
        time_minutes: minutes,
        diagnostics_completed: 0.0,
        start_milestone: 0,
        current_milestone: 0,
        extra: BTreeMap::new(),
    }
}

/// Same as [`fact`] with a milestone move from `start` to `current`.
pub fn progress(student: &str, d: u32, subject: &str, start: i64, current: i64) -> FactRecord {
    FactRecord {
        start_milestone: start,
        current_milestone: current,
        ..fact(student, d, subject, 1.0, 10.0)
    }
}
