use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::activity::{Activity, EntityKind};
use crate::filter::FilterConfig;
use crate::metrics::{clamped_gap, format_decimal, format_k, pct_label, pct_num, round2, round_half_up, wow, Change};
use crate::models::Dataset;

const SESSIONS_GOAL: f64 = 2.0;
const MINUTES_GOAL: f64 = 200.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KpiMetric {
    ActiveStudents,
    ActiveSchools,
    StudentsProgressed,
    SessionsPerStudent,
    AvgTimePerStudent,
}

impl KpiMetric {
    pub const ALL: [KpiMetric; 5] = [
        KpiMetric::ActiveStudents,
        KpiMetric::ActiveSchools,
        KpiMetric::StudentsProgressed,
        KpiMetric::SessionsPerStudent,
        KpiMetric::AvgTimePerStudent,
    ];

    pub fn title(self) -> &'static str {
        match self {
            KpiMetric::ActiveStudents => "Active Students",
            KpiMetric::ActiveSchools => "Active Schools",
            KpiMetric::StudentsProgressed => "Students Progressed",
            KpiMetric::SessionsPerStudent => "Sessions per Student (7d)",
            KpiMetric::AvgTimePerStudent => "Avg Time Spent per student (7d)",
        }
    }

    /// Counting metrics split their explorer columns by target status.
    pub fn is_count(self) -> bool {
        matches!(
            self,
            KpiMetric::ActiveStudents | KpiMetric::ActiveSchools | KpiMetric::StudentsProgressed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Gauge {
    Split { green: usize, blue: usize, grey: usize },
    Percent { pct: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kpi {
    pub metric: KpiMetric,
    pub title: &'static str,
    pub value: f64,
    pub big: String,
    pub reference: String,
    pub wow: Change,
    pub gauge: Gauge,
}

/// Target students and target schools on the scope-filtered roster.
pub fn target_totals(dataset: &Dataset, config: &FilterConfig) -> (usize, usize) {
    let mut students = 0;
    let mut schools = BTreeSet::new();
    for record in dataset
        .roster
        .iter()
        .filter(|ro| ro.target && config.roster_passes(ro))
    {
        students += 1;
        if let Some(school) = EntityKind::Schools.key_of(record) {
            schools.insert(school);
        }
    }
    (students, schools.len())
}

/// The five headline cards. `previous` is the activity of the equal-length
/// window just before `current`, under the same filters.
pub fn compute(
    dataset: &Dataset,
    config: &FilterConfig,
    current: &Activity<'_>,
    previous: &Activity<'_>,
) -> Vec<Kpi> {
    let (target_students, target_schools) = target_totals(dataset, config);

    let active = current.active_count();
    let active_target = current.active().filter(|s| s.record.target).count();
    let active_students = Kpi {
        metric: KpiMetric::ActiveStudents,
        title: KpiMetric::ActiveStudents.title(),
        value: active as f64,
        big: format_k(active),
        reference: format!(
            "of {} target ({})",
            format_k(target_students),
            pct_label(active as f64, target_students as f64)
        ),
        wow: wow(active as f64, previous.active_count() as f64),
        gauge: Gauge::Split {
            green: active_target,
            blue: active - active_target,
            grey: clamped_gap(target_students, active_target),
        },
    };

    let schools = current.active_entities(EntityKind::Schools, None).len();
    let schools_target = current.active_entities(EntityKind::Schools, Some(true)).len();
    let schools_non_target = current.active_entities(EntityKind::Schools, Some(false)).len();
    let active_schools = Kpi {
        metric: KpiMetric::ActiveSchools,
        title: KpiMetric::ActiveSchools.title(),
        value: schools as f64,
        big: schools.to_string(),
        reference: format!(
            "of {} target ({}%)",
            target_schools,
            pct_num(schools_target as f64, target_schools.max(1) as f64)
        ),
        wow: wow(
            schools as f64,
            previous.active_entities(EntityKind::Schools, None).len() as f64,
        ),
        gauge: Gauge::Split {
            green: schools_target,
            blue: schools_non_target,
            grey: clamped_gap(target_schools, schools_target),
        },
    };

    let (progressed_target, progressed_non_target) = current.progressed_split();
    let progressed = progressed_target + progressed_non_target;
    let students_progressed = Kpi {
        metric: KpiMetric::StudentsProgressed,
        title: KpiMetric::StudentsProgressed.title(),
        value: progressed as f64,
        big: format_k(progressed),
        reference: format!(
            "of {} target ({})",
            format_k(target_students),
            pct_label(progressed_target as f64, target_students as f64)
        ),
        wow: wow(progressed as f64, previous.progressed().count() as f64),
        gauge: Gauge::Split {
            green: progressed_target,
            blue: progressed_non_target,
            grey: clamped_gap(target_students, progressed_target),
        },
    };

    let sessions = current.sessions_per_active();
    let sessions_goal = pct_num(sessions, SESSIONS_GOAL).min(100);
    let sessions_per_student = Kpi {
        metric: KpiMetric::SessionsPerStudent,
        title: KpiMetric::SessionsPerStudent.title(),
        value: round2(sessions),
        big: format_decimal(sessions),
        reference: format!("of {} days goal ({}%)", SESSIONS_GOAL, sessions_goal),
        wow: wow(sessions, previous.sessions_per_active()),
        gauge: Gauge::Percent { pct: sessions_goal },
    };

    let minutes = current.time_per_active();
    let minutes_goal = pct_num(minutes, MINUTES_GOAL).min(100);
    let avg_time = Kpi {
        metric: KpiMetric::AvgTimePerStudent,
        title: KpiMetric::AvgTimePerStudent.title(),
        value: round_half_up(minutes),
        big: format!("{} mins", round_half_up(minutes) as i64),
        reference: format!("of {} mins goal ({}%)", MINUTES_GOAL, minutes_goal),
        wow: wow(minutes, previous.time_per_active()),
        gauge: Gauge::Percent { pct: minutes_goal },
    };

    vec![
        active_students,
        active_schools,
        students_progressed,
        sessions_per_student,
        avg_time,
    ]
}
