use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use super::activity::EntityKind;
use super::kpi::KpiMetric;
use super::milestones::{snapshot_milestone_delta, MilestoneSnapshot};
use crate::drill::{level_key, DrillLevel, KpiDrill};
use crate::filter::FilterConfig;
use crate::metrics::{format_decimal, round2, round_half_up};
use crate::models::{Dataset, RosterRecord};
use crate::window::TimeWindow;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExplorerValue {
    Count(usize),
    Decimal(f64),
    Flag(bool),
    Change(i64),
}

impl fmt::Display for ExplorerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExplorerValue::Count(n) => write!(f, "{n}"),
            ExplorerValue::Decimal(v) => f.write_str(&format_decimal(*v)),
            ExplorerValue::Flag(true) => f.write_str("Yes"),
            ExplorerValue::Flag(false) => f.write_str("No"),
            ExplorerValue::Change(d) => write!(f, "{d}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplorerRow {
    pub id: String,
    pub name: String,
    pub values: BTreeMap<String, ExplorerValue>,
}

impl ExplorerRow {
    pub fn cell(&self, column: &str) -> String {
        self.values
            .get(column)
            .map(ToString::to_string)
            .unwrap_or_default()
    }
}

/// The table behind a KPI card, split by subject and target status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplorerTable {
    pub metric: KpiMetric,
    pub level: DrillLevel,
    pub next_level: Option<DrillLevel>,
    pub columns: Vec<String>,
    pub rows: Vec<ExplorerRow>,
}

#[derive(Default)]
struct SubjectTally<'d> {
    engaged: BTreeSet<&'d str>,
    engaged_target: BTreeSet<&'d str>,
    schools_target: BTreeSet<&'d str>,
    schools_non_target: BTreeSet<&'d str>,
    deltas: BTreeMap<&'d str, (i64, bool)>,
    sessions: f64,
    minutes: f64,
}

impl<'d> SubjectTally<'d> {
    /// Target and non-target members counted by a counting metric.
    fn split(&self, metric: KpiMetric) -> (BTreeSet<&'d str>, BTreeSet<&'d str>) {
        match metric {
            KpiMetric::ActiveSchools => (self.schools_target.clone(), self.schools_non_target.clone()),
            KpiMetric::StudentsProgressed => {
                let mut target = BTreeSet::new();
                let mut non_target = BTreeSet::new();
                for (student, (delta, is_target)) in &self.deltas {
                    if *delta > 0 {
                        if *is_target {
                            target.insert(*student);
                        } else {
                            non_target.insert(*student);
                        }
                    }
                }
                (target, non_target)
            }
            _ => (
                self.engaged_target.clone(),
                self.engaged.difference(&self.engaged_target).copied().collect(),
            ),
        }
    }

    fn per_engaged(&self, total: f64) -> Option<f64> {
        (!self.engaged.is_empty()).then(|| total / self.engaged.len() as f64)
    }
}

struct Group<'d> {
    name: &'d str,
    target: bool,
    subjects: BTreeMap<&'d str, SubjectTally<'d>>,
}

fn group_of(level: DrillLevel, record: &RosterRecord) -> (&str, &str) {
    let name = level_key(level, record);
    if level == DrillLevel::School && !record.school_id.is_empty() {
        (record.school_id.as_str(), name)
    } else {
        (name, name)
    }
}

/// Builds the KPI explorer table for an open KPI drill.
///
/// Rows are roster entities under the drill path that pass the full roster
/// predicate. At Student level every such student gets a row, active or not.
pub fn explore(
    dataset: &Dataset,
    config: &FilterConfig,
    window: TimeWindow,
    drill: &KpiDrill,
) -> ExplorerTable {
    let level = drill.path.level();
    let metric = drill.metric;
    let passes = |ro: &RosterRecord| config.roster_passes(ro) && drill.path.admits(ro);
    let subjects = if level == DrillLevel::Student {
        dataset.options.subjects.clone()
    } else {
        dataset.options.subjects_in_view(config)
    };

    let keep = config.improvement_keep(config.facts_in(window).select(dataset));

    let mut groups: BTreeMap<&str, Group<'_>> = BTreeMap::new();
    for (fact, record) in dataset.joined_facts() {
        if !window.contains(fact.date) || !passes(record) {
            continue;
        }
        if keep
            .as_ref()
            .is_some_and(|k| !k.contains(record.student_id.as_str()))
        {
            continue;
        }
        let subject = fact.subject.label();
        if !subjects.iter().any(|s| s == subject) {
            continue;
        }
        let (id, name) = group_of(level, record);
        let group = groups.entry(id).or_insert_with(|| Group {
            name,
            target: record.target,
            subjects: BTreeMap::new(),
        });
        let tally = group.subjects.entry(subject).or_default();
        let student = record.student_id.as_str();
        if fact.is_engaged() {
            tally.engaged.insert(student);
            let school = EntityKind::Schools.key_of(record);
            if record.target {
                tally.engaged_target.insert(student);
                tally.schools_target.extend(school);
            } else {
                tally.schools_non_target.extend(school);
            }
        }
        tally.deltas.entry(student).or_insert((0, record.target)).0 += fact.milestone_delta();
        tally.sessions += fact.sessions;
        tally.minutes += fact.time_minutes;
    }

    let mut snapshots = BTreeMap::new();
    if level == DrillLevel::Student {
        for record in dataset.roster.iter().filter(|ro| passes(ro)) {
            let (id, name) = group_of(level, record);
            groups.entry(id).or_insert_with(|| Group {
                name,
                target: record.target,
                subjects: BTreeMap::new(),
            });
        }
        if metric == KpiMetric::StudentsProgressed {
            snapshots = snapshot_milestone_delta(
                dataset
                    .joined_facts()
                    .filter(|(_, ro)| passes(ro))
                    .map(|(fact, _)| fact),
            );
        }
    }

    let want_target = config.scope.wants_target();
    let want_non_target = config.scope.wants_non_target();
    let columns = explorer_columns(metric, level, &subjects, want_target, want_non_target);

    let rows = groups
        .iter()
        .map(|(id, group)| {
            let mut values = BTreeMap::new();
            if level == DrillLevel::Student {
                values.insert("Target".to_string(), ExplorerValue::Flag(group.target));
                for subject in &subjects {
                    if metric == KpiMetric::StudentsProgressed {
                        let change = snapshots
                            .get(&(*id, subject.as_str()))
                            .map_or(0, MilestoneSnapshot::improvement);
                        values.insert(format!("{subject} Change"), ExplorerValue::Change(change));
                    } else {
                        let active = group
                            .subjects
                            .get(subject.as_str())
                            .is_some_and(|t| !t.engaged.is_empty());
                        values.insert(format!("{subject} Active"), ExplorerValue::Flag(active));
                    }
                }
            } else if metric.is_count() {
                let mut target_union = BTreeSet::new();
                for subject in &subjects {
                    let (target, non_target) = group
                        .subjects
                        .get(subject.as_str())
                        .map(|t| t.split(metric))
                        .unwrap_or_default();
                    if want_target {
                        values.insert(format!("{subject} T"), ExplorerValue::Count(target.len()));
                    }
                    if want_non_target {
                        values.insert(
                            format!("{subject} NT"),
                            ExplorerValue::Count(non_target.len()),
                        );
                    }
                    target_union.extend(target);
                }
                if want_target {
                    values.insert("Target".to_string(), ExplorerValue::Count(target_union.len()));
                }
            } else {
                for subject in &subjects {
                    let tally = group.subjects.get(subject.as_str());
                    let (column, value) = if metric == KpiMetric::SessionsPerStudent {
                        let avg = tally.and_then(|t| t.per_engaged(t.sessions)).map_or(0.0, round2);
                        (format!("{subject} Avg Sess/Stu"), avg)
                    } else {
                        let avg = tally
                            .and_then(|t| t.per_engaged(t.minutes))
                            .map_or(0.0, round_half_up);
                        (format!("{subject} Avg mins/Stu"), avg)
                    };
                    values.insert(column, ExplorerValue::Decimal(value));
                }
            }
            ExplorerRow {
                id: id.to_string(),
                name: group.name.to_string(),
                values,
            }
        })
        .collect();

    ExplorerTable {
        metric,
        level,
        next_level: level.child(),
        columns,
        rows,
    }
}

fn explorer_columns(
    metric: KpiMetric,
    level: DrillLevel,
    subjects: &[String],
    want_target: bool,
    want_non_target: bool,
) -> Vec<String> {
    if level == DrillLevel::Student {
        let suffix = if metric == KpiMetric::StudentsProgressed {
            "Change"
        } else {
            "Active"
        };
        return std::iter::once("Target".to_string())
            .chain(subjects.iter().map(|s| format!("{s} {suffix}")))
            .collect();
    }
    match metric {
        KpiMetric::SessionsPerStudent => subjects.iter().map(|s| format!("{s} Avg Sess/Stu")).collect(),
        KpiMetric::AvgTimePerStudent => subjects.iter().map(|s| format!("{s} Avg mins/Stu")).collect(),
        _ => {
            let mut columns = Vec::new();
            if want_target {
                columns.push("Target".to_string());
            }
            for subject in subjects {
                if want_target {
                    columns.push(format!("{subject} T"));
                }
                if want_non_target {
                    columns.push(format!("{subject} NT"));
                }
            }
            columns
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{ImprovementStatus, Scope};
    use crate::testing::{day, fact, progress, roster};

    fn sample() -> Dataset {
        Dataset::new(
            vec![
                roster("S1", "School X", "A1", "A", true),
                roster("S2", "School X", "A1", "A", false),
                roster("S3", "School Y", "A2", "A", true),
                roster("S4", "School Z", "B1", "B", true),
            ],
            vec![
                fact("S1", 12, "Math", 2.0, 30.0),
                fact("S1", 13, "Math", 1.0, 30.0),
                fact("S2", 12, "Math", 1.0, 10.0),
                fact("S2", 12, "English", 3.0, 20.0),
                progress("S3", 14, "Math", 1, 2),
                progress("S4", 2, "Math", 0, 4),
            ],
        )
    }

    fn window() -> TimeWindow {
        TimeWindow { from: day(10), to: day(16) }
    }

    #[test]
    fn active_students_split_by_subject_and_target() {
        let dataset = sample();
        let drill = KpiDrill::open(KpiMetric::ActiveStudents);
        let table = explore(&dataset, &FilterConfig::default(), window(), &drill);
        assert_eq!(table.next_level, Some(DrillLevel::Mandal));
        assert_eq!(
            table.columns,
            vec!["Target", "English T", "English NT", "Math T", "Math NT"]
        );
        assert_eq!(table.rows.len(), 1);
        let a = &table.rows[0];
        assert_eq!(a.name, "A");
        assert_eq!(a.cell("Math T"), "2");
        assert_eq!(a.cell("Math NT"), "1");
        assert_eq!(a.cell("English NT"), "1");
        assert_eq!(a.cell("Target"), "2");
    }

    #[test]
    fn improvement_selection_limits_the_counted_students() {
        let dataset = sample();
        let config = FilterConfig {
            improvement: [ImprovementStatus::Improved].into_iter().collect(),
            ..FilterConfig::default()
        };
        let drill = KpiDrill::open(KpiMetric::ActiveStudents);
        let table = explore(&dataset, &config, window(), &drill);
        let a = &table.rows[0];
        assert_eq!(a.cell("Math T"), "1");
        assert_eq!(a.cell("Math NT"), "0");
        assert_eq!(a.cell("English NT"), "0");
        assert_eq!(a.cell("Target"), "1");
    }

    #[test]
    fn target_scope_hides_non_target_columns() {
        let dataset = sample();
        let config = FilterConfig { scope: Scope::Target, ..FilterConfig::default() };
        let drill = KpiDrill::open(KpiMetric::ActiveSchools);
        let table = explore(&dataset, &config, window(), &drill);
        assert_eq!(table.columns, vec!["Target", "English T", "Math T"]);
        assert_eq!(table.rows[0].cell("Math T"), "2");
    }

    #[test]
    fn averages_divide_by_engaged_students() {
        let dataset = sample();
        let drill = KpiDrill::open(KpiMetric::SessionsPerStudent);
        let table = explore(&dataset, &FilterConfig::default(), window(), &drill);
        // Math: 2 + 1 + 1 + 1 sessions over S1, S2 and S3.
        assert_eq!(table.rows[0].cell("Math Avg Sess/Stu"), "1.67");
        assert_eq!(table.rows[0].cell("English Avg Sess/Stu"), "3");
    }

    #[test]
    fn student_level_lists_every_rostered_student() {
        let dataset = sample();
        let drill = KpiDrill::open(KpiMetric::StudentsProgressed)
            .drill_into(DrillLevel::Mandal, "B")
            .and_then(|d| d.drill_into(DrillLevel::School, "B1"))
            .and_then(|d| d.drill_into(DrillLevel::Student, "School Z"))
            .unwrap();
        let table = explore(&dataset, &FilterConfig::default(), window(), &drill);
        assert_eq!(table.next_level, None);
        assert_eq!(table.columns, vec!["Target", "English Change", "Math Change"]);
        assert_eq!(table.rows.len(), 1);
        let row = &table.rows[0];
        assert_eq!(row.cell("Target"), "Yes");
        // Progress from outside the window still shows in the full-history change.
        assert_eq!(row.cell("Math Change"), "4");
        assert_eq!(row.cell("English Change"), "0");
    }
}
