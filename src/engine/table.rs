use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::activity::{Activity, EntityKind, StudentActivity};
use super::milestones::{snapshot_milestone_delta, MilestoneSnapshot};
use crate::drill::{level_key, DrillLevel, DrillPath};
use crate::filter::FilterConfig;
use crate::metrics::{coverage_pct, format_decimal, pct_num, round2, round_half_up};
use crate::models::{Dataset, FactRecord, RosterRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum TargetStatus {
    Target,
    NonTarget,
}

impl TargetStatus {
    pub fn of(record: &RosterRecord) -> Self {
        if record.target {
            TargetStatus::Target
        } else {
            TargetStatus::NonTarget
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TargetStatus::Target => "Target",
            TargetStatus::NonTarget => "Non-target",
        }
    }
}

/// One row of the drill table: an entity at the current level, or a single
/// student at Student level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRow {
    pub id: String,
    pub name: String,
    pub active_schools: usize,
    pub active_students: usize,
    pub target_schools: usize,
    pub target_students: usize,
    pub active_target_schools: usize,
    pub active_target_students: usize,
    pub schools_active_pct: i64,
    pub students_active_pct: i64,
    pub sessions_per_student: f64,
    pub avg_time: f64,
    pub improvement_pct: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pct_of_target: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TargetStatus>,
    /// Students whose summed in-window milestone delta is positive, per subject.
    pub progressed: BTreeMap<String, usize>,
    /// Student level only: first/last snapshot per subject.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub milestones: BTreeMap<String, MilestoneSnapshot>,
}

impl EntityRow {
    fn empty(name: &str) -> Self {
        Self {
            id: name.to_string(),
            name: name.to_string(),
            active_schools: 0,
            active_students: 0,
            target_schools: 0,
            target_students: 0,
            active_target_schools: 0,
            active_target_students: 0,
            schools_active_pct: 100,
            students_active_pct: 100,
            sessions_per_student: 0.0,
            avg_time: 0.0,
            improvement_pct: 0,
            pct_of_target: None,
            sessions: None,
            milestone: None,
            status: None,
            progressed: BTreeMap::new(),
            milestones: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MilestoneTotals {
    pub start: i64,
    pub current: i64,
    pub improvement: i64,
}

/// Footer row: counts summed, percentages recomputed from the sums.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableTotals {
    pub target_schools: usize,
    pub active_schools: usize,
    pub active_target_schools: usize,
    pub schools_active_pct: i64,
    pub target_students: usize,
    pub active_students: usize,
    pub active_target_students: usize,
    pub students_active_pct: i64,
    pub progressed: BTreeMap<String, usize>,
    pub milestones: BTreeMap<String, MilestoneTotals>,
}

impl TableTotals {
    fn from_rows(rows: &[EntityRow], subjects: &[String]) -> Self {
        let mut totals = TableTotals::default();
        for row in rows {
            totals.target_schools += row.target_schools;
            totals.active_schools += row.active_schools;
            totals.active_target_schools += row.active_target_schools;
            totals.target_students += row.target_students;
            totals.active_students += row.active_students;
            totals.active_target_students += row.active_target_students;
            for (subject, count) in &row.progressed {
                *totals.progressed.entry(subject.clone()).or_insert(0) += count;
            }
            for (subject, snapshot) in &row.milestones {
                let sum = totals.milestones.entry(subject.clone()).or_default();
                sum.start += snapshot.start;
                sum.current += snapshot.current;
                sum.improvement += snapshot.improvement();
            }
        }
        for subject in subjects {
            totals.progressed.entry(subject.clone()).or_insert(0);
        }
        totals.schools_active_pct = coverage_pct(totals.active_target_schools, totals.target_schools);
        totals.students_active_pct =
            coverage_pct(totals.active_target_students, totals.target_students);
        totals
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortColumn {
    Name,
    TargetSchools,
    ActiveSchools,
    SchoolsActivePct,
    TargetStudents,
    ActiveStudents,
    StudentsActivePct,
    PctOfTarget,
    SessionsPerStudent,
    AvgTime,
    ImprovementPct,
    Sessions,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSort {
    pub column: SortColumn,
    pub direction: SortDirection,
}

impl TableSort {
    /// Ascending on a new column; flips direction when the column repeats.
    pub fn toggled(previous: Option<TableSort>, column: SortColumn) -> TableSort {
        let direction = match previous {
            Some(prev) if prev.column == column && prev.direction == SortDirection::Ascending => {
                SortDirection::Descending
            }
            _ => SortDirection::Ascending,
        };
        TableSort { column, direction }
    }
}

fn compare_rows(a: &EntityRow, b: &EntityRow, column: SortColumn) -> Ordering {
    let number = |x: f64, y: f64| x.total_cmp(&y);
    match column {
        SortColumn::Name => a.name.cmp(&b.name),
        SortColumn::TargetSchools => a.target_schools.cmp(&b.target_schools),
        SortColumn::ActiveSchools => a.active_schools.cmp(&b.active_schools),
        SortColumn::SchoolsActivePct => a.schools_active_pct.cmp(&b.schools_active_pct),
        SortColumn::TargetStudents => a.target_students.cmp(&b.target_students),
        SortColumn::ActiveStudents => a.active_students.cmp(&b.active_students),
        SortColumn::StudentsActivePct => a.students_active_pct.cmp(&b.students_active_pct),
        SortColumn::PctOfTarget => a.pct_of_target.cmp(&b.pct_of_target),
        SortColumn::SessionsPerStudent => number(a.sessions_per_student, b.sessions_per_student),
        SortColumn::AvgTime => number(a.avg_time, b.avg_time),
        SortColumn::ImprovementPct => a.improvement_pct.cmp(&b.improvement_pct),
        SortColumn::Sessions => number(a.sessions.unwrap_or(0.0), b.sessions.unwrap_or(0.0)),
        SortColumn::Status => a.status.cmp(&b.status),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrillTable {
    pub level: DrillLevel,
    pub path: DrillPath,
    pub subjects: Vec<String>,
    pub rows: Vec<EntityRow>,
    pub totals: TableTotals,
    pub sort: Option<TableSort>,
}

impl DrillTable {
    /// Stable sort, so rows with equal keys keep their key order.
    pub fn sort_by(&mut self, sort: TableSort) {
        self.rows.sort_by(|a, b| {
            let ord = compare_rows(a, b, sort.column);
            match sort.direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            }
        });
        self.sort = Some(sort);
    }

    pub fn headers(&self) -> Vec<String> {
        let mut headers: Vec<String> = match self.level {
            DrillLevel::District | DrillLevel::Mandal => vec![
                self.level.label(),
                "Target Schools",
                "Active Schools",
                "Active/Target Schools %",
                "Target Students",
                "Active Students",
                "Active/Target Students %",
                "Sessions/Student",
                "Avg Time",
            ],
            DrillLevel::School => vec![
                "School Name",
                "Target Students",
                "Active Students",
                "Active/Target Students %",
                "% of Target",
                "Sessions/Student",
                "Avg Time",
            ],
            DrillLevel::Student => vec!["Student ID", "Sessions", "Time Spent", "Status"],
        }
        .into_iter()
        .map(str::to_string)
        .collect();

        for subject in &self.subjects {
            if self.level == DrillLevel::Student {
                headers.push(format!("{subject} Start"));
                headers.push(format!("{subject} Current"));
                headers.push(format!("{subject} Improvement"));
            } else {
                headers.push(format!("Progressed {subject}"));
            }
        }
        headers
    }

    /// Display text for each column of `row`, in header order.
    pub fn cells(&self, row: &EntityRow) -> Vec<String> {
        let pct = |v: i64| format!("{v}%");
        let mins = |v: f64| format!("{} mins", v as i64);
        let mut cells = match self.level {
            DrillLevel::District | DrillLevel::Mandal => vec![
                row.name.clone(),
                row.target_schools.to_string(),
                row.active_schools.to_string(),
                pct(row.schools_active_pct),
                row.target_students.to_string(),
                row.active_students.to_string(),
                pct(row.students_active_pct),
                format_decimal(row.sessions_per_student),
                mins(row.avg_time),
            ],
            DrillLevel::School => vec![
                row.name.clone(),
                row.target_students.to_string(),
                row.active_students.to_string(),
                pct(row.students_active_pct),
                row.pct_of_target.unwrap_or(0).to_string(),
                format_decimal(row.sessions_per_student),
                mins(row.avg_time),
            ],
            DrillLevel::Student => vec![
                row.id.clone(),
                format_decimal(row.sessions.unwrap_or(0.0)),
                mins(row.avg_time),
                row.status.map(TargetStatus::label).unwrap_or_default().to_string(),
            ],
        };

        for subject in &self.subjects {
            if self.level == DrillLevel::Student {
                let snapshot = row.milestones.get(subject);
                let field = |f: fn(&MilestoneSnapshot) -> i64| {
                    snapshot.map(f).unwrap_or(0).to_string()
                };
                cells.push(field(|s| s.start));
                cells.push(field(|s| s.current));
                cells.push(field(MilestoneSnapshot::improvement));
            } else {
                cells.push(row.progressed.get(subject).copied().unwrap_or(0).to_string());
            }
        }
        cells
    }

    pub fn totals_cells(&self) -> Vec<String> {
        let t = &self.totals;
        let pct = |v: i64| format!("{v}%");
        let blank = String::new;
        let mut cells = match self.level {
            DrillLevel::District | DrillLevel::Mandal => vec![
                "Total".to_string(),
                t.target_schools.to_string(),
                t.active_schools.to_string(),
                pct(t.schools_active_pct),
                t.target_students.to_string(),
                t.active_students.to_string(),
                pct(t.students_active_pct),
                blank(),
                blank(),
            ],
            DrillLevel::School => vec![
                "Total".to_string(),
                t.target_students.to_string(),
                t.active_students.to_string(),
                pct(t.students_active_pct),
                blank(),
                blank(),
                blank(),
            ],
            DrillLevel::Student => vec!["Total".to_string(), blank(), blank(), blank()],
        };
        for subject in &self.subjects {
            if self.level == DrillLevel::Student {
                let sum = t.milestones.get(subject).copied().unwrap_or_default();
                cells.push(sum.start.to_string());
                cells.push(sum.current.to_string());
                cells.push(sum.improvement.to_string());
            } else {
                cells.push(t.progressed.get(subject).copied().unwrap_or(0).to_string());
            }
        }
        cells
    }
}

#[derive(Default)]
struct Group<'d> {
    students: BTreeSet<&'d str>,
    schools: BTreeSet<&'d str>,
    target_students: BTreeSet<&'d str>,
    target_schools: BTreeSet<&'d str>,
    sessions: f64,
    minutes: f64,
    improved: usize,
}

impl<'d> Group<'d> {
    fn add(&mut self, student: &StudentActivity<'d>) {
        let record = student.record;
        self.students.insert(record.student_id.as_str());
        let school = EntityKind::Schools.key_of(record);
        if let Some(school) = school {
            self.schools.insert(school);
        }
        if record.target {
            self.target_students.insert(record.student_id.as_str());
            if let Some(school) = school {
                self.target_schools.insert(school);
            }
        }
        self.sessions += student.sessions;
        self.minutes += student.time_minutes;
        if student.progressed() {
            self.improved += 1;
        }
    }
}

/// Target denominators per entity: roster rows that pass geography and
/// class, carry the target flag and sit under the drill path.
fn target_denominators<'d>(
    dataset: &'d Dataset,
    config: &FilterConfig,
    path: &DrillPath,
) -> BTreeMap<&'d str, (usize, BTreeSet<&'d str>)> {
    let level = path.level();
    let mut targets: BTreeMap<&str, (usize, BTreeSet<&str>)> = BTreeMap::new();
    for record in dataset.roster.iter().filter(|ro| {
        ro.target && config.roster_passes_ignoring_scope(ro) && path.admits(ro)
    }) {
        let entry = targets.entry(level_key(level, record)).or_default();
        entry.0 += 1;
        if let Some(school) = EntityKind::Schools.key_of(record) {
            entry.1.insert(school);
        }
    }
    targets
}

/// Per entity and subject, students with a positive summed in-window delta.
fn progress_map(
    level: DrillLevel,
    path: &DrillPath,
    rows: &[(&FactRecord, &RosterRecord)],
) -> BTreeMap<String, BTreeMap<String, usize>> {
    let mut deltas: BTreeMap<(&str, &str), (i64, &RosterRecord)> = BTreeMap::new();
    for &(fact, record) in rows.iter().filter(|(_, ro)| path.admits(ro)) {
        let entry = deltas
            .entry((record.student_id.as_str(), fact.subject.label()))
            .or_insert((0, record));
        entry.0 += fact.milestone_delta();
    }
    let mut map: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
    for ((_, subject), (delta, record)) in deltas {
        if delta > 0 {
            *map.entry(level_key(level, record).to_string())
                .or_default()
                .entry(subject.to_string())
                .or_insert(0) += 1;
        }
    }
    map
}

/// Builds the table for the current drill level from the window activity.
/// `rows` are the same window facts `activity` was collected from.
pub fn build<'d>(
    dataset: &'d Dataset,
    config: &FilterConfig,
    path: &DrillPath,
    activity: &Activity<'d>,
    rows: &[(&'d FactRecord, &'d RosterRecord)],
    subjects: &[String],
) -> DrillTable {
    let level = path.level();
    let progress = progress_map(level, path, rows);
    let progressed_for = |key: &str| -> BTreeMap<String, usize> {
        let found = progress.get(key);
        subjects
            .iter()
            .map(|s| {
                let count = found.and_then(|m| m.get(s)).copied().unwrap_or(0);
                (s.clone(), count)
            })
            .collect()
    };

    let table_rows: Vec<EntityRow> = if level == DrillLevel::Student {
        let snapshots = snapshot_milestone_delta(
            rows.iter()
                .filter(|(_, ro)| path.admits(ro))
                .map(|(fact, _)| *fact),
        );
        activity
            .active()
            .filter(|s| path.admits(s.record))
            .map(|s| {
                let id = s.record.student_id.as_str();
                let milestones = subjects
                    .iter()
                    .filter_map(|subj| {
                        snapshots
                            .get(&(id, subj.as_str()))
                            .map(|snap| (subj.clone(), *snap))
                    })
                    .collect();
                student_row(s, progressed_for(id), milestones)
            })
            .collect()
    } else {
        let mut groups: BTreeMap<&str, Group<'_>> = BTreeMap::new();
        for student in activity.active().filter(|s| path.admits(s.record)) {
            groups
                .entry(level_key(level, student.record))
                .or_default()
                .add(student);
        }
        let targets = target_denominators(dataset, config, path);
        groups
            .into_iter()
            .map(|(key, group)| {
                let (target_students, target_schools) = targets
                    .get(key)
                    .map(|(count, schools)| (*count, schools.len()))
                    .unwrap_or((0, 0));
                let target_schools = if level == DrillLevel::School {
                    usize::from(target_students > 0)
                } else {
                    target_schools
                };
                entity_row(key, &group, level, target_students, target_schools, progressed_for(key))
            })
            .collect()
    };

    let totals = TableTotals::from_rows(&table_rows, subjects);
    DrillTable {
        level,
        path: path.clone(),
        subjects: subjects.to_vec(),
        rows: table_rows,
        totals,
        sort: None,
    }
}

fn entity_row(
    key: &str,
    group: &Group<'_>,
    level: DrillLevel,
    target_students: usize,
    target_schools: usize,
    progressed: BTreeMap<String, usize>,
) -> EntityRow {
    let active = group.students.len();
    let denom = active.max(1) as f64;
    let active_target_students = group.target_students.len();
    let active_target_schools = group.target_schools.len();
    EntityRow {
        active_schools: group.schools.len(),
        active_students: active,
        target_schools,
        target_students,
        active_target_schools,
        active_target_students,
        schools_active_pct: coverage_pct(active_target_schools, target_schools),
        students_active_pct: coverage_pct(active_target_students, target_students),
        sessions_per_student: round2(group.sessions / denom),
        avg_time: round_half_up(group.minutes / denom),
        improvement_pct: pct_num(group.improved as f64, denom),
        pct_of_target: (level == DrillLevel::School).then(|| {
            pct_num(active_target_students as f64, target_students as f64)
        }),
        progressed,
        ..EntityRow::empty(key)
    }
}

fn student_row(
    student: &StudentActivity<'_>,
    progressed: BTreeMap<String, usize>,
    milestones: BTreeMap<String, MilestoneSnapshot>,
) -> EntityRow {
    let record = student.record;
    let delta = student.milestone_delta;
    let milestone = if delta >= 0 {
        format!("Δ +{delta}")
    } else {
        format!("Δ {delta}")
    };
    let target = usize::from(record.target);
    EntityRow {
        active_students: 1,
        active_target_students: target,
        target_students: target,
        active_schools: usize::from(EntityKind::Schools.key_of(record).is_some()),
        sessions_per_student: round2(student.sessions),
        avg_time: round_half_up(student.time_minutes),
        improvement_pct: if delta > 0 { 100 } else { 0 },
        sessions: Some(student.sessions),
        milestone: Some(milestone),
        status: Some(TargetStatus::of(record)),
        progressed,
        milestones,
        ..EntityRow::empty(&record.student_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{day, fact, progress, roster};
    use crate::window::TimeWindow;

    fn sample() -> Dataset {
        Dataset::new(
            vec![
                roster("S1", "School X", "A1", "A", true),
                roster("S2", "School X", "A1", "A", true),
                roster("S3", "School Y", "A2", "A", false),
                roster("S4", "School Z", "B1", "B", true),
                roster("S5", "School Z", "B1", "B", true),
            ],
            vec![
                fact("S1", 12, "Math", 2.0, 30.0),
                progress("S2", 13, "Math", 1, 3),
                progress("S3", 14, "English", 4, 2),
                fact("S4", 15, "Math", 4.0, 45.0),
            ],
        )
    }

    fn table_at(dataset: &Dataset, path: DrillPath) -> DrillTable {
        let config = FilterConfig::default();
        let window = TimeWindow { from: day(10), to: day(16) };
        let rows: Vec<_> = config.facts_in(window).select(dataset).collect();
        let activity = Activity::collect(rows.iter().copied());
        let subjects = dataset.options.subjects_in_view(&config);
        build(dataset, &config, &path, &activity, &rows, &subjects)
    }

    #[test]
    fn district_rows_group_active_students() {
        let dataset = sample();
        let table = table_at(&dataset, DrillPath::District);
        assert_eq!(table.rows.len(), 2);

        let a = &table.rows[0];
        assert_eq!(a.name, "A");
        assert_eq!(a.active_students, 3);
        assert_eq!(a.active_schools, 2);
        assert_eq!(a.target_students, 2);
        assert_eq!(a.target_schools, 1);
        assert_eq!(a.active_target_students, 2);
        assert_eq!(a.students_active_pct, 100);
        // 2 + 1 + 1 sessions over three students.
        assert_eq!(a.sessions_per_student, 1.33);
        assert_eq!(a.avg_time, 17.0);
        assert_eq!(a.improvement_pct, 33);
        assert_eq!(a.progressed.get("Math"), Some(&1));
        assert_eq!(a.progressed.get("English"), Some(&0));

        let b = &table.rows[1];
        assert_eq!(b.target_students, 2);
        assert_eq!(b.active_target_students, 1);
        assert_eq!(b.students_active_pct, 50);

        assert_eq!(table.totals.target_students, 4);
        assert_eq!(table.totals.active_target_students, 3);
        assert_eq!(table.totals.students_active_pct, 75);
    }

    #[test]
    fn school_rows_respect_every_ancestor() {
        let dataset = sample();
        let path = DrillPath::District
            .drill_into(DrillLevel::Mandal, "A")
            .and_then(|p| p.drill_into(DrillLevel::School, "A1"))
            .unwrap();
        let table = table_at(&dataset, path);
        assert_eq!(table.rows.len(), 1);
        let school = &table.rows[0];
        assert_eq!(school.name, "School X");
        assert_eq!(school.target_schools, 1);
        assert_eq!(school.pct_of_target, Some(100));
        assert_eq!(
            table.headers(),
            vec![
                "School Name",
                "Target Students",
                "Active Students",
                "Active/Target Students %",
                "% of Target",
                "Sessions/Student",
                "Avg Time",
                "Progressed English",
                "Progressed Math",
            ]
        );
        assert_eq!(
            table.cells(school),
            vec!["School X", "2", "2", "100%", "100", "1.5", "20 mins", "0", "1"]
        );
    }

    #[test]
    fn student_rows_carry_status_and_snapshots() {
        let dataset = sample();
        let path = DrillPath::Student {
            district: "A".to_string(),
            mandal: "A2".to_string(),
            school: "School Y".to_string(),
        };
        let table = table_at(&dataset, path);
        assert_eq!(table.rows.len(), 1);
        let row = &table.rows[0];
        assert_eq!(row.milestone.as_deref(), Some("Δ -2"));
        assert_eq!(row.improvement_pct, 0);
        assert_eq!(row.status, Some(TargetStatus::NonTarget));
        assert_eq!(
            table.cells(row),
            vec!["S3", "1", "10 mins", "Non-target", "4", "2", "-2", "0", "0", "0"]
        );
        assert_eq!(table.totals_cells()[4..7], ["4", "2", "-2"]);
    }

    #[test]
    fn sorting_toggles_direction() {
        let dataset = sample();
        let mut table = table_at(&dataset, DrillPath::District);
        let sort = TableSort::toggled(None, SortColumn::ActiveStudents);
        assert_eq!(sort.direction, SortDirection::Ascending);
        table.sort_by(sort);
        assert_eq!(table.rows[0].name, "B");

        let again = TableSort::toggled(table.sort, SortColumn::ActiveStudents);
        assert_eq!(again.direction, SortDirection::Descending);
        table.sort_by(again);
        assert_eq!(table.rows[0].name, "A");
    }
}
