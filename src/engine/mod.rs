//! Derived dashboard state. Everything here is a pure function of the loaded
//! dataset, the filter configuration and the drill position.

pub mod activity;
pub mod coverage;
pub mod explorer;
pub mod funnel;
pub mod kpi;
pub mod milestones;
pub mod onboarding;
pub mod table;
pub mod trends;

use std::time::Instant;

use serde::Serialize;
use tracing::debug;

use crate::drill::DrillPath;
use crate::error::Result;
use crate::filter::FilterConfig;
use crate::models::{Dataset, FactRecord, RosterRecord};
use crate::window::TimeWindow;
use activity::Activity;
use coverage::Coverage;
use funnel::FunnelStage;
use kpi::Kpi;
use milestones::MilestoneDistribution;
use table::DrillTable;
use trends::TrendCard;

/// Cards, donuts, trends and funnel for one filter configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub kpis: Vec<Kpi>,
    pub coverage: Coverage,
    pub trend_cards: Vec<TrendCard>,
    pub funnel: Vec<FunnelStage>,
}

/// The same summary narrowed to a single subject.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectBreakdown {
    pub subject: String,
    #[serde(flatten)]
    pub summary: Summary,
}

/// Filter values currently offered, cascaded through the selections above
/// them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OfferedOptions {
    pub districts: Vec<String>,
    pub mandals: Vec<String>,
    pub schools: Vec<String>,
    pub subjects: Vec<String>,
    pub classes: Vec<String>,
}

impl OfferedOptions {
    fn of(dataset: &Dataset, config: &FilterConfig) -> Self {
        let options = &dataset.options;
        Self {
            districts: options.districts.clone(),
            mandals: options.mandals_for(&config.districts),
            schools: options.schools_for(&config.mandals, &config.districts),
            subjects: options.subjects.clone(),
            classes: options.classes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedView {
    pub window: TimeWindow,
    pub previous_window: TimeWindow,
    #[serde(flatten)]
    pub summary: Summary,
    pub table: DrillTable,
    pub milestones: Vec<MilestoneDistribution>,
    pub subjects: Vec<SubjectBreakdown>,
    pub options: OfferedOptions,
    pub chips: Vec<String>,
}

type Joined<'d> = (&'d FactRecord, &'d RosterRecord);

fn summarize<'d>(
    dataset: &'d Dataset,
    config: &FilterConfig,
    window: TimeWindow,
    previous_window: TimeWindow,
    rows: &[Joined<'d>],
) -> Result<(Summary, Activity<'d>)> {
    let current = Activity::collect(rows.iter().copied());
    let previous = Activity::collect(config.facts_in(previous_window).select(dataset));
    let all_time = Activity::collect(config.facts_all_time().select(dataset));

    let summary = Summary {
        kpis: kpi::compute(dataset, config, &current, &previous),
        coverage: coverage::compute(dataset, config, &current),
        trend_cards: trends::compute(window, rows.iter().copied())?,
        funnel: funnel::compute(dataset, config, &current, &all_time),
    };
    Ok((summary, current))
}

/// Recomputes every derived value from scratch.
///
/// Fails only when window arithmetic leaves the calendar; callers keep their
/// previous view in that case. Crossed explicit bounds give an empty view.
pub fn recompute(dataset: &Dataset, filters: &FilterConfig, drill: &DrillPath) -> Result<DerivedView> {
    let started = Instant::now();
    let window = filters.window(&dataset.facts)?;
    let previous_window = window.previous()?;

    let mut rows: Vec<Joined<'_>> = filters.facts_in(window).select(dataset).collect();
    filters.retain_improvement(&mut rows);
    let (summary, activity) = summarize(dataset, filters, window, previous_window, &rows)?;

    let subject_labels = dataset.options.subjects_in_view(filters);
    let table = table::build(dataset, filters, drill, &activity, &rows, &subject_labels);
    let milestones = milestones::distributions(&subject_labels, rows.iter().map(|(fact, _)| *fact));

    let mut subjects = Vec::with_capacity(subject_labels.len());
    for subject in &subject_labels {
        let narrowed = filters.for_subject(subject);
        let mut subject_rows: Vec<Joined<'_>> = narrowed.facts_in(window).select(dataset).collect();
        narrowed.retain_improvement(&mut subject_rows);
        let (summary, _) = summarize(dataset, &narrowed, window, previous_window, &subject_rows)?;
        subjects.push(SubjectBreakdown {
            subject: subject.clone(),
            summary,
        });
    }

    debug!(
        from = %window.from,
        to = %window.to,
        empty = window.is_empty(),
        facts = rows.len(),
        level = %drill.level(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "recomputed dashboard view"
    );

    Ok(DerivedView {
        window,
        previous_window,
        summary,
        table,
        milestones,
        subjects,
        options: OfferedOptions::of(dataset, filters),
        chips: filters.chips(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drill::DrillLevel;
    use crate::filter::{ImprovementStatus, Scope};
    use crate::testing::{day, fact, progress, roster};
    use crate::window::{DateRange, QuickRange};

    fn sample() -> Dataset {
        Dataset::new(
            vec![
                roster("S1", "SC1", "A1", "A", true),
                roster("S2", "SC1", "A1", "A", false),
                roster("S3", "SC2", "A2", "A", true),
                roster("S4", "SC3", "B1", "B", true),
                roster("S5", "SC3", "B1", "B", false),
            ],
            vec![
                fact("S1", 16, "Math", 2.0, 40.0),
                progress("S2", 15, "English", 1, 2),
                fact("S3", 11, "Math", 1.0, 15.0),
                fact("S4", 1, "Math", 1.0, 20.0),
                fact("S5", 20, "English", 1.0, 10.0),
                fact("S1", 20, "English", 0.0, 0.0),
            ],
        )
    }

    fn active_students(view: &DerivedView) -> f64 {
        view.summary.kpis[0].value
    }

    #[test]
    fn recompute_is_idempotent() {
        let dataset = sample();
        let config = FilterConfig::default();
        let first = recompute(&dataset, &config, &DrillPath::District).unwrap();
        let second = recompute(&dataset, &config, &DrillPath::District).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn target_and_non_target_partition_both() {
        let dataset = sample();
        let with = |scope| {
            let config = FilterConfig { scope, ..FilterConfig::default() };
            active_students(&recompute(&dataset, &config, &DrillPath::District).unwrap())
        };
        assert_eq!(with(Scope::Both), with(Scope::Target) + with(Scope::NonTarget));
    }

    #[test]
    fn longer_windows_never_lose_activity() {
        let dataset = sample();
        let week = FilterConfig { quick: Some(QuickRange::Last7Days), ..FilterConfig::default() };
        let month = FilterConfig { quick: Some(QuickRange::Last30Days), ..FilterConfig::default() };
        let week_view = recompute(&dataset, &week, &DrillPath::District).unwrap();
        let month_view = recompute(&dataset, &month, &DrillPath::District).unwrap();
        assert_eq!(week_view.window.from, day(14));
        assert!(active_students(&month_view) >= active_students(&week_view));
        assert_eq!(active_students(&month_view), 5.0);
    }

    #[test]
    fn mandal_rows_add_up_to_their_district() {
        let dataset = sample();
        let config = FilterConfig { quick: Some(QuickRange::Last30Days), ..FilterConfig::default() };
        let districts = recompute(&dataset, &config, &DrillPath::District).unwrap();
        let district_a = districts
            .table
            .rows
            .iter()
            .find(|row| row.name == "A")
            .unwrap();

        let path = DrillPath::District.drill_into(DrillLevel::Mandal, "A").unwrap();
        let mandals = recompute(&dataset, &config, &path).unwrap();
        let summed: usize = mandals.table.rows.iter().map(|row| row.active_students).sum();
        assert_eq!(summed, district_a.active_students);
        assert_eq!(summed, 3);
    }

    #[test]
    fn inverted_range_gives_an_empty_view() {
        let dataset = sample();
        let config = FilterConfig {
            range: DateRange { from: Some(day(18)), to: Some(day(12)) },
            ..FilterConfig::default()
        };
        let view = recompute(&dataset, &config, &DrillPath::District).unwrap();
        assert!(view.window.is_empty());
        assert_eq!(active_students(&view), 0.0);
        assert!(view.table.rows.is_empty());
        assert_eq!(view.summary.funnel[0].value, 5);
        assert_eq!(view.summary.funnel[1].value, 0);
    }

    #[test]
    fn blank_geography_drills_through_unknown() {
        let dataset = Dataset::new(
            vec![roster("S1", "SC1", "M1", "", true), roster("S2", "SC2", "", "", false)],
            vec![fact("S1", 16, "Math", 1.0, 10.0), fact("S2", 16, "Math", 1.0, 10.0)],
        );
        let config = FilterConfig::default();
        let districts = recompute(&dataset, &config, &DrillPath::District).unwrap();
        let names: Vec<&str> = districts.table.rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Unknown"]);

        let path = DrillPath::District.drill_into(DrillLevel::Mandal, "Unknown").unwrap();
        let mandals = recompute(&dataset, &config, &path).unwrap();
        let names: Vec<&str> = mandals.table.rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["M1", "Unknown"]);
        let summed: usize = mandals.table.rows.iter().map(|r| r.active_students).sum();
        assert_eq!(summed, districts.table.rows[0].active_students);

        let path = path.drill_into(DrillLevel::School, "Unknown").unwrap();
        let schools = recompute(&dataset, &config, &path).unwrap();
        let names: Vec<&str> = schools.table.rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["SC2"]);
    }

    #[test]
    fn improvement_selection_narrows_the_window_facts() {
        let dataset = Dataset::new(
            vec![
                roster("S1", "SC1", "A1", "A", true),
                roster("S2", "SC1", "A1", "A", true),
                roster("S3", "SC2", "A2", "A", true),
            ],
            vec![
                progress("S1", 16, "Math", 1, 2),
                progress("S2", 16, "Math", 3, 2),
                progress("S3", 16, "Math", 2, 2),
            ],
        );
        let active_for = |status: ImprovementStatus| {
            let config = FilterConfig {
                improvement: [status].into_iter().collect(),
                ..FilterConfig::default()
            };
            let view = recompute(&dataset, &config, &DrillPath::District).unwrap();
            assert_eq!(view.chips, vec![format!("Improvement: {}", status.label())]);
            active_students(&view)
        };
        assert_eq!(active_for(ImprovementStatus::Improved), 1.0);
        assert_eq!(active_for(ImprovementStatus::Declined), 1.0);
        assert_eq!(active_for(ImprovementStatus::NoChange), 1.0);

        let config = FilterConfig {
            improvement: [ImprovementStatus::Improved, ImprovementStatus::NoChange]
                .into_iter()
                .collect(),
            ..FilterConfig::default()
        };
        let view = recompute(&dataset, &config, &DrillPath::District).unwrap();
        assert_eq!(active_students(&view), 2.0);
        let names: Vec<&str> = view.table.rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["A"]);
        assert_eq!(view.table.rows[0].active_students, 2);
    }

    #[test]
    fn two_student_scenario() {
        let mut s1 = roster("S1", "School X", "A1", "A", true);
        let mut s2 = roster("S2", "School X", "A1", "A", false);
        s1.grade = "3".to_string();
        s2.grade = "3".to_string();
        let s1_math = FactRecord {
            start_milestone: 1,
            current_milestone: 2,
            ..fact("S1", 16, "Math", 2.0, 50.0)
        };
        let dataset = Dataset::new(vec![s1, s2], vec![s1_math]);
        let view = recompute(&dataset, &FilterConfig::default(), &DrillPath::District).unwrap();

        let values: Vec<f64> = view.summary.kpis.iter().take(3).map(|k| k.value).collect();
        assert_eq!(values, vec![1.0, 1.0, 1.0]);

        let students = view.summary.coverage.students;
        assert_eq!(
            (students.green, students.amber, students.grey, students.blue),
            (1, 0, 0, 1)
        );

        assert_eq!(view.summary.funnel[0].value, 2);
        assert_eq!(view.summary.funnel[0].pct, 100);
        assert_eq!(view.summary.funnel[1].value, 1);
        assert_eq!(view.summary.funnel[1].pct, 50);

        assert_eq!(view.subjects.len(), 1);
        assert_eq!(view.subjects[0].subject, "Math");
        assert_eq!(view.milestones[0].progressed, 1);
    }
}
