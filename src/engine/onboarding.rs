use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::drill::{level_key, DrillLevel, OnboardingDrill};
use crate::filter::{FilterConfig, Scope};
use crate::metrics::pct_num;
use crate::models::{Dataset, Subject};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OnboardingColumn {
    Target,
    TargetOnboarded,
    TargetNotOnboarded,
    NonTargetOnboarded,
    PctTargetOnboarded,
}

impl OnboardingColumn {
    pub fn label(self) -> &'static str {
        match self {
            OnboardingColumn::Target => "Target",
            OnboardingColumn::TargetOnboarded => "Target Onboarded",
            OnboardingColumn::TargetNotOnboarded => "Target Not Onboarded",
            OnboardingColumn::NonTargetOnboarded => "Non-target Onboarded",
            OnboardingColumn::PctTargetOnboarded => "% Target Onboarded",
        }
    }

    fn for_scope(scope: Scope) -> Vec<OnboardingColumn> {
        use OnboardingColumn::*;
        match scope {
            Scope::Target => vec![Target, TargetOnboarded, TargetNotOnboarded, PctTargetOnboarded],
            Scope::NonTarget => vec![NonTargetOnboarded],
            Scope::Both => vec![
                Target,
                TargetOnboarded,
                TargetNotOnboarded,
                NonTargetOnboarded,
                PctTargetOnboarded,
            ],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OnboardingRow {
    pub name: String,
    pub target: usize,
    pub target_onboarded: usize,
    pub target_not_onboarded: usize,
    pub non_target_onboarded: usize,
    pub pct_target_onboarded: i64,
}

impl OnboardingRow {
    pub fn cell(&self, column: OnboardingColumn) -> String {
        match column {
            OnboardingColumn::Target => self.target.to_string(),
            OnboardingColumn::TargetOnboarded => self.target_onboarded.to_string(),
            OnboardingColumn::TargetNotOnboarded => self.target_not_onboarded.to_string(),
            OnboardingColumn::NonTargetOnboarded => self.non_target_onboarded.to_string(),
            OnboardingColumn::PctTargetOnboarded => format!("{}%", self.pct_target_onboarded),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnboardingTable {
    pub subject: String,
    pub level: DrillLevel,
    pub columns: Vec<OnboardingColumn>,
    pub rows: Vec<OnboardingRow>,
}

impl OnboardingTable {
    pub fn headers(&self) -> Vec<String> {
        let level = self.level.label().to_string();
        std::iter::once(level)
            .chain(self.columns.iter().map(|c| c.label().to_string()))
            .collect()
    }
}

/// Onboarding status of one subject by geography, all time.
///
/// A student is onboarded for the subject once any fact for it exists.
/// Scope only chooses which columns are shown.
pub fn onboarding_table(
    dataset: &Dataset,
    config: &FilterConfig,
    drill: &OnboardingDrill,
) -> OnboardingTable {
    let subject = Subject::normalize(&drill.subject).label().to_string();
    let level = drill.path.level();

    let onboarded: BTreeSet<&str> = dataset
        .joined_facts()
        .filter(|(fact, ro)| {
            fact.subject.label() == subject && config.roster_passes_ignoring_scope(ro)
        })
        .map(|(_, ro)| ro.student_id.as_str())
        .collect();

    let mut groups: BTreeMap<&str, OnboardingRow> = BTreeMap::new();
    for record in dataset
        .roster
        .iter()
        .filter(|ro| config.roster_passes_ignoring_scope(ro) && drill.path.admits(ro))
    {
        let key = level_key(level, record);
        let row = groups.entry(key).or_insert_with(|| OnboardingRow {
            name: key.to_string(),
            ..OnboardingRow::default()
        });
        let is_onboarded = onboarded.contains(record.student_id.as_str());
        match (record.target, is_onboarded) {
            (true, true) => row.target_onboarded += 1,
            (true, false) => row.target_not_onboarded += 1,
            (false, true) => row.non_target_onboarded += 1,
            (false, false) => {}
        }
    }

    let mut rows: Vec<OnboardingRow> = groups
        .into_values()
        .map(|mut row| {
            row.target = row.target_onboarded + row.target_not_onboarded;
            row.pct_target_onboarded = pct_num(row.target_onboarded as f64, row.target as f64);
            row
        })
        .collect();
    rows.sort_by_key(|row| (Reverse(row.target_onboarded), row.name.clone()));

    OnboardingTable {
        subject,
        level,
        columns: OnboardingColumn::for_scope(config.scope),
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fact, roster};

    fn sample() -> Dataset {
        Dataset::new(
            vec![
                roster("S1", "SC1", "A1", "A", true),
                roster("S2", "SC1", "A1", "A", true),
                roster("S3", "SC2", "A2", "A", false),
                roster("S4", "SC3", "B1", "B", true),
                roster("S5", "SC3", "B1", "B", true),
            ],
            vec![
                fact("S1", 1, "Math", 1.0, 5.0),
                fact("S3", 2, "mathematics", 1.0, 5.0),
                fact("S4", 3, "Math", 0.0, 0.0),
                fact("S5", 3, "Math", 1.0, 5.0),
                fact("S2", 3, "English", 1.0, 5.0),
            ],
        )
    }

    #[test]
    fn counts_onboarding_per_district() {
        let dataset = sample();
        let table = onboarding_table(&dataset, &FilterConfig::default(), &OnboardingDrill::open("math"));
        assert_eq!(table.subject, "Math");
        assert_eq!(table.columns.len(), 5);
        let names: Vec<&str> = table.rows.iter().map(|r| r.name.as_str()).collect();
        // B onboarded two target students, A only one.
        assert_eq!(names, vec!["B", "A"]);
        let a = &table.rows[1];
        assert_eq!(
            (a.target, a.target_onboarded, a.target_not_onboarded, a.non_target_onboarded),
            (2, 1, 1, 1)
        );
        assert_eq!(a.cell(OnboardingColumn::PctTargetOnboarded), "50%");
        assert_eq!(table.rows[0].pct_target_onboarded, 100);
    }

    #[test]
    fn drilled_rows_stay_under_the_path() {
        let dataset = sample();
        let drill = OnboardingDrill::open("Math")
            .drill_into(DrillLevel::Mandal, "A")
            .unwrap();
        let config = FilterConfig { scope: Scope::NonTarget, ..FilterConfig::default() };
        let table = onboarding_table(&dataset, &config, &drill);
        assert_eq!(table.headers(), vec!["Mandal", "Non-target Onboarded"]);
        let names: Vec<&str> = table.rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["A1", "A2"]);
        assert_eq!(table.rows[1].non_target_onboarded, 1);
    }
}
