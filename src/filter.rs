use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Dataset, FactRecord, RosterRecord, Subject};
use crate::window::{anchor_date, resolve, DateRange, QuickRange, TimeWindow};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    Target,
    NonTarget,
    #[default]
    Both,
}

impl Scope {
    pub fn admits(self, target: bool) -> bool {
        match self {
            Scope::Target => target,
            Scope::NonTarget => !target,
            Scope::Both => true,
        }
    }

    pub fn wants_target(self) -> bool {
        self != Scope::NonTarget
    }

    pub fn wants_non_target(self) -> bool {
        self != Scope::Target
    }
}

/// Direction of a student's summed in-window milestone delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ImprovementStatus {
    Improved,
    Declined,
    NoChange,
}

impl ImprovementStatus {
    pub fn of(delta: i64) -> Self {
        match delta {
            d if d > 0 => ImprovementStatus::Improved,
            d if d < 0 => ImprovementStatus::Declined,
            _ => ImprovementStatus::NoChange,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ImprovementStatus::Improved => "Improved",
            ImprovementStatus::Declined => "Declined",
            ImprovementStatus::NoChange => "No change",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionField {
    Districts,
    Mandals,
    Schools,
    Subjects,
    Classes,
}

/// The current query. Rebuilt, never patched, on every edit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub quick: Option<QuickRange>,
    pub range: DateRange,
    pub scope: Scope,
    pub districts: BTreeSet<String>,
    pub mandals: BTreeSet<String>,
    pub schools: BTreeSet<String>,
    pub subjects: BTreeSet<String>,
    pub classes: BTreeSet<String>,
    pub improvement: BTreeSet<ImprovementStatus>,
}

impl FilterConfig {
    pub fn selection(&self, field: SelectionField) -> &BTreeSet<String> {
        match field {
            SelectionField::Districts => &self.districts,
            SelectionField::Mandals => &self.mandals,
            SelectionField::Schools => &self.schools,
            SelectionField::Subjects => &self.subjects,
            SelectionField::Classes => &self.classes,
        }
    }

    pub fn with_selection<I>(&self, field: SelectionField, values: I) -> FilterConfig
    where
        I: IntoIterator<Item = String>,
    {
        let mut next = self.clone();
        let values: BTreeSet<String> = values.into_iter().collect();
        match field {
            SelectionField::Districts => next.districts = values,
            SelectionField::Mandals => next.mandals = values,
            SelectionField::Schools => next.schools = values,
            SelectionField::Subjects => next.subjects = values,
            SelectionField::Classes => next.classes = values,
        }
        next
    }

    /// The same query narrowed to one subject.
    pub fn for_subject(&self, subject: &str) -> FilterConfig {
        self.with_selection(SelectionField::Subjects, [subject.to_string()])
    }

    /// Geography cascade and class only.
    pub fn roster_passes_ignoring_scope(&self, record: &RosterRecord) -> bool {
        if !self.classes.is_empty() && !self.classes.contains(&record.grade) {
            return false;
        }
        if !self.schools.is_empty() {
            self.schools.contains(&record.school_name)
        } else if !self.mandals.is_empty() {
            self.mandals.contains(&record.mandal)
        } else if !self.districts.is_empty() {
            self.districts.contains(&record.district)
        } else {
            true
        }
    }

    pub fn roster_passes(&self, record: &RosterRecord) -> bool {
        self.roster_passes_ignoring_scope(record) && self.scope.admits(record.target)
    }

    pub fn subject_selected(&self, subject: &Subject) -> bool {
        self.subjects.is_empty() || self.subjects.iter().any(|s| subject.matches(s))
    }

    /// Window this query covers, anchored on the latest fact date.
    pub fn window(&self, facts: &[FactRecord]) -> Result<TimeWindow> {
        resolve(self.quick, self.range, anchor_date(facts))
    }

    pub fn facts_in(&self, window: TimeWindow) -> FactPredicate<'_> {
        FactPredicate {
            config: self,
            window: Some(window),
            scoped: true,
        }
    }

    pub fn facts_all_time(&self) -> FactPredicate<'_> {
        FactPredicate {
            config: self,
            window: None,
            scoped: true,
        }
    }

    /// Students whose milestone delta summed over `rows` carries a selected
    /// improvement status. `None` when no status is selected.
    pub fn improvement_keep<'d, I>(&self, rows: I) -> Option<BTreeSet<&'d str>>
    where
        I: IntoIterator<Item = (&'d FactRecord, &'d RosterRecord)>,
    {
        if self.improvement.is_empty() {
            return None;
        }
        let mut deltas: BTreeMap<&'d str, i64> = BTreeMap::new();
        for (fact, _) in rows {
            *deltas.entry(fact.student_id.as_str()).or_insert(0) += fact.milestone_delta();
        }
        let keep = deltas
            .into_iter()
            .filter(|(_, delta)| self.improvement.contains(&ImprovementStatus::of(*delta)))
            .map(|(student, _)| student)
            .collect();
        Some(keep)
    }

    /// Drops window rows of students outside the improvement selection.
    pub fn retain_improvement<'d>(&self, rows: &mut Vec<(&'d FactRecord, &'d RosterRecord)>) {
        if let Some(keep) = self.improvement_keep(rows.iter().copied()) {
            rows.retain(|(fact, _)| keep.contains(fact.student_id.as_str()));
        }
    }

    /// Human-readable labels for the active selections.
    pub fn chips(&self) -> Vec<String> {
        let mut chips = Vec::new();
        if let Some(quick) = self.quick {
            chips.push(format!("Time: {}", quick.label()));
        }
        if !self.range.is_empty() {
            let show = |d: Option<chrono::NaiveDate>| d.map(|d| d.to_string()).unwrap_or_else(|| "…".to_string());
            chips.push(format!("Range: {} → {}", show(self.range.from), show(self.range.to)));
        }
        let labelled = [
            ("District", &self.districts),
            ("Mandal", &self.mandals),
            ("School", &self.schools),
            ("Subject", &self.subjects),
            ("Class", &self.classes),
        ];
        for (label, values) in labelled {
            chips.extend(values.iter().map(|v| format!("{label}: {v}")));
        }
        chips.extend(
            self.improvement
                .iter()
                .map(|status| format!("Improvement: {}", status.label())),
        );
        chips
    }

    /// Drops `value` from every selection it appears in.
    pub fn without_chip(&self, value: &str) -> FilterConfig {
        let mut next = self.clone();
        for set in [
            &mut next.districts,
            &mut next.mandals,
            &mut next.schools,
            &mut next.subjects,
            &mut next.classes,
        ] {
            set.remove(value);
        }
        if next.quick.map(QuickRange::label) == Some(value) {
            next.quick = None;
        }
        next.improvement.retain(|status| status.label() != value);
        next
    }

    /// Keeps the scope, resets every other selection.
    pub fn cleared(&self) -> FilterConfig {
        FilterConfig {
            scope: self.scope,
            ..FilterConfig::default()
        }
    }
}

/// Test over fact rows: roster join, roster predicate, optional time window
/// and subject selection.
#[derive(Debug, Clone, Copy)]
pub struct FactPredicate<'a> {
    config: &'a FilterConfig,
    window: Option<TimeWindow>,
    scoped: bool,
}

impl<'a> FactPredicate<'a> {
    pub fn ignoring_scope(self) -> Self {
        Self {
            scoped: false,
            ..self
        }
    }

    pub fn passes_with(&self, fact: &FactRecord, roster: &RosterRecord) -> bool {
        if let Some(window) = self.window {
            if !window.contains(fact.date) {
                return false;
            }
        }
        let roster_ok = if self.scoped {
            self.config.roster_passes(roster)
        } else {
            self.config.roster_passes_ignoring_scope(roster)
        };
        roster_ok && self.config.subject_selected(&fact.subject)
    }

    pub fn passes(&self, fact: &FactRecord, dataset: &Dataset) -> bool {
        dataset
            .student(&fact.student_id)
            .is_some_and(|ro| self.passes_with(fact, ro))
    }

    pub fn select<'d>(
        self,
        dataset: &'d Dataset,
    ) -> impl Iterator<Item = (&'d FactRecord, &'d RosterRecord)> + 'd
    where
        'a: 'd,
    {
        dataset
            .joined_facts()
            .filter(move |(fact, ro)| self.passes_with(fact, ro))
    }
}

/// Filter choices discovered from the loaded data.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterOptions {
    pub districts: Vec<String>,
    pub mandals_by_district: BTreeMap<String, Vec<String>>,
    pub schools_by_mandal: BTreeMap<String, Vec<String>>,
    pub subjects: Vec<String>,
    pub classes: Vec<String>,
}

impl FilterOptions {
    pub fn discover(roster: &[RosterRecord], facts: &[FactRecord]) -> Self {
        let mut districts = BTreeSet::new();
        let mut mandals: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut schools: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut classes = BTreeSet::new();

        for ro in roster {
            if !ro.district.is_empty() {
                districts.insert(ro.district.clone());
            }
            if !ro.mandal.is_empty() {
                mandals
                    .entry(ro.district.clone())
                    .or_default()
                    .insert(ro.mandal.clone());
            }
            if !ro.school_name.is_empty() {
                schools
                    .entry(ro.mandal.clone())
                    .or_default()
                    .insert(ro.school_name.clone());
            }
            if !ro.grade.is_empty() {
                classes.insert(ro.grade.clone());
            }
        }

        let subjects: BTreeSet<String> = facts
            .iter()
            .map(|f| f.subject.label())
            .filter(|label| !label.is_empty())
            .map(str::to_string)
            .collect();

        let flatten = |map: BTreeMap<String, BTreeSet<String>>| {
            map.into_iter()
                .map(|(k, v)| (k, v.into_iter().collect()))
                .collect()
        };

        Self {
            districts: districts.into_iter().collect(),
            mandals_by_district: flatten(mandals),
            schools_by_mandal: flatten(schools),
            subjects: subjects.into_iter().collect(),
            classes: classes.into_iter().collect(),
        }
    }

    /// Mandals offered for the selected districts; every mandal when none
    /// are selected.
    pub fn mandals_for(&self, districts: &BTreeSet<String>) -> Vec<String> {
        let chosen: Vec<&String> = if districts.is_empty() {
            self.districts.iter().collect()
        } else {
            districts.iter().collect()
        };
        let set: BTreeSet<String> = chosen
            .into_iter()
            .filter_map(|d| self.mandals_by_district.get(d))
            .flatten()
            .cloned()
            .collect();
        set.into_iter().collect()
    }

    pub fn schools_for(&self, mandals: &BTreeSet<String>, districts: &BTreeSet<String>) -> Vec<String> {
        let chosen: Vec<String> = if mandals.is_empty() {
            self.mandals_for(districts)
        } else {
            mandals.iter().cloned().collect()
        };
        let set: BTreeSet<String> = chosen
            .iter()
            .filter_map(|m| self.schools_by_mandal.get(m))
            .flatten()
            .cloned()
            .collect();
        set.into_iter().collect()
    }

    /// Selected subjects when any are chosen, otherwise every known subject.
    pub fn subjects_in_view(&self, config: &FilterConfig) -> Vec<String> {
        if config.subjects.is_empty() {
            self.subjects.clone()
        } else {
            let set: BTreeSet<String> = config
                .subjects
                .iter()
                .map(|s| Subject::normalize(s).label().to_string())
                .collect();
            set.into_iter().collect()
        }
    }
}
