use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::NaiveDate;

use crate::filter::FilterOptions;

/// One student of the program roster.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterRecord {
    pub student_id: String,
    pub school_id: String,
    pub school_name: String,
    pub mandal: String,
    pub district: String,
    pub grade: String,
    pub target: bool,
    /// Columns outside the known roster schema, keyed by their header text.
    pub extra: BTreeMap<String, String>,
}

/// One engagement observation for a (student, date, subject) triple.
///
/// The same triple may appear more than once; values accumulate.
#[derive(Debug, Clone, PartialEq)]
pub struct FactRecord {
    pub date: NaiveDate,
    pub student_id: String,
    pub subject: Subject,
    pub sessions: f64,
    pub time_minutes: f64,
    pub diagnostics_completed: f64,
    pub start_milestone: i64,
    pub current_milestone: i64,
    pub extra: BTreeMap<String, String>,
}

impl FactRecord {
    /// A row counts towards activity when any session or any minute was logged.
    pub fn is_engaged(&self) -> bool {
        self.sessions > 0.0 || self.time_minutes > 0.0
    }

    pub fn milestone_delta(&self) -> i64 {
        self.current_milestone - self.start_milestone
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subject {
    Math,
    English,
    Telugu,
    Other(String),
}

impl Subject {
    /// Maps free-text subject names onto the program's subjects by
    /// case-insensitive prefix; anything else passes through as written.
    pub fn normalize(raw: &str) -> Subject {
        let trimmed = raw.trim();
        let lower = trimmed.to_lowercase();
        if lower.starts_with("math") {
            Subject::Math
        } else if lower.starts_with("eng") {
            Subject::English
        } else if lower.starts_with("tel") {
            Subject::Telugu
        } else {
            Subject::Other(trimmed.to_string())
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Subject::Math => "Math",
            Subject::English => "English",
            Subject::Telugu => "Telugu",
            Subject::Other(name) => name,
        }
    }

    /// Case-insensitive prefix match of the normalized label against a
    /// user-selected subject name.
    pub fn matches(&self, selected: &str) -> bool {
        self.label()
            .to_lowercase()
            .starts_with(&selected.trim().to_lowercase())
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The two joined tables plus everything derived from them once at load.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub roster: Vec<RosterRecord>,
    pub facts: Vec<FactRecord>,
    pub options: FilterOptions,
    by_student: HashMap<String, usize>,
}

impl Dataset {
    pub fn new(roster: Vec<RosterRecord>, facts: Vec<FactRecord>) -> Self {
        let by_student = roster
            .iter()
            .enumerate()
            .map(|(idx, record)| (record.student_id.clone(), idx))
            .collect();
        let options = FilterOptions::discover(&roster, &facts);
        Self {
            roster,
            facts,
            options,
            by_student,
        }
    }

    pub fn student(&self, student_id: &str) -> Option<&RosterRecord> {
        self.by_student
            .get(student_id)
            .and_then(|idx| self.roster.get(*idx))
    }

    /// Facts paired with their roster record; orphaned facts are skipped.
    pub fn joined_facts(&self) -> impl Iterator<Item = (&FactRecord, &RosterRecord)> + '_ {
        self.facts
            .iter()
            .filter_map(|fact| self.student(&fact.student_id).map(|ro| (fact, ro)))
    }
}
