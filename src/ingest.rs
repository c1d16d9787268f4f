use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::error::{DashboardError, Result};
use crate::models::{Dataset, FactRecord, RosterRecord, Subject};

const ROSTER_COLUMNS: [&str; 7] = [
    "StudentID",
    "SchoolID",
    "SchoolName",
    "Mandal",
    "District",
    "Grade",
    "TargetFlag",
];

const FACT_COLUMNS: [&str; 8] = [
    "Date",
    "StudentID",
    "Subject",
    "Sessions",
    "TimeMinutes",
    "DiagnosticsCompleted",
    "StartMilestone",
    "CurrentMilestone",
];

/// A header row plus data rows, exactly as read from a CSV file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Reads CSV text permissively: quoted fields may hold commas, newlines and
/// doubled quotes, rows may be ragged, and rows with only blank cells are
/// dropped. Unreadable records are skipped instead of failing the load.
pub fn parse_table(text: &str) -> RawTable {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut records: Vec<Vec<String>> = Vec::new();
    for (line, result) in reader.records().enumerate() {
        match result {
            Ok(record) => records.push(record.iter().map(str::to_string).collect()),
            Err(err) => warn!(line, %err, "skipping unreadable CSV record"),
        }
    }

    let mut records = records.into_iter();
    let Some(header_row) = records.next() else {
        return RawTable::default();
    };

    let headers = header_row
        .into_iter()
        .enumerate()
        .map(|(idx, h)| if h.is_empty() { format!("col{idx}") } else { h })
        .collect();
    let rows = records
        .filter(|row| row.iter().any(|cell| !cell.is_empty()))
        .collect();

    RawTable { headers, rows }
}

/// Load-time projection from header names onto column positions.
struct ColumnMap {
    known: HashMap<&'static str, usize>,
    extra: Vec<(usize, String)>,
}

impl ColumnMap {
    fn resolve(headers: &[String], expected: &[&'static str]) -> Self {
        let mut known = HashMap::new();
        for name in expected {
            if let Some(idx) = headers.iter().position(|h| h.eq_ignore_ascii_case(name)) {
                known.insert(*name, idx);
            }
        }
        let extra = headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| !known.values().any(|k| k == idx))
            .map(|(idx, h)| (idx, h.clone()))
            .collect();
        Self { known, extra }
    }

    fn get<'r>(&self, row: &'r [String], name: &str) -> &'r str {
        self.known
            .get(name)
            .and_then(|idx| row.get(*idx))
            .map(String::as_str)
            .unwrap_or("")
    }

    fn extra_fields(&self, row: &[String]) -> BTreeMap<String, String> {
        self.extra
            .iter()
            .map(|(idx, header)| (header.clone(), row.get(*idx).cloned().unwrap_or_default()))
            .collect()
    }
}

pub fn project_roster(table: &RawTable) -> Vec<RosterRecord> {
    let columns = ColumnMap::resolve(&table.headers, &ROSTER_COLUMNS);
    let mut records: Vec<RosterRecord> = Vec::new();
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut duplicates = 0usize;

    for row in &table.rows {
        let student_id = columns.get(row, "StudentID");
        if student_id.is_empty() {
            continue;
        }
        let record = RosterRecord {
            student_id: student_id.to_string(),
            school_id: columns.get(row, "SchoolID").to_string(),
            school_name: columns.get(row, "SchoolName").to_string(),
            mandal: columns.get(row, "Mandal").to_string(),
            district: columns.get(row, "District").to_string(),
            grade: columns.get(row, "Grade").to_string(),
            target: parse_flag(columns.get(row, "TargetFlag")),
            extra: columns.extra_fields(row),
        };
        // Later rows win for a repeated student id.
        if let Some(idx) = position.get(student_id) {
            records[*idx] = record;
            duplicates += 1;
        } else {
            position.insert(record.student_id.clone(), records.len());
            records.push(record);
        }
    }

    if duplicates > 0 {
        warn!(duplicates, "roster contains repeated student ids; kept the last row of each");
    }
    records
}

pub fn project_facts(table: &RawTable) -> Vec<FactRecord> {
    let columns = ColumnMap::resolve(&table.headers, &FACT_COLUMNS);
    let mut skipped = 0usize;

    let facts: Vec<FactRecord> = table
        .rows
        .iter()
        .filter_map(|row| {
            let student_id = columns.get(row, "StudentID");
            let date = parse_date(columns.get(row, "Date"));
            let (false, Some(date)) = (student_id.is_empty(), date) else {
                skipped += 1;
                return None;
            };
            Some(FactRecord {
                date,
                student_id: student_id.to_string(),
                subject: Subject::normalize(columns.get(row, "Subject")),
                sessions: parse_number(columns.get(row, "Sessions")),
                time_minutes: parse_number(columns.get(row, "TimeMinutes")),
                diagnostics_completed: parse_number(columns.get(row, "DiagnosticsCompleted")),
                start_milestone: parse_milestone(columns.get(row, "StartMilestone")),
                current_milestone: parse_milestone(columns.get(row, "CurrentMilestone")),
                extra: columns.extra_fields(row),
            })
        })
        .collect();

    if skipped > 0 {
        warn!(skipped, "dropped fact rows without a student id or a readable date");
    }
    facts
}

/// Projects both raw tables into typed records and joins them.
pub fn load(roster: &RawTable, facts: &RawTable) -> Dataset {
    let roster = project_roster(roster);
    let facts = project_facts(facts);
    debug!(students = roster.len(), facts = facts.len(), "dataset loaded");
    Dataset::new(roster, facts)
}

pub fn load_str(roster_csv: &str, facts_csv: &str) -> Dataset {
    load(&parse_table(roster_csv), &parse_table(facts_csv))
}

/// Reads both files concurrently, then parses them. Both paths are required;
/// nothing is computed when either is missing.
pub async fn load_files(roster: Option<&Path>, facts: Option<&Path>) -> Result<Dataset> {
    let roster = roster.ok_or(DashboardError::MissingInput { kind: "roster" })?;
    let facts = facts.ok_or(DashboardError::MissingInput { kind: "facts" })?;

    let (roster_text, facts_text) = tokio::try_join!(
        tokio::fs::read_to_string(roster),
        tokio::fs::read_to_string(facts),
    )?;

    Ok(load_str(&roster_text, &facts_text))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y"
    )
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

fn parse_number(value: &str) -> f64 {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

fn parse_milestone(value: &str) -> i64 {
    value
        .parse::<i64>()
        .unwrap_or_else(|_| parse_number(value).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn quoted_fields_keep_commas_and_doubled_quotes() {
        let table = parse_table(
            "StudentID,SchoolName\r\nS1,\"Cho,Reddy\"\"School\"\"\"\r\n",
        );
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0][1], "Cho,Reddy\"School\"");
    }

    #[test]
    fn quoted_fields_may_span_lines() {
        let table = parse_table("a,b\n1,\"two\nlines\"\n");
        assert_eq!(table.rows, vec![vec!["1".to_string(), "two\nlines".to_string()]]);
    }

    #[test]
    fn blank_rows_are_dropped_and_blank_headers_named() {
        let table = parse_table("StudentID,,Grade\n\n , ,\nS1,x,3\n");
        assert_eq!(table.headers, vec!["StudentID", "col1", "Grade"]);
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn header_matching_ignores_case_and_keeps_unknown_columns() {
        let table = parse_table(
            "studentid,SCHOOLNAME,district,targetflag,Notes\nS1,School X,A,1,keep me\n",
        );
        let roster = project_roster(&table);
        assert_eq!(roster.len(), 1);
        let record = &roster[0];
        assert_eq!(record.school_name, "School X");
        assert_eq!(record.district, "A");
        assert!(record.target);
        assert_eq!(record.mandal, "");
        assert_eq!(record.extra.get("Notes").map(String::as_str), Some("keep me"));
    }

    #[test]
    fn roster_drops_blank_ids_and_keeps_last_duplicate() {
        let table = parse_table(
            "StudentID,Grade,TargetFlag\nS1,3,1\n,4,1\nS1,5,0\nS2,3,0\n",
        );
        let roster = project_roster(&table);
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].student_id, "S1");
        assert_eq!(roster[0].grade, "5");
        assert!(!roster[0].target);
    }

    #[test]
    fn facts_default_bad_numbers_and_drop_bad_dates() {
        let table = parse_table(
            "Date,StudentID,Subject,Sessions,TimeMinutes,StartMilestone,CurrentMilestone\n\
             2024-03-01,S1,maths,two,15,1,3\n\
             not-a-date,S1,Math,1,1,0,0\n\
             2024-03-02,,Math,1,1,0,0\n",
        );
        let facts = project_facts(&table);
        assert_eq!(facts.len(), 1);
        let fact = &facts[0];
        assert_eq!(fact.subject, Subject::Math);
        assert_eq!(fact.sessions, 0.0);
        assert_eq!(fact.time_minutes, 15.0);
        assert_eq!(fact.diagnostics_completed, 0.0);
        assert_eq!(fact.milestone_delta(), 2);
    }

    #[tokio::test]
    async fn load_files_reads_both_tables() {
        let mut roster = tempfile::NamedTempFile::new().unwrap();
        writeln!(roster, "StudentID,SchoolID,SchoolName,Mandal,District,Grade,TargetFlag").unwrap();
        writeln!(roster, "S1,SC1,School X,A1,A,3,1").unwrap();
        let mut facts = tempfile::NamedTempFile::new().unwrap();
        writeln!(facts, "Date,StudentID,Subject,Sessions,TimeMinutes").unwrap();
        writeln!(facts, "2024-03-01,S1,Math,1,10").unwrap();

        let dataset = load_files(Some(roster.path()), Some(facts.path()))
            .await
            .unwrap();
        assert_eq!(dataset.roster.len(), 1);
        assert_eq!(dataset.facts.len(), 1);
        assert!(dataset.student("S1").is_some());
    }

    #[tokio::test]
    async fn load_files_requires_both_inputs() {
        let roster = tempfile::NamedTempFile::new().unwrap();
        let err = load_files(Some(roster.path()), None).await.unwrap_err();
        assert!(matches!(err, DashboardError::MissingInput { kind: "facts" }));
    }
}
