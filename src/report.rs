use std::fmt::Write;
use std::io;

use chrono::NaiveDate;

use crate::engine::explorer::ExplorerTable;
use crate::engine::kpi::Gauge;
use crate::engine::milestones::{MilestoneDistribution, LEVELS};
use crate::engine::onboarding::OnboardingTable;
use crate::engine::table::DrillTable;
use crate::engine::DerivedView;
use crate::error::Result;
use crate::filter::FilterOptions;

fn escape(cell: &str) -> String {
    cell.replace('|', "\\|")
}

fn write_table<I>(output: &mut String, headers: &[String], rows: I)
where
    I: IntoIterator<Item = Vec<String>>,
{
    let line = |cells: &[String]| {
        let joined: Vec<String> = cells.iter().map(|c| escape(c)).collect();
        format!("| {} |", joined.join(" | "))
    };
    let _ = writeln!(output, "{}", line(headers));
    let _ = writeln!(output, "|{}", " --- |".repeat(headers.len()));
    for row in rows {
        let _ = writeln!(output, "{}", line(&row));
    }
}

pub fn build_report(view: &DerivedView) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Engagement Dashboard Report");
    let _ = writeln!(
        output,
        "Window {} to {} (compared with {} to {})",
        view.window.from, view.window.to, view.previous_window.from, view.previous_window.to
    );
    if view.chips.is_empty() {
        let _ = writeln!(output, "Filters: none");
    } else {
        let _ = writeln!(output, "Filters: {}", view.chips.join(", "));
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Key Metrics");
    for kpi in &view.summary.kpis {
        let gauge = match kpi.gauge {
            Gauge::Split { green, blue, grey } => {
                format!("target {green}, non-target {blue}, remaining {grey}")
            }
            Gauge::Percent { pct } => format!("{pct}% of goal"),
        };
        let _ = writeln!(
            output,
            "- {}: {} {} ({} vs previous; {})",
            kpi.title,
            kpi.big,
            kpi.reference,
            kpi.wow.signed(),
            gauge
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Coverage");
    for (kind, buckets) in view.summary.coverage.entries() {
        let _ = writeln!(
            output,
            "- {}: {} active, {} onboarded not active, {} not onboarded, {} non-target ({} total)",
            kind.label(),
            buckets.green,
            buckets.amber,
            buckets.grey,
            buckets.blue,
            buckets.total()
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Trends");
    for card in &view.summary.trend_cards {
        let points: Vec<String> = card.points.iter().map(|p| p.to_string()).collect();
        let _ = writeln!(
            output,
            "- {}: {} ({}) [{}]",
            card.title,
            card.value,
            card.change_label(),
            points.join(", ")
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Progress Funnel");
    for stage in &view.summary.funnel {
        let _ = writeln!(output, "- {}: {} ({}%)", stage.stage, stage.value, stage.pct);
    }

    if !view.subjects.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## By Subject");
        for breakdown in &view.subjects {
            let headline: Vec<String> = breakdown
                .summary
                .kpis
                .iter()
                .map(|kpi| format!("{} {}", kpi.title, kpi.big))
                .collect();
            let _ = writeln!(output, "- {}: {}", breakdown.subject, headline.join("; "));
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## {} Breakdown", view.table.level);
    let crumbs: Vec<String> = view.table.path.crumbs().into_iter().map(|(label, _)| label).collect();
    let _ = writeln!(output, "{}", crumbs.join(" > "));
    output.push_str(&table_markdown(&view.table));

    output
}

/// The drill table with its totals footer.
pub fn table_markdown(table: &DrillTable) -> String {
    let mut output = String::new();
    if table.rows.is_empty() {
        let _ = writeln!(output, "No activity for this window.");
        return output;
    }
    let rows = table
        .rows
        .iter()
        .map(|row| table.cells(row))
        .chain(std::iter::once(table.totals_cells()));
    write_table(&mut output, &table.headers(), rows);
    output
}

pub fn explorer_markdown(table: &ExplorerTable) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "## {} by {}", table.metric.title(), table.level);
    if table.rows.is_empty() {
        let _ = writeln!(output, "No activity for this window.");
        return output;
    }
    let headers: Vec<String> = std::iter::once(table.level.label().to_string())
        .chain(table.columns.iter().cloned())
        .collect();
    let rows = table.rows.iter().map(|row| {
        std::iter::once(row.name.clone())
            .chain(table.columns.iter().map(|c| row.cell(c)))
            .collect::<Vec<String>>()
    });
    write_table(&mut output, &headers, rows);
    output
}

pub fn onboarding_markdown(table: &OnboardingTable) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "## {} Onboarding by {}", table.subject, table.level);
    if table.rows.is_empty() {
        let _ = writeln!(output, "No students on the roster for this selection.");
        return output;
    }
    let rows = table.rows.iter().map(|row| {
        std::iter::once(row.name.clone())
            .chain(table.columns.iter().map(|c| row.cell(*c)))
            .collect::<Vec<String>>()
    });
    write_table(&mut output, &table.headers(), rows);
    output
}

pub fn milestones_markdown(distributions: &[MilestoneDistribution]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "## Milestone Distribution");
    if distributions.is_empty() {
        let _ = writeln!(output, "No subjects in view.");
        return output;
    }
    let mut headers = vec!["Subject".to_string(), "Snapshot".to_string()];
    headers.extend((0..LEVELS).map(|level| format!("L{level}")));
    headers.push("Progressed".to_string());

    let mut rows = Vec::new();
    for dist in distributions {
        for (label, counts) in [("Initial", &dist.initial), ("Current", &dist.current)] {
            let mut row = vec![dist.subject.clone(), label.to_string()];
            row.extend(counts.iter().map(|c| c.to_string()));
            row.push(if label == "Current" {
                format!("{} of {} ({}%)", dist.progressed, dist.students, dist.progressed_pct())
            } else {
                String::new()
            });
            rows.push(row);
        }
    }
    write_table(&mut output, &headers, rows);
    output
}

pub fn options_markdown(options: &FilterOptions) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "## Filter Options");
    let _ = writeln!(output, "- Districts: {}", options.districts.join(", "));
    for (district, mandals) in &options.mandals_by_district {
        let _ = writeln!(output, "  - {}: {}", district, mandals.join(", "));
    }
    let schools: usize = options.schools_by_mandal.values().map(Vec::len).sum();
    let _ = writeln!(
        output,
        "- Schools: {} across {} mandals",
        schools,
        options.schools_by_mandal.len()
    );
    let _ = writeln!(output, "- Subjects: {}", options.subjects.join(", "));
    let _ = writeln!(output, "- Classes: {}", options.classes.join(", "));
    output
}

/// CSV export of the drill table: a short metadata preamble, a blank line,
/// then the rows exactly as rendered on screen.
pub fn export_table_csv(table: &DrillTable, report_date: NaiveDate) -> Result<String> {
    let mut preamble = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());
    let date = report_date.to_string();
    preamble.write_record(["Report Date", date.as_str()])?;
    preamble.write_record(["Level", table.level.label()])?;
    let ancestors = [
        ("District", table.path.district()),
        ("Mandal", table.path.mandal()),
        ("School", table.path.school()),
    ];
    for (label, value) in ancestors {
        if let Some(value) = value {
            preamble.write_record([label, value])?;
        }
    }
    let mut bytes = preamble.into_inner().map_err(|err| err.into_error())?;
    bytes.push(b'\n');

    let mut body = csv::Writer::from_writer(bytes);
    body.write_record(table.headers())?;
    for row in &table.rows {
        body.write_record(table.cells(row))?;
    }
    let bytes = body.into_inner().map_err(|err| err.into_error())?;
    let text = String::from_utf8(bytes).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    Ok(text)
}
