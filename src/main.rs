use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use engagement_dashboard::engine::kpi::KpiMetric;
use engagement_dashboard::{
    ingest, report, Action, Dashboard, DateRange, DrillLevel, FilterConfig, ImprovementStatus,
    QuickRange, Scope,
};

const ROSTER_ENV: &str = "DASHBOARD_ROSTER_CSV";
const FACTS_ENV: &str = "DASHBOARD_FACTS_CSV";

#[derive(Parser)]
#[command(name = "engagement-dashboard")]
#[command(about = "Engagement analytics over a student roster and daily activity log", long_about = None)]
struct Cli {
    /// Roster CSV (falls back to DASHBOARD_ROSTER_CSV)
    #[arg(long, global = true)]
    roster: Option<PathBuf>,
    /// Daily facts CSV (falls back to DASHBOARD_FACTS_CSV)
    #[arg(long, global = true)]
    facts: Option<PathBuf>,
    #[command(flatten)]
    filters: FilterArgs,
    #[command(flatten)]
    drill: DrillArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct FilterArgs {
    #[arg(long, value_enum, global = true)]
    quick: Option<QuickArg>,
    #[arg(long, global = true)]
    from: Option<NaiveDate>,
    #[arg(long, global = true)]
    to: Option<NaiveDate>,
    #[arg(long, value_enum, default_value_t = ScopeArg::Both, global = true)]
    scope: ScopeArg,
    #[arg(long = "district", global = true)]
    districts: Vec<String>,
    #[arg(long = "mandal", global = true)]
    mandals: Vec<String>,
    #[arg(long = "school", global = true)]
    schools: Vec<String>,
    #[arg(long = "subject", global = true)]
    subjects: Vec<String>,
    #[arg(long = "class", global = true)]
    classes: Vec<String>,
    /// Keep students whose in-window milestone change matches
    #[arg(long, value_enum, global = true)]
    improvement: Vec<ImprovementArg>,
}

impl FilterArgs {
    fn to_config(&self) -> FilterConfig {
        FilterConfig {
            quick: self.quick.map(Into::into),
            range: DateRange {
                from: self.from,
                to: self.to,
            },
            scope: self.scope.into(),
            districts: self.districts.iter().cloned().collect(),
            mandals: self.mandals.iter().cloned().collect(),
            schools: self.schools.iter().cloned().collect(),
            subjects: self.subjects.iter().cloned().collect(),
            classes: self.classes.iter().cloned().collect(),
            improvement: self.improvement.iter().map(|&arg| arg.into()).collect(),
        }
    }
}

#[derive(Args)]
struct DrillArgs {
    /// Level to show; defaults to the deepest level the selections reach
    #[arg(long, value_enum, global = true)]
    level: Option<LevelArg>,
    #[arg(long, global = true)]
    drill_district: Option<String>,
    #[arg(long, global = true)]
    drill_mandal: Option<String>,
    #[arg(long, global = true)]
    drill_school: Option<String>,
}

impl DrillArgs {
    /// Drill steps in order. A later selection without its parent is kept so
    /// the drill state machine can reject it.
    fn steps(&self) -> Vec<(DrillLevel, String)> {
        [
            (DrillLevel::Mandal, &self.drill_district),
            (DrillLevel::School, &self.drill_mandal),
            (DrillLevel::Student, &self.drill_school),
        ]
        .into_iter()
        .filter_map(|(level, value)| value.clone().map(|v| (level, v)))
        .collect()
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Write the markdown dashboard report
    Summary {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Dump the full derived view as JSON
    Json,
    /// Print the drill table as markdown
    Table,
    /// Export the drill table as CSV
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
        /// Date stamped in the preamble; defaults to today
        #[arg(long)]
        report_date: Option<NaiveDate>,
    },
    /// List the filter choices found in the data
    Options,
    /// Break a KPI card down by geography and subject
    KpiDrill {
        #[arg(long, value_enum)]
        metric: MetricArg,
    },
    /// Onboarding status of one subject by geography
    Onboarding {
        #[arg(long)]
        subject: String,
    },
    /// Initial and current milestone histograms per subject
    Milestones,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum QuickArg {
    Yesterday,
    Last7,
    Last30,
}

impl From<QuickArg> for QuickRange {
    fn from(arg: QuickArg) -> Self {
        match arg {
            QuickArg::Yesterday => QuickRange::Yesterday,
            QuickArg::Last7 => QuickRange::Last7Days,
            QuickArg::Last30 => QuickRange::Last30Days,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ScopeArg {
    Target,
    NonTarget,
    Both,
}

impl From<ScopeArg> for Scope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::Target => Scope::Target,
            ScopeArg::NonTarget => Scope::NonTarget,
            ScopeArg::Both => Scope::Both,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ImprovementArg {
    Improved,
    Declined,
    NoChange,
}

impl From<ImprovementArg> for ImprovementStatus {
    fn from(arg: ImprovementArg) -> Self {
        match arg {
            ImprovementArg::Improved => ImprovementStatus::Improved,
            ImprovementArg::Declined => ImprovementStatus::Declined,
            ImprovementArg::NoChange => ImprovementStatus::NoChange,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LevelArg {
    District,
    Mandal,
    School,
    Student,
}

impl From<LevelArg> for DrillLevel {
    fn from(arg: LevelArg) -> Self {
        match arg {
            LevelArg::District => DrillLevel::District,
            LevelArg::Mandal => DrillLevel::Mandal,
            LevelArg::School => DrillLevel::School,
            LevelArg::Student => DrillLevel::Student,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum MetricArg {
    ActiveStudents,
    ActiveSchools,
    StudentsProgressed,
    SessionsPerStudent,
    AvgTime,
}

impl From<MetricArg> for KpiMetric {
    fn from(arg: MetricArg) -> Self {
        match arg {
            MetricArg::ActiveStudents => KpiMetric::ActiveStudents,
            MetricArg::ActiveSchools => KpiMetric::ActiveSchools,
            MetricArg::StudentsProgressed => KpiMetric::StudentsProgressed,
            MetricArg::SessionsPerStudent => KpiMetric::SessionsPerStudent,
            MetricArg::AvgTime => KpiMetric::AvgTimePerStudent,
        }
    }
}

/// Walks the requested drill path on whichever drill the command reads.
fn navigate(dashboard: &mut Dashboard, command: &Commands, drill: &DrillArgs) -> anyhow::Result<()> {
    let level = drill.level.map(DrillLevel::from);
    let steps = drill.steps();
    match command {
        Commands::KpiDrill { metric } => {
            dashboard.apply(Action::OpenKpiDrill((*metric).into()))?;
            for (level, value) in steps {
                dashboard
                    .apply(Action::KpiDrillInto { level, value })
                    .context("invalid KPI drill path")?;
            }
            if let Some(level) = level {
                dashboard
                    .apply(Action::KpiDrillTo(level))
                    .context("--level is deeper than the drill selections")?;
            }
        }
        Commands::Onboarding { subject } => {
            dashboard.apply(Action::OpenOnboardingDrill(subject.clone()))?;
            for (level, value) in steps {
                dashboard
                    .apply(Action::OnboardingDrillInto { level, value })
                    .context("invalid onboarding drill path")?;
            }
            if let Some(level) = level {
                dashboard
                    .apply(Action::OnboardingDrillTo(level))
                    .context("--level is deeper than the drill selections")?;
            }
        }
        _ => {
            for (level, value) in steps {
                dashboard
                    .apply(Action::DrillInto { level, value })
                    .context("invalid drill path")?;
            }
            if let Some(level) = level {
                dashboard
                    .apply(Action::BreadcrumbTo(level))
                    .context("--level is deeper than the drill selections")?;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "engagement_dashboard=info".into()),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let roster = cli
        .roster
        .clone()
        .or_else(|| std::env::var(ROSTER_ENV).ok().map(PathBuf::from));
    let facts = cli
        .facts
        .clone()
        .or_else(|| std::env::var(FACTS_ENV).ok().map(PathBuf::from));

    let dataset = ingest::load_files(roster.as_deref(), facts.as_deref())
        .await
        .with_context(|| format!("pass --roster/--facts or set {ROSTER_ENV} and {FACTS_ENV}"))?;
    info!(
        students = dataset.roster.len(),
        facts = dataset.facts.len(),
        "dataset ready"
    );

    let mut dashboard = Dashboard::with_filters(dataset, cli.filters.to_config())
        .context("failed to compute the reporting window")?;
    navigate(&mut dashboard, &cli.command, &cli.drill)?;
    let view = dashboard.view();

    match cli.command {
        Commands::Summary { out } => {
            let report = report::build_report(view);
            match out {
                Some(out) => {
                    tokio::fs::write(&out, report)
                        .await
                        .with_context(|| format!("failed to write {}", out.display()))?;
                    println!("Report written to {}.", out.display());
                }
                None => print!("{report}"),
            }
        }
        Commands::Json => {
            let json = serde_json::to_string_pretty(view).context("failed to serialize view")?;
            println!("{json}");
        }
        Commands::Table => {
            print!("{}", report::table_markdown(&view.table));
        }
        Commands::Export { out, report_date } => {
            let date = report_date.unwrap_or_else(|| Utc::now().date_naive());
            let csv = report::export_table_csv(&view.table, date)?;
            match out {
                Some(out) => {
                    tokio::fs::write(&out, csv)
                        .await
                        .with_context(|| format!("failed to write {}", out.display()))?;
                    println!("Exported {} rows to {}.", view.table.rows.len(), out.display());
                }
                None => print!("{csv}"),
            }
        }
        Commands::Options => {
            print!("{}", report::options_markdown(&dashboard.dataset().options));
        }
        Commands::KpiDrill { .. } => {
            if let Some(table) = dashboard.kpi_table()? {
                print!("{}", report::explorer_markdown(&table));
            }
        }
        Commands::Onboarding { .. } => {
            if let Some(table) = dashboard.onboarding_table() {
                print!("{}", report::onboarding_markdown(&table));
            }
        }
        Commands::Milestones => {
            print!("{}", report::milestones_markdown(&view.milestones));
        }
    }

    Ok(())
}
