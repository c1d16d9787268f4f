//! Engagement analytics for a school learning program: loads a student
//! roster and a daily engagement log, then derives KPI cards, coverage
//! donuts, trends, a progress funnel and a drillable geography table.

pub mod dashboard;
pub mod drill;
pub mod engine;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod report;
pub mod window;

#[cfg(test)]
mod testing;

pub use dashboard::{Action, Dashboard};
pub use drill::{DrillLevel, DrillPath, KpiDrill, OnboardingDrill};
pub use engine::{recompute, DerivedView};
pub use error::{DashboardError, Result};
pub use filter::{FilterConfig, FilterOptions, ImprovementStatus, Scope, SelectionField};
pub use models::{Dataset, FactRecord, RosterRecord, Subject};
pub use window::{DateRange, QuickRange, TimeWindow};
