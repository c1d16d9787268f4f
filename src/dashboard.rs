use tracing::{debug, error};

use crate::drill::{DrillLevel, DrillPath, KpiDrill, OnboardingDrill};
use crate::engine::explorer::{self, ExplorerTable};
use crate::engine::kpi::KpiMetric;
use crate::engine::onboarding::{self, OnboardingTable};
use crate::engine::table::{SortColumn, TableSort};
use crate::engine::{recompute, DerivedView};
use crate::error::Result;
use crate::filter::{FilterConfig, ImprovementStatus, Scope, SelectionField};
use crate::models::Dataset;
use crate::window::{DateRange, QuickRange};

/// Every state change the dashboard accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SetQuick(Option<QuickRange>),
    /// Explicit bounds; clears the quick range.
    SetRange(DateRange),
    SetScope(Scope),
    SetSelection {
        field: SelectionField,
        values: Vec<String>,
    },
    SetImprovement(Vec<ImprovementStatus>),
    ClearAll,
    RemoveChip(String),
    DrillInto {
        level: DrillLevel,
        value: String,
    },
    BreadcrumbTo(DrillLevel),
    OpenKpiDrill(KpiMetric),
    CloseKpiDrill,
    KpiDrillInto {
        level: DrillLevel,
        value: String,
    },
    KpiDrillTo(DrillLevel),
    OpenOnboardingDrill(String),
    CloseOnboardingDrill,
    OnboardingDrillInto {
        level: DrillLevel,
        value: String,
    },
    OnboardingDrillTo(DrillLevel),
    SortBy(SortColumn),
}

/// Owns the loaded data and the user's current position in it.
///
/// Filters and the main drill path drive a full recompute. When a recompute
/// fails the last good view stays in place.
#[derive(Debug)]
pub struct Dashboard {
    dataset: Dataset,
    filters: FilterConfig,
    drill: DrillPath,
    kpi_drill: Option<KpiDrill>,
    onboarding_drill: Option<OnboardingDrill>,
    sort: Option<TableSort>,
    view: DerivedView,
}

impl Dashboard {
    pub fn new(dataset: Dataset) -> Result<Self> {
        Self::with_filters(dataset, FilterConfig::default())
    }

    /// Fails when the starting window cannot be computed, since there is no
    /// earlier view to fall back on.
    pub fn with_filters(dataset: Dataset, filters: FilterConfig) -> Result<Self> {
        let drill = DrillPath::District;
        let view = recompute(&dataset, &filters, &drill)?;
        Ok(Self {
            dataset,
            filters,
            drill,
            kpi_drill: None,
            onboarding_drill: None,
            sort: None,
            view,
        })
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn filters(&self) -> &FilterConfig {
        &self.filters
    }

    pub fn drill(&self) -> &DrillPath {
        &self.drill
    }

    pub fn kpi_drill(&self) -> Option<&KpiDrill> {
        self.kpi_drill.as_ref()
    }

    pub fn onboarding_drill(&self) -> Option<&OnboardingDrill> {
        self.onboarding_drill.as_ref()
    }

    /// The last successfully computed view.
    pub fn view(&self) -> &DerivedView {
        &self.view
    }

    /// Explorer table for the open KPI drill. The window is resolved from the
    /// current filters, which may be ahead of the last good view.
    pub fn kpi_table(&self) -> Result<Option<ExplorerTable>> {
        let Some(drill) = self.kpi_drill.as_ref() else {
            return Ok(None);
        };
        let window = self.filters.window(&self.dataset.facts)?;
        Ok(Some(explorer::explore(&self.dataset, &self.filters, window, drill)))
    }

    pub fn onboarding_table(&self) -> Option<OnboardingTable> {
        let drill = self.onboarding_drill.as_ref()?;
        Some(onboarding::onboarding_table(&self.dataset, &self.filters, drill))
    }

    /// Applies one action. Invalid drill transitions are rejected without
    /// touching state; a failed recompute keeps the new filters but the old
    /// view, and reports the error.
    pub fn apply(&mut self, action: Action) -> Result<()> {
        debug!(?action, "applying dashboard action");
        match action {
            Action::SetQuick(quick) => {
                self.filters.quick = quick;
                self.refresh()
            }
            Action::SetRange(range) => {
                self.filters.range = range;
                self.filters.quick = None;
                self.refresh()
            }
            Action::SetScope(scope) => {
                self.filters.scope = scope;
                self.refresh()
            }
            Action::SetSelection { field, values } => {
                self.filters = self.filters.with_selection(field, values);
                self.refresh()
            }
            Action::SetImprovement(statuses) => {
                self.filters.improvement = statuses.into_iter().collect();
                self.refresh()
            }
            Action::ClearAll => {
                self.filters = self.filters.cleared();
                self.refresh()
            }
            Action::RemoveChip(value) => {
                self.filters = self.filters.without_chip(&value);
                self.refresh()
            }
            Action::DrillInto { level, value } => {
                self.drill = self.drill.drill_into(level, value)?;
                self.refresh()
            }
            Action::BreadcrumbTo(level) => {
                self.drill = self.drill.breadcrumb_to(level)?;
                self.refresh()
            }
            Action::OpenKpiDrill(metric) => {
                self.kpi_drill = Some(KpiDrill::open(metric));
                Ok(())
            }
            Action::CloseKpiDrill => {
                self.kpi_drill = None;
                Ok(())
            }
            Action::KpiDrillInto { level, value } => {
                if let Some(drill) = &self.kpi_drill {
                    self.kpi_drill = Some(drill.drill_into(level, value)?);
                }
                Ok(())
            }
            Action::KpiDrillTo(level) => {
                if let Some(drill) = &self.kpi_drill {
                    self.kpi_drill = Some(drill.breadcrumb_to(level)?);
                }
                Ok(())
            }
            Action::OpenOnboardingDrill(subject) => {
                self.onboarding_drill = Some(OnboardingDrill::open(subject));
                Ok(())
            }
            Action::CloseOnboardingDrill => {
                self.onboarding_drill = None;
                Ok(())
            }
            Action::OnboardingDrillInto { level, value } => {
                if let Some(drill) = &self.onboarding_drill {
                    self.onboarding_drill = Some(drill.drill_into(level, value)?);
                }
                Ok(())
            }
            Action::OnboardingDrillTo(level) => {
                if let Some(drill) = &self.onboarding_drill {
                    self.onboarding_drill = Some(drill.breadcrumb_to(level)?);
                }
                Ok(())
            }
            Action::SortBy(column) => {
                let sort = TableSort::toggled(self.sort, column);
                self.sort = Some(sort);
                self.view.table.sort_by(sort);
                Ok(())
            }
        }
    }

    fn refresh(&mut self) -> Result<()> {
        match recompute(&self.dataset, &self.filters, &self.drill) {
            Ok(mut view) => {
                if let Some(sort) = self.sort {
                    view.table.sort_by(sort);
                }
                self.view = view;
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "recompute failed, keeping previous view");
                Err(err)
            }
        }
    }
}
