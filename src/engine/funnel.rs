use serde::Serialize;

use super::activity::Activity;
use crate::filter::FilterConfig;
use crate::metrics::pct_num;
use crate::models::Dataset;

const PRACTICE_MINUTES: f64 = 200.0;
const ALL_LEVELS_DELTA: i64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunnelStage {
    pub stage: &'static str,
    pub value: usize,
    pub pct: i64,
}

/// Progress funnel as a share of the scope-filtered roster.
///
/// `all_time` must hold the same filters without a date bound; the
/// "Practicing >200 mins" stage reads cumulative minutes from it rather than
/// from the window.
pub fn compute(
    dataset: &Dataset,
    config: &FilterConfig,
    current: &Activity<'_>,
    all_time: &Activity<'_>,
) -> Vec<FunnelStage> {
    let total = dataset
        .roster
        .iter()
        .filter(|ro| config.roster_passes(ro))
        .count();

    let stages = [
        ("Active Students", current.active_count()),
        (
            "Completed Diagnostics",
            current.students().filter(|s| s.diagnostics > 0.0).count(),
        ),
        (
            "Practicing >200 mins",
            all_time
                .students()
                .filter(|s| s.time_minutes >= PRACTICE_MINUTES)
                .count(),
        ),
        ("Improved Milestone", current.progressed().count()),
        (
            "Completed All Levels",
            current
                .students()
                .filter(|s| s.milestone_delta >= ALL_LEVELS_DELTA)
                .count(),
        ),
    ];

    let mut funnel = vec![FunnelStage {
        stage: "Total Students",
        value: total,
        pct: 100,
    }];
    funnel.extend(stages.into_iter().map(|(stage, value)| FunnelStage {
        stage,
        value,
        pct: pct_num(value as f64, total as f64),
    }));
    funnel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{day, fact, progress, roster};
    use crate::window::TimeWindow;

    #[test]
    fn stages_are_shares_of_the_roster() {
        let mut diagnosed = fact("S1", 12, "Math", 1.0, 20.0);
        diagnosed.diagnostics_completed = 1.0;
        let dataset = Dataset::new(
            vec![
                roster("S1", "SC1", "A1", "A", true),
                roster("S2", "SC1", "A1", "A", true),
                roster("S3", "SC1", "A1", "A", false),
                roster("S4", "SC1", "A1", "A", false),
            ],
            vec![
                diagnosed,
                progress("S2", 13, "Math", 0, 10),
                // Old practice still counts towards the cumulative stage.
                fact("S3", 1, "Math", 1.0, 250.0),
            ],
        );
        let config = FilterConfig::default();
        let window = TimeWindow { from: day(10), to: day(16) };
        let current = Activity::collect(config.facts_in(window).select(&dataset));
        let all_time = Activity::collect(config.facts_all_time().select(&dataset));
        let funnel = compute(&dataset, &config, &current, &all_time);

        let values: Vec<(&str, usize, i64)> =
            funnel.iter().map(|s| (s.stage, s.value, s.pct)).collect();
        assert_eq!(
            values,
            vec![
                ("Total Students", 4, 100),
                ("Active Students", 2, 50),
                ("Completed Diagnostics", 1, 25),
                ("Practicing >200 mins", 1, 25),
                ("Improved Milestone", 1, 25),
                ("Completed All Levels", 1, 25),
            ]
        );
    }

    #[test]
    fn empty_roster_reports_zero_shares() {
        let dataset = Dataset::new(Vec::new(), Vec::new());
        let empty = Activity::default();
        let funnel = compute(&dataset, &FilterConfig::default(), &empty, &empty);
        assert_eq!(funnel[0].pct, 100);
        assert!(funnel[1..].iter().all(|s| s.value == 0 && s.pct == 0));
    }
}
