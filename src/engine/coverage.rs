use std::collections::BTreeMap;

use serde::Serialize;

use super::activity::{entity_image, Activity, EntityKind};
use crate::filter::{FilterConfig, Scope};
use crate::metrics::clamped_gap;
use crate::models::{Dataset, RosterRecord};

/// Donut segments for one entity kind.
///
/// `green` is active target, `amber` onboarded target not active this
/// period, `grey` target never onboarded and `blue` every non-target entity
/// on the roster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoverageBuckets {
    pub green: usize,
    pub amber: usize,
    pub grey: usize,
    pub blue: usize,
}

impl CoverageBuckets {
    pub fn total(&self) -> usize {
        self.green + self.amber + self.grey + self.blue
    }

    fn non_target_only(self) -> Self {
        Self {
            blue: self.blue,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Coverage {
    pub students: CoverageBuckets,
    pub schools: CoverageBuckets,
    pub mandals: CoverageBuckets,
    pub districts: CoverageBuckets,
}

impl Coverage {
    pub fn get(&self, kind: EntityKind) -> &CoverageBuckets {
        match kind {
            EntityKind::Students => &self.students,
            EntityKind::Schools => &self.schools,
            EntityKind::Mandals => &self.mandals,
            EntityKind::Districts => &self.districts,
        }
    }

    fn get_mut(&mut self, kind: EntityKind) -> &mut CoverageBuckets {
        match kind {
            EntityKind::Students => &mut self.students,
            EntityKind::Schools => &mut self.schools,
            EntityKind::Mandals => &mut self.mandals,
            EntityKind::Districts => &mut self.districts,
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (EntityKind, &CoverageBuckets)> + '_ {
        EntityKind::ALL.into_iter().map(move |kind| (kind, self.get(kind)))
    }
}

/// Students with at least one fact on any date that passes geography, class
/// and subject. Scope is not applied.
pub fn onboarded_students<'d>(
    dataset: &'d Dataset,
    config: &'d FilterConfig,
) -> BTreeMap<&'d str, &'d RosterRecord> {
    config
        .facts_all_time()
        .ignoring_scope()
        .select(dataset)
        .map(|(_, record)| (record.student_id.as_str(), record))
        .collect()
}

/// Builds the four coverage donuts. `active` must be the window activity of
/// the same configuration.
pub fn compute(dataset: &Dataset, config: &FilterConfig, active: &Activity<'_>) -> Coverage {
    let onboarded = onboarded_students(dataset, config);
    let onboarded_target: Vec<&RosterRecord> =
        onboarded.values().copied().filter(|ro| ro.target).collect();
    let (target_roster, non_target_roster): (Vec<&RosterRecord>, Vec<&RosterRecord>) = dataset
        .roster
        .iter()
        .filter(|ro| config.roster_passes_ignoring_scope(ro))
        .partition(|ro| ro.target);

    let mut coverage = Coverage::default();
    for kind in EntityKind::ALL {
        let green = active.active_entities(kind, Some(true)).len();
        let onboarded = entity_image(kind, onboarded_target.iter().copied()).len();
        let total_target = entity_image(kind, target_roster.iter().copied()).len();
        let buckets = CoverageBuckets {
            green,
            amber: clamped_gap(onboarded, green),
            grey: clamped_gap(total_target, onboarded),
            blue: entity_image(kind, non_target_roster.iter().copied()).len(),
        };
        *coverage.get_mut(kind) = if config.scope == Scope::NonTarget {
            buckets.non_target_only()
        } else {
            buckets
        };
    }
    coverage
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{day, fact, roster};
    use crate::window::TimeWindow;

    fn week() -> TimeWindow {
        TimeWindow { from: day(10), to: day(16) }
    }

    fn coverage_for(dataset: &Dataset, config: &FilterConfig) -> Coverage {
        let activity = Activity::collect(config.facts_in(week()).select(dataset));
        compute(dataset, config, &activity)
    }

    fn sample() -> Dataset {
        Dataset::new(
            vec![
                roster("S1", "SC1", "A1", "A", true),
                roster("S2", "SC1", "A1", "A", true),
                roster("S3", "SC2", "A2", "A", true),
                roster("S4", "SC3", "B1", "B", false),
            ],
            vec![
                fact("S1", 12, "Math", 1.0, 10.0),
                fact("S2", 2, "Math", 1.0, 10.0),
                fact("S4", 12, "Math", 1.0, 10.0),
            ],
        )
    }

    #[test]
    fn students_split_into_four_buckets() {
        let coverage = coverage_for(&sample(), &FilterConfig::default());
        assert_eq!(
            coverage.students,
            CoverageBuckets { green: 1, amber: 1, grey: 1, blue: 1 }
        );
        assert_eq!(
            coverage.schools,
            CoverageBuckets { green: 1, amber: 0, grey: 1, blue: 1 }
        );
        assert_eq!(coverage.districts.green, 1);
        assert_eq!(coverage.districts.grey, 0);
    }

    #[test]
    fn non_target_scope_keeps_only_blue() {
        let config = FilterConfig { scope: Scope::NonTarget, ..FilterConfig::default() };
        let coverage = coverage_for(&sample(), &config);
        for (_, buckets) in coverage.entries() {
            assert_eq!(buckets.green + buckets.amber + buckets.grey, 0);
        }
        assert_eq!(coverage.students.blue, 1);
    }

    #[test]
    fn onboarding_follows_the_subject_selection() {
        // S1 is active in English only, so under a Math selection it is neither
        // onboarded nor active; S2 onboarded in Math long ago.
        let dataset = Dataset::new(
            vec![roster("S1", "SC1", "A1", "A", true), roster("S2", "SC1", "A1", "A", true)],
            vec![fact("S1", 12, "English", 1.0, 1.0), fact("S2", 1, "Math", 1.0, 1.0)],
        );
        let config = FilterConfig::default().for_subject("Math");
        let coverage = coverage_for(&dataset, &config);
        assert_eq!(coverage.students, CoverageBuckets { green: 0, amber: 1, grey: 1, blue: 0 });
        assert_eq!(coverage.schools, CoverageBuckets { green: 0, amber: 1, grey: 0, blue: 0 });
    }
}
