use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::kpi::KpiMetric;
use crate::error::{DashboardError, Result};
use crate::models::RosterRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DrillLevel {
    District,
    Mandal,
    School,
    Student,
}

impl DrillLevel {
    pub fn child(self) -> Option<DrillLevel> {
        match self {
            DrillLevel::District => Some(DrillLevel::Mandal),
            DrillLevel::Mandal => Some(DrillLevel::School),
            DrillLevel::School => Some(DrillLevel::Student),
            DrillLevel::Student => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DrillLevel::District => "District",
            DrillLevel::Mandal => "Mandal",
            DrillLevel::School => "School",
            DrillLevel::Student => "Student",
        }
    }
}

/// Label for rows whose key at a level is blank.
pub const UNKNOWN: &str = "Unknown";

/// Grouping key of a roster record at a drill level. Blank keys group under
/// [`UNKNOWN`], both when rows are built and when a drill selection is
/// matched back against the roster.
pub fn level_key(level: DrillLevel, record: &RosterRecord) -> &str {
    let key = match level {
        DrillLevel::District => &record.district,
        DrillLevel::Mandal => &record.mandal,
        DrillLevel::School => &record.school_name,
        DrillLevel::Student => &record.student_id,
    };
    if key.is_empty() {
        UNKNOWN
    } else {
        key
    }
}

impl fmt::Display for DrillLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Position in the District → Mandal → School → Student hierarchy. Each
/// variant carries exactly the ancestor selections that lead to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "level")]
pub enum DrillPath {
    #[default]
    District,
    Mandal {
        district: String,
    },
    School {
        district: String,
        mandal: String,
    },
    Student {
        district: String,
        mandal: String,
        school: String,
    },
}

impl DrillPath {
    pub fn level(&self) -> DrillLevel {
        match self {
            DrillPath::District => DrillLevel::District,
            DrillPath::Mandal { .. } => DrillLevel::Mandal,
            DrillPath::School { .. } => DrillLevel::School,
            DrillPath::Student { .. } => DrillLevel::Student,
        }
    }

    pub fn district(&self) -> Option<&str> {
        match self {
            DrillPath::District => None,
            DrillPath::Mandal { district }
            | DrillPath::School { district, .. }
            | DrillPath::Student { district, .. } => Some(district),
        }
    }

    pub fn mandal(&self) -> Option<&str> {
        match self {
            DrillPath::School { mandal, .. } | DrillPath::Student { mandal, .. } => Some(mandal),
            _ => None,
        }
    }

    pub fn school(&self) -> Option<&str> {
        match self {
            DrillPath::Student { school, .. } => Some(school),
            _ => None,
        }
    }

    /// Moves one level down, selecting `value` at the new level. Only the
    /// immediate child level is reachable.
    pub fn drill_into(&self, level: DrillLevel, value: impl Into<String>) -> Result<DrillPath> {
        let value = value.into();
        let next = match (self, level) {
            (DrillPath::District, DrillLevel::Mandal) => DrillPath::Mandal { district: value },
            (DrillPath::Mandal { district }, DrillLevel::School) => DrillPath::School {
                district: district.clone(),
                mandal: value,
            },
            (DrillPath::School { district, mandal }, DrillLevel::Student) => DrillPath::Student {
                district: district.clone(),
                mandal: mandal.clone(),
                school: value,
            },
            _ => {
                return Err(DashboardError::InvalidDrill {
                    from: self.level(),
                    to: level,
                })
            }
        };
        Ok(next)
    }

    /// Jumps back to `level` (or stays), discarding deeper selections.
    pub fn breadcrumb_to(&self, level: DrillLevel) -> Result<DrillPath> {
        if level > self.level() {
            return Err(DashboardError::InvalidDrill {
                from: self.level(),
                to: level,
            });
        }
        let district = self.district().unwrap_or_default().to_string();
        let mandal = self.mandal().unwrap_or_default().to_string();
        Ok(match level {
            DrillLevel::District => DrillPath::District,
            DrillLevel::Mandal => DrillPath::Mandal { district },
            DrillLevel::School => DrillPath::School { district, mandal },
            DrillLevel::Student => self.clone(),
        })
    }

    /// Whether a roster record sits under every ancestor selected so far.
    pub fn admits(&self, record: &RosterRecord) -> bool {
        self.district()
            .map_or(true, |d| level_key(DrillLevel::District, record) == d)
            && self.mandal().map_or(true, |m| level_key(DrillLevel::Mandal, record) == m)
            && self.school().map_or(true, |s| level_key(DrillLevel::School, record) == s)
    }

    /// Breadcrumb trail as (label, level it returns to).
    pub fn crumbs(&self) -> Vec<(String, DrillLevel)> {
        let mut crumbs = vec![("All Districts".to_string(), DrillLevel::District)];
        if let Some(district) = self.district() {
            crumbs.push((district.to_string(), DrillLevel::Mandal));
        }
        if let Some(mandal) = self.mandal() {
            crumbs.push((mandal.to_string(), DrillLevel::School));
        }
        if let Some(school) = self.school() {
            crumbs.push((school.to_string(), DrillLevel::Student));
        }
        crumbs
    }
}

/// Drill opened from a KPI card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KpiDrill {
    pub metric: KpiMetric,
    pub path: DrillPath,
}

impl KpiDrill {
    pub fn open(metric: KpiMetric) -> Self {
        Self {
            metric,
            path: DrillPath::District,
        }
    }

    pub fn drill_into(&self, level: DrillLevel, value: impl Into<String>) -> Result<Self> {
        Ok(Self {
            metric: self.metric,
            path: self.path.drill_into(level, value)?,
        })
    }

    pub fn breadcrumb_to(&self, level: DrillLevel) -> Result<Self> {
        Ok(Self {
            metric: self.metric,
            path: self.path.breadcrumb_to(level)?,
        })
    }
}

/// Drill opened from a subject's coverage donut. Stops at School.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingDrill {
    pub subject: String,
    pub path: DrillPath,
}

impl OnboardingDrill {
    pub fn open(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            path: DrillPath::District,
        }
    }

    pub fn drill_into(&self, level: DrillLevel, value: impl Into<String>) -> Result<Self> {
        if level == DrillLevel::Student {
            return Err(DashboardError::InvalidDrill {
                from: self.path.level(),
                to: level,
            });
        }
        Ok(Self {
            subject: self.subject.clone(),
            path: self.path.drill_into(level, value)?,
        })
    }

    pub fn breadcrumb_to(&self, level: DrillLevel) -> Result<Self> {
        Ok(Self {
            subject: self.subject.clone(),
            path: self.path.breadcrumb_to(level)?,
        })
    }
}
