use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

/// Rounded percentage change between two periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Change {
    pub direction: Direction,
    pub percent: i64,
}

impl Change {
    /// `+5%` style rendering used on trend cards.
    pub fn signed(&self) -> String {
        if self.percent >= 0 {
            format!("+{}%", self.percent)
        } else {
            format!("{}%", self.percent)
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percent)
    }
}

/// Period-over-period change. A zero baseline reads as +100% when anything
/// happened and 0% otherwise.
pub fn wow(curr: f64, prev: f64) -> Change {
    let diff = if prev == 0.0 {
        if curr > 0.0 {
            100.0
        } else {
            0.0
        }
    } else {
        (curr - prev) / prev.abs() * 100.0
    };
    Change {
        direction: if diff >= 0.0 { Direction::Up } else { Direction::Down },
        percent: round_half_up(diff) as i64,
    }
}

/// `max(0, minuend - subtrahend)`. Coverage buckets rely on the floor.
pub fn clamped_gap(minuend: usize, subtrahend: usize) -> usize {
    minuend.saturating_sub(subtrahend)
}

pub fn round_half_up(value: f64) -> f64 {
    (value + 0.5).floor()
}

pub fn round2(value: f64) -> f64 {
    round_half_up(value * 100.0) / 100.0
}

/// Rounded `part / whole` percentage, 0 for an empty whole.
pub fn pct_num(part: f64, whole: f64) -> i64 {
    if whole == 0.0 {
        0
    } else {
        round_half_up(part / whole * 100.0) as i64
    }
}

pub fn pct_label(part: f64, whole: f64) -> String {
    format!("{}%", pct_num(part, whole))
}

/// Active-versus-target share; an entity with no targets reads as fully
/// covered.
pub fn coverage_pct(active: usize, target: usize) -> i64 {
    if target == 0 {
        100
    } else {
        pct_num(active as f64, target as f64)
    }
}

pub fn per_active(total: f64, active: usize) -> f64 {
    total / active.max(1) as f64
}

/// Compact thousands: 27_400 renders as `27K`.
pub fn format_k(n: usize) -> String {
    if n >= 1000 {
        format!("{}K", round_half_up(n as f64 / 1000.0) as i64)
    } else {
        n.to_string()
    }
}

/// Two-decimal rendering without trailing zeros (`0.5`, `1.25`, `2`).
pub fn format_decimal(value: f64) -> String {
    let rounded = round2(value);
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        let text = format!("{rounded:.2}");
        text.trim_end_matches('0').to_string()
    }
}
