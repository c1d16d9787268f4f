use thiserror::Error;

use crate::drill::DrillLevel;

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("missing {kind} input")]
    MissingInput { kind: &'static str },

    #[error("date arithmetic out of range")]
    DateOutOfRange,

    #[error("cannot drill from {from} to {to}")]
    InvalidDrill { from: DrillLevel, to: DrillLevel },
}

pub type Result<T> = std::result::Result<T, DashboardError>;
