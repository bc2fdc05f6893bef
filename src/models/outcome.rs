//! Result of one measurement task within one iteration

use crate::collectors::counters::LinkRate;
use crate::collectors::gps::Fix;
use crate::errors::{MeasureResult, MeasurementError};

/// What a task reported: a value, or why it has none
#[derive(Debug)]
pub enum TaskOutcome {
    /// Probe throughput in bits per second
    Throughput(MeasureResult<f64>),
    /// Interface rates in the configured unit
    Rates(MeasureResult<LinkRate>),
    /// GPS position
    Position(MeasureResult<Fix>),
}

impl TaskOutcome {
    pub fn error(&self) -> Option<&MeasurementError> {
        match self {
            TaskOutcome::Throughput(Err(e))
            | TaskOutcome::Rates(Err(e))
            | TaskOutcome::Position(Err(e)) => Some(e),
            _ => None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.error().is_none()
    }
}
