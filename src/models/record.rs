//! One row of the survey log
//!
//! Records are built once per completed iteration from the outcomes of every
//! task, in task order. Failed tasks still occupy their columns: their values
//! are written as `0.0`, which keeps every row the same width as the header.

use chrono::{DateTime, FixedOffset};

use crate::collectors::formatting::{RateUnit, format_coordinates, format_rate};
use crate::errors::log_measurement_failure;
use crate::models::outcome::TaskOutcome;
use crate::storage::schema::RecordSchema;

/// Values of one completed iteration, aligned with the metric columns
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    /// 1-based iteration number
    pub iteration: u64,
    /// Wall-clock time at which the iteration started
    pub timestamp: DateTime<FixedOffset>,
    /// One value per metric column, in schema order
    pub values: Vec<f64>,
    /// Number of tasks whose values were replaced by zeros
    pub failures: usize,
}

impl IterationRecord {
    /// Folds task outcomes into a record, degrading every failure to zeros
    ///
    /// Probe figures arrive in bits per second and are converted to `unit`
    /// here; interface rates are already in `unit`.
    pub fn assemble<I>(
        iteration: u64,
        timestamp: DateTime<FixedOffset>,
        unit: RateUnit,
        outcomes: I,
    ) -> Self
    where
        I: IntoIterator<Item = (String, TaskOutcome)>,
    {
        let mut values = Vec::new();
        let mut failures = 0;

        for (task, outcome) in outcomes {
            if let Some(err) = outcome.error() {
                log_measurement_failure(&task, err, iteration);
                failures += 1;
            }

            match outcome {
                TaskOutcome::Throughput(result) => {
                    let value = result.map(|bps| unit.from_bits_per_second(bps));
                    values.push(finite_or_zero(value.unwrap_or(0.0)));
                }
                TaskOutcome::Rates(result) => {
                    let (rx, tx) = result.map(|r| (r.rx, r.tx)).unwrap_or((0.0, 0.0));
                    values.push(finite_or_zero(rx));
                    values.push(finite_or_zero(tx));
                }
                TaskOutcome::Position(result) => {
                    let (lat, lon) = result
                        .map(|fix| (fix.latitude, fix.longitude))
                        .unwrap_or((0.0, 0.0));
                    values.push(finite_or_zero(lat));
                    values.push(finite_or_zero(lon));
                }
            }
        }

        Self {
            iteration,
            timestamp,
            values,
            failures,
        }
    }

    /// Value of the named metric column, if the schema has it
    pub fn value(&self, schema: &RecordSchema, name: &str) -> Option<f64> {
        schema
            .position(name)
            .and_then(|idx| self.values.get(idx).copied())
    }

    /// One-line human summary used for the per-iteration info log
    pub fn summary(&self, schema: &RecordSchema, unit: RateUnit) -> String {
        let mut parts = Vec::new();
        let mut position = None;

        for (metric, value) in schema.metrics().iter().zip(&self.values) {
            match metric.name.as_str() {
                "Latitude" => position = Some((*value, 0.0)),
                "Longitude" => {
                    if let Some((lat, _)) = position {
                        position = Some((lat, *value));
                    }
                }
                name => parts.push(format!("{}={}", name, format_rate(*value, unit))),
            }
        }

        if let Some((lat, lon)) = position {
            parts.push(format!("position=({})", format_coordinates(lat, lon)));
        }

        format!(
            "iteration #{}: {} ({} degraded)",
            self.iteration,
            parts.join(", "),
            self.failures
        )
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}
