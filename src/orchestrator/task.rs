//! Measurement tasks dispatched once per iteration

use log::debug;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::collectors::formatting::RateUnit;
use crate::collectors::gps::FixReader;
use crate::collectors::{InterfaceMeter, ThroughputProbe};
use crate::errors::MeasurementError;
use crate::models::TaskOutcome;
use crate::storage::schema::Metric;

/// Shape of a task's contribution to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// One download column
    Probe,
    /// RX and TX columns
    Interface,
    /// Latitude and longitude columns
    Position,
}

impl TaskKind {
    /// Outcome carrying `error` in this kind's variant
    pub fn failed(self, error: MeasurementError) -> TaskOutcome {
        match self {
            TaskKind::Probe => TaskOutcome::Throughput(Err(error)),
            TaskKind::Interface => TaskOutcome::Rates(Err(error)),
            TaskKind::Position => TaskOutcome::Position(Err(error)),
        }
    }
}

/// Where a task gets its value from
#[derive(Clone)]
pub enum TaskSource {
    Probe {
        server: String,
        probe: Arc<dyn ThroughputProbe>,
    },
    Interface {
        interface: String,
        label: String,
        meter: Arc<dyn InterfaceMeter>,
    },
    Position {
        port: PathBuf,
        reader: Arc<dyn FixReader>,
    },
}

/// A unit of work run once per iteration
///
/// Tasks hold no state between iterations; the GPS session in particular is
/// opened fresh every time the task runs.
#[derive(Clone)]
pub struct MeasurementTask {
    pub name: String,
    /// Wall-clock time the task occupies (sampling window or fix deadline)
    pub duration: Duration,
    pub source: TaskSource,
}

impl fmt::Debug for MeasurementTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeasurementTask")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("duration", &self.duration)
            .finish()
    }
}

impl MeasurementTask {
    pub fn probe<S: Into<String>>(
        server: S,
        probe: Arc<dyn ThroughputProbe>,
        duration: Duration,
    ) -> Self {
        Self {
            name: "iperf3".to_string(),
            duration,
            source: TaskSource::Probe {
                server: server.into(),
                probe,
            },
        }
    }

    pub fn interface<S: Into<String>, L: Into<String>>(
        interface: S,
        label: L,
        meter: Arc<dyn InterfaceMeter>,
        duration: Duration,
    ) -> Self {
        let interface = interface.into();
        Self {
            name: interface.clone(),
            duration,
            source: TaskSource::Interface {
                interface,
                label: label.into(),
                meter,
            },
        }
    }

    pub fn position<P: Into<PathBuf>>(
        port: P,
        reader: Arc<dyn FixReader>,
        deadline: Duration,
    ) -> Self {
        Self {
            name: "gps".to_string(),
            duration: deadline,
            source: TaskSource::Position {
                port: port.into(),
                reader,
            },
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self.source {
            TaskSource::Probe { .. } => TaskKind::Probe,
            TaskSource::Interface { .. } => TaskKind::Interface,
            TaskSource::Position { .. } => TaskKind::Position,
        }
    }

    /// Metric columns this task fills, in record order
    pub fn metrics(&self, unit: RateUnit) -> Vec<Metric> {
        match &self.source {
            TaskSource::Probe { .. } => vec![Metric::probe_download(unit)],
            TaskSource::Interface { label, .. } => Metric::interface_pair(label, unit).to_vec(),
            TaskSource::Position { .. } => Metric::position_pair().to_vec(),
        }
    }

    /// Device the task depends on, if it has one
    pub fn device(&self) -> Option<&PathBuf> {
        match &self.source {
            TaskSource::Position { port, .. } => Some(port),
            _ => None,
        }
    }

    /// Runs the task to completion
    ///
    /// Only the fix reader is bounded here; the probe and the counter meters
    /// bound themselves by their own duration.
    pub async fn execute(self) -> TaskOutcome {
        debug!("Task '{}' started ({:?})", self.name, self.duration);
        match self.source {
            TaskSource::Probe { server, probe } => {
                TaskOutcome::Throughput(probe.measure(&server, self.duration).await)
            }
            TaskSource::Interface {
                interface, meter, ..
            } => TaskOutcome::Rates(meter.measure(&interface, self.duration).await),
            TaskSource::Position { port, reader } => {
                let budget = self.duration;
                let fix = match tokio::time::timeout(budget, reader.first_fix(&port, budget)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(MeasurementError::Timeout(budget)),
                };
                TaskOutcome::Position(fix)
            }
        }
    }
}
