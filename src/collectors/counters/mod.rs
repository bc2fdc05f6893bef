//! Interface rate measurement
//!
//! Two backends measure the receive/transmit rate of one interface over a
//! sampling window and expose the same [`InterfaceMeter`] contract:
//!
//! - `sysfs`: reads the kernel's cumulative byte counters at the start and end
//!   of the window and divides the delta by the elapsed time
//! - `ifstat`: runs the `ifstat` utility for the window and averages its
//!   per-second samples
//!
//! The orchestrator never knows which backend sits behind an interface.

pub mod ifstat;
pub mod snapshot;
pub mod sysfs;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::MeasureResult;

pub use ifstat::IfstatSampler;
pub use snapshot::{CounterSnapshot, counter_delta, rate_between, rate_over};
pub use sysfs::{CounterSampler, CounterSource, SysfsCounters};

/// Receive and transmit rate of one interface, in the meter's configured unit
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinkRate {
    pub rx: f64,
    pub tx: f64,
}

/// Which implementation measures an interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterBackend {
    #[default]
    Sysfs,
    Ifstat,
}

/// Measures the rate of one interface over a sampling window
///
/// Implementations block (asynchronously) for roughly `window` and must fail
/// with `SourceUnavailable` when the interface cannot be observed at all.
#[async_trait]
pub trait InterfaceMeter: Send + Sync {
    async fn measure(&self, interface: &str, window: Duration) -> MeasureResult<LinkRate>;

    /// Short backend name for logs
    fn backend(&self) -> &'static str;
}
