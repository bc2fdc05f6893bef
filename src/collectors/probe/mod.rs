//! Active bandwidth probe
//!
//! Launches an external throughput test against a server and reduces its
//! structured report to one bits-per-second figure.

pub mod iperf;
pub mod report;

use async_trait::async_trait;
use std::time::Duration;

use crate::errors::MeasureResult;

pub use iperf::IperfProbe;
pub use report::{ExtractionRule, ProbeReport, Throughput, extract_throughput};

/// A throughput test against `server` lasting `duration`
///
/// The call blocks for the whole test. Callers must not wrap it in a timeout
/// shorter than `duration` plus process overhead.
#[async_trait]
pub trait ThroughputProbe: Send + Sync {
    /// Returns the measured throughput in bits per second
    async fn measure(&self, server: &str, duration: Duration) -> MeasureResult<f64>;
}
