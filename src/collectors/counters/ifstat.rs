//! `ifstat`-backed interface meter
//!
//! Runs `ifstat -i <iface> 1 <N>` for the sampling window and averages the
//! per-second `KB/s in` / `KB/s out` samples. ifstat's kilobyte is 1000 bytes
//! here, so one KB/s is 8000 bits/s.

use async_trait::async_trait;
use log::{debug, trace};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::process::Command;

use crate::collectors::counters::{InterfaceMeter, LinkRate};
use crate::collectors::formatting::RateUnit;
use crate::errors::{MeasureResult, MeasurementError};

/// Lines printed by ifstat before the first sample (interface name, column titles)
const HEADER_LINES: usize = 2;

const BITS_PER_KILOBYTE: f64 = 8_000.0;

#[derive(Debug, Clone)]
pub struct IfstatSampler {
    program: String,
    unit: RateUnit,
}

impl IfstatSampler {
    pub fn new<S: Into<String>>(program: S, unit: RateUnit) -> Self {
        Self {
            program: program.into(),
            unit,
        }
    }

    fn command(&self, interface: &str, window: Duration) -> Command {
        let samples = window.as_secs().max(1);
        let mut cmd = Command::new(&self.program);
        cmd.args(["-i", interface, "1", &samples.to_string()])
            .kill_on_drop(true);
        cmd
    }
}

/// Averages the KB/s columns of ifstat's output
///
/// Returns `(avg_rx_kBps, avg_tx_kBps)`. Lines that do not carry two numeric
/// columns are skipped.
pub fn parse_ifstat_output(output: &str) -> MeasureResult<(f64, f64)> {
    let (mut rx_sum, mut tx_sum, mut samples) = (0.0, 0.0, 0usize);

    for line in output.trim().lines().skip(HEADER_LINES) {
        let mut columns = line.split_whitespace();
        let (Some(rx), Some(tx)) = (columns.next(), columns.next()) else {
            continue;
        };
        match (rx.parse::<f64>(), tx.parse::<f64>()) {
            (Ok(rx), Ok(tx)) => {
                rx_sum += rx;
                tx_sum += tx;
                samples += 1;
            }
            _ => {
                trace!("Skipping ifstat line {:?}", line);
            }
        }
    }

    if samples == 0 {
        return Err(MeasurementError::parse("ifstat produced no samples"));
    }

    Ok((rx_sum / samples as f64, tx_sum / samples as f64))
}

#[async_trait]
impl InterfaceMeter for IfstatSampler {
    async fn measure(&self, interface: &str, window: Duration) -> MeasureResult<LinkRate> {
        let output = self
            .command(interface, window)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    MeasurementError::unavailable(format!("'{}' is not installed", self.program))
                }
                _ => MeasurementError::unavailable(format!(
                    "failed to run '{}': {}",
                    self.program, e
                )),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let (rx_kbps, tx_kbps) = parse_ifstat_output(&stdout).map_err(|e| {
            debug!(
                "ifstat for '{}' exited with {} (stderr={:?})",
                interface,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            MeasurementError::unavailable(format!("interface '{}': {}", interface, e))
        })?;

        Ok(LinkRate {
            rx: self
                .unit
                .from_bits_per_second(rx_kbps * BITS_PER_KILOBYTE),
            tx: self
                .unit
                .from_bits_per_second(tx_kbps * BITS_PER_KILOBYTE),
        })
    }

    fn backend(&self) -> &'static str {
        "ifstat"
    }
}
