//! Kernel counter reader
//!
//! Reads `<root>/<interface>/statistics/{rx,tx}_bytes` at both ends of a
//! sampling window and converts the delta into a rate.

use async_trait::async_trait;
use log::{debug, trace};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::collectors::counters::snapshot::{CounterSnapshot, rate_between};
use crate::collectors::counters::{InterfaceMeter, LinkRate};
use crate::collectors::formatting::RateUnit;
use crate::errors::{MeasureResult, MeasurementError};

/// Default location of per-interface statistics on Linux
pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/net";

/// Anything that can produce an instantaneous counter snapshot for an interface
pub trait CounterSource: Send + Sync {
    fn snapshot(&self, interface: &str) -> MeasureResult<CounterSnapshot>;
}

/// Counter files exposed by the kernel under a sysfs root
#[derive(Debug, Clone)]
pub struct SysfsCounters {
    root: PathBuf,
}

impl Default for SysfsCounters {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_ROOT)
    }
}

impl SysfsCounters {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Paths of the receive and transmit byte counters for `interface`
    pub fn counter_paths(&self, interface: &str) -> (PathBuf, PathBuf) {
        let base = self.root.join(interface).join("statistics");
        (base.join("rx_bytes"), base.join("tx_bytes"))
    }

    /// Checks that both counters exist and parse, without timing anything
    pub fn check(&self, interface: &str) -> MeasureResult<()> {
        self.snapshot(interface).map(|_| ())
    }

    fn read_counter(path: &Path) -> MeasureResult<u64> {
        let text = fs::read_to_string(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                MeasurementError::unavailable(format!("{}: {}", path.display(), e))
            }
            _ => MeasurementError::unavailable(format!("failed to read {}: {}", path.display(), e)),
        })?;

        text.trim().parse::<u64>().map_err(|e| {
            MeasurementError::parse(format!(
                "counter {} holds {:?}: {}",
                path.display(),
                text.trim(),
                e
            ))
        })
    }
}

impl CounterSource for SysfsCounters {
    fn snapshot(&self, interface: &str) -> MeasureResult<CounterSnapshot> {
        let (rx_path, tx_path) = self.counter_paths(interface);
        if !rx_path.exists() || !tx_path.exists() {
            return Err(MeasurementError::unavailable(format!(
                "statistics not found for interface '{}' under {}",
                interface,
                self.root.display()
            )));
        }

        let rx_bytes = Self::read_counter(&rx_path)?;
        let tx_bytes = Self::read_counter(&tx_path)?;
        Ok(CounterSnapshot::now(rx_bytes, tx_bytes))
    }
}

/// Two-snapshot rate meter over any counter source
#[derive(Debug, Clone)]
pub struct CounterSampler<S> {
    source: S,
    unit: RateUnit,
    /// Extra time added to the window before the closing snapshot
    safety_margin: Duration,
}

impl<S: CounterSource> CounterSampler<S> {
    pub fn new(source: S, unit: RateUnit) -> Self {
        Self {
            source,
            unit,
            safety_margin: Duration::ZERO,
        }
    }

    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

#[async_trait]
impl<S: CounterSource> InterfaceMeter for CounterSampler<S> {
    async fn measure(&self, interface: &str, window: Duration) -> MeasureResult<LinkRate> {
        let start = self.source.snapshot(interface)?;
        trace!(
            "Interface '{}' opening snapshot: rx={} tx={}",
            interface, start.rx_bytes, start.tx_bytes
        );

        tokio::time::sleep(window + self.safety_margin).await;

        let end = self.source.snapshot(interface)?;
        if end.rx_bytes < start.rx_bytes || end.tx_bytes < start.tx_bytes {
            debug!(
                "Interface '{}' counter wrapped during window (rx: {} -> {}, tx: {} -> {})",
                interface, start.rx_bytes, end.rx_bytes, start.tx_bytes, end.tx_bytes
            );
        }

        let rate = rate_between(&start, &end, self.unit);
        trace!(
            "Interface '{}' closing snapshot: rx={} tx={} -> rx={:.4} tx={:.4} {}",
            interface,
            end.rx_bytes,
            end.tx_bytes,
            rate.rx,
            rate.tx,
            self.unit.label()
        );
        Ok(rate)
    }

    fn backend(&self) -> &'static str {
        "sysfs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn write_counters(root: &Path, interface: &str, rx: &str, tx: &str) {
        let dir = root.join(interface).join("statistics");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("rx_bytes"), rx).unwrap();
        fs::write(dir.join("tx_bytes"), tx).unwrap();
    }

    /// Source replaying fixed counter pairs in order
    struct ScriptedCounters {
        readings: Mutex<VecDeque<(u64, u64)>>,
    }

    impl ScriptedCounters {
        fn new(readings: &[(u64, u64)]) -> Self {
            Self {
                readings: Mutex::new(readings.iter().copied().collect()),
            }
        }
    }

    impl CounterSource for ScriptedCounters {
        fn snapshot(&self, _interface: &str) -> MeasureResult<CounterSnapshot> {
            let (rx, tx) = self
                .readings
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| MeasurementError::unavailable("script exhausted"))?;
            Ok(CounterSnapshot::now(rx, tx))
        }
    }

    #[test]
    fn test_counter_paths() {
        let counters = SysfsCounters::default();
        let (rx, tx) = counters.counter_paths("wlp2s0");
        assert_eq!(rx, PathBuf::from("/sys/class/net/wlp2s0/statistics/rx_bytes"));
        assert_eq!(tx, PathBuf::from("/sys/class/net/wlp2s0/statistics/tx_bytes"));
    }

    #[test]
    fn test_snapshot_reads_trimmed_values() {
        let root = TempDir::new().unwrap();
        write_counters(root.path(), "eth0", "123456\n", " 789 \n");

        let counters = SysfsCounters::new(root.path());
        let snapshot = counters.snapshot("eth0").unwrap();
        assert_eq!(snapshot.rx_bytes, 123456);
        assert_eq!(snapshot.tx_bytes, 789);
        assert!(counters.check("eth0").is_ok());
    }

    #[test]
    fn test_missing_interface_is_unavailable() {
        let root = TempDir::new().unwrap();
        let counters = SysfsCounters::new(root.path());

        match counters.snapshot("wlx000000000000") {
            Err(MeasurementError::SourceUnavailable(msg)) => {
                assert!(msg.contains("wlx000000000000"))
            }
            other => panic!("expected SourceUnavailable, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_counter_is_parse_error() {
        let root = TempDir::new().unwrap();
        write_counters(root.path(), "eth0", "not-a-number", "1");

        let counters = SysfsCounters::new(root.path());
        assert!(matches!(
            counters.snapshot("eth0"),
            Err(MeasurementError::Parse(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_applies_rate_formula() {
        let sampler = CounterSampler::new(
            ScriptedCounters::new(&[(1_000, 500), (9_000, 4_500)]),
            RateUnit::Mbps,
        );

        let rate = sampler
            .measure("eth0", Duration::from_secs(2))
            .await
            .unwrap();

        let expected_rx = ((9_000.0 - 1_000.0) * 8.0) / (2.0 * 1e6);
        let expected_tx = ((4_500.0 - 500.0) * 8.0) / (2.0 * 1e6);
        // Paused time advances in whole milliseconds
        assert!((rate.rx - expected_rx).abs() <= expected_rx * 1e-3, "rx={}", rate.rx);
        assert!((rate.tx - expected_tx).abs() <= expected_tx * 1e-3, "tx={}", rate.tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_handles_wrap() {
        let sampler = CounterSampler::new(
            ScriptedCounters::new(&[(u64::MAX - 999, 0), (1_000, 0)]),
            RateUnit::Mbps,
        );

        let rate = sampler
            .measure("eth0", Duration::from_secs(1))
            .await
            .unwrap();

        // 2000 bytes crossed the wrap in one second
        let expected = (2_000.0 * 8.0) / 1e6;
        assert!((rate.rx - expected).abs() <= expected * 1e-3);
        assert_eq!(rate.tx, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_waits_window_plus_margin() {
        let sampler = CounterSampler::new(
            ScriptedCounters::new(&[(0, 0), (0, 0)]),
            RateUnit::Mbps,
        )
        .with_safety_margin(Duration::from_millis(200));

        let started = tokio::time::Instant::now();
        sampler.measure("eth0", Duration::from_secs(3)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(3_200));
    }

    #[tokio::test]
    async fn test_sampler_propagates_unavailable() {
        let root = TempDir::new().unwrap();
        let sampler = CounterSampler::new(SysfsCounters::new(root.path()), RateUnit::Mbps);

        let result = sampler.measure("missing0", Duration::from_secs(5)).await;
        assert!(matches!(result, Err(MeasurementError::SourceUnavailable(_))));
        assert_eq!(sampler.backend(), "sysfs");
    }
}
