//! Counter snapshots and rate calculation
//!
//! Kernel byte counters are unsigned 64-bit values that may wrap. A delta
//! between two readings assumes at most one wrap inside the sampling window:
//! at 100 Gbps a 64-bit byte counter takes decades to wrap, so a second wrap
//! within one window is not representable and is not detected.

use tokio::time::Instant;

use crate::collectors::counters::LinkRate;
use crate::collectors::formatting::RateUnit;

/// Smallest elapsed time used as a divisor, in seconds
pub const ELAPSED_FLOOR_SECS: f64 = 1e-6;

/// Both byte counters of one interface at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub taken_at: Instant,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

impl CounterSnapshot {
    /// Snapshot stamped with the current (tokio) instant
    pub fn now(rx_bytes: u64, tx_bytes: u64) -> Self {
        Self {
            taken_at: Instant::now(),
            rx_bytes,
            tx_bytes,
        }
    }
}

/// Bytes counted between two readings of one counter
///
/// A later reading smaller than the earlier one is a single wrap of the 64-bit
/// counter, giving `2^64 - earlier + later`.
///
/// ```
/// use link_survey::collectors::counters::counter_delta;
///
/// assert_eq!(counter_delta(1_000, 9_000), 8_000);
/// assert_eq!(counter_delta(u64::MAX - 9, 10), 20);
/// ```
pub fn counter_delta(earlier: u64, later: u64) -> u64 {
    later.wrapping_sub(earlier)
}

/// Rate between two snapshots of the same interface
pub fn rate_between(start: &CounterSnapshot, end: &CounterSnapshot, unit: RateUnit) -> LinkRate {
    let elapsed = end.taken_at.saturating_duration_since(start.taken_at);
    rate_over(
        counter_delta(start.rx_bytes, end.rx_bytes),
        counter_delta(start.tx_bytes, end.tx_bytes),
        elapsed.as_secs_f64(),
        unit,
    )
}

/// Converts byte deltas over `elapsed_secs` into a rate in `unit`
///
/// Elapsed time is floored at [`ELAPSED_FLOOR_SECS`] so a clock anomaly never
/// divides by zero.
pub fn rate_over(rx_delta: u64, tx_delta: u64, elapsed_secs: f64, unit: RateUnit) -> LinkRate {
    let dt = elapsed_secs.max(ELAPSED_FLOOR_SECS);
    LinkRate {
        rx: (rx_delta as f64 * 8.0) / (dt * unit.scale()),
        tx: (tx_delta as f64 * 8.0) / (dt * unit.scale()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    #[test]
    fn test_delta_without_wrap() {
        assert_eq!(counter_delta(0, 0), 0);
        assert_eq!(counter_delta(1_000, 9_000), 8_000);
        assert_eq!(counter_delta(500, 4_500), 4_000);
    }

    #[test]
    fn test_delta_with_single_wrap() {
        assert_eq!(counter_delta(u64::MAX, 0), 1);
        assert_eq!(counter_delta(u64::MAX, u64::MAX - 1), u64::MAX);
        assert_eq!(counter_delta(10, 9), u64::MAX);
    }

    #[test]
    fn test_rate_formula() {
        let rate = rate_over(8_000, 4_000, 2.0, RateUnit::Mbps);
        assert_eq!(rate.rx, (8_000.0 * 8.0) / (2.0 * 1e6));
        assert_eq!(rate.tx, (4_000.0 * 8.0) / (2.0 * 1e6));

        let rate = rate_over(8_000, 4_000, 2.0, RateUnit::Gbps);
        assert_eq!(rate.rx, (8_000.0 * 8.0) / (2.0 * 1e9));
    }

    #[test]
    fn test_zero_elapsed_is_floored() {
        let rate = rate_over(1, 0, 0.0, RateUnit::Mbps);
        assert!(rate.rx.is_finite());
        assert_eq!(rate.rx, 8.0 / (ELAPSED_FLOOR_SECS * 1e6));
        assert_eq!(rate.tx, 0.0);

        let rate = rate_over(1, 0, -3.0, RateUnit::Mbps);
        assert!(rate.rx.is_finite());
    }

    #[test]
    fn test_rate_between_snapshots() {
        let start = CounterSnapshot::now(1_000, 500);
        let end = CounterSnapshot {
            taken_at: start.taken_at + Duration::from_secs(2),
            rx_bytes: 9_000,
            tx_bytes: 4_500,
        };

        let rate = rate_between(&start, &end, RateUnit::Mbps);
        assert_eq!(rate.rx, ((9_000.0 - 1_000.0) * 8.0) / (2.0 * 1e6));
        assert_eq!(rate.tx, ((4_500.0 - 500.0) * 8.0) / (2.0 * 1e6));
    }

    #[test]
    fn test_rate_between_reversed_instants() {
        // An end snapshot stamped before the start must not produce a negative rate
        let end = CounterSnapshot::now(2_000, 2_000);
        let start = CounterSnapshot {
            taken_at: end.taken_at + Duration::from_secs(1),
            rx_bytes: 1_000,
            tx_bytes: 1_000,
        };
        let rate = rate_between(&start, &end, RateUnit::Mbps);
        assert!(rate.rx > 0.0);
        assert!(rate.rx.is_finite());
    }

    proptest! {
        #[test]
        fn wraparound_law(rx0 in any::<u64>(), rx1 in any::<u64>()) {
            let delta = counter_delta(rx0, rx1);
            if rx1 >= rx0 {
                prop_assert_eq!(delta, rx1 - rx0);
            } else {
                let expected = (1u128 << 64) - rx0 as u128 + rx1 as u128;
                prop_assert_eq!(delta as u128, expected);
            }
        }

        #[test]
        fn rates_are_non_negative(
            rx in any::<u64>(),
            tx in any::<u64>(),
            elapsed in 0.0f64..3600.0,
        ) {
            let rate = rate_over(rx, tx, elapsed, RateUnit::Mbps);
            prop_assert!(rate.rx >= 0.0 && rate.rx.is_finite());
            prop_assert!(rate.tx >= 0.0 && rate.tx.is_finite());
        }
    }
}
