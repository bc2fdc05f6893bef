//! Units and formatting utilities for throughput and position data
//!
//! This module owns the unit convention shared by every rate source: counter
//! readers, the ifstat sampler and the bandwidth probe all report in the
//! configured [`RateUnit`], so the CSV columns of one run are comparable.

use serde::{Deserialize, Serialize};

/// Decimal unit used for rate columns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateUnit {
    /// Megabits per second (10^6 bits/s)
    #[default]
    Mbps,
    /// Gigabits per second (10^9 bits/s)
    Gbps,
}

impl RateUnit {
    /// Bits per second in one unit
    pub fn scale(self) -> f64 {
        match self {
            RateUnit::Mbps => 1_000_000.0,
            RateUnit::Gbps => 1_000_000_000.0,
        }
    }

    /// Column suffix and display label
    pub fn label(self) -> &'static str {
        match self {
            RateUnit::Mbps => "Mbps",
            RateUnit::Gbps => "Gbps",
        }
    }

    /// Converts a raw bits-per-second figure into this unit
    pub fn from_bits_per_second(self, bits_per_second: f64) -> f64 {
        bits_per_second / self.scale()
    }
}

/// Formats a rate in bits per second with a decimal unit prefix
///
/// # Examples
///
/// ```
/// use link_survey::collectors::formatting::format_bits_per_second;
///
/// assert_eq!(format_bits_per_second(0.0), "0.00 bps");
/// assert_eq!(format_bits_per_second(1_500.0), "1.50 Kbps");
/// assert_eq!(format_bits_per_second(94_300_000.0), "94.30 Mbps");
/// assert_eq!(format_bits_per_second(2_000_000_000.0), "2.00 Gbps");
/// ```
pub fn format_bits_per_second(bits_per_second: f64) -> String {
    if bits_per_second < 1_000.0 {
        format!("{:.2} bps", bits_per_second)
    } else if bits_per_second < 1_000_000.0 {
        format!("{:.2} Kbps", bits_per_second / 1_000.0)
    } else if bits_per_second < 1_000_000_000.0 {
        format!("{:.2} Mbps", bits_per_second / 1_000_000.0)
    } else {
        format!("{:.2} Gbps", bits_per_second / 1_000_000_000.0)
    }
}

/// Formats a value already expressed in `unit`
pub fn format_rate(value: f64, unit: RateUnit) -> String {
    format!("{:.2} {}", value, unit.label())
}

/// Formats a latitude/longitude pair at the log's coordinate precision
pub fn format_coordinates(latitude: f64, longitude: f64) -> String {
    format!("{:.4}, {:.4}", latitude, longitude)
}
