//! Column schema of the survey log
//!
//! The schema is fixed when a run starts and never changes for the lifetime of
//! the output file. Every record carries exactly one value per metric column.

use std::fmt;

use crate::collectors::formatting::RateUnit;

pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const DELIMITER: &str = ",";

/// How a metric column is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A rate, written with 2 decimals
    Throughput,
    /// Decimal degrees, written with 4 decimals
    Coordinate,
}

impl MetricKind {
    pub fn precision(self) -> usize {
        match self {
            MetricKind::Throughput => 2,
            MetricKind::Coordinate => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metric {
    pub name: String,
    pub kind: MetricKind,
}

impl Metric {
    pub fn throughput<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Throughput,
        }
    }

    pub fn coordinate<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Coordinate,
        }
    }

    /// The probe's download column, e.g. `iperf3_download_Mbps`
    pub fn probe_download(unit: RateUnit) -> Self {
        Self::throughput(format!("iperf3_download_{}", unit.label()))
    }

    /// Receive and transmit columns of one interface, e.g. `RX1_Mbps`, `TX1_Mbps`
    pub fn interface_pair(label: &str, unit: RateUnit) -> [Self; 2] {
        [
            Self::throughput(format!("RX{}_{}", label, unit.label())),
            Self::throughput(format!("TX{}_{}", label, unit.label())),
        ]
    }

    pub fn position_pair() -> [Self; 2] {
        [Self::coordinate("Latitude"), Self::coordinate("Longitude")]
    }

    /// Renders `value` at this metric's precision
    pub fn format_value(&self, value: f64) -> String {
        format!("{:.*}", self.kind.precision(), value)
    }
}

/// Ordered metric columns following the leading timestamp column
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSchema {
    metrics: Vec<Metric>,
}

impl RecordSchema {
    pub fn new(metrics: Vec<Metric>) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// Number of metric columns (the timestamp is not counted)
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.metrics.iter().position(|m| m.name == name)
    }

    /// All column names including the timestamp
    pub fn columns(&self) -> Vec<&str> {
        std::iter::once(TIMESTAMP_COLUMN)
            .chain(self.metrics.iter().map(|m| m.name.as_str()))
            .collect()
    }

    /// Header line without the trailing newline
    pub fn header(&self) -> String {
        self.columns().join(DELIMITER)
    }
}

impl fmt::Display for RecordSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.header())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn survey_schema() -> RecordSchema {
        let mut metrics = vec![Metric::probe_download(RateUnit::Mbps)];
        metrics.extend(Metric::interface_pair("1", RateUnit::Mbps));
        metrics.extend(Metric::interface_pair("2", RateUnit::Mbps));
        metrics.extend(Metric::position_pair());
        RecordSchema::new(metrics)
    }

    #[test]
    fn test_header_matches_survey_layout() {
        assert_eq!(
            survey_schema().header(),
            "timestamp,iperf3_download_Mbps,RX1_Mbps,TX1_Mbps,RX2_Mbps,TX2_Mbps,Latitude,Longitude"
        );
        assert_eq!(survey_schema().len(), 7);
        assert_eq!(survey_schema().columns().len(), 8);
    }

    #[test]
    fn test_gbps_labels() {
        let [rx, tx] = Metric::interface_pair("singtel", RateUnit::Gbps);
        assert_eq!(rx.name, "RXsingtel_Gbps");
        assert_eq!(tx.name, "TXsingtel_Gbps");
        assert_eq!(Metric::probe_download(RateUnit::Gbps).name, "iperf3_download_Gbps");
    }

    #[test]
    fn test_precision() {
        assert_eq!(Metric::throughput("x").format_value(94.3456), "94.35");
        assert_eq!(Metric::throughput("x").format_value(0.0), "0.00");
        assert_eq!(Metric::coordinate("x").format_value(1.285390), "1.2854");
        assert_eq!(Metric::coordinate("x").format_value(0.0), "0.0000");
    }

    #[test]
    fn test_position_lookup() {
        let schema = survey_schema();
        assert_eq!(schema.position("iperf3_download_Mbps"), Some(0));
        assert_eq!(schema.position("Longitude"), Some(6));
        assert_eq!(schema.position("missing"), None);
        assert!(RecordSchema::default().is_empty());
        assert_eq!(RecordSchema::default().header(), "timestamp");
    }
}
