//! Structured report of the bandwidth test (iperf3 `-J` output)
//!
//! Only the fields needed to pick one throughput figure are modelled; all
//! other keys are ignored. Extraction rules, highest priority first:
//!
//! 1. `end.sum_received.bits_per_second`: client-side download rate
//! 2. `end.sum.bits_per_second`: generic aggregate (UDP runs)
//! 3. `end.sum.receiver.bits_per_second`: aggregate nesting a receiver record
//! 4. sum over `end.streams[]`, each stream contributing its
//!    `receiver.bits_per_second` when present, else its own `bits_per_second`
//!
//! The first rule that finds a figure decides; a figure that is not positive
//! makes the whole report unusable rather than falling through to a lower rule.

use log::debug;
use serde::Deserialize;

use crate::errors::{MeasureResult, MeasurementError};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeReport {
    #[serde(default)]
    pub end: Option<ReportEnd>,
    /// Set by iperf3 when the test could not run
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportEnd {
    #[serde(default)]
    pub sum_received: Option<Figure>,
    #[serde(default)]
    pub sum: Option<SumNode>,
    #[serde(default)]
    pub streams: Option<Vec<StreamEnd>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Figure {
    #[serde(default)]
    pub bits_per_second: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SumNode {
    #[serde(default)]
    pub bits_per_second: Option<f64>,
    #[serde(default)]
    pub receiver: Option<Figure>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamEnd {
    #[serde(default)]
    pub receiver: Option<Figure>,
    #[serde(default)]
    pub bits_per_second: Option<f64>,
}

/// Which extraction rule produced a figure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionRule {
    SumReceived,
    Sum,
    SumReceiver,
    StreamTotal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub bits_per_second: f64,
    pub rule: ExtractionRule,
}

impl ProbeReport {
    /// Parses report text; the raw text is logged when it is not valid JSON
    pub fn parse(text: &str) -> MeasureResult<Self> {
        serde_json::from_str(text).map_err(|e| {
            debug!("Unparseable probe report ({} bytes): {}", text.len(), text);
            MeasurementError::probe(format!("probe report is not valid JSON: {}", e))
        })
    }

    fn candidate(&self) -> Option<(f64, ExtractionRule)> {
        let end = self.end.as_ref()?;

        if let Some(bps) = end.sum_received.as_ref().and_then(|f| f.bits_per_second) {
            return Some((bps, ExtractionRule::SumReceived));
        }

        if let Some(sum) = &end.sum {
            if let Some(bps) = sum.bits_per_second {
                return Some((bps, ExtractionRule::Sum));
            }
            if let Some(bps) = sum.receiver.as_ref().and_then(|f| f.bits_per_second) {
                return Some((bps, ExtractionRule::SumReceiver));
            }
        }

        let streams = end.streams.as_deref().filter(|s| !s.is_empty())?;
        let total = streams
            .iter()
            .filter_map(|stream| {
                stream
                    .receiver
                    .as_ref()
                    .and_then(|r| r.bits_per_second)
                    .or(stream.bits_per_second)
            })
            .sum();
        Some((total, ExtractionRule::StreamTotal))
    }

    /// Picks the single throughput figure of this report
    pub fn throughput(&self) -> MeasureResult<Throughput> {
        if let Some(error) = &self.error {
            return Err(MeasurementError::probe(format!("probe reported: {}", error)));
        }

        match self.candidate() {
            Some((bps, rule)) if bps.is_finite() && bps > 0.0 => Ok(Throughput {
                bits_per_second: bps,
                rule,
            }),
            Some((bps, rule)) => Err(MeasurementError::probe(format!(
                "report figure {} from {:?} is not a positive rate",
                bps, rule
            ))),
            None => Err(MeasurementError::probe(
                "could not find bits_per_second in probe report",
            )),
        }
    }
}

/// Parses report text and extracts its throughput figure
pub fn extract_throughput(text: &str) -> MeasureResult<Throughput> {
    ProbeReport::parse(text)?.throughput()
}
