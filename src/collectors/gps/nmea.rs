//! Minimal NMEA 0183 RMC parsing and a line-oriented fix stream
//!
//! Only recommended-minimum sentences (`$GPRMC`, `$GNRMC`) are interpreted;
//! every other sentence is ignored. Malformed sentences are skipped.

use log::trace;
use std::io::{self, BufRead, ErrorKind};
use std::time::Instant;

use crate::errors::{MeasureResult, MeasurementError};

/// Sentence tags carrying a position fix
pub const RMC_PREFIXES: [&str; 2] = ["$GPRMC", "$GNRMC"];

/// A resolved position in signed decimal degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
}

pub fn is_position_sentence(line: &str) -> bool {
    RMC_PREFIXES.iter().any(|prefix| line.starts_with(prefix))
}

/// Verifies the `*hh` checksum when present and returns the sentence body
/// between `$` and `*`
fn checked_body(sentence: &str) -> MeasureResult<&str> {
    let body = sentence
        .strip_prefix('$')
        .ok_or_else(|| MeasurementError::parse("sentence does not start with '$'"))?;

    let Some((body, checksum)) = body.split_once('*') else {
        return Ok(body);
    };

    let expected = u8::from_str_radix(checksum.trim(), 16)
        .map_err(|_| MeasurementError::parse(format!("bad checksum field {:?}", checksum)))?;
    let actual = body.bytes().fold(0u8, |acc, b| acc ^ b);
    if actual != expected {
        return Err(MeasurementError::parse(format!(
            "checksum mismatch: computed {:02X}, sentence says {:02X}",
            actual, expected
        )));
    }
    Ok(body)
}

/// Converts `ddmm.mmmm` / `dddmm.mmmm` plus hemisphere into decimal degrees
fn parse_coordinate(value: &str, hemisphere: &str, max_degrees: f64) -> MeasureResult<f64> {
    // Split below is by byte index
    if !value.is_ascii() {
        return Err(MeasurementError::parse(format!(
            "coordinate {:?} has non-ASCII bytes",
            value
        )));
    }
    let dot = value.find('.').unwrap_or(value.len());
    if dot < 3 {
        return Err(MeasurementError::parse(format!(
            "coordinate {:?} is too short",
            value
        )));
    }

    let (degrees, minutes) = value.split_at(dot - 2);
    let degrees: f64 = degrees
        .parse()
        .map_err(|_| MeasurementError::parse(format!("bad degrees in {:?}", value)))?;
    let minutes: f64 = minutes
        .parse()
        .map_err(|_| MeasurementError::parse(format!("bad minutes in {:?}", value)))?;
    if !(0.0..60.0).contains(&minutes) {
        return Err(MeasurementError::parse(format!(
            "minutes out of range in {:?}",
            value
        )));
    }

    let magnitude = degrees + minutes / 60.0;
    if magnitude > max_degrees {
        return Err(MeasurementError::parse(format!(
            "coordinate {:?} exceeds {} degrees",
            value, max_degrees
        )));
    }

    match hemisphere {
        "N" | "E" => Ok(magnitude),
        "S" | "W" => Ok(-magnitude),
        other => Err(MeasurementError::parse(format!(
            "unknown hemisphere {:?}",
            other
        ))),
    }
}

/// Parses an RMC sentence
///
/// Returns `Ok(None)` for a well-formed sentence whose status is not `A`
/// (receiver has no fix yet).
pub fn parse_rmc(sentence: &str) -> MeasureResult<Option<Fix>> {
    let body = checked_body(sentence.trim())?;
    let fields: Vec<&str> = body.split(',').collect();
    if fields.len() < 7 {
        return Err(MeasurementError::parse(format!(
            "RMC sentence has {} fields, need at least 7",
            fields.len()
        )));
    }

    if fields[2] != "A" {
        return Ok(None);
    }

    let latitude = parse_coordinate(fields[3], fields[4], 90.0)?;
    let longitude = parse_coordinate(fields[5], fields[6], 180.0)?;
    Ok(Some(Fix {
        latitude,
        longitude,
    }))
}

/// Lazy sequence of fixes read from a line-oriented source
///
/// Bytes that are not valid UTF-8 are replaced rather than rejected. The
/// stream ends when the source reports end of input (or, for a serial line, a
/// read timeout with no data).
pub struct FixStream<R> {
    reader: R,
    line: Vec<u8>,
    skipped: u64,
}

impl<R: BufRead> FixStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::with_capacity(128),
            skipped: 0,
        }
    }

    /// Malformed position sentences skipped so far
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Reads until the next valid fix
    ///
    /// Returns `Ok(None)` at end of input, or once `deadline` has passed.
    pub fn next_fix(&mut self, deadline: Option<Instant>) -> io::Result<Option<Fix>> {
        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(None);
            }

            self.line.clear();
            let read = match self.reader.read_until(b'\n', &mut self.line) {
                Ok(read) => read,
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Ok(None);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if read == 0 {
                return Ok(None);
            }

            let text = String::from_utf8_lossy(&self.line);
            let sentence = text.trim();
            if !is_position_sentence(sentence) {
                continue;
            }

            match parse_rmc(sentence) {
                Ok(Some(fix)) => return Ok(Some(fix)),
                Ok(None) => trace!("Receiver reports no fix yet: {}", sentence),
                Err(e) => {
                    trace!("Skipping malformed sentence {:?}: {}", sentence, e);
                    self.skipped += 1;
                }
            }
        }
    }
}

impl<R: BufRead> Iterator for FixStream<R> {
    type Item = Fix;

    fn next(&mut self) -> Option<Fix> {
        self.next_fix(None).ok().flatten()
    }
}
