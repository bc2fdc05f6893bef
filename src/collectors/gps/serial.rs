//! Serial-port fix reader
//!
//! Opens the receiver read-only, puts the line in raw mode at the configured
//! baud rate with a short read timeout, and returns the first valid fix of the
//! session. Paths that are not terminals (recorded captures, pipes) are read
//! as-is, which makes field logs replayable.

use async_trait::async_trait;
use log::{debug, trace};
use std::fs::{File, OpenOptions};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::collectors::gps::FixReader;
use crate::collectors::gps::nmea::{Fix, FixStream};
use crate::errors::{MeasureResult, MeasurementError};

/// Baud rates the line setup knows how to apply
pub const SUPPORTED_BAUD_RATES: [u32; 7] = [4800, 9600, 19200, 38400, 57600, 115200, 230400];

pub const DEFAULT_BAUD: u32 = 9600;

#[derive(Debug, Clone)]
pub struct SerialFixReader {
    baud: u32,
    read_timeout: Duration,
}

impl Default for SerialFixReader {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD, Duration::from_secs(1))
    }
}

impl SerialFixReader {
    pub fn new(baud: u32, read_timeout: Duration) -> Self {
        Self { baud, read_timeout }
    }

    /// Opens a fresh session on `port`
    ///
    /// The returned flag tells whether the port is a terminal; on a terminal an
    /// empty read is a timeout, elsewhere it is the end of the data.
    pub fn open(&self, port: &Path) -> MeasureResult<(FixStream<BufReader<File>>, bool)> {
        let file = open_read_only(port)?;
        let is_tty = configure_line(&file, self.baud, self.read_timeout)?;
        debug!(
            "Opened GPS source {} (tty={}, baud={})",
            port.display(),
            is_tty,
            self.baud
        );
        Ok((FixStream::new(BufReader::new(file)), is_tty))
    }

    /// Blocks until the first valid fix of a new session or until `budget` runs out
    pub fn read_first_fix(&self, port: &Path, budget: Duration) -> MeasureResult<Fix> {
        let deadline = Instant::now() + budget;
        let (mut stream, is_tty) = self.open(port)?;

        loop {
            match stream.next_fix(Some(deadline)) {
                Ok(Some(fix)) => return Ok(fix),
                Ok(None) if Instant::now() >= deadline => {
                    return Err(MeasurementError::Timeout(budget));
                }
                Ok(None) if is_tty => {
                    trace!("No data from {} within read timeout", port.display());
                }
                Ok(None) => {
                    return Err(MeasurementError::unavailable(format!(
                        "{} ended without a valid fix ({} malformed sentences)",
                        port.display(),
                        stream.skipped()
                    )));
                }
                Err(e) => {
                    return Err(MeasurementError::unavailable(format!(
                        "read from {} failed: {}",
                        port.display(),
                        e
                    )));
                }
            }
        }
    }
}

#[async_trait]
impl FixReader for SerialFixReader {
    async fn first_fix(&self, port: &Path, budget: Duration) -> MeasureResult<Fix> {
        let reader = self.clone();
        let port: PathBuf = port.to_path_buf();
        tokio::task::spawn_blocking(move || reader.read_first_fix(&port, budget))
            .await
            .map_err(|e| MeasurementError::TaskAborted {
                task: "gps".to_string(),
                reason: e.to_string(),
            })?
    }
}

#[cfg(unix)]
fn open_read_only(port: &Path) -> MeasureResult<File> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut options = OpenOptions::new();
    options.read(true);
    #[cfg(target_os = "linux")]
    options.custom_flags(nix::libc::O_NOCTTY);
    options
        .open(port)
        .map_err(|e| MeasurementError::unavailable(format!("{}: {}", port.display(), e)))
}

#[cfg(not(unix))]
fn open_read_only(port: &Path) -> MeasureResult<File> {
    OpenOptions::new()
        .read(true)
        .open(port)
        .map_err(|e| MeasurementError::unavailable(format!("{}: {}", port.display(), e)))
}

#[cfg(target_os = "linux")]
fn baud_rate(baud: u32) -> Option<nix::sys::termios::BaudRate> {
    use nix::sys::termios::BaudRate;

    match baud {
        4800 => Some(BaudRate::B4800),
        9600 => Some(BaudRate::B9600),
        19200 => Some(BaudRate::B19200),
        38400 => Some(BaudRate::B38400),
        57600 => Some(BaudRate::B57600),
        115200 => Some(BaudRate::B115200),
        230400 => Some(BaudRate::B230400),
        _ => None,
    }
}

/// Raw mode, `baud`, VMIN=0 and VTIME from `read_timeout`; returns false for non-terminals
#[cfg(target_os = "linux")]
fn configure_line(file: &File, baud: u32, read_timeout: Duration) -> MeasureResult<bool> {
    use nix::errno::Errno;
    use nix::sys::termios::{self, ControlFlags, SetArg, SpecialCharacterIndices};

    let mut attrs = match termios::tcgetattr(file) {
        Ok(attrs) => attrs,
        Err(Errno::ENOTTY) | Err(Errno::EINVAL) => return Ok(false),
        Err(e) => {
            return Err(MeasurementError::unavailable(format!(
                "cannot read line settings: {}",
                e
            )));
        }
    };

    let speed = baud_rate(baud)
        .ok_or_else(|| MeasurementError::unavailable(format!("unsupported baud rate {}", baud)))?;

    termios::cfmakeraw(&mut attrs);
    termios::cfsetspeed(&mut attrs, speed)
        .map_err(|e| MeasurementError::unavailable(format!("cannot set baud rate: {}", e)))?;
    attrs.control_flags |= ControlFlags::CLOCAL | ControlFlags::CREAD;

    let deciseconds = (read_timeout.as_millis() / 100).clamp(1, 255) as u8;
    attrs.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    attrs.control_chars[SpecialCharacterIndices::VTIME as usize] = deciseconds;

    termios::tcsetattr(file, SetArg::TCSANOW, &attrs)
        .map_err(|e| MeasurementError::unavailable(format!("cannot apply line settings: {}", e)))?;
    Ok(true)
}

#[cfg(not(target_os = "linux"))]
fn configure_line(_file: &File, _baud: u32, _read_timeout: Duration) -> MeasureResult<bool> {
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const CAPTURE: &str = "$GPGGA,083559.00,0117.1234,N,10351.6543,E,1,08,0.9,545.4,M,46.9,M,,*47\n\
$GPRMC,083559.00,V,,,,,,,091202,,,N\n\
$GPRMC,083600.00,A,0117.1234,N,10351.6543,E,0.004,77.52,091202,,,A\n";

    #[test]
    fn test_replay_capture_yields_first_fix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("capture.nmea");
        fs::write(&path, CAPTURE).unwrap();

        let fix = SerialFixReader::default()
            .read_first_fix(&path, Duration::from_secs(5))
            .unwrap();
        assert!((fix.latitude - (1.0 + 17.1234 / 60.0)).abs() < 1e-9);
        assert!((fix.longitude - (103.0 + 51.6543 / 60.0)).abs() < 1e-9);
    }

    #[test]
    fn test_capture_without_fix_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nofix.nmea");
        fs::write(&path, "$GPRMC,083559.00,V,,,,,,,091202,,,N\n").unwrap();

        let result = SerialFixReader::default().read_first_fix(&path, Duration::from_secs(5));
        assert!(matches!(result, Err(MeasurementError::SourceUnavailable(_))));
    }

    #[test]
    fn test_missing_port_is_unavailable() {
        let result = SerialFixReader::default()
            .read_first_fix(Path::new("/dev/ttyNOPE-link-survey"), Duration::from_secs(1));
        assert!(matches!(result, Err(MeasurementError::SourceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_async_first_fix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("capture.nmea");
        fs::write(&path, CAPTURE).unwrap();

        let fix = SerialFixReader::new(9600, Duration::from_millis(500))
            .first_fix(&path, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(fix.longitude > 103.8 && fix.longitude < 103.9);
    }

    #[test]
    fn test_supported_baud_rates_include_default() {
        assert!(SUPPORTED_BAUD_RATES.contains(&DEFAULT_BAUD));
    }
}
