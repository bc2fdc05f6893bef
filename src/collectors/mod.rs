//! Measurement sources
//!
//! - `counters`: per-interface receive/transmit rates (kernel counters or ifstat)
//! - `probe`: active throughput test against a remote server
//! - `gps`: position fix from a serial receiver
//! - `formatting`: rate units and display helpers shared by all sources

pub mod counters;
pub mod formatting;
pub mod gps;
pub mod probe;

use std::path::{Path, PathBuf};

pub use counters::{CounterBackend, InterfaceMeter, LinkRate};
pub use formatting::RateUnit;
pub use gps::{Fix, FixReader};
pub use probe::ThroughputProbe;

/// Resolves an external program the way the shell would, through `PATH`
///
/// Names containing a path separator are checked as given.
pub fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}
