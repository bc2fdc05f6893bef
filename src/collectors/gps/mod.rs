//! Position fixes from a GPS receiver
//!
//! The receiver is optional. Its presence is checked before every iteration
//! with [`device_available`]; a missing device is never opened.

pub mod nmea;
pub mod serial;

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::errors::MeasureResult;

pub use nmea::{Fix, FixStream, parse_rmc};
pub use serial::SerialFixReader;

/// Source of one position fix per freshly opened session
///
/// The reader must give up once `budget` has elapsed; the orchestrator relies
/// on this so an iteration is never held open by a silent receiver.
#[async_trait]
pub trait FixReader: Send + Sync {
    async fn first_fix(&self, port: &Path, budget: Duration) -> MeasureResult<Fix>;
}

/// True when `path` exists and the process may read it
pub fn device_available(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }

    #[cfg(target_os = "linux")]
    {
        nix::unistd::access(path, nix::unistd::AccessFlags::R_OK).is_ok()
    }

    #[cfg(not(target_os = "linux"))]
    {
        true
    }
}
