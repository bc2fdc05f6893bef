//! Survey configuration
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `LINK_SURVEY__*` environment variables (`__` separates nested keys, e.g.
//! `LINK_SURVEY__PROBE__SERVER`), then command-line overrides applied by the
//! CLI layer.

use chrono::{DateTime, FixedOffset, Local};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::collectors::counters::CounterBackend;
use crate::collectors::counters::sysfs::DEFAULT_SYSFS_ROOT;
use crate::collectors::formatting::RateUnit;
use crate::collectors::gps::serial::{DEFAULT_BAUD, SUPPORTED_BAUD_RATES};
use crate::errors::ConfigError;

/// Configuration file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "link-survey.toml";

pub const ENV_PREFIX: &str = "LINK_SURVEY";

/// Placeholder in `output.path` replaced by the run start time
pub const START_PLACEHOLDER: &str = "{start}";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyConfig {
    pub sampling: SamplingConfig,
    pub probe: ProbeConfig,
    pub counters: CounterConfig,
    pub interfaces: Vec<InterfaceConfig>,
    pub gps: GpsConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Length of every sampling window and of the probe's test
    pub duration_secs: u64,
    /// Pause between two iterations
    pub pause_secs: u64,
    /// Stop after this many committed records; unbounded when absent
    pub max_iterations: Option<u64>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            duration_secs: 10,
            pause_secs: 2,
            max_iterations: None,
        }
    }
}

impl SamplingConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn pause(&self) -> Duration {
        Duration::from_secs(self.pause_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub enabled: bool,
    pub server: Option<String>,
    pub port: Option<u16>,
    pub program: String,
    /// Command prefix, e.g. `["mptcpize", "run"]`
    pub wrapper: Vec<String>,
    pub extra_args: Vec<String>,
    /// Startup/teardown allowance on top of the test duration
    pub grace_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            server: None,
            port: None,
            program: "iperf3".to_string(),
            wrapper: Vec::new(),
            extra_args: Vec::new(),
            grace_secs: 15,
        }
    }
}

impl ProbeConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    pub unit: RateUnit,
    /// Extra time slept before the closing counter snapshot
    pub safety_margin_ms: u64,
    pub sysfs_root: PathBuf,
    pub ifstat_program: String,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            unit: RateUnit::Mbps,
            safety_margin_ms: 0,
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            ifstat_program: "ifstat".to_string(),
        }
    }
}

impl CounterConfig {
    pub fn safety_margin(&self) -> Duration {
        Duration::from_millis(self.safety_margin_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,
    /// Column label (`RX<label>_Mbps`); defaults to the 1-based position
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub backend: CounterBackend,
}

impl InterfaceConfig {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            label: None,
            backend: CounterBackend::Sysfs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsConfig {
    pub enabled: bool,
    pub port: PathBuf,
    pub baud: u32,
    pub read_timeout_ms: u64,
    /// Give up on a fix after this long; defaults to the sampling duration
    pub deadline_secs: Option<u64>,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: PathBuf::from("/dev/ttyACM0"),
            baud: DEFAULT_BAUD,
            read_timeout_ms: 1000,
            deadline_secs: None,
        }
    }
}

impl GpsConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn deadline(&self, sampling: &SamplingConfig) -> Duration {
        Duration::from_secs(self.deadline_secs.unwrap_or(sampling.duration_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output file; `{start}` becomes the run start time as `%Y%m%d_%H%M%S`
    pub path: String,
    /// Fixed zone for timestamps; the local offset at startup when absent
    pub utc_offset_minutes: Option<i32>,
    /// Prefix row timestamps with the date for multi-day runs
    pub include_date: bool,
    /// Sync file data to disk after every row
    pub sync: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: format!("iperf3_results_{}.csv", START_PLACEHOLDER),
            utc_offset_minutes: None,
            include_date: false,
            sync: true,
        }
    }
}

impl OutputConfig {
    pub fn zone(&self) -> Result<FixedOffset, ConfigError> {
        match self.utc_offset_minutes {
            Some(minutes) => FixedOffset::east_opt(minutes.saturating_mul(60)).ok_or_else(|| {
                ConfigError::invalid(format!("utc_offset_minutes {} is out of range", minutes))
            }),
            None => Ok(*Local::now().offset()),
        }
    }

    pub fn timestamp_format(&self) -> &'static str {
        if self.include_date {
            "%Y-%m-%d %H:%M:%S"
        } else {
            "%H:%M:%S"
        }
    }

    pub fn resolve_path(&self, start: &DateTime<FixedOffset>) -> PathBuf {
        let stamp = start.format("%Y%m%d_%H%M%S").to_string();
        PathBuf::from(self.path.replace(START_PLACEHOLDER, &stamp))
    }
}

impl SurveyConfig {
    /// Loads defaults, the configuration file and environment overrides
    ///
    /// An explicitly given file must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (file, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        debug!(
            "Loading configuration from {} (required={})",
            file.display(),
            required
        );

        let settings = config::Config::builder()
            .add_source(config::File::from(file).required(required))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Parses a TOML document over the defaults
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Column labels of the configured interfaces, in order
    pub fn interface_labels(&self) -> Vec<String> {
        self.interfaces
            .iter()
            .enumerate()
            .map(|(i, iface)| iface.label.clone().unwrap_or_else(|| (i + 1).to_string()))
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampling.duration_secs == 0 {
            return Err(ConfigError::invalid("sampling.duration_secs must be at least 1"));
        }

        if self.probe.enabled {
            match self.probe.server.as_deref().map(str::trim) {
                None | Some("") => {
                    return Err(ConfigError::invalid(
                        "probe.server is required when the probe is enabled",
                    ));
                }
                Some(_) => {}
            }
            if self.probe.program.trim().is_empty() {
                return Err(ConfigError::invalid("probe.program must not be empty"));
            }
        }

        let mut labels = HashSet::new();
        for (iface, label) in self.interfaces.iter().zip(self.interface_labels()) {
            if iface.name.trim().is_empty() {
                return Err(ConfigError::invalid("interface names must not be empty"));
            }
            if label.contains(',') || label.trim().is_empty() {
                return Err(ConfigError::invalid(format!(
                    "interface label {:?} cannot be used in a CSV column",
                    label
                )));
            }
            if !labels.insert(label.clone()) {
                return Err(ConfigError::invalid(format!(
                    "duplicate interface label {:?}",
                    label
                )));
            }
        }

        if self.gps.enabled && !SUPPORTED_BAUD_RATES.contains(&self.gps.baud) {
            return Err(ConfigError::invalid(format!(
                "gps.baud {} is not one of {:?}",
                self.gps.baud, SUPPORTED_BAUD_RATES
            )));
        }

        if !self.probe.enabled && self.interfaces.is_empty() && !self.gps.enabled {
            return Err(ConfigError::invalid(
                "nothing to measure: enable the probe, GPS or at least one interface",
            ));
        }

        if self.output.path.trim().is_empty() {
            return Err(ConfigError::invalid("output.path must not be empty"));
        }
        self.output.zone()?;

        Ok(())
    }
}
