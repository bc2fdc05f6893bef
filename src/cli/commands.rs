use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{InterfaceConfig, SurveyConfig};

/// Main CLI structure for the link-survey application
/// Uses clap's derive macros for automatic CLI generation
#[derive(Parser)]
#[command(name = "lsv")]
#[command(author = "Kaipo Chen")]
#[command(version)] // Automatically uses version from Cargo.toml
#[command(about = "Link survey - log iperf3 throughput, interface rates and GPS position to CSV")]
#[command(long_about = "Link survey runs repeated measurement iterations: an iperf3 download test, \
a byte-counter sample of every configured interface and a GPS fix, all concurrently. Each completed \
iteration is appended to a CSV log and flushed immediately, so an interrupted survey keeps every row.")]
pub struct Cli {
    /// Configuration file (defaults to ./link-survey.toml when present)
    #[arg(short, long, global = true, help = "Path to a TOML configuration file")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the survey loop until Ctrl+C or the iteration bound
    #[command(about = "Run measurement iterations and append them to the CSV log")]
    #[command(long_about = "Runs measurement iterations until interrupted with Ctrl+C or until \
--iterations records have been written. An iteration cut short by Ctrl+C is discarded.\n\n\
Examples:\n  \
lsv run --server 192.0.2.10                      # Probe plus configured interfaces and GPS\n  \
lsv run -s 192.0.2.10 -I wlan0 -I wwan0          # Two interfaces, labelled 1 and 2\n  \
lsv run --no-probe --no-gps -I eth0 -n 10        # Ten counter-only samples\n  \
lsv run -s 192.0.2.10 -d 5 -p 1 -o drive.csv     # 5s windows, 1s pause, fixed file")]
    Run(RunArgs),

    /// Verify every enabled source before a survey
    #[command(about = "Check interfaces, GPS device and probe program, then print the CSV header")]
    Check,
}

/// Command-line overrides applied on top of the configuration
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// iperf3 server address
    #[arg(short, long, help = "iperf3 server to probe")]
    pub server: Option<String>,

    /// Interfaces to sample; replaces the configured list
    #[arg(
        short = 'I',
        long = "interface",
        help = "Interface to sample via sysfs counters (repeatable, replaces configured interfaces)"
    )]
    pub interfaces: Vec<String>,

    /// Sampling window and probe duration in seconds
    #[arg(short, long, help = "Sampling window in seconds")]
    pub duration: Option<u64>,

    /// Pause between iterations in seconds
    #[arg(short, long, help = "Pause between iterations in seconds")]
    pub pause: Option<u64>,

    /// Stop after this many records
    #[arg(short = 'n', long, help = "Number of iterations to run (default: until Ctrl+C)")]
    pub iterations: Option<u64>,

    /// Output CSV path; `{start}` is replaced by the run start time
    #[arg(short, long, help = "Output CSV file")]
    pub output: Option<String>,

    #[arg(long, help = "Do not read the GPS receiver")]
    pub no_gps: bool,

    #[arg(long, help = "Do not run the iperf3 probe")]
    pub no_probe: bool,
}

impl RunArgs {
    /// Applies the overrides that were given; absent flags leave `config` untouched
    pub fn apply(&self, config: &mut SurveyConfig) {
        if let Some(server) = &self.server {
            config.probe.server = Some(server.clone());
        }
        if !self.interfaces.is_empty() {
            config.interfaces = self
                .interfaces
                .iter()
                .map(|name| InterfaceConfig::new(name.as_str()))
                .collect();
        }
        if let Some(duration) = self.duration {
            config.sampling.duration_secs = duration;
        }
        if let Some(pause) = self.pause {
            config.sampling.pause_secs = pause;
        }
        if let Some(iterations) = self.iterations {
            config.sampling.max_iterations = Some(iterations);
        }
        if let Some(output) = &self.output {
            config.output.path = output.clone();
        }
        if self.no_gps {
            config.gps.enabled = false;
        }
        if self.no_probe {
            config.probe.enabled = false;
        }
    }
}
