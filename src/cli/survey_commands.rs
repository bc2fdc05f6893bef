use anyhow::{Context, Result};
use chrono::Utc;
use log::{error, info};
use tokio::sync::watch;

use crate::cli::commands::RunArgs;
use crate::collectors::counters::{CounterBackend, SysfsCounters};
use crate::collectors::find_program;
use crate::collectors::gps::device_available;
use crate::config::SurveyConfig;
use crate::orchestrator::Surveyor;
use crate::storage::CsvSink;

pub struct SurveyCommandHandler {
    config: SurveyConfig,
}

impl SurveyCommandHandler {
    pub fn new(config: SurveyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SurveyConfig {
        &self.config
    }

    /// Runs the survey loop; returns the number of committed records
    pub async fn handle_run_command(
        mut self,
        args: RunArgs,
        shutdown: watch::Receiver<bool>,
    ) -> Result<u64> {
        args.apply(&mut self.config);
        self.config
            .validate()
            .context("Configuration rejected")?;

        let zone = self.config.output.zone()?;
        let start = Utc::now().with_timezone(&zone);
        let path = self.config.output.resolve_path(&start);

        let mut surveyor =
            Surveyor::from_config(&self.config).context("Failed to set up measurement tasks")?;
        let mut sink = CsvSink::create(
            &path,
            surveyor.schema().clone(),
            self.config.output.timestamp_format(),
            self.config.output.sync,
        )
        .with_context(|| format!("Failed to prepare survey log {}", path.display()))?;

        println!("Link survey started at {}", start.format("%Y-%m-%d %H:%M:%S %:z"));
        println!("Logging to {}", path.display());
        println!("Columns: {}", surveyor.schema());
        println!("Press Ctrl+C to stop.");

        let committed = match surveyor.run(&mut sink, shutdown).await {
            Ok(committed) => committed,
            Err(e) => {
                error!("Survey log write failed after {} rows: {}", sink.rows_written(), e);
                return Err(e).context("Survey aborted");
            }
        };

        info!("Survey finished: {} rows written to {}", committed, path.display());
        println!("Wrote {} rows to {}", committed, path.display());
        Ok(committed)
    }

    /// Preflight of every enabled source; returns whether all are usable
    pub fn handle_check_command(&self) -> Result<bool> {
        let config = &self.config;
        let mut ready = true;

        println!("Link survey preflight");
        println!("=====================");

        if let Err(e) = config.validate() {
            println!("  configuration: INVALID ({})", e);
            ready = false;
        } else {
            println!("  configuration: ok");
        }

        if config.probe.enabled {
            let launcher = config
                .probe
                .wrapper
                .first()
                .unwrap_or(&config.probe.program);
            let mut missing: Vec<&str> = Vec::new();
            for program in [launcher, &config.probe.program] {
                if find_program(program).is_none() && !missing.contains(&program.as_str()) {
                    missing.push(program);
                }
            }
            if missing.is_empty() {
                println!(
                    "  probe: ok ({} -> {})",
                    config.probe.program,
                    config.probe.server.as_deref().unwrap_or("<no server>")
                );
            } else {
                println!("  probe: MISSING program(s) {}", missing.join(", "));
                ready = false;
            }
        } else {
            println!("  probe: disabled");
        }

        let sysfs = SysfsCounters::new(&config.counters.sysfs_root);
        for (iface, label) in config.interfaces.iter().zip(config.interface_labels()) {
            let status = match iface.backend {
                CounterBackend::Sysfs => sysfs.check(&iface.name).map_err(|e| e.to_string()),
                CounterBackend::Ifstat => find_program(&config.counters.ifstat_program)
                    .map(|_| ())
                    .ok_or_else(|| format!("{} not found", config.counters.ifstat_program)),
            };
            match status {
                Ok(()) => println!("  interface {} (label {}): ok", iface.name, label),
                Err(e) => {
                    println!("  interface {} (label {}): UNAVAILABLE ({})", iface.name, label, e);
                    ready = false;
                }
            }
        }
        if config.interfaces.is_empty() {
            println!("  interfaces: none configured");
        }

        if config.gps.enabled {
            if device_available(&config.gps.port) {
                println!("  gps: ok ({} @ {} baud)", config.gps.port.display(), config.gps.baud);
            } else {
                println!("  gps: UNAVAILABLE ({} not present or not readable)", config.gps.port.display());
                ready = false;
            }
        } else {
            println!("  gps: disabled");
        }

        match Surveyor::from_config(config) {
            Ok(surveyor) => println!("\nHeader: {}", surveyor.schema()),
            Err(e) => {
                println!("\nHeader: unavailable ({})", e);
                ready = false;
            }
        }

        Ok(ready)
    }
}
