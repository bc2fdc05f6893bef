//! Iteration loop
//!
//! Each iteration walks `Idle -> Running -> Collecting -> Committed -> Idle`:
//! every task is spawned at once, all of them are joined, their outcomes are
//! folded into one record, and the record is appended to the sink before the
//! next iteration may start. A failing or panicking task only ever zeroes its
//! own columns.

use chrono::{DateTime, FixedOffset, Utc};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

use crate::collectors::counters::{CounterBackend, CounterSampler, IfstatSampler, SysfsCounters};
use crate::collectors::formatting::RateUnit;
use crate::collectors::gps::{FixReader, SerialFixReader, device_available};
use crate::collectors::probe::IperfProbe;
use crate::collectors::{InterfaceMeter, ThroughputProbe};
use crate::config::SurveyConfig;
use crate::errors::{ConfigError, MeasurementError, SinkError};
use crate::models::{IterationRecord, TaskOutcome};
use crate::orchestrator::task::{MeasurementTask, TaskKind};
use crate::storage::{RecordSchema, RecordSink};

/// Where the current iteration stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationPhase {
    Idle,
    /// All tasks dispatched
    Running,
    /// All tasks joined, record being assembled
    Collecting,
    /// Record handed to the sink
    Committed,
}

/// A task's result slot for the current iteration
enum Slot {
    Pending(JoinHandle<TaskOutcome>),
    Done(TaskOutcome),
}

/// Per-task slots of one iteration, indexed like the task list
///
/// Dropping a dispatch before it is collected aborts every task still
/// running, which also kills any probe process through `kill_on_drop`.
struct Dispatch {
    slots: Vec<(String, TaskKind, Slot)>,
}

impl Dispatch {
    async fn join_all(&mut self) {
        for (name, kind, slot) in self.slots.iter_mut() {
            if let Slot::Pending(handle) = slot {
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(err) => kind.failed(aborted(name, err)),
                };
                *slot = Slot::Done(outcome);
            }
        }
    }

    fn into_outcomes(mut self) -> Vec<(String, TaskOutcome)> {
        std::mem::take(&mut self.slots)
            .into_iter()
            .map(|(name, kind, slot)| match slot {
                Slot::Done(outcome) => (name, outcome),
                Slot::Pending(handle) => {
                    handle.abort();
                    let err = MeasurementError::TaskAborted {
                        task: name.clone(),
                        reason: "not joined".to_string(),
                    };
                    (name, kind.failed(err))
                }
            })
            .collect()
    }
}

impl Drop for Dispatch {
    fn drop(&mut self) {
        for (_, _, slot) in &self.slots {
            if let Slot::Pending(handle) = slot {
                handle.abort();
            }
        }
    }
}

fn aborted(task: &str, err: JoinError) -> MeasurementError {
    let reason = if err.is_panic() {
        "panicked".to_string()
    } else if err.is_cancelled() {
        "cancelled".to_string()
    } else {
        err.to_string()
    };
    MeasurementError::TaskAborted {
        task: task.to_string(),
        reason,
    }
}

/// Resolves once `true` is sent; never resolves if the sender is gone
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Runs measurement iterations and commits one record per iteration
pub struct Surveyor {
    tasks: Vec<MeasurementTask>,
    schema: RecordSchema,
    unit: RateUnit,
    pause: Duration,
    max_iterations: Option<u64>,
    zone: FixedOffset,
    phase: IterationPhase,
    iteration: u64,
}

impl Surveyor {
    pub fn builder(unit: RateUnit) -> SurveyorBuilder {
        SurveyorBuilder::new(unit)
    }

    /// Builds the task list from a validated configuration
    pub fn from_config(config: &SurveyConfig) -> Result<Self, ConfigError> {
        let sampling = &config.sampling;
        let unit = config.counters.unit;
        let mut builder = Self::builder(unit)
            .pause(sampling.pause())
            .max_iterations(sampling.max_iterations)
            .zone(config.output.zone()?);

        if config.probe.enabled {
            let server = config
                .probe
                .server
                .clone()
                .ok_or_else(|| ConfigError::invalid("probe.server is not set"))?;
            let probe = IperfProbe::new(config.probe.program.clone())
                .with_wrapper(config.probe.wrapper.clone())
                .with_port(config.probe.port)
                .with_extra_args(config.probe.extra_args.clone())
                .with_grace(config.probe.grace());
            builder = builder.probe(server, Arc::new(probe), sampling.duration());
        }

        for (iface, label) in config.interfaces.iter().zip(config.interface_labels()) {
            let meter: Arc<dyn InterfaceMeter> = match iface.backend {
                CounterBackend::Sysfs => Arc::new(
                    CounterSampler::new(SysfsCounters::new(&config.counters.sysfs_root), unit)
                        .with_safety_margin(config.counters.safety_margin()),
                ),
                CounterBackend::Ifstat => Arc::new(IfstatSampler::new(
                    config.counters.ifstat_program.clone(),
                    unit,
                )),
            };
            builder = builder.interface(iface.name.clone(), label, meter, sampling.duration());
        }

        if config.gps.enabled {
            let reader = SerialFixReader::new(config.gps.baud, config.gps.read_timeout());
            builder = builder.position(
                config.gps.port.clone(),
                Arc::new(reader),
                config.gps.deadline(sampling),
            );
        }

        Ok(builder.build())
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    pub fn tasks(&self) -> &[MeasurementTask] {
        &self.tasks
    }

    pub fn unit(&self) -> RateUnit {
        self.unit
    }

    pub fn phase(&self) -> IterationPhase {
        self.phase
    }

    /// Number of the most recently started iteration
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    fn transition(&mut self, phase: IterationPhase) {
        debug!(
            "Iteration #{}: {:?} -> {:?}",
            self.iteration, self.phase, phase
        );
        self.phase = phase;
    }

    /// Spawns every task, or records an immediate failure for tasks whose
    /// device is missing
    fn dispatch(&self) -> Dispatch {
        let slots = self
            .tasks
            .iter()
            .map(|task| {
                let kind = task.kind();
                if let Some(device) = task.device().filter(|d| !device_available(d)) {
                    let err = MeasurementError::unavailable(format!(
                        "device {} not present",
                        device.display()
                    ));
                    return (task.name.clone(), kind, Slot::Done(kind.failed(err)));
                }
                let handle = tokio::spawn(task.clone().execute());
                (task.name.clone(), kind, Slot::Pending(handle))
            })
            .collect();
        Dispatch { slots }
    }

    /// Runs one iteration and returns its record without committing it
    ///
    /// Dropping the returned future aborts the iteration's tasks.
    pub async fn run_iteration(&mut self) -> IterationRecord {
        self.iteration += 1;
        let timestamp: DateTime<FixedOffset> = Utc::now().with_timezone(&self.zone);
        info!(
            "Starting iteration #{} ({} tasks)",
            self.iteration,
            self.tasks.len()
        );

        let mut dispatch = self.dispatch();
        self.transition(IterationPhase::Running);

        dispatch.join_all().await;
        self.transition(IterationPhase::Collecting);

        IterationRecord::assemble(
            self.iteration,
            timestamp,
            self.unit,
            dispatch.into_outcomes(),
        )
    }

    /// Runs iterations until the bound is reached or shutdown is requested
    ///
    /// Returns the number of records committed. An iteration interrupted by
    /// shutdown is discarded. Sink errors end the run.
    pub async fn run<S: RecordSink + ?Sized>(
        &mut self,
        sink: &mut S,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<u64, SinkError> {
        self.warn_missing_devices();
        let mut committed = 0u64;

        loop {
            if self.max_iterations.is_some_and(|max| committed >= max) {
                info!("Reached {} iterations, stopping", committed);
                break;
            }
            if *shutdown.borrow() {
                break;
            }

            let record = tokio::select! {
                record = self.run_iteration() => Some(record),
                _ = shutdown_requested(&mut shutdown) => None,
            };
            let Some(record) = record else {
                info!(
                    "Shutdown requested, discarding iteration #{}",
                    self.iteration
                );
                self.phase = IterationPhase::Idle;
                break;
            };

            sink.append(&record)?;
            self.transition(IterationPhase::Committed);
            committed += 1;
            info!("{}", record.summary(&self.schema, self.unit));
            self.transition(IterationPhase::Idle);

            if self.max_iterations.is_some_and(|max| committed >= max) {
                continue;
            }

            let stop = tokio::select! {
                _ = tokio::time::sleep(self.pause) => false,
                _ = shutdown_requested(&mut shutdown) => true,
            };
            if stop {
                info!("Shutdown requested during pause");
                break;
            }
        }

        Ok(committed)
    }

    fn warn_missing_devices(&self) {
        for task in &self.tasks {
            if let Some(device) = task.device().filter(|d| !device_available(d)) {
                warn!(
                    "Device {} for task '{}' is not available; its columns will be 0 until it appears",
                    device.display(),
                    task.name
                );
            }
        }
    }
}

/// Collects tasks and assembles them in column order: probe, interfaces, position
pub struct SurveyorBuilder {
    unit: RateUnit,
    probe: Option<MeasurementTask>,
    interfaces: Vec<MeasurementTask>,
    position: Option<MeasurementTask>,
    pause: Duration,
    max_iterations: Option<u64>,
    zone: FixedOffset,
}

impl SurveyorBuilder {
    pub fn new(unit: RateUnit) -> Self {
        Self {
            unit,
            probe: None,
            interfaces: Vec::new(),
            position: None,
            pause: Duration::ZERO,
            max_iterations: None,
            zone: *chrono::Local::now().offset(),
        }
    }

    pub fn probe<S: Into<String>>(
        mut self,
        server: S,
        probe: Arc<dyn ThroughputProbe>,
        duration: Duration,
    ) -> Self {
        self.probe = Some(MeasurementTask::probe(server, probe, duration));
        self
    }

    pub fn interface<S: Into<String>, L: Into<String>>(
        mut self,
        interface: S,
        label: L,
        meter: Arc<dyn InterfaceMeter>,
        duration: Duration,
    ) -> Self {
        self.interfaces
            .push(MeasurementTask::interface(interface, label, meter, duration));
        self
    }

    pub fn position<P: Into<PathBuf>>(
        mut self,
        port: P,
        reader: Arc<dyn FixReader>,
        deadline: Duration,
    ) -> Self {
        self.position = Some(MeasurementTask::position(port, reader, deadline));
        self
    }

    pub fn pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn max_iterations(mut self, max_iterations: Option<u64>) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn zone(mut self, zone: FixedOffset) -> Self {
        self.zone = zone;
        self
    }

    pub fn build(self) -> Surveyor {
        let tasks: Vec<MeasurementTask> = self
            .probe
            .into_iter()
            .chain(self.interfaces)
            .chain(self.position)
            .collect();
        let schema = RecordSchema::new(
            tasks
                .iter()
                .flat_map(|task| task.metrics(self.unit))
                .collect(),
        );

        Surveyor {
            tasks,
            schema,
            unit: self.unit,
            pause: self.pause,
            max_iterations: self.max_iterations,
            zone: self.zone,
            phase: IterationPhase::Idle,
            iteration: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::counters::LinkRate;
    use crate::collectors::gps::Fix;
    use crate::errors::MeasureResult;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedProbe(MeasureResult<f64>);

    #[async_trait]
    impl ThroughputProbe for ScriptedProbe {
        async fn measure(&self, _server: &str, duration: Duration) -> MeasureResult<f64> {
            tokio::time::sleep(duration).await;
            match &self.0 {
                Ok(v) => Ok(*v),
                Err(e) => Err(MeasurementError::probe(e.to_string())),
            }
        }
    }

    struct ConstantMeter(LinkRate);

    #[async_trait]
    impl InterfaceMeter for ConstantMeter {
        async fn measure(&self, _interface: &str, window: Duration) -> MeasureResult<LinkRate> {
            tokio::time::sleep(window).await;
            Ok(self.0)
        }

        fn backend(&self) -> &'static str {
            "constant"
        }
    }

    struct PanickingMeter;

    #[async_trait]
    impl InterfaceMeter for PanickingMeter {
        async fn measure(&self, _interface: &str, _window: Duration) -> MeasureResult<LinkRate> {
            panic!("counter file vanished mid-read");
        }

        fn backend(&self) -> &'static str {
            "panicking"
        }
    }

    #[derive(Default)]
    struct CountingReader {
        opened: AtomicUsize,
    }

    #[async_trait]
    impl FixReader for CountingReader {
        async fn first_fix(&self, _port: &Path, _budget: Duration) -> MeasureResult<Fix> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Fix {
                latitude: 1.3521,
                longitude: 103.8198,
            })
        }
    }

    struct MemorySink(Vec<IterationRecord>);

    impl RecordSink for MemorySink {
        fn append(&mut self, record: &IterationRecord) -> Result<(), SinkError> {
            self.0.push(record.clone());
            Ok(())
        }
    }

    const WINDOW: Duration = Duration::from_secs(10);

    fn rate(rx: f64, tx: f64) -> Arc<ConstantMeter> {
        Arc::new(ConstantMeter(LinkRate { rx, tx }))
    }

    #[test]
    fn test_builder_orders_columns() {
        let surveyor = Surveyor::builder(RateUnit::Mbps)
            .position("/dev/ttyACM0", Arc::new(CountingReader::default()), WINDOW)
            .interface("wwan0", "2", rate(0.0, 0.0), WINDOW)
            .probe("10.0.0.1", Arc::new(ScriptedProbe(Ok(0.0))), WINDOW)
            .interface("wlan0", "1", rate(0.0, 0.0), WINDOW)
            .build();

        assert_eq!(
            surveyor.schema().header(),
            "timestamp,iperf3_download_Mbps,RX2_Mbps,TX2_Mbps,RX1_Mbps,TX1_Mbps,Latitude,Longitude"
        );
        assert_eq!(surveyor.tasks().len(), 4);
        assert_eq!(surveyor.phase(), IterationPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tasks_run_concurrently() {
        let mut surveyor = Surveyor::builder(RateUnit::Mbps)
            .probe("10.0.0.1", Arc::new(ScriptedProbe(Ok(8e7))), WINDOW)
            .interface("wlan0", "1", rate(10.0, 2.0), WINDOW)
            .interface("wwan0", "2", rate(20.0, 4.0), WINDOW)
            .build();

        let started = tokio::time::Instant::now();
        let record = surveyor.run_iteration().await;

        let elapsed = started.elapsed();
        assert!(elapsed >= WINDOW && elapsed < WINDOW + Duration::from_millis(100));
        assert_eq!(record.iteration, 1);
        assert_eq!(record.values, vec![80.0, 10.0, 2.0, 20.0, 4.0]);
        assert_eq!(record.failures, 0);
        assert_eq!(surveyor.phase(), IterationPhase::Collecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_task_only_zeroes_its_columns() {
        let mut surveyor = Surveyor::builder(RateUnit::Mbps)
            .interface("wlan0", "1", Arc::new(PanickingMeter), WINDOW)
            .interface("wwan0", "2", rate(20.0, 4.0), WINDOW)
            .build();

        let record = surveyor.run_iteration().await;
        assert_eq!(record.values, vec![0.0, 0.0, 20.0, 4.0]);
        assert_eq!(record.failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_device_is_never_opened() {
        let reader = Arc::new(CountingReader::default());
        let mut surveyor = Surveyor::builder(RateUnit::Mbps)
            .interface("wlan0", "1", rate(1.0, 1.0), WINDOW)
            .position("/dev/ttyACM-not-plugged-in", reader.clone(), WINDOW)
            .build();

        let record = surveyor.run_iteration().await;
        assert_eq!(record.values, vec![1.0, 1.0, 0.0, 0.0]);
        assert_eq!(reader.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_present_device_is_read_every_iteration() {
        let device = tempfile::NamedTempFile::new().unwrap();
        let reader = Arc::new(CountingReader::default());
        let mut surveyor = Surveyor::builder(RateUnit::Mbps)
            .position(device.path(), reader.clone(), WINDOW)
            .max_iterations(Some(3))
            .build();

        let (_tx, rx) = watch::channel(false);
        let mut sink = MemorySink(Vec::new());
        let committed = surveyor.run(&mut sink, rx).await.unwrap();

        assert_eq!(committed, 3);
        assert_eq!(reader.opened.load(Ordering::SeqCst), 3);
        assert_eq!(sink.0[2].values, vec![1.3521, 103.8198]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_is_bounded_and_ordered() {
        let mut surveyor = Surveyor::builder(RateUnit::Mbps)
            .probe(
                "10.0.0.1",
                Arc::new(ScriptedProbe(Err(MeasurementError::probe("exit status 1")))),
                WINDOW,
            )
            .interface("wlan0", "1", rate(3.0, 1.5), WINDOW)
            .pause(Duration::from_secs(2))
            .max_iterations(Some(4))
            .build();

        let (_tx, rx) = watch::channel(false);
        let mut sink = MemorySink(Vec::new());
        let started = tokio::time::Instant::now();
        let committed = surveyor.run(&mut sink, rx).await.unwrap();

        assert_eq!(committed, 4);
        // Four windows and three pauses; no pause after the last record
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(4 * 10 + 3 * 2));
        assert!(elapsed < Duration::from_secs(4 * 10 + 4 * 2));
        let iterations: Vec<u64> = sink.0.iter().map(|r| r.iteration).collect();
        assert_eq!(iterations, vec![1, 2, 3, 4]);
        for record in &sink.0 {
            assert_eq!(record.values, vec![0.0, 3.0, 1.5]);
        }
        assert_eq!(surveyor.phase(), IterationPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discards_in_flight_iteration() {
        let mut surveyor = Surveyor::builder(RateUnit::Mbps)
            .interface("wlan0", "1", rate(3.0, 1.5), WINDOW)
            .pause(Duration::from_secs(2))
            .build();

        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            // Lands in the middle of the second window
            tokio::time::sleep(Duration::from_secs(15)).await;
            let _ = tx.send(true);
        });

        let mut sink = MemorySink(Vec::new());
        let committed = surveyor.run(&mut sink, rx).await.unwrap();

        assert_eq!(committed, 1);
        assert_eq!(sink.0.len(), 1);
        assert_eq!(surveyor.iteration(), 2);
        assert_eq!(surveyor.phase(), IterationPhase::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_before_start_commits_nothing() {
        let mut surveyor = Surveyor::builder(RateUnit::Mbps)
            .interface("wlan0", "1", rate(3.0, 1.5), WINDOW)
            .build();

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let mut sink = MemorySink(Vec::new());
        assert_eq!(surveyor.run(&mut sink, rx).await.unwrap(), 0);
        assert!(sink.0.is_empty());
    }

    #[test]
    fn test_from_config() {
        let config = SurveyConfig::from_toml(
            r#"
            [probe]
            server = "192.0.2.10"

            [[interfaces]]
            name = "wlan0"

            [[interfaces]]
            name = "wwan0"
            label = "lte"
            backend = "ifstat"

            [gps]
            enabled = false

            [output]
            utc_offset_minutes = 480
            "#,
        )
        .unwrap();

        let surveyor = Surveyor::from_config(&config).unwrap();
        assert_eq!(
            surveyor.schema().header(),
            "timestamp,iperf3_download_Mbps,RX1_Mbps,TX1_Mbps,RXlte_Mbps,TXlte_Mbps"
        );
    }
}
