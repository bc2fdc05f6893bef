//! iperf3 process runner

use async_trait::async_trait;
use log::{debug, info, warn};
use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::collectors::formatting::format_bits_per_second;
use crate::collectors::probe::ThroughputProbe;
use crate::collectors::probe::report::extract_throughput;
use crate::errors::{MeasureResult, MeasurementError};

/// Default process startup/teardown allowance on top of the test duration
pub const DEFAULT_GRACE: Duration = Duration::from_secs(15);

/// Runs `[wrapper...] iperf3 -c SERVER [-p PORT] -t SECS -J [extra...]`
#[derive(Debug, Clone)]
pub struct IperfProbe {
    program: String,
    /// Command prefix such as `mptcpize run`
    wrapper: Vec<String>,
    port: Option<u16>,
    extra_args: Vec<String>,
    grace: Duration,
}

impl Default for IperfProbe {
    fn default() -> Self {
        Self::new("iperf3")
    }
}

impl IperfProbe {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            wrapper: Vec::new(),
            port: None,
            extra_args: Vec::new(),
            grace: DEFAULT_GRACE,
        }
    }

    pub fn with_wrapper(mut self, wrapper: Vec<String>) -> Self {
        self.wrapper = wrapper;
        self
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    pub fn with_extra_args(mut self, extra_args: Vec<String>) -> Self {
        self.extra_args = extra_args;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Program that must resolve for the probe to run (the wrapper's, if any)
    pub fn launcher(&self) -> &str {
        self.wrapper.first().unwrap_or(&self.program)
    }

    /// Full argument vector, launcher first
    pub fn argv(&self, server: &str, duration: Duration) -> Vec<String> {
        let mut argv = self.wrapper.clone();
        argv.push(self.program.clone());
        argv.extend(["-c".to_string(), server.to_string()]);
        if let Some(port) = self.port {
            argv.extend(["-p".to_string(), port.to_string()]);
        }
        argv.extend([
            "-t".to_string(),
            duration.as_secs().max(1).to_string(),
            "-J".to_string(),
        ]);
        argv.extend(self.extra_args.iter().cloned());
        argv
    }
}

#[async_trait]
impl ThroughputProbe for IperfProbe {
    async fn measure(&self, server: &str, duration: Duration) -> MeasureResult<f64> {
        let argv = self.argv(server, duration);
        let Some((launcher, args)) = argv.split_first() else {
            return Err(MeasurementError::unavailable("empty probe command"));
        };

        let mut cmd = Command::new(launcher);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Launching probe: {}", argv.join(" "));

        let limit = duration + self.grace;
        let output = match tokio::time::timeout(limit, cmd.output()).await {
            Err(_) => return Err(MeasurementError::Timeout(limit)),
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(MeasurementError::unavailable(format!(
                    "'{}' is not installed",
                    launcher
                )));
            }
            Ok(Err(e)) => {
                return Err(MeasurementError::unavailable(format!(
                    "failed to launch '{}': {}",
                    launcher, e
                )));
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                "Probe against {} exited with {} (stderr: {})",
                server,
                output.status,
                stderr.trim()
            );
            return Err(MeasurementError::probe(format!(
                "'{}' exited with {}",
                launcher, output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let throughput = extract_throughput(&stdout)?;
        info!(
            "Probe against {} completed: {} ({:?})",
            server,
            format_bits_per_second(throughput.bits_per_second),
            throughput.rule
        );
        Ok(throughput.bits_per_second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argv_plain() {
        let probe = IperfProbe::default();
        assert_eq!(
            probe.argv("47.128.71.167", Duration::from_secs(10)),
            vec!["iperf3", "-c", "47.128.71.167", "-t", "10", "-J"]
        );
        assert_eq!(probe.launcher(), "iperf3");
    }

    #[test]
    fn test_argv_with_wrapper_port_and_extras() {
        let probe = IperfProbe::new("iperf3")
            .with_wrapper(vec!["mptcpize".into(), "run".into()])
            .with_port(Some(5201))
            .with_extra_args(vec!["-R".into()]);
        assert_eq!(
            probe.argv("example.net", Duration::from_millis(500)),
            vec![
                "mptcpize", "run", "iperf3", "-c", "example.net", "-p", "5201", "-t", "1", "-J",
                "-R"
            ]
        );
        assert_eq!(probe.launcher(), "mptcpize");
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let probe = IperfProbe::new("iperf3-not-installed-anywhere");
        let result = probe.measure("127.0.0.1", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(MeasurementError::SourceUnavailable(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_probe_failure() {
        // `false` ignores its arguments and exits 1
        let probe = IperfProbe::new("false");
        let result = probe.measure("127.0.0.1", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(MeasurementError::ProbeFailed(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_run_extracts_report() {
        // The wrapper script prints a canned report; iperf3 and its flags become $0.. and are ignored
        let script = r#"printf '%s' '{"end":{"sum_received":{"bits_per_second":94300000.0}}}'"#;
        let probe = IperfProbe::new("iperf3")
            .with_wrapper(vec!["sh".into(), "-c".into(), script.into()]);

        let bps = probe
            .measure("127.0.0.1", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(bps, 94_300_000.0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_garbage_output_is_probe_failure() {
        let probe = IperfProbe::new("iperf3")
            .with_wrapper(vec!["sh".into(), "-c".into(), "echo not json".into()]);
        let result = probe.measure("127.0.0.1", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(MeasurementError::ProbeFailed(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_process_times_out() {
        let probe = IperfProbe::new("iperf3")
            .with_wrapper(vec!["sh".into(), "-c".into(), "sleep 30".into()])
            .with_grace(Duration::from_millis(100));
        let result = probe.measure("127.0.0.1", Duration::ZERO).await;
        assert!(matches!(result, Err(MeasurementError::Timeout(_))));
    }
}
