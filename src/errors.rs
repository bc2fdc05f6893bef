//! Error types for measurement sources, the record sink and configuration
//!
//! Measurement errors are always recoverable: the orchestrator degrades them to
//! `0.0` when it assembles a record. Sink errors are fatal to a run because the
//! CSV log is the only product of the process.

use log::warn;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Why a single measurement source produced no value this iteration
#[derive(Error, Debug)]
pub enum MeasurementError {
    /// Precondition not met: device or counter file missing, permission denied,
    /// probe binary not installed
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// External probe exited non-zero, reported an error, or produced no usable figure
    #[error("probe failed: {0}")]
    ProbeFailed(String),

    /// Malformed sentence, counter value or report fragment
    #[error("parse error: {0}")]
    Parse(String),

    /// The source did not answer before its deadline
    #[error("no result within {0:?}")]
    Timeout(Duration),

    /// The task running the source panicked or was cancelled
    #[error("task '{task}' aborted: {reason}")]
    TaskAborted { task: String, reason: String },
}

impl MeasurementError {
    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::SourceUnavailable(message.into())
    }

    pub fn probe<S: Into<String>>(message: S) -> Self {
        Self::ProbeFailed(message.into())
    }

    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse(message.into())
    }

    /// Short machine-friendly name of the error kind, used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable(_) => "source_unavailable",
            Self::ProbeFailed(_) => "probe_failed",
            Self::Parse(_) => "parse_error",
            Self::Timeout(_) => "timeout",
            Self::TaskAborted { .. } => "task_aborted",
        }
    }
}

pub type MeasureResult<T> = std::result::Result<T, MeasurementError>;

/// Failure to create, validate or append to the output log
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to open output file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("output file {path} starts with header {found:?}, expected {expected:?}")]
    HeaderMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("record carries {found} values but the header declares {expected} metric columns")]
    SchemaMismatch { expected: usize, found: usize },

    #[error("failed to write record: {0}")]
    Write(#[from] io::Error),
}

/// Invalid or unreadable configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid(message.into())
    }
}

/// Logs a degraded measurement in a uniform format so operators can grep for it
pub fn log_measurement_failure(task: &str, error: &MeasurementError, iteration: u64) {
    warn!(
        "Task '{}' unavailable for iteration #{} (kind={}, error={}) - recording 0.0",
        task,
        iteration,
        error.kind(),
        error
    );
}
