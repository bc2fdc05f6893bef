//! Append-only CSV log of survey iterations
//!
//! The header is written once, when the file is created or found empty. An
//! existing file is only reused when its first line matches the header of the
//! current schema; otherwise appending would mix two layouts in one file.
//! Each row is flushed as soon as it is written so an interrupted run keeps
//! every completed iteration.

use log::{debug, info, warn};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::errors::SinkError;
use crate::models::IterationRecord;
use crate::storage::schema::{DELIMITER, RecordSchema};

/// Destination for completed iteration records
pub trait RecordSink {
    fn append(&mut self, record: &IterationRecord) -> Result<(), SinkError>;
}

pub struct CsvSink {
    path: PathBuf,
    file: File,
    schema: RecordSchema,
    timestamp_format: String,
    sync: bool,
    rows_written: u64,
}

impl CsvSink {
    /// Opens `path` for appending, writing the header if the file is new or empty
    pub fn create<P: AsRef<Path>>(
        path: P,
        schema: RecordSchema,
        timestamp_format: &str,
        sync: bool,
    ) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let open_err = |source| SinkError::Open {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(open_err)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .map_err(open_err)?;

        let expected = schema.header();
        let existing_len = file.metadata().map_err(open_err)?.len();

        if existing_len == 0 {
            writeln!(file, "{}", expected)?;
            file.flush()?;
            info!("Created survey log {} with header: {}", path.display(), expected);
        } else {
            let found = read_header(&path).map_err(open_err)?;
            if found != expected {
                return Err(SinkError::HeaderMismatch {
                    path,
                    expected,
                    found,
                });
            }
            if !ends_with_newline(&mut file).map_err(open_err)? {
                warn!(
                    "Survey log {} ends in a partial line, terminating it before appending",
                    path.display()
                );
                writeln!(file)?;
                file.flush()?;
            }
            info!(
                "Appending to existing survey log {} ({} bytes)",
                path.display(),
                existing_len
            );
        }

        Ok(Self {
            path,
            file,
            schema,
            timestamp_format: timestamp_format.to_string(),
            sync,
            rows_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    /// Rows appended through this handle (not counting earlier runs)
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Renders one record as a CSV line without the trailing newline
    pub fn format_row(&self, record: &IterationRecord) -> Result<String, SinkError> {
        if record.values.len() != self.schema.len() {
            return Err(SinkError::SchemaMismatch {
                expected: self.schema.len(),
                found: record.values.len(),
            });
        }

        let mut fields = Vec::with_capacity(self.schema.len() + 1);
        fields.push(record.timestamp.format(&self.timestamp_format).to_string());
        fields.extend(
            self.schema
                .metrics()
                .iter()
                .zip(&record.values)
                .map(|(metric, value)| metric.format_value(*value)),
        );

        Ok(fields.join(DELIMITER))
    }
}

impl RecordSink for CsvSink {
    fn append(&mut self, record: &IterationRecord) -> Result<(), SinkError> {
        let row = self.format_row(record)?;
        writeln!(self.file, "{}", row)?;
        self.file.flush()?;
        if self.sync {
            self.file.sync_data()?;
        }
        self.rows_written += 1;
        debug!("Wrote row for iteration #{}: {}", record.iteration, row);
        Ok(())
    }
}

fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn read_header(path: &Path) -> std::io::Result<String> {
    let mut line = String::new();
    BufReader::new(File::open(path)?).read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
