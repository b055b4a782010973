//! Append-only CSV log of readings.
//!
//! The first line is a header of sorted column names fixed by the first reading ever
//! persisted; every following line is one reading. If the file already exists when the
//! log is opened, its header is read back so a restarted process keeps appending under
//! the same schema.
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{AppResult, DaqError};
use crate::reading::{Reading, Schema, SchemaPolicy};

/// Outcome of one [`CsvLog::append`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendReport {
    /// Rows written to the file
    pub written: usize,
    /// Readings dropped because they did not fit the schema
    pub rejected: usize,
}

/// A writer for the CSV reading log.
#[derive(Debug)]
pub struct CsvLog {
    path: PathBuf,
    schema: Option<Schema>,
    policy: SchemaPolicy,
}

impl CsvLog {
    /// Open the log at `path`, adopting the header of an existing non-empty file.
    ///
    /// The file itself is only created on the first non-empty append.
    pub fn open(path: impl Into<PathBuf>, policy: SchemaPolicy) -> AppResult<Self> {
        let path = path.into();
        let schema = match fs::metadata(&path) {
            Ok(meta) if meta.len() > 0 => {
                let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(&path)?;
                let schema = Schema::from_header(reader.headers()?)?;
                info!(
                    path = %path.display(),
                    columns = %schema.columns().join(","),
                    "Appending to existing log"
                );
                Some(schema)
            }
            _ => None,
        };
        Ok(Self {
            path,
            schema,
            policy,
        })
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Column schema, once known.
    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    /// Append `readings` as rows, writing the header first if the file is missing
    /// or empty.
    ///
    /// Readings that do not fit the schema are logged and skipped. The whole batch
    /// goes to disk in one write; on error the file is truncated back to its previous
    /// length, so a retry with the same batch never leaves torn or duplicated rows.
    pub fn append(&mut self, readings: &[Reading]) -> AppResult<AppendReport> {
        let mut report = AppendReport::default();
        let Some(first) = readings.first() else {
            return Ok(report);
        };

        let schema = match &self.schema {
            Some(schema) => schema.clone(),
            None => Schema::from_reading(first),
        };
        // Checked on every batch: the file may have been rotated or removed.
        let needs_header = fs::metadata(&self.path).map_or(true, |meta| meta.len() == 0);

        let mut rows = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        if needs_header {
            rows.write_record(schema.columns())?;
        }
        for reading in readings {
            match schema.encode(reading, self.policy) {
                Ok(cells) => {
                    rows.write_record(&cells)?;
                    report.written += 1;
                }
                Err(err) => {
                    warn!(error = %err, "Rejecting reading");
                    report.rejected += 1;
                }
            }
        }
        let bytes = rows
            .into_inner()
            .map_err(|e| DaqError::Io(e.into_error()))?;

        if needs_header {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        write_or_rollback(&mut file, &bytes)?;

        if needs_header {
            info!(
                path = %self.path.display(),
                header = %schema.columns().join(","),
                "Created log file with header"
            );
        }
        if self.schema.is_none() {
            self.schema = Some(schema);
        }
        Ok(report)
    }

    /// Parse a whole log back into its schema and readings.
    pub fn read_all(path: impl AsRef<Path>) -> AppResult<(Schema, Vec<Reading>)> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path.as_ref())?;
        let schema = Schema::from_header(reader.headers()?)?;
        let mut readings = Vec::new();
        for record in reader.records() {
            readings.push(Reading::from_record(&schema, &record?)?);
        }
        Ok((schema, readings))
    }
}

/// A file that can be measured and cut back after a failed write.
trait AppendTarget: Write {
    fn current_len(&self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl AppendTarget for File {
    fn current_len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Write `bytes` in full or restore the target to its length before the write.
fn write_or_rollback<T: AppendTarget>(target: &mut T, bytes: &[u8]) -> io::Result<()> {
    let start = target.current_len()?;
    if let Err(err) = target.write_all(bytes).and_then(|()| target.flush()) {
        if let Err(rollback_err) = target.truncate_to(start) {
            warn!(error = %rollback_err, len = start, "Rolling back partial write failed");
        }
        return Err(err);
    }
    Ok(())
}
