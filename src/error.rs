//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the acquisition pipeline.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of errors that can occur, from configuration issues to
//! persistence failures. Link faults never appear here: they stay inside the device
//! link as `anyhow::Error` and only show up as a missing reading.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically related to file parsing or
//!   type mismatches in the configuration sources.
//! - **`Configuration`**: Semantic errors in the configuration, such as a settle delay
//!   longer than the sampling period. These are caught during validation.
//! - **`Io`** / **`Csv`**: File I/O and row encoding problems in the output log.
//! - **`SchemaMismatch`**: A reading whose field set does not fit the log header.
//! - **`PersistenceFailed`**: The writer exhausted its retry budget. This is the only
//!   fatal error in the pipeline and it only stops the writer.
//! - **`Task`**: A background task panicked, was cancelled, or missed its shutdown
//!   deadline.
//!
//! By using `#[from]`, `DaqError` can be created from underlying error types,
//! simplifying error handling with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Reading from '{label}' does not match log schema (expected [{expected}], found [{found}])")]
    SchemaMismatch {
        label: String,
        expected: String,
        found: String,
    },

    #[error("Malformed row: {0}")]
    MalformedRow(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Persistence failed after {attempts} attempts: {source}")]
    PersistenceFailed {
        attempts: u32,
        #[source]
        source: Box<DaqError>,
    },
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl DaqError {
    /// Whether retrying the failed operation could plausibly succeed.
    ///
    /// Schema and configuration problems are deterministic and will fail the same way
    /// on every attempt; I/O problems may be transient (a remounted disk, freed space).
    pub fn is_transient(&self) -> bool {
        match self {
            DaqError::Io(_) => true,
            DaqError::Csv(err) => matches!(err.kind(), csv::ErrorKind::Io(_)),
            _ => false,
        }
    }
}
