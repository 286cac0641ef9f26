//! Custom error types for the acquisition stack.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the kinds of failures that occur while driving a delay stage and a spectrometer
//! and writing the resulting map to disk.
//!
//! ## Error Hierarchy
//!
//! - **`CommFailure`**: An I/O fault on the stage or spectrometer link (write error,
//!   unexpected EOF, SDK failure). Fatal to a run when it happens during a move or capture.
//! - **`Timeout`**: The stage never reported "stopped" within the poll bound.
//!   Fatal to a run.
//! - **`ParseFailure`**: A device answered with something that is not a decimal integer.
//!   On auxiliary position queries this degrades to an "unknown position" marker.
//! - **`ShapeMismatch`**: Background length differs from the live spectrum length.
//!   Degrades (subtraction skipped for that frame), never fails a step.
//! - **`Cancelled`**: User-requested stop. Not an error in the run's terminal status.
//! - **`Io` / `Csv` / `Json` / `Storage`**: Persistence failures.
//! - **`Config` / `Configuration`**: Loading and semantic validation of settings.
//!
//! By using `#[from]`, `DaqError` can be created from the underlying error types,
//! so the `?` operator works throughout the crate.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Communication failure: {0}")]
    CommFailure(String),

    #[error("Stage did not report stopped after {attempts} polls ({elapsed:?})")]
    Timeout { attempts: u32, elapsed: Duration },

    #[error("Could not parse response {response:?} to '{command}'")]
    ParseFailure { command: String, response: String },

    #[error("Background has {actual} samples but the live spectrum has {expected}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Acquisition cancelled by user")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl DaqError {
    /// Whether this error aborts the remaining steps of a run.
    ///
    /// `ParseFailure` and `ShapeMismatch` degrade in place, and `Cancelled` is a
    /// terminal state of its own rather than a failure.
    pub fn is_fatal_to_run(&self) -> bool {
        !matches!(
            self,
            DaqError::ParseFailure { .. } | DaqError::ShapeMismatch { .. } | DaqError::Cancelled
        )
    }
}
