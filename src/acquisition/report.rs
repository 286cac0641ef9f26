//! What a finished run hands back, and the JSON summary written next to the data.

use super::dataset::Dataset;
use super::params::AcquisitionParameters;
use super::state::RunState;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Files produced by a sink for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkArtifacts {
    /// Tab-separated, one row per delay.
    pub row_major: Option<PathBuf>,
    /// Comma-separated, one row per wavelength.
    pub column_major: Option<PathBuf>,
    /// JSON run summary.
    pub summary: Option<PathBuf>,
}

/// Outcome of one acquisition run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Random id, also written to the summary.
    pub run_id: Uuid,
    /// Terminal state.
    pub state: RunState,
    /// Number of frames recorded.
    pub frames: usize,
    /// Error that ended a `Failed` run.
    pub failure: Option<String>,
    /// Files the sink wrote.
    pub artifacts: SinkArtifacts,
    /// Stage position read after the last step.
    pub final_position: Option<i64>,
    /// Wall-clock start.
    pub started_at: DateTime<Local>,
    /// Run duration, setup and wind-down included.
    pub elapsed: Duration,
    /// The frozen dataset.
    pub dataset: Option<Dataset>,
}

impl RunReport {
    /// Fraction of the planned steps that produced a frame.
    pub fn completion(&self, loop_count: usize) -> f64 {
        if loop_count == 0 {
            return 0.0;
        }
        self.frames as f64 / loop_count as f64
    }
}

/// Serialized run summary (`<stamp>_FROG.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Same id as the [`RunReport`].
    pub run_id: Uuid,
    /// Terminal state.
    pub state: RunState,
    /// Scan settings as requested.
    pub parameters: AcquisitionParameters,
    /// Planned steps.
    pub loop_count: usize,
    /// Delay per step in fs.
    pub dt_fs: f64,
    /// Samples in the background spectrum, if one was supplied.
    pub background_samples: Option<usize>,
    /// Frames recorded.
    pub frames: usize,
    /// Length of the wavelength axis.
    pub wavelengths: usize,
    /// Error that ended a `Failed` run.
    pub failure: Option<String>,
    /// Position after the last step, if readable.
    pub final_position: Option<i64>,
    /// Wall-clock start.
    pub started_at: DateTime<Local>,
    /// Wall-clock end, before the summary was written.
    pub finished_at: DateTime<Local>,
    /// Duration in seconds.
    pub elapsed_s: f64,
    /// Row-major file name, without its directory.
    pub row_major_file: Option<String>,
    /// Column-major file name, without its directory.
    pub column_major_file: Option<String>,
}
