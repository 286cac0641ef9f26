//! Scan parameters and the pulse-to-delay conversion.

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};

/// Speed of light in vacuum (m/s).
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Round-trip optical delay of `step_size` stage pulses, in femtoseconds.
///
/// One pulse moves the retro-reflector by one micrometre, and the beam
/// travels the extra path twice.
///
/// ```
/// use frog_daq::acquisition::params::delay_per_step_fs;
///
/// assert!((delay_per_step_fs(3) - 20.02).abs() < 0.01);
/// ```
pub fn delay_per_step_fs(step_size: u32) -> f64 {
    2.0 * f64::from(step_size) * 1e-6 / SPEED_OF_LIGHT * 1e15
}

/// Everything needed to run one delay scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionParameters {
    /// Pulses between two consecutive captures.
    pub step_size: u32,
    /// Total scan length in pulses.
    pub range: u32,
    /// Exposure per capture (ms).
    pub integration_time_ms: u32,
    /// Stage speed used for every step move.
    pub speed: u32,
    /// Stored as the stage HOME point before the first step.
    pub home_position: Option<i64>,
    /// Drive back to HOME once the run has ended.
    pub return_to_home: bool,
    /// Spectrum subtracted from every capture of matching length.
    #[serde(skip)]
    pub background: Option<Vec<f64>>,
}

impl AcquisitionParameters {
    /// Parameters without home handling or background.
    pub fn new(step_size: u32, range: u32, integration_time_ms: u32, speed: u32) -> Self {
        Self {
            step_size,
            range,
            integration_time_ms,
            speed,
            home_position: None,
            return_to_home: false,
            background: None,
        }
    }

    /// Attach a background spectrum.
    #[must_use]
    pub fn with_background(mut self, background: Vec<f64>) -> Self {
        self.background = Some(background);
        self
    }

    /// Store `home` on the stage before scanning.
    #[must_use]
    pub fn with_home_position(mut self, home: i64) -> Self {
        self.home_position = Some(home);
        self
    }

    /// Return to HOME after the run.
    #[must_use]
    pub fn with_return_to_home(mut self, enabled: bool) -> Self {
        self.return_to_home = enabled;
        self
    }

    /// Number of captures in the scan (`range / step_size`, truncating).
    pub fn loop_count(&self) -> usize {
        if self.step_size == 0 {
            return 0;
        }
        (self.range / self.step_size) as usize
    }

    /// Delay between consecutive captures (fs).
    pub fn dt_fs(&self) -> f64 {
        delay_per_step_fs(self.step_size)
    }

    /// Reject parameters that cannot produce a scan.
    pub fn validate(&self) -> AppResult<()> {
        let positive = [
            ("step_size", self.step_size),
            ("range", self.range),
            ("integration_time_ms", self.integration_time_ms),
            ("speed", self.speed),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(DaqError::Configuration(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        if self.range < self.step_size {
            return Err(DaqError::Configuration(format!(
                "range ({}) is shorter than one step ({})",
                self.range, self.step_size
            )));
        }
        if self.range % self.step_size != 0 {
            tracing::warn!(
                range = self.range,
                step_size = self.step_size,
                "Range is not a multiple of the step size; the last partial step is dropped"
            );
        }
        Ok(())
    }
}
