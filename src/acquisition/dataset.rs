//! The delay × wavelength matrix built up during a scan.
//!
//! A [`Dataset`] owns one shared [`WavelengthAxis`] and an append-only list of
//! [`SpectralFrame`]s. Frames are reference-counted so the snapshots sent to
//! observers after every step cost one `Vec` of pointers, not a copy of the
//! map.
//!
//! Invariants enforced by [`Dataset::push`]:
//! - every frame has exactly as many intensities as the axis has wavelengths
//! - frames arrive in step order with no gaps, so delays strictly increase

use crate::error::{AppResult, DaqError};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::Arc;

/// Wavelengths of the sensor pixels kept after truncation (nm).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WavelengthAxis {
    values: Vec<f64>,
}

impl WavelengthAxis {
    /// Wrap an axis read from the spectrometer.
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Wavelength values in pixel order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of wavelengths.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True for an axis with no pixels.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One capture at one delay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectralFrame {
    /// Zero-based step index.
    pub step_index: usize,
    /// `step_index · dt` (fs).
    pub delay_fs: f64,
    /// Background-subtracted intensities, one per axis wavelength.
    pub intensities: Vec<f64>,
    /// NaN-aware maximum of `intensities`.
    pub max_intensity: f64,
    /// When the capture finished.
    pub captured_at: DateTime<Local>,
}

impl SpectralFrame {
    /// Build a frame and compute its peak.
    pub fn new(
        step_index: usize,
        delay_fs: f64,
        intensities: Vec<f64>,
        captured_at: DateTime<Local>,
    ) -> Self {
        let max_intensity = nan_max(&intensities);
        Self {
            step_index,
            delay_fs,
            intensities,
            max_intensity,
            captured_at,
        }
    }
}

/// Largest value ignoring NaN; NaN when no value is a number.
pub fn nan_max(values: &[f64]) -> f64 {
    values
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
        .unwrap_or(f64::NAN)
}

/// Subtract `background` from `live` element-wise, in place.
///
/// Results are not clamped; negative values are kept. When the lengths
/// differ `live` is left untouched and [`DaqError::ShapeMismatch`] is returned.
pub fn subtract_background(live: &mut [f64], background: &[f64]) -> AppResult<()> {
    if live.len() != background.len() {
        return Err(DaqError::ShapeMismatch {
            expected: live.len(),
            actual: background.len(),
        });
    }
    for (value, bg) in live.iter_mut().zip(background) {
        *value -= bg;
    }
    Ok(())
}

/// Frames recorded so far, plus their shared axis.
#[derive(Debug, Clone)]
pub struct Dataset {
    axis: Arc<WavelengthAxis>,
    dt_fs: f64,
    frames: Vec<Arc<SpectralFrame>>,
}

impl Dataset {
    /// An empty dataset for a run with the given axis and step delay.
    pub fn new(axis: Arc<WavelengthAxis>, dt_fs: f64) -> Self {
        Self {
            axis,
            dt_fs,
            frames: Vec::new(),
        }
    }

    /// The shared wavelength axis.
    pub fn axis(&self) -> &Arc<WavelengthAxis> {
        &self.axis
    }

    /// Delay between consecutive frames (fs).
    pub fn dt_fs(&self) -> f64 {
        self.dt_fs
    }

    /// Recorded frames in step order.
    pub fn frames(&self) -> &[Arc<SpectralFrame>] {
        &self.frames
    }

    /// Number of recorded frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True before the first frame is recorded.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Delay of every recorded frame.
    pub fn delays(&self) -> Vec<f64> {
        self.frames.iter().map(|f| f.delay_fs).collect()
    }

    /// Append the next frame.
    ///
    /// # Errors
    /// [`DaqError::ShapeMismatch`] if the frame length differs from the axis,
    /// [`DaqError::Storage`] if the frame is not the next step in order.
    pub fn push(&mut self, frame: Arc<SpectralFrame>) -> AppResult<()> {
        if frame.intensities.len() != self.axis.len() {
            return Err(DaqError::ShapeMismatch {
                expected: self.axis.len(),
                actual: frame.intensities.len(),
            });
        }
        if frame.step_index != self.frames.len() {
            return Err(DaqError::Storage(format!(
                "frame for step {} arrived after {} frames",
                frame.step_index,
                self.frames.len()
            )));
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Wavelength-major copy: one row per wavelength, one column per frame.
    pub fn transpose(&self) -> Vec<Vec<f64>> {
        (0..self.axis.len())
            .map(|w| self.frames.iter().map(|f| f.intensities[w]).collect())
            .collect()
    }
}
