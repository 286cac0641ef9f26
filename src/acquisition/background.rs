//! Background spectra and single test captures outside a scan.

use super::dataset::{nan_max, subtract_background};
use crate::error::{AppResult, DaqError};
use crate::hardware::Spectrometer;
use std::path::Path;

/// A spectrum together with its wavelength axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    /// Axis in nm.
    pub wavelengths: Vec<f64>,
    /// Counts, same length as `wavelengths`.
    pub intensities: Vec<f64>,
}

impl Spectrum {
    /// NaN-aware peak intensity.
    pub fn max_intensity(&self) -> f64 {
        nan_max(&self.intensities)
    }

    /// Wavelength of the peak, if any value is a number.
    pub fn peak_wavelength(&self) -> Option<f64> {
        self.intensities
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_nan())
            .max_by(|a, b| a.1.total_cmp(b.1))
            .and_then(|(i, _)| self.wavelengths.get(i).copied())
    }
}

/// One test capture, optionally background-subtracted.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// The capture, after subtraction when it happened.
    pub spectrum: Spectrum,
    /// False when no background was given or its length did not match.
    pub background_subtracted: bool,
}

async fn capture(spectrometer: &Spectrometer, integration_time_ms: u32) -> AppResult<Spectrum> {
    spectrometer.set_integration_time(integration_time_ms).await?;
    let intensities = spectrometer.capture_intensities().await?;
    let wavelengths = spectrometer.wavelengths().await?;
    Ok(Spectrum {
        wavelengths,
        intensities,
    })
}

/// Capture a reference spectrum (excitation blocked) for later subtraction.
pub async fn capture_background(
    spectrometer: &Spectrometer,
    integration_time_ms: u32,
) -> AppResult<Spectrum> {
    let spectrum = capture(spectrometer, integration_time_ms).await?;
    tracing::info!(
        samples = spectrum.intensities.len(),
        integration_ms = integration_time_ms,
        "Background spectrum captured"
    );
    Ok(spectrum)
}

/// Capture one spectrum, subtracting `background` when the lengths match.
pub async fn capture_snapshot(
    spectrometer: &Spectrometer,
    integration_time_ms: u32,
    background: Option<&[f64]>,
) -> AppResult<Snapshot> {
    let mut spectrum = capture(spectrometer, integration_time_ms).await?;
    let background_subtracted = match background {
        Some(bg) => match subtract_background(&mut spectrum.intensities, bg) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Background not subtracted: {e}");
                false
            }
        },
        None => false,
    };
    Ok(Snapshot {
        spectrum,
        background_subtracted,
    })
}

/// Write a spectrum as `wavelength\tintensity` lines under a header.
pub fn save_background(path: impl AsRef<Path>, spectrum: &Spectrum) -> AppResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)?;
    writer.write_record(["wavelength", "intensity"])?;
    for (wl, value) in spectrum.wavelengths.iter().zip(&spectrum.intensities) {
        writer.write_record([format!("{wl:.4}"), format!("{value:.4}")])?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a spectrum written by [`save_background`].
pub fn load_background(path: impl AsRef<Path>) -> AppResult<Spectrum> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_path(path)?;

    let mut spectrum = Spectrum {
        wavelengths: Vec::new(),
        intensities: Vec::new(),
    };
    for record in reader.records() {
        let record = record?;
        let parse = |i: usize| -> AppResult<f64> {
            let cell = record.get(i).unwrap_or("");
            cell.trim().parse::<f64>().map_err(|_| {
                DaqError::Storage(format!(
                    "{}: '{cell}' is not a number",
                    path.display()
                ))
            })
        };
        spectrum.wavelengths.push(parse(0)?);
        spectrum.intensities.push(parse(1)?);
    }
    if spectrum.intensities.is_empty() {
        return Err(DaqError::Storage(format!(
            "{}: background file has no samples",
            path.display()
        )));
    }
    Ok(spectrum)
}
