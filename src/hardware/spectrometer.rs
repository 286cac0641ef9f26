//! Spectrometer capture with exposure settling and dead-pixel truncation.
//!
//! [`SpectrometerDevice`] is the thin surface a vendor SDK binding exposes:
//! raw full-sensor wavelength and intensity vectors plus an integration-time
//! setter in microseconds. [`Spectrometer`] wraps a device and adds the two
//! behaviours every capture needs:
//!
//! - **Settle guard**: after the exposure is configured the device needs
//!   `integration_time + settle_guard` before the intensity buffer holds a
//!   complete frame from the new exposure.
//! - **Leading offset**: the first samples of the sensor are a dead-pixel
//!   region and are dropped from both the axis and every capture, so the two
//!   always have the same length.

use crate::error::{AppResult, DaqError};
use crate::timing::{Clock, TokioClock};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Raw samples dropped from the front of every vector.
pub const DEFAULT_LEADING_OFFSET: usize = 1002;

/// Margin beyond the integration time before a capture is read.
pub const DEFAULT_SETTLE_GUARD: Duration = Duration::from_millis(200);

/// Raw device surface, as exposed by a vendor SDK binding.
#[async_trait]
pub trait SpectrometerDevice: Send + Sync {
    /// Model name reported by the device.
    fn model(&self) -> &str;

    /// Configure the exposure of subsequent captures.
    async fn set_integration_time_micros(&self, micros: u64) -> AppResult<()>;

    /// Full-sensor wavelength axis in nanometres.
    async fn raw_wavelengths(&self) -> AppResult<Vec<f64>>;

    /// Full-sensor intensities of the most recent exposure.
    async fn raw_intensities(&self) -> AppResult<Vec<f64>>;
}

/// Capture behaviour applied on top of a [`SpectrometerDevice`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpectrometerOptions {
    /// Number of leading raw samples discarded.
    pub leading_offset: usize,
    /// Extra wait after the integration time.
    pub settle_guard: Duration,
}

impl Default for SpectrometerOptions {
    fn default() -> Self {
        Self {
            leading_offset: DEFAULT_LEADING_OFFSET,
            settle_guard: DEFAULT_SETTLE_GUARD,
        }
    }
}

/// A spectrometer ready for acquisition.
pub struct Spectrometer {
    device: Arc<dyn SpectrometerDevice>,
    options: SpectrometerOptions,
    clock: Arc<dyn Clock>,
    integration_micros: AtomicU64,
}

impl fmt::Debug for Spectrometer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spectrometer")
            .field("model", &self.device.model())
            .field("options", &self.options)
            .field("integration_time", &self.integration_time())
            .finish_non_exhaustive()
    }
}

impl Spectrometer {
    /// Wrap a device, waiting on real time.
    pub fn new(device: Arc<dyn SpectrometerDevice>, options: SpectrometerOptions) -> Self {
        Self {
            device,
            options,
            clock: Arc::new(TokioClock),
            integration_micros: AtomicU64::new(0),
        }
    }

    /// Replace the clock used for the exposure wait.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Model name of the wrapped device.
    pub fn model(&self) -> &str {
        self.device.model()
    }

    /// Last integration time set through this wrapper.
    pub fn integration_time(&self) -> Duration {
        Duration::from_micros(self.integration_micros.load(Ordering::SeqCst))
    }

    /// Configure the exposure in milliseconds.
    ///
    /// Has no effect on a capture that is already waiting.
    pub async fn set_integration_time(&self, ms: u32) -> AppResult<()> {
        let micros = u64::from(ms) * 1000;
        self.device.set_integration_time_micros(micros).await?;
        self.integration_micros.store(micros, Ordering::SeqCst);
        tracing::debug!(integration_ms = ms, "Integration time set");
        Ok(())
    }

    /// Wait out one exposure plus the settle guard and return the intensities.
    pub async fn capture_intensities(&self) -> AppResult<Vec<f64>> {
        let wait = self.integration_time() + self.options.settle_guard;
        self.clock.sleep(wait).await;
        let raw = self.device.raw_intensities().await?;
        self.truncate(raw, "intensities")
    }

    /// The wavelength axis, truncated like every capture.
    pub async fn wavelengths(&self) -> AppResult<Vec<f64>> {
        let raw = self.device.raw_wavelengths().await?;
        self.truncate(raw, "wavelengths")
    }

    fn truncate(&self, mut raw: Vec<f64>, what: &str) -> AppResult<Vec<f64>> {
        let offset = self.options.leading_offset;
        if raw.len() <= offset {
            return Err(DaqError::CommFailure(format!(
                "{} returned {} {what}, not more than the leading offset {offset}",
                self.device.model(),
                raw.len()
            )));
        }
        raw.drain(..offset);
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::ManualClock;
    use std::sync::Mutex;

    struct FixedDevice {
        pixels: usize,
        micros: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl SpectrometerDevice for FixedDevice {
        fn model(&self) -> &str {
            "FIXED"
        }

        async fn set_integration_time_micros(&self, micros: u64) -> AppResult<()> {
            self.micros.lock().unwrap().push(micros);
            Ok(())
        }

        async fn raw_wavelengths(&self) -> AppResult<Vec<f64>> {
            Ok((0..self.pixels).map(|i| 400.0 + i as f64).collect())
        }

        async fn raw_intensities(&self) -> AppResult<Vec<f64>> {
            Ok((0..self.pixels).map(|i| i as f64).collect())
        }
    }

    fn fixture(pixels: usize, offset: usize) -> (Spectrometer, Arc<FixedDevice>, Arc<ManualClock>) {
        let device = Arc::new(FixedDevice {
            pixels,
            micros: Mutex::new(Vec::new()),
        });
        let clock = Arc::new(ManualClock::new());
        let spectrometer = Spectrometer::new(
            device.clone(),
            SpectrometerOptions {
                leading_offset: offset,
                settle_guard: DEFAULT_SETTLE_GUARD,
            },
        )
        .with_clock(clock.clone());
        (spectrometer, device, clock)
    }

    #[tokio::test]
    async fn integration_time_is_sent_in_microseconds() {
        let (spectrometer, device, _clock) = fixture(8, 2);
        spectrometer.set_integration_time(150).await.unwrap();
        assert_eq!(*device.micros.lock().unwrap(), vec![150_000]);
        assert_eq!(spectrometer.integration_time(), Duration::from_millis(150));
    }

    #[tokio::test]
    async fn capture_waits_integration_plus_guard() {
        let (spectrometer, _device, clock) = fixture(8, 2);
        spectrometer.set_integration_time(100).await.unwrap();

        spectrometer.capture_intensities().await.unwrap();

        assert_eq!(clock.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn axis_and_capture_share_the_offset() {
        let (spectrometer, _device, _clock) = fixture(8, 3);

        let axis = spectrometer.wavelengths().await.unwrap();
        let capture = spectrometer.capture_intensities().await.unwrap();

        assert_eq!(axis, vec![403.0, 404.0, 405.0, 406.0, 407.0]);
        assert_eq!(capture, vec![3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[tokio::test]
    async fn short_sensor_is_rejected() {
        let (spectrometer, _device, _clock) = fixture(3, 3);
        assert!(matches!(
            spectrometer.wavelengths().await,
            Err(DaqError::CommFailure(_))
        ));
    }
}
