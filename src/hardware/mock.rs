//! Mock Hardware Implementations
//!
//! Simulated delay stage and spectrometer for running the acquisition
//! pipeline without the physical DS102 and USB4000.
//!
//! # Available Mocks
//!
//! - `MockStage` - Pulse counter that moves at the commanded speed
//! - `MockSpectrometerDevice` - 3648-pixel sensor producing a FROG-like trace
//!
//! Both share one position cell (see [`simulated_pair`]), so the spectrometer
//! sees the delay the stage is parked at. All waiting goes through the
//! injected [`Clock`], so tests can run with [`crate::timing::ManualClock`].
//!
//! # Performance Characteristics
//!
//! - MockStage: `pulses / speed` seconds per move, no settling overshoot
//! - MockSpectrometerDevice: returns immediately; exposure wait is the
//!   caller's job, as on the real device

use crate::error::{AppResult, DaqError};
use crate::hardware::spectrometer::SpectrometerDevice;
use crate::hardware::stage::{Direction, StageLink};
use crate::timing::Clock;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Position cell shared by a simulated stage and spectrometer.
pub type SharedPosition = Arc<AtomicI64>;

// =============================================================================
// MockStage - Simulated DS102 Delay Stage
// =============================================================================

/// Mock delay stage with speed-dependent move time
///
/// # Example
///
/// ```rust,ignore
/// let stage = MockStage::new(Arc::new(TokioClock));
/// stage.move_and_wait(1000, 500, Direction::Forward).await?; // ~0.5 s
/// assert_eq!(stage.position().await?, 500);
/// ```
pub struct MockStage {
    position: SharedPosition,
    home: AtomicI64,
    origin: AtomicI64,
    clock: Arc<dyn Clock>,
}

impl MockStage {
    /// Create new mock stage at pulse 0.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_position(Arc::new(AtomicI64::new(0)), clock)
    }

    /// Create a mock stage driving an existing position cell.
    pub fn with_position(position: SharedPosition, clock: Arc<dyn Clock>) -> Self {
        Self {
            position,
            home: AtomicI64::new(0),
            origin: AtomicI64::new(0),
            clock,
        }
    }

    /// The position cell this stage updates.
    pub fn shared_position(&self) -> SharedPosition {
        Arc::clone(&self.position)
    }

    async fn travel(&self, speed: u32, target: i64) -> AppResult<Duration> {
        if speed == 0 {
            return Err(DaqError::CommFailure(
                "MockStage: speed 0 never reaches the target".to_string(),
            ));
        }
        let current = self.position.load(Ordering::SeqCst);
        let distance = target.abs_diff(current);
        let travel = Duration::from_secs_f64(distance as f64 / f64::from(speed));

        tracing::trace!(from = current, to = target, ?travel, "MockStage moving");
        self.clock.sleep(travel).await;
        self.position.store(target, Ordering::SeqCst);
        Ok(travel)
    }
}

#[async_trait]
impl StageLink for MockStage {
    async fn move_and_wait(
        &self,
        speed: u32,
        pulses: u32,
        direction: Direction,
    ) -> AppResult<Duration> {
        let current = self.position.load(Ordering::SeqCst);
        let target = match direction {
            Direction::Forward => current + i64::from(pulses),
            Direction::Backward => current - i64::from(pulses),
        };
        self.travel(speed, target).await
    }

    async fn position(&self) -> AppResult<i64> {
        Ok(self.position.load(Ordering::SeqCst))
    }

    async fn set_absolute_position(&self, value: i64) -> AppResult<()> {
        // Redefining the coordinate system shifts origin and home with it
        let shift = value - self.position.load(Ordering::SeqCst);
        self.origin.fetch_add(shift, Ordering::SeqCst);
        self.home.fetch_add(shift, Ordering::SeqCst);
        self.position.store(value, Ordering::SeqCst);
        Ok(())
    }

    async fn set_home(&self, value: i64) -> AppResult<()> {
        self.home.store(value, Ordering::SeqCst);
        Ok(())
    }

    async fn home(&self) -> AppResult<i64> {
        Ok(self.home.load(Ordering::SeqCst))
    }

    async fn origin(&self) -> AppResult<i64> {
        Ok(self.origin.load(Ordering::SeqCst))
    }

    async fn return_home(&self) -> AppResult<Duration> {
        let home = self.home.load(Ordering::SeqCst);
        self.travel(5000, home).await
    }

    async fn initialize(&self) -> AppResult<()> {
        Ok(())
    }
}

// =============================================================================
// MockSpectrometerDevice - Simulated USB4000
// =============================================================================

/// Trace parameters of a [`MockSpectrometerDevice`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimulatedTrace {
    /// Centre of the second-harmonic band (nm).
    pub center_nm: f64,
    /// 1/e half-width of the band (nm).
    pub width_nm: f64,
    /// Stage position of zero delay (pulses).
    pub zero_delay: i64,
    /// 1/e half-width of the delay envelope (pulses).
    pub width_pulses: f64,
    /// Peak counts per 100 ms of exposure.
    pub peak_counts: f64,
    /// Constant dark level (counts).
    pub dark_level: f64,
    /// Uniform noise amplitude (counts).
    pub noise: f64,
}

impl Default for SimulatedTrace {
    fn default() -> Self {
        Self {
            center_nm: 400.0,
            width_nm: 4.0,
            zero_delay: 40,
            width_pulses: 12.0,
            peak_counts: 12_000.0,
            dark_level: 900.0,
            noise: 15.0,
        }
    }
}

/// Mock spectrometer with a USB4000-like axis.
///
/// Emits a Gaussian band whose amplitude follows a Gaussian envelope in stage
/// position, scaled by the integration time, on top of a dark level with
/// uniform noise. Counts saturate at the 16-bit ADC limit.
pub struct MockSpectrometerDevice {
    pixels: usize,
    axis_nm: (f64, f64),
    position: SharedPosition,
    integration_micros: AtomicU64,
    trace: SimulatedTrace,
    rng: Mutex<StdRng>,
}

impl MockSpectrometerDevice {
    /// Sensor size of the simulated device.
    pub const PIXELS: usize = 3648;

    /// Create a simulated device watching `position`.
    pub fn new(position: SharedPosition) -> Self {
        Self::with_pixels(position, Self::PIXELS)
    }

    /// Create a simulated device with a custom sensor size.
    pub fn with_pixels(position: SharedPosition, pixels: usize) -> Self {
        Self {
            pixels,
            axis_nm: (177.2, 892.0),
            position,
            integration_micros: AtomicU64::new(100_000),
            trace: SimulatedTrace::default(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Use a fixed noise seed.
    #[must_use]
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Replace the simulated trace.
    #[must_use]
    pub fn with_trace(self, trace: SimulatedTrace) -> Self {
        Self { trace, ..self }
    }

    fn wavelength(&self, pixel: usize) -> f64 {
        let (start, end) = self.axis_nm;
        let span = (self.pixels.max(2) - 1) as f64;
        start + (end - start) * pixel as f64 / span
    }
}

#[async_trait]
impl SpectrometerDevice for MockSpectrometerDevice {
    fn model(&self) -> &str {
        "USB4000 (simulated)"
    }

    async fn set_integration_time_micros(&self, micros: u64) -> AppResult<()> {
        if micros == 0 {
            return Err(DaqError::CommFailure(
                "integration time must be positive".to_string(),
            ));
        }
        self.integration_micros.store(micros, Ordering::SeqCst);
        Ok(())
    }

    async fn raw_wavelengths(&self) -> AppResult<Vec<f64>> {
        Ok((0..self.pixels).map(|p| self.wavelength(p)).collect())
    }

    async fn raw_intensities(&self) -> AppResult<Vec<f64>> {
        let t = &self.trace;
        let exposure = self.integration_micros.load(Ordering::SeqCst) as f64 / 100_000.0;
        let offset = (self.position.load(Ordering::SeqCst) - t.zero_delay) as f64;
        let envelope = (-(offset / t.width_pulses).powi(2)).exp();

        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let spectrum = (0..self.pixels)
            .map(|p| {
                let band = (-((self.wavelength(p) - t.center_nm) / t.width_nm).powi(2)).exp();
                let signal = t.peak_counts * exposure * envelope * band;
                let noise = rng.gen_range(-1.0..=1.0) * t.noise;
                (t.dark_level + signal + noise).clamp(0.0, 65_535.0)
            })
            .collect();
        Ok(spectrum)
    }
}

/// A simulated stage and spectrometer sharing one position cell.
pub fn simulated_pair(clock: Arc<dyn Clock>) -> (MockStage, MockSpectrometerDevice) {
    let stage = MockStage::new(clock);
    let device = MockSpectrometerDevice::new(stage.shared_position());
    (stage, device)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::ManualClock;

    #[tokio::test]
    async fn test_mock_stage_relative_moves() {
        let clock = Arc::new(ManualClock::new());
        let stage = MockStage::new(clock.clone());

        let t = stage
            .move_and_wait(1000, 500, Direction::Forward)
            .await
            .unwrap();
        assert_eq!(t, Duration::from_millis(500));
        stage
            .move_and_wait(1000, 200, Direction::Backward)
            .await
            .unwrap();

        assert_eq!(stage.position().await.unwrap(), 300);
        assert_eq!(clock.elapsed(), Duration::from_millis(700));
    }

    #[tokio::test]
    async fn test_mock_stage_home_and_zero() {
        let stage = MockStage::new(Arc::new(ManualClock::new()));
        stage
            .move_and_wait(5000, 120, Direction::Forward)
            .await
            .unwrap();
        stage.set_home(20).await.unwrap();

        stage.return_home().await.unwrap();
        assert_eq!(stage.position().await.unwrap(), 20);

        stage.set_absolute_position(0).await.unwrap();
        assert_eq!(stage.position().await.unwrap(), 0);
        assert_eq!(stage.home().await.unwrap(), 0);
        assert_eq!(stage.origin().await.unwrap(), -20);
    }

    #[tokio::test]
    async fn test_zero_speed_is_rejected() {
        let stage = MockStage::new(Arc::new(ManualClock::new()));
        assert!(stage
            .move_and_wait(0, 1, Direction::Forward)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_spectrum_peaks_at_zero_delay() {
        let (stage, device) = simulated_pair(Arc::new(ManualClock::new()));
        let device = device.with_seed(7);
        let axis = device.raw_wavelengths().await.unwrap();
        assert_eq!(axis.len(), MockSpectrometerDevice::PIXELS);

        let far = device.raw_intensities().await.unwrap();
        stage
            .move_and_wait(5000, 40, Direction::Forward)
            .await
            .unwrap();
        let near = device.raw_intensities().await.unwrap();

        let peak = |v: &[f64]| v.iter().copied().fold(f64::MIN, f64::max);
        assert!(peak(&near) > 10_000.0);
        assert!(peak(&far) < 2_000.0);

        let peak_pixel = near
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!((axis[peak_pixel] - 400.0).abs() < 1.0);
    }
}
