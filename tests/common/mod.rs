//! Scripted doubles shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use frog_daq::acquisition::CancelToken;
use frog_daq::hardware::{
    Direction, Spectrometer, SpectrometerDevice, SpectrometerOptions, StageLink,
};
use frog_daq::timing::ManualClock;
use frog_daq::{AppResult, DaqError};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Ordered record of hardware calls across both doubles.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, call: impl Into<String>) {
        self.0.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

/// How the scripted stage answers the n-th move (1-based).
#[derive(Debug, Clone, Copy)]
pub enum MoveFault {
    Timeout,
    Comm,
}

/// Stage whose moves succeed instantly unless scripted to fail.
pub struct ScriptedStage {
    pub log: CallLog,
    position: AtomicI64,
    home: AtomicI64,
    moves: AtomicUsize,
    fail_move: Option<(usize, MoveFault)>,
    position_unreadable: bool,
}

impl ScriptedStage {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            position: AtomicI64::new(0),
            home: AtomicI64::new(0),
            moves: AtomicUsize::new(0),
            fail_move: None,
            position_unreadable: false,
        }
    }

    /// Fail the `n`-th move (1-based) with `fault`.
    pub fn failing_move(mut self, n: usize, fault: MoveFault) -> Self {
        self.fail_move = Some((n, fault));
        self
    }

    /// Every position query errors.
    pub fn with_unreadable_position(mut self) -> Self {
        self.position_unreadable = true;
        self
    }

    pub fn current(&self) -> i64 {
        self.position.load(Ordering::SeqCst)
    }

    pub fn stored_home(&self) -> i64 {
        self.home.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageLink for ScriptedStage {
    async fn move_and_wait(
        &self,
        speed: u32,
        pulses: u32,
        direction: Direction,
    ) -> AppResult<Duration> {
        let n = self.moves.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.push(format!("move {speed} {pulses} {}", direction.code()));
        if let Some((at, fault)) = self.fail_move {
            if at == n {
                return Err(match fault {
                    MoveFault::Timeout => DaqError::Timeout {
                        attempts: 120,
                        elapsed: Duration::from_secs(12),
                    },
                    MoveFault::Comm => DaqError::CommFailure("link dropped".into()),
                });
            }
        }
        let delta = match direction {
            Direction::Forward => i64::from(pulses),
            Direction::Backward => -i64::from(pulses),
        };
        self.position.fetch_add(delta, Ordering::SeqCst);
        Ok(Duration::from_millis(u64::from(pulses)))
    }

    async fn position(&self) -> AppResult<i64> {
        self.log.push("position");
        if self.position_unreadable {
            return Err(DaqError::ParseFailure {
                command: "AXIs1:POS?".into(),
                response: String::new(),
            });
        }
        Ok(self.current())
    }

    async fn set_absolute_position(&self, value: i64) -> AppResult<()> {
        self.log.push(format!("set_position {value}"));
        self.position.store(value, Ordering::SeqCst);
        Ok(())
    }

    async fn set_home(&self, value: i64) -> AppResult<()> {
        self.log.push(format!("set_home {value}"));
        self.home.store(value, Ordering::SeqCst);
        Ok(())
    }

    async fn home(&self) -> AppResult<i64> {
        Ok(self.stored_home())
    }

    async fn origin(&self) -> AppResult<i64> {
        Ok(0)
    }

    async fn return_home(&self) -> AppResult<Duration> {
        self.log.push("return_home");
        self.position.store(self.stored_home(), Ordering::SeqCst);
        Ok(Duration::from_millis(10))
    }

    async fn initialize(&self) -> AppResult<()> {
        self.log.push("initialize");
        Ok(())
    }
}

/// Device returning the same intensity vector on every capture.
pub struct FixedDevice {
    pub log: CallLog,
    wavelengths: Vec<f64>,
    intensities: Vec<f64>,
    captures: AtomicUsize,
    cancel_after: Option<(usize, CancelToken)>,
    short_capture_at: Option<usize>,
}

impl FixedDevice {
    pub fn new(log: CallLog, wavelengths: Vec<f64>, intensities: Vec<f64>) -> Self {
        Self {
            log,
            wavelengths,
            intensities,
            captures: AtomicUsize::new(0),
            cancel_after: None,
            short_capture_at: None,
        }
    }

    /// Three-sample device used by most engine tests.
    pub fn small(log: CallLog) -> Self {
        Self::new(log, vec![400.0, 401.0, 402.0], vec![5.0, 3.0, 9.0])
    }

    /// Request cancellation while serving the `n`-th capture (1-based).
    pub fn cancelling_after(mut self, n: usize, token: CancelToken) -> Self {
        self.cancel_after = Some((n, token));
        self
    }

    /// Return one sample too few on the `n`-th capture.
    pub fn short_capture_at(mut self, n: usize) -> Self {
        self.short_capture_at = Some(n);
        self
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpectrometerDevice for FixedDevice {
    fn model(&self) -> &str {
        "FIXED-3"
    }

    async fn set_integration_time_micros(&self, micros: u64) -> AppResult<()> {
        self.log.push(format!("integration {micros}"));
        Ok(())
    }

    async fn raw_wavelengths(&self) -> AppResult<Vec<f64>> {
        Ok(self.wavelengths.clone())
    }

    async fn raw_intensities(&self) -> AppResult<Vec<f64>> {
        let n = self.captures.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.push("capture");
        if let Some((at, token)) = &self.cancel_after {
            if *at == n {
                token.cancel();
            }
        }
        let mut values = self.intensities.clone();
        if self.short_capture_at == Some(n) {
            values.pop();
        }
        Ok(values)
    }
}

/// Wrap `device` without a leading offset, waiting on a virtual clock.
pub fn spectrometer(device: Arc<FixedDevice>) -> Spectrometer {
    let options = SpectrometerOptions {
        leading_offset: 0,
        settle_guard: Duration::from_millis(200),
    };
    Spectrometer::new(device, options).with_clock(Arc::new(ManualClock::new()))
}
