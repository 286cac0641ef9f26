//! Configuration loading using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults ([`FrogConfig::default`])
//! 2. A TOML file (`config/frog.toml` unless another path is given; optional)
//! 3. Environment variables prefixed with `FROG_DAQ_`, `__` separating sections
//!
//! # Example
//! ```no_run
//! use frog_daq::config::FrogConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // FROG_DAQ_STAGE__PORT=/dev/ttyUSB1 overrides stage.port
//! let config = FrogConfig::load()?;
//! config.validate()?;
//! println!("Stage on {}", config.stage.port);
//! # Ok(())
//! # }
//! ```

use crate::acquisition::AcquisitionParameters;
use crate::error::{AppResult, DaqError};
use crate::hardware::{SpectrometerOptions, StageOptions};
use crate::logging::OutputFormat;
use crate::timing::PollPolicy;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/frog.toml";

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "FROG_DAQ_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];
const VALID_BACKENDS: [&str; 2] = ["ds102", "simulated"];
const VALID_SPECTROMETER_BACKENDS: [&str; 1] = ["simulated"];

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrogConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Delay stage link
    pub stage: StageConfig,
    /// Spectrometer capture behaviour
    pub spectrometer: SpectrometerConfig,
    /// Default scan parameters
    pub acquisition: AcquisitionConfig,
    /// Output locations
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Console log format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "FROG DAQ".to_string(),
            log_level: "info".to_string(),
            log_format: "compact".to_string(),
        }
    }
}

/// DS102 link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// `ds102` or `simulated`
    pub backend: String,
    /// Serial port path (e.g. "/dev/ttyUSB0", "COM3")
    pub port: String,
    pub baud_rate: u32,
    /// Longest wait for one response line
    pub read_timeout_ms: u64,
    /// Delay between motion-status polls
    pub poll_interval_ms: u64,
    /// Motion-status polls before a move times out
    pub max_polls: u32,
    /// Controller axis number
    pub axis: u8,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            backend: "ds102".to_string(),
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            read_timeout_ms: 1000,
            poll_interval_ms: 100,
            max_polls: 120,
            axis: 1,
        }
    }
}

impl StageConfig {
    /// Driver options derived from this section.
    pub fn options(&self) -> StageOptions {
        StageOptions {
            axis: self.axis,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            poll: PollPolicy::new(Duration::from_millis(self.poll_interval_ms), self.max_polls),
        }
    }
}

/// Spectrometer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrometerConfig {
    /// Only `simulated` is built in
    pub backend: String,
    /// Leading raw samples discarded (dead pixels)
    pub leading_offset: usize,
    /// Wait beyond the integration time before reading
    pub settle_guard_ms: u64,
    /// Sensor size of the simulated device
    pub pixels: usize,
    /// Let a scan pair the simulated spectrometer with the real stage
    /// (useful for checking stage motion without recording real data)
    pub allow_with_real_stage: bool,
}

impl Default for SpectrometerConfig {
    fn default() -> Self {
        Self {
            backend: "simulated".to_string(),
            leading_offset: crate::hardware::spectrometer::DEFAULT_LEADING_OFFSET,
            settle_guard_ms: 200,
            pixels: crate::hardware::mock::MockSpectrometerDevice::PIXELS,
            allow_with_real_stage: false,
        }
    }
}

impl SpectrometerConfig {
    /// Capture options derived from this section.
    pub fn options(&self) -> SpectrometerOptions {
        SpectrometerOptions {
            leading_offset: self.leading_offset,
            settle_guard: Duration::from_millis(self.settle_guard_ms),
        }
    }
}

/// Default scan parameters (overridable from the command line)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Pulses per step
    pub step_size: u32,
    /// Scan length in pulses
    pub range: u32,
    pub integration_time_ms: u32,
    /// Stage speed (pulses/s)
    pub speed: u32,
    pub return_to_home: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        // 1 pulse ≈ 6.67 fs, 75 pulses ≈ 500 fs
        Self {
            step_size: 1,
            range: 75,
            integration_time_ms: 100,
            speed: 1000,
            return_to_home: false,
        }
    }
}

impl AcquisitionConfig {
    /// Scan parameters from this section.
    pub fn parameters(&self) -> AcquisitionParameters {
        AcquisitionParameters::new(
            self.step_size,
            self.range,
            self.integration_time_ms,
            self.speed,
        )
        .with_return_to_home(self.return_to_home)
    }
}

/// Output locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for measurement data files
    pub output_dir: PathBuf,
    /// Directory for per-run text logs
    pub log_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            log_dir: PathBuf::from("log"),
        }
    }
}

impl FrogConfig {
    /// Load from `config/frog.toml` and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Self::figment(path.as_ref()).extract()?;
        Ok(config)
    }

    /// The layered provider, exposed for callers that merge further sources.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(FrogConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        check_choice("application.log_level", &self.application.log_level, &VALID_LOG_LEVELS)?;
        check_choice("application.log_format", &self.application.log_format, &VALID_LOG_FORMATS)?;
        check_choice("stage.backend", &self.stage.backend, &VALID_BACKENDS)?;
        check_choice(
            "spectrometer.backend",
            &self.spectrometer.backend,
            &VALID_SPECTROMETER_BACKENDS,
        )?;

        if self.stage.max_polls == 0 {
            return Err(DaqError::Configuration(
                "stage.max_polls must be at least 1".to_string(),
            ));
        }
        if self.stage.baud_rate == 0 {
            return Err(DaqError::Configuration(
                "stage.baud_rate must be greater than zero".to_string(),
            ));
        }
        if self.spectrometer.pixels <= self.spectrometer.leading_offset {
            return Err(DaqError::Configuration(format!(
                "spectrometer.pixels ({}) must exceed leading_offset ({})",
                self.spectrometer.pixels, self.spectrometer.leading_offset
            )));
        }

        self.acquisition.parameters().validate()
    }

    /// Refuse a scan that would drive the real stage while recording
    /// simulated spectra, unless the configuration opts into that pairing.
    ///
    /// `simulate` is the command-line override that replaces the stage too.
    pub fn check_scan_backends(&self, simulate: bool) -> AppResult<()> {
        let real_stage = !simulate && !self.stage.backend.eq_ignore_ascii_case("simulated");
        let simulated_spectra = self.spectrometer.backend.eq_ignore_ascii_case("simulated");
        if real_stage && simulated_spectra && !self.spectrometer.allow_with_real_stage {
            return Err(DaqError::Configuration(format!(
                "a scan would move the {} stage but record simulated spectra; \
                 pass --simulate or set spectrometer.allow_with_real_stage = true",
                self.stage.backend
            )));
        }
        Ok(())
    }

    /// Console log format; compact when unrecognised.
    pub fn log_format(&self) -> OutputFormat {
        self.application.log_format.parse().unwrap_or_default()
    }
}

fn check_choice(field: &str, value: &str, valid: &[&str]) -> AppResult<()> {
    if valid.contains(&value.to_lowercase().as_str()) {
        Ok(())
    } else {
        Err(DaqError::Configuration(format!(
            "Invalid {field} '{value}'. Must be one of: {}",
            valid.join(", ")
        )))
    }
}
