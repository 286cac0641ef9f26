//! Console diagnostics and the per-run text log.
//!
//! Library code emits `tracing` events with structured fields (`step`,
//! `delay_fs`, `position`, ...) and spans around stage operations. [`init`]
//! installs the subscriber that prints them; `RUST_LOG` takes precedence over
//! the configured level.
//!
//! The per-run log next to the data files is separate: the CLI writes it
//! from the engine's `Log` events through [`RunLogFile`].
//!
//! ```no_run
//! use frog_daq::{config::FrogConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FrogConfig::load()?;
//! logging::init_from_config(&config)?;
//! tracing::info!(port = %config.stage.port, "Starting");
//! # Ok(())
//! # }
//! ```

use crate::config::FrogConfig;
use crate::error::{AppResult, DaqError};
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Console rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Multi-line, colored
    Pretty,
    /// One line per event
    #[default]
    Compact,
    /// Newline-delimited JSON
    Json,
}

impl FromStr for OutputFormat {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(DaqError::Configuration(format!(
                "unknown log format '{other}' (pretty, compact, json)"
            ))),
        }
    }
}

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Most verbose level printed unless `RUST_LOG` is set.
    pub level: Level,
    pub format: OutputFormat,
    /// Print source file and line with each event.
    pub source_locations: bool,
    /// Report span timings when they close.
    pub span_timings: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            source_locations: false,
            span_timings: false,
        }
    }
}

impl LoggingConfig {
    /// Settings from the `[application]` section.
    ///
    /// Span timings and source locations are switched on at `debug` and below.
    pub fn from_config(config: &FrogConfig) -> AppResult<Self> {
        let level = parse_log_level(&config.application.log_level)?;
        let verbose = level >= Level::DEBUG;
        Ok(Self {
            level,
            format: config.log_format(),
            source_locations: verbose,
            span_timings: verbose,
        })
    }

    fn console_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let spans = if self.span_timings {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let base = fmt::layer()
            .with_span_events(spans)
            .with_file(self.source_locations)
            .with_line_number(self.source_locations);
        match self.format {
            OutputFormat::Pretty => base.pretty().boxed(),
            OutputFormat::Compact => base.compact().with_ansi(false).boxed(),
            OutputFormat::Json => base.json().boxed(),
        }
    }
}

/// Install the subscriber described by the application configuration.
pub fn init_from_config(config: &FrogConfig) -> AppResult<()> {
    init(&LoggingConfig::from_config(config)?)
}

/// Install the global subscriber.
///
/// Does nothing when a subscriber is already installed (tests install their own).
pub fn init(config: &LoggingConfig) -> AppResult<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_ascii_lowercase()));

    tracing_subscriber::registry()
        .with(config.console_layer())
        .with(filter)
        .try_init()
        .map_err(|e| DaqError::Configuration(format!("tracing subscriber: {e}")))
}

/// Parse `trace`, `debug`, `info`, `warn` or `error` (any case).
pub fn parse_log_level(level: &str) -> AppResult<Level> {
    Level::from_str(level.trim()).map_err(|_| {
        DaqError::Configuration(format!(
            "unknown log level '{level}' (trace, debug, info, warn, error)"
        ))
    })
}

/// Human-readable per-run log, one `[YYYY/MM/DD HH:MM:SS] message` line per entry.
#[derive(Debug)]
pub struct RunLogFile {
    path: PathBuf,
    file: File,
}

impl RunLogFile {
    /// Open (append) `<dir>/<stamp>_FROG.log`, creating `dir` if needed.
    pub fn open(dir: impl AsRef<Path>, stamp: &str) -> AppResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{stamp}_FROG.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line.
    pub fn write_line(&mut self, message: &str) -> AppResult<()> {
        let now = Local::now().format("%Y/%m/%d %H:%M:%S");
        writeln!(self.file, "[{now}] {message}")?;
        self.file.flush()?;
        Ok(())
    }
}
