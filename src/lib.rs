//! # FROG DAQ Core Library
//!
//! Acquisition engine for Frequency-Resolved Optical Gating measurements: a
//! spectrometer captures a spectrum at each position of a motorized delay
//! stage, producing a delay × wavelength intensity map that is written to
//! disk as it grows.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: The scan state machine ([`acquisition::AcquisitionEngine`]),
//!   its parameters, the in-memory dataset, observer events, and the sinks that
//!   persist row-major and column-major files.
//! - **`hardware`**: The [`hardware::StageLink`] trait with the DS102 serial
//!   driver, the [`hardware::Spectrometer`] wrapper over a raw device, and
//!   simulated devices.
//! - **`timing`**: Bounded polling policy and the injectable [`timing::Clock`].
//! - **`config`**: Layered configuration (defaults, TOML, environment) via figment.
//! - **`logging`**: `tracing-subscriber` setup and the per-run text log.
//! - **`error`**: The crate-wide [`error::DaqError`].
//!
//! The `frog-daq` binary (`src/main.rs`) is a thin command-line front end over
//! this library.

pub mod acquisition;
pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod timing;

pub use error::{AppResult, DaqError};
