//! Device layer: the DS102 delay stage, the spectrometer wrapper and their
//! simulated counterparts.
//!
//! - [`stage`]: [`StageLink`] trait and the serial [`Ds102Stage`] driver
//! - [`spectrometer`]: [`SpectrometerDevice`] trait and the [`Spectrometer`] wrapper
//! - [`mock`]: simulated stage and spectrometer sharing one position
//! - [`serial`]: terminated command/response link over a serial port
//! - [`mock_serial`]: scripted DS102 controller on an in-memory line

pub mod mock;
pub mod mock_serial;
pub mod serial;
pub mod spectrometer;
pub mod stage;

pub use spectrometer::{Spectrometer, SpectrometerDevice, SpectrometerOptions};
pub use stage::{Direction, Ds102Stage, StageLink, StageOptions};
