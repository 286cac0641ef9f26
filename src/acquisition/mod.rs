//! Delay-scan acquisition: parameters, the growing dataset, the engine that
//! sequences stage and spectrometer, and the sinks that persist the result.

pub mod background;
pub mod dataset;
pub mod engine;
pub mod events;
pub mod params;
pub mod report;
pub mod sink;
pub mod state;

pub use background::{capture_background, capture_snapshot, load_background, save_background, Snapshot, Spectrum};
pub use dataset::{nan_max, subtract_background, Dataset, SpectralFrame, WavelengthAxis};
pub use engine::{spawn_acquisition, AcquisitionEngine, AcquisitionHandle};
pub use events::{AcquisitionEvent, CancelToken, EventReceiver, EventSender, LogLevel};
pub use params::{delay_per_step_fs, AcquisitionParameters};
pub use report::{RunReport, RunSummary, SinkArtifacts};
pub use sink::{read_column_major, read_row_major, DatasetSink, TextFileSink};
pub use state::RunState;
