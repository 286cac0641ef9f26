//! The acquisition state machine.
//!
//! [`AcquisitionEngine`] sequences one delay scan: step the stage, read its
//! position, expose the spectrometer, subtract the background, record the
//! frame, persist it, notify the observer and check for a stop request. It
//! borrows the stage and spectrometer for the duration of a run and never
//! opens or closes them.
//!
//! # Architecture
//!
//! ```text
//! caller ──params──> AcquisitionEngine ──moves/queries──> StageLink
//!                         │  │        ──exposures──────> Spectrometer
//!                         │  └──rows / matrix / summary──> DatasetSink
//!                         └──AcquisitionEvent──> observer (mpsc)
//! ```
//!
//! Failure policy:
//! - a move or capture fault ends the run as `Failed`; recorded frames are kept
//! - an unreadable position is reported as unknown and the step goes on
//! - a background of the wrong length is skipped for that frame only
//! - every terminal path closes the sink and emits `Finished` before returning
//!
//! # Example
//!
//! ```rust,ignore
//! use frog_daq::acquisition::{spawn_acquisition, AcquisitionParameters, TextFileSink};
//!
//! let params = AcquisitionParameters::new(3, 75, 100, 1000);
//! let handle = spawn_acquisition(stage, spectrometer, Box::new(TextFileSink::new("data")), params, events);
//!
//! // From a Ctrl-C handler or a stop button
//! handle.cancel_token().cancel();
//!
//! let report = handle.join().await?;
//! println!("{} after {} frames", report.state, report.frames);
//! ```

use super::dataset::{subtract_background, Dataset, SpectralFrame, WavelengthAxis};
use super::events::{AcquisitionEvent, CancelToken, EventSender};
use super::params::AcquisitionParameters;
use super::report::{RunReport, RunSummary};
use super::sink::DatasetSink;
use super::state::RunState;
use crate::error::{AppResult, DaqError};
use crate::hardware::{Direction, Spectrometer, StageLink};
use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::instrument;
use uuid::Uuid;

/// Runs delay scans against one stage and one spectrometer.
pub struct AcquisitionEngine<'a> {
    stage: &'a dyn StageLink,
    spectrometer: &'a Spectrometer,
    events: EventSender,
    cancel: CancelToken,
    state: RunState,
}

/// Bookkeeping for the run in progress.
struct RunContext {
    run_id: Uuid,
    started_at: DateTime<Local>,
    started: Instant,
    failure: Option<DaqError>,
}

impl<'a> AcquisitionEngine<'a> {
    /// Create an idle engine.
    pub fn new(stage: &'a dyn StageLink, spectrometer: &'a Spectrometer) -> Self {
        Self {
            stage,
            spectrometer,
            events: EventSender::detached(),
            cancel: CancelToken::new(),
            state: RunState::Idle,
        }
    }

    /// Send progress, log and data events to `events`.
    #[must_use]
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    /// Stop at the next step boundary once `cancel` is set.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops this engine's run.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, next: RunState) {
        if self.state.can_transition_to(next) {
            tracing::debug!(from = %self.state, to = %next, "Run state changed");
            self.state = next;
        } else {
            tracing::error!(from = %self.state, to = %next, "Ignoring illegal run state change");
        }
    }

    /// Execute one scan and persist it through `sink`.
    ///
    /// Always returns a report; failures are described by its `state` and
    /// `failure` fields. An engine runs at most once.
    #[instrument(skip_all, fields(step_size = params.step_size, range = params.range))]
    pub async fn run(
        &mut self,
        params: &AcquisitionParameters,
        sink: &mut dyn DatasetSink,
    ) -> RunReport {
        let mut ctx = RunContext {
            run_id: Uuid::new_v4(),
            started_at: Local::now(),
            started: Instant::now(),
            failure: None,
        };

        if self.state != RunState::Idle {
            let failure = DaqError::Configuration(format!(
                "engine already used (state {})",
                self.state
            ));
            self.events.error(failure.to_string());
            return RunReport {
                run_id: ctx.run_id,
                state: self.state,
                frames: 0,
                failure: Some(failure.to_string()),
                artifacts: sink.artifacts(),
                final_position: None,
                started_at: ctx.started_at,
                elapsed: ctx.started.elapsed(),
                dataset: None,
            };
        }

        self.transition(RunState::Running);
        self.events.emit(AcquisitionEvent::Started);

        let prepared = match self.prepare(params, sink).await {
            Ok(dataset) => Some(dataset),
            Err(e) => {
                self.events.error(format!("Acquisition could not start: {e}"));
                ctx.failure = Some(e);
                None
            }
        };

        let mut outcome = RunState::Failed;
        let mut dataset = None;
        if let Some(mut ds) = prepared {
            outcome = self.scan(params, sink, &mut ds, &mut ctx).await;
            dataset = Some(ds);
        }

        if let Some(ds) = &dataset {
            let wavelength_major = ds.transpose();
            if let Err(e) = sink.finish(ds, &wavelength_major).await {
                self.events
                    .error(format!("Failed to write the column-major file: {e}"));
                if ctx.failure.is_none() {
                    ctx.failure = Some(e);
                }
                outcome = RunState::Failed;
            }
        }

        let final_position = self.read_position().await;
        self.events.emit(AcquisitionEvent::Position(final_position));

        if params.return_to_home {
            match self.stage.return_home().await {
                Ok(elapsed) => self
                    .events
                    .info(format!("Returned to HOME in {:.2} s", elapsed.as_secs_f64())),
                Err(e) => self.events.warn(format!("Return to HOME failed: {e}")),
            }
        }

        self.transition(outcome);

        let frames = dataset.as_ref().map_or(0, Dataset::len);
        let failure = ctx.failure.as_ref().map(ToString::to_string);

        if dataset.is_some() {
            let summary = RunSummary {
                run_id: ctx.run_id,
                state: outcome,
                parameters: params.clone(),
                loop_count: params.loop_count(),
                dt_fs: params.dt_fs(),
                background_samples: params.background.as_ref().map(Vec::len),
                frames,
                wavelengths: dataset.as_ref().map_or(0, |d| d.axis().len()),
                failure: failure.clone(),
                final_position,
                started_at: ctx.started_at,
                finished_at: Local::now(),
                elapsed_s: ctx.started.elapsed().as_secs_f64(),
                row_major_file: file_name(sink.artifacts().row_major.as_deref()),
                column_major_file: file_name(sink.artifacts().column_major.as_deref()),
            };
            if let Err(e) = sink.write_summary(&summary).await {
                self.events.warn(format!("Run summary not written: {e}"));
            }
        }

        match outcome {
            RunState::Completed => self.events.info(format!(
                "Measurement completed: {frames} of {} steps",
                params.loop_count()
            )),
            RunState::Cancelled => self
                .events
                .warn(format!("Measurement cancelled after {frames} steps")),
            _ => self.events.error(format!(
                "Measurement failed after {frames} steps: {}",
                failure.as_deref().unwrap_or("unknown error")
            )),
        }
        self.events.emit(AcquisitionEvent::Finished(outcome));

        RunReport {
            run_id: ctx.run_id,
            state: outcome,
            frames,
            failure,
            artifacts: sink.artifacts(),
            final_position,
            started_at: ctx.started_at,
            elapsed: ctx.started.elapsed(),
            dataset,
        }
    }

    /// Validate, read the axis, open the sink and store HOME.
    async fn prepare(
        &self,
        params: &AcquisitionParameters,
        sink: &mut dyn DatasetSink,
    ) -> AppResult<Dataset> {
        params.validate()?;

        let axis = Arc::new(WavelengthAxis::new(self.spectrometer.wavelengths().await?));
        let dt = params.dt_fs();
        self.events.info(format!(
            "Measurement start: {} steps of {} pulses ({dt:.2} fs), integration {} ms, {} wavelengths",
            params.loop_count(),
            params.step_size,
            params.integration_time_ms,
            axis.len()
        ));
        if let Some(bg) = &params.background {
            if bg.len() != axis.len() {
                self.events.warn(format!(
                    "Background has {} samples but the axis has {}; it will not be subtracted",
                    bg.len(),
                    axis.len()
                ));
            }
        }

        sink.begin(&axis).await?;

        if let Some(home) = params.home_position {
            match self.stage.set_home(home).await {
                Ok(()) => self.events.info(format!("HOME position set to {home}")),
                Err(e) => self.events.warn(format!("Could not set HOME position: {e}")),
            }
        }

        Ok(Dataset::new(axis, dt))
    }

    /// The per-step loop. Returns the terminal state it ended in.
    async fn scan(
        &self,
        params: &AcquisitionParameters,
        sink: &mut dyn DatasetSink,
        dataset: &mut Dataset,
        ctx: &mut RunContext,
    ) -> RunState {
        let loop_count = params.loop_count();
        let dt = dataset.dt_fs();

        for i in 0..loop_count {
            if let Err(e) = self.step(i, dt, params, sink, dataset).await {
                self.events.error(format!("Step {i} aborted the measurement: {e}"));
                ctx.failure = Some(e);
                return RunState::Failed;
            }

            self.events
                .emit(AcquisitionEvent::Progress((i + 1) as f64 / loop_count as f64));
            self.events.emit(AcquisitionEvent::DataUpdated(dataset.clone()));

            if i + 1 < loop_count {
                if let Err(stop) = self.cancel.check() {
                    self.events.warn(format!("{stop} after step {i}"));
                    return RunState::Cancelled;
                }
            }
        }
        RunState::Completed
    }

    /// One step; an error here is fatal to the run.
    async fn step(
        &self,
        i: usize,
        dt: f64,
        params: &AcquisitionParameters,
        sink: &mut dyn DatasetSink,
        dataset: &mut Dataset,
    ) -> AppResult<()> {
        if i > 0 {
            let elapsed = self
                .stage
                .move_and_wait(params.speed, params.step_size, Direction::Forward)
                .await?;
            tracing::debug!(step = i, ?elapsed, "Stage move done");
        }

        let position = self.read_position().await;
        self.events.emit(AcquisitionEvent::Position(position));

        let delay = i as f64 * dt;
        let capture_start = Local::now();
        self.events.info(format!(
            "Capture start: index={i}, delay={delay:.2} fs, {}",
            capture_start.format("%H:%M:%S%.3f")
        ));

        self.spectrometer
            .set_integration_time(params.integration_time_ms)
            .await?;
        let mut intensities = self.spectrometer.capture_intensities().await?;
        if intensities.len() != dataset.axis().len() {
            return Err(DaqError::CommFailure(format!(
                "{} returned {} samples for a {}-wavelength axis",
                self.spectrometer.model(),
                intensities.len(),
                dataset.axis().len()
            )));
        }

        if let Some(bg) = &params.background {
            match subtract_background(&mut intensities, bg) {
                Ok(()) => tracing::debug!(step = i, "Background subtracted"),
                Err(e) if !e.is_fatal_to_run() => self
                    .events
                    .warn(format!("Background not subtracted at step {i}: {e}")),
                Err(e) => return Err(e),
            }
        }

        let captured_at = Local::now();
        let frame = Arc::new(SpectralFrame::new(i, delay, intensities, captured_at));
        let took = (captured_at - capture_start).num_milliseconds() as f64 / 1000.0;
        self.events.info(format!(
            "Capture done: index={i}, max_intensity={:.2}, {} ({took:.2} s)",
            frame.max_intensity,
            captured_at.format("%H:%M:%S%.3f")
        ));
        tracing::debug!(
            step = i,
            delay_fs = delay,
            position = ?position,
            max_intensity = frame.max_intensity,
            "Frame recorded"
        );

        dataset.push(Arc::clone(&frame))?;
        sink.append(&frame).await
    }

    /// Best-effort position read; any error becomes "unknown".
    ///
    /// Even a link fault is not fatal here: the next move reports it.
    async fn read_position(&self) -> Option<i64> {
        match self.stage.position().await {
            Ok(position) => {
                tracing::debug!(position, "Stage position");
                Some(position)
            }
            Err(e) => {
                if e.is_fatal_to_run() {
                    tracing::debug!(error = %e, "Link fault during position read");
                }
                self.events.warn(format!("Stage position unknown: {e}"));
                None
            }
        }
    }
}

fn file_name(path: Option<&std::path::Path>) -> Option<String> {
    path.and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
}

/// A scan running on its own task.
pub struct AcquisitionHandle {
    task: JoinHandle<RunReport>,
    cancel: CancelToken,
}

impl AcquisitionHandle {
    /// Token that stops the scan at the next step boundary.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Request a stop at the next step boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the worker has returned.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the report.
    ///
    /// # Errors
    /// [`DaqError::CommFailure`] if the worker task panicked or was aborted.
    pub async fn join(self) -> AppResult<RunReport> {
        self.task
            .await
            .map_err(|e| DaqError::CommFailure(format!("acquisition worker ended abnormally: {e}")))
    }
}

/// Start a scan on a dedicated tokio task.
///
/// The stage and spectrometer stay owned by the caller; the task keeps a
/// reference to each until it returns.
pub fn spawn_acquisition(
    stage: Arc<dyn StageLink>,
    spectrometer: Arc<Spectrometer>,
    mut sink: Box<dyn DatasetSink>,
    params: AcquisitionParameters,
    events: EventSender,
) -> AcquisitionHandle {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        let mut engine = AcquisitionEngine::new(stage.as_ref(), spectrometer.as_ref())
            .with_events(events)
            .with_cancel_token(token);
        engine.run(&params, sink.as_mut()).await
    });
    AcquisitionHandle { task, cancel }
}
