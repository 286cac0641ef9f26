//! CLI Entry Point for frog-daq
//!
//! Provides command-line access to:
//! - Full delay scans with incremental row-major and final column-major output
//! - Background capture and single test captures
//! - Manual stage control (relative move, HOME, origin, initialisation)
//!
//! Every subcommand accepts `--config <file>` and `--simulate` (built-in
//! simulated stage and spectrometer instead of hardware).
//!
//! # Usage
//!
//! ```bash
//! frog-daq --simulate scan --step 3 --range 75 --integration-ms 100
//! frog-daq background --integration-ms 100
//! frog-daq scan --background data/20250101_120000_BG.txt --home 0 --return-home
//! frog-daq move -- -40
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use frog_daq::acquisition::{
    self, events, sink::STAMP_FORMAT, spawn_acquisition, AcquisitionEvent, LogLevel, RunState,
    TextFileSink,
};
use frog_daq::config::{FrogConfig, DEFAULT_CONFIG_PATH};
use frog_daq::hardware::mock::{MockSpectrometerDevice, MockStage, SharedPosition};
use frog_daq::hardware::{Direction, Spectrometer, SpectrometerDevice, StageLink};
use frog_daq::logging::{self, RunLogFile};
use frog_daq::timing::TokioClock;
use std::path::PathBuf;
use std::sync::atomic::AtomicI64;
use std::sync::Arc;
use tokio::signal;

/// Speed and travel of the initialisation sweep.
const INIT_SWEEP_SPEED: u32 = 5000;
const INIT_SWEEP_PULSES: u32 = 50_000;

#[derive(Parser)]
#[command(name = "frog-daq")]
#[command(about = "FROG delay-scan acquisition (DS102 stage + spectrometer)", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use the simulated stage and spectrometer
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full delay scan
    Scan {
        /// Pulses per step
        #[arg(long)]
        step: Option<u32>,
        /// Scan range in pulses
        #[arg(long)]
        range: Option<u32>,
        /// Integration time (ms)
        #[arg(long)]
        integration_ms: Option<u32>,
        /// Stage speed
        #[arg(long)]
        speed: Option<u32>,
        /// Background spectrum file to subtract
        #[arg(long)]
        background: Option<PathBuf>,
        /// Store this position as HOME before scanning
        #[arg(long, allow_hyphen_values = true)]
        home: Option<i64>,
        /// Drive back to HOME after the scan
        #[arg(long)]
        return_home: bool,
    },

    /// Capture a background spectrum and save it
    Background {
        /// Integration time (ms)
        #[arg(long)]
        integration_ms: Option<u32>,
        /// Output file (default: <output_dir>/<stamp>_BG.txt)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Capture one test spectrum and report its peak
    Snapshot {
        /// Integration time (ms)
        #[arg(long)]
        integration_ms: Option<u32>,
        /// Background spectrum file to subtract
        #[arg(long)]
        background: Option<PathBuf>,
        /// Save the spectrum to this file
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Move the stage by a signed number of pulses
    Move {
        /// Pulses; negative moves backward
        #[arg(allow_hyphen_values = true)]
        pulses: i64,
        /// Stage speed
        #[arg(long)]
        speed: Option<u32>,
    },

    /// Show current, HOME and origin positions
    Position,

    /// Store a HOME position (default: the current position)
    SetHome {
        #[arg(allow_hyphen_values = true)]
        value: Option<i64>,
    },

    /// Declare the current position to be absolute zero
    Zero,

    /// Initialise the controller and sweep the full travel
    Init {
        /// Only send the setup commands
        #[arg(long)]
        no_sweep: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = FrogConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    config.validate().context("Invalid configuration")?;
    logging::init_from_config(&config)?;

    let simulate = cli.simulate || config.stage.backend == "simulated";
    tracing::info!(app = %config.application.name, simulate, "Starting");

    match cli.command {
        Commands::Scan {
            step,
            range,
            integration_ms,
            speed,
            background,
            home,
            return_home,
        } => {
            let mut params = config.acquisition.parameters();
            if let Some(step) = step {
                params.step_size = step;
            }
            if let Some(range) = range {
                params.range = range;
            }
            if let Some(ms) = integration_ms {
                params.integration_time_ms = ms;
            }
            if let Some(speed) = speed {
                params.speed = speed;
            }
            if let Some(path) = background {
                let bg = acquisition::load_background(&path)
                    .with_context(|| format!("Failed to load background {}", path.display()))?;
                params = params.with_background(bg.intensities);
            }
            if let Some(home) = home {
                params = params.with_home_position(home);
            }
            params.return_to_home |= return_home;
            params.validate()?;
            config.check_scan_backends(cli.simulate)?;
            run_scan(&config, simulate, params).await
        }
        Commands::Background {
            integration_ms,
            output,
        } => {
            let spectrometer = open_spectrometer(&config, None);
            let ms = integration_ms.unwrap_or(config.acquisition.integration_time_ms);
            let spectrum = acquisition::capture_background(&spectrometer, ms).await?;
            let path = output.unwrap_or_else(|| {
                config.storage.output_dir.join(format!(
                    "{}_BG.txt",
                    Local::now().format(STAMP_FORMAT)
                ))
            });
            acquisition::save_background(&path, &spectrum)?;
            println!(
                "Background saved to {} ({} samples, max {:.2})",
                path.display(),
                spectrum.intensities.len(),
                spectrum.max_intensity()
            );
            Ok(())
        }
        Commands::Snapshot {
            integration_ms,
            background,
            save,
        } => {
            let (stage, position) = open_stage(&config, simulate).await?;
            let spectrometer = open_spectrometer(&config, position);
            let bg = background
                .map(|p| acquisition::load_background(&p))
                .transpose()?;
            let ms = integration_ms.unwrap_or(config.acquisition.integration_time_ms);
            let snapshot = acquisition::capture_snapshot(
                &spectrometer,
                ms,
                bg.as_ref().map(|b| b.intensities.as_slice()),
            )
            .await?;
            let spectrum = &snapshot.spectrum;
            println!(
                "Test capture: max intensity {:.1} at {} (background {})",
                spectrum.max_intensity(),
                spectrum
                    .peak_wavelength()
                    .map_or("n/a".to_string(), |wl| format!("{wl:.2} nm")),
                if snapshot.background_subtracted { "subtracted" } else { "not subtracted" }
            );
            print_position(stage.as_ref()).await;
            if let Some(path) = save {
                acquisition::save_background(&path, spectrum)?;
                println!("Spectrum saved to {}", path.display());
            }
            Ok(())
        }
        Commands::Move { pulses, speed } => {
            let (stage, _) = open_stage(&config, simulate).await?;
            if pulses == 0 {
                println!("Pulse count is 0; nothing to do");
                return Ok(());
            }
            let (direction, magnitude) = Direction::from_signed(pulses);
            let speed = speed.unwrap_or(config.acquisition.speed);
            let elapsed = stage.move_and_wait(speed, magnitude, direction).await?;
            println!(
                "Moved {magnitude} pulses {direction} in {:.2} s",
                elapsed.as_secs_f64()
            );
            print_position(stage.as_ref()).await;
            Ok(())
        }
        Commands::Position => {
            let (stage, _) = open_stage(&config, simulate).await?;
            print_position(stage.as_ref()).await;
            println!("HOME:    {}", fmt_position(stage.home().await.ok()));
            println!("Origin:  {}", fmt_position(stage.origin().await.ok()));
            Ok(())
        }
        Commands::SetHome { value } => {
            let (stage, _) = open_stage(&config, simulate).await?;
            let value = match value {
                Some(v) => v,
                None => stage
                    .position()
                    .await
                    .context("Current position unknown; pass an explicit value")?,
            };
            stage.set_home(value).await?;
            println!("HOME position set to {value}");
            Ok(())
        }
        Commands::Zero => {
            let (stage, _) = open_stage(&config, simulate).await?;
            stage.set_absolute_position(0).await?;
            println!("Current position set as origin");
            print_position(stage.as_ref()).await;
            Ok(())
        }
        Commands::Init { no_sweep } => {
            let (stage, _) = open_stage(&config, simulate).await?;
            stage.initialize().await?;
            println!("Driver division set to full step, origin search type 3");
            if !no_sweep {
                for (label, direction) in [("full front", Direction::Forward), ("full back", Direction::Backward)] {
                    println!("Moving stage to {label}...");
                    stage
                        .move_and_wait(INIT_SWEEP_SPEED, INIT_SWEEP_PULSES, direction)
                        .await?;
                    print_position(stage.as_ref()).await;
                }
            }
            Ok(())
        }
    }
}

async fn run_scan(
    config: &FrogConfig,
    simulate: bool,
    params: acquisition::AcquisitionParameters,
) -> Result<()> {
    let (stage, position) = open_stage(config, simulate).await?;
    let spectrometer = Arc::new(open_spectrometer(config, position));

    let stamp = Local::now().format(STAMP_FORMAT).to_string();
    let sink = TextFileSink::with_stamp(&config.storage.output_dir, stamp.clone());
    let mut run_log = RunLogFile::open(&config.storage.log_dir, &stamp)?;
    tracing::info!(log = %run_log.path().display(), "Run log opened");

    let loop_count = params.loop_count();
    let (tx, mut rx) = events::channel();
    let handle = spawn_acquisition(stage, spectrometer, Box::new(sink), params, tx);

    let token = handle.cancel_token();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            eprintln!("Stop requested; finishing the current step...");
            token.cancel();
        }
    });

    while let Some(event) = rx.recv().await {
        match event {
            AcquisitionEvent::Log { level, message } => {
                let line = match level {
                    LogLevel::Info => message,
                    _ => format!("{level}: {message}"),
                };
                if let Err(e) = run_log.write_line(&line) {
                    tracing::warn!("Run log write failed: {e}");
                }
            }
            AcquisitionEvent::Progress(p) => {
                println!("Progress: {:5.1}%", p * 100.0);
            }
            AcquisitionEvent::Position(p) => {
                tracing::debug!("Position: {}", fmt_position(p));
            }
            AcquisitionEvent::DataUpdated(dataset) => {
                if let Some(frame) = dataset.frames().last() {
                    println!(
                        "  step {}/{loop_count}  delay {:8.2} fs  max {:10.2}",
                        frame.step_index + 1,
                        frame.delay_fs,
                        frame.max_intensity
                    );
                }
            }
            AcquisitionEvent::Started | AcquisitionEvent::Finished(_) => {}
        }
    }

    let report = handle.join().await?;
    println!("Run {}: {} ({} frames)", report.run_id, report.state, report.frames);
    if let Some(path) = &report.artifacts.row_major {
        println!("  row-major:    {}", path.display());
    }
    if let Some(path) = &report.artifacts.column_major {
        println!("  column-major: {}", path.display());
    }
    if let Some(path) = &report.artifacts.summary {
        println!("  summary:      {}", path.display());
    }
    println!("  final position: {}", fmt_position(report.final_position));

    match report.state {
        RunState::Failed => Err(anyhow!(
            "Measurement failed: {}",
            report.failure.unwrap_or_else(|| "unknown error".to_string())
        )),
        _ => Ok(()),
    }
}

/// Open the stage; in simulation also return the position the spectrometer should follow.
async fn open_stage(
    config: &FrogConfig,
    simulate: bool,
) -> Result<(Arc<dyn StageLink>, Option<SharedPosition>)> {
    if simulate {
        let stage = MockStage::new(Arc::new(TokioClock));
        let position = stage.shared_position();
        return Ok((Arc::new(stage), Some(position)));
    }
    open_ds102(config).await
}

#[cfg(feature = "serial")]
async fn open_ds102(config: &FrogConfig) -> Result<(Arc<dyn StageLink>, Option<SharedPosition>)> {
    let stage = frog_daq::hardware::Ds102Stage::open(
        &config.stage.port,
        config.stage.baud_rate,
        config.stage.options(),
    )
    .await
    .with_context(|| format!("DS102 could not be opened on {}", config.stage.port))?;
    Ok((Arc::new(stage), None))
}

#[cfg(not(feature = "serial"))]
async fn open_ds102(_config: &FrogConfig) -> Result<(Arc<dyn StageLink>, Option<SharedPosition>)> {
    anyhow::bail!("built without the `serial` feature; use --simulate")
}

/// Build the spectrometer. Only the simulated device is built in.
fn open_spectrometer(config: &FrogConfig, position: Option<SharedPosition>) -> Spectrometer {
    let position = position.unwrap_or_else(|| {
        tracing::warn!("Simulated spectrometer is not coupled to the stage position");
        Arc::new(AtomicI64::new(0))
    });
    let device: Arc<dyn SpectrometerDevice> = Arc::new(MockSpectrometerDevice::with_pixels(
        position,
        config.spectrometer.pixels,
    ));
    tracing::info!(model = device.model(), "Spectrometer ready");
    Spectrometer::new(device, config.spectrometer.options())
}

async fn print_position(stage: &dyn StageLink) {
    println!("Position: {}", fmt_position(stage.position().await.ok()));
}

fn fmt_position(position: Option<i64>) -> String {
    position.map_or_else(|| "unknown".to_string(), |p| p.to_string())
}
