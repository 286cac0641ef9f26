//! Sigma Koki DS102 delay-stage controller driver.
//!
//! Protocol Overview:
//! - Format: ASCII command/response over RS-232
//! - Baud: 9600, 8N1, no flow control, 1 s read timeout
//! - Commands: `AXIs{n}:{COMMAND} {value}`, terminated by `\r`
//! - Responses: plain decimal integers terminated by a newline
//! - Example: `AXIs1:PULS 3:GO 0` (axis 1, move 3 pulses forward)
//!
//! Set commands produce no response. Queries produce exactly one line. A read
//! that times out is treated as an empty response, so a stage that stops
//! answering shows up as a parse failure on position queries and as "still
//! moving" on motion polls. Motion polls wait at most one poll interval for
//! their answer, which keeps a silent controller within the poll budget. A
//! reply that arrives after its read gave up is dropped before the next
//! command goes out. EOF or a write error is a communication failure.
//!
//! # Example Usage
//!
//! ```ignore
//! use frog_daq::hardware::stage::{Direction, Ds102Stage, StageLink, StageOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let stage = Ds102Stage::open("/dev/ttyUSB0", 9600, StageOptions::default()).await?;
//!
//!     let elapsed = stage.move_and_wait(1000, 3, Direction::Forward).await?;
//!     println!("Moved in {:?}, now at {} pulses", elapsed, stage.position().await?);
//!
//!     Ok(())
//! }
//! ```

use crate::error::{AppResult, DaqError};
#[cfg(feature = "serial")]
use crate::hardware::serial::SerialSettings;
use crate::hardware::serial::{DynSerial, LineLink};
use crate::timing::{Clock, PollPolicy, TokioClock};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::instrument;

/// Command terminator.
const TERMINATOR: &str = "\r";

/// Motion-status response meaning "stopped".
const IDLE_STATUS: &str = "0";

/// Travel direction of a relative pulse move.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Increasing pulse count (`GO 0`).
    Forward,
    /// Decreasing pulse count (`GO 1`).
    Backward,
}

impl Direction {
    /// Code used on the wire by the `PULS ..:GO` command.
    pub fn code(self) -> u8 {
        match self {
            Direction::Forward => 0,
            Direction::Backward => 1,
        }
    }

    /// Direction and magnitude of a signed pulse count.
    pub fn from_signed(pulses: i64) -> (Self, u32) {
        let magnitude = u32::try_from(pulses.unsigned_abs()).unwrap_or(u32::MAX);
        if pulses < 0 {
            (Direction::Backward, magnitude)
        } else {
            (Direction::Forward, magnitude)
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Backward => write!(f, "backward"),
        }
    }
}

/// Command/response link to a delay stage.
///
/// Implementations serialise their own commands; callers must still not
/// pipeline moves, since every call completes before the next is issued.
#[async_trait]
pub trait StageLink: Send + Sync {
    /// Set the speed, start a relative pulse move and poll until stopped.
    ///
    /// Returns the time the move took, [`DaqError::Timeout`] when the poll
    /// budget runs out, or [`DaqError::CommFailure`] on link I/O faults.
    async fn move_and_wait(
        &self,
        speed: u32,
        pulses: u32,
        direction: Direction,
    ) -> AppResult<Duration>;

    /// Current absolute position in pulses.
    async fn position(&self) -> AppResult<i64>;

    /// Redefine the current position as `value`.
    async fn set_absolute_position(&self, value: i64) -> AppResult<()>;

    /// Store `value` as the controller's HOME point.
    async fn set_home(&self, value: i64) -> AppResult<()>;

    /// Stored HOME point.
    async fn home(&self) -> AppResult<i64>;

    /// Mechanical origin reported by the controller.
    async fn origin(&self) -> AppResult<i64>;

    /// Drive back to the HOME point and wait until stopped.
    async fn return_home(&self) -> AppResult<Duration>;

    /// One-time controller setup (driver division, origin search type).
    async fn initialize(&self) -> AppResult<()>;
}

/// Timing and addressing of a [`Ds102Stage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageOptions {
    /// Controller axis number used in the `AXIs{n}` prefix.
    pub axis: u8,
    /// Longest wait for one response line.
    pub read_timeout: Duration,
    /// Motion-status polling bound.
    pub poll: PollPolicy,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            axis: 1,
            read_timeout: Duration::from_secs(1),
            poll: PollPolicy::default(),
        }
    }
}

/// Driver for the DS102 controller.
pub struct Ds102Stage {
    /// One command sequence at a time holds the link
    link: Mutex<LineLink>,
    options: StageOptions,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Ds102Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ds102Stage")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Ds102Stage {
    /// Wrap an already-open port.
    pub fn from_port(port: DynSerial, options: StageOptions) -> Self {
        Self {
            link: Mutex::new(LineLink::new(port, TERMINATOR, options.read_timeout, "DS102")),
            options,
            clock: Arc::new(TokioClock),
        }
    }

    /// Replace the clock used between motion polls.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Open the controller on a serial port.
    ///
    /// Stale bytes left in the receive buffer from a previous session are
    /// discarded before the driver is returned.
    ///
    /// # Errors
    /// Returns [`DaqError::CommFailure`] if the port cannot be opened.
    #[cfg(feature = "serial")]
    pub async fn open(port_path: &str, baud_rate: u32, options: StageOptions) -> AppResult<Self> {
        let port = SerialSettings::new(port_path, baud_rate).open().await?;
        let stage = Self::from_port(port, options);
        let discarded = stage.link.lock().await.drain(Duration::from_millis(50)).await;
        if discarded > 0 {
            tracing::debug!(discarded, "Discarded stale DS102 bytes");
        }
        tracing::info!(port = port_path, baud_rate, axis = options.axis, "DS102 link open");
        Ok(stage)
    }

    /// Driver options in effect.
    pub fn options(&self) -> &StageOptions {
        &self.options
    }

    fn axis_command(&self, body: &str) -> String {
        format!("AXIs{}:{}", self.options.axis, body)
    }

    async fn query_int(&self, command: &str) -> AppResult<i64> {
        let response = self.link.lock().await.query(command).await?;
        response.parse::<i64>().map_err(|_| DaqError::ParseFailure {
            command: command.to_string(),
            response,
        })
    }

    /// Poll the motion register until it reads idle, holding the port.
    async fn wait_stopped(&self, link: &mut LineLink) -> AppResult<Duration> {
        let start = self.clock.now();
        let command = self.axis_command("MOTION?");
        let policy = self.options.poll;

        // A status read never waits longer than one poll interval
        let status_deadline = self.options.read_timeout.min(policy.interval);

        for attempt in 1..=policy.max_attempts {
            let status = link.query_within(&command, status_deadline).await?;
            if status == IDLE_STATUS {
                let elapsed = self.clock.now().saturating_duration_since(start);
                tracing::debug!(attempt, ?elapsed, "Stage stopped");
                return Ok(elapsed);
            }
            if status.is_empty() {
                // The unanswered read already spent the interval
                tracing::trace!(attempt, "No motion status");
                continue;
            }
            tracing::trace!(attempt, status = %status, "Stage still moving");
            self.clock.sleep(policy.interval).await;
        }

        let elapsed = self.clock.now().saturating_duration_since(start);
        tracing::warn!(attempts = policy.max_attempts, ?elapsed, "Stage never reported stopped");
        Err(DaqError::Timeout {
            attempts: policy.max_attempts,
            elapsed,
        })
    }
}

#[async_trait]
impl StageLink for Ds102Stage {
    #[instrument(skip(self), fields(axis = self.options.axis), err)]
    async fn move_and_wait(
        &self,
        speed: u32,
        pulses: u32,
        direction: Direction,
    ) -> AppResult<Duration> {
        let mut link = self.link.lock().await;
        link.send(&self.axis_command(&format!("Fspeed0 {speed}"))).await?;
        link.send(&self.axis_command(&format!("PULS {pulses}:GO {}", direction.code())))
            .await?;
        self.wait_stopped(&mut link).await
    }

    #[instrument(skip(self), fields(axis = self.options.axis), err)]
    async fn position(&self) -> AppResult<i64> {
        self.query_int(&self.axis_command("POS?")).await
    }

    #[instrument(skip(self), fields(axis = self.options.axis), err)]
    async fn set_absolute_position(&self, value: i64) -> AppResult<()> {
        self.link
            .lock()
            .await
            .send(&self.axis_command(&format!("POS {value}")))
            .await
    }

    #[instrument(skip(self), fields(axis = self.options.axis), err)]
    async fn set_home(&self, value: i64) -> AppResult<()> {
        self.link
            .lock()
            .await
            .send(&self.axis_command(&format!("HOMEP {value}")))
            .await
    }

    #[instrument(skip(self), fields(axis = self.options.axis), err)]
    async fn home(&self) -> AppResult<i64> {
        self.query_int(&self.axis_command("HOMEPosition?")).await
    }

    #[instrument(skip(self), fields(axis = self.options.axis), err)]
    async fn origin(&self) -> AppResult<i64> {
        self.query_int(&self.axis_command("ORG?")).await
    }

    #[instrument(skip(self), fields(axis = self.options.axis), err)]
    async fn return_home(&self) -> AppResult<Duration> {
        let mut link = self.link.lock().await;
        link.send(&self.axis_command("GO 3")).await?;
        self.wait_stopped(&mut link).await
    }

    #[instrument(skip(self), fields(axis = self.options.axis), err)]
    async fn initialize(&self) -> AppResult<()> {
        let mut link = self.link.lock().await;
        // Full-step driver division, origin search type 3
        link.send(&self.axis_command("DRiverDIVision 0")).await?;
        link.send("MEMorySWitch0 3").await
    }
}
