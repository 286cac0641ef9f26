//! Observer channel and cooperative cancellation.
//!
//! The engine reports to whoever started it through an unbounded, ordered
//! channel of [`AcquisitionEvent`]s. A front end that stops listening never
//! disturbs a run: send errors are discarded.

use super::dataset::Dataset;
use super::state::RunState;
use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Severity of a user-facing log event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogLevel {
    /// Normal progress
    Info,
    /// Degraded but continuing
    Warn,
    /// The run failed or a step aborted it
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Notification from a running acquisition.
#[derive(Debug, Clone)]
pub enum AcquisitionEvent {
    /// The run left `Idle`.
    Started,
    /// Human-readable progress message.
    Log {
        /// Severity shown to the user.
        level: LogLevel,
        /// Text written to the run log.
        message: String,
    },
    /// Stage position after a move; `None` when it could not be read.
    Position(Option<i64>),
    /// Fraction of steps done, in `(0, 1]`, never decreasing.
    Progress(f64),
    /// Snapshot of every frame recorded so far.
    DataUpdated(Dataset),
    /// The run reached a terminal state and its files are closed.
    Finished(RunState),
}

/// Receiving half handed to the observer.
pub type EventReceiver = mpsc::UnboundedReceiver<AcquisitionEvent>;

/// Create a connected sender/receiver pair.
pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx: Some(tx) }, rx)
}

/// Sending half used by the engine.
#[derive(Debug, Clone, Default)]
pub struct EventSender {
    tx: Option<mpsc::UnboundedSender<AcquisitionEvent>>,
}

impl EventSender {
    /// A sender with nobody listening.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    /// Deliver an event if someone is listening.
    pub fn emit(&self, event: AcquisitionEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    /// Trace `message` and forward it to the observer.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Warn => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
        }
        self.emit(AcquisitionEvent::Log { level, message });
    }

    /// Shorthand for an info-level [`EventSender::log`].
    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    /// Shorthand for a warn-level [`EventSender::log`].
    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    /// Shorthand for an error-level [`EventSender::log`].
    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }
}

/// Shared stop flag, polled by the engine after each step.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop at the next step boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(DaqError::Cancelled)` once a stop was requested.
    pub fn check(&self) -> AppResult<()> {
        if self.is_cancelled() {
            Err(DaqError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());

        let stop = token.check().unwrap_err();
        assert!(matches!(stop, DaqError::Cancelled));
        assert!(!stop.is_fatal_to_run());
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (tx, mut rx) = channel();
        tx.emit(AcquisitionEvent::Started);
        tx.emit(AcquisitionEvent::Progress(0.5));
        tx.emit(AcquisitionEvent::Finished(RunState::Completed));

        assert!(matches!(rx.recv().await, Some(AcquisitionEvent::Started)));
        assert!(matches!(rx.recv().await, Some(AcquisitionEvent::Progress(p)) if p == 0.5));
        assert!(matches!(
            rx.recv().await,
            Some(AcquisitionEvent::Finished(RunState::Completed))
        ));
    }

    #[test]
    #[traced_test]
    fn test_log_survives_dropped_receiver() {
        let (tx, rx) = channel();
        drop(rx);
        tx.warn("stage position unknown");
        EventSender::detached().info("nobody listening");
        assert!(logs_contain("stage position unknown"));
        assert!(logs_contain("nobody listening"));
    }
}
