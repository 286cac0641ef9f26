//! Line-oriented serial link for ASCII command/response controllers.
//!
//! [`LineLink`] frames outgoing commands with a terminator and reads
//! newline-terminated replies with a per-line deadline. Two outcomes the
//! DS102 relies on are kept apart:
//! - no reply before the deadline yields an empty string (the caller decides
//!   whether that is a parse failure)
//! - EOF or an I/O error is [`DaqError::CommFailure`]
//!
//! Any `AsyncRead + AsyncWrite` can back the link, so tests pass a
//! [`tokio::io::DuplexStream`] or a [`crate::hardware::mock_serial::MockSerialPort`].

use crate::error::{AppResult, DaqError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Byte stream usable as a serial port.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Port settings. Framing is fixed at 8N1 without flow control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// Device path ("/dev/ttyUSB0", "COM3")
    pub path: String,
    /// Line speed; the DS102 runs at 9600.
    pub baud_rate: u32,
}

impl SerialSettings {
    /// Settings for `path` at `baud_rate`.
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }

    /// Open the port on the blocking pool.
    ///
    /// # Errors
    /// [`DaqError::CommFailure`] if the port cannot be opened.
    #[cfg(feature = "serial")]
    pub async fn open(&self) -> AppResult<DynSerial> {
        use tokio_serial::SerialPortBuilderExt;

        let settings = self.clone();
        let stream = tokio::task::spawn_blocking(move || {
            tokio_serial::new(&settings.path, settings.baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
                .map_err(|e| {
                    DaqError::CommFailure(format!("Failed to open {}: {e}", settings.path))
                })
        })
        .await
        .map_err(|e| DaqError::CommFailure(format!("serial open task failed: {e}")))??;
        Ok(Box::new(stream))
    }
}

/// A buffered port speaking terminated command lines.
pub struct LineLink {
    port: BufReader<DynSerial>,
    terminator: &'static str,
    read_timeout: Duration,
    label: &'static str,
}

impl std::fmt::Debug for LineLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineLink")
            .field("label", &self.label)
            .field("terminator", &self.terminator)
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

impl LineLink {
    /// `label` names the device in error messages.
    pub fn new(
        port: DynSerial,
        terminator: &'static str,
        read_timeout: Duration,
        label: &'static str,
    ) -> Self {
        Self {
            port: BufReader::new(port),
            terminator,
            read_timeout,
            label,
        }
    }

    /// Write one command followed by the terminator and flush.
    pub async fn send(&mut self, command: &str) -> AppResult<()> {
        let line = format!("{command}{}", self.terminator);
        let stream = self.port.get_mut();
        stream.write_all(line.as_bytes()).await.map_err(|e| {
            DaqError::CommFailure(format!("{} write '{command}' failed: {e}", self.label))
        })?;
        stream
            .flush()
            .await
            .map_err(|e| DaqError::CommFailure(format!("{} flush failed: {e}", self.label)))
    }

    /// Read one trimmed reply line; empty when nothing arrived in time.
    pub async fn receive(&mut self, command: &str) -> AppResult<String> {
        self.receive_within(command, self.read_timeout).await
    }

    /// [`LineLink::receive`] with a caller-chosen deadline.
    pub async fn receive_within(&mut self, command: &str, limit: Duration) -> AppResult<String> {
        let mut response = String::new();
        match tokio::time::timeout(limit, self.port.read_line(&mut response)).await {
            Err(_) => {
                tracing::debug!(device = self.label, command, ?limit, "Read timed out");
                Ok(String::new())
            }
            Ok(Ok(0)) => Err(DaqError::CommFailure(format!(
                "{} closed the connection while answering '{command}'",
                self.label
            ))),
            Ok(Ok(_)) => Ok(response.trim().to_string()),
            Ok(Err(e)) => Err(DaqError::CommFailure(format!(
                "{} read after '{command}' failed: {e}",
                self.label
            ))),
        }
    }

    /// Send a command and read its reply.
    ///
    /// Whatever is already waiting on the line belongs to an earlier command
    /// whose read timed out, and is discarded before sending.
    pub async fn query(&mut self, command: &str) -> AppResult<String> {
        let limit = self.read_timeout;
        self.query_within(command, limit).await
    }

    /// [`LineLink::query`] with a caller-chosen reply deadline.
    pub async fn query_within(&mut self, command: &str, limit: Duration) -> AppResult<String> {
        let stale = self.drain(Duration::ZERO).await;
        if stale > 0 {
            tracing::debug!(device = self.label, command, stale, "Dropped late reply bytes");
        }
        self.send(command).await?;
        self.receive_within(command, limit).await
    }

    /// Discard bytes left over from an earlier session or a timed-out read.
    ///
    /// Stops at the first quiet period of `quiet` and returns the byte count.
    /// A zero `quiet` takes only what has already arrived.
    pub async fn drain(&mut self, quiet: Duration) -> usize {
        let mut scratch = [0u8; 256];
        let mut total = self.port.buffer().len();
        self.port.consume(total);

        while let Ok(Ok(n)) = tokio::time::timeout(quiet, self.port.read(&mut scratch)).await {
            if n == 0 {
                break;
            }
            total += n;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(device: tokio::io::DuplexStream, timeout_ms: u64) -> LineLink {
        LineLink::new(Box::new(device), "\r", Duration::from_millis(timeout_ms), "TEST")
    }

    #[tokio::test]
    async fn query_frames_command_and_trims_reply() {
        let (host, device) = tokio::io::duplex(64);
        let mut host = BufReader::new(host);
        let mut link = link(device, 500);

        let controller = tokio::spawn(async move {
            let mut sent = Vec::new();
            host.read_until(b'\r', &mut sent).await.unwrap();
            host.get_mut().write_all(b" 1500 \r\n").await.unwrap();
            (host, sent)
        });

        assert_eq!(link.query("AXIs1:POS?").await.unwrap(), "1500");
        let (_host, sent) = controller.await.unwrap();
        assert_eq!(sent, b"AXIs1:POS?\r");
    }

    #[tokio::test]
    async fn query_drops_reply_that_arrived_too_late() {
        let (mut host, device) = tokio::io::duplex(64);
        let mut link = link(device, 500);

        // Answer to an earlier query that had already given up
        host.write_all(b"150\n").await.unwrap();
        let task = tokio::spawn(async move { link.query("AXIs1:POS?").await });

        let mut host = BufReader::new(host);
        let mut sent = Vec::new();
        host.read_until(b'\r', &mut sent).await.unwrap();
        host.get_mut().write_all(b"-1500\n").await.unwrap();

        assert_eq!(task.await.unwrap().unwrap(), "-1500");
    }

    #[tokio::test(start_paused = true)]
    async fn receive_within_uses_its_own_deadline() {
        let (_host, device) = tokio::io::duplex(64);
        let mut link = link(device, 1000);

        let start = tokio::time::Instant::now();
        assert_eq!(
            link.receive_within("AXIs1:MOTION?", Duration::from_millis(100))
                .await
                .unwrap(),
            ""
        );
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(100) && waited < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn silence_is_an_empty_reply() {
        let (_host, device) = tokio::io::duplex(64);
        let mut link = link(device, 1000);
        assert_eq!(link.receive("AXIs1:MOTION?").await.unwrap(), "");
    }

    #[tokio::test]
    async fn closed_peer_is_comm_failure() {
        let (host, device) = tokio::io::duplex(64);
        drop(host);
        let mut link = link(device, 500);
        assert!(matches!(
            link.receive("AXIs1:ORG?").await,
            Err(DaqError::CommFailure(_))
        ));
    }

    #[tokio::test]
    async fn drain_discards_stale_bytes() {
        let (mut host, device) = tokio::io::duplex(64);
        let mut link = link(device, 500);

        host.write_all(b"stale data 12345").await.unwrap();
        let discarded = link.drain(Duration::from_millis(20)).await;
        assert_eq!(discarded, 16);

        host.write_all(b"0\n").await.unwrap();
        assert_eq!(link.receive("AXIs1:MOTION?").await.unwrap(), "0");
    }
}
