//! Scripted controller on the far end of an in-memory serial line.
//!
//! [`new`] returns the driver's end of a [`tokio::io::duplex`] pipe together
//! with a [`ScriptedController`] that plays the DS102: it reads the
//! carriage-return framed commands the driver sends and writes newline
//! terminated replies back. Dropping the controller closes the pipe, which the
//! driver sees as EOF on read and a broken pipe on write.
//!
//! ```rust,ignore
//! let (port, mut controller) = mock_serial::new();
//! let stage = Arc::new(Ds102Stage::from_port(Box::new(port), StageOptions::default()));
//!
//! let task = tokio::spawn({
//!     let stage = Arc::clone(&stage);
//!     async move { stage.position().await }
//! });
//! controller.expect_and_reply("AXIs1:POS?", "1500").await;
//! assert_eq!(task.await.unwrap().unwrap(), 1500);
//! ```

use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf,
};

/// Driver-side end of the line.
pub type MockSerialPort = DuplexStream;

/// Bytes buffered in each direction before a writer waits.
const LINE_CAPACITY: usize = 4096;

/// How long the controller waits for the driver to send a command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Test-side end of the line, acting as the controller.
#[derive(Debug)]
pub struct ScriptedController {
    commands: BufReader<ReadHalf<DuplexStream>>,
    replies: WriteHalf<DuplexStream>,
}

/// Create a connected driver port and controller.
pub fn new() -> (MockSerialPort, ScriptedController) {
    let (port, far_end) = tokio::io::duplex(LINE_CAPACITY);
    let (read, write) = tokio::io::split(far_end);
    let controller = ScriptedController {
        commands: BufReader::new(read),
        replies: write,
    };
    (port, controller)
}

impl ScriptedController {
    /// Next command with its `\r` stripped, or `None` once the driver is gone.
    pub async fn next_command(&mut self) -> Option<String> {
        let mut raw = Vec::new();
        match self.commands.read_until(b'\r', &mut raw).await {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                if raw.last() == Some(&b'\r') {
                    raw.pop();
                }
                Some(String::from_utf8_lossy(&raw).into_owned())
            }
        }
    }

    /// Assert that the driver sends `command` next.
    ///
    /// # Panics
    /// If a different command arrives, the driver goes away, or nothing
    /// arrives within two seconds.
    pub async fn expect_command(&mut self, command: &str) {
        match tokio::time::timeout(COMMAND_TIMEOUT, self.next_command()).await {
            Ok(Some(actual)) => assert_eq!(actual, command, "unexpected DS102 command"),
            Ok(None) => panic!("driver closed the line while '{command}' was expected"),
            Err(_) => panic!("no command within {COMMAND_TIMEOUT:?}; expected '{command}'"),
        }
    }

    /// Send one reply line. A driver that already hung up is ignored.
    pub async fn reply(&mut self, line: &str) {
        let framed = format!("{line}\n");
        if self.replies.write_all(framed.as_bytes()).await.is_ok() {
            let _ = self.replies.flush().await;
        }
    }

    /// Expect `command` and answer it with `response`.
    pub async fn expect_and_reply(&mut self, command: &str, response: &str) {
        self.expect_command(command).await;
        self.reply(response).await;
    }
}
