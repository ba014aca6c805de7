//! Record a child's output without talking to it.

use log::info;
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};

use super::Strategy;
use super::session::Session;
use crate::error::{DriverError, Result};
use crate::pty::ReadOutcome;

/// Summary of a capture run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureReport {
    /// Bytes read from the child.
    pub bytes: usize,

    /// Lines seen (newline count).
    pub lines: usize,
}

/// Copies child output to a display until the child closes the terminal.
///
/// Nothing is sent to the child and there is no timeout; the transcript,
/// if any, gets the same bytes as the display.
#[derive(Debug)]
pub struct CaptureStrategy<W> {
    display: W,
}

impl CaptureStrategy<Stdout> {
    /// Capture to the process's stdout.
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W: AsyncWrite + Send + Unpin> CaptureStrategy<W> {
    /// Capture to `display`.
    pub fn new(display: W) -> Self {
        Self { display }
    }

    /// Recover the display.
    pub fn into_inner(self) -> W {
        self.display
    }
}

impl<W: AsyncWrite + Send + Unpin> Strategy for CaptureStrategy<W> {
    type Output = CaptureReport;

    async fn run(&mut self, session: &mut Session) -> Result<CaptureReport> {
        let mut report = CaptureReport { bytes: 0, lines: 0 };

        let pending = session.take_pending();
        let mut next = if pending.is_empty() {
            None
        } else {
            Some(pending)
        };

        loop {
            let chunk = match next.take() {
                Some(chunk) => chunk,
                None => match session.read_available(None).await? {
                    ReadOutcome::Data(chunk) => chunk,
                    ReadOutcome::TimedOut => continue,
                    ReadOutcome::EndOfStream => break,
                },
            };

            report.bytes += chunk.len();
            report.lines += memchr::memchr_iter(b'\n', &chunk).count();
            self.display.write_all(&chunk).await.map_err(DriverError::Operator)?;
            self.display.flush().await.map_err(DriverError::Operator)?;
        }

        info!("Captured {} bytes in {} lines", report.bytes, report.lines);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::assert_ok;

    use super::*;
    use crate::driver::transcript::Transcript;
    use crate::driver::transcript::tests::SharedSink;
    use crate::pty::{ExitStatus, SpawnConfig};

    #[tokio::test]
    async fn test_captures_until_exit() {
        let sink = SharedSink::default();
        let mut session = Session::spawn(&SpawnConfig::shell("printf 'line1\\nline2\\n'; exit 4")).unwrap();
        session.set_transcript(Transcript::to_writer(sink.clone()));

        let mut strategy = CaptureStrategy::new(Vec::new());
        let finished = assert_ok!(session.run(&mut strategy).await);

        let shown = strategy.into_inner();
        assert_eq!(shown, b"line1\r\nline2\r\n");
        assert_eq!(sink.contents(), shown);
        assert_eq!(finished.output, CaptureReport { bytes: 14, lines: 2 });
        assert_eq!(finished.exit_status, Some(ExitStatus::Exited(4)));
    }
}
