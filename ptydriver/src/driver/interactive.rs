//! Operator passthrough.
//!
//! Once the child's first prompt has been shown (or the wait for it gave
//! up), the strategy relays bytes both ways without interpreting them:
//! child output goes to the operator's display and the transcript, operator
//! input goes to the child. Whichever side closes first ends the relay.

use std::time::Duration;

use log::{debug, info};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Stdin, Stdout};

use super::Strategy;
use super::automated::DEFAULT_PROMPT;
use super::session::Session;
use crate::channel::{Prompt, WaitOutcome};
use crate::error::{DriverError, Result};
use crate::pty::ReadOutcome;

const OPERATOR_CHUNK: usize = 1024;

/// Which side ended the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// The child closed the terminal.
    ChildClosed,

    /// The operator's input reached end of file.
    OperatorClosed,
}

/// Summary of an interactive session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractiveReport {
    /// Whether the first prompt appeared within the initial timeout.
    pub initial_prompt_seen: bool,

    /// Which side closed first.
    pub ended_by: RelayEnd,

    /// Bytes shown to the operator.
    pub child_bytes: usize,

    /// Bytes forwarded to the child, not counting startup input.
    pub operator_bytes: usize,
}

/// Relays between an operator and the child.
#[derive(Debug)]
pub struct InteractiveStrategy<R, W> {
    input: R,
    display: W,
    prompt: Prompt,
    initial_timeout: Duration,
    startup_input: Option<Vec<u8>>,
}

impl InteractiveStrategy<Stdin, Stdout> {
    /// Relay the process's own stdin and stdout.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> InteractiveStrategy<R, W>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    /// Relay `input` to the child and child output to `display`.
    pub fn new(input: R, display: W) -> Self {
        Self {
            input,
            display,
            prompt: Prompt::new(DEFAULT_PROMPT),
            initial_timeout: Duration::from_secs(5),
            startup_input: None,
        }
    }

    /// Set the prompt awaited before relaying.
    pub fn with_prompt(mut self, prompt: impl AsRef<[u8]>) -> Self {
        self.prompt = Prompt::new(prompt);
        self
    }

    /// Set how long to wait for the first prompt.
    pub fn with_initial_timeout(mut self, timeout: Duration) -> Self {
        self.initial_timeout = timeout;
        self
    }

    /// Send `input` once the first prompt has been seen.
    pub fn with_startup_input(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.startup_input = Some(input.into());
        self
    }

    /// Recover the operator streams.
    pub fn into_inner(self) -> (R, W) {
        (self.input, self.display)
    }

    async fn show(&mut self, data: &[u8]) -> Result<()> {
        self.display.write_all(data).await.map_err(DriverError::Operator)?;
        self.display.flush().await.map_err(DriverError::Operator)?;
        Ok(())
    }
}

impl<R, W> Strategy for InteractiveStrategy<R, W>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    type Output = InteractiveReport;

    async fn run(&mut self, session: &mut Session) -> Result<InteractiveReport> {
        let mut child_bytes = 0;
        let mut operator_bytes = 0;

        let initial_prompt_seen = match session.wait_for(&self.prompt, Some(self.initial_timeout)).await? {
            WaitOutcome::Matched(preface) => {
                self.show(&preface).await?;
                let prompt = self.prompt.as_bytes().to_vec();
                self.show(&prompt).await?;
                child_bytes += preface.len() + prompt.len();
                true
            }
            outcome => {
                debug!("No initial prompt ({:?}), relaying anyway", outcome);
                false
            }
        };

        let pending = session.take_pending();
        if !pending.is_empty() {
            self.show(&pending).await?;
            child_bytes += pending.len();
        }

        if initial_prompt_seen {
            if let Some(startup) = self.startup_input.take() {
                session.send(&startup).await?;
            }
        }

        let mut buf = [0u8; OPERATOR_CHUNK];
        let ended_by = loop {
            tokio::select! {
                biased;

                outcome = session.read_available(None) => match outcome? {
                    ReadOutcome::Data(chunk) => {
                        self.show(&chunk).await?;
                        child_bytes += chunk.len();
                    }
                    ReadOutcome::TimedOut => {}
                    ReadOutcome::EndOfStream => break RelayEnd::ChildClosed,
                },
                read = self.input.read(&mut buf) => match read {
                    Ok(0) => break RelayEnd::OperatorClosed,
                    Ok(n) => {
                        session.send(&buf[..n]).await?;
                        operator_bytes += n;
                    }
                    Err(e) => return Err(DriverError::Operator(e).into()),
                },
            }
        };

        info!(
            "Relay ended ({:?}): {} bytes from child, {} from operator",
            ended_by, child_bytes, operator_bytes
        );
        Ok(InteractiveReport {
            initial_prompt_seen,
            ended_by,
            child_bytes,
            operator_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::assert_ok;

    use super::*;
    use crate::driver::transcript::Transcript;
    use crate::driver::transcript::tests::SharedSink;
    use crate::pty::SpawnConfig;

    #[tokio::test]
    async fn test_relays_both_ways_until_child_exits() {
        let sink = SharedSink::default();
        let mut session =
            Session::spawn(&SpawnConfig::shell("printf '(spike) '; read line; printf 'got:%s\\n' \"$line\"")).unwrap();
        session.set_transcript(Transcript::to_writer(sink.clone()));

        // Operator types one line and then stays silent without closing.
        let (_keep_open, idle) = tokio::io::duplex(64);
        let operator = (&b"ping\n"[..]).chain(idle);
        let (display, mut shown) = tokio::io::duplex(64 * 1024);

        let mut strategy = InteractiveStrategy::new(operator, display);
        let report = assert_ok!(session.run(&mut strategy).await).output;

        assert!(report.initial_prompt_seen);
        assert_eq!(report.ended_by, RelayEnd::ChildClosed);
        assert_eq!(report.operator_bytes, 5);

        drop(strategy);
        let mut text = String::new();
        shown.read_to_string(&mut text).await.unwrap();
        assert!(text.starts_with("(spike) "), "display: {:?}", text);
        assert!(text.contains("got:ping"));
        assert_eq!(report.child_bytes, text.len());
        assert!(sink.text().contains("got:ping"));
    }

    #[tokio::test]
    async fn test_operator_eof_ends_relay() {
        let session = Session::spawn(&SpawnConfig::shell("exec cat")).unwrap();
        let operator = tokio_test::io::Builder::new().read(b"ping\n").build();

        let mut strategy =
            InteractiveStrategy::new(operator, tokio::io::sink()).with_initial_timeout(Duration::from_millis(100));
        let report = assert_ok!(session.run(&mut strategy).await).output;

        assert!(!report.initial_prompt_seen);
        assert_eq!(report.ended_by, RelayEnd::OperatorClosed);
        assert_eq!(report.operator_bytes, 5);
    }

    #[tokio::test]
    async fn test_startup_input_follows_first_prompt() {
        let session = Session::spawn(&SpawnConfig::shell(
            "stty -echo; printf '(spike) '; read line; printf 'ran:%s\\n' \"$line\"",
        ))
        .unwrap();
        let (_keep_open, idle) = tokio::io::duplex(64);
        let (display, mut shown) = tokio::io::duplex(64 * 1024);

        let mut strategy = InteractiveStrategy::new(idle, display).with_startup_input("r\n");
        let report = assert_ok!(session.run(&mut strategy).await).output;

        assert_eq!(report.ended_by, RelayEnd::ChildClosed);
        assert_eq!(report.operator_bytes, 0);

        drop(strategy);
        let mut text = String::new();
        shown.read_to_string(&mut text).await.unwrap();
        assert!(text.contains("ran:r"), "display: {:?}", text);
    }
}
