//! A PTY session plus its prompt reader and transcript.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, warn};

use super::Strategy;
use super::transcript::Transcript;
use crate::channel::{ByteSource, Prompt, PromptReader, WaitOutcome};
use crate::error::{DriverError, PtyError, Result};
use crate::pty::{ExitStatus, PtySession, ReadOutcome, SpawnConfig};

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct Finished<T> {
    /// The strategy's own report.
    pub output: T,

    /// How the child ended, as collected by teardown.
    pub exit_status: Option<ExitStatus>,
}

/// One child on a PTY, driven by a [`Strategy`].
///
/// Owns the [`PtySession`] and therefore the master handle and child PID.
/// Teardown happens exactly once: at the end of [`run`](Self::run) on every
/// exit path, on an explicit [`teardown`](Self::teardown), or on drop.
#[derive(Debug)]
pub struct Session {
    pty: PtySession,
    reader: PromptReader,
    transcript: Transcript,
}

/// Copies every chunk read from the PTY into the transcript.
struct Tee<'a> {
    pty: &'a mut PtySession,
    transcript: &'a mut Transcript,
}

impl ByteSource for Tee<'_> {
    async fn read_available(&mut self, max_wait: Option<Duration>) -> std::result::Result<ReadOutcome, PtyError> {
        let outcome = self.pty.read_available(max_wait).await?;
        if let ReadOutcome::Data(chunk) = &outcome {
            self.transcript.record(chunk);
        }
        Ok(outcome)
    }
}

impl Session {
    /// Spawn the configured command with no transcript.
    pub fn spawn(config: &SpawnConfig) -> Result<Self> {
        Ok(Self::new(PtySession::spawn(config)?, Transcript::disabled()))
    }

    /// Wrap an already spawned PTY session.
    pub fn new(pty: PtySession, transcript: Transcript) -> Self {
        Self {
            pty,
            reader: PromptReader::new(),
            transcript,
        }
    }

    /// Replace the transcript.
    pub fn set_transcript(&mut self, transcript: Transcript) {
        self.transcript = transcript;
    }

    /// The underlying PTY session.
    pub fn pty(&self) -> &PtySession {
        &self.pty
    }

    /// Wait for `prompt`; see [`PromptReader::wait_for`].
    pub async fn wait_for(&mut self, prompt: &Prompt, max_wait: Option<Duration>) -> Result<WaitOutcome> {
        let mut tee = Tee {
            pty: &mut self.pty,
            transcript: &mut self.transcript,
        };
        Ok(self.reader.wait_for(&mut tee, prompt, max_wait).await?)
    }

    /// Read once from the child, bypassing prompt matching.
    ///
    /// Bytes still buffered by earlier waits are not returned here; drain
    /// them with [`take_pending`](Self::take_pending) first.
    pub async fn read_available(&mut self, max_wait: Option<Duration>) -> Result<ReadOutcome> {
        let mut tee = Tee {
            pty: &mut self.pty,
            transcript: &mut self.transcript,
        };
        Ok(tee.read_available(max_wait).await?)
    }

    /// Write all of `input` to the child.
    pub async fn send(&mut self, input: &[u8]) -> Result<()> {
        debug!("Sending {:?}", String::from_utf8_lossy(input));
        self.pty.write(input).await?;
        Ok(())
    }

    /// Output buffered by the reader but not yet returned by a wait.
    pub fn pending(&self) -> &[u8] {
        self.reader.pending()
    }

    /// Remove and return the reader's buffered output.
    pub fn take_pending(&mut self) -> Bytes {
        self.reader.take_pending()
    }

    /// Close the handle and reap the child. Idempotent.
    pub fn teardown(&mut self) -> Option<ExitStatus> {
        self.pty.teardown()
    }

    /// Run `strategy` to completion, then tear down.
    ///
    /// Teardown runs whether the strategy finished, reported a failure, or
    /// returned an error.
    pub async fn run<S: Strategy>(mut self, strategy: &mut S) -> Result<Finished<S::Output>> {
        let result = strategy.run(&mut self).await;
        let exit_status = self.teardown();
        match result {
            Ok(output) => Ok(Finished { output, exit_status }),
            Err(e) => {
                warn!("Session ended with error: {}", e);
                Err(e)
            }
        }
    }

    /// Like [`run`](Self::run), but stop early when `shutdown` completes.
    ///
    /// On shutdown the strategy is abandoned at its current await point,
    /// the session is torn down, and [`DriverError::Cancelled`] is returned.
    pub async fn run_until<S, F>(mut self, strategy: &mut S, shutdown: F) -> Result<Finished<S::Output>>
    where
        S: Strategy,
        F: Future<Output = ()>,
    {
        let result = tokio::select! {
            result = strategy.run(&mut self) => Some(result),
            () = shutdown => None,
        };
        let exit_status = self.teardown();
        match result {
            Some(Ok(output)) => Ok(Finished { output, exit_status }),
            Some(Err(e)) => {
                warn!("Session ended with error: {}", e);
                Err(e)
            }
            None => {
                info!("Run cancelled, child {}", exit_status.map_or_else(|| "not reaped".to_string(), |s| s.to_string()));
                Err(DriverError::Cancelled.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use tokio_test::assert_ok;

    use super::*;
    use crate::driver::transcript::tests::SharedSink;

    #[tokio::test]
    async fn test_wait_for_records_transcript() {
        let sink = SharedSink::default();
        let mut session = Session::spawn(&SpawnConfig::shell("printf 'boot\\n(spike) tail'; sleep 5")).unwrap();
        session.set_transcript(Transcript::to_writer(sink.clone()));

        let prompt = Prompt::new("(spike) ");
        let outcome = assert_ok!(session.wait_for(&prompt, Some(Duration::from_secs(5))).await);
        assert_eq!(outcome.preface(), Some(&b"boot\r\n"[..]));

        let transcript = sink.text();
        assert!(transcript.starts_with("boot\r\n(spike) "), "transcript: {:?}", transcript);
        assert!(session.teardown().is_some());
    }

    #[tokio::test]
    async fn test_wait_times_out_within_budget() {
        let mut session = Session::spawn(&SpawnConfig::shell("sleep 5")).unwrap();
        let prompt = Prompt::new("(spike) ");

        let start = Instant::now();
        let outcome = assert_ok!(session.wait_for(&prompt, Some(Duration::from_millis(100))).await);
        let elapsed = start.elapsed();

        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(150), "overran: {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_teardown_after_child_exit_does_not_block() {
        let mut session = Session::spawn(&SpawnConfig::shell("exit 0")).unwrap();
        let prompt = Prompt::new("never");
        let outcome = assert_ok!(session.wait_for(&prompt, Some(Duration::from_secs(5))).await);
        assert_eq!(outcome, WaitOutcome::EndOfStream);

        let start = Instant::now();
        assert_eq!(session.teardown(), Some(ExitStatus::Exited(0)));
        assert_eq!(session.teardown(), Some(ExitStatus::Exited(0)));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(!session.pty().is_live());
    }

    #[tokio::test]
    async fn test_run_until_cancels_and_tears_down() {
        struct Forever;

        impl Strategy for Forever {
            type Output = ();

            async fn run(&mut self, session: &mut Session) -> Result<()> {
                session.wait_for(&Prompt::new("never"), None).await?;
                Ok(())
            }
        }

        let session = Session::spawn(&SpawnConfig::shell("sleep 5")).unwrap();
        let start = Instant::now();
        let result = session
            .run_until(&mut Forever, tokio::time::sleep(Duration::from_millis(50)))
            .await;

        assert!(matches!(result, Err(crate::Error::Driver(DriverError::Cancelled))));
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
