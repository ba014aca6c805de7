//! Prompt-synchronized reading.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, trace};
use tokio::time::Instant;

use super::buffer::PromptBuffer;
use super::patterns::Prompt;
use crate::error::PtyError;
use crate::pty::{PtySession, ReadOutcome};

/// Anything that yields child output one read at a time.
///
/// Implemented by [`PtySession`]; the driver wraps it to copy every chunk
/// into a transcript.
pub trait ByteSource: Send {
    /// Wait up to `max_wait` (forever if `None`) and read what is available.
    fn read_available(
        &mut self,
        max_wait: Option<Duration>,
    ) -> impl Future<Output = Result<ReadOutcome, PtyError>> + Send;
}

impl ByteSource for PtySession {
    fn read_available(
        &mut self,
        max_wait: Option<Duration>,
    ) -> impl Future<Output = Result<ReadOutcome, PtyError>> + Send {
        PtySession::read_available(self, max_wait)
    }
}

/// Outcome of waiting for a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The prompt appeared; carries the text that preceded it.
    Matched(Bytes),

    /// The wait budget ran out first.
    TimedOut,

    /// The child closed the terminal first.
    EndOfStream,
}

impl WaitOutcome {
    /// Whether the prompt was found.
    pub fn is_matched(&self) -> bool {
        matches!(self, WaitOutcome::Matched(_))
    }

    /// The text before the prompt, if it was found.
    pub fn preface(&self) -> Option<&[u8]> {
        match self {
            WaitOutcome::Matched(preface) => Some(&preface[..]),
            _ => None,
        }
    }
}

/// Accumulates child output and waits for prompts in it.
///
/// The buffer lives as long as the reader: bytes that arrive after a prompt
/// are kept for the next wait, and bytes read before a timeout are not lost.
#[derive(Debug, Default)]
pub struct PromptReader {
    buffer: PromptBuffer,
}

impl PromptReader {
    /// Create a reader with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read from `source` until `prompt` appears, the budget runs out, or the
    /// stream ends.
    ///
    /// The budget is a single deadline for the whole wait, however many
    /// reads it takes. A prompt already sitting in the buffer is matched
    /// without reading. Only failures of the source itself are errors.
    pub async fn wait_for<S>(
        &mut self,
        source: &mut S,
        prompt: &Prompt,
        max_wait: Option<Duration>,
    ) -> Result<WaitOutcome, PtyError>
    where
        S: ByteSource + ?Sized,
    {
        let deadline = max_wait.map(|wait| Instant::now() + wait);
        let mut scan_from = 0;

        loop {
            if let Some(preface) = self.buffer.split_at_prompt(prompt, scan_from) {
                debug!("Matched prompt {:?} after {} bytes", prompt.to_string(), preface.len());
                return Ok(WaitOutcome::Matched(preface));
            }
            scan_from = self.buffer.resume_offset(prompt);

            let remaining = match deadline {
                None => None,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        debug!("Timed out waiting for {:?}", prompt.to_string());
                        return Ok(WaitOutcome::TimedOut);
                    }
                    Some(deadline - now)
                }
            };

            match source.read_available(remaining).await? {
                ReadOutcome::Data(chunk) => {
                    trace!("Buffered {} bytes", chunk.len());
                    self.buffer.extend(&chunk);
                }
                ReadOutcome::TimedOut => {
                    debug!("Timed out waiting for {:?}", prompt.to_string());
                    return Ok(WaitOutcome::TimedOut);
                }
                ReadOutcome::EndOfStream => {
                    debug!("End of stream while waiting for {:?}", prompt.to_string());
                    return Ok(WaitOutcome::EndOfStream);
                }
            }
        }
    }

    /// Bytes buffered but not yet returned by a wait.
    pub fn pending(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Remove and return the buffered bytes.
    pub fn take_pending(&mut self) -> Bytes {
        self.buffer.take()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Scripted source; reports end of stream once the script runs out.
    struct FakeSource {
        script: VecDeque<ReadOutcome>,
        reads: usize,
    }

    impl FakeSource {
        fn new(chunks: &[&[u8]]) -> Self {
            Self {
                script: chunks
                    .iter()
                    .map(|c| ReadOutcome::Data(Bytes::copy_from_slice(c)))
                    .collect(),
                reads: 0,
            }
        }
    }

    impl ByteSource for FakeSource {
        async fn read_available(&mut self, _max_wait: Option<Duration>) -> Result<ReadOutcome, PtyError> {
            self.reads += 1;
            Ok(self.script.pop_front().unwrap_or(ReadOutcome::EndOfStream))
        }
    }

    /// Emits a byte every 30ms, never a prompt, honouring the wait budget.
    struct Trickle;

    impl ByteSource for Trickle {
        async fn read_available(&mut self, max_wait: Option<Duration>) -> Result<ReadOutcome, PtyError> {
            let interval = Duration::from_millis(30);
            match max_wait {
                Some(wait) if wait < interval => {
                    tokio::time::sleep(wait).await;
                    Ok(ReadOutcome::TimedOut)
                }
                _ => {
                    tokio::time::sleep(interval).await;
                    Ok(ReadOutcome::Data(Bytes::from_static(b".")))
                }
            }
        }
    }

    #[tokio::test]
    async fn test_prompt_split_across_reads() {
        let prompt = Prompt::new("(spike) ");
        let mut source = FakeSource::new(&[b"abc(spi", b"ke) def"]);
        let mut reader = PromptReader::new();

        let outcome = reader.wait_for(&mut source, &prompt, None).await.unwrap();
        assert_eq!(outcome, WaitOutcome::Matched(Bytes::from_static(b"abc")));
        assert_eq!(reader.pending(), b"def");
    }

    #[tokio::test]
    async fn test_consumed_prompt_is_not_matched_again() {
        let prompt = Prompt::new("(spike) ");
        let mut source = FakeSource::new(&[b"one(spike) two"]);
        let mut reader = PromptReader::new();

        let first = reader.wait_for(&mut source, &prompt, None).await.unwrap();
        assert_eq!(first.preface(), Some(&b"one"[..]));
        assert!(!prompt.is_in(first.preface().unwrap()));

        let second = reader.wait_for(&mut source, &prompt, None).await.unwrap();
        assert_eq!(second, WaitOutcome::EndOfStream);
        assert_eq!(reader.pending(), b"two");
    }

    #[tokio::test]
    async fn test_buffered_prompt_matches_without_reading() {
        let prompt = Prompt::new("> ");
        let mut source = FakeSource::new(&[b"a> b> "]);
        let mut reader = PromptReader::new();

        let first = reader.wait_for(&mut source, &prompt, None).await.unwrap();
        assert_eq!(first.preface(), Some(&b"a"[..]));
        assert_eq!(source.reads, 1);

        let second = reader.wait_for(&mut source, &prompt, None).await.unwrap();
        assert_eq!(second.preface(), Some(&b"b"[..]));
        assert_eq!(source.reads, 1);
        assert!(reader.pending().is_empty());
    }

    #[tokio::test]
    async fn test_end_of_stream_keeps_partial_output() {
        let prompt = Prompt::new("(spike) ");
        let mut source = FakeSource::new(&[b"partial output"]);
        let mut reader = PromptReader::new();

        let outcome = reader.wait_for(&mut source, &prompt, None).await.unwrap();
        assert_eq!(outcome, WaitOutcome::EndOfStream);
        assert!(!outcome.is_matched());
        assert_eq!(&reader.take_pending()[..], b"partial output");
        assert!(reader.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_covers_the_whole_wait() {
        let prompt = Prompt::new("(spike) ");
        let mut reader = PromptReader::new();
        let start = Instant::now();

        let outcome = reader
            .wait_for(&mut Trickle, &prompt, Some(Duration::from_millis(100)))
            .await
            .unwrap();

        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(start.elapsed(), Duration::from_millis(100));
        assert_eq!(reader.pending(), b"...");
    }
}
