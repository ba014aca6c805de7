//! Builder for spawning sessions.

use std::path::PathBuf;
use std::time::Duration;

use super::session::Session;
use super::transcript::Transcript;
use crate::error::Result;
use crate::pty::{PtySession, SpawnConfig};

/// Builder for constructing a [`Session`].
///
/// # Example
///
/// ```rust,no_run
/// use ptydriver::driver::{AutomatedStrategy, SessionBuilder};
///
/// # async fn example() -> Result<(), ptydriver::Error> {
/// let session = SessionBuilder::exec("spike", ["-d", "pk", "prog.elf"])
///     .transcript_file("spike.log")
///     .build()?;
/// let finished = session.run(&mut AutomatedStrategy::default()).await?;
/// println!("{:?}", finished.output.termination);
/// # Ok(())
/// # }
/// ```
pub struct SessionBuilder {
    spawn: SpawnConfig,
    transcript: Option<TranscriptTarget>,
}

enum TranscriptTarget {
    File(PathBuf),
    Writer(Transcript),
}

impl SessionBuilder {
    /// Run `command` through `/bin/sh -c`.
    pub fn shell(command: impl Into<String>) -> Self {
        Self::from_config(SpawnConfig::shell(command))
    }

    /// Run `program` directly with `args`.
    pub fn exec<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_config(SpawnConfig::exec(program, args))
    }

    /// Start from a complete spawn configuration.
    pub fn from_config(spawn: SpawnConfig) -> Self {
        Self {
            spawn,
            transcript: None,
        }
    }

    /// Set the child's working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spawn = self.spawn.with_working_dir(dir);
        self
    }

    /// Set an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spawn = self.spawn.with_env(key, value);
        self
    }

    /// Set terminal dimensions.
    pub fn window_size(mut self, cols: u16, rows: u16) -> Self {
        self.spawn = self.spawn.with_window_size(cols, rows);
        self
    }

    /// Set how long teardown waits before killing the child.
    pub fn teardown_grace(mut self, grace: Duration) -> Self {
        self.spawn = self.spawn.with_teardown_grace(grace);
        self
    }

    /// Record all child output to `path` (appending).
    pub fn transcript_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.transcript = Some(TranscriptTarget::File(path.into()));
        self
    }

    /// Record all child output to an existing transcript.
    pub fn transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = Some(TranscriptTarget::Writer(transcript));
        self
    }

    /// Spawn the child.
    ///
    /// The transcript file is opened first, so a bad log path never leaves a
    /// child behind.
    pub fn build(self) -> Result<Session> {
        let transcript = match self.transcript {
            None => Transcript::disabled(),
            Some(TranscriptTarget::Writer(transcript)) => transcript,
            Some(TranscriptTarget::File(path)) => Transcript::to_file(path)?,
        };

        let pty = PtySession::spawn(&self.spawn)?;
        Ok(Session::new(pty, transcript))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DriverError, Error};

    #[test]
    fn test_builder_applies_spawn_settings() {
        let builder = SessionBuilder::shell("true")
            .working_dir("/tmp")
            .env("A", "1")
            .window_size(120, 40)
            .teardown_grace(Duration::from_millis(50));

        assert_eq!(builder.spawn.cols, 120);
        assert_eq!(builder.spawn.rows, 40);
        assert_eq!(builder.spawn.working_dir, Some(PathBuf::from("/tmp")));
        assert_eq!(builder.spawn.env, vec![("A".to_string(), "1".to_string())]);
        assert_eq!(builder.spawn.teardown_grace, Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_bad_transcript_path_fails_before_spawn() {
        let result = SessionBuilder::shell("true")
            .transcript_file("/nonexistent-dir/ptydriver/log")
            .build();
        assert!(matches!(result, Err(Error::Driver(DriverError::Transcript { .. }))));
    }

    #[tokio::test]
    async fn test_build_spawns_child() {
        let mut session = SessionBuilder::shell("exit 3").build().unwrap();
        assert!(session.pty().pid().is_some());
        let _ = session.read_available(Some(std::time::Duration::from_secs(5))).await;
        assert!(session.teardown().is_some());
    }
}
