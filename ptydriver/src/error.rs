//! Error types for ptydriver.

use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

/// Main error type for ptydriver operations.
#[derive(Error, Debug)]
pub enum Error {
    /// PTY bridge errors (spawn, read, write)
    #[error("PTY error: {0}")]
    Pty(#[from] PtyError),

    /// Driver-level errors
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Whether this error happened before a session existed.
    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, Error::Pty(e) if e.is_spawn_failure())
    }
}

/// PTY bridge errors.
#[derive(Error, Debug)]
pub enum PtyError {
    /// Failed to allocate the pseudo-terminal pair
    #[error("Failed to allocate PTY: {0}")]
    Allocation(#[source] io::Error),

    /// Failed to fork the child process
    #[error("Failed to fork: {0}")]
    Fork(#[source] Errno),

    /// The command cannot be turned into an exec call
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Failed to register the master descriptor with the reactor
    #[error("Failed to register PTY with reactor: {0}")]
    Register(#[source] io::Error),

    /// The readiness wait itself failed
    #[error("Readiness wait failed: {0}")]
    Multiplex(#[source] io::Error),

    /// Writing to the master failed
    #[error("Write to child failed: {0}")]
    Write(#[source] io::Error),

    /// The child accepted fewer bytes than were sent
    #[error("Short write to child: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    /// The session has already been torn down
    #[error("Session closed")]
    Closed,
}

impl PtyError {
    /// Whether this error can only come out of [`PtySession::spawn`](crate::pty::PtySession::spawn).
    pub fn is_spawn_failure(&self) -> bool {
        matches!(
            self,
            PtyError::Allocation(_)
                | PtyError::Fork(_)
                | PtyError::InvalidCommand(_)
                | PtyError::Register(_)
        )
    }
}

/// Driver layer errors.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Reading operator input or writing to the display failed
    #[error("Operator I/O failed: {0}")]
    Operator(#[source] io::Error),

    /// The run was cancelled from outside
    #[error("Run cancelled")]
    Cancelled,

    /// Failed to open the transcript file
    #[error("Failed to open transcript {}: {source}", path.display())]
    Transcript {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to parse the config file
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config values are inconsistent
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Result type alias using ptydriver's Error.
pub type Result<T> = std::result::Result<T, Error>;
