//! PTY bridge: spawn a child on a pseudo-terminal and move bytes to and
//! from it.
//!
//! This module handles descriptor and process lifetime. It knows nothing
//! about prompts; see [`crate::channel`] for that.

pub mod config;
mod session;

pub use config::{CommandSpec, DEFAULT_COLS, DEFAULT_ROWS, DEFAULT_TEARDOWN_GRACE, SHELL_PATH, SpawnConfig};
pub use session::{EXEC_FAILURE_STATUS, ExitStatus, PtySession, ReadOutcome};
