//! # ptydriver
//!
//! Drive prompt-based interactive programs, such as an instruction-set
//! simulator's debug console, over a pseudo-terminal.
//!
//! The child believes it is talking to a human at a terminal. ptydriver
//! spawns it on a PTY, waits for its prompt, and then either single-steps it
//! automatically until it reports a verdict, relays a human operator, or
//! just records what it prints.
//!
//! ## Features
//!
//! - PTY spawn with guaranteed teardown (close, reap, process-group kill)
//! - Literal prompt matching with a single deadline per wait
//! - Automated stepping with completion-marker and liveness checks
//! - Interactive passthrough with a verbatim transcript
//! - TOML configuration for every policy constant
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ptydriver::{AutomatedStrategy, SessionBuilder, Termination};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ptydriver::Error> {
//!     let session = SessionBuilder::shell("spike -d --log-commits rv64ui-p-and 2> trace.log")
//!         .transcript_file("spike_output.log")
//!         .build()?;
//!
//!     let finished = session.run(&mut AutomatedStrategy::default()).await?;
//!     match finished.output.termination {
//!         Termination::Succeeded(reason) => println!("done: {:?}", reason),
//!         Termination::Failed { .. } => eprintln!("timeout or end of stream"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod driver;
pub mod error;
pub mod pty;

// Re-export main types for convenience
pub use channel::{Prompt, WaitOutcome};
pub use config::{Mode, RunConfig};
pub use driver::{
    AutomatedReport, AutomatedSettings, AutomatedStrategy, CaptureStrategy, Finished, InteractiveReport,
    InteractiveStrategy, Session, SessionBuilder, Strategy, Termination,
};
pub use error::{Error, Result};
pub use pty::{ExitStatus, PtySession, SpawnConfig};
