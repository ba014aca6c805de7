//! Strategies that drive a child on a PTY.
//!
//! A [`Session`] owns the child and its prompt reader. A [`Strategy`] decides
//! what to send and when to stop: [`AutomatedStrategy`] single-steps a
//! simulator until it reports a verdict, [`InteractiveStrategy`] relays a
//! human operator, and [`CaptureStrategy`] just records output until the
//! child exits.

mod automated;
mod builder;
mod capture;
mod interactive;
pub(crate) mod report;
mod session;
pub(crate) mod transcript;

pub use automated::{AutomatedSettings, AutomatedStrategy, DEFAULT_PROMPT};
pub use builder::SessionBuilder;
pub use capture::{CaptureReport, CaptureStrategy};
pub use interactive::{InteractiveReport, InteractiveStrategy, RelayEnd};
pub use report::{AutomatedReport, FailureCause, Phase, Step, StepInput, SuccessReason, Termination};
pub use session::{Finished, Session};
pub use transcript::Transcript;

use std::future::Future;

use crate::error::Result;

/// A policy for driving a [`Session`] to completion.
///
/// Implementations return `Ok` with their own report for every outcome the
/// child can cause (a timeout, the child exiting, a verdict in its output)
/// and reserve `Err` for failures of the PTY or the operator's terminal.
/// The session is torn down by [`Session::run`] afterwards either way.
pub trait Strategy: Send {
    /// What a finished run reports.
    type Output: Send;

    /// Drive `session` until this strategy decides to stop.
    fn run(&mut self, session: &mut Session) -> impl Future<Output = Result<Self::Output>> + Send;
}
