//! Scripted single-stepping of a simulator.
//!
//! The strategy waits for the ready prompt, then alternates a probe command
//! and a continuation keystroke. After every step the captured text is
//! checked for a completion marker and for the per-step header; either
//! condition ends the run with a verdict from the child. Timeouts and end of
//! stream end it as an infrastructure failure instead.

use std::time::Duration;

use bytes::Bytes;
use log::{debug, info};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use super::Strategy;
use super::report::{AutomatedReport, FailureCause, Phase, Step, StepInput, SuccessReason, Termination};
use super::session::Session;
use crate::channel::{Prompt, WaitOutcome};
use crate::error::{DriverError, Result};

/// Ready prompt printed by `spike -d`.
pub const DEFAULT_PROMPT: &str = "(spike) ";

/// Policy constants for an automated run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomatedSettings {
    /// Prompt that marks the child as ready for input.
    pub prompt: String,

    /// Diagnostic command sent on odd iterations.
    pub probe: String,

    /// Keystroke sent on even iterations.
    pub continuation: String,

    /// Substring meaning the simulated program halted.
    pub completion_marker: String,

    /// Substring every live step prints; its absence means the loop is gone.
    pub step_header: String,

    /// Budget for the first prompt.
    pub initial_timeout: Duration,

    /// Budget for each step's prompt.
    pub step_timeout: Duration,

    /// Iterations allowed before giving up.
    pub max_iterations: usize,
}

impl Default for AutomatedSettings {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            probe: "reg 0\n".to_string(),
            continuation: "\n".to_string(),
            completion_marker: "tohost".to_string(),
            step_header: "core   0: ".to_string(),
            initial_timeout: Duration::from_secs(5),
            step_timeout: Duration::from_secs(2),
            max_iterations: 1_000_000,
        }
    }
}

/// Alternates probe and continuation until the child gives a verdict.
pub struct AutomatedStrategy {
    settings: AutomatedSettings,
    prompt: Prompt,
    completion_marker: Prompt,
    step_header: Prompt,
    display: Option<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl AutomatedStrategy {
    /// Create a strategy with the given settings and no display.
    pub fn new(settings: AutomatedSettings) -> Self {
        Self {
            prompt: Prompt::new(&settings.prompt),
            completion_marker: Prompt::new(&settings.completion_marker),
            step_header: Prompt::new(&settings.step_header),
            settings,
            display: None,
        }
    }

    /// Mirror everything captured (including prompts) to `display`.
    pub fn with_display(mut self, display: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.display = Some(Box::new(display));
        self
    }

    fn verdict(&self, text: &[u8]) -> Option<SuccessReason> {
        if self.completion_marker.is_in(text) {
            Some(SuccessReason::CompletionMarker)
        } else if !self.step_header.is_in(text) {
            Some(SuccessReason::LivenessLost)
        } else {
            None
        }
    }

    async fn echo(&mut self, text: &[u8], with_prompt: bool) -> Result<()> {
        let Some(display) = self.display.as_mut() else {
            return Ok(());
        };
        display.write_all(text).await.map_err(DriverError::Operator)?;
        if with_prompt {
            display
                .write_all(self.prompt.as_bytes())
                .await
                .map_err(DriverError::Operator)?;
        }
        display.flush().await.map_err(DriverError::Operator)?;
        Ok(())
    }

    async fn step(&mut self, session: &mut Session, iteration: usize) -> Result<(Step, Option<Termination>)> {
        let input = StepInput::for_iteration(iteration);
        let keys = match input {
            StepInput::Probe => self.settings.probe.clone(),
            StepInput::Continuation => self.settings.continuation.clone(),
        };

        let sent = Instant::now();
        session.send(keys.as_bytes()).await?;
        let outcome = session.wait_for(&self.prompt, Some(self.settings.step_timeout)).await?;

        let (text, termination) = match outcome {
            WaitOutcome::Matched(text) => {
                self.echo(&text, true).await?;
                let termination = self.verdict(&text).map(Termination::Succeeded);
                (text, termination)
            }
            WaitOutcome::TimedOut => (
                self.partial(session).await?,
                Some(failed(Phase::Stepping, FailureCause::TimedOut)),
            ),
            WaitOutcome::EndOfStream => (
                self.partial(session).await?,
                Some(failed(Phase::Stepping, FailureCause::EndOfStream)),
            ),
        };

        let step = Step {
            iteration,
            input,
            output: String::from_utf8_lossy(&text).into_owned(),
            elapsed: sent.elapsed(),
        };
        Ok((step, termination))
    }

    /// Drain whatever arrived before a failed wait so it still gets reported.
    async fn partial(&mut self, session: &mut Session) -> Result<Bytes> {
        let text = session.take_pending();
        self.echo(&text, false).await?;
        Ok(text)
    }
}

impl Default for AutomatedStrategy {
    fn default() -> Self {
        Self::new(AutomatedSettings::default())
    }
}

impl std::fmt::Debug for AutomatedStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomatedStrategy")
            .field("settings", &self.settings)
            .field("display", &self.display.is_some())
            .finish()
    }
}

fn failed(phase: Phase, cause: FailureCause) -> Termination {
    Termination::Failed { phase, cause }
}

impl Strategy for AutomatedStrategy {
    type Output = AutomatedReport;

    async fn run(&mut self, session: &mut Session) -> Result<AutomatedReport> {
        let start = Instant::now();
        let mut steps = Vec::new();

        let banner = match session
            .wait_for(&self.prompt, Some(self.settings.initial_timeout))
            .await?
        {
            WaitOutcome::Matched(banner) => {
                self.echo(&banner, true).await?;
                banner
            }
            WaitOutcome::TimedOut => {
                let banner = self.partial(session).await?;
                return Ok(report(banner, steps, failed(Phase::InitialPrompt, FailureCause::TimedOut), start));
            }
            WaitOutcome::EndOfStream => {
                let banner = self.partial(session).await?;
                return Ok(report(banner, steps, failed(Phase::InitialPrompt, FailureCause::EndOfStream), start));
            }
        };
        info!("Child is ready, stepping");

        let termination = loop {
            let iteration = steps.len() + 1;
            if iteration > self.settings.max_iterations {
                break failed(Phase::Stepping, FailureCause::IterationLimit);
            }

            let (step, termination) = self.step(session, iteration).await?;
            debug!("Step {} ({:?}) captured {} bytes", iteration, step.input, step.output.len());
            steps.push(step);
            if let Some(termination) = termination {
                break termination;
            }
        };

        info!("Automated run ended after {} steps: {:?}", steps.len(), termination);
        Ok(report(banner, steps, termination, start))
    }
}

fn report(banner: Bytes, steps: Vec<Step>, termination: Termination, start: Instant) -> AutomatedReport {
    AutomatedReport {
        banner: String::from_utf8_lossy(&banner).into_owned(),
        steps,
        termination,
        elapsed: start.elapsed(),
    }
}
