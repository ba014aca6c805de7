//! Results of automated runs.

use std::time::Duration;

/// Which of the two alternating inputs a step sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepInput {
    /// The diagnostic command (e.g. `reg 0`).
    Probe,

    /// The bare continuation keystroke (e.g. a newline, to single-step).
    Continuation,
}

impl StepInput {
    /// Input for 1-based `iteration`: odd iterations probe, even ones continue.
    pub fn for_iteration(iteration: usize) -> Self {
        if iteration % 2 == 1 {
            StepInput::Probe
        } else {
            StepInput::Continuation
        }
    }
}

/// One send-then-wait exchange with the child.
#[derive(Debug, Clone)]
pub struct Step {
    /// 1-based iteration number.
    pub iteration: usize,

    /// What was sent.
    pub input: StepInput,

    /// Text captured before the next prompt (or before the wait failed).
    pub output: String,

    /// Time from sending to the end of the wait.
    pub elapsed: Duration,
}

/// Why a run ended successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessReason {
    /// The completion marker showed up in the output.
    CompletionMarker,

    /// The per-step header was missing, so the child's stepping loop is gone.
    LivenessLost,
}

/// Which phase a failed run was in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the first ready prompt.
    InitialPrompt,

    /// Alternating probe and continuation.
    Stepping,
}

/// Infrastructure reason a run ended without a verdict from the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// No prompt within the wait budget.
    TimedOut,

    /// The child closed the terminal.
    EndOfStream,

    /// The iteration cap was reached.
    IterationLimit,
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCause::TimedOut => write!(f, "timeout"),
            FailureCause::EndOfStream => write!(f, "end of stream"),
            FailureCause::IterationLimit => write!(f, "iteration limit reached"),
        }
    }
}

/// Terminal state of an automated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The child reached a conclusive state.
    Succeeded(SuccessReason),

    /// The run stopped for an infrastructure reason.
    Failed {
        /// Where it stopped.
        phase: Phase,
        /// Why it stopped.
        cause: FailureCause,
    },
}

/// Report of an automated run.
#[derive(Debug, Clone)]
pub struct AutomatedReport {
    /// Text the child printed before its first prompt.
    pub banner: String,

    /// Every exchange, in order.
    pub steps: Vec<Step>,

    /// How the run ended.
    pub termination: Termination,

    /// Total time for the run.
    pub elapsed: Duration,
}

impl AutomatedReport {
    /// Whether the run succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self.termination, Termination::Succeeded(_))
    }

    /// Number of iterations performed.
    pub fn iterations(&self) -> usize {
        self.steps.len()
    }

    /// Output of the last probe step, where the final register dump lives.
    pub fn last_probe_output(&self) -> Option<&str> {
        self.steps
            .iter()
            .rev()
            .find(|s| s.input == StepInput::Probe)
            .map(|s| s.output.as_str())
    }

    /// Banner and all step outputs concatenated.
    pub fn full_output(&self) -> String {
        let mut output = self.banner.clone();
        for step in &self.steps {
            output.push_str(&step.output);
        }
        output
    }
}
