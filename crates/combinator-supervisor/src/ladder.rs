//! Termination ladder
//!
//! Stops one process by escalating through a fixed table of steps, each
//! with its own timeout. Exit is re-checked before every step because it
//! can race with any of them.

use combinator_core::{HandleError, ProcessHandle, TerminationOutcome};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// What a ladder step asks of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepAction {
    CloseMainWindow,
    RequestClose,
    Kill,
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CloseMainWindow => "close main window",
            Self::RequestClose => "close request",
            Self::Kill => "kill",
        })
    }
}

/// One rung of the ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LadderStep {
    pub action: StepAction,
    /// How long to wait for exit after the action
    pub timeout: Duration,
    /// Reported when the process exits during this step's wait
    pub outcome: TerminationOutcome,
    /// Step to continue at when the action cannot be delivered
    pub undeliverable: Option<StepAction>,
}

/// Window close (500 ms), close request (250 ms), kill (250 ms)
pub const DEFAULT_STEPS: [LadderStep; 3] = [
    LadderStep {
        action: StepAction::CloseMainWindow,
        timeout: Duration::from_millis(500),
        outcome: TerminationOutcome::ClosedGracefully,
        undeliverable: Some(StepAction::Kill),
    },
    LadderStep {
        action: StepAction::RequestClose,
        timeout: Duration::from_millis(250),
        outcome: TerminationOutcome::ClosedForcibly,
        undeliverable: None,
    },
    LadderStep {
        action: StepAction::Kill,
        timeout: Duration::from_millis(250),
        outcome: TerminationOutcome::Killed,
        undeliverable: None,
    },
];

/// A ladder step failed for a reason other than the process being gone
#[derive(Debug, Error)]
#[error("{action} failed for pid {pid}: {source}")]
pub struct TerminationError {
    pub action: StepAction,
    pub pid: u32,
    #[source]
    pub source: HandleError,
}

/// Ordered termination steps evaluated by [`TerminationLadder::terminate`]
#[derive(Debug, Clone)]
pub struct TerminationLadder {
    steps: Vec<LadderStep>,
}

impl Default for TerminationLadder {
    fn default() -> Self {
        Self::new(DEFAULT_STEPS.to_vec())
    }
}

impl TerminationLadder {
    pub fn new(steps: Vec<LadderStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[LadderStep] {
        &self.steps
    }

    /// Longest time a single termination can spend waiting
    pub fn budget(&self) -> Duration {
        self.steps.iter().map(|step| step.timeout).sum()
    }

    /// Drive `handle` down the ladder. The handle is released on return.
    pub async fn terminate(
        &self,
        mut handle: Box<dyn ProcessHandle>,
        label: &str,
    ) -> Result<TerminationOutcome, TerminationError> {
        let result = self.climb(handle.as_mut(), label).await;
        drop(handle);
        result
    }

    async fn climb(
        &self,
        handle: &mut dyn ProcessHandle,
        label: &str,
    ) -> Result<TerminationOutcome, TerminationError> {
        let pid = handle.pid();
        let mut index = 0;
        let mut last: Option<TerminationOutcome> = None;

        while let Some(step) = self.steps.get(index) {
            let exited = handle.has_exited().await;
            match recover(exited, step.action, pid)? {
                Step::Gone => return Ok(TerminationOutcome::AlreadyExited),
                Step::Continue(true) => return Ok(last.unwrap_or(TerminationOutcome::AlreadyExited)),
                Step::Continue(false) => {}
            }

            let delivered = deliver(handle, step.action).await;
            match recover(delivered, step.action, pid)? {
                Step::Gone => return Ok(TerminationOutcome::AlreadyExited),
                Step::Continue(false) => {
                    tracing::debug!(companion = label, pid, action = %step.action, "not deliverable, skipping ahead");
                    index = self.skip_target(index, step.undeliverable);
                    continue;
                }
                Step::Continue(true) => {}
            }
            last = Some(step.outcome);

            let waited = handle.wait_for_exit(step.timeout).await;
            match recover(waited, step.action, pid)? {
                Step::Gone => return Ok(TerminationOutcome::AlreadyExited),
                Step::Continue(true) => return Ok(step.outcome),
                Step::Continue(false) => {
                    tracing::debug!(
                        companion = label,
                        pid,
                        action = %step.action,
                        timeout = ?step.timeout,
                        "did not exit in time"
                    );
                }
            }
            index += 1;
        }

        tracing::warn!(companion = label, pid, "did not die in time, ignoring");
        Ok(TerminationOutcome::GaveUp)
    }

    /// Index of the step named by `target`, if it lies ahead; else the next step
    fn skip_target(&self, index: usize, target: Option<StepAction>) -> usize {
        target
            .and_then(|action| {
                self.steps
                    .iter()
                    .enumerate()
                    .skip(index + 1)
                    .find(|(_, step)| step.action == action)
                    .map(|(i, _)| i)
            })
            .unwrap_or(index + 1)
    }
}

enum Step {
    Continue(bool),
    Gone,
}

/// "Process is gone" errors end the ladder quietly; anything else aborts it
fn recover(
    result: Result<bool, HandleError>,
    action: StepAction,
    pid: u32,
) -> Result<Step, TerminationError> {
    match result {
        Ok(value) => Ok(Step::Continue(value)),
        Err(HandleError::Exited { .. }) => Ok(Step::Gone),
        Err(source) => Err(TerminationError {
            action,
            pid,
            source,
        }),
    }
}

/// Send the step's request; `Ok(false)` when it cannot be delivered
async fn deliver(handle: &mut dyn ProcessHandle, action: StepAction) -> Result<bool, HandleError> {
    match action {
        StepAction::CloseMainWindow => {
            if handle.has_main_window() {
                handle.close_main_window().await
            } else {
                Ok(false)
            }
        }
        StepAction::RequestClose => handle.request_close().await.map(|()| true),
        StepAction::Kill => handle.kill().await.map(|()| true),
    }
}
