//! Supervision events
//!
//! Everything the supervisor decides or does is reported as an event so the
//! log output and the test suite observe the same stream.

use crate::probe::TerminationOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Events emitted by the supervision loop and its actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SupervisorEvent {
    /// Parent seen running after being absent
    ParentStarted {
        parent: String,
        timestamp: DateTime<Utc>,
    },

    /// Parent missing for longer than its grace period
    ParentStopped {
        parent: String,
        missing_for: Duration,
        timestamp: DateTime<Utc>,
    },

    /// Start action is sleeping before launch
    CompanionDelayed {
        parent: String,
        companion: String,
        delay: Duration,
        timestamp: DateTime<Utc>,
    },

    /// Process creation is about to happen
    CompanionLaunching {
        parent: String,
        companion: String,
        command: String,
        timestamp: DateTime<Utc>,
    },

    /// Same-named process found when the parent appeared; not launched
    CompanionAlreadyRunning {
        parent: String,
        companion: String,
        timestamp: DateTime<Utc>,
    },

    /// Same-named process found after the launch delay; not launched
    CompanionSkippedDuplicate {
        parent: String,
        companion: String,
        timestamp: DateTime<Utc>,
    },

    /// Parent went away while the start action was waiting
    CompanionLaunchAborted {
        parent: String,
        companion: String,
        timestamp: DateTime<Utc>,
    },

    /// Teardown of one instance is starting
    CompanionClosing {
        parent: String,
        companion: String,
        pid: u32,
        timestamp: DateTime<Utc>,
    },

    /// Teardown of one instance finished
    CompanionClosed {
        parent: String,
        companion: String,
        pid: u32,
        outcome: TerminationOutcome,
        timestamp: DateTime<Utc>,
    },

    /// External kill-by-name was issued as a last resort
    CompanionKillFallback {
        parent: String,
        companion: String,
        image: String,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Process creation failed
    LaunchFailed {
        parent: String,
        companion: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A supervision tick failed; the loop continues
    TickError {
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl SupervisorEvent {
    /// Parent this event belongs to, if any
    pub fn parent(&self) -> Option<&str> {
        match self {
            Self::ParentStarted { parent, .. }
            | Self::ParentStopped { parent, .. }
            | Self::CompanionDelayed { parent, .. }
            | Self::CompanionLaunching { parent, .. }
            | Self::CompanionAlreadyRunning { parent, .. }
            | Self::CompanionSkippedDuplicate { parent, .. }
            | Self::CompanionLaunchAborted { parent, .. }
            | Self::CompanionClosing { parent, .. }
            | Self::CompanionClosed { parent, .. }
            | Self::CompanionKillFallback { parent, .. }
            | Self::LaunchFailed { parent, .. } => Some(parent),
            Self::TickError { .. } => None,
        }
    }

    /// Companion label this event belongs to, if any
    pub fn companion(&self) -> Option<&str> {
        match self {
            Self::CompanionDelayed { companion, .. }
            | Self::CompanionLaunching { companion, .. }
            | Self::CompanionAlreadyRunning { companion, .. }
            | Self::CompanionSkippedDuplicate { companion, .. }
            | Self::CompanionLaunchAborted { companion, .. }
            | Self::CompanionClosing { companion, .. }
            | Self::CompanionClosed { companion, .. }
            | Self::CompanionKillFallback { companion, .. }
            | Self::LaunchFailed { companion, .. } => Some(companion),
            Self::ParentStarted { .. } | Self::ParentStopped { .. } | Self::TickError { .. } => {
                None
            }
        }
    }

    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::ParentStarted { timestamp, .. }
            | Self::ParentStopped { timestamp, .. }
            | Self::CompanionDelayed { timestamp, .. }
            | Self::CompanionLaunching { timestamp, .. }
            | Self::CompanionAlreadyRunning { timestamp, .. }
            | Self::CompanionSkippedDuplicate { timestamp, .. }
            | Self::CompanionLaunchAborted { timestamp, .. }
            | Self::CompanionClosing { timestamp, .. }
            | Self::CompanionClosed { timestamp, .. }
            | Self::CompanionKillFallback { timestamp, .. }
            | Self::LaunchFailed { timestamp, .. }
            | Self::TickError { timestamp, .. } => *timestamp,
        }
    }

    /// Stable event name, as used in structured logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::ParentStarted { .. } => "parentStarted",
            Self::ParentStopped { .. } => "parentStopped",
            Self::CompanionDelayed { .. } => "companionDelayed",
            Self::CompanionLaunching { .. } => "companionLaunching",
            Self::CompanionAlreadyRunning { .. } => "companionAlreadyRunning",
            Self::CompanionSkippedDuplicate { .. } => "companionSkippedDuplicate",
            Self::CompanionLaunchAborted { .. } => "companionLaunchAborted",
            Self::CompanionClosing { .. } => "companionClosing",
            Self::CompanionClosed { .. } => "companionClosed",
            Self::CompanionKillFallback { .. } => "companionKillFallback",
            Self::LaunchFailed { .. } => "launchFailed",
            Self::TickError { .. } => "tickError",
        }
    }

    /// Whether this event reports a failure
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::LaunchFailed { .. }
                | Self::TickError { .. }
                | Self::CompanionKillFallback { error: Some(_), .. }
        )
    }
}

impl fmt::Display for SupervisorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParentStarted { parent, timestamp } => {
                write!(f, "{parent} was started at {timestamp}")
            }
            Self::ParentStopped { parent, timestamp, .. } => {
                write!(f, "{parent} was closed at {timestamp}")
            }
            Self::CompanionDelayed {
                companion, delay, ..
            } => {
                write!(
                    f,
                    "Waiting {} seconds before starting {companion}",
                    delay.as_secs_f64()
                )
            }
            Self::CompanionLaunching {
                companion, command, ..
            } => write!(f, "Starting {companion}: running {command}"),
            Self::CompanionAlreadyRunning { companion, .. } => write!(
                f,
                "{companion} is already running, use the 'AlwaysRun' config key if this is intended"
            ),
            Self::CompanionSkippedDuplicate { companion, .. } => {
                write!(f, "{companion} is already running after delay")
            }
            Self::CompanionLaunchAborted {
                parent, companion, ..
            } => write!(
                f,
                "{parent} was closed while waiting for {companion} to start"
            ),
            Self::CompanionClosing { companion, pid, .. } => {
                write!(f, "Closing {companion} (pid {pid})")
            }
            Self::CompanionClosed {
                companion,
                pid,
                outcome,
                ..
            } => write!(f, "{companion} (pid {pid}): {outcome}"),
            Self::CompanionKillFallback {
                companion,
                image,
                error,
                ..
            } => match error {
                None => write!(f, "Force-killed every {image} for {companion}"),
                Some(error) => write!(f, "Could not force-kill {image} for {companion}: {error}"),
            },
            Self::LaunchFailed {
                companion, error, ..
            } => write!(f, "Failed to start {companion}: {error}"),
            Self::TickError { error, .. } => write!(f, "Exception in main loop: {error}"),
        }
    }
}

/// Receiver for supervision events.
///
/// Recording never fails from the caller's point of view; a sink that
/// cannot deliver an event drops it.
pub trait EventSink: Send + Sync {
    fn record(&self, event: SupervisorEvent);
}
