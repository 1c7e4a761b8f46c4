//! Forwards supervision events to `tracing`

use crate::event::{EventSink, SupervisorEvent};

/// Emits each event as a structured tracing record.
///
/// Failures log at `error`, fallbacks and skipped launches at `warn`,
/// everything else at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: SupervisorEvent) {
        let name = event.name();
        let parent = event.parent().unwrap_or_default();
        let companion = event.companion().unwrap_or_default();

        match &event {
            SupervisorEvent::LaunchFailed { .. }
            | SupervisorEvent::TickError { .. }
            | SupervisorEvent::CompanionKillFallback { error: Some(_), .. } => {
                tracing::error!(event = name, parent, companion, "{event}");
            }
            SupervisorEvent::CompanionKillFallback { .. }
            | SupervisorEvent::CompanionAlreadyRunning { .. }
            | SupervisorEvent::CompanionSkippedDuplicate { .. }
            | SupervisorEvent::CompanionLaunchAborted { .. } => {
                tracing::warn!(event = name, parent, companion, "{event}");
            }
            SupervisorEvent::CompanionClosing { pid, .. } => {
                tracing::info!(event = name, parent, companion, pid, "{event}");
            }
            SupervisorEvent::CompanionClosed { pid, outcome, .. } => {
                tracing::info!(
                    event = name,
                    parent,
                    companion,
                    pid,
                    outcome = %outcome,
                    "{event}"
                );
            }
            _ => {
                tracing::info!(event = name, parent, companion, "{event}");
            }
        }
    }
}
