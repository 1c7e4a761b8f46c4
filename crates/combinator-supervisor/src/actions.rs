//! Start and teardown actions
//!
//! The tick only decides; these actions do the slow work (launch delays,
//! the termination ladder) on their own tasks so one companion never holds
//! up another or the next tick.

use crate::ladder::TerminationLadder;
use chrono::Utc;
use combinator_core::{
    image_name, resolve_launch, CompanionSpec, EventSink, HostEnv, ProcessHandle, ProcessTable,
    Spawner, SupervisorEvent, TerminationOutcome,
};
use std::collections::HashSet;
use std::sync::Arc;

/// Collaborators shared by every action
#[derive(Clone)]
pub struct ActionContext {
    pub processes: Arc<dyn ProcessTable>,
    pub spawner: Arc<dyn Spawner>,
    pub host: Arc<dyn HostEnv>,
    pub events: Arc<dyn EventSink>,
    pub ladder: Arc<TerminationLadder>,
}

impl ActionContext {
    pub fn emit(&self, event: SupervisorEvent) {
        self.events.record(event);
    }

    /// Which of `names` are running, read on the blocking pool
    pub async fn running_among(&self, names: Vec<String>) -> HashSet<String> {
        let processes = Arc::clone(&self.processes);
        let scan = tokio::task::spawn_blocking(move || {
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            processes.running_among(&names)
        });
        match scan.await {
            Ok(running) => running,
            Err(e) => {
                tracing::warn!(error = %e, "process table scan failed");
                HashSet::new()
            }
        }
    }
}

/// How a start action ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartReport {
    Launched { pid: u32 },
    /// Parent disappeared during the launch delay
    ParentGone,
    /// Same-named process appeared during the launch delay
    Duplicate,
    Failed,
}

/// How a teardown action ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub pid: u32,
    /// `None` when the ladder itself failed
    pub outcome: Option<TerminationOutcome>,
    /// Whether the kill-by-name fallback ran
    pub fallback: bool,
}

/// Result of a dispatched action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionReport {
    Started(StartReport),
    TornDown(TeardownReport),
}

/// Launch one companion, optionally after its delay
#[derive(Debug, Clone)]
pub struct StartAction {
    parent: String,
    companion: CompanionSpec,
}

impl StartAction {
    pub fn new(parent: impl Into<String>, companion: CompanionSpec) -> Self {
        Self {
            parent: parent.into(),
            companion,
        }
    }

    pub async fn run(self, ctx: &ActionContext) -> StartReport {
        let label = self.companion.derived_name().to_string();

        if let Some(delay) = self.companion.launch_delay() {
            ctx.emit(SupervisorEvent::CompanionDelayed {
                parent: self.parent.clone(),
                companion: label.clone(),
                delay,
                timestamp: Utc::now(),
            });
            tokio::time::sleep(delay).await;

            let running = ctx
                .running_among(vec![self.parent.clone(), label.clone()])
                .await;
            if !running.contains(&self.parent) {
                ctx.emit(SupervisorEvent::CompanionLaunchAborted {
                    parent: self.parent,
                    companion: label,
                    timestamp: Utc::now(),
                });
                return StartReport::ParentGone;
            }
            if !self.companion.always_run && running.contains(&label) {
                ctx.emit(SupervisorEvent::CompanionSkippedDuplicate {
                    parent: self.parent,
                    companion: label,
                    timestamp: Utc::now(),
                });
                return StartReport::Duplicate;
            }
        }

        let launch = resolve_launch(&self.companion, ctx.host.as_ref());
        tracing::debug!(
            companion = %label,
            strategy = ?launch.strategy,
            work_dir = ?launch.work_dir,
            "resolved launch"
        );
        ctx.emit(SupervisorEvent::CompanionLaunching {
            parent: self.parent.clone(),
            companion: label.clone(),
            command: launch.to_string(),
            timestamp: Utc::now(),
        });

        match ctx.spawner.spawn(&launch) {
            Ok(pid) => {
                tracing::debug!(companion = %label, pid, "companion started");
                StartReport::Launched { pid }
            }
            Err(e) => {
                ctx.emit(SupervisorEvent::LaunchFailed {
                    parent: self.parent,
                    companion: label,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                StartReport::Failed
            }
        }
    }
}

/// Stop one running instance of a companion
pub struct TeardownAction {
    parent: String,
    companion: CompanionSpec,
    handle: Box<dyn ProcessHandle>,
}

impl TeardownAction {
    pub fn new(
        parent: impl Into<String>,
        companion: CompanionSpec,
        handle: Box<dyn ProcessHandle>,
    ) -> Self {
        Self {
            parent: parent.into(),
            companion,
            handle,
        }
    }

    pub fn pid(&self) -> u32 {
        self.handle.pid()
    }

    pub async fn run(self, ctx: &ActionContext) -> TeardownReport {
        let Self {
            parent,
            companion,
            handle,
        } = self;
        let label = companion.derived_name().to_string();
        let pid = handle.pid();

        ctx.emit(SupervisorEvent::CompanionClosing {
            parent: parent.clone(),
            companion: label.clone(),
            pid,
            timestamp: Utc::now(),
        });

        let outcome = match ctx.ladder.terminate(handle, &label).await {
            Ok(outcome) => {
                ctx.emit(SupervisorEvent::CompanionClosed {
                    parent: parent.clone(),
                    companion: label.clone(),
                    pid,
                    outcome,
                    timestamp: Utc::now(),
                });
                Some(outcome)
            }
            Err(e) => {
                tracing::warn!(companion = %label, pid, error = %e, "termination failed");
                None
            }
        };

        let fallback = !matches!(outcome, Some(outcome) if outcome.is_terminated());
        if fallback {
            let image = image_name(&companion, ctx.host.as_ref());
            let error = ctx
                .processes
                .kill_by_name(&image)
                .await
                .err()
                .map(|e| e.to_string());
            ctx.emit(SupervisorEvent::CompanionKillFallback {
                parent,
                companion: label,
                image,
                error,
                timestamp: Utc::now(),
            });
        }

        TeardownReport {
            pid,
            outcome,
            fallback,
        }
    }
}
