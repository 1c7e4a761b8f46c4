//! Supervision loop
//!
//! Each tick reads the process table once for every watched name, feeds
//! each parent's result through the presence tracker and dispatches start
//! or teardown actions on edges. Actions run on their own tasks; the tick
//! never waits for them.

use crate::actions::{ActionContext, ActionReport, StartAction, TeardownAction};
use crate::ladder::TerminationLadder;
use chrono::Utc;
use combinator_core::{
    EventSink, MatchMode, Observation, ParentSpec, PresenceTracker, ProcessSpawner,
    SupervisionConfig, SupervisorEvent, SystemHost, SystemProcessTable,
};
use futures::future::join_all;
use std::any::Any;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// How long shutdown waits for in-flight actions
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Kind of work a tick handed off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Start,
    Teardown { pid: u32 },
}

/// An action dispatched by a tick
#[derive(Debug)]
pub struct Dispatched {
    pub parent: String,
    pub companion: String,
    pub kind: ActionKind,
    pub handle: JoinHandle<ActionReport>,
}

/// Owns the configuration, the presence tracker and the collaborators
pub struct Supervisor {
    config: SupervisionConfig,
    presence: PresenceTracker,
    ctx: ActionContext,
}

impl Supervisor {
    pub fn new(config: SupervisionConfig, ctx: ActionContext) -> Self {
        Self {
            config,
            presence: PresenceTracker::new(),
            ctx,
        }
    }

    /// Supervisor backed by the real process table, spawner and host
    pub fn with_system(config: SupervisionConfig, events: Arc<dyn EventSink>) -> Self {
        let mode = MatchMode::from_case_insensitive(config.case_insensitive_match);
        let ctx = ActionContext {
            processes: Arc::new(SystemProcessTable::new(mode)),
            spawner: Arc::new(ProcessSpawner),
            host: Arc::new(SystemHost),
            events,
            ladder: Arc::new(TerminationLadder::default()),
        };
        Self::new(config, ctx)
    }

    pub fn config(&self) -> &SupervisionConfig {
        &self.config
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Parent and companion names a tick needs the running state of
    pub fn watched_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for parent in self.config.enabled_parents() {
            names.push(parent.name.clone());
            names.extend(
                parent
                    .enabled_companions()
                    .map(|companion| companion.derived_name().to_string()),
            );
        }
        names.sort();
        names.dedup();
        names
    }

    /// Evaluate every enabled parent once against a fresh scan.
    ///
    /// Must be called from within a tokio runtime.
    pub fn tick(&mut self, now: Instant) -> Vec<Dispatched> {
        let names = self.watched_names();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let running = self.ctx.processes.running_among(&names);
        self.tick_with(now, &running)
    }

    /// Evaluate every enabled parent once, given the names found running
    pub fn tick_with(&mut self, now: Instant, running: &HashSet<String>) -> Vec<Dispatched> {
        let mut dispatched = Vec::new();

        for parent in self.config.enabled_parents() {
            let present = running.contains(&parent.name);
            match self
                .presence
                .observe(&parent.name, present, now, parent.grace_period)
            {
                Observation::Appeared => {
                    self.ctx.emit(SupervisorEvent::ParentStarted {
                        parent: parent.name.clone(),
                        timestamp: Utc::now(),
                    });
                    dispatch_starts(&self.ctx, parent, running, &mut dispatched);
                }
                Observation::Vanished { missing_for } => {
                    self.ctx.emit(SupervisorEvent::ParentStopped {
                        parent: parent.name.clone(),
                        missing_for,
                        timestamp: Utc::now(),
                    });
                    dispatch_teardowns(&self.ctx, parent, &mut dispatched);
                }
                Observation::Graced { missing_for } => {
                    tracing::trace!(parent = %parent.name, ?missing_for, "parent missing, within grace");
                }
                Observation::Refreshed | Observation::Idle => {}
            }
        }

        dispatched
    }

    /// Tick on the configured interval until `shutdown` is cancelled.
    ///
    /// The process table is read on the blocking pool. A scan or tick that
    /// panics is reported as a `tickError` event and the loop carries on. On shutdown, in-flight actions get [`SHUTDOWN_GRACE`]
    /// to finish.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let period = self.config.poll_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            parents = self.config.parents.len(),
            interval = ?period,
            "supervision started"
        );

        let mut in_flight: Vec<JoinHandle<ActionReport>> = Vec::new();
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let now = tokio::time::Instant::now().into_std();
                    in_flight.retain(|handle| !handle.is_finished());
                    match self.scan().await {
                        Ok(running) => in_flight
                            .extend(self.guarded_tick(now, &running).into_iter().map(|d| d.handle)),
                        Err(error) => self.tick_failed(error),
                    }
                }
            }
        }

        if !in_flight.is_empty() {
            tracing::info!(pending = in_flight.len(), "waiting for in-flight actions");
            if tokio::time::timeout(SHUTDOWN_GRACE, join_all(in_flight))
                .await
                .is_err()
            {
                tracing::warn!("in-flight actions still running at shutdown");
            }
        }
        tracing::info!("supervision stopped");
    }

    async fn scan(&self) -> Result<HashSet<String>, String> {
        let names = self.watched_names();
        let processes = Arc::clone(&self.ctx.processes);
        tokio::task::spawn_blocking(move || {
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            processes.running_among(&names)
        })
        .await
        .map_err(|e| {
            if e.is_panic() {
                panic_message(e.into_panic().as_ref())
            } else {
                e.to_string()
            }
        })
    }

    fn guarded_tick(&mut self, now: Instant, running: &HashSet<String>) -> Vec<Dispatched> {
        match catch_unwind(AssertUnwindSafe(|| self.tick_with(now, running))) {
            Ok(dispatched) => dispatched,
            Err(payload) => {
                self.tick_failed(panic_message(payload.as_ref()));
                Vec::new()
            }
        }
    }

    fn tick_failed(&self, error: String) {
        self.ctx.emit(SupervisorEvent::TickError {
            error,
            timestamp: Utc::now(),
        });
    }
}

fn dispatch_starts(
    ctx: &ActionContext,
    parent: &ParentSpec,
    running: &HashSet<String>,
    out: &mut Vec<Dispatched>,
) {
    for companion in parent.enabled_companions() {
        let label = companion.derived_name().to_string();

        if !companion.always_run && running.contains(&label) {
            ctx.emit(SupervisorEvent::CompanionAlreadyRunning {
                parent: parent.name.clone(),
                companion: label,
                timestamp: Utc::now(),
            });
            continue;
        }

        let action = StartAction::new(parent.name.clone(), companion.clone());
        let task_ctx = ctx.clone();
        let handle =
            tokio::spawn(async move { ActionReport::Started(action.run(&task_ctx).await) });
        out.push(Dispatched {
            parent: parent.name.clone(),
            companion: label,
            kind: ActionKind::Start,
            handle,
        });
    }
}

fn dispatch_teardowns(ctx: &ActionContext, parent: &ParentSpec, out: &mut Vec<Dispatched>) {
    for companion in parent.enabled_companions().filter(|c| !c.keep_running) {
        let label = companion.derived_name().to_string();

        for process in ctx.processes.find_by_name(&label) {
            let action = TeardownAction::new(parent.name.clone(), companion.clone(), process);
            let pid = action.pid();
            let task_ctx = ctx.clone();
            let handle =
                tokio::spawn(async move { ActionReport::TornDown(action.run(&task_ctx).await) });
            out.push(Dispatched {
                parent: parent.name.clone(),
                companion: label.clone(),
                kind: ActionKind::Teardown { pid },
                handle,
            });
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "tick panicked".to_string()
    }
}
