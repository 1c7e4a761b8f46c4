//! Process table and handles backed by the host OS (via `sysinfo`)
//!
//! Signal mapping for the termination ladder:
//! - main-window close: `WM_CLOSE` through `taskkill /pid` on Windows,
//!   `SIGHUP` elsewhere where available; otherwise no main window
//! - close request: `WM_CLOSE` to the whole process tree on Windows,
//!   `SIGTERM` elsewhere where available, otherwise a no-op
//! - kill: `SIGKILL` / `TerminateProcess`
//!
//! Linux reports at most 15 bytes of a process name, so a name cut at that
//! length is also compared against the executable's file name. Thread
//! entries in the table are never matched.

use crate::error::{HandleError, KillError, ProbeError};
use crate::probe::{bare_process_name, MatchMode, ProcessHandle, ProcessTable};
use async_trait::async_trait;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;
use sysinfo::{
    Pid, Process, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, Signal, System,
    UpdateKind,
};
use tokio::time::Instant;

/// How often a waiting handle re-reads the process table
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Length at which Linux truncates a process name (`TASK_COMM_LEN - 1`)
const TRUNCATED_NAME_LEN: usize = 15;

#[cfg(windows)]
const TASKKILL: &str = "taskkill";

/// Process table of the local host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessTable {
    mode: MatchMode,
}

impl SystemProcessTable {
    pub fn new(mode: MatchMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Fresh snapshot of every process; dropped (and released) by the caller
    fn snapshot() -> Result<System, ProbeError> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(ProbeError::Unavailable(
                "process enumeration is not supported on this platform".to_string(),
            ));
        }

        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_exe(UpdateKind::OnlyIfNotSet),
        );

        // We can always see ourselves; an empty table means we saw nothing
        if system.processes().is_empty() {
            return Err(ProbeError::Unavailable(
                "no processes visible".to_string(),
            ));
        }
        Ok(system)
    }

    /// Whether `process` is a live process (not a thread) named `wanted`
    fn process_matches(&self, process: &Process, wanted: &str) -> bool {
        if process.thread_kind().is_some()
            || matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
        {
            return false;
        }

        let name = process.name().to_string_lossy();
        if self.mode.matches(&name, wanted) {
            return true;
        }
        name.len() >= TRUNCATED_NAME_LEN
            && process
                .exe()
                .and_then(Path::file_name)
                .map(|exe| exe.to_string_lossy())
                .is_some_and(|exe| exe.starts_with(&*name) && self.mode.matches(&exe, wanted))
    }

    fn matching<'a>(
        &'a self,
        system: &'a System,
        name: &'a str,
    ) -> impl Iterator<Item = (&'a Pid, &'a Process)> + 'a {
        system
            .processes()
            .iter()
            .filter(move |(_, process)| self.process_matches(process, name))
    }

    /// SIGKILL every process matching `image_name` found in one snapshot
    #[cfg_attr(windows, allow(dead_code))]
    fn kill_matching(&self, image_name: &str) -> Result<(), KillError> {
        let system = Self::snapshot()?;
        let refused: Vec<u32> = self
            .matching(&system, bare_process_name(image_name))
            .filter(|(_, process)| !process.kill())
            .map(|(pid, _)| pid.as_u32())
            .collect();

        if refused.is_empty() {
            Ok(())
        } else {
            Err(KillError::Refused {
                image: image_name.to_string(),
                pids: refused,
            })
        }
    }
}

#[async_trait]
impl ProcessTable for SystemProcessTable {
    fn is_running(&self, name: &str) -> bool {
        match Self::snapshot() {
            Ok(system) => self.matching(&system, name).next().is_some(),
            Err(e) => {
                tracing::debug!(process = name, error = %e, "process table unreadable, treating as not running");
                false
            }
        }
    }

    fn running_among(&self, names: &[&str]) -> HashSet<String> {
        match Self::snapshot() {
            Ok(system) => names
                .iter()
                .filter(|name| self.matching(&system, name).next().is_some())
                .map(|name| (*name).to_string())
                .collect(),
            Err(e) => {
                tracing::debug!(error = %e, "process table unreadable, treating all as not running");
                HashSet::new()
            }
        }
    }

    fn find_by_name(&self, name: &str) -> Vec<Box<dyn ProcessHandle>> {
        match Self::snapshot() {
            Ok(system) => self
                .matching(&system, name)
                .map(|(pid, process)| {
                    Box::new(SystemProcessHandle::new(*pid, process.name().to_os_string())) as _
                })
                .collect(),
            Err(e) => {
                tracing::warn!(process = name, error = %e, "could not enumerate processes");
                Vec::new()
            }
        }
    }

    #[cfg(windows)]
    async fn kill_by_name(&self, image_name: &str) -> Result<(), KillError> {
        let status = taskkill(&["/f", "/im", image_name])
            .await
            .map_err(|source| KillError::Spawn {
                utility: TASKKILL,
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(KillError::Status {
                utility: TASKKILL,
                status,
            })
        }
    }

    #[cfg(not(windows))]
    async fn kill_by_name(&self, image_name: &str) -> Result<(), KillError> {
        let table = *self;
        let image = image_name.to_string();
        tokio::task::spawn_blocking(move || table.kill_matching(&image))
            .await
            .map_err(|e| ProbeError::Unavailable(e.to_string()))?
    }
}

/// Run `taskkill` without a console window
#[cfg(windows)]
async fn taskkill(args: &[&str]) -> std::io::Result<std::process::ExitStatus> {
    use std::process::Stdio;

    tokio::process::Command::new(TASKKILL)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .creation_flags(crate::spawn::CREATE_NO_WINDOW)
        .status()
        .await
}

/// A single process on the local host, tracked by pid and name.
///
/// The name guards against pid reuse: a pid that now belongs to a
/// differently named process counts as exited.
pub struct SystemProcessHandle {
    pid: Pid,
    name: OsString,
    system: System,
}

impl SystemProcessHandle {
    pub fn new(pid: Pid, name: OsString) -> Self {
        Self {
            pid,
            name,
            system: System::new(),
        }
    }

    fn refresh(&mut self) -> bool {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing(),
        );
        match self.system.process(self.pid) {
            None => false,
            Some(process) => {
                process.name() == self.name
                    && !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
            }
        }
    }

    fn send(&mut self, signal: Signal, label: &'static str) -> Result<(), HandleError> {
        let pid = self.pid.as_u32();
        if !self.refresh() {
            return Err(HandleError::Exited { pid });
        }
        let process = self
            .system
            .process(self.pid)
            .ok_or(HandleError::Exited { pid })?;

        match process.kill_with(signal) {
            Some(true) => Ok(()),
            None => Err(HandleError::Unsupported { signal: label }),
            Some(false) if !self.refresh() => Err(HandleError::Exited { pid }),
            Some(false) => Err(HandleError::Os {
                pid,
                reason: format!("{label} was not delivered"),
            }),
        }
    }

    /// Post `WM_CLOSE` to the process's windows (and its children's with
    /// `tree`). `Ok(false)` when `taskkill` found nothing to close.
    #[cfg(windows)]
    async fn post_close(&mut self, tree: bool) -> Result<bool, HandleError> {
        let pid = self.pid.as_u32();
        if !self.refresh() {
            return Err(HandleError::Exited { pid });
        }

        let pid_arg = pid.to_string();
        let mut args = vec!["/pid", pid_arg.as_str()];
        if tree {
            args.push("/t");
        }
        let status = taskkill(&args).await.map_err(|e| HandleError::Os {
            pid,
            reason: format!("{TASKKILL}: {e}"),
        })?;

        if !status.success() && !self.refresh() {
            return Err(HandleError::Exited { pid });
        }
        Ok(status.success())
    }
}

#[async_trait]
impl ProcessHandle for SystemProcessHandle {
    fn pid(&self) -> u32 {
        self.pid.as_u32()
    }

    /// Windows answers this when the close is posted, so every process
    /// qualifies there
    fn has_main_window(&self) -> bool {
        cfg!(windows) || sysinfo::SUPPORTED_SIGNALS.contains(&Signal::Hangup)
    }

    async fn has_exited(&mut self) -> Result<bool, HandleError> {
        Ok(!self.refresh())
    }

    #[cfg(windows)]
    async fn close_main_window(&mut self) -> Result<bool, HandleError> {
        self.post_close(false).await
    }

    #[cfg(not(windows))]
    async fn close_main_window(&mut self) -> Result<bool, HandleError> {
        if !self.has_main_window() {
            return Ok(false);
        }
        match self.send(Signal::Hangup, "SIGHUP") {
            Ok(()) => Ok(true),
            Err(HandleError::Unsupported { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[cfg(windows)]
    async fn request_close(&mut self) -> Result<(), HandleError> {
        if !self.post_close(true).await? {
            tracing::debug!(pid = self.pid(), "no window accepted the close request");
        }
        Ok(())
    }

    #[cfg(not(windows))]
    async fn request_close(&mut self) -> Result<(), HandleError> {
        match self.send(Signal::Term, "SIGTERM") {
            Err(HandleError::Unsupported { .. }) => {
                tracing::debug!(pid = self.pid(), "no terminate request on this platform");
                Ok(())
            }
            other => other,
        }
    }

    async fn kill(&mut self) -> Result<(), HandleError> {
        self.send(Signal::Kill, "SIGKILL")
    }

    async fn wait_for_exit(&mut self, timeout: Duration) -> Result<bool, HandleError> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.refresh() {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}
