//! Process probe: name-based queries against the OS process table
//!
//! The supervisor only ever asks three things of the platform's process
//! table: is anything with this name running, give me handles to every
//! instance with this name, and kill everything with this name out of band.

use crate::error::{HandleError, KillError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// How process names are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MatchMode {
    #[default]
    Exact,
    CaseInsensitive,
}

impl MatchMode {
    pub fn from_case_insensitive(case_insensitive: bool) -> Self {
        if case_insensitive {
            Self::CaseInsensitive
        } else {
            Self::Exact
        }
    }

    /// Compare an OS-reported process name against a configured name
    pub fn matches(self, os_name: &str, wanted: &str) -> bool {
        let os_name = bare_process_name(os_name);
        match self {
            Self::Exact => os_name == wanted,
            Self::CaseInsensitive => {
                os_name.eq_ignore_ascii_case(wanted)
                    || os_name.to_lowercase() == wanted.to_lowercase()
            }
        }
    }
}

/// Strip a trailing `.exe` (any case) from a process or file name
pub fn bare_process_name(name: &str) -> &str {
    let len = name.len();
    if len > 4 && name.is_char_boundary(len - 4) && name[len - 4..].eq_ignore_ascii_case(".exe") {
        &name[..len - 4]
    } else {
        name
    }
}

/// Final state of a termination attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminationOutcome {
    /// Exited after its main window was asked to close
    ClosedGracefully,
    /// Exited after an OS-level close request
    ClosedForcibly,
    /// Exited after a forceful kill
    Killed,
    /// Still alive after every step
    GaveUp,
    /// Already gone before (or while) the ladder acted on it
    AlreadyExited,
}

impl TerminationOutcome {
    /// Whether the process is known to be gone
    pub fn is_terminated(self) -> bool {
        !matches!(self, Self::GaveUp)
    }
}

impl fmt::Display for TerminationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::ClosedGracefully => "closed gracefully",
            Self::ClosedForcibly => "closed forcibly",
            Self::Killed => "killed",
            Self::GaveUp => "gave up",
            Self::AlreadyExited => "already exited",
        };
        f.write_str(text)
    }
}

/// One running process instance.
///
/// Handles are owned by exactly one teardown action; dropping the handle
/// releases whatever OS resources it holds.
#[async_trait]
pub trait ProcessHandle: Send {
    fn pid(&self) -> u32;

    /// Whether a graceful close request (the main-window close) can be sent
    fn has_main_window(&self) -> bool;

    async fn has_exited(&mut self) -> Result<bool, HandleError>;

    /// Ask the main window to close. `Ok(false)` means the request could
    /// not be delivered.
    async fn close_main_window(&mut self) -> Result<bool, HandleError>;

    /// OS-level terminate request
    async fn request_close(&mut self) -> Result<(), HandleError>;

    /// Forceful kill
    async fn kill(&mut self) -> Result<(), HandleError>;

    /// Wait up to `timeout` for the process to exit; `Ok(true)` if it did
    async fn wait_for_exit(&mut self, timeout: Duration) -> Result<bool, HandleError>;
}

/// Name-based view of the OS process table
#[async_trait]
pub trait ProcessTable: Send + Sync {
    /// Whether any process with this name is running.
    ///
    /// Never fails: enumeration errors read as "not running".
    fn is_running(&self, name: &str) -> bool;

    /// The subset of `names` that is running, answered from one scan of
    /// the table where the platform allows it
    fn running_among(&self, names: &[&str]) -> HashSet<String> {
        names
            .iter()
            .filter(|name| self.is_running(name))
            .map(|name| (*name).to_string())
            .collect()
    }

    /// Handles for every running instance with this name.
    ///
    /// Enumeration errors yield an empty list.
    fn find_by_name(&self, name: &str) -> Vec<Box<dyn ProcessHandle>>;

    /// Out-of-band force kill of every process with this image name.
    /// Finding no such process is not an error.
    async fn kill_by_name(&self, image_name: &str) -> Result<(), KillError>;
}
