//! Supervision configuration
//!
//! Parents are the processes being watched; each parent owns an ordered list
//! of companions that run while it is alive. The JSON shape matches the
//! `ProcessCombinator.json` files written by earlier releases.

use crate::duration;
use crate::error::ConfigError;
use crate::probe::bare_process_name;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Process-wide supervision settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SupervisionConfig {
    /// Parents in evaluation order
    #[serde(rename = "Processes")]
    pub parents: Vec<ParentSpec>,

    /// Time between supervision ticks
    #[serde(
        rename = "CheckInterval",
        default = "default_poll_interval",
        with = "duration"
    )]
    pub poll_interval: Duration,

    /// Ignore case when matching process names
    #[serde(rename = "CaseInsensitive", default)]
    pub case_insensitive_match: bool,
}

/// A watched process and the companions that follow its lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParentSpec {
    /// Bare process name (no `.exe`)
    #[serde(rename = "ProcessName")]
    pub name: String,

    /// How long the parent may be missing before companions are stopped.
    /// `None` means companions are never stopped.
    #[serde(default = "default_grace_period", with = "duration::option")]
    pub grace_period: Option<Duration>,

    #[serde(rename = "SubPrograms")]
    pub companions: Vec<CompanionSpec>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// A program started while its parent runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompanionSpec {
    /// Executable or script; may reference environment variables
    pub program_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,

    #[serde(default)]
    pub arguments: Vec<String>,

    /// Extra variables layered over the inherited environment
    #[serde(
        rename = "EnvironmentVariables",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub environment_overrides: Option<BTreeMap<String, String>>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Leave running when the parent goes away
    #[serde(default)]
    pub keep_running: bool,

    /// Launch even if a process with the same name already runs
    #[serde(default)]
    pub always_run: bool,

    #[serde(
        default,
        with = "duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub delay: Option<Duration>,

    #[serde(default)]
    pub use_shell_execute: bool,

    #[serde(default)]
    pub create_no_window: bool,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

#[allow(clippy::unnecessary_wraps)]
fn default_grace_period() -> Option<Duration> {
    Some(Duration::from_secs(5))
}

const fn default_enabled() -> bool {
    true
}

impl SupervisionConfig {
    /// Parse, normalize and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(json)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Strip executable suffixes from parent names.
    ///
    /// The process table matches bare process names, so `notepad.exe` would never
    /// be found. Returns the names that were rewritten.
    pub fn normalize(&mut self) -> Vec<String> {
        let mut rewritten = Vec::new();
        for parent in &mut self.parents {
            let bare = bare_process_name(&parent.name);
            if bare.len() != parent.name.len() {
                tracing::warn!(
                    process = %parent.name,
                    "process name ends with '.exe', removing extension for process detection"
                );
                rewritten.push(parent.name.clone());
                parent.name = bare.to_string();
            }
        }
        rewritten
    }

    /// Reject configurations the supervisor cannot act on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        for (index, parent) in self.parents.iter().enumerate() {
            if parent.name.trim().is_empty() {
                return Err(ConfigError::EmptyParentName { index: index + 1 });
            }
            for (sub, companion) in parent.companions.iter().enumerate() {
                if companion.program_path.trim().is_empty() {
                    return Err(ConfigError::EmptyProgramPath {
                        parent: parent.name.clone(),
                        index: sub + 1,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn enabled_parents(&self) -> impl Iterator<Item = &ParentSpec> {
        self.parents.iter().filter(|p| p.enabled)
    }
}

impl ParentSpec {
    pub fn enabled_companions(&self) -> impl Iterator<Item = &CompanionSpec> {
        self.companions.iter().filter(|c| c.enabled)
    }
}

impl CompanionSpec {
    /// Create a companion with every option at its default
    pub fn new(program_path: impl Into<String>) -> Self {
        Self {
            program_path: program_path.into(),
            working_directory: None,
            arguments: Vec::new(),
            environment_overrides: None,
            enabled: true,
            keep_running: false,
            always_run: false,
            delay: None,
            use_shell_execute: false,
            create_no_window: false,
        }
    }

    /// File name without directory or extension.
    ///
    /// Used as the process identity for duplicate detection and teardown,
    /// and as the log label. Both `/` and `\` separate path components so
    /// Windows-style paths produce the same name on every host.
    pub fn derived_name(&self) -> &str {
        let file = file_name(&self.program_path);
        match file.rfind('.') {
            Some(dot) if dot > 0 => &file[..dot],
            _ => file,
        }
    }

    /// Positive launch delay, if any
    pub fn launch_delay(&self) -> Option<Duration> {
        self.delay.filter(|d| !d.is_zero())
    }
}

/// Last path component, treating both separators alike
pub(crate) fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
