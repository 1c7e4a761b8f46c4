//! Error types shared by the core and the supervisor

use std::path::PathBuf;
use thiserror::Error;

/// Configuration could not be parsed or failed validation
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid duration '{value}': {reason}")]
    Duration { value: String, reason: String },

    #[error("check interval must be greater than zero")]
    ZeroPollInterval,

    #[error("process name must not be empty (parent #{index})")]
    EmptyParentName { index: usize },

    #[error("program path must not be empty ({parent}, companion #{index})")]
    EmptyProgramPath { parent: String, index: usize },
}

/// Enumerating the OS process table failed
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("process table unavailable: {0}")]
    Unavailable(String),
}

/// A companion process could not be created
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to start {}: {source}", executable.display())]
    Spawn {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no tokio runtime available to own the child process")]
    NoRuntime,
}

/// A call on a single process handle failed
#[derive(Debug, Error)]
pub enum HandleError {
    /// The process is gone (exited, reaped, or its pid was reused)
    #[error("process {pid} has already exited")]
    Exited { pid: u32 },

    #[error("signal {signal} is not supported on this platform")]
    Unsupported { signal: &'static str },

    #[error("os call on process {pid} failed: {reason}")]
    Os { pid: u32, reason: String },
}

/// The kill-by-name fallback failed
#[derive(Debug, Error)]
pub enum KillError {
    #[error("failed to run {utility}: {source}")]
    Spawn {
        utility: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{utility} exited with {status}")]
    Status {
        utility: &'static str,
        status: std::process::ExitStatus,
    },

    #[error(transparent)]
    Table(#[from] ProbeError),

    /// Some matching processes did not accept the kill
    #[error("could not kill {image} (pids {pids:?})")]
    Refused { image: String, pids: Vec<u32> },
}
