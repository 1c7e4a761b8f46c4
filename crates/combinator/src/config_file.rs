//! `ProcessCombinator.json` on disk

use anyhow::{Context, Result};
use combinator_core::{CompanionSpec, ParentSpec, SupervisionConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "ProcessCombinator.json";

/// Written next to the configuration file when `LogToFile` is set
pub const LOG_FILE_NAME: &str = "ProcessCombinator.log";

/// Supervision settings plus the keys only the binary cares about
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConfigFile {
    #[serde(flatten)]
    pub supervision: SupervisionConfig,

    /// Accepted for compatibility; the console is always left alone
    #[serde(default)]
    pub log_to_console: bool,

    #[serde(default)]
    pub log_to_file: bool,
}

/// What [`load`] found
#[derive(Debug)]
pub enum Loaded {
    /// No file existed; a sample was written at this path
    Created(PathBuf),
    Config(ConfigFile),
}

impl ConfigFile {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("invalid configuration")
    }

    /// Strip `.exe` from parent names and validate.
    ///
    /// Run after logging is up so the rewrite warnings are recorded.
    pub fn prepare(mut self) -> Result<SupervisionConfig> {
        self.supervision.normalize();
        self.supervision.validate()?;
        Ok(self.supervision)
    }

    /// Starter configuration: notepad follows wordpad
    pub fn sample() -> Self {
        let mut notepad = CompanionSpec::new(r"C:\Windows\System32\notepad.exe");
        notepad.working_directory = Some(PathBuf::from(r"C:\Windows\System32\"));
        notepad.arguments = vec![r"C:\Users\user\Desktop\test.txt".to_string()];
        notepad.keep_running = true;
        notepad.delay = Some(Duration::from_secs(1));
        notepad.use_shell_execute = true;
        notepad.create_no_window = true;
        notepad.always_run = true;

        Self {
            supervision: SupervisionConfig {
                parents: vec![ParentSpec {
                    name: "wordpad".to_string(),
                    grace_period: Some(Duration::from_secs(5)),
                    companions: vec![notepad],
                    enabled: true,
                }],
                poll_interval: Duration::from_secs(1),
                case_insensitive_match: false,
            },
            log_to_console: false,
            log_to_file: false,
        }
    }

    /// Where `LogToFile` output goes for a configuration at `config_path`
    pub fn log_path(config_path: &Path) -> PathBuf {
        config_path
            .parent()
            .map_or_else(|| PathBuf::from(LOG_FILE_NAME), |dir| dir.join(LOG_FILE_NAME))
    }
}

/// Read the configuration, writing a sample first if none exists
pub fn load(path: &Path) -> Result<Loaded> {
    if !path.exists() {
        let json = serde_json::to_string_pretty(&ConfigFile::sample())?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        return Ok(Loaded::Created(path.to_path_buf()));
    }

    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file = ConfigFile::from_json(&json)
        .with_context(|| format!("error loading configuration {}", path.display()))?;
    Ok(Loaded::Config(file))
}
