//! Launch strategy resolution
//!
//! Turns a [`CompanionSpec`] into a concrete [`LaunchDescriptor`] without
//! touching the process table. Scripts are wrapped in their interpreter:
//!
//! | extension      | shell execute | launched as                                        |
//! |----------------|---------------|----------------------------------------------------|
//! | `.ps1`         | any (forced off) | `pwsh -NoProfile -ExecutionPolicy Bypass -File <script> <args>` |
//! | `.bat`, `.cmd` | off           | `cmd /c <script> <args>`                           |
//! | anything else  | any           | `<program> <args>`                                 |

use crate::config::{file_name, CompanionSpec};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Environment variable that points at a preferred PowerShell 7 binary
pub const POWERSHELL_OVERRIDE_VAR: &str = "POWERSHELL7_PATH";

/// Interpreter flags placed before the script path
pub const POWERSHELL_FLAGS: [&str; 4] = ["-NoProfile", "-ExecutionPolicy", "Bypass", "-File"];

/// What the resolver needs to know about the host
pub trait HostEnv: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;
    fn exists(&self, path: &Path) -> bool;
    fn current_dir(&self) -> Option<PathBuf>;
    fn is_windows(&self) -> bool;
}

/// The real host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHost;

impl HostEnv for SystemHost {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn current_dir(&self) -> Option<PathBuf> {
        std::env::current_dir().ok()
    }

    fn is_windows(&self) -> bool {
        cfg!(windows)
    }
}

/// How the companion ends up being executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStrategy {
    /// The program itself
    Direct,
    /// The program, handed to the OS shell
    ShellDelegated,
    /// A PowerShell script run by `pwsh`
    PowerShell,
    /// A batch script run by `cmd /c`
    CommandScript,
}

/// Fully resolved invocation of a companion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchDescriptor {
    pub strategy: LaunchStrategy,
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub work_dir: Option<PathBuf>,
    /// Overrides layered over the inherited environment
    pub env: BTreeMap<String, String>,
    pub use_shell_execute: bool,
    pub create_no_window: bool,
}

impl fmt::Display for LaunchDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.executable.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Resolve how to launch a companion
pub fn resolve_launch(companion: &CompanionSpec, host: &dyn HostEnv) -> LaunchDescriptor {
    let expanded = expand_env(&companion.program_path, host);
    let program = absolutize(&expanded, host);
    let script = program.to_string_lossy().into_owned();

    let work_dir = companion
        .working_directory
        .clone()
        .or_else(|| parent_dir(&script));
    let env = companion.environment_overrides.clone().unwrap_or_default();

    let (strategy, executable, args, use_shell_execute) = match extension(&script).as_deref() {
        Some("ps1") => {
            let args: Vec<String> = POWERSHELL_FLAGS
                .iter()
                .map(ToString::to_string)
                .chain(std::iter::once(script.clone()))
                .chain(companion.arguments.iter().cloned())
                .collect();
            (LaunchStrategy::PowerShell, find_powershell(host), args, false)
        }
        Some("bat" | "cmd") if !companion.use_shell_execute => {
            let args: Vec<String> = ["/c".to_string(), script.clone()]
                .into_iter()
                .chain(companion.arguments.iter().cloned())
                .collect();
            (
                LaunchStrategy::CommandScript,
                command_interpreter(host),
                args,
                false,
            )
        }
        _ => {
            let strategy = if companion.use_shell_execute {
                LaunchStrategy::ShellDelegated
            } else {
                LaunchStrategy::Direct
            };
            (
                strategy,
                program,
                companion.arguments.clone(),
                companion.use_shell_execute,
            )
        }
    };

    LaunchDescriptor {
        strategy,
        executable,
        args,
        work_dir,
        env,
        use_shell_execute,
        create_no_window: companion.create_no_window,
    }
}

/// Executable file name as the OS reports it, e.g. `notepad.exe`.
///
/// This is what the kill-by-name fallback targets.
pub fn image_name(companion: &CompanionSpec, host: &dyn HostEnv) -> String {
    file_name(&expand_env(&companion.program_path, host)).to_string()
}

/// Expand `%VAR%`, `$VAR` and `${VAR}` references.
///
/// Unknown references are left as written.
pub fn expand_env(input: &str, host: &dyn HostEnv) -> String {
    let percent = expand_percent_vars(input, host);
    shellexpand::env_with_context_no_errors(&percent, |name| host.var(name)).into_owned()
}

fn expand_percent_vars(input: &str, host: &dyn HostEnv) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('%') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                if let Some(value) = host.var(name) {
                    out.push_str(&value);
                    rest = &after[end + 1..];
                } else {
                    // The closing '%' may open the next reference
                    out.push('%');
                    out.push_str(name);
                    rest = &after[end..];
                }
            }
            _ => {
                out.push('%');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Absolute paths pass through; relative ones resolve against the cwd
fn absolutize(path: &str, host: &dyn HostEnv) -> PathBuf {
    if looks_absolute(path) {
        return PathBuf::from(path);
    }
    match host.current_dir() {
        Some(cwd) => cwd.join(path),
        None => PathBuf::from(path),
    }
}

fn looks_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    let drive = bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && matches!(bytes[2], b'\\' | b'/');
    drive || path.starts_with(['/', '\\']) || Path::new(path).is_absolute()
}

fn parent_dir(path: &str) -> Option<PathBuf> {
    let idx = path.rfind(['/', '\\'])?;
    if idx == 0 {
        Some(PathBuf::from(&path[..1]))
    } else {
        Some(PathBuf::from(&path[..idx]))
    }
}

/// Lower-cased extension of the final path component
fn extension(path: &str) -> Option<String> {
    let file = file_name(path);
    match file.rfind('.') {
        Some(dot) if dot > 0 => Some(file[dot + 1..].to_ascii_lowercase()),
        _ => None,
    }
}

/// First PowerShell 7 install found, else the bare command name
fn find_powershell(host: &dyn HostEnv) -> PathBuf {
    let mut candidates = Vec::new();
    if let Some(program_files) = host.var("ProgramFiles") {
        let base = PathBuf::from(program_files).join("PowerShell");
        candidates.push(base.join("7").join("pwsh.exe"));
        candidates.push(base.join("7-preview").join("pwsh.exe"));
    }
    if let Some(local) = host.var("LOCALAPPDATA") {
        candidates.push(
            PathBuf::from(local)
                .join("Microsoft")
                .join("WindowsApps")
                .join("pwsh.exe"),
        );
    }
    if let Some(custom) = host.var(POWERSHELL_OVERRIDE_VAR).filter(|p| !p.is_empty()) {
        candidates.push(PathBuf::from(custom));
    }

    candidates
        .into_iter()
        .find(|candidate| host.exists(candidate))
        .unwrap_or_else(|| {
            PathBuf::from(if host.is_windows() { "pwsh.exe" } else { "pwsh" })
        })
}

fn command_interpreter(host: &dyn HostEnv) -> PathBuf {
    host.var("SystemRoot")
        .map(|root| PathBuf::from(root).join("System32").join("cmd.exe"))
        .filter(|path| host.exists(path))
        .unwrap_or_else(|| PathBuf::from("cmd.exe"))
}
