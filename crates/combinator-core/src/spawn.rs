//! Child process creation

use crate::error::LaunchError;
use crate::launch::LaunchDescriptor;
use std::process::Stdio;
use tokio::process::Command;

/// `CREATE_NO_WINDOW` process creation flag
#[cfg(windows)]
pub const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Creates companion processes from resolved launch descriptors
pub trait Spawner: Send + Sync {
    /// Start the process and return its pid. The child is not waited on.
    fn spawn(&self, launch: &LaunchDescriptor) -> Result<u32, LaunchError>;
}

/// Spawns real OS processes.
///
/// Children are detached from the supervisor's lifetime: they keep running
/// when their handle is dropped and the tokio runtime reaps them on exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSpawner;

impl Spawner for ProcessSpawner {
    fn spawn(&self, launch: &LaunchDescriptor) -> Result<u32, LaunchError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(LaunchError::NoRuntime);
        }

        let child = build_command(launch)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                executable: launch.executable.clone(),
                source,
            })?;
        Ok(child.id().unwrap_or_default())
    }
}

fn build_command(launch: &LaunchDescriptor) -> Command {
    #[cfg(windows)]
    let mut command = if launch.use_shell_execute {
        // `start` resolves file associations the way the shell does
        let mut command = Command::new("cmd.exe");
        command.args(["/C", "start", ""]).arg(&launch.executable);
        command
    } else {
        Command::new(&launch.executable)
    };
    #[cfg(not(windows))]
    let mut command = Command::new(&launch.executable);

    command
        .args(&launch.args)
        .envs(&launch.env)
        .stdin(Stdio::null())
        .kill_on_drop(false);

    if let Some(dir) = &launch.work_dir {
        command.current_dir(dir);
    }

    #[cfg(windows)]
    if launch.create_no_window {
        command.creation_flags(CREATE_NO_WINDOW);
    }

    command
}
