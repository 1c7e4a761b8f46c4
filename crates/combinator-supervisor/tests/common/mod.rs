//! Scripted process world shared by the supervisor tests

#![allow(dead_code)]

use async_trait::async_trait;
use combinator_core::{
    HandleError, HostEnv, KillError, LaunchDescriptor, LaunchError, MemorySink, ProcessHandle,
    ProcessTable, Spawner, SupervisionConfig,
};
use combinator_supervisor::{ActionContext, TerminationLadder};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// How a scripted process reacts to the termination ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    ExitsOnWindowClose,
    ExitsOnCloseRequest,
    ExitsOnKill,
    Unkillable,
    FailsCloseRequest,
    VanishesOnCloseRequest,
}

#[derive(Debug)]
struct Process {
    pid: u32,
    name: String,
    alive: bool,
    window: bool,
    behavior: Behavior,
    calls: Vec<&'static str>,
    released: bool,
}

#[derive(Debug, Default)]
struct State {
    next_pid: u32,
    processes: Vec<Process>,
    spawned: Vec<LaunchDescriptor>,
    killed_by_name: Vec<String>,
    fail_spawns: bool,
    fail_kill_by_name: bool,
    fail_next_lookup: bool,
    scans: usize,
    lookups: usize,
}

/// A fake OS: process table, spawner and handles over one shared state
#[derive(Debug, Clone, Default)]
pub struct World {
    state: Arc<Mutex<State>>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Start a process that closes when its window is closed
    pub fn start(&self, name: &str) -> u32 {
        self.start_with(name, Behavior::ExitsOnWindowClose, true)
    }

    pub fn start_with(&self, name: &str, behavior: Behavior, window: bool) -> u32 {
        let mut state = self.lock();
        state.next_pid += 1;
        let pid = 1000 + state.next_pid;
        state.processes.push(Process {
            pid,
            name: name.to_string(),
            alive: true,
            window,
            behavior,
            calls: Vec::new(),
            released: false,
        });
        pid
    }

    /// Every process with this name exits
    pub fn stop(&self, name: &str) {
        for process in self.lock().processes.iter_mut().filter(|p| p.name == name) {
            process.alive = false;
        }
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.lock()
            .processes
            .iter()
            .any(|p| p.pid == pid && p.alive)
    }

    pub fn running(&self, name: &str) -> usize {
        self.lock()
            .processes
            .iter()
            .filter(|p| p.alive && p.name == name)
            .count()
    }

    pub fn spawned(&self) -> Vec<LaunchDescriptor> {
        self.lock().spawned.clone()
    }

    pub fn killed_by_name(&self) -> Vec<String> {
        self.lock().killed_by_name.clone()
    }

    pub fn calls(&self, pid: u32) -> Vec<&'static str> {
        self.lock()
            .processes
            .iter()
            .find(|p| p.pid == pid)
            .map(|p| p.calls.clone())
            .unwrap_or_default()
    }

    pub fn released(&self, pid: u32) -> bool {
        self.lock()
            .processes
            .iter()
            .any(|p| p.pid == pid && p.released)
    }

    pub fn fail_spawns(&self) {
        self.lock().fail_spawns = true;
    }

    pub fn fail_kill_by_name(&self) {
        self.lock().fail_kill_by_name = true;
    }

    /// The next table lookup panics, as a broken OS query would
    pub fn fail_next_lookup(&self) {
        self.lock().fail_next_lookup = true;
    }

    /// Whole-table scans served so far
    pub fn scans(&self) -> usize {
        self.lock().scans
    }

    /// Single-name lookups served so far
    pub fn lookups(&self) -> usize {
        self.lock().lookups
    }

    fn lookup(&self, scan: bool) {
        // Take the flag before panicking so the mutex is not poisoned
        let fail = {
            let mut state = self.lock();
            if scan {
                state.scans += 1;
            } else {
                state.lookups += 1;
            }
            std::mem::take(&mut state.fail_next_lookup)
        };
        if fail {
            panic!("process table lookup failed");
        }
    }

    /// Handle for a process, as the table would hand it out
    pub fn handle(&self, pid: u32) -> Box<dyn ProcessHandle> {
        Box::new(MockHandle {
            pid,
            world: self.clone(),
        })
    }

    fn with_process<T>(&self, pid: u32, f: impl FnOnce(&mut Process) -> T) -> Option<T> {
        self.lock().processes.iter_mut().find(|p| p.pid == pid).map(f)
    }

    fn record(&self, pid: u32, call: &'static str) -> Option<(bool, Behavior)> {
        self.with_process(pid, |p| {
            p.calls.push(call);
            (p.alive, p.behavior)
        })
    }

    fn exit(&self, pid: u32) {
        self.with_process(pid, |p| p.alive = false);
    }
}

pub struct MockHandle {
    pid: u32,
    world: World,
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.world.with_process(self.pid, |p| p.released = true);
    }
}

#[async_trait]
impl ProcessHandle for MockHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn has_main_window(&self) -> bool {
        self.world
            .with_process(self.pid, |p| p.window)
            .unwrap_or(false)
    }

    async fn has_exited(&mut self) -> Result<bool, HandleError> {
        let (alive, _) = self
            .world
            .record(self.pid, "has_exited")
            .ok_or(HandleError::Exited { pid: self.pid })?;
        Ok(!alive)
    }

    async fn close_main_window(&mut self) -> Result<bool, HandleError> {
        if let Some((_, Behavior::ExitsOnWindowClose)) =
            self.world.record(self.pid, "close_main_window")
        {
            self.world.exit(self.pid);
        }
        Ok(true)
    }

    async fn request_close(&mut self) -> Result<(), HandleError> {
        match self.world.record(self.pid, "request_close") {
            Some((_, Behavior::ExitsOnCloseRequest)) => {
                self.world.exit(self.pid);
                Ok(())
            }
            Some((_, Behavior::FailsCloseRequest)) => Err(HandleError::Os {
                pid: self.pid,
                reason: "access denied".to_string(),
            }),
            Some((_, Behavior::VanishesOnCloseRequest)) => {
                self.world.exit(self.pid);
                Err(HandleError::Exited { pid: self.pid })
            }
            _ => Ok(()),
        }
    }

    async fn kill(&mut self) -> Result<(), HandleError> {
        match self.world.record(self.pid, "kill") {
            Some((_, Behavior::Unkillable)) => {}
            _ => self.world.exit(self.pid),
        }
        Ok(())
    }

    async fn wait_for_exit(&mut self, timeout: Duration) -> Result<bool, HandleError> {
        self.world.record(self.pid, "wait_for_exit");
        if !self.world.is_alive(self.pid) {
            return Ok(true);
        }
        tokio::time::sleep(timeout).await;
        Ok(!self.world.is_alive(self.pid))
    }
}

#[async_trait]
impl ProcessTable for World {
    fn is_running(&self, name: &str) -> bool {
        self.lookup(false);
        self.running(name) > 0
    }

    fn running_among(&self, names: &[&str]) -> HashSet<String> {
        self.lookup(true);
        names
            .iter()
            .filter(|name| self.running(name) > 0)
            .map(|name| (*name).to_string())
            .collect()
    }

    fn find_by_name(&self, name: &str) -> Vec<Box<dyn ProcessHandle>> {
        let pids: Vec<u32> = self
            .lock()
            .processes
            .iter()
            .filter(|p| p.alive && p.name == name)
            .map(|p| p.pid)
            .collect();
        pids.into_iter().map(|pid| self.handle(pid)).collect()
    }

    async fn kill_by_name(&self, image_name: &str) -> Result<(), KillError> {
        let mut state = self.lock();
        state.killed_by_name.push(image_name.to_string());
        if state.fail_kill_by_name {
            return Err(KillError::Refused {
                image: image_name.to_string(),
                pids: Vec::new(),
            });
        }
        let stem = stem(Path::new(image_name));
        for process in state.processes.iter_mut().filter(|p| p.name == stem) {
            process.alive = false;
        }
        Ok(())
    }
}

impl Spawner for World {
    fn spawn(&self, launch: &LaunchDescriptor) -> Result<u32, LaunchError> {
        if self.lock().fail_spawns {
            return Err(LaunchError::Spawn {
                executable: launch.executable.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }
        self.lock().spawned.push(launch.clone());
        Ok(self.start(&stem(&launch.executable)))
    }
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Unix-flavoured host with no environment and `/work` as cwd
#[derive(Debug, Default)]
pub struct TestHost;

impl HostEnv for TestHost {
    fn var(&self, _key: &str) -> Option<String> {
        None
    }

    fn exists(&self, _path: &Path) -> bool {
        false
    }

    fn current_dir(&self) -> Option<PathBuf> {
        Some(PathBuf::from("/work"))
    }

    fn is_windows(&self) -> bool {
        false
    }
}

pub fn context(world: &World, sink: &MemorySink) -> ActionContext {
    ActionContext {
        processes: Arc::new(world.clone()),
        spawner: Arc::new(world.clone()),
        host: Arc::new(TestHost),
        events: Arc::new(sink.clone()),
        ladder: Arc::new(TerminationLadder::default()),
    }
}

pub fn config(json: &str) -> SupervisionConfig {
    SupervisionConfig::from_json(json).unwrap()
}

/// Event names in arrival order
pub fn names(sink: &MemorySink) -> Vec<&'static str> {
    sink.events().iter().map(|e| e.name()).collect()
}
