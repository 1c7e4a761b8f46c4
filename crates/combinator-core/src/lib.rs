//! Process Combinator Core
//!
//! Building blocks for supervising companion processes:
//! - Supervision configuration (parents and their companions)
//! - Process probe over the OS process table
//! - Launch strategy resolution and child process creation
//! - Presence tracking with grace-period hysteresis
//! - Supervision events and sinks

pub mod config;
pub mod duration;
pub mod error;
pub mod event;
pub mod launch;
pub mod presence;
pub mod probe;
pub mod sink;
pub mod spawn;
pub mod system;

pub use config::{CompanionSpec, ParentSpec, SupervisionConfig};
pub use error::{ConfigError, HandleError, KillError, LaunchError, ProbeError};
pub use event::{EventSink, SupervisorEvent};
pub use launch::{image_name, resolve_launch, HostEnv, LaunchDescriptor, LaunchStrategy, SystemHost};
pub use presence::{Observation, PresenceTracker};
pub use probe::{MatchMode, ProcessHandle, ProcessTable, TerminationOutcome};
pub use sink::{FanoutSink, MemorySink, TracingSink};
pub use spawn::{ProcessSpawner, Spawner};
pub use system::SystemProcessTable;
