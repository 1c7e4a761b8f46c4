//! Process Combinator
//!
//! Host-facing pieces of the `process-combinator` binary: the on-disk
//! configuration file, the startup summary and logging initialisation.

pub mod config_file;
pub mod logging;
pub mod summary;

pub use config_file::{load, ConfigFile, Loaded, DEFAULT_CONFIG_FILE, LOG_FILE_NAME};
pub use logging::{init_tracing, open_log_file};
pub use summary::summary_lines;
