//! Process Combinator
//!
//! Watches parent processes and keeps their companion programs running
//! alongside them.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use combinator_core::{EventSink, SystemHost, TracingSink};
use combinator_supervisor::Supervisor;
use process_combinator::{
    init_tracing, load, open_log_file, summary_lines, ConfigFile, Loaded, DEFAULT_CONFIG_FILE,
};

#[derive(Parser, Debug)]
#[command(name = "process-combinator")]
#[command(version, about = "Start companion programs alongside a parent process")]
struct Args {
    /// Configuration file; a sample is written if it does not exist
    #[arg(long, short, default_value = DEFAULT_CONFIG_FILE, env = "PROCESS_COMBINATOR_CONFIG")]
    config: PathBuf,

    /// Emit structured JSON log lines
    #[arg(long, env = "PROCESS_COMBINATOR_LOG_JSON")]
    log_json: bool,

    /// Load the configuration, print the summary and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = std::path::absolute(&args.config)
        .with_context(|| format!("invalid config path {}", args.config.display()))?;

    let file = match load(&config_path)? {
        Loaded::Created(path) => {
            println!(
                "Created \"{}\". Please edit it and restart the program.",
                path.display()
            );
            return Ok(());
        }
        Loaded::Config(file) => file,
    };

    let log_file = if file.log_to_file {
        Some(open_log_file(&ConfigFile::log_path(&config_path))?)
    } else {
        None
    };
    init_tracing("info", args.log_json, log_file)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Process Combinator started");
    info!(config = %config_path.display(), "using configuration");

    let config = file.prepare()?;
    for line in summary_lines(&config, &SystemHost) {
        info!("{line}");
    }
    if args.check {
        return Ok(());
    }

    let events: Arc<dyn EventSink> = Arc::new(TracingSink);
    let supervisor = Supervisor::with_system(config, events);

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            token.cancel();
        }
    });

    supervisor.run(shutdown).await;
    Ok(())
}
