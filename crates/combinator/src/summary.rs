//! Startup summary of the loaded configuration

use combinator_core::launch::expand_env;
use combinator_core::{HostEnv, SupervisionConfig};
use std::path::Path;

/// One line per setting, labelled `[n]` for parents and `[n.m]` for companions
pub fn summary_lines(config: &SupervisionConfig, host: &dyn HostEnv) -> Vec<String> {
    let mut lines = vec![format!(
        "Found {} processes. (Interval: {:?})",
        config.parents.len(),
        config.poll_interval
    )];

    for (i, parent) in config.parents.iter().enumerate() {
        let n = i + 1;
        lines.push(format!(
            "[{n}] Process: {} (Enabled: {})",
            parent.name, parent.enabled
        ));
        lines.push(match parent.grace_period {
            Some(grace) => format!("[{n}] Grace Period: {grace:?}"),
            None => format!("[{n}] Grace Period: never"),
        });

        for (j, companion) in parent.companions.iter().enumerate() {
            let label = format!("[{n}.{}]", j + 1);
            let expanded = expand_env(&companion.program_path, host);
            let validity = if host.exists(Path::new(&expanded)) {
                "valid"
            } else {
                "invalid"
            };

            lines.push(format!(
                "{label} Process: {} (Enabled: {})",
                companion.derived_name(),
                companion.enabled
            ));
            lines.push(format!(
                "{label} Program Path: \"{}\" ({validity})",
                companion.program_path
            ));
            lines.push(format!(
                "{label} Arguments: {}",
                companion.arguments.join(" ")
            ));
            lines.push(format!("{label} Keep Running: {}", companion.keep_running));
            lines.push(format!("{label} Always Run: {}", companion.always_run));
            if let Some(delay) = companion.launch_delay() {
                lines.push(format!("{label} Delay: {delay:?}"));
            }
            if let Some(env) = companion.environment_overrides.as_ref().filter(|e| !e.is_empty()) {
                let pairs: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();
                lines.push(format!(
                    "{label} Environment Variables: {}",
                    pairs.join(", ")
                ));
            }
        }
    }

    lines
}
