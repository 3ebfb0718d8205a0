//! Formatted output helpers for the CLI.

use fangate_common::config::MonitorConfig;

/// Describes what will be denied and which mount is watched.
#[must_use]
pub fn banner(config: &MonitorConfig) -> String {
    let denied = config
        .denied
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let denied = if denied.is_empty() {
        "nothing will be denied".to_owned()
    } else {
        format!("open {denied} will be denied")
    };
    format!(
        "notify events for write(2) and open(2) on the mount of {} and its children, {denied}",
        config.mount.display()
    )
}
