//! Runtime configuration model for the monitor.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_DENIED_PATH, DEFAULT_MOUNT};
use crate::error::{FangateError, Result};
use crate::types::OutputFormat;

/// Root configuration for a monitor run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Path whose mount is marked, including every child.
    pub mount: PathBuf,
    /// Absolute paths whose opens are refused. Matching is exact.
    pub denied: Vec<PathBuf>,
    /// Whether standard input acts as the termination trigger.
    pub control_input: bool,
    /// Rendering of observation lines.
    pub format: OutputFormat,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            mount: PathBuf::from(DEFAULT_MOUNT),
            denied: vec![PathBuf::from(DEFAULT_DENIED_PATH)],
            control_input: true,
            format: OutputFormat::Text,
        }
    }
}

impl MonitorConfig {
    /// Checks that the configuration can be acted upon.
    ///
    /// # Errors
    ///
    /// Returns [`FangateError::Config`] if a denied path is relative or the
    /// mount path does not exist.
    pub fn validate(&self) -> Result<()> {
        if let Some(relative) = self.denied.iter().find(|p| !p.is_absolute()) {
            return Err(FangateError::Config {
                message: format!("denied path must be absolute: {}", relative.display()),
            });
        }
        if !self.mount.exists() {
            return Err(FangateError::Config {
                message: format!("mount path does not exist: {}", self.mount.display()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_denies_single_path() {
        let config = MonitorConfig::default();
        assert_eq!(config.denied, vec![PathBuf::from("/tmp/foo")]);
        assert_eq!(config.mount, PathBuf::from("."));
        assert!(config.control_input);
        assert_eq!(config.format, OutputFormat::Text);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(MonitorConfig::default().validate().is_ok());
    }

    #[test]
    fn relative_denied_path_is_rejected() {
        let config = MonitorConfig {
            denied: vec![PathBuf::from("tmp/foo")],
            ..MonitorConfig::default()
        };
        let err = config.validate().expect_err("relative path must fail");
        assert!(err.to_string().contains("tmp/foo"));
    }

    #[test]
    fn missing_mount_is_rejected() {
        let config = MonitorConfig {
            mount: PathBuf::from("/definitely/not/a/real/mount/point"),
            ..MonitorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_deserializes_from_json() {
        let json = r#"{"mount":"/","denied":["/etc/shadow"],"control_input":false,"format":"json"}"#;
        let config: MonitorConfig = serde_json::from_str(json).expect("deserialize");
        assert_eq!(config.mount, PathBuf::from("/"));
        assert_eq!(config.denied, vec![PathBuf::from("/etc/shadow")]);
        assert!(!config.control_input);
        assert_eq!(config.format, OutputFormat::Json);
    }
}
