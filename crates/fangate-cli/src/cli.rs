//! Command-line arguments and their mapping onto the monitor configuration.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use fangate_common::config::MonitorConfig;
use fangate_common::constants::{DEFAULT_DENIED_PATH, DEFAULT_MOUNT};
use fangate_common::types::OutputFormat;

/// fangate — watch file access on a mount and veto selected opens.
#[derive(Parser, Debug)]
#[command(name = "fangate", version, about, long_about = None)]
pub struct Cli {
    /// Path whose mount is monitored, including all children.
    #[arg(short, long, default_value = DEFAULT_MOUNT)]
    pub mount: PathBuf,

    /// Absolute path whose opens are denied (exact match, repeatable).
    #[arg(short, long = "deny", value_name = "PATH", default_value = DEFAULT_DENIED_PATH)]
    pub denied: Vec<PathBuf>,

    /// Do not treat end of standard input as a request to exit.
    #[arg(long)]
    pub no_control_input: bool,

    /// Rendering of per-event lines on standard output.
    #[arg(long, value_enum, default_value_t = Format::Text)]
    pub format: Format,

    /// Emit diagnostics on standard error as JSON.
    #[arg(long, env = "FANGATE_LOG_JSON")]
    pub log_json: bool,
}

/// Output format as spelled on the command line.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// `name(pid)<TAB>mask<TAB>path`
    Text,
    /// One JSON object per line.
    Json,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Text => Self::Text,
            Format::Json => Self::Json,
        }
    }
}

impl Cli {
    /// Builds the monitor configuration from parsed arguments.
    #[must_use]
    pub fn to_config(&self) -> MonitorConfig {
        MonitorConfig {
            mount: self.mount.clone(),
            denied: self.denied.clone(),
            control_input: !self.no_control_input,
            format: self.format.into(),
        }
    }
}
