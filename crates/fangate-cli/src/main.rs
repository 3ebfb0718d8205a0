//! # fangate
//!
//! Reports open, close and write activity on a mount and denies opens of
//! configured paths before they complete.
//!
//! Exit status is `0` after a shutdown signal, end of events, or end of
//! standard input, and `1` on any fatal error or a second shutdown signal.

mod cli;
mod output;

use std::io::Write;

use anyhow::Context;
use clap::Parser;
use fangate_monitor::{DenyList, Monitor};

use crate::cli::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);
    run(&cli)
}

fn init_logging(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = cli.to_config();
    config.validate()?;

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", output::banner(&config)).context("failed to write banner")?;
    stdout.flush().context("failed to write banner")?;

    let policy = DenyList::new(&config.denied);
    let mut monitor = Monitor::start(&config, policy).context("failed to start monitor")?;
    tracing::info!(mount = %config.mount.display(), denied = config.denied.len(), "monitoring");

    let reason = monitor.run(&mut stdout).context("monitor stopped on error")?;
    tracing::info!(%reason, state = %monitor.state(), "monitor stopped");
    Ok(())
}

