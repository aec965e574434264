//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod at;
pub(crate) mod bridge;
pub(crate) mod completions;
pub(crate) mod flash;
pub(crate) mod info;

use anyhow::{Context, Result};
use console::style;
use la66flash::{NativePort, SerialConfig};

use crate::config::Config;
use crate::{Cli, get_port};

/// Resolve the port and open it.
pub(crate) fn open_port(cli: &Cli, config: &Config) -> Result<NativePort> {
    let name = get_port(cli, config)?;
    let baud = cli.baud(config);

    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            style(&name).green(),
            baud
        );
    }

    NativePort::open(&SerialConfig::new(&name, baud))
        .with_context(|| format!("Failed to open serial port {name}"))
}
