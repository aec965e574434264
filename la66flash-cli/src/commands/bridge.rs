//! LoRaWAN gateway bridge command.

use anyhow::{Context, Result};
use console::style;
use la66flash::{Forwarder, GatewayEui, Reader};

use super::open_port;
use crate::config::Config;
use crate::{Cli, CliError};

/// Pick the server and EUI from the flags, then the `[bridge]` section.
fn resolve_target(
    server: Option<&str>,
    eui: Option<GatewayEui>,
    config: &Config,
) -> Result<(String, GatewayEui)> {
    let server = server
        .map(str::to_string)
        .or_else(|| config.bridge.server.clone())
        .ok_or_else(|| CliError::Usage("no server given; pass --server or set [bridge] server".to_string()))?;

    let eui = match eui {
        Some(eui) => eui,
        None => config
            .bridge
            .eui()
            .ok_or_else(|| CliError::Usage("no gateway EUI given; pass --eui or set [bridge] eui".to_string()))?
            .map_err(|e| CliError::Config(e.to_string()))?,
    };

    Ok((server, eui))
}

/// Bridge command implementation.
pub(crate) fn cmd_bridge(
    cli: &Cli,
    config: &Config,
    server: Option<&str>,
    eui: Option<GatewayEui>,
    count: Option<usize>,
) -> Result<()> {
    let (server, eui) = resolve_target(server, eui, config)?;

    let forwarder = Forwarder::connect(server.as_str(), eui)
        .with_context(|| format!("Failed to reach {server}"))?;

    let port = open_port(cli, config)?;
    let mut reader = Reader::for_port(&port)?;

    if !cli.quiet {
        eprintln!(
            "{} Bridging to {} as gateway {}",
            style("📡").cyan(),
            style(forwarder.server()).green(),
            style(eui).yellow()
        );
    }

    let sent = forwarder.run(&mut reader, count)?;
    drop(port);

    if !cli.quiet {
        eprintln!("{} Forwarded {sent} packet(s)", style("✓").green().bold());
    }
    Ok(())
}
