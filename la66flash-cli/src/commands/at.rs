//! AT command and P2P mode switch commands.

use anyhow::{Result, bail};
use console::style;
use la66flash::{AtResponse, AtSession, AtStatus, Port};

use super::open_port;
use crate::Cli;
use crate::config::Config;

fn status_mark(status: AtStatus) -> console::StyledObject<&'static str> {
    match status {
        AtStatus::Ok => style("✓").green(),
        AtStatus::Error => style("✗").red(),
        AtStatus::NoStatus => style("?").yellow(),
    }
}

fn print_response(command: &str, response: &AtResponse) {
    eprintln!("{} {}", status_mark(response.status), style(command).cyan());
    for line in &response.lines {
        println!("{line}");
    }
}

/// Send each command in turn.
pub(crate) fn cmd_at(cli: &Cli, config: &Config, commands: &[String]) -> Result<()> {
    let port = open_port(cli, config)?;
    let mut session = AtSession::new(port)?;

    let mut failed = Vec::new();
    for command in commands {
        let response = session.send(command)?;
        print_response(command, &response);
        if !response.is_ok() {
            failed.push(command.as_str());
        }
    }

    let (mut port, _) = session.into_parts();
    port.close()?;

    if !failed.is_empty() {
        bail!("module answered ERROR to {}", failed.join(", "));
    }
    Ok(())
}

/// Put the module in LoRa P2P mode.
pub(crate) fn cmd_p2p(cli: &Cli, config: &Config) -> Result<()> {
    let port = open_port(cli, config)?;
    let mut session = AtSession::new(port)?;

    if !cli.quiet {
        eprintln!(
            "{} Switching to P2P mode (the module reboots once)...",
            style("⏳").yellow()
        );
    }

    let steps = session.switch_to_p2p()?;
    let (mut port, _) = session.into_parts();
    port.close()?;

    if !cli.quiet {
        for (command, response) in &steps {
            print_response(command, response);
        }
        eprintln!("\n{} Module is in P2P mode", style("🎉").green().bold());
    }
    Ok(())
}
