//! Firmware upload.

use anyhow::{Context, Result, anyhow};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use la66flash::{Port, TransferResult, XmodemSender};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use super::open_port;
use crate::config::Config;
use crate::{Cli, use_fancy_output};

/// Flash command implementation.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &Config,
    firmware: &Path,
    settle_ms: u64,
    json: bool,
) -> Result<()> {
    let file = File::open(firmware)
        .with_context(|| format!("Failed to open firmware {}", firmware.display()))?;
    let size = file
        .metadata()
        .with_context(|| format!("Failed to read firmware {}", firmware.display()))?
        .len();

    if !cli.quiet {
        eprintln!(
            "{} Loaded {} ({} bytes, {} blocks)",
            style("📦").cyan(),
            firmware.display(),
            size,
            size.div_ceil(128)
        );
    }

    let port = open_port(cli, config)?;

    if settle_ms > 0 {
        if !cli.quiet {
            eprintln!(
                "{} Waiting {settle_ms} ms for the device to settle...",
                style("⏳").yellow()
            );
        }
        thread::sleep(Duration::from_millis(settle_ms));
    }

    let mut sender = XmodemSender::with_config(port, config.xmodem_config())?;
    sender.flush_input()?;

    if !cli.quiet {
        eprintln!(
            "{} Reset the LA66 module now to enter the bootloader",
            style("👉").yellow().bold()
        );
    }

    let pb = if cli.quiet || json || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(size);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let started = Instant::now();
    let result = sender.send(BufReader::new(file), |sent| pb.set_position(sent as u64));
    let elapsed = started.elapsed();
    sender.into_port().close()?;

    if result.is_success() {
        pb.finish_with_message("done");
    } else {
        pb.abandon_with_message("failed");
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary_json(&result, size, elapsed))
                .unwrap_or_default()
        );
    } else if !cli.quiet {
        print_summary(&result, elapsed);
    }

    match result.error {
        Some(err) if !err.is_warning() => Err(anyhow!(err).context(format!(
            "Transfer failed after {} bytes",
            result.bytes_sent
        ))),
        _ => Ok(()),
    }
}

fn summary_json(result: &TransferResult, size: u64, elapsed: Duration) -> serde_json::Value {
    let (error, warning) = match &result.error {
        Some(e) if e.is_warning() => (None, Some(e.to_string())),
        Some(e) => (Some(e.to_string()), None),
        None => (None, None),
    };

    serde_json::json!({
        "success": result.is_success(),
        "state": format!("{:?}", result.state),
        "firmware_size": size,
        "bytes_sent": result.bytes_sent,
        "blocks_sent": result.blocks_sent,
        "elapsed_ms": elapsed.as_millis() as u64,
        "error": error,
        "warning": warning,
    })
}

fn print_summary(result: &TransferResult, elapsed: Duration) {
    eprintln!();
    match &result.error {
        None => eprintln!(
            "{} Flashed {} bytes in {:.1}s",
            style("🎉").green().bold(),
            result.bytes_sent,
            elapsed.as_secs_f64()
        ),
        Some(err) if err.is_warning() => {
            eprintln!(
                "{} Flashed {} bytes in {:.1}s",
                style("✓").green().bold(),
                result.bytes_sent,
                elapsed.as_secs_f64()
            );
            eprintln!("{} {err}", style("⚠").yellow());
        },
        Some(_) => eprintln!(
            "{} {} bytes were acknowledged before the failure",
            style("✗").red().bold(),
            result.bytes_sent
        ),
    }
}
