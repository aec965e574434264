//! la66flash CLI - Command-line tool for Dragino LA66 LoRa modules.
//!
//! ## Features
//!
//! - Upload firmware to the LA66 bootloader over XModem
//! - Send AT commands and switch the module to LoRa P2P mode
//! - Bridge module output to a LoRaWAN network server
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use la66flash::GatewayEui;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, select_serial_port};

/// Baud rate of the LA66 UART and bootloader.
pub(crate) const DEFAULT_BAUD: u32 = 9600;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Errors with a dedicated exit status.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation (exit 2).
    #[error("{0}")]
    Usage(String),
    /// Bad or missing configuration (exit 3).
    #[error("{0}")]
    Config(String),
    /// No serial device to talk to (exit 4).
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    /// The user backed out of a prompt (exit 1).
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
            Self::DeviceNotFound(_) => 4,
            Self::Cancelled(_) => 1,
        }
    }
}

/// Map an error chain to the process exit status.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return cli_err.exit_code();
        }
        if let Some(lib_err) = cause.downcast_ref::<la66flash::Error>() {
            return match lib_err {
                la66flash::Error::DeviceNotFound => 4,
                la66flash::Error::Config(_) | la66flash::Error::InvalidEui(_) => 3,
                _ => 1,
            };
        }
    }
    1
}

/// la66flash - Flash and configure Dragino LA66 LoRa modules.
///
/// Environment variables:
///   LA66FLASH_PORT              - Default serial port
///   LA66FLASH_BAUD              - Default baud rate (default: 9600)
///   LA66FLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "la66flash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "LA66FLASH_PORT")]
    pub(crate) port: Option<String>,

    /// Baud rate [default: 9600].
    #[arg(short, long, global = true, env = "LA66FLASH_BAUD")]
    pub(crate) baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "LA66FLASH_NON_INTERACTIVE")]
    pub(crate) non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub(crate) config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Upload a firmware image to the LA66 bootloader.
    Flash {
        /// Path to the firmware binary.
        firmware: PathBuf,

        /// Wait after opening the port before the transfer, in milliseconds.
        #[arg(long, default_value = "2000", value_name = "MS")]
        settle_ms: u64,

        /// Print the transfer summary as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Send AT commands and print the responses.
    At {
        /// Commands to send, in order (e.g. AT+VER? AT+MODE?).
        #[arg(required = true)]
        commands: Vec<String>,
    },

    /// Switch the module to LoRa P2P mode and save it.
    P2p,

    /// Forward module output to a LoRaWAN server as Semtech UDP packets.
    Bridge {
        /// Network server address (host:port).
        #[arg(long)]
        server: Option<String>,

        /// Gateway EUI (16 hex characters).
        #[arg(long, value_parser = parse_eui)]
        eui: Option<GatewayEui>,

        /// Stop after this many packets.
        #[arg(long)]
        count: Option<usize>,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_eui(s: &str) -> Result<GatewayEui, String> {
    s.parse().map_err(|e: la66flash::Error| e.to_string())
}

impl Cli {
    /// Effective baud rate: flag or env, then config, then 9600.
    pub(crate) fn baud(&self, config: &Config) -> u32 {
        self.baud
            .or(config.port.baud)
            .unwrap_or(DEFAULT_BAUD)
    }
}

/// Get serial port from CLI args, config, or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    };
    select_serial_port(&options, config)
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config_path {
        Some(path) => Config::load_from_path(path).ok_or_else(|| {
            CliError::Config(format!("config file not found: {}", path.display())).into()
        }),
        None => Ok(Config::load()),
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;

    match &cli.command {
        Commands::Flash {
            firmware,
            settle_ms,
            json,
        } => commands::flash::cmd_flash(cli, &config, firmware, *settle_ms, *json),
        Commands::At { commands } => commands::at::cmd_at(cli, &config, commands),
        Commands::P2p => commands::at::cmd_p2p(cli, &config),
        Commands::Bridge { server, eui, count } => {
            commands::bridge::cmd_bridge(cli, &config, server.as_deref(), *eui, *count)
        },
        Commands::ListPorts { json } => {
            commands::info::cmd_list_ports(*json);
            Ok(())
        },
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    debug!(
        "la66flash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}
