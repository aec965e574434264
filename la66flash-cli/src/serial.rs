//! Serial port selection.
//!
//! Order: explicit `--port`, the configured port, a single detected
//! candidate, then an interactive prompt when a terminal is attached.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    la66flash::{DetectedPort, detect_ports},
    log::{debug, info},
    std::{cmp::Ordering, io::IsTerminal},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail instead of prompting).
    pub non_interactive: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Pick a port name.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<String> {
    if let Some(port_name) = &options.port {
        return Ok(port_name.clone());
    }

    if let Some(port_name) = &config.port.serial {
        debug!("Using port from config: {port_name}");
        return Ok(port_name.clone());
    }

    let ports = detect_ports();
    if ports.is_empty() {
        return Err(CliError::DeviceNotFound("no serial ports found".to_string()).into());
    }

    let known: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| is_known_device(p, config))
        .cloned()
        .collect();
    let candidates = if known.is_empty() { ports } else { known };

    if options.non_interactive {
        return select_non_interactive_port(candidates);
    }

    match candidates.len().cmp(&1) {
        Ordering::Equal => {
            let port = &candidates[0];
            info!("Auto-selected port: {}", port.describe());
            Ok(port.name.clone())
        },
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_port_interactive(candidates, config)
        },
        Ordering::Less => Err(CliError::DeviceNotFound("no serial ports found".to_string()).into()),
    }
}

fn select_non_interactive_port(candidates: Vec<DetectedPort>) -> Result<String> {
    match candidates.len().cmp(&1) {
        Ordering::Equal => Ok(candidates
            .into_iter()
            .map(|p| p.name)
            .next()
            .unwrap_or_default()),
        Ordering::Greater => Err(usage_err(
            "multiple serial ports found; pass --port in non-interactive mode",
        )),
        Ordering::Less => Err(CliError::DeviceNotFound("no serial ports found".to_string()).into()),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "multiple serial ports found and no terminal to choose from; pass --port",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) if io_err.kind() == std::io::ErrorKind::Interrupted => {
            CliError::Cancelled("port selection cancelled".to_string()).into()
        },
        DialoguerError::IO(io_err) => usage_err(&format!("port prompt failed: {io_err}")),
    }
}

/// Check if a port matches a known device (built-in list or config).
fn is_known_device(port: &DetectedPort, config: &Config) -> bool {
    if port.device.is_known() {
        return true;
    }

    match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => config.port.usb_device.iter().any(|d| d.matches(vid, pid)),
        _ => false,
    }
}

fn select_port_interactive(mut ports: Vec<DetectedPort>, config: &Config) -> Result<String> {
    eprintln!(
        "{} Detected {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    ports.sort_by_key(|p| !is_known_device(p, config));

    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| console::truncate_str(&p.describe(), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the LA66 serial port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection.and_then(|index| ports.into_iter().nth(index)) {
        Some(port) => Ok(port.name),
        None => Err(CliError::Cancelled("port selection cancelled".to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use la66flash::DeviceKind;

    fn port(name: &str, vid: Option<u16>, pid: Option<u16>) -> DetectedPort {
        DetectedPort {
            device: match (vid, pid) {
                (Some(v), Some(p)) => DeviceKind::from_vid_pid(v, p),
                _ => DeviceKind::Unknown,
            },
            vid,
            pid,
            ..DetectedPort::plain(name)
        }
    }

    #[test]
    fn test_explicit_port_wins() {
        let mut config = Config::default();
        config.port.serial = Some("/dev/ttyACM9".to_string());
        let options = SerialOptions {
            port: Some("/dev/ttyUSB0".to_string()),
            non_interactive: true,
        };
        assert_eq!(select_serial_port(&options, &config).unwrap(), "/dev/ttyUSB0");
    }

    #[test]
    fn test_config_port_used_without_flag() {
        let mut config = Config::default();
        config.port.serial = Some("/dev/ttyACM9".to_string());
        let options = SerialOptions {
            port: None,
            non_interactive: true,
        };
        assert_eq!(select_serial_port(&options, &config).unwrap(), "/dev/ttyACM9");
    }

    #[test]
    fn test_is_known_device() {
        let config = Config::default();
        assert!(is_known_device(&port("/dev/ttyACM0", Some(0x2341), Some(0x0043)), &config));
        assert!(!is_known_device(&port("/dev/ttyUSB0", Some(0xABCD), Some(0x1234)), &config));
        assert!(!is_known_device(&port("/dev/ttyS0", None, None), &config));
    }

    #[test]
    fn test_is_known_device_from_config() {
        let mut config = Config::default();
        config.port.usb_device.push(crate::config::UsbDevice {
            vid: 0xABCD,
            pid: 0x1234,
        });
        assert!(is_known_device(&port("/dev/ttyUSB0", Some(0xABCD), Some(0x1234)), &config));
    }

    #[test]
    fn test_non_interactive_multiple_ports_is_usage_error() {
        let ports = vec![port("/dev/ttyUSB0", None, None), port("/dev/ttyUSB1", None, None)];
        let err = select_non_interactive_port(ports).unwrap_err();
        assert!(matches!(err.downcast_ref::<CliError>(), Some(CliError::Usage(_))));
    }

    #[test]
    fn test_non_interactive_no_ports_is_device_not_found() {
        let err = select_non_interactive_port(vec![]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_non_interactive_single_port() {
        let selected = select_non_interactive_port(vec![port("/dev/ttyACM0", None, None)]).unwrap();
        assert_eq!(selected, "/dev/ttyACM0");
    }
}
