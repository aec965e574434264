//! Port listing.

use console::style;
use la66flash::{DetectedPort, detect_ports, device::select_best};

fn port_json(p: &DetectedPort) -> serde_json::Value {
    serde_json::json!({
        "name": p.name,
        "device": p.device.name(),
        "known": p.device.is_known(),
        "vid": p.vid,
        "pid": p.pid,
        "manufacturer": p.manufacturer,
        "product": p.product,
    })
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) {
    let detected = detect_ports();

    if json {
        let ports: Vec<serde_json::Value> = detected.iter().map(port_json).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&ports).unwrap_or_default()
        );
        return;
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return;
    }

    for port in &detected {
        let device_type = if port.device.is_known() {
            format!(" [{}]", style(port.device.name()).yellow())
        } else {
            String::new()
        };
        let vid_pid = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
            _ => String::new(),
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{device_type}{vid_pid}{product}",
            style("•").green(),
            style(&port.name).cyan(),
        );
    }

    if let Some(best) = select_best(&detected) {
        eprintln!(
            "\n{} Auto-detect would pick {}",
            style("→").green().bold(),
            style(&best.name).cyan().bold()
        );
    }
}
