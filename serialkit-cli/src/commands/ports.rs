//! Port listing and platform report.

use anyhow::{Context, Result};
use console::style;
use serialkit::{Platform, PortInfo, enumerate_ports, list_ports};

/// List ports, or the device identifier map with `ids`.
pub(crate) fn cmd_list_ports(json: bool, ids: bool) -> Result<()> {
    if ids {
        let map = enumerate_ports().context("Failed to enumerate serial ports")?;
        if json {
            println!("{}", serde_json::to_string_pretty(&map)?);
        } else if map.is_empty() {
            eprintln!("  {}", style("No serial ports found").dim());
        } else {
            for (id, name) in &map {
                println!("{id}\t{name}");
            }
        }
        return Ok(());
    }

    let detected = list_ports().context("Failed to enumerate serial ports")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detected)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports:").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
    } else {
        for port in &detected {
            eprintln!("  {} {}", style("•").green(), format_port(port));
        }
    }
    Ok(())
}

fn format_port(port: &PortInfo) -> String {
    let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = port
        .product
        .as_deref()
        .or(port.manufacturer.as_deref())
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!(
        "{} [{}]{vid_pid}{product}",
        style(&port.name).cyan(),
        style(format!("{:?}", port.kind)).yellow()
    )
}

/// Print the detected platform and the backend it maps to.
pub(crate) fn cmd_platform() -> Result<()> {
    let platform = Platform::current().context("Unsupported host platform")?;
    let backend = if platform.is_posix() {
        "termios"
    } else {
        "DCB"
    };
    println!("{platform} ({backend} backend)");
    Ok(())
}
