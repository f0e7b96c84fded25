//! Interactive serial port selection.
//!
//! Order of preference:
//! - the port given on the command line or in `SERIALKIT_PORT`
//! - the port remembered in a config file
//! - the only port the OS reports
//! - a dialoguer prompt when several ports exist (never in non-interactive mode)

use {
    crate::{CliError, config::Config},
    anyhow::{Context, Result},
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, error, info},
    serialkit::{PortInfo, PortKind, list_ports},
    std::io::IsTerminal,
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail if a prompt would be needed).
    pub non_interactive: bool,
}

/// Result of port selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedPort {
    /// Port name to open.
    pub name: String,
    /// Whether the user picked it from a prompt.
    pub prompted: bool,
}

impl SelectedPort {
    fn given(name: &str) -> Self {
        Self {
            name: name.to_string(),
            prompted: false,
        }
    }
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Select a serial port from flags, config, or the OS port list.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(SelectedPort::given(port_name));
    }

    if let Some(port_name) = &config.port.name {
        debug!("Using port from config: {port_name}");
        return Ok(SelectedPort::given(port_name));
    }

    let ports = list_ports().context("Failed to enumerate serial ports")?;
    choose_from(ports, options.non_interactive)
}

fn choose_from(mut ports: Vec<PortInfo>, non_interactive: bool) -> Result<SelectedPort> {
    match ports.len() {
        0 => Err(usage_err(
            "No serial ports found. Connect a device or pass --port",
        )),
        1 => {
            let port = ports.remove(0);
            info!("Auto-selected port: {}", port.describe());
            Ok(SelectedPort {
                name: port.name,
                prompted: false,
            })
        },
        count if non_interactive => Err(usage_err(&format!(
            "Found {count} serial ports; pass --port to choose one in non-interactive mode"
        ))),
        _ => {
            ensure_interactive_terminal()?;
            select_port_interactive(ports)
        },
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Choosing a port interactively requires a terminal; pass --port",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                CliError::Usage(format!("Port prompt failed: {io_err}")).into()
            }
        },
    }
}

/// USB ports first, then by name.
fn sort_for_display(ports: &mut [PortInfo]) {
    ports.sort_by(|a, b| {
        (a.kind != PortKind::Usb)
            .cmp(&(b.kind != PortKind::Usb))
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Interactive port selection.
fn select_port_interactive(mut ports: Vec<PortInfo>) -> Result<SelectedPort> {
    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    sort_for_display(&mut ports);

    // Truncate labels to fit terminal width to prevent wrapping in narrow
    // terminals.
    let term_width = console::Term::stderr()
        .size()
        .1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|port| console::truncate_str(&port.describe(), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a serial port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let port = ports
                .into_iter()
                .nth(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
            Ok(SelectedPort {
                name: port.name,
                prompted: true,
            })
        },
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

/// Ask user if they want to remember this port.
pub fn ask_remember_port(name: &str, config: &mut Config) -> Result<()> {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Remember {name} for next time?"))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_port(name) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}
