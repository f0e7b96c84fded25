//! serialkit CLI - command-line front end for the serialkit serial port library.
//!
//! ## Features
//!
//! - List serial ports, optionally as JSON
//! - Send text or hex bytes to a port
//! - Read one line with an optional timeout
//! - Monitor a port through the background data-received notification
//! - Interactive serial port selection
//! - Environment variable and config file support

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use env_logger::Env;
use log::debug;
use serialkit::{DataBits, DtrControl, Parity, Port, PortConfiguration, StopBits};
use thiserror::Error;

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Baud rate used when neither the command line nor a config file sets one.
const DEFAULT_BAUD: u32 = 9600;

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Whether Ctrl-C was pressed since startup.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// CLI failures with a dedicated exit code.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// Bad invocation or missing setup (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// The user aborted (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

/// serialkit - talk to serial ports from the command line.
///
/// Environment variables:
///   SERIALKIT_PORT              - Default serial port
///   SERIALKIT_BAUD              - Default baud rate (default: 9600)
///   SERIALKIT_PARITY            - Parity (none, odd, even, mark, space)
///   SERIALKIT_DATA_BITS         - Data bits (5-8)
///   SERIALKIT_STOP_BITS         - Stop bits (1, 1.5, 2)
///   SERIALKIT_DTR               - DTR control (enable, disable, handshake)
///   SERIALKIT_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "serialkit")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Serial port to use (selected interactively if not specified).
    #[arg(short, long, global = true, env = "SERIALKIT_PORT")]
    port: Option<String>,

    /// Baud rate.
    #[arg(short, long, global = true, env = "SERIALKIT_BAUD")]
    baud: Option<u32>,

    /// Parity mode.
    #[arg(long, global = true, env = "SERIALKIT_PARITY")]
    parity: Option<ParityArg>,

    /// Data bits per character.
    #[arg(
        long,
        global = true,
        env = "SERIALKIT_DATA_BITS",
        value_parser = clap::value_parser!(u8).range(5..=8)
    )]
    data_bits: Option<u8>,

    /// Stop bits.
    #[arg(long, global = true, env = "SERIALKIT_STOP_BITS")]
    stop_bits: Option<StopBitsArg>,

    /// DTR line behaviour.
    #[arg(long, global = true, env = "SERIALKIT_DTR")]
    dtr: Option<DtrArg>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "SERIALKIT_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ParityArg {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl From<ParityArg> for Parity {
    fn from(arg: ParityArg) -> Self {
        match arg {
            ParityArg::None => Self::None,
            ParityArg::Odd => Self::Odd,
            ParityArg::Even => Self::Even,
            ParityArg::Mark => Self::Mark,
            ParityArg::Space => Self::Space,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StopBitsArg {
    #[value(name = "1")]
    One,
    #[value(name = "1.5")]
    OnePointFive,
    #[value(name = "2")]
    Two,
}

impl From<StopBitsArg> for StopBits {
    fn from(arg: StopBitsArg) -> Self {
        match arg {
            StopBitsArg::One => Self::One,
            StopBitsArg::OnePointFive => Self::OnePointFive,
            StopBitsArg::Two => Self::Two,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DtrArg {
    Enable,
    Disable,
    Handshake,
}

impl From<DtrArg> for DtrControl {
    fn from(arg: DtrArg) -> Self {
        match arg {
            DtrArg::Enable => Self::Enable,
            DtrArg::Disable => Self::Disable,
            DtrArg::Handshake => Self::Handshake,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports.
    ListPorts {
        /// Output as JSON.
        #[arg(long)]
        json: bool,

        /// Show the device identifier to port name map instead.
        #[arg(long)]
        ids: bool,
    },

    /// Show the detected platform and its serial backend.
    Platform,

    /// Write text (or hex bytes) to the port.
    Send {
        /// Payload to send.
        text: String,

        /// Interpret the payload as hex bytes ("48 65 6c" or "48656c").
        #[arg(long)]
        hex: bool,

        /// Append the line terminator.
        #[arg(short, long)]
        newline: bool,
    },

    /// Read one line from the port and print it.
    ReadLine {
        /// Give up after this many milliseconds.
        #[arg(short, long, value_name = "MS")]
        timeout_ms: Option<u64>,
    },

    /// Print everything the port receives until Ctrl-C.
    Monitor {
        /// Queued bytes needed before data is printed.
        #[arg(long, default_value = "1")]
        threshold: usize,

        /// Print received bytes as hex.
        #[arg(long)]
        hex: bool,
    },
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
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

    debug!(
        "serialkit v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    // A second Ctrl-C exits even if the current operation ignores the flag.
    if let Err(e) = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
    }) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    serialkit::set_interrupt_checker(was_interrupted);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::ListPorts { json, ids } => commands::ports::cmd_list_ports(*json, *ids),
        Commands::Platform => commands::ports::cmd_platform(),
        Commands::Send { text, hex, newline } => {
            commands::io::cmd_send(cli, &mut config, text, *hex, *newline)
        },
        Commands::ReadLine { timeout_ms } => {
            commands::io::cmd_read_line(cli, &mut config, *timeout_ms)
        },
        Commands::Monitor { threshold, hex } => {
            commands::monitor::cmd_monitor(cli, &mut config, *threshold, *hex)
        },
    }
}

/// Map an error to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<CliError>() {
        Some(CliError::Usage(_)) => 2,
        Some(CliError::Cancelled(_)) => 130,
        None => match err.downcast_ref::<serialkit::Error>() {
            Some(serialkit::Error::Interrupted) => 130,
            _ => 1,
        },
    }
}

/// Get serial port from CLI args or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    };

    let selected = select_serial_port(&options, config)?;

    if selected.prompted {
        ask_remember_port(&selected.name, config)?;
    }

    Ok(selected.name)
}

/// Line settings from flags, falling back to the config file, then defaults.
fn port_configuration(cli: &Cli, config: &Config, port_name: String) -> Result<PortConfiguration> {
    let file = &config.port;
    let data_bits = match cli.data_bits {
        Some(bits) => DataBits::try_from(bits)?,
        None => file.data_bits.unwrap_or_default(),
    };

    Ok(PortConfiguration::new(
        port_name,
        cli.baud
            .or(file.baud)
            .unwrap_or(DEFAULT_BAUD),
    )
    .with_parity(
        cli.parity
            .map(Parity::from)
            .or(file.parity)
            .unwrap_or_default(),
    )
    .with_data_bits(data_bits)
    .with_stop_bits(
        cli.stop_bits
            .map(StopBits::from)
            .or(file.stop_bits)
            .unwrap_or_default(),
    )
    .with_dtr_control(
        cli.dtr
            .map(DtrControl::from)
            .or(file.dtr)
            .unwrap_or_default(),
    ))
}

/// Select, configure and open the port for an I/O command.
pub(crate) fn open_port(cli: &Cli, config: &mut Config) -> Result<Port> {
    let port_name = get_port(cli, config)?;
    let settings = port_configuration(cli, config, port_name)?;
    debug!("Port settings: {settings}");

    let mut port = Port::new(settings.clone()).context("No serial backend for this platform")?;
    if let Some(newline) = &config.line.newline {
        port.set_newline(newline.as_bytes())
            .map_err(|e| CliError::Usage(format!("Invalid newline in config: {e}")))?;
    }
    if let Some(ms) = config.line.poll_interval_ms {
        port.set_poll_interval(Duration::from_millis(ms));
    }
    port.open()
        .with_context(|| format!("Failed to open {settings}"))?;
    Ok(port)
}
