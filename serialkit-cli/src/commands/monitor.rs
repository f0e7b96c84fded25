//! Serial monitor command implementation.
//!
//! Received data is printed from the port's data-received handler; the main
//! thread only waits for Ctrl-C or for polling to stop on its own.

use std::fmt::Write as _;
use std::io::{self, Write as _};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use log::warn;

use crate::config::Config;
use crate::{Cli, open_port, was_interrupted};

/// How often the main thread checks for Ctrl-C.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Decode as much of `pending` as possible, replacing invalid sequences.
///
/// A multi-byte character split across two reads stays in `pending` until
/// the rest arrives.
pub(crate) fn drain_utf8_lossy(pending: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(pending) {
            Ok(text) => {
                out.push_str(text);
                pending.clear();
                return out;
            },
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&pending[..valid]));
                match e.error_len() {
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + bad);
                    },
                    None => {
                        pending.drain(..valid);
                        return out;
                    },
                }
            },
        }
    }
}

fn format_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for byte in bytes {
        let _ = write!(out, "{byte:02X} ");
    }
    out
}

/// Run the serial monitor until Ctrl-C.
pub(crate) fn cmd_monitor(cli: &Cli, config: &mut Config, threshold: usize, hex: bool) -> Result<()> {
    let mut port = open_port(cli, config)?;

    eprintln!(
        "{} Monitoring {}",
        style("📡").cyan(),
        style(port.configuration()).green()
    );
    eprintln!("{}", style("Press Ctrl-C to exit").dim());

    port.set_received_bytes_threshold(threshold);
    let mut pending = Vec::new();
    port.on_data_received(move |event| {
        let bytes = match event.read_all() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Read failed: {e}");
                return;
            },
        };
        let text = if hex {
            format_hex(&bytes)
        } else {
            pending.extend_from_slice(&bytes);
            drain_utf8_lossy(&mut pending)
        };
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    });
    port.run_async()
        .context("Failed to start receive polling")?;

    while !was_interrupted() && port.is_running() {
        thread::sleep(WAIT_SLICE);
    }

    port.stop_async();
    port.clear_data_received();
    let poll_error = port.take_poll_error();
    port.close()?;

    if let Some(e) = poll_error {
        return Err(e).context("Receive polling stopped");
    }
    eprintln!();
    eprintln!("{} Monitor closed", style("✓").green());
    Ok(())
}
