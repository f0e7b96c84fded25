//! One-shot send and read-line commands.

use std::time::Duration;

use anyhow::{Context, Result};
use log::info;

use crate::config::Config;
use crate::{Cli, CliError, open_port};

/// Parse hex bytes, with or without whitespace between pairs.
fn parse_hex(text: &str) -> Result<Vec<u8>, CliError> {
    let digits: Vec<char> = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        return Err(CliError::Usage(format!(
            "Hex payload has an odd number of digits: {text}"
        )));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let byte: String = pair.iter().collect();
            if !pair.iter().all(char::is_ascii_hexdigit) {
                return Err(CliError::Usage(format!("Invalid hex byte: {byte}")));
            }
            u8::from_str_radix(&byte, 16)
                .map_err(|_| CliError::Usage(format!("Invalid hex byte: {byte}")))
        })
        .collect()
}

/// Write `text` (or the bytes it encodes) to the port.
pub(crate) fn cmd_send(
    cli: &Cli,
    config: &mut Config,
    text: &str,
    hex: bool,
    newline: bool,
) -> Result<()> {
    let mut payload = if hex {
        parse_hex(text)?
    } else {
        text.as_bytes().to_vec()
    };

    let mut port = open_port(cli, config)?;
    if newline {
        payload.extend_from_slice(port.newline());
    }

    port.write_all(&payload)
        .with_context(|| format!("Failed to write to {}", port.port_name()))?;
    info!("Sent {} byte(s) to {}", payload.len(), port.port_name());
    port.close()?;
    Ok(())
}

/// Read one line and print it without the terminator.
pub(crate) fn cmd_read_line(cli: &Cli, config: &mut Config, timeout_ms: Option<u64>) -> Result<()> {
    let mut port = open_port(cli, config)?;
    let timeout = timeout_ms
        .or(config.line.read_timeout_ms)
        .map(Duration::from_millis);
    port.set_read_line_timeout(timeout);

    let line = port
        .read_line()
        .with_context(|| format!("Failed to read a line from {}", port.port_name()))?;
    println!("{line}");
    port.close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_with_and_without_spaces() {
        assert_eq!(parse_hex("48 65 6c 6C").unwrap(), b"Hell");
        assert_eq!(parse_hex("0d0A").unwrap(), b"\r\n");
        assert!(parse_hex("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_hex_rejects_odd_length() {
        assert!(matches!(parse_hex("123"), Err(CliError::Usage(_))));
    }

    #[test]
    fn test_parse_hex_rejects_non_hex() {
        let err = parse_hex("zz").unwrap_err();
        assert!(err.to_string().contains("zz"));
        assert!(parse_hex("+1").is_err());
    }
}
