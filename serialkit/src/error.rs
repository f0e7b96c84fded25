//! Error types for serialkit.

use std::io;
use thiserror::Error;

/// Result type for serialkit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for serialkit operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The device could not be acquired (missing, busy or permission denied).
    #[error("Port {port} unavailable: {message}")]
    PortUnavailable {
        /// Port name that was requested.
        port: String,
        /// Native error code, if the OS reported one.
        code: Option<i32>,
        /// Human readable reason.
        message: String,
    },

    /// The OS rejected a control-block apply or read-back.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Native error code, if the OS reported one.
        code: Option<i32>,
        /// Human readable reason.
        message: String,
    },

    /// The requested value has no representation on this platform.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// A native read call failed.
    #[error("Read failed (os error {code}): {message}")]
    ReadFailed {
        /// Native error code.
        code: i32,
        /// Human readable reason.
        message: String,
    },

    /// A native write call failed.
    #[error("Write failed (os error {code}): {message}")]
    WriteFailed {
        /// Native error code.
        code: i32,
        /// Human readable reason.
        message: String,
    },

    /// No backend exists for the detected platform.
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// Data bits outside 5..=8.
    #[error("Invalid data bits: {0} (expected 5, 6, 7 or 8)")]
    InvalidDataBits(u8),

    /// The operation needs an open port.
    #[error("Port {0} is not open")]
    NotOpen(String),

    /// `offset + count` does not fit in the caller's buffer.
    #[error("Invalid buffer window: offset {offset} + count {count} exceeds length {len}")]
    InvalidWindow {
        /// Requested start offset.
        offset: usize,
        /// Requested byte count.
        count: usize,
        /// Length of the buffer.
        len: usize,
    },

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The embedding application asked blocking calls to stop.
    #[error("Operation interrupted")]
    Interrupted,

    /// The data-received handler panicked on the poll thread.
    #[error("Data-received handler panicked: {0}")]
    HandlerPanicked(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port enumeration error.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl Error {
    /// Build a [`Error::Configuration`] from a raw OS error code.
    pub(crate) fn configuration(code: i32, context: &str) -> Self {
        Self::Configuration {
            code: Some(code),
            message: format!("{context}: {}", os_message(code)),
        }
    }

    /// Build a [`Error::ReadFailed`] from a raw OS error code.
    pub(crate) fn read_failed(code: i32) -> Self {
        Self::ReadFailed {
            code,
            message: os_message(code),
        }
    }

    /// Build a [`Error::WriteFailed`] from a raw OS error code.
    pub(crate) fn write_failed(code: i32) -> Self {
        Self::WriteFailed {
            code,
            message: os_message(code),
        }
    }

    /// Build a [`Error::PortUnavailable`] from a raw OS error code.
    pub(crate) fn unavailable(port: &str, code: i32) -> Self {
        Self::PortUnavailable {
            port: port.to_string(),
            code: Some(code),
            message: os_message(code),
        }
    }

    /// Native error code carried by this error, if any.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Self::PortUnavailable { code, .. } | Self::Configuration { code, .. } => *code,
            Self::ReadFailed { code, .. } | Self::WriteFailed { code, .. } => Some(*code),
            Self::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }
}

/// Render a native error code the way the OS describes it.
pub(crate) fn os_message(code: i32) -> String {
    io::Error::from_raw_os_error(code)
        .to_string()
        .trim()
        .to_string()
}

/// The calling thread's last native error code.
pub(crate) fn last_os_code() -> i32 {
    io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_code_is_exposed_for_native_failures() {
        assert_eq!(Error::read_failed(5).os_code(), Some(5));
        assert_eq!(Error::write_failed(6).os_code(), Some(6));
        assert_eq!(Error::configuration(22, "tcsetattr").os_code(), Some(22));
        assert_eq!(Error::NotSupported("mark parity".into()).os_code(), None);
    }

    #[test]
    fn test_configuration_message_keeps_context() {
        let err = Error::configuration(22, "SetCommState");
        assert!(err.to_string().contains("SetCommState"));
    }

    #[test]
    fn test_invalid_window_display() {
        let err = Error::InvalidWindow {
            offset: 4,
            count: 8,
            len: 10,
        };
        assert_eq!(
            err.to_string(),
            "Invalid buffer window: offset 4 + count 8 exceeds length 10"
        );
    }
}
