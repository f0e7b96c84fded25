//! Platform backends for serial communication.
//!
//! Every backend implements the same [`Backend`] contract:
//!
//! - **POSIX** (Linux, macOS, Android): `termios` + modem-control ioctls
//! - **Windows**: device-control block (`DCB`) + `COMMTIMEOUTS`
//!
//! ```text
//! +------------------+
//! |   Port (facade)  |  readline, read_all, polling
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |  SystemBackend   |  chosen once from the Platform
//! +---+----------+---+
//!     |          |
//!     v          v
//! +---+----+ +---+-----+
//! | termios| |   DCB   |
//! +--------+ +---------+
//!   POSIX      Windows
//! ```
//!
//! ## Property accessors
//!
//! Getters on an open port read the live control block back from the OS and
//! decode it; they never just echo the last value set. Setters validate the
//! new value, re-encode the *whole* control block and push it in one call.
//! While the port is closed, setters only stage the value for the next
//! [`Backend::open`] and getters return the staged value.

#[cfg(unix)]
pub mod posix;

#[cfg(windows)]
pub mod windows;

use std::ops::Range;

use log::debug;

use crate::{
    config::{DataBits, DtrControl, FlushMode, Parity, PortConfiguration, StopBits},
    error::{Error, Result},
    platform::Platform,
};

/// Capability contract shared by every platform backend.
pub trait Backend: Send {
    /// Acquire the device and apply the full configuration.
    ///
    /// Opening an already open backend is a no-op.
    fn open(&mut self) -> Result<()>;

    /// Release the device. Safe to call when never opened or already closed.
    fn close(&mut self) -> Result<()>;

    /// Whether a native handle is currently held.
    fn is_open(&self) -> bool;

    /// Read up to `count` bytes into `buffer[offset..offset + count]`.
    ///
    /// Issues one native read; a short count is a legitimate partial answer.
    fn read(&mut self, buffer: &mut [u8], offset: usize, count: usize) -> Result<usize>;

    /// Write exactly `buffer[offset..offset + count]`.
    fn write(&mut self, buffer: &[u8], offset: usize, count: usize) -> Result<()>;

    /// Discard queued input and/or output.
    fn flush(&mut self, mode: FlushMode) -> Result<()>;

    /// Current baud rate.
    fn baud_rate(&self) -> Result<u32>;

    /// Change the baud rate.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;

    /// Current parity mode.
    fn parity(&self) -> Result<Parity>;

    /// Change the parity mode.
    fn set_parity(&mut self, parity: Parity) -> Result<()>;

    /// Current data bits.
    fn data_bits(&self) -> Result<DataBits>;

    /// Change the data bits.
    fn set_data_bits(&mut self, data_bits: DataBits) -> Result<()>;

    /// Current stop bits.
    fn stop_bits(&self) -> Result<StopBits>;

    /// Change the stop bits.
    fn set_stop_bits(&mut self, stop_bits: StopBits) -> Result<()>;

    /// Current DTR behaviour.
    fn dtr_control(&self) -> Result<DtrControl>;

    /// Change the DTR behaviour.
    fn set_dtr_control(&mut self, dtr_control: DtrControl) -> Result<()>;

    /// Bytes waiting in the OS receive queue.
    fn bytes_to_read(&self) -> Result<usize>;

    /// Bytes waiting in the OS transmit queue.
    fn bytes_to_write(&self) -> Result<usize>;

    /// Port name/path.
    fn port_name(&self) -> &str;

    /// Rename the port. Only allowed while closed.
    fn set_port_name(&mut self, port_name: &str) -> Result<()>;

    /// Staged configuration (what the next apply will push).
    fn configuration(&self) -> &PortConfiguration;
}

/// Validate `offset`/`count` against a buffer of `len` bytes.
pub(crate) fn io_window(len: usize, offset: usize, count: usize) -> Result<Range<usize>> {
    match offset.checked_add(count) {
        Some(end) if end <= len => Ok(offset..end),
        _ => Err(Error::InvalidWindow { offset, count, len }),
    }
}

/// The backend for the platform this process runs on.
///
/// A closed set of variants, picked once at construction; the facade never
/// swaps backends afterwards.
pub enum SystemBackend {
    /// termios backend.
    #[cfg(unix)]
    Posix(posix::PosixBackend),
    /// DCB backend.
    #[cfg(windows)]
    Windows(windows::WindowsBackend),
}

impl SystemBackend {
    /// Select the backend for `platform`.
    ///
    /// Fails with [`Error::UnsupportedPlatform`] when this build carries no
    /// backend for it (e.g. asking for Windows on a Linux build).
    pub fn for_platform(platform: Platform, config: PortConfiguration) -> Result<Self> {
        debug!("Selecting {platform} backend for {}", config.port_name);
        match platform {
            #[cfg(unix)]
            Platform::Linux | Platform::Mac | Platform::Android => {
                Ok(Self::Posix(posix::PosixBackend::new(config)))
            },
            #[cfg(windows)]
            Platform::Windows => Ok(Self::Windows(windows::WindowsBackend::new(config))),
            #[allow(unreachable_patterns)]
            other => Err(Error::UnsupportedPlatform(format!(
                "no {other} backend in this build"
            ))),
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $backend:ident => $body:expr) => {
        match $self {
            #[cfg(unix)]
            SystemBackend::Posix($backend) => $body,
            #[cfg(windows)]
            SystemBackend::Windows($backend) => $body,
        }
    };
}

impl Backend for SystemBackend {
    fn open(&mut self) -> Result<()> {
        dispatch!(self, b => b.open())
    }

    fn close(&mut self) -> Result<()> {
        dispatch!(self, b => b.close())
    }

    fn is_open(&self) -> bool {
        dispatch!(self, b => b.is_open())
    }

    fn read(&mut self, buffer: &mut [u8], offset: usize, count: usize) -> Result<usize> {
        dispatch!(self, b => b.read(buffer, offset, count))
    }

    fn write(&mut self, buffer: &[u8], offset: usize, count: usize) -> Result<()> {
        dispatch!(self, b => b.write(buffer, offset, count))
    }

    fn flush(&mut self, mode: FlushMode) -> Result<()> {
        dispatch!(self, b => b.flush(mode))
    }

    fn baud_rate(&self) -> Result<u32> {
        dispatch!(self, b => b.baud_rate())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        dispatch!(self, b => b.set_baud_rate(baud_rate))
    }

    fn parity(&self) -> Result<Parity> {
        dispatch!(self, b => b.parity())
    }

    fn set_parity(&mut self, parity: Parity) -> Result<()> {
        dispatch!(self, b => b.set_parity(parity))
    }

    fn data_bits(&self) -> Result<DataBits> {
        dispatch!(self, b => b.data_bits())
    }

    fn set_data_bits(&mut self, data_bits: DataBits) -> Result<()> {
        dispatch!(self, b => b.set_data_bits(data_bits))
    }

    fn stop_bits(&self) -> Result<StopBits> {
        dispatch!(self, b => b.stop_bits())
    }

    fn set_stop_bits(&mut self, stop_bits: StopBits) -> Result<()> {
        dispatch!(self, b => b.set_stop_bits(stop_bits))
    }

    fn dtr_control(&self) -> Result<DtrControl> {
        dispatch!(self, b => b.dtr_control())
    }

    fn set_dtr_control(&mut self, dtr_control: DtrControl) -> Result<()> {
        dispatch!(self, b => b.set_dtr_control(dtr_control))
    }

    fn bytes_to_read(&self) -> Result<usize> {
        dispatch!(self, b => b.bytes_to_read())
    }

    fn bytes_to_write(&self) -> Result<usize> {
        dispatch!(self, b => b.bytes_to_write())
    }

    fn port_name(&self) -> &str {
        dispatch!(self, b => b.port_name())
    }

    fn set_port_name(&mut self, port_name: &str) -> Result<()> {
        dispatch!(self, b => b.set_port_name(port_name))
    }

    fn configuration(&self) -> &PortConfiguration {
        dispatch!(self, b => b.configuration())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_window_bounds() {
        assert_eq!(io_window(10, 0, 10).ok(), Some(0..10));
        assert_eq!(io_window(10, 4, 3).ok(), Some(4..7));
        assert_eq!(io_window(10, 10, 0).ok(), Some(10..10));
        assert!(matches!(
            io_window(10, 8, 3),
            Err(Error::InvalidWindow {
                offset: 8,
                count: 3,
                len: 10
            })
        ));
        assert!(io_window(10, usize::MAX, 2).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_build_has_no_windows_backend() {
        let config = PortConfiguration::new("COM1", 9600);
        assert!(matches!(
            SystemBackend::for_platform(Platform::Windows, config),
            Err(Error::UnsupportedPlatform(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_platforms_select_posix() {
        for platform in [Platform::Linux, Platform::Mac, Platform::Android] {
            let config = PortConfiguration::new("/dev/ttyS0", 9600);
            let backend = SystemBackend::for_platform(platform, config);
            assert!(matches!(backend, Ok(SystemBackend::Posix(_))));
            if let Ok(b) = backend {
                assert!(!b.is_open());
                assert_eq!(b.port_name(), "/dev/ttyS0");
            }
        }
    }
}
