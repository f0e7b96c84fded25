//! # serialkit
//!
//! A cross-platform serial port library.
//!
//! One OS-neutral [`Port`] facade sits on top of a platform backend chosen
//! once at construction:
//!
//! - **POSIX** (Linux, macOS, Android): termios and modem-control ioctls
//! - **Windows**: `DCB`, `COMMTIMEOUTS` and `ClearCommError`
//!
//! On top of raw reads and writes the facade offers line reading,
//! snapshot draining and a level-triggered background data-received
//! notification.
//!
//! ## Features
//!
//! - `serde`: Serialization support for configuration types
//! - `mock`: the scripted in-memory [`testing::MockBackend`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use serialkit::{Parity, Port, PortConfiguration};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PortConfiguration::new("/dev/ttyUSB0", 115200).with_parity(Parity::Even);
//!     let mut port = Port::new(config)?;
//!     port.open()?;
//!
//!     port.set_received_bytes_threshold(4);
//!     port.on_data_received(|event| {
//!         if let Ok(bytes) = event.read_all() {
//!             println!("{} byte(s): {bytes:02X?}", bytes.len());
//!         }
//!     });
//!     port.run_async()?;
//!
//!     port.write_all(b"ping\r\n")?;
//!     std::thread::sleep(std::time::Duration::from_secs(1));
//!     port.close()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod backend;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod platform;
pub mod poller;
pub mod port;
#[cfg(any(test, feature = "mock"))]
pub mod testing;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by blocking library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Only
/// [`Port::read_line`] consults it.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

/// Serializes tests that depend on the global interrupt flag.
#[cfg(test)]
pub(crate) static INTERRUPT_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
pub use {
    backend::{Backend, SystemBackend},
    config::{DataBits, DtrControl, FlushMode, Parity, PortConfiguration, StopBits, Timeouts},
    enumerate::{PortInfo, PortKind, enumerate_ports, list_ports},
    error::{Error, Result},
    platform::{OsFamily, Platform, PlatformDetector},
    poller::{DataReceived, SerialData},
    port::{DEFAULT_NEWLINE, DEFAULT_POLL_INTERVAL, Port},
};
