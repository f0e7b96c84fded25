//! OS-neutral line configuration.
//!
//! A [`PortConfiguration`] describes everything a backend pushes into the
//! native control block (`termios` or `DCB`) when a port is opened or a
//! property changes. It is a plain value: backends keep a staged copy and
//! re-apply the whole thing on every mutation.

use std::fmt;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,
    /// Parity bit makes the count of set bits odd.
    Odd,
    /// Parity bit makes the count of set bits even.
    Even,
    /// Parity bit always 1.
    Mark,
    /// Parity bit always 0.
    Space,
}

/// Number of data bits per character.
///
/// Constructed from a raw integer with [`DataBits::try_from`], which rejects
/// anything outside 5..=8 instead of clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub enum DataBits {
    /// 5 data bits.
    Five,
    /// 6 data bits.
    Six,
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

impl DataBits {
    /// Numeric bit count.
    pub fn bits(self) -> u8 {
        match self {
            Self::Five => 5,
            Self::Six => 6,
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }
}

impl TryFrom<u8> for DataBits {
    type Error = Error;

    fn try_from(bits: u8) -> Result<Self> {
        match bits {
            5 => Ok(Self::Five),
            6 => Ok(Self::Six),
            7 => Ok(Self::Seven),
            8 => Ok(Self::Eight),
            other => Err(Error::InvalidDataBits(other)),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> Self {
        bits.bits()
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 1.5 stop bits (Windows only).
    #[cfg_attr(feature = "serde", serde(rename = "1.5", alias = "onepointfive"))]
    OnePointFive,
    /// 2 stop bits.
    Two,
}

/// Data Terminal Ready line behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DtrControl {
    /// Keep DTR de-asserted while the port is open.
    Disable,
    /// Assert DTR when the port opens and leave it on.
    #[default]
    Enable,
    /// DTR handshaking driven by the driver.
    Handshake,
}

/// Which OS queue a flush discards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Unread received data.
    Input,
    /// Unsent output data.
    Output,
    /// Both directions.
    InputOutput,
}

/// Native I/O timeout defaults applied on open.
///
/// The Windows backend copies these into `COMMTIMEOUTS` verbatim. The POSIX
/// backend derives `VTIME` from `read_total_constant`, rounded up to whole
/// deciseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Maximum gap between two received bytes.
    pub read_interval: Duration,
    /// Per-byte component of the total read timeout.
    pub read_total_multiplier: Duration,
    /// Constant component of the total read timeout.
    pub read_total_constant: Duration,
    /// Per-byte component of the total write timeout.
    pub write_total_multiplier: Duration,
    /// Constant component of the total write timeout.
    pub write_total_constant: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read_interval: Duration::from_millis(50),
            read_total_multiplier: Duration::from_millis(50),
            read_total_constant: Duration::from_millis(50),
            write_total_multiplier: Duration::from_millis(10),
            write_total_constant: Duration::from_millis(50),
        }
    }
}

/// Complete line configuration for one port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConfiguration {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Requested baud rate.
    pub baud_rate: u32,
    /// Parity mode.
    pub parity: Parity,
    /// Data bits per character.
    pub data_bits: DataBits,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// DTR line behaviour.
    pub dtr_control: DtrControl,
    /// Native I/O timeouts.
    pub timeouts: Timeouts,
}

impl Default for PortConfiguration {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 9600,
            parity: Parity::None,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            dtr_control: DtrControl::Enable,
            timeouts: Timeouts::default(),
        }
    }
}

impl PortConfiguration {
    /// Create a new configuration with port name and baud rate, 8N1 otherwise.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the parity mode.
    #[must_use]
    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Set the data bits.
    #[must_use]
    pub fn with_data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }

    /// Set the stop bits.
    #[must_use]
    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    /// Set the DTR behaviour.
    #[must_use]
    pub fn with_dtr_control(mut self, dtr_control: DtrControl) -> Self {
        self.dtr_control = dtr_control;
        self
    }

    /// Set the native timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

impl fmt::Display for PortConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        };
        let stop = match self.stop_bits {
            StopBits::One => "1",
            StopBits::OnePointFive => "1.5",
            StopBits::Two => "2",
        };
        write!(
            f,
            "{} @ {} {}{}{}",
            self.port_name,
            self.baud_rate,
            self.data_bits.bits(),
            parity,
            stop
        )
    }
}
