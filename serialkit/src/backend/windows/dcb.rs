//! Typed view over the Win32 device-control block.
//!
//! `DCB` packs its boolean and two-bit fields into one `u32` bitfield. The
//! layout, from bit 0 up:
//!
//! | bits  | field              |
//! |-------|--------------------|
//! | 0     | `fBinary`          |
//! | 1     | `fParity`          |
//! | 2     | `fOutxCtsFlow`     |
//! | 3     | `fOutxDsrFlow`     |
//! | 4..6  | `fDtrControl`      |
//! | 6     | `fDsrSensitivity`  |
//! | 8     | `fOutX`            |
//! | 9     | `fInX`             |

use windows_sys::Win32::Devices::Communication::{
    DCB, EVENPARITY, MARKPARITY, NOPARITY, ODDPARITY, ONE5STOPBITS, ONESTOPBIT, SPACEPARITY,
    TWOSTOPBITS,
};

use crate::{
    config::{DataBits, DtrControl, Parity, PortConfiguration, StopBits},
    error::{Error, Result},
};

const F_BINARY: u32 = 1 << 0;
const F_PARITY: u32 = 1 << 1;
const F_OUTX_CTS_FLOW: u32 = 1 << 2;
const F_OUTX_DSR_FLOW: u32 = 1 << 3;
const DTR_SHIFT: u32 = 4;
const DTR_MASK: u32 = 0b11 << DTR_SHIFT;
const F_DSR_SENSITIVITY: u32 = 1 << 6;
const F_OUTX: u32 = 1 << 8;
const F_INX: u32 = 1 << 9;

const DTR_CONTROL_DISABLE: u32 = 0;
const DTR_CONTROL_ENABLE: u32 = 1;
const DTR_CONTROL_HANDSHAKE: u32 = 2;

/// Owned `DCB` with typed accessors.
#[derive(Clone, Copy)]
pub(crate) struct DeviceControlBlock(pub(crate) DCB);

impl DeviceControlBlock {
    /// Zeroed block with `DCBlength` filled in, ready for `GetCommState`.
    pub fn empty() -> Self {
        // SAFETY: DCB is plain old data; all-zero is a valid bit pattern.
        let mut dcb: DCB = unsafe { std::mem::zeroed() };
        dcb.DCBlength = u32::try_from(std::mem::size_of::<DCB>()).unwrap_or(u32::MAX);
        Self(dcb)
    }

    /// Encode `config` into the block, leaving unrelated fields untouched.
    pub fn encode(&mut self, config: &PortConfiguration) {
        let dcb = &mut self.0;
        dcb.BaudRate = config.baud_rate;
        dcb.ByteSize = config.data_bits.bits();
        dcb.Parity = match config.parity {
            Parity::None => NOPARITY,
            Parity::Odd => ODDPARITY,
            Parity::Even => EVENPARITY,
            Parity::Mark => MARKPARITY,
            Parity::Space => SPACEPARITY,
        };
        dcb.StopBits = match config.stop_bits {
            StopBits::One => ONESTOPBIT,
            StopBits::OnePointFive => ONE5STOPBITS,
            StopBits::Two => TWOSTOPBITS,
        };

        // Binary mode is mandatory on Win32; no software or hardware flow control.
        dcb._bitfield |= F_BINARY;
        dcb._bitfield &= !(F_OUTX_CTS_FLOW | F_OUTX_DSR_FLOW | F_DSR_SENSITIVITY | F_OUTX | F_INX);
        if config.parity == Parity::None {
            dcb._bitfield &= !F_PARITY;
        } else {
            dcb._bitfield |= F_PARITY;
        }

        let dtr = match config.dtr_control {
            DtrControl::Disable => DTR_CONTROL_DISABLE,
            DtrControl::Enable => DTR_CONTROL_ENABLE,
            DtrControl::Handshake => DTR_CONTROL_HANDSHAKE,
        };
        dcb._bitfield = (dcb._bitfield & !DTR_MASK) | (dtr << DTR_SHIFT);
    }

    pub fn baud_rate(&self) -> u32 {
        self.0.BaudRate
    }

    pub fn data_bits(&self) -> Result<DataBits> {
        DataBits::try_from(self.0.ByteSize)
    }

    pub fn parity(&self) -> Result<Parity> {
        match self.0.Parity {
            NOPARITY => Ok(Parity::None),
            ODDPARITY => Ok(Parity::Odd),
            EVENPARITY => Ok(Parity::Even),
            MARKPARITY => Ok(Parity::Mark),
            SPACEPARITY => Ok(Parity::Space),
            other => Err(unrecognised("Parity", u32::from(other))),
        }
    }

    pub fn stop_bits(&self) -> Result<StopBits> {
        match self.0.StopBits {
            ONESTOPBIT => Ok(StopBits::One),
            ONE5STOPBITS => Ok(StopBits::OnePointFive),
            TWOSTOPBITS => Ok(StopBits::Two),
            other => Err(unrecognised("StopBits", u32::from(other))),
        }
    }

    pub fn dtr_control(&self) -> Result<DtrControl> {
        match (self.0._bitfield & DTR_MASK) >> DTR_SHIFT {
            DTR_CONTROL_DISABLE => Ok(DtrControl::Disable),
            DTR_CONTROL_ENABLE => Ok(DtrControl::Enable),
            DTR_CONTROL_HANDSHAKE => Ok(DtrControl::Handshake),
            other => Err(unrecognised("fDtrControl", other)),
        }
    }
}

fn unrecognised(field: &str, value: u32) -> Error {
    Error::Configuration {
        code: None,
        message: format!("unrecognised DCB {field} value {value}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_all_line_settings() {
        for parity in [Parity::None, Parity::Odd, Parity::Even, Parity::Mark, Parity::Space] {
            for stop_bits in [StopBits::One, StopBits::OnePointFive, StopBits::Two] {
                for dtr in [DtrControl::Disable, DtrControl::Enable, DtrControl::Handshake] {
                    let cfg = PortConfiguration::new("COM3", 250000)
                        .with_parity(parity)
                        .with_stop_bits(stop_bits)
                        .with_data_bits(DataBits::Seven)
                        .with_dtr_control(dtr);
                    let mut block = DeviceControlBlock::empty();
                    block.encode(&cfg);

                    // Windows takes arbitrary rates verbatim.
                    assert_eq!(block.baud_rate(), 250000);
                    assert_eq!(block.data_bits().ok(), Some(DataBits::Seven));
                    assert_eq!(block.parity().ok(), Some(parity));
                    assert_eq!(block.stop_bits().ok(), Some(stop_bits));
                    assert_eq!(block.dtr_control().ok(), Some(dtr));
                }
            }
        }
    }

    #[test]
    fn test_encode_preserves_unrelated_bits() {
        let mut block = DeviceControlBlock::empty();
        // fRtsControl lives in bits 12..14.
        block.0._bitfield = 0b01 << 12 | DTR_MASK;
        block.encode(&PortConfiguration::default());
        assert_eq!(block.0._bitfield & (0b11 << 12), 0b01 << 12);
        assert_eq!(block.dtr_control().ok(), Some(DtrControl::Enable));
        assert_ne!(block.0._bitfield & F_BINARY, 0);
        assert_eq!(block.0._bitfield & F_PARITY, 0);
    }

    #[test]
    fn test_bad_byte_size_is_reported() {
        let mut block = DeviceControlBlock::empty();
        block.0.ByteSize = 9;
        assert!(matches!(block.data_bits(), Err(Error::InvalidDataBits(9))));
    }
}
