//! Win32 backend: `CreateFileW` on `\\.\COMx`, configured through `DCB` and
//! `COMMTIMEOUTS`.
//!
//! Every parity, stop-bit and DTR mode has a `DCB` encoding, so nothing is
//! rejected up front; the driver may still refuse a combination (e.g. 1.5 stop
//! bits with 8 data bits), which surfaces as [`Error::Configuration`].

#![allow(unsafe_code)]

mod dcb;

use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
use std::ptr;

use log::{debug, trace};
use windows_sys::Win32::{
    Devices::Communication::{
        COMMTIMEOUTS, COMSTAT, ClearCommError, GetCommState, PURGE_RXABORT, PURGE_RXCLEAR,
        PURGE_TXABORT, PURGE_TXCLEAR, PurgeComm, SetCommState, SetCommTimeouts,
    },
    Foundation::{GENERIC_READ, GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE},
    Storage::FileSystem::{FILE_ATTRIBUTE_NORMAL, OPEN_EXISTING, CreateFileW, ReadFile, WriteFile},
};

use self::dcb::DeviceControlBlock;
use crate::{
    backend::{Backend, io_window},
    config::{DataBits, DtrControl, FlushMode, Parity, PortConfiguration, StopBits, Timeouts},
    error::{Error, Result, last_os_code},
};

/// Prefix that lets `CreateFileW` reach COM10 and above.
const DEVICE_NAMESPACE: &str = r"\\.\";

/// Serial port backed by a Win32 communications handle.
pub struct WindowsBackend {
    config: PortConfiguration,
    handle: Option<OwnedHandle>,
}

impl WindowsBackend {
    /// Create a closed backend with the given staged configuration.
    pub fn new(config: PortConfiguration) -> Self {
        Self {
            config,
            handle: None,
        }
    }

    fn raw_handle(&self) -> Result<HANDLE> {
        self.handle
            .as_ref()
            .map(AsRawHandle::as_raw_handle)
            .ok_or_else(|| Error::NotOpen(self.config.port_name.clone()))
    }

    fn live(&self) -> Result<Option<DeviceControlBlock>> {
        match &self.handle {
            Some(h) => read_state(h.as_raw_handle()).map(Some),
            None => Ok(None),
        }
    }

    fn update(&mut self, change: impl FnOnce(&mut PortConfiguration)) -> Result<()> {
        let mut next = self.config.clone();
        change(&mut next);
        if let Some(h) = &self.handle {
            apply(h.as_raw_handle(), &next)?;
        }
        self.config = next;
        Ok(())
    }
}

fn device_path(port_name: &str) -> Vec<u16> {
    let path = if port_name.starts_with(DEVICE_NAMESPACE) {
        port_name.to_string()
    } else {
        format!("{DEVICE_NAMESPACE}{port_name}")
    };
    path.encode_utf16()
        .chain(std::iter::once(0))
        .collect()
}

fn read_state(handle: HANDLE) -> Result<DeviceControlBlock> {
    let mut block = DeviceControlBlock::empty();
    // SAFETY: block.0 is a valid DCB with DCBlength set.
    if unsafe { GetCommState(handle, &mut block.0) } == 0 {
        return Err(Error::configuration(last_os_code(), "GetCommState"));
    }
    Ok(block)
}

/// Read-modify-write the whole `DCB` in one `SetCommState` call.
fn apply(handle: HANDLE, config: &PortConfiguration) -> Result<()> {
    let mut block = read_state(handle)?;
    block.encode(config);
    // SAFETY: block.0 is a fully initialised DCB.
    if unsafe { SetCommState(handle, &block.0) } == 0 {
        return Err(Error::configuration(last_os_code(), "SetCommState"));
    }
    trace!("Applied DCB: {}", config);
    Ok(())
}

fn millis(d: std::time::Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

fn apply_timeouts(handle: HANDLE, timeouts: &Timeouts) -> Result<()> {
    let native = COMMTIMEOUTS {
        ReadIntervalTimeout: millis(timeouts.read_interval),
        ReadTotalTimeoutMultiplier: millis(timeouts.read_total_multiplier),
        ReadTotalTimeoutConstant: millis(timeouts.read_total_constant),
        WriteTotalTimeoutMultiplier: millis(timeouts.write_total_multiplier),
        WriteTotalTimeoutConstant: millis(timeouts.write_total_constant),
    };
    // SAFETY: native is a fully initialised COMMTIMEOUTS.
    if unsafe { SetCommTimeouts(handle, &native) } == 0 {
        return Err(Error::configuration(last_os_code(), "SetCommTimeouts"));
    }
    Ok(())
}

fn purge(handle: HANDLE, flags: u32) -> Result<()> {
    // SAFETY: plain call on a handle we own.
    if unsafe { PurgeComm(handle, flags) } == 0 {
        return Err(Error::configuration(last_os_code(), "PurgeComm"));
    }
    Ok(())
}

fn comm_status(handle: HANDLE) -> Result<COMSTAT> {
    let mut errors = 0u32;
    // SAFETY: COMSTAT is plain old data; all-zero is a valid bit pattern.
    let mut status: COMSTAT = unsafe { std::mem::zeroed() };
    // SAFETY: both out-pointers reference live locals.
    if unsafe { ClearCommError(handle, &mut errors, &mut status) } == 0 {
        return Err(Error::configuration(last_os_code(), "ClearCommError"));
    }
    if errors != 0 {
        trace!("ClearCommError cleared line errors {errors:#x}");
    }
    Ok(status)
}

impl Backend for WindowsBackend {
    fn open(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let path = device_path(&self.config.port_name);
        // SAFETY: path is NUL-terminated UTF-16; no security attributes or template.
        let raw = unsafe {
            CreateFileW(
                path.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                0,
                ptr::null(),
                OPEN_EXISTING,
                FILE_ATTRIBUTE_NORMAL,
                ptr::null_mut(),
            )
        };
        if raw == INVALID_HANDLE_VALUE {
            return Err(Error::unavailable(&self.config.port_name, last_os_code()));
        }
        // SAFETY: raw is a freshly opened handle nobody else owns.
        // Dropping it on any early return below closes the device again.
        let handle = unsafe { OwnedHandle::from_raw_handle(raw) };

        apply(raw, &self.config)?;
        apply_timeouts(raw, &self.config.timeouts)?;
        purge(raw, PURGE_RXABORT | PURGE_RXCLEAR | PURGE_TXABORT | PURGE_TXCLEAR)?;

        debug!("Opened {}", self.config);
        self.handle = Some(handle);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            debug!("Closing {}", self.config.port_name);
            drop(handle);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn read(&mut self, buffer: &mut [u8], offset: usize, count: usize) -> Result<usize> {
        let window = io_window(buffer.len(), offset, count)?;
        let handle = self.raw_handle()?;
        if count == 0 {
            return Ok(0);
        }
        let target = &mut buffer[window];
        let len = u32::try_from(target.len()).unwrap_or(u32::MAX);
        let mut read = 0u32;

        // SAFETY: target is writable for at least `len` bytes; synchronous I/O.
        let ok = unsafe { ReadFile(handle, target.as_mut_ptr(), len, &mut read, ptr::null_mut()) };
        if ok == 0 {
            return Err(Error::read_failed(last_os_code()));
        }
        Ok(read as usize)
    }

    fn write(&mut self, buffer: &[u8], offset: usize, count: usize) -> Result<()> {
        let window = io_window(buffer.len(), offset, count)?;
        let handle = self.raw_handle()?;
        let mut pending = &buffer[window];

        while !pending.is_empty() {
            let len = u32::try_from(pending.len()).unwrap_or(u32::MAX);
            let mut written = 0u32;
            // SAFETY: pending is readable for at least `len` bytes; synchronous I/O.
            let ok =
                unsafe { WriteFile(handle, pending.as_ptr(), len, &mut written, ptr::null_mut()) };
            if ok == 0 {
                return Err(Error::write_failed(last_os_code()));
            }
            if written == 0 {
                return Err(Error::Timeout(format!(
                    "write to {} made no progress",
                    self.config.port_name
                )));
            }
            pending = &pending[written as usize..];
        }
        Ok(())
    }

    fn flush(&mut self, mode: FlushMode) -> Result<()> {
        let handle = self.raw_handle()?;
        let flags = match mode {
            FlushMode::Input => PURGE_RXABORT | PURGE_RXCLEAR,
            FlushMode::Output => PURGE_TXABORT | PURGE_TXCLEAR,
            FlushMode::InputOutput => PURGE_RXABORT | PURGE_RXCLEAR | PURGE_TXABORT | PURGE_TXCLEAR,
        };
        purge(handle, flags)
    }

    fn baud_rate(&self) -> Result<u32> {
        Ok(self
            .live()?
            .map_or(self.config.baud_rate, |b| b.baud_rate()))
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.update(|c| c.baud_rate = baud_rate)
    }

    fn parity(&self) -> Result<Parity> {
        match self.live()? {
            Some(b) => b.parity(),
            None => Ok(self.config.parity),
        }
    }

    fn set_parity(&mut self, parity: Parity) -> Result<()> {
        self.update(|c| c.parity = parity)
    }

    fn data_bits(&self) -> Result<DataBits> {
        match self.live()? {
            Some(b) => b.data_bits(),
            None => Ok(self.config.data_bits),
        }
    }

    fn set_data_bits(&mut self, data_bits: DataBits) -> Result<()> {
        self.update(|c| c.data_bits = data_bits)
    }

    fn stop_bits(&self) -> Result<StopBits> {
        match self.live()? {
            Some(b) => b.stop_bits(),
            None => Ok(self.config.stop_bits),
        }
    }

    fn set_stop_bits(&mut self, stop_bits: StopBits) -> Result<()> {
        self.update(|c| c.stop_bits = stop_bits)
    }

    fn dtr_control(&self) -> Result<DtrControl> {
        match self.live()? {
            Some(b) => b.dtr_control(),
            None => Ok(self.config.dtr_control),
        }
    }

    fn set_dtr_control(&mut self, dtr_control: DtrControl) -> Result<()> {
        self.update(|c| c.dtr_control = dtr_control)
    }

    fn bytes_to_read(&self) -> Result<usize> {
        comm_status(self.raw_handle()?).map(|s| s.cbInQue as usize)
    }

    fn bytes_to_write(&self) -> Result<usize> {
        comm_status(self.raw_handle()?).map(|s| s.cbOutQue as usize)
    }

    fn port_name(&self) -> &str {
        &self.config.port_name
    }

    fn set_port_name(&mut self, port_name: &str) -> Result<()> {
        if self.handle.is_some() {
            return Err(Error::Configuration {
                code: None,
                message: "cannot rename an open port".to_string(),
            });
        }
        self.config.port_name = port_name.to_string();
        Ok(())
    }

    fn configuration(&self) -> &PortConfiguration {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_path_adds_namespace_once() {
        let expected: Vec<u16> = r"\\.\COM12".encode_utf16().chain([0]).collect();
        assert_eq!(device_path("COM12"), expected);
        assert_eq!(device_path(r"\\.\COM12"), expected);
    }

    #[test]
    fn test_open_missing_port_is_unavailable() {
        let mut backend = WindowsBackend::new(PortConfiguration::new("COM250", 9600));
        assert!(matches!(
            backend.open(),
            Err(Error::PortUnavailable { code: Some(_), .. })
        ));
        assert!(!backend.is_open());
        assert!(backend.close().is_ok());
    }

    #[test]
    fn test_closed_backend_stages_every_value() {
        let mut backend = WindowsBackend::new(PortConfiguration::new("COM3", 9600));
        assert!(backend.set_parity(Parity::Mark).is_ok());
        assert!(backend.set_stop_bits(StopBits::OnePointFive).is_ok());
        assert!(backend.set_dtr_control(DtrControl::Handshake).is_ok());
        assert_eq!(backend.parity().ok(), Some(Parity::Mark));
        assert_eq!(backend.stop_bits().ok(), Some(StopBits::OnePointFive));
        assert_eq!(backend.dtr_control().ok(), Some(DtrControl::Handshake));
        assert!(matches!(backend.bytes_to_read(), Err(Error::NotOpen(_))));
    }
}
