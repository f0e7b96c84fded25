//! Serial port enumeration.
//!
//! [`enumerate_ports`] maps a device identifier to the name a user would pass
//! to [`crate::PortConfiguration::new`]. On Windows both sides come from the
//! `HARDWARE\DEVICEMAP\SERIALCOMM` registry key (`\Device\Serial0` →
//! `COM1`). On POSIX families the `serialport` device scan supplies the nodes
//! and the identifier is the node's base name (`ttyUSB0` → `/dev/ttyUSB0`).
//!
//! [`list_ports`] returns the same ports with USB metadata where available.

use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, trace};

use crate::error::{Error, Result};

/// Transport a port is attached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PortKind {
    /// USB-to-UART bridge or CDC-ACM device.
    Usb,
    /// PCI serial card.
    Pci,
    /// Bluetooth RFCOMM link.
    Bluetooth,
    /// Anything else (on-board UART, pseudo-terminal, ...).
    Unknown,
}

/// Serial port information.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// Transport.
    pub kind: PortKind,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

impl PortInfo {
    fn from_serialport(info: serialport::SerialPortInfo) -> Self {
        let mut port = Self {
            name: info.port_name,
            kind: PortKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        };

        match info.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                trace!(
                    "Found USB port: {} (VID: {:04X}, PID: {:04X})",
                    port.name, usb.vid, usb.pid
                );
                port.kind = PortKind::Usb;
                port.vid = Some(usb.vid);
                port.pid = Some(usb.pid);
                port.manufacturer = usb.manufacturer;
                port.product = usb.product;
                port.serial_number = usb.serial_number;
            },
            serialport::SerialPortType::PciPort => port.kind = PortKind::Pci,
            serialport::SerialPortType::BluetoothPort => port.kind = PortKind::Bluetooth,
            serialport::SerialPortType::Unknown => {},
        }

        port
    }

    /// One-line description for listings.
    pub fn describe(&self) -> String {
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => {
                let label = self
                    .product
                    .as_deref()
                    .or(self.manufacturer.as_deref())
                    .unwrap_or("USB serial");
                format!("{} [{label}] ({vid:04X}:{pid:04X})", self.name)
            },
            _ => format!("{} [{:?}]", self.name, self.kind),
        }
    }
}

/// All serial ports the OS reports, with whatever metadata it exposes.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(Error::Serial)?;
    debug!("Enumerated {} serial port(s)", ports.len());
    Ok(ports
        .into_iter()
        .map(PortInfo::from_serialport)
        .collect())
}

/// Device identifier → user-facing port name.
#[cfg(windows)]
pub fn enumerate_ports() -> Result<BTreeMap<String, String>> {
    registry::serial_comm()
}

/// Device identifier → user-facing port name.
#[cfg(not(windows))]
pub fn enumerate_ports() -> Result<BTreeMap<String, String>> {
    let names = list_ports()?
        .into_iter()
        .map(|p| p.name);
    Ok(index_by_node(names))
}

/// Key device paths by their base name.
fn index_by_node(names: impl IntoIterator<Item = String>) -> BTreeMap<String, String> {
    names
        .into_iter()
        .map(|name| {
            let id = Path::new(&name)
                .file_name()
                .map_or_else(|| name.clone(), |n| n.to_string_lossy().into_owned());
            (id, name)
        })
        .collect()
}

#[cfg(windows)]
#[allow(unsafe_code)]
mod registry {
    use std::collections::BTreeMap;
    use std::ptr;

    use log::trace;
    use windows_sys::Win32::{
        Foundation::{ERROR_FILE_NOT_FOUND, ERROR_MORE_DATA, ERROR_NO_MORE_ITEMS, ERROR_SUCCESS},
        System::Registry::{
            HKEY, HKEY_LOCAL_MACHINE, KEY_READ, REG_SZ, RegCloseKey, RegEnumValueW,
            RegOpenKeyExW,
        },
    };

    use crate::error::{Error, Result};

    const SERIALCOMM: &str = r"HARDWARE\DEVICEMAP\SERIALCOMM";

    /// Largest value name the registry allows, in UTF-16 units.
    const MAX_NAME: usize = 16_384;

    struct Key(HKEY);

    impl Drop for Key {
        fn drop(&mut self) {
            // SAFETY: the key was opened by RegOpenKeyExW and is closed once.
            unsafe {
                RegCloseKey(self.0);
            }
        }
    }

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16()
            .chain(std::iter::once(0))
            .collect()
    }

    fn from_wide(units: &[u16]) -> String {
        let end = units
            .iter()
            .position(|&u| u == 0)
            .unwrap_or(units.len());
        String::from_utf16_lossy(&units[..end])
    }

    pub(super) fn serial_comm() -> Result<BTreeMap<String, String>> {
        let path = wide(SERIALCOMM);
        let mut raw: HKEY = ptr::null_mut();
        // SAFETY: path is NUL-terminated; raw receives the opened key.
        let status = unsafe { RegOpenKeyExW(HKEY_LOCAL_MACHINE, path.as_ptr(), 0, KEY_READ, &mut raw) };
        if status == ERROR_FILE_NOT_FOUND {
            // The key only exists while at least one serial device is present.
            return Ok(BTreeMap::new());
        }
        if status != ERROR_SUCCESS {
            return Err(Error::configuration(status as i32, "RegOpenKeyExW"));
        }
        let key = Key(raw);

        let mut ports = BTreeMap::new();
        let mut name = vec![0u16; MAX_NAME];
        let mut data = vec![0u8; 512];
        let mut index = 0u32;
        loop {
            let mut name_len = name.len() as u32;
            let mut data_len = data.len() as u32;
            let mut kind = 0u32;
            // SAFETY: buffers and their lengths describe live allocations.
            let status = unsafe {
                RegEnumValueW(
                    key.0,
                    index,
                    name.as_mut_ptr(),
                    &mut name_len,
                    ptr::null(),
                    &mut kind,
                    data.as_mut_ptr(),
                    &mut data_len,
                )
            };
            match status {
                ERROR_SUCCESS => {},
                ERROR_NO_MORE_ITEMS => break,
                ERROR_MORE_DATA => {
                    // Retry the same index with a larger data buffer.
                    data.resize(data_len as usize, 0);
                    trace!("Growing registry value buffer to {data_len} bytes");
                    continue;
                },
                other => return Err(Error::configuration(other as i32, "RegEnumValueW")),
            }
            index += 1;
            if kind != REG_SZ {
                continue;
            }

            let device = from_wide(&name[..name_len as usize]);
            let units: Vec<u16> = data[..data_len as usize]
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            let port = from_wide(&units);
            trace!("SERIALCOMM {device} -> {port}");
            ports.insert(device, port);
        }
        Ok(ports)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_from_wide_stops_at_nul() {
            let units: Vec<u16> = "COM3\0junk".encode_utf16().collect();
            assert_eq!(from_wide(&units), "COM3");
        }

        #[test]
        fn test_serial_comm_values_look_like_com_ports() {
            for port in serial_comm().unwrap().values() {
                assert!(port.starts_with("COM"), "{port}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_by_node_uses_base_name() {
        let map = index_by_node([
            "/dev/ttyUSB0".to_string(),
            "/dev/cu.usbserial-1410".to_string(),
            "/dev/ttyACM1".to_string(),
        ]);
        assert_eq!(map.get("ttyUSB0").map(String::as_str), Some("/dev/ttyUSB0"));
        assert_eq!(
            map.get("cu.usbserial-1410").map(String::as_str),
            Some("/dev/cu.usbserial-1410")
        );
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_describe_usb_and_plain() {
        let usb = PortInfo {
            name: "/dev/ttyUSB0".into(),
            kind: PortKind::Usb,
            vid: Some(0x1A86),
            pid: Some(0x7523),
            manufacturer: Some("QinHeng".into()),
            product: None,
            serial_number: None,
        };
        assert_eq!(usb.describe(), "/dev/ttyUSB0 [QinHeng] (1A86:7523)");

        let plain = PortInfo {
            name: "/dev/ttyS0".into(),
            kind: PortKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        };
        assert_eq!(plain.describe(), "/dev/ttyS0 [Unknown]");
    }

    #[cfg(not(windows))]
    #[test]
    fn test_enumerate_ports_keys_match_listed_base_names() {
        // The host may have no ports at all; the two views must still agree.
        let Ok(listed) = list_ports() else {
            return;
        };
        let map = enumerate_ports().unwrap();
        let mut expected: Vec<String> = listed
            .iter()
            .filter_map(|p| Path::new(&p.name).file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        expected.sort();
        expected.dedup();
        assert_eq!(map.keys().cloned().collect::<Vec<_>>(), expected);
        for (id, name) in &map {
            assert!(name.ends_with(id.as_str()));
        }
    }
}
