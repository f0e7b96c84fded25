//! termios backend for Linux, macOS and Android.
//!
//! The line is put in raw mode: no canonical processing, no echo, no output
//! post-processing. Reads return after `VTIME` deciseconds when nothing
//! arrives (`VMIN` = 0), which bounds every blocking call.
//!
//! Mark/Space parity, 1.5 stop bits and DTR handshaking have no termios
//! representation and fail with [`Error::NotSupported`] before any native
//! call is made.

#![allow(unsafe_code)]

pub mod constants;
mod termios;

use std::ffi::CString;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use log::{debug, trace, warn};

use self::constants::{ConstantTable, nearest_rate, rate_for_value};
use crate::{
    backend::{Backend, io_window},
    config::{DataBits, DtrControl, FlushMode, Parity, PortConfiguration, StopBits},
    error::{Error, Result, last_os_code},
};

/// Flag bits in `c_cflag` this backend owns and checks after every apply.
const OWNED_CFLAGS: libc::tcflag_t = libc::CSIZE | libc::PARENB | libc::PARODD | libc::CSTOPB;

/// Serial port backed by a POSIX tty device.
pub struct PosixBackend {
    config: PortConfiguration,
    fd: Option<OwnedFd>,
    constants: &'static ConstantTable,
}

impl PosixBackend {
    /// Create a closed backend with the given staged configuration.
    pub fn new(config: PortConfiguration) -> Self {
        Self::with_constants(config, ConstantTable::host())
    }

    /// Create a closed backend that resolves native symbols through `constants`.
    pub fn with_constants(config: PortConfiguration, constants: &'static ConstantTable) -> Self {
        Self {
            config,
            fd: None,
            constants,
        }
    }

    fn raw_fd(&self) -> Result<RawFd> {
        self.fd
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or_else(|| Error::NotOpen(self.config.port_name.clone()))
    }

    fn live_or_err(&self) -> Result<Option<termios::termios>> {
        match &self.fd {
            Some(fd) => termios::read(fd.as_raw_fd()).map(Some),
            None => Ok(None),
        }
    }

    /// Stage a change, validate it and push the whole control block if open.
    fn update(&mut self, change: impl FnOnce(&mut PortConfiguration)) -> Result<()> {
        let mut next = self.config.clone();
        change(&mut next);
        validate(&next)?;
        if let Some(fd) = &self.fd {
            apply(fd.as_raw_fd(), &next, self.constants)?;
        }
        self.config = next;
        Ok(())
    }
}

/// Reject values termios cannot express.
pub(crate) fn validate(config: &PortConfiguration) -> Result<()> {
    match config.parity {
        Parity::Mark | Parity::Space => {
            return Err(Error::NotSupported(format!(
                "{:?} parity on POSIX",
                config.parity
            )));
        },
        Parity::None | Parity::Odd | Parity::Even => {},
    }
    if config.stop_bits == StopBits::OnePointFive {
        return Err(Error::NotSupported("1.5 stop bits on POSIX".to_string()));
    }
    if config.dtr_control == DtrControl::Handshake {
        return Err(Error::NotSupported("DTR handshaking on POSIX".to_string()));
    }
    Ok(())
}

/// Encode `config` into `t`, preserving fields the backend does not own.
pub(crate) fn encode(
    t: &mut termios::termios,
    config: &PortConfiguration,
    constants: &ConstantTable,
) -> Result<()> {
    validate(config)?;

    let (rate, speed) = nearest_rate(&constants.baud_rates(), config.baud_rate)
        .ok_or_else(|| Error::NotSupported("no baud rate constants on this host".to_string()))?;
    if rate != config.baud_rate {
        debug!("Baud rate {} mapped to nearest {rate}", config.baud_rate);
    }
    termios::set_speed(t, speed)?;

    // Receiver on, ignore modem status lines for job control.
    t.c_cflag |= libc::CLOCAL | libc::CREAD;

    t.c_cflag &= !libc::CSIZE;
    t.c_cflag |= match config.data_bits {
        DataBits::Five => libc::CS5,
        DataBits::Six => libc::CS6,
        DataBits::Seven => libc::CS7,
        DataBits::Eight => libc::CS8,
    };

    match config.parity {
        Parity::None => {
            t.c_cflag &= !(libc::PARENB | libc::PARODD);
            t.c_iflag &= !libc::INPCK;
        },
        Parity::Odd => {
            t.c_cflag |= libc::PARENB | libc::PARODD;
            t.c_iflag |= libc::INPCK;
        },
        Parity::Even => {
            t.c_cflag |= libc::PARENB;
            t.c_cflag &= !libc::PARODD;
            t.c_iflag |= libc::INPCK;
        },
        Parity::Mark | Parity::Space => {
            return Err(Error::NotSupported(format!(
                "{:?} parity on POSIX",
                config.parity
            )));
        },
    }

    if config.stop_bits == StopBits::Two {
        t.c_cflag |= libc::CSTOPB;
    } else {
        t.c_cflag &= !libc::CSTOPB;
    }

    // Raw input and output.
    t.c_lflag &= !(libc::ICANON | libc::ECHO | libc::ECHOE | libc::ECHONL | libc::ISIG | libc::IEXTEN);
    t.c_iflag &= !(libc::IGNBRK
        | libc::BRKINT
        | libc::PARMRK
        | libc::ISTRIP
        | libc::INLCR
        | libc::IGNCR
        | libc::ICRNL
        | libc::IXON
        | libc::IXOFF
        | libc::IXANY);
    t.c_oflag &= !libc::OPOST;

    t.c_cc[libc::VMIN] = 0;
    t.c_cc[libc::VTIME] = vtime_deciseconds(config);

    Ok(())
}

fn vtime_deciseconds(config: &PortConfiguration) -> libc::cc_t {
    let millis = config
        .timeouts
        .read_total_constant
        .as_millis();
    let deciseconds = millis.div_ceil(100).min(255);
    libc::cc_t::try_from(deciseconds).unwrap_or(255)
}

fn decode_data_bits(t: &termios::termios) -> Result<DataBits> {
    let size = t.c_cflag & libc::CSIZE;
    if size == libc::CS5 {
        Ok(DataBits::Five)
    } else if size == libc::CS6 {
        Ok(DataBits::Six)
    } else if size == libc::CS7 {
        Ok(DataBits::Seven)
    } else if size == libc::CS8 {
        Ok(DataBits::Eight)
    } else {
        Err(Error::Configuration {
            code: None,
            message: format!("unrecognised CSIZE bits {size:#o}"),
        })
    }
}

fn decode_parity(t: &termios::termios) -> Parity {
    if t.c_cflag & libc::PARENB == 0 {
        Parity::None
    } else if t.c_cflag & libc::PARODD != 0 {
        Parity::Odd
    } else {
        Parity::Even
    }
}

fn decode_stop_bits(t: &termios::termios) -> StopBits {
    if t.c_cflag & libc::CSTOPB != 0 {
        StopBits::Two
    } else {
        StopBits::One
    }
}

fn decode_baud_rate(t: &termios::termios, constants: &ConstantTable) -> Result<u32> {
    let speed = termios::get_speed(t);
    rate_for_value(&constants.baud_rates(), speed).ok_or_else(|| Error::Configuration {
        code: None,
        message: format!("unrecognised output speed {speed:#o}"),
    })
}

/// `ENOTTY`/`EINVAL` from the modem ioctls mean the device has no modem lines (e.g. a pty).
fn lacks_modem_lines(code: i32) -> bool {
    code == libc::ENOTTY || code == libc::EINVAL
}

fn apply_dtr(fd: RawFd, mode: DtrControl) -> Result<()> {
    let assert = match mode {
        DtrControl::Enable => true,
        DtrControl::Disable => false,
        DtrControl::Handshake => {
            return Err(Error::NotSupported("DTR handshaking on POSIX".to_string()));
        },
    };

    let status = match termios::modem_lines(fd) {
        Ok(status) => status,
        Err(code) if lacks_modem_lines(code) => {
            trace!("Device has no modem-control lines, skipping DTR");
            return Ok(());
        },
        Err(code) => return Err(Error::configuration(code, "TIOCMGET")),
    };

    let next = if assert {
        status | libc::TIOCM_DTR
    } else {
        status & !libc::TIOCM_DTR
    };
    if next != status {
        termios::set_modem_lines(fd, next).map_err(|code| Error::configuration(code, "TIOCMSET"))?;
    }
    Ok(())
}

/// Read-modify-write the whole termios block, then DTR. Restores the
/// previous block if any later step fails.
fn apply(fd: RawFd, config: &PortConfiguration, constants: &ConstantTable) -> Result<()> {
    let original = termios::read(fd)?;
    let mut next = original;
    encode(&mut next, config, constants)?;
    termios::write(fd, &next)?;

    let result = termios::read(fd).and_then(|check| {
        // Drivers may adjust what they cannot honour (ptys force CS8, no
        // parity). Getters report the adjusted value.
        if check.c_cflag & OWNED_CFLAGS != next.c_cflag & OWNED_CFLAGS {
            warn!(
                "{} adjusted line settings: requested cflag {:#o}, got {:#o}",
                config.port_name,
                next.c_cflag & OWNED_CFLAGS,
                check.c_cflag & OWNED_CFLAGS
            );
        }
        apply_dtr(fd, config.dtr_control)
    });

    match result {
        Ok(()) => {
            trace!(
                "Applied termios to fd {fd}: cflag={:#o} iflag={:#o}",
                next.c_cflag, next.c_iflag
            );
            Ok(())
        },
        Err(e) => {
            let _ = termios::write(fd, &original);
            Err(e)
        },
    }
}

impl Backend for PosixBackend {
    fn open(&mut self) -> Result<()> {
        if self.fd.is_some() {
            return Ok(());
        }
        validate(&self.config)?;

        let name = &self.config.port_name;
        let path = CString::new(name.as_bytes()).map_err(|_| Error::PortUnavailable {
            port: name.clone(),
            code: None,
            message: "port name contains a NUL byte".to_string(),
        })?;

        // Non-blocking so a missing carrier cannot stall open() itself.
        // SAFETY: path is a valid NUL-terminated string.
        let raw = unsafe {
            libc::open(
                path.as_ptr(),
                libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK | libc::O_CLOEXEC,
            )
        };
        if raw < 0 {
            return Err(Error::unavailable(name, last_os_code()));
        }
        // SAFETY: raw is a freshly opened descriptor nobody else owns.
        // Dropping it on any early return below closes the device again.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        termios::set_exclusive(raw).map_err(|code| Error::unavailable(name, code))?;
        termios::clear_nonblocking(raw).map_err(|code| Error::configuration(code, "fcntl"))?;
        apply(raw, &self.config, self.constants)?;
        termios::flush(raw, FlushMode::InputOutput)?;

        debug!("Opened {}", self.config);
        self.fd = Some(fd);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(fd) = self.fd.take() {
            debug!("Closing {}", self.config.port_name);
            drop(fd);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    fn read(&mut self, buffer: &mut [u8], offset: usize, count: usize) -> Result<usize> {
        let window = io_window(buffer.len(), offset, count)?;
        let fd = self.raw_fd()?;
        if count == 0 {
            return Ok(0);
        }
        let target = &mut buffer[window];

        loop {
            // SAFETY: target is a valid writable region of exactly `count` bytes.
            let n = unsafe { libc::read(fd, target.as_mut_ptr().cast(), target.len()) };
            if let Ok(n) = usize::try_from(n) {
                return Ok(n);
            }
            match last_os_code() {
                libc::EINTR => {},
                code if code == libc::EAGAIN || code == libc::EWOULDBLOCK => return Ok(0),
                code => return Err(Error::read_failed(code)),
            }
        }
    }

    fn write(&mut self, buffer: &[u8], offset: usize, count: usize) -> Result<()> {
        let window = io_window(buffer.len(), offset, count)?;
        let fd = self.raw_fd()?;
        let mut pending = &buffer[window];

        while !pending.is_empty() {
            // SAFETY: pending is a valid readable region.
            let n = unsafe { libc::write(fd, pending.as_ptr().cast(), pending.len()) };
            match usize::try_from(n) {
                Ok(0) => return Err(Error::write_failed(libc::EIO)),
                Ok(n) => pending = &pending[n..],
                Err(_) => match last_os_code() {
                    libc::EINTR => {},
                    code => return Err(Error::write_failed(code)),
                },
            }
        }
        Ok(())
    }

    fn flush(&mut self, mode: FlushMode) -> Result<()> {
        let fd = self.raw_fd()?;
        trace!("Flushing {mode:?} on {}", self.config.port_name);
        termios::flush(fd, mode)
    }

    fn baud_rate(&self) -> Result<u32> {
        match self.live_or_err()? {
            Some(t) => decode_baud_rate(&t, self.constants),
            None => Ok(self.config.baud_rate),
        }
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.update(|c| c.baud_rate = baud_rate)
    }

    fn parity(&self) -> Result<Parity> {
        Ok(self
            .live_or_err()?
            .map_or(self.config.parity, |t| decode_parity(&t)))
    }

    fn set_parity(&mut self, parity: Parity) -> Result<()> {
        self.update(|c| c.parity = parity)
    }

    fn data_bits(&self) -> Result<DataBits> {
        match self.live_or_err()? {
            Some(t) => decode_data_bits(&t),
            None => Ok(self.config.data_bits),
        }
    }

    fn set_data_bits(&mut self, data_bits: DataBits) -> Result<()> {
        self.update(|c| c.data_bits = data_bits)
    }

    fn stop_bits(&self) -> Result<StopBits> {
        Ok(self
            .live_or_err()?
            .map_or(self.config.stop_bits, |t| decode_stop_bits(&t)))
    }

    fn set_stop_bits(&mut self, stop_bits: StopBits) -> Result<()> {
        self.update(|c| c.stop_bits = stop_bits)
    }

    fn dtr_control(&self) -> Result<DtrControl> {
        let Some(fd) = &self.fd else {
            return Ok(self.config.dtr_control);
        };
        match termios::modem_lines(fd.as_raw_fd()) {
            Ok(status) if status & libc::TIOCM_DTR != 0 => Ok(DtrControl::Enable),
            Ok(_) => Ok(DtrControl::Disable),
            Err(code) if lacks_modem_lines(code) => Ok(self.config.dtr_control),
            Err(code) => Err(Error::configuration(code, "TIOCMGET")),
        }
    }

    fn set_dtr_control(&mut self, dtr_control: DtrControl) -> Result<()> {
        self.update(|c| c.dtr_control = dtr_control)
    }

    fn bytes_to_read(&self) -> Result<usize> {
        termios::input_queue(self.raw_fd()?)
    }

    fn bytes_to_write(&self) -> Result<usize> {
        termios::output_queue(self.raw_fd()?)
    }

    fn port_name(&self) -> &str {
        &self.config.port_name
    }

    fn set_port_name(&mut self, port_name: &str) -> Result<()> {
        if self.fd.is_some() {
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

impl std::fmt::Debug for PosixBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PosixBackend")
            .field("config", &self.config)
            .field("fd", &self.fd)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn blank() -> termios::termios {
        // SAFETY: termios is plain old data; all-zero is a valid bit pattern.
        unsafe { std::mem::zeroed() }
    }

    fn config() -> PortConfiguration {
        PortConfiguration::new("/dev/null-serial", 115200)
    }

    #[test]
    fn test_encode_then_decode_supported_subset() {
        let constants = ConstantTable::host();
        for data_bits in [DataBits::Five, DataBits::Six, DataBits::Seven, DataBits::Eight] {
            for parity in [Parity::None, Parity::Odd, Parity::Even] {
                for stop_bits in [StopBits::One, StopBits::Two] {
                    let cfg = config()
                        .with_data_bits(data_bits)
                        .with_parity(parity)
                        .with_stop_bits(stop_bits);
                    let mut t = blank();
                    assert!(encode(&mut t, &cfg, constants).is_ok());
                    assert_eq!(decode_data_bits(&t).ok(), Some(data_bits));
                    assert_eq!(decode_parity(&t), parity);
                    assert_eq!(decode_stop_bits(&t), stop_bits);
                    assert_eq!(decode_baud_rate(&t, constants).ok(), Some(115200));
                }
            }
        }
    }

    #[test]
    fn test_encode_clears_existing_size_bits_first() {
        let mut t = blank();
        t.c_cflag |= libc::CS8;
        let cfg = config().with_data_bits(DataBits::Five);
        assert!(encode(&mut t, &cfg, ConstantTable::host()).is_ok());
        assert_eq!(t.c_cflag & libc::CSIZE, libc::CS5);
    }

    #[test]
    fn test_encode_raw_mode_and_read_timeout() {
        let mut t = blank();
        t.c_lflag = libc::ICANON | libc::ECHO;
        t.c_oflag = libc::OPOST;
        t.c_iflag = libc::ISTRIP | libc::ICRNL;
        let cfg = config();
        assert!(encode(&mut t, &cfg, ConstantTable::host()).is_ok());
        assert_eq!(t.c_lflag & (libc::ICANON | libc::ECHO), 0);
        assert_eq!(t.c_oflag & libc::OPOST, 0);
        assert_eq!(t.c_iflag & (libc::ISTRIP | libc::ICRNL), 0);
        assert_ne!(t.c_cflag & libc::CREAD, 0);
        assert_ne!(t.c_cflag & libc::CLOCAL, 0);
        assert_eq!(t.c_cc[libc::VMIN], 0);
        // 50 ms rounds up to one decisecond.
        assert_eq!(t.c_cc[libc::VTIME], 1);
    }

    #[test]
    fn test_encode_clears_break_and_parity_marking() {
        let mut t = blank();
        t.c_iflag = libc::IGNBRK | libc::BRKINT | libc::PARMRK;
        let cfg = config().with_parity(Parity::Even);
        assert!(encode(&mut t, &cfg, ConstantTable::host()).is_ok());
        assert_eq!(t.c_iflag & (libc::IGNBRK | libc::BRKINT | libc::PARMRK), 0);
        assert_ne!(t.c_iflag & libc::INPCK, 0);
    }

    #[test]
    fn test_debug_shows_staged_config_only() {
        let backend = PosixBackend::new(config());
        let text = format!("{backend:?}");
        assert!(text.contains("/dev/null-serial"));
        assert!(text.contains("fd: None"));
        assert!(!text.contains("live"));
    }

    #[test]
    fn test_vtime_rounding_and_clamp() {
        let mut cfg = config();
        cfg.timeouts.read_total_constant = Duration::ZERO;
        assert_eq!(vtime_deciseconds(&cfg), 0);
        cfg.timeouts.read_total_constant = Duration::from_millis(200);
        assert_eq!(vtime_deciseconds(&cfg), 2);
        cfg.timeouts.read_total_constant = Duration::from_secs(60);
        assert_eq!(vtime_deciseconds(&cfg), 255);
    }

    #[test]
    fn test_nearest_baud_is_applied() {
        let mut t = blank();
        let mut cfg = config();
        cfg.baud_rate = 100000;
        assert!(encode(&mut t, &cfg, ConstantTable::host()).is_ok());
        assert_eq!(decode_baud_rate(&t, ConstantTable::host()).ok(), Some(115200));
    }

    #[test]
    fn test_unsupported_values_rejected_without_touching_termios() {
        let cases = [
            config().with_parity(Parity::Mark),
            config().with_parity(Parity::Space),
            config().with_stop_bits(StopBits::OnePointFive),
            config().with_dtr_control(DtrControl::Handshake),
        ];
        for cfg in cases {
            let mut t = blank();
            assert!(matches!(
                encode(&mut t, &cfg, ConstantTable::host()),
                Err(Error::NotSupported(_))
            ));
            assert_eq!(t.c_cflag, 0);
        }
    }

    #[test]
    fn test_closed_backend_stages_and_rejects() {
        let mut backend = PosixBackend::new(config());
        assert!(!backend.is_open());
        assert!(backend.set_baud_rate(9600).is_ok());
        assert_eq!(backend.baud_rate().ok(), Some(9600));
        assert!(backend.set_parity(Parity::Even).is_ok());
        assert_eq!(backend.parity().ok(), Some(Parity::Even));

        assert!(matches!(
            backend.set_parity(Parity::Mark),
            Err(Error::NotSupported(_))
        ));
        // Rejected value is not staged.
        assert_eq!(backend.parity().ok(), Some(Parity::Even));

        assert!(matches!(
            backend.set_stop_bits(StopBits::OnePointFive),
            Err(Error::NotSupported(_))
        ));
        assert_eq!(backend.stop_bits().ok(), Some(StopBits::One));
    }

    #[test]
    fn test_closed_backend_io_reports_not_open() {
        let mut backend = PosixBackend::new(config());
        let mut buf = [0u8; 4];
        assert!(matches!(backend.read(&mut buf, 0, 4), Err(Error::NotOpen(_))));
        assert!(matches!(backend.write(&buf, 0, 4), Err(Error::NotOpen(_))));
        assert!(matches!(backend.bytes_to_read(), Err(Error::NotOpen(_))));
        assert!(matches!(
            backend.flush(FlushMode::Input),
            Err(Error::NotOpen(_))
        ));
    }

    #[test]
    fn test_close_is_idempotent_without_open() {
        let mut backend = PosixBackend::new(config());
        assert!(backend.close().is_ok());
        assert!(backend.close().is_ok());
    }

    #[test]
    fn test_open_missing_device_is_unavailable() {
        let mut backend = PosixBackend::new(PortConfiguration::new("/dev/serialkit-does-not-exist", 9600));
        assert!(matches!(
            backend.open(),
            Err(Error::PortUnavailable { code: Some(c), .. }) if c == libc::ENOENT
        ));
        assert!(!backend.is_open());
    }

    #[test]
    fn test_open_with_unsupported_config_never_acquires() {
        let mut backend =
            PosixBackend::new(config().with_parity(Parity::Space));
        assert!(matches!(backend.open(), Err(Error::NotSupported(_))));
        assert!(!backend.is_open());
    }

    #[test]
    fn test_rename_only_while_closed() {
        let mut backend = PosixBackend::new(config());
        assert!(backend.set_port_name("/dev/ttyS1").is_ok());
        assert_eq!(backend.port_name(), "/dev/ttyS1");
    }

    /// End-to-end tests against a pseudo-terminal pair.
    #[cfg(target_os = "linux")]
    mod pty {
        use super::*;
        use nix::fcntl::OFlag;
        use nix::pty::{PtyMaster, grantpt, posix_openpt, ptsname_r, unlockpt};
        use std::io::{Read, Write};
        use std::thread;

        fn pty_pair() -> (PtyMaster, String) {
            let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).expect("posix_openpt");
            grantpt(&master).expect("grantpt");
            unlockpt(&master).expect("unlockpt");
            let name = ptsname_r(&master).expect("ptsname_r");
            (master, name)
        }

        fn open_backend(name: &str, config: PortConfiguration) -> PosixBackend {
            let mut backend = PosixBackend::new(PortConfiguration {
                port_name: name.to_string(),
                ..config
            });
            backend.open().expect("open pty slave");
            backend
        }

        fn wait_for_input(backend: &PosixBackend, expected: usize) {
            for _ in 0..200 {
                if backend.bytes_to_read().unwrap_or(0) >= expected {
                    return;
                }
                thread::sleep(Duration::from_millis(5));
            }
        }

        #[test]
        fn test_open_applies_and_reads_back_configuration() {
            let (_master, name) = pty_pair();
            let cfg = PortConfiguration::new("", 57600).with_stop_bits(StopBits::Two);
            let mut backend = open_backend(&name, cfg);

            assert!(backend.is_open());
            assert_eq!(backend.baud_rate().ok(), Some(57600));
            assert_eq!(backend.stop_bits().ok(), Some(StopBits::Two));
            assert_eq!(backend.data_bits().ok(), Some(DataBits::Eight));
            assert_eq!(backend.parity().ok(), Some(Parity::None));

            assert!(backend.close().is_ok());
            assert!(backend.close().is_ok());
            assert!(!backend.is_open());
        }

        #[test]
        fn test_setters_push_whole_block_to_live_device() {
            let (_master, name) = pty_pair();
            let mut backend = open_backend(&name, PortConfiguration::default());

            assert!(backend.set_baud_rate(19200).is_ok());
            assert!(backend.set_stop_bits(StopBits::Two).is_ok());
            assert_eq!(backend.baud_rate().ok(), Some(19200));
            assert_eq!(backend.stop_bits().ok(), Some(StopBits::Two));

            // Some kernels force CS8 on a pty and the getter then shows the
            // live value. Others reject CS6 and nothing is staged.
            match backend.set_data_bits(DataBits::Six) {
                Ok(()) => {
                    assert_eq!(backend.configuration().data_bits, DataBits::Six);
                    assert_eq!(backend.data_bits().ok(), Some(DataBits::Eight));
                },
                Err(Error::Configuration { .. }) => {
                    assert_eq!(backend.configuration().data_bits, DataBits::Eight);
                    assert_eq!(backend.data_bits().ok(), Some(DataBits::Eight));
                },
                Err(e) => panic!("unexpected error from set_data_bits: {e}"),
            }

            // Nearest-match quantisation on a live device.
            assert!(backend.set_baud_rate(100000).is_ok());
            assert_eq!(backend.baud_rate().ok(), Some(115200));

            assert!(matches!(
                backend.set_parity(Parity::Mark),
                Err(Error::NotSupported(_))
            ));
            assert_eq!(backend.configuration().parity, Parity::None);
        }

        #[test]
        fn test_write_reaches_peer_in_order() {
            let (mut master, name) = pty_pair();
            let mut backend = open_backend(&name, PortConfiguration::default());

            let payload = b"xxhello serialyy";
            assert!(backend.write(payload, 2, 12).is_ok());

            let mut received = [0u8; 12];
            master.read_exact(&mut received).expect("read from master");
            assert_eq!(&received, b"hello serial");
        }

        #[test]
        fn test_read_honours_offset_and_count() {
            let (mut master, name) = pty_pair();
            let mut backend = open_backend(&name, PortConfiguration::default());

            master.write_all(b"abcdef").expect("write to master");
            wait_for_input(&backend, 6);
            assert_eq!(backend.bytes_to_read().ok(), Some(6));

            let mut buf = [0xEEu8; 8];
            let n = backend.read(&mut buf, 3, 4).expect("read");
            assert_eq!(n, 4);
            assert_eq!(&buf, &[0xEE, 0xEE, 0xEE, b'a', b'b', b'c', b'd', 0xEE]);
            assert_eq!(backend.bytes_to_read().ok(), Some(2));
        }

        #[test]
        fn test_read_times_out_with_zero_bytes() {
            let (_master, name) = pty_pair();
            let mut backend = open_backend(&name, PortConfiguration::default());
            let mut buf = [0u8; 4];
            assert_eq!(backend.read(&mut buf, 0, 4).ok(), Some(0));
        }

        #[test]
        fn test_flush_input_discards_pending_bytes() {
            let (mut master, name) = pty_pair();
            let mut backend = open_backend(&name, PortConfiguration::default());

            master.write_all(b"stale").expect("write to master");
            wait_for_input(&backend, 5);
            assert!(backend.flush(FlushMode::Input).is_ok());
            assert_eq!(backend.bytes_to_read().ok(), Some(0));
        }

        #[test]
        fn test_dtr_readback_on_device_without_modem_lines() {
            let (_master, name) = pty_pair();
            let mut backend = open_backend(&name, PortConfiguration::default());
            assert!(backend.set_dtr_control(DtrControl::Disable).is_ok());
            assert_eq!(backend.dtr_control().ok(), Some(DtrControl::Disable));
            assert!(matches!(
                backend.set_dtr_control(DtrControl::Handshake),
                Err(Error::NotSupported(_))
            ));
        }

        #[test]
        fn test_rename_rejected_while_open() {
            let (_master, name) = pty_pair();
            let mut backend = open_backend(&name, PortConfiguration::default());
            assert!(backend.set_port_name("/dev/ttyS9").is_err());
            assert_eq!(backend.port_name(), name);
        }
    }
}
