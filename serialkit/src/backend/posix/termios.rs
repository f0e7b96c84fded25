//! Thin typed wrappers over the libc termios and tty ioctl calls.

use std::mem::MaybeUninit;
use std::os::fd::RawFd;

use crate::config::FlushMode;
use crate::error::{Error, Result, last_os_code};

#[allow(non_camel_case_types)]
pub type termios = libc::termios;

pub fn read(fd: RawFd) -> Result<termios> {
    let mut termios = MaybeUninit::<termios>::uninit();

    // SAFETY: tcgetattr fully initialises the struct when it returns 0.
    unsafe {
        if libc::tcgetattr(fd, termios.as_mut_ptr()) < 0 {
            return Err(Error::configuration(last_os_code(), "tcgetattr"));
        }
        Ok(termios.assume_init())
    }
}

pub fn write(fd: RawFd, termios: &termios) -> Result<()> {
    // SAFETY: termios points to a valid, initialised struct.
    unsafe {
        if libc::tcsetattr(fd, libc::TCSANOW, termios) < 0 {
            return Err(Error::configuration(last_os_code(), "tcsetattr"));
        }
    }

    Ok(())
}

pub fn flush(fd: RawFd, mode: FlushMode) -> Result<()> {
    let queue = match mode {
        FlushMode::Input => libc::TCIFLUSH,
        FlushMode::Output => libc::TCOFLUSH,
        FlushMode::InputOutput => libc::TCIOFLUSH,
    };

    // SAFETY: plain syscall on a descriptor we own.
    unsafe {
        if libc::tcflush(fd, queue) < 0 {
            return Err(Error::configuration(last_os_code(), "tcflush"));
        }
    }

    Ok(())
}

pub fn get_speed(termios: &termios) -> u64 {
    // SAFETY: reads a field of an initialised struct.
    u64::from(unsafe { libc::cfgetospeed(termios) })
}

pub fn set_speed(termios: &mut termios, speed: u64) -> Result<()> {
    let speed = libc::speed_t::try_from(speed).map_err(|_| Error::Configuration {
        code: None,
        message: format!("speed constant {speed:#o} does not fit speed_t"),
    })?;

    // SAFETY: termios is a valid, initialised struct.
    unsafe {
        if libc::cfsetspeed(termios, speed) < 0 {
            return Err(Error::configuration(last_os_code(), "cfsetspeed"));
        }
    }

    Ok(())
}

/// Modem-control line bits (`TIOCM_*`), or the raw errno when the device has none.
pub fn modem_lines(fd: RawFd) -> std::result::Result<libc::c_int, i32> {
    let mut status: libc::c_int = 0;

    // SAFETY: TIOCMGET writes one c_int through the pointer.
    unsafe {
        if libc::ioctl(fd, libc::TIOCMGET, &mut status) < 0 {
            return Err(last_os_code());
        }
    }

    Ok(status)
}

pub fn set_modem_lines(fd: RawFd, status: libc::c_int) -> std::result::Result<(), i32> {
    // SAFETY: TIOCMSET reads one c_int through the pointer.
    unsafe {
        if libc::ioctl(fd, libc::TIOCMSET, &status) < 0 {
            return Err(last_os_code());
        }
    }

    Ok(())
}

pub fn input_queue(fd: RawFd) -> Result<usize> {
    let mut bytes: libc::c_int = 0;

    // SAFETY: FIONREAD writes one c_int through the pointer.
    unsafe {
        if libc::ioctl(fd, libc::FIONREAD, &mut bytes) < 0 {
            return Err(Error::configuration(last_os_code(), "FIONREAD"));
        }
    }

    Ok(usize::try_from(bytes).unwrap_or(0))
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "macos", target_os = "ios"))]
pub fn output_queue(fd: RawFd) -> Result<usize> {
    let mut bytes: libc::c_int = 0;

    // SAFETY: TIOCOUTQ writes one c_int through the pointer.
    unsafe {
        if libc::ioctl(fd, libc::TIOCOUTQ, &mut bytes) < 0 {
            return Err(Error::configuration(last_os_code(), "TIOCOUTQ"));
        }
    }

    Ok(usize::try_from(bytes).unwrap_or(0))
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "macos", target_os = "ios")))]
pub fn output_queue(_fd: RawFd) -> Result<usize> {
    Err(Error::NotSupported(
        "output queue depth is not available on this host".to_string(),
    ))
}

pub fn set_exclusive(fd: RawFd) -> std::result::Result<(), i32> {
    // SAFETY: TIOCEXCL takes no argument.
    unsafe {
        if libc::ioctl(fd, libc::TIOCEXCL) < 0 {
            return Err(last_os_code());
        }
    }

    Ok(())
}

/// Switch the descriptor back to blocking mode once carrier-detect can no longer stall open().
pub fn clear_nonblocking(fd: RawFd) -> std::result::Result<(), i32> {
    // SAFETY: plain fcntl calls on a descriptor we own.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) < 0 {
            return Err(last_os_code());
        }
    }

    Ok(())
}
