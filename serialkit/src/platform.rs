//! Host platform detection.
//!
//! The reported OS family decides between Windows and the Unix family; within
//! the Unix family, filesystem probes tell macOS and Android apart from plain
//! Linux. Detection runs once per [`PlatformDetector`] and the answer is
//! memoized, since the host cannot change under a running process.
//!
//! Most callers only need [`Platform::current`]. Code that wants to pin a
//! platform (tests, cross-tooling) passes a [`Platform`] value explicitly to
//! [`crate::Port::with_platform`] instead.

use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use log::debug;

use crate::error::{Error, Result};

/// Root directories that coexist only on macOS.
const MAC_ROOT_DIRS: [&str; 4] = ["/Applications", "/System", "/Users", "/Volumes"];

/// File present on every Android system image.
const ANDROID_MARKER: &str = "/system/build.prop";

/// Operating system family as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OsFamily {
    /// Windows NT family.
    Windows,
    /// Any Unix-like system.
    Unix,
    /// Anything else, with the identifier that was reported.
    Other(String),
}

impl OsFamily {
    /// Family of the running host.
    pub fn host() -> Self {
        match std::env::consts::FAMILY {
            "windows" => Self::Windows,
            "unix" => Self::Unix,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Platform families with a serial backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    /// Windows (DCB backend).
    Windows,
    /// Linux (termios backend).
    Linux,
    /// macOS (termios backend).
    Mac,
    /// Android (termios backend).
    Android,
}

impl Platform {
    /// Platform of the running process, detected once and cached.
    pub fn current() -> Result<Self> {
        static HOST: OnceLock<PlatformDetector<HostProbe>> = OnceLock::new();
        HOST.get_or_init(|| PlatformDetector::new(OsFamily::host(), HostProbe))
            .detect()
    }

    /// Whether this platform uses the POSIX termios backend.
    pub fn is_posix(self) -> bool {
        !matches!(self, Self::Windows)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Windows => "Windows",
            Self::Linux => "Linux",
            Self::Mac => "macOS",
            Self::Android => "Android",
        })
    }
}

/// Filesystem existence checks used to tell Unix flavours apart.
pub trait FsProbe {
    /// Whether `path` exists and is a directory.
    fn dir_exists(&self, path: &Path) -> bool;

    /// Whether `path` exists and is a regular file.
    fn file_exists(&self, path: &Path) -> bool;
}

/// Probe backed by the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostProbe;

impl FsProbe for HostProbe {
    fn dir_exists(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// Memoizing platform detector.
#[derive(Debug)]
pub struct PlatformDetector<P> {
    family: OsFamily,
    probe: P,
    detected: OnceLock<std::result::Result<Platform, String>>,
}

impl<P: FsProbe> PlatformDetector<P> {
    /// Create a detector for the given OS family and probe.
    pub fn new(family: OsFamily, probe: P) -> Self {
        Self {
            family,
            probe,
            detected: OnceLock::new(),
        }
    }

    /// Detected platform. Only the first call touches the probe.
    pub fn detect(&self) -> Result<Platform> {
        self.detected
            .get_or_init(|| {
                let detected = classify(&self.family, &self.probe);
                debug!("Platform detection for {:?}: {detected:?}", self.family);
                detected
            })
            .clone()
            .map_err(Error::UnsupportedPlatform)
    }
}

fn classify<P: FsProbe>(family: &OsFamily, probe: &P) -> std::result::Result<Platform, String> {
    match family {
        OsFamily::Windows => Ok(Platform::Windows),
        OsFamily::Unix => {
            if MAC_ROOT_DIRS
                .iter()
                .all(|dir| probe.dir_exists(Path::new(dir)))
            {
                Ok(Platform::Mac)
            } else if probe.file_exists(Path::new(ANDROID_MARKER)) {
                Ok(Platform::Android)
            } else {
                Ok(Platform::Linux)
            }
        },
        OsFamily::Other(id) => Err(format!("unrecognised OS family '{id}'")),
    }
}
