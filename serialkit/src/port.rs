//! OS-neutral serial port facade.
//!
//! [`Port`] owns one backend, chosen once at construction, and layers line
//! reading, snapshot draining and background receive polling on top of it.
//!
//! ```text
//!  Closed ──open()──▶ Open ──close()──▶ Closed
//!                      │
//!          run_async() │ stop_async()
//!                      ▼
//!                   Polling
//! ```
//!
//! The backend sits behind a mutex shared with the poll thread. Every
//! configuration apply and every I/O call holds that lock, so a whole-block
//! apply never interleaves with a read or write on the same handle.
//!
//! ## Example
//!
//! ```rust,no_run
//! use serialkit::{Port, PortConfiguration};
//!
//! let mut port = Port::new(PortConfiguration::new("/dev/ttyUSB0", 115200))?;
//! port.open()?;
//! port.write_all(b"AT\r\n")?;
//! println!("{}", port.read_line()?);
//! port.close()?;
//! # Ok::<(), serialkit::Error>(())
//! ```

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::{
    backend::{Backend, SystemBackend},
    config::{DataBits, DtrControl, FlushMode, Parity, PortConfiguration, StopBits},
    error::{Error, Result},
    platform::Platform,
    poller::{self, DataReceived, Poller, Shared},
};

/// Default line terminator for [`Port::read_line`].
pub const DEFAULT_NEWLINE: &[u8] = b"\r\n";

/// Default sleep between receive-queue samples.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Serial port facade over a platform backend.
pub struct Port<B: Backend + 'static = SystemBackend> {
    shared: Arc<Shared<B>>,
    poller: Option<Poller>,
    newline: Vec<u8>,
    poll_interval: Duration,
    read_line_timeout: Option<Duration>,
}

impl Port<SystemBackend> {
    /// Create a closed port for the detected host platform.
    pub fn new(config: PortConfiguration) -> Result<Self> {
        Self::with_platform(Platform::current()?, config)
    }

    /// Create a closed port for an explicitly chosen platform.
    pub fn with_platform(platform: Platform, config: PortConfiguration) -> Result<Self> {
        Ok(Self::from_backend(SystemBackend::for_platform(
            platform, config,
        )?))
    }
}

impl<B: Backend + 'static> Port<B> {
    /// Wrap an existing backend.
    pub fn from_backend(backend: B) -> Self {
        Self {
            shared: Arc::new(Shared::new(backend)),
            poller: None,
            newline: DEFAULT_NEWLINE.to_vec(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            read_line_timeout: None,
        }
    }

    fn backend(&self) -> MutexGuard<'_, B> {
        lock(&self.shared.backend)
    }

    /// Acquire the device. No-op if already open.
    pub fn open(&mut self) -> Result<()> {
        let mut backend = self.backend();
        if backend.is_open() {
            return Ok(());
        }
        backend.open()
    }

    /// Stop polling, then release the device. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.stop_async();
        self.backend().close()
    }

    /// Same as [`Port::close`]; safe to call repeatedly or on a never-opened port.
    pub fn dispose(&mut self) -> Result<()> {
        self.close()
    }

    /// Whether the device is held.
    pub fn is_open(&self) -> bool {
        self.backend().is_open()
    }

    /// Read up to `count` bytes into `buffer[offset..offset + count]`.
    pub fn read(&self, buffer: &mut [u8], offset: usize, count: usize) -> Result<usize> {
        self.backend()
            .read(buffer, offset, count)
    }

    /// Write `buffer[offset..offset + count]`.
    pub fn write(&self, buffer: &[u8], offset: usize, count: usize) -> Result<()> {
        self.backend()
            .write(buffer, offset, count)
    }

    /// Write the whole buffer.
    pub fn write_all(&self, buffer: &[u8]) -> Result<()> {
        self.write(buffer, 0, buffer.len())
    }

    /// Discard queued input and/or output.
    pub fn flush(&self, mode: FlushMode) -> Result<()> {
        self.backend().flush(mode)
    }

    /// Read whatever is queued right now.
    ///
    /// The buffer is sized from one `bytes_to_read` query and filled by one
    /// read. Bytes arriving after the query are left for the next call, so
    /// this is a snapshot, not a complete drain.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        poller::read_all(&self.shared.backend)
    }

    /// Block until the line terminator arrives and return the text before it.
    ///
    /// Bytes are consumed one at a time. When nothing is queued the call
    /// sleeps for the poll interval between checks, releasing the port lock.
    /// Invalid UTF-8 is replaced, not rejected. With a timeout set, expiry
    /// yields [`Error::Timeout`] and the partial line is discarded. A request
    /// through [`crate::set_interrupt_checker`] ends the wait with
    /// [`Error::Interrupted`].
    pub fn read_line(&self) -> Result<String> {
        let deadline = self
            .read_line_timeout
            .map(|t| Instant::now() + t);
        let mut line = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            let got = {
                let mut backend = self.backend();
                if backend.bytes_to_read()? == 0 {
                    0
                } else {
                    backend.read(&mut byte, 0, 1)?
                }
            };

            if got == 1 {
                line.push(byte[0]);
                if line.ends_with(&self.newline) {
                    line.truncate(line.len() - self.newline.len());
                    return Ok(String::from_utf8_lossy(&line).into_owned());
                }
                continue;
            }

            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(Error::Timeout(format!(
                    "no line terminator after {} byte(s)",
                    line.len()
                )));
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Start background receive polling.
    ///
    /// No-op unless the port is open and not already polling.
    pub fn run_async(&mut self) -> Result<()> {
        if !self.is_open() || self.is_running() {
            return Ok(());
        }
        // Reap a poller that stopped itself after an error.
        if let Some(stale) = self.poller.take() {
            stale.stop();
        }
        debug!("Starting receive polling every {:?}", self.poll_interval);
        self.poller = Some(Poller::spawn(
            Arc::clone(&self.shared),
            self.poll_interval,
        )?);
        Ok(())
    }

    /// Stop background polling and wait for the thread to exit. Safe when idle.
    pub fn stop_async(&mut self) {
        if let Some(poller) = self.poller.take() {
            debug!("Stopping receive polling");
            poller.stop();
        }
    }

    /// Whether the poll thread is active.
    pub fn is_running(&self) -> bool {
        self.poller
            .as_ref()
            .is_some_and(Poller::is_running)
    }

    /// Register the data-received handler, replacing any previous one.
    pub fn on_data_received<F>(&self, handler: F)
    where
        F: FnMut(&DataReceived<'_, B>) + Send + 'static,
    {
        *lock(&self.shared.handler) = Some(Box::new(handler));
    }

    /// Remove the data-received handler.
    pub fn clear_data_received(&self) {
        *lock(&self.shared.handler) = None;
    }

    /// Error that stopped the poll thread, if any. Clears it.
    pub fn take_poll_error(&self) -> Option<Error> {
        lock(&self.shared.poll_error).take()
    }

    /// Minimum queued bytes for the handler to fire (default 1).
    pub fn received_bytes_threshold(&self) -> usize {
        self.shared
            .threshold
            .load(Ordering::Relaxed)
    }

    /// Set the handler threshold.
    pub fn set_received_bytes_threshold(&self, threshold: usize) {
        self.shared
            .threshold
            .store(threshold, Ordering::Relaxed);
    }

    /// Line terminator used by [`Port::read_line`].
    pub fn newline(&self) -> &[u8] {
        &self.newline
    }

    /// Change the line terminator. It must not be empty.
    pub fn set_newline(&mut self, newline: impl Into<Vec<u8>>) -> Result<()> {
        let newline = newline.into();
        if newline.is_empty() {
            return Err(Error::Configuration {
                code: None,
                message: "line terminator must not be empty".to_string(),
            });
        }
        self.newline = newline;
        Ok(())
    }

    /// Sleep between receive-queue samples.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Change the poll interval. Takes effect on the next [`Port::run_async`].
    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    /// Timeout for [`Port::read_line`]; `None` blocks indefinitely.
    pub fn read_line_timeout(&self) -> Option<Duration> {
        self.read_line_timeout
    }

    /// Change the [`Port::read_line`] timeout.
    pub fn set_read_line_timeout(&mut self, timeout: Option<Duration>) {
        self.read_line_timeout = timeout;
    }

    /// Current baud rate, read back from the device when open.
    pub fn baud_rate(&self) -> Result<u32> {
        self.backend().baud_rate()
    }

    /// Change the baud rate.
    pub fn set_baud_rate(&self, baud_rate: u32) -> Result<()> {
        self.backend()
            .set_baud_rate(baud_rate)
    }

    /// Current parity.
    pub fn parity(&self) -> Result<Parity> {
        self.backend().parity()
    }

    /// Change the parity.
    pub fn set_parity(&self, parity: Parity) -> Result<()> {
        self.backend()
            .set_parity(parity)
    }

    /// Current data bits.
    pub fn data_bits(&self) -> Result<DataBits> {
        self.backend().data_bits()
    }

    /// Change the data bits.
    pub fn set_data_bits(&self, data_bits: DataBits) -> Result<()> {
        self.backend()
            .set_data_bits(data_bits)
    }

    /// Current stop bits.
    pub fn stop_bits(&self) -> Result<StopBits> {
        self.backend().stop_bits()
    }

    /// Change the stop bits.
    pub fn set_stop_bits(&self, stop_bits: StopBits) -> Result<()> {
        self.backend()
            .set_stop_bits(stop_bits)
    }

    /// Current DTR behaviour.
    pub fn dtr_control(&self) -> Result<DtrControl> {
        self.backend().dtr_control()
    }

    /// Change the DTR behaviour.
    pub fn set_dtr_control(&self, dtr_control: DtrControl) -> Result<()> {
        self.backend()
            .set_dtr_control(dtr_control)
    }

    /// Bytes waiting in the receive queue.
    pub fn bytes_to_read(&self) -> Result<usize> {
        self.backend().bytes_to_read()
    }

    /// Bytes waiting in the transmit queue.
    pub fn bytes_to_write(&self) -> Result<usize> {
        self.backend().bytes_to_write()
    }

    /// Port name/path.
    pub fn port_name(&self) -> String {
        self.backend()
            .port_name()
            .to_string()
    }

    /// Rename the port. Only allowed while closed.
    pub fn set_port_name(&self, port_name: &str) -> Result<()> {
        self.backend()
            .set_port_name(port_name)
    }

    /// Staged configuration.
    pub fn configuration(&self) -> PortConfiguration {
        self.backend()
            .configuration()
            .clone()
    }
}

impl<B: Backend + 'static> Drop for Port<B> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close {} on drop: {e}", self.port_name());
        }
    }
}

impl<B: Backend + 'static> fmt::Debug for Port<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("port_name", &self.port_name())
            .field("open", &self.is_open())
            .field("polling", &self.is_running())
            .field("newline", &self.newline)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;
    use std::sync::atomic::AtomicUsize;

    fn open_port() -> (Port<MockBackend>, MockBackend) {
        let mock = MockBackend::new(PortConfiguration::new("mock0", 9600));
        let mut port = Port::from_backend(mock.clone());
        port.open().unwrap();
        port.set_poll_interval(Duration::from_millis(1));
        (port, mock)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..1000 {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_open_twice_is_noop() {
        let (mut port, mock) = open_port();
        port.open().unwrap();
        assert_eq!(mock.lifecycle_counts(), (1, 0));
    }

    #[test]
    fn test_close_and_dispose_are_idempotent() {
        let (mut port, mock) = open_port();
        port.close().unwrap();
        port.close().unwrap();
        port.dispose().unwrap();
        assert!(!port.is_open());
        assert_eq!(mock.lifecycle_counts(), (1, 1));
    }

    #[test]
    fn test_dispose_without_open() {
        let mut port = Port::from_backend(MockBackend::default());
        port.dispose().unwrap();
        port.dispose().unwrap();
    }

    #[test]
    fn test_open_failure_propagates_unchanged() {
        let mock = MockBackend::new(PortConfiguration::new("busy0", 9600));
        mock.fail_next_open(16);
        let mut port = Port::from_backend(mock);
        assert!(matches!(
            port.open(),
            Err(Error::PortUnavailable { code: Some(16), .. })
        ));
        assert!(!port.is_open());
    }

    #[test]
    fn test_write_all_and_windowed_write() {
        let (port, mock) = open_port();
        port.write_all(b"hello").unwrap();
        port.write(b"--world--", 2, 5).unwrap();
        assert_eq!(mock.written(), b"helloworld");
        assert!(matches!(
            port.write(b"abc", 2, 5),
            Err(Error::InvalidWindow { .. })
        ));
    }

    #[test]
    fn test_read_line_strips_terminator() {
        let (port, mock) = open_port();
        mock.push_input(b"first\r\nsecond\r\n");
        assert_eq!(port.read_line().unwrap(), "first");
        assert_eq!(port.read_line().unwrap(), "second");
    }

    #[test]
    fn test_read_line_keeps_lone_cr_and_lf() {
        let (port, mock) = open_port();
        mock.push_input(b"a\rb\nc\r\n");
        assert_eq!(port.read_line().unwrap(), "a\rb\nc");
    }

    #[test]
    fn test_read_line_custom_terminator() {
        let (mut port, mock) = open_port();
        port.set_newline(*b"\n").unwrap();
        mock.push_input(b"ok\n");
        assert_eq!(port.read_line().unwrap(), "ok");
        assert!(port.set_newline(Vec::new()).is_err());
    }

    #[test]
    fn test_read_line_waits_for_late_bytes() {
        let _guard = lock(&crate::INTERRUPT_TEST_LOCK);
        let (port, mock) = open_port();
        let feeder = mock.clone();
        let handle = thread::spawn(move || {
            feeder.push_input(b"par");
            thread::sleep(Duration::from_millis(20));
            feeder.push_input(b"tial\r\n");
        });
        assert_eq!(port.read_line().unwrap(), "partial");
        handle.join().unwrap();
    }

    #[test]
    fn test_read_line_timeout() {
        let _guard = lock(&crate::INTERRUPT_TEST_LOCK);
        let (mut port, mock) = open_port();
        port.set_read_line_timeout(Some(Duration::from_millis(20)));
        mock.push_input(b"no newline");
        assert!(matches!(port.read_line(), Err(Error::Timeout(_))));
    }

    #[test]
    fn test_read_line_replaces_invalid_utf8() {
        let (port, mock) = open_port();
        mock.push_input(&[b'o', 0xFF, b'k', b'\r', b'\n']);
        assert_eq!(port.read_line().unwrap(), "o\u{FFFD}k");
    }

    #[test]
    fn test_read_line_interrupted_while_waiting() {
        let _guard = lock(&crate::INTERRUPT_TEST_LOCK);
        let (port, mock) = open_port();
        mock.push_input(b"half");
        crate::test_set_interrupted(true);
        let result = port.read_line();
        crate::test_set_interrupted(false);
        assert!(matches!(result, Err(Error::Interrupted)));
    }

    #[test]
    fn test_read_all_snapshot() {
        let (port, mock) = open_port();
        mock.push_input(b"abcdef");
        mock.script_bytes_to_read([4]);
        assert_eq!(port.read_all().unwrap(), b"abcd");
        assert_eq!(port.read_all().unwrap(), b"ef");
        assert!(port.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_closed_port_io_errors() {
        let mut port = Port::from_backend(MockBackend::default());
        assert!(matches!(port.write_all(b"x"), Err(Error::NotOpen(_))));
        assert!(matches!(port.read_all(), Err(Error::NotOpen(_))));
        // Polling never starts on a closed port.
        port.run_async().unwrap();
        assert!(!port.is_running());
    }

    #[test]
    fn test_run_async_fires_handler_and_stops() {
        let (mut port, mock) = open_port();
        port.set_received_bytes_threshold(2);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        port.on_data_received(move |event| {
            assert!(event.bytes_to_read() >= 2);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        mock.script_bytes_to_read([0, 1, 2, 3]);
        port.run_async().unwrap();
        assert!(port.is_running());
        // Second start is a no-op.
        port.run_async().unwrap();

        assert!(wait_until(|| mock.pending_script() == 0));
        assert!(wait_until(|| hits.load(Ordering::SeqCst) >= 2));
        port.stop_async();
        assert!(!port.is_running());
        port.stop_async();

        let after_stop = hits.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(hits.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_close_stops_polling_first() {
        let (mut port, mock) = open_port();
        port.run_async().unwrap();
        port.close().unwrap();
        assert!(!port.is_running());
        assert_eq!(mock.lifecycle_counts(), (1, 1));
    }

    #[test]
    fn test_poll_error_stops_polling_and_is_reported() {
        let (mut port, mock) = open_port();
        mock.script_query_failure(5);
        port.run_async().unwrap();
        assert!(wait_until(|| !port.is_running()));
        let err = port.take_poll_error().unwrap();
        assert_eq!(err.os_code(), Some(5));
        assert!(port.take_poll_error().is_none());

        // Polling can be restarted after the failure.
        port.run_async().unwrap();
        assert!(port.is_running());
        port.stop_async();
    }

    #[test]
    fn test_handler_panic_stops_polling_and_allows_restart() {
        let (mut port, mock) = open_port();
        port.on_data_received(|_| panic!("handler blew up"));
        mock.push_input(b"x");
        port.run_async().unwrap();
        assert!(wait_until(|| !port.is_running()));
        let err = port.take_poll_error().unwrap();
        assert!(matches!(&err, Error::HandlerPanicked(msg) if msg == "handler blew up"));

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        port.on_data_received(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        port.run_async().unwrap();
        assert!(wait_until(|| hits.load(Ordering::SeqCst) > 0));
        port.stop_async();
        assert!(port.take_poll_error().is_none());
    }

    #[test]
    fn test_handler_drains_through_event() {
        let (mut port, mock) = open_port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        port.on_data_received(move |event| {
            sink.lock()
                .unwrap()
                .extend(event.read_all().unwrap());
        });
        mock.push_input(b"payload");
        port.run_async().unwrap();
        assert!(wait_until(|| received.lock().unwrap().len() == 7));
        port.stop_async();
        assert_eq!(*received.lock().unwrap(), b"payload");
    }

    #[test]
    fn test_property_passthrough_and_rename() {
        let (mut port, _mock) = open_port();
        port.set_parity(Parity::Even).unwrap();
        assert_eq!(port.parity().unwrap(), Parity::Even);
        port.set_baud_rate(115200).unwrap();
        assert_eq!(port.baud_rate().unwrap(), 115200);
        assert!(port.set_port_name("mock1").is_err());
        port.close().unwrap();
        port.set_port_name("mock1").unwrap();
        assert_eq!(port.port_name(), "mock1");
        assert_eq!(port.configuration().baud_rate, 115200);
    }
}
