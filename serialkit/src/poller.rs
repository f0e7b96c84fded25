//! Background receive polling.
//!
//! One thread per [`crate::Port`] samples `bytes_to_read` every poll
//! interval. The data-received handler is level-triggered: it runs on every
//! iteration where the count is at or above the threshold, not once per
//! crossing. A handler that wants single-shot behaviour has to drain the
//! queue below the threshold itself, e.g. with [`DataReceived::read_all`].
//!
//! A failed query or a panicking handler stops the thread. The error is
//! logged once and kept for [`crate::Port::take_poll_error`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{trace, warn};

use crate::{
    backend::Backend,
    error::{Error, Result},
    port::lock,
};

/// Kind of receive event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialData {
    /// Ordinary characters arrived.
    Chars,
}

/// Data-received callback.
pub type DataReceivedHandler<B> = Box<dyn FnMut(&DataReceived<'_, B>) + Send>;

/// Argument passed to the data-received handler.
pub struct DataReceived<'a, B> {
    bytes_to_read: usize,
    kind: SerialData,
    backend: &'a Mutex<B>,
}

impl<B: Backend> DataReceived<'_, B> {
    /// Receive-queue length observed by this poll iteration.
    pub fn bytes_to_read(&self) -> usize {
        self.bytes_to_read
    }

    /// Event kind.
    pub fn kind(&self) -> SerialData {
        self.kind
    }

    /// Read into `buffer[offset..offset + count]` through the port's lock.
    pub fn read(&self, buffer: &mut [u8], offset: usize, count: usize) -> Result<usize> {
        lock(self.backend).read(buffer, offset, count)
    }

    /// Snapshot drain, same semantics as [`crate::Port::read_all`].
    pub fn read_all(&self) -> Result<Vec<u8>> {
        read_all(self.backend)
    }
}

/// State shared between a port and its poll thread.
pub(crate) struct Shared<B> {
    pub(crate) backend: Mutex<B>,
    pub(crate) threshold: AtomicUsize,
    pub(crate) handler: Mutex<Option<DataReceivedHandler<B>>>,
    pub(crate) poll_error: Mutex<Option<crate::Error>>,
}

impl<B> Shared<B> {
    pub(crate) fn new(backend: B) -> Self {
        Self {
            backend: Mutex::new(backend),
            threshold: AtomicUsize::new(1),
            handler: Mutex::new(None),
            poll_error: Mutex::new(None),
        }
    }
}

/// Size a buffer to the current receive-queue length and issue one read.
///
/// Bytes that arrive between the two steps stay queued for the next call.
pub(crate) fn read_all<B: Backend>(backend: &Mutex<B>) -> Result<Vec<u8>> {
    let mut backend = lock(backend);
    let available = backend.bytes_to_read()?;
    let mut buffer = vec![0u8; available];
    if available == 0 {
        return Ok(buffer);
    }
    let n = backend.read(&mut buffer, 0, available)?;
    buffer.truncate(n);
    Ok(buffer)
}

/// Run one poll iteration. Returns whether the handler fired.
pub(crate) fn poll_once<B: Backend>(shared: &Shared<B>) -> Result<bool> {
    let bytes_to_read = lock(&shared.backend).bytes_to_read()?;
    let threshold = shared
        .threshold
        .load(Ordering::Relaxed);
    trace!("Poll: {bytes_to_read} byte(s) queued, threshold {threshold}");

    if bytes_to_read < threshold {
        return Ok(false);
    }

    let mut guard = lock(&shared.handler);
    let Some(handler) = guard.as_mut() else {
        return Ok(false);
    };
    let event = DataReceived {
        bytes_to_read,
        kind: SerialData::Chars,
        backend: &shared.backend,
    };
    panic::catch_unwind(AssertUnwindSafe(|| handler(&event)))
        .map_err(|payload| Error::HandlerPanicked(panic_message(payload.as_ref())))?;
    Ok(true)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Clears the running flag when the poll thread exits, however it exits.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0
            .store(false, Ordering::Release);
    }
}

/// Handle to a running poll thread.
pub(crate) struct Poller {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Poller {
    pub(crate) fn spawn<B: Backend + 'static>(
        shared: Arc<Shared<B>>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let thread = thread::Builder::new()
            .name("serialkit-poll".to_string())
            .spawn(move || {
                let _running = RunningGuard(Arc::clone(&flag));
                while flag.load(Ordering::Acquire) {
                    if let Err(e) = poll_once(&shared) {
                        warn!("Stopping receive polling: {e}");
                        *lock(&shared.poll_error) = Some(e);
                        break;
                    }
                    thread::sleep(interval);
                }
            })?;

        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running
            .load(Ordering::Acquire)
    }

    /// Request a stop and wait for the current iteration to finish.
    pub(crate) fn stop(mut self) {
        self.running
            .store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Receive poll thread panicked");
            }
        }
    }
}
