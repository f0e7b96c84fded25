//! Scripted in-memory backend.
//!
//! [`MockBackend`] implements [`Backend`] without touching hardware. Clones
//! share one device state, so a test can hand a clone to a [`crate::Port`]
//! and keep another to feed input and inspect output:
//!
//! ```rust,ignore
//! use serialkit::{Port, testing::MockBackend};
//!
//! let mock = MockBackend::default();
//! let mut port = Port::from_backend(mock.clone());
//! port.open()?;
//! mock.push_input(b"ok\r\n");
//! assert_eq!(port.read_line()?, "ok");
//! # Ok::<(), serialkit::Error>(())
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::{
    backend::{Backend, io_window},
    config::{DataBits, DtrControl, FlushMode, Parity, PortConfiguration, StopBits},
    error::{Error, Result},
    port::lock,
};

#[derive(Debug, Default)]
struct MockState {
    open: bool,
    opens: usize,
    closes: usize,
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    script: VecDeque<std::result::Result<usize, i32>>,
    read_requests: Vec<usize>,
    fail_open: Option<i32>,
}

/// In-memory backend with scripted `bytes_to_read` answers.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    config: PortConfiguration,
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    /// Closed mock with `config` staged.
    pub fn new(config: PortConfiguration) -> Self {
        Self {
            config,
            state: Arc::default(),
        }
    }

    /// Queue bytes as if the peer had sent them.
    pub fn push_input(&self, bytes: &[u8]) {
        lock(&self.state)
            .rx
            .extend(bytes);
    }

    /// Everything written so far.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.state)
            .tx
            .clone()
    }

    /// Answer the next `bytes_to_read` queries with `counts`, in order.
    ///
    /// Once the script runs out, queries report the real receive-queue length.
    pub fn script_bytes_to_read(&self, counts: impl IntoIterator<Item = usize>) {
        lock(&self.state)
            .script
            .extend(counts.into_iter().map(Ok));
    }

    /// Make a later `bytes_to_read` query fail with native code `code`.
    pub fn script_query_failure(&self, code: i32) {
        lock(&self.state)
            .script
            .push_back(Err(code));
    }

    /// Make the next `open` fail as if the device were busy.
    pub fn fail_next_open(&self, code: i32) {
        lock(&self.state).fail_open = Some(code);
    }

    /// Scripted answers not yet consumed.
    pub fn pending_script(&self) -> usize {
        lock(&self.state)
            .script
            .len()
    }

    /// `count` of every `read` call that reached the mock.
    pub fn read_requests(&self) -> Vec<usize> {
        lock(&self.state)
            .read_requests
            .clone()
    }

    /// Number of successful opens and of closes that released the device.
    pub fn lifecycle_counts(&self) -> (usize, usize) {
        let state = lock(&self.state);
        (state.opens, state.closes)
    }

    fn ensure_open(&self) -> Result<()> {
        if lock(&self.state).open {
            Ok(())
        } else {
            Err(Error::NotOpen(self.config.port_name.clone()))
        }
    }
}

impl Backend for MockBackend {
    fn open(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.open {
            return Ok(());
        }
        if let Some(code) = state.fail_open.take() {
            return Err(Error::unavailable(&self.config.port_name, code));
        }
        state.open = true;
        state.opens += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.open {
            state.open = false;
            state.closes += 1;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    fn read(&mut self, buffer: &mut [u8], offset: usize, count: usize) -> Result<usize> {
        let window = io_window(buffer.len(), offset, count)?;
        self.ensure_open()?;
        let mut state = lock(&self.state);
        state.read_requests.push(count);
        let n = count.min(state.rx.len());
        for (slot, byte) in buffer[window]
            .iter_mut()
            .zip(state.rx.drain(..n))
        {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, buffer: &[u8], offset: usize, count: usize) -> Result<()> {
        let window = io_window(buffer.len(), offset, count)?;
        self.ensure_open()?;
        lock(&self.state)
            .tx
            .extend_from_slice(&buffer[window]);
        Ok(())
    }

    fn flush(&mut self, mode: FlushMode) -> Result<()> {
        self.ensure_open()?;
        let mut state = lock(&self.state);
        if matches!(mode, FlushMode::Input | FlushMode::InputOutput) {
            state.rx.clear();
        }
        Ok(())
    }

    fn baud_rate(&self) -> Result<u32> {
        Ok(self.config.baud_rate)
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.config.baud_rate = baud_rate;
        Ok(())
    }

    fn parity(&self) -> Result<Parity> {
        Ok(self.config.parity)
    }

    fn set_parity(&mut self, parity: Parity) -> Result<()> {
        self.config.parity = parity;
        Ok(())
    }

    fn data_bits(&self) -> Result<DataBits> {
        Ok(self.config.data_bits)
    }

    fn set_data_bits(&mut self, data_bits: DataBits) -> Result<()> {
        self.config.data_bits = data_bits;
        Ok(())
    }

    fn stop_bits(&self) -> Result<StopBits> {
        Ok(self.config.stop_bits)
    }

    fn set_stop_bits(&mut self, stop_bits: StopBits) -> Result<()> {
        self.config.stop_bits = stop_bits;
        Ok(())
    }

    fn dtr_control(&self) -> Result<DtrControl> {
        Ok(self.config.dtr_control)
    }

    fn set_dtr_control(&mut self, dtr_control: DtrControl) -> Result<()> {
        self.config.dtr_control = dtr_control;
        Ok(())
    }

    fn bytes_to_read(&self) -> Result<usize> {
        self.ensure_open()?;
        let mut state = lock(&self.state);
        match state.script.pop_front() {
            Some(Ok(count)) => Ok(count),
            Some(Err(code)) => Err(Error::configuration(code, "scripted query")),
            None => Ok(state.rx.len()),
        }
    }

    fn bytes_to_write(&self) -> Result<usize> {
        self.ensure_open()?;
        Ok(0)
    }

    fn port_name(&self) -> &str {
        &self.config.port_name
    }

    fn set_port_name(&mut self, port_name: &str) -> Result<()> {
        if self.is_open() {
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
