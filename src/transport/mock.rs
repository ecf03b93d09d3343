//! Mock USB-serial bridge
//!
//! Provides a scripted, in-memory [`Transport`] for testing the session engine
//! without hardware. Responses are queued as deliveries; each queue status poll
//! reports the size of the next delivery, so the idle-timeout reader sees exactly
//! the chunking the test scripted.
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = MockTransport::new()
//!     .with_device("SANTEC", DeviceDescriptor::new("23110067", "TSL-570"));
//! transport.push_response(b"SANTEC,TSL-570,23110067,0001.0000\r");
//! let mut session = Session::new(transport.clone(), LinkConfig::default());
//! session.open(None).await?;
//! ```

use super::Transport;
use crate::config::LineSettings;
use crate::device::{DeviceDescriptor, DeviceEnumerator};
use crate::error::{FtStatus, LinkError, LinkResult, TransportOp};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

// =============================================================================
// Scripted state
// =============================================================================

#[derive(Debug, Clone)]
enum Delivery {
    /// Bytes that become available on the next poll
    Bytes(Vec<u8>),
    /// One poll that reports nothing available
    Silence,
}

#[derive(Debug, Default)]
struct MockState {
    devices: Vec<(String, DeviceDescriptor)>,
    deliveries: VecDeque<Delivery>,
    loopback: bool,
    failures: HashMap<TransportOp, FtStatus>,
    writes: Vec<Vec<u8>>,
    configured: Vec<LineSettings>,
    opened: Vec<String>,
    open_handles: usize,
    closes: usize,
    polls: usize,
    reads: usize,
    next_handle: u64,
}

impl MockState {
    fn take_failure(&mut self, op: TransportOp) -> LinkResult<()> {
        match self.failures.remove(&op) {
            Some(status) => Err(LinkError::transport(op, status)),
            None => Ok(()),
        }
    }
}

// =============================================================================
// MockTransport
// =============================================================================

/// Scripted bridge. Clones share state, so a test can keep one clone for
/// scripting and inspection while the session owns another.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

/// Handle issued by [`MockTransport`].
///
/// Dropping it releases the simulated device, whether or not it went
/// through [`Transport::close`].
#[derive(Debug)]
pub struct MockHandle {
    /// Serial number the handle was opened with
    pub serial_number: String,
    id: u64,
    state: Arc<Mutex<MockState>>,
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.open_handles = state.open_handles.saturating_sub(1);
        trace!(handle = self.id, "mock handle released");
    }
}

impl MockTransport {
    /// Create an empty bridge with no devices attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bridge that echoes every write back as the next response.
    pub fn loopback() -> Self {
        let transport = Self::default();
        transport.state().loopback = true;
        transport
    }

    /// Attach a device whose EEPROM reports the given manufacturer.
    pub fn with_device(self, manufacturer: &str, descriptor: DeviceDescriptor) -> Self {
        self.state()
            .devices
            .push((manufacturer.to_string(), descriptor));
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue bytes that become available in a single poll.
    pub fn push_response(&self, bytes: impl AsRef<[u8]>) {
        self.state()
            .deliveries
            .push_back(Delivery::Bytes(bytes.as_ref().to_vec()));
    }

    /// Queue `polls` consecutive empty polls.
    pub fn push_silence(&self, polls: usize) {
        let mut state = self.state();
        for _ in 0..polls {
            state.deliveries.push_back(Delivery::Silence);
        }
    }

    /// Make the next call of `op` fail with `status`.
    pub fn fail_next(&self, op: TransportOp, status: FtStatus) {
        self.state().failures.insert(op, status);
    }

    /// Every buffer passed to `write`, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state().writes.clone()
    }

    /// Every line configuration applied, in order.
    pub fn configured(&self) -> Vec<LineSettings> {
        self.state().configured.clone()
    }

    /// Serial numbers passed to successful `open` calls, in order.
    pub fn opened(&self) -> Vec<String> {
        self.state().opened.clone()
    }

    /// Number of successful `open` calls.
    pub fn open_count(&self) -> usize {
        self.state().opened.len()
    }

    /// Number of `close` calls.
    pub fn close_count(&self) -> usize {
        self.state().closes
    }

    /// Handles opened and not yet closed or dropped.
    pub fn open_handles(&self) -> usize {
        self.state().open_handles
    }

    /// Number of queue status polls.
    pub fn poll_count(&self) -> usize {
        self.state().polls
    }

    /// Number of raw reads.
    pub fn read_count(&self) -> usize {
        self.state().reads
    }

    /// Deliveries not yet consumed.
    pub fn pending(&self) -> usize {
        self.state().deliveries.len()
    }
}

#[async_trait]
impl DeviceEnumerator for MockTransport {
    async fn list_candidates(
        &mut self,
        vendor_fingerprint: &str,
    ) -> LinkResult<Vec<DeviceDescriptor>> {
        let mut state = self.state();
        state.take_failure(TransportOp::Enumerate)?;
        Ok(state
            .devices
            .iter()
            .filter(|(manufacturer, _)| manufacturer.eq_ignore_ascii_case(vendor_fingerprint))
            .map(|(_, descriptor)| descriptor.clone())
            .collect())
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Handle = MockHandle;

    async fn open(&mut self, serial_number: &str) -> LinkResult<MockHandle> {
        let mut state = self.state();
        state.take_failure(TransportOp::Open)?;
        if !state
            .devices
            .iter()
            .any(|(_, d)| d.serial_number == serial_number)
        {
            return Err(LinkError::transport(
                TransportOp::Open,
                FtStatus::DeviceNotFound,
            ));
        }
        state.next_handle += 1;
        state.open_handles += 1;
        state.opened.push(serial_number.to_string());
        trace!(serial_number, "mock handle opened");
        Ok(MockHandle {
            serial_number: serial_number.to_string(),
            id: state.next_handle,
            state: Arc::clone(&self.state),
        })
    }

    async fn close(&mut self, handle: MockHandle) -> LinkResult<()> {
        trace!(handle = handle.id, "mock handle closed");
        drop(handle);
        let mut state = self.state();
        state.closes += 1;
        state.take_failure(TransportOp::Close)
    }

    async fn write(&mut self, _handle: &mut MockHandle, data: &[u8]) -> LinkResult<usize> {
        let mut state = self.state();
        state.take_failure(TransportOp::Write)?;
        state.writes.push(data.to_vec());
        if state.loopback {
            state.deliveries.push_back(Delivery::Bytes(data.to_vec()));
        }
        Ok(data.len())
    }

    async fn poll_available(&mut self, _handle: &mut MockHandle) -> LinkResult<usize> {
        let mut state = self.state();
        state.polls += 1;
        state.take_failure(TransportOp::Poll)?;
        let available = match state.deliveries.front() {
            Some(Delivery::Bytes(bytes)) => bytes.len(),
            Some(Delivery::Silence) => {
                state.deliveries.pop_front();
                0
            }
            None => 0,
        };
        Ok(available)
    }

    async fn read(&mut self, _handle: &mut MockHandle, max_count: usize) -> LinkResult<Vec<u8>> {
        let mut state = self.state();
        state.reads += 1;
        state.take_failure(TransportOp::Read)?;
        match state.deliveries.pop_front() {
            Some(Delivery::Bytes(mut bytes)) => {
                if bytes.len() > max_count {
                    let rest = bytes.split_off(max_count);
                    state.deliveries.push_front(Delivery::Bytes(rest));
                }
                Ok(bytes)
            }
            Some(Delivery::Silence) => {
                state.deliveries.push_front(Delivery::Silence);
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }

    async fn configure(&mut self, _handle: &mut MockHandle, line: &LineSettings) -> LinkResult<()> {
        let mut state = self.state();
        state.take_failure(TransportOp::Configure)?;
        state.configured.push(line.clone());
        Ok(())
    }
}
