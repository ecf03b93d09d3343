//! USB-serial transport boundary
//!
//! The session engine never talks to the bridge chip directly. It drives a
//! [`Transport`] injected at construction, which exposes only raw byte I/O and
//! line configuration. Implementations provided here:
//!
//! - [`MockTransport`] - scripted, in-memory bridge for tests and demos
//! - `SerialPortTransport` - OS serial ports via the `serialport` crate
//!   (requires the `instrument_serial` feature)

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial;

pub use mock::{MockHandle, MockTransport};
#[cfg(feature = "instrument_serial")]
pub use serial::{SerialHandle, SerialPortTransport};

use crate::config::LineSettings;
use crate::error::LinkResult;
use async_trait::async_trait;

/// Raw byte I/O over a USB-serial bridge.
///
/// A handle is an owned resource: it is produced by [`Transport::open`] and
/// consumed by [`Transport::close`]. Implementations must release the
/// underlying resource when a handle is dropped without being closed.
/// Handles are not reentrant; callers serialize access through `&mut`.
#[async_trait]
pub trait Transport: Send {
    /// Open handle type
    type Handle: Send;

    /// Open the bridge with the given serial number.
    async fn open(&mut self, serial_number: &str) -> LinkResult<Self::Handle>;

    /// Release a handle.
    async fn close(&mut self, handle: Self::Handle) -> LinkResult<()>;

    /// Write raw bytes, returning the count accepted by the bridge.
    async fn write(&mut self, handle: &mut Self::Handle, data: &[u8]) -> LinkResult<usize>;

    /// Number of bytes waiting in the receive queue.
    async fn poll_available(&mut self, handle: &mut Self::Handle) -> LinkResult<usize>;

    /// Read up to `max_count` bytes from the receive queue.
    async fn read(&mut self, handle: &mut Self::Handle, max_count: usize) -> LinkResult<Vec<u8>>;

    /// Apply word length, stop bits, parity, flow control, baud rate,
    /// timeouts and bit mode.
    async fn configure(&mut self, handle: &mut Self::Handle, line: &LineSettings)
        -> LinkResult<()>;
}
