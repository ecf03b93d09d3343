//! Session engine for lab instruments behind FTDI-style USB-serial bridges.
//!
//! This library finds a bridge by its vendor fingerprint, opens and configures
//! the serial line, and runs textual command/response exchanges with the
//! instrument. Responses are framed by an idle timeout, and scan results are
//! decoded from the two binary block formats the Santec TSL family emits.
//!
//! - [`transport`] - the bridge abstraction, a scripted mock and an OS serial backend
//! - [`device`] - device descriptors and selection
//! - [`protocol`] - command encoding, frame reading, response cleanup, block decoding
//! - [`session`] - connection lifecycle and query orchestration
//! - [`config`] - layered configuration
//! - [`error`] - error types and bridge status codes

pub mod config;
pub mod device;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

pub use config::{HandlePolicy, LinkConfig};
pub use device::{DeviceDescriptor, DeviceEnumerator};
pub use error::{FtStatus, LinkError, LinkResult};
pub use protocol::{ScanData, ScanFormat};
pub use session::Session;
pub use transport::{MockTransport, Transport};
