//! Error types for the instrument link.
//!
//! This module defines the primary error type, `LinkError`, for the whole crate.
//! Using the `thiserror` crate, it provides a single, consistent way to report
//! everything that can go wrong between selecting a device and decoding its answer.
//!
//! ## Error Hierarchy
//!
//! - **`DeviceNotFound`**: no enumerated descriptor matches the selection criteria, or a
//!   lazy reconnect was attempted before any device was ever opened.
//! - **`Transport`**: an open/write/poll/read/configure call failed in the bridge. Carries
//!   the bridge's [`FtStatus`] so callers can tell a missing device from an I/O fault.
//! - **`InvalidCommand`**: the outbound command is malformed (terminator in first position).
//! - **`Encoding`**: non-ASCII text on write, or undecodable bytes on read.
//! - **`ProtocolViolation`**: a binary scan block (or the point count preceding it) does
//!   not follow the expected wire shape. The [`BlockStage`] names the failing step.
//! - **`SampleCountTooLarge`**: a requested or declared sample count exceeds the ceiling.
//! - **`PartialData`**: the received byte count disagrees with the declared/derived count.
//! - **`Config`** / **`ConfigValidation`**: configuration loading and semantic checks.
//!
//! Transport failures are never retried inside the crate; they propagate as-is.

use std::fmt;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type LinkResult<T> = std::result::Result<T, LinkError>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum LinkError {
    /// No device matches the selection, or nothing was ever opened
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// A bridge call failed
    #[error("Transport error during {operation}: {status}")]
    Transport {
        /// Failing call
        operation: TransportOp,
        /// Status reported by the bridge
        status: FtStatus,
    },

    /// Malformed outbound command
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Text that is not ASCII, in either direction
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Scan block or point count with the wrong wire shape
    #[error("Protocol violation at {stage}: {detail}")]
    ProtocolViolation {
        /// Parsing step that rejected the input
        stage: BlockStage,
        /// What was found instead
        detail: String,
    },

    /// Sample count above the ceiling
    #[error("Sample count {requested} exceeds the maximum of {max}")]
    SampleCountTooLarge {
        /// Count asked for or declared
        requested: usize,
        /// Ceiling
        max: usize,
    },

    /// Fewer (or more) bytes than declared
    #[error("Partial data: expected {expected} bytes, got {actual}")]
    PartialData {
        /// Bytes the block should hold
        expected: usize,
        /// Bytes received
        actual: usize,
    },

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but failed validation
    #[error("Configuration validation error: {0}")]
    ConfigValidation(String),
}

impl LinkError {
    /// Shorthand for a transport failure.
    pub fn transport(operation: TransportOp, status: FtStatus) -> Self {
        LinkError::Transport { operation, status }
    }

    /// Shorthand for a protocol violation.
    pub fn protocol(stage: BlockStage, detail: impl Into<String>) -> Self {
        LinkError::ProtocolViolation {
            stage,
            detail: detail.into(),
        }
    }

    /// The bridge status code, when this is a transport failure.
    pub fn status(&self) -> Option<FtStatus> {
        match self {
            LinkError::Transport { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<figment::Error> for LinkError {
    fn from(err: figment::Error) -> Self {
        LinkError::Config(Box::new(err))
    }
}

/// Transport boundary operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportOp {
    /// Opening a handle by serial number
    Open,
    /// Releasing a handle
    Close,
    /// Raw byte write
    Write,
    /// Queue status poll
    Poll,
    /// Raw byte read
    Read,
    /// Line/bit-mode configuration
    Configure,
    /// Enumerating attached bridges
    Enumerate,
}

impl fmt::Display for TransportOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportOp::Open => "open",
            TransportOp::Close => "close",
            TransportOp::Write => "write",
            TransportOp::Poll => "poll",
            TransportOp::Read => "read",
            TransportOp::Configure => "configure",
            TransportOp::Enumerate => "enumerate",
        };
        f.write_str(name)
    }
}

/// Step of binary block (or point count) parsing that rejected the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStage {
    /// Leading `#` marker byte
    Marker,
    /// Single ASCII digit giving the width of the length field
    DigitCount,
    /// ASCII decimal payload byte count
    LengthField,
    /// Textual point count returned by the count query
    PointCount,
}

impl fmt::Display for BlockStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockStage::Marker => "block marker",
            BlockStage::DigitCount => "length digit count",
            BlockStage::LengthField => "length field",
            BlockStage::PointCount => "point count",
        };
        f.write_str(name)
    }
}

/// Status codes reported by the USB-serial bridge driver.
///
/// Numeric values follow the driver's status table; anything past the end of
/// the table maps to [`FtStatus::OtherError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FtStatus {
    /// Success
    Ok = 0,
    /// Handle is not valid
    InvalidHandle = 1,
    /// No device with that identifier
    DeviceNotFound = 2,
    /// Device could not be opened
    DeviceNotOpened = 3,
    /// Read or write failed
    IoError = 4,
    /// Driver ran out of resources
    InsufficientResources = 5,
    /// Parameter rejected by the driver
    InvalidParameter = 6,
    /// Baud rate not supported
    InvalidBaudRate = 7,
    /// EEPROM erase needs an open device
    DeviceNotOpenedForErase = 8,
    /// EEPROM write needs an open device
    DeviceNotOpenedForWrite = 9,
    /// Write to the device failed
    FailedToWriteDevice = 10,
    /// EEPROM read failed
    EepromReadFailed = 11,
    /// EEPROM write failed
    EepromWriteFailed = 12,
    /// EEPROM erase failed
    EepromEraseFailed = 13,
    /// No EEPROM fitted
    EepromNotPresent = 14,
    /// EEPROM is blank
    EepromNotProgrammed = 15,
    /// Arguments rejected
    InvalidArgs = 16,
    /// Operation not supported
    NotSupported = 17,
    /// Anything else
    OtherError = 18,
}

impl FtStatus {
    const ALL: [FtStatus; 19] = [
        FtStatus::Ok,
        FtStatus::InvalidHandle,
        FtStatus::DeviceNotFound,
        FtStatus::DeviceNotOpened,
        FtStatus::IoError,
        FtStatus::InsufficientResources,
        FtStatus::InvalidParameter,
        FtStatus::InvalidBaudRate,
        FtStatus::DeviceNotOpenedForErase,
        FtStatus::DeviceNotOpenedForWrite,
        FtStatus::FailedToWriteDevice,
        FtStatus::EepromReadFailed,
        FtStatus::EepromWriteFailed,
        FtStatus::EepromEraseFailed,
        FtStatus::EepromNotPresent,
        FtStatus::EepromNotProgrammed,
        FtStatus::InvalidArgs,
        FtStatus::NotSupported,
        FtStatus::OtherError,
    ];

    /// Map a raw driver status code.
    pub fn from_code(code: u32) -> Self {
        Self::ALL
            .get(code as usize)
            .copied()
            .unwrap_or(FtStatus::OtherError)
    }

    /// Raw driver status code.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Driver symbolic name (e.g. `FT_IO_ERROR`).
    pub fn name(self) -> &'static str {
        match self {
            FtStatus::Ok => "FT_OK",
            FtStatus::InvalidHandle => "FT_INVALID_HANDLE",
            FtStatus::DeviceNotFound => "FT_DEVICE_NOT_FOUND",
            FtStatus::DeviceNotOpened => "FT_DEVICE_NOT_OPENED",
            FtStatus::IoError => "FT_IO_ERROR",
            FtStatus::InsufficientResources => "FT_INSUFFICIENT_RESOURCES",
            FtStatus::InvalidParameter => "FT_INVALID_PARAMETER",
            FtStatus::InvalidBaudRate => "FT_INVALID_BAUD_RATE",
            FtStatus::DeviceNotOpenedForErase => "FT_DEVICE_NOT_OPENED_FOR_ERASE",
            FtStatus::DeviceNotOpenedForWrite => "FT_DEVICE_NOT_OPENED_FOR_WRITE",
            FtStatus::FailedToWriteDevice => "FT_FAILED_TO_WRITE_DEVICE",
            FtStatus::EepromReadFailed => "FT_EEPROM_READ_FAILED",
            FtStatus::EepromWriteFailed => "FT_EEPROM_WRITE_FAILED",
            FtStatus::EepromEraseFailed => "FT_EEPROM_ERASE_FAILED",
            FtStatus::EepromNotPresent => "FT_EEPROM_NOT_PRESENT",
            FtStatus::EepromNotProgrammed => "FT_EEPROM_NOT_PROGRAMMED",
            FtStatus::InvalidArgs => "FT_INVALID_ARGS",
            FtStatus::NotSupported => "FT_NOT_SUPPORTED",
            FtStatus::OtherError => "FT_OTHER_ERROR",
        }
    }
}

impl fmt::Display for FtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {}: {}", self.code(), self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LinkError::InvalidCommand("terminator cannot be the first character".into());
        assert_eq!(
            err.to_string(),
            "Invalid command: terminator cannot be the first character"
        );
    }

    #[test]
    fn test_transport_error_carries_status() {
        let err = LinkError::transport(TransportOp::Read, FtStatus::IoError);
        assert_eq!(err.status(), Some(FtStatus::IoError));
        assert_eq!(
            err.to_string(),
            "Transport error during read: status 4: FT_IO_ERROR"
        );
        assert_eq!(LinkError::DeviceNotFound("x".into()).status(), None);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(FtStatus::from_code(0), FtStatus::Ok);
        assert_eq!(FtStatus::from_code(2), FtStatus::DeviceNotFound);
        assert_eq!(FtStatus::from_code(18), FtStatus::OtherError);
        assert_eq!(FtStatus::from_code(99), FtStatus::OtherError);
        assert_eq!(FtStatus::EepromNotPresent.code(), 14);
    }

    #[test]
    fn test_protocol_violation_names_stage() {
        let err = LinkError::protocol(BlockStage::Marker, "expected '#', found 0x41");
        assert!(err.to_string().contains("block marker"));
    }
}
