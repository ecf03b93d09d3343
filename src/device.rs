//! Enumerated USB-serial bridges and device selection.

use crate::error::{LinkError, LinkResult};
use async_trait::async_trait;
use std::fmt;

/// Serial number field width of the native node record.
pub const SERIAL_NUMBER_MAX_BYTES: usize = 16;

/// Description field width of the native node record.
pub const DESCRIPTION_MAX_BYTES: usize = 64;

/// Opaque handle token reported by the enumerator for an already-open node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(pub u64);

/// One enumerated bridge.
///
/// Identity is the serial number. Descriptors are produced by a
/// [`DeviceEnumerator`] and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Vendor-assigned flags
    pub flags: u32,
    /// Bridge chip type
    pub device_type: u32,
    /// Combined vendor/product id
    pub id: u32,
    /// USB location id
    pub location_id: u32,
    /// Serial number (at most 16 bytes)
    pub serial_number: String,
    /// Free-text description (at most 64 bytes)
    pub description: String,
    /// Handle the enumerator already holds, if any
    pub handle: Option<RawHandle>,
}

impl DeviceDescriptor {
    /// Build a descriptor, clipping serial number and description to the
    /// widths of the native record.
    pub fn new(serial_number: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            flags: 0,
            device_type: 0,
            id: 0,
            location_id: 0,
            serial_number: clip(serial_number.into(), SERIAL_NUMBER_MAX_BYTES),
            description: clip(description.into(), DESCRIPTION_MAX_BYTES),
            handle: None,
        }
    }

    /// Set the USB location id.
    pub fn with_location(mut self, location_id: u32) -> Self {
        self.location_id = location_id;
        self
    }

    /// Set the combined vendor/product id.
    pub fn with_id(mut self, id: u32) -> Self {
        self.id = id;
        self
    }

    /// True when the description names the given instrument family.
    pub fn is_family(&self, prefix: &str) -> bool {
        self.description.starts_with(prefix)
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (S/N {})", self.description, self.serial_number)
    }
}

fn clip(mut value: String, max_bytes: usize) -> String {
    if value.len() > max_bytes {
        let mut end = max_bytes;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        value.truncate(end);
    }
    value
}

/// Lists bridges whose EEPROM manufacturer matches a vendor fingerprint.
#[async_trait]
pub trait DeviceEnumerator: Send {
    /// Ordered candidates; order is the bridge driver's enumeration order.
    async fn list_candidates(&mut self, vendor_fingerprint: &str)
        -> LinkResult<Vec<DeviceDescriptor>>;
}

/// Pick a device from the candidate list.
///
/// With a serial number, the descriptor with that exact serial wins. Without one,
/// the first candidate whose description starts with `family_prefix` is chosen.
pub fn select_device<'a>(
    candidates: &'a [DeviceDescriptor],
    serial_number: Option<&str>,
    family_prefix: &str,
) -> LinkResult<&'a DeviceDescriptor> {
    match serial_number {
        Some(serial) => candidates
            .iter()
            .find(|d| d.serial_number == serial)
            .ok_or_else(|| {
                LinkError::DeviceNotFound(format!(
                    "Failed to open device by serial number '{}'",
                    serial
                ))
            }),
        None => candidates
            .iter()
            .find(|d| d.is_family(family_prefix))
            .ok_or_else(|| {
                LinkError::DeviceNotFound(format!(
                    "No instrument with a description starting with '{}'",
                    family_prefix
                ))
            }),
    }
}
