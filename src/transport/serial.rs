//! Serial port bridge using the `serialport` crate
//!
//! Maps the transport boundary onto the operating system's serial driver.
//! Bridges are discovered through the USB metadata the OS exposes for each
//! port: the manufacturer string is the vendor fingerprint, the USB serial
//! number is the identity key and the product string is the description.
//!
//! Port I/O blocks, so it runs on tokio's blocking pool and never stalls a
//! runtime worker. Bit mode has no equivalent at the OS serial layer; the
//! requested mode is logged and otherwise ignored.

use super::Transport;
use crate::config::{FlowControl, LineSettings, Parity};
use crate::device::{DeviceDescriptor, DeviceEnumerator};
use crate::error::{FtStatus, LinkError, LinkResult, TransportOp};
use async_trait::async_trait;
use serialport::{SerialPort, SerialPortType};
use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

const XON: u8 = 0x11;
const XOFF: u8 = 0x13;

/// [`Transport`] over OS serial ports.
#[derive(Debug, Default)]
pub struct SerialPortTransport {
    /// Serial number to port path, filled by enumeration
    ports: HashMap<String, String>,
}

impl SerialPortTransport {
    /// Create a transport with an empty port table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Port path (e.g. "/dev/ttyUSB0", "COM3") for an enumerated serial number.
    pub fn port_name(&self, serial_number: &str) -> Option<&str> {
        self.ports.get(serial_number).map(String::as_str)
    }

    fn register(
        &mut self,
        ports: Vec<serialport::SerialPortInfo>,
        vendor_fingerprint: &str,
    ) -> Vec<DeviceDescriptor> {
        let mut found = Vec::new();
        for (index, port) in ports.into_iter().enumerate() {
            let SerialPortType::UsbPort(info) = port.port_type else {
                continue;
            };
            let manufacturer = info.manufacturer.as_deref().unwrap_or_default();
            if !manufacturer.eq_ignore_ascii_case(vendor_fingerprint) {
                continue;
            }
            let Some(serial_number) = info.serial_number.clone() else {
                debug!(port = %port.port_name, "skipping bridge without serial number");
                continue;
            };

            let descriptor =
                DeviceDescriptor::new(serial_number, info.product.clone().unwrap_or_default())
                    .with_id((u32::from(info.vid) << 16) | u32::from(info.pid))
                    .with_location(index as u32);

            self.ports
                .insert(descriptor.serial_number.clone(), port.port_name.clone());
            found.push(descriptor);
        }
        found
    }
}

fn map_serial_error(operation: TransportOp, err: &serialport::Error) -> LinkError {
    let status = match err.kind() {
        serialport::ErrorKind::NoDevice => FtStatus::DeviceNotFound,
        serialport::ErrorKind::InvalidInput => FtStatus::InvalidParameter,
        serialport::ErrorKind::Io(_) => FtStatus::IoError,
        serialport::ErrorKind::Unknown => FtStatus::OtherError,
    };
    debug!(%operation, error = %err, "serial port error");
    LinkError::transport(operation, status)
}

fn map_io_error(operation: TransportOp, err: &std::io::Error) -> LinkError {
    debug!(%operation, error = %err, "serial I/O error");
    let status = match err.kind() {
        std::io::ErrorKind::NotFound => FtStatus::DeviceNotFound,
        std::io::ErrorKind::InvalidInput => FtStatus::InvalidParameter,
        _ => FtStatus::IoError,
    };
    LinkError::transport(operation, status)
}

#[async_trait]
impl DeviceEnumerator for SerialPortTransport {
    async fn list_candidates(
        &mut self,
        vendor_fingerprint: &str,
    ) -> LinkResult<Vec<DeviceDescriptor>> {
        let ports = tokio::task::spawn_blocking(serialport::available_ports)
            .await
            .map_err(|_| LinkError::transport(TransportOp::Enumerate, FtStatus::OtherError))?
            .map_err(|e| map_serial_error(TransportOp::Enumerate, &e))?;
        Ok(self.register(ports, vendor_fingerprint))
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Open serial port.
///
/// Port calls block, so every operation runs on the blocking thread pool with
/// the port behind a mutex. Dropping the handle closes the port.
pub struct SerialHandle {
    port_name: String,
    port: Arc<Mutex<Box<dyn SerialPort>>>,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl fmt::Debug for SerialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialHandle")
            .field("port_name", &self.port_name)
            .finish_non_exhaustive()
    }
}

impl SerialHandle {
    /// OS path of the port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    async fn with_port<R, F>(&self, operation: TransportOp, f: F) -> LinkResult<R>
    where
        F: FnOnce(&mut dyn SerialPort) -> LinkResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let port = Arc::clone(&self.port);
        tokio::task::spawn_blocking(move || {
            let mut guard = port.blocking_lock();
            f(&mut **guard)
        })
        .await
        .map_err(|e| {
            debug!(%operation, error = %e, "serial I/O task failed");
            LinkError::transport(operation, FtStatus::OtherError)
        })?
    }
}

#[async_trait]
impl Transport for SerialPortTransport {
    type Handle = SerialHandle;

    async fn open(&mut self, serial_number: &str) -> LinkResult<SerialHandle> {
        let port_name = self
            .ports
            .get(serial_number)
            .cloned()
            .ok_or_else(|| LinkError::transport(TransportOp::Open, FtStatus::DeviceNotFound))?;

        let path = port_name.clone();
        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&path, 9600)
                .timeout(Duration::from_millis(100))
                .open()
                .map_err(|e| map_serial_error(TransportOp::Open, &e))
        })
        .await
        .map_err(|_| LinkError::transport(TransportOp::Open, FtStatus::OtherError))??;

        debug!(%port_name, serial_number, "serial port opened");
        Ok(SerialHandle {
            port_name,
            port: Arc::new(Mutex::new(port)),
            read_timeout: Duration::from_millis(100),
            write_timeout: Duration::from_millis(100),
        })
    }

    async fn close(&mut self, handle: SerialHandle) -> LinkResult<()> {
        debug!(port = %handle.port_name, "serial port closed");
        drop(handle);
        Ok(())
    }

    async fn write(&mut self, handle: &mut SerialHandle, data: &[u8]) -> LinkResult<usize> {
        let data = data.to_vec();
        let (write_timeout, read_timeout) = (handle.write_timeout, handle.read_timeout);
        handle
            .with_port(TransportOp::Write, move |port| {
                port.set_timeout(write_timeout)
                    .map_err(|e| map_serial_error(TransportOp::Write, &e))?;
                let written = port
                    .write_all(&data)
                    .and_then(|()| port.flush())
                    .map_err(|e| map_io_error(TransportOp::Write, &e));
                port.set_timeout(read_timeout)
                    .map_err(|e| map_serial_error(TransportOp::Write, &e))?;
                written.map(|()| data.len())
            })
            .await
    }

    async fn poll_available(&mut self, handle: &mut SerialHandle) -> LinkResult<usize> {
        handle
            .with_port(TransportOp::Poll, |port| {
                port.bytes_to_read()
                    .map(|n| n as usize)
                    .map_err(|e| map_serial_error(TransportOp::Poll, &e))
            })
            .await
    }

    async fn read(&mut self, handle: &mut SerialHandle, max_count: usize) -> LinkResult<Vec<u8>> {
        handle
            .with_port(TransportOp::Read, move |port| {
                let mut buffer = vec![0u8; max_count];
                let n = match port.read(&mut buffer) {
                    Ok(n) => n,
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => 0,
                    Err(e) => return Err(map_io_error(TransportOp::Read, &e)),
                };
                buffer.truncate(n);
                Ok(buffer)
            })
            .await
    }

    async fn configure(&mut self, handle: &mut SerialHandle, line: &LineSettings) -> LinkResult<()> {
        let data_bits = match line.data_bits {
            7 => serialport::DataBits::Seven,
            _ => serialport::DataBits::Eight,
        };
        let stop_bits = match line.stop_bits {
            2 => serialport::StopBits::Two,
            _ => serialport::StopBits::One,
        };
        let parity = match line.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        };
        let flow_control = flow_control(line)?;

        let baud_rate = line.baud_rate;
        let read_timeout = line.read_timeout;
        handle
            .with_port(TransportOp::Configure, move |port| {
                let failed = |e: serialport::Error| map_serial_error(TransportOp::Configure, &e);
                port.set_data_bits(data_bits).map_err(failed)?;
                port.set_stop_bits(stop_bits).map_err(failed)?;
                port.set_parity(parity).map_err(failed)?;
                port.set_flow_control(flow_control).map_err(failed)?;
                port.set_baud_rate(baud_rate).map_err(failed)?;
                port.set_timeout(read_timeout).map_err(failed)
            })
            .await?;
        handle.read_timeout = line.read_timeout;
        handle.write_timeout = line.write_timeout;

        debug!(
            baud_rate = line.baud_rate,
            mask = line.bit_mode_mask,
            enable = line.bit_mode_enable,
            "bit mode not applicable to OS serial ports, ignored"
        );
        Ok(())
    }
}

/// Flow control setting for the OS driver.
///
/// The driver only knows the standard XON/XOFF characters (0x11/0x13).
fn flow_control(line: &LineSettings) -> LinkResult<serialport::FlowControl> {
    let unsupported = || LinkError::transport(TransportOp::Configure, FtStatus::NotSupported);
    match line.flow_control {
        FlowControl::None => Ok(serialport::FlowControl::None),
        FlowControl::RtsCts => Ok(serialport::FlowControl::Hardware),
        FlowControl::XonXoff if line.xon == XON && line.xoff == XOFF => {
            Ok(serialport::FlowControl::Software)
        }
        FlowControl::XonXoff => {
            debug!(xon = line.xon, xoff = line.xoff, "custom XON/XOFF characters");
            Err(unsupported())
        }
        FlowControl::DtrDsr => Err(unsupported()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_error_mapping() {
        let err = serialport::Error::new(serialport::ErrorKind::NoDevice, "gone");
        assert_eq!(
            map_serial_error(TransportOp::Open, &err).status(),
            Some(FtStatus::DeviceNotFound)
        );

        let err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged");
        assert_eq!(
            map_io_error(TransportOp::Write, &err).status(),
            Some(FtStatus::IoError)
        );
    }

    #[test]
    fn test_flow_control_mapping() {
        let mut line = LineSettings::default();
        assert!(matches!(
            flow_control(&line),
            Ok(serialport::FlowControl::None)
        ));

        line.flow_control = FlowControl::XonXoff;
        assert!(matches!(
            flow_control(&line),
            Ok(serialport::FlowControl::Software)
        ));

        line.xon = 0x01;
        assert_eq!(
            flow_control(&line).unwrap_err().status(),
            Some(FtStatus::NotSupported)
        );

        line.flow_control = FlowControl::DtrDsr;
        assert!(flow_control(&line).is_err());
    }

    fn usb_port(name: &str, manufacturer: &str, serial: Option<&str>) -> serialport::SerialPortInfo {
        serialport::SerialPortInfo {
            port_name: name.to_string(),
            port_type: SerialPortType::UsbPort(serialport::UsbPortInfo {
                vid: 0x0403,
                pid: 0x6001,
                serial_number: serial.map(str::to_string),
                manufacturer: Some(manufacturer.to_string()),
                product: Some("TSL-570".to_string()),
            }),
        }
    }

    #[test]
    fn test_register_keeps_matching_usb_ports() {
        let mut transport = SerialPortTransport::new();
        let found = transport.register(
            vec![
                usb_port("/dev/ttyUSB0", "FTDI", Some("A10K3X9Z")),
                usb_port("/dev/ttyUSB1", "santec", Some("23110067")),
                usb_port("/dev/ttyUSB2", "SANTEC", None),
                serialport::SerialPortInfo {
                    port_name: "/dev/ttyS0".to_string(),
                    port_type: SerialPortType::Unknown,
                },
            ],
            "SANTEC",
        );

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].serial_number, "23110067");
        assert_eq!(found[0].description, "TSL-570");
        assert_eq!(found[0].id, 0x0403_6001);
        assert_eq!(transport.port_name("23110067"), Some("/dev/ttyUSB1"));
    }

    #[tokio::test]
    async fn test_open_without_enumeration_fails() {
        let mut transport = SerialPortTransport::new();
        let err = transport.open("23110067").await.unwrap_err();
        assert_eq!(err.status(), Some(FtStatus::DeviceNotFound));
        assert!(transport.port_name("23110067").is_none());
    }
}
