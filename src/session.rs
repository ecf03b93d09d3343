//! Instrument session
//!
//! A [`Session`] binds one transport handle to one selected device and runs
//! request/response exchanges over it.
//!
//! ## States
//!
//! ```text
//!            open(serial | None)
//!   Closed ───────────────────────▶ Open
//!     ▲                              │
//!     └──────── close() ─────────────┘
//!     └──── read (ReleaseAfterRead) ─┘
//! ```
//!
//! Any operation that needs the line while Closed reopens it with the serial
//! number of the last device that was successfully opened, and reapplies the
//! line settings. With the default [`HandlePolicy::ReleaseAfterRead`] every
//! read ends by closing the handle, so back-to-back queries reopen each time.
//! [`HandlePolicy::KeepOpen`] holds the handle until `close()`.
//!
//! A session is used by one caller at a time; every method takes `&mut self`.

use crate::config::{HandlePolicy, LinkConfig};
use crate::device::{select_device, DeviceDescriptor, DeviceEnumerator};
use crate::error::{BlockStage, LinkError, LinkResult};
use crate::protocol::{
    check_sample_count, decode_frame, encode_command, normalize_response, FrameReader, ScanData,
    ScanFormat,
};
use crate::transport::Transport;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Identification query.
pub const IDN_QUERY: &str = "*IDN?";

/// One instrument connection.
pub struct Session<T: Transport> {
    transport: T,
    config: LinkConfig,
    reader: FrameReader,
    handle: Option<T::Handle>,
    device: Option<DeviceDescriptor>,
    last_serial_number: Option<String>,
}

impl<T> Session<T>
where
    T: Transport + DeviceEnumerator,
{
    /// Create a closed session over the given transport.
    pub fn new(transport: T, config: LinkConfig) -> Self {
        let reader = FrameReader::new(config.framing.poll_interval);
        Self {
            transport,
            config,
            reader,
            handle: None,
            device: None,
            last_serial_number: None,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// True while a handle is held.
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Device selected by the last successful `open`.
    pub fn device(&self) -> Option<&DeviceDescriptor> {
        self.device.as_ref()
    }

    /// Serial number used for lazy reconnects.
    pub fn last_serial_number(&self) -> Option<&str> {
        self.last_serial_number.as_deref()
    }

    /// Bridges reporting the configured vendor fingerprint.
    pub async fn list_devices(&mut self) -> LinkResult<Vec<DeviceDescriptor>> {
        self.transport
            .list_candidates(&self.config.discovery.vendor_fingerprint)
            .await
    }

    /// Select a device, open it and configure the line.
    ///
    /// With `serial_number`, that exact device is opened; otherwise the first
    /// candidate of the configured instrument family. A handle still held from
    /// an earlier open is released first; a failure to close it is only logged.
    pub async fn open(&mut self, serial_number: Option<&str>) -> LinkResult<DeviceDescriptor> {
        if let Some(handle) = self.handle.take() {
            if let Err(err) = self.transport.close(handle).await {
                warn!(error = %err, "failed to release previous handle");
            }
        }

        let candidates = self.list_devices().await?;
        let device = select_device(
            &candidates,
            serial_number,
            &self.config.discovery.family_prefix,
        )?
        .clone();

        let handle = self.connect(&device.serial_number).await?;
        self.handle = Some(handle);
        self.last_serial_number = Some(device.serial_number.clone());
        self.device = Some(device.clone());

        info!(
            serial_number = %device.serial_number,
            description = %device.description,
            "instrument session opened"
        );
        Ok(device)
    }

    /// Release the handle. Closing a closed session is a no-op.
    pub async fn close(&mut self) -> LinkResult<()> {
        if let Some(handle) = self.handle.take() {
            self.transport.close(handle).await?;
            info!(serial_number = ?self.last_serial_number, "instrument session closed");
        }
        Ok(())
    }

    async fn connect(&mut self, serial_number: &str) -> LinkResult<T::Handle> {
        let mut handle = self.transport.open(serial_number).await?;
        if let Err(err) = self.transport.configure(&mut handle, &self.config.line).await {
            if let Err(close_err) = self.transport.close(handle).await {
                warn!(error = %close_err, "failed to release handle after configure error");
            }
            return Err(err);
        }
        debug!(serial_number, baud_rate = self.config.line.baud_rate, "line configured");
        Ok(handle)
    }

    async fn acquire(&mut self) -> LinkResult<T::Handle> {
        if let Some(handle) = self.handle.take() {
            return Ok(handle);
        }
        let serial_number = self.last_serial_number.clone().ok_or_else(|| {
            LinkError::DeviceNotFound("no device has been opened in this session".to_string())
        })?;
        debug!(%serial_number, "reopening instrument handle");
        self.connect(&serial_number).await
    }

    async fn release_after_exchange(&mut self) {
        if self.config.framing.handle_policy != HandlePolicy::ReleaseAfterRead {
            return;
        }
        if let Some(handle) = self.handle.take() {
            if let Err(err) = self.transport.close(handle).await {
                warn!(error = %err, "failed to release handle");
            }
        }
    }

    /// Send one command, then wait the post-write delay.
    pub async fn write(&mut self, command: &str) -> LinkResult<()> {
        let wire = encode_command(command)?;
        let mut handle = self.acquire().await?;
        let result = self.transport.write(&mut handle, &wire).await;
        self.handle = Some(handle);

        match result {
            Ok(written) => {
                debug!(command = %command.trim_end(), written, "command sent");
                tokio::time::sleep(self.config.framing.post_write_delay).await;
                Ok(())
            }
            Err(err) => {
                self.release_after_exchange().await;
                Err(err)
            }
        }
    }

    /// Read one frame using the idle-timeout rules.
    pub async fn read(
        &mut self,
        max_wait: Duration,
        exact_byte_count: Option<usize>,
    ) -> LinkResult<Bytes> {
        let mut handle = self.acquire().await?;
        let result = self
            .reader
            .read_frame(&mut self.transport, &mut handle, max_wait, exact_byte_count)
            .await;
        self.handle = Some(handle);
        self.release_after_exchange().await;

        let frame = result?;
        debug!(len = frame.len(), "frame received");
        Ok(frame)
    }

    /// Write a command and return the undecoded response frame.
    pub async fn query_raw(&mut self, command: &str, wait: Duration) -> LinkResult<Bytes> {
        self.write(command).await?;
        self.read(wait, None).await
    }

    /// Write a command and return the cleaned textual answer.
    ///
    /// A frame that is not ASCII is logged and yields an empty string; use
    /// [`Session::query_raw`] to inspect such traffic.
    pub async fn query(&mut self, command: &str, wait: Duration) -> LinkResult<String> {
        let frame = self.query_raw(command, wait).await?;
        match decode_frame(&frame) {
            Ok(text) => Ok(normalize_response(&text)),
            Err(err) => {
                warn!(command, raw = ?frame, error = %err, "undecodable response");
                Ok(String::new())
            }
        }
    }

    /// Query the instrument identification string.
    pub async fn query_idn(&mut self) -> LinkResult<String> {
        let wait = self.config.framing.query_wait;
        self.query(IDN_QUERY, wait).await
    }

    /// Retrieve all samples of the last scan.
    ///
    /// Asks for the point count, rejects counts above the ceiling before any
    /// bulk transfer, requests the data and decodes it in the dialect's format.
    pub async fn fetch_scan(&mut self, format: ScanFormat) -> LinkResult<ScanData> {
        let wait = self.config.framing.query_wait;
        let reply = self.query(format.count_command(), wait).await?;
        let count: usize = reply.trim().parse().map_err(|_| {
            LinkError::protocol(
                BlockStage::PointCount,
                format!("expected a number of data points, found {:?}", reply),
            )
        })?;
        check_sample_count(count)?;
        debug!(?format, count, "scan point count");

        self.write(format.data_command()).await?;
        if format == ScanFormat::Scpi {
            tokio::time::sleep(self.config.framing.scpi_scan_settle).await;
        }

        let block = self
            .read(self.config.framing.scan_read_wait, Some(format.block_len(count)))
            .await?;
        let data = format.decode(&block, count)?;
        info!(?format, samples = data.len(), "scan retrieved");
        Ok(data)
    }
}
