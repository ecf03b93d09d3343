//! Idle-timeout frame reader
//!
//! The instrument sends no length header and does not reliably terminate its
//! answers, so a response is considered complete once the line goes quiet.
//!
//! ## Completion rules
//!
//! - The silence counter advances by one poll interval per poll and is reset
//!   to zero whenever bytes arrive.
//! - Once anything has been received, the first empty poll ends the frame.
//! - Before anything has been received, empty polls only advance the counter;
//!   the read gives up when the counter reaches `max_wait`.
//! - With an expected byte count, the read ends as soon as that many bytes
//!   have accumulated.
//!
//! The returned frame may be shorter than expected when the instrument stalls.

use crate::error::LinkResult;
use crate::transport::Transport;
use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tracing::trace;

/// Default pause between queue status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Accumulates inbound bytes into one response frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameReader {
    poll_interval: Duration,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl FrameReader {
    /// Create a reader polling at the given interval.
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Read one frame from an open handle.
    ///
    /// `exact_byte_count` of `None` or `Some(0)` means "no expected size".
    /// Transport errors abort the read immediately; bytes gathered so far
    /// are discarded.
    pub async fn read_frame<T: Transport>(
        &self,
        transport: &mut T,
        handle: &mut T::Handle,
        max_wait: Duration,
        exact_byte_count: Option<usize>,
    ) -> LinkResult<Bytes> {
        let expected = exact_byte_count.filter(|&n| n > 0);
        let mut frame = BytesMut::with_capacity(expected.unwrap_or(64));
        let mut silence = Duration::ZERO;
        let mut received = false;

        while silence < max_wait {
            let step = self.poll_interval.min(max_wait - silence);
            tokio::time::sleep(step).await;
            silence += step;

            let available = transport.poll_available(handle).await?;
            if available == 0 {
                if received {
                    break;
                }
                continue;
            }

            received = true;
            let chunk = transport.read(handle, available).await?;
            trace!(available, read = chunk.len(), "frame chunk");
            if !chunk.is_empty() {
                frame.extend_from_slice(&chunk);
                silence = Duration::ZERO;
            }

            if expected.is_some_and(|n| frame.len() >= n) {
                break;
            }
        }

        trace!(len = frame.len(), received, "frame complete");
        Ok(frame.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceDescriptor;
    use crate::error::{FtStatus, TransportOp};
    use crate::transport::{MockHandle, MockTransport};
    use tokio::time::Instant;

    async fn open() -> (MockTransport, MockHandle) {
        let mut transport = MockTransport::new()
            .with_device("SANTEC", DeviceDescriptor::new("23110067", "TSL-570"));
        let handle = transport.open("23110067").await.unwrap();
        (transport, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_line_times_out_exactly() {
        let (mut transport, mut handle) = open().await;
        let reader = FrameReader::default();

        let start = Instant::now();
        let frame = reader
            .read_frame(&mut transport, &mut handle, Duration::from_millis(100), None)
            .await
            .unwrap();

        assert!(frame.is_empty());
        assert_eq!(start.elapsed(), Duration::from_millis(100));
        assert_eq!(transport.poll_count(), 5);
        assert_eq!(transport.read_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uneven_budget_still_ends_at_max_wait() {
        let (mut transport, mut handle) = open().await;
        let reader = FrameReader::default();

        let start = Instant::now();
        reader
            .read_frame(&mut transport, &mut handle, Duration::from_millis(50), None)
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exact_count_stops_early() {
        let (mut transport, mut handle) = open().await;
        transport.push_response(b"12");
        transport.push_response(b"34");
        transport.push_silence(10);
        let reader = FrameReader::default();

        let start = Instant::now();
        let frame = reader
            .read_frame(&mut transport, &mut handle, Duration::from_secs(1), Some(4))
            .await
            .unwrap();

        assert_eq!(&frame[..], b"1234");
        assert_eq!(start.elapsed(), Duration::from_millis(40));
        assert_eq!(transport.read_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_after_data_completes_frame() {
        let (mut transport, mut handle) = open().await;
        transport.push_silence(3);
        transport.push_response(b"TSL-570");
        transport.push_response(b",23110067\r");
        transport.push_silence(1);
        transport.push_response(b"late");
        let reader = FrameReader::default();

        let start = Instant::now();
        let frame = reader
            .read_frame(&mut transport, &mut handle, Duration::from_secs(1), None)
            .await
            .unwrap();

        assert_eq!(&frame[..], b"TSL-570,23110067\r");
        // three silent polls, two data polls, one idle poll
        assert_eq!(start.elapsed(), Duration::from_millis(120));
        assert_eq!(transport.pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_resets_silence_budget() {
        let (mut transport, mut handle) = open().await;
        transport.push_silence(4);
        transport.push_response(b"A");
        transport.push_silence(4);
        let reader = FrameReader::default();

        // 100ms budget: data arrives at 100ms, the reset keeps the read alive
        // long enough to see the following empty poll.
        let frame = reader
            .read_frame(&mut transport, &mut handle, Duration::from_millis(100), None)
            .await
            .unwrap();
        assert_eq!(&frame[..], b"A");
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_frame_when_instrument_stalls() {
        let (mut transport, mut handle) = open().await;
        transport.push_response(b"#18000");
        let reader = FrameReader::default();

        let frame = reader
            .read_frame(&mut transport, &mut handle, Duration::from_secs(1), Some(16))
            .await
            .unwrap();
        assert_eq!(frame.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_error_propagates() {
        let (mut transport, mut handle) = open().await;
        transport.fail_next(TransportOp::Poll, FtStatus::IoError);
        let reader = FrameReader::default();

        let err = reader
            .read_frame(&mut transport, &mut handle, Duration::from_secs(1), None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(FtStatus::IoError));
    }
}
