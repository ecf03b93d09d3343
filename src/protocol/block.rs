//! Binary scan block decoding
//!
//! Scan results leave the instrument in one of two encodings, chosen by the
//! command dialect that requested them:
//!
//! | Dialect  | Count query       | Data command     | Payload                                  |
//! |----------|-------------------|------------------|------------------------------------------|
//! | SCPI     | `READout:POINts?` | `READout:DATa?`  | `#` + digit `d` + `d` ASCII length digits + big-endian `f32`s |
//! | Santec   | `TN`              | `TA`             | exactly `N` big-endian `u32`s, no header |
//!
//! Both decoders are pure functions over bytes that have already been read.

use crate::error::{BlockStage, LinkError, LinkResult};
use bytes::Buf;
use tracing::trace;

/// Largest sample count accepted from the instrument.
pub const MAX_SCAN_SAMPLES: usize = 200_001;

/// Width of one sample on the wire.
pub const SAMPLE_BYTES: usize = 4;

/// Reject sample counts above [`MAX_SCAN_SAMPLES`].
pub fn check_sample_count(count: usize) -> LinkResult<()> {
    if count > MAX_SCAN_SAMPLES {
        return Err(LinkError::SampleCountTooLarge {
            requested: count,
            max: MAX_SCAN_SAMPLES,
        });
    }
    Ok(())
}

/// Command dialect used to retrieve a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFormat {
    /// SCPI dialect, self-describing `#` block of floats
    Scpi,
    /// Proprietary dialect, fixed-count raw block of unsigned integers
    Santec,
}

impl ScanFormat {
    /// Query returning the number of points in the last scan.
    pub fn count_command(self) -> &'static str {
        match self {
            ScanFormat::Scpi => "READout:POINts?",
            ScanFormat::Santec => "TN",
        }
    }

    /// Command that makes the instrument emit the scan block.
    pub fn data_command(self) -> &'static str {
        match self {
            ScanFormat::Scpi => "READout:DATa?",
            ScanFormat::Santec => "TA",
        }
    }

    /// Bytes on the wire for a block of `count` samples, header included.
    pub fn block_len(self, count: usize) -> usize {
        let payload = count * SAMPLE_BYTES;
        match self {
            ScanFormat::Scpi => 2 + payload.to_string().len() + payload,
            ScanFormat::Santec => payload,
        }
    }

    /// Decode a received block holding `count` samples.
    ///
    /// A SCPI block must declare the same number of samples as `count`. An
    /// empty SCPI reply decodes to no samples.
    pub fn decode(self, block: &[u8], count: usize) -> LinkResult<ScanData> {
        match self {
            ScanFormat::Scpi => {
                let samples = decode_ieee_block(block)?;
                if !samples.is_empty() && samples.len() != count {
                    return Err(LinkError::protocol(
                        BlockStage::LengthField,
                        format!(
                            "block declares {} samples, point count was {}",
                            samples.len(),
                            count
                        ),
                    ));
                }
                Ok(ScanData::Float(samples))
            }
            ScanFormat::Santec => decode_u32_block(block, count).map(ScanData::Integer),
        }
    }
}

/// Decoded scan samples, in wire order.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanData {
    /// SCPI dialect samples
    Float(Vec<f32>),
    /// Santec dialect samples
    Integer(Vec<u32>),
}

impl ScanData {
    /// Number of samples.
    pub fn len(&self) -> usize {
        match self {
            ScanData::Float(v) => v.len(),
            ScanData::Integer(v) => v.len(),
        }
    }

    /// True when the scan holds no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples widened to `f64`.
    pub fn to_f64(&self) -> Vec<f64> {
        match self {
            ScanData::Float(v) => v.iter().map(|&x| f64::from(x)).collect(),
            ScanData::Integer(v) => v.iter().map(|&x| f64::from(x)).collect(),
        }
    }
}

/// Decode a `#`-prefixed definite-length block of big-endian `f32`s.
///
/// An empty buffer (the instrument sent nothing) decodes to no samples.
/// Bytes after the declared payload are ignored.
pub fn decode_ieee_block(block: &[u8]) -> LinkResult<Vec<f32>> {
    let Some(&marker) = block.first() else {
        return Ok(Vec::new());
    };
    if marker != b'#' {
        return Err(LinkError::protocol(
            BlockStage::Marker,
            format!("expected '#' as the first byte, found 0x{:02X}", marker),
        ));
    }

    let digit = *block.get(1).ok_or_else(|| {
        LinkError::protocol(BlockStage::DigitCount, "block ends after the marker")
    })?;
    let width = char::from(digit).to_digit(10).ok_or_else(|| {
        LinkError::protocol(
            BlockStage::DigitCount,
            format!("expected a digit as the second byte, found {:?}", char::from(digit)),
        )
    })? as usize;

    let header = 2 + width;
    let field = block.get(2..header).ok_or_else(|| {
        LinkError::protocol(
            BlockStage::LengthField,
            format!(
                "length field needs {} bytes, only {} present",
                width,
                block.len() - 2
            ),
        )
    })?;
    let text: String = field.iter().map(|&b| char::from(b)).collect();
    let byte_count: usize = text.parse().map_err(|_| {
        LinkError::protocol(
            BlockStage::LengthField,
            format!("expected a decimal byte count, found {:?}", text),
        )
    })?;

    if byte_count % SAMPLE_BYTES != 0 {
        return Err(LinkError::protocol(
            BlockStage::LengthField,
            format!("byte count {} is not a multiple of {}", byte_count, SAMPLE_BYTES),
        ));
    }
    check_sample_count(byte_count / SAMPLE_BYTES)?;

    let payload = &block[header..];
    if payload.len() < byte_count {
        return Err(LinkError::PartialData {
            expected: byte_count,
            actual: payload.len(),
        });
    }
    if payload.len() > byte_count {
        trace!(
            extra = payload.len() - byte_count,
            "ignoring bytes after block payload"
        );
    }

    let mut buf = &payload[..byte_count];
    let mut samples = Vec::with_capacity(byte_count / SAMPLE_BYTES);
    while buf.has_remaining() {
        samples.push(buf.get_f32());
    }
    Ok(samples)
}

/// Decode exactly `count` big-endian `u32`s with no header.
pub fn decode_u32_block(block: &[u8], count: usize) -> LinkResult<Vec<u32>> {
    check_sample_count(count)?;
    let expected = count * SAMPLE_BYTES;
    if block.len() != expected {
        return Err(LinkError::PartialData {
            expected,
            actual: block.len(),
        });
    }

    let mut buf = block;
    let mut samples = Vec::with_capacity(count);
    while buf.has_remaining() {
        samples.push(buf.get_u32());
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ieee_block(samples: &[f32]) -> Vec<u8> {
        let payload: Vec<u8> = samples.iter().flat_map(|s| s.to_be_bytes()).collect();
        let len = payload.len().to_string();
        let mut block = format!("#{}{}", len.len(), len).into_bytes();
        block.extend_from_slice(&payload);
        block
    }

    #[test]
    fn test_single_float_block() {
        let value = 1550.125_f32;
        let mut block = b"#14".to_vec();
        block.extend_from_slice(&value.to_be_bytes());
        assert_eq!(decode_ieee_block(&block).unwrap(), vec![value]);
    }

    #[test]
    fn test_bytes_after_payload_are_ignored() {
        let mut block = b"#141234".to_vec();
        block.extend_from_slice(&(-3.5_f32).to_be_bytes());
        block.push(b'\n');
        let samples = decode_ieee_block(&block).unwrap();
        assert_eq!(samples, vec![f32::from_be_bytes(*b"1234")]);
    }

    #[test]
    fn test_multi_digit_length_field() {
        let values: Vec<f32> = (0..30).map(|i| i as f32 * 0.5).collect();
        let block = ieee_block(&values);
        assert!(block.starts_with(b"#3120"));
        assert_eq!(decode_ieee_block(&block).unwrap(), values);
    }

    #[test]
    fn test_empty_buffer_has_no_samples() {
        assert!(decode_ieee_block(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_bad_marker() {
        let err = decode_ieee_block(b"A14xxxx").unwrap_err();
        match err {
            LinkError::ProtocolViolation { stage, detail } => {
                assert_eq!(stage, BlockStage::Marker);
                assert!(detail.contains("0x41"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bad_digit_count() {
        let err = decode_ieee_block(b"#X4abcd").unwrap_err();
        assert!(matches!(
            err,
            LinkError::ProtocolViolation {
                stage: BlockStage::DigitCount,
                ..
            }
        ));
        assert!(err.to_string().contains("'X'"));

        assert!(matches!(
            decode_ieee_block(b"#"),
            Err(LinkError::ProtocolViolation {
                stage: BlockStage::DigitCount,
                ..
            })
        ));
    }

    #[test]
    fn test_bad_length_field() {
        let err = decode_ieee_block(b"#2x4abcd").unwrap_err();
        assert!(matches!(
            err,
            LinkError::ProtocolViolation {
                stage: BlockStage::LengthField,
                ..
            }
        ));
        assert!(err.to_string().contains("\"x4\""));

        // field shorter than its declared width
        assert!(matches!(
            decode_ieee_block(b"#51"),
            Err(LinkError::ProtocolViolation {
                stage: BlockStage::LengthField,
                ..
            })
        ));

        // zero-width field holds no number
        assert!(decode_ieee_block(b"#0abcd").is_err());

        assert!(matches!(
            decode_ieee_block(b"#13abc"),
            Err(LinkError::ProtocolViolation {
                stage: BlockStage::LengthField,
                ..
            })
        ));
    }

    #[test]
    fn test_truncated_payload_is_partial() {
        let err = decode_ieee_block(b"#18\x00\x00\x00\x00\x00").unwrap_err();
        assert!(matches!(
            err,
            LinkError::PartialData {
                expected: 8,
                actual: 5
            }
        ));
    }

    #[test]
    fn test_declared_count_over_ceiling() {
        // 200_002 samples = 800_008 bytes
        let err = decode_ieee_block(b"#6800008").unwrap_err();
        assert!(matches!(
            err,
            LinkError::SampleCountTooLarge {
                requested: 200_002,
                ..
            }
        ));
    }

    #[test]
    fn test_u32_block() {
        let block = [0, 0, 0, 1, 0, 0, 1, 0, 0xFF, 0xFF, 0xFF, 0xFF];
        assert_eq!(
            decode_u32_block(&block, 3).unwrap(),
            vec![1, 256, u32::MAX]
        );
    }

    #[test]
    fn test_u32_block_length_mismatch() {
        let block = [0u8; 11];
        assert!(matches!(
            decode_u32_block(&block, 3),
            Err(LinkError::PartialData {
                expected: 12,
                actual: 11
            })
        ));
        assert!(decode_u32_block(&[0u8; 16], 3).is_err());
    }

    #[test]
    fn test_sample_ceiling() {
        assert!(check_sample_count(MAX_SCAN_SAMPLES).is_ok());
        assert!(matches!(
            check_sample_count(200_002),
            Err(LinkError::SampleCountTooLarge {
                requested: 200_002,
                max: MAX_SCAN_SAMPLES
            })
        ));
        assert!(matches!(
            decode_u32_block(&[], 200_002),
            Err(LinkError::SampleCountTooLarge { .. })
        ));
    }

    #[test]
    fn test_format_dispatch() {
        assert_eq!(ScanFormat::Scpi.count_command(), "READout:POINts?");
        assert_eq!(ScanFormat::Santec.data_command(), "TA");

        let data = ScanFormat::Santec.decode(&[0, 0, 0, 7], 1).unwrap();
        assert_eq!(data, ScanData::Integer(vec![7]));
        assert_eq!(data.to_f64(), vec![7.0]);

        let data = ScanFormat::Scpi.decode(&ieee_block(&[2.0]), 1).unwrap();
        assert_eq!(data, ScanData::Float(vec![2.0]));
        assert!(!data.is_empty());
    }

    #[test]
    fn test_block_len_includes_header() {
        assert_eq!(ScanFormat::Scpi.block_len(1), 3 + 4);
        assert_eq!(ScanFormat::Scpi.block_len(3), 4 + 12);
        assert_eq!(ScanFormat::Scpi.block_len(30), 5 + 120);
        assert_eq!(ieee_block(&[0.0; 30]).len(), ScanFormat::Scpi.block_len(30));
        assert_eq!(ScanFormat::Santec.block_len(3), 12);
    }

    #[test]
    fn test_scpi_count_mismatch() {
        let err = ScanFormat::Scpi
            .decode(&ieee_block(&[1.0, 2.0]), 3)
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::ProtocolViolation {
                stage: BlockStage::LengthField,
                ..
            }
        ));
        assert!(ScanFormat::Scpi.decode(&[], 3).unwrap().is_empty());
    }
}
