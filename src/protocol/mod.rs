//! Wire protocol for textual commands and binary scan blocks
//!
//! - [`command`] - outbound command normalization
//! - [`reader`] - idle-timeout response framing
//! - [`response`] - artifact stripping for textual answers
//! - [`block`] - binary scan block decoders

pub mod block;
pub mod command;
pub mod reader;
pub mod response;

pub use block::{
    check_sample_count, decode_ieee_block, decode_u32_block, ScanData, ScanFormat,
    MAX_SCAN_SAMPLES,
};
pub use command::encode_command;
pub use reader::FrameReader;
pub use response::{decode_frame, normalize_response};

/// Carriage return ending every command and separating echoed text in responses.
pub const TERMINATOR: u8 = b'\r';
