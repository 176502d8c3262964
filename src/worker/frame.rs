//! Length-prefixed framing for master-to-worker requests.
//!
//! A frame is an 8-byte header holding the payload length as ASCII decimal,
//! right-padded with spaces, followed by exactly that many payload bytes.
//! There is no delimiter and nothing after the payload.
//!
//! ```text
//! "13      {\"id\":\"A\"...}"
//!  ^^^^^^^^ header
//! ```
//!
//! The codec keeps no state. Readers that receive a frame in pieces own the
//! accumulation buffer.

use crate::error::{PoolError, Result};

/// Size of the length header in bytes.
pub const HEADER_LEN: usize = 8;

/// Largest payload the 8-digit header can describe.
pub const MAX_PAYLOAD_LEN: usize = 99_999_999;

/// Encode `payload` into a complete frame.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(PoolError::FrameTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(format!("{:<width$}", payload.len(), width = HEADER_LEN).as_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Parse a frame header into the payload length.
///
/// Trailing whitespace is trimmed before parsing. Returns `None` when the
/// header is not a non-negative decimal number; callers treat that the same
/// as "no message yet".
pub fn decode_header(header: &[u8; HEADER_LEN]) -> Option<usize> {
    let text = std::str::from_utf8(header).ok()?;
    text.trim_end().parse::<usize>().ok()
}

/// Split a buffer holding one complete frame into its payload.
///
/// Returns `None` if the buffer is shorter than the header plus the length
/// it announces, or if the header does not parse.
pub fn decode(frame: &[u8]) -> Option<&[u8]> {
    let header: &[u8; HEADER_LEN] = frame.get(..HEADER_LEN)?.try_into().ok()?;
    let len = decode_header(header)?;
    frame.get(HEADER_LEN..HEADER_LEN + len)
}
