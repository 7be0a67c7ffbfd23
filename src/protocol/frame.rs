//! Length-prefixed frame codec.
//!
//! ```text
//! Frame: <HEADER_LENGTH ASCII digits, left-padded with spaces><body>
//!
//! Example:
//! "  11login\nalice"
//! ```

use bytes::{Bytes, BytesMut};

/// Width of the decimal length header.
pub const HEADER_LENGTH: usize = 4;

/// Largest body a `HEADER_LENGTH`-digit header can describe.
pub const MAX_BODY_LENGTH: usize = 9999;

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame header {0:?}")]
    InvalidHeader(String),
    #[error("body of {0} bytes exceeds maximum of {max}", max = MAX_BODY_LENGTH)]
    BodyTooLong(usize),
    #[error("character {0:?} has no single-byte encoding")]
    Unencodable(char),
}

/// Parse result.
#[derive(Debug)]
pub enum ParseResult {
    /// A whole frame, and the bytes it occupied.
    Complete(Frame, usize),
    /// Header or body not fully buffered yet.
    Incomplete,
    /// Header is not a decimal length.
    Invalid(FrameError),
}

/// A raw frame: header and body bytes exactly as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    raw: Bytes,
}

impl Frame {
    /// Serialize a message text (fields already joined) into a frame.
    pub fn encode(text: &str) -> Result<Self, FrameError> {
        let body = encode_text(text)?;
        if body.len() > MAX_BODY_LENGTH {
            return Err(FrameError::BodyTooLong(body.len()));
        }

        let mut raw = BytesMut::with_capacity(HEADER_LENGTH + body.len());
        raw.extend_from_slice(format!("{:>width$}", body.len(), width = HEADER_LENGTH).as_bytes());
        raw.extend_from_slice(&body);
        Ok(Self { raw: raw.freeze() })
    }

    /// Header plus body.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn body(&self) -> &[u8] {
        &self.raw[HEADER_LENGTH..]
    }

    /// Body decoded to text.
    pub fn text(&self) -> String {
        decode_text(self.body())
    }

    /// Cheap clone of the wire bytes for fan-out.
    pub fn to_bytes(&self) -> Bytes {
        self.raw.clone()
    }
}

/// Parse one frame from the front of the input buffer.
pub fn parse(input: &[u8]) -> ParseResult {
    if input.len() < HEADER_LENGTH {
        return ParseResult::Incomplete;
    }

    let body_len = match parse_header(&input[..HEADER_LENGTH]) {
        Ok(len) => len,
        Err(e) => return ParseResult::Invalid(e),
    };

    let total = HEADER_LENGTH + body_len;
    if input.len() < total {
        return ParseResult::Incomplete;
    }

    let frame = Frame {
        raw: Bytes::copy_from_slice(&input[..total]),
    };
    ParseResult::Complete(frame, total)
}

/// Decode a length header. Surrounding ASCII whitespace is ignored.
pub fn parse_header(header: &[u8]) -> Result<usize, FrameError> {
    let invalid = || FrameError::InvalidHeader(decode_text(header));

    let digits = header.trim_ascii();
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }

    // At most HEADER_LENGTH digits, so this can't overflow
    let len = digits
        .iter()
        .fold(0usize, |acc, d| acc * 10 + usize::from(d - b'0'));
    if len > MAX_BODY_LENGTH {
        return Err(FrameError::BodyTooLong(len));
    }
    Ok(len)
}

/// Encode text in the fixed 8-bit code page (ISO-8859-1).
pub fn encode_text(text: &str) -> Result<Vec<u8>, FrameError> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).map_err(|_| FrameError::Unencodable(c)))
        .collect()
}

/// Decode ISO-8859-1 bytes. Every byte maps to exactly one character.
pub fn decode_text(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}
