//! Frame struct and incremental frame decoder.
//!
//! Represents a complete protocol frame with its type and payload, and the
//! state machine that cuts frames out of a [`FrameBuffer`]:
//! - `WaitingForHeader`: Need at least 8 bytes
//! - `WaitingForPayload`: Header parsed and cached, need N more payload bytes
//!
//! # Example
//!
//! ```
//! use queuewire_client::protocol::{build_frame, FrameBuffer, FrameDecoder, FrameType};
//!
//! let mut buffer = FrameBuffer::new();
//! let mut decoder = FrameDecoder::new();
//!
//! buffer.push(&build_frame(FrameType::Response, b"OK"));
//! let frame = decoder.decode(&mut buffer).unwrap().unwrap();
//! assert_eq!(frame.frame_type, FrameType::Response);
//! assert_eq!(frame.payload(), b"OK");
//! ```

use bytes::Bytes;

use super::frame_buffer::FrameBuffer;
use super::wire_format::{FrameType, Header, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE, HEARTBEAT};
use crate::error::Result;

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded frame type.
    pub frame_type: FrameType,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from type and payload.
    pub fn new(frame_type: FrameType, payload: Bytes) -> Self {
        Self {
            frame_type,
            payload,
        }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Check if this is a RESPONSE frame carrying the heartbeat marker.
    #[inline]
    pub fn is_heartbeat(&self) -> bool {
        self.frame_type == FrameType::Response && self.payload[..] == *HEARTBEAT
    }

    /// Encode this frame back to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        build_frame(self.frame_type, &self.payload)
    }
}

/// Build a complete frame as a single byte vector.
///
/// # Example
///
/// ```
/// use queuewire_client::protocol::{build_frame, FrameType, HEADER_SIZE};
///
/// let bytes = build_frame(FrameType::Error, b"E_INVALID");
/// assert_eq!(bytes.len(), HEADER_SIZE + 9);
/// ```
pub fn build_frame(frame_type: FrameType, payload: &[u8]) -> Vec<u8> {
    let header = Header::new(frame_type, payload.len() as u32);
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for complete header (need 8 bytes).
    WaitingForHeader,
    /// Header parsed, waiting for payload bytes.
    WaitingForPayload { frame_type: FrameType, length: usize },
}

/// Cuts frames out of a [`FrameBuffer`].
///
/// The parsed header is kept across calls, so a payload that arrives over
/// several reads never causes the header to be parsed (or consumed) twice.
#[derive(Debug)]
pub struct FrameDecoder {
    state: State,
    max_frame_size: u32,
}

impl FrameDecoder {
    /// Create a decoder with the default maximum frame size.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a decoder with a custom maximum frame size.
    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            state: State::WaitingForHeader,
            max_frame_size,
        }
    }

    /// Try to extract a single frame from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` if protocol violation (bad length, unknown type)
    pub fn decode(&mut self, buffer: &mut FrameBuffer) -> Result<Option<Frame>> {
        if let State::WaitingForHeader = self.state {
            // Peek, validate, then consume
            let header = match buffer.peek(HEADER_SIZE).and_then(Header::decode) {
                Some(header) => header,
                None => return Ok(None),
            };
            let frame_type = header.validate(self.max_frame_size)?;
            buffer.read(HEADER_SIZE)?;

            self.state = State::WaitingForPayload {
                frame_type,
                length: header.payload_length() as usize,
            };
        }

        match self.state {
            State::WaitingForPayload { frame_type, length } => {
                if buffer.len() < length {
                    return Ok(None);
                }

                let payload = buffer.read(length)?;
                self.state = State::WaitingForHeader;
                Ok(Some(Frame::new(frame_type, payload)))
            }
            State::WaitingForHeader => Ok(None),
        }
    }

    /// Bytes still missing before the current header or payload is complete.
    ///
    /// Used for exact-length reads, which must never pull bytes belonging to
    /// the next frame off the socket.
    pub fn bytes_needed(&self, buffer: &FrameBuffer) -> usize {
        let target = match self.state {
            State::WaitingForHeader => HEADER_SIZE,
            State::WaitingForPayload { length, .. } => length,
        };
        target.saturating_sub(buffer.len())
    }

    /// Whether a header has been parsed and cached for the current frame.
    pub fn has_pending_header(&self) -> bool {
        matches!(self.state, State::WaitingForPayload { .. })
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
