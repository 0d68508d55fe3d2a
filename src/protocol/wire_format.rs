//! Wire format encoding and decoding.
//!
//! Every frame sent by the broker starts with an 8-byte header:
//! ```text
//! ┌──────────┬────────────┬─────────────────────┐
//! │ Length   │ Frame type │ Payload             │
//! │ 4 bytes  │ 4 bytes    │ (Length - 4) bytes  │
//! │ uint32 BE│ uint32 BE  │                     │
//! └──────────┴────────────┴─────────────────────┘
//! ```
//!
//! `Length` counts the frame type field plus the payload. All multi-byte
//! integers are Big Endian.

use crate::error::{QueuewireError, Result};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Size of the frame type field, included in the length prefix.
pub const FRAME_TYPE_SIZE: u32 = 4;

/// Protocol magic, sent once right after the socket opens.
pub const MAGIC_V2: &[u8; 4] = b"  V2";

/// Payload of a heartbeat RESPONSE frame.
pub const HEARTBEAT: &[u8] = b"_heartbeat_";

/// Generic success payload.
pub const OK: &[u8] = b"OK";

/// Response to `CLS` once the broker has stopped sending messages.
pub const CLOSE_WAIT: &[u8] = b"CLOSE_WAIT";

/// Default maximum frame size (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Error codes the broker reports without the connection becoming unusable.
pub const DEFAULT_PASSIVE_ERRORS: &[&str] = &["E_FIN_FAILED", "E_REQ_FAILED", "E_TOUCH_FAILED"];

/// Frame type carried in the second header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FrameType {
    /// Answer to a command (or a heartbeat).
    Response = 0,
    /// Error reported by the broker.
    Error = 1,
    /// Message delivered to a subscribed connection.
    Message = 2,
}

impl FrameType {
    /// Raw wire value.
    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Resolve a raw wire value.
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(FrameType::Response),
            1 => Ok(FrameType::Error),
            2 => Ok(FrameType::Message),
            other => Err(QueuewireError::Protocol(format!(
                "Unknown frame type {}",
                other
            ))),
        }
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Byte count of the frame type field plus payload.
    pub length: u32,
    /// Raw frame type.
    pub frame_type: u32,
}

impl Header {
    /// Create a header for a payload of the given size.
    pub fn new(frame_type: FrameType, payload_length: u32) -> Self {
        Self {
            length: payload_length + FRAME_TYPE_SIZE,
            frame_type: frame_type.as_u32(),
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use queuewire_client::protocol::{FrameType, Header};
    ///
    /// let header = Header::new(FrameType::Response, 2);
    /// assert_eq!(header.encode(), [0, 0, 0, 6, 0, 0, 0, 0]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.length.to_be_bytes());
        buf[4..8].copy_from_slice(&self.frame_type.to_be_bytes());
        buf
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            length: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            frame_type: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    /// Validate the header and resolve its frame type.
    ///
    /// Checks:
    /// - Length covers at least the frame type field
    /// - Payload doesn't exceed max
    /// - Frame type is known
    pub fn validate(&self, max_frame_size: u32) -> Result<FrameType> {
        if self.length < FRAME_TYPE_SIZE {
            return Err(QueuewireError::Protocol(format!(
                "Frame length {} shorter than frame type field",
                self.length
            )));
        }

        if self.length > max_frame_size {
            return Err(QueuewireError::Protocol(format!(
                "Frame size {} exceeds maximum {}",
                self.length, max_frame_size
            )));
        }

        FrameType::from_u32(self.frame_type)
    }

    /// Payload length implied by the length prefix.
    #[inline]
    pub fn payload_length(&self) -> u32 {
        self.length.saturating_sub(FRAME_TYPE_SIZE)
    }
}

/// Whether an ERROR payload starts with one of the given error codes.
pub fn is_passive_error<S: AsRef<str>>(payload: &[u8], passive: &[S]) -> bool {
    let code = payload
        .split(|b| *b == b' ')
        .next()
        .unwrap_or_default();
    passive.iter().any(|p| p.as_ref().as_bytes() == code)
}
