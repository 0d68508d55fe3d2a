//! MESSAGE frame payloads.
//!
//! ```text
//! ┌────────────┬──────────┬──────────────┬──────────┐
//! │ Timestamp  │ Attempts │ Message ID   │ Body     │
//! │ 8 bytes    │ 2 bytes  │ 16 bytes     │ rest     │
//! │ int64 BE ns│ uint16 BE│ opaque       │          │
//! └────────────┴──────────┴──────────────┴──────────┘
//! ```

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};

use crate::error::{QueuewireError, Result};

/// Size of the message ID field.
pub const MESSAGE_ID_SIZE: usize = 16;

/// Timestamp + attempts + message ID.
pub const MESSAGE_HEADER_SIZE: usize = 8 + 2 + MESSAGE_ID_SIZE;

/// Opaque 16-byte message identifier.
///
/// Commands carry the raw bytes. `Display` renders them as text for
/// logging, replacing anything that is not UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageId(pub [u8; MESSAGE_ID_SIZE]);

impl MessageId {
    /// Raw identifier bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; MESSAGE_ID_SIZE] {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// A message delivered by the broker. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    timestamp_ns: i64,
    attempts: u16,
    id: MessageId,
    body: Bytes,
}

impl IncomingMessage {
    /// Build a message from its parts.
    pub fn new(timestamp_ns: i64, attempts: u16, id: MessageId, body: Bytes) -> Self {
        Self {
            timestamp_ns,
            attempts,
            id,
            body,
        }
    }

    /// Decode a MESSAGE frame payload.
    ///
    /// The body shares the payload allocation.
    pub fn decode(payload: &Bytes) -> Result<Self> {
        if payload.len() < MESSAGE_HEADER_SIZE {
            return Err(QueuewireError::Protocol(format!(
                "Message payload of {} bytes shorter than {}-byte header",
                payload.len(),
                MESSAGE_HEADER_SIZE
            )));
        }

        let mut ts = [0u8; 8];
        ts.copy_from_slice(&payload[0..8]);
        let mut id = [0u8; MESSAGE_ID_SIZE];
        id.copy_from_slice(&payload[10..MESSAGE_HEADER_SIZE]);

        Ok(Self {
            timestamp_ns: i64::from_be_bytes(ts),
            attempts: u16::from_be_bytes([payload[8], payload[9]]),
            id: MessageId(id),
            body: payload.slice(MESSAGE_HEADER_SIZE..),
        })
    }

    /// Encode back to the MESSAGE payload layout.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_SIZE + self.body.len());
        buf.put_i64(self.timestamp_ns);
        buf.put_u16(self.attempts);
        buf.put_slice(&self.id.0);
        buf.put_slice(&self.body);
        buf.freeze()
    }

    /// Broker timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.timestamp_ns)
    }

    /// Broker timestamp as nanoseconds since the epoch.
    #[inline]
    pub fn timestamp_ns(&self) -> i64 {
        self.timestamp_ns
    }

    /// Delivery attempts so far, including this one.
    #[inline]
    pub fn attempts(&self) -> u16 {
        self.attempts
    }

    /// Identifier to pass back in FIN, REQ and TOUCH.
    #[inline]
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Message body, sharing the frame allocation.
    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }
}
