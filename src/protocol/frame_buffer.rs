//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management. The buffer only
//! stores bytes; splitting them into frames is the job of
//! [`FrameDecoder`](super::FrameDecoder).
//!
//! # Example
//!
//! ```
//! use queuewire_client::protocol::FrameBuffer;
//!
//! let mut buffer = FrameBuffer::new();
//! buffer.push(b"hello ");
//! buffer.push(b"world");
//!
//! assert_eq!(&buffer.read(5).unwrap()[..], b"hello");
//! assert_eq!(&buffer.flush()[..], b" world");
//! assert!(buffer.is_empty());
//! ```

use bytes::{Bytes, BytesMut};

use crate::error::{QueuewireError, Result};

/// Default initial capacity (64KB).
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// Ordered byte store fed by socket reads and drained in caller-sized pieces.
///
/// Owned by exactly one reader; there is no internal synchronization.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
}

impl FrameBuffer {
    /// Create a new frame buffer with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    /// Create a new frame buffer with custom initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Append bytes to the end of the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Remove and return exactly `n` bytes from the front.
    ///
    /// # Errors
    ///
    /// Returns [`QueuewireError::Underflow`] if fewer than `n` bytes are
    /// buffered. Nothing is consumed in that case.
    pub fn read(&mut self, n: usize) -> Result<Bytes> {
        if self.buffer.len() < n {
            return Err(QueuewireError::Underflow {
                requested: n,
                available: self.buffer.len(),
            });
        }
        Ok(self.buffer.split_to(n).freeze())
    }

    /// Look at the first `n` bytes without consuming them.
    pub fn peek(&self, n: usize) -> Option<&[u8]> {
        self.buffer.get(..n)
    }

    /// Remove and return everything buffered.
    pub fn flush(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    /// Get the number of buffered bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
