//! Streaming raw-deflate filters.
//!
//! Both directions keep one deflate stream open for the life of the
//! connection. Every outbound chunk ends with a sync flush so the peer can
//! decode it without waiting for more data.

use bytes::Bytes;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use super::Filter;
use crate::error::{QueuewireError, Result};

/// Highest deflate level the broker accepts.
pub const MAX_DEFLATE_LEVEL: u32 = 9;

/// Minimum spare room kept in the output buffer between calls.
const MIN_SPARE: usize = 64;

fn ensure_spare(out: &mut Vec<u8>, hint: usize) {
    if out.capacity() - out.len() < MIN_SPARE {
        out.reserve(hint.max(MIN_SPARE));
    }
}

/// Outbound half: compresses and sync-flushes each chunk.
pub struct DeflateEncoder {
    inner: Compress,
}

impl DeflateEncoder {
    /// Create an encoder; `level` is clamped to 1..=9.
    pub fn new(level: u32) -> Self {
        let level = level.clamp(1, MAX_DEFLATE_LEVEL);
        Self {
            inner: Compress::new(Compression::new(level), false),
        }
    }
}

impl Filter for DeflateEncoder {
    fn apply(&mut self, data: Bytes) -> Result<Bytes> {
        let mut out = Vec::with_capacity(data.len() / 2 + MIN_SPARE);
        let mut input = &data[..];

        loop {
            let hint = out.capacity();
            ensure_spare(&mut out, hint);
            let before = self.inner.total_in();
            self.inner
                .compress_vec(input, &mut out, FlushCompress::Sync)
                .map_err(|e| QueuewireError::Compression(format!("deflate: {}", e)))?;
            let consumed = (self.inner.total_in() - before) as usize;
            input = &input[consumed..];

            // Flush is complete once input is drained and output wasn't filled
            if input.is_empty() && out.len() < out.capacity() {
                break;
            }
        }

        Ok(Bytes::from(out))
    }

    fn name(&self) -> &'static str {
        "deflate-encode"
    }
}

/// Inbound half: inflates whatever complete blocks have arrived.
pub struct DeflateDecoder {
    inner: Decompress,
}

impl DeflateDecoder {
    pub fn new() -> Self {
        Self {
            inner: Decompress::new(false),
        }
    }
}

impl Default for DeflateDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for DeflateDecoder {
    fn apply(&mut self, data: Bytes) -> Result<Bytes> {
        let mut out = Vec::with_capacity(data.len() * 2 + MIN_SPARE);
        let mut input = &data[..];

        loop {
            let hint = out.capacity();
            ensure_spare(&mut out, hint);
            let before_in = self.inner.total_in();
            let before_out = out.len();
            let status = self
                .inner
                .decompress_vec(input, &mut out, FlushDecompress::Sync)
                .map_err(|e| QueuewireError::Compression(format!("inflate: {}", e)))?;
            let consumed = (self.inner.total_in() - before_in) as usize;
            input = &input[consumed..];

            if status == Status::StreamEnd {
                break;
            }
            if input.is_empty() && out.len() < out.capacity() {
                break;
            }
            if consumed == 0 && out.len() == before_out && out.len() < out.capacity() {
                // Partial block; the rest is buffered inside the stream
                break;
            }
        }

        Ok(Bytes::from(out))
    }

    fn name(&self) -> &'static str {
        "deflate-decode"
    }
}

/// Boxed encoder/decoder pair for one connection.
pub fn deflate_pair(level: u32) -> (Box<dyn Filter>, Box<dyn Filter>) {
    (
        Box::new(DeflateEncoder::new(level)),
        Box::new(DeflateDecoder::new()),
    )
}
