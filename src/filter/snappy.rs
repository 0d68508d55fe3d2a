//! Framed-snappy filters.
//!
//! Uses the snappy framing format: a stream identifier chunk followed by
//! compressed (`0x00`) or uncompressed (`0x01`) chunks, each with a 4-byte
//! header of `[type][24-bit little-endian length]`. Data chunks carry a
//! masked CRC-32C of their uncompressed bytes, which the decoder verifies.

use std::io::Write;

use bytes::{Buf, Bytes, BytesMut};
use snap::write::FrameEncoder;

use super::Filter;
use crate::error::{QueuewireError, Result};

const CHUNK_COMPRESSED: u8 = 0x00;
const CHUNK_UNCOMPRESSED: u8 = 0x01;
const CHUNK_PADDING: u8 = 0xfe;
const CHUNK_STREAM_ID: u8 = 0xff;

const STREAM_ID_BODY: &[u8] = b"sNaPpY";

/// Masked CRC-32C preceding every data chunk body.
const CHECKSUM_SIZE: usize = 4;

const CHECKSUM_MASK_DELTA: u32 = 0xa282_ead8;

/// CRC-32C of `data`, masked as the framing format requires.
fn masked_crc32c(data: &[u8]) -> u32 {
    let crc = crc32c::crc32c(data);
    crc.rotate_right(15).wrapping_add(CHECKSUM_MASK_DELTA)
}

fn compression_error(e: impl std::fmt::Display) -> QueuewireError {
    QueuewireError::Compression(format!("snappy: {}", e))
}

/// Outbound half: emits complete snappy frames for every chunk.
pub struct SnappyEncoder {
    inner: FrameEncoder<Vec<u8>>,
}

impl SnappyEncoder {
    pub fn new() -> Self {
        Self {
            inner: FrameEncoder::new(Vec::new()),
        }
    }
}

impl Default for SnappyEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for SnappyEncoder {
    fn apply(&mut self, data: Bytes) -> Result<Bytes> {
        self.inner.write_all(&data).map_err(compression_error)?;
        self.inner.flush().map_err(compression_error)?;
        Ok(Bytes::from(std::mem::take(self.inner.get_mut())))
    }

    fn name(&self) -> &'static str {
        "snappy-encode"
    }
}

/// Inbound half: buffers until whole chunks are available.
pub struct SnappyDecoder {
    pending: BytesMut,
    decoder: snap::raw::Decoder,
    seen_stream_id: bool,
}

impl SnappyDecoder {
    pub fn new() -> Self {
        Self {
            pending: BytesMut::new(),
            decoder: snap::raw::Decoder::new(),
            seen_stream_id: false,
        }
    }
}

impl Default for SnappyDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for SnappyDecoder {
    fn apply(&mut self, data: Bytes) -> Result<Bytes> {
        self.pending.extend_from_slice(&data);
        let mut out = Vec::new();

        while self.pending.len() >= 4 {
            let chunk_type = self.pending[0];
            let len = u32::from_le_bytes([self.pending[1], self.pending[2], self.pending[3], 0])
                as usize;
            if self.pending.len() < 4 + len {
                break;
            }

            self.pending.advance(4);
            let body = self.pending.split_to(len).freeze();

            match chunk_type {
                CHUNK_STREAM_ID => {
                    if &body[..] != STREAM_ID_BODY {
                        return Err(compression_error("bad stream identifier"));
                    }
                    self.seen_stream_id = true;
                }
                CHUNK_COMPRESSED | CHUNK_UNCOMPRESSED => {
                    if !self.seen_stream_id {
                        return Err(compression_error("data chunk before stream identifier"));
                    }
                    if body.len() < CHECKSUM_SIZE {
                        return Err(compression_error("chunk shorter than checksum"));
                    }
                    let expected = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
                    let body = &body[CHECKSUM_SIZE..];
                    let start = out.len();
                    if chunk_type == CHUNK_COMPRESSED {
                        let decoded = self.decoder.decompress_vec(body).map_err(compression_error)?;
                        out.extend_from_slice(&decoded);
                    } else {
                        out.extend_from_slice(body);
                    }

                    let actual = masked_crc32c(&out[start..]);
                    if actual != expected {
                        return Err(compression_error(format!(
                            "checksum mismatch: expected {:#010x}, got {:#010x}",
                            expected, actual
                        )));
                    }
                }
                CHUNK_PADDING | 0x80..=0xfd => {}
                0x02..=0x7f => {
                    return Err(compression_error(format!(
                        "unskippable chunk type {:#04x}",
                        chunk_type
                    )));
                }
            }
        }

        Ok(Bytes::from(out))
    }

    fn name(&self) -> &'static str {
        "snappy-decode"
    }
}

/// Boxed encoder/decoder pair for one connection.
pub fn snappy_pair() -> (Box<dyn Filter>, Box<dyn Filter>) {
    (Box::new(SnappyEncoder::new()), Box::new(SnappyDecoder::new()))
}
