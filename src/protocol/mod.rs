//! Protocol module - wire format, framing, messages and commands.
//!
//! This module implements the binary protocol spoken to the broker:
//! - 8-byte frame header encoding/decoding
//! - Frame buffer and incremental decoder for partial reads
//! - MESSAGE payload decoding
//! - Command line rendering

mod command;
mod frame;
mod frame_buffer;
mod message;
mod wire_format;

pub use command::{names, Command};
pub use frame::{build_frame, Frame, FrameDecoder};
pub use frame_buffer::{FrameBuffer, DEFAULT_BUFFER_CAPACITY};
pub use message::{IncomingMessage, MessageId, MESSAGE_HEADER_SIZE, MESSAGE_ID_SIZE};
pub use wire_format::{
    is_passive_error, FrameType, Header, CLOSE_WAIT, DEFAULT_MAX_FRAME_SIZE,
    DEFAULT_PASSIVE_ERRORS, FRAME_TYPE_SIZE, HEADER_SIZE, HEARTBEAT, MAGIC_V2, OK,
};
