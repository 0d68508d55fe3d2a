//! Outgoing commands.
//!
//! A command is rendered as its name and space-separated arguments
//! terminated by `\n`, followed by zero or more binary parts, each
//! prefixed with its length as a 4-byte Big Endian integer:
//!
//! ```text
//! IDENTIFY\n[ 4-byte size ][ N-byte JSON body ]
//! FIN <message_id>\n
//! ```
//!
//! Arguments are raw bytes, so message IDs go out exactly as the broker
//! sent them.

use bytes::{BufMut, Bytes, BytesMut};

use super::message::MessageId;

/// Command names the engine issues itself.
pub mod names {
    pub const NOP: &str = "NOP";
    pub const IDENTIFY: &str = "IDENTIFY";
    pub const AUTH: &str = "AUTH";
    pub const CLS: &str = "CLS";
    pub const RDY: &str = "RDY";
    pub const FIN: &str = "FIN";
    pub const REQ: &str = "REQ";
    pub const TOUCH: &str = "TOUCH";
}

/// A command queued for the sender loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command name, e.g. `IDENTIFY`.
    pub name: String,
    /// Space-separated parameters on the command line.
    pub args: Vec<Bytes>,
    /// Length-prefixed binary parts following the command line.
    pub parts: Vec<Bytes>,
}

impl Command {
    /// Create a command with no arguments or parts.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            parts: Vec::new(),
        }
    }

    /// Append a command-line argument.
    pub fn arg(mut self, arg: impl Into<Bytes>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a binary part.
    pub fn part(mut self, part: impl Into<Bytes>) -> Self {
        self.parts.push(part.into());
        self
    }

    /// Number of bytes [`encode`](Self::encode) will produce.
    pub fn encoded_len(&self) -> usize {
        let line = self.name.len() + self.args.iter().map(|a| a.len() + 1).sum::<usize>() + 1;
        let parts: usize = self.parts.iter().map(|p| 4 + p.len()).sum();
        line + parts
    }

    /// Render to wire bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use queuewire_client::protocol::Command;
    ///
    /// let cmd = Command::new("RDY").arg("10");
    /// assert_eq!(&cmd.encode()[..], b"RDY 10\n");
    /// ```
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(self.name.as_bytes());
        for arg in &self.args {
            buf.put_u8(b' ');
            buf.put_slice(arg);
        }
        buf.put_u8(b'\n');
        for part in &self.parts {
            buf.put_u32(part.len() as u32);
            buf.put_slice(part);
        }
        buf.freeze()
    }

    /// No-op, used to answer heartbeats.
    pub fn nop() -> Self {
        Self::new(names::NOP)
    }

    /// Capability handshake with a JSON body.
    pub fn identify(body: impl Into<Bytes>) -> Self {
        Self::new(names::IDENTIFY).part(body)
    }

    /// Authenticate with a shared secret.
    pub fn auth(secret: impl Into<Bytes>) -> Self {
        Self::new(names::AUTH).part(secret)
    }

    /// Ask the broker to stop delivering; answered with `CLOSE_WAIT`.
    pub fn cls() -> Self {
        Self::new(names::CLS)
    }

    /// Update the number of in-flight messages the broker may send.
    pub fn rdy(count: u32) -> Self {
        Self::new(names::RDY).arg(count.to_string())
    }

    /// Mark a message as processed.
    pub fn fin(id: &MessageId) -> Self {
        Self::new(names::FIN).arg(id_arg(id))
    }

    /// Requeue a message after `delay_ms` milliseconds.
    pub fn req(id: &MessageId, delay_ms: u64) -> Self {
        Self::new(names::REQ).arg(id_arg(id)).arg(delay_ms.to_string())
    }

    /// Reset the in-flight timeout of a message.
    pub fn touch(id: &MessageId) -> Self {
        Self::new(names::TOUCH).arg(id_arg(id))
    }
}

fn id_arg(id: &MessageId) -> Bytes {
    Bytes::copy_from_slice(id.as_bytes())
}
