//! Socket abstraction the connection engine reads and writes.
//!
//! - [`Socket`]: anything async-readable and -writable (TCP stream, an
//!   in-memory duplex in tests, ...)
//! - [`Transport`]: the socket in its current mode, plain or wrapped in TLS
//!
//! Upgrading swaps the variant in place; bytes already pulled off the
//! socket live in the connection's frame buffer and are not affected.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::client::TlsStream;

/// Byte stream a connection can run over.
pub trait Socket: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Socket for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased socket handed out by a node.
pub type BoxedSocket = Box<dyn Socket>;

/// Socket in its current mode.
pub enum Transport {
    /// Cleartext.
    Plain(BoxedSocket),
    /// TLS client session over the original socket.
    Tls(Box<TlsStream<BoxedSocket>>),
}

impl Transport {
    /// Wrap a freshly connected socket.
    pub fn plain(socket: BoxedSocket) -> Self {
        Transport::Plain(socket)
    }

    /// Check if the TLS layer is active.
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_flush(cx),
            Transport::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_plain_transport_passes_bytes() {
        let (client, mut server) = duplex(64);
        let mut transport = Transport::plain(Box::new(client));
        assert!(!transport.is_tls());

        transport.write_all(b"  V2").await.unwrap();
        transport.flush().await.unwrap();

        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"  V2");

        server.write_all(b"back").await.unwrap();
        transport.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"back");
    }
}
