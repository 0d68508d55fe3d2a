//! Transport module - socket handling and TLS upgrade.
//!
//! Provides abstraction over:
//! - Any async byte stream (TCP in production, in-memory duplex in tests)
//! - The plain/TLS transport a connection currently runs over

mod stream;
mod tls;

pub use stream::{BoxedSocket, Socket, Transport};
pub use tls::{ClientAuth, TlsSettings};
