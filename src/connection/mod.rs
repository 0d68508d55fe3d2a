//! Connection module - one managed broker connection.
//!
//! Provides:
//! - [`ManagedConnection`] - runs the handshake and the two loops
//! - [`ConnectionHandle`] - sends commands and requests shutdown
//! - [`Handshake`] - socket access for negotiators (TLS and compression upgrades)
//! - [`ConnectionState`] and [`QuitSignal`] - lifecycle and shutdown flags

pub(crate) mod correlator;
mod handle;
mod handshake;
mod managed;
mod state;

pub use handle::ConnectionHandle;
pub(crate) use handle::Shared;
pub use handshake::{Compression, Handshake};
pub use managed::ManagedConnection;
pub use state::{ConnectionState, QuitSignal};
