//! Connection configuration.
//!
//! All knobs of a managed connection live in [`ConnectionConfig`], built
//! with `Default` plus chained setters:
//!
//! ```
//! use std::time::Duration;
//! use queuewire_client::config::ConnectionConfig;
//! use queuewire_client::transport::TlsSettings;
//!
//! let config = ConnectionConfig::default()
//!     .idle_interval(Duration::from_millis(5))
//!     .tls(TlsSettings::with_trust_bundle("/etc/ssl/broker-ca.pem"));
//! assert!(config.tls.is_configured());
//! ```

use std::time::Duration;

use crate::protocol::{DEFAULT_BUFFER_CAPACITY, DEFAULT_MAX_FRAME_SIZE, DEFAULT_PASSIVE_ERRORS};
use crate::transport::TlsSettings;

/// Default pause when a loop has nothing to do.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(10);

/// Default outgoing command queue capacity.
pub const DEFAULT_COMMAND_CAPACITY: usize = 1024;

/// Default bytes requested per socket read in buffered mode.
pub const DEFAULT_READ_CHUNK_SIZE: usize = DEFAULT_BUFFER_CAPACITY;

/// Settings for one managed connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Sleep between polls of an empty command queue, and the bound on a
    /// single socket read before the quit flags are rechecked.
    pub idle_interval: Duration,
    /// Bytes requested per read once buffered-read mode is on.
    pub read_chunk_size: usize,
    /// Largest frame accepted from the broker.
    pub max_frame_size: u32,
    /// Capacity of the outgoing command queue.
    pub command_capacity: usize,
    /// ERROR codes that are logged and ignored instead of closing.
    pub passive_errors: Vec<String>,
    /// Keep running after a cooperative quit; only forced quits end it.
    pub ignore_quit: bool,
    /// TLS material for `activate_tls`.
    pub tls: TlsSettings,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            idle_interval: DEFAULT_IDLE_INTERVAL,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            passive_errors: DEFAULT_PASSIVE_ERRORS.iter().map(|s| s.to_string()).collect(),
            ignore_quit: false,
            tls: TlsSettings::default(),
        }
    }
}

impl ConnectionConfig {
    /// Set the idle interval.
    pub fn idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    /// Set the buffered read size.
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    /// Set the maximum accepted frame size.
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the command queue capacity.
    pub fn command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity.max(1);
        self
    }

    /// Add an ERROR code to the passive allow-list.
    pub fn passive_error(mut self, code: impl Into<String>) -> Self {
        self.passive_errors.push(code.into());
        self
    }

    /// Ignore cooperative quit requests.
    pub fn ignore_quit(mut self, ignore: bool) -> Self {
        self.ignore_quit = ignore;
        self
    }

    /// Set the TLS material.
    pub fn tls(mut self, tls: TlsSettings) -> Self {
        self.tls = tls;
        self
    }
}
