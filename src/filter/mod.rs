//! Filter chain - byte transforms applied around the socket.
//!
//! Outbound bytes pass through the write filters in the order they were
//! appended; inbound bytes pass through the read filters in reverse order,
//! so the filter installed last (the outermost encoding) is undone first.
//!
//! A filter that returns an empty buffer has consumed the input into its
//! own state and has nothing to emit yet. The rest of the chain is skipped
//! for that call.
//!
//! # Example
//!
//! ```
//! use queuewire_client::filter::{deflate_pair, FilterChain};
//! use bytes::Bytes;
//!
//! let mut outbound = FilterChain::new();
//! let mut inbound = FilterChain::new();
//! let (enc, dec) = deflate_pair(6);
//! outbound.append_write_filter(enc);
//! inbound.append_read_filter(dec);
//!
//! let wire = outbound.apply_write(Bytes::from_static(b"hello")).unwrap();
//! let back = inbound.apply_read(wire).unwrap();
//! assert_eq!(&back[..], b"hello");
//! ```

mod deflate;
mod snappy;

use bytes::Bytes;

use crate::error::Result;

pub use deflate::{deflate_pair, DeflateDecoder, DeflateEncoder, MAX_DEFLATE_LEVEL};
pub use snappy::{snappy_pair, SnappyDecoder, SnappyEncoder};

/// A stateful byte transform.
pub trait Filter: Send {
    /// Transform one chunk of bytes.
    fn apply(&mut self, data: Bytes) -> Result<Bytes>;

    /// Short name for logging.
    fn name(&self) -> &'static str;
}

/// Run `data` through `filters`, stopping at the first empty output.
fn run<'a, I>(filters: I, mut data: Bytes) -> Result<Bytes>
where
    I: Iterator<Item = &'a mut Box<dyn Filter>>,
{
    for filter in filters {
        data = filter.apply(data)?;
        if data.is_empty() {
            break;
        }
    }
    Ok(data)
}

/// Filters for the outbound direction.
#[derive(Default)]
pub struct WriteFilters {
    filters: Vec<Box<dyn Filter>>,
}

impl WriteFilters {
    /// Apply in append order.
    pub fn apply(&mut self, data: Bytes) -> Result<Bytes> {
        run(self.filters.iter_mut(), data)
    }

    /// True when outbound bytes pass through untouched.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Number of installed filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }
}

/// Filters for the inbound direction.
#[derive(Default)]
pub struct ReadFilters {
    filters: Vec<Box<dyn Filter>>,
}

impl ReadFilters {
    /// Apply in reverse append order.
    pub fn apply(&mut self, data: Bytes) -> Result<Bytes> {
        run(self.filters.iter_mut().rev(), data)
    }

    /// True when inbound bytes pass through untouched.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Number of installed filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }
}

/// Outbound and inbound filter lists of one connection.
#[derive(Default)]
pub struct FilterChain {
    write: WriteFilters,
    read: ReadFilters,
}

impl FilterChain {
    /// Create an empty chain (bytes pass through untouched).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transform to the end of the outbound list.
    pub fn append_write_filter(&mut self, filter: Box<dyn Filter>) {
        tracing::debug!("Appending write filter {}", filter.name());
        self.write.filters.push(filter);
    }

    /// Add a transform to the end of the inbound list.
    pub fn append_read_filter(&mut self, filter: Box<dyn Filter>) {
        tracing::debug!("Appending read filter {}", filter.name());
        self.read.filters.push(filter);
    }

    /// Run outbound bytes through the write filters.
    pub fn apply_write(&mut self, data: Bytes) -> Result<Bytes> {
        self.write.apply(data)
    }

    /// Run inbound bytes through the read filters.
    pub fn apply_read(&mut self, data: Bytes) -> Result<Bytes> {
        self.read.apply(data)
    }

    /// Outbound filters, for writes during the handshake.
    pub fn write_filters(&mut self) -> &mut WriteFilters {
        &mut self.write
    }

    /// Inbound filters, for reads during the handshake.
    pub fn read_filters(&mut self) -> &mut ReadFilters {
        &mut self.read
    }

    /// Hand each direction to the loop that owns it.
    pub fn split(self) -> (WriteFilters, ReadFilters) {
        (self.write, self.read)
    }
}
