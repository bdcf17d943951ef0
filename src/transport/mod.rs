//! Random-access byte transports: a local file via positional reads, and
//! (behind the `http` feature) a remote file via `Range:` GET.
//!
//! A `Send + Sync` read-only contract safe for concurrent positional
//! reads from multiple worker threads at once, since the reader's
//! parallel decompression pool fetches blocks from several threads
//! simultaneously against the one open file or connection.

use crate::error::{Error, Result};

/// A random-access byte source. Implementations MUST be safe to call
/// `read_at` from multiple threads concurrently without external locking.
pub trait Transport: Send + Sync {
    /// Total length of the underlying resource, in bytes.
    fn len(&self) -> Result<u64>;

    /// Read exactly `len` bytes starting at `offset`. Short reads (the
    /// resource is smaller than `offset + len`) are a `Corrupt` error,
    /// not a partial result.
    fn read_at(&self, offset: u64, len: u64) -> Result<Vec<u8>>;
}

mod file;
pub use file::FileTransport;

#[cfg(feature = "http")]
mod http;
#[cfg(feature = "http")]
pub use http::HttpTransport;
