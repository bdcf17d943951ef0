//! # zs — a read-only, sorted, integrity-checked record container
//!
//! ZS packs an ordered multiset of opaque byte records into a single file
//! shaped like a compressed B+-tree: data blocks at level 0 hold the
//! records, index blocks at levels 1..63 route a search down to the right
//! leaf. Every block carries its own CRC-64/XZ; the whole file's data is
//! additionally covered by a SHA-256 in the header. The format is designed
//! to be served efficiently over a byte-range transport such as HTTP — a
//! point lookup costs `O(log n)` small fetches, never a full scan.
//!
//! Format guarantees:
//! - All multi-byte integers are little-endian; variable-length integers
//!   are canonical uleb128 — readers reject non-canonical encodings.
//! - Every block is self-describing: a uleb128 length, a one-byte level
//!   tag, the compressed payload, and a trailing CRC-64/XZ.
//! - The file is written once, top-to-bottom, under a provisional "bad"
//!   magic; the magic is flipped to "good" only after the header is fully
//!   finalized, so a reader can always tell a complete file from a
//!   partially-written one.
//! - The root index block's own offset/length live in the header, so
//!   opening a file costs exactly one read of the header plus one read of
//!   the root.

pub mod block;
pub mod codec;
pub mod config;
pub mod crc64;
pub mod error;
pub mod hash;
pub mod header;
pub mod payload;
pub mod pool;
pub mod reader;
pub mod transport;
pub mod validator;
pub mod varint;
pub mod writer;

pub use codec::{Codec, CodecError, CodecId};
pub use config::{ReaderOptions, WriterOptions};
pub use error::{Error, Result};
pub use header::{Header, MAGIC_BAD, MAGIC_GOOD};
pub use reader::{Query, Reader, RecordIter};
pub use transport::{FileTransport, Transport};
pub use validator::{validate, ValidationReport};
pub use writer::Writer;

#[cfg(feature = "http")]
pub use transport::HttpTransport;
