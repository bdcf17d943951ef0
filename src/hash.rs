//! Streaming SHA-256 — the header's `data_sha256` is computed over the
//! concatenation of every *decoded* data-block payload, in file order.
//!
//! Implemented as an incremental `Write` adapter so the writer and
//! validator can feed it payload bytes as they stream past, rather than
//! buffering the whole file to hash it in one shot.

use sha2::{Digest, Sha256};
use std::io::{self, Write};

/// Incrementally hashes every byte written to it with SHA-256, without
/// otherwise forwarding the bytes anywhere (used purely as an accumulator
/// during the writer's append loop and the validator's re-scan).
pub struct Sha256Writer {
    hasher: Sha256,
}

impl Sha256Writer {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    pub fn finalize(self) -> [u8; 32] {
        self.hasher.finalize().into()
    }
}

impl Default for Sha256Writer {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for Sha256Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// One-shot SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_matches_one_shot() {
        let mut w = Sha256Writer::new();
        w.write_all(b"hello, ").unwrap();
        w.write_all(b"world").unwrap();
        assert_eq!(w.finalize(), sha256(b"hello, world"));
    }
}
