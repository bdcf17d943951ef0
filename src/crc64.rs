//! CRC-64/XZ: the checksum guarding every block and the file header.
//!
//! Polynomial `0x42f0e1eba9ea3693`, reflected in/out, init and xor-out
//! `0xffff_ffff_ffff_ffff` — the same parameters `.xz` uses. Table-driven via
//! the `crc` crate for an incrementally-updatable, precomputed checksum.

use crc::{Crc, Digest, CRC_64_XZ};
use std::io::{self, Write};

static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// One-shot CRC-64/XZ of `data`.
pub fn checksum(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}

/// A `Write` adapter that feeds every byte written through CRC-64/XZ,
/// passing them through to `inner` unchanged. Used so the writer can hash
/// block bytes as it streams them out rather than buffering twice.
pub struct Crc64Writer<'d, W> {
    inner: W,
    digest: Digest<'d, u64>,
}

impl<'d, W: Write> Crc64Writer<'d, W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            digest: CRC64.digest(),
        }
    }

    pub fn finalize(self) -> u64 {
        self.digest.finalize()
    }
}

impl<'d, W: Write> Write for Crc64Writer<'d, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.digest.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc64_xz_check_value() {
        // The canonical "123456789" check value for CRC-64/XZ.
        assert_eq!(checksum(b"123456789"), 0x995d_c9bb_df19_39fa);
    }

    #[test]
    fn crc64_writer_matches_one_shot() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let mut out = Vec::new();
        let crc = {
            let mut w = Crc64Writer::new(&mut out);
            w.write_all(data).unwrap();
            w.finalize()
        };
        assert_eq!(out, data);
        assert_eq!(crc, checksum(data));
    }

    proptest::proptest! {
        #[test]
        fn crc64_writer_always_matches_one_shot(data: Vec<u8>) {
            let mut out = Vec::new();
            let crc = {
                let mut w = Crc64Writer::new(&mut out);
                w.write_all(&data).unwrap();
                w.finalize()
            };
            prop_assert_eq!(crc, checksum(&data));
        }
    }
}
