//! Local-file transport: positional reads via `positioned-io`, so
//! multiple worker threads can `read_at` the same open file concurrently
//! without a shared cursor or external mutex.

use std::fs::File;
use std::path::Path;

use positioned_io::ReadAt;

use super::Transport;
use crate::error::{Error, Result};

pub struct FileTransport {
    file: File,
    len: u64,
}

impl FileTransport {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }

    pub fn from_file(file: File) -> Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

impl Transport for FileTransport {
    fn len(&self) -> Result<u64> {
        Ok(self.len)
    }

    fn read_at(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len as usize];
        self.file.read_exact_at(offset, &mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::Corrupt(format!(
                    "short read at offset {offset}, wanted {len} bytes"
                ))
            } else {
                Error::Io(e)
            }
        })?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_exact_range() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        tmp.flush().unwrap();
        let transport = FileTransport::open(tmp.path()).unwrap();
        assert_eq!(transport.len().unwrap(), 10);
        assert_eq!(transport.read_at(3, 4).unwrap(), b"3456");
    }

    #[test]
    fn short_read_is_corrupt() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123").unwrap();
        tmp.flush().unwrap();
        let transport = FileTransport::open(tmp.path()).unwrap();
        let err = transport.read_at(0, 100).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }
}
