//! File header (superblock): magic, header fields, and the atomic
//! bad→good magic flip protocol.
//!
//! The header's CRC is verified before any other field is trusted; fields
//! are read back in fixed declared order. No encryption or compression
//! flags live here — the header carries only the root pointer, the total
//! file length, the data hash, the codec name, and the metadata blob.

use std::io::Write;

use crate::crc64;
use crate::error::{Error, Result};

/// `5A 53 53 1C 8E 6C 00 01` — file is complete and valid.
pub const MAGIC_GOOD: [u8; 8] = [0x5A, 0x53, 0x53, 0x1C, 0x8E, 0x6C, 0x00, 0x01];
/// `53 53 5A 1C 8E 6C 00 01` — file is incomplete or in-progress.
pub const MAGIC_BAD: [u8; 8] = [0x53, 0x53, 0x5A, 0x1C, 0x8E, 0x6C, 0x00, 0x01];

const VERSION: [u8; 2] = [0x00, 0x01];

/// Parsed, CRC-verified file header.
#[derive(Debug, Clone)]
pub struct Header {
    pub root_index_offset: u64,
    pub root_index_length: u64,
    pub total_file_length: u64,
    pub data_sha256: [u8; 32],
    pub codec: crate::codec::CodecId,
    pub metadata: serde_json::Value,
}

fn check_magic(bytes: &[u8; 8]) -> Result<()> {
    if bytes[2..8] != MAGIC_GOOD[2..8] {
        return Err(Error::BadFormat("not a ZS file".into()));
    }
    if bytes[6..8] != VERSION {
        return Err(Error::BadFormat(format!(
            "unsupported version {:02x}{:02x}",
            bytes[6], bytes[7]
        )));
    }
    if *bytes == MAGIC_BAD {
        return Err(Error::Corrupt("incomplete file".into()));
    }
    if *bytes != MAGIC_GOOD {
        return Err(Error::BadFormat("unrecognized magic".into()));
    }
    Ok(())
}

impl Header {
    /// Parse magic + header from the first bytes of a file. `bytes` must
    /// contain at least the magic, the header_len field, and enough
    /// trailing bytes to cover `header_len + 8`; callers typically fetch
    /// 8 (magic) + 8 (header_len) first, then re-fetch once `header_len`
    /// is known. This function accepts the whole prefix at once for
    /// simplicity and is used that way by both the reader and validator.
    pub fn parse(bytes: &[u8]) -> Result<(Header, u64)> {
        if bytes.len() < 16 {
            return Err(Error::BadFormat("file too short for magic+header_len".into()));
        }
        let magic: [u8; 8] = bytes[0..8].try_into().unwrap();
        check_magic(&magic)?;

        let header_len = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        let total_needed = 16u64
            .checked_add(header_len)
            .and_then(|v| v.checked_add(8))
            .ok_or_else(|| Error::Corrupt("header length overflow".into()))?;
        if (bytes.len() as u64) < total_needed {
            return Err(Error::BadFormat("truncated header".into()));
        }

        let header_body = &bytes[16..16 + header_len as usize];
        let crc_bytes = &bytes[16 + header_len as usize..16 + header_len as usize + 8];
        let stored_crc = u64::from_le_bytes(crc_bytes.try_into().unwrap());
        let actual_crc = crc64::checksum(header_body);
        if actual_crc != stored_crc {
            return Err(Error::Corrupt("header CRC".into()));
        }

        let header = Self::parse_body(header_body)?;
        Ok((header, total_needed))
    }

    fn parse_body(body: &[u8]) -> Result<Header> {
        // root_off(8) root_len(8) total_len(8) sha256(32) codec(16) metadata_len(8)
        const FIXED_LEN: usize = 8 + 8 + 8 + 32 + 16 + 8;
        if body.len() < FIXED_LEN {
            return Err(Error::Corrupt("header too short".into()));
        }
        let mut off = 0usize;
        let root_index_offset = read_u64(body, &mut off);
        let root_index_length = read_u64(body, &mut off);
        let total_file_length = read_u64(body, &mut off);

        let mut data_sha256 = [0u8; 32];
        data_sha256.copy_from_slice(&body[off..off + 32]);
        off += 32;

        let mut codec_bytes = [0u8; 16];
        codec_bytes.copy_from_slice(&body[off..off + 16]);
        off += 16;
        let codec = crate::codec::CodecId::from_header_bytes(&codec_bytes)?;

        let metadata_len = read_u64(body, &mut off);
        let metadata_len = metadata_len as usize;
        if body.len() < off + metadata_len {
            return Err(Error::Corrupt("truncated metadata".into()));
        }
        let metadata_bytes = &body[off..off + metadata_len];
        let metadata_str = std::str::from_utf8(metadata_bytes)
            .map_err(|_| Error::Corrupt("metadata is not valid UTF-8".into()))?;
        let metadata: serde_json::Value = serde_json::from_str(metadata_str)
            .map_err(|e| Error::Corrupt(format!("metadata is not valid JSON: {e}")))?;
        if !metadata.is_object() {
            return Err(Error::Corrupt("metadata is not a JSON object".into()));
        }
        // trailing bytes after metadata, up to header_len, are ignored.

        Ok(Header {
            root_index_offset,
            root_index_length,
            total_file_length,
            data_sha256,
            codec,
            metadata,
        })
    }

    /// Encode the header body (everything the CRC covers) plus the
    /// trailing CRC, but not the magic or header_len field themselves —
    /// callers assemble the full `magic ‖ header_len ‖ body ‖ crc`
    /// themselves since header_len depends on the body's encoded size.
    pub fn encode_body(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.root_index_offset.to_le_bytes());
        body.extend_from_slice(&self.root_index_length.to_le_bytes());
        body.extend_from_slice(&self.total_file_length.to_le_bytes());
        body.extend_from_slice(&self.data_sha256);
        body.extend_from_slice(&self.codec.to_header_bytes());
        let metadata_str = serde_json::to_string(&self.metadata).expect("Value always serializes");
        body.extend_from_slice(&(metadata_str.len() as u64).to_le_bytes());
        body.extend_from_slice(metadata_str.as_bytes());
        body
    }

    /// Encode `magic ‖ header_len ‖ body ‖ header_crc`.
    pub fn encode(&self, magic: [u8; 8]) -> Vec<u8> {
        let body = self.encode_body();
        let crc = crc64::checksum(&body);
        let mut out = Vec::with_capacity(8 + 8 + body.len() + 8);
        out.extend_from_slice(&magic);
        out.extend_from_slice(&(body.len() as u64).to_le_bytes());
        out.extend_from_slice(&body);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    /// Write the bad-magic placeholder header at the start of a file
    /// being written; its field values are overwritten in place once the
    /// real values are known, but its *length* must exactly match the
    /// final header's length (fields are all fixed-size except
    /// metadata, which is decided up front).
    pub fn write_placeholder<W: Write>(w: &mut W, metadata: &serde_json::Value) -> Result<()> {
        let placeholder = Header {
            root_index_offset: 0,
            root_index_length: 0,
            total_file_length: 0,
            data_sha256: [0u8; 32],
            codec: crate::codec::CodecId::None,
            metadata: metadata.clone(),
        };
        w.write_all(&placeholder.encode(MAGIC_BAD))?;
        Ok(())
    }
}

fn read_u64(body: &[u8], off: &mut usize) -> u64 {
    let v = u64::from_le_bytes(body[*off..*off + 8].try_into().unwrap());
    *off += 8;
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_header() -> Header {
        Header {
            root_index_offset: 123,
            root_index_length: 45,
            total_file_length: 9999,
            data_sha256: [7u8; 32],
            codec: crate::codec::CodecId::Lzma,
            metadata: json!({"created_by": "test"}),
        }
    }

    #[test]
    fn roundtrip_good_magic() {
        let header = sample_header();
        let encoded = header.encode(MAGIC_GOOD);
        let (parsed, consumed) = Header::parse(&encoded).unwrap();
        assert_eq!(consumed, encoded.len() as u64);
        assert_eq!(parsed.root_index_offset, 123);
        assert_eq!(parsed.root_index_length, 45);
        assert_eq!(parsed.total_file_length, 9999);
        assert_eq!(parsed.codec, crate::codec::CodecId::Lzma);
        assert_eq!(parsed.metadata, json!({"created_by": "test"}));
    }

    #[test]
    fn bad_magic_is_corrupt_not_bad_format() {
        let header = sample_header();
        let encoded = header.encode(MAGIC_BAD);
        let err = Header::parse(&encoded).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn garbage_magic_is_bad_format() {
        let mut encoded = sample_header().encode(MAGIC_GOOD);
        encoded[0] = 0xFF;
        let err = Header::parse(&encoded).unwrap_err();
        assert!(matches!(err, Error::BadFormat(_)));
    }

    #[test]
    fn detects_header_crc_corruption() {
        let mut encoded = sample_header().encode(MAGIC_GOOD);
        let last = encoded.len() - 1;
        encoded[last] ^= 0x01;
        let err = Header::parse(&encoded).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn rejects_non_object_metadata() {
        let mut header = sample_header();
        header.metadata = json!([1, 2, 3]);
        let encoded = header.encode(MAGIC_GOOD);
        let err = Header::parse(&encoded).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }
}
