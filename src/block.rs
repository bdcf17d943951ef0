//! Block framing — the on-disk unit both data and index blocks share.
//!
//! ```text
//! uleb128 payload_len ‖ u8 level ‖ compressed_payload[payload_len-1] ‖ u64le crc
//! ```
//!
//! `payload_len` counts everything after it up to (but not including) the
//! trailing CRC: the one level byte plus the compressed payload. The CRC-64/XZ
//! covers every byte after the uleb128 length field, i.e. the level byte and
//! the compressed payload.
//!
//! The checksum is verified before any other field is trusted. Framing is a
//! short uleb128-prefixed, CRC-suffixed envelope with no per-block magic or
//! codec tag — codec choice and file identity live in the file header
//! instead (`header.rs`), since one file uses exactly one codec throughout.

use std::io::{Read, Write};

use crate::crc64;
use crate::error::{Error, Result};
use crate::varint;

/// Levels `0..=63` are valid; 0 is a data block, 1..=63 are index blocks.
/// Levels `>= 64` are reserved for forward-compatible extensions that this
/// reader cannot navigate: an index at level n may only reference blocks at
/// level n-1, so a reference to level >= 64 is always treated as corrupt.
pub const MAX_VALID_LEVEL: u8 = 63;

pub fn is_data_level(level: u8) -> bool {
    level == 0
}

pub fn is_index_level(level: u8) -> bool {
    (1..=MAX_VALID_LEVEL).contains(&level)
}

/// Frame and checksum `payload` (already compressed) at `level`. Returns the
/// complete on-disk bytes: `uleb128 len ‖ level ‖ payload ‖ crc64`.
pub fn frame_block(level: u8, payload: &[u8]) -> Vec<u8> {
    let inner_len = 1 + payload.len(); // level byte + payload
    let mut out = Vec::with_capacity(varint::uleb128_len(inner_len as u64) + inner_len + 8);

    // length field is not covered by the CRC.
    varint::write_uleb128(&mut out, inner_len as u64).expect("Vec write cannot fail");

    let crc_start = out.len();
    out.push(level);
    out.extend_from_slice(payload);
    let crc = crc64::checksum(&out[crc_start..]);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

/// A block after its length/CRC framing has been verified and stripped, but
/// before its payload has been decompressed.
pub struct RawBlock {
    pub level: u8,
    /// Still-compressed payload bytes.
    pub compressed: Vec<u8>,
}

/// Parse `total_length` on-disk bytes (as read from the transport) into a
/// [`RawBlock`]: verify the length field, verify the CRC, split off the
/// level byte. Does not decompress.
pub fn parse_block(bytes: &[u8]) -> Result<RawBlock> {
    let mut cursor = bytes;
    let before_len = cursor.len();
    let payload_len = varint::read_uleb128(&mut cursor)?;
    let len_field_size = before_len - cursor.len();

    let expected_total = payload_len
        .checked_add(len_field_size as u64)
        .and_then(|v| v.checked_add(8))
        .ok_or_else(|| Error::Corrupt("block length overflow".into()))?;
    if expected_total != bytes.len() as u64 {
        return Err(Error::Corrupt("block length mismatch".into()));
    }

    let body_and_crc = cursor;
    if body_and_crc.len() < 8 {
        return Err(Error::Corrupt("block truncated before CRC".into()));
    }
    let split = body_and_crc.len() - 8;
    let (body, crc_bytes) = body_and_crc.split_at(split);
    let stored_crc = u64::from_le_bytes(crc_bytes.try_into().unwrap());
    let actual_crc = crc64::checksum(body);
    if actual_crc != stored_crc {
        return Err(Error::Corrupt("block CRC".into()));
    }

    if body.is_empty() {
        return Err(Error::Corrupt("block missing level byte".into()));
    }
    let level = body[0];
    if level > MAX_VALID_LEVEL {
        return Err(Error::Corrupt(format!(
            "block references reserved level {level}"
        )));
    }

    Ok(RawBlock {
        level,
        compressed: body[1..].to_vec(),
    })
}

/// Decompress a [`RawBlock`]'s payload with the file's codec.
pub fn decode_payload(raw: &RawBlock, codec: &dyn crate::codec::Codec) -> Result<Vec<u8>> {
    Ok(codec.decompress(&raw.compressed)?)
}

/// Full decode: parse framing, verify CRC, decompress. Returns `(level,
/// decoded payload)`.
pub fn read_block(bytes: &[u8], codec: &dyn crate::codec::Codec) -> Result<(u8, Vec<u8>)> {
    let raw = parse_block(bytes)?;
    let level = raw.level;
    let payload = decode_payload(&raw, codec)?;
    Ok((level, payload))
}

/// Compress `payload` with `codec` and frame it at `level`. Returns the
/// complete on-disk bytes, ready to append to the file.
pub fn write_block(level: u8, payload: &[u8], codec: &dyn crate::codec::Codec) -> Result<Vec<u8>> {
    let compressed = codec.compress(payload)?;
    Ok(frame_block(level, &compressed))
}

/// Convenience used by streaming writers that want to also feed a hasher
/// with the original uncompressed bytes (the header's SHA-256 is computed
/// over decoded data payloads, not compressed ones).
pub fn write_block_to<W: Write>(
    mut w: W,
    level: u8,
    payload: &[u8],
    codec: &dyn crate::codec::Codec,
) -> Result<usize> {
    let framed = write_block(level, payload, codec)?;
    w.write_all(&framed)?;
    Ok(framed.len())
}

/// Read exactly `total_length` bytes at the current position of `r`.
pub fn read_exact_block<R: Read>(mut r: R, total_length: u64) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; total_length as usize];
    r.read_exact(&mut buf)?;
    Ok(buf)
}
