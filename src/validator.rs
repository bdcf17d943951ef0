//! Full-file validator: re-reads a file end to end and enforces every
//! structural invariant independently of the tree descent used for
//! ordinary queries.
//!
//! A linear body scan (offset order) double-checks the recursive tree
//! descent (key order): neither trusts the other, and the two must agree
//! exactly on which blocks are reachable and how they nest.

use std::collections::HashSet;

use crate::block;
use crate::codec::{get_codec, Codec};
use crate::error::{Error, Result};
use crate::hash::Sha256Writer;
use crate::header::Header;
use crate::payload;
use crate::transport::Transport;
use crate::varint;

#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationReport {
    pub data_blocks: u64,
    pub index_blocks: u64,
}

/// Validate every structural invariant against `transport`. Returns a
/// small summary on success; the first invariant violation found is
/// returned as `Error::Corrupt`, malformed framing as `Error::Corrupt`,
/// and an unrecognized file as `Error::BadFormat`.
pub fn validate<T: Transport>(transport: &T) -> Result<ValidationReport> {
    let prefix = transport.read_at(0, 16)?;
    let header_len = u64::from_le_bytes(prefix[8..16].try_into().unwrap());
    let total_needed = 16u64
        .checked_add(header_len)
        .and_then(|v| v.checked_add(8))
        .ok_or_else(|| Error::Corrupt("header length overflow".into()))?;
    let full = transport.read_at(0, total_needed)?;
    let (header, header_end) = Header::parse(&full)?;

    let file_len = transport.len()?;
    if header.total_file_length != file_len {
        let msg = format!(
            "invariant 7 violated: header total_file_length {} does not match actual file length {file_len}",
            header.total_file_length
        );
        tracing::warn!("{msg}");
        return Err(Error::Corrupt(msg));
    }

    let codec = get_codec(header.codec);

    let scan = linear_scan(transport, &header, codec.as_ref(), header_end)?;
    if scan.data_sha256 != header.data_sha256 {
        let msg = "invariant 8 violated: recomputed data SHA-256 does not match header".to_string();
        tracing::warn!("{msg}");
        return Err(Error::Corrupt(msg));
    }

    let mut reached = HashSet::new();
    validate_subtree(
        transport,
        codec.as_ref(),
        header_end,
        header.root_index_offset,
        header.root_index_length,
        None,
        &mut reached,
    )?;

    if reached != scan.blocks {
        let msg = "invariant 3 violated: set of blocks reachable from the root differs from the linear body scan".to_string();
        tracing::warn!("{msg}");
        return Err(Error::Corrupt(msg));
    }

    tracing::debug!(
        data_blocks = scan.data_blocks,
        index_blocks = scan.index_blocks,
        "validation passed"
    );
    Ok(ValidationReport {
        data_blocks: scan.data_blocks,
        index_blocks: scan.index_blocks,
    })
}

struct ScanResult {
    blocks: HashSet<(u64, u64)>,
    data_sha256: [u8; 32],
    data_blocks: u64,
    index_blocks: u64,
}

/// Walk the file body strictly in physical offset order, independent of
/// the index tree, checking invariants 1 (within-block sort), 2
/// (across-block sort by file order), and recomputing the data SHA-256
/// (invariant 8) over decoded payloads in that same file order.
fn linear_scan<T: Transport>(
    transport: &T,
    header: &Header,
    codec: &dyn Codec,
    header_end: u64,
) -> Result<ScanResult> {
    let file_len = transport.len()?;
    let body_len = file_len
        .checked_sub(header_end)
        .ok_or_else(|| Error::Corrupt("header_end exceeds file length".into()))?;

    let mut voffset = 0u64;
    let mut blocks = HashSet::new();
    let mut hasher = Sha256Writer::new();
    let mut prev_last_record: Option<Vec<u8>> = None;
    let mut data_blocks = 0u64;
    let mut index_blocks = 0u64;

    while voffset < body_len {
        let probe_len = 10.min(body_len - voffset);
        let probe = transport.read_at(header_end + voffset, probe_len)?;
        let mut cursor: &[u8] = &probe;
        let before = cursor.len();
        let payload_len = varint::read_uleb128(&mut cursor)?;
        let len_field_size = (before - cursor.len()) as u64;
        let total_len = payload_len
            .checked_add(len_field_size)
            .and_then(|v| v.checked_add(8))
            .ok_or_else(|| Error::Corrupt("block length overflow".into()))?;

        let bytes = transport.read_at(header_end + voffset, total_len)?;
        let raw = block::parse_block(&bytes)?;
        blocks.insert((voffset, total_len));

        let payload = block::decode_payload(&raw, codec)?;
        if block::is_data_level(raw.level) {
            data_blocks += 1;
            let records = payload::decode_data_block(&payload)?;
            for pair in records.windows(2) {
                if pair[1] < pair[0] {
                    let msg = "invariant 1 violated: records not sorted within a data block";
                    tracing::warn!(voffset, "{msg}");
                    return Err(Error::Corrupt(msg.into()));
                }
            }
            if let Some(prev_last) = &prev_last_record {
                if records[0] < prev_last.as_slice() {
                    let msg = "invariant 2 violated: data block out of order relative to a preceding block";
                    tracing::warn!(voffset, "{msg}");
                    return Err(Error::Corrupt(msg.into()));
                }
            }
            prev_last_record = Some(records.last().unwrap().to_vec());
            hasher.write_all(&payload)?;
        } else {
            index_blocks += 1;
            // Still decoded above to confirm well-formedness; entries
            // themselves are cross-checked by the recursive tree walk.
            let _ = payload::decode_index_block(&payload)?;
        }

        voffset += total_len;
    }

    Ok(ScanResult {
        blocks,
        data_sha256: hasher.finalize(),
        data_blocks,
        index_blocks,
    })
}

/// Recursively descend from `(voffset, length)`, checking invariant 4
/// (child.level == parent.level − 1), invariant 5 (index keys sorted),
/// and invariant 6 (separator key bounds). Returns `(first record, last
/// record)` of this subtree's span so the caller can check invariant 6
/// against its own siblings.
fn validate_subtree<T: Transport>(
    transport: &T,
    codec: &dyn Codec,
    header_end: u64,
    voffset: u64,
    length: u64,
    parent_level: Option<u8>,
    reached: &mut HashSet<(u64, u64)>,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let bytes = transport.read_at(header_end + voffset, length)?;
    let raw = block::parse_block(&bytes)?;
    reached.insert((voffset, length));

    if let Some(parent_level) = parent_level {
        if raw.level + 1 != parent_level {
            let msg = format!(
                "invariant 4 violated: block at level {} referenced by level {parent_level} index",
                raw.level
            );
            tracing::warn!("{msg}");
            return Err(Error::Corrupt(msg));
        }
    }

    let payload = block::decode_payload(&raw, codec)?;

    if block::is_data_level(raw.level) {
        let records = payload::decode_data_block(&payload)?;
        let first = records.first().unwrap().to_vec();
        let last = records.last().unwrap().to_vec();
        return Ok((first, last));
    }

    let entries = payload::decode_index_block(&payload)?;
    if entries.is_empty() {
        return Err(Error::Corrupt("empty index block payload".into()));
    }
    for pair in entries.windows(2) {
        if pair[1].key < pair[0].key {
            let msg = "invariant 5 violated: index entry keys not sorted";
            tracing::warn!("{msg}");
            return Err(Error::Corrupt(msg.into()));
        }
    }

    let mut subtree_first: Option<Vec<u8>> = None;
    let mut prev_child_last: Option<Vec<u8>> = None;
    for entry in &entries {
        let (child_first, child_last) = validate_subtree(
            transport,
            codec,
            header_end,
            entry.child_voffset,
            entry.child_length,
            Some(raw.level),
            reached,
        )?;
        if entry.key > child_first {
            let msg = "invariant 6 violated: separator key exceeds its child's first record";
            tracing::warn!("{msg}");
            return Err(Error::Corrupt(msg.into()));
        }
        if let Some(prev_last) = &prev_child_last {
            if &entry.key < prev_last {
                let msg = "invariant 6 violated: separator key precedes the previous sibling's last record";
                tracing::warn!("{msg}");
                return Err(Error::Corrupt(msg.into()));
            }
        }
        if subtree_first.is_none() {
            subtree_first = Some(child_first);
        }
        prev_child_last = Some(child_last);
    }

    Ok((subtree_first.unwrap(), prev_child_last.unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriterOptions;
    use crate::writer::Writer;
    use std::io::Cursor;

    struct InMemory(Vec<u8>);
    impl Transport for InMemory {
        fn len(&self) -> Result<u64> {
            Ok(self.0.len() as u64)
        }
        fn read_at(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
            let start = offset as usize;
            let end = start + len as usize;
            if end > self.0.len() {
                return Err(Error::Corrupt("short read".into()));
            }
            Ok(self.0[start..end].to_vec())
        }
    }

    fn build(records: &[&[u8]], approx_block_size: usize) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut w = Writer::new(
                &mut buf,
                WriterOptions {
                    codec: crate::codec::CodecId::None,
                    approx_block_size,
                    compressor_workers: 0,
                    metadata: serde_json::json!({}),
                },
            )
            .unwrap();
            for r in records {
                w.add_record(r).unwrap();
            }
            w.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn validates_a_clean_file() {
        let bytes = build(&[b"aa", b"bb", b"cc"], 4096);
        let report = validate(&InMemory(bytes)).unwrap();
        assert_eq!(report.data_blocks, 1);
    }

    #[test]
    fn validates_a_multi_level_tree() {
        let records: Vec<Vec<u8>> = (0..9u32).map(|i| format!("{i:03}").into_bytes()).collect();
        let refs: Vec<&[u8]> = records.iter().map(|r| r.as_slice()).collect();
        let bytes = build(&refs, 1);
        let report = validate(&InMemory(bytes)).unwrap();
        assert!(report.data_blocks >= 3);
        assert!(report.index_blocks >= 1);
    }

    #[test]
    fn detects_bit_flip_corruption() {
        let mut bytes = build(&[b"aa", b"bb", b"cc"], 4096);
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let err = validate(&InMemory(bytes)).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn detects_truncation() {
        let mut bytes = build(&[b"aa", b"bb", b"cc"], 4096);
        bytes.truncate(bytes.len() - 4);
        let err = validate(&InMemory(bytes)).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)) || matches!(err, Error::BadFormat(_)));
    }
}
