//! Payload decoders — iterate records out of a decoded data-block payload,
//! or (key, child) entries out of a decoded index-block payload.
//!
//! Both payload kinds share the same uleb128 entry-at-a-time framing, so
//! both iterators below share the same truncation/trailing-bytes error
//! handling.

use crate::error::{Error, Result};
use crate::varint;

/// One entry of an index-block payload: a separator key and the voffset/
/// length of the child block it routes to.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub key: Vec<u8>,
    pub child_voffset: u64,
    pub child_length: u64,
}

/// Iterate `(uleb128 len, bytes)` record entries out of a decoded data-block
/// payload. Fails with `Corrupt` on truncation or trailing garbage — the
/// payload must be consumed exactly.
pub fn iter_data_records(payload: &[u8]) -> DataRecordIter<'_> {
    DataRecordIter { rest: payload }
}

pub struct DataRecordIter<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for DataRecordIter<'a> {
    type Item = Result<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let mut cursor = self.rest;
        let len = match varint::read_uleb128(&mut cursor) {
            Ok(len) => len,
            Err(e) => {
                self.rest = &[];
                return Some(Err(e));
            }
        };
        if cursor.len() < len as usize {
            self.rest = &[];
            return Some(Err(Error::Corrupt("truncated data record".into())));
        }
        let (record, remainder) = cursor.split_at(len as usize);
        self.rest = remainder;
        Some(Ok(record))
    }
}

/// Collect every record in a data-block payload, validating the whole
/// payload is consumed exactly (no trailing bytes).
pub fn decode_data_block(payload: &[u8]) -> Result<Vec<&[u8]>> {
    if payload.is_empty() {
        return Err(Error::Corrupt("empty data block payload".into()));
    }
    iter_data_records(payload).collect()
}

/// Iterate `(keylen, key, child_voffset, child_length)` entries out of a
/// decoded index-block payload.
pub fn iter_index_entries(payload: &[u8]) -> IndexEntryIter<'_> {
    IndexEntryIter { rest: payload }
}

pub struct IndexEntryIter<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for IndexEntryIter<'a> {
    type Item = Result<IndexEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        match self.parse_one() {
            Ok(entry) => Some(Ok(entry)),
            Err(e) => {
                self.rest = &[];
                Some(Err(e))
            }
        }
    }
}

impl<'a> IndexEntryIter<'a> {
    fn parse_one(&mut self) -> Result<IndexEntry> {
        let mut cursor = self.rest;
        let keylen = varint::read_uleb128(&mut cursor)?;
        if cursor.len() < keylen as usize {
            return Err(Error::Corrupt("truncated index key".into()));
        }
        let (key, rest) = cursor.split_at(keylen as usize);
        let mut cursor = rest;
        let child_voffset = varint::read_uleb128(&mut cursor)?;
        let child_length = varint::read_uleb128(&mut cursor)?;
        self.rest = cursor;
        Ok(IndexEntry {
            key: key.to_vec(),
            child_voffset,
            child_length,
        })
    }
}

/// Collect every entry in an index-block payload, validating the whole
/// payload is consumed exactly.
pub fn decode_index_block(payload: &[u8]) -> Result<Vec<IndexEntry>> {
    if payload.is_empty() {
        return Err(Error::Corrupt("empty index block payload".into()));
    }
    iter_index_entries(payload).collect()
}

/// Encode a sequence of records into a data-block payload.
pub fn encode_data_block<'a, I: IntoIterator<Item = &'a [u8]>>(records: I) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        varint::write_uleb128(&mut out, record.len() as u64).expect("Vec write cannot fail");
        out.extend_from_slice(record);
    }
    out
}

/// Encode a sequence of index entries into an index-block payload.
pub fn encode_index_block<'a, I: IntoIterator<Item = &'a IndexEntry>>(entries: I) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in entries {
        varint::write_uleb128(&mut out, entry.key.len() as u64).expect("Vec write cannot fail");
        out.extend_from_slice(&entry.key);
        varint::write_uleb128(&mut out, entry.child_voffset).expect("Vec write cannot fail");
        varint::write_uleb128(&mut out, entry.child_length).expect("Vec write cannot fail");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_block_roundtrip() {
        let records: Vec<&[u8]> = vec![b"aa", b"ab", b"cc"];
        let payload = encode_data_block(records.iter().copied());
        let decoded = decode_data_block(&payload).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn data_block_rejects_truncation() {
        let mut payload = encode_data_block([&b"hello"[..]]);
        payload.truncate(payload.len() - 1);
        assert!(decode_data_block(&payload).is_err());
    }

    #[test]
    fn index_block_roundtrip() {
        let entries = vec![
            IndexEntry {
                key: b"aa".to_vec(),
                child_voffset: 0,
                child_length: 20,
            },
            IndexEntry {
                key: b"ba".to_vec(),
                child_voffset: 20,
                child_length: 25,
            },
        ];
        let payload = encode_index_block(entries.iter());
        let decoded = decode_index_block(&payload).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].key, b"aa");
        assert_eq!(decoded[1].child_voffset, 20);
    }
}
