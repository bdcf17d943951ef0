use std::io::Cursor;

use zs::{CodecId, FileTransport, Query, Reader, WriterOptions};

fn opts(codec: CodecId, approx_block_size: usize) -> WriterOptions {
    WriterOptions {
        codec,
        approx_block_size,
        compressor_workers: 0,
        metadata: serde_json::json!({"scenario": "integration"}),
    }
}

fn write_to_vec(records: &[&[u8]], options: WriterOptions) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut writer = zs::Writer::new(&mut buf, options).unwrap();
        for r in records {
            writer.add_record(r).unwrap();
        }
        writer.finish().unwrap();
    }
    buf.into_inner()
}

struct InMemory(Vec<u8>);
impl zs::Transport for InMemory {
    fn len(&self) -> zs::Result<u64> {
        Ok(self.0.len() as u64)
    }
    fn read_at(&self, offset: u64, len: u64) -> zs::Result<Vec<u8>> {
        let start = offset as usize;
        let end = start + len as usize;
        if end > self.0.len() {
            return Err(zs::Error::Corrupt("short read".into()));
        }
        Ok(self.0[start..end].to_vec())
    }
}

fn collect(reader: &Reader<InMemory>, query: Query) -> Vec<Vec<u8>> {
    reader.search(query, 0).unwrap().collect::<zs::Result<_>>().unwrap()
}

/// Scenario 1: three single-record blocks, prefix and range search.
#[test]
fn scenario_one_record_per_block() {
    let bytes = write_to_vec(&[b"a", b"b", b"c"], opts(CodecId::None, 1));
    let report = zs::validate(&InMemory(bytes.clone())).unwrap();
    assert_eq!(report.data_blocks, 3);
    assert!(report.index_blocks >= 1);

    let reader = Reader::open(InMemory(bytes)).unwrap();
    assert_eq!(collect(&reader, Query::prefix(b"b".to_vec())), vec![b"b".to_vec()]);
    assert_eq!(
        collect(&reader, Query::range(Some(b"a".to_vec()), Some(b"c".to_vec()))),
        vec![b"a".to_vec(), b"b".to_vec()]
    );
}

/// Scenario 2: nine records (3x3), three leaves, prefix search across a leaf.
#[test]
fn scenario_nine_records_three_leaves() {
    let records: Vec<&[u8]> = vec![
        b"aa", b"ab", b"ac", b"ba", b"bb", b"bc", b"ca", b"cb", b"cc",
    ];
    // Each record is 2 bytes + 1-byte uleb128 length = 3 bytes; a block
    // size that admits 3 entries (9 bytes) but not 4 (12 bytes) yields
    // exactly 3 leaves of 3 records each.
    let bytes = write_to_vec(&records, opts(CodecId::None, 9));
    let reader = Reader::open(InMemory(bytes)).unwrap();
    let got = collect(&reader, Query::prefix(b"b".to_vec()));
    assert_eq!(got, vec![b"ba".to_vec(), b"bb".to_vec(), b"bc".to_vec()]);
}

/// Scenario 3: 1000 duplicate records; range search with equal bounds at
/// the boundary, invariant 2 holds with equality.
#[test]
fn scenario_duplicates() {
    let records: Vec<&[u8]> = vec![b"x"; 1000];
    let bytes = write_to_vec(&records, opts(CodecId::None, 8));
    zs::validate(&InMemory(bytes.clone())).unwrap();
    let reader = Reader::open(InMemory(bytes)).unwrap();
    let got = collect(&reader, Query::range(Some(b"x".to_vec()), Some(b"y".to_vec())));
    assert_eq!(got.len(), 1000);
    assert!(got.iter().all(|r| r.as_slice() == b"x"));
}

/// Scenario 4: flipping a bit in the body surfaces Corrupt on the query
/// that touches the damaged block.
#[test]
fn scenario_bit_flip_is_localized() {
    let records: Vec<Vec<u8>> = (0..40u32).map(|i| format!("{i:04}").into_bytes()).collect();
    let refs: Vec<&[u8]> = records.iter().map(|r| r.as_slice()).collect();
    let mut bytes = write_to_vec(&refs, opts(CodecId::None, 16));

    // Flip a bit well inside the body, away from the header.
    let flip_at = bytes.len() / 2;
    bytes[flip_at] ^= 0x01;

    let reader = Reader::open(InMemory(bytes)).unwrap();
    let result: zs::Result<Vec<Vec<u8>>> = reader.search(Query::all(), 0).unwrap().collect();
    assert!(matches!(result, Err(zs::Error::Corrupt(_))));
}

/// Scenario 5: truncating the file by a byte is rejected at open.
#[test]
fn scenario_truncation_rejected_at_open() {
    let bytes = write_to_vec(&[b"a", b"b", b"c"], opts(CodecId::None, 4096));
    let mut truncated = bytes;
    truncated.pop();
    let err = Reader::open(InMemory(truncated)).unwrap_err();
    assert!(matches!(err, zs::Error::Corrupt(_)));
}

/// Scenario 6: corrupting the magic bytes is BadFormat (garbage magic) or
/// Corrupt (valid "incomplete" magic).
#[test]
fn scenario_magic_corruption() {
    let bytes = write_to_vec(&[b"a"], opts(CodecId::None, 4096));

    let mut garbage_magic = bytes.clone();
    garbage_magic[0] = 0x00;
    let err = Reader::open(InMemory(garbage_magic)).unwrap_err();
    assert!(matches!(err, zs::Error::BadFormat(_)));

    let mut bad_magic = bytes;
    bad_magic[0..8].copy_from_slice(&zs::MAGIC_BAD);
    let err = Reader::open(InMemory(bad_magic)).unwrap_err();
    assert!(matches!(err, zs::Error::Corrupt(_)));
}

/// Round-trip across every codec: the same sorted input survives every
/// compression scheme, and codec choice does not affect the data hash.
#[test]
fn codec_independence_of_data_hash() {
    let records: Vec<&[u8]> = vec![b"alpha", b"beta", b"beta", b"gamma"];
    let mut hashes = Vec::new();
    for codec in [CodecId::None, CodecId::Deflate, CodecId::Bz2, CodecId::Lzma] {
        let bytes = write_to_vec(&records, opts(codec, 4096));
        let reader = Reader::open(InMemory(bytes)).unwrap();
        let got = collect(&reader, Query::all());
        assert_eq!(got, records.iter().map(|r| r.to_vec()).collect::<Vec<_>>());
        hashes.push(reader.header().data_sha256);
    }
    assert!(hashes.windows(2).all(|w| w[0] == w[1]));
}

/// A writer given out-of-order input fails with BadUsage.
#[test]
fn writer_rejects_unsorted_input() {
    let mut buf = Cursor::new(Vec::new());
    let mut writer = zs::Writer::new(&mut buf, opts(CodecId::None, 4096)).unwrap();
    writer.add_record(b"banana").unwrap();
    let err = writer.add_record(b"apple").unwrap_err();
    assert!(matches!(err, zs::Error::BadUsage(_)));
}

/// start > stop simply yields nothing; no record can satisfy both bounds.
#[test]
fn inverted_range_yields_nothing() {
    let bytes = write_to_vec(&[b"a", b"b", b"c"], opts(CodecId::None, 4096));
    let reader = Reader::open(InMemory(bytes)).unwrap();
    let got = collect(&reader, Query::range(Some(b"c".to_vec()), Some(b"a".to_vec())));
    assert!(got.is_empty());
}

/// Opening a file via the real local-file transport end to end.
#[test]
fn file_transport_roundtrip() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    {
        let file = std::fs::File::create(tmp.path()).unwrap();
        let mut writer = zs::Writer::new(
            std::io::BufWriter::new(file),
            opts(CodecId::Deflate, 4096),
        )
        .unwrap();
        for r in [&b"aa"[..], b"bb", b"cc"] {
            writer.add_record(r).unwrap();
        }
        writer.finish().unwrap();
    }

    let transport = FileTransport::open(tmp.path()).unwrap();
    zs::validate(&transport).unwrap();

    let transport = FileTransport::open(tmp.path()).unwrap();
    let reader = Reader::open(transport).unwrap();
    let got: Vec<Vec<u8>> = reader
        .search(Query::all(), 2)
        .unwrap()
        .collect::<zs::Result<_>>()
        .unwrap();
    assert_eq!(got, vec![b"aa".to_vec(), b"bb".to_vec(), b"cc".to_vec()]);
}
