//! Writer engine: packer → compressor pool → single-thread appender →
//! cascading index-level builder → atomic magic-flip finalize.
//!
//! Records are appended into a strictly sorted stream and packed into
//! data blocks bottom-up; each completed level of data blocks feeds
//! separator keys up into the next index level, cascading until a
//! single root block remains. Finalization follows a two-phase shape:
//! write a bad-magic placeholder header, append the body, patch the
//! header fields in place once the root and file length are known, then
//! flip the magic to good as the last byte written.

use std::collections::VecDeque;
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

use crate::block;
use crate::codec::{get_codec, Codec};
use crate::config::WriterOptions;
use crate::error::{Error, Result};
use crate::hash::Sha256Writer;
use crate::header::{Header, MAGIC_BAD, MAGIC_GOOD};
use crate::payload;
use crate::pool::{ReorderBuffer, WorkerPool};
use crate::varint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Writing,
    Finishing,
    Closed,
}

struct PendingBlock {
    seq: u64,
    level: u8,
    first_key: Vec<u8>,
}

#[derive(Default)]
struct LevelState {
    payload: Vec<u8>,
    first_key: Option<Vec<u8>>,
    /// Total entries ever appended to this level across the writer's
    /// lifetime (never reset on flush) — used at `finish()` to detect
    /// the level whose one-and-only block is the root.
    entries_ever: usize,
}

pub struct Writer<W: Write + Seek> {
    out: W,
    options: WriterOptions,
    codec: Arc<dyn Codec>,
    state: State,

    header_region_len: u64,
    next_voffset: u64,
    next_seq: u64,

    current_records: Vec<Vec<u8>>,
    current_encoded_len: usize,
    last_record: Option<Vec<u8>>,
    total_data_blocks: u64,

    pool: WorkerPool<(u8, Vec<u8>), Result<Vec<u8>>>,
    pending: VecDeque<PendingBlock>,
    reorder: ReorderBuffer<Result<Vec<u8>>>,

    hasher: Sha256Writer,
    levels: Vec<LevelState>,
    last_written_block: Option<(u8, u64, u64)>,
}

impl<W: Write + Seek> Writer<W> {
    pub fn new(mut out: W, options: WriterOptions) -> Result<Self> {
        let placeholder = Header {
            root_index_offset: 0,
            root_index_length: 0,
            total_file_length: 0,
            data_sha256: [0u8; 32],
            codec: options.codec,
            metadata: options.metadata.clone(),
        };
        let encoded = placeholder.encode(MAGIC_BAD);
        out.write_all(&encoded)?;
        let header_region_len = encoded.len() as u64;

        let codec: Arc<dyn Codec> = Arc::from(get_codec(options.codec));
        let pool_codec = Arc::clone(&codec);
        let workers = options.compressor_workers;
        let pool: WorkerPool<(u8, Vec<u8>), Result<Vec<u8>>> =
            WorkerPool::new(workers, move |(level, payload)| {
                block::write_block(level, &payload, pool_codec.as_ref())
            });
        let reorder_capacity = (workers.max(1) * 3).max(1);

        Ok(Self {
            out,
            options,
            codec,
            state: State::Open,
            header_region_len,
            next_voffset: 0,
            next_seq: 0,
            current_records: Vec::new(),
            current_encoded_len: 0,
            last_record: None,
            total_data_blocks: 0,
            pool,
            pending: VecDeque::new(),
            reorder: ReorderBuffer::new(reorder_capacity),
            hasher: Sha256Writer::new(),
            levels: Vec::new(),
            last_written_block: None,
        })
    }

    /// Append one record. Records MUST arrive in non-decreasing
    /// byte-lexicographic order.
    pub fn add_record(&mut self, record: &[u8]) -> Result<()> {
        if self.state == State::Closed {
            return Err(Error::BadUsage("writer is closed".into()));
        }
        self.state = State::Writing;

        if let Some(last) = &self.last_record {
            if record < last.as_slice() {
                return Err(Error::BadUsage(format!(
                    "records out of order: {last:?} was written before {record:?}"
                )));
            }
        }
        self.last_record = Some(record.to_vec());

        let encoded_len = varint::uleb128_len(record.len() as u64) + record.len();
        if !self.current_records.is_empty()
            && self.current_encoded_len + encoded_len > self.options.approx_block_size
        {
            self.flush_data_block()?;
        }
        self.current_encoded_len += encoded_len;
        self.current_records.push(record.to_vec());
        Ok(())
    }

    /// Advanced entry point for callers that have already bucketed
    /// records into a block themselves. `records` must be sorted and
    /// must not precede any record already written.
    pub fn add_data_block(&mut self, records: Vec<Vec<u8>>) -> Result<()> {
        if self.state == State::Closed {
            return Err(Error::BadUsage("writer is closed".into()));
        }
        if records.is_empty() {
            return Err(Error::BadUsage("add_data_block requires at least one record".into()));
        }
        for pair in records.windows(2) {
            if pair[1] < pair[0] {
                return Err(Error::BadUsage(format!(
                    "records out of order within block: {:?} before {:?}",
                    pair[0], pair[1]
                )));
            }
        }
        if let Some(last) = &self.last_record {
            if records[0] < *last {
                return Err(Error::BadUsage(format!(
                    "records out of order: {last:?} was written before {:?}",
                    records[0]
                )));
            }
        }
        self.state = State::Writing;
        self.flush_data_block()?;
        self.last_record = records.last().cloned();

        let first_key = records[0].clone();
        let payload = payload::encode_data_block(records.iter().map(|r| r.as_slice()));
        self.submit_block(0, first_key, payload)?;
        self.total_data_blocks += 1;
        Ok(())
    }

    fn flush_data_block(&mut self) -> Result<()> {
        if self.current_records.is_empty() {
            return Ok(());
        }
        let records = std::mem::take(&mut self.current_records);
        self.current_encoded_len = 0;
        let first_key = records[0].clone();
        let payload = payload::encode_data_block(records.iter().map(|r| r.as_slice()));
        tracing::trace!(records = records.len(), payload_bytes = payload.len(), "flushing data block");
        self.submit_block(0, first_key, payload)?;
        self.total_data_blocks += 1;
        Ok(())
    }

    fn submit_block(&mut self, level: u8, first_key: Vec<u8>, raw_payload: Vec<u8>) -> Result<()> {
        if level == 0 {
            self.hasher.write_all(&raw_payload)?;
        }
        if self.pool.is_inline() {
            let framed = block::write_block(level, &raw_payload, self.codec.as_ref())?;
            return self.append_block(level, first_key, framed);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.pool.submit(seq, (level, raw_payload));
        self.pending.push_back(PendingBlock { seq, level, first_key });

        let inflight_limit = self.options.compressor_workers.max(1) * 3;
        while self.pending.len() > inflight_limit {
            self.drain_one(true)?;
        }
        self.drain_one(false).map(|_| ())
    }

    /// Try to advance the pending queue by at most one completed block.
    /// `blocking` controls whether we wait on the pool when nothing is
    /// immediately ready. Returns `true` if a block was appended.
    fn drain_one(&mut self, blocking: bool) -> Result<bool> {
        loop {
            if self.pending.is_empty() {
                return Ok(false);
            }
            if let Some(framed_result) = self.reorder.pop_ready() {
                let front = self.pending.pop_front().unwrap();
                let framed = framed_result?;
                self.append_block(front.level, front.first_key, framed)?;
                return Ok(true);
            }
            if blocking {
                let (seq, item) = self.pool.out_rx().recv().map_err(|_| Error::Cancelled)?;
                self.reorder.push(seq, item);
            } else {
                match self.pool.out_rx().try_recv() {
                    Ok((seq, item)) => {
                        self.reorder.push(seq, item);
                    }
                    Err(_) => return Ok(false),
                }
            }
        }
    }

    fn drain_all(&mut self) -> Result<()> {
        while self.drain_one(true)? {}
        Ok(())
    }

    fn append_block(&mut self, level: u8, first_key: Vec<u8>, framed: Vec<u8>) -> Result<()> {
        let voffset = self.next_voffset;
        self.out.write_all(&framed)?;
        let length = framed.len() as u64;
        self.next_voffset += length;
        self.last_written_block = Some((level, voffset, length));
        self.add_index_entry(level as usize, first_key, voffset, length)
    }

    fn add_index_entry(&mut self, level: usize, key: Vec<u8>, voffset: u64, length: u64) -> Result<()> {
        while self.levels.len() <= level {
            self.levels.push(LevelState::default());
        }
        {
            let lvl = &mut self.levels[level];
            if lvl.payload.is_empty() {
                lvl.first_key = Some(key.clone());
            }
            lvl.entries_ever += 1;
            varint::write_uleb128(&mut lvl.payload, key.len() as u64)?;
            lvl.payload.extend_from_slice(&key);
            varint::write_uleb128(&mut lvl.payload, voffset)?;
            varint::write_uleb128(&mut lvl.payload, length)?;
        }
        if self.levels[level].payload.len() >= self.options.approx_block_size {
            self.flush_level(level)?;
        }
        Ok(())
    }

    fn flush_level(&mut self, level: usize) -> Result<()> {
        if self.levels[level].payload.is_empty() {
            return Ok(());
        }
        let payload = std::mem::take(&mut self.levels[level].payload);
        let first_key = self.levels[level].first_key.take().unwrap();
        tracing::debug!(
            level = level + 1,
            payload_bytes = payload.len(),
            "cascading index level"
        );
        self.submit_block((level + 1) as u8, first_key, payload)
    }

    fn entries_ever_at(&self, level: usize) -> usize {
        self.levels.get(level).map(|l| l.entries_ever).unwrap_or(0)
    }

    /// Flush all buffered records, cascade-build index levels until a
    /// single root remains, and run the atomic bad→good magic-flip
    /// finalize protocol.
    pub fn finish(&mut self) -> Result<()> {
        if self.state == State::Closed {
            return Ok(());
        }
        self.state = State::Finishing;

        self.flush_data_block()?;
        self.drain_all()?;

        if self.total_data_blocks == 0 {
            return Err(Error::BadUsage(
                "cannot finish: no records were written".into(),
            ));
        }

        let mut level = 0usize;
        loop {
            self.flush_level(level)?;
            self.drain_all()?;
            if self.entries_ever_at(level + 1) == 1 {
                break;
            }
            level += 1;
            if level >= self.levels.len() {
                return Err(Error::Corrupt(
                    "writer index cascade failed to converge on a single root".into(),
                ));
            }
        }

        let (_root_level, root_voffset, root_length) = self
            .last_written_block
            .expect("at least one block must have been written");

        let total_file_length = self.header_region_len + self.next_voffset;
        let hasher = std::mem::replace(&mut self.hasher, Sha256Writer::new());
        let data_sha256 = hasher.finalize();

        let header = Header {
            root_index_offset: root_voffset,
            root_index_length: root_length,
            total_file_length,
            data_sha256,
            codec: self.options.codec,
            metadata: self.options.metadata.clone(),
        };

        // Phase 1: patch the real header fields in place, magic still bad.
        let bad_encoded = header.encode(MAGIC_BAD);
        debug_assert_eq!(bad_encoded.len() as u64, self.header_region_len);
        self.out.seek(SeekFrom::Start(0))?;
        self.out.write_all(&bad_encoded)?;
        self.out.flush()?;

        // Phase 2: flip the magic to mark the file complete.
        self.out.seek(SeekFrom::Start(0))?;
        self.out.write_all(&MAGIC_GOOD)?;
        self.out.flush()?;

        tracing::debug!(
            total_file_length,
            data_blocks = self.total_data_blocks,
            root_voffset,
            root_length,
            "writer finished, magic flipped to good"
        );
        self.state = State::Closed;
        Ok(())
    }

    /// Idempotent. If the writer is mid-`Writing`, flushes as much as
    /// possible before leaving the file with `MAGIC_BAD` still set, so
    /// closing without finishing leaves a file readers will reject.
    pub fn close(&mut self) -> Result<()> {
        if self.state == State::Closed {
            return Ok(());
        }
        let _ = self.flush_data_block();
        let _ = self.drain_all();
        self.pool.cancel();
        self.state = State::Closed;
        Ok(())
    }
}

impl<W: Write + Seek> Drop for Writer<W> {
    fn drop(&mut self) {
        if self.state != State::Closed {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecId;
    use crate::reader::{Query, Reader};
    use std::io::Cursor;

    fn opts(approx_block_size: usize) -> WriterOptions {
        WriterOptions {
            codec: CodecId::None,
            approx_block_size,
            compressor_workers: 0,
            metadata: serde_json::json!({"test": true}),
        }
    }

    #[test]
    fn single_block_roundtrip() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut w = Writer::new(&mut buf, opts(4096)).unwrap();
            for rec in [&b"aa"[..], b"bb", b"cc"] {
                w.add_record(rec).unwrap();
            }
            w.finish().unwrap();
        }
        let bytes = buf.into_inner();
        assert_eq!(bytes[0..8], MAGIC_GOOD);

        let reader = Reader::open(InMemory(bytes)).unwrap();
        let records: Vec<_> = reader
            .search(Query::all(), 0)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records, vec![b"aa".to_vec(), b"bb".to_vec(), b"cc".to_vec()]);
    }

    #[test]
    fn many_blocks_build_an_index_tree() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut w = Writer::new(&mut buf, opts(1)).unwrap();
            for i in 0..9u32 {
                w.add_record(format!("{i:03}").as_bytes()).unwrap();
            }
            w.finish().unwrap();
        }
        let bytes = buf.into_inner();
        let reader = Reader::open(InMemory(bytes)).unwrap();
        let records: Vec<_> = reader
            .search(Query::all(), 0)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 9);
        for (i, r) in records.iter().enumerate() {
            assert_eq!(r, format!("{i:03}").as_bytes());
        }
    }

    #[test]
    fn rejects_out_of_order_records() {
        let mut buf = Cursor::new(Vec::new());
        let mut w = Writer::new(&mut buf, opts(4096)).unwrap();
        w.add_record(b"bb").unwrap();
        let err = w.add_record(b"aa").unwrap_err();
        assert!(matches!(err, Error::BadUsage(_)));
    }

    #[test]
    fn duplicate_records_are_allowed() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut w = Writer::new(&mut buf, opts(1)).unwrap();
            for _ in 0..1000 {
                w.add_record(b"same").unwrap();
            }
            w.finish().unwrap();
        }
        let bytes = buf.into_inner();
        let reader = Reader::open(InMemory(bytes)).unwrap();
        let records: Vec<_> = reader
            .search(Query::all(), 0)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 1000);
    }

    #[test]
    fn unfinished_writer_leaves_bad_magic() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut w = Writer::new(&mut buf, opts(4096)).unwrap();
            w.add_record(b"aa").unwrap();
            w.close().unwrap();
        }
        let bytes = buf.into_inner();
        assert_eq!(bytes[0..8], MAGIC_BAD);
    }

    /// Minimal in-memory `Transport` used only by writer tests so they
    /// don't need a real file on disk to exercise the reader side.
    struct InMemory(Vec<u8>);
    impl crate::transport::Transport for InMemory {
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
}
