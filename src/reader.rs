//! Reader engine: open and validate the header, descend the index tree
//! for point/range/prefix search, and drive a parallel decompression
//! pool that still delivers records to the caller in strict sort order.
//!
//! There is no materialized in-memory index — every query re-descends
//! the on-disk tree from the root, and lookup means finding the data
//! blocks whose span could contain the query's records.

use std::sync::Arc;
use std::thread;

use crate::block;
use crate::codec::{get_codec, Codec};
use crate::config::ReaderOptions;
use crate::error::{Error, Result};
use crate::header::Header;
use crate::payload::{decode_index_block, IndexEntry};
use crate::pool::{ReorderBuffer, WorkerPool};
use crate::transport::Transport;

struct Inner<T> {
    transport: T,
    header: Header,
    codec: Box<dyn Codec>,
    header_end: u64,
    options: ReaderOptions,
}

/// A query over the sorted record space: `(start, stop, prefix)`.
/// `start`/`stop` bound an explicit `[start, stop)` range; `prefix`
/// additionally (or instead) selects every record beginning with
/// `prefix`. Leaving all three `None` selects every record.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub start: Option<Vec<u8>>,
    pub stop: Option<Vec<u8>>,
    pub prefix: Option<Vec<u8>>,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn range(start: Option<Vec<u8>>, stop: Option<Vec<u8>>) -> Self {
        Self {
            start,
            stop,
            prefix: None,
        }
    }

    pub fn prefix(prefix: Vec<u8>) -> Self {
        Self {
            start: None,
            stop: None,
            prefix: Some(prefix),
        }
    }
}

fn record_matches(r: &[u8], query: &Query) -> bool {
    let prefix_match = query
        .prefix
        .as_ref()
        .map(|p| r.starts_with(p.as_slice()))
        .unwrap_or(false);
    let has_range = query.start.is_some() || query.stop.is_some();
    let above_start = query.start.as_ref().map(|s| r >= s.as_slice()).unwrap_or(true);
    let below_stop = query.stop.as_ref().map(|s| r < s.as_slice()).unwrap_or(true);
    prefix_match || (has_range && above_start && below_stop)
}

/// The smallest byte string that is a strict upper bound on every string
/// beginning with `p` (standard "increment the last non-0xFF byte, drop
/// the 0xFF tail" trick). `None` means unbounded (`p` is all `0xFF`, or
/// empty and thus matches everything).
fn prefix_upper_bound(p: &[u8]) -> Option<Vec<u8>> {
    let mut v = p.to_vec();
    while let Some(&last) = v.last() {
        if last == 0xFF {
            v.pop();
        } else {
            *v.last_mut().unwrap() += 1;
            return Some(v);
        }
    }
    None
}

fn effective_bounds(query: &Query) -> (Option<Vec<u8>>, Option<Vec<u8>>) {
    let lo = match (&query.start, &query.prefix) {
        (Some(s), Some(p)) => Some(if s <= p { s.clone() } else { p.clone() }),
        (Some(s), None) => Some(s.clone()),
        (None, Some(p)) => Some(p.clone()),
        (None, None) => None,
    };
    let hi = if let Some(p) = &query.prefix {
        match prefix_upper_bound(p) {
            None => None,
            Some(phi) => match &query.stop {
                Some(stop) if stop > &phi => Some(stop.clone()),
                Some(_) => Some(phi),
                None => Some(phi),
            },
        }
    } else {
        query.stop.clone()
    };
    (lo, hi)
}

pub struct Reader<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Reader<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport + 'static> Reader<T> {
    /// Open and validate a file's header with default [`ReaderOptions`].
    /// Does not verify the data SHA-256 — the reader relies on per-block
    /// CRCs; full SHA-256 is only checked by [`crate::validator::validate`].
    pub fn open(transport: T) -> Result<Self> {
        Self::open_with_options(transport, ReaderOptions::default())
    }

    /// Open and validate a file's header, using `options.decompression_workers`
    /// as the default worker count for calls that don't take an explicit
    /// `workers` argument (currently just [`Reader::point`]).
    pub fn open_with_options(transport: T, options: ReaderOptions) -> Result<Self> {
        let prefix = transport.read_at(0, 16)?;
        let header_len = u64::from_le_bytes(prefix[8..16].try_into().unwrap());
        let total_needed = 16u64
            .checked_add(header_len)
            .and_then(|v| v.checked_add(8))
            .ok_or_else(|| Error::Corrupt("header length overflow".into()))?;
        let full = transport.read_at(0, total_needed)?;
        let (header, consumed) = Header::parse(&full)?;

        let actual_len = transport.len()?;
        if header.total_file_length != actual_len {
            return Err(Error::Corrupt(format!(
                "total_file_length {} does not match file size {actual_len}",
                header.total_file_length
            )));
        }

        let codec = get_codec(header.codec);
        tracing::debug!(
            root_voffset = header.root_index_offset,
            root_length = header.root_index_length,
            total_file_length = header.total_file_length,
            codec = header.codec.name(),
            workers = options.decompression_workers,
            "opened file"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                header,
                codec,
                header_end: consumed,
                options,
            }),
        })
    }

    pub fn header(&self) -> &Header {
        &self.inner.header
    }

    fn fetch_block(&self, voffset: u64, length: u64) -> Result<(u8, Vec<u8>)> {
        fetch_block(&self.inner, voffset, length)
    }

    fn find_start_index(entries: &[IndexEntry], lo: Option<&[u8]>) -> usize {
        let lo = match lo {
            None => return 0,
            Some(lo) => lo,
        };
        let mut idx = 0;
        for (i, e) in entries.iter().enumerate() {
            if e.key.as_slice() <= lo {
                idx = i;
            } else {
                break;
            }
        }
        idx
    }

    /// Recursively descend, appending every reachable data block's
    /// `(voffset, length)` whose span could intersect `[lo, hi)` to
    /// `out`, in file (sorted) order.
    fn visit(
        &self,
        voffset: u64,
        length: u64,
        lo: Option<&[u8]>,
        hi: Option<&[u8]>,
        out: &mut Vec<(u64, u64)>,
    ) -> Result<()> {
        let (level, payload) = self.fetch_block(voffset, length)?;
        if block::is_data_level(level) {
            out.push((voffset, length));
            return Ok(());
        }
        let entries = decode_index_block(&payload)?;
        if entries.is_empty() {
            return Err(Error::Corrupt("empty index block payload".into()));
        }
        let start_idx = Self::find_start_index(&entries, lo);
        for entry in &entries[start_idx..] {
            if let Some(hi) = hi {
                if entry.key.as_slice() >= hi {
                    break;
                }
            }
            self.visit(entry.child_voffset, entry.child_length, lo, hi, out)?;
        }
        Ok(())
    }

    fn leaves_for(&self, query: &Query) -> Result<(Vec<(u64, u64)>, Query)> {
        let (lo, hi) = effective_bounds(query);
        let mut leaves = Vec::new();
        self.visit(
            self.inner.header.root_index_offset,
            self.inner.header.root_index_length,
            lo.as_deref(),
            hi.as_deref(),
            &mut leaves,
        )?;
        tracing::trace!(leaf_blocks = leaves.len(), "tree descent complete");
        Ok((leaves, query.clone()))
    }

    /// Stream every record matching `query`, decompressing up to
    /// `workers` blocks at a time but yielding records strictly in sort
    /// order regardless of `workers`.
    pub fn search(&self, query: Query, workers: usize) -> Result<RecordIter> {
        let (leaves, query) = self.leaves_for(&query)?;
        let total = leaves.len();
        let inner = Arc::clone(&self.inner);
        let pool: WorkerPool<(u64, u64), Result<Vec<u8>>> =
            WorkerPool::new(workers, move |(voffset, length)| {
                fetch_block(&inner, voffset, length).map(|(_, payload)| payload)
            });

        if pool.is_inline() {
            let mut records = Vec::new();
            for (voffset, length) in leaves {
                let (_, payload) = self.fetch_block(voffset, length)?;
                for record in crate::payload::decode_data_block(&payload)? {
                    records.push(record.to_vec());
                }
            }
            return Ok(RecordIter::materialized(records, query));
        }

        let feeder = pool.feeder().expect("pool has workers, feeder must exist");
        let feeder_handle = thread::spawn(move || {
            for (i, (voffset, length)) in leaves.into_iter().enumerate() {
                feeder.submit(i as u64, (voffset, length));
            }
        });

        Ok(RecordIter::streaming(pool, feeder_handle, total, workers, query))
    }

    /// Point lookup: every record equal to `key` (there may be more than
    /// one, since ZS is a multiset).
    pub fn point(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let query = Query::range(Some(key.to_vec()), None);
        let mut out = Vec::new();
        for record in self.search(query, self.inner.options.decompression_workers)? {
            let record = record?;
            if record.as_slice() != key {
                break;
            }
            out.push(record);
        }
        Ok(out)
    }

    /// Apply `f` to each data-block payload intersecting `query`, in
    /// parallel, returning results in block order.
    pub fn block_map<F, R>(&self, query: Query, workers: usize, f: F) -> Result<Vec<R>>
    where
        F: Fn(&[u8]) -> R + Send + Sync + 'static,
        R: Send + 'static,
    {
        let (leaves, _) = self.leaves_for(&query)?;
        let inner = Arc::clone(&self.inner);
        let f = Arc::new(f);
        let pool_f = Arc::clone(&f);
        let pool: WorkerPool<(u64, u64), Result<R>> = WorkerPool::new(workers, move |(v, l)| {
            let (_, payload) = fetch_block(&inner, v, l)?;
            Ok((pool_f)(&payload))
        });

        if pool.is_inline() {
            let mut out = Vec::with_capacity(leaves.len());
            for (v, l) in leaves {
                let (_, payload) = self.fetch_block(v, l)?;
                out.push(f(&payload));
            }
            return Ok(out);
        }

        let total = leaves.len();
        let feeder = pool.feeder().unwrap();
        let handle = thread::spawn(move || {
            for (i, (v, l)) in leaves.into_iter().enumerate() {
                feeder.submit(i as u64, (v, l));
            }
        });
        let mut reorder: ReorderBuffer<Result<R>> = ReorderBuffer::new((total + 1).max(1));
        let mut out = Vec::with_capacity(total);
        let mut received = 0usize;
        while received < total {
            if let Some(r) = reorder.pop_ready() {
                out.push(r?);
                continue;
            }
            let (seq, item) = pool.out_rx().recv().map_err(|_| Error::Cancelled)?;
            if seq == out.len() as u64 {
                out.push(item?);
                received += 1;
            } else {
                reorder.push(seq, item);
                received += 1;
            }
        }
        while let Some(r) = reorder.pop_ready() {
            out.push(r?);
        }
        let _ = handle.join();
        Ok(out)
    }

    /// Same as [`Reader::block_map`] but the caller promises `f` is
    /// commutative across blocks, so results are returned in whatever
    /// order they complete rather than block order.
    pub fn block_exec<F, R>(&self, query: Query, workers: usize, f: F) -> Result<Vec<R>>
    where
        F: Fn(&[u8]) -> R + Send + Sync + 'static,
        R: Send + 'static,
    {
        let (leaves, _) = self.leaves_for(&query)?;
        let inner = Arc::clone(&self.inner);
        let f = Arc::new(f);
        let total = leaves.len();
        let pool_f = Arc::clone(&f);
        let pool: WorkerPool<(u64, u64), Result<R>> = WorkerPool::new(workers, move |(v, l)| {
            let (_, payload) = fetch_block(&inner, v, l)?;
            Ok((pool_f)(&payload))
        });

        if pool.is_inline() {
            let mut out = Vec::with_capacity(total);
            for (v, l) in leaves {
                let (_, payload) = self.fetch_block(v, l)?;
                out.push(f(&payload));
            }
            return Ok(out);
        }

        let feeder = pool.feeder().unwrap();
        let handle = thread::spawn(move || {
            for (i, (v, l)) in leaves.into_iter().enumerate() {
                feeder.submit(i as u64, (v, l));
            }
        });
        let mut out = Vec::with_capacity(total);
        for _ in 0..total {
            let (_, item) = pool.out_rx().recv().map_err(|_| Error::Cancelled)?;
            out.push(item?);
        }
        let _ = handle.join();
        Ok(out)
    }
}

fn fetch_block<T: Transport>(inner: &Inner<T>, voffset: u64, length: u64) -> Result<(u8, Vec<u8>)> {
    let bytes = inner.transport.read_at(inner.header_end + voffset, length)?;
    let raw = block::parse_block(&bytes)?;
    let level = raw.level;
    let payload = block::decode_payload(&raw, inner.codec.as_ref())?;
    Ok((level, payload))
}

/// A lazy, strictly sort-ordered sequence of records matching a
/// [`Query`]. Backed either by a fully in-thread scan (`J = 0`) or by a
/// parallel decompression pool feeding a bounded reorder buffer.
pub struct RecordIter {
    query: Query,
    started: bool,
    mode: RecordIterMode,
}

enum RecordIterMode {
    Materialized(std::vec::IntoIter<Vec<u8>>),
    Streaming {
        pool: WorkerPool<(u64, u64), Result<Vec<u8>>>,
        feeder_handle: Option<thread::JoinHandle<()>>,
        reorder: ReorderBuffer<Result<Vec<u8>>>,
        total_blocks: usize,
        received_blocks: usize,
        current: std::vec::IntoIter<Vec<u8>>,
    },
}

impl RecordIter {
    fn materialized(records: Vec<Vec<u8>>, query: Query) -> Self {
        Self {
            query,
            started: false,
            mode: RecordIterMode::Materialized(records.into_iter()),
        }
    }

    fn streaming(
        pool: WorkerPool<(u64, u64), Result<Vec<u8>>>,
        feeder_handle: thread::JoinHandle<()>,
        total_blocks: usize,
        workers: usize,
        query: Query,
    ) -> Self {
        Self {
            query,
            started: false,
            mode: RecordIterMode::Streaming {
                pool,
                feeder_handle: Some(feeder_handle),
                reorder: ReorderBuffer::new((workers.max(1) * 3).max(1)),
                total_blocks,
                received_blocks: 0,
                current: Vec::new().into_iter(),
            },
        }
    }

    fn next_raw_record(&mut self) -> Option<Result<Vec<u8>>> {
        match &mut self.mode {
            RecordIterMode::Materialized(it) => it.next().map(Ok),
            RecordIterMode::Streaming {
                pool,
                feeder_handle,
                reorder,
                total_blocks,
                received_blocks,
                current,
            } => loop {
                if let Some(record) = current.next() {
                    return Some(Ok(record));
                }
                if *received_blocks >= *total_blocks {
                    return None;
                }
                // Drain the reorder buffer for the next in-sequence block.
                loop {
                    if let Some(payload_result) = reorder.pop_ready() {
                        *received_blocks += 1;
                        match payload_result {
                            Ok(payload) => {
                                let records: Result<Vec<Vec<u8>>> =
                                    crate::payload::decode_data_block(&payload)
                                        .map(|rs| rs.into_iter().map(|r| r.to_vec()).collect());
                                match records {
                                    Ok(rs) => {
                                        *current = rs.into_iter();
                                        break;
                                    }
                                    Err(e) => return Some(Err(e)),
                                }
                            }
                            Err(e) => return Some(Err(e)),
                        }
                    } else {
                        match pool.out_rx().recv() {
                            Ok((seq, item)) => {
                                reorder.push(seq, item);
                            }
                            Err(_) => {
                                if let Some(h) = feeder_handle.take() {
                                    let _ = h.join();
                                }
                                return None;
                            }
                        }
                    }
                }
            },
        }
    }
}

impl Iterator for RecordIter {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = self.next_raw_record()?;
            let record = match record {
                Ok(r) => r,
                Err(e) => return Some(Err(e)),
            };
            if record_matches(&record, &self.query) {
                self.started = true;
                return Some(Ok(record));
            } else if self.started {
                return None;
            }
            // Not yet reached the match region; keep scanning.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_bound_increments_last_byte() {
        assert_eq!(prefix_upper_bound(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_upper_bound(&[0xFF, 0xFF]), None);
        assert_eq!(prefix_upper_bound(&[0x01, 0xFF]), Some(vec![0x02]));
    }

    #[test]
    fn record_matches_plain_range() {
        let q = Query::range(Some(b"b".to_vec()), Some(b"d".to_vec()));
        assert!(!record_matches(b"a", &q));
        assert!(record_matches(b"b", &q));
        assert!(record_matches(b"c", &q));
        assert!(!record_matches(b"d", &q));
    }

    #[test]
    fn record_matches_prefix() {
        let q = Query::prefix(b"foo".to_vec());
        assert!(record_matches(b"foobar", &q));
        assert!(!record_matches(b"foa", &q));
    }
}
