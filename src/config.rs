//! Tunable options for the writer and reader, plus ambient tracing setup.
//!
//! Plain structs with a `Default` impl rather than a builder, since every
//! field here has an obvious default.

use crate::codec::CodecId;

/// Default target size, in bytes, of a block's *encoded* (pre-compression)
/// payload before the packer/level-builder cuts it and flushes.
pub const DEFAULT_APPROX_BLOCK_SIZE: usize = 384 * 1024;

#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub codec: CodecId,
    pub approx_block_size: usize,
    pub compressor_workers: usize,
    pub metadata: serde_json::Value,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            codec: CodecId::Lzma,
            approx_block_size: DEFAULT_APPROX_BLOCK_SIZE,
            compressor_workers: num_cpus(),
            metadata: serde_json::json!({}),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReaderOptions {
    /// Number of decompression worker threads for parallel range/prefix
    /// reads and `block_map`/`block_exec`. `0` runs fully in-thread.
    pub decompression_workers: usize,
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Install a process-wide `tracing` subscriber driven by `RUST_LOG` (or
/// `info` if unset). Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
