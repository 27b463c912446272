//! Storage engine adapter contract
//!
//! The harness drives an engine only through these traits. `Engine` covers
//! the data path (open, destroy, batched writes, lookups, cursors,
//! properties); `EngineAdmin` is the narrow administrative capability the
//! compaction and heap-profile phases need.

pub mod memory;
pub mod sled_engine;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::core::errors::StorageResult;

pub use memory::MemoryEngine;
pub use sled_engine::SledEngine;

/// Block cache shared by every engine opened during a run
#[derive(Debug)]
pub struct BlockCache {
    capacity: u64,
}

impl BlockCache {
    pub fn new(capacity: u64) -> Arc<Self> {
        Arc::new(BlockCache { capacity })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

/// Options passed to `Engine::open`
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub create_if_missing: bool,
    pub max_open_files: usize,
    pub block_cache: Option<Arc<BlockCache>>,
    /// Bytes buffered in memory before a file is written
    pub write_buffer_size: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            create_if_missing: true,
            max_open_files: 1000,
            block_cache: None,
            write_buffer_size: 4 << 20,
        }
    }
}

/// Options for a single `Engine::write`
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Block until the batch is persisted
    pub sync: bool,
}

/// Ordered list of puts applied atomically
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.entries.push((key.to_vec(), value.to_vec()));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    pub fn into_entries(self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.entries
    }
}

/// Bidirectional cursor over the engine's keys in sorted order
pub trait Cursor {
    fn seek_to_first(&mut self);
    fn seek_to_last(&mut self);
    fn valid(&self) -> bool;
    /// Move to the next key. Requires `valid()`.
    fn next(&mut self);
    /// Move to the previous key. Requires `valid()`.
    fn prev(&mut self);
    fn key(&self) -> &[u8];
    fn value(&self) -> &[u8];
    /// First error hit while moving, if any
    fn status(&self) -> StorageResult<()>;
}

/// Data path of an ordered key-value engine
pub trait Engine: Sized {
    /// Short name used in reports
    const NAME: &'static str;
    /// Prefix of the engine's property names
    const PROPERTY_PREFIX: &'static str;
    /// Number of on-disk levels the engine organizes files into
    const NUM_LEVELS: usize;

    fn open(path: &Path, options: &EngineOptions) -> StorageResult<Self>;

    /// Remove all persisted state at `path`
    fn destroy(path: &Path, options: &EngineOptions) -> StorageResult<()>;

    fn write(&mut self, options: WriteOptions, batch: WriteBatch) -> StorageResult<()>;

    /// Point lookup; a missing key is `Ok(None)`
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    fn new_cursor(&self) -> Box<dyn Cursor + '_>;

    /// Numeric property such as `<prefix>.num-files-at-level<N>`
    fn property_u64(&self, name: &str) -> Option<u64>;
}

/// Administrative operations used by the compaction and heap-profile phases
pub trait EngineAdmin {
    /// Write buffered in-memory data out to persistent structures
    fn flush_memtable(&mut self) -> StorageResult<()>;

    /// Compact the files of `level` overlapping `[begin, end]` into the next level
    fn compact_range(&mut self, level: usize, begin: &[u8], end: &[u8]) -> StorageResult<()>;

    /// Dump a heap profile to `out`. Returns `Ok(false)` when unsupported.
    fn heap_profile(&self, _out: &mut dyn Write) -> StorageResult<bool> {
        Ok(false)
    }
}

/// Name of the per-level file count property of engine `E`
pub fn files_at_level_property<E: Engine>(level: usize) -> String {
    format!("{}.num-files-at-level{}", E::PROPERTY_PREFIX, level)
}
