// src/storage/sled_engine.rs

use std::fs;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use log::{debug, info};
use sled::{Batch, Db, IVec};

use crate::core::errors::{StorageError, StorageResult};
use crate::storage::{Cursor, Engine, EngineAdmin, EngineOptions, WriteBatch, WriteOptions};

/// Sub-directory of the database path that holds sled's files, so that
/// other artifacts in the database path survive `destroy`
const DATA_DIR: &str = "sled";

/// sled's default page cache size, used when no block cache is shared
const DEFAULT_CACHE_CAPACITY: u64 = 1 << 30;

/// Engine adapter over a sled database
pub struct SledEngine {
    db: Db,
    path: PathBuf,
}

impl SledEngine {
    fn data_dir(path: &Path) -> PathBuf {
        path.join(DATA_DIR)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Engine for SledEngine {
    const NAME: &'static str = "sled";
    const PROPERTY_PREFIX: &'static str = "sled";
    // sled keeps a single log-structured tree
    const NUM_LEVELS: usize = 1;

    fn open(path: &Path, options: &EngineOptions) -> StorageResult<Self> {
        let data_dir = Self::data_dir(path);
        if !options.create_if_missing && !data_dir.exists() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", data_dir.display()),
            )));
        }

        let cache_capacity = options
            .block_cache
            .as_ref()
            .map_or(DEFAULT_CACHE_CAPACITY, |cache| cache.capacity());
        debug!(
            "sled: cache_capacity={} (max_open_files={} and write_buffer_size={} have no sled equivalent)",
            cache_capacity, options.max_open_files, options.write_buffer_size
        );

        let db = sled::Config::new()
            .path(&data_dir)
            .cache_capacity(cache_capacity)
            .open()?;
        info!("sled: opened {}", data_dir.display());

        Ok(SledEngine {
            db,
            path: path.to_path_buf(),
        })
    }

    fn destroy(path: &Path, _options: &EngineOptions) -> StorageResult<()> {
        let data_dir = Self::data_dir(path);
        if data_dir.exists() {
            fs::remove_dir_all(&data_dir)?;
            info!("sled: destroyed {}", data_dir.display());
        }
        Ok(())
    }

    fn write(&mut self, options: WriteOptions, batch: WriteBatch) -> StorageResult<()> {
        let mut sled_batch = Batch::default();
        for (key, value) in batch.into_entries() {
            sled_batch.insert(key, value);
        }
        self.db.apply_batch(sled_batch)?;

        if options.sync {
            self.db.flush()?;
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn new_cursor(&self) -> Box<dyn Cursor + '_> {
        Box::new(SledCursor {
            db: &self.db,
            iter: None,
            forward: true,
            current: None,
            error: None,
        })
    }

    fn property_u64(&self, name: &str) -> Option<u64> {
        let rest = name.strip_prefix(Self::PROPERTY_PREFIX)?.strip_prefix('.')?;
        match rest {
            "size-on-disk" => self.db.size_on_disk().ok(),
            "num-entries" => Some(self.db.len() as u64),
            _ => None,
        }
    }
}

impl EngineAdmin for SledEngine {
    fn flush_memtable(&mut self) -> StorageResult<()> {
        let bytes = self.db.flush()?;
        debug!("sled: flushed {} bytes", bytes);
        Ok(())
    }

    /// sled compacts its log in the background; the closest explicit
    /// request is to flush dirty pages.
    fn compact_range(&mut self, _level: usize, _begin: &[u8], _end: &[u8]) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// Cursor over a sled tree. A sled iterator only moves inward from both
/// ends, so changing direction restarts a range from the current key.
struct SledCursor<'a> {
    db: &'a Db,
    iter: Option<sled::Iter>,
    forward: bool,
    current: Option<(IVec, IVec)>,
    error: Option<sled::Error>,
}

impl<'a> SledCursor<'a> {
    fn advance(&mut self) {
        let item = match self.iter.as_mut() {
            Some(iter) if self.forward => iter.next(),
            Some(iter) => iter.next_back(),
            None => None,
        };
        self.current = match item {
            Some(Ok(kv)) => Some(kv),
            Some(Err(e)) => {
                self.error = Some(e);
                None
            }
            None => None,
        };
    }
}

impl<'a> Cursor for SledCursor<'a> {
    fn seek_to_first(&mut self) {
        self.iter = Some(self.db.iter());
        self.forward = true;
        self.advance();
    }

    fn seek_to_last(&mut self) {
        self.iter = Some(self.db.iter());
        self.forward = false;
        self.advance();
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) {
        if !self.forward {
            if let Some((key, _)) = self.current.take() {
                self.iter = Some(self.db.range::<IVec, _>((Bound::Excluded(key), Bound::Unbounded)));
            }
            self.forward = true;
        }
        self.advance();
    }

    fn prev(&mut self) {
        if self.forward {
            if let Some((key, _)) = self.current.take() {
                self.iter = Some(self.db.range::<IVec, _>(..key));
            }
            self.forward = false;
        }
        self.advance();
    }

    fn key(&self) -> &[u8] {
        match &self.current {
            Some((k, _)) => &k[..],
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match &self.current {
            Some((_, v)) => &v[..],
            None => &[],
        }
    }

    fn status(&self) -> StorageResult<()> {
        match &self.error {
            Some(e) => Err(StorageError::Sled(e.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BlockCache;

    fn options() -> EngineOptions {
        EngineOptions {
            block_cache: Some(BlockCache::new(8 << 20)),
            ..EngineOptions::default()
        }
    }

    fn put(engine: &mut SledEngine, key: &str, value: &str, sync: bool) {
        let mut batch = WriteBatch::new();
        batch.put(key.as_bytes(), value.as_bytes());
        engine.write(WriteOptions { sync }, batch).unwrap();
    }

    #[test]
    fn test_put_get() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = SledEngine::open(dir.path(), &options()).unwrap();
        put(&mut engine, "0000000000000001", "one", false);
        put(&mut engine, "0000000000000002", "two", true);

        assert_eq!(engine.get(b"0000000000000002").unwrap(), Some(b"two".to_vec()));
        assert_eq!(engine.get(b"0000000000000003").unwrap(), None);
        assert_eq!(engine.property_u64("sled.num-entries"), Some(2));
        assert_eq!(engine.property_u64("sled.num-files-at-level0"), None);
    }

    #[test]
    fn test_destroy_keeps_other_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut engine = SledEngine::open(dir.path(), &options()).unwrap();
            put(&mut engine, "a", "1", true);
        }
        fs::write(dir.path().join("heap-0001"), b"profile").unwrap();

        SledEngine::destroy(dir.path(), &options()).unwrap();
        assert!(dir.path().join("heap-0001").exists());

        let engine = SledEngine::open(dir.path(), &options()).unwrap();
        assert_eq!(engine.get(b"a").unwrap(), None);
    }

    #[test]
    fn test_open_without_create_fails() {
        let dir = tempfile::tempdir().unwrap();
        let options = EngineOptions {
            create_if_missing: false,
            ..options()
        };
        assert!(SledEngine::open(dir.path(), &options).is_err());
    }

    #[test]
    fn test_cursor_both_directions() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = SledEngine::open(dir.path(), &options()).unwrap();
        for key in ["b", "d", "a", "c"] {
            put(&mut engine, key, key, false);
        }

        let mut cursor = engine.new_cursor();
        cursor.seek_to_first();
        let mut forward = Vec::new();
        while cursor.valid() {
            forward.push(cursor.key().to_vec());
            cursor.next();
        }
        assert_eq!(forward, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);

        cursor.seek_to_last();
        assert_eq!(cursor.key(), b"d");
        cursor.prev();
        cursor.prev();
        assert_eq!(cursor.key(), b"b");
        cursor.next();
        assert_eq!(cursor.key(), b"c");
        assert_eq!(cursor.value(), b"c");
        cursor.prev();
        assert_eq!(cursor.key(), b"b");
        assert!(cursor.status().is_ok());
    }

    #[test]
    fn test_admin_operations() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = SledEngine::open(dir.path(), &options()).unwrap();
        put(&mut engine, "k", "v", false);
        engine.flush_memtable().unwrap();
        engine.compact_range(0, b"", b"~").unwrap();

        let mut out = Vec::new();
        assert!(!engine.heap_profile(&mut out).unwrap());
        assert!(out.is_empty());
    }
}
