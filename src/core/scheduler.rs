//! Workload scheduler
//!
//! Runs an ordered list of named phases against one engine. Every phase is
//! bracketed by the latency recorder; write phases that ask for a fresh
//! database destroy and reopen the engine before their clock starts.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;
use log::{debug, info, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::core::config::RunConfig;
use crate::core::errors::{BenchError, Result, StorageError};
use crate::core::generator::DataGenerator;
use crate::core::key::format_key;
use crate::core::recorder::{LatencyRecorder, PhaseResult};
use crate::core::report;
use crate::storage::{
    files_at_level_property, BlockCache, Engine, EngineAdmin, EngineOptions, WriteBatch, WriteOptions,
};

/// Upper bound for full-range compaction; sorts after every numeric key
const COMPACT_END_KEY: &[u8] = b"~";

/// Value size written by the large-value phase
const LARGE_VALUE_SIZE: usize = 100 * 1000;

/// Prefix of heap profile artifacts in the database directory
const HEAP_PREFIX: &str = "heap-";

/// Phases in the default benchmark list
pub const DEFAULT_BENCHMARKS: &str =
    "fillseq,fillrandom,overwrite,fillsync,readseq,readreverse,readrandom,compact,readseq,readreverse,readrandom,fill100K";

/// A recognized phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Write `num` values in sequential key order into a fresh database
    FillSeq,
    /// Write `num` values in random key order into a fresh database
    FillRandom,
    /// Rewrite `num` random keys of the existing database
    Overwrite,
    /// Write `num / 100` random keys into a fresh database, syncing each write
    FillSync,
    /// Write `num / 1000` random 100 KB values into a fresh database
    Fill100K,
    ReadSeq,
    ReadReverse,
    ReadRandom,
    /// Flush the memtable and compact every populated level
    Compact,
    /// Dump a heap profile if the engine supports it
    HeapProfile,
}

impl Phase {
    pub const ALL: [Phase; 10] = [
        Phase::FillSeq,
        Phase::FillRandom,
        Phase::Overwrite,
        Phase::FillSync,
        Phase::Fill100K,
        Phase::ReadSeq,
        Phase::ReadReverse,
        Phase::ReadRandom,
        Phase::Compact,
        Phase::HeapProfile,
    ];

    /// Exact match against the phase identifiers
    pub fn from_name(name: &str) -> Option<Phase> {
        Self::ALL.iter().copied().find(|phase| phase.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::FillSeq => "fillseq",
            Phase::FillRandom => "fillrandom",
            Phase::Overwrite => "overwrite",
            Phase::FillSync => "fillsync",
            Phase::Fill100K => "fill100K",
            Phase::ReadSeq => "readseq",
            Phase::ReadReverse => "readreverse",
            Phase::ReadRandom => "readrandom",
            Phase::Compact => "compact",
            Phase::HeapProfile => "heapprofile",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered list of phase names. Names are kept verbatim so that unknown
/// ones can be reported when they are reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkSpec {
    names: Vec<String>,
}

impl BenchmarkSpec {
    /// Split a comma-separated list; empty entries are dropped and the rest
    /// are matched exactly, whitespace included
    pub fn parse(list: &str) -> Self {
        BenchmarkSpec {
            names: list
                .split(',')
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for BenchmarkSpec {
    fn default() -> Self {
        Self::parse(DEFAULT_BENCHMARKS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Order {
    Sequential,
    Random,
}

/// Database state a write phase starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineLifecycleState {
    /// Destroy and reopen an empty database first
    Fresh,
    /// Write over whatever the database holds
    Existing,
}

/// Owns the engine, the shared cache and the generator for one run
pub struct Scheduler<E: Engine + EngineAdmin> {
    // Dropped before `cache`
    engine: Option<E>,
    cache: Arc<BlockCache>,
    config: RunConfig,
    generator: DataGenerator,
    rng: ChaCha8Rng,
    recorder: LatencyRecorder,
    heap_counter: u32,
}

impl<E: Engine + EngineAdmin> Scheduler<E> {
    /// Validate `config`, clear leftovers of a previous run at `db_path` and
    /// open an empty database
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;

        let mut scheduler = Scheduler {
            engine: None,
            cache: BlockCache::new(config.cache_size),
            generator: DataGenerator::new(config.seed, config.compression_ratio),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            recorder: LatencyRecorder::new(config.histogram),
            heap_counter: 0,
            config,
        };

        scheduler.remove_heap_artifacts()?;
        E::destroy(&scheduler.config.db_path, &scheduler.engine_options())
            .map_err(|source| scheduler.open_error(source))?;
        scheduler.open()?;
        Ok(scheduler)
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// The open engine, for inspection between phases
    pub fn engine(&self) -> Option<&E> {
        self.engine.as_ref()
    }

    pub fn recorder(&self) -> &LatencyRecorder {
        &self.recorder
    }

    /// Run every phase of `spec` in order, printing a summary line for each
    /// to `out`. Unknown names are reported on stderr and skipped.
    pub fn run<W: Write>(&mut self, spec: &BenchmarkSpec, out: &mut W) -> Result<Vec<PhaseResult>> {
        let mut results = Vec::with_capacity(spec.len());
        for name in spec.iter() {
            match Phase::from_name(name) {
                Some(phase) => results.push(self.run_phase(phase, out)?),
                None => {
                    eprintln!("{} unknown benchmark '{}'", "warning:".yellow(), name);
                }
            }
        }
        Ok(results)
    }

    /// Run one phase between `start()` and `stop()` of the recorder
    pub fn run_phase<W: Write>(&mut self, phase: Phase, out: &mut W) -> Result<PhaseResult> {
        debug!("starting phase {}", phase);
        self.recorder.start();

        let num = self.config.num;
        let value_size = self.config.value_size;
        let default_writes = WriteOptions {
            sync: self.config.durability.is_sync(),
        };

        match phase {
            Phase::FillSeq => {
                self.write(default_writes, Order::Sequential, EngineLifecycleState::Fresh, num, value_size)?
            }
            Phase::FillRandom => {
                self.write(default_writes, Order::Random, EngineLifecycleState::Fresh, num, value_size)?
            }
            Phase::Overwrite => {
                self.write(default_writes, Order::Random, EngineLifecycleState::Existing, num, value_size)?
            }
            Phase::FillSync => self.write(
                WriteOptions { sync: true },
                Order::Random,
                EngineLifecycleState::Fresh,
                num / 100,
                value_size,
            )?,
            Phase::Fill100K => self.write(
                default_writes,
                Order::Random,
                EngineLifecycleState::Fresh,
                num / 1000,
                LARGE_VALUE_SIZE,
            )?,
            Phase::ReadSeq => self.read_sequential(true)?,
            Phase::ReadReverse => self.read_sequential(false)?,
            Phase::ReadRandom => self.read_random()?,
            Phase::Compact => self.compact()?,
            Phase::HeapProfile => self.heap_profile()?,
        }

        let result = self.recorder.stop(phase.name());
        report::print_phase(out, &result)?;
        Ok(result)
    }

    fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            create_if_missing: true,
            max_open_files: self.config.max_open_files,
            block_cache: Some(Arc::clone(&self.cache)),
            write_buffer_size: self.config.write_buffer_size,
        }
    }

    fn open_error(&self, source: StorageError) -> BenchError {
        BenchError::Open {
            path: self.config.db_path.clone(),
            source,
        }
    }

    fn open(&mut self) -> Result<()> {
        let engine = E::open(&self.config.db_path, &self.engine_options())
            .map_err(|source| self.open_error(source))?;
        info!("opened {} database at {}", E::NAME, self.config.db_path.display());
        self.engine = Some(engine);
        Ok(())
    }

    fn engine_mut(&mut self) -> Result<&mut E> {
        self.engine.as_mut().ok_or(BenchError::Storage(StorageError::Closed))
    }

    fn engine_ref(&self) -> Result<&E> {
        self.engine.as_ref().ok_or(BenchError::Storage(StorageError::Closed))
    }

    /// Close the engine, wipe its files and reopen it empty
    fn reopen_fresh(&mut self) -> Result<()> {
        self.engine = None;
        E::destroy(&self.config.db_path, &self.engine_options()).map_err(|source| self.open_error(source))?;
        info!("destroyed {} database at {}", E::NAME, self.config.db_path.display());
        self.open()
    }

    fn write(
        &mut self,
        options: WriteOptions,
        order: Order,
        state: EngineLifecycleState,
        num_entries: u64,
        value_size: usize,
    ) -> Result<()> {
        if state == EngineLifecycleState::Fresh {
            self.reopen_fresh()?;
            // Destroy and reopen are not part of the measurement
            self.recorder.start();
        }

        if num_entries != self.config.num {
            self.recorder.set_message(format!("({} ops)", num_entries));
        }

        let engine = self.engine.as_mut().ok_or(BenchError::Storage(StorageError::Closed))?;
        for i in 0..num_entries {
            let k = match order {
                Order::Sequential => i,
                Order::Random => self.rng.gen_range(0..self.config.num),
            };
            let key = format_key(k);
            let mut batch = WriteBatch::new();
            batch.put(key.as_bytes(), self.generator.generate(value_size)?);
            engine
                .write(options, batch)
                .map_err(|source| BenchError::Write { key: key.clone(), source })?;
            self.recorder.add_bytes((value_size + key.len()) as u64);
            self.recorder.record_op();
        }
        Ok(())
    }

    /// Walk the database from the first (or last) key, visiting at most `num` entries
    fn read_sequential(&mut self, forward: bool) -> Result<()> {
        let num = self.config.num;
        let engine = self.engine.as_ref().ok_or(BenchError::Storage(StorageError::Closed))?;
        let recorder = &mut self.recorder;

        let mut cursor = engine.new_cursor();
        if forward {
            cursor.seek_to_first();
        } else {
            cursor.seek_to_last();
        }

        let mut visited = 0;
        while visited < num && cursor.valid() {
            recorder.add_bytes((cursor.key().len() + cursor.value().len()) as u64);
            recorder.record_op();
            visited += 1;
            if forward {
                cursor.next();
            } else {
                cursor.prev();
            }
        }

        if let Err(e) = cursor.status() {
            warn!("iteration stopped after {} entries: {}", visited, e);
            recorder.append_message(&format!("(iterator error: {})", e));
        }
        Ok(())
    }

    /// Look up `num` uniformly drawn keys; misses are expected
    fn read_random(&mut self) -> Result<()> {
        let num = self.config.num;
        let engine = self.engine.as_ref().ok_or(BenchError::Storage(StorageError::Closed))?;

        let mut errors = 0u64;
        for _ in 0..num {
            let key = format_key(self.rng.gen_range(0..num));
            if engine.get(key.as_bytes()).is_err() {
                errors += 1;
            }
            self.recorder.record_op();
        }

        if errors > 0 {
            warn!("{} point lookups failed", errors);
            self.recorder.append_message(&format!("({} read errors)", errors));
        }
        Ok(())
    }

    /// Flush the memtable, then compact each level up to the deepest one
    /// holding files
    fn compact(&mut self) -> Result<()> {
        self.engine_mut()?.flush_memtable()?;

        let engine = self.engine_ref()?;
        let mut max_level_with_files = 1;
        for level in 1..E::NUM_LEVELS {
            let files = engine.property_u64(&files_at_level_property::<E>(level));
            if files.is_some_and(|n| n > 0) {
                max_level_with_files = level;
            }
        }
        debug!("compacting levels 0..{}", max_level_with_files);

        let engine = self.engine_mut()?;
        for level in 0..max_level_with_files {
            engine.compact_range(level, b"", COMPACT_END_KEY)?;
        }
        Ok(())
    }

    fn heap_profile(&mut self) -> Result<()> {
        self.heap_counter += 1;
        let path = self.config.db_path.join(format!("{}{:04}", HEAP_PREFIX, self.heap_counter));

        let file = fs::create_dir_all(&self.config.db_path).and_then(|_| File::create(&path));
        let mut file = match file {
            Ok(file) => io::BufWriter::new(file),
            Err(e) => {
                self.recorder.set_message(e.to_string());
                return Ok(());
            }
        };

        let dumped = self
            .engine_ref()?
            .heap_profile(&mut file)
            .and_then(|supported| file.flush().map(|_| supported).map_err(StorageError::from));
        drop(file);

        match dumped {
            Ok(true) => info!("heap profile written to {}", path.display()),
            Ok(false) => {
                self.recorder.set_message("not supported");
                if let Err(e) = fs::remove_file(&path) {
                    self.recorder.append_message(&e.to_string());
                }
            }
            Err(e) => {
                warn!("heap profile to {} failed: {}", path.display(), e);
                self.recorder.set_message(e.to_string());
            }
        }
        Ok(())
    }

    /// Heap profile artifacts written so far
    pub fn heap_profile_path(&self, n: u32) -> PathBuf {
        self.config.db_path.join(format!("{}{:04}", HEAP_PREFIX, n))
    }

    fn remove_heap_artifacts(&self) -> Result<()> {
        let entries = match fs::read_dir(&self.config.db_path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(HEAP_PREFIX) {
                debug!("removing stale {}", entry.path().display());
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

impl<E: Engine + EngineAdmin> Drop for Scheduler<E> {
    fn drop(&mut self) {
        // Database handle first, then the cache it references
        if self.engine.take().is_some() {
            debug!("closed {} database", E::NAME);
        }
        debug!("releasing block cache ({} strong refs)", Arc::strong_count(&self.cache));
    }
}
