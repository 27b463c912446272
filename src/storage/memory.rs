//! In-memory leveled engine
//!
//! Writes land in a sorted memtable. Once the memtable holds
//! `write_buffer_size` bytes it is frozen into a level-0 table; level-0
//! tables may overlap, tables on deeper levels never do. Compaction merges a
//! level's tables into the next level, newest value winning. Nothing is
//! persisted: every `open` starts empty.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use log::debug;

use crate::core::errors::StorageResult;
use crate::storage::{Cursor, Engine, EngineAdmin, EngineOptions, WriteBatch, WriteOptions};

const NUM_LEVELS: usize = 7;
/// Level-0 table count that triggers a compaction into level 1
const L0_COMPACTION_TRIGGER: usize = 4;
const TARGET_FILE_SIZE: usize = 2 << 20;
const LEVEL1_MAX_BYTES: usize = 10 << 20;

type Entry = (Vec<u8>, Vec<u8>);

/// Sorted, immutable run of entries
#[derive(Debug)]
struct Table {
    entries: Vec<Entry>,
    bytes: usize,
}

impl Table {
    fn new(entries: Vec<Entry>) -> Self {
        let bytes = entries.iter().map(|(k, v)| k.len() + v.len()).sum();
        Table { entries, bytes }
    }

    fn smallest(&self) -> &[u8] {
        &self.entries[0].0
    }

    fn largest(&self) -> &[u8] {
        &self.entries[self.entries.len() - 1].0
    }

    fn overlaps(&self, begin: &[u8], end: &[u8]) -> bool {
        self.largest() >= begin && self.smallest() <= end
    }

    fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries
            .binary_search_by(|(k, _)| k.as_slice().cmp(key))
            .ok()
            .map(|i| self.entries[i].1.as_slice())
    }

    fn first_after(&self, after: Option<&[u8]>) -> Option<(&[u8], &[u8])> {
        let idx = match after {
            None => 0,
            Some(k) => self.entries.partition_point(|(ek, _)| ek.as_slice() <= k),
        };
        self.entries.get(idx).map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    fn last_before(&self, before: Option<&[u8]>) -> Option<(&[u8], &[u8])> {
        let idx = match before {
            None => self.entries.len(),
            Some(k) => self.entries.partition_point(|(ek, _)| ek.as_slice() < k),
        };
        idx.checked_sub(1)
            .map(|i| (self.entries[i].0.as_slice(), self.entries[i].1.as_slice()))
    }
}

/// Operation counters of a `MemoryEngine`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub writes: u64,
    pub syncs: u64,
    pub flushes: u64,
    pub compactions: u64,
}

/// Leveled in-memory engine
#[derive(Debug)]
pub struct MemoryEngine {
    path: PathBuf,
    write_buffer_size: usize,
    memtable: BTreeMap<Vec<u8>, Vec<u8>>,
    memtable_bytes: usize,
    /// Level 0 is ordered oldest first; deeper levels by smallest key
    levels: Vec<Vec<Table>>,
    stats: MemoryStats,
}

impl MemoryEngine {
    pub fn stats(&self) -> MemoryStats {
        self.stats
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_files_at_level(&self, level: usize) -> usize {
        self.levels.get(level).map_or(0, Vec::len)
    }

    fn level_bytes(&self, level: usize) -> usize {
        self.levels[level].iter().map(|t| t.bytes).sum()
    }

    fn max_bytes_for_level(level: usize) -> usize {
        LEVEL1_MAX_BYTES * 10usize.pow(level.saturating_sub(1) as u32)
    }

    /// Freeze the memtable into a level-0 table. Returns whether a table was written.
    fn freeze_memtable(&mut self) -> bool {
        if self.memtable.is_empty() {
            return false;
        }
        let entries: Vec<Entry> = std::mem::take(&mut self.memtable).into_iter().collect();
        self.memtable_bytes = 0;
        self.levels[0].push(Table::new(entries));
        self.stats.flushes += 1;
        true
    }

    fn maybe_compact(&mut self) {
        'outer: loop {
            if self.levels[0].len() >= L0_COMPACTION_TRIGGER {
                self.compact_level(0, None);
                continue;
            }
            for level in 1..NUM_LEVELS - 1 {
                if self.level_bytes(level) > Self::max_bytes_for_level(level) {
                    self.compact_level(level, None);
                    continue 'outer;
                }
            }
            break;
        }
    }

    /// Merge the tables of `level` overlapping `range` with the overlapping
    /// tables of `level + 1`
    fn compact_level(&mut self, level: usize, range: Option<(&[u8], &[u8])>) {
        if level + 1 >= NUM_LEVELS {
            return;
        }
        let inputs: Vec<usize> = self.levels[level]
            .iter()
            .enumerate()
            .filter(|(_, t)| range.map_or(true, |(b, e)| t.overlaps(b, e)))
            .map(|(i, _)| i)
            .collect();
        if inputs.is_empty() {
            return;
        }

        let mut begin = self.levels[level][inputs[0]].smallest().to_vec();
        let mut end = self.levels[level][inputs[0]].largest().to_vec();
        for &i in &inputs[1..] {
            let table = &self.levels[level][i];
            if table.smallest() < begin.as_slice() {
                begin = table.smallest().to_vec();
            }
            if table.largest() > end.as_slice() {
                end = table.largest().to_vec();
            }
        }

        let next = std::mem::take(&mut self.levels[level + 1]);
        let (older, untouched): (Vec<Table>, Vec<Table>) =
            next.into_iter().partition(|t| t.overlaps(&begin, &end));

        // Older tables go in first so that newer values overwrite them
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for table in older {
            merged.extend(table.entries);
        }
        let mut current = std::mem::take(&mut self.levels[level]);
        let mut kept = Vec::with_capacity(current.len() - inputs.len());
        for (i, table) in current.drain(..).enumerate() {
            if inputs.contains(&i) {
                merged.extend(table.entries);
            } else {
                kept.push(table);
            }
        }
        self.levels[level] = kept;

        let mut outputs = untouched;
        let mut chunk = Vec::new();
        let mut chunk_bytes = 0;
        for (k, v) in merged {
            chunk_bytes += k.len() + v.len();
            chunk.push((k, v));
            if chunk_bytes >= TARGET_FILE_SIZE {
                outputs.push(Table::new(std::mem::take(&mut chunk)));
                chunk_bytes = 0;
            }
        }
        if !chunk.is_empty() {
            outputs.push(Table::new(chunk));
        }
        outputs.sort_by(|a, b| a.smallest().cmp(b.smallest()));
        self.levels[level + 1] = outputs;
        self.stats.compactions += 1;

        debug!(
            "memory engine: compacted {} table(s) from level {} into level {} ({} tables)",
            inputs.len(),
            level,
            level + 1,
            self.levels[level + 1].len()
        );
    }
}

impl Engine for MemoryEngine {
    const NAME: &'static str = "memory";
    const PROPERTY_PREFIX: &'static str = "memory";
    const NUM_LEVELS: usize = NUM_LEVELS;

    fn open(path: &Path, options: &EngineOptions) -> StorageResult<Self> {
        if options.create_if_missing {
            fs::create_dir_all(path)?;
        }
        Ok(MemoryEngine {
            path: path.to_path_buf(),
            write_buffer_size: options.write_buffer_size.max(1),
            memtable: BTreeMap::new(),
            memtable_bytes: 0,
            levels: (0..NUM_LEVELS).map(|_| Vec::new()).collect(),
            stats: MemoryStats::default(),
        })
    }

    fn destroy(_path: &Path, _options: &EngineOptions) -> StorageResult<()> {
        Ok(())
    }

    fn write(&mut self, options: WriteOptions, batch: WriteBatch) -> StorageResult<()> {
        for (key, value) in batch.into_entries() {
            let key_len = key.len();
            self.memtable_bytes += key_len + value.len();
            if let Some(replaced) = self.memtable.insert(key, value) {
                self.memtable_bytes -= key_len + replaced.len();
            }
        }
        self.stats.writes += 1;
        if options.sync {
            self.stats.syncs += 1;
        }
        if self.memtable_bytes >= self.write_buffer_size && self.freeze_memtable() {
            self.maybe_compact();
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        if let Some(v) = self.memtable.get(key) {
            return Ok(Some(v.clone()));
        }
        for table in self.levels[0].iter().rev() {
            if let Some(v) = table.get(key) {
                return Ok(Some(v.to_vec()));
            }
        }
        for level in &self.levels[1..] {
            let idx = level.partition_point(|t| t.largest() < key);
            if let Some(v) = level.get(idx).and_then(|t| t.get(key)) {
                return Ok(Some(v.to_vec()));
            }
        }
        Ok(None)
    }

    fn new_cursor(&self) -> Box<dyn Cursor + '_> {
        Box::new(MemoryCursor {
            engine: self,
            current: None,
        })
    }

    fn property_u64(&self, name: &str) -> Option<u64> {
        let rest = name.strip_prefix(Self::PROPERTY_PREFIX)?.strip_prefix('.')?;
        if let Some(level) = rest.strip_prefix("num-files-at-level") {
            let level: usize = level.parse().ok()?;
            return self.levels.get(level).map(|l| l.len() as u64);
        }
        match rest {
            "memtable-bytes" => Some(self.memtable_bytes as u64),
            "total-bytes" => Some((0..NUM_LEVELS).map(|l| self.level_bytes(l)).sum::<usize>() as u64),
            _ => None,
        }
    }
}

impl EngineAdmin for MemoryEngine {
    fn flush_memtable(&mut self) -> StorageResult<()> {
        if self.freeze_memtable() {
            self.maybe_compact();
        }
        Ok(())
    }

    fn compact_range(&mut self, level: usize, begin: &[u8], end: &[u8]) -> StorageResult<()> {
        self.compact_level(level, Some((begin, end)));
        Ok(())
    }

    fn heap_profile(&self, out: &mut dyn Write) -> StorageResult<bool> {
        writeln!(
            out,
            "memtable: {} entries, {} bytes",
            self.memtable.len(),
            self.memtable_bytes
        )?;
        for (level, tables) in self.levels.iter().enumerate() {
            let entries: usize = tables.iter().map(|t| t.entries.len()).sum();
            writeln!(
                out,
                "level {}: {} tables, {} entries, {} bytes",
                level,
                tables.len(),
                entries,
                self.level_bytes(level)
            )?;
        }
        Ok(true)
    }
}

/// Merging cursor over the memtable and every level. Positions are found
/// by searching each source relative to the current key, so direction
/// changes need no extra state.
struct MemoryCursor<'a> {
    engine: &'a MemoryEngine,
    current: Option<(&'a [u8], &'a [u8])>,
}

impl<'a> MemoryCursor<'a> {
    /// Sources in priority order: the first source holding a key owns it
    fn candidates(&self, forward: bool, anchor: Option<&[u8]>) -> Vec<(&'a [u8], &'a [u8])> {
        let engine = self.engine;
        let mut found = Vec::new();

        let mem = if forward {
            match anchor {
                None => engine.memtable.iter().next(),
                Some(k) => engine
                    .memtable
                    .range::<[u8], _>((Bound::Excluded(k), Bound::Unbounded))
                    .next(),
            }
        } else {
            match anchor {
                None => engine.memtable.iter().next_back(),
                Some(k) => engine
                    .memtable
                    .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(k)))
                    .next_back(),
            }
        };
        found.extend(mem.map(|(k, v)| (k.as_slice(), v.as_slice())));

        for table in engine.levels[0].iter().rev() {
            let hit = if forward { table.first_after(anchor) } else { table.last_before(anchor) };
            found.extend(hit);
        }

        for level in &engine.levels[1..] {
            let hit = if forward {
                let idx = match anchor {
                    None => 0,
                    Some(k) => level.partition_point(|t| t.largest() <= k),
                };
                level.get(idx).and_then(|t| t.first_after(anchor))
            } else {
                let idx = match anchor {
                    None => level.len(),
                    Some(k) => level.partition_point(|t| t.smallest() < k),
                };
                idx.checked_sub(1).and_then(|i| level[i].last_before(anchor))
            };
            found.extend(hit);
        }
        found
    }

    fn step(&mut self, forward: bool, anchor: Option<&[u8]>) {
        let mut best: Option<(&'a [u8], &'a [u8])> = None;
        for candidate in self.candidates(forward, anchor) {
            let better = match best {
                None => true,
                Some((k, _)) if forward => candidate.0 < k,
                Some((k, _)) => candidate.0 > k,
            };
            if better {
                best = Some(candidate);
            }
        }
        self.current = best;
    }
}

impl<'a> Cursor for MemoryCursor<'a> {
    fn seek_to_first(&mut self) {
        self.step(true, None);
    }

    fn seek_to_last(&mut self) {
        self.step(false, None);
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) {
        if let Some((key, _)) = self.current {
            self.step(true, Some(key));
        }
    }

    fn prev(&mut self) {
        if let Some((key, _)) = self.current {
            self.step(false, Some(key));
        }
    }

    fn key(&self) -> &[u8] {
        match self.current {
            Some((k, _)) => k,
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match self.current {
            Some((_, v)) => v,
            None => &[],
        }
    }

    fn status(&self) -> StorageResult<()> {
        Ok(())
    }
}
