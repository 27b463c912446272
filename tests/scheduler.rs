use std::collections::BTreeSet;
use std::path::Path;

use kvbench::core::errors::StorageResult;
use kvbench::storage::{files_at_level_property, EngineOptions, WriteBatch, WriteOptions};
use kvbench::{
    format_key, BenchError, BenchmarkSpec, Cursor, Engine, EngineAdmin, MemoryEngine, Phase, RunConfig,
    Scheduler, SledEngine, StorageError,
};

fn config(dir: &tempfile::TempDir, num: u64) -> RunConfig {
    RunConfig {
        num,
        value_size: 100,
        compression_ratio: 0.5,
        write_buffer_size: 8 << 10,
        db_path: dir.path().join("dbbench"),
        ..RunConfig::default()
    }
}

fn keys_forward<E: Engine>(engine: &E) -> Vec<Vec<u8>> {
    let mut cursor = engine.new_cursor();
    let mut keys = Vec::new();
    cursor.seek_to_first();
    while cursor.valid() {
        keys.push(cursor.key().to_vec());
        cursor.next();
    }
    keys
}

fn keys_reverse<E: Engine>(engine: &E) -> Vec<Vec<u8>> {
    let mut cursor = engine.new_cursor();
    let mut keys = Vec::new();
    cursor.seek_to_last();
    while cursor.valid() {
        keys.push(cursor.key().to_vec());
        cursor.prev();
    }
    keys
}

fn level_files(engine: &MemoryEngine) -> Vec<Option<u64>> {
    (0..MemoryEngine::NUM_LEVELS)
        .map(|level| engine.property_u64(&files_at_level_property::<MemoryEngine>(level)))
        .collect()
}

#[test]
fn fillseq_then_readseq_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let mut scheduler = Scheduler::<MemoryEngine>::new(config(&dir, 1000)).unwrap();
    let mut out = Vec::new();

    let results = scheduler.run(&BenchmarkSpec::parse("fillseq,readseq"), &mut out).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].ops, 1000);

    let read = &results[1];
    assert_eq!(read.ops, 1000);
    assert_eq!(read.bytes, 1000 * (16 + 100));

    let keys = keys_forward(scheduler.engine().unwrap());
    let expected: Vec<Vec<u8>> = (0..1000).map(|i| format_key(i).into_bytes()).collect();
    assert_eq!(keys, expected);
    assert_eq!(keys[0], b"0000000000000000");
    assert_eq!(keys[999], b"0000000000000999");

    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert!(lines[0].starts_with("fillseq      :"));
    assert!(lines[0].contains(" micros/op; "));
    assert!(lines[0].ends_with(" MB/s"));
    assert!(lines[1].starts_with("readseq      :"));
}

#[test]
fn readseq_and_readreverse_agree() {
    let dir = tempfile::tempdir().unwrap();
    let mut scheduler = Scheduler::<MemoryEngine>::new(config(&dir, 800)).unwrap();
    let mut out = Vec::new();

    let results = scheduler
        .run(&BenchmarkSpec::parse("fillrandom,readseq,readreverse"), &mut out)
        .unwrap();
    assert_eq!(results[1].ops, results[2].ops);
    assert_eq!(results[1].bytes, results[2].bytes);

    let engine = scheduler.engine().unwrap();
    let forward = keys_forward(engine);
    let mut reverse = keys_reverse(engine);
    reverse.reverse();
    assert_eq!(forward, reverse);
    assert!(forward.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn overwrite_keeps_distinct_key_count() {
    let dir = tempfile::tempdir().unwrap();
    let mut scheduler = Scheduler::<MemoryEngine>::new(config(&dir, 500)).unwrap();
    let mut out = Vec::new();

    scheduler.run_phase(Phase::FillSeq, &mut out).unwrap();
    let before: BTreeSet<Vec<u8>> = keys_forward(scheduler.engine().unwrap()).into_iter().collect();

    let overwrite = scheduler.run_phase(Phase::Overwrite, &mut out).unwrap();
    assert_eq!(overwrite.ops, 500);
    assert!(overwrite.message.is_none());
    let after: BTreeSet<Vec<u8>> = keys_forward(scheduler.engine().unwrap()).into_iter().collect();

    assert_eq!(before, after);
    assert_eq!(scheduler.engine().unwrap().stats().writes, 1000);
}

#[test]
fn compaction_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut scheduler = Scheduler::<MemoryEngine>::new(config(&dir, 3000)).unwrap();
    let mut out = Vec::new();

    scheduler.run_phase(Phase::FillRandom, &mut out).unwrap();
    let keys_before = keys_forward(scheduler.engine().unwrap());

    let compact = scheduler.run_phase(Phase::Compact, &mut out).unwrap();
    assert_eq!(compact.ops, 1);
    assert_eq!(compact.bytes, 0);
    let first = level_files(scheduler.engine().unwrap());
    assert_eq!(first[0], Some(0));

    scheduler.run_phase(Phase::Compact, &mut out).unwrap();
    let second = level_files(scheduler.engine().unwrap());
    assert_eq!(first, second);

    assert_eq!(keys_forward(scheduler.engine().unwrap()), keys_before);
}

#[test]
fn histogram_counts_match_ops() {
    let dir = tempfile::tempdir().unwrap();
    let config = RunConfig {
        histogram: true,
        ..config(&dir, 400)
    };
    let mut scheduler = Scheduler::<MemoryEngine>::new(config).unwrap();
    let mut out = Vec::new();

    let results = scheduler
        .run(&BenchmarkSpec::parse("fillseq,readrandom,fillsync"), &mut out)
        .unwrap();
    for result in &results {
        assert_eq!(result.histogram.as_ref().unwrap().count(), result.ops, "{}", result.name);
    }
    assert!(String::from_utf8(out).unwrap().contains("Microseconds per op:\nCount: 400"));
}

#[test]
fn histogram_disabled_records_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut scheduler = Scheduler::<MemoryEngine>::new(config(&dir, 200)).unwrap();
    let mut out = Vec::new();

    let result = scheduler.run_phase(Phase::FillSeq, &mut out).unwrap();
    assert!(result.histogram.is_none());
    assert_eq!(scheduler.recorder().histogram().count(), 0);
}

#[test]
fn sled_default_benchmarks() {
    let dir = tempfile::tempdir().unwrap();
    let mut scheduler = Scheduler::<SledEngine>::new(config(&dir, 2000)).unwrap();
    let mut out = Vec::new();

    let results = scheduler.run(&BenchmarkSpec::default(), &mut out).unwrap();
    let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "fillseq",
            "fillrandom",
            "overwrite",
            "fillsync",
            "readseq",
            "readreverse",
            "readrandom",
            "compact",
            "readseq",
            "readreverse",
            "readrandom",
            "fill100K"
        ]
    );

    // fillsync left a fresh database with at most 20 keys
    assert!(results[4].ops <= 20);
    assert_eq!(results[4].ops, results[5].ops);
    assert_eq!(results[8].ops, results[4].ops);
    assert_eq!(results[6].ops, 2000);
    assert_eq!(results[11].message.as_deref(), Some("(2 ops)"));
    assert_eq!(String::from_utf8(out).unwrap().lines().count(), 12);
}

#[test]
fn sled_fillseq_readreverse() {
    let dir = tempfile::tempdir().unwrap();
    let mut scheduler = Scheduler::<SledEngine>::new(config(&dir, 300)).unwrap();
    let mut out = Vec::new();

    let results = scheduler.run(&BenchmarkSpec::parse("fillseq,readreverse"), &mut out).unwrap();
    assert_eq!(results[1].ops, 300);
    assert_eq!(results[1].bytes, 300 * 116);

    let reverse = keys_reverse(scheduler.engine().unwrap());
    assert_eq!(reverse.first().unwrap(), format_key(299).as_bytes());
    assert_eq!(reverse.last().unwrap(), format_key(0).as_bytes());
}

#[test]
fn sled_heap_profile_not_supported() {
    let dir = tempfile::tempdir().unwrap();
    let mut scheduler = Scheduler::<SledEngine>::new(config(&dir, 10)).unwrap();
    let mut out = Vec::new();

    let result = scheduler.run_phase(Phase::HeapProfile, &mut out).unwrap();
    assert_eq!(result.message.as_deref(), Some("not supported"));
    assert!(!scheduler.heap_profile_path(1).exists());
    assert!(String::from_utf8(out).unwrap().ends_with("micros/op; not supported\n"));
}

/// Engine that fails every write after the first `budget`, or every open
/// when the path ends in `unopenable`
struct FailingEngine {
    budget: u64,
}

struct EmptyCursor;

impl Cursor for EmptyCursor {
    fn seek_to_first(&mut self) {}
    fn seek_to_last(&mut self) {}
    fn valid(&self) -> bool {
        false
    }
    fn next(&mut self) {}
    fn prev(&mut self) {}
    fn key(&self) -> &[u8] {
        &[]
    }
    fn value(&self) -> &[u8] {
        &[]
    }
    fn status(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl Engine for FailingEngine {
    const NAME: &'static str = "failing";
    const PROPERTY_PREFIX: &'static str = "failing";
    const NUM_LEVELS: usize = 1;

    fn open(path: &Path, _options: &EngineOptions) -> StorageResult<Self> {
        if path.ends_with("unopenable") {
            return Err(StorageError::Corruption("cannot open".to_string()));
        }
        Ok(FailingEngine { budget: 5 })
    }

    fn destroy(_path: &Path, _options: &EngineOptions) -> StorageResult<()> {
        Ok(())
    }

    fn write(&mut self, _options: WriteOptions, _batch: WriteBatch) -> StorageResult<()> {
        if self.budget == 0 {
            return Err(StorageError::Corruption("disk full".to_string()));
        }
        self.budget -= 1;
        Ok(())
    }

    fn get(&self, _key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(None)
    }

    fn new_cursor(&self) -> Box<dyn Cursor + '_> {
        Box::new(EmptyCursor)
    }

    fn property_u64(&self, _name: &str) -> Option<u64> {
        None
    }
}

impl EngineAdmin for FailingEngine {
    fn flush_memtable(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn compact_range(&mut self, _level: usize, _begin: &[u8], _end: &[u8]) -> StorageResult<()> {
        Ok(())
    }
}

#[test]
fn write_failure_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut scheduler = Scheduler::<FailingEngine>::new(config(&dir, 100)).unwrap();
    let mut out = Vec::new();

    let err = scheduler
        .run(&BenchmarkSpec::parse("readrandom,fillseq,readseq"), &mut out)
        .unwrap_err();
    match err {
        BenchError::Write { key, .. } => assert_eq!(key, format_key(5)),
        other => panic!("unexpected error: {}", other),
    }

    // Only the phase before the failure reported
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.lines().count(), 1);
    assert!(text.starts_with("readrandom"));
}

#[test]
fn open_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let config = RunConfig {
        db_path: dir.path().join("unopenable"),
        ..config(&dir, 10)
    };
    let err = Scheduler::<FailingEngine>::new(config).err().unwrap();
    assert!(matches!(err, BenchError::Open { .. }));
    assert!(err.to_string().starts_with("open error:"));
}
