//! kvbench: a workload-driven benchmark harness for ordered key-value engines
//!
//! A run is an ordered list of named phases (`fillseq`, `readrandom`,
//! `compact`, ...). The scheduler drives an engine through the adapter traits
//! in [`storage`], times every operation with the latency recorder and prints
//! one summary line per phase.

pub mod core;
pub mod storage;

pub use crate::core::config::{DurabilityMode, RunConfig};
pub use crate::core::errors::{BenchError, Result, StorageError};
pub use crate::core::generator::DataGenerator;
pub use crate::core::histogram::Histogram;
pub use crate::core::key::{format_key, KEY_SIZE};
pub use crate::core::recorder::{LatencyRecorder, PhaseResult};
pub use crate::core::scheduler::{BenchmarkSpec, EngineLifecycleState, Phase, Scheduler, DEFAULT_BENCHMARKS};
pub use crate::storage::{Cursor, Engine, EngineAdmin, MemoryEngine, SledEngine};
