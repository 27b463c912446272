//! Run configuration
//!
//! A `RunConfig` is built once at startup (defaults, optionally a JSON file,
//! then command-line overrides) and is read-only for the rest of the run.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{BenchError, Result};
use crate::core::generator::GENERATOR_FLOOR;
use crate::core::key::KEY_SIZE;

/// Largest `num` whose keys all fit in `KEY_SIZE` digits
pub const MAX_NUM: u64 = 10u64.pow(KEY_SIZE as u32);

/// Whether a write blocks until it is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DurabilityMode {
    /// Return once the write is buffered
    #[default]
    Async,
    /// Return only after a persistence barrier
    Sync,
}

impl DurabilityMode {
    pub fn is_sync(self) -> bool {
        matches!(self, DurabilityMode::Sync)
    }
}

/// Immutable configuration of a benchmark run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Number of key/values to place in the database
    pub num: u64,
    /// Size of each value in bytes
    pub value_size: usize,
    /// Fraction of the original size generated values shrink to under compression
    pub compression_ratio: f64,
    /// Bytes buffered in memory before the engine writes a file
    pub write_buffer_size: usize,
    /// Record a latency histogram for each phase
    pub histogram: bool,
    /// Durability of writes in phases that do not force their own mode
    pub durability: DurabilityMode,
    /// Directory holding the database and heap-profile artifacts
    pub db_path: PathBuf,
    /// Capacity of the shared block cache in bytes
    pub cache_size: u64,
    pub max_open_files: usize,
    /// Seed for key selection and value generation
    pub seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            num: 1_000_000,
            value_size: 100,
            compression_ratio: 0.5,
            write_buffer_size: 1 << 20,
            histogram: false,
            durability: DurabilityMode::Async,
            db_path: std::env::temp_dir().join("dbbench"),
            cache_size: 200 << 20,
            max_open_files: 10_000,
            seed: 301,
        }
    }
}

impl RunConfig {
    /// Load a configuration from a JSON file; missing fields take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: RunConfig = serde_json::from_str(&text)?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a meaningful run
    pub fn validate(&self) -> Result<()> {
        if self.num == 0 {
            return Err(BenchError::Config("num must be at least 1".to_string()));
        }
        if self.num > MAX_NUM {
            return Err(BenchError::Config(format!(
                "num must be at most {} so keys stay {} digits wide, got {}",
                MAX_NUM, KEY_SIZE, self.num
            )));
        }
        if self.value_size == 0 {
            return Err(BenchError::Config("value_size must be at least 1".to_string()));
        }
        if self.value_size > GENERATOR_FLOOR {
            return Err(BenchError::ValueTooLarge {
                requested: self.value_size,
                capacity: GENERATOR_FLOOR,
            });
        }
        if !(self.compression_ratio > 0.0 && self.compression_ratio <= 1.0) {
            return Err(BenchError::Config(format!(
                "compression_ratio must be in (0, 1], got {}",
                self.compression_ratio
            )));
        }
        if self.write_buffer_size == 0 {
            return Err(BenchError::Config("write_buffer_size must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Estimated size of a value after compression
    pub fn compressed_value_size(&self) -> usize {
        (self.value_size as f64 * self.compression_ratio + 0.5) as usize
    }
}
