//! Compressible data generator
//!
//! Values are carved out of one pre-built buffer instead of being generated
//! per write, so that value generation costs almost nothing inside a timed
//! phase. The buffer is larger than common compression windows (32 KiB) and
//! large enough to serve every value size the harness writes.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::core::errors::{BenchError, Result};

/// Minimum size of the generator buffer
pub const GENERATOR_FLOOR: usize = 1 << 20;

/// Length of each compressible fragment appended to the buffer
const FRAGMENT_LEN: usize = 100;

/// Cyclic source of synthetic values with a target compression ratio
#[derive(Debug, Clone)]
pub struct DataGenerator {
    data: Vec<u8>,
    pos: usize,
}

impl DataGenerator {
    /// Build the buffer from `seed`; the same seed and ratio always produce
    /// the same bytes
    pub fn new(seed: u64, compression_ratio: f64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut data = Vec::with_capacity(GENERATOR_FLOOR + FRAGMENT_LEN);
        while data.len() < GENERATOR_FLOOR {
            compressible_fragment(&mut rng, compression_ratio, FRAGMENT_LEN, &mut data);
        }
        DataGenerator { data, pos: 0 }
    }

    /// Next `len` bytes of the buffer, wrapping to the start when fewer than
    /// `len` bytes remain
    pub fn generate(&mut self, len: usize) -> Result<&[u8]> {
        if len > self.data.len() {
            return Err(BenchError::ValueTooLarge {
                requested: len,
                capacity: self.data.len(),
            });
        }
        if self.pos + len > self.data.len() {
            self.pos = 0;
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.data[start..self.pos])
    }

    /// Total size of the buffer
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Current cursor position
    pub fn position(&self) -> usize {
        self.pos
    }
}

/// Append `len` bytes to `dst` of which roughly `ratio * len` are random and
/// the rest repeat them.
fn compressible_fragment(rng: &mut ChaCha8Rng, ratio: f64, len: usize, dst: &mut Vec<u8>) {
    let raw = ((len as f64 * ratio) as usize).clamp(1, len);
    let literal: Vec<u8> = (0..raw).map(|_| rng.gen_range(b' '..=b'~')).collect();

    let mut written = 0;
    while written < len {
        let take = literal.len().min(len - written);
        dst.extend_from_slice(&literal[..take]);
        written += take;
    }
}
