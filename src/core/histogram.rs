//! Bucketed latency histogram
//!
//! Samples are microseconds. Bucket limits grow roughly geometrically
//! (1, 2, .., 10, 12, 14, .., 20, 25, .., 50, 60, .., 100, 120, ..), which keeps
//! relative resolution constant across magnitudes.

use std::fmt;
use std::sync::OnceLock;

use serde::Serialize;

/// Steps within each decade above 10
const DECADE_STEPS: [f64; 16] = [
    1.2, 1.4, 1.6, 1.8, 2.0, 2.5, 3.0, 3.5, 4.0, 4.5, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0,
];

/// Highest decade with its own buckets; larger samples share the last bucket
const MAX_DECADE: u32 = 10;

fn bucket_limits() -> &'static [f64] {
    static LIMITS: OnceLock<Vec<f64>> = OnceLock::new();
    LIMITS.get_or_init(|| {
        let mut limits: Vec<f64> = (1..=10).map(f64::from).collect();
        for exp in 1..MAX_DECADE {
            let decade = 10f64.powi(exp as i32);
            limits.extend(DECADE_STEPS.iter().map(|step| (step * decade).round()));
        }
        limits.push(f64::MAX);
        limits
    })
}

/// Distribution of per-operation latencies
#[derive(Debug, Clone, Serialize)]
pub struct Histogram {
    min: f64,
    max: f64,
    num: u64,
    sum: f64,
    sum_squares: f64,
    #[serde(skip)]
    buckets: Vec<u64>,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    pub fn new() -> Self {
        Histogram {
            min: f64::MAX,
            max: 0.0,
            num: 0,
            sum: 0.0,
            sum_squares: 0.0,
            buckets: vec![0; bucket_limits().len()],
        }
    }

    /// Forget every sample
    pub fn clear(&mut self) {
        self.min = f64::MAX;
        self.max = 0.0;
        self.num = 0;
        self.sum = 0.0;
        self.sum_squares = 0.0;
        self.buckets.iter_mut().for_each(|b| *b = 0);
    }

    /// Record one sample in microseconds
    pub fn add(&mut self, micros: f64) {
        let limits = bucket_limits();
        let b = limits.partition_point(|&limit| limit <= micros).min(limits.len() - 1);
        self.buckets[b] += 1;
        self.min = self.min.min(micros);
        self.max = self.max.max(micros);
        self.num += 1;
        self.sum += micros;
        self.sum_squares += micros * micros;
    }

    pub fn count(&self) -> u64 {
        self.num
    }

    pub fn min(&self) -> f64 {
        if self.num == 0 { 0.0 } else { self.min }
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn average(&self) -> f64 {
        if self.num == 0 {
            return 0.0;
        }
        self.sum / self.num as f64
    }

    pub fn std_dev(&self) -> f64 {
        if self.num == 0 {
            return 0.0;
        }
        let n = self.num as f64;
        let variance = (self.sum_squares * n - self.sum * self.sum) / (n * n);
        variance.max(0.0).sqrt()
    }

    pub fn median(&self) -> f64 {
        self.percentile(50.0)
    }

    /// Estimate the `p`th percentile by interpolating inside the bucket that
    /// crosses the threshold
    pub fn percentile(&self, p: f64) -> f64 {
        if self.num == 0 {
            return 0.0;
        }
        let limits = bucket_limits();
        let threshold = self.num as f64 * (p / 100.0);
        let mut sum = 0.0;
        for (b, &count) in self.buckets.iter().enumerate() {
            sum += count as f64;
            if sum >= threshold && count > 0 {
                let left_point = if b == 0 { 0.0 } else { limits[b - 1] };
                let right_point = limits[b].min(self.max);
                let left_sum = sum - count as f64;
                let pos = (threshold - left_sum) / count as f64;
                let r = left_point + (right_point - left_point) * pos;
                return r.clamp(self.min(), self.max);
            }
        }
        self.max
    }
}

impl fmt::Display for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Count: {}  Average: {:.4}  StdDev: {:.2}",
            self.num,
            self.average(),
            self.std_dev()
        )?;
        writeln!(
            f,
            "Min: {:.4}  Median: {:.4}  Max: {:.4}",
            self.min(),
            self.median(),
            self.max
        )?;
        writeln!(f, "{}", "-".repeat(54))?;

        let limits = bucket_limits();
        let mult = if self.num == 0 { 0.0 } else { 100.0 / self.num as f64 };
        let mut sum = 0u64;
        for (b, &count) in self.buckets.iter().enumerate() {
            if count == 0 {
                continue;
            }
            sum += count;
            let left = if b == 0 { 0.0 } else { limits[b - 1] };
            let right = if b + 1 == limits.len() { f64::INFINITY } else { limits[b] };
            let marks = (20.0 * count as f64 / self.num as f64 + 0.5) as usize;
            writeln!(
                f,
                "[ {:>7.0}, {:>7.0} ) {:>7} {:>7.3}% {:>7.3}% {}",
                left,
                right,
                count,
                mult * count as f64,
                mult * sum as f64,
                "#".repeat(marks)
            )?;
        }
        Ok(())
    }
}
