//! Per-phase latency and throughput instrumentation.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::histogram::Histogram;

/// Operations slower than this many microseconds are reported on stderr
pub const SLOW_OP_MICROS: f64 = 20_000.0;

/// Outcome of one phase
#[derive(Debug, Clone, Serialize)]
pub struct PhaseResult {
    pub name: String,
    pub elapsed: Duration,
    /// Key and value bytes moved through the engine
    pub bytes: u64,
    /// Completed operations, never less than 1
    pub ops: u64,
    pub message: Option<String>,
    /// Present only when histograms are enabled
    pub histogram: Option<Histogram>,
}

impl PhaseResult {
    pub fn micros_per_op(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1e6 / self.ops as f64
    }

    /// MiB per second, or `None` when the phase moved no bytes
    pub fn throughput_mb_s(&self) -> Option<f64> {
        if self.bytes == 0 {
            return None;
        }
        let secs = self.elapsed.as_secs_f64().max(f64::MIN_POSITIVE);
        Some((self.bytes as f64 / 1_048_576.0) / secs)
    }
}

/// Accumulates counters and latency samples for the running phase
#[derive(Debug)]
pub struct LatencyRecorder {
    histogram_enabled: bool,
    start: Instant,
    last_op_finish: Instant,
    bytes: u64,
    message: Option<String>,
    hist: Histogram,
    done: u64,
    next_report: u64,
}

impl LatencyRecorder {
    pub fn new(histogram_enabled: bool) -> Self {
        let now = Instant::now();
        LatencyRecorder {
            histogram_enabled,
            start: now,
            last_op_finish: now,
            bytes: 0,
            message: None,
            hist: Histogram::new(),
            done: 0,
            next_report: 100,
        }
    }

    /// Reset every counter and restart the phase clock
    pub fn start(&mut self) {
        self.start = Instant::now();
        self.last_op_finish = self.start;
        self.bytes = 0;
        self.message = None;
        self.hist.clear();
        self.done = 0;
        self.next_report = 100;
    }

    /// Account for one completed operation
    pub fn record_op(&mut self) {
        if self.histogram_enabled {
            let now = Instant::now();
            let micros = now.duration_since(self.last_op_finish).as_secs_f64() * 1e6;
            self.hist.add(micros);
            if micros > SLOW_OP_MICROS {
                let mut err = io::stderr().lock();
                let _ = write!(err, "long op: {:.1} micros{:30}\r", micros, "");
                let _ = err.flush();
            }
            self.last_op_finish = now;
        }

        self.done += 1;
        if self.done >= self.next_report {
            self.next_report += next_report_step(self.next_report);
            let mut err = io::stderr().lock();
            let _ = write!(err, "... finished {} ops{:30}\r", self.done, "");
            let _ = err.flush();
        }
    }

    pub fn add_bytes(&mut self, n: u64) {
        self.bytes += n;
    }

    pub fn set_message<S: Into<String>>(&mut self, message: S) {
        self.message = Some(message.into());
    }

    /// Append to the phase message, separated by a space
    pub fn append_message(&mut self, message: &str) {
        match &mut self.message {
            Some(existing) => {
                existing.push(' ');
                existing.push_str(message);
            }
            None => self.message = Some(message.to_string()),
        }
    }

    pub fn done(&self) -> u64 {
        self.done
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn histogram(&self) -> &Histogram {
        &self.hist
    }

    /// Finish the phase and snapshot its counters
    pub fn stop(&mut self, name: &str) -> PhaseResult {
        let elapsed = self.start.elapsed();
        PhaseResult {
            name: name.to_string(),
            elapsed,
            bytes: self.bytes,
            // Phases such as compact record no operations
            ops: self.done.max(1),
            message: self.message.clone(),
            histogram: self.histogram_enabled.then(|| self.hist.clone()),
        }
    }
}

/// Progress cadence: every 100 ops up to 1,000, every 1,000 up to 10,000,
/// and so on, capped at every 100,000
fn next_report_step(current: u64) -> u64 {
    match current {
        0..=999 => 100,
        1_000..=9_999 => 1_000,
        10_000..=99_999 => 10_000,
        _ => 100_000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_cadence() {
        let mut next = 100;
        let mut thresholds = Vec::new();
        while next <= 300_000 {
            thresholds.push(next);
            next += next_report_step(next);
        }
        assert_eq!(&thresholds[..10], &[100, 200, 300, 400, 500, 600, 700, 800, 900, 1_000]);
        assert!(thresholds.contains(&2_000));
        assert!(thresholds.contains(&20_000));
        assert!(!thresholds.contains(&20_100));
        assert_eq!(&thresholds[thresholds.len() - 2..], &[200_000, 300_000]);
    }

    #[test]
    fn test_histogram_counts_every_op() {
        let mut recorder = LatencyRecorder::new(true);
        recorder.start();
        for _ in 0..250 {
            recorder.record_op();
        }
        let result = recorder.stop("fillseq");
        assert_eq!(result.ops, 250);
        assert_eq!(result.histogram.unwrap().count(), 250);
    }

    #[test]
    fn test_histogram_disabled() {
        let mut recorder = LatencyRecorder::new(false);
        recorder.start();
        for _ in 0..10 {
            recorder.record_op();
        }
        assert_eq!(recorder.histogram().count(), 0);
        assert!(recorder.stop("readseq").histogram.is_none());
    }

    #[test]
    fn test_start_resets() {
        let mut recorder = LatencyRecorder::new(true);
        recorder.start();
        recorder.record_op();
        recorder.add_bytes(116);
        recorder.set_message("(10 ops)");
        recorder.start();
        assert_eq!(recorder.done(), 0);
        assert_eq!(recorder.bytes(), 0);
        assert_eq!(recorder.histogram().count(), 0);
        assert!(recorder.stop("x").message.is_none());
    }

    #[test]
    fn test_zero_ops_counts_as_one() {
        let mut recorder = LatencyRecorder::new(false);
        recorder.start();
        let result = recorder.stop("compact");
        assert_eq!(result.ops, 1);
        assert!(result.throughput_mb_s().is_none());
        assert!(result.micros_per_op() >= 0.0);
    }

    #[test]
    fn test_append_message() {
        let mut recorder = LatencyRecorder::new(false);
        recorder.start();
        recorder.append_message("(10 ops)");
        recorder.append_message("(2 read errors)");
        assert_eq!(recorder.stop("x").message.as_deref(), Some("(10 ops) (2 read errors)"));
    }
}
