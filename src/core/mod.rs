pub mod config;
pub mod errors;
pub mod generator;
pub mod histogram;
pub mod key;
pub mod recorder;
pub mod report;
pub mod scheduler;

pub use config::RunConfig;
pub use errors::{BenchError, Result};
pub use scheduler::{BenchmarkSpec, Phase, Scheduler};
