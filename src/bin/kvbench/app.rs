// src/bin/kvbench/app.rs
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::error::ErrorKind;
use clap::{Parser, ValueEnum};
use log::info;

use kvbench::core::report;
use kvbench::{
    BenchmarkSpec, DurabilityMode, Engine, EngineAdmin, MemoryEngine, RunConfig, Scheduler, SledEngine,
    DEFAULT_BENCHMARKS,
};

/// Engines the harness can drive
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum EngineKind {
    /// Persistent sled database
    Sled,
    /// In-process leveled engine
    Memory,
}

#[derive(Parser)]
#[command(name = "kvbench", version)]
#[command(about = "Workload benchmarks for ordered key-value engines", long_about = None)]
struct Cli {
    /// Comma-separated phases to run in order
    #[arg(long, default_value = DEFAULT_BENCHMARKS)]
    benchmarks: String,

    /// Number of key/values to place in the database
    #[arg(long)]
    num: Option<u64>,

    /// Size of each value in bytes
    #[arg(long = "value_size")]
    value_size: Option<usize>,

    /// Fraction of their size values shrink to under compression
    #[arg(long = "compression_ratio")]
    compression_ratio: Option<f64>,

    /// Print a latency histogram per phase (0 or 1)
    #[arg(long, value_parser = BoolishValueParser::new())]
    histogram: Option<bool>,

    /// Bytes buffered in memory before the engine writes a file
    #[arg(long = "write_buffer_size")]
    write_buffer_size: Option<usize>,

    /// Database directory
    #[arg(long)]
    db: Option<PathBuf>,

    /// Engine to benchmark
    #[arg(long, value_enum, default_value_t = EngineKind::Sled)]
    engine: EngineKind,

    /// JSON file with base configuration; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed for key selection and value generation
    #[arg(long)]
    seed: Option<u64>,

    /// Make every write synchronous
    #[arg(long)]
    sync: bool,

    /// Write the results as JSON to this file
    #[arg(long)]
    json: Option<PathBuf>,

    /// Print a table of all phases to stderr at the end
    #[arg(long)]
    summary: bool,
}

impl Cli {
    fn run_config(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_json_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => RunConfig::default(),
        };

        if let Some(num) = self.num {
            config.num = num;
        }
        if let Some(value_size) = self.value_size {
            config.value_size = value_size;
        }
        if let Some(ratio) = self.compression_ratio {
            config.compression_ratio = ratio;
        }
        if let Some(histogram) = self.histogram {
            config.histogram = histogram;
        }
        if let Some(size) = self.write_buffer_size {
            config.write_buffer_size = size;
        }
        if let Some(db) = &self.db {
            config.db_path = db.clone();
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.sync {
            config.durability = DurabilityMode::Sync;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Parse the command line and run the requested phases
pub fn run() -> Result<ExitCode> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.print()?;
            return Ok(ExitCode::SUCCESS);
        }
        Err(e) => {
            e.print()?;
            return Ok(ExitCode::FAILURE);
        }
    };

    let config = cli.run_config()?;
    let spec = BenchmarkSpec::parse(&cli.benchmarks);
    info!("running {} phases on {:?}", spec.len(), cli.engine);

    match cli.engine {
        EngineKind::Sled => execute::<SledEngine>(&cli, config, &spec)?,
        EngineKind::Memory => execute::<MemoryEngine>(&cli, config, &spec)?,
    }
    Ok(ExitCode::SUCCESS)
}

fn execute<E: Engine + EngineAdmin>(cli: &Cli, config: RunConfig, spec: &BenchmarkSpec) -> Result<()> {
    report::print_environment(&mut io::stderr().lock(), E::NAME)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    report::print_header(&mut out, &config)?;

    let mut scheduler = Scheduler::<E>::new(config)?;
    let results = scheduler.run(spec, &mut out)?;

    if cli.summary {
        eprintln!("{}", report::summary_table(&results));
    }
    if let Some(path) = &cli.json {
        report::write_json(path, scheduler.config(), &results)
            .with_context(|| format!("failed to write results to {}", path.display()))?;
    }
    Ok(())
}
