//! Report printer
//!
//! Renders the run header, one summary line per phase and the optional
//! histogram dump, plus the end-of-run table and JSON results.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use chrono::Local;
use prettytable::{Cell, Row, Table};
use serde::Serialize;

use crate::core::config::RunConfig;
use crate::core::errors::Result;
use crate::core::key::KEY_SIZE;
use crate::core::recorder::PhaseResult;

const SEPARATOR_WIDTH: usize = 48;

/// Version and date lines, meant for the diagnostic stream
pub fn print_environment<W: Write>(err: &mut W, engine_name: &str) -> io::Result<()> {
    writeln!(err, "kvbench:    version {} ({})", env!("CARGO_PKG_VERSION"), engine_name)?;
    writeln!(err, "Date:       {}", Local::now().format("%a %b %e %H:%M:%S %Y"))?;
    Ok(())
}

/// Key/value sizes, estimated data volume and build warnings
pub fn print_header<W: Write>(out: &mut W, config: &RunConfig) -> io::Result<()> {
    let num = config.num as f64;
    let raw_mb = ((KEY_SIZE + config.value_size) as f64 * num) / 1_048_576.0;
    let file_mb =
        ((KEY_SIZE as f64 + config.value_size as f64 * config.compression_ratio) * num) / 1_048_576.0;

    writeln!(out, "Keys:       {} bytes each", KEY_SIZE)?;
    writeln!(
        out,
        "Values:     {} bytes each ({} bytes after compression)",
        config.value_size,
        config.compressed_value_size()
    )?;
    writeln!(out, "Entries:    {}", config.num)?;
    writeln!(out, "RawSize:    {:.1} MB (estimated)", raw_mb)?;
    writeln!(out, "FileSize:   {:.1} MB (estimated)", file_mb)?;
    for warning in build_warnings() {
        writeln!(out, "WARNING: {}", warning)?;
    }
    if config.durability.is_sync() {
        writeln!(out, "WARNING: All writes are synchronous")?;
    }
    writeln!(out, "{}", "-".repeat(SEPARATOR_WIDTH))?;
    Ok(())
}

fn build_warnings() -> Vec<&'static str> {
    let mut warnings = Vec::new();
    if cfg!(debug_assertions) {
        warnings.push("Optimization is disabled: benchmarks unnecessarily slow");
        warnings.push("Assertions are enabled; benchmarks unnecessarily slow");
    }
    warnings
}

/// The one-line summary of a phase: `name : micros/op; [rate] [message]`
pub fn phase_line(result: &PhaseResult) -> String {
    let mut message = match result.throughput_mb_s() {
        Some(rate) => format!("{:5.1} MB/s", rate),
        None => String::new(),
    };
    if let Some(extra) = &result.message {
        if !message.is_empty() {
            message.push(' ');
        }
        message.push_str(extra);
    }

    format!(
        "{:<12} : {:11.3} micros/op;{}{}",
        result.name,
        result.micros_per_op(),
        if message.is_empty() { "" } else { " " },
        message
    )
}

/// Print the summary line and, when recorded, the histogram dump
pub fn print_phase<W: Write>(out: &mut W, result: &PhaseResult) -> io::Result<()> {
    writeln!(out, "{}", phase_line(result))?;
    if let Some(hist) = &result.histogram {
        writeln!(out, "Microseconds per op:\n{}", hist)?;
    }
    out.flush()
}

/// All phases of a run as a table
pub fn summary_table(results: &[PhaseResult]) -> Table {
    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("Phase"),
        Cell::new("Ops"),
        Cell::new("micros/op"),
        Cell::new("MB/s"),
        Cell::new("p99 micros"),
        Cell::new("Message"),
    ]));

    for result in results {
        let rate = result
            .throughput_mb_s()
            .map(|r| format!("{:.1}", r))
            .unwrap_or_else(|| "-".to_string());
        let p99 = result
            .histogram
            .as_ref()
            .map(|h| format!("{:.1}", h.percentile(99.0)))
            .unwrap_or_else(|| "-".to_string());
        table.add_row(Row::new(vec![
            Cell::new(&result.name),
            Cell::new(&result.ops.to_string()),
            Cell::new(&format!("{:.3}", result.micros_per_op())),
            Cell::new(&rate),
            Cell::new(&p99),
            Cell::new(result.message.as_deref().unwrap_or("")),
        ]));
    }

    table
}

#[derive(Serialize)]
struct RunReport<'a> {
    config: &'a RunConfig,
    phases: &'a [PhaseResult],
}

/// Write the configuration and every phase result as pretty JSON
pub fn write_json<P: AsRef<Path>>(path: P, config: &RunConfig, results: &[PhaseResult]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &RunReport { config, phases: results })?;
    writer.flush()?;
    Ok(())
}
