//! Caseload generator - Main entry point

use anyhow::{Context, Result};
use caseload_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use caseload_gen::config::{DEFAULT_CASES, DEFAULT_CHILDREN, DEFAULT_EPISODES, DEFAULT_OUTPUT_DIR, DEFAULT_SEED};
use caseload_gen::{check_invariants, write_csv, Generator, GeneratorConfig};
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;
use std::process;
use tracing::{error, info, warn};

/// Caseload generator - synthetic child-welfare sample data
#[derive(Parser, Debug)]
#[command(name = "caseload-gen")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory the seven CSV files are written to
    #[arg(short, long, env = "CASELOAD_DATA_DIR", default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// RNG seed
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    #[arg(long, default_value_t = DEFAULT_CHILDREN)]
    children: usize,

    #[arg(long, default_value_t = DEFAULT_CASES)]
    cases: usize,

    #[arg(long, default_value_t = DEFAULT_EPISODES)]
    episodes: usize,

    /// Date all generated dates count back from (YYYY-MM-DD, defaults to today)
    #[arg(long)]
    reference_date: Option<NaiveDate>,

    /// Check the dataset's invariants and fail instead of writing a broken one
    #[arg(long)]
    check: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let defaults = LogConfig::builder()
        .level(LogLevel::Info)
        .output(LogOutput::Console)
        .log_file_prefix("caseload-gen")
        .build();
    let mut log_config = defaults.clone().with_env().unwrap_or(defaults);
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    if let Err(e) = init_logging(&log_config) {
        eprintln!("Warning: failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli) {
        error!(error = %e, "Generation failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match cli.reference_date {
        Some(date) => GeneratorConfig::new(date),
        None => GeneratorConfig::today(),
    };
    config.seed = cli.seed;
    config.children = cli.children;
    config.cases = cli.cases;
    config.episodes = cli.episodes;

    let dataset = Generator::new(config)?.generate();

    if cli.check {
        let violations = check_invariants(&dataset);
        for violation in violations.iter().take(20) {
            warn!("{}", violation);
        }
        if !violations.is_empty() {
            anyhow::bail!("Generated dataset has {} invariant violations", violations.len());
        }
        info!("Dataset invariants hold");
    }

    let written = write_csv(&dataset, &cli.output_dir)
        .with_context(|| format!("Failed to write dataset to {}", cli.output_dir.display()))?;

    let total: usize = written.iter().map(|f| f.rows).sum();
    for file in &written {
        println!("Created {} ({} rows)", file.path.display(), file.rows);
    }
    println!("Sample data generation complete: {} rows in {} files", total, written.len());
    Ok(())
}
