//! Caseload loader - Main entry point

use anyhow::{Context, Result};
use caseload_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use caseload_common::Entity;
use caseload_loader::config::DatabaseConfig;
use caseload_loader::normalize::Normalizer;
use caseload_loader::orchestrator::prepare_entity;
use caseload_loader::sink::{BulkSink, MemorySink, PgSink};
use caseload_loader::source::{BatchSource, DirectorySource};
use caseload_loader::verify::verify;
use caseload_loader::{
    Cli, Commands, DatabaseArgs, LoadFailure, LoadMode, LoadReport, LoaderConfig, Orchestrator,
    RejectPolicy, TransferArgs,
};
use clap::Parser;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let defaults = LogConfig::builder()
        .level(LogLevel::Info)
        .output(LogOutput::Console)
        .log_file_prefix("caseload")
        .build();

    // Environment overrides the defaults; --verbose overrides both
    let mut log_config = defaults.clone().with_env().unwrap_or(defaults);
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }

    if let Err(e) = init_logging(&log_config) {
        eprintln!("Warning: failed to initialize logging: {}", e);
    }

    if let Err(e) = execute_command(cli.command).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn execute_command(command: Commands) -> Result<()> {
    match command {
        Commands::Load {
            data_dir,
            mode,
            on_reject,
            transfer,
            database,
            dry_run,
            report,
        } => {
            let config = load_config(mode, data_dir, on_reject, &transfer, &database)?;
            run_load(config, dry_run, report).await
        },
        Commands::Verify { database } => run_verify(&database).await,
        Commands::Encode {
            entity,
            data_dir,
            transfer,
            output,
        } => run_encode(entity, data_dir, &transfer, output),
    }
}

fn load_config(
    mode: Option<LoadMode>,
    data_dir: Option<PathBuf>,
    on_reject: Option<RejectPolicy>,
    transfer: &TransferArgs,
    database: &DatabaseArgs,
) -> Result<LoaderConfig> {
    let mut config = LoaderConfig::from_env(mode).context("Invalid loader configuration")?;

    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    if let Some(policy) = on_reject {
        config.on_reject = policy;
    }
    if let Some(url) = &database.database_url {
        config.database.url = url.clone();
    }
    transfer.apply(&mut config)?;
    config.validate().context("Invalid loader configuration")?;

    Ok(config)
}

async fn run_load(config: LoaderConfig, dry_run: bool, report_path: Option<PathBuf>) -> Result<()> {
    info!(
        data_dir = %config.data_dir.display(),
        mode = %config.mode,
        dry_run,
        "Loading caseload dataset"
    );

    let source = DirectorySource::new(&config.data_dir, config.null_markers.clone());

    let outcome = if dry_run {
        let mut orchestrator = Orchestrator::new(config, MemorySink::new(), source);
        orchestrator.run().await
    } else {
        let sink = PgSink::connect(&config.database)
            .await
            .with_context(|| format!("Failed to connect to {}", config.database.masked_url()))?;
        let mut orchestrator = Orchestrator::new(config, sink, source);
        let outcome = orchestrator.run().await;
        if let Err(e) = orchestrator.into_sink().close().await {
            tracing::warn!(error = %e, "Failed to close database connection");
        }
        outcome
    };

    let report = match &outcome {
        Ok(report) => report,
        Err(LoadFailure { report, .. }) => report,
    };

    if let Some(path) = &report_path {
        report
            .write_json(path)
            .with_context(|| format!("Failed to write load report to {}", path.display()))?;
        info!(path = %path.display(), "Wrote load report");
    }

    if let Some(verification) = &report.verification {
        print!("{}", verification.render_table());
    }
    print_summary(report);
    if report.has_count_mismatch() {
        println!("Warning: row counts differ from what was loaded (see MISMATCH rows)");
    }

    match outcome {
        Ok(report) if report.is_success() => Ok(()),
        Ok(report) => {
            let rejected: Vec<String> = report.rejected().map(|r| r.entity.to_string()).collect();
            anyhow::bail!("Load finished with rejected entities: {}", rejected.join(", "))
        },
        Err(failure) => Err(failure.error.into()),
    }
}

fn print_summary(report: &LoadReport) {
    println!(
        "Loaded {} rows in {:.2}s ({} mode)",
        report.total_rows, report.elapsed_secs, report.mode
    );
}

async fn run_verify(database: &DatabaseArgs) -> Result<()> {
    dotenvy::dotenv().ok();
    let mut config = DatabaseConfig::from_env();
    if let Some(url) = &database.database_url {
        config.url = url.clone();
    }

    let mut sink = PgSink::connect(&config)
        .await
        .with_context(|| format!("Failed to connect to {}", config.masked_url()))?;
    sink.ping().await.context("Database is not reachable")?;

    let verification = verify(&mut sink, &BTreeMap::new()).await?;
    print!("{}", verification.render_table());
    println!("Total: {} rows", verification.total());

    sink.close().await?;
    Ok(())
}

fn run_encode(
    entity: Entity,
    data_dir: Option<PathBuf>,
    transfer: &TransferArgs,
    output: Option<PathBuf>,
) -> Result<()> {
    // The mode is irrelevant here; nothing is loaded
    let mut config = LoaderConfig::new(LoadMode::Append);
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    transfer.apply(&mut config)?;
    config.validate()?;

    let source = DirectorySource::new(&config.data_dir, config.null_markers.clone());
    info!(entity = %entity, path = %source.describe(entity), "Encoding");

    let normalizer = Normalizer::new(config.date_formats.clone());
    let prepared = prepare_entity(&source, &normalizer, &config.transfer, entity)?;
    let encoded = prepared.encoded;

    info!(
        rows = encoded.rows,
        bytes = encoded.payload.len(),
        "{}",
        config.transfer.copy_statement(entity.table_name(), &encoded.columns)
    );

    match output {
        Some(path) => std::fs::write(&path, &encoded.payload)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => std::io::stdout()
            .write_all(&encoded.payload)
            .context("Failed to write to stdout")?,
    }

    Ok(())
}
