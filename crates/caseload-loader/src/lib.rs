//! Caseload Loader Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Bulk loader for the child-welfare dataset: reads one CSV file per entity,
//! normalizes nulls, numbers and dates, and streams each batch into the
//! target store with `COPY ... FROM STDIN`, one transaction per entity, in
//! dependency order.
//!
//! # Overview
//!
//! - **Batches**: typed columnar batches read from CSV ([`batch`])
//! - **Normalization**: null markers, whole-number floats, dates ([`normalize`])
//! - **Column selection**: identity columns dropped, foreign keys kept ([`select`])
//! - **Encoding**: the COPY text stream and its decoder ([`encode`])
//! - **Sinks**: PostgreSQL and in-memory bulk-ingest sessions ([`sink`])
//! - **Orchestration**: the load state machine and reject policy ([`orchestrator`])
//! - **Verification**: post-load row counts ([`verify`])
//!
//! # Example
//!
//! ```
//! use caseload_loader::encode::TransferFormat;
//!
//! let format = TransferFormat::default();
//! assert_eq!(
//!     format.copy_statement("children", &["gender".to_string()]),
//!     r#"COPY "children" ("gender") FROM STDIN WITH (FORMAT csv, DELIMITER ',', NULL 'NULL', QUOTE '"')"#
//! );
//! ```

pub mod batch;
pub mod config;
pub mod encode;
pub mod error;
pub mod normalize;
pub mod orchestrator;
pub mod report;
pub mod select;
pub mod sink;
pub mod source;
pub mod validate;
pub mod verify;

// Re-export commonly used types
pub use config::{LoadMode, LoaderConfig, RejectPolicy};
pub use error::{LoadError, Result};
pub use orchestrator::{LoadFailure, LoadState, Orchestrator};
pub use report::LoadReport;

use caseload_common::Entity;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Caseload - bulk loader for the child-welfare dataset
#[derive(Parser, Debug)]
#[command(name = "caseload")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load all seven entity files into the database
    Load {
        /// Directory holding <table>.csv files
        #[arg(long, env = "CASELOAD_DATA_DIR")]
        data_dir: Option<PathBuf>,

        /// replace: purge all tables first; append: keep existing rows
        #[arg(long, value_enum)]
        mode: Option<LoadMode>,

        /// What a rejected entity does to the rest of the run
        #[arg(long, value_enum)]
        on_reject: Option<RejectPolicy>,

        #[command(flatten)]
        transfer: TransferArgs,

        #[command(flatten)]
        database: DatabaseArgs,

        /// Load into an in-memory store instead of the database
        #[arg(long)]
        dry_run: bool,

        /// Write the JSON load report to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Print current row counts of all seven tables
    Verify {
        #[command(flatten)]
        database: DatabaseArgs,
    },

    /// Write one entity's COPY stream, for inspection
    Encode {
        /// Entity or table name (e.g. `children`, `episode`)
        #[arg(long)]
        entity: Entity,

        /// Directory holding <table>.csv files
        #[arg(long, env = "CASELOAD_DATA_DIR")]
        data_dir: Option<PathBuf>,

        #[command(flatten)]
        transfer: TransferArgs,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Transfer format overrides
#[derive(clap::Args, Debug, Clone, Default)]
pub struct TransferArgs {
    /// Field delimiter of the transfer stream (`\t` for tab)
    #[arg(long)]
    pub delimiter: Option<String>,

    /// Token written for missing values
    #[arg(long)]
    pub null_sentinel: Option<String>,
}

/// Database overrides
#[derive(clap::Args, Debug, Clone, Default)]
pub struct DatabaseArgs {
    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,
}

impl TransferArgs {
    /// Apply the overrides on top of `config`
    pub fn apply(&self, config: &mut LoaderConfig) -> Result<()> {
        if let Some(delimiter) = &self.delimiter {
            config.transfer.delimiter = config::parse_delimiter(delimiter)?;
        }
        if let Some(sentinel) = &self.null_sentinel {
            config.transfer.null_sentinel = sentinel.clone();
        }
        Ok(())
    }
}
