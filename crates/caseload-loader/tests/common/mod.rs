//! Shared helpers for loader integration tests
//!
//! - Generated datasets written to a temporary directory
//! - A PostgreSQL container with the target schema applied
#![allow(dead_code)]

use anyhow::{Context, Result};
use caseload_gen::{generate, write_csv, Dataset, GeneratorConfig};
use caseload_loader::config::DatabaseConfig;
use caseload_loader::{LoadMode, LoaderConfig};
use chrono::NaiveDate;
use sqlx::{Connection, PgConnection};
use std::path::Path;
use tempfile::TempDir;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

/// Target schema; the loader never creates tables itself
pub const SCHEMA_SQL: &str = include_str!("../fixtures/schema.sql");

// ============================================================================
// Dataset Fixtures
// ============================================================================

/// A small, deterministic generator configuration
pub fn small_config() -> GeneratorConfig {
    let mut config = GeneratorConfig::new(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
    config.children = 40;
    config.cases = 25;
    config.episodes = 30;
    config
}

/// Generate a small dataset and write it to a fresh temporary directory
pub fn written_dataset() -> (TempDir, Dataset) {
    let dir = TempDir::new().unwrap();
    let dataset = generate(small_config()).unwrap();
    write_csv(&dataset, dir.path()).unwrap();
    (dir, dataset)
}

/// Loader configuration reading from `dir`
pub fn loader_config(mode: LoadMode, dir: &Path) -> LoaderConfig {
    let mut config = LoaderConfig::new(mode);
    config.data_dir = dir.to_path_buf();
    config
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL container with the caseload schema applied
pub struct TestPostgres {
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", connection_string);

        let mut conn = PgConnection::connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&mut conn)
            .await
            .context("Failed to apply schema")?;
        conn.close().await?;

        Ok(Self {
            container,
            connection_string,
        })
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            url: self.connection_string.clone(),
            connect_timeout_secs: 10,
        }
    }

    pub async fn connect(&self) -> Result<PgConnection> {
        PgConnection::connect(&self.connection_string)
            .await
            .context("Failed to connect to PostgreSQL")
    }

    pub fn container(&self) -> &ContainerAsync<Postgres> {
        &self.container
    }
}
