//! Common test utilities for doyen-ingest integration tests
//!
//! Provides a PostgreSQL container with migrations applied and helpers for
//! writing extracted input units to a temporary source directory.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::TestPostgres;
//!
//! #[tokio::test]
//! #[ignore] // Requires database
//! async fn test_with_postgres() {
//!     let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
//!     sqlx::query("SELECT 1").execute(pg.pool()).await.expect("Query failed");
//! }
//! ```

#![allow(dead_code)]

use anyhow::{Context, Result};
use doyen_ingest::merge::Table;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::Path;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

/// Two articles by the same author, sharing one MeSH term
pub const CURIE_UNIT: &str = r#"{
    "articles": [
        {
            "pmid": "101",
            "authors": [
                {"first_name": "Marie", "last_name": "Curie", "initials": "M", "affiliations": [
                    {"name": "Sorbonne"},
                    {"name": "Institut du Radium", "identifiers": ["grid.1"]}
                ]}
            ],
            "mesh_annotations": [
                {"mesh": "D011883", "text": "Radium"},
                {"mesh": "D011878", "text": "Radioactivity"}
            ]
        },
        {
            "pmid": "102",
            "authors": [
                {"first_name": "Marie", "last_name": "Curie", "initials": "M", "affiliations": [
                    {"name": "Institut du Radium", "identifiers": ["grid.1"]},
                    {"name": "Sorbonne"}
                ]}
            ],
            "mesh_annotations": [{"mesh": "D011883", "text": "Radium"}]
        }
    ]
}"#;

/// One article by a single unaffiliated author
pub fn single_author_unit(pmid: u32, last_name: &str) -> String {
    format!(
        r#"{{"articles": [{{
            "pmid": "{pmid}",
            "authors": [{{"last_name": "{last_name}"}}],
            "mesh_annotations": [{{"mesh": "D000001", "text": "Calcimycin"}}]
        }}]}}"#
    )
}

/// Write a unit file into a source directory
pub fn write_unit(dir: &Path, name: &str, json: &str) {
    std::fs::write(dir.join(name), json).unwrap_or_else(|e| panic!("writing {}: {}", name, e));
}

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,doyen_ingest=debug,sqlx=warn")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL test container wrapper with migrations pre-applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    /// Start a new PostgreSQL container with migrations applied
    pub async fn start() -> Result<Self> {
        Self::start_with_options(PostgresOptions::default()).await
    }

    pub async fn start_with_options(options: PostgresOptions) -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag(&options.version)
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

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(Duration::from_secs(options.acquire_timeout_secs))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Running database migrations...");
        doyen_ingest::db::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }

    /// Row count of one destination relation
    pub async fn count(&self, table: Table) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM \"{}\"", table.name());
        sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to count {}", table))
    }
}

/// Configuration options for PostgreSQL test container
pub struct PostgresOptions {
    /// PostgreSQL version/tag (default: "16-alpine")
    pub version: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            version: "16-alpine".to_string(),
            max_connections: 5,
            acquire_timeout_secs: 30,
        }
    }
}
