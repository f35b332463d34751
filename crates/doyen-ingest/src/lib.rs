//! Doyen ingestion pipeline
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Deduplicating, crash-resumable bulk ingestion of bibliographic entities
//! (authors, institutions, MeSH annotations and paper links) into
//! PostgreSQL.
//!
//! - [`identity`]: content-addressed identity and durable hashes
//! - [`extract`]: extracted records, validation and unit sources
//! - [`batch`]: per-unit aggregation and the batch update orchestrator
//! - [`merge`]: the lazy copy bulk merge engine
//! - [`checkpoint`]: the completed-unit ledger
//! - [`runner`]: the run loop tying them together

pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod extract;
pub mod identity;
pub mod merge;
pub mod mesh;
pub mod runner;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use config::{IngestConfig, UnitOrder};

/// Doyen - bibliographic entity ingestion
#[derive(Parser, Debug)]
#[command(name = "doyen-ingest")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Database URL
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,

    /// Schema holding the destination relations
    #[arg(long, env = "DOYEN_SCHEMA", global = true)]
    pub schema: Option<String>,

    /// Checkpoint ledger file
    #[arg(long, env = "DOYEN_CHECKPOINT_PATH", global = true)]
    pub checkpoint: Option<PathBuf>,

    /// Directory of extracted input units
    #[arg(long, env = "DOYEN_SOURCE_DIR", global = true)]
    pub source_dir: Option<PathBuf>,

    /// Unit processing order
    #[arg(long, value_enum, global = true)]
    pub order: Option<UnitOrder>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Merge every pending input unit
    Run {
        /// Merge into memory instead of the database
        #[arg(long)]
        dry_run: bool,

        /// Stop after this many units
        #[arg(long)]
        max_units: Option<usize>,
    },

    /// Show completed and pending units
    Status,

    /// Apply database migrations
    Migrate,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration
    pub fn apply(&self, config: &mut IngestConfig) {
        if let Some(url) = &self.database_url {
            config.database.url = url.clone();
        }
        if let Some(schema) = &self.schema {
            config.schema = schema.clone();
        }
        if let Some(path) = &self.checkpoint {
            config.checkpoint_path = path.clone();
        }
        if let Some(dir) = &self.source_dir {
            config.source_dir = dir.clone();
        }
        if let Some(order) = self.order {
            config.order = order;
        }
        if let Commands::Run { dry_run, max_units } = &self.command {
            config.dry_run |= *dry_run;
            if max_units.is_some() {
                config.max_units = *max_units;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::try_parse_from([
            "doyen-ingest",
            "run",
            "--dry-run",
            "--max-units",
            "2",
            "--order",
            "reversed",
            "--checkpoint",
            "/tmp/ledger.json",
        ])
        .unwrap();

        let mut config = IngestConfig::default();
        cli.apply(&mut config);
        assert!(config.dry_run);
        assert_eq!(config.max_units, Some(2));
        assert_eq!(config.order, UnitOrder::Reversed);
        assert_eq!(config.checkpoint_path, PathBuf::from("/tmp/ledger.json"));
    }
}
