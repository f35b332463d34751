//! Doyen ingestion - Main entry point

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use doyen_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use doyen_ingest::checkpoint::{CheckpointLedger, FileLedgerStore, LedgerError, LedgerStore};
use doyen_ingest::db::{create_pool, health_check, run_migrations};
use doyen_ingest::extract::JsonDirectorySource;
use doyen_ingest::merge::{LazyCopyManager, MemorySink, RelationSink};
use doyen_ingest::runner::{IngestRunner, RunOptions, RunSummary};
use doyen_ingest::{Cli, Commands, IngestConfig};
use std::process;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        })
        .output(LogOutput::Console)
        .log_file_prefix("doyen-ingest")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // Keep the guard alive so file logs are flushed on exit
    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Warning: failed to initialize logging: {}", e);
            None
        }
    };

    if let Err(e) = execute(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn execute(cli: &Cli) -> Result<()> {
    let mut config = IngestConfig::load().context("Failed to load configuration")?;
    cli.apply(&mut config);
    config.validate()?;

    match &cli.command {
        Commands::Run { .. } => run(&config).await,
        Commands::Status => status(&config).await,
        Commands::Migrate => migrate(&config).await,
    }
}

async fn run(config: &IngestConfig) -> Result<()> {
    let source = JsonDirectorySource::new(&config.source_dir);
    let ledger = CheckpointLedger::load(FileLedgerStore::new(&config.checkpoint_path))
        .await
        .context("Failed to load checkpoint ledger")?;
    let options = RunOptions {
        order: config.order,
        max_units: config.max_units,
    };

    info!(
        source = %config.source_dir.display(),
        checkpoint = %config.checkpoint_path.display(),
        order = %config.order,
        dry_run = config.dry_run,
        "Starting ingestion"
    );

    let summary = if config.dry_run {
        // A dry run never records progress
        let ledger = CheckpointLedger::load(DryRunLedger(ledger.completed().to_vec())).await?;
        run_with(source, MemorySink::new(), ledger, options).await?
    } else {
        let pool = create_pool(&config.database).await?;
        health_check(&pool).await?;
        let sink = LazyCopyManager::new(pool)
            .with_schema(config.schema.clone())
            .with_chunk_size(config.copy_chunk_size);
        run_with(source, sink, ledger, options).await?
    };

    println!(
        "Processed {} unit(s), skipped {}, deferred {}.",
        summary.processed.len(),
        summary.skipped,
        summary.deferred
    );
    for (table, inserted) in &summary.inserted {
        println!("  {:<24} {:>10} row(s) inserted", table.name(), inserted);
    }
    if summary.issues > 0 {
        println!("  {} record(s) skipped by validation", summary.issues);
    }
    Ok(())
}

async fn run_with<K, L>(
    source: JsonDirectorySource,
    sink: K,
    ledger: CheckpointLedger<L>,
    options: RunOptions,
) -> Result<RunSummary>
where
    K: RelationSink,
    L: LedgerStore,
{
    IngestRunner::new(source, sink, ledger)
        .with_options(options)
        .run()
        .await
}

/// Ledger that starts from the real one but is never persisted
struct DryRunLedger(Vec<String>);

#[async_trait]
impl LedgerStore for DryRunLedger {
    async fn load(&self) -> std::result::Result<Vec<String>, LedgerError> {
        Ok(self.0.clone())
    }

    async fn save(&self, _completed: &[String]) -> std::result::Result<(), LedgerError> {
        Ok(())
    }
}

async fn status(config: &IngestConfig) -> Result<()> {
    let ledger = CheckpointLedger::load(FileLedgerStore::new(&config.checkpoint_path))
        .await
        .context("Failed to load checkpoint ledger")?;
    let runner = IngestRunner::new(
        JsonDirectorySource::new(&config.source_dir),
        MemorySink::new(),
        ledger,
    )
    .with_options(RunOptions {
        order: config.order,
        max_units: config.max_units,
    });
    let pending = runner.pending().await?;

    println!("Checkpoint: {}", config.checkpoint_path.display());
    println!("Completed units: {}", runner.ledger().len());
    for unit in runner.ledger().completed() {
        println!("  {}", unit);
    }
    println!("Pending units: {}", pending.len());
    for unit in &pending {
        println!("  {}", unit);
    }
    Ok(())
}

async fn migrate(config: &IngestConfig) -> Result<()> {
    let pool = create_pool(&config.database).await?;
    run_migrations(&pool).await?;
    println!("Migrations applied.");
    Ok(())
}
