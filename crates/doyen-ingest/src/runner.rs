//! Crash-resumable run loop over input units

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, instrument};

use crate::batch::{BatchReport, BatchUpdater, UnitBatch};
use crate::checkpoint::{CheckpointLedger, LedgerStore};
use crate::config::UnitOrder;
use crate::extract::UnitSource;
use crate::merge::{RelationSink, Table};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub order: UnitOrder,
    /// Stop after this many units have been merged
    pub max_units: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Units merged in this run, in merge order
    pub processed: Vec<String>,
    /// Units skipped because the ledger already had them
    pub skipped: usize,
    /// Units left for a later run because of `max_units`
    pub deferred: usize,
    pub inserted: BTreeMap<Table, u64>,
    /// Records dropped by validation
    pub issues: usize,
}

impl RunSummary {
    fn record(&mut self, report: &BatchReport, issues: usize) {
        self.processed.push(report.unit_id.clone());
        for (table, n) in &report.inserted {
            *self.inserted.entry(*table).or_default() += n;
        }
        self.issues += issues;
    }

    pub fn inserted(&self, table: Table) -> u64 {
        self.inserted.get(&table).copied().unwrap_or(0)
    }
}

/// Drives source, aggregation, orchestration and ledger for each pending unit
///
/// Units are merged one at a time. A unit is marked complete only after all
/// of its merge steps succeeded; the first extraction, merge or ledger error
/// stops the run and leaves that unit pending.
pub struct IngestRunner<S, K, L>
where
    S: UnitSource,
    K: RelationSink,
    L: LedgerStore,
{
    source: S,
    sink: K,
    ledger: CheckpointLedger<L>,
    options: RunOptions,
}

impl<S, K, L> IngestRunner<S, K, L>
where
    S: UnitSource,
    K: RelationSink,
    L: LedgerStore,
{
    pub fn new(source: S, sink: K, ledger: CheckpointLedger<L>) -> Self {
        Self {
            source,
            sink,
            ledger,
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn ledger(&self) -> &CheckpointLedger<L> {
        &self.ledger
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Unit ids in processing order
    async fn ordered_units(&self) -> Result<Vec<String>> {
        let mut units = self
            .source
            .list_units()
            .await
            .context("Failed to list input units")?;
        if self.options.order == UnitOrder::Reversed {
            units.reverse();
        }
        Ok(units)
    }

    /// Units not yet in the ledger, in processing order
    pub async fn pending(&self) -> Result<Vec<String>> {
        Ok(self
            .ordered_units()
            .await?
            .into_iter()
            .filter(|u| !self.ledger.is_complete(u))
            .collect())
    }

    #[instrument(skip_all)]
    pub async fn run(&mut self) -> Result<RunSummary> {
        let units = self.ordered_units().await?;
        let mut summary = RunSummary::default();
        info!(units = units.len(), completed = self.ledger.len(), "Starting run");

        for unit_id in units {
            if self.ledger.is_complete(&unit_id) {
                info!("Skipping {}.", unit_id);
                summary.skipped += 1;
                continue;
            }
            if self
                .options
                .max_units
                .is_some_and(|max| summary.processed.len() >= max)
            {
                summary.deferred += 1;
                continue;
            }

            let start = Instant::now();
            let mut unit = self
                .source
                .extract(&unit_id)
                .await
                .with_context(|| format!("Failed to extract unit {}", unit_id))?;
            unit.unit_id = unit_id.clone();

            let batch = UnitBatch::from_unit(&unit);
            let report = BatchUpdater::new(&self.sink)
                .update(&batch)
                .await
                .with_context(|| format!("Failed to merge unit {}", unit_id))?;

            self.ledger
                .mark_complete(&unit_id)
                .await
                .with_context(|| format!("Failed to checkpoint unit {}", unit_id))?;

            info!(
                unit = %unit_id,
                authors = batch.author_count(),
                inserted = report.total_inserted(),
                issues = batch.issues().len(),
                elapsed = ?start.elapsed(),
                "Unit complete"
            );
            summary.record(&report, batch.issues().len());
        }

        info!(
            processed = summary.processed.len(),
            skipped = summary.skipped,
            deferred = summary.deferred,
            issues = summary.issues,
            "Run finished"
        );
        Ok(summary)
    }
}
