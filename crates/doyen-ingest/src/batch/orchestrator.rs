//! Batch update orchestration
//!
//! Merges one [`UnitBatch`] into the six destination relations. Steps run
//! strictly in order because later relations reference rows from earlier
//! ones; each step is its own merge call and transaction, so a failure
//! leaves the rows of earlier steps committed.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, instrument};

use super::UnitBatch;
use crate::identity::Identity;
use crate::merge::{copy_lazy, CopyBatch, CopyValue, MergeError, MergeOutcome, RelationSink, Table};

pub const AUTHOR_COLUMNS: &[&str] = &[
    "identity_hash",
    "last_name",
    "first_name",
    "initials",
    "suffix",
    "identifier",
];
pub const INSTITUTION_COLUMNS: &[&str] = &["identity_hash", "name", "identifiers"];
pub const INSTITUTION_LINK_COLUMNS: &[&str] = &["institution_hash", "author_hash"];
pub const MESH_TERM_COLUMNS: &[&str] = &["mesh_id", "mesh_name"];
pub const MESH_ANNOTATION_COLUMNS: &[&str] = &["mesh_id", "author_hash"];
pub const PAPER_LINK_COLUMNS: &[&str] = &["paper_id", "author_hash"];

/// Rows inserted per relation for one unit
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub unit_id: String,
    pub staged: BTreeMap<Table, u64>,
    pub inserted: BTreeMap<Table, u64>,
}

impl BatchReport {
    fn record(&mut self, outcome: &MergeOutcome) {
        *self.staged.entry(outcome.table).or_default() += outcome.staged;
        *self.inserted.entry(outcome.table).or_default() += outcome.inserted;
    }

    pub fn inserted(&self, table: Table) -> u64 {
        self.inserted.get(&table).copied().unwrap_or(0)
    }

    pub fn staged(&self, table: Table) -> u64 {
        self.staged.get(&table).copied().unwrap_or(0)
    }

    pub fn total_inserted(&self) -> u64 {
        self.inserted.values().sum()
    }
}

pub struct BatchUpdater<'a, S: RelationSink + ?Sized> {
    sink: &'a S,
}

impl<'a, S: RelationSink + ?Sized> BatchUpdater<'a, S> {
    pub fn new(sink: &'a S) -> Self {
        Self { sink }
    }

    /// Merge every relation of the unit, in foreign-key order
    #[instrument(skip_all, fields(unit = %batch.unit_id()))]
    pub async fn update(&self, batch: &UnitBatch) -> Result<BatchReport, MergeError> {
        let mut report = BatchReport {
            unit_id: batch.unit_id().to_string(),
            ..Default::default()
        };

        let steps = [
            author_batch(batch),
            institution_batch(batch),
            institution_link_batch(batch),
            mesh_term_batch(batch),
            mesh_annotation_batch(batch),
            paper_link_batch(batch),
        ];

        for step in steps {
            info!("Adding {} {} rows", step.len(), step.table());
            let outcome = copy_lazy(self.sink, step).await?;
            report.record(&outcome);
        }

        Ok(report)
    }
}

pub fn author_batch(batch: &UnitBatch) -> CopyBatch {
    CopyBatch::new(Table::Author, AUTHOR_COLUMNS).with_rows(batch.authors().map(|a| {
        vec![
            CopyValue::from(a.durable_hash()),
            CopyValue::from(a.last_name()),
            CopyValue::from(a.first_name()),
            CopyValue::from(a.initials()),
            CopyValue::from(a.suffix()),
            CopyValue::from(a.identifier()),
        ]
    }))
}

pub fn institution_batch(batch: &UnitBatch) -> CopyBatch {
    CopyBatch::new(Table::Institution, INSTITUTION_COLUMNS).with_rows(
        batch.institutions().into_iter().map(|(hash, inst)| {
            vec![
                CopyValue::from(hash),
                CopyValue::from(inst.name()),
                CopyValue::from(inst.identifiers()),
            ]
        }),
    )
}

pub fn institution_link_batch(batch: &UnitBatch) -> CopyBatch {
    CopyBatch::new(Table::InstitutionAuthorLink, INSTITUTION_LINK_COLUMNS).with_rows(
        batch
            .institution_links()
            .into_iter()
            .map(|(inst, author)| vec![CopyValue::from(inst), CopyValue::from(author)]),
    )
}

/// Distinct mesh terms; the first label seen for an id wins
pub fn mesh_term_batch(batch: &UnitBatch) -> CopyBatch {
    let mut terms: BTreeMap<i64, &str> = BTreeMap::new();
    for occurrence in batch.mesh_occurrences().values().flat_map(|m| m.keys()) {
        terms
            .entry(occurrence.code.numeric())
            .or_insert(occurrence.label.as_str());
    }

    CopyBatch::new(Table::MeshTerm, MESH_TERM_COLUMNS).with_rows(
        terms
            .into_iter()
            .map(|(id, label)| vec![CopyValue::from(id), CopyValue::from(label)]),
    )
}

/// One row per occurrence; the count becomes row multiplicity
pub fn mesh_annotation_batch(batch: &UnitBatch) -> CopyBatch {
    let rows = batch
        .mesh_occurrences()
        .iter()
        .flat_map(|(author, occurrences)| {
            occurrences.iter().flat_map(move |(occurrence, count)| {
                let row = vec![
                    CopyValue::from(occurrence.code.numeric()),
                    CopyValue::from(*author),
                ];
                std::iter::repeat(row).take(*count as usize)
            })
        });
    CopyBatch::new(Table::MeshAnnotation, MESH_ANNOTATION_COLUMNS).with_rows(rows)
}

pub fn paper_link_batch(batch: &UnitBatch) -> CopyBatch {
    let rows = batch.papers().iter().flat_map(|(author, papers)| {
        papers
            .iter()
            .map(move |paper| vec![CopyValue::from(*paper), CopyValue::from(*author)])
    });
    CopyBatch::new(Table::PaperLink, PAPER_LINK_COLUMNS).with_rows(rows)
}
