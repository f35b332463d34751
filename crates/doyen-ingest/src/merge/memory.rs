//! In-memory relation sink
//!
//! Keeps the six relations as row vectors with the same merge semantics as
//! [`super::LazyCopyManager`]: conflict on the target constraint drops the
//! row, generated keys come from a per-relation sequence, foreign keys are
//! checked on inserted rows and a failing merge leaves no trace.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{
    CopyValue, EncodedField, MergeError, MergeOutcome, PreparedBatch, RelationSink, Table,
};

type RowKey = Vec<EncodedField>;

#[derive(Debug, Default)]
struct MemoryTable {
    /// Full rows in catalog column order, in insertion order
    rows: Vec<Vec<CopyValue>>,
    keys: HashSet<RowKey>,
    last_id: i64,
}

#[derive(Debug, Default)]
pub struct MemorySink {
    tables: Mutex<HashMap<Table, MemoryTable>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Table, MemoryTable>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stored rows of a relation, columns in catalog order
    pub fn rows(&self, table: Table) -> Vec<Vec<CopyValue>> {
        self.lock()
            .get(&table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: Table) -> usize {
        self.lock().get(&table).map_or(0, |t| t.rows.len())
    }

    /// Row counts of every relation, in merge order
    pub fn counts(&self) -> Vec<(Table, usize)> {
        let tables = self.lock();
        Table::ALL
            .iter()
            .map(|t| (*t, tables.get(t).map_or(0, |m| m.rows.len())))
            .collect()
    }

    /// Values of one column across a relation
    pub fn column_values(&self, table: Table, column: &str) -> Vec<CopyValue> {
        let Some(index) = column_index(table, column) else {
            return Vec::new();
        };
        self.rows(table)
            .into_iter()
            .map(|mut row| std::mem::replace(&mut row[index], CopyValue::Null))
            .collect()
    }
}

fn column_index(table: Table, column: &str) -> Option<usize> {
    table.columns().iter().position(|c| c.name == column)
}

/// Key of a full row under the columns `key`
fn row_key(table: Table, row: &[CopyValue], key: &[&str]) -> RowKey {
    key.iter()
        .map(|name| {
            column_index(table, name)
                .and_then(|i| row[i].encode(table.columns()[i].ty).ok())
                .flatten()
        })
        .collect()
}

fn compare_values(a: &CopyValue, b: &CopyValue) -> Ordering {
    match (a, b) {
        (CopyValue::Int(a), CopyValue::Int(b)) => a.cmp(b),
        (CopyValue::Float(a), CopyValue::Float(b)) => a.total_cmp(b),
        (CopyValue::Text(a), CopyValue::Text(b)) => a.cmp(b),
        (CopyValue::Timestamp(a), CopyValue::Timestamp(b)) => a.cmp(b),
        (CopyValue::Bytes(a), CopyValue::Bytes(b)) => a.cmp(b),
        // Postgres sorts nulls first in descending order
        (CopyValue::Null, CopyValue::Null) => Ordering::Equal,
        (CopyValue::Null, _) => Ordering::Greater,
        (_, CopyValue::Null) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

impl MemoryTable {
    /// Staged rows absent from the newest `limit` rows ordered by `order_by`
    fn skipped(
        &self,
        table: Table,
        batch: &PreparedBatch,
        order_by: &str,
        limit: usize,
    ) -> Vec<Vec<CopyValue>> {
        let projection: Vec<usize> = batch
            .column_names()
            .iter()
            .filter_map(|c| column_index(table, c))
            .collect();
        let Some(order_index) = column_index(table, order_by) else {
            return Vec::new();
        };

        let mut newest: Vec<&Vec<CopyValue>> = self.rows.iter().collect();
        newest.sort_by(|a, b| compare_values(&b[order_index], &a[order_index]));
        let recent: HashSet<RowKey> = newest
            .into_iter()
            .take(limit)
            .map(|row| {
                projection
                    .iter()
                    .map(|&i| row[i].encode(table.columns()[i].ty).ok().flatten())
                    .collect()
            })
            .collect();

        let mut seen = HashSet::new();
        batch
            .rows()
            .iter()
            .zip(batch.fields())
            .filter(|(_, fields)| !recent.contains(*fields) && seen.insert((*fields).clone()))
            .map(|(row, _)| row.clone())
            .collect()
    }
}

#[async_trait]
impl RelationSink for MemorySink {
    async fn merge(&self, batch: PreparedBatch) -> Result<MergeOutcome, MergeError> {
        let table = batch.table();
        let mut tables = self.lock();

        let key_columns = table.primary_key();
        let positions: Vec<Option<usize>> = table
            .columns()
            .iter()
            .map(|c| batch.column_names().iter().position(|n| *n == c.name))
            .collect();

        let target = tables.entry(table).or_default();
        let mut last_id = target.last_id;
        let mut new_keys = HashSet::new();
        let mut inserted_rows = Vec::new();

        for row in batch.rows() {
            let mut full = Vec::with_capacity(positions.len());
            for (column, position) in table.columns().iter().zip(&positions) {
                let value = match position {
                    Some(i) => row[*i].clone(),
                    None if column.generated => {
                        last_id += 1;
                        CopyValue::Int(last_id)
                    }
                    None => CopyValue::Null,
                };
                full.push(value);
            }

            let key = row_key(table, &full, key_columns);
            if target.keys.contains(&key) || !new_keys.insert(key) {
                continue;
            }
            inserted_rows.push(full);
        }

        for fk in table.foreign_keys() {
            let parent_keys = tables
                .get(&fk.references)
                .map(|t| &t.keys);
            for row in &inserted_rows {
                let key = row_key(table, row, &[fk.column]);
                if !parent_keys.is_some_and(|keys| keys.contains(&key)) {
                    let value = column_index(table, fk.column)
                        .map(|i| format!("{:?}", row[i]))
                        .unwrap_or_default();
                    return Err(MergeError::ForeignKey {
                        table,
                        column: fk.column,
                        references: fk.references,
                        value,
                    });
                }
            }
        }

        let target = tables.entry(table).or_default();
        let inserted = inserted_rows.len() as u64;
        target.keys.extend(new_keys);
        target.rows.extend(inserted_rows);
        target.last_id = last_id;

        let skipped_rows = batch
            .audit_order_by()
            .map(|order_by| target.skipped(table, &batch, order_by, inserted as usize));

        Ok(MergeOutcome {
            table,
            staged: batch.len() as u64,
            inserted,
            skipped_rows,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::merge::{copy_lazy, CopyBatch};

    fn authors(rows: &[(i64, &str)]) -> CopyBatch {
        CopyBatch::new(Table::Author, &["identity_hash", "last_name"])
            .with_rows(
                rows.iter()
                    .map(|(h, n)| vec![CopyValue::from(*h), CopyValue::from(*n)]),
            )
    }

    #[tokio::test]
    async fn test_conflicting_rows_are_dropped() {
        let sink = MemorySink::new();
        let first = copy_lazy(&sink, authors(&[(1, "Curie"), (2, "Meitner")]))
            .await
            .unwrap();
        assert_eq!(first.inserted, 2);

        let second = copy_lazy(&sink, authors(&[(2, "Hahn"), (3, "Franklin")]))
            .await
            .unwrap();
        assert_eq!(second.staged, 2);
        assert_eq!(second.inserted, 1);
        assert_eq!(second.skipped(), 1);

        // existing row untouched
        let names = sink.column_values(Table::Author, "last_name");
        assert_eq!(
            names,
            vec![
                CopyValue::from("Curie"),
                CopyValue::from("Meitner"),
                CopyValue::from("Franklin")
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicates_within_batch_collapse() {
        let sink = MemorySink::new();
        let outcome = copy_lazy(&sink, authors(&[(1, "Curie"), (1, "Curie")]))
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 1);
        assert_eq!(sink.row_count(Table::Author), 1);
    }

    #[tokio::test]
    async fn test_generated_ids_keep_occurrences() {
        let sink = MemorySink::new();
        copy_lazy(&sink, authors(&[(1, "Curie")])).await.unwrap();

        let links = || {
            CopyBatch::new(Table::PaperLink, &["paper_id", "author_hash"])
                .with_rows([
                    vec![CopyValue::Int(10), CopyValue::Int(1)],
                    vec![CopyValue::Int(10), CopyValue::Int(1)],
                ])
        };
        copy_lazy(&sink, links()).await.unwrap();
        copy_lazy(&sink, links()).await.unwrap();

        assert_eq!(sink.row_count(Table::PaperLink), 4);
        let ids = sink.column_values(Table::PaperLink, "id");
        assert_eq!(ids, (1..=4).map(CopyValue::Int).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_foreign_key_violation_rolls_back() {
        let sink = MemorySink::new();
        copy_lazy(&sink, authors(&[(1, "Curie")])).await.unwrap();

        let batch = CopyBatch::new(Table::PaperLink, &["paper_id", "author_hash"])
            .with_rows([
                vec![CopyValue::Int(10), CopyValue::Int(1)],
                vec![CopyValue::Int(11), CopyValue::Int(99)],
            ]);
        let err = copy_lazy(&sink, batch).await.unwrap_err();

        assert!(matches!(err, MergeError::ForeignKey { column: "author_hash", .. }));
        assert!(!err.is_validation());
        assert_eq!(sink.row_count(Table::PaperLink), 0);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let sink = MemorySink::new();
        let outcome = copy_lazy(&sink, authors(&[])).await.unwrap();
        assert_eq!(outcome, MergeOutcome::empty(Table::Author));
        assert!(sink.counts().iter().all(|(_, n)| *n == 0));
    }

    #[tokio::test]
    async fn test_audit_reports_skipped_rows() {
        let sink = MemorySink::new();
        copy_lazy(&sink, authors(&[(1, "Curie")])).await.unwrap();

        let batch = authors(&[(1, "Curie"), (2, "Meitner")]).audit_skipped("identity_hash");
        let outcome = copy_lazy(&sink, batch).await.unwrap();

        assert_eq!(outcome.inserted, 1);
        assert_eq!(
            outcome.skipped_rows,
            Some(vec![vec![CopyValue::Int(1), CopyValue::from("Curie")]])
        );
    }
}
