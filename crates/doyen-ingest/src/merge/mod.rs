//! Bulk merge engine ("lazy copy")
//!
//! A batch of rows for one destination relation is staged outside the
//! relation, then merged with `ON CONFLICT ... DO NOTHING` so rows whose
//! key already exists are dropped instead of aborting the batch.
//!
//! The flow is split in two:
//!
//! 1. [`CopyBatch::prepare`] checks the batch against the schema catalog and
//!    encodes every value. Nothing is sent to the store if any row fails.
//! 2. A [`RelationSink`] performs the staged merge. [`LazyCopyManager`] does
//!    it against PostgreSQL with a binary `COPY`; [`MemorySink`] keeps the
//!    same semantics in memory for dry runs and tests.
//!
//! [`copy_lazy`] ties both together and treats an empty batch as a no-op.

mod binary;
mod lazy_copy;
mod memory;
pub mod schema;
mod value;

pub use binary::BinaryCopyWriter;
pub use lazy_copy::LazyCopyManager;
pub use memory::MemorySink;
pub use schema::{Column, ColumnType, ForeignKey, Table};
pub use value::{CopyValue, EncodeError, EncodedField};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Largest field the binary COPY format can carry
const MAX_FIELD_BYTES: usize = i32::MAX as usize;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Unknown column '{column}' for relation {table}")]
    UnknownColumn { table: Table, column: String },

    #[error("Column {table}.{column} is generated and cannot be loaded")]
    GeneratedColumn { table: Table, column: &'static str },

    #[error("Required column {table}.{column} is missing from the batch")]
    MissingColumn { table: Table, column: &'static str },

    #[error("Row {row} for {table} has {found} values, expected {expected}")]
    ColumnCount {
        table: Table,
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Unsupported {kind} value for {table}.{column} ({column_type}) in row {row}")]
    UnsupportedValue {
        table: Table,
        column: &'static str,
        row: usize,
        kind: &'static str,
        column_type: ColumnType,
    },

    #[error("Value for {table}.{column} in row {row} is out of range for {column_type}")]
    OutOfRange {
        table: Table,
        column: &'static str,
        row: usize,
        column_type: ColumnType,
    },

    #[error("Null value for non-nullable column {table}.{column} in row {row}")]
    NullValue {
        table: Table,
        column: &'static str,
        row: usize,
    },

    #[error("Field {table}.{column} in row {row} is too large for binary copy")]
    FieldTooLarge {
        table: Table,
        column: &'static str,
        row: usize,
    },

    #[error("Relation {table} has no constraint named '{constraint}'")]
    UnknownConstraint { table: Table, constraint: String },

    #[error("Insert into {table} violates foreign key on {column}: no {references} row with key {value}")]
    ForeignKey {
        table: Table,
        column: &'static str,
        references: Table,
        value: String,
    },

    #[error("Error doing lazy binary copy into {schema}.{table}: {source}")]
    Copy {
        schema: String,
        table: Table,
        #[source]
        source: sqlx::Error,
    },

    #[error("Error merging staged rows into {schema}.{table}: {source}")]
    Merge {
        schema: String,
        table: Table,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database error on {schema}.{table}: {source}")]
    Database {
        schema: String,
        table: Table,
        #[source]
        source: sqlx::Error,
    },
}

impl MergeError {
    /// Raised while preparing the batch, before any store interaction
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MergeError::UnknownColumn { .. }
                | MergeError::GeneratedColumn { .. }
                | MergeError::MissingColumn { .. }
                | MergeError::ColumnCount { .. }
                | MergeError::UnsupportedValue { .. }
                | MergeError::OutOfRange { .. }
                | MergeError::NullValue { .. }
                | MergeError::FieldTooLarge { .. }
                | MergeError::UnknownConstraint { .. }
        )
    }

    /// Relation the failed merge was aimed at
    pub fn table(&self) -> Table {
        match self {
            MergeError::UnknownColumn { table, .. }
            | MergeError::GeneratedColumn { table, .. }
            | MergeError::MissingColumn { table, .. }
            | MergeError::ColumnCount { table, .. }
            | MergeError::UnsupportedValue { table, .. }
            | MergeError::OutOfRange { table, .. }
            | MergeError::NullValue { table, .. }
            | MergeError::FieldTooLarge { table, .. }
            | MergeError::UnknownConstraint { table, .. }
            | MergeError::ForeignKey { table, .. }
            | MergeError::Copy { table, .. }
            | MergeError::Merge { table, .. }
            | MergeError::Database { table, .. } => *table,
        }
    }
}

/// Uniqueness constraint a merge is scoped to
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConflictTarget {
    #[default]
    PrimaryKey,
    Constraint(String),
}

impl ConflictTarget {
    pub fn constraint_name(&self, table: Table) -> String {
        match self {
            ConflictTarget::PrimaryKey => table.primary_key_constraint(),
            ConflictTarget::Constraint(name) => name.clone(),
        }
    }
}

/// Rows for one relation, as handed over by the orchestrator
#[derive(Debug, Clone)]
pub struct CopyBatch {
    table: Table,
    columns: Vec<String>,
    rows: Vec<Vec<CopyValue>>,
    conflict: ConflictTarget,
    audit_order_by: Option<String>,
}

impl CopyBatch {
    pub fn new(table: Table, columns: &[&str]) -> Self {
        Self {
            table,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
            conflict: ConflictTarget::PrimaryKey,
            audit_order_by: None,
        }
    }

    /// Scope the merge to a named uniqueness constraint instead of the primary key
    pub fn on_constraint(mut self, name: impl Into<String>) -> Self {
        self.conflict = ConflictTarget::Constraint(name.into());
        self
    }

    /// Report which staged rows were not merged, comparing against the
    /// newest target rows ordered by `order_by`
    pub fn audit_skipped(mut self, order_by: impl Into<String>) -> Self {
        self.audit_order_by = Some(order_by.into());
        self
    }

    pub fn push_row(&mut self, row: Vec<CopyValue>) {
        self.rows.push(row);
    }

    pub fn with_rows(mut self, rows: impl IntoIterator<Item = Vec<CopyValue>>) -> Self {
        self.rows.extend(rows);
        self
    }

    pub fn table(&self) -> Table {
        self.table
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Validate against the catalog and encode every field
    pub fn prepare(self) -> Result<PreparedBatch, MergeError> {
        let table = self.table;

        let mut columns: Vec<&'static Column> = Vec::with_capacity(self.columns.len());
        for name in &self.columns {
            let column = table
                .column(name)
                .ok_or_else(|| MergeError::UnknownColumn {
                    table,
                    column: name.clone(),
                })?;
            if column.generated {
                return Err(MergeError::GeneratedColumn {
                    table,
                    column: column.name,
                });
            }
            columns.push(column);
        }

        if let Some(missing) = table
            .columns()
            .iter()
            .find(|c| !c.nullable && !c.generated && !columns.iter().any(|k| k.name == c.name))
        {
            return Err(MergeError::MissingColumn {
                table,
                column: missing.name,
            });
        }

        let constraint = self.conflict.constraint_name(table);
        if !table.unique_constraints().contains(&constraint) {
            return Err(MergeError::UnknownConstraint { table, constraint });
        }

        let audit_order_by = match self.audit_order_by {
            Some(name) => Some(
                table
                    .column(&name)
                    .ok_or(MergeError::UnknownColumn { table, column: name })?
                    .name,
            ),
            None => None,
        };

        let mut fields = Vec::with_capacity(self.rows.len());
        for (row_index, row) in self.rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(MergeError::ColumnCount {
                    table,
                    row: row_index,
                    expected: columns.len(),
                    found: row.len(),
                });
            }

            let mut encoded = Vec::with_capacity(row.len());
            for (column, value) in columns.iter().zip(row) {
                if value.is_null() && !column.nullable {
                    return Err(MergeError::NullValue {
                        table,
                        column: column.name,
                        row: row_index,
                    });
                }
                let field = value.encode(column.ty).map_err(|e| match e {
                    EncodeError::Unsupported => MergeError::UnsupportedValue {
                        table,
                        column: column.name,
                        row: row_index,
                        kind: value.kind(),
                        column_type: column.ty,
                    },
                    EncodeError::OutOfRange => MergeError::OutOfRange {
                        table,
                        column: column.name,
                        row: row_index,
                        column_type: column.ty,
                    },
                })?;
                if field.as_ref().is_some_and(|b| b.len() > MAX_FIELD_BYTES) {
                    return Err(MergeError::FieldTooLarge {
                        table,
                        column: column.name,
                        row: row_index,
                    });
                }
                encoded.push(field);
            }
            fields.push(encoded);
        }

        Ok(PreparedBatch {
            table,
            columns,
            rows: self.rows,
            fields,
            conflict: self.conflict,
            audit_order_by,
        })
    }
}

/// A validated batch; every row fits the relation and is already encoded
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    table: Table,
    columns: Vec<&'static Column>,
    rows: Vec<Vec<CopyValue>>,
    fields: Vec<Vec<EncodedField>>,
    conflict: ConflictTarget,
    audit_order_by: Option<&'static str>,
}

impl PreparedBatch {
    pub fn table(&self) -> Table {
        self.table
    }

    pub fn columns(&self) -> &[&'static Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    pub fn rows(&self) -> &[Vec<CopyValue>] {
        &self.rows
    }

    pub fn fields(&self) -> &[Vec<EncodedField>] {
        &self.fields
    }

    pub fn conflict_target(&self) -> &ConflictTarget {
        &self.conflict
    }

    pub fn constraint_name(&self) -> String {
        self.conflict.constraint_name(self.table)
    }

    pub fn audit_order_by(&self) -> Option<&'static str> {
        self.audit_order_by
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whole batch as a `COPY ... WITH (FORMAT binary)` stream
    pub fn binary_payload(&self) -> Vec<u8> {
        let mut writer = BinaryCopyWriter::new();
        for row in &self.fields {
            writer.write_row(row);
        }
        writer.finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub table: Table,
    /// Rows loaded into the staging relation
    pub staged: u64,
    /// Rows that reached the target relation
    pub inserted: u64,
    /// Staged rows absent from the newest target rows; only when audited
    pub skipped_rows: Option<Vec<Vec<CopyValue>>>,
}

impl MergeOutcome {
    pub fn empty(table: Table) -> Self {
        Self {
            table,
            staged: 0,
            inserted: 0,
            skipped_rows: None,
        }
    }

    /// Rows dropped by the conflict clause
    pub fn skipped(&self) -> u64 {
        self.staged.saturating_sub(self.inserted)
    }
}

/// Destination of staged merges
#[async_trait]
pub trait RelationSink: Send + Sync {
    /// Merge a prepared batch in its own transaction scope
    async fn merge(&self, batch: PreparedBatch) -> Result<MergeOutcome, MergeError>;
}

#[async_trait]
impl<T: RelationSink + ?Sized> RelationSink for Arc<T> {
    async fn merge(&self, batch: PreparedBatch) -> Result<MergeOutcome, MergeError> {
        (**self).merge(batch).await
    }
}

/// Prepare and merge one batch
pub async fn copy_lazy<S>(sink: &S, batch: CopyBatch) -> Result<MergeOutcome, MergeError>
where
    S: RelationSink + ?Sized,
{
    if batch.is_empty() {
        debug!(relation = %batch.table(), "Empty batch, nothing to merge");
        return Ok(MergeOutcome::empty(batch.table()));
    }

    let prepared = batch.prepare()?;
    let outcome = sink.merge(prepared).await?;

    info!(
        relation = %outcome.table,
        staged = outcome.staged,
        inserted = outcome.inserted,
        skipped = outcome.skipped(),
        "Merged batch"
    );
    Ok(outcome)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn author_row(hash: i64, last_name: &str) -> Vec<CopyValue> {
        vec![
            hash.into(),
            last_name.into(),
            CopyValue::Null,
            CopyValue::Null,
            CopyValue::Null,
            CopyValue::Null,
        ]
    }

    const AUTHOR_COLUMNS: &[&str] = &[
        "identity_hash",
        "last_name",
        "first_name",
        "initials",
        "suffix",
        "identifier",
    ];

    #[test]
    fn test_prepare_valid_batch() {
        let batch = CopyBatch::new(Table::Author, AUTHOR_COLUMNS)
            .with_rows([author_row(1, "Curie"), author_row(2, "Meitner")]);
        let prepared = batch.prepare().unwrap();

        assert_eq!(prepared.len(), 2);
        assert_eq!(prepared.constraint_name(), "author_pkey");
        assert_eq!(prepared.column_names(), AUTHOR_COLUMNS);
        assert_eq!(prepared.fields()[0][1], Some(b"Curie".to_vec()));
        assert_eq!(prepared.fields()[0][2], None);
    }

    #[test]
    fn test_unknown_column() {
        let err = CopyBatch::new(Table::Author, &["identity_hash", "last_name", "orcid"])
            .prepare()
            .unwrap_err();
        assert!(matches!(err, MergeError::UnknownColumn { ref column, .. } if column == "orcid"));
        assert!(err.is_validation());
    }

    #[test]
    fn test_generated_column_rejected() {
        let err = CopyBatch::new(Table::PaperLink, &["id", "paper_id", "author_hash"])
            .prepare()
            .unwrap_err();
        assert!(matches!(err, MergeError::GeneratedColumn { column: "id", .. }));
    }

    #[test]
    fn test_missing_required_column() {
        let err = CopyBatch::new(Table::Author, &["identity_hash", "first_name"])
            .prepare()
            .unwrap_err();
        assert!(matches!(err, MergeError::MissingColumn { column: "last_name", .. }));
    }

    #[test]
    fn test_row_width_checked() {
        let err = CopyBatch::new(Table::MeshTerm, &["mesh_id", "mesh_name"])
            .with_rows([vec![CopyValue::Int(1003920)]])
            .prepare()
            .unwrap_err();
        assert!(matches!(
            err,
            MergeError::ColumnCount {
                expected: 2,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_unsupported_value_fails_whole_batch() {
        let err = CopyBatch::new(Table::MeshTerm, &["mesh_id", "mesh_name"])
            .with_rows([
                vec![CopyValue::Int(1003920), CopyValue::from("Diabetes Mellitus")],
                vec![CopyValue::from("D001943"), CopyValue::from("Breast Neoplasms")],
            ])
            .prepare()
            .unwrap_err();
        match err {
            MergeError::UnsupportedValue {
                column,
                row,
                kind,
                column_type,
                ..
            } => {
                assert_eq!(column, "mesh_id");
                assert_eq!(row, 1);
                assert_eq!(kind, "text");
                assert_eq!(column_type, ColumnType::BigInt);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_null_in_required_column() {
        let err = CopyBatch::new(Table::PaperLink, &["paper_id", "author_hash"])
            .with_rows([vec![CopyValue::Null, CopyValue::Int(7)]])
            .prepare()
            .unwrap_err();
        assert!(matches!(err, MergeError::NullValue { column: "paper_id", .. }));
    }

    #[test]
    fn test_named_constraint() {
        let ok = CopyBatch::new(Table::MeshTerm, &["mesh_id", "mesh_name"])
            .on_constraint("mesh_term_pkey")
            .prepare();
        assert!(ok.is_ok());

        let err = CopyBatch::new(Table::MeshTerm, &["mesh_id", "mesh_name"])
            .on_constraint("mesh_term_name_key")
            .prepare()
            .unwrap_err();
        assert!(matches!(err, MergeError::UnknownConstraint { .. }));
    }

    #[test]
    fn test_audit_column_must_exist() {
        let err = CopyBatch::new(Table::PaperLink, &["paper_id", "author_hash"])
            .audit_skipped("created_at")
            .prepare()
            .unwrap_err();
        assert!(matches!(err, MergeError::UnknownColumn { .. }));

        let prepared = CopyBatch::new(Table::PaperLink, &["paper_id", "author_hash"])
            .audit_skipped("id")
            .prepare()
            .unwrap();
        assert_eq!(prepared.audit_order_by(), Some("id"));
    }

    #[test]
    fn test_binary_payload_row_count() {
        let prepared = CopyBatch::new(Table::Author, AUTHOR_COLUMNS)
            .with_rows([author_row(1, "Curie")])
            .prepare()
            .unwrap();
        let payload = prepared.binary_payload();
        assert!(payload.starts_with(b"PGCOPY\n\xff\r\n\0"));
        assert!(payload.ends_with(&[0xff, 0xff]));
        // header + field count + 2 set fields + 4 nulls + trailer
        assert_eq!(payload.len(), 19 + 2 + (4 + 8) + (4 + 5) + 4 * 4 + 2);
    }

    #[test]
    fn test_outcome_skipped() {
        let outcome = MergeOutcome {
            table: Table::Author,
            staged: 5,
            inserted: 3,
            skipped_rows: None,
        };
        assert_eq!(outcome.skipped(), 2);
    }
}
