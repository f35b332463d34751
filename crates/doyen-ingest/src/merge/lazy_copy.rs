//! PostgreSQL lazy copy
//!
//! One call, one transaction:
//!
//! ```text
//! CREATE TEMP TABLE "tmp_author" ON COMMIT DROP AS SELECT <cols> FROM "public"."author" WITH NO DATA
//! COPY "tmp_author" (<cols>) FROM STDIN WITH (FORMAT binary)
//! INSERT INTO "public"."author" (<cols>) SELECT <cols> FROM "tmp_author"
//!     ON CONFLICT ON CONSTRAINT "author_pkey" DO NOTHING
//! COMMIT
//! ```
//!
//! The staging relation carries no constraints and is dropped with the
//! transaction, whether it commits or rolls back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use std::time::Instant;
use tracing::debug;

use super::{
    Column, ColumnType, CopyValue, MergeError, MergeOutcome, PreparedBatch, RelationSink, Table,
};

pub const DEFAULT_SCHEMA: &str = "public";

/// Bytes handed to the COPY stream per send
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

pub struct LazyCopyManager {
    pool: PgPool,
    schema: String,
    chunk_size: usize,
}

impl LazyCopyManager {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema: DEFAULT_SCHEMA.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    fn copy_error(&self, table: Table, source: sqlx::Error) -> MergeError {
        MergeError::Copy {
            schema: self.schema.clone(),
            table,
            source,
        }
    }

    fn merge_error(&self, table: Table, source: sqlx::Error) -> MergeError {
        MergeError::Merge {
            schema: self.schema.clone(),
            table,
            source,
        }
    }

    fn database_error(&self, table: Table, source: sqlx::Error) -> MergeError {
        MergeError::Database {
            schema: self.schema.clone(),
            table,
            source,
        }
    }

    async fn fetch_skipped(
        &self,
        conn: &mut PgConnection,
        batch: &PreparedBatch,
        order_by: &str,
        inserted: u64,
    ) -> Result<Vec<Vec<CopyValue>>, MergeError> {
        let table = batch.table();
        let sql = skipped_sql(&self.schema, batch, order_by);
        let limit = i64::try_from(inserted).unwrap_or(i64::MAX);

        let rows = sqlx::query(&sql)
            .bind(limit)
            .fetch_all(conn)
            .await
            .map_err(|e| self.database_error(table, e))?;

        rows.iter()
            .map(|row| decode_row(row, batch.columns()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.database_error(table, e))
    }
}

#[async_trait]
impl RelationSink for LazyCopyManager {
    async fn merge(&self, batch: PreparedBatch) -> Result<MergeOutcome, MergeError> {
        let table = batch.table();
        let start = Instant::now();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| self.database_error(table, e))?;

        sqlx::query(&create_staging_sql(&self.schema, &batch))
            .execute(&mut *tx)
            .await
            .map_err(|e| self.copy_error(table, e))?;

        let payload = batch.binary_payload();
        let mut copy = tx
            .copy_in_raw(&copy_sql(&batch))
            .await
            .map_err(|e| self.copy_error(table, e))?;
        for chunk in payload.chunks(self.chunk_size) {
            copy.send(chunk)
                .await
                .map_err(|e| self.copy_error(table, e))?;
        }
        let staged = copy.finish().await.map_err(|e| self.copy_error(table, e))?;
        debug!(
            relation = %table,
            staged,
            bytes = payload.len(),
            elapsed = ?start.elapsed(),
            "Staged batch"
        );

        let inserted = sqlx::query(&insert_sql(&self.schema, &batch))
            .execute(&mut *tx)
            .await
            .map_err(|e| self.merge_error(table, e))?
            .rows_affected();

        let skipped_rows = match batch.audit_order_by() {
            Some(order_by) => Some(
                self.fetch_skipped(&mut tx, &batch, order_by, inserted)
                    .await?,
            ),
            None => None,
        };

        tx.commit()
            .await
            .map_err(|e| self.database_error(table, e))?;

        debug!(relation = %table, inserted, elapsed = ?start.elapsed(), "Committed merge");

        Ok(MergeOutcome {
            table,
            staged,
            inserted,
            skipped_rows,
        })
    }
}

pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn staging_name(table: Table) -> String {
    quote_ident(&format!("tmp_{}", table.name()))
}

fn qualified_name(schema: &str, table: Table) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table.name()))
}

fn column_list(batch: &PreparedBatch) -> String {
    batch
        .column_names()
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn create_staging_sql(schema: &str, batch: &PreparedBatch) -> String {
    format!(
        "CREATE TEMP TABLE {} ON COMMIT DROP AS SELECT {} FROM {} WITH NO DATA",
        staging_name(batch.table()),
        column_list(batch),
        qualified_name(schema, batch.table()),
    )
}

pub(crate) fn copy_sql(batch: &PreparedBatch) -> String {
    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT binary)",
        staging_name(batch.table()),
        column_list(batch),
    )
}

pub(crate) fn insert_sql(schema: &str, batch: &PreparedBatch) -> String {
    let columns = column_list(batch);
    format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} ON CONFLICT ON CONSTRAINT {} DO NOTHING",
        qualified_name(schema, batch.table()),
        columns,
        columns,
        staging_name(batch.table()),
        quote_ident(&batch.constraint_name()),
    )
}

/// Staged rows missing from the newest `$1` target rows
pub(crate) fn skipped_sql(schema: &str, batch: &PreparedBatch, order_by: &str) -> String {
    let columns = column_list(batch);
    format!(
        "SELECT {} FROM {} EXCEPT (SELECT {} FROM {} ORDER BY {} DESC LIMIT $1)",
        columns,
        staging_name(batch.table()),
        columns,
        qualified_name(schema, batch.table()),
        quote_ident(order_by),
    )
}

fn decode_row(row: &PgRow, columns: &[&'static Column]) -> Result<Vec<CopyValue>, sqlx::Error> {
    columns
        .iter()
        .enumerate()
        .map(|(i, column)| -> Result<CopyValue, sqlx::Error> {
            let value: CopyValue = match column.ty {
                ColumnType::BigInt => row.try_get::<Option<i64>, _>(i)?.into(),
                ColumnType::Integer => row.try_get::<Option<i32>, _>(i)?.into(),
                ColumnType::Double => row.try_get::<Option<f64>, _>(i)?.into(),
                ColumnType::Text => row.try_get::<Option<String>, _>(i)?.into(),
                ColumnType::Jsonb => row.try_get::<Option<serde_json::Value>, _>(i)?.into(),
                ColumnType::Bytea => row
                    .try_get::<Option<Vec<u8>>, _>(i)?
                    .map(CopyValue::Bytes)
                    .unwrap_or(CopyValue::Null),
                ColumnType::Timestamptz => row.try_get::<Option<DateTime<Utc>>, _>(i)?.into(),
            };
            Ok(value)
        })
        .collect()
}
