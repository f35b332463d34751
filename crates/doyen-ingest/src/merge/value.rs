//! Row values and their binary COPY encoding
//!
//! Encoding rules: strings become UTF-8 bytes, sequences and mappings are
//! serialized to JSON text, byte strings, nulls, numbers and timestamps pass
//! through in the column's wire representation. A value that does not fit
//! its column is rejected while the batch is prepared, before any store
//! interaction.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::schema::ColumnType;
use crate::identity::DurableHash;

/// Seconds between the Unix epoch and the Postgres epoch (2000-01-01)
const PG_EPOCH_OFFSET_MICROS: i64 = 946_684_800_000_000;

/// jsonb binary format version
const JSONB_VERSION: u8 = 1;

/// A single field of a batch row
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CopyValue {
    Null,
    Text(String),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
}

/// Why a value cannot be encoded for a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    Unsupported,
    OutOfRange,
}

/// Wire payload of one field; `None` is SQL NULL
pub type EncodedField = Option<Vec<u8>>;

impl CopyValue {
    pub fn kind(&self) -> &'static str {
        match self {
            CopyValue::Null => "null",
            CopyValue::Text(_) => "text",
            CopyValue::Json(_) => "json",
            CopyValue::Bytes(_) => "bytes",
            CopyValue::Int(_) => "integer",
            CopyValue::Float(_) => "float",
            CopyValue::Timestamp(_) => "timestamp",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CopyValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CopyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CopyValue::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Binary COPY payload of this value for a column of type `ty`
    pub fn encode(&self, ty: ColumnType) -> Result<EncodedField, EncodeError> {
        let bytes = match (self, ty) {
            (CopyValue::Null, _) => return Ok(None),
            (CopyValue::Text(s), ColumnType::Text) => s.as_bytes().to_vec(),
            (CopyValue::Json(v), ColumnType::Text) => v.to_string().into_bytes(),
            (CopyValue::Json(v), ColumnType::Jsonb) => {
                let text = v.to_string();
                let mut out = Vec::with_capacity(text.len() + 1);
                out.push(JSONB_VERSION);
                out.extend_from_slice(text.as_bytes());
                out
            }
            (CopyValue::Bytes(b), ColumnType::Bytea) => b.clone(),
            (CopyValue::Int(v), ColumnType::BigInt) => v.to_be_bytes().to_vec(),
            (CopyValue::Int(v), ColumnType::Integer) => i32::try_from(*v)
                .map_err(|_| EncodeError::OutOfRange)?
                .to_be_bytes()
                .to_vec(),
            (CopyValue::Int(v), ColumnType::Double) => (*v as f64).to_be_bytes().to_vec(),
            (CopyValue::Float(v), ColumnType::Double) => v.to_be_bytes().to_vec(),
            (CopyValue::Timestamp(t), ColumnType::Timestamptz) => (t.timestamp_micros()
                - PG_EPOCH_OFFSET_MICROS)
                .to_be_bytes()
                .to_vec(),
            _ => return Err(EncodeError::Unsupported),
        };
        Ok(Some(bytes))
    }
}

impl From<&str> for CopyValue {
    fn from(v: &str) -> Self {
        CopyValue::Text(v.to_string())
    }
}

impl From<String> for CopyValue {
    fn from(v: String) -> Self {
        CopyValue::Text(v)
    }
}

impl From<i64> for CopyValue {
    fn from(v: i64) -> Self {
        CopyValue::Int(v)
    }
}

impl From<i32> for CopyValue {
    fn from(v: i32) -> Self {
        CopyValue::Int(i64::from(v))
    }
}

impl From<f64> for CopyValue {
    fn from(v: f64) -> Self {
        CopyValue::Float(v)
    }
}

impl From<DurableHash> for CopyValue {
    fn from(v: DurableHash) -> Self {
        CopyValue::Int(v.value())
    }
}

impl From<DateTime<Utc>> for CopyValue {
    fn from(v: DateTime<Utc>) -> Self {
        CopyValue::Timestamp(v)
    }
}

impl From<serde_json::Value> for CopyValue {
    fn from(v: serde_json::Value) -> Self {
        CopyValue::Json(v)
    }
}

impl From<Vec<String>> for CopyValue {
    fn from(v: Vec<String>) -> Self {
        CopyValue::Json(serde_json::Value::from(v))
    }
}

impl From<&[String]> for CopyValue {
    fn from(v: &[String]) -> Self {
        CopyValue::from(v.to_vec())
    }
}

impl<T: Into<CopyValue>> From<Option<T>> for CopyValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(CopyValue::Null)
    }
}
