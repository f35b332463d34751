//! Extracted records at the parser boundary
//!
//! An input unit (one source file) arrives as a list of articles, each with
//! its paper id, raw author records and MeSH annotations. Raw records are
//! loosely typed; [`AuthorRecord::validate`] is the explicit parse step that
//! turns one into an [`AuthorInfo`] or reports why it was dropped.
//!
//! Author and MeSH entries are read through [`RawRecord`], so one entry of
//! the wrong shape is dropped on its own instead of failing the whole unit.

mod source;

pub use source::{JsonDirectorySource, UnitSource};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

use crate::identity::{AuthorInfo, InstitutionInfo};
use crate::mesh::MeshIdError;

/// Record-level validation failures; the record is skipped, the unit continues
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Author record has no non-empty field")]
    Empty,

    #[error("Author record has no last name")]
    MissingLastName,

    #[error("Affiliation #{index} has no name")]
    MissingAffiliationName { index: usize },

    #[error("Invalid paper id '{0}'")]
    InvalidPaperId(String),

    #[error(transparent)]
    MeshId(#[from] MeshIdError),

    #[error("Malformed record: {0}")]
    Malformed(String),
}

/// One list entry that either matched its record type or did not
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord<T> {
    Parsed(T),
    Malformed { value: Value, error: String },
}

impl<T> RawRecord<T> {
    pub fn parsed(&self) -> Result<&T, ValidationError> {
        match self {
            RawRecord::Parsed(record) => Ok(record),
            RawRecord::Malformed { error, .. } => Err(ValidationError::Malformed(error.clone())),
        }
    }
}

impl<T: Serialize> RawRecord<T> {
    /// Compact JSON of the entry as received, for log context
    pub fn context(&self) -> String {
        match self {
            RawRecord::Parsed(record) => serde_json::to_string(record).unwrap_or_default(),
            RawRecord::Malformed { value, .. } => value.to_string(),
        }
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for RawRecord<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match T::deserialize(&value) {
            Ok(record) => RawRecord::Parsed(record),
            Err(e) => RawRecord::Malformed {
                error: e.to_string(),
                value,
            },
        })
    }
}

impl<T: Serialize> Serialize for RawRecord<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RawRecord::Parsed(record) => record.serialize(serializer),
            RawRecord::Malformed { value, .. } => value.serialize(serializer),
        }
    }
}

/// One input unit as produced by the extraction collaborator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedUnit {
    /// Source file name; the unit of checkpointing
    #[serde(default)]
    pub unit_id: String,

    #[serde(default)]
    pub articles: Vec<ArticleRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub pmid: String,

    #[serde(default)]
    pub authors: Vec<RawRecord<AuthorRecord>>,

    #[serde(default)]
    pub mesh_annotations: Vec<RawRecord<MeshAnnotationRecord>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshAnnotationRecord {
    /// MeSH code, e.g. `D003920`
    pub mesh: String,
    /// Human-readable term label
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffiliationRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub identifiers: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorRecord {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub initials: Option<String>,
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub affiliations: Vec<AffiliationRecord>,
}

fn non_empty(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|v| !v.is_empty())
}

impl AuthorRecord {
    /// True if no field carries a value
    pub fn is_blank(&self) -> bool {
        !non_empty(&self.first_name)
            && !non_empty(&self.last_name)
            && !non_empty(&self.initials)
            && !non_empty(&self.suffix)
            && !non_empty(&self.identifier)
            && self.affiliations.is_empty()
    }

    /// Parse the raw record into an [`AuthorInfo`]
    pub fn validate(&self) -> Result<AuthorInfo, ValidationError> {
        if self.is_blank() {
            return Err(ValidationError::Empty);
        }

        let last_name = match self.last_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => return Err(ValidationError::MissingLastName),
        };

        let affiliations = self
            .affiliations
            .iter()
            .enumerate()
            .map(|(index, affiliation)| match affiliation.name.as_deref() {
                Some(name) => Ok(InstitutionInfo::new(
                    name,
                    affiliation.identifiers.clone().unwrap_or_default(),
                )),
                None => Err(ValidationError::MissingAffiliationName { index }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AuthorInfo::new(last_name)
            .with_first_name(self.first_name.clone())
            .with_initials(self.initials.clone())
            .with_suffix(self.suffix.clone())
            .with_identifier(self.identifier.clone())
            .with_affiliations(affiliations))
    }
}
