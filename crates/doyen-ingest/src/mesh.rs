//! MeSH descriptor codes
//!
//! Descriptor codes (`D003920`) and supplementary concept codes
//! (`C000657245`) are stored as integers: the leading class letter becomes a
//! digit (`D` -> `1`, `C` -> `2`) and the rest is read as base 10, so
//! `D003920` is `1003920` and `C000657245` is `2000657245`. The mapping is
//! reversible because the remainder is zero padded to a fixed width per
//! class.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshIdError {
    #[error("MeSH id is empty")]
    Empty,

    #[error("Unsupported MeSH id prefix '{prefix}' in '{code}'")]
    UnsupportedPrefix { code: String, prefix: char },

    #[error("MeSH id '{0}' has a non-numeric remainder")]
    NonNumeric(String),

    #[error("MeSH id '{0}' does not fit in a 64-bit integer")]
    Overflow(String),
}

/// A validated MeSH code together with its integer key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MeshCode {
    code: String,
    numeric: i64,
}

impl MeshCode {
    pub fn parse(code: &str) -> Result<Self, MeshIdError> {
        Ok(Self {
            code: code.to_string(),
            numeric: mesh_int(code)?,
        })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Integer key used in the `mesh_term` and `mesh_annotation` relations
    pub fn numeric(&self) -> i64 {
        self.numeric
    }
}

impl fmt::Display for MeshCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)
    }
}

impl TryFrom<String> for MeshCode {
    type Error = MeshIdError;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        let numeric = mesh_int(&code)?;
        Ok(Self { code, numeric })
    }
}

impl From<MeshCode> for String {
    fn from(code: MeshCode) -> Self {
        code.code
    }
}

/// Map a MeSH code to its integer key
pub fn mesh_int(code: &str) -> Result<i64, MeshIdError> {
    let mut chars = code.chars();
    let prefix = chars.next().ok_or(MeshIdError::Empty)?;
    let class_digit = match prefix {
        'D' => '1',
        'C' => '2',
        other => {
            return Err(MeshIdError::UnsupportedPrefix {
                code: code.to_string(),
                prefix: other,
            })
        }
    };

    let remainder = chars.as_str();
    if remainder.is_empty() || !remainder.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MeshIdError::NonNumeric(code.to_string()));
    }

    let mut digits = String::with_capacity(code.len());
    digits.push(class_digit);
    digits.push_str(remainder);
    digits
        .parse::<i64>()
        .map_err(|_| MeshIdError::Overflow(code.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_mapping() {
        assert_eq!(mesh_int("D003920").unwrap(), 1003920);
        assert_eq!(mesh_int("D001943").unwrap(), 1001943);
        assert_ne!(mesh_int("D001943").unwrap(), 100001943);
    }

    #[test]
    fn test_supplementary_concept_mapping() {
        assert_eq!(mesh_int("C000657245").unwrap(), 2000657245);
    }

    #[test]
    fn test_unsupported_prefix() {
        assert_eq!(
            mesh_int("Q000235"),
            Err(MeshIdError::UnsupportedPrefix {
                code: "Q000235".into(),
                prefix: 'Q'
            })
        );
        assert!(matches!(mesh_int("d003920"), Err(MeshIdError::UnsupportedPrefix { .. })));
    }

    #[test]
    fn test_malformed_codes() {
        assert_eq!(mesh_int(""), Err(MeshIdError::Empty));
        assert_eq!(mesh_int("D"), Err(MeshIdError::NonNumeric("D".into())));
        assert_eq!(mesh_int("D00C920"), Err(MeshIdError::NonNumeric("D00C920".into())));
        assert_eq!(mesh_int("D-3920"), Err(MeshIdError::NonNumeric("D-3920".into())));
        assert!(matches!(mesh_int("D99999999999999999999"), Err(MeshIdError::Overflow(_))));
    }

    #[test]
    fn test_mesh_code_serde() {
        let code: MeshCode = serde_json::from_str("\"D003920\"").unwrap();
        assert_eq!(code.numeric(), 1003920);
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"D003920\"");
        assert!(serde_json::from_str::<MeshCode>("\"X1\"").is_err());
    }
}
