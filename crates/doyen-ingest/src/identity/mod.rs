//! Content-addressed identity for bibliographic entities
//!
//! Every entity value exposes an *identity tuple*: the order-normalized set
//! of fields that decides whether two values denote the same real-world
//! entity. The tuple is rendered to a canonical JSON string and digested with
//! MD5; the first 15 hex digits (60 bits) become the entity's
//! [`DurableHash`], which is the storage key in every destination relation.
//!
//! Identity is pure: nothing outside the tuple (the memoized hash included)
//! influences equality or the hash.

mod author;
mod institution;

pub use author::{AuthorIdentity, AuthorInfo};
pub use institution::{InstitutionIdentity, InstitutionInfo};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Stable content address of an entity value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DurableHash(i64);

impl DurableHash {
    /// Number of leading hex digits of the MD5 digest kept in the hash
    pub const HEX_DIGITS: usize = 15;

    /// Digest a canonical identity string
    pub fn of_canonical(canonical: &str) -> Self {
        let digest = md5::compute(canonical.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest.0[..8]);
        // 16 hex digits in the first 8 bytes, drop the last nibble
        Self((u64::from_be_bytes(head) >> 4) as i64)
    }

    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for DurableHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<DurableHash> for i64 {
    fn from(hash: DurableHash) -> Self {
        hash.0
    }
}

/// An identity tuple with a deterministic textual rendering
pub trait CanonicalTuple: Clone + Eq + Ord + fmt::Debug {
    fn to_canonical(&self) -> Value;

    fn canonical_string(&self) -> String {
        self.to_canonical().to_string()
    }
}

/// An entity value with content-derived identity
pub trait Identity {
    type Tuple: CanonicalTuple;

    fn kind(&self) -> EntityKind;

    fn identity_tuple(&self) -> Self::Tuple;

    /// Memoized durable hash of [`Identity::identity_tuple`]
    fn durable_hash(&self) -> DurableHash;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Author,
    Institution,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Author => write!(f, "author"),
            EntityKind::Institution => write!(f, "institution"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Cannot compare equality between {left} and {right}")]
    KindMismatch { left: EntityKind, right: EntityKind },
}

/// A borrowed entity of either kind
///
/// Comparing entities of different kinds is a caller defect and is reported
/// as [`IdentityError::KindMismatch`] instead of `false`.
#[derive(Debug, Clone, Copy)]
pub enum Entity<'a> {
    Author(&'a AuthorInfo),
    Institution(&'a InstitutionInfo),
}

impl Entity<'_> {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Author(_) => EntityKind::Author,
            Entity::Institution(_) => EntityKind::Institution,
        }
    }

    pub fn durable_hash(&self) -> DurableHash {
        match self {
            Entity::Author(author) => author.durable_hash(),
            Entity::Institution(institution) => institution.durable_hash(),
        }
    }

    pub fn try_eq(&self, other: &Entity<'_>) -> Result<bool, IdentityError> {
        match (self, other) {
            (Entity::Author(a), Entity::Author(b)) => Ok(a == b),
            (Entity::Institution(a), Entity::Institution(b)) => Ok(a == b),
            _ => Err(IdentityError::KindMismatch {
                left: self.kind(),
                right: other.kind(),
            }),
        }
    }
}

impl<'a> From<&'a AuthorInfo> for Entity<'a> {
    fn from(author: &'a AuthorInfo) -> Self {
        Entity::Author(author)
    }
}

impl<'a> From<&'a InstitutionInfo> for Entity<'a> {
    fn from(institution: &'a InstitutionInfo) -> Self {
        Entity::Institution(institution)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_first_fifteen_hex_digits_of_md5() {
        let canonical = r#"["MIT",["grid.116068.8"]]"#;
        let hex = format!("{:x}", md5::compute(canonical.as_bytes()));
        let expected = i64::from_str_radix(&hex[..DurableHash::HEX_DIGITS], 16).unwrap();

        assert_eq!(DurableHash::of_canonical(canonical).value(), expected);
    }

    #[test]
    fn test_hash_is_non_negative() {
        for text in ["", "a", "author", "\u{00e9}cole", "[null,null]"] {
            assert!(DurableHash::of_canonical(text).value() >= 0);
        }
    }

    #[test]
    fn test_cross_kind_comparison_is_an_error() {
        let institution = InstitutionInfo::new("MIT", vec!["grid.116068.8".to_string()]);
        let author = AuthorInfo::new("Curie").with_affiliations(vec![institution.clone()]);

        let err = Entity::from(&author)
            .try_eq(&Entity::from(&institution))
            .unwrap_err();
        assert_eq!(
            err,
            IdentityError::KindMismatch {
                left: EntityKind::Author,
                right: EntityKind::Institution
            }
        );
    }

    #[test]
    fn test_same_kind_comparison() {
        let a = InstitutionInfo::new("MIT", vec!["b".into(), "a".into()]);
        let b = InstitutionInfo::new("MIT", vec!["a".into(), "b".into()]);
        let c = InstitutionInfo::new("Caltech", vec![]);

        assert_eq!(Entity::from(&a).try_eq(&Entity::from(&b)), Ok(true));
        assert_eq!(Entity::from(&a).try_eq(&Entity::from(&c)), Ok(false));
        assert_eq!(Entity::from(&a).durable_hash(), b.durable_hash());
    }
}
