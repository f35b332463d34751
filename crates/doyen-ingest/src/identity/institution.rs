use serde::Serialize;
use serde_json::Value;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use super::{CanonicalTuple, DurableHash, EntityKind, Identity};

/// An institutional affiliation
///
/// External identifiers are an unordered set for identity purposes; they are
/// kept sorted so the stored JSON list is deterministic too.
#[derive(Debug, Clone, Serialize)]
pub struct InstitutionInfo {
    name: String,
    identifiers: Vec<String>,
    #[serde(skip)]
    hash: OnceLock<DurableHash>,
}

/// `(name, sorted identifiers)`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct InstitutionIdentity {
    pub name: String,
    pub identifiers: Vec<String>,
}

impl CanonicalTuple for InstitutionIdentity {
    fn to_canonical(&self) -> Value {
        Value::Array(vec![
            Value::from(self.name.as_str()),
            Value::from(self.identifiers.clone()),
        ])
    }
}

impl InstitutionInfo {
    pub fn new(name: impl Into<String>, mut identifiers: Vec<String>) -> Self {
        identifiers.sort();
        Self {
            name: name.into(),
            identifiers,
            hash: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }
}

impl Identity for InstitutionInfo {
    type Tuple = InstitutionIdentity;

    fn kind(&self) -> EntityKind {
        EntityKind::Institution
    }

    fn identity_tuple(&self) -> InstitutionIdentity {
        InstitutionIdentity {
            name: self.name.clone(),
            identifiers: self.identifiers.clone(),
        }
    }

    fn durable_hash(&self) -> DurableHash {
        *self
            .hash
            .get_or_init(|| DurableHash::of_canonical(&self.identity_tuple().canonical_string()))
    }
}

impl PartialEq for InstitutionInfo {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.identifiers == other.identifiers
    }
}

impl Eq for InstitutionInfo {}

impl Hash for InstitutionInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.durable_hash().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_order_does_not_matter() {
        let a = InstitutionInfo::new("Harvard", vec!["grid.38142.3c".into(), "ror:03vek6s52".into()]);
        let b = InstitutionInfo::new("Harvard", vec!["ror:03vek6s52".into(), "grid.38142.3c".into()]);

        assert_eq!(a, b);
        assert_eq!(a.identity_tuple(), b.identity_tuple());
        assert_eq!(a.durable_hash(), b.durable_hash());
    }

    #[test]
    fn test_canonical_form() {
        let inst = InstitutionInfo::new("MIT", vec!["z".into(), "a".into()]);
        assert_eq!(inst.identity_tuple().canonical_string(), r#"["MIT",["a","z"]]"#);
    }

    #[test]
    fn test_name_changes_hash() {
        let a = InstitutionInfo::new("MIT", vec![]);
        let b = InstitutionInfo::new("M.I.T.", vec![]);
        assert_ne!(a, b);
        assert_ne!(a.durable_hash(), b.durable_hash());
    }

    #[test]
    fn test_hash_is_memoized() {
        let inst = InstitutionInfo::new("MIT", vec![]);
        assert!(inst.hash.get().is_none());
        let first = inst.durable_hash();
        assert_eq!(inst.hash.get(), Some(&first));
        assert_eq!(inst.durable_hash(), first);
    }
}
