use serde::Serialize;
use serde_json::Value;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use super::{CanonicalTuple, DurableHash, EntityKind, Identity, InstitutionIdentity, InstitutionInfo};

/// A paper author with their affiliations
///
/// Affiliations keep their input order for display, but identity uses the
/// sorted list of affiliation identities.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorInfo {
    first_name: Option<String>,
    last_name: String,
    initials: Option<String>,
    suffix: Option<String>,
    identifier: Option<String>,
    affiliations: Vec<InstitutionInfo>,
    #[serde(skip)]
    hash: OnceLock<DurableHash>,
}

/// `(first, last, initials, suffix, identifier, sorted affiliation identities)`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AuthorIdentity {
    pub first_name: Option<String>,
    pub last_name: String,
    pub initials: Option<String>,
    pub suffix: Option<String>,
    pub identifier: Option<String>,
    pub affiliations: Vec<InstitutionIdentity>,
}

impl CanonicalTuple for AuthorIdentity {
    fn to_canonical(&self) -> Value {
        Value::Array(vec![
            Value::from(self.first_name.clone()),
            Value::from(self.last_name.as_str()),
            Value::from(self.initials.clone()),
            Value::from(self.suffix.clone()),
            Value::from(self.identifier.clone()),
            Value::Array(
                self.affiliations
                    .iter()
                    .map(CanonicalTuple::to_canonical)
                    .collect(),
            ),
        ])
    }
}

impl AuthorInfo {
    pub fn new(last_name: impl Into<String>) -> Self {
        Self {
            first_name: None,
            last_name: last_name.into(),
            initials: None,
            suffix: None,
            identifier: None,
            affiliations: Vec::new(),
            hash: OnceLock::new(),
        }
    }

    pub fn with_first_name(self, first_name: Option<String>) -> Self {
        Self { first_name, hash: OnceLock::new(), ..self }
    }

    pub fn with_initials(self, initials: Option<String>) -> Self {
        Self { initials, hash: OnceLock::new(), ..self }
    }

    pub fn with_suffix(self, suffix: Option<String>) -> Self {
        Self { suffix, hash: OnceLock::new(), ..self }
    }

    pub fn with_identifier(self, identifier: Option<String>) -> Self {
        Self { identifier, hash: OnceLock::new(), ..self }
    }

    pub fn with_affiliations(self, affiliations: Vec<InstitutionInfo>) -> Self {
        Self { affiliations, hash: OnceLock::new(), ..self }
    }

    pub fn first_name(&self) -> Option<&str> {
        self.first_name.as_deref()
    }

    pub fn last_name(&self) -> &str {
        &self.last_name
    }

    pub fn initials(&self) -> Option<&str> {
        self.initials.as_deref()
    }

    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn affiliations(&self) -> &[InstitutionInfo] {
        &self.affiliations
    }
}

impl Identity for AuthorInfo {
    type Tuple = AuthorIdentity;

    fn kind(&self) -> EntityKind {
        EntityKind::Author
    }

    fn identity_tuple(&self) -> AuthorIdentity {
        let mut affiliations: Vec<InstitutionIdentity> = self
            .affiliations
            .iter()
            .map(Identity::identity_tuple)
            .collect();
        affiliations.sort();

        AuthorIdentity {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            initials: self.initials.clone(),
            suffix: self.suffix.clone(),
            identifier: self.identifier.clone(),
            affiliations,
        }
    }

    fn durable_hash(&self) -> DurableHash {
        *self
            .hash
            .get_or_init(|| DurableHash::of_canonical(&self.identity_tuple().canonical_string()))
    }
}

impl PartialEq for AuthorInfo {
    fn eq(&self, other: &Self) -> bool {
        self.identity_tuple() == other.identity_tuple()
    }
}

impl Eq for AuthorInfo {}

impl Hash for AuthorInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.durable_hash().hash(state);
    }
}
