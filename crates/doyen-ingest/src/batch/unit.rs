//! Per-unit aggregation of extracted records

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::extract::{AuthorRecord, ExtractedUnit, ValidationError};
use crate::identity::{AuthorInfo, DurableHash, Identity, InstitutionInfo};
use crate::mesh::MeshCode;

/// One distinct `(mesh code, label)` pair an author was annotated with
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MeshOccurrence {
    pub code: MeshCode,
    pub label: String,
}

/// A record dropped while aggregating a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordIssue {
    /// Paper id of the article the record came from
    pub pmid: String,
    /// The dropped record as compact JSON, or the raw paper id
    pub record: String,
    pub error: ValidationError,
}

/// Entities of one input unit, keyed by durable hash
///
/// Built once per unit before any store interaction. Authors are
/// deduplicated by hash; mesh occurrences and paper links keep their
/// multiplicity.
#[derive(Debug, Default)]
pub struct UnitBatch {
    unit_id: String,
    authors: BTreeMap<DurableHash, AuthorInfo>,
    mesh: BTreeMap<DurableHash, BTreeMap<MeshOccurrence, u32>>,
    papers: BTreeMap<DurableHash, Vec<i64>>,
    issues: Vec<RecordIssue>,
}

impl UnitBatch {
    pub fn new(unit_id: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            ..Default::default()
        }
    }

    /// Aggregate an extracted unit
    ///
    /// Every valid author of an article gets one occurrence of each of the
    /// article's mesh annotations and one link to the article's paper id.
    /// Invalid records are skipped and kept in [`UnitBatch::issues`].
    pub fn from_unit(unit: &ExtractedUnit) -> Self {
        let mut batch = Self::new(unit.unit_id.clone());

        for article in &unit.articles {
            let paper_id = match parse_paper_id(&article.pmid) {
                Ok(id) => Some(id),
                Err(error) => {
                    batch.record_issue(&article.pmid, &article.pmid, error);
                    None
                }
            };

            let mut mesh = Vec::with_capacity(article.mesh_annotations.len());
            for entry in &article.mesh_annotations {
                let parsed = entry.parsed().and_then(|annotation| {
                    let code = MeshCode::parse(&annotation.mesh)?;
                    Ok(MeshOccurrence {
                        code,
                        label: annotation.text.clone(),
                    })
                });
                match parsed {
                    Ok(occurrence) => mesh.push(occurrence),
                    Err(error) => batch.record_issue(&article.pmid, &entry.context(), error),
                }
            }

            for entry in &article.authors {
                let author = match entry.parsed().and_then(AuthorRecord::validate) {
                    Ok(author) => author,
                    Err(error) => {
                        batch.record_issue(&article.pmid, &entry.context(), error);
                        continue;
                    }
                };

                let hash = batch.add_author(author);
                for occurrence in &mesh {
                    batch.add_mesh_occurrence(hash, occurrence.clone());
                }
                if let Some(id) = paper_id {
                    batch.add_paper(hash, id);
                }
            }
        }

        debug!(
            unit = %batch.unit_id,
            articles = unit.articles.len(),
            authors = batch.authors.len(),
            issues = batch.issues.len(),
            "Aggregated unit"
        );
        batch
    }

    fn record_issue(&mut self, pmid: &str, record: &str, error: ValidationError) {
        match error {
            ValidationError::Empty => debug!(pmid, "Skipping blank author record"),
            ref other => {
                warn!(unit = %self.unit_id, pmid, record, error = %other, "Skipping record")
            }
        }
        self.issues.push(RecordIssue {
            pmid: pmid.to_string(),
            record: record.to_string(),
            error,
        });
    }

    /// Add an author; an equal author already present is kept
    pub fn add_author(&mut self, author: AuthorInfo) -> DurableHash {
        let hash = author.durable_hash();
        self.authors.entry(hash).or_insert(author);
        hash
    }

    pub fn add_mesh_occurrence(&mut self, author: DurableHash, occurrence: MeshOccurrence) {
        *self
            .mesh
            .entry(author)
            .or_default()
            .entry(occurrence)
            .or_insert(0) += 1;
    }

    pub fn add_paper(&mut self, author: DurableHash, paper_id: i64) {
        self.papers.entry(author).or_default().push(paper_id);
    }

    pub fn unit_id(&self) -> &str {
        &self.unit_id
    }

    pub fn authors(&self) -> impl Iterator<Item = &AuthorInfo> {
        self.authors.values()
    }

    pub fn author_count(&self) -> usize {
        self.authors.len()
    }

    /// Distinct institutions across all authors of the unit
    pub fn institutions(&self) -> BTreeMap<DurableHash, &InstitutionInfo> {
        self.authors
            .values()
            .flat_map(|a| a.affiliations())
            .map(|inst| (inst.durable_hash(), inst))
            .collect()
    }

    /// Distinct `(institution hash, author hash)` pairs
    pub fn institution_links(&self) -> Vec<(DurableHash, DurableHash)> {
        let mut links: Vec<_> = self
            .authors
            .iter()
            .flat_map(|(hash, a)| {
                a.affiliations()
                    .iter()
                    .map(move |inst| (inst.durable_hash(), *hash))
            })
            .collect();
        links.sort_unstable();
        links.dedup();
        links
    }

    pub fn mesh_occurrences(&self) -> &BTreeMap<DurableHash, BTreeMap<MeshOccurrence, u32>> {
        &self.mesh
    }

    /// Total annotation rows the unit expands to
    pub fn mesh_occurrence_count(&self) -> u64 {
        self.mesh
            .values()
            .flat_map(|m| m.values())
            .map(|n| u64::from(*n))
            .sum()
    }

    pub fn papers(&self) -> &BTreeMap<DurableHash, Vec<i64>> {
        &self.papers
    }

    pub fn issues(&self) -> &[RecordIssue] {
        &self.issues
    }

    pub fn is_empty(&self) -> bool {
        self.authors.is_empty()
    }
}

fn parse_paper_id(pmid: &str) -> Result<i64, ValidationError> {
    pmid.trim()
        .parse::<i64>()
        .map_err(|_| ValidationError::InvalidPaperId(pmid.to_string()))
}
