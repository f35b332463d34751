//! Input unit sources
//!
//! Retrieval and markup parsing live outside this crate. A [`UnitSource`]
//! lists unit identifiers in processing order and hands back one unit's
//! extracted records on demand.

use anyhow::{Context, Result};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::ExtractedUnit;

#[async_trait]
pub trait UnitSource: Send + Sync {
    /// Unit identifiers in the collaborator's listing order
    async fn list_units(&self) -> Result<Vec<String>>;

    /// Extracted records of one unit
    async fn extract(&self, unit_id: &str) -> Result<ExtractedUnit>;
}

/// Units stored as `.json` or `.json.gz` files in one directory
///
/// Each file holds an [`ExtractedUnit`]; the unit id is the file name.
/// Listing order is file-name order and hidden or other files are ignored.
pub struct JsonDirectorySource {
    root: PathBuf,
}

impl JsonDirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_unit_file(name: &str) -> bool {
        !name.starts_with('.') && (name.ends_with(".json") || name.ends_with(".json.gz"))
    }
}

fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .context("Failed to decompress gzip data")?;
    debug!("Decompressed {} -> {} bytes", data.len(), decompressed.len());
    Ok(decompressed)
}

#[async_trait]
impl UnitSource for JsonDirectorySource {
    async fn list_units(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .with_context(|| format!("Failed to read source directory {}", self.root.display()))?;

        let mut units = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if Self::is_unit_file(&name) {
                units.push(name);
            }
        }

        units.sort();
        Ok(units)
    }

    async fn extract(&self, unit_id: &str) -> Result<ExtractedUnit> {
        let path = self.root.join(unit_id);
        let raw = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read unit file {}", path.display()))?;

        let bytes = if unit_id.ends_with(".gz") {
            decompress_gzip(&raw)?
        } else {
            raw
        };

        let mut unit: ExtractedUnit = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse unit file {}", path.display()))?;
        unit.unit_id = unit_id.to_string();

        debug!(unit = unit_id, articles = unit.articles.len(), "Extracted unit");
        Ok(unit)
    }
}
