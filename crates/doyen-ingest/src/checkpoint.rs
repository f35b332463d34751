//! Checkpoint ledger
//!
//! The ordered list of input units already merged. Loaded at start,
//! consulted before each unit, appended and persisted after a unit's merge
//! succeeds. Persisting is the commit point of a unit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub const LEDGER_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Failed to read checkpoint ledger {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write checkpoint ledger {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Checkpoint ledger {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported checkpoint ledger version {found} in {path}")]
    Version { path: PathBuf, found: u32 },
}

/// Durable storage of the completed-unit list
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Completed units in completion order; empty if nothing was stored yet
    async fn load(&self) -> Result<Vec<String>, LedgerError>;

    /// Atomically replace the stored list
    async fn save(&self, completed: &[String]) -> Result<(), LedgerError>;
}

/// On-disk ledger layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerFile {
    pub ledger_version: u32,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub completed: Vec<String>,
}

/// JSON ledger file, replaced through a temporary sibling and a rename
pub struct FileLedgerStore {
    path: PathBuf,
}

impl FileLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn write_error(&self, source: io::Error) -> LedgerError {
        LedgerError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl LedgerStore for FileLedgerStore {
    async fn load(&self) -> Result<Vec<String>, LedgerError> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No checkpoint ledger yet");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(LedgerError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let file: LedgerFile =
            serde_json::from_slice(&content).map_err(|source| LedgerError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        if file.ledger_version != LEDGER_VERSION {
            return Err(LedgerError::Version {
                path: self.path.clone(),
                found: file.ledger_version,
            });
        }
        Ok(file.completed)
    }

    async fn save(&self, completed: &[String]) -> Result<(), LedgerError> {
        let file = LedgerFile {
            ledger_version: LEDGER_VERSION,
            updated: Utc::now(),
            completed: completed.to_vec(),
        };
        let content = serde_json::to_vec_pretty(&file).map_err(|source| LedgerError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.write_error(e))?;
        }

        let temp = self.temp_path();
        let mut out = tokio::fs::File::create(&temp)
            .await
            .map_err(|e| self.write_error(e))?;
        out.write_all(&content)
            .await
            .map_err(|e| self.write_error(e))?;
        out.sync_all().await.map_err(|e| self.write_error(e))?;
        drop(out);

        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| self.write_error(e))?;

        debug!(path = %self.path.display(), units = completed.len(), "Persisted checkpoint ledger");
        Ok(())
    }
}

/// In-memory view of the ledger backed by a [`LedgerStore`]
pub struct CheckpointLedger<L: LedgerStore> {
    store: L,
    completed: Vec<String>,
    index: HashSet<String>,
}

impl<L: LedgerStore> CheckpointLedger<L> {
    pub async fn load(store: L) -> Result<Self, LedgerError> {
        let completed = store.load().await?;
        let index = completed.iter().cloned().collect();
        Ok(Self {
            store,
            completed,
            index,
        })
    }

    pub fn is_complete(&self, unit_id: &str) -> bool {
        self.index.contains(unit_id)
    }

    /// Append a unit and persist the whole list before returning
    ///
    /// If persisting fails the unit is not considered complete.
    pub async fn mark_complete(&mut self, unit_id: &str) -> Result<(), LedgerError> {
        if self.is_complete(unit_id) {
            return Ok(());
        }

        self.completed.push(unit_id.to_string());
        if let Err(e) = self.store.save(&self.completed).await {
            self.completed.pop();
            return Err(e);
        }
        self.index.insert(unit_id.to_string());
        Ok(())
    }

    pub fn completed(&self) -> &[String] {
        &self.completed
    }

    pub fn len(&self) -> usize {
        self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    pub fn store(&self) -> &L {
        &self.store
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLedgerStore::new(dir.path().join("completed_units.json"));
        let ledger = CheckpointLedger::load(store).await.unwrap();
        assert!(ledger.is_empty());
        assert!(!ledger.is_complete("pubmed24n0001.xml.gz"));
    }

    #[tokio::test]
    async fn test_mark_complete_persists_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("completed_units.json");

        let mut ledger = CheckpointLedger::load(FileLedgerStore::new(&path))
            .await
            .unwrap();
        ledger.mark_complete("b").await.unwrap();
        ledger.mark_complete("a").await.unwrap();
        ledger.mark_complete("b").await.unwrap();

        let reloaded = CheckpointLedger::load(FileLedgerStore::new(&path))
            .await
            .unwrap();
        assert_eq!(reloaded.completed(), &["b".to_string(), "a".to_string()]);
        assert!(reloaded.is_complete("a"));
        assert!(!path.with_file_name("completed_units.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_ledger_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("completed_units.json");
        std::fs::write(&path, b"[oops").unwrap();

        let err = FileLedgerStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, LedgerError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_unknown_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("completed_units.json");
        std::fs::write(
            &path,
            br#"{"ledger_version": 9, "updated": "2024-01-01T00:00:00Z", "completed": []}"#,
        )
        .unwrap();

        let err = FileLedgerStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, LedgerError::Version { found: 9, .. }));
    }
}
