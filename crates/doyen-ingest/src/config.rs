//! Configuration management
//!
//! One [`IngestConfig`] is built per run and passed down explicitly.

use doyen_common::{DoyenError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::db::DbConfig;

// ============================================================================
// Ingestion Configuration Constants
// ============================================================================

/// Default PostgreSQL schema holding the destination relations.
pub const DEFAULT_SCHEMA: &str = "public";

/// Default checkpoint ledger location.
pub const DEFAULT_CHECKPOINT_PATH: &str = "completed_units.json";

/// Default directory of extracted input units.
pub const DEFAULT_SOURCE_DIR: &str = "data/units";

/// Default bytes per binary COPY send.
pub const DEFAULT_COPY_CHUNK_SIZE: usize = 1024 * 1024;

/// Order in which listed units are processed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UnitOrder {
    /// As listed by the source
    #[default]
    Listing,
    /// Newest listing entry first
    Reversed,
}

impl fmt::Display for UnitOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitOrder::Listing => write!(f, "listing"),
            UnitOrder::Reversed => write!(f, "reversed"),
        }
    }
}

impl FromStr for UnitOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "listing" => Ok(UnitOrder::Listing),
            "reversed" | "reverse" => Ok(UnitOrder::Reversed),
            _ => Err(format!("Invalid unit order: {}", s)),
        }
    }
}

/// Ingestion run configuration
#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    pub database: DbConfig,
    /// Schema of the destination relations
    pub schema: String,
    pub checkpoint_path: PathBuf,
    pub source_dir: PathBuf,
    pub order: UnitOrder,
    pub max_units: Option<usize>,
    /// Merge into memory instead of the database
    pub dry_run: bool,
    pub copy_chunk_size: usize,
}

impl IngestConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let database = match DbConfig::from_env() {
            Ok(database) => database,
            Err(e) => {
                tracing::debug!("{}; using default database settings", e);
                defaults.database
            }
        };

        let config = IngestConfig {
            database,
            schema: std::env::var("DOYEN_SCHEMA").unwrap_or(defaults.schema),
            checkpoint_path: std::env::var("DOYEN_CHECKPOINT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.checkpoint_path),
            source_dir: std::env::var("DOYEN_SOURCE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.source_dir),
            order: std::env::var("DOYEN_UNIT_ORDER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.order),
            max_units: std::env::var("DOYEN_MAX_UNITS")
                .ok()
                .and_then(|s| s.parse().ok()),
            dry_run: std::env::var("DOYEN_DRY_RUN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(false),
            copy_chunk_size: std::env::var("DOYEN_COPY_CHUNK_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.copy_chunk_size),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.dry_run && self.database.url.is_empty() {
            return Err(DoyenError::config("Database URL cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(DoyenError::validation(
                "Database max_connections must be greater than 0",
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(DoyenError::validation(format!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        if self.schema.trim().is_empty() {
            return Err(DoyenError::config("Schema name cannot be empty"));
        }

        if self.checkpoint_path.as_os_str().is_empty() {
            return Err(DoyenError::config("Checkpoint path cannot be empty"));
        }

        if self.max_units == Some(0) {
            return Err(DoyenError::validation(
                "max_units must be greater than 0 when set",
            ));
        }

        if self.copy_chunk_size == 0 {
            return Err(DoyenError::validation(
                "Copy chunk size must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database: DbConfig::default(),
            schema: DEFAULT_SCHEMA.to_string(),
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT_PATH),
            source_dir: PathBuf::from(DEFAULT_SOURCE_DIR),
            order: UnitOrder::default(),
            max_units: None,
            dry_run: false,
            copy_chunk_size: DEFAULT_COPY_CHUNK_SIZE,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config_is_valid() {
        let config = IngestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.schema, "public");
        assert_eq!(config.order, UnitOrder::Listing);
    }

    #[test]
    fn test_validation_failures() {
        let mut config = IngestConfig {
            max_units: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.max_units = None;
        config.database.min_connections = 10;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, DoyenError::Validation(_)));
        assert!(err.to_string().contains("min_connections"));
    }

    #[test]
    fn test_empty_url_allowed_for_dry_run() {
        let mut config = IngestConfig::default();
        config.database.url.clear();
        assert_eq!(
            config.validate(),
            Err(DoyenError::config("Database URL cannot be empty"))
        );

        config.dry_run = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unit_order_parsing() {
        assert_eq!("listing".parse::<UnitOrder>().unwrap(), UnitOrder::Listing);
        assert_eq!("Reversed".parse::<UnitOrder>().unwrap(), UnitOrder::Reversed);
        assert!("random".parse::<UnitOrder>().is_err());
    }

    #[test]
    #[serial]
    fn test_load_from_env() {
        std::env::set_var("DOYEN_SCHEMA", "bibliography");
        std::env::set_var("DOYEN_UNIT_ORDER", "reversed");
        std::env::set_var("DOYEN_MAX_UNITS", "3");

        let config = IngestConfig::load().unwrap();
        assert_eq!(config.schema, "bibliography");
        assert_eq!(config.order, UnitOrder::Reversed);
        assert_eq!(config.max_units, Some(3));

        std::env::remove_var("DOYEN_SCHEMA");
        std::env::remove_var("DOYEN_UNIT_ORDER");
        std::env::remove_var("DOYEN_MAX_UNITS");
    }
}
