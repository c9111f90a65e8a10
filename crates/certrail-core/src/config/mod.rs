//! Store configuration parsing.
//!
//! A deployment points the core at its database file and catalog file
//! through a small TOML document:
//!
//! ```toml
//! db_path = "/var/lib/certrail/evidence.db"
//! catalog_path = "/etc/certrail/catalog.toml"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::catalog::TypeCatalog;
use crate::error::Error;
use crate::store::EvidenceStore;

/// Configuration for opening an [`EvidenceStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    /// Path to the `SQLite` database file.
    pub db_path: PathBuf,

    /// Path to the effective certification-type catalog (TOML).
    pub catalog_path: PathBuf,
}

impl LedgerConfig {
    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, Error> {
        toml::from_str(content).map_err(|e| Error::validation(format!("invalid config: {e}")))
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Opens the store this configuration describes, loading the catalog
    /// from `catalog_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be loaded or the database
    /// cannot be opened.
    pub fn open(&self) -> Result<EvidenceStore, Error> {
        let catalog = TypeCatalog::from_file(&self.catalog_path)?;
        EvidenceStore::open(&self.db_path, catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let config = LedgerConfig::from_toml(
            "db_path = \"/tmp/evidence.db\"\ncatalog_path = \"/tmp/catalog.toml\"\n",
        )
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/evidence.db"));
        assert_eq!(config.catalog_path, PathBuf::from("/tmp/catalog.toml"));
    }

    #[test]
    fn rejects_unknown_keys() {
        let result = LedgerConfig::from_toml(
            "db_path = \"a\"\ncatalog_path = \"b\"\nlegacy_socket = \"c\"\n",
        );
        assert!(matches!(result, Err(Error::Validation { .. })));
    }
}
