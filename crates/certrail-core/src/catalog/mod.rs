//! Closed, versioned certification-type catalog.
//!
//! The catalog is consumed as an external collaborator: the core never edits
//! it, it only looks types up. [`TypeCatalog`] is the effective catalog at
//! store-open time; `create_certification` rejects any `type_id` absent from
//! it, and the snapshot engine walks its required types when building an
//! employee snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// One certification type in the closed catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertificationType {
    /// Stable catalog id (e.g. `OSHA-10`).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Whether every subject must hold this certification.
    #[serde(default)]
    pub required: bool,
}

/// Serialized catalog file shape.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    version: u32,
    #[serde(default)]
    types: Vec<CertificationType>,
}

/// The closed, versioned certification-type catalog.
#[derive(Debug, Clone, Default)]
pub struct TypeCatalog {
    version: u32,
    types: BTreeMap<String, CertificationType>,
}

impl TypeCatalog {
    /// Builds a catalog from a list of types.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] on a duplicate or empty type id.
    pub fn new(version: u32, types: Vec<CertificationType>) -> Result<Self, Error> {
        let mut map = BTreeMap::new();
        for ty in types {
            if ty.id.trim().is_empty() {
                return Err(Error::validation("catalog type id must be non-empty"));
            }
            if map.insert(ty.id.clone(), ty).is_some() {
                return Err(Error::validation("duplicate catalog type id"));
            }
        }
        Ok(Self {
            version,
            types: map,
        })
    }

    /// Parses a catalog from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the document does not parse or
    /// contains duplicate ids.
    pub fn from_toml(content: &str) -> Result<Self, Error> {
        let file: CatalogFile = toml::from_str(content)
            .map_err(|e| Error::validation(format!("invalid catalog: {e}")))?;
        Self::new(file.version, file.types)
    }

    /// Loads a catalog from a TOML file on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Catalog version.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Looks up a type by id.
    #[must_use]
    pub fn get(&self, type_id: &str) -> Option<&CertificationType> {
        self.types.get(type_id)
    }

    /// True if the id is part of the effective catalog.
    #[must_use]
    pub fn contains(&self, type_id: &str) -> bool {
        self.types.contains_key(type_id)
    }

    /// Types every subject must hold, in stable id order.
    pub fn required_types(&self) -> impl Iterator<Item = &CertificationType> {
        self.types.values().filter(|t| t.required)
    }

    /// All types, in stable id order.
    pub fn types(&self) -> impl Iterator<Item = &CertificationType> {
        self.types.values()
    }
}
