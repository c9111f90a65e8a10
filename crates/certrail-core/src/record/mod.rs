//! Immutable certification record versions.
//!
//! A [`CertificationRecord`] is one version in a correction chain. Records
//! are never mutated after creation; a correction produces a new version
//! whose `supersedes` points at the version it replaces, and the chain of
//! `supersedes` links for a given `(subject_id, type_id)` is a single linear
//! history with no branching.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// One immutable version of a certification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertificationRecord {
    /// Version id, unique across all versions of all chains.
    pub id: String,

    /// The employee this certification belongs to.
    pub subject_id: String,

    /// Certification type, from the closed catalog.
    pub type_id: String,

    /// Authority that issued the certification, if known.
    pub issuing_authority: Option<String>,

    /// Date the certification was issued.
    pub issue_date: Option<DateTime<Utc>>,

    /// Date the certification expires. Ignored when `non_expiring` is set.
    pub expiration_date: Option<DateTime<Utc>>,

    /// True for certifications that never expire.
    pub non_expiring: bool,

    /// Opaque references to externally-stored proof artifacts. Presence is
    /// the fact this core consumes; the artifacts themselves live elsewhere.
    pub proof_references: Vec<String>,

    /// Instant this version was created.
    pub created_at: DateTime<Utc>,

    /// Id of the version this record replaces, if it is a correction.
    pub supersedes: Option<String>,

    /// Why the correction was made. Non-empty exactly when `supersedes` is
    /// set.
    pub correction_reason: Option<String>,

    /// Actor who made the correction.
    pub corrected_by: Option<String>,

    /// Instant the correction was made.
    pub corrected_at: Option<DateTime<Utc>>,
}

impl CertificationRecord {
    /// True if this version is a correction of an earlier one.
    #[must_use]
    pub const fn is_correction(&self) -> bool {
        self.supersedes.is_some()
    }

    /// The mutable-at-intake field set of this version, for copy-then-overlay
    /// during corrections.
    #[must_use]
    pub fn fields(&self) -> CertificationFields {
        CertificationFields {
            issuing_authority: self.issuing_authority.clone(),
            issue_date: self.issue_date,
            expiration_date: self.expiration_date,
            non_expiring: self.non_expiring,
            proof_references: self.proof_references.clone(),
        }
    }
}

/// Intake payload: the caller-supplied fields of a certification version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertificationFields {
    /// Authority that issued the certification.
    #[serde(default)]
    pub issuing_authority: Option<String>,

    /// Date the certification was issued.
    #[serde(default)]
    pub issue_date: Option<DateTime<Utc>>,

    /// Date the certification expires.
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,

    /// True for certifications that never expire.
    #[serde(default)]
    pub non_expiring: bool,

    /// Opaque proof references. Deduplicated and sorted on intake.
    #[serde(default)]
    pub proof_references: Vec<String>,
}

impl CertificationFields {
    /// Normalizes the field set: proof references are a set, so duplicates
    /// collapse and order is canonical.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if any proof reference is blank.
    pub fn normalize(mut self) -> Result<Self, Error> {
        if self
            .proof_references
            .iter()
            .any(|r| r.trim().is_empty())
        {
            return Err(Error::validation("proof reference must be non-empty"));
        }
        self.proof_references.sort_unstable();
        self.proof_references.dedup();
        Ok(self)
    }
}

/// Correction overlay: the changed fields of a correction.
///
/// Each field is a patch slot: `None` leaves the copied value untouched,
/// `Some(value)` overwrites it. Optional record fields use a nested option
/// so a correction can explicitly clear them (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificationUpdate {
    /// Replace (or clear) the issuing authority.
    pub issuing_authority: Option<Option<String>>,

    /// Replace (or clear) the issue date.
    pub issue_date: Option<Option<DateTime<Utc>>>,

    /// Replace (or clear) the expiration date.
    pub expiration_date: Option<Option<DateTime<Utc>>>,

    /// Replace the non-expiring flag.
    pub non_expiring: Option<bool>,

    /// Replace the proof reference set.
    pub proof_references: Option<Vec<String>>,
}

impl CertificationUpdate {
    /// Overlays the changed fields onto a copy of the superseded version's
    /// fields.
    #[must_use]
    pub fn apply(&self, mut base: CertificationFields) -> CertificationFields {
        if let Some(value) = &self.issuing_authority {
            base.issuing_authority = value.clone();
        }
        if let Some(value) = self.issue_date {
            base.issue_date = value;
        }
        if let Some(value) = self.expiration_date {
            base.expiration_date = value;
        }
        if let Some(value) = self.non_expiring {
            base.non_expiring = value;
        }
        if let Some(value) = &self.proof_references {
            base.proof_references = value.clone();
        }
        base
    }

    /// True if the overlay changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.issuing_authority.is_none()
            && self.issue_date.is_none()
            && self.expiration_date.is_none()
            && self.non_expiring.is_none()
            && self.proof_references.is_none()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn base_fields() -> CertificationFields {
        CertificationFields {
            issuing_authority: Some("OSHA".to_string()),
            issue_date: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            expiration_date: Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()),
            non_expiring: false,
            proof_references: vec!["p1".to_string()],
        }
    }

    #[test]
    fn normalize_dedupes_and_sorts_proof_references() {
        let fields = CertificationFields {
            proof_references: vec!["b".to_string(), "a".to_string(), "b".to_string()],
            ..Default::default()
        };
        let normalized = fields.normalize().unwrap();
        assert_eq!(normalized.proof_references, vec!["a", "b"]);
    }

    #[test]
    fn normalize_rejects_blank_reference() {
        let fields = CertificationFields {
            proof_references: vec!["p1".to_string(), "  ".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            fields.normalize(),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn update_overlays_only_changed_fields() {
        let update = CertificationUpdate {
            proof_references: Some(vec!["p2".to_string()]),
            ..Default::default()
        };
        let patched = update.apply(base_fields());
        assert_eq!(patched.proof_references, vec!["p2"]);
        assert_eq!(patched.issuing_authority.as_deref(), Some("OSHA"));
        assert!(patched.issue_date.is_some());
    }

    #[test]
    fn update_can_clear_optional_fields() {
        let update = CertificationUpdate {
            expiration_date: Some(None),
            non_expiring: Some(true),
            ..Default::default()
        };
        let patched = update.apply(base_fields());
        assert!(patched.expiration_date.is_none());
        assert!(patched.non_expiring);
    }

    #[test]
    fn empty_update_changes_nothing() {
        let update = CertificationUpdate::default();
        assert!(update.is_empty());
        assert_eq!(update.apply(base_fields()), base_fields());
    }
}
