//! Point-in-time query engine.
//!
//! Two independent time questions are pinned to the same instant: which
//! version was believed current at `instant` (the latest version created at
//! or before it), and whether that version's content was valid at `instant`
//! (the pure status derivation). Pinning both is what makes a correction
//! made today unable to alter what the system reported yesterday.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::status::{self, DerivedStatus};
use crate::store::EvidenceStore;

/// Status of one certification type as seen at a past instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotStatus {
    /// Complete and valid at the instant.
    Pass,
    /// Expired before the instant.
    Fail,
    /// Missing a field needed to judge validity.
    Incomplete,
    /// No record for the type existed yet at the instant.
    Unknown,
}

impl From<DerivedStatus> for SnapshotStatus {
    fn from(status: DerivedStatus) -> Self {
        match status {
            DerivedStatus::Pass => Self::Pass,
            DerivedStatus::Fail => Self::Fail,
            DerivedStatus::Incomplete => Self::Incomplete,
        }
    }
}

/// Believed-true per-type statuses of a subject as of one instant.
///
/// This is the shape frozen verbatim into a verification event, so it is a
/// strict wire type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmployeeSnapshot {
    /// The subject the snapshot describes.
    pub subject_id: String,
    /// The instant both time questions were pinned to.
    pub instant: DateTime<Utc>,
    /// Status per required certification type, in stable type-id order.
    pub statuses: BTreeMap<String, SnapshotStatus>,
}

impl EvidenceStore {
    /// Status of `(subject, type)` as it was believed at `instant`.
    ///
    /// Selects the latest version whose `created_at` is at or before
    /// `instant` (corrections created later are invisible) and evaluates
    /// the status rules at that same instant. [`SnapshotStatus::Unknown`]
    /// means no version existed yet.
    ///
    /// # Errors
    ///
    /// Returns a database error if the lookup fails.
    pub fn status_as_of(
        &self,
        subject_id: &str,
        type_id: &str,
        instant: DateTime<Utc>,
    ) -> Result<SnapshotStatus, Error> {
        let Some(record) = self.latest_record_at(subject_id, type_id, instant)? else {
            return Ok(SnapshotStatus::Unknown);
        };
        Ok(status::derive_status(&record, instant).into())
    }

    /// Per-type statuses of a subject across every required catalog type, as
    /// of `instant`.
    ///
    /// # Errors
    ///
    /// Returns a database error if any lookup fails.
    pub fn employee_snapshot(
        &self,
        subject_id: &str,
        instant: DateTime<Utc>,
    ) -> Result<EmployeeSnapshot, Error> {
        let required: Vec<String> = self
            .catalog
            .required_types()
            .map(|t| t.id.clone())
            .collect();
        let mut statuses = BTreeMap::new();
        for type_id in required {
            let status = self.status_as_of(subject_id, &type_id, instant)?;
            statuses.insert(type_id, status);
        }
        Ok(EmployeeSnapshot {
            subject_id: subject_id.to_string(),
            instant,
            statuses,
        })
    }
}
