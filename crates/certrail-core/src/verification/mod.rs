//! Verification recorder.
//!
//! Every public verification scan is a fact: the derived snapshot shown at
//! that moment is frozen verbatim into a [`VerificationEvent`] and never
//! recomputed. Recording is deliberately not idempotent: two rapid scans
//! are two facts with independently frozen snapshots. Recording happens
//! regardless of the organization's licensing state. Licensing is consumed
//! only at the presentation boundary ([`VerificationEvent::displayed_outcome`]),
//! which substitutes an explicit not-subscribed marker without touching the
//! recorded fact.

// Mutex poisoning indicates a panic in another thread, which is
// unrecoverable.
#![allow(clippy::missing_panics_doc)]

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::actor::Actor;
use crate::error::Error;
use crate::ledger::{append_in_tx, ensure_node_in_tx, EntityType, EVENT_VERIFIED};
use crate::snapshot::EmployeeSnapshot;
use crate::store::EvidenceStore;
use crate::timestamp::{from_micros, to_micros};

#[cfg(test)]
mod tests;

/// Marker shown in place of a derived status when the organization is not
/// subscribed. The recorded fact underneath is unchanged.
pub const NOT_SUBSCRIBED_MARKER: &str = "not verified: organization not subscribed";

/// How a verification was performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    /// Public QR code scan.
    QrScan,
    /// Manual lookup by a reviewer.
    ManualLookup,
    /// Programmatic check through the API.
    Api,
}

impl VerificationMethod {
    /// Stable storage tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QrScan => "qr_scan",
            Self::ManualLookup => "manual_lookup",
            Self::Api => "api",
        }
    }

    /// Parses the stable storage tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Integrity`] for an unrecognized tag.
    pub fn parse(value: &str) -> Result<Self, Error> {
        match value {
            "qr_scan" => Ok(Self::QrScan),
            "manual_lookup" => Ok(Self::ManualLookup),
            "api" => Ok(Self::Api),
            other => Err(Error::integrity(format!(
                "unknown verification method: {other}"
            ))),
        }
    }
}

/// The immutable record of one public verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationEvent {
    /// Event id.
    pub id: String,
    /// The subject that was verified.
    pub subject_id: String,
    /// When the scan happened.
    pub scan_timestamp: DateTime<Utc>,
    /// The snapshot that was derived and shown at scan time. Historical
    /// record of what was displayed, never a live value.
    pub derived_status_at_scan: EmployeeSnapshot,
    /// Free-form location hint supplied by the scanner.
    pub location_hint: Option<String>,
    /// How the verification was performed.
    pub method: VerificationMethod,
}

/// What the presentation boundary shows for a recorded verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayedOutcome {
    /// The organization is subscribed: show the frozen snapshot.
    Verified(EmployeeSnapshot),
    /// The organization is not subscribed: show the explicit marker instead
    /// of any derived status.
    NotSubscribed,
}

impl VerificationEvent {
    /// Resolves what to display for this verification given the
    /// organization's licensing flag. The recorded fact is untouched either
    /// way.
    #[must_use]
    pub fn displayed_outcome(&self, licensed: bool) -> DisplayedOutcome {
        if licensed {
            DisplayedOutcome::Verified(self.derived_status_at_scan.clone())
        } else {
            DisplayedOutcome::NotSubscribed
        }
    }
}

impl EvidenceStore {
    /// Records a public verification of a subject.
    ///
    /// Computes the subject's snapshot now, persists it verbatim, and
    /// appends a `verified` ledger event in the same transaction. Always
    /// records, whatever the licensing state. Two calls always produce two
    /// distinct events.
    ///
    /// # Errors
    ///
    /// Returns a database error if the write fails.
    pub fn record_verification(
        &self,
        subject_id: &str,
        method: VerificationMethod,
        location_hint: Option<&str>,
    ) -> Result<VerificationEvent, Error> {
        let now = Utc::now();
        let snapshot = self.employee_snapshot(subject_id, now)?;
        let event = VerificationEvent {
            id: format!("ver-{}", Uuid::new_v4()),
            subject_id: subject_id.to_string(),
            scan_timestamp: now,
            derived_status_at_scan: snapshot,
            location_hint: location_hint.map(ToString::to_string),
            method,
        };
        let snapshot_json = serde_json::to_string(&event.derived_status_at_scan)?;

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO verification_events
                 (id, subject_id, scan_timestamp_us, derived_status_at_scan, location_hint, method)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.id,
                event.subject_id,
                to_micros(event.scan_timestamp),
                snapshot_json,
                event.location_hint,
                event.method.as_str(),
            ],
        )?;
        let node = ensure_node_in_tx(&tx, EntityType::Employee, subject_id, now)?;
        append_in_tx(
            &tx,
            &node.id,
            EVENT_VERIFIED,
            &serde_json::json!({
                "verification_id": event.id,
                "method": event.method.as_str(),
            }),
            &Actor::system_automated(),
            now,
        )?;
        tx.commit()?;
        tracing::debug!(
            verification_id = %event.id,
            subject_id,
            method = event.method.as_str(),
            "verification recorded"
        );
        Ok(event)
    }

    /// The subject's recorded verifications, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails, or
    /// [`Error::Serialization`] if a frozen snapshot cannot be decoded.
    pub fn verification_history(
        &self,
        subject_id: &str,
    ) -> Result<Vec<VerificationEvent>, Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, subject_id, scan_timestamp_us, derived_status_at_scan,
                    location_hint, method
             FROM verification_events
             WHERE subject_id = ?1
             ORDER BY scan_timestamp_us ASC, rowid ASC",
        )?;
        let rows = stmt
            .query_map(params![subject_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, subject_id, scan_us, snapshot_json, location_hint, method)| {
                Ok(VerificationEvent {
                    id,
                    subject_id,
                    scan_timestamp: from_micros(scan_us),
                    derived_status_at_scan: serde_json::from_str(&snapshot_json)?,
                    location_hint,
                    method: VerificationMethod::parse(&method)?,
                })
            })
            .collect()
    }
}
