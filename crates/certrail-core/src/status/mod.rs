//! Pure status derivation.
//!
//! Status is never stored; it is derived from a record's fields and an
//! explicit evaluation instant. Taking the instant as a parameter (never
//! reading a clock) is what makes point-in-time queries correct: the same
//! record and instant always yield the same answer, regardless of when the
//! question is asked.

use chrono::{DateTime, Utc};

use crate::record::CertificationRecord;

/// Reason shown when no proof artifact has been attached.
pub const REASON_NO_PROOF: &str = "No proof uploaded";
/// Reason shown when the issue date is missing.
pub const REASON_MISSING_ISSUE_DATE: &str = "Missing issue date";
/// Reason shown when the expiration date is missing.
pub const REASON_MISSING_EXPIRATION: &str = "Missing expiration date";
/// Reason shown when the certification has expired.
pub const REASON_EXPIRED: &str = "Certification expired";

/// Derived status of a single certification version at an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DerivedStatus {
    /// The certification is complete and valid at the instant.
    Pass,
    /// The certification had expired before the instant.
    Fail,
    /// The record is missing a field needed to judge validity.
    Incomplete,
}

/// Derives the status of a record as of `evaluation_instant`.
///
/// First matching rule wins: missing proof, then missing issue date, then
/// the non-expiring shortcut, then missing expiration date, then expiry.
#[must_use]
pub fn derive_status(
    record: &CertificationRecord,
    evaluation_instant: DateTime<Utc>,
) -> DerivedStatus {
    evaluate(record, evaluation_instant).0
}

/// The failure or incompleteness reason, if the record does not pass.
#[must_use]
pub fn failure_reason(
    record: &CertificationRecord,
    evaluation_instant: DateTime<Utc>,
) -> Option<&'static str> {
    evaluate(record, evaluation_instant).1
}

/// Single evaluation of the rule ladder.
#[must_use]
pub fn evaluate(
    record: &CertificationRecord,
    evaluation_instant: DateTime<Utc>,
) -> (DerivedStatus, Option<&'static str>) {
    if record.proof_references.is_empty() {
        return (DerivedStatus::Incomplete, Some(REASON_NO_PROOF));
    }
    if record.issue_date.is_none() {
        return (DerivedStatus::Incomplete, Some(REASON_MISSING_ISSUE_DATE));
    }
    if record.non_expiring {
        return (DerivedStatus::Pass, None);
    }
    let Some(expiration) = record.expiration_date else {
        return (DerivedStatus::Incomplete, Some(REASON_MISSING_EXPIRATION));
    };
    if expiration < evaluation_instant {
        return (DerivedStatus::Fail, Some(REASON_EXPIRED));
    }
    (DerivedStatus::Pass, None)
}
