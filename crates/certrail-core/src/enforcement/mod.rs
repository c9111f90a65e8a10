//! Employee-level enforcement decision.
//!
//! The aggregator folds a subject's per-type statuses into one decision
//! under strict precedence: any FAIL blocks, otherwise any gap leaves the
//! subject pending, otherwise the subject is cleared. The fold is fully
//! deterministic; nothing advisory or weighted ever feeds it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::snapshot::SnapshotStatus;
use crate::store::EvidenceStore;

/// The aggregate work-authorization state of a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnforcementState {
    /// Every required certification passes.
    Cleared,
    /// At least one required certification has failed.
    Blocked,
    /// No failures, but at least one required certification is incomplete
    /// or missing.
    Pending,
}

/// One certification type contributing to a non-cleared decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnforcementReason {
    /// Catalog type id.
    pub type_id: String,
    /// Catalog display name.
    pub type_name: String,
    /// The status that contributed.
    pub status: SnapshotStatus,
}

/// The decision plus the certification types that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnforcementDecision {
    /// The subject the decision applies to.
    pub subject_id: String,
    /// The instant the decision was evaluated at.
    pub instant: DateTime<Utc>,
    /// The aggregate state.
    pub state: EnforcementState,
    /// Every required type that did not pass, in stable type-id order.
    pub reasons: Vec<EnforcementReason>,
}

impl EvidenceStore {
    /// The subject's enforcement state as of `instant`.
    ///
    /// Precedence is strict and never averaged: any FAIL ⇒ BLOCKED, else any
    /// INCOMPLETE or UNKNOWN ⇒ PENDING, else CLEARED. A required type with
    /// no record cannot clear, so UNKNOWN counts toward PENDING. The reasons
    /// list names every required type that did not pass.
    ///
    /// # Errors
    ///
    /// Returns a database error if the underlying snapshot fails.
    pub fn employee_enforcement_state(
        &self,
        subject_id: &str,
        instant: DateTime<Utc>,
    ) -> Result<EnforcementDecision, Error> {
        let snapshot = self.employee_snapshot(subject_id, instant)?;
        let mut reasons = Vec::new();
        let mut any_fail = false;
        let mut any_gap = false;
        for (type_id, status) in &snapshot.statuses {
            match status {
                SnapshotStatus::Pass => continue,
                SnapshotStatus::Fail => any_fail = true,
                SnapshotStatus::Incomplete | SnapshotStatus::Unknown => any_gap = true,
            }
            let type_name = self
                .catalog
                .get(type_id)
                .map_or_else(|| type_id.clone(), |t| t.name.clone());
            reasons.push(EnforcementReason {
                type_id: type_id.clone(),
                type_name,
                status: *status,
            });
        }
        let state = if any_fail {
            EnforcementState::Blocked
        } else if any_gap {
            EnforcementState::Pending
        } else {
            EnforcementState::Cleared
        };
        Ok(EnforcementDecision {
            subject_id: subject_id.to_string(),
            instant,
            state,
            reasons,
        })
    }

    /// Convenience wrapper evaluating the enforcement state now.
    ///
    /// # Errors
    ///
    /// Returns a database error if the underlying snapshot fails.
    pub fn employee_enforcement_state_now(
        &self,
        subject_id: &str,
    ) -> Result<EnforcementDecision, Error> {
        self.employee_enforcement_state(subject_id, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::actor::Actor;
    use crate::catalog::{CertificationType, TypeCatalog};
    use crate::record::CertificationFields;

    fn test_catalog() -> TypeCatalog {
        TypeCatalog::new(
            1,
            vec![
                CertificationType {
                    id: "OSHA-10".to_string(),
                    name: "OSHA 10-Hour Construction".to_string(),
                    required: true,
                },
                CertificationType {
                    id: "FORK-OP".to_string(),
                    name: "Forklift Operator".to_string(),
                    required: true,
                },
            ],
        )
        .expect("catalog must build")
    }

    fn memory_store() -> EvidenceStore {
        EvidenceStore::in_memory(test_catalog()).expect("failed to open in-memory store")
    }

    fn passing() -> CertificationFields {
        CertificationFields {
            proof_references: vec!["p".to_string()],
            issue_date: Some(Utc::now()),
            non_expiring: true,
            ..Default::default()
        }
    }

    fn expired() -> CertificationFields {
        CertificationFields {
            proof_references: vec!["p".to_string()],
            issue_date: Some(Utc::now() - Duration::days(900)),
            expiration_date: Some(Utc::now() - Duration::days(30)),
            ..Default::default()
        }
    }

    #[test]
    fn all_pass_clears_with_no_reasons() {
        let store = memory_store();
        let hr = Actor::user("hr");
        store
            .create_certification("emp-1", "OSHA-10", passing(), &hr)
            .unwrap();
        store
            .create_certification("emp-1", "FORK-OP", passing(), &hr)
            .unwrap();

        let decision = store.employee_enforcement_state_now("emp-1").unwrap();
        assert_eq!(decision.state, EnforcementState::Cleared);
        assert!(decision.reasons.is_empty());
    }

    #[test]
    fn fail_dominates_incomplete() {
        let store = memory_store();
        let hr = Actor::user("hr");
        store
            .create_certification("emp-1", "OSHA-10", expired(), &hr)
            .unwrap();
        store
            .create_certification("emp-1", "FORK-OP", CertificationFields::default(), &hr)
            .unwrap();

        let decision = store.employee_enforcement_state_now("emp-1").unwrap();
        assert_eq!(decision.state, EnforcementState::Blocked);

        // Both contributing types are named, with their catalog names.
        let names: Vec<_> = decision.reasons.iter().map(|r| r.type_name.as_str()).collect();
        assert!(names.contains(&"OSHA 10-Hour Construction"));
        assert!(names.contains(&"Forklift Operator"));
        let statuses: Vec<_> = decision.reasons.iter().map(|r| r.status).collect();
        assert!(statuses.contains(&SnapshotStatus::Fail));
        assert!(statuses.contains(&SnapshotStatus::Incomplete));
    }

    #[test]
    fn incomplete_without_fail_is_pending() {
        let store = memory_store();
        let hr = Actor::user("hr");
        store
            .create_certification("emp-1", "OSHA-10", passing(), &hr)
            .unwrap();
        store
            .create_certification("emp-1", "FORK-OP", CertificationFields::default(), &hr)
            .unwrap();

        let decision = store.employee_enforcement_state_now("emp-1").unwrap();
        assert_eq!(decision.state, EnforcementState::Pending);
        assert_eq!(decision.reasons.len(), 1);
        assert_eq!(decision.reasons[0].type_id, "FORK-OP");
    }

    #[test]
    fn missing_required_type_is_pending_not_cleared() {
        let store = memory_store();
        store
            .create_certification("emp-1", "OSHA-10", passing(), &Actor::user("hr"))
            .unwrap();

        let decision = store.employee_enforcement_state_now("emp-1").unwrap();
        assert_eq!(decision.state, EnforcementState::Pending);
        assert_eq!(decision.reasons.len(), 1);
        assert_eq!(decision.reasons[0].status, SnapshotStatus::Unknown);
    }

    #[test]
    fn decision_is_deterministic() {
        let store = memory_store();
        let hr = Actor::user("hr");
        store
            .create_certification("emp-1", "OSHA-10", expired(), &hr)
            .unwrap();

        let instant = Utc::now();
        let first = store.employee_enforcement_state("emp-1", instant).unwrap();
        for _ in 0..5 {
            let again = store.employee_enforcement_state("emp-1", instant).unwrap();
            assert_eq!(again, first);
        }
    }
}
