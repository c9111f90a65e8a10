//! Tests for the verification recorder.

use super::*;
use crate::catalog::{CertificationType, TypeCatalog};
use crate::ledger::EntityType;
use crate::record::{CertificationFields, CertificationUpdate};
use crate::snapshot::SnapshotStatus;

fn test_catalog() -> TypeCatalog {
    TypeCatalog::new(
        1,
        vec![CertificationType {
            id: "OSHA-10".to_string(),
            name: "OSHA 10-Hour Construction".to_string(),
            required: true,
        }],
    )
    .expect("catalog must build")
}

fn memory_store() -> EvidenceStore {
    EvidenceStore::in_memory(test_catalog()).expect("failed to open in-memory store")
}

fn passing_fields() -> CertificationFields {
    CertificationFields {
        proof_references: vec!["p1".to_string()],
        issue_date: Some(Utc::now()),
        non_expiring: true,
        ..Default::default()
    }
}

#[test]
fn test_record_verification_freezes_snapshot() {
    let store = memory_store();
    store
        .create_certification("emp-1", "OSHA-10", passing_fields(), &Actor::user("hr"))
        .unwrap();

    let event = store
        .record_verification("emp-1", VerificationMethod::QrScan, Some("gate 4"))
        .unwrap();
    assert_eq!(event.subject_id, "emp-1");
    assert_eq!(event.location_hint.as_deref(), Some("gate 4"));
    assert_eq!(
        event.derived_status_at_scan.statuses.get("OSHA-10"),
        Some(&SnapshotStatus::Pass)
    );
}

#[test]
fn test_two_scans_are_two_facts() {
    let store = memory_store();
    store
        .create_certification("emp-1", "OSHA-10", passing_fields(), &Actor::user("hr"))
        .unwrap();

    let first = store
        .record_verification("emp-1", VerificationMethod::QrScan, None)
        .unwrap();
    let second = store
        .record_verification("emp-1", VerificationMethod::QrScan, None)
        .unwrap();

    assert_ne!(first.id, second.id);
    let history = store.verification_history("emp-1").unwrap();
    assert_eq!(history.len(), 2);
}

#[test]
fn test_frozen_snapshot_survives_later_correction() {
    let store = memory_store();
    let record = store
        .create_certification(
            "emp-1",
            "OSHA-10",
            CertificationFields::default(), // no proof: INCOMPLETE
            &Actor::user("hr"),
        )
        .unwrap();

    let scan = store
        .record_verification("emp-1", VerificationMethod::QrScan, None)
        .unwrap();
    assert_eq!(
        scan.derived_status_at_scan.statuses.get("OSHA-10"),
        Some(&SnapshotStatus::Incomplete)
    );

    // Fix the record afterwards; the recorded scan must not change.
    store
        .correct_certification(
            &record.id,
            "late upload",
            &CertificationUpdate {
                proof_references: Some(vec!["p3".to_string()]),
                issue_date: Some(Some(Utc::now())),
                non_expiring: Some(true),
                ..Default::default()
            },
            &Actor::user("hr"),
        )
        .unwrap();

    let replayed = store.verification_history("emp-1").unwrap();
    assert_eq!(replayed.len(), 1);
    assert_eq!(
        replayed[0].derived_status_at_scan.statuses.get("OSHA-10"),
        Some(&SnapshotStatus::Incomplete),
        "the frozen snapshot is a historical record, never recomputed"
    );
}

#[test]
fn test_verification_records_even_without_any_certification() {
    let store = memory_store();
    let event = store
        .record_verification("emp-unknown", VerificationMethod::ManualLookup, None)
        .unwrap();
    assert_eq!(
        event.derived_status_at_scan.statuses.get("OSHA-10"),
        Some(&SnapshotStatus::Unknown)
    );
}

#[test]
fn test_verified_ledger_event_is_paired() {
    let store = memory_store();
    store
        .create_certification("emp-1", "OSHA-10", passing_fields(), &Actor::user("hr"))
        .unwrap();
    let scan = store
        .record_verification("emp-1", VerificationMethod::Api, None)
        .unwrap();

    let node = store
        .find_node(EntityType::Employee, "emp-1")
        .unwrap()
        .unwrap();
    let events = store.read(&node.id, None, None).unwrap();
    let verified: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == EVENT_VERIFIED)
        .collect();
    assert_eq!(verified.len(), 1);
    assert_eq!(verified[0].payload["verification_id"], scan.id);
    assert_eq!(verified[0].actor_id, crate::actor::SYSTEM_AUTOMATED_ID);
}

#[test]
fn test_displayed_outcome_honors_licensing_without_touching_the_fact() {
    let store = memory_store();
    store
        .create_certification("emp-1", "OSHA-10", passing_fields(), &Actor::user("hr"))
        .unwrap();
    let scan = store
        .record_verification("emp-1", VerificationMethod::QrScan, None)
        .unwrap();

    match scan.displayed_outcome(true) {
        DisplayedOutcome::Verified(snapshot) => {
            assert_eq!(snapshot, scan.derived_status_at_scan);
        },
        DisplayedOutcome::NotSubscribed => panic!("licensed org must see the snapshot"),
    }
    assert_eq!(scan.displayed_outcome(false), DisplayedOutcome::NotSubscribed);

    // The stored fact is identical either way.
    let history = store.verification_history("emp-1").unwrap();
    assert_eq!(history[0].derived_status_at_scan, scan.derived_status_at_scan);
}

#[test]
fn test_method_tags_round_trip() {
    for method in [
        VerificationMethod::QrScan,
        VerificationMethod::ManualLookup,
        VerificationMethod::Api,
    ] {
        assert_eq!(VerificationMethod::parse(method.as_str()).unwrap(), method);
    }
    assert!(VerificationMethod::parse("carrier_pigeon").is_err());
}
