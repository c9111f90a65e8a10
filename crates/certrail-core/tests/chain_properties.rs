//! Property tests for status derivation purity and chain walking.

use chrono::{DateTime, Duration, TimeZone, Utc};
use certrail_core::status::evaluate as evaluate_status;
use certrail_core::{
    derive_status, Actor, CertificationFields, CertificationRecord, CertificationUpdate,
    DerivedStatus, EvidenceStore, TypeCatalog,
};
use proptest::prelude::*;

fn catalog() -> TypeCatalog {
    TypeCatalog::from_toml(
        "version = 1\n[[types]]\nid = \"OSHA-10\"\nname = \"OSHA 10\"\nrequired = true\n",
    )
    .expect("catalog must parse")
}

fn epoch_day(day: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap() + Duration::days(day)
}

prop_compose! {
    fn arb_record()(
        proof_count in 0_usize..3,
        issue_day in proptest::option::of(0_i64..2000),
        expiration_day in proptest::option::of(0_i64..2000),
        non_expiring in any::<bool>(),
    ) -> CertificationRecord {
        CertificationRecord {
            id: "cert-prop".to_string(),
            subject_id: "emp-prop".to_string(),
            type_id: "OSHA-10".to_string(),
            issuing_authority: None,
            issue_date: issue_day.map(epoch_day),
            expiration_date: expiration_day.map(epoch_day),
            non_expiring,
            proof_references: (0..proof_count).map(|n| format!("p{n}")).collect(),
            created_at: epoch_day(0),
            supersedes: None,
            correction_reason: None,
            corrected_by: None,
            corrected_at: None,
        }
    }
}

proptest! {
    /// Identical fields and instant always yield the identical result,
    /// regardless of call history.
    #[test]
    fn derive_status_is_pure(record in arb_record(), instant_day in 0_i64..3000) {
        let instant = epoch_day(instant_day);
        let first = evaluate_status(&record, instant);
        for _ in 0..3 {
            prop_assert_eq!(evaluate_status(&record, instant), first);
        }
    }

    /// A pass never carries a reason, and a non-pass always does.
    #[test]
    fn reason_accompanies_exactly_the_non_pass_statuses(
        record in arb_record(),
        instant_day in 0_i64..3000,
    ) {
        let instant = epoch_day(instant_day);
        let (status, reason) = evaluate_status(&record, instant);
        match status {
            DerivedStatus::Pass => prop_assert!(reason.is_none()),
            DerivedStatus::Fail | DerivedStatus::Incomplete => prop_assert!(reason.is_some()),
        }
    }

    /// Missing proof dominates every other rule.
    #[test]
    fn missing_proof_always_reports_first(
        mut record in arb_record(),
        instant_day in 0_i64..3000,
    ) {
        record.proof_references.clear();
        let instant = epoch_day(instant_day);
        prop_assert_eq!(derive_status(&record, instant), DerivedStatus::Incomplete);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Walking any chain terminates, visits each version exactly once, and
    /// sees strictly increasing creation times.
    #[test]
    fn chain_walk_terminates_with_strictly_increasing_times(corrections in 0_usize..12) {
        let store = EvidenceStore::in_memory(catalog()).expect("store must open");
        let mut head = store
            .create_certification(
                "emp-prop",
                "OSHA-10",
                CertificationFields {
                    proof_references: vec!["p1".to_string()],
                    issue_date: Some(Utc::now()),
                    non_expiring: true,
                    ..Default::default()
                },
                &Actor::user("hr"),
            )
            .expect("intake must succeed");
        let root_id = head.id.clone();

        for n in 0..corrections {
            head = store
                .correct_certification(
                    &head.id,
                    &format!("revision {n}"),
                    &CertificationUpdate::default(),
                    &Actor::user("hr"),
                )
                .expect("correction against live head must succeed");
        }

        let chain = store.get_chain(&root_id).expect("walk must terminate");
        prop_assert_eq!(chain.len(), corrections + 1);

        let mut seen = std::collections::HashSet::new();
        for record in &chain {
            prop_assert!(seen.insert(record.id.clone()), "each version visited once");
        }
        for pair in chain.windows(2) {
            prop_assert!(pair[0].created_at < pair[1].created_at);
        }
        prop_assert_eq!(chain.last().map(|r| r.id.clone()), Some(head.id));
    }
}
