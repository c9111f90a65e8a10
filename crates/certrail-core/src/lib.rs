//! Append-only compliance evidence ledger.
//!
//! `certrail-core` tracks employee certifications as chains of immutable
//! record versions and derives work-authorization decisions from them. The
//! crate is the evidence core of the product: dashboards, forms, uploads,
//! and notification plumbing live elsewhere and only call into or render
//! the outputs of this crate.
//!
//! # Architecture
//!
//! ```text
//! create_certification / correct_certification
//!        |
//!        v
//! EvidenceStore ──(same transaction)──> Event Ledger (append-only,
//!        |                              hash-chained per node)
//!        v
//! chain_heads index (CAS-guarded derived cache)
//!
//! status_as_of / employee_snapshot ──> derive_status (pure)
//!        |
//!        v
//! employee_enforcement_state (CLEARED / BLOCKED / PENDING)
//!
//! record_verification ──> frozen EmployeeSnapshot + `verified` event
//! ```
//!
//! # Guarantees
//!
//! - Certification record versions are never mutated; corrections append a
//!   new version linked by `supersedes`, one linear chain per
//!   `(subject, type)`.
//! - Concurrent corrections against the same head resolve by
//!   compare-and-swap: one winner, one [`Error::Conflict`].
//! - Point-in-time queries pin both the visible version and its validity to
//!   the same instant, so later corrections cannot rewrite what was
//!   reported.
//! - Every state change appends exactly one ledger event in the same
//!   transaction; each node's events form a SHA-256 hash chain.
//! - Structural chain violations are fatal: the chain is quarantined for
//!   manual audit, never silently repaired.
//!
//! # Example
//!
//! ```rust,no_run
//! use certrail_core::{
//!     Actor, CertificationFields, EvidenceStore, TypeCatalog, VerificationMethod,
//! };
//!
//! # fn example() -> Result<(), certrail_core::Error> {
//! let catalog = TypeCatalog::from_toml(
//!     "version = 1\n[[types]]\nid = \"OSHA-10\"\nname = \"OSHA 10\"\nrequired = true\n",
//! )?;
//! let store = EvidenceStore::open("/var/lib/certrail/evidence.db", catalog)?;
//!
//! let record = store.create_certification(
//!     "emp-417",
//!     "OSHA-10",
//!     CertificationFields {
//!         proof_references: vec!["upload-9b2".to_string()],
//!         non_expiring: true,
//!         issue_date: Some(chrono::Utc::now()),
//!         ..Default::default()
//!     },
//!     &Actor::user("hr-12"),
//! )?;
//!
//! let decision = store.employee_enforcement_state_now("emp-417")?;
//! let scan = store.record_verification("emp-417", VerificationMethod::QrScan, None)?;
//! # let _ = (record, decision, scan);
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod catalog;
pub mod config;
pub mod enforcement;
pub mod error;
pub mod ledger;
pub mod record;
pub mod snapshot;
pub mod status;
pub mod store;
mod timestamp;
pub mod verification;

pub use actor::{Actor, ActorKind, SYSTEM_AUTOMATED_ID};
pub use catalog::{CertificationType, TypeCatalog};
pub use config::LedgerConfig;
pub use enforcement::{EnforcementDecision, EnforcementReason, EnforcementState};
pub use error::Error;
pub use ledger::{AuditReader, EntityType, EvidenceNode, LedgerEvent};
pub use record::{CertificationFields, CertificationRecord, CertificationUpdate};
pub use snapshot::{EmployeeSnapshot, SnapshotStatus};
pub use status::{derive_status, failure_reason, DerivedStatus};
pub use store::{EvidenceStore, QuarantinedChain};
pub use verification::{DisplayedOutcome, VerificationEvent, VerificationMethod};
