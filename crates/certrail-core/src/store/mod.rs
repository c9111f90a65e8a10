//! Evidence store and correction chain manager.
//!
//! [`EvidenceStore`] owns the durable store: the append-only
//! `certification_records` table, the CAS-guarded `chain_heads` index, the
//! event ledger, and the verification log. `SQLite` runs in WAL mode so
//! readers never block the single writer, matching the many-reader /
//! serialized-writer model every exposed command assumes.
//!
//! # Correction chains
//!
//! A record is never edited. `correct_certification` copies the superseded
//! version's fields, overlays the changed ones, and advances the chain head
//! by compare-and-swap inside one transaction: of two concurrent corrections
//! against the same head, exactly one commits and the other receives
//! [`Error::Conflict`]. The losing caller must refetch the head; nothing is
//! merged or silently overwritten.
//!
//! # Integrity
//!
//! A chain that fails a structural check (cycle, dangling supersedes target,
//! non-monotonic timestamps, branch) is quarantined: the violation is
//! recorded in `quarantined_chains`, an error-level trace fires, and further
//! corrections against the chain are refused until a manual audit clears the
//! flag.

// SQLite returns i64 for counters that are always non-negative here.
// Mutex poisoning indicates a panic in another thread, which is
// unrecoverable.
#![allow(clippy::cast_sign_loss, clippy::missing_panics_doc)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction};
use uuid::Uuid;

use crate::actor::Actor;
use crate::catalog::TypeCatalog;
use crate::error::Error;
use crate::ledger::{
    append_in_tx, ensure_node_in_tx, EntityType, EVENT_CERTIFICATION_CORRECTED,
    EVENT_CERTIFICATION_CREATED,
};
use crate::record::{CertificationFields, CertificationRecord, CertificationUpdate};
use crate::timestamp::{from_micros, opt_from_micros, opt_to_micros, to_micros};


/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

const SELECT_RECORD_COLUMNS: &str = "SELECT id, subject_id, type_id, issuing_authority, \
     issue_date_us, expiration_date_us, non_expiring, proof_references, created_at_us, \
     supersedes, correction_reason, corrected_by, corrected_at_us FROM certification_records";

/// A chain flagged for manual audit after an integrity violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantinedChain {
    /// Subject of the flagged chain.
    pub subject_id: String,
    /// Certification type of the flagged chain.
    pub type_id: String,
    /// What was observed.
    pub details: String,
    /// When the flag was raised.
    pub flagged_at: DateTime<Utc>,
}

/// The durable evidence store.
pub struct EvidenceStore {
    pub(crate) conn: Arc<Mutex<Connection>>,
    pub(crate) catalog: TypeCatalog,
    path: Option<PathBuf>,
}

struct RawRecord {
    id: String,
    subject_id: String,
    type_id: String,
    issuing_authority: Option<String>,
    issue_date_us: Option<i64>,
    expiration_date_us: Option<i64>,
    non_expiring: bool,
    proof_references_json: String,
    created_at_us: i64,
    supersedes: Option<String>,
    correction_reason: Option<String>,
    corrected_by: Option<String>,
    corrected_at_us: Option<i64>,
}

impl RawRecord {
    fn decode(self) -> Result<CertificationRecord, Error> {
        Ok(CertificationRecord {
            proof_references: serde_json::from_str(&self.proof_references_json)?,
            issue_date: opt_from_micros(self.issue_date_us),
            expiration_date: opt_from_micros(self.expiration_date_us),
            created_at: from_micros(self.created_at_us),
            corrected_at: opt_from_micros(self.corrected_at_us),
            id: self.id,
            subject_id: self.subject_id,
            type_id: self.type_id,
            issuing_authority: self.issuing_authority,
            non_expiring: self.non_expiring,
            supersedes: self.supersedes,
            correction_reason: self.correction_reason,
            corrected_by: self.corrected_by,
        })
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get(0)?,
        subject_id: row.get(1)?,
        type_id: row.get(2)?,
        issuing_authority: row.get(3)?,
        issue_date_us: row.get(4)?,
        expiration_date_us: row.get(5)?,
        non_expiring: row.get(6)?,
        proof_references_json: row.get(7)?,
        created_at_us: row.get(8)?,
        supersedes: row.get(9)?,
        correction_reason: row.get(10)?,
        corrected_by: row.get(11)?,
        corrected_at_us: row.get(12)?,
    })
}

fn insert_record(tx: &Transaction<'_>, record: &CertificationRecord) -> Result<(), Error> {
    tx.execute(
        "INSERT INTO certification_records
             (id, subject_id, type_id, issuing_authority, issue_date_us, expiration_date_us,
              non_expiring, proof_references, created_at_us, supersedes, correction_reason,
              corrected_by, corrected_at_us)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            record.id,
            record.subject_id,
            record.type_id,
            record.issuing_authority,
            opt_to_micros(record.issue_date),
            opt_to_micros(record.expiration_date),
            record.non_expiring,
            serde_json::to_string(&record.proof_references)?,
            to_micros(record.created_at),
            record.supersedes,
            record.correction_reason,
            record.corrected_by,
            opt_to_micros(record.corrected_at),
        ],
    )?;
    Ok(())
}

fn load_record(conn: &Connection, id: &str) -> Result<Option<CertificationRecord>, Error> {
    let sql = format!("{SELECT_RECORD_COLUMNS} WHERE id = ?1");
    let raw = conn
        .prepare(&sql)?
        .query_row(params![id], row_to_record)
        .optional()?;
    raw.map(RawRecord::decode).transpose()
}

fn head_of(conn: &Connection, subject_id: &str, type_id: &str) -> Result<Option<String>, Error> {
    let head = conn
        .query_row(
            "SELECT head_id FROM chain_heads WHERE subject_id = ?1 AND type_id = ?2",
            params![subject_id, type_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(head)
}

fn is_quarantined(conn: &Connection, subject_id: &str, type_id: &str) -> Result<bool, Error> {
    let flagged: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM quarantined_chains WHERE subject_id = ?1 AND type_id = ?2",
            params![subject_id, type_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(flagged.is_some())
}

fn quarantine(
    conn: &Connection,
    subject_id: &str,
    type_id: &str,
    details: &str,
) -> Result<(), Error> {
    conn.execute(
        "INSERT OR IGNORE INTO quarantined_chains (subject_id, type_id, details, flagged_at_us)
         VALUES (?1, ?2, ?3, ?4)",
        params![subject_id, type_id, details, to_micros(Utc::now())],
    )?;
    tracing::error!(subject_id, type_id, details, "chain quarantined for manual audit");
    Ok(())
}

impl EvidenceStore {
    /// Opens or creates a store at the given path with the effective
    /// certification-type catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>, catalog: TypeCatalog) -> Result<Self, Error> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            catalog,
            path: Some(path.to_path_buf()),
        })
    }

    /// Creates an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory(catalog: TypeCatalog) -> Result<Self, Error> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            catalog,
            path: None,
        })
    }

    /// The effective certification-type catalog.
    #[must_use]
    pub const fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    /// The on-disk database path, if this store is not in-memory.
    pub(crate) fn db_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Records the intake of a new certification and makes it the chain head
    /// for its `(subject, type)` pair.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `type_id` is absent from the
    /// effective catalog, the subject id is blank, or a proof reference is
    /// blank; [`Error::Integrity`] if the chain is quarantined.
    pub fn create_certification(
        &self,
        subject_id: &str,
        type_id: &str,
        fields: CertificationFields,
        actor: &Actor,
    ) -> Result<CertificationRecord, Error> {
        if subject_id.trim().is_empty() {
            return Err(Error::validation("subject id must be non-empty"));
        }
        if !self.catalog.contains(type_id) {
            return Err(Error::validation(format!(
                "unknown certification type: {type_id}"
            )));
        }
        let fields = fields.normalize()?;
        let now = Utc::now();
        let record = CertificationRecord {
            id: format!("cert-{}", Uuid::new_v4()),
            subject_id: subject_id.to_string(),
            type_id: type_id.to_string(),
            issuing_authority: fields.issuing_authority,
            issue_date: fields.issue_date,
            expiration_date: fields.expiration_date,
            non_expiring: fields.non_expiring,
            proof_references: fields.proof_references,
            created_at: now,
            supersedes: None,
            correction_reason: None,
            corrected_by: None,
            corrected_at: None,
        };

        let mut conn = self.conn.lock().unwrap();
        if is_quarantined(&conn, subject_id, type_id)? {
            return Err(Error::integrity(format!(
                "chain ({subject_id}, {type_id}) is quarantined pending manual audit"
            )));
        }
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        insert_record(&tx, &record)?;
        tx.execute(
            "INSERT INTO chain_heads (subject_id, type_id, head_id, version)
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT (subject_id, type_id)
             DO UPDATE SET head_id = excluded.head_id, version = version + 1",
            params![subject_id, type_id, record.id],
        )?;
        let node = ensure_node_in_tx(&tx, EntityType::Employee, subject_id, now)?;
        append_in_tx(
            &tx,
            &node.id,
            EVENT_CERTIFICATION_CREATED,
            &serde_json::json!({
                "record_id": record.id,
                "subject_id": subject_id,
                "type_id": type_id,
            }),
            actor,
            now,
        )?;
        tx.commit()?;
        tracing::info!(
            record_id = %record.id,
            subject_id,
            type_id,
            "certification recorded"
        );
        Ok(record)
    }

    /// Records a correction as a new immutable version and advances the
    /// chain head by compare-and-swap.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an empty reason,
    /// [`Error::NotFound`] if `current_id` does not exist,
    /// [`Error::Conflict`] if `current_id` exists but is no longer the chain
    /// head, and [`Error::Integrity`] if the chain is quarantined or its
    /// head index is missing.
    pub fn correct_certification(
        &self,
        current_id: &str,
        reason: &str,
        changed_fields: &CertificationUpdate,
        actor: &Actor,
    ) -> Result<CertificationRecord, Error> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Error::validation("correction reason must be non-empty"));
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let Some(current) = load_record(&tx, current_id)? else {
            return Err(Error::NotFound {
                entity: "certification record",
                id: current_id.to_string(),
            });
        };
        if is_quarantined(&tx, &current.subject_id, &current.type_id)? {
            return Err(Error::integrity(format!(
                "chain ({}, {}) is quarantined pending manual audit",
                current.subject_id, current.type_id
            )));
        }
        let Some(head_id) = head_of(&tx, &current.subject_id, &current.type_id)? else {
            quarantine(
                &tx,
                &current.subject_id,
                &current.type_id,
                "record exists but head index row is missing",
            )?;
            tx.commit()?;
            return Err(Error::integrity(format!(
                "head index missing for ({}, {})",
                current.subject_id, current.type_id
            )));
        };
        if head_id != current_id {
            tracing::warn!(
                stale_head = current_id,
                current_head = %head_id,
                "correction lost against a newer head"
            );
            return Err(Error::Conflict {
                subject_id: current.subject_id,
                type_id: current.type_id,
                stale_head: current_id.to_string(),
                current_head: head_id,
            });
        }

        let fields = changed_fields.apply(current.fields()).normalize()?;
        // A correction is strictly newer than the version it supersedes even
        // under clock jitter within the same microsecond.
        let now = Utc::now();
        let created_at = if now > current.created_at {
            now
        } else {
            current.created_at + Duration::microseconds(1)
        };
        let record = CertificationRecord {
            id: format!("cert-{}", Uuid::new_v4()),
            subject_id: current.subject_id.clone(),
            type_id: current.type_id.clone(),
            issuing_authority: fields.issuing_authority,
            issue_date: fields.issue_date,
            expiration_date: fields.expiration_date,
            non_expiring: fields.non_expiring,
            proof_references: fields.proof_references,
            created_at,
            supersedes: Some(current.id.clone()),
            correction_reason: Some(reason.to_string()),
            corrected_by: Some(actor.id.clone()),
            corrected_at: Some(created_at),
        };

        insert_record(&tx, &record)?;
        let swapped = tx.execute(
            "UPDATE chain_heads SET head_id = ?1, version = version + 1
             WHERE subject_id = ?2 AND type_id = ?3 AND head_id = ?4",
            params![record.id, record.subject_id, record.type_id, current_id],
        )?;
        if swapped != 1 {
            // The head moved between the read above and the swap; surface the
            // loss without committing anything.
            let current_head =
                head_of(&tx, &record.subject_id, &record.type_id)?.unwrap_or_default();
            return Err(Error::Conflict {
                subject_id: record.subject_id,
                type_id: record.type_id,
                stale_head: current_id.to_string(),
                current_head,
            });
        }
        let node = ensure_node_in_tx(&tx, EntityType::Employee, &record.subject_id, created_at)?;
        append_in_tx(
            &tx,
            &node.id,
            EVENT_CERTIFICATION_CORRECTED,
            &serde_json::json!({
                "record_id": record.id,
                "supersedes": current_id,
                "reason": reason,
            }),
            actor,
            created_at,
        )?;
        tx.commit()?;
        tracing::info!(
            record_id = %record.id,
            supersedes = current_id,
            subject_id = %record.subject_id,
            type_id = %record.type_id,
            "chain head advanced"
        );
        Ok(record)
    }

    /// Loads a single version by id. Superseded versions remain permanently
    /// queryable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no version has that id.
    pub fn get_record(&self, id: &str) -> Result<CertificationRecord, Error> {
        let conn = self.conn.lock().unwrap();
        load_record(&conn, id)?.ok_or_else(|| Error::NotFound {
            entity: "certification record",
            id: id.to_string(),
        })
    }

    /// The current chain head for a `(subject, type)` pair, if any chain
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Integrity`] if the index points at a record that does
    /// not exist.
    pub fn current_head(
        &self,
        subject_id: &str,
        type_id: &str,
    ) -> Result<Option<CertificationRecord>, Error> {
        let conn = self.conn.lock().unwrap();
        let Some(head_id) = head_of(&conn, subject_id, type_id)? else {
            return Ok(None);
        };
        match load_record(&conn, &head_id)? {
            Some(record) => Ok(Some(record)),
            None => {
                quarantine(
                    &conn,
                    subject_id,
                    type_id,
                    "head index points at a missing record",
                )?;
                Err(Error::integrity(format!(
                    "head index for ({subject_id}, {type_id}) points at missing record {head_id}"
                )))
            },
        }
    }

    /// Walks the full correction chain containing `any_version_id`, oldest
    /// to newest.
    ///
    /// The walk is finite and restartable: each version is visited at most
    /// once, and a cycle, a dangling or non-strictly-older supersedes
    /// target, or a branch is a fatal [`Error::Integrity`] that quarantines
    /// the chain rather than being repaired.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `any_version_id` does not exist, or
    /// [`Error::Integrity`] as above.
    pub fn get_chain(&self, any_version_id: &str) -> Result<Vec<CertificationRecord>, Error> {
        let conn = self.conn.lock().unwrap();
        let Some(start) = load_record(&conn, any_version_id)? else {
            return Err(Error::NotFound {
                entity: "certification record",
                id: any_version_id.to_string(),
            });
        };
        let subject_id = start.subject_id.clone();
        let type_id = start.type_id.clone();

        let fail = |conn: &Connection, details: String| -> Error {
            if let Err(err) = quarantine(conn, &subject_id, &type_id, &details) {
                return err;
            }
            Error::Integrity { details }
        };

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(start.id.clone());

        // Backward to the chain root.
        let mut older: Vec<CertificationRecord> = Vec::new();
        let mut cursor = start.clone();
        while let Some(parent_id) = cursor.supersedes.clone() {
            if !visited.insert(parent_id.clone()) {
                return Err(fail(
                    &conn,
                    format!("supersedes cycle through record {parent_id}"),
                ));
            }
            let Some(parent) = load_record(&conn, &parent_id)? else {
                return Err(fail(
                    &conn,
                    format!("record {} supersedes missing record {parent_id}", cursor.id),
                ));
            };
            if parent.created_at >= cursor.created_at {
                return Err(fail(
                    &conn,
                    format!(
                        "record {} supersedes {} which is not strictly older",
                        cursor.id, parent.id
                    ),
                ));
            }
            older.push(parent.clone());
            cursor = parent;
        }

        // Forward to the chain tip.
        let mut newer: Vec<CertificationRecord> = Vec::new();
        let mut cursor = start.clone();
        loop {
            let sql = format!("{SELECT_RECORD_COLUMNS} WHERE supersedes = ?1");
            let children = conn
                .prepare(&sql)?
                .query_map(params![cursor.id], row_to_record)?
                .collect::<Result<Vec<_>, _>>()?;
            let mut children = children
                .into_iter()
                .map(RawRecord::decode)
                .collect::<Result<Vec<_>, _>>()?;
            if children.len() > 1 {
                return Err(fail(
                    &conn,
                    format!("record {} is superseded by more than one version", cursor.id),
                ));
            }
            let Some(child) = children.pop() else {
                break;
            };
            if !visited.insert(child.id.clone()) {
                return Err(fail(
                    &conn,
                    format!("supersedes cycle through record {}", child.id),
                ));
            }
            if child.created_at <= cursor.created_at {
                return Err(fail(
                    &conn,
                    format!(
                        "record {} supersedes {} which is not strictly older",
                        child.id, cursor.id
                    ),
                ));
            }
            newer.push(child.clone());
            cursor = child;
        }

        let mut chain: Vec<CertificationRecord> = older.into_iter().rev().collect();
        chain.push(start);
        chain.extend(newer);
        Ok(chain)
    }

    /// The latest version of `(subject, type)` created at or before
    /// `instant`, for the point-in-time engine.
    pub(crate) fn latest_record_at(
        &self,
        subject_id: &str,
        type_id: &str,
        instant: DateTime<Utc>,
    ) -> Result<Option<CertificationRecord>, Error> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "{SELECT_RECORD_COLUMNS}
             WHERE subject_id = ?1 AND type_id = ?2 AND created_at_us <= ?3
             ORDER BY created_at_us DESC, rowid DESC
             LIMIT 1"
        );
        let raw = conn
            .prepare(&sql)?
            .query_row(
                params![subject_id, type_id, to_micros(instant)],
                row_to_record,
            )
            .optional()?;
        raw.map(RawRecord::decode).transpose()
    }

    /// Recomputes the chain head for a `(subject, type)` pair from raw
    /// records, ignoring the index entirely.
    ///
    /// The head index is a derived cache; this is the replay that proves it.
    /// The computed head is the unsuperseded version with the latest
    /// `created_at`.
    ///
    /// # Errors
    ///
    /// Returns a database error if the scan fails.
    pub fn rebuild_head(
        &self,
        subject_id: &str,
        type_id: &str,
    ) -> Result<Option<CertificationRecord>, Error> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "{SELECT_RECORD_COLUMNS}
             WHERE subject_id = ?1 AND type_id = ?2
               AND id NOT IN (
                   SELECT supersedes FROM certification_records
                   WHERE supersedes IS NOT NULL
               )
             ORDER BY created_at_us DESC
             LIMIT 1"
        );
        let raw = conn
            .prepare(&sql)?
            .query_row(params![subject_id, type_id], row_to_record)
            .optional()?;
        raw.map(RawRecord::decode).transpose()
    }

    /// Chains currently flagged for manual audit.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub fn quarantined_chains(&self) -> Result<Vec<QuarantinedChain>, Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT subject_id, type_id, details, flagged_at_us
             FROM quarantined_chains
             ORDER BY flagged_at_us ASC",
        )?;
        let chains = stmt
            .query_map([], |row| {
                Ok(QuarantinedChain {
                    subject_id: row.get(0)?,
                    type_id: row.get(1)?,
                    details: row.get(2)?,
                    flagged_at: from_micros(row.get(3)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chains)
    }

    /// Clears a quarantine flag after manual audit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the chain is not quarantined.
    pub fn clear_quarantine(&self, subject_id: &str, type_id: &str) -> Result<(), Error> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM quarantined_chains WHERE subject_id = ?1 AND type_id = ?2",
            params![subject_id, type_id],
        )?;
        if removed == 0 {
            return Err(Error::NotFound {
                entity: "quarantined chain",
                id: format!("({subject_id}, {type_id})"),
            });
        }
        tracing::info!(subject_id, type_id, "quarantine cleared after manual audit");
        Ok(())
    }
}
