//! Append-only event ledger.
//!
//! Every fact associated with an entity (certification intake, corrections,
//! public verifications) lands here as a [`LedgerEvent`] hanging off an
//! [`EvidenceNode`]. Events are appended, never updated or deleted. The total
//! order per node is `(created_at, insertion_seq)`, with the sequence number
//! breaking ties among events stamped in the same microsecond.
//!
//! # Tamper evidence
//!
//! Each node carries its own SHA-256 hash chain: an event's `prev_hash` is
//! the `event_hash` of the node's previous event (or the genesis hash for
//! the first one), and `event_hash` covers the event's content plus
//! `prev_hash`. [`EvidenceStore::verify_node_chain`] re-walks the chain and
//! reports any breakage as a fatal integrity violation.
//!
//! # Atomic pairing
//!
//! Writes elsewhere in this crate append their ledger event inside the same
//! transaction as the underlying state change. A state change without its
//! paired event, or vice versa, cannot be produced through this API.

// Sequence numbers are assigned from 1 upward, so sign conversions at the
// SQLite boundary cannot lose information. Mutex poisoning indicates a panic
// in another thread, which is unrecoverable.
#![allow(
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::missing_panics_doc
)]

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::actor::{Actor, ActorKind};
use crate::error::Error;
use crate::store::EvidenceStore;
use crate::timestamp::{from_micros, to_micros};


/// Event type recorded when a certification chain gains its first version.
pub const EVENT_CERTIFICATION_CREATED: &str = "certification.created";
/// Event type recorded when a correction advances a chain head.
pub const EVENT_CERTIFICATION_CORRECTED: &str = "certification.corrected";
/// Event type recorded on every public verification.
pub const EVENT_VERIFIED: &str = "verified";

/// Hash of "nothing before this": 32 zero bytes, as in any empty chain.
pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// The kind of logical entity an evidence node anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    /// An employee (certification subject).
    Employee,
    /// A single certification chain.
    Certification,
    /// An organization.
    Organization,
}

impl EntityType {
    /// Stable storage tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::Certification => "certification",
            Self::Organization => "organization",
        }
    }

    /// Parses the stable storage tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Integrity`] for an unrecognized tag.
    pub fn parse(value: &str) -> Result<Self, Error> {
        match value {
            "employee" => Ok(Self::Employee),
            "certification" => Ok(Self::Certification),
            "organization" => Ok(Self::Organization),
            other => Err(Error::integrity(format!("unknown entity type: {other}"))),
        }
    }
}

/// Correlation anchor linking a logical entity to its ledger of facts.
///
/// Nodes are created lazily on the first fact for an entity. The
/// `(entity_type, entity_id)` pair is a weak back-reference used for lookup
/// only; nothing cascades through it, since nothing in this core is ever
/// deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceNode {
    /// Node id.
    pub id: String,
    /// Kind of entity anchored.
    pub entity_type: EntityType,
    /// Opaque entity id.
    pub entity_id: String,
    /// Instant the node was created (first fact observed).
    pub created_at: DateTime<Utc>,
}

/// One append-only fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEvent {
    /// Event id.
    pub id: String,
    /// Node this fact belongs to.
    pub evidence_node_id: String,
    /// Dotted event type (e.g. `certification.created`).
    pub event_type: String,
    /// JSON payload.
    pub payload: serde_json::Value,
    /// Resolved actor id.
    pub actor_id: String,
    /// Actor kind tag.
    pub actor_kind: ActorKind,
    /// Instant the fact was recorded.
    pub created_at: DateTime<Utc>,
    /// Per-node monotonic sequence, the tie-break within one microsecond.
    pub insertion_seq: u64,
    /// Hash of the node's previous event ([`GENESIS_HASH`] for the first).
    pub prev_hash: Vec<u8>,
    /// Hash of this event's content chained onto `prev_hash`.
    pub event_hash: Vec<u8>,
}

/// Computes the chained hash of an event's content.
fn compute_event_hash(
    prev_hash: &[u8],
    event_id: &str,
    evidence_node_id: &str,
    event_type: &str,
    payload_json: &str,
    actor_id: &str,
    actor_kind: ActorKind,
    created_at_us: i64,
    insertion_seq: u64,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash);
    hasher.update(event_id.as_bytes());
    hasher.update(evidence_node_id.as_bytes());
    hasher.update(event_type.as_bytes());
    hasher.update(payload_json.as_bytes());
    hasher.update(actor_id.as_bytes());
    hasher.update(actor_kind.as_str().as_bytes());
    hasher.update(created_at_us.to_le_bytes());
    hasher.update(insertion_seq.to_le_bytes());
    hasher.finalize().into()
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEvent> {
    Ok(RawEvent {
        id: row.get(0)?,
        evidence_node_id: row.get(1)?,
        event_type: row.get(2)?,
        payload_json: row.get(3)?,
        actor_id: row.get(4)?,
        actor_kind: row.get(5)?,
        created_at_us: row.get(6)?,
        insertion_seq: row.get::<_, i64>(7)?,
        prev_hash: row.get(8)?,
        event_hash: row.get(9)?,
    })
}

/// Row image before payload/tag decoding.
struct RawEvent {
    id: String,
    evidence_node_id: String,
    event_type: String,
    payload_json: String,
    actor_id: String,
    actor_kind: String,
    created_at_us: i64,
    insertion_seq: i64,
    prev_hash: Vec<u8>,
    event_hash: Vec<u8>,
}

impl RawEvent {
    fn decode(self) -> Result<LedgerEvent, Error> {
        Ok(LedgerEvent {
            payload: serde_json::from_str(&self.payload_json)?,
            actor_id: self.actor_id,
            actor_kind: ActorKind::parse(&self.actor_kind)?,
            created_at: from_micros(self.created_at_us),
            insertion_seq: self.insertion_seq as u64,
            id: self.id,
            evidence_node_id: self.evidence_node_id,
            event_type: self.event_type,
            prev_hash: self.prev_hash,
            event_hash: self.event_hash,
        })
    }
}

const SELECT_EVENT_COLUMNS: &str = "SELECT id, evidence_node_id, event_type, payload, actor_id, \
     actor_type, created_at_us, insertion_seq, prev_hash, event_hash FROM ledger_events";

/// Looks up a node inside a transaction, creating it if this is the entity's
/// first fact.
pub(crate) fn ensure_node_in_tx(
    tx: &Transaction<'_>,
    entity_type: EntityType,
    entity_id: &str,
    created_at: DateTime<Utc>,
) -> Result<EvidenceNode, Error> {
    if entity_id.trim().is_empty() {
        return Err(Error::validation("entity id must be non-empty"));
    }
    let existing = tx
        .query_row(
            "SELECT id, created_at_us FROM evidence_nodes WHERE entity_type = ?1 AND entity_id = ?2",
            params![entity_type.as_str(), entity_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;

    if let Some((id, created_at_us)) = existing {
        return Ok(EvidenceNode {
            id,
            entity_type,
            entity_id: entity_id.to_string(),
            created_at: from_micros(created_at_us),
        });
    }

    let node = EvidenceNode {
        id: format!("node-{}", Uuid::new_v4()),
        entity_type,
        entity_id: entity_id.to_string(),
        created_at,
    };
    tx.execute(
        "INSERT INTO evidence_nodes (id, entity_type, entity_id, created_at_us)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            node.id,
            entity_type.as_str(),
            entity_id,
            to_micros(created_at)
        ],
    )?;
    tracing::debug!(node_id = %node.id, entity = entity_type.as_str(), "evidence node created");
    Ok(node)
}

/// Appends one event inside the caller's transaction, advancing the node's
/// sequence and hash chain.
pub(crate) fn append_in_tx(
    tx: &Transaction<'_>,
    evidence_node_id: &str,
    event_type: &str,
    payload: &serde_json::Value,
    actor: &Actor,
    created_at: DateTime<Utc>,
) -> Result<LedgerEvent, Error> {
    let node_exists: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM evidence_nodes WHERE id = ?1",
            params![evidence_node_id],
            |row| row.get(0),
        )
        .optional()?;
    if node_exists.is_none() {
        return Err(Error::NotFound {
            entity: "evidence node",
            id: evidence_node_id.to_string(),
        });
    }

    let (last_seq, prev_hash): (i64, Vec<u8>) = tx
        .query_row(
            "SELECT insertion_seq, event_hash FROM ledger_events
             WHERE evidence_node_id = ?1
             ORDER BY insertion_seq DESC LIMIT 1",
            params![evidence_node_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .unwrap_or((0, GENESIS_HASH.to_vec()));

    let insertion_seq = last_seq + 1;
    let id = format!("evt-{}", Uuid::new_v4());
    let payload_json = serde_json::to_string(payload)?;
    let created_at_us = to_micros(created_at);
    let event_hash = compute_event_hash(
        &prev_hash,
        &id,
        evidence_node_id,
        event_type,
        &payload_json,
        &actor.id,
        actor.kind,
        created_at_us,
        insertion_seq as u64,
    );

    tx.execute(
        "INSERT INTO ledger_events
             (id, evidence_node_id, event_type, payload, actor_id, actor_type,
              created_at_us, insertion_seq, prev_hash, event_hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            id,
            evidence_node_id,
            event_type,
            payload_json,
            actor.id,
            actor.kind.as_str(),
            created_at_us,
            insertion_seq,
            prev_hash,
            event_hash.as_slice(),
        ],
    )?;
    tracing::debug!(
        event_id = %id,
        node_id = %evidence_node_id,
        event_type,
        seq = insertion_seq,
        "ledger event appended"
    );

    Ok(LedgerEvent {
        id,
        evidence_node_id: evidence_node_id.to_string(),
        event_type: event_type.to_string(),
        payload: payload.clone(),
        actor_id: actor.id.clone(),
        actor_kind: actor.kind,
        created_at,
        insertion_seq: insertion_seq as u64,
        prev_hash,
        event_hash: event_hash.to_vec(),
    })
}

fn query_events<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<LedgerEvent>, Error> {
    let mut stmt = conn.prepare(sql)?;
    let raw = stmt
        .query_map(params, row_to_event)?
        .collect::<Result<Vec<_>, _>>()?;
    raw.into_iter().map(RawEvent::decode).collect()
}

impl EvidenceStore {
    /// Looks up the evidence node for an entity, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a blank entity id, or a database
    /// error.
    pub fn ensure_node(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<EvidenceNode, Error> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let node = ensure_node_in_tx(&tx, entity_type, entity_id, Utc::now())?;
        tx.commit()?;
        Ok(node)
    }

    /// Finds an existing evidence node without creating one.
    ///
    /// # Errors
    ///
    /// Returns a database error if the lookup fails.
    pub fn find_node(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<EvidenceNode>, Error> {
        let conn = self.conn.lock().unwrap();
        let node = conn
            .query_row(
                "SELECT id, created_at_us FROM evidence_nodes
                 WHERE entity_type = ?1 AND entity_id = ?2",
                params![entity_type.as_str(), entity_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        Ok(node.map(|(id, created_at_us)| EvidenceNode {
            id,
            entity_type,
            entity_id: entity_id.to_string(),
            created_at: from_micros(created_at_us),
        }))
    }

    /// Appends a standalone fact to a node's ledger.
    ///
    /// This is the sole public write path into the ledger; the record and
    /// verification commands use the same underlying append inside their own
    /// transactions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the node does not exist.
    pub fn append(
        &self,
        evidence_node_id: &str,
        event_type: &str,
        payload: serde_json::Value,
        actor: &Actor,
    ) -> Result<LedgerEvent, Error> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let event = append_in_tx(&tx, evidence_node_id, event_type, &payload, actor, Utc::now())?;
        tx.commit()?;
        Ok(event)
    }

    /// Reads a node's events, optionally bounded to `[from_time, to_time]`,
    /// ordered by `(created_at, insertion_seq)`.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub fn read(
        &self,
        evidence_node_id: &str,
        from_time: Option<DateTime<Utc>>,
        to_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<LedgerEvent>, Error> {
        let conn = self.conn.lock().unwrap();
        let from_us = from_time.map_or(i64::MIN, to_micros);
        let to_us = to_time.map_or(i64::MAX, to_micros);
        let sql = format!(
            "{SELECT_EVENT_COLUMNS}
             WHERE evidence_node_id = ?1 AND created_at_us >= ?2 AND created_at_us <= ?3
             ORDER BY created_at_us ASC, insertion_seq ASC"
        );
        query_events(&conn, &sql, params![evidence_node_id, from_us, to_us])
    }

    /// Reads up to `limit` events with `insertion_seq >= cursor`, in sequence
    /// order. Export callers page by passing the last seen sequence plus one,
    /// which makes interrupted exports restartable.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub fn read_from(
        &self,
        evidence_node_id: &str,
        cursor: u64,
        limit: u64,
    ) -> Result<Vec<LedgerEvent>, Error> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "{SELECT_EVENT_COLUMNS}
             WHERE evidence_node_id = ?1 AND insertion_seq >= ?2
             ORDER BY insertion_seq ASC
             LIMIT ?3"
        );
        let cursor = i64::try_from(cursor).unwrap_or(i64::MAX);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        query_events(&conn, &sql, params![evidence_node_id, cursor, limit])
    }

    /// Opens a read-only connection for audit-package export.
    ///
    /// Export formatting runs out of process from intake, and WAL mode lets
    /// it page through a node's events while writes are in progress without
    /// ever blocking them.
    ///
    /// # Errors
    ///
    /// Returns an error for an in-memory store (no file to reopen) or if the
    /// connection cannot be opened.
    pub fn open_reader(&self) -> Result<AuditReader, Error> {
        let path = self.db_path().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "cannot create reader for in-memory store",
            ))
        })?;
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(AuditReader {
            conn: std::sync::Mutex::new(conn),
        })
    }

    /// Re-walks a node's hash chain and verifies every link.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Integrity`] on the first broken link or recomputation
    /// mismatch, evidence that the stored events are not the ones that were
    /// appended.
    pub fn verify_node_chain(&self, evidence_node_id: &str) -> Result<(), Error> {
        let events = self.read_from(evidence_node_id, 0, u64::MAX)?;
        let mut expected_prev: Vec<u8> = GENESIS_HASH.to_vec();
        for event in &events {
            if event.prev_hash != expected_prev {
                tracing::error!(
                    node_id = %evidence_node_id,
                    event_id = %event.id,
                    "ledger hash chain broken: prev_hash mismatch"
                );
                return Err(Error::integrity(format!(
                    "hash chain broken at event {}: prev_hash mismatch",
                    event.id
                )));
            }
            let payload_json = serde_json::to_string(&event.payload)?;
            let recomputed = compute_event_hash(
                &event.prev_hash,
                &event.id,
                &event.evidence_node_id,
                &event.event_type,
                &payload_json,
                &event.actor_id,
                event.actor_kind,
                to_micros(event.created_at),
                event.insertion_seq,
            );
            if recomputed.as_slice() != event.event_hash.as_slice() {
                tracing::error!(
                    node_id = %evidence_node_id,
                    event_id = %event.id,
                    "ledger hash chain broken: content hash mismatch"
                );
                return Err(Error::integrity(format!(
                    "hash chain broken at event {}: content hash mismatch",
                    event.id
                )));
            }
            expected_prev.clone_from(&event.event_hash);
        }
        Ok(())
    }
}

/// A read-only view of the ledger for concurrent audit export.
pub struct AuditReader {
    conn: std::sync::Mutex<Connection>,
}

impl AuditReader {
    /// Reads a node's events within an optional time window, ordered by
    /// `(created_at, insertion_seq)`.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub fn read(
        &self,
        evidence_node_id: &str,
        from_time: Option<DateTime<Utc>>,
        to_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<LedgerEvent>, Error> {
        let conn = self.conn.lock().unwrap();
        let from_us = from_time.map_or(i64::MIN, to_micros);
        let to_us = to_time.map_or(i64::MAX, to_micros);
        let sql = format!(
            "{SELECT_EVENT_COLUMNS}
             WHERE evidence_node_id = ?1 AND created_at_us >= ?2 AND created_at_us <= ?3
             ORDER BY created_at_us ASC, insertion_seq ASC"
        );
        query_events(&conn, &sql, params![evidence_node_id, from_us, to_us])
    }

    /// Reads up to `limit` events with `insertion_seq >= cursor`, in
    /// sequence order, for restartable export paging.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub fn read_from(
        &self,
        evidence_node_id: &str,
        cursor: u64,
        limit: u64,
    ) -> Result<Vec<LedgerEvent>, Error> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "{SELECT_EVENT_COLUMNS}
             WHERE evidence_node_id = ?1 AND insertion_seq >= ?2
             ORDER BY insertion_seq ASC
             LIMIT ?3"
        );
        let cursor = i64::try_from(cursor).unwrap_or(i64::MAX);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        query_events(&conn, &sql, params![evidence_node_id, cursor, limit])
    }
}
