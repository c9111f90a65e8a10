//! Error types for the evidence ledger core.

use thiserror::Error;

/// Errors that can occur during evidence ledger operations.
///
/// The first four variants are the caller-facing taxonomy: `Validation`,
/// `Conflict`, and `NotFound` are user-actionable and leave zero partial
/// effect; `Integrity` is fatal and non-retryable, since it signals tampering or
/// a defect, quarantines the affected chain, and must alert rather than be
/// silently repaired.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed input, rejected before any write.
    #[error("validation failed: {reason}")]
    Validation {
        /// Why the input was rejected.
        reason: String,
    },

    /// Optimistic-concurrency loss on a correction: the supplied version is
    /// no longer the chain head. The caller must refetch the new head before
    /// retrying.
    #[error(
        "record {stale_head} for ({subject_id}, {type_id}) changed since it was loaded; \
         current head is {current_head}"
    )]
    Conflict {
        /// Subject whose chain was contended.
        subject_id: String,
        /// Certification type of the contended chain.
        type_id: String,
        /// The head id the caller believed was current.
        stale_head: String,
        /// The actual current head id.
        current_head: String,
    },

    /// A referenced subject, record, or evidence node does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity that was looked up.
        entity: &'static str,
        /// The id that was not found.
        id: String,
    },

    /// Fatal integrity violation: chain cycle, non-monotonic supersedes
    /// target, broken event hash chain, or a head index pointing outside its
    /// chain. Never retried, never auto-repaired.
    #[error("integrity violation: {details}")]
    Integrity {
        /// What was observed.
        details: String,
    },

    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error during database operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Event payload or frozen snapshot could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a [`Error::Validation`] with the given reason.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`Error::Integrity`] with the given details.
    pub fn integrity(details: impl Into<String>) -> Self {
        Self::Integrity {
            details: details.into(),
        }
    }

    /// True if retrying the operation against refreshed state can succeed.
    ///
    /// `Integrity` is never retryable; `Conflict` is retryable after the
    /// caller refetches the current head.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_display_names_both_heads() {
        let err = Error::Conflict {
            subject_id: "emp-1".to_string(),
            type_id: "OSHA-10".to_string(),
            stale_head: "cert-a".to_string(),
            current_head: "cert-b".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("cert-a"));
        assert!(msg.contains("cert-b"));
        assert!(msg.contains("changed since it was loaded"));
    }

    #[test]
    fn only_conflict_is_retryable() {
        assert!(
            Error::Conflict {
                subject_id: String::new(),
                type_id: String::new(),
                stale_head: String::new(),
                current_head: String::new(),
            }
            .is_retryable()
        );
        assert!(!Error::validation("empty reason").is_retryable());
        assert!(!Error::integrity("cycle").is_retryable());
        assert!(
            !Error::NotFound {
                entity: "record",
                id: "x".to_string(),
            }
            .is_retryable()
        );
    }
}
