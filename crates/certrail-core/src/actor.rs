//! Resolved write actors.
//!
//! Every write carries a resolved actor; identity resolution happens before
//! a call reaches this core, so the actor is an opaque id plus a coarse kind
//! tag. There are no anonymous writes; the single exception is the reserved
//! [`Actor::system_automated`] pseudo-actor used for lazily-observed
//! transitions (e.g. an expiry crossing noticed at read time).

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Reserved id of the automated pseudo-actor.
pub const SYSTEM_AUTOMATED_ID: &str = "system:automated";

/// Coarse classification of a write actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorKind {
    /// A resolved human or API principal.
    User,
    /// The reserved automated pseudo-actor.
    System,
}

impl ActorKind {
    /// Stable storage tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
        }
    }

    /// Parses the stable storage tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Integrity`] for an unrecognized tag; an unknown
    /// actor kind in storage means the row did not come from this core.
    pub fn parse(value: &str) -> Result<Self, Error> {
        match value {
            "user" => Ok(Self::User),
            "system" => Ok(Self::System),
            other => Err(Error::integrity(format!("unknown actor kind: {other}"))),
        }
    }
}

/// A resolved actor attached to a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Actor {
    /// Opaque resolved identity.
    pub id: String,
    /// Coarse kind tag.
    pub kind: ActorKind,
}

impl Actor {
    /// A resolved user actor.
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ActorKind::User,
        }
    }

    /// The reserved `system:automated` pseudo-actor.
    #[must_use]
    pub fn system_automated() -> Self {
        Self {
            id: SYSTEM_AUTOMATED_ID.to_string(),
            kind: ActorKind::System,
        }
    }
}
