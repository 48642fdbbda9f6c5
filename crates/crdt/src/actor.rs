//! Actor identifiers for replicas in a document session.
//!
//! Every replica that edits a document is identified by a stable
//! `ActorId`. Actor IDs participate in the total order of time tickets,
//! so their ordering must be deterministic across replicas; we order by
//! the raw 128-bit UUID value.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a replica in the collaborative system.
///
/// Actor IDs are used for:
/// - Stamping time tickets with the replica that issued them
/// - Breaking ties between concurrent operations
/// - Keying per-actor state (presence, sync gates)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(Uuid);

impl ActorId {
    /// The initial actor, used by tickets that predate any replica
    /// (the root object, sentinel nodes). Sorts below every real actor.
    pub fn initial() -> Self {
        Self(Uuid::nil())
    }

    /// The maximum actor, used by the upper-sentinel ticket.
    pub fn max() -> Self {
        Self(Uuid::from_u128(u128::MAX))
    }

    /// Generate a fresh random actor ID for a new replica.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Check whether this is the initial (nil) actor.
    pub fn is_initial(&self) -> bool {
        self.0.is_nil()
    }

    /// Canonical 32-character lowercase hex form.
    pub fn to_hex(&self) -> String {
        self.0.simple().to_string()
    }
}

impl From<Uuid> for ActorId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_initial() {
            write!(f, "nil")
        } else {
            write!(f, "{}", self.0.simple())
        }
    }
}

impl fmt::Debug for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Actor({})", self)
    }
}
