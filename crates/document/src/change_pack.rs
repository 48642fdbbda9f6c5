//! Change packs: the push/pull unit exchanged with a sync peer.

use crate::change::Change;
use crdt::TimeTicket;
use serde::{Deserialize, Serialize};

/// How far a replica has synced: the server's sequence of the last pull
/// and the client's sequence of the last acknowledged local change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub server_seq: i64,
    pub client_seq: u32,
}

impl Checkpoint {
    pub fn new(server_seq: i64, client_seq: u32) -> Self {
        Self {
            server_seq,
            client_seq,
        }
    }

    /// Advance to cover `other`; checkpoints never move backwards.
    pub fn forward(&self, other: &Checkpoint) -> Self {
        Self {
            server_seq: self.server_seq.max(other.server_seq),
            client_seq: self.client_seq.max(other.client_seq),
        }
    }
}

/// A bundle of changes plus sync bookkeeping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangePack {
    pub doc_key: String,
    pub checkpoint: Checkpoint,
    pub changes: Vec<Change>,
    /// Full document state replacing the root when present (opaque to
    /// the transport, a serialized snapshot payload to us).
    pub snapshot: Option<Vec<u8>>,
    /// Minimum ticket every peer has observed; the GC bound.
    pub min_synced_ticket: Option<TimeTicket>,
}

impl ChangePack {
    pub fn new(
        doc_key: &str,
        checkpoint: Checkpoint,
        changes: Vec<Change>,
        snapshot: Option<Vec<u8>>,
        min_synced_ticket: Option<TimeTicket>,
    ) -> Self {
        Self {
            doc_key: doc_key.to_string(),
            checkpoint,
            changes,
            snapshot,
            min_synced_ticket,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.snapshot.is_none()
    }
}
