//! The per-replica logical clock.
//!
//! A `ChangeId` identifies one change from one replica: a per-actor
//! sequence number plus a Lamport value. It is also the ticket factory
//! for the operations inside the change; successive tickets share the
//! change's Lamport value and are distinguished by a delimiter.

use crate::actor::ActorId;
use crate::ticket::TimeTicket;
use serde::{Deserialize, Serialize};

/// Identifier of a single change, and the replica's logical clock.
///
/// # Properties
///
/// - `client_seq` increases by one per local change; the server
///   acknowledges changes by this number.
/// - `lamport` advances on every local change and adopts the maximum on
///   receipt of a remote change, so causally later changes always carry
///   larger values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeId {
    /// Per-actor sequence number of this change
    pub client_seq: u32,
    /// Lamport timestamp of this change
    pub lamport: i64,
    /// The replica this change belongs to
    pub actor: ActorId,
    /// Ticket counter for the currently open change
    #[serde(default)]
    delimiter: u32,
}

impl ChangeId {
    /// Create a change ID with explicit values.
    pub fn new(client_seq: u32, lamport: i64, actor: ActorId) -> Self {
        Self {
            client_seq,
            lamport,
            actor,
            delimiter: 0,
        }
    }

    /// The initial clock of a freshly created document.
    pub fn initial() -> Self {
        Self::new(0, 0, ActorId::initial())
    }

    /// The ID of the next local change: sequence and Lamport both
    /// advance, and the ticket counter restarts.
    pub fn next(&self) -> Self {
        Self {
            client_seq: self.client_seq + 1,
            lamport: self.lamport + 1,
            actor: self.actor,
            delimiter: 0,
        }
    }

    /// Adopt a remote Lamport value: the clock becomes the maximum of
    /// both sides. A subsequent local change then bumps past it.
    pub fn sync_lamport(&self, other_lamport: i64) -> Self {
        Self {
            client_seq: self.client_seq,
            lamport: self.lamport.max(other_lamport),
            actor: self.actor,
            delimiter: self.delimiter,
        }
    }

    /// Issue the next ticket of the open change. The first issued ticket
    /// carries delimiter 1.
    pub fn issue_time_ticket(&mut self) -> TimeTicket {
        self.delimiter += 1;
        TimeTicket::new(self.lamport, self.delimiter, self.actor)
    }

    /// Rebind this clock to a different actor (document activation).
    pub fn with_actor(&self, actor: ActorId) -> Self {
        Self {
            client_seq: self.client_seq,
            lamport: self.lamport,
            actor,
            delimiter: self.delimiter,
        }
    }
}
