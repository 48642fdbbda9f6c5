//! Document events delivered to subscribers.

use crate::presence::PresenceData;
use crdt::{ActorId, OpInfo};

/// Summary of one applied change.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeInfo {
    pub actor: ActorId,
    pub message: Option<String>,
    pub operations: Vec<OpInfo>,
}

/// Events a document emits as it mutates.
#[derive(Clone, Debug, PartialEq)]
pub enum DocEvent {
    /// The root was replaced wholesale by a snapshot.
    Snapshot,
    /// A local `update` committed.
    LocalChange(ChangeInfo),
    /// A remote change from a change pack was applied.
    RemoteChange(ChangeInfo),
    /// An actor's presence changed (or the actor left).
    PresenceChanged {
        actor: ActorId,
        presence: Option<PresenceData>,
    },
}
