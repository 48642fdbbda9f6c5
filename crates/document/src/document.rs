//! The replicated document: root, clock, local buffer, presence, and
//! the update / change-pack surface.

use crate::change::Change;
use crate::change_pack::{ChangePack, Checkpoint};
use crate::context::ChangeContext;
use crate::error::{DocumentError, DocumentResult};
use crate::event::{ChangeInfo, DocEvent};
use crate::presence::{PresenceChange, Presences};
use crate::proxy::{ObjectProxy, PresenceDraft, PresenceProxy};
use crdt::{ActorId, ChangeId, CrdtRoot, TimeTicket};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Lifecycle status of a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentStatus {
    /// Not connected to a sync peer.
    Detached,
    /// Attached to a sync peer and exchanging change packs.
    Attached,
    /// Removed; no further edits are accepted.
    Removed,
}

impl DocumentStatus {
    fn name(&self) -> &'static str {
        match self {
            DocumentStatus::Detached => "detached",
            DocumentStatus::Attached => "attached",
            DocumentStatus::Removed => "removed",
        }
    }
}

/// Full document state as carried inside a snapshot.
#[derive(Serialize, Deserialize)]
struct SnapshotPayload {
    root: CrdtRoot,
    presences: Presences,
}

/// A single replicated document.
pub struct Document {
    key: String,
    status: DocumentStatus,
    root: CrdtRoot,
    change_id: ChangeId,
    checkpoint: Checkpoint,
    /// Local changes not yet acknowledged by the sync peer
    local_changes: Vec<Change>,
    /// Highest applied client sequence per actor, for idempotent packs
    applied_seqs: HashMap<ActorId, u32>,
    presences: Presences,
    subscribers: Vec<Box<dyn Fn(&DocEvent)>>,
}

impl Document {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            status: DocumentStatus::Detached,
            root: CrdtRoot::new(),
            change_id: ChangeId::initial(),
            checkpoint: Checkpoint::default(),
            local_changes: Vec::new(),
            applied_seqs: HashMap::new(),
            presences: Presences::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn status(&self) -> DocumentStatus {
        self.status
    }

    pub fn actor(&self) -> ActorId {
        self.change_id.actor
    }

    /// Bind the editing actor. Must happen before attaching.
    pub fn activate(&mut self, actor: ActorId) -> DocumentResult<()> {
        if self.status != DocumentStatus::Detached {
            return Err(DocumentError::InvalidStatus {
                expected: "detached",
                actual: self.status.name(),
            });
        }
        self.change_id = self.change_id.with_actor(actor);
        Ok(())
    }

    /// Unbind the editing actor.
    pub fn deactivate(&mut self) -> DocumentResult<()> {
        if self.status != DocumentStatus::Detached {
            return Err(DocumentError::InvalidStatus {
                expected: "detached",
                actual: self.status.name(),
            });
        }
        self.change_id = self.change_id.with_actor(ActorId::initial());
        Ok(())
    }

    /// Mark the document attached to a sync peer.
    pub fn attach(&mut self) -> DocumentResult<()> {
        if self.status != DocumentStatus::Detached {
            return Err(DocumentError::InvalidStatus {
                expected: "detached",
                actual: self.status.name(),
            });
        }
        self.status = DocumentStatus::Attached;
        Ok(())
    }

    /// Detach from the sync peer. Unacknowledged local changes stay
    /// buffered and are re-sent on the next attach.
    pub fn detach(&mut self) -> DocumentResult<()> {
        if self.status != DocumentStatus::Attached {
            return Err(DocumentError::InvalidStatus {
                expected: "attached",
                actual: self.status.name(),
            });
        }
        self.status = DocumentStatus::Detached;
        Ok(())
    }

    /// Subscribe to document events. Handlers run synchronously in the
    /// mutating call.
    pub fn subscribe(&mut self, handler: impl Fn(&DocEvent) + 'static) {
        self.subscribers.push(Box::new(handler));
    }

    fn publish(&self, event: &DocEvent) {
        for handler in &self.subscribers {
            handler(event);
        }
    }

    /// Run `closure` against proxies over the document, committing the
    /// produced change atomically. A closure error discards everything.
    pub fn update<F>(&mut self, closure: F) -> DocumentResult<()>
    where
        F: FnOnce(&mut ObjectProxy<'_>, &mut PresenceProxy<'_>) -> DocumentResult<()>,
    {
        self.update_with_message(None, closure)
    }

    /// [`update`](Document::update) with a human-readable change message.
    pub fn update_with_message<F>(&mut self, message: Option<&str>, closure: F) -> DocumentResult<()>
    where
        F: FnOnce(&mut ObjectProxy<'_>, &mut PresenceProxy<'_>) -> DocumentResult<()>,
    {
        if self.status == DocumentStatus::Removed {
            return Err(DocumentError::InvalidStatus {
                expected: "detached or attached",
                actual: self.status.name(),
            });
        }

        let mut ctx = ChangeContext::new(
            self.change_id.next(),
            self.root.clone(),
            message.map(str::to_string),
        );
        let mut draft = PresenceDraft::default();
        {
            let mut root_proxy = ObjectProxy::new(&mut ctx, self.root.root_created_at());
            let mut presence_proxy = PresenceProxy::new(&mut draft);
            closure(&mut root_proxy, &mut presence_proxy)?;
        }

        if !ctx.has_operations() && draft.change.is_none() {
            return Ok(());
        }

        let (change, new_root, op_infos) = ctx.finish(draft.change);
        let actor = change.id.actor;
        self.root = new_root;
        self.change_id = change.id;
        self.applied_seqs.insert(actor, change.id.client_seq);

        let presence_event = change.presence_change.as_ref().map(|presence_change| {
            self.presences.apply(actor, presence_change);
            DocEvent::PresenceChanged {
                actor,
                presence: self.presences.get(&actor).cloned(),
            }
        });
        let message = change.message.clone();
        self.local_changes.push(change);

        self.publish(&DocEvent::LocalChange(ChangeInfo {
            actor,
            message,
            operations: op_infos,
        }));
        if let Some(event) = presence_event {
            self.publish(&event);
        }
        Ok(())
    }

    /// Apply a change pack from the sync peer.
    ///
    /// Remote changes apply in pack order; a failing change is logged
    /// and aborts the pack so later state never builds on a skipped
    /// mutation. Applying the same pack twice is a no-op.
    pub fn apply_change_pack(&mut self, pack: &ChangePack) -> DocumentResult<()> {
        if let Some(snapshot) = &pack.snapshot {
            let payload: SnapshotPayload = serde_json::from_slice(snapshot)
                .map_err(|e| DocumentError::SnapshotDecode(e.to_string()))?;
            self.root = payload.root;
            self.presences = payload.presences;
            self.applied_seqs.clear();
            self.publish(&DocEvent::Snapshot);
        } else {
            for change in &pack.changes {
                let actor = change.id.actor;
                let already_seen = self
                    .applied_seqs
                    .get(&actor)
                    .map_or(false, |&seen| change.id.client_seq <= seen);
                if already_seen {
                    continue;
                }

                self.change_id = self.change_id.sync_lamport(change.id.lamport);
                let op_infos = match change.execute(&mut self.root) {
                    Ok(infos) => infos,
                    Err(e) => {
                        warn!(
                            doc_key = %self.key,
                            actor = %actor,
                            client_seq = change.id.client_seq,
                            error = %e,
                            "skipping corrupt change; aborting pack application"
                        );
                        return Err(e.into());
                    }
                };
                self.applied_seqs.insert(actor, change.id.client_seq);

                let presence_event = change.presence_change.as_ref().map(|presence_change| {
                    self.presences.apply(actor, presence_change);
                    DocEvent::PresenceChanged {
                        actor,
                        presence: self.presences.get(&actor).cloned(),
                    }
                });

                self.publish(&DocEvent::RemoteChange(ChangeInfo {
                    actor,
                    message: change.message.clone(),
                    operations: op_infos,
                }));
                if let Some(event) = presence_event {
                    self.publish(&event);
                }
            }
        }

        self.checkpoint = self.checkpoint.forward(&pack.checkpoint);
        self.local_changes
            .retain(|c| c.id.client_seq > pack.checkpoint.client_seq);

        if let Some(min_synced) = pack.min_synced_ticket {
            let purged = self.root.garbage_collect(min_synced);
            if purged > 0 {
                debug!(doc_key = %self.key, purged, "garbage collected tombstones");
            }
        }
        Ok(())
    }

    /// Build the outbound pack carrying buffered local changes.
    pub fn create_change_pack(&self) -> ChangePack {
        ChangePack::new(
            &self.key,
            self.checkpoint,
            self.local_changes.clone(),
            None,
            None,
        )
    }

    /// Serialize the full state for embedding in a snapshot pack.
    pub fn create_snapshot(&self) -> DocumentResult<Vec<u8>> {
        serde_json::to_vec(&SnapshotPayload {
            root: self.root.clone(),
            presences: self.presences.clone(),
        })
        .map_err(|e| DocumentError::SnapshotDecode(e.to_string()))
    }

    /// Read-only view of the root.
    pub fn root(&self) -> &CrdtRoot {
        &self.root
    }

    /// Canonical JSON of the document.
    pub fn to_json(&self) -> String {
        self.root.to_json()
    }

    pub fn checkpoint(&self) -> Checkpoint {
        self.checkpoint
    }

    pub fn change_id(&self) -> ChangeId {
        self.change_id
    }

    pub fn pending_change_count(&self) -> usize {
        self.local_changes.len()
    }

    pub fn presences(&self) -> &Presences {
        &self.presences
    }

    /// Run garbage collection directly (hosts without a sync peer).
    pub fn garbage_collect(&mut self, min_synced: TimeTicket) -> usize {
        self.root.garbage_collect(min_synced)
    }

    /// Apply a presence-only change from the watch stream.
    pub fn apply_presence_change(&mut self, actor: ActorId, change: &PresenceChange) {
        if self.presences.apply(actor, change) || matches!(change, PresenceChange::Clear) {
            self.publish(&DocEvent::PresenceChanged {
                actor,
                presence: self.presences.get(&actor).cloned(),
            });
        }
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("key", &self.key)
            .field("status", &self.status)
            .field("change_id", &self.change_id)
            .field("checkpoint", &self.checkpoint)
            .field("pending_changes", &self.local_changes.len())
            .finish()
    }
}
