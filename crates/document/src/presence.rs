//! Presence: ephemeral per-actor state shared alongside the document.
//!
//! Presence values are arbitrary JSON (`serde_json::Value`), so hosts
//! can ship cursors, selections, or profile data without the document
//! schema knowing about it. A presence update merges keys into the
//! actor's existing map; clearing drops the actor entirely.

use crdt::ActorId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single actor's presence payload.
pub type PresenceData = HashMap<String, serde_json::Value>;

/// A presence mutation carried by a change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PresenceChange {
    /// Merge these keys into the actor's presence.
    Put { data: PresenceData },
    /// Drop the actor's presence entirely.
    Clear,
}

/// The presence map of all known actors.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Presences {
    entries: HashMap<ActorId, PresenceData>,
}

impl Presences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a presence change for `actor`. Returns `true` when the map
    /// changed.
    pub fn apply(&mut self, actor: ActorId, change: &PresenceChange) -> bool {
        match change {
            PresenceChange::Put { data } => {
                let entry = self.entries.entry(actor).or_default();
                let mut changed = false;
                for (key, value) in data {
                    if entry.get(key) != Some(value) {
                        entry.insert(key.clone(), value.clone());
                        changed = true;
                    }
                }
                changed
            }
            PresenceChange::Clear => self.entries.remove(&actor).is_some(),
        }
    }

    pub fn get(&self, actor: &ActorId) -> Option<&PresenceData> {
        self.entries.get(actor)
    }

    pub fn contains(&self, actor: &ActorId) -> bool {
        self.entries.contains_key(actor)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ActorId, &PresenceData)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
