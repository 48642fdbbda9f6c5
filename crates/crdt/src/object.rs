//! Object element: a last-writer-wins map from string keys to elements.
//!
//! The object stores edges only: each key maps to the `createdAt` ticket
//! of the winning child element, which lives in the root registry. A
//! concurrent set contest is decided by element creation ticket (the
//! setting operation's ticket); the loser is handed back to the caller
//! for tombstoning. Key removal tombstones the winning element but keeps
//! the edge, so visibility checks go through element liveness until the
//! element is purged.

use crate::ticket::TimeTicket;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The container half of an object element.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CrdtObject {
    /// Winning child per key
    entries: HashMap<String, TimeTicket>,
    /// Keys in first-set order, for stable iteration
    key_order: Vec<String>,
}

impl CrdtObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to the element created at `created_at`.
    ///
    /// Returns the displaced element's ticket when the write contests an
    /// existing entry: the previous winner if the new element wins, or
    /// the new element itself if it loses. The caller tombstones the
    /// displaced element.
    pub fn set(&mut self, key: &str, created_at: TimeTicket) -> Option<TimeTicket> {
        match self.entries.get_mut(key) {
            Some(current) => {
                if created_at.after(current) {
                    let loser = *current;
                    *current = created_at;
                    Some(loser)
                } else {
                    Some(created_at)
                }
            }
            None => {
                self.key_order.push(key.to_string());
                self.entries.insert(key.to_string(), created_at);
                None
            }
        }
    }

    /// The winning element for `key`, if the key was ever set.
    pub fn get(&self, key: &str) -> Option<TimeTicket> {
        self.entries.get(key).copied()
    }

    /// Reverse lookup: the key currently pointing at `created_at`.
    pub fn key_of(&self, created_at: TimeTicket) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, &t)| t == created_at)
            .map(|(k, _)| k.as_str())
    }

    /// Iterate `(key, child createdAt)` in first-set order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, TimeTicket)> {
        self.key_order
            .iter()
            .filter_map(|k| self.entries.get(k).map(|&t| (k.as_str(), t)))
    }

    /// Drop the edge pointing at a purged element.
    pub fn purge(&mut self, created_at: TimeTicket) {
        if let Some(key) = self.key_of(created_at).map(str::to_string) {
            self.entries.remove(&key);
            self.key_order.retain(|k| *k != key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorId;

    fn ticket(lamport: i64) -> TimeTicket {
        TimeTicket::new(lamport, 0, ActorId::initial())
    }

    #[test]
    fn test_first_set_has_no_loser() {
        let mut obj = CrdtObject::new();
        assert_eq!(obj.set("k", ticket(1)), None);
        assert_eq!(obj.get("k"), Some(ticket(1)));
    }

    #[test]
    fn test_newer_set_displaces_older() {
        let mut obj = CrdtObject::new();
        obj.set("k", ticket(1));
        assert_eq!(obj.set("k", ticket(5)), Some(ticket(1)));
        assert_eq!(obj.get("k"), Some(ticket(5)));
    }

    #[test]
    fn test_older_concurrent_set_loses() {
        let mut obj = CrdtObject::new();
        obj.set("k", ticket(5));
        assert_eq!(obj.set("k", ticket(3)), Some(ticket(3)));
        assert_eq!(obj.get("k"), Some(ticket(5)));
    }

    #[test]
    fn test_purge_drops_edge() {
        let mut obj = CrdtObject::new();
        obj.set("a", ticket(1));
        obj.set("b", ticket(2));
        obj.purge(ticket(1));
        assert_eq!(obj.get("a"), None);
        assert_eq!(obj.iter().count(), 1);
    }
}
