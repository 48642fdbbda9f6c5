//! Replicated hashtable: a last-writer-wins map keyed by string.
//!
//! Used for style attributes on text runs and tree element nodes. Each
//! entry remembers the ticket of the write that produced it; a set only
//! lands if its ticket is newer than the stored one, so replaying the
//! same writes in any order converges.

use crate::error::{CrdtError, CrdtResult};
use crate::ticket::TimeTicket;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;

/// A single entry: the winning value and the ticket that wrote it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RhtNode {
    /// The stored value
    pub value: String,
    /// Ticket of the write that set this value
    pub updated_at: TimeTicket,
}

/// Last-writer-wins map from string keys to string values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rht {
    /// Entries by key
    entries: HashMap<String, RhtNode>,
    /// Keys in order of first write, for stable JSON rendering
    key_order: Vec<String>,
}

impl Rht {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value` if `executed_at` is newer than the stored
    /// write. Returns `true` when the write landed.
    pub fn set(&mut self, key: &str, value: &str, executed_at: TimeTicket) -> bool {
        match self.entries.get_mut(key) {
            Some(node) => {
                if executed_at.after(&node.updated_at) {
                    node.value = value.to_string();
                    node.updated_at = executed_at;
                    true
                } else {
                    false
                }
            }
            None => {
                self.key_order.push(key.to_string());
                self.entries.insert(
                    key.to_string(),
                    RhtNode {
                        value: value.to_string(),
                        updated_at: executed_at,
                    },
                );
                true
            }
        }
    }

    /// Get the value for `key`.
    pub fn get(&self, key: &str) -> CrdtResult<&str> {
        self.entries
            .get(key)
            .map(|node| node.value.as_str())
            .ok_or_else(|| CrdtError::KeyNotFound(key.to_string()))
    }

    /// Check whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in first-write key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RhtNode)> {
        self.key_order
            .iter()
            .filter_map(|k| self.entries.get(k).map(|n| (k.as_str(), n)))
    }

    /// Reconstruct an independent copy by replaying every write. The LWW
    /// rule makes the replay order irrelevant.
    pub fn deepcopy(&self) -> Self {
        let mut copy = Self::new();
        for (key, node) in self.iter() {
            copy.set(key, &node.value, node.updated_at);
        }
        copy
    }

    /// Render as XML attributes, keys sorted lexicographically:
    /// `k1="v1" k2="v2"`.
    pub fn to_xml(&self) -> String {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        let mut out = String::new();
        for (i, key) in keys.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let _ = write!(out, "{}=\"{}\"", key, self.entries[*key].value);
        }
        out
    }

    /// Render as a JSON object, keys in first-write order.
    pub fn to_json(&self) -> String {
        let mut out = String::from("{");
        for (i, (key, node)) in self.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let _ = write!(
                out,
                "{}:{}",
                serde_json::Value::from(key),
                serde_json::Value::from(node.value.as_str())
            );
        }
        out.push('}');
        out
    }
}
