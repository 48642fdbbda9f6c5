//! The document root: registry and owner of every element.
//!
//! Containers reference their children by `createdAt`; the registry maps
//! each ticket to the owned element plus its parent edge, so operations
//! target any element in O(1) and paths are recovered by walking parent
//! edges. Tombstoned elements move to the removed set but stay in the
//! registry until garbage collection confirms every replica observed
//! their removal.

use crate::element::{CrdtElement, ElementBody};
use crate::error::{CrdtError, CrdtResult};
use crate::object::CrdtObject;
use crate::ticket::TimeTicket;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

/// A registry slot: the element and its parent container.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub parent: Option<TimeTicket>,
    pub element: CrdtElement,
}

/// The element registry rooted at a top-level object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrdtRoot {
    root_created_at: TimeTicket,
    #[serde(with = "registry_serde")]
    elements: HashMap<TimeTicket, RegistryEntry>,
    removed: HashSet<TimeTicket>,
    /// Containers carrying internal tombstones, eligible for nested GC
    dirty: HashSet<TimeTicket>,
}

impl Default for CrdtRoot {
    fn default() -> Self {
        Self::new()
    }
}

impl CrdtRoot {
    /// A fresh root holding an empty top-level object.
    pub fn new() -> Self {
        let root_created_at = TimeTicket::initial();
        let mut elements = HashMap::new();
        elements.insert(
            root_created_at,
            RegistryEntry {
                parent: None,
                element: CrdtElement::new(root_created_at, ElementBody::Object(CrdtObject::new())),
            },
        );
        Self {
            root_created_at,
            elements,
            removed: HashSet::new(),
            dirty: HashSet::new(),
        }
    }

    pub fn root_created_at(&self) -> TimeTicket {
        self.root_created_at
    }

    pub fn get(&self, created_at: TimeTicket) -> CrdtResult<&CrdtElement> {
        self.elements
            .get(&created_at)
            .map(|e| &e.element)
            .ok_or_else(|| CrdtError::ElementNotFound(created_at.to_key_string()))
    }

    pub fn get_mut(&mut self, created_at: TimeTicket) -> CrdtResult<&mut CrdtElement> {
        self.elements
            .get_mut(&created_at)
            .map(|e| &mut e.element)
            .ok_or_else(|| CrdtError::ElementNotFound(created_at.to_key_string()))
    }

    pub fn contains(&self, created_at: TimeTicket) -> bool {
        self.elements.contains_key(&created_at)
    }

    /// Register a freshly created element under `parent`.
    pub fn register(&mut self, parent: TimeTicket, element: CrdtElement) {
        self.elements.insert(
            element.created_at(),
            RegistryEntry {
                parent: Some(parent),
                element,
            },
        );
    }

    /// Record that `created_at` was tombstoned.
    pub fn register_removed(&mut self, created_at: TimeTicket) {
        self.removed.insert(created_at);
    }

    /// Record that a container now holds internal tombstones.
    pub fn register_dirty(&mut self, created_at: TimeTicket) {
        self.dirty.insert(created_at);
    }

    pub fn parent_of(&self, created_at: TimeTicket) -> Option<TimeTicket> {
        self.elements.get(&created_at).and_then(|e| e.parent)
    }

    /// Number of registered elements, tombstones included.
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn removed_element_count(&self) -> usize {
        self.removed.len()
    }

    /// Render the `$.a.b[2]` path of an element for event payloads.
    pub fn create_path(&self, created_at: TimeTicket) -> CrdtResult<String> {
        if created_at == self.root_created_at {
            return Ok("$".to_string());
        }
        let parent = self
            .parent_of(created_at)
            .ok_or_else(|| CrdtError::ElementNotFound(created_at.to_key_string()))?;
        let prefix = self.create_path(parent)?;
        let parent_el = self.get(parent)?;
        match parent_el.body() {
            ElementBody::Object(obj) => {
                let key = obj.key_of(created_at).ok_or_else(|| {
                    CrdtError::Unexpected(format!(
                        "element {} missing from its parent object",
                        created_at
                    ))
                })?;
                Ok(format!("{prefix}.{key}"))
            }
            ElementBody::Array(arr) => {
                let mut index = 0;
                for entry in arr.iter() {
                    if entry == created_at {
                        return Ok(format!("{prefix}[{index}]"));
                    }
                    if self.get(entry).map(|e| !e.is_removed()).unwrap_or(false) {
                        index += 1;
                    }
                }
                Err(CrdtError::Unexpected(format!(
                    "element {} missing from its parent array",
                    created_at
                )))
            }
            _ => Err(CrdtError::Unexpected(format!(
                "element {} parented by a non-container",
                created_at
            ))),
        }
    }

    /// Live entries of an array in document order.
    pub fn array_visible_entries(&self, array: TimeTicket) -> CrdtResult<Vec<TimeTicket>> {
        let arr = self.get(array)?.as_array()?;
        Ok(arr
            .iter()
            .filter(|&t| self.get(t).map(|e| !e.is_removed()).unwrap_or(false))
            .collect())
    }

    /// The live winner for an object key.
    pub fn object_get(&self, object: TimeTicket, key: &str) -> CrdtResult<Option<TimeTicket>> {
        let obj = self.get(object)?.as_object()?;
        Ok(obj
            .get(key)
            .filter(|&t| self.get(t).map(|e| !e.is_removed()).unwrap_or(false)))
    }

    /// Purge elements removed before `min_synced` and the internal
    /// tombstones of dirty containers. Returns the purge count.
    pub fn garbage_collect(&mut self, min_synced: TimeTicket) -> usize {
        let mut count = 0;

        let candidates: Vec<TimeTicket> = self
            .removed
            .iter()
            .copied()
            .filter(|t| {
                self.elements
                    .get(t)
                    .and_then(|e| e.element.removed_at())
                    .map_or(false, |r| r < min_synced)
            })
            .collect();
        for created_at in candidates {
            if !self.elements.contains_key(&created_at) {
                continue;
            }
            if let Some(parent) = self.parent_of(created_at) {
                if let Some(entry) = self.elements.get_mut(&parent) {
                    if let Ok(obj) = entry.element.as_object_mut() {
                        obj.purge(created_at);
                    } else if let Ok(arr) = entry.element.as_array_mut() {
                        arr.purge(created_at);
                    }
                }
            }
            count += self.deep_purge(created_at);
        }

        let dirty: Vec<TimeTicket> = self.dirty.iter().copied().collect();
        for created_at in dirty {
            let Some(entry) = self.elements.get_mut(&created_at) else {
                self.dirty.remove(&created_at);
                continue;
            };
            let purged = if let Ok(text) = entry.element.as_text_mut() {
                text.purge_removed_nodes_before(&min_synced)
            } else if let Ok(tree) = entry.element.as_tree_mut() {
                tree.purge_removed_nodes_before(&min_synced)
            } else {
                0
            };
            count += purged;
            if !self
                .elements
                .get(&created_at)
                .map(|e| e.element.has_internal_tombstones())
                .unwrap_or(false)
            {
                self.dirty.remove(&created_at);
            }
        }
        count
    }

    /// Drop an element and its entire descendant subtree from the
    /// registry and the removed set.
    fn deep_purge(&mut self, created_at: TimeTicket) -> usize {
        let Some(entry) = self.elements.remove(&created_at) else {
            return 0;
        };
        self.removed.remove(&created_at);
        self.dirty.remove(&created_at);
        let mut count = 1;
        let children: Vec<TimeTicket> = match entry.element.body() {
            ElementBody::Object(obj) => obj.iter().map(|(_, t)| t).collect(),
            ElementBody::Array(arr) => arr.iter().collect(),
            _ => Vec::new(),
        };
        for child in children {
            count += self.deep_purge(child);
        }
        count
    }

    /// Canonical JSON of the whole document: object keys sorted, only
    /// live elements rendered.
    pub fn to_json(&self) -> String {
        self.element_to_json(self.root_created_at)
            .unwrap_or_else(|_| "null".to_string())
    }

    fn element_to_json(&self, created_at: TimeTicket) -> CrdtResult<String> {
        let element = self.get(created_at)?;
        Ok(match element.body() {
            ElementBody::Primitive(p) => p.to_json(),
            ElementBody::Counter(c) => c.to_json(),
            ElementBody::Text(t) => t.to_json(),
            ElementBody::Tree(t) => t.to_json(),
            ElementBody::Object(obj) => {
                let mut pairs: Vec<(&str, TimeTicket)> = obj
                    .iter()
                    .filter(|&(_, t)| self.get(t).map(|e| !e.is_removed()).unwrap_or(false))
                    .collect();
                pairs.sort_unstable_by(|a, b| a.0.cmp(b.0));
                let mut out = String::from("{");
                for (i, (key, child)) in pairs.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    let _ = write!(
                        out,
                        "{}:{}",
                        serde_json::Value::from(*key),
                        self.element_to_json(*child)?
                    );
                }
                out.push('}');
                out
            }
            ElementBody::Array(_) => {
                let entries = self.array_visible_entries(created_at)?;
                let mut out = String::from("[");
                for (i, child) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&self.element_to_json(*child)?);
                }
                out.push(']');
                out
            }
        })
    }
}

mod registry_serde {
    use super::RegistryEntry;
    use crate::ticket::TimeTicket;
    use serde::de::Deserializer;
    use serde::ser::Serializer;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;

    pub fn serialize<S: Serializer>(
        map: &HashMap<TimeTicket, RegistryEntry>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        // Ticket keys are not JSON object keys; ship entries as a list
        // ordered by ticket for deterministic output.
        let mut entries: Vec<&RegistryEntry> = map.values().collect();
        entries.sort_unstable_by_key(|e| e.element.created_at());
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<TimeTicket, RegistryEntry>, D::Error> {
        let entries = Vec::<RegistryEntry>::deserialize(deserializer)?;
        Ok(entries
            .into_iter()
            .map(|e| (e.element.created_at(), e))
            .collect())
    }
}
