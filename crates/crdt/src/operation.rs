//! Operation types: the replicated unit of mutation.
//!
//! Every operation carries the `createdAt` of its target container
//! (`parent_created_at`) and the ticket it executes at. Executing an
//! operation against a root yields `OpInfo` records — path-addressed
//! descriptions used for change events.

use crate::actor::ActorId;
use crate::counter::{CounterValue, CrdtCounter};
use crate::element::{CrdtElement, ElementBody};
use crate::error::{CrdtError, CrdtResult};
use crate::object::CrdtObject;
use crate::primitive::PrimitiveValue;
use crate::rga_tree_split::{RgaSplitPos, RgaSplitPosRange};
use crate::root::CrdtRoot;
use crate::text::CrdtText;
use crate::ticket::TimeTicket;
use crate::tree::{CrdtTree, TreeNodeId, TreeNodeSpec, TreePos};
use crate::array::CrdtArray;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Payload of an element-creating operation. Containers start empty;
/// nested structures build up through subsequent operations. Trees are
/// the exception: their nodes are not registry elements, so the whole
/// initial shape ships in the spec.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ElementContent {
    Primitive(PrimitiveValue),
    Object,
    Array,
    Counter(CounterValue),
    Text,
    Tree(TreeNodeSpec),
}

impl ElementContent {
    fn to_element(&self, created_at: TimeTicket) -> CrdtElement {
        let body = match self {
            ElementContent::Primitive(v) => ElementBody::Primitive(v.clone()),
            ElementContent::Object => ElementBody::Object(CrdtObject::new()),
            ElementContent::Array => ElementBody::Array(CrdtArray::new()),
            ElementContent::Counter(v) => ElementBody::Counter(CrdtCounter::new(*v)),
            ElementContent::Text => ElementBody::Text(CrdtText::new()),
            ElementContent::Tree(spec) => ElementBody::Tree(CrdtTree::new(spec)),
        };
        CrdtElement::new(created_at, body)
    }
}

/// Path-addressed description of an executed operation, for events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum OpInfo {
    Set { path: String, key: String },
    Add { path: String, index: usize },
    Move { path: String, index: usize },
    Remove { path: String },
    Edit {
        path: String,
        from: usize,
        to: usize,
        content: Option<String>,
    },
    Style { path: String, from: usize, to: usize },
    Increase { path: String },
    TreeEdit { path: String, from: usize, to: usize },
    TreeStyle { path: String, from: usize, to: usize },
    TreeMove { path: String },
}

/// A replicated operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Set an object key to a freshly created element.
    Set {
        parent_created_at: TimeTicket,
        key: String,
        value: ElementContent,
        executed_at: TimeTicket,
    },
    /// Insert a freshly created element into an array after `prev`
    /// (`None` = front).
    Add {
        parent_created_at: TimeTicket,
        prev_created_at: Option<TimeTicket>,
        value: ElementContent,
        executed_at: TimeTicket,
    },
    /// Relocate an array element after `prev`.
    Move {
        parent_created_at: TimeTicket,
        prev_created_at: Option<TimeTicket>,
        created_at: TimeTicket,
        executed_at: TimeTicket,
    },
    /// Tombstone an element.
    Remove {
        parent_created_at: TimeTicket,
        created_at: TimeTicket,
        executed_at: TimeTicket,
    },
    /// Edit a text range.
    Edit {
        parent_created_at: TimeTicket,
        from: RgaSplitPos,
        to: RgaSplitPos,
        content: Option<String>,
        attributes: Option<HashMap<String, String>>,
        /// Per-actor gate: only nodes the editor had observed are
        /// deleted on remote replicas.
        max_created_at_map: HashMap<ActorId, TimeTicket>,
        executed_at: TimeTicket,
    },
    /// Style a text range.
    Style {
        parent_created_at: TimeTicket,
        from: RgaSplitPos,
        to: RgaSplitPos,
        attributes: HashMap<String, String>,
        executed_at: TimeTicket,
    },
    /// Increment a counter.
    Increase {
        parent_created_at: TimeTicket,
        value: PrimitiveValue,
        executed_at: TimeTicket,
    },
    /// Edit a tree range.
    TreeEdit {
        parent_created_at: TimeTicket,
        from: TreePos,
        to: TreePos,
        contents: Vec<TreeNodeSpec>,
        executed_at: TimeTicket,
    },
    /// Style tree element nodes in a range.
    TreeStyle {
        parent_created_at: TimeTicket,
        from: TreePos,
        to: TreePos,
        attributes: HashMap<String, String>,
        executed_at: TimeTicket,
    },
    /// Move a tree node. Cycles are rejected locally.
    TreeMove {
        parent_created_at: TimeTicket,
        target: TreeNodeId,
        new_parent: TreeNodeId,
        prev: Option<TreeNodeId>,
        executed_at: TimeTicket,
    },
}

impl Operation {
    /// The target container of this operation.
    pub fn parent_created_at(&self) -> TimeTicket {
        match self {
            Operation::Set { parent_created_at, .. }
            | Operation::Add { parent_created_at, .. }
            | Operation::Move { parent_created_at, .. }
            | Operation::Remove { parent_created_at, .. }
            | Operation::Edit { parent_created_at, .. }
            | Operation::Style { parent_created_at, .. }
            | Operation::Increase { parent_created_at, .. }
            | Operation::TreeEdit { parent_created_at, .. }
            | Operation::TreeStyle { parent_created_at, .. }
            | Operation::TreeMove { parent_created_at, .. } => *parent_created_at,
        }
    }

    /// The ticket this operation executes at.
    pub fn executed_at(&self) -> TimeTicket {
        match self {
            Operation::Set { executed_at, .. }
            | Operation::Add { executed_at, .. }
            | Operation::Move { executed_at, .. }
            | Operation::Remove { executed_at, .. }
            | Operation::Edit { executed_at, .. }
            | Operation::Style { executed_at, .. }
            | Operation::Increase { executed_at, .. }
            | Operation::TreeEdit { executed_at, .. }
            | Operation::TreeStyle { executed_at, .. }
            | Operation::TreeMove { executed_at, .. } => *executed_at,
        }
    }

    /// Execute against a root, returning event payloads.
    pub fn execute(&self, root: &mut CrdtRoot) -> CrdtResult<Vec<OpInfo>> {
        match self {
            Operation::Set {
                parent_created_at,
                key,
                value,
                executed_at,
            } => {
                let path = root.create_path(*parent_created_at)?;
                root.get(*parent_created_at)?.as_object()?;
                let element = value.to_element(*executed_at);
                root.register(*parent_created_at, element);

                let displaced = root
                    .get_mut(*parent_created_at)?
                    .as_object_mut()?
                    .set(key, *executed_at);
                if let Some(loser) = displaced {
                    // Tombstone the losing side of the LWW contest with
                    // the winner's ticket.
                    let winner = root
                        .get(*parent_created_at)?
                        .as_object()?
                        .get(key)
                        .ok_or_else(|| {
                            CrdtError::Unexpected(format!("object lost key {key} after set"))
                        })?;
                    if root.contains(loser) && root.get_mut(loser)?.remove(winner) {
                        root.register_removed(loser);
                    }
                }
                Ok(vec![OpInfo::Set {
                    path,
                    key: key.clone(),
                }])
            }

            Operation::Add {
                parent_created_at,
                prev_created_at,
                value,
                executed_at,
            } => {
                let path = root.create_path(*parent_created_at)?;
                {
                    let arr = root.get(*parent_created_at)?.as_array()?;
                    if let Some(prev) = prev_created_at {
                        if !arr.contains(*prev) {
                            return Err(CrdtError::ElementNotFound(prev.to_key_string()));
                        }
                    }
                }
                let element = value.to_element(*executed_at);
                root.register(*parent_created_at, element);
                root.get_mut(*parent_created_at)?
                    .as_array_mut()?
                    .insert_after(*prev_created_at, *executed_at)?;

                let index = root
                    .array_visible_entries(*parent_created_at)?
                    .iter()
                    .position(|&t| t == *executed_at)
                    .unwrap_or(0);
                Ok(vec![OpInfo::Add { path, index }])
            }

            Operation::Move {
                parent_created_at,
                prev_created_at,
                created_at,
                executed_at,
            } => {
                let path = root.create_path(*parent_created_at)?;
                root.get(*parent_created_at)?.as_array()?;
                if root.get_mut(*created_at)?.set_moved_at(*executed_at) {
                    root.get_mut(*parent_created_at)?
                        .as_array_mut()?
                        .move_after(*prev_created_at, *created_at)?;
                }
                let index = root
                    .array_visible_entries(*parent_created_at)?
                    .iter()
                    .position(|&t| t == *created_at)
                    .unwrap_or(0);
                Ok(vec![OpInfo::Move { path, index }])
            }

            Operation::Remove {
                parent_created_at,
                created_at,
                executed_at,
            } => {
                let path = root.create_path(*parent_created_at)?;
                let parent = root.get(*parent_created_at)?;
                if parent.as_object().is_err() && parent.as_array().is_err() {
                    return Err(CrdtError::TypeMismatch {
                        expected: "object or array",
                        found: parent.body().type_name(),
                    });
                }
                if root.get_mut(*created_at)?.remove(*executed_at) {
                    root.register_removed(*created_at);
                }
                Ok(vec![OpInfo::Remove { path }])
            }

            Operation::Edit {
                parent_created_at,
                from,
                to,
                content,
                attributes,
                max_created_at_map,
                executed_at,
            } => {
                let path = root.create_path(*parent_created_at)?;
                let text = root.get_mut(*parent_created_at)?.as_text_mut()?;
                let range = RgaSplitPosRange::new(*from, *to);
                let (_, _, changes) = text.edit(
                    &range,
                    *executed_at,
                    content.as_deref(),
                    attributes.as_ref(),
                    Some(max_created_at_map),
                )?;
                let dirty = text.removed_node_count() > 0;
                if dirty {
                    root.register_dirty(*parent_created_at);
                }
                Ok(changes
                    .into_iter()
                    .map(|c| OpInfo::Edit {
                        path: path.clone(),
                        from: c.from,
                        to: c.to,
                        content: c.content,
                    })
                    .collect())
            }

            Operation::Style {
                parent_created_at,
                from,
                to,
                attributes,
                executed_at,
            } => {
                let path = root.create_path(*parent_created_at)?;
                let text = root.get_mut(*parent_created_at)?.as_text_mut()?;
                let range = RgaSplitPosRange::new(*from, *to);
                let runs = text.style(&range, attributes, *executed_at)?;
                Ok(runs
                    .into_iter()
                    .map(|(from, to)| OpInfo::Style {
                        path: path.clone(),
                        from,
                        to,
                    })
                    .collect())
            }

            Operation::Increase {
                parent_created_at,
                value,
                executed_at: _,
            } => {
                let path = root.create_path(*parent_created_at)?;
                root.get_mut(*parent_created_at)?
                    .as_counter_mut()?
                    .increase(value)?;
                Ok(vec![OpInfo::Increase { path }])
            }

            Operation::TreeEdit {
                parent_created_at,
                from,
                to,
                contents,
                executed_at,
            } => {
                let path = root.create_path(*parent_created_at)?;
                let tree = root.get_mut(*parent_created_at)?.as_tree_mut()?;
                let changes = tree.edit(from, to, contents, *executed_at)?;
                let dirty = tree.removed_node_count() > 0;
                if dirty {
                    root.register_dirty(*parent_created_at);
                }
                Ok(changes
                    .into_iter()
                    .map(|c| OpInfo::TreeEdit {
                        path: path.clone(),
                        from: c.from,
                        to: c.to,
                    })
                    .collect())
            }

            Operation::TreeStyle {
                parent_created_at,
                from,
                to,
                attributes,
                executed_at,
            } => {
                let path = root.create_path(*parent_created_at)?;
                let tree = root.get_mut(*parent_created_at)?.as_tree_mut()?;
                let change = tree.style(from, to, attributes, *executed_at)?;
                Ok(vec![OpInfo::TreeStyle {
                    path,
                    from: change.from,
                    to: change.to,
                }])
            }

            Operation::TreeMove {
                parent_created_at,
                target,
                new_parent,
                prev,
                executed_at,
            } => {
                let path = root.create_path(*parent_created_at)?;
                let tree = root.get_mut(*parent_created_at)?.as_tree_mut()?;
                tree.move_node(*target, *new_parent, *prev, *executed_at)?;
                Ok(vec![OpInfo::TreeMove { path }])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn actor(n: u128) -> ActorId {
        ActorId::from(Uuid::from_u128(n))
    }

    fn ticket(lamport: i64) -> TimeTicket {
        TimeTicket::new(lamport, 0, actor(1))
    }

    fn set_op(key: &str, value: ElementContent, lamport: i64) -> Operation {
        Operation::Set {
            parent_created_at: TimeTicket::initial(),
            key: key.to_string(),
            value,
            executed_at: ticket(lamport),
        }
    }

    #[test]
    fn test_set_builds_nested_structure() {
        let mut root = CrdtRoot::new();
        set_op("a", ElementContent::Primitive(PrimitiveValue::Integer(1)), 1)
            .execute(&mut root)
            .unwrap();
        set_op("list", ElementContent::Array, 2)
            .execute(&mut root)
            .unwrap();
        let add = Operation::Add {
            parent_created_at: ticket(2),
            prev_created_at: None,
            value: ElementContent::Primitive(PrimitiveValue::Bool(true)),
            executed_at: ticket(3),
        };
        let infos = add.execute(&mut root).unwrap();
        assert_eq!(
            infos,
            vec![OpInfo::Add {
                path: "$.list".to_string(),
                index: 0
            }]
        );
        assert_eq!(root.to_json(), "{\"a\":1,\"list\":[true]}");
    }

    #[test]
    fn test_set_lww_out_of_order() {
        let mut root = CrdtRoot::new();
        set_op("k", ElementContent::Primitive(PrimitiveValue::from("v1")), 5)
            .execute(&mut root)
            .unwrap();
        // An older concurrent write arrives late and loses.
        set_op("k", ElementContent::Primitive(PrimitiveValue::from("v0")), 3)
            .execute(&mut root)
            .unwrap();
        assert_eq!(root.to_json(), "{\"k\":\"v1\"}");
        // The loser is tombstoned and reclaimable.
        assert_eq!(root.removed_element_count(), 1);
    }

    #[test]
    fn test_remove_and_gc() {
        let mut root = CrdtRoot::new();
        set_op("k", ElementContent::Primitive(PrimitiveValue::Integer(9)), 1)
            .execute(&mut root)
            .unwrap();
        let remove = Operation::Remove {
            parent_created_at: TimeTicket::initial(),
            created_at: ticket(1),
            executed_at: ticket(2),
        };
        let infos = remove.execute(&mut root).unwrap();
        assert_eq!(infos, vec![OpInfo::Remove { path: "$".to_string() }]);
        assert_eq!(root.to_json(), "{}");
        assert_eq!(root.garbage_collect(ticket(3)), 1);
    }

    #[test]
    fn test_unknown_target_is_structure_error() {
        let mut root = CrdtRoot::new();
        let op = Operation::Increase {
            parent_created_at: ticket(42),
            value: PrimitiveValue::Integer(1),
            executed_at: ticket(43),
        };
        assert!(matches!(
            op.execute(&mut root),
            Err(CrdtError::ElementNotFound(_))
        ));
    }

    #[test]
    fn test_type_mismatch() {
        let mut root = CrdtRoot::new();
        set_op("n", ElementContent::Primitive(PrimitiveValue::Integer(1)), 1)
            .execute(&mut root)
            .unwrap();
        let op = Operation::Increase {
            parent_created_at: ticket(1),
            value: PrimitiveValue::Integer(1),
            executed_at: ticket(2),
        };
        assert!(matches!(
            op.execute(&mut root),
            Err(CrdtError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_counter_increase() {
        let mut root = CrdtRoot::new();
        set_op("c", ElementContent::Counter(CounterValue::Int(10)), 1)
            .execute(&mut root)
            .unwrap();
        Operation::Increase {
            parent_created_at: ticket(1),
            value: PrimitiveValue::Integer(5),
            executed_at: ticket(2),
        }
        .execute(&mut root)
        .unwrap();
        assert_eq!(root.to_json(), "{\"c\":15}");
    }

    #[test]
    fn test_text_edit_via_operation() {
        let mut root = CrdtRoot::new();
        set_op("t", ElementContent::Text, 1).execute(&mut root).unwrap();

        let (from, to) = {
            let text = root.get_mut(ticket(1)).unwrap().as_text_mut().unwrap();
            let range = text.find_pos_range(0, 0).unwrap();
            (range.from, range.to)
        };
        let edit = Operation::Edit {
            parent_created_at: ticket(1),
            from,
            to,
            content: Some("hello".to_string()),
            attributes: None,
            max_created_at_map: HashMap::new(),
            executed_at: ticket(2),
        };
        let infos = edit.execute(&mut root).unwrap();
        assert_eq!(
            infos,
            vec![OpInfo::Edit {
                path: "$.t".to_string(),
                from: 0,
                to: 0,
                content: Some("hello".to_string()),
            }]
        );
        assert_eq!(root.to_json(), "{\"t\":\"hello\"}");
    }

    #[test]
    fn test_operation_serde_round_trip() {
        let ops = vec![
            set_op("k", ElementContent::Primitive(PrimitiveValue::Double(1.5)), 1),
            Operation::Add {
                parent_created_at: ticket(1),
                prev_created_at: Some(ticket(2)),
                value: ElementContent::Counter(CounterValue::Long(7)),
                executed_at: ticket(3),
            },
            Operation::Edit {
                parent_created_at: ticket(1),
                from: RgaSplitPos::new(
                    crate::rga_tree_split::RgaSplitNodeId::new(ticket(2), 0),
                    1,
                ),
                to: RgaSplitPos::new(
                    crate::rga_tree_split::RgaSplitNodeId::new(ticket(2), 0),
                    3,
                ),
                content: Some("x".to_string()),
                attributes: Some(HashMap::from([("bold".to_string(), "true".to_string())])),
                max_created_at_map: HashMap::from([(actor(1), ticket(2))]),
                executed_at: ticket(4),
            },
            Operation::TreeEdit {
                parent_created_at: ticket(1),
                from: TreePos::leftmost(TreeNodeId::of(ticket(2))),
                to: TreePos::leftmost(TreeNodeId::of(ticket(2))),
                contents: vec![TreeNodeSpec::text(ticket(5), "hi")],
                executed_at: ticket(6),
            },
            Operation::TreeMove {
                parent_created_at: ticket(1),
                target: TreeNodeId::of(ticket(2)),
                new_parent: TreeNodeId::of(ticket(3)),
                prev: None,
                executed_at: ticket(7),
            },
        ];
        for op in ops {
            let bytes = serde_json::to_vec(&op).unwrap();
            let back: Operation = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(back, op);
        }
    }
}
