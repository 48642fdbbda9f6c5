//! Tree element: a nested node CRDT with sibling RGA ordering.
//!
//! Every node is identified by `(createdAt, offset)`. Fresh nodes always
//! carry offset 0 and a unique ticket; offsets greater than zero only
//! arise when a text leaf splits, so the two id spaces never collide.
//!
//! A position is `(parentId, leftSiblingId)`: "inside `parent`,
//! immediately right of `leftSibling`". `leftSiblingId == parentId`
//! encodes the leftmost slot. Positions pointing into a text leaf use
//! `(textCreatedAt, absoluteUnitOffset)` — "after that many UTF-16 units
//! of the original insertion" — which stays resolvable across splits.
//!
//! The visible index model counts one slot for entering an element, its
//! content, and one slot for leaving it; text leaves count their UTF-16
//! length. Tombstones count zero.

use crate::error::{CrdtError, CrdtResult};
use crate::rht::Rht;
use crate::text::{utf16_byte_index, utf16_len};
use crate::ticket::TimeTicket;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt::Write as _;

/// Node type of text leaves.
pub const TEXT_NODE_TYPE: &str = "text";

/// Identity of a tree node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TreeNodeId {
    pub created_at: TimeTicket,
    pub offset: u32,
}

impl TreeNodeId {
    pub fn new(created_at: TimeTicket, offset: u32) -> Self {
        Self { created_at, offset }
    }

    /// Id of a fresh (unsplit) node.
    pub fn of(created_at: TimeTicket) -> Self {
        Self {
            created_at,
            offset: 0,
        }
    }
}

impl std::fmt::Debug for TreeNodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.created_at, self.offset)
    }
}

/// A position inside the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreePos {
    pub parent_id: TreeNodeId,
    pub left_sibling_id: TreeNodeId,
}

impl TreePos {
    pub fn new(parent_id: TreeNodeId, left_sibling_id: TreeNodeId) -> Self {
        Self {
            parent_id,
            left_sibling_id,
        }
    }

    /// The leftmost slot inside `parent_id`.
    pub fn leftmost(parent_id: TreeNodeId) -> Self {
        Self {
            parent_id,
            left_sibling_id: parent_id,
        }
    }
}

/// Wire description of a subtree to create. Every node carries the
/// ticket that will become its identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeNodeSpec {
    pub created_at: TimeTicket,
    pub node_type: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub children: Vec<TreeNodeSpec>,
}

impl TreeNodeSpec {
    pub fn element(created_at: TimeTicket, node_type: &str) -> Self {
        Self {
            created_at,
            node_type: node_type.to_string(),
            value: String::new(),
            attributes: HashMap::new(),
            children: Vec::new(),
        }
    }

    pub fn text(created_at: TimeTicket, value: &str) -> Self {
        Self {
            created_at,
            node_type: TEXT_NODE_TYPE.to_string(),
            value: value.to_string(),
            attributes: HashMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<TreeNodeSpec>) -> Self {
        self.children = children;
        self
    }
}

/// A materialized tree node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: TreeNodeId,
    pub node_type: String,
    pub value: String,
    pub attrs: Rht,
    pub parent: Option<TreeNodeId>,
    pub children: Vec<TreeNodeId>,
    pub removed_at: Option<TimeTicket>,
    pub moved_at: Option<TimeTicket>,
}

impl TreeNode {
    pub fn is_text(&self) -> bool {
        self.node_type == TEXT_NODE_TYPE
    }

    pub fn is_removed(&self) -> bool {
        self.removed_at.is_some()
    }

    fn text_len(&self) -> usize {
        utf16_len(&self.value)
    }
}

/// Index-space description of a tree edit, in pre-edit coordinates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeChange {
    pub from: usize,
    pub to: usize,
}

/// The tree CRDT.
#[derive(Clone, Debug)]
pub struct CrdtTree {
    nodes: BTreeMap<TreeNodeId, TreeNode>,
    root: TreeNodeId,
}

impl CrdtTree {
    /// Materialize a tree from its root spec.
    pub fn new(spec: &TreeNodeSpec) -> Self {
        let root = TreeNodeId::of(spec.created_at);
        let mut tree = Self {
            nodes: BTreeMap::new(),
            root,
        };
        tree.materialize(spec, None);
        tree
    }

    fn materialize(&mut self, spec: &TreeNodeSpec, parent: Option<TreeNodeId>) -> TreeNodeId {
        let id = TreeNodeId::of(spec.created_at);
        let mut attrs = Rht::new();
        let mut keys: Vec<&String> = spec.attributes.keys().collect();
        keys.sort_unstable();
        for key in keys {
            attrs.set(key, &spec.attributes[key], spec.created_at);
        }
        self.nodes.insert(
            id,
            TreeNode {
                id,
                node_type: spec.node_type.clone(),
                value: spec.value.clone(),
                attrs,
                parent,
                children: Vec::new(),
                removed_at: None,
                moved_at: None,
            },
        );
        for child in &spec.children {
            let child_id = self.materialize(child, Some(id));
            if let Some(node) = self.nodes.get_mut(&id) {
                node.children.push(child_id);
            }
        }
        id
    }

    pub fn root_id(&self) -> TreeNodeId {
        self.root
    }

    fn node(&self, id: TreeNodeId) -> CrdtResult<&TreeNode> {
        self.nodes
            .get(&id)
            .ok_or_else(|| CrdtError::NodeNotFound(format!("{id:?}")))
    }

    /// Visible size of the root's content.
    pub fn size(&self) -> usize {
        self.node(self.root)
            .map(|root| root.children.iter().map(|&c| self.node_size(c)).sum())
            .unwrap_or(0)
    }

    /// Visible size of a node: UTF-16 length for text, content plus the
    /// two tag slots for elements, zero for tombstones.
    fn node_size(&self, id: TreeNodeId) -> usize {
        let Ok(node) = self.node(id) else { return 0 };
        if node.is_removed() {
            return 0;
        }
        if node.is_text() {
            node.text_len()
        } else {
            2 + node
                .children
                .iter()
                .map(|&c| self.node_size(c))
                .sum::<usize>()
        }
    }

    /// Map a visible index to a position.
    pub fn find_pos(&self, index: usize) -> CrdtResult<TreePos> {
        let size = self.size();
        if index > size {
            return Err(CrdtError::OutOfRange { index, len: size });
        }
        self.find_pos_in(self.root, index)
    }

    fn find_pos_in(&self, parent: TreeNodeId, mut index: usize) -> CrdtResult<TreePos> {
        let children = self.node(parent)?.children.clone();
        let mut left: Option<TreeNodeId> = None;
        for child_id in children {
            let child = self.node(child_id)?;
            if child.is_removed() {
                continue;
            }
            if index == 0 {
                return Ok(match left {
                    Some(l) => TreePos::new(parent, l),
                    None => TreePos::leftmost(parent),
                });
            }
            let size = self.node_size(child_id);
            if child.is_text() {
                if index < size {
                    return Ok(TreePos::new(
                        parent,
                        TreeNodeId::new(child_id.created_at, child_id.offset + index as u32),
                    ));
                }
                index -= size;
                // "after the whole leaf" is its absolute end offset
                left = Some(TreeNodeId::new(
                    child_id.created_at,
                    child_id.offset + size as u32,
                ));
            } else {
                if index < size {
                    return self.find_pos_in(child_id, index - 1);
                }
                index -= size;
                left = Some(child_id);
            }
        }
        if index == 0 {
            return Ok(match left {
                Some(l) => TreePos::new(parent, l),
                None => TreePos::leftmost(parent),
            });
        }
        Err(CrdtError::OutOfRange {
            index,
            len: self.size(),
        })
    }

    /// Resolve a position to `(parent, leftSibling)`, splitting a text
    /// leaf when the position falls strictly inside one, and applying
    /// the closest-live rule: a tombstoned left sibling falls back to
    /// its nearest live left neighbor, a tombstoned parent climbs to its
    /// parent with the removed child's left neighbor as the new edge.
    pub fn find_nodes_and_split_text(
        &mut self,
        pos: &TreePos,
        _executed_at: TimeTicket,
    ) -> CrdtResult<(TreeNodeId, Option<TreeNodeId>)> {
        if !self.nodes.contains_key(&pos.parent_id) {
            return Err(CrdtError::NodeNotFound(format!("{:?}", pos.parent_id)));
        }
        let mut parent = pos.parent_id;
        let mut left = if pos.left_sibling_id == pos.parent_id {
            None
        } else {
            self.resolve_left(pos.left_sibling_id)?
        };

        while self.node(parent)?.is_removed() {
            let removed = parent;
            parent = self
                .node(removed)?
                .parent
                .ok_or_else(|| CrdtError::Unexpected("root node is removed".to_string()))?;
            left = self.prev_sibling(parent, removed);
        }
        while let Some(l) = left {
            if !self.node(l)?.is_removed() {
                break;
            }
            left = self.prev_sibling(parent, l);
        }
        Ok((parent, left))
    }

    /// Resolve a left-sibling reference to a concrete node, splitting
    /// text when needed. Returns `None` when the reference points before
    /// a leaf's first unit.
    ///
    /// Text references carry absolute unit offsets: `(c, k)` is the
    /// boundary after `k` units of the original insertion `c`, which
    /// belongs to the node *ending* there even when later siblings sit
    /// between its split halves. Hence the floor lookup probes `k - 1`.
    fn resolve_left(&mut self, abs: TreeNodeId) -> CrdtResult<Option<TreeNodeId>> {
        if let Some(node) = self.nodes.get(&abs) {
            if !node.is_text() {
                return Ok(Some(abs));
            }
            if abs.offset == 0 {
                // The boundary before the leaf's first unit.
                let parent = node.parent;
                return Ok(match parent {
                    Some(p) => self.prev_sibling(p, abs),
                    None => None,
                });
            }
        }
        let probe = TreeNodeId::new(abs.created_at, abs.offset.saturating_sub(1));
        let (&floor_id, floor) = self
            .nodes
            .range(..=probe)
            .next_back()
            .filter(|(id, _)| id.created_at == abs.created_at)
            .ok_or_else(|| CrdtError::NodeNotFound(format!("{abs:?}")))?;
        if !floor.is_text() {
            return Err(CrdtError::NodeNotFound(format!("{abs:?}")));
        }
        let rel = (abs.offset - floor_id.offset) as usize;
        if rel == 0 || rel > floor.text_len() {
            return Err(CrdtError::NodeNotFound(format!("{abs:?}")));
        }
        if rel == floor.text_len() {
            return Ok(Some(floor_id));
        }
        self.split_text(floor_id, rel)?;
        Ok(Some(floor_id))
    }

    /// Split the text leaf `id` at unit offset `rel` (strictly inside).
    /// The left half keeps the id; the right half starts at the absolute
    /// offset and inherits the tombstone state.
    fn split_text(&mut self, id: TreeNodeId, rel: usize) -> CrdtResult<TreeNodeId> {
        let (tail, right_id, parent, removed_at) = {
            let node = self
                .nodes
                .get_mut(&id)
                .ok_or_else(|| CrdtError::NodeNotFound(format!("{id:?}")))?;
            let byte_idx = utf16_byte_index(&node.value, rel)?;
            let tail = node.value.split_off(byte_idx);
            (
                tail,
                TreeNodeId::new(id.created_at, id.offset + rel as u32),
                node.parent,
                node.removed_at,
            )
        };
        self.nodes.insert(
            right_id,
            TreeNode {
                id: right_id,
                node_type: TEXT_NODE_TYPE.to_string(),
                value: tail,
                attrs: Rht::new(),
                parent,
                children: Vec::new(),
                removed_at,
                moved_at: None,
            },
        );
        if let Some(p) = parent {
            if let Some(parent_node) = self.nodes.get_mut(&p) {
                if let Some(idx) = parent_node.children.iter().position(|&c| c == id) {
                    parent_node.children.insert(idx + 1, right_id);
                }
            }
        }
        Ok(right_id)
    }

    fn prev_sibling(&self, parent: TreeNodeId, of: TreeNodeId) -> Option<TreeNodeId> {
        let children = &self.nodes.get(&parent)?.children;
        let idx = children.iter().position(|&c| c == of)?;
        idx.checked_sub(1).map(|i| children[i])
    }

    /// Visible index of the slot right of `left` inside `parent`.
    pub fn to_index(&self, parent: TreeNodeId, left: Option<TreeNodeId>) -> CrdtResult<usize> {
        let mut idx = self.content_start(parent)?;
        if let Some(l) = left {
            for &child in &self.node(parent)?.children {
                idx += self.node_size(child);
                if child == l {
                    return Ok(idx);
                }
            }
            return Err(CrdtError::Unexpected(format!(
                "left sibling {l:?} not under {parent:?}"
            )));
        }
        Ok(idx)
    }

    /// Global index of the first content slot of `of`.
    fn content_start(&self, of: TreeNodeId) -> CrdtResult<usize> {
        if of == self.root {
            return Ok(0);
        }
        let parent = self
            .node(of)?
            .parent
            .ok_or_else(|| CrdtError::Unexpected(format!("detached node {of:?}")))?;
        let mut idx = self.content_start(parent)?;
        for &child in &self.node(parent)?.children {
            if child == of {
                return Ok(idx + 1);
            }
            idx += self.node_size(child);
        }
        Err(CrdtError::Unexpected(format!(
            "node {of:?} missing from its parent"
        )))
    }

    /// Tombstone `range` and insert `contents` at its start.
    ///
    /// A range ending inside a different element than it starts in
    /// merges the two: the end-side elements are tombstoned and their
    /// surviving children re-parented to the start-side parent.
    pub fn edit(
        &mut self,
        from: &TreePos,
        to: &TreePos,
        contents: &[TreeNodeSpec],
        executed_at: TimeTicket,
    ) -> CrdtResult<Vec<TreeChange>> {
        let (to_parent, to_left) = self.find_nodes_and_split_text(to, executed_at)?;
        let (from_parent, from_left) = self.find_nodes_and_split_text(from, executed_at)?;

        let from_idx = self.to_index(from_parent, from_left)?;
        let to_idx = self.to_index(to_parent, to_left)?;

        // Climb the start side up to the common ancestor, tombstoning
        // everything right of the spine at each level.
        let mut node = from_parent;
        let mut boundary = from_left;
        while node != to_parent && !self.is_ancestor_of(node, to_parent)? {
            let trailing = self.children_after(node, boundary)?;
            for child in trailing {
                self.remove_subtree(child, executed_at)?;
            }
            boundary = Some(node);
            node = self
                .node(node)?
                .parent
                .ok_or_else(|| CrdtError::Unexpected("edit range escapes the root".to_string()))?;
        }
        let ancestor = node;

        if to_parent == ancestor {
            // Flat range: tombstone the siblings in (boundary, to_left].
            let span = self.children_between(ancestor, boundary, to_left)?;
            for child in span {
                self.remove_subtree(child, executed_at)?;
            }
        } else {
            // The end side sits deeper: merge its spine into the start
            // side. `path` runs from the ancestor's child down to
            // `to_parent`.
            let mut path = vec![to_parent];
            let mut cur = to_parent;
            loop {
                let p = self.node(cur)?.parent.ok_or_else(|| {
                    CrdtError::Unexpected("edit range escapes the root".to_string())
                })?;
                if p == ancestor {
                    break;
                }
                path.push(p);
                cur = p;
            }
            path.reverse();
            let top = path[0];

            let between = self.children_between_exclusive(ancestor, boundary, top)?;
            for child in between {
                self.remove_subtree(child, executed_at)?;
            }

            // Tombstone inside each spine element, collecting survivors
            // bottom-up so adoption preserves document order.
            let mut adopted: Vec<TreeNodeId> = Vec::new();
            for (i, &spine) in path.iter().enumerate() {
                let next = path.get(i + 1).copied();
                let (covered, survivors) = match next {
                    Some(next) => {
                        let covered = self.children_between_exclusive(spine, None, next)?;
                        let survivors = self.children_after(spine, Some(next))?;
                        (covered, survivors)
                    }
                    None => {
                        let covered = self.children_between(spine, None, to_left)?;
                        let survivors = self.children_after(spine, to_left)?;
                        (covered, survivors)
                    }
                };
                for child in covered {
                    self.remove_subtree(child, executed_at)?;
                }
                adopted.splice(0..0, survivors);
            }
            for &spine in &path {
                self.remove_node(spine, executed_at)?;
            }

            // Detach survivors from their spine parents and adopt them
            // into the start-side parent.
            for &child in &adopted {
                let old_parent = self.node(child)?.parent;
                if let Some(op) = old_parent {
                    if let Some(parent_node) = self.nodes.get_mut(&op) {
                        parent_node.children.retain(|&c| c != child);
                    }
                }
            }
            let insert_at = {
                let parent_node = self.node(from_parent)?;
                match parent_node.children.iter().position(|&c| c == top) {
                    Some(idx) => idx + 1,
                    None => parent_node.children.len(),
                }
            };
            if let Some(parent_node) = self.nodes.get_mut(&from_parent) {
                for (offset, &child) in adopted.iter().enumerate() {
                    parent_node.children.insert(insert_at + offset, child);
                }
            }
            for &child in &adopted {
                if let Some(child_node) = self.nodes.get_mut(&child) {
                    child_node.parent = Some(from_parent);
                }
            }
        }

        // Insert the new content at the start side.
        let mut left = from_left;
        for spec in contents {
            let id = self.materialize(spec, Some(from_parent));
            self.place_child(from_parent, left, id)?;
            left = Some(id);
        }

        Ok(vec![TreeChange {
            from: from_idx,
            to: to_idx,
        }])
    }

    /// Link `child` into `parent` after `left` under the RGA tie-break:
    /// siblings created after the child stay nearer the origin.
    fn place_child(
        &mut self,
        parent: TreeNodeId,
        left: Option<TreeNodeId>,
        child: TreeNodeId,
    ) -> CrdtResult<()> {
        let created_at = child.created_at;
        let parent_node = self
            .nodes
            .get(&parent)
            .ok_or_else(|| CrdtError::NodeNotFound(format!("{parent:?}")))?;
        let mut idx = match left {
            None => 0,
            Some(l) => {
                parent_node
                    .children
                    .iter()
                    .position(|&c| c == l)
                    .ok_or_else(|| CrdtError::NodeNotFound(format!("{l:?}")))?
                    + 1
            }
        };
        while idx < parent_node.children.len()
            && parent_node.children[idx].created_at.after(&created_at)
        {
            idx += 1;
        }
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.insert(idx, child);
        }
        Ok(())
    }

    /// Set attributes on the live element nodes in a flat range.
    pub fn style(
        &mut self,
        from: &TreePos,
        to: &TreePos,
        attributes: &HashMap<String, String>,
        executed_at: TimeTicket,
    ) -> CrdtResult<TreeChange> {
        let (to_parent, to_left) = self.find_nodes_and_split_text(to, executed_at)?;
        let (from_parent, from_left) = self.find_nodes_and_split_text(from, executed_at)?;
        if from_parent != to_parent {
            return Err(CrdtError::InvalidOperation(
                "style range must stay inside one element".to_string(),
            ));
        }
        let from_idx = self.to_index(from_parent, from_left)?;
        let to_idx = self.to_index(to_parent, to_left)?;

        let mut keys: Vec<&String> = attributes.keys().collect();
        keys.sort_unstable();
        let span = self.children_between(from_parent, from_left, to_left)?;
        for child in span {
            let Some(node) = self.nodes.get_mut(&child) else {
                continue;
            };
            if node.is_removed() || node.is_text() {
                continue;
            }
            for key in &keys {
                node.attrs.set(key, &attributes[*key], executed_at);
            }
        }
        Ok(TreeChange {
            from: from_idx,
            to: to_idx,
        })
    }

    /// Move `target` under `new_parent` after `left`. Rejects moves that
    /// would create a cycle; an older concurrent move loses the LWW
    /// contest on `movedAt` and is ignored.
    pub fn move_node(
        &mut self,
        target: TreeNodeId,
        new_parent: TreeNodeId,
        left: Option<TreeNodeId>,
        executed_at: TimeTicket,
    ) -> CrdtResult<()> {
        if target == self.root {
            return Err(CrdtError::InvalidOperation(
                "the root cannot be moved".to_string(),
            ));
        }
        self.node(new_parent)?;
        if new_parent == target || self.is_ancestor_of(target, new_parent)? {
            return Err(CrdtError::InvalidOperation(format!(
                "moving {target:?} under {new_parent:?} would create a cycle"
            )));
        }
        if let Some(moved_at) = self.node(target)?.moved_at {
            if !executed_at.after(&moved_at) {
                return Ok(());
            }
        }
        let old_parent = self.node(target)?.parent;
        if let Some(op) = old_parent {
            if let Some(parent_node) = self.nodes.get_mut(&op) {
                parent_node.children.retain(|&c| c != target);
            }
        }
        self.place_child(new_parent, left, target)?;
        if let Some(node) = self.nodes.get_mut(&target) {
            node.parent = Some(new_parent);
            node.moved_at = Some(executed_at);
        }
        Ok(())
    }

    fn is_ancestor_of(&self, ancestor: TreeNodeId, mut of: TreeNodeId) -> CrdtResult<bool> {
        while let Some(p) = self.node(of)?.parent {
            if p == ancestor {
                return Ok(true);
            }
            of = p;
        }
        Ok(false)
    }

    /// Children of `parent` strictly after `after` (all when `None`).
    fn children_after(
        &self,
        parent: TreeNodeId,
        after: Option<TreeNodeId>,
    ) -> CrdtResult<Vec<TreeNodeId>> {
        let children = &self.node(parent)?.children;
        let start = match after {
            None => 0,
            Some(a) => match children.iter().position(|&c| c == a) {
                Some(idx) => idx + 1,
                None => return Ok(Vec::new()),
            },
        };
        Ok(children[start..].to_vec())
    }

    /// Children of `parent` in `(after, upto]`.
    fn children_between(
        &self,
        parent: TreeNodeId,
        after: Option<TreeNodeId>,
        upto: Option<TreeNodeId>,
    ) -> CrdtResult<Vec<TreeNodeId>> {
        let mut out = Vec::new();
        for child in self.children_after(parent, after)? {
            out.push(child);
            if Some(child) == upto {
                return Ok(out);
            }
        }
        match upto {
            None => Ok(Vec::new()),
            Some(_) => Ok(out),
        }
    }

    /// Children of `parent` in `(after, before)`.
    fn children_between_exclusive(
        &self,
        parent: TreeNodeId,
        after: Option<TreeNodeId>,
        before: TreeNodeId,
    ) -> CrdtResult<Vec<TreeNodeId>> {
        let mut out = Vec::new();
        for child in self.children_after(parent, after)? {
            if child == before {
                return Ok(out);
            }
            out.push(child);
        }
        Ok(out)
    }

    /// Tombstone a node and its whole subtree.
    fn remove_subtree(&mut self, id: TreeNodeId, executed_at: TimeTicket) -> CrdtResult<()> {
        let children = self.node(id)?.children.clone();
        self.remove_node(id, executed_at)?;
        for child in children {
            self.remove_subtree(child, executed_at)?;
        }
        Ok(())
    }

    /// Tombstone a single node; removal tickets only ever advance.
    fn remove_node(&mut self, id: TreeNodeId, executed_at: TimeTicket) -> CrdtResult<()> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| CrdtError::NodeNotFound(format!("{id:?}")))?;
        if node.removed_at.map_or(true, |r| executed_at.after(&r)) {
            node.removed_at = Some(executed_at);
        }
        Ok(())
    }

    /// Purge tombstones removed before `ticket`. A node only goes when
    /// its entire subtree qualifies, keeping parent links intact for
    /// tombstones that must stay addressable.
    pub fn purge_removed_nodes_before(&mut self, ticket: &TimeTicket) -> usize {
        let candidates: Vec<TreeNodeId> = self
            .nodes
            .values()
            .filter(|n| matches!(n.removed_at, Some(r) if r < *ticket))
            .map(|n| n.id)
            .collect();
        let mut purged = 0;
        for id in candidates {
            if !self.nodes.contains_key(&id) {
                continue;
            }
            if !self.subtree_purgeable(id, ticket) {
                continue;
            }
            // Handled when the topmost qualifying ancestor is purged.
            if let Ok(Some(p)) = self.node(id).map(|n| n.parent) {
                if self.nodes.contains_key(&p) && self.subtree_purgeable(p, ticket) {
                    continue;
                }
            }
            if let Ok(Some(p)) = self.node(id).map(|n| n.parent) {
                if let Some(parent_node) = self.nodes.get_mut(&p) {
                    parent_node.children.retain(|&c| c != id);
                }
            }
            purged += self.drop_subtree(id);
        }
        purged
    }

    fn subtree_purgeable(&self, id: TreeNodeId, ticket: &TimeTicket) -> bool {
        let Ok(node) = self.node(id) else { return false };
        if !matches!(node.removed_at, Some(r) if r < *ticket) {
            return false;
        }
        node.children
            .iter()
            .all(|&c| self.subtree_purgeable(c, ticket))
    }

    fn drop_subtree(&mut self, id: TreeNodeId) -> usize {
        let Some(node) = self.nodes.remove(&id) else {
            return 0;
        };
        let mut count = 1;
        for child in node.children {
            count += self.drop_subtree(child);
        }
        count
    }

    /// Count of tombstoned nodes currently retained.
    pub fn removed_node_count(&self) -> usize {
        self.nodes.values().filter(|n| n.is_removed()).count()
    }

    /// Render the visible tree as XML.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(self.root, &mut out);
        out
    }

    fn write_xml(&self, id: TreeNodeId, out: &mut String) {
        let Ok(node) = self.node(id) else { return };
        if node.is_removed() {
            return;
        }
        if node.is_text() {
            out.push_str(&node.value);
            return;
        }
        if node.attrs.is_empty() {
            let _ = write!(out, "<{}>", node.node_type);
        } else {
            let _ = write!(out, "<{} {}>", node.node_type, node.attrs.to_xml());
        }
        for &child in &node.children {
            self.write_xml(child, out);
        }
        let _ = write!(out, "</{}>", node.node_type);
    }

    /// Canonical JSON form: the XML rendering as a JSON string.
    pub fn to_json(&self) -> String {
        serde_json::Value::from(self.to_xml()).to_string()
    }
}

// Snapshots carry the node list; ids embed the structure so rebuilding
// is a straight re-insert.
#[derive(Serialize, Deserialize)]
struct TreeRepr {
    root: TreeNodeId,
    nodes: Vec<TreeNode>,
}

impl Serialize for CrdtTree {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("CrdtTree", 2)?;
        state.serialize_field("root", &self.root)?;
        state.serialize_field("nodes", &self.nodes.values().collect::<Vec<_>>())?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for CrdtTree {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = TreeRepr::deserialize(deserializer)?;
        let mut nodes = BTreeMap::new();
        for node in repr.nodes {
            nodes.insert(node.id, node);
        }
        Ok(Self {
            nodes,
            root: repr.root,
        })
    }
}
