//! Split-node RGA: the sequence CRDT behind rich text.
//!
//! The sequence is a doubly-linked list of value nodes. A node is
//! identified by `(createdAt, offset)` where `offset` is the position of
//! the node's first unit within its original insertion; splitting a node
//! keeps `createdAt` and raises `offset`, so positions recorded before a
//! split stay resolvable. Deleted nodes become tombstones: they stay
//! linked (and addressable) until garbage collection confirms every
//! replica has seen the deletion.
//!
//! Three auxiliary structures keep lookups cheap:
//! - `by_id`: ordered id index for floor lookups when resolving
//!   positions that point into since-split nodes,
//! - a weighted splay tree mapping visible integer offsets to nodes in
//!   O(log n) amortized (tombstones weigh zero),
//! - an insertion chain (`ins_prev`/`ins_next`) recording the original
//!   insertion neighbor, maintained across splits and purges.
//!
//! Concurrent inserts at the same left origin are ordered by ticket:
//! the insert with the larger ticket lands closer to the origin, which
//! every replica resolves identically.

use crate::actor::ActorId;
use crate::error::{CrdtError, CrdtResult};
use crate::splay::{SplayHandle, SplayTree};
use crate::ticket::TimeTicket;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// A splittable sequence value: knows its visible length and how to cut
/// itself at a unit offset.
pub trait SplitValue: Clone + Default {
    /// Visible length in index units.
    fn unit_len(&self) -> usize;

    /// Split off and return the tail starting at `offset`, leaving the
    /// head in place. `offset` is strictly inside the value.
    fn split_off(&mut self, offset: usize) -> CrdtResult<Self>;
}

/// Identity of a sequence node: the creating ticket plus the unit
/// offset within the original insertion.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RgaSplitNodeId {
    pub created_at: TimeTicket,
    pub offset: u32,
}

impl RgaSplitNodeId {
    pub fn new(created_at: TimeTicket, offset: u32) -> Self {
        Self { created_at, offset }
    }

    /// Id of the head sentinel shared by all replicas.
    pub fn head() -> Self {
        Self {
            created_at: TimeTicket::initial(),
            offset: 0,
        }
    }
}

impl fmt::Debug for RgaSplitNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.created_at, self.offset)
    }
}

/// A logical position: `relative_offset` units into the original span
/// that starts at `id`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RgaSplitPos {
    pub id: RgaSplitNodeId,
    pub relative_offset: u32,
}

impl RgaSplitPos {
    pub fn new(id: RgaSplitNodeId, relative_offset: u32) -> Self {
        Self {
            id,
            relative_offset,
        }
    }

    /// The absolute id this position resolves through: same creation
    /// ticket, offsets added.
    fn absolute_id(&self) -> RgaSplitNodeId {
        RgaSplitNodeId {
            created_at: self.id.created_at,
            offset: self.id.offset + self.relative_offset,
        }
    }
}

/// An ordered pair of positions selecting a range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RgaSplitPosRange {
    pub from: RgaSplitPos,
    pub to: RgaSplitPos,
}

impl RgaSplitPosRange {
    pub fn new(from: RgaSplitPos, to: RgaSplitPos) -> Self {
        Self { from, to }
    }

    /// A collapsed range at a single position.
    pub fn collapsed(at: RgaSplitPos) -> Self {
        Self { from: at, to: at }
    }
}

/// A visible-index-space description of what an edit did, emitted in
/// pre-edit coordinates for observers.
#[derive(Clone, Debug, PartialEq)]
pub struct ContentChange<V> {
    pub actor: ActorId,
    pub from: usize,
    pub to: usize,
    pub content: Option<V>,
}

#[derive(Clone, Debug)]
struct SplitNode<V> {
    id: RgaSplitNodeId,
    value: V,
    removed_at: Option<TimeTicket>,
    prev: Option<usize>,
    next: Option<usize>,
    ins_prev: Option<usize>,
    ins_next: Option<usize>,
    splay: SplayHandle,
}

impl<V: SplitValue> SplitNode<V> {
    fn content_len(&self) -> usize {
        self.value.unit_len()
    }

    fn is_removed(&self) -> bool {
        self.removed_at.is_some()
    }

    fn visible_len(&self) -> usize {
        if self.is_removed() {
            0
        } else {
            self.content_len()
        }
    }
}

/// The split-node sequence CRDT.
#[derive(Clone, Debug)]
pub struct RgaTreeSplit<V> {
    /// Node slab; freed slots are recycled and never followed
    nodes: Vec<SplitNode<V>>,
    free: Vec<usize>,
    head: usize,
    /// Ordered id index for position floor lookups
    by_id: BTreeMap<RgaSplitNodeId, usize>,
    /// Visible-offset index; payload is the slab index
    index: SplayTree<usize>,
}

impl<V: SplitValue> Default for RgaTreeSplit<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: SplitValue> RgaTreeSplit<V> {
    pub fn new() -> Self {
        let mut index = SplayTree::new();
        let splay = index.insert_root(0, 0);
        let head_node = SplitNode {
            id: RgaSplitNodeId::head(),
            value: V::default(),
            removed_at: None,
            prev: None,
            next: None,
            ins_prev: None,
            ins_next: None,
            splay,
        };
        let mut by_id = BTreeMap::new();
        by_id.insert(head_node.id, 0);
        Self {
            nodes: vec![head_node],
            free: Vec::new(),
            head: 0,
            by_id,
            index,
        }
    }

    /// Total visible length.
    pub fn visible_len(&self) -> usize {
        self.index.total_weight()
    }

    /// Position of the start of the sequence.
    pub fn head_pos(&self) -> RgaSplitPos {
        RgaSplitPos::new(RgaSplitNodeId::head(), 0)
    }

    /// Map a visible index to a logical position.
    pub fn find_node_pos(&mut self, index: usize) -> CrdtResult<RgaSplitPos> {
        let len = self.visible_len();
        let (handle, offset) = self
            .index
            .find(index)
            .ok_or(CrdtError::OutOfRange { index, len })?;
        let slab = *self.index.value(handle);
        let node = &self.nodes[slab];
        Ok(RgaSplitPos::new(node.id, offset as u32))
    }

    /// Map a visible index pair to a position range.
    pub fn find_pos_range(&mut self, from: usize, to: usize) -> CrdtResult<RgaSplitPosRange> {
        Ok(RgaSplitPosRange::new(
            self.find_node_pos(from)?,
            self.find_node_pos(to)?,
        ))
    }

    /// Map a position range back to visible indexes.
    pub fn find_indexes_from_range(
        &mut self,
        range: &RgaSplitPosRange,
    ) -> CrdtResult<(usize, usize)> {
        Ok((
            self.pos_to_index(&range.from)?,
            self.pos_to_index(&range.to)?,
        ))
    }

    fn pos_to_index(&mut self, pos: &RgaSplitPos) -> CrdtResult<usize> {
        let abs = pos.absolute_id();
        let (slab, rel) = self.find_pos_node(abs)?;
        let splay = self.nodes[slab].splay;
        let removed = self.nodes[slab].is_removed();
        let base = self.index.index_of(splay);
        Ok(if removed { base } else { base + rel })
    }

    /// Resolve an absolute position id to `(node, offset_within_node)`.
    ///
    /// A boundary offset belongs to the node that *ends* there, not the
    /// one that starts there: "after k units" must resolve through the
    /// left split half even when later inserts sit between the halves.
    /// Hence the floor lookup probes `k - 1` for positive offsets.
    fn find_pos_node(&self, abs: RgaSplitNodeId) -> CrdtResult<(usize, usize)> {
        let probe = if abs.offset == 0 {
            abs
        } else {
            RgaSplitNodeId::new(abs.created_at, abs.offset - 1)
        };
        let (found_id, &slab) = self
            .by_id
            .range(..=probe)
            .next_back()
            .filter(|(id, _)| id.created_at == abs.created_at)
            .ok_or_else(|| CrdtError::NodeNotFound(format!("{abs:?}")))?;
        let rel = (abs.offset - found_id.offset) as usize;
        if rel > self.nodes[slab].content_len() {
            return Err(CrdtError::NodeNotFound(format!("{abs:?}")));
        }
        Ok((slab, rel))
    }

    /// Resolve `pos` to the node left of the cut, splitting the
    /// containing node when the position falls strictly inside it.
    ///
    /// Applies the RGA tie-break before returning: nodes to the right of
    /// the cut created after `executed_at` keep their place nearer the
    /// origin, so the returned left node is the true insertion anchor.
    fn find_node_with_split(
        &mut self,
        pos: &RgaSplitPos,
        executed_at: &TimeTicket,
    ) -> CrdtResult<(usize, Option<usize>)> {
        let abs = pos.absolute_id();
        let (slab, rel) = self.find_pos_node(abs)?;

        let mut left = if rel == self.nodes[slab].content_len() {
            slab
        } else if rel == 0 {
            self.nodes[slab].prev.ok_or_else(|| {
                CrdtError::Unexpected("non-head node without predecessor".to_string())
            })?
        } else {
            self.split_node(slab, rel)?;
            slab
        };

        while let Some(next) = self.nodes[left].next {
            if self.nodes[next].id.created_at.after(executed_at) {
                left = next;
            } else {
                break;
            }
        }
        Ok((left, self.nodes[left].next))
    }

    /// Split `slab` at unit offset `rel` (strictly inside). The right
    /// half inherits the tombstone state and joins the insertion chain
    /// after the left half. Returns the right half's slab index.
    fn split_node(&mut self, slab: usize, rel: usize) -> CrdtResult<usize> {
        let right_value = self.nodes[slab].value.split_off(rel)?;
        let right_id = RgaSplitNodeId::new(
            self.nodes[slab].id.created_at,
            self.nodes[slab].id.offset + rel as u32,
        );
        let removed_at = self.nodes[slab].removed_at;

        let left_splay = self.nodes[slab].splay;
        let right_len = if removed_at.is_some() {
            0
        } else {
            right_value.unit_len()
        };
        let idx = self.next_slot();
        let right_splay = self.index.insert_after(left_splay, idx, right_len);
        if removed_at.is_none() {
            let left_len = self.nodes[slab].content_len();
            self.index.update_length(left_splay, left_len);
        }

        let next = self.nodes[slab].next;
        let ins_next = self.nodes[slab].ins_next;
        let slot = self.alloc(SplitNode {
            id: right_id,
            value: right_value,
            removed_at,
            prev: Some(slab),
            next,
            ins_prev: Some(slab),
            ins_next,
            splay: right_splay,
        });
        debug_assert_eq!(slot, idx);
        self.nodes[slab].next = Some(idx);
        self.nodes[slab].ins_next = Some(idx);
        if let Some(n) = next {
            self.nodes[n].prev = Some(idx);
        }
        if let Some(n) = ins_next {
            self.nodes[n].ins_prev = Some(idx);
        }
        self.by_id.insert(right_id, idx);
        Ok(idx)
    }

    /// Splice a fresh node with `id` and `value` right after `target`.
    /// The insertion chain records split lineage only, so fresh nodes
    /// start unchained.
    fn insert_after_node(&mut self, target: usize, id: RgaSplitNodeId, value: V) -> usize {
        let idx = self.next_slot();
        let splay = self
            .index
            .insert_after(self.nodes[target].splay, idx, value.unit_len());
        let next = self.nodes[target].next;
        let slot = self.alloc(SplitNode {
            id,
            value,
            removed_at: None,
            prev: Some(target),
            next,
            ins_prev: None,
            ins_next: None,
            splay,
        });
        debug_assert_eq!(slot, idx);
        self.nodes[target].next = Some(idx);
        if let Some(n) = next {
            self.nodes[n].prev = Some(idx);
        }
        self.by_id.insert(id, idx);
        idx
    }

    /// Apply an edit: delete the gated content inside `range`, then
    /// insert `value` (if any) at the range start.
    ///
    /// `latest_by_actor` is the concurrency gate: a node is only deleted
    /// when its creation ticket is at most the gate entry of its actor.
    /// An absent map means a local edit, which deletes everything in
    /// range. Returns the caret position, the per-actor maximum created
    /// tickets this edit touched (for propagation to peers), and the
    /// content changes in pre-edit visible index space.
    pub fn edit(
        &mut self,
        range: &RgaSplitPosRange,
        executed_at: TimeTicket,
        value: Option<V>,
        latest_by_actor: Option<&HashMap<ActorId, TimeTicket>>,
    ) -> CrdtResult<(
        RgaSplitPos,
        HashMap<ActorId, TimeTicket>,
        Vec<ContentChange<V>>,
    )> {
        let (to_left, to_right) = self.find_node_with_split(&range.to, &executed_at)?;
        let (from_left, from_right) = self.find_node_with_split(&range.from, &executed_at)?;

        let mut candidates = Vec::new();
        let mut cur = from_right;
        while cur != to_right {
            let i = cur.ok_or_else(|| {
                CrdtError::Unexpected("edit range boundaries out of order".to_string())
            })?;
            candidates.push(i);
            cur = self.nodes[i].next;
        }

        // Pre-edit index of the insertion point, captured before any
        // weight changes.
        let from_left_splay = self.nodes[from_left].splay;
        let from_left_visible = self.nodes[from_left].visible_len();
        let insert_index = self.index.index_of(from_left_splay) + from_left_visible;

        let mut touched: HashMap<ActorId, TimeTicket> = HashMap::new();
        let mut changes: Vec<ContentChange<V>> = Vec::new();
        let mut removals: Vec<usize> = Vec::new();
        let mut run: Option<(usize, usize)> = None;

        for &i in &candidates {
            let created_at = self.nodes[i].id.created_at;
            let gate = match latest_by_actor {
                None => TimeTicket::max(),
                Some(map) => map
                    .get(&created_at.actor)
                    .copied()
                    .unwrap_or_else(TimeTicket::initial),
            };
            let deletable = created_at <= gate
                && self.nodes[i]
                    .removed_at
                    .map_or(true, |r| executed_at.after(&r));

            if deletable {
                touched
                    .entry(created_at.actor)
                    .and_modify(|t| {
                        if created_at.after(t) {
                            *t = created_at;
                        }
                    })
                    .or_insert(created_at);
                if !self.nodes[i].is_removed() {
                    let len = self.nodes[i].content_len();
                    let splay = self.nodes[i].splay;
                    match &mut run {
                        Some((_, width)) => *width += len,
                        None => {
                            let start = self.index.index_of(splay);
                            run = Some((start, len));
                        }
                    }
                }
                removals.push(i);
            } else if !self.nodes[i].is_removed() {
                // A surviving live node breaks deletion contiguity.
                if let Some((start, width)) = run.take() {
                    changes.push(ContentChange {
                        actor: executed_at.actor,
                        from: start,
                        to: start + width,
                        content: None,
                    });
                }
            }
        }
        if let Some((start, width)) = run.take() {
            changes.push(ContentChange {
                actor: executed_at.actor,
                from: start,
                to: start + width,
                content: None,
            });
        }

        for &i in &removals {
            self.nodes[i].removed_at = Some(executed_at);
            let splay = self.nodes[i].splay;
            self.index.update_length(splay, 0);
        }

        let caret = match to_right {
            Some(r) => RgaSplitPos::new(self.nodes[r].id, 0),
            None => RgaSplitPos::new(
                self.nodes[to_left].id,
                self.nodes[to_left].content_len() as u32,
            ),
        };

        if let Some(v) = value {
            if v.unit_len() > 0 {
                let id = RgaSplitNodeId::new(executed_at, 0);
                self.insert_after_node(from_left, id, v.clone());
                changes.push(ContentChange {
                    actor: executed_at.actor,
                    from: insert_index,
                    to: insert_index,
                    content: Some(v),
                });
            }
        }

        Ok((caret, touched, changes))
    }

    /// Split the range boundaries and apply `f` to every live node in
    /// range. Returns the contiguous visible `(from, to)` runs touched.
    pub fn update_range(
        &mut self,
        range: &RgaSplitPosRange,
        executed_at: TimeTicket,
        mut f: impl FnMut(&mut V),
    ) -> CrdtResult<Vec<(usize, usize)>> {
        let (_, to_right) = self.find_node_with_split(&range.to, &executed_at)?;
        let (_, from_right) = self.find_node_with_split(&range.from, &executed_at)?;

        let mut runs: Vec<(usize, usize)> = Vec::new();
        let mut cur = from_right;
        while cur != to_right {
            let i = cur.ok_or_else(|| {
                CrdtError::Unexpected("range boundaries out of order".to_string())
            })?;
            cur = self.nodes[i].next;
            if self.nodes[i].is_removed() {
                continue;
            }
            let len = self.nodes[i].content_len();
            let splay = self.nodes[i].splay;
            let start = self.index.index_of(splay);
            f(&mut self.nodes[i].value);
            match runs.last_mut() {
                Some((_, end)) if *end == start => *end = start + len,
                _ => runs.push((start, start + len)),
            }
        }
        Ok(runs)
    }

    /// Purge tombstones removed before `ticket`, unlinking them from the
    /// list, the insertion chain, the id index, and the offset index.
    /// Returns the number of purged nodes.
    pub fn purge_removed_nodes_before(&mut self, ticket: &TimeTicket) -> usize {
        let mut count = 0;
        let mut cur = self.nodes[self.head].next;
        while let Some(i) = cur {
            cur = self.nodes[i].next;
            if matches!(self.nodes[i].removed_at, Some(r) if r < *ticket) {
                self.purge(i);
                count += 1;
            }
        }
        count
    }

    fn purge(&mut self, i: usize) {
        let prev = self.nodes[i].prev;
        let next = self.nodes[i].next;
        if let Some(p) = prev {
            self.nodes[p].next = next;
        }
        if let Some(n) = next {
            self.nodes[n].prev = prev;
        }
        let ins_prev = self.nodes[i].ins_prev;
        let ins_next = self.nodes[i].ins_next;
        if let Some(p) = ins_prev {
            self.nodes[p].ins_next = ins_next;
        }
        if let Some(n) = ins_next {
            self.nodes[n].ins_prev = ins_prev;
        }
        self.index.remove(self.nodes[i].splay);
        self.by_id.remove(&self.nodes[i].id);
        self.free.push(i);
    }

    /// Count of tombstoned nodes currently retained.
    pub fn removed_node_count(&self) -> usize {
        self.iter_all().filter(|(_, _, removed)| *removed).count()
    }

    /// Iterate `(id, value, removed)` over every node in sequence order,
    /// head excluded.
    pub fn iter_all(&self) -> impl Iterator<Item = (RgaSplitNodeId, &V, bool)> {
        let mut cur = self.nodes[self.head].next;
        std::iter::from_fn(move || {
            let i = cur?;
            let node = &self.nodes[i];
            cur = node.next;
            Some((node.id, &node.value, node.is_removed()))
        })
    }

    /// Iterate live values in sequence order.
    pub fn iter_values(&self) -> impl Iterator<Item = &V> {
        self.iter_all()
            .filter_map(|(_, v, removed)| (!removed).then_some(v))
    }

    /// The slab slot the next [`alloc`] call will use; lets callers
    /// register the slot in the offset index before allocating.
    ///
    /// [`alloc`]: RgaTreeSplit::alloc
    fn next_slot(&self) -> usize {
        self.free.last().copied().unwrap_or(self.nodes.len())
    }

    fn alloc(&mut self, node: SplitNode<V>) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }
}

// Snapshots carry the sequence as a plain node list in sequence order;
// rebuilding re-links the list, the id index, and the offset index.
#[derive(Serialize, Deserialize)]
struct SplitNodeRepr<V> {
    id: RgaSplitNodeId,
    value: V,
    removed_at: Option<TimeTicket>,
}

impl<V: SplitValue + Serialize> Serialize for RgaTreeSplit<V> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut reprs: Vec<SplitNodeRepr<&V>> = Vec::new();
        let mut cur = self.nodes[self.head].next;
        while let Some(i) = cur {
            let node = &self.nodes[i];
            reprs.push(SplitNodeRepr {
                id: node.id,
                value: &node.value,
                removed_at: node.removed_at,
            });
            cur = node.next;
        }
        reprs.serialize(serializer)
    }
}

impl<'de, V: SplitValue + Deserialize<'de>> Deserialize<'de> for RgaTreeSplit<V> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let reprs = Vec::<SplitNodeRepr<V>>::deserialize(deserializer)?;
        let mut split = RgaTreeSplit::new();
        let mut last = split.head;
        for repr in reprs {
            let idx = split.insert_after_node(last, repr.id, repr.value);
            if let Some(removed_at) = repr.removed_at {
                split.nodes[idx].removed_at = Some(removed_at);
                let splay = split.nodes[idx].splay;
                split.index.update_length(splay, 0);
            }
            last = idx;
        }
        Ok(split)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Plain string runs; one byte per index unit (tests use ASCII).
    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Run(String);

    impl SplitValue for Run {
        fn unit_len(&self) -> usize {
            self.0.len()
        }

        fn split_off(&mut self, offset: usize) -> CrdtResult<Self> {
            Ok(Run(self.0.split_off(offset)))
        }
    }

    fn actor(n: u128) -> ActorId {
        ActorId::from(Uuid::from_u128(n))
    }

    fn ticket(lamport: i64, actor_n: u128) -> TimeTicket {
        TimeTicket::new(lamport, 0, actor(actor_n))
    }

    fn contents(split: &RgaTreeSplit<Run>) -> String {
        split.iter_values().map(|r| r.0.as_str()).collect()
    }

    fn live_runs(split: &RgaTreeSplit<Run>) -> Vec<String> {
        split
            .iter_all()
            .filter_map(|(_, v, removed)| (!removed).then(|| v.0.clone()))
            .collect()
    }

    fn edit_at(
        split: &mut RgaTreeSplit<Run>,
        from: usize,
        to: usize,
        content: &str,
        at: TimeTicket,
    ) {
        let range = split.find_pos_range(from, to).unwrap();
        let value = (!content.is_empty()).then(|| Run(content.to_string()));
        split.edit(&range, at, value, None).unwrap();
    }

    #[test]
    fn test_insert_then_split() {
        let mut split = RgaTreeSplit::new();
        edit_at(&mut split, 0, 0, "helloworld", ticket(1, 1));
        edit_at(&mut split, 5, 5, "~", ticket(2, 1));

        assert_eq!(contents(&split), "hello~world");
        assert_eq!(live_runs(&split), vec!["hello", "~", "world"]);
        assert_eq!(split.visible_len(), 11);
    }

    #[test]
    fn test_concurrent_insert_tie_break() {
        // Both replicas insert at position 0 of an empty sequence at
        // lamport 1; the larger actor sorts closer to the origin.
        let mut a = RgaTreeSplit::new();
        let mut b = RgaTreeSplit::new();
        let ticket_a = ticket(1, 1);
        let ticket_b = ticket(1, 2);

        let range_a = a.find_pos_range(0, 0).unwrap();
        a.edit(&range_a, ticket_a, Some(Run("A".into())), None)
            .unwrap();
        let range_b = b.find_pos_range(0, 0).unwrap();
        b.edit(&range_b, ticket_b, Some(Run("B".into())), None)
            .unwrap();

        // Exchange: each applies the other's insert at the head position.
        let head = RgaSplitPosRange::collapsed(RgaSplitPos::new(RgaSplitNodeId::head(), 0));
        a.edit(&head, ticket_b, Some(Run("B".into())), Some(&HashMap::new()))
            .unwrap();
        b.edit(&head, ticket_a, Some(Run("A".into())), Some(&HashMap::new()))
            .unwrap();

        assert_eq!(contents(&a), "BA");
        assert_eq!(contents(&b), "BA");
    }

    #[test]
    fn test_delete_gated_by_latest_created_map() {
        // "abcd" as four separate nodes by actor 1 at lamports 1..=4.
        let mut split = RgaTreeSplit::new();
        for (i, ch) in ["a", "b", "c", "d"].iter().enumerate() {
            edit_at(&mut split, i, i, ch, ticket(i as i64 + 1, 1));
        }
        assert_eq!(contents(&split), "abcd");

        // A remote deleter that has only seen lamport 2 from actor 1 may
        // only delete a and b.
        let mut gate = HashMap::new();
        gate.insert(actor(1), ticket(2, 1));
        let range = split.find_pos_range(0, 4).unwrap();
        let (_, touched, changes) = split
            .edit(&range, ticket(5, 2), None, Some(&gate))
            .unwrap();

        assert_eq!(contents(&split), "cd");
        assert_eq!(touched.get(&actor(1)), Some(&ticket(2, 1)));
        // a and b are adjacent: one contiguous deletion run at [0, 2).
        assert_eq!(changes.len(), 1);
        assert_eq!((changes[0].from, changes[0].to), (0, 2));
    }

    #[test]
    fn test_edit_reports_pre_edit_indexes() {
        let mut split = RgaTreeSplit::new();
        edit_at(&mut split, 0, 0, "abcdef", ticket(1, 1));

        let range = split.find_pos_range(2, 4).unwrap();
        let (_, _, changes) = split
            .edit(&range, ticket(2, 1), Some(Run("XY".into())), None)
            .unwrap();

        assert_eq!(changes.len(), 2);
        assert_eq!((changes[0].from, changes[0].to), (2, 4));
        assert!(changes[0].content.is_none());
        assert_eq!((changes[1].from, changes[1].to), (2, 2));
        assert_eq!(changes[1].content, Some(Run("XY".into())));
        assert_eq!(contents(&split), "abXYef");
    }

    #[test]
    fn test_index_round_trip() {
        let mut split = RgaTreeSplit::new();
        edit_at(&mut split, 0, 0, "helloworld", ticket(1, 1));
        edit_at(&mut split, 5, 5, "~", ticket(2, 1));
        edit_at(&mut split, 2, 4, "", ticket(3, 1));

        let len = split.visible_len();
        let mut live_total = 0;
        for (_, value, removed) in split.iter_all() {
            if !removed {
                live_total += value.unit_len();
            }
        }
        assert_eq!(live_total, len);

        for i in 0..=len {
            let pos = split.find_node_pos(i).unwrap();
            let range = RgaSplitPosRange::collapsed(pos);
            assert_eq!(split.find_indexes_from_range(&range).unwrap(), (i, i));
        }
    }

    #[test]
    fn test_tombstones_remain_addressable_until_purge() {
        let mut split = RgaTreeSplit::new();
        edit_at(&mut split, 0, 0, "abc", ticket(1, 1));
        edit_at(&mut split, 1, 2, "", ticket(2, 1));
        assert_eq!(contents(&split), "ac");
        assert_eq!(split.removed_node_count(), 1);

        // A position recorded inside the tombstone still resolves.
        let pos = RgaSplitPos::new(RgaSplitNodeId::new(ticket(1, 1), 1), 0);
        let range = RgaSplitPosRange::collapsed(pos);
        assert!(split.find_indexes_from_range(&range).is_ok());

        // Not yet observed by everyone: nothing to purge.
        assert_eq!(split.purge_removed_nodes_before(&ticket(2, 1)), 0);
        // Once the minimum synced ticket passes the removal, it goes.
        assert_eq!(split.purge_removed_nodes_before(&ticket(3, 1)), 1);
        assert_eq!(split.removed_node_count(), 0);
        assert_eq!(contents(&split), "ac");
        // The old position now resolves through the left neighbor's end,
        // landing on the same visible index.
        assert_eq!(split.find_indexes_from_range(&range).unwrap(), (1, 1));
    }

    #[test]
    fn test_unknown_position_is_structure_error() {
        let mut split = RgaTreeSplit::new();
        edit_at(&mut split, 0, 0, "abc", ticket(1, 1));

        let bogus = RgaSplitPos::new(RgaSplitNodeId::new(ticket(99, 7), 0), 0);
        let range = RgaSplitPosRange::collapsed(bogus);
        let err = split.edit(&range, ticket(2, 1), None, None).unwrap_err();
        assert!(matches!(err, CrdtError::NodeNotFound(_)));
    }

    #[test]
    fn test_removed_at_is_monotonic() {
        let mut split = RgaTreeSplit::new();
        edit_at(&mut split, 0, 0, "ab", ticket(1, 1));
        edit_at(&mut split, 0, 2, "", ticket(3, 1));

        // A concurrent earlier delete of the same nodes must not lower
        // the recorded removal ticket.
        let pos_a = RgaSplitPos::new(RgaSplitNodeId::new(ticket(1, 1), 0), 0);
        let pos_end = RgaSplitPos::new(RgaSplitNodeId::new(ticket(1, 1), 0), 2);
        let range = RgaSplitPosRange::new(pos_a, pos_end);
        split.edit(&range, ticket(2, 2), None, None).unwrap();

        for (_, _, removed) in split.iter_all() {
            assert!(removed);
        }
        assert_eq!(split.purge_removed_nodes_before(&ticket(3, 1)), 0);
        assert_eq!(split.purge_removed_nodes_before(&ticket(4, 1)), 1);
    }

    #[test]
    fn test_serde_round_trip() {
        let mut split = RgaTreeSplit::new();
        edit_at(&mut split, 0, 0, "helloworld", ticket(1, 1));
        edit_at(&mut split, 5, 5, "~", ticket(2, 1));
        edit_at(&mut split, 0, 2, "", ticket(3, 1));

        let json = serde_json::to_string(&split).unwrap();
        let mut back: RgaTreeSplit<Run> = serde_json::from_str(&json).unwrap();
        assert_eq!(contents(&back), contents(&split));
        assert_eq!(back.visible_len(), split.visible_len());
        assert_eq!(back.removed_node_count(), split.removed_node_count());

        // Rebuilt indexes still resolve positions.
        for i in 0..=back.visible_len() {
            let pos = back.find_node_pos(i).unwrap();
            let range = RgaSplitPosRange::collapsed(pos);
            assert_eq!(back.find_indexes_from_range(&range).unwrap(), (i, i));
        }
    }
}
