//! The element taxonomy: one type per replicated value kind, plus the
//! metadata every element carries.
//!
//! Elements are owned by the root registry and reference each other by
//! `createdAt` ticket, so cloning an element clones a self-contained
//! subgraph description (identity preserved, addresses not).

use crate::array::CrdtArray;
use crate::counter::CrdtCounter;
use crate::error::{CrdtError, CrdtResult};
use crate::object::CrdtObject;
use crate::text::CrdtText;
use crate::ticket::TimeTicket;
use crate::tree::CrdtTree;
use serde::{Deserialize, Serialize};

use crate::primitive::PrimitiveValue;

/// The kind-specific half of an element.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ElementBody {
    Primitive(PrimitiveValue),
    Object(CrdtObject),
    Array(CrdtArray),
    Counter(CrdtCounter),
    Text(CrdtText),
    Tree(CrdtTree),
}

impl ElementBody {
    pub fn type_name(&self) -> &'static str {
        match self {
            ElementBody::Primitive(_) => "primitive",
            ElementBody::Object(_) => "object",
            ElementBody::Array(_) => "array",
            ElementBody::Counter(_) => "counter",
            ElementBody::Text(_) => "text",
            ElementBody::Tree(_) => "tree",
        }
    }
}

/// A replicated element: creation identity, lifecycle tickets, and the
/// kind-specific body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrdtElement {
    created_at: TimeTicket,
    moved_at: Option<TimeTicket>,
    removed_at: Option<TimeTicket>,
    body: ElementBody,
}

impl CrdtElement {
    pub fn new(created_at: TimeTicket, body: ElementBody) -> Self {
        Self {
            created_at,
            moved_at: None,
            removed_at: None,
            body,
        }
    }

    pub fn created_at(&self) -> TimeTicket {
        self.created_at
    }

    pub fn moved_at(&self) -> Option<TimeTicket> {
        self.moved_at
    }

    pub fn removed_at(&self) -> Option<TimeTicket> {
        self.removed_at
    }

    pub fn is_removed(&self) -> bool {
        self.removed_at.is_some()
    }

    pub fn body(&self) -> &ElementBody {
        &self.body
    }

    /// Record a move. Returns `false` when an equal-or-newer move
    /// already won the LWW contest.
    pub fn set_moved_at(&mut self, moved_at: TimeTicket) -> bool {
        match self.moved_at {
            Some(current) if !moved_at.after(&current) => false,
            _ => {
                self.moved_at = Some(moved_at);
                true
            }
        }
    }

    /// Tombstone this element. Removal is monotonic: the ticket is only
    /// ever raised, never cleared. Returns `false` for stale removals.
    pub fn remove(&mut self, executed_at: TimeTicket) -> bool {
        if executed_at.after(&self.created_at)
            && self.removed_at.map_or(true, |r| executed_at.after(&r))
        {
            self.removed_at = Some(executed_at);
            true
        } else {
            false
        }
    }

    pub fn as_object(&self) -> CrdtResult<&CrdtObject> {
        match &self.body {
            ElementBody::Object(o) => Ok(o),
            other => Err(mismatch("object", other)),
        }
    }

    pub fn as_object_mut(&mut self) -> CrdtResult<&mut CrdtObject> {
        match &mut self.body {
            ElementBody::Object(o) => Ok(o),
            other => Err(mismatch("object", other)),
        }
    }

    pub fn as_array(&self) -> CrdtResult<&CrdtArray> {
        match &self.body {
            ElementBody::Array(a) => Ok(a),
            other => Err(mismatch("array", other)),
        }
    }

    pub fn as_array_mut(&mut self) -> CrdtResult<&mut CrdtArray> {
        match &mut self.body {
            ElementBody::Array(a) => Ok(a),
            other => Err(mismatch("array", other)),
        }
    }

    pub fn as_counter(&self) -> CrdtResult<&CrdtCounter> {
        match &self.body {
            ElementBody::Counter(c) => Ok(c),
            other => Err(mismatch("counter", other)),
        }
    }

    pub fn as_counter_mut(&mut self) -> CrdtResult<&mut CrdtCounter> {
        match &mut self.body {
            ElementBody::Counter(c) => Ok(c),
            other => Err(mismatch("counter", other)),
        }
    }

    pub fn as_text(&self) -> CrdtResult<&CrdtText> {
        match &self.body {
            ElementBody::Text(t) => Ok(t),
            other => Err(mismatch("text", other)),
        }
    }

    pub fn as_text_mut(&mut self) -> CrdtResult<&mut CrdtText> {
        match &mut self.body {
            ElementBody::Text(t) => Ok(t),
            other => Err(mismatch("text", other)),
        }
    }

    pub fn as_tree(&self) -> CrdtResult<&CrdtTree> {
        match &self.body {
            ElementBody::Tree(t) => Ok(t),
            other => Err(mismatch("tree", other)),
        }
    }

    pub fn as_tree_mut(&mut self) -> CrdtResult<&mut CrdtTree> {
        match &mut self.body {
            ElementBody::Tree(t) => Ok(t),
            other => Err(mismatch("tree", other)),
        }
    }

    /// Whether this element can hold internal tombstones eligible for
    /// nested garbage collection.
    pub fn has_internal_tombstones(&self) -> bool {
        match &self.body {
            ElementBody::Text(t) => t.removed_node_count() > 0,
            ElementBody::Tree(t) => t.removed_node_count() > 0,
            _ => false,
        }
    }
}

fn mismatch(expected: &'static str, found: &ElementBody) -> CrdtError {
    CrdtError::TypeMismatch {
        expected,
        found: found.type_name(),
    }
}
