//! Array element: an ordered sequence of elements under RGA ordering.
//!
//! Entries are `createdAt` tickets of child elements in document order,
//! tombstones included. Insertion is "after `prev`" with the RGA
//! tie-break: scanning right from the insertion point, any entry created
//! after the inserted element keeps its place nearer the origin. This is
//! the same rule the text sequence uses, so concurrent inserts at one
//! spot converge identically everywhere.

use crate::error::{CrdtError, CrdtResult};
use crate::ticket::TimeTicket;
use serde::{Deserialize, Serialize};

/// The container half of an array element.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CrdtArray {
    entries: Vec<TimeTicket>,
}

impl CrdtArray {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the element created at `created_at` after `prev`
    /// (`None` inserts at the front).
    pub fn insert_after(
        &mut self,
        prev: Option<TimeTicket>,
        created_at: TimeTicket,
    ) -> CrdtResult<()> {
        let mut idx = match prev {
            None => 0,
            Some(p) => {
                self.index_of(p)
                    .ok_or_else(|| CrdtError::ElementNotFound(p.to_key_string()))?
                    + 1
            }
        };
        while idx < self.entries.len() && self.entries[idx].after(&created_at) {
            idx += 1;
        }
        self.entries.insert(idx, created_at);
        Ok(())
    }

    /// Relocate `target` to sit after `prev`. The caller has already
    /// decided the LWW contest on the element's `movedAt`.
    pub fn move_after(
        &mut self,
        prev: Option<TimeTicket>,
        target: TimeTicket,
    ) -> CrdtResult<()> {
        if prev == Some(target) {
            return Ok(());
        }
        let from = self
            .index_of(target)
            .ok_or_else(|| CrdtError::ElementNotFound(target.to_key_string()))?;
        self.entries.remove(from);
        self.insert_after(prev, target)
    }

    /// Position of `created_at` among all entries, tombstones included.
    pub fn index_of(&self, created_at: TimeTicket) -> Option<usize> {
        self.entries.iter().position(|&t| t == created_at)
    }

    /// Whether `created_at` is an entry of this array.
    pub fn contains(&self, created_at: TimeTicket) -> bool {
        self.index_of(created_at).is_some()
    }

    /// Iterate entries in document order, tombstones included.
    pub fn iter(&self) -> impl Iterator<Item = TimeTicket> + '_ {
        self.entries.iter().copied()
    }

    /// Drop the edge of a purged element.
    pub fn purge(&mut self, created_at: TimeTicket) {
        self.entries.retain(|&t| t != created_at);
    }

    /// Entry count, tombstones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
