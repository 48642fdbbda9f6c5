//! The change context: a working copy of the root plus the operations
//! recorded against it.
//!
//! Proxies execute eagerly against the context's root copy and record
//! the operation they performed. Committing a context swaps the copy in
//! as the document's new root; abandoning it leaves the document
//! untouched.

use crate::change::Change;
use crate::presence::PresenceChange;
use crdt::{ChangeId, CrdtRoot, OpInfo, Operation, TimeTicket};

/// An open change under construction.
pub struct ChangeContext {
    id: ChangeId,
    root: CrdtRoot,
    message: Option<String>,
    operations: Vec<Operation>,
    op_infos: Vec<OpInfo>,
}

impl ChangeContext {
    pub fn new(id: ChangeId, root: CrdtRoot, message: Option<String>) -> Self {
        Self {
            id,
            root,
            message,
            operations: Vec::new(),
            op_infos: Vec::new(),
        }
    }

    /// Issue the next operation ticket of this change.
    pub fn issue_time_ticket(&mut self) -> TimeTicket {
        self.id.issue_time_ticket()
    }

    pub fn root(&self) -> &CrdtRoot {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut CrdtRoot {
        &mut self.root
    }

    /// Record an executed operation and the event payloads it produced.
    pub fn record(&mut self, operation: Operation, infos: Vec<OpInfo>) {
        self.operations.push(operation);
        self.op_infos.extend(infos);
    }

    pub fn has_operations(&self) -> bool {
        !self.operations.is_empty()
    }

    /// Close the context into a change plus the mutated root copy and
    /// the accumulated event payloads.
    pub fn finish(
        self,
        presence_change: Option<PresenceChange>,
    ) -> (Change, CrdtRoot, Vec<OpInfo>) {
        let change = Change::new(self.id, self.message, self.operations, presence_change);
        (change, self.root, self.op_infos)
    }
}
