//! A change: the causally consistent bundle of operations one `update`
//! call produces.

use crate::presence::PresenceChange;
use crdt::{ChangeId, CrdtResult, CrdtRoot, OpInfo, Operation};
use serde::{Deserialize, Serialize};

/// A bundle of operations identified by a [`ChangeId`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    pub message: Option<String>,
    pub operations: Vec<Operation>,
    pub presence_change: Option<PresenceChange>,
}

impl Change {
    pub fn new(
        id: ChangeId,
        message: Option<String>,
        operations: Vec<Operation>,
        presence_change: Option<PresenceChange>,
    ) -> Self {
        Self {
            id,
            message,
            operations,
            presence_change,
        }
    }

    /// Whether this change mutates anything at all.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.presence_change.is_none()
    }

    /// Execute every operation in order against `root`.
    pub fn execute(&self, root: &mut CrdtRoot) -> CrdtResult<Vec<OpInfo>> {
        let mut infos = Vec::new();
        for op in &self.operations {
            infos.extend(op.execute(root)?);
        }
        Ok(infos)
    }
}
