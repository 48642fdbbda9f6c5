//! Error types for the CRDT crate.

use thiserror::Error;

/// Result type alias for CRDT operations.
pub type CrdtResult<T> = Result<T, CrdtError>;

/// Errors that can occur while executing operations against a document
/// root or its elements.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CrdtError {
    /// An operation targets an element unknown to the registry. With
    /// causal delivery this indicates a corrupt change.
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// A position references a sequence or tree node that does not
    /// exist on this replica.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// An operation targets an element of the wrong kind.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// A caller-supplied index does not map to a node.
    #[error("index {index} out of range for length {len}")]
    OutOfRange { index: usize, len: usize },

    /// A map key is absent.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// An operation is valid in shape but rejected locally (e.g. a tree
    /// move that would create a cycle).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// An internal invariant does not hold. Fatal: indicates a bug, not
    /// a user error.
    #[error("internal corruption: {0}")]
    Unexpected(String),
}
