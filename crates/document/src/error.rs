//! Error types for the document crate.

use crdt::CrdtError;
use thiserror::Error;

/// Result type alias for document operations.
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Errors surfaced by the document layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentError {
    /// An error bubbling up from the CRDT runtime.
    #[error(transparent)]
    Crdt(#[from] CrdtError),

    /// The document is in the wrong lifecycle status for the call.
    #[error("document must be {expected} (currently {actual})")]
    InvalidStatus {
        expected: &'static str,
        actual: &'static str,
    },

    /// A change pack carried a snapshot this replica cannot decode.
    #[error("snapshot decode failed: {0}")]
    SnapshotDecode(String),
}
