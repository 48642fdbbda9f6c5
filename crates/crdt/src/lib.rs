//! CRDT primitives for collaborative documents.
//!
//! This crate implements the replicated data structures a document is
//! made of, so that any number of replicas can mutate concurrently and
//! converge deterministically once they have exchanged their changes.
//!
//! # Modules
//!
//! - `actor`: replica identity
//! - `ticket`: totally ordered logical timestamps
//! - `clock`: the per-replica change clock and ticket factory
//! - `primitive` / `counter`: leaf values and accumulators
//! - `rht`: last-writer-wins string map for style attributes
//! - `splay`: weighted splay tree backing offset lookup
//! - `rga_tree_split`: the split-node sequence CRDT behind rich text
//! - `text`: rich text over the split-node sequence (UTF-16 units)
//! - `object` / `array`: element containers
//! - `tree`: nested node CRDT with sibling RGA ordering
//! - `element` / `root`: the element taxonomy and its owning registry
//! - `operation`: the replicated unit of mutation
//! - `error`: error types for this crate
//!
//! # Example
//!
//! ```
//! use crdt::{CrdtRoot, ElementContent, Operation, PrimitiveValue, TimeTicket};
//! use crdt::actor::ActorId;
//!
//! let mut root = CrdtRoot::new();
//! let op = Operation::Set {
//!     parent_created_at: root.root_created_at(),
//!     key: "greeting".to_string(),
//!     value: ElementContent::Primitive(PrimitiveValue::from("hello")),
//!     executed_at: TimeTicket::new(1, 1, ActorId::random()),
//! };
//! op.execute(&mut root).unwrap();
//! assert_eq!(root.to_json(), "{\"greeting\":\"hello\"}");
//! ```

pub mod actor;
pub mod array;
pub mod clock;
pub mod counter;
pub mod element;
pub mod error;
pub mod object;
pub mod operation;
pub mod primitive;
pub mod rga_tree_split;
pub mod rht;
pub mod root;
pub mod splay;
pub mod text;
pub mod ticket;
pub mod tree;

// Re-export commonly used types
pub use actor::ActorId;
pub use clock::ChangeId;
pub use counter::{CounterValue, CrdtCounter};
pub use element::{CrdtElement, ElementBody};
pub use error::{CrdtError, CrdtResult};
pub use object::CrdtObject;
pub use operation::{ElementContent, OpInfo, Operation};
pub use primitive::PrimitiveValue;
pub use rga_tree_split::{RgaSplitNodeId, RgaSplitPos, RgaSplitPosRange, RgaTreeSplit, SplitValue};
pub use rht::Rht;
pub use root::CrdtRoot;
pub use text::{CrdtText, TextChange, TextValue};
pub use ticket::TimeTicket;
pub use tree::{CrdtTree, TreeChange, TreeNodeId, TreeNodeSpec, TreePos, TEXT_NODE_TYPE};
