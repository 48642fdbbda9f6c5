//! Replicated document layer over the CRDT runtime.
//!
//! A [`Document`] owns a CRDT root, the replica's logical clock, a
//! buffer of unacknowledged local changes, and the presence map. Local
//! edits go through [`Document::update`], which runs a closure against
//! proxies and commits the produced change atomically; remote state
//! arrives through [`Document::apply_change_pack`].
//!
//! # Example
//!
//! ```
//! use document::Document;
//! use crdt::ActorId;
//!
//! let mut doc = Document::new("my-doc");
//! doc.activate(ActorId::random()).unwrap();
//! doc.update(|root, _presence| {
//!     root.set("title", "hello")?;
//!     Ok(())
//! })
//! .unwrap();
//! assert_eq!(doc.to_json(), "{\"title\":\"hello\"}");
//! ```

pub mod change;
pub mod change_pack;
pub mod context;
pub mod document;
pub mod error;
pub mod event;
pub mod presence;
pub mod proxy;

// Re-export commonly used types
pub use change::Change;
pub use change_pack::{ChangePack, Checkpoint};
pub use document::{Document, DocumentStatus};
pub use error::{DocumentError, DocumentResult};
pub use event::{ChangeInfo, DocEvent};
pub use presence::{PresenceChange, PresenceData, Presences};
pub use proxy::{
    ArrayProxy, CounterProxy, ObjectProxy, PresenceProxy, TextProxy, TreeInput, TreeProxy,
};
