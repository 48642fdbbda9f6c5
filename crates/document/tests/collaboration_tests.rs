//! Integration tests for the replicated document layer.
//!
//! These tests simulate multiple replicas editing concurrently and
//! exchanging change packs through a simulated sync peer, asserting
//! that every replica converges to the same canonical state.

use crdt::{ActorId, CounterValue, TimeTicket};
use document::{Change, ChangePack, Checkpoint, DocEvent, Document, TreeInput};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use uuid::Uuid;

fn actor(n: u128) -> ActorId {
    ActorId::from(Uuid::from_u128(n))
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// A minimal sync peer: stores changes in arrival order and hands out
/// packs based on each replica's checkpoint.
struct SimServer {
    doc_key: String,
    changes: Vec<Change>,
}

impl SimServer {
    fn new(doc_key: &str) -> Self {
        init_tracing();
        Self {
            doc_key: doc_key.to_string(),
            changes: Vec::new(),
        }
    }

    /// Accept a replica's buffered changes and acknowledge them.
    fn push(&mut self, doc: &mut Document) {
        let pack = doc.create_change_pack();
        let acked_seq = pack
            .changes
            .last()
            .map(|c| c.id.client_seq)
            .unwrap_or(pack.checkpoint.client_seq);
        self.changes.extend(pack.changes);

        let ack = ChangePack::new(
            &self.doc_key,
            Checkpoint::new(doc.checkpoint().server_seq, acked_seq),
            vec![],
            None,
            None,
        );
        doc.apply_change_pack(&ack).unwrap();
    }

    /// Deliver everything the replica has not pulled yet.
    fn pull(&self, doc: &mut Document) {
        let from = doc.checkpoint().server_seq as usize;
        let pack = ChangePack::new(
            &self.doc_key,
            Checkpoint::new(self.changes.len() as i64, doc.checkpoint().client_seq),
            self.changes[from..].to_vec(),
            None,
            None,
        );
        doc.apply_change_pack(&pack).unwrap();
    }

    fn sync(&mut self, doc: &mut Document) {
        self.push(doc);
        self.pull(doc);
    }
}

fn new_doc(key: &str, actor_n: u128) -> Document {
    let mut doc = Document::new(key);
    doc.activate(actor(actor_n)).unwrap();
    doc.attach().unwrap();
    doc
}

#[test]
fn test_concurrent_object_sets_converge() {
    let mut server = SimServer::new("doc");
    let mut doc1 = new_doc("doc", 1);
    let mut doc2 = new_doc("doc", 2);

    doc1.update(|root, _| root.set("left", 1i32)).unwrap();
    doc2.update(|root, _| root.set("right", 2i32)).unwrap();

    server.sync(&mut doc1);
    server.sync(&mut doc2);
    server.sync(&mut doc1);

    assert_eq!(doc1.to_json(), doc2.to_json());
    assert_eq!(doc1.to_json(), "{\"left\":1,\"right\":2}");
}

#[test]
fn test_concurrent_key_write_lww() {
    let mut server = SimServer::new("doc");
    let mut doc1 = new_doc("doc", 1);
    let mut doc2 = new_doc("doc", 2);

    // Same key, concurrent writes at the same lamport: the larger
    // actor's ticket wins on every replica.
    doc1.update(|root, _| root.set("k", "from-1")).unwrap();
    doc2.update(|root, _| root.set("k", "from-2")).unwrap();

    server.sync(&mut doc1);
    server.sync(&mut doc2);
    server.sync(&mut doc1);

    assert_eq!(doc1.to_json(), doc2.to_json());
    assert_eq!(doc1.to_json(), "{\"k\":\"from-2\"}");
}

#[test]
fn test_concurrent_text_inserts_tie_break() {
    let mut server = SimServer::new("doc");
    let mut doc1 = new_doc("doc", 1);
    let mut doc2 = new_doc("doc", 2);

    doc1.update(|root, _| {
        root.set_new_text("t")?;
        Ok(())
    })
    .unwrap();
    server.sync(&mut doc1);
    server.sync(&mut doc2);

    // Both insert at position 0 concurrently.
    doc1.update(|root, _| root.text("t")?.edit(0, 0, "A")).unwrap();
    doc2.update(|root, _| root.text("t")?.edit(0, 0, "B")).unwrap();

    server.sync(&mut doc1);
    server.sync(&mut doc2);
    server.sync(&mut doc1);

    assert_eq!(doc1.to_json(), doc2.to_json());
    // Equal lamports: the larger actor sorts closer to the origin.
    assert_eq!(doc1.to_json(), "{\"t\":\"BA\"}");
}

#[test]
fn test_remote_delete_gated_by_observation() {
    let mut server = SimServer::new("doc");
    let mut doc1 = new_doc("doc", 1);
    let mut doc2 = new_doc("doc", 2);

    doc1.update(|root, _| {
        root.set_new_text("t")?;
        Ok(())
    })
    .unwrap();
    // Four separate changes so each character carries its own ticket.
    for ch in ["a", "b", "c", "d"] {
        doc1.update(|root, _| {
            let mut text = root.text("t")?;
            let len = text.len()?;
            text.edit(len, len, ch)
        })
        .unwrap();
    }
    server.push(&mut doc1);

    // doc2 pulls only the text creation plus "a" and "b".
    let partial = ChangePack::new(
        "doc",
        Checkpoint::new(3, 0),
        server.changes[..3].to_vec(),
        None,
        None,
    );
    doc2.apply_change_pack(&partial).unwrap();
    assert_eq!(doc2.to_json(), "{\"t\":\"ab\"}");

    // doc2 deletes everything it can see; the deletion must not affect
    // characters it has not observed.
    doc2.update(|root, _| root.text("t")?.edit(0, 2, "")).unwrap();
    server.sync(&mut doc2);
    server.pull(&mut doc1);

    assert_eq!(doc1.to_json(), doc2.to_json());
    assert_eq!(doc1.to_json(), "{\"t\":\"cd\"}");
}

#[test]
fn test_text_insert_then_split() {
    let mut doc = new_doc("doc", 1);
    doc.update(|root, _| {
        let mut text = root.set_new_text("t")?;
        text.edit(0, 0, "helloworld")?;
        text.edit(5, 5, "~")
    })
    .unwrap();
    assert_eq!(doc.to_json(), "{\"t\":\"hello~world\"}");
}

#[test]
fn test_tree_edit_merges_paragraphs() {
    let mut server = SimServer::new("doc");
    let mut doc1 = new_doc("doc", 1);
    let mut doc2 = new_doc("doc", 2);

    doc1.update(|root, _| {
        root.set_new_tree(
            "tree",
            &TreeInput::element("r").with_children(vec![
                TreeInput::element("p").with_children(vec![TreeInput::text("ab")]),
                TreeInput::element("p").with_children(vec![TreeInput::text("cd")]),
            ]),
        )?;
        Ok(())
    })
    .unwrap();
    server.sync(&mut doc1);
    server.sync(&mut doc2);

    doc1.update(|root, _| root.tree("tree")?.edit(2, 6, &[])).unwrap();
    server.sync(&mut doc1);
    server.sync(&mut doc2);

    assert_eq!(doc1.to_json(), doc2.to_json());
    assert_eq!(doc1.to_json(), "{\"tree\":\"<r><p>ad</p></r>\"}");
}

#[test]
fn test_concurrent_counter_increases() {
    let mut server = SimServer::new("doc");
    let mut doc1 = new_doc("doc", 1);
    let mut doc2 = new_doc("doc", 2);

    doc1.update(|root, _| {
        root.set_new_counter("c", CounterValue::Int(0))?;
        Ok(())
    })
    .unwrap();
    server.sync(&mut doc1);
    server.sync(&mut doc2);

    doc1.update(|root, _| root.counter("c")?.increase(5)).unwrap();
    doc2.update(|root, _| root.counter("c")?.increase(7)).unwrap();

    server.sync(&mut doc1);
    server.sync(&mut doc2);
    server.sync(&mut doc1);

    assert_eq!(doc1.to_json(), doc2.to_json());
    assert_eq!(doc1.to_json(), "{\"c\":12}");
}

#[test]
fn test_array_concurrent_pushes_converge() {
    let mut server = SimServer::new("doc");
    let mut doc1 = new_doc("doc", 1);
    let mut doc2 = new_doc("doc", 2);

    doc1.update(|root, _| {
        root.set_new_array("list")?;
        Ok(())
    })
    .unwrap();
    server.sync(&mut doc1);
    server.sync(&mut doc2);

    doc1.update(|root, _| root.array("list")?.push(1i32)).unwrap();
    doc2.update(|root, _| root.array("list")?.push(2i32)).unwrap();

    server.sync(&mut doc1);
    server.sync(&mut doc2);
    server.sync(&mut doc1);

    assert_eq!(doc1.to_json(), doc2.to_json());
    let len = doc1
        .root()
        .array_visible_entries(
            doc1.root().object_get(doc1.root().root_created_at(), "list").unwrap().unwrap(),
        )
        .unwrap()
        .len();
    assert_eq!(len, 2);
}

#[test]
fn test_array_holds_every_element_kind() {
    let mut doc = new_doc("doc", 1);
    doc.update(|root, _| {
        let mut list = root.set_new_array("list")?;
        list.push(1i32)?;
        list.push_new_counter(CounterValue::Int(5))?;
        let mut inner = list.push_new_array()?;
        inner.push("x")?;
        let mut note = list.push_new_text()?;
        note.edit(0, 0, "hi")?;
        list.push_new_tree(&TreeInput::element("r"))?;
        Ok(())
    })
    .unwrap();
    assert_eq!(doc.to_json(), "{\"list\":[1,5,[\"x\"],\"hi\",\"<r></r>\"]}");

    // Non-primitive entries land at explicit indexes too.
    doc.update(|root, _| {
        let mut list = root.array("list")?;
        let mut entry = list.insert_new_object(1)?;
        entry.set("k", true)?;
        list.insert(0, 0i32)?;
        Ok(())
    })
    .unwrap();
    assert_eq!(
        doc.to_json(),
        "{\"list\":[0,1,{\"k\":true},5,[\"x\"],\"hi\",\"<r></r>\"]}"
    );

    // The key names an array, so the counter accessor refuses it.
    let result = doc.update(|root, _| {
        root.counter("list")?;
        Ok(())
    });
    assert!(matches!(
        result,
        Err(document::DocumentError::Crdt(
            crdt::CrdtError::TypeMismatch { .. }
        ))
    ));
}

#[test]
fn test_permuted_delivery_converges() {
    // Two concurrent changes applied in opposite orders on two fresh
    // replicas must produce the same canonical JSON.
    let mut doc_a = new_doc("doc", 1);
    let mut doc_b = new_doc("doc", 2);

    doc_a.update(|root, _| root.set("x", 1i32)).unwrap();
    doc_b.update(|root, _| root.set("y", 2i32)).unwrap();

    let change_a = doc_a.create_change_pack().changes[0].clone();
    let change_b = doc_b.create_change_pack().changes[0].clone();

    let mut fresh1 = new_doc("doc", 3);
    let mut fresh2 = new_doc("doc", 4);

    let pack_ab = ChangePack::new(
        "doc",
        Checkpoint::new(2, 0),
        vec![change_a.clone(), change_b.clone()],
        None,
        None,
    );
    let pack_ba = ChangePack::new(
        "doc",
        Checkpoint::new(2, 0),
        vec![change_b, change_a],
        None,
        None,
    );

    fresh1.apply_change_pack(&pack_ab).unwrap();
    fresh2.apply_change_pack(&pack_ba).unwrap();

    assert_eq!(fresh1.to_json(), fresh2.to_json());
    assert_eq!(fresh1.to_json(), "{\"x\":1,\"y\":2}");
}

#[test]
fn test_pack_application_is_idempotent() {
    let mut doc_a = new_doc("doc", 1);
    doc_a.update(|root, _| root.set("k", "v")).unwrap();
    let change = doc_a.create_change_pack().changes[0].clone();

    let mut doc_b = new_doc("doc", 2);
    let pack = ChangePack::new("doc", Checkpoint::new(1, 0), vec![change], None, None);

    doc_b.apply_change_pack(&pack).unwrap();
    let json_once = doc_b.to_json();
    let checkpoint_once = doc_b.checkpoint();

    doc_b.apply_change_pack(&pack).unwrap();
    assert_eq!(doc_b.to_json(), json_once);
    assert_eq!(doc_b.checkpoint(), checkpoint_once);
}

#[test]
fn test_failed_update_discards_change() {
    let mut doc = new_doc("doc", 1);
    doc.update(|root, _| root.set("keep", 1i32)).unwrap();
    let before = doc.to_json();
    let pending_before = doc.pending_change_count();

    let result = doc.update(|root, _| {
        root.set("discard", 2i32)?;
        Err(crdt::CrdtError::OutOfRange { index: 9, len: 0 }.into())
    });
    assert!(result.is_err());
    assert_eq!(doc.to_json(), before);
    assert_eq!(doc.pending_change_count(), pending_before);
}

#[test]
fn test_acknowledge_prunes_local_buffer() {
    let mut server = SimServer::new("doc");
    let mut doc = new_doc("doc", 1);

    doc.update(|root, _| root.set("a", 1i32)).unwrap();
    doc.update(|root, _| root.set("b", 2i32)).unwrap();
    assert_eq!(doc.pending_change_count(), 2);

    server.push(&mut doc);
    assert_eq!(doc.pending_change_count(), 0);
    assert_eq!(doc.checkpoint().client_seq, 2);
}

#[test]
fn test_garbage_collection_after_min_synced() {
    let mut server = SimServer::new("doc");
    let mut doc1 = new_doc("doc", 1);
    let mut doc2 = new_doc("doc", 2);

    doc1.update(|root, _| {
        let mut text = root.set_new_text("t")?;
        text.edit(0, 0, "abcd")
    })
    .unwrap();
    server.sync(&mut doc1);
    server.sync(&mut doc2);

    doc1.update(|root, _| root.text("t")?.edit(1, 3, "")).unwrap();
    server.sync(&mut doc1);
    server.sync(&mut doc2);
    assert_eq!(doc1.to_json(), "{\"t\":\"ad\"}");

    let text_id = doc1
        .root()
        .object_get(doc1.root().root_created_at(), "t")
        .unwrap()
        .unwrap();
    assert_eq!(
        doc1.root().get(text_id).unwrap().as_text().unwrap().removed_node_count(),
        1
    );

    // Every replica has observed the deletion: a pack carrying the
    // min-synced ticket triggers the purge.
    let gc_pack = ChangePack::new(
        "doc",
        doc1.checkpoint(),
        vec![],
        None,
        Some(TimeTicket::new(i64::MAX - 1, 0, ActorId::max())),
    );
    doc1.apply_change_pack(&gc_pack).unwrap();
    assert_eq!(
        doc1.root().get(text_id).unwrap().as_text().unwrap().removed_node_count(),
        0
    );
    assert_eq!(doc1.to_json(), "{\"t\":\"ad\"}");
}

#[test]
fn test_presence_propagates() {
    let mut server = SimServer::new("doc");
    let mut doc1 = new_doc("doc", 1);
    let mut doc2 = new_doc("doc", 2);

    let events: Rc<RefCell<Vec<DocEvent>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    doc2.subscribe(move |event| sink.borrow_mut().push(event.clone()));

    doc1.update(|root, presence| {
        root.set("k", 1i32)?;
        presence.set("name", serde_json::json!("ada"));
        Ok(())
    })
    .unwrap();
    server.sync(&mut doc1);
    server.pull(&mut doc2);

    let data = doc2.presences().get(&actor(1)).unwrap();
    assert_eq!(data.get("name"), Some(&serde_json::json!("ada")));
    assert!(events
        .borrow()
        .iter()
        .any(|e| matches!(e, DocEvent::PresenceChanged { .. })));

    // Clearing drops the actor on every replica.
    doc1.update(|_, presence| {
        presence.clear();
        Ok(())
    })
    .unwrap();
    server.sync(&mut doc1);
    server.pull(&mut doc2);
    assert!(doc2.presences().get(&actor(1)).is_none());
}

#[test]
fn test_presence_merge_semantics() {
    let mut doc = new_doc("doc", 1);
    doc.update(|_, presence| {
        presence.set("name", serde_json::json!("ada"));
        Ok(())
    })
    .unwrap();
    doc.update(|_, presence| {
        presence.set("cursor", serde_json::json!({"pos": 3}));
        Ok(())
    })
    .unwrap();

    let data = doc.presences().get(&actor(1)).unwrap();
    assert_eq!(data.get("name"), Some(&serde_json::json!("ada")));
    assert_eq!(data.get("cursor"), Some(&serde_json::json!({"pos": 3})));
}

#[test]
fn test_snapshot_replaces_root() {
    let mut doc1 = new_doc("doc", 1);
    doc1.update(|root, _| {
        root.set("a", 1i32)?;
        let mut text = root.set_new_text("t")?;
        text.edit(0, 0, "hi")
    })
    .unwrap();

    let snapshot = doc1.create_snapshot().unwrap();
    let mut doc2 = new_doc("doc", 2);
    let events: Rc<RefCell<Vec<DocEvent>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    doc2.subscribe(move |event| sink.borrow_mut().push(event.clone()));

    let pack = ChangePack::new("doc", Checkpoint::new(1, 0), vec![], Some(snapshot), None);
    doc2.apply_change_pack(&pack).unwrap();

    assert_eq!(doc2.to_json(), doc1.to_json());
    assert!(events
        .borrow()
        .iter()
        .any(|e| matches!(e, DocEvent::Snapshot)));
}

#[test]
fn test_subscribe_receives_local_and_remote_changes() {
    let mut server = SimServer::new("doc");
    let mut doc1 = new_doc("doc", 1);
    let mut doc2 = new_doc("doc", 2);

    let events: Rc<RefCell<Vec<DocEvent>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    doc1.subscribe(move |event| sink.borrow_mut().push(event.clone()));

    doc1.update_with_message(Some("hello"), |root, _| root.set("k", 1i32))
        .unwrap();
    doc2.update(|root, _| root.set("other", 2i32)).unwrap();
    server.sync(&mut doc2);
    server.sync(&mut doc1);

    let events = events.borrow();
    let local = events
        .iter()
        .find_map(|e| match e {
            DocEvent::LocalChange(info) => Some(info),
            _ => None,
        })
        .unwrap();
    assert_eq!(local.actor, actor(1));
    assert_eq!(local.message.as_deref(), Some("hello"));
    assert_eq!(local.operations.len(), 1);

    let remote = events
        .iter()
        .find_map(|e| match e {
            DocEvent::RemoteChange(info) => Some(info),
            _ => None,
        })
        .unwrap();
    assert_eq!(remote.actor, actor(2));
}

#[test]
fn test_corrupt_change_aborts_pack() {
    let mut doc1 = new_doc("doc", 1);
    doc1.update(|root, _| root.set("k", 1i32)).unwrap();
    let mut change = doc1.create_change_pack().changes[0].clone();

    // Point the operation at a container this replica never saw.
    if let crdt::Operation::Set {
        parent_created_at, ..
    } = &mut change.operations[0]
    {
        *parent_created_at = TimeTicket::new(99, 1, actor(9));
    }

    let mut doc2 = new_doc("doc", 2);
    let pack = ChangePack::new("doc", Checkpoint::new(1, 0), vec![change], None, None);
    let result = doc2.apply_change_pack(&pack);
    assert!(result.is_err());
    assert_eq!(doc2.to_json(), "{}");
}

#[test]
fn test_rich_text_styles_survive_sync() {
    let mut server = SimServer::new("doc");
    let mut doc1 = new_doc("doc", 1);
    let mut doc2 = new_doc("doc", 2);

    doc1.update(|root, _| {
        let mut text = root.set_new_text("t")?;
        text.edit(0, 0, "abcd")?;
        text.style(1, 3, &HashMap::from([("bold".to_string(), "true".to_string())]))
    })
    .unwrap();
    server.sync(&mut doc1);
    server.sync(&mut doc2);

    let text_id = doc2
        .root()
        .object_get(doc2.root().root_created_at(), "t")
        .unwrap()
        .unwrap();
    let styled: Vec<(String, bool)> = doc2
        .root()
        .get(text_id)
        .unwrap()
        .as_text()
        .unwrap()
        .iter_runs()
        .map(|run| (run.content().to_string(), run.attrs().contains("bold")))
        .collect();
    assert_eq!(
        styled,
        vec![
            ("a".to_string(), false),
            ("bc".to_string(), true),
            ("d".to_string(), false),
        ]
    );
}
