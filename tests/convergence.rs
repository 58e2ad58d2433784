//! Integration tests for the last-writer-wins merge and its fanout.
//!
//! Whatever order updates arrive in, a node must settle on the update with
//! the largest timestamp, and every connection must be told exactly what it
//! is missing.

use std::sync::Arc;

use formsync::memory::MemoryConnection;
use formsync::prelude::*;
use formsync::UpdateOutcome;
use proptest::prelude::*;

struct Node {
    registry: Arc<ConnectionRegistry>,
    store: Arc<FormStateStore>,
}

impl Node {
    fn new() -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(FormStateStore::new(Arc::clone(&registry)));
        Self { registry, store }
    }

    /// A browser client wired up the way the socket endpoint does it.
    fn client(&self, label: &str) -> Arc<MemoryConnection> {
        let conn = Arc::new(MemoryConnection::new(label));
        attach_client(&(conn.clone() as ConnectionRef), &self.store);
        conn
    }

    fn replica(&self, label: &str) -> Arc<MemoryConnection> {
        let conn = Arc::new(MemoryConnection::new(label));
        self.registry.add_replica(conn.clone());
        conn
    }
}

fn send(conn: &MemoryConnection, form: &str, state: u64, ts: u64) {
    conn.receive(Envelope::state(&FormState::new(form, state, ts)).unwrap());
}

#[test]
fn scenario_tie_corrects_the_late_writer_once() {
    let node = Node::new();
    let c1 = node.client("c1");
    let c2 = node.client("c2");

    send(&c1, "f", 1, 1);
    send(&c2, "f", 0, 1);

    assert_eq!(node.store.get("f"), Some(FormState::new("f", 1, 1)));
    assert_eq!(c2.states(), vec![FormState::new("f", 1, 1)]);
    assert!(c1.sent().is_empty());
}

#[test]
fn scenario_newer_write_reaches_everyone_else_once() {
    let node = Node::new();
    let c1 = node.client("c1");
    let c2 = node.client("c2");
    let c3 = node.client("c3");
    let replicas = [node.replica("r1"), node.replica("r2")];

    send(&c1, "f", 1, 1);
    send(&c3, "f", 0, 0);
    c3.take_sent();
    for r in &replicas {
        r.take_sent();
    }

    send(&c2, "f", 2, 5);

    let expected = vec![FormState::new("f", 2, 5)];
    assert_eq!(node.store.get("f"), Some(FormState::new("f", 2, 5)));
    assert_eq!(c1.states(), expected);
    assert_eq!(c3.states(), expected);
    for r in &replicas {
        assert_eq!(r.states(), expected);
    }
    assert!(c2.sent().is_empty());
}

#[test]
fn scenario_new_form_reaches_replicas_only() {
    let node = Node::new();
    let c1 = node.client("c1");
    let watcher = node.client("watcher");
    send(&watcher, "other", 1, 1);
    let replicas = [node.replica("r1"), node.replica("r2"), node.replica("r3")];

    send(&c1, "fresh", 9, 3);

    for r in &replicas {
        assert_eq!(r.states(), vec![FormState::new("fresh", 9, 3)]);
    }
    assert!(c1.sent().is_empty());
    assert!(watcher.sent().is_empty());
}

#[test]
fn forms_are_independent() {
    let node = Node::new();
    let c1 = node.client("c1");

    send(&c1, "a", 1, 100);
    send(&c1, "b", 2, 1);
    send(&c1, "b", 3, 2);

    assert_eq!(node.store.get("a"), Some(FormState::new("a", 1, 100)));
    assert_eq!(node.store.get("b"), Some(FormState::new("b", 3, 2)));
    assert_eq!(node.store.len(), 2);
}

#[test]
fn closed_client_is_forgotten_everywhere() {
    let node = Node::new();
    let c1 = node.client("c1");
    let leaver = node.client("leaver");

    send(&leaver, "a", 1, 1);
    send(&leaver, "b", 1, 1);
    leaver.close();

    send(&c1, "a", 2, 2);
    send(&c1, "b", 2, 2);

    assert!(leaver.sent().is_empty());
    for form in ["a", "b"] {
        let attached = node.registry.clients_for(form);
        assert_eq!(attached.len(), 1);
        assert_eq!(attached[0].id(), c1.id());
    }
}

#[test]
fn replicas_converge_by_exchanging_broadcasts() {
    // Two nodes, each registering the other as a replica through a
    // recording connection; frames are shuttled by hand.
    let a = Node::new();
    let b = Node::new();
    let a_to_b = a.replica("a->b");
    let b_to_a = b.replica("b->a");
    let a_from_b: ConnectionRef = Arc::new(MemoryConnection::new("b@a"));
    let b_from_a: ConnectionRef = Arc::new(MemoryConnection::new("a@b"));

    let ca = a.client("ca");
    let cb = b.client("cb");
    send(&ca, "f", 1, 10);
    send(&cb, "f", 2, 20);

    for _ in 0..4 {
        for state in a_to_b.take_sent().iter().filter_map(|e| e.payload().ok()) {
            b.store.update(state, &b_from_a);
        }
        for state in b_to_a.take_sent().iter().filter_map(|e| e.payload().ok()) {
            a.store.update(state, &a_from_b);
        }
    }

    assert_eq!(a.store.get("f"), Some(FormState::new("f", 2, 20)));
    assert_eq!(b.store.get("f"), Some(FormState::new("f", 2, 20)));
    assert!(a_to_b.sent().is_empty());
    assert!(b_to_a.sent().is_empty());
}

proptest! {
    #[test]
    fn final_state_is_first_update_with_max_ts(
        updates in prop::collection::vec((0u64..16, 0u64..8, 0usize..3), 1..40)
    ) {
        let node = Node::new();
        let clients = [node.client("c0"), node.client("c1"), node.client("c2")];

        let mut outcomes = Vec::new();
        for (state, ts, who) in &updates {
            let origin: ConnectionRef = clients[*who].clone();
            outcomes.push(node.store.update(FormState::new("f", *state, *ts), &origin));
        }

        let max_ts = updates.iter().map(|(_, ts, _)| *ts).max().unwrap();
        let (winner, _, _) = updates.iter().find(|(_, ts, _)| *ts == max_ts).unwrap();

        prop_assert_eq!(node.store.get("f"), Some(FormState::new("f", *winner, max_ts)));
        prop_assert_eq!(outcomes[0], UpdateOutcome::Created);
        prop_assert!(outcomes[1..].iter().all(|o| *o != UpdateOutcome::Created));
    }

    #[test]
    fn timestamps_never_go_backwards(
        updates in prop::collection::vec((0u64..4, 0u64..100), 1..40)
    ) {
        let node = Node::new();
        let client: ConnectionRef = node.client("c");

        let mut last = 0;
        for (state, ts) in updates {
            node.store.update(FormState::new("f", state, ts), &client);
            let stored = node.store.get("f").unwrap().ts;
            prop_assert!(stored >= last);
            last = stored;
        }
    }
}
