//! Replicas exchanging operations in different orders converge.
//!
//! Each replica executes its own operations locally, which stamps text
//! operations with the causal bound they saw. The stamped operations are
//! then delivered to the other replica.

use proptest::prelude::*;
use tandem::actor::ActorId;
use tandem::crdt::counter::Counter;
use tandem::crdt::element::Element;
use tandem::crdt::primitive::Primitive;
use tandem::crdt::primitives::LogicalClock;
use tandem::crdt::primitives::TimeTicket;
use tandem::crdt::root::CrdtRoot;
use tandem::operation::Operation;

// =============================================================================
// Test helpers
// =============================================================================

struct Replica {
    clock: LogicalClock,
    root: CrdtRoot,
    sent: Vec<Operation>,
}

impl Replica {
    fn new(label: &str) -> Replica {
        return Replica {
            clock: LogicalClock::new(ActorId::derive(label)),
            root: CrdtRoot::new(),
            sent: Vec::new(),
        };
    }

    fn local(&mut self, mut op: Operation) {
        op.execute(&mut self.root).unwrap();
        self.sent.push(op);
    }

    fn deliver(&mut self, ops: &[Operation]) {
        for op in ops {
            self.clock.observe(&op.executed_at());
            op.clone().execute(&mut self.root).unwrap();
        }
    }

    fn text_len(&mut self, text: &TimeTicket) -> usize {
        return self.root.element_mut(text).unwrap().as_text_mut().unwrap().len();
    }

    fn array_order(&self, array: &TimeTicket) -> Vec<TimeTicket> {
        return self
            .root
            .find_by_created_at(array)
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|element| element.created_at())
            .collect();
    }

    /// Replace the visible range `[from, to)` of a text with `content`.
    fn edit(&mut self, text: &TimeTicket, from: usize, to: usize, content: &str) {
        let (from_pos, to_pos) = self
            .root
            .element_mut(text)
            .unwrap()
            .as_text_mut()
            .unwrap()
            .index_range_to_pos_range(from, to)
            .unwrap();
        let executed_at = self.clock.tick();
        self.local(Operation::Edit {
            parent_created_at: *text,
            from: from_pos,
            to: to_pos,
            content: content.to_string(),
            attributes: None,
            created_at_map: None,
            executed_at,
        });
    }
}

/// Two replicas that share a document containing `value` under `key`.
fn shared(key: &str, make: impl Fn(TimeTicket) -> Element) -> (Replica, Replica, TimeTicket) {
    let mut alice = Replica::new("alice");
    let mut bob = Replica::new("bob");
    let created_at = alice.clock.tick();
    alice.local(Operation::Set {
        parent_created_at: TimeTicket::INITIAL,
        key: key.to_string(),
        value: make(created_at),
        executed_at: created_at,
    });
    let setup = std::mem::take(&mut alice.sent);
    bob.deliver(&setup);
    return (alice, bob, created_at);
}

fn exchange(alice: &mut Replica, bob: &mut Replica) {
    let from_alice = std::mem::take(&mut alice.sent);
    let from_bob = std::mem::take(&mut bob.sent);
    alice.deliver(&from_bob);
    bob.deliver(&from_alice);
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn concurrent_object_sets_pick_the_latest() {
    let mut alice = Replica::new("alice");
    let mut bob = Replica::new("bob");

    let a = alice.clock.tick();
    alice.local(Operation::Set {
        parent_created_at: TimeTicket::INITIAL,
        key: "k".to_string(),
        value: Element::primitive(a, "alice"),
        executed_at: a,
    });
    let b = bob.clock.tick();
    bob.local(Operation::Set {
        parent_created_at: TimeTicket::INITIAL,
        key: "k".to_string(),
        value: Element::primitive(b, "bob"),
        executed_at: b,
    });
    exchange(&mut alice, &mut bob);

    let expected = match a.after(&b) {
        true => "{\"k\":\"alice\"}",
        false => "{\"k\":\"bob\"}",
    };
    assert_eq!(alice.root.to_json(), expected);
    assert_eq!(bob.root.to_json(), expected);
    assert_eq!(alice.root.removed_element_len(), 1);
    assert_eq!(bob.root.removed_element_len(), 1);
}

#[test]
fn concurrent_array_inserts_at_the_front() {
    let (mut alice, mut bob, array) = shared("list", Element::array);

    for (replica, value) in [(&mut alice, "a"), (&mut bob, "b")] {
        let created_at = replica.clock.tick();
        replica.local(Operation::Add {
            parent_created_at: array,
            prev_created_at: TimeTicket::INITIAL,
            value: Element::primitive(created_at, value),
            executed_at: created_at,
        });
    }
    exchange(&mut alice, &mut bob);

    assert_eq!(alice.root.to_json(), bob.root.to_json());
    assert_eq!(alice.array_order(&array).len(), 2);
}

#[test]
fn concurrent_inserts_after_one_element_put_the_later_first() {
    let (mut alice, mut bob, array) = shared("list", Element::array);
    let mut prev_created_at = TimeTicket::INITIAL;
    for value in 1..=4 {
        let created_at = alice.clock.tick();
        alice.local(Operation::Add {
            parent_created_at: array,
            prev_created_at,
            value: Element::primitive(created_at, value),
            executed_at: created_at,
        });
        prev_created_at = created_at;
    }
    exchange(&mut alice, &mut bob);
    let order = alice.array_order(&array);

    let mut inserted = Vec::new();
    for (replica, value) in [(&mut alice, 10), (&mut bob, 20)] {
        let created_at = replica.clock.tick();
        replica.local(Operation::Add {
            parent_created_at: array,
            prev_created_at: order[1],
            value: Element::primitive(created_at, value),
            executed_at: created_at,
        });
        inserted.push((created_at, value));
    }
    exchange(&mut alice, &mut bob);

    let (later, earlier) = match inserted[0].0.after(&inserted[1].0) {
        true => (inserted[0], inserted[1]),
        false => (inserted[1], inserted[0]),
    };
    let expected_order = vec![order[0], order[1], later.0, earlier.0, order[2], order[3]];
    assert_eq!(alice.array_order(&array), expected_order);
    assert_eq!(bob.array_order(&array), expected_order);
    let expected = format!("{{\"list\":[1,2,{},{},3,4]}}", later.1, earlier.1);
    assert_eq!(alice.root.to_json(), expected);
    assert_eq!(bob.root.to_json(), expected);
}

#[test]
fn remove_wins_over_nothing_and_is_idempotent() {
    let (mut alice, mut bob, array) = shared("list", Element::array);
    let created_at = alice.clock.tick();
    alice.local(Operation::Add {
        parent_created_at: array,
        prev_created_at: TimeTicket::INITIAL,
        value: Element::primitive(created_at, 1),
        executed_at: created_at,
    });
    exchange(&mut alice, &mut bob);

    for replica in [&mut alice, &mut bob] {
        let executed_at = replica.clock.tick();
        replica.local(Operation::Remove {
            parent_created_at: array,
            created_at,
            executed_at,
        });
    }
    exchange(&mut alice, &mut bob);

    assert_eq!(alice.root.to_json(), "{\"list\":[]}");
    assert_eq!(bob.root.to_json(), "{\"list\":[]}");
    assert_eq!(alice.root.garbage_len(), bob.root.garbage_len());
}

#[test]
fn concurrent_counter_increases_commute() {
    let counter = |created_at| Element::counter(created_at, Counter::from_primitive(&Primitive::Integer(0)).unwrap());
    let (mut alice, mut bob, target) = shared("n", counter);

    for (replica, step) in [(&mut alice, 3), (&mut bob, -1)] {
        let executed_at = replica.clock.tick();
        replica.local(Operation::Increase {
            parent_created_at: target,
            value: Primitive::Integer(step),
            executed_at,
        });
    }
    exchange(&mut alice, &mut bob);

    assert_eq!(alice.root.to_json(), "{\"n\":2}");
    assert_eq!(bob.root.to_json(), "{\"n\":2}");
}

#[test]
fn insert_survives_a_concurrent_delete_around_it() {
    let (mut alice, mut bob, text) = shared("t", Element::text);
    alice.edit(&text, 0, 0, "abcd");
    exchange(&mut alice, &mut bob);

    alice.edit(&text, 1, 3, "");
    bob.edit(&text, 2, 2, "X");
    exchange(&mut alice, &mut bob);

    assert_eq!(alice.root.to_json(), "{\"t\":[{\"val\":\"aXd\"}]}");
    assert_eq!(bob.root.to_json(), alice.root.to_json());
}

#[test]
fn concurrent_inserts_at_one_position_keep_both() {
    let (mut alice, mut bob, text) = shared("t", Element::text);
    alice.edit(&text, 0, 0, "ab");
    exchange(&mut alice, &mut bob);

    alice.edit(&text, 1, 1, "1");
    bob.edit(&text, 1, 1, "2");
    exchange(&mut alice, &mut bob);

    let json = alice.root.to_json();
    assert_eq!(bob.root.to_json(), json);
    assert!(json == "{\"t\":[{\"val\":\"a12b\"}]}" || json == "{\"t\":[{\"val\":\"a21b\"}]}");
}

// =============================================================================
// Properties
// =============================================================================

#[derive(Clone, Debug)]
enum TextOp {
    Insert { at_pct: f64, content: String },
    Delete { at_pct: f64, span: usize },
}

fn arbitrary_text_op() -> impl Strategy<Value = TextOp> {
    prop_oneof![
        3 => (0.0..=1.0f64, "[a-z]{1,4}").prop_map(|(at_pct, content)| TextOp::Insert { at_pct, content }),
        2 => (0.0..=1.0f64, 1usize..4).prop_map(|(at_pct, span)| TextOp::Delete { at_pct, span }),
    ]
}

fn apply_text_op(replica: &mut Replica, text: &TimeTicket, op: &TextOp) {
    let len = replica.text_len(text);
    match op {
        TextOp::Insert { at_pct, content } => {
            let at = ((*at_pct * len as f64) as usize).min(len);
            replica.edit(text, at, at, content);
        }
        TextOp::Delete { at_pct, span } => {
            if len == 0 {
                return;
            }
            let from = ((*at_pct * len as f64) as usize).min(len - 1);
            replica.edit(text, from, (from + span).min(len), "");
        }
    }
}

#[derive(Clone, Debug)]
enum ArrayOp {
    Insert { at_pct: f64, value: i64 },
    Remove { at_pct: f64 },
}

fn arbitrary_array_op() -> impl Strategy<Value = ArrayOp> {
    prop_oneof![
        3 => (0.0..=1.0f64, any::<i64>()).prop_map(|(at_pct, value)| ArrayOp::Insert { at_pct, value }),
        1 => (0.0..=1.0f64).prop_map(|at_pct| ArrayOp::Remove { at_pct }),
    ]
}

fn apply_array_op(replica: &mut Replica, array: &TimeTicket, op: &ArrayOp) {
    let order = replica.array_order(array);
    match op {
        ArrayOp::Insert { at_pct, value } => {
            let at = ((*at_pct * order.len() as f64) as usize).min(order.len());
            let prev_created_at = match at {
                0 => TimeTicket::INITIAL,
                _ => order[at - 1],
            };
            let created_at = replica.clock.tick();
            replica.local(Operation::Add {
                parent_created_at: *array,
                prev_created_at,
                value: Element::primitive(created_at, *value),
                executed_at: created_at,
            });
        }
        ArrayOp::Remove { at_pct } => {
            if order.is_empty() {
                return;
            }
            let at = ((*at_pct * order.len() as f64) as usize).min(order.len() - 1);
            let executed_at = replica.clock.tick();
            replica.local(Operation::Remove {
                parent_created_at: *array,
                created_at: order[at],
                executed_at,
            });
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Concurrent text edits converge whichever side applies first.
    #[test]
    fn text_replicas_converge(
        rounds in prop::collection::vec(
            (prop::collection::vec(arbitrary_text_op(), 0..5), prop::collection::vec(arbitrary_text_op(), 0..5)),
            1..6,
        )
    ) {
        let (mut alice, mut bob, text) = shared("t", Element::text);
        for (alice_ops, bob_ops) in &rounds {
            for op in alice_ops {
                apply_text_op(&mut alice, &text, op);
            }
            for op in bob_ops {
                apply_text_op(&mut bob, &text, op);
            }
            exchange(&mut alice, &mut bob);
            prop_assert_eq!(alice.root.to_json(), bob.root.to_json());
            prop_assert_eq!(alice.text_len(&text), bob.text_len(&text));
        }
    }

    /// Concurrent array inserts and removes converge.
    #[test]
    fn array_replicas_converge(
        rounds in prop::collection::vec(
            (prop::collection::vec(arbitrary_array_op(), 0..5), prop::collection::vec(arbitrary_array_op(), 0..5)),
            1..6,
        )
    ) {
        let (mut alice, mut bob, array) = shared("list", Element::array);
        for (alice_ops, bob_ops) in &rounds {
            for op in alice_ops {
                apply_array_op(&mut alice, &array, op);
            }
            for op in bob_ops {
                apply_array_op(&mut bob, &array, op);
            }
            exchange(&mut alice, &mut bob);
            prop_assert_eq!(alice.root.to_json(), bob.root.to_json());
            prop_assert_eq!(alice.array_order(&array), bob.array_order(&array));
        }
    }
}
