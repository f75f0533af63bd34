//! Property tests for the splay tree index law: after any sequence of
//! inserts and deletes, every node's index agrees with `find`.

use proptest::prelude::*;
use rustc_hash::FxHashMap;
use tandem::crdt::splay_tree::SplayHandle;
use tandem::crdt::splay_tree::SplayTree;

// =============================================================================
// Test helpers
// =============================================================================

#[derive(Clone, Debug)]
enum SplayOp {
    Insert { at_pct: f64, len: usize },
    Delete { at_pct: f64 },
    DeleteRange { from_pct: f64, span: usize, to_end: bool },
    Find { at_pct: f64 },
}

fn arbitrary_op() -> impl Strategy<Value = SplayOp> {
    prop_oneof![
        4 => (0.0..=1.0f64, 0usize..4).prop_map(|(at_pct, len)| SplayOp::Insert { at_pct, len }),
        2 => (0.0..=1.0f64).prop_map(|at_pct| SplayOp::Delete { at_pct }),
        1 => (0.0..=1.0f64, 1usize..5, any::<bool>())
            .prop_map(|(from_pct, span, to_end)| SplayOp::DeleteRange { from_pct, span, to_end }),
        2 => (0.0..=1.0f64).prop_map(|at_pct| SplayOp::Find { at_pct }),
    ]
}

/// The tree plus a plain model of the sequence: (value, len) per node.
struct Harness {
    tree: SplayTree<u32>,
    model: Vec<(u32, usize)>,
    handles: FxHashMap<u32, SplayHandle>,
    next: u32,
}

impl Harness {
    fn new() -> Harness {
        return Harness {
            tree: SplayTree::new(),
            model: Vec::new(),
            handles: FxHashMap::default(),
            next: 0,
        };
    }

    fn pick(&self, pct: f64) -> usize {
        return ((pct * self.model.len() as f64) as usize).min(self.model.len().saturating_sub(1));
    }

    fn apply(&mut self, op: &SplayOp) {
        match op {
            SplayOp::Insert { at_pct, len } => {
                let at = ((*at_pct * self.model.len() as f64) as usize).min(self.model.len());
                let target = match at {
                    0 => None,
                    _ => Some(self.handles[&self.model[at - 1].0]),
                };
                let value = self.next;
                self.next += 1;
                let handle = self.tree.insert_after(target, value, *len).unwrap();
                self.handles.insert(value, handle);
                self.model.insert(at, (value, *len));
            }
            SplayOp::Delete { at_pct } => {
                if self.model.is_empty() {
                    return;
                }
                let at = self.pick(*at_pct);
                let (value, _) = self.model.remove(at);
                let handle = self.handles.remove(&value).unwrap();
                assert_eq!(self.tree.delete(handle).unwrap(), value);
            }
            SplayOp::DeleteRange { from_pct, span, to_end } => {
                if self.model.is_empty() {
                    return;
                }
                let from = self.pick(*from_pct);
                let left = self.handles[&self.model[from].0];
                let (right, end) = match (*to_end, from + span) {
                    (false, to) if to < self.model.len() => (Some(self.handles[&self.model[to].0]), to),
                    _ => (None, self.model.len()),
                };
                let removed = self.tree.delete_range(left, right).unwrap();
                let expected: Vec<u32> = self.model.drain(from + 1..end).map(|(value, _)| value).collect();
                assert_eq!(removed, expected);
                for value in expected {
                    self.handles.remove(&value);
                }
            }
            SplayOp::Find { at_pct } => {
                let total = self.tree.len();
                let pos = (*at_pct * total as f64) as usize;
                if self.model.is_empty() {
                    assert!(self.tree.find(pos).is_err());
                    return;
                }
                let (value, offset) = self.tree.find(pos).unwrap();
                let start = self.tree.index_of(self.handles[&value]).unwrap();
                assert_eq!(start + offset, pos);
            }
        }
    }

    fn check(&self) {
        let values: Vec<u32> = self.model.iter().map(|(value, _)| *value).collect();
        assert_eq!(self.tree.values(), values);
        assert_eq!(self.tree.len(), self.model.iter().map(|(_, len)| len).sum::<usize>());
        assert_eq!(self.tree.node_count(), self.model.len());

        let mut start = 0;
        for (value, len) in self.model.iter() {
            assert_eq!(self.tree.index_of(self.handles[value]).unwrap(), start);
            start += len;
        }
    }
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// index_of(find(i)) is consistent with i at every step.
    #[test]
    fn index_law_holds(ops in prop::collection::vec(arbitrary_op(), 1..80)) {
        let mut harness = Harness::new();
        for op in &ops {
            harness.apply(op);
            harness.check();
        }
    }

    /// Every position of a tree of unit nodes resolves to the node before it.
    #[test]
    fn unit_nodes_resolve_left(count in 1usize..60) {
        let mut tree: SplayTree<u32> = SplayTree::new();
        let mut handles = Vec::new();
        for value in 0..count as u32 {
            handles.push(tree.insert(value, 1));
        }
        for pos in 1..=count {
            let (value, offset) = tree.find(pos).unwrap();
            prop_assert_eq!(value as usize, pos - 1);
            prop_assert_eq!(offset, 1);
            prop_assert_eq!(tree.index_of(handles[pos - 1]).unwrap(), pos - 1);
        }
        prop_assert!(tree.find(count + 1).is_err());
    }
}

#[test]
fn stale_handles_are_rejected() {
    let mut tree: SplayTree<u32> = SplayTree::new();
    let a = tree.insert(1, 1);
    let b = tree.insert(2, 1);
    tree.delete(b).unwrap();
    assert!(tree.delete(b).is_err());
    assert!(tree.index_of(b).is_err());
    assert!(tree.delete_range(a, Some(a)).is_err());
    assert_eq!(tree.values(), vec![1]);
}
