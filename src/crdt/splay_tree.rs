//! Weighted splay tree for positional indexing.
//!
//! Sequences that mutate locally (array nodes, text runs) need two lookups:
//! "which node holds visible position `i`?" and "what is the visible
//! position of this node?". Both are answered by a splay tree whose
//! in-order traversal is the sequence order and whose nodes cache a
//! `weight`: their own visible length plus the weight of both subtrees.
//!
//! Nodes live in an arena owned by the tree and are addressed by
//! generational `SplayHandle`s, so owners can keep a handle next to their
//! own node without any reference cycles. Freed slots are reused with a
//! bumped generation, which makes stale handles detectable.
//!
//! # Complexity
//!
//! - find / insert_after / delete / set_len: O(log n) amortized
//! - index_of: O(depth), no restructuring
//! - delete_range: O(log n + k) for k removed nodes

use smallvec::SmallVec;

use crate::error::Error;
use crate::error::Result;

const NONE: u32 = u32::MAX;

/// A stable, generational reference to a node in a `SplayTree`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SplayHandle {
    index: u32,
    generation: u32,
}

#[derive(Clone, Debug)]
struct Slot<V> {
    generation: u32,
    node: Option<SplayNode<V>>,
}

#[derive(Clone, Debug)]
struct SplayNode<V> {
    value: V,
    /// Visible length of this node alone.
    len: usize,
    /// Visible length of this node and both subtrees.
    weight: usize,
    parent: u32,
    left: u32,
    right: u32,
}

/// A splay tree mapping visible positions to owner values.
///
/// `V` is usually a small `Copy` handle into the owner's own arena.
#[derive(Clone, Debug)]
pub struct SplayTree<V> {
    slots: Vec<Slot<V>>,
    free: Vec<u32>,
    root: u32,
    count: usize,
}

impl<V: Copy> Default for SplayTree<V> {
    fn default() -> Self {
        return Self::new();
    }
}

impl<V: Copy> SplayTree<V> {
    /// Create an empty tree.
    pub fn new() -> SplayTree<V> {
        return SplayTree {
            slots: Vec::new(),
            free: Vec::new(),
            root: NONE,
            count: 0,
        };
    }

    /// Total visible length of every node in the tree.
    pub fn len(&self) -> usize {
        return self.weight(self.root);
    }

    /// True if the tree holds no nodes at all.
    pub fn is_empty(&self) -> bool {
        return self.root == NONE;
    }

    /// Number of nodes, including zero-length ones.
    pub fn node_count(&self) -> usize {
        return self.count;
    }

    /// The value stored at `handle`, if the handle is still live.
    pub fn value(&self, handle: SplayHandle) -> Option<V> {
        let idx = self.resolve(handle).ok()?;
        return Some(self.node(idx).value);
    }

    /// The visible length of the node at `handle`.
    pub fn len_of(&self, handle: SplayHandle) -> Result<usize> {
        let idx = self.resolve(handle)?;
        return Ok(self.node(idx).len);
    }

    /// Append a node at the end of the sequence.
    pub fn insert(&mut self, value: V, len: usize) -> SplayHandle {
        if self.root == NONE {
            let idx = self.alloc(value, len);
            self.root = idx;
            return self.handle(idx);
        }
        let mut last = self.root;
        while self.node(last).right != NONE {
            last = self.node(last).right;
        }
        return self.insert_after_idx(Some(last), value, len);
    }

    /// Insert a node directly after `target`, or at the front when `target`
    /// is `None`. The new node becomes the root.
    pub fn insert_after(
        &mut self,
        target: Option<SplayHandle>,
        value: V,
        len: usize,
    ) -> Result<SplayHandle> {
        let target = match target {
            Some(handle) => Some(self.resolve(handle)?),
            None => None,
        };
        return Ok(self.insert_after_idx(target, value, len));
    }

    fn insert_after_idx(&mut self, target: Option<u32>, value: V, len: usize) -> SplayHandle {
        let idx = self.alloc(value, len);
        match target {
            None => {
                let old_root = self.root;
                if old_root != NONE {
                    self.node_mut(idx).right = old_root;
                    self.node_mut(old_root).parent = idx;
                }
            }
            Some(target) => {
                self.splay_until(target, NONE);
                let target_right = self.node(target).right;
                self.node_mut(idx).right = target_right;
                if target_right != NONE {
                    self.node_mut(target_right).parent = idx;
                }
                self.node_mut(idx).left = target;
                self.node_mut(target).parent = idx;
                self.node_mut(target).right = NONE;
                self.update_weight(target);
            }
        }
        self.root = idx;
        self.update_weight(idx);
        return self.handle(idx);
    }

    /// Remove a node from the tree and return its value.
    pub fn delete(&mut self, handle: SplayHandle) -> Result<V> {
        let idx = self.resolve(handle)?;
        self.splay_until(idx, NONE);

        let left = self.node(idx).left;
        let right = self.node(idx).right;
        if left != NONE {
            self.node_mut(left).parent = NONE;
        }
        if right != NONE {
            self.node_mut(right).parent = NONE;
        }

        if left != NONE {
            // Splay the maximum of the left subtree to its top; it has no
            // right child afterwards, so the right subtree hangs there.
            let mut max = left;
            while self.node(max).right != NONE {
                max = self.node(max).right;
            }
            self.splay_until(max, NONE);
            self.node_mut(max).right = right;
            if right != NONE {
                self.node_mut(right).parent = max;
            }
            self.update_weight(max);
            self.root = max;
        } else {
            self.root = right;
        }

        return Ok(self.release(idx));
    }

    /// Remove every node strictly between `left` and `right` as one block.
    ///
    /// With `right == None` everything after `left` is removed. Returns the
    /// removed values in sequence order.
    pub fn delete_range(
        &mut self,
        left: SplayHandle,
        right: Option<SplayHandle>,
    ) -> Result<Vec<V>> {
        let left = self.resolve(left)?;
        let right = match right {
            Some(handle) => Some(self.resolve(handle)?),
            None => None,
        };

        match right {
            None => {
                self.splay_until(left, NONE);
            }
            Some(right) => {
                if right == left {
                    return Err(Error::InvalidPosition(
                        "range boundaries must differ".to_string(),
                    ));
                }
                self.splay_until(right, NONE);
                self.splay_until(left, right);
                if self.node(right).left != left {
                    return Err(Error::InvalidPosition(
                        "range boundaries out of order".to_string(),
                    ));
                }
            }
        }

        let block = self.node(left).right;
        self.node_mut(left).right = NONE;
        self.update_weight(left);
        if let Some(right) = right {
            self.update_weight(right);
        }

        let mut removed = Vec::new();
        if block != NONE {
            self.node_mut(block).parent = NONE;
            for idx in self.in_order(block) {
                removed.push(self.release(idx));
            }
        }
        return Ok(removed);
    }

    /// Find the node covering visible position `pos`.
    ///
    /// Returns the node's value and the offset of `pos` within it. A position
    /// on the boundary between two nodes resolves to the end of the left one,
    /// and position 0 resolves to the first node. The found node is splayed.
    pub fn find(&mut self, pos: usize) -> Result<(V, usize)> {
        if self.root == NONE || pos > self.len() {
            return Err(Error::IndexOutOfRange {
                index: pos,
                len: self.len(),
            });
        }

        let mut idx = self.root;
        let mut pos = pos;
        loop {
            let node = self.node(idx);
            let left_weight = self.weight(node.left);
            if node.left != NONE && pos <= left_weight {
                idx = node.left;
            } else if node.right != NONE && left_weight + node.len < pos {
                pos -= left_weight + node.len;
                idx = node.right;
            } else {
                pos -= left_weight;
                break;
            }
        }

        if pos > self.node(idx).len {
            return Err(Error::IndexOutOfRange {
                index: pos,
                len: self.node(idx).len,
            });
        }
        self.splay_until(idx, NONE);
        return Ok((self.node(idx).value, pos));
    }

    /// Visible position at which the node starts.
    pub fn index_of(&self, handle: SplayHandle) -> Result<usize> {
        let idx = self.resolve(handle)?;
        let mut index = self.weight(self.node(idx).left);
        let mut current = idx;
        let mut parent = self.node(current).parent;
        while parent != NONE {
            let parent_node = self.node(parent);
            if parent_node.right == current {
                index += self.weight(parent_node.left) + parent_node.len;
            }
            current = parent;
            parent = parent_node.parent;
        }
        return Ok(index);
    }

    /// Move the node to the root.
    pub fn splay(&mut self, handle: SplayHandle) -> Result<()> {
        let idx = self.resolve(handle)?;
        self.splay_until(idx, NONE);
        return Ok(());
    }

    /// Change a node's visible length and repair the cached weights.
    pub fn set_len(&mut self, handle: SplayHandle, len: usize) -> Result<()> {
        let idx = self.resolve(handle)?;
        self.node_mut(idx).len = len;
        let mut current = idx;
        while current != NONE {
            self.update_weight(current);
            current = self.node(current).parent;
        }
        self.splay_until(idx, NONE);
        return Ok(());
    }

    /// All values in sequence order.
    pub fn values(&self) -> Vec<V> {
        if self.root == NONE {
            return Vec::new();
        }
        return self
            .in_order(self.root)
            .into_iter()
            .map(|idx| self.node(idx).value)
            .collect();
    }

    // =========================================================================
    // Arena
    // =========================================================================

    fn alloc(&mut self, value: V, len: usize) -> u32 {
        let node = SplayNode {
            value,
            len,
            weight: len,
            parent: NONE,
            left: NONE,
            right: NONE,
        };
        self.count += 1;
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize].node = Some(node);
            return idx;
        }
        let idx = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        return idx;
    }

    fn release(&mut self, idx: u32) -> V {
        let slot = &mut self.slots[idx as usize];
        let node = slot.node.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(idx);
        self.count -= 1;
        // Only live indices reach here.
        return match node {
            Some(node) => node.value,
            None => unreachable!("released an empty slot"),
        };
    }

    fn handle(&self, idx: u32) -> SplayHandle {
        return SplayHandle {
            index: idx,
            generation: self.slots[idx as usize].generation,
        };
    }

    fn resolve(&self, handle: SplayHandle) -> Result<u32> {
        match self.slots.get(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation && slot.node.is_some() => {
                return Ok(handle.index);
            }
            _ => {
                return Err(Error::NodeNotFound(format!("splay node {:?}", handle)));
            }
        }
    }

    #[inline]
    fn node(&self, idx: u32) -> &SplayNode<V> {
        return match &self.slots[idx as usize].node {
            Some(node) => node,
            None => unreachable!("dangling splay index {}", idx),
        };
    }

    #[inline]
    fn node_mut(&mut self, idx: u32) -> &mut SplayNode<V> {
        return match &mut self.slots[idx as usize].node {
            Some(node) => node,
            None => unreachable!("dangling splay index {}", idx),
        };
    }

    #[inline]
    fn weight(&self, idx: u32) -> usize {
        if idx == NONE {
            return 0;
        }
        return self.node(idx).weight;
    }

    fn in_order(&self, top: u32) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.count);
        let mut stack: SmallVec<[u32; 32]> = SmallVec::new();
        let mut current = top;
        while current != NONE || !stack.is_empty() {
            while current != NONE {
                stack.push(current);
                current = self.node(current).left;
            }
            if let Some(idx) = stack.pop() {
                out.push(idx);
                current = self.node(idx).right;
            }
        }
        return out;
    }

    // =========================================================================
    // Rotations
    // =========================================================================

    #[inline]
    fn update_weight(&mut self, idx: u32) {
        let node = self.node(idx);
        let weight = node.len + self.weight(node.left) + self.weight(node.right);
        self.node_mut(idx).weight = weight;
    }

    /// Right rotation: lift the left child of `idx` above it.
    fn rotate_right(&mut self, idx: u32) {
        let left = self.node(idx).left;
        if left == NONE {
            return;
        }
        let parent = self.node(idx).parent;
        let left_right = self.node(left).right;

        self.node_mut(left).parent = parent;
        self.node_mut(left).right = idx;
        self.node_mut(idx).parent = left;
        self.node_mut(idx).left = left_right;
        if left_right != NONE {
            self.node_mut(left_right).parent = idx;
        }

        if parent == NONE {
            self.root = left;
        } else if self.node(parent).left == idx {
            self.node_mut(parent).left = left;
        } else {
            self.node_mut(parent).right = left;
        }

        self.update_weight(idx);
        self.update_weight(left);
    }

    /// Left rotation: lift the right child of `idx` above it.
    fn rotate_left(&mut self, idx: u32) {
        let right = self.node(idx).right;
        if right == NONE {
            return;
        }
        let parent = self.node(idx).parent;
        let right_left = self.node(right).left;

        self.node_mut(right).parent = parent;
        self.node_mut(right).left = idx;
        self.node_mut(idx).parent = right;
        self.node_mut(idx).right = right_left;
        if right_left != NONE {
            self.node_mut(right_left).parent = idx;
        }

        if parent == NONE {
            self.root = right;
        } else if self.node(parent).left == idx {
            self.node_mut(parent).left = right;
        } else {
            self.node_mut(parent).right = right;
        }

        self.update_weight(idx);
        self.update_weight(right);
    }

    /// Splay `idx` upward until its parent is `top` (`NONE` for the root).
    fn splay_until(&mut self, idx: u32, top: u32) {
        while self.node(idx).parent != top {
            let parent = self.node(idx).parent;
            let grandparent = self.node(parent).parent;
            let is_left_child = self.node(parent).left == idx;

            if grandparent == top {
                // Zig
                if is_left_child {
                    self.rotate_right(parent);
                } else {
                    self.rotate_left(parent);
                }
                continue;
            }

            let parent_is_left = self.node(grandparent).left == parent;
            if is_left_child == parent_is_left {
                // Zig-zig
                if is_left_child {
                    self.rotate_right(grandparent);
                    self.rotate_right(parent);
                } else {
                    self.rotate_left(grandparent);
                    self.rotate_left(parent);
                }
            } else {
                // Zig-zag
                if is_left_child {
                    self.rotate_right(parent);
                    self.rotate_left(grandparent);
                } else {
                    self.rotate_left(parent);
                    self.rotate_right(grandparent);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a tree of single-character nodes and return their handles.
    fn build(words: &[&'static str]) -> (SplayTree<&'static str>, Vec<SplayHandle>) {
        let mut tree = SplayTree::new();
        let handles = words.iter().map(|w| tree.insert(*w, w.len())).collect();
        return (tree, handles);
    }

    #[test]
    fn empty_tree() {
        let mut tree: SplayTree<u32> = SplayTree::new();
        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
        assert!(tree.find(0).is_err());
    }

    #[test]
    fn insert_and_find() {
        let (mut tree, _) = build(&["A", "BB", "CCC", "DDDD"]);
        assert_eq!(tree.len(), 10);
        assert_eq!(tree.values(), vec!["A", "BB", "CCC", "DDDD"]);

        assert_eq!(tree.find(0).unwrap(), ("A", 0));
        assert_eq!(tree.find(1).unwrap(), ("A", 1));
        assert_eq!(tree.find(2).unwrap(), ("BB", 1));
        assert_eq!(tree.find(3).unwrap(), ("BB", 2));
        assert_eq!(tree.find(4).unwrap(), ("CCC", 1));
        assert_eq!(tree.find(10).unwrap(), ("DDDD", 4));
        assert!(tree.find(11).is_err());
    }

    #[test]
    fn index_of_tracks_sequence() {
        let (mut tree, handles) = build(&["A", "BB", "CCC", "DDDD"]);
        assert_eq!(tree.index_of(handles[0]).unwrap(), 0);
        assert_eq!(tree.index_of(handles[1]).unwrap(), 1);
        assert_eq!(tree.index_of(handles[2]).unwrap(), 3);
        assert_eq!(tree.index_of(handles[3]).unwrap(), 6);

        tree.find(5).unwrap();
        assert_eq!(tree.index_of(handles[3]).unwrap(), 6);
    }

    #[test]
    fn insert_after_and_front() {
        let (mut tree, handles) = build(&["A", "C"]);
        tree.insert_after(Some(handles[0]), "B", 1).unwrap();
        tree.insert_after(None, "_", 1).unwrap();
        assert_eq!(tree.values(), vec!["_", "A", "B", "C"]);
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn set_len_updates_positions() {
        let (mut tree, handles) = build(&["A", "BB", "CCC"]);
        tree.set_len(handles[1], 0).unwrap();
        assert_eq!(tree.len(), 4);
        assert_eq!(tree.index_of(handles[2]).unwrap(), 1);
        assert_eq!(tree.find(2).unwrap(), ("CCC", 1));
    }

    #[test]
    fn delete_node() {
        let (mut tree, handles) = build(&["A", "BB", "CCC", "DDDD"]);
        assert_eq!(tree.delete(handles[1]).unwrap(), "BB");
        assert_eq!(tree.values(), vec!["A", "CCC", "DDDD"]);
        assert_eq!(tree.len(), 8);
        assert_eq!(tree.index_of(handles[2]).unwrap(), 1);

        // A stale handle is reported, even after its slot is reused.
        assert!(tree.delete(handles[1]).is_err());
        tree.insert("E", 1);
        assert!(tree.index_of(handles[1]).is_err());
    }

    #[test]
    fn delete_range_between() {
        let (mut tree, handles) = build(&["A", "BB", "CCC", "DDDD", "E"]);
        let removed = tree.delete_range(handles[0], Some(handles[3])).unwrap();
        assert_eq!(removed, vec!["BB", "CCC"]);
        assert_eq!(tree.values(), vec!["A", "DDDD", "E"]);
        assert_eq!(tree.len(), 6);
        assert_eq!(tree.index_of(handles[3]).unwrap(), 1);
        assert_eq!(tree.node_count(), 3);
    }

    #[test]
    fn delete_range_to_end() {
        let (mut tree, handles) = build(&["A", "BB", "CCC"]);
        let removed = tree.delete_range(handles[0], None).unwrap();
        assert_eq!(removed, vec!["BB", "CCC"]);
        assert_eq!(tree.values(), vec!["A"]);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn delete_range_adjacent_is_noop() {
        let (mut tree, handles) = build(&["A", "BB"]);
        let removed = tree.delete_range(handles[0], Some(handles[1])).unwrap();
        assert!(removed.is_empty());
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn delete_range_rejects_reversed_bounds() {
        let (mut tree, handles) = build(&["A", "BB", "CCC"]);
        assert!(tree.delete_range(handles[2], Some(handles[0])).is_err());
        assert!(tree.delete_range(handles[1], Some(handles[1])).is_err());
    }
}
