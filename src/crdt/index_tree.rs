//! Ordered tree of sized nodes, addressable by a flat index.
//!
//! An `IndexTree` holds text nodes (leaves carrying a string) and element
//! nodes (carrying a tag and children). Every element contributes an open
//! and a close token to the flat index, and every character of text one
//! unit, so an element's padded size is its content size plus 2:
//!
//! ```text
//!     0   1 2 3    4   5 6 7    8
//! <r> <p> a b </p> <p> c d </p> </r>
//! ```
//!
//! Index 0 is the first position inside the root. Removed nodes stay in
//! their parent's child list but contribute nothing to sizes or indexes.
//!
//! Nodes live in an arena and are addressed by `NodeIdx`; the payload `T`
//! carries whatever the owner needs per node (ids, tickets, attributes).
//!
//! Complexity:
//! - index_of / tree_pos_to_path: O(depth x fanout)
//! - find_tree_pos / path_to_tree_pos: O(depth x fanout)
//! - tokens_between: O(nodes overlapping the range)

use smallvec::SmallVec;

use crate::error::Error;
use crate::error::Result;

/// Arena handle of a node.
pub type NodeIdx = u32;

/// What a node holds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// A run of text.
    Text(String),
    /// An element with the given tag.
    Element(String),
}

#[derive(Clone, Debug)]
pub struct IndexNode<T> {
    kind: NodeKind,
    /// Text length in characters, 0 for elements.
    text_len: usize,
    value: T,
    parent: Option<NodeIdx>,
    children: Vec<NodeIdx>,
    /// Text: its length. Element: padded sizes of its live children.
    size: usize,
    removed: bool,
}

/// A position in the tree: inside `node` at `offset`.
///
/// For an element the offset counts live children; for text it counts
/// characters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreePos {
    pub node: NodeIdx,
    pub offset: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Start,
    End,
    Text,
}

/// A token overlapping a range, as reported by `tokens_between`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Token {
    pub node: NodeIdx,
    pub kind: TokenKind,
    /// For a start token: the element's end token lies outside the range.
    pub unclosed: bool,
    /// Flat index where the token (or the overlapped part of a text) begins.
    pub index: usize,
    /// Number of flat index units the token covers within the range.
    pub len: usize,
}

#[derive(Clone, Debug)]
pub struct IndexTree<T> {
    nodes: Vec<Option<IndexNode<T>>>,
    free: Vec<NodeIdx>,
    root: NodeIdx,
}

fn char_len(text: &str) -> usize {
    return text.chars().count();
}

impl<T> IndexTree<T> {
    /// Create a tree whose root is an element.
    pub fn new(tag: &str, value: T) -> IndexTree<T> {
        let root = IndexNode {
            kind: NodeKind::Element(tag.to_string()),
            text_len: 0,
            value,
            parent: None,
            children: Vec::new(),
            size: 0,
            removed: false,
        };
        return IndexTree {
            nodes: vec![Some(root)],
            free: Vec::new(),
            root: 0,
        };
    }

    pub fn root(&self) -> NodeIdx {
        return self.root;
    }

    #[inline]
    fn node(&self, idx: NodeIdx) -> &IndexNode<T> {
        return match &self.nodes[idx as usize] {
            Some(node) => node,
            None => unreachable!("dangling tree index {}", idx),
        };
    }

    #[inline]
    fn node_mut(&mut self, idx: NodeIdx) -> &mut IndexNode<T> {
        return match &mut self.nodes[idx as usize] {
            Some(node) => node,
            None => unreachable!("dangling tree index {}", idx),
        };
    }

    /// Allocate a detached node.
    pub fn alloc(&mut self, kind: NodeKind, value: T) -> NodeIdx {
        let text_len = match &kind {
            NodeKind::Text(text) => char_len(text),
            NodeKind::Element(_) => 0,
        };
        let node = IndexNode {
            kind,
            text_len,
            value,
            parent: None,
            children: Vec::new(),
            size: text_len,
            removed: false,
        };
        if let Some(idx) = self.free.pop() {
            self.nodes[idx as usize] = Some(node);
            return idx;
        }
        self.nodes.push(Some(node));
        return (self.nodes.len() - 1) as NodeIdx;
    }

    // =========================================================================
    // Node accessors
    // =========================================================================

    pub fn value(&self, idx: NodeIdx) -> &T {
        return &self.node(idx).value;
    }

    pub fn value_mut(&mut self, idx: NodeIdx) -> &mut T {
        return &mut self.node_mut(idx).value;
    }

    pub fn kind(&self, idx: NodeIdx) -> &NodeKind {
        return &self.node(idx).kind;
    }

    pub fn is_text(&self, idx: NodeIdx) -> bool {
        return matches!(self.node(idx).kind, NodeKind::Text(_));
    }

    pub fn is_removed(&self, idx: NodeIdx) -> bool {
        return self.node(idx).removed;
    }

    /// Content size: characters for text, live children's padded sizes for
    /// elements.
    pub fn size(&self, idx: NodeIdx) -> usize {
        return self.node(idx).size;
    }

    /// Size including the open and close tokens of an element.
    pub fn padded_size(&self, idx: NodeIdx) -> usize {
        let node = self.node(idx);
        if node.removed {
            return 0;
        }
        return match node.kind {
            NodeKind::Text(_) => node.size,
            NodeKind::Element(_) => node.size + 2,
        };
    }

    pub fn parent(&self, idx: NodeIdx) -> Option<NodeIdx> {
        return self.node(idx).parent;
    }

    /// Every child, removed ones included.
    pub fn all_children(&self, idx: NodeIdx) -> &[NodeIdx] {
        return &self.node(idx).children;
    }

    /// Live children.
    pub fn children(&self, idx: NodeIdx) -> impl Iterator<Item = NodeIdx> + '_ {
        return self
            .node(idx)
            .children
            .iter()
            .copied()
            .filter(|child| !self.node(*child).removed);
    }

    pub fn has_text_child(&self, idx: NodeIdx) -> bool {
        return self.children(idx).any(|child| self.is_text(child));
    }

    /// Position of `child` in its parent's full child list.
    pub fn child_position(&self, parent: NodeIdx, child: NodeIdx) -> Option<usize> {
        return self.node(parent).children.iter().position(|c| *c == child);
    }

    /// Offset of `child` among its parent's live children. A removed child
    /// reports the number of live children before it.
    pub fn find_offset(&self, parent: NodeIdx, child: NodeIdx) -> Result<usize> {
        let children = &self.node(parent).children;
        let position = children
            .iter()
            .position(|c| *c == child)
            .ok_or_else(|| Error::InvalidPosition(format!("{} is not a child of {}", child, parent)))?;
        return Ok(children[..position]
            .iter()
            .filter(|c| !self.node(**c).removed)
            .count());
    }

    /// Sum of the padded sizes of the first `offset` live children.
    fn left_siblings_size(&self, parent: NodeIdx, offset: usize) -> usize {
        return self
            .children(parent)
            .take(offset)
            .map(|child| self.padded_size(child))
            .sum();
    }

    // =========================================================================
    // Structure
    // =========================================================================

    /// Add `delta` to the sizes from `start` upward, stopping after the first
    /// removed node since it contributes nothing to its parent.
    fn propagate(&mut self, start: Option<NodeIdx>, delta: isize) {
        let mut current = start;
        while let Some(idx) = current {
            let node = self.node_mut(idx);
            node.size = node.size.wrapping_add_signed(delta);
            if node.removed {
                break;
            }
            current = node.parent;
        }
    }

    /// Insert a detached `child` into `parent` at `position` of the full
    /// child list.
    pub fn insert_at(&mut self, parent: NodeIdx, child: NodeIdx, position: usize) -> Result<()> {
        if self.is_text(parent) {
            return Err(Error::InvalidPosition("text nodes have no children".to_string()));
        }
        let len = self.node(parent).children.len();
        if position > len {
            return Err(Error::IndexOutOfRange { index: position, len });
        }
        self.node_mut(parent).children.insert(position, child);
        self.node_mut(child).parent = Some(parent);
        let padded = self.padded_size(child) as isize;
        if padded != 0 {
            self.propagate(Some(parent), padded);
        }
        return Ok(());
    }

    /// Insert a detached `child` right after `left`, or first when `left`
    /// is `parent` itself.
    pub fn insert_after(&mut self, parent: NodeIdx, child: NodeIdx, left: NodeIdx) -> Result<()> {
        if left == parent {
            return self.insert_at(parent, child, 0);
        }
        let position = self
            .child_position(parent, left)
            .ok_or_else(|| Error::InvalidPosition(format!("{} is not a child of {}", left, parent)))?;
        return self.insert_at(parent, child, position + 1);
    }

    /// Append a detached `child` to `parent`.
    pub fn append(&mut self, parent: NodeIdx, child: NodeIdx) -> Result<()> {
        let len = self.node(parent).children.len();
        return self.insert_at(parent, child, len);
    }

    /// Detach `child` from its parent.
    pub fn detach(&mut self, child: NodeIdx) {
        let Some(parent) = self.node(child).parent else {
            return;
        };
        let padded = self.padded_size(child) as isize;
        self.node_mut(parent).children.retain(|c| *c != child);
        self.node_mut(child).parent = None;
        if padded != 0 {
            self.propagate(Some(parent), -padded);
        }
    }

    /// Mark a node removed. Returns false if it already was.
    pub fn set_removed(&mut self, idx: NodeIdx) -> bool {
        if self.node(idx).removed {
            return false;
        }
        let padded = self.padded_size(idx) as isize;
        self.node_mut(idx).removed = true;
        let parent = self.node(idx).parent;
        if padded != 0 {
            self.propagate(parent, -padded);
        }
        return true;
    }

    /// Split a text node at character `offset`. The right part becomes a
    /// new sibling carrying `value`. Returns `None` when the offset is on an
    /// edge.
    pub fn split_text(&mut self, idx: NodeIdx, offset: usize, value: T) -> Result<Option<NodeIdx>> {
        let len = self.node(idx).text_len;
        if offset > len {
            return Err(Error::InvalidPosition(format!(
                "split offset {} past text of length {}",
                offset, len
            )));
        }
        if offset == 0 || offset == len {
            return Ok(None);
        }
        let parent = self
            .node(idx)
            .parent
            .ok_or_else(|| Error::InvalidPosition("cannot split a detached text".to_string()))?;

        let right_text = match &mut self.node_mut(idx).kind {
            NodeKind::Text(text) => {
                let at = text
                    .char_indices()
                    .nth(offset)
                    .map(|(at, _)| at)
                    .unwrap_or(text.len());
                text.split_off(at)
            }
            NodeKind::Element(_) => {
                return Err(Error::InvalidPosition("split_text on an element".to_string()));
            }
        };
        let removed = self.node(idx).removed;
        {
            let node = self.node_mut(idx);
            node.text_len = offset;
            node.size = offset;
        }

        let right = self.alloc(NodeKind::Text(right_text), value);
        self.node_mut(right).removed = removed;
        let position = self.child_position(parent, idx).unwrap_or(0);
        // Sizes are unchanged: the left part shrank by what the right holds.
        self.node_mut(parent).children.insert(position + 1, right);
        self.node_mut(right).parent = Some(parent);
        return Ok(Some(right));
    }

    /// Split an element: children from `position` onward (full list) move
    /// to a new element carrying `value`, placed in the grandparent right
    /// after `left_in_parent`.
    pub fn split_element(
        &mut self,
        idx: NodeIdx,
        position: usize,
        value: T,
        left_in_parent: NodeIdx,
    ) -> Result<NodeIdx> {
        let grandparent = self
            .node(idx)
            .parent
            .ok_or_else(|| Error::Unsupported("cannot split the root element".to_string()))?;
        let tag = match &self.node(idx).kind {
            NodeKind::Element(tag) => tag.clone(),
            NodeKind::Text(_) => {
                return Err(Error::InvalidPosition("split_element on a text".to_string()));
            }
        };
        let len = self.node(idx).children.len();
        if position > len {
            return Err(Error::IndexOutOfRange { index: position, len });
        }

        let moved: Vec<NodeIdx> = self.node_mut(idx).children.split_off(position);
        let moved_size: usize = moved.iter().map(|child| self.padded_size(*child)).sum();
        let removed = self.node(idx).removed;

        self.node_mut(idx).size -= moved_size;
        if !removed {
            self.propagate(self.node(idx).parent, -(moved_size as isize));
        }

        let clone = self.alloc(NodeKind::Element(tag), value);
        for child in moved.iter().copied() {
            self.node_mut(child).parent = Some(clone);
        }
        {
            let node = self.node_mut(clone);
            node.children = moved;
            node.size = moved_size;
            node.removed = removed;
        }
        self.insert_after(grandparent, clone, left_in_parent)?;
        return Ok(clone);
    }

    /// Release a detached subtree's slots.
    pub fn free_subtree(&mut self, idx: NodeIdx) {
        let mut stack: SmallVec<[NodeIdx; 16]> = SmallVec::new();
        stack.push(idx);
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes[current as usize].take() {
                stack.extend(node.children);
                self.free.push(current);
            }
        }
    }

    /// Every node of the subtree rooted at `idx`, pre-order, removed nodes
    /// included.
    pub fn subtree(&self, idx: NodeIdx) -> Vec<NodeIdx> {
        let mut out = Vec::new();
        let mut stack: SmallVec<[NodeIdx; 16]> = SmallVec::new();
        stack.push(idx);
        while let Some(current) = stack.pop() {
            out.push(current);
            for child in self.node(current).children.iter().rev() {
                stack.push(*child);
            }
        }
        return out;
    }

    // =========================================================================
    // Index conversion
    // =========================================================================

    /// Find the position of flat `index`. With `prefer_text`, a position
    /// on the edge of a text node resolves inside the text.
    pub fn find_tree_pos(&self, index: usize, prefer_text: bool) -> Result<TreePos> {
        let root_size = self.size(self.root);
        if index > root_size {
            return Err(Error::IndexOutOfRange {
                index,
                len: root_size,
            });
        }

        let mut node = self.root;
        let mut index = index;
        loop {
            if self.is_text(node) {
                return Ok(TreePos {
                    node,
                    offset: index,
                });
            }

            let mut offset = 0;
            let mut pos = 0;
            let mut descend = None;
            for child in self.children(node) {
                let padded = self.padded_size(child);
                if prefer_text && self.is_text(child) && self.size(child) >= index - pos {
                    descend = Some((child, index - pos));
                    break;
                }
                if index == pos {
                    return Ok(TreePos { node, offset });
                }
                if !prefer_text && padded == index - pos {
                    return Ok(TreePos {
                        node,
                        offset: offset + 1,
                    });
                }
                if padded > index - pos {
                    // Step over the open token.
                    descend = Some((child, index - pos - 1));
                    break;
                }
                pos += padded;
                offset += 1;
            }

            match descend {
                Some((child, child_index)) => {
                    node = child;
                    index = child_index;
                }
                None => return Ok(TreePos { node, offset }),
            }
        }
    }

    /// Flat index of a position.
    pub fn index_of(&self, pos: &TreePos) -> Result<usize> {
        let mut node = pos.node;
        let mut size = 0;
        let mut depth = 1;

        if self.is_text(node) {
            size += pos.offset;
            let parent = self
                .parent(node)
                .ok_or_else(|| Error::InvalidPosition("detached text".to_string()))?;
            let offset = self.find_offset(parent, node)?;
            size += self.left_siblings_size(parent, offset);
            node = parent;
        } else {
            size += self.left_siblings_size(node, pos.offset);
        }

        while let Some(parent) = self.parent(node) {
            let offset = self.find_offset(parent, node)?;
            size += self.left_siblings_size(parent, offset);
            depth += 1;
            node = parent;
        }
        return Ok(size + depth - 1);
    }

    /// Path of a position: child offsets from the root, ending with a
    /// character offset when the last element holds text.
    pub fn tree_pos_to_path(&self, pos: &TreePos) -> Result<Vec<usize>> {
        let mut path = Vec::new();
        let mut node = pos.node;

        if self.is_text(node) {
            let parent = self
                .parent(node)
                .ok_or_else(|| Error::InvalidPosition("detached text".to_string()))?;
            let offset = self.find_offset(parent, node)?;
            path.push(self.left_siblings_size(parent, offset) + pos.offset);
            node = parent;
        } else if self.has_text_child(node) {
            path.push(self.left_siblings_size(node, pos.offset));
        } else {
            path.push(pos.offset);
        }

        while let Some(parent) = self.parent(node) {
            path.push(self.find_offset(parent, node)?);
            node = parent;
        }
        path.reverse();
        return Ok(path);
    }

    /// Position of a path.
    pub fn path_to_tree_pos(&self, path: &[usize]) -> Result<TreePos> {
        let Some((&last, init)) = path.split_last() else {
            return Err(Error::InvalidPath(path.to_vec()));
        };

        let mut node = self.root;
        for &step in init {
            node = self
                .children(node)
                .nth(step)
                .ok_or_else(|| Error::InvalidPath(path.to_vec()))?;
        }

        if self.has_text_child(node) {
            if self.size(node) < last {
                return Err(Error::InvalidPath(path.to_vec()));
            }
            let mut remaining = last;
            for child in self.children(node) {
                if self.size(child) >= remaining {
                    return Ok(TreePos {
                        node: child,
                        offset: remaining,
                    });
                }
                remaining -= self.padded_size(child);
            }
            return Ok(TreePos { node, offset: 0 });
        }

        if self.children(node).count() < last {
            return Err(Error::InvalidPath(path.to_vec()));
        }
        return Ok(TreePos { node, offset: last });
    }

    // =========================================================================
    // Ranges
    // =========================================================================

    /// Tokens overlapping `[from, to)`, in document order.
    pub fn tokens_between(&self, from: usize, to: usize) -> Result<Vec<Token>> {
        let root_size = self.size(self.root);
        if from > to {
            return Err(Error::InvalidPosition(format!("from {} is after to {}", from, to)));
        }
        if to > root_size {
            return Err(Error::IndexOutOfRange {
                index: to,
                len: root_size,
            });
        }
        let mut tokens = Vec::new();
        self.collect_tokens(self.root, from, to, 0, &mut tokens);
        return Ok(tokens);
    }

    /// `base` is the flat index of the first position inside `node`.
    fn collect_tokens(&self, node: NodeIdx, from: usize, to: usize, base: usize, out: &mut Vec<Token>) {
        if from == to {
            return;
        }
        let mut pos = 0;
        for child in self.children(node) {
            let padded = self.padded_size(child);
            if from < pos + padded && pos < to {
                if self.is_text(child) {
                    let start = from.saturating_sub(pos);
                    let end = (to - pos).min(padded);
                    out.push(Token {
                        node: child,
                        kind: TokenKind::Text,
                        unclosed: false,
                        index: base + pos + start,
                        len: end - start,
                    });
                } else {
                    let size = self.size(child);
                    let start_contained = from <= pos;
                    let end_contained = to >= pos + padded;
                    if start_contained {
                        out.push(Token {
                            node: child,
                            kind: TokenKind::Start,
                            unclosed: !end_contained,
                            index: base + pos,
                            len: 1,
                        });
                    }
                    let child_from = from.saturating_sub(pos + 1).min(size);
                    let child_to = to.saturating_sub(pos + 1).min(size);
                    self.collect_tokens(child, child_from, child_to, base + pos + 1, out);
                    if end_contained {
                        out.push(Token {
                            node: child,
                            kind: TokenKind::End,
                            unclosed: false,
                            index: base + pos + padded - 1,
                            len: 1,
                        });
                    }
                }
            }
            pos += padded;
        }
    }
}
