//! Replicated tree for rich text and XML-like documents.
//!
//! # Structure
//!
//! The tree is an `IndexTree` whose nodes carry a `NodeMeta`: the node id,
//! its removal ticket, its attributes, and the lineage links that tie the
//! pieces of a split node together. Text nodes split like text runs do;
//! their pieces share the creation ticket and differ by offset. Element
//! nodes split when an edit asks for a `split_level`; the clone gets a
//! fresh id derived from the edit ticket and remembers that ticket in
//! `split_at`.
//!
//! # Positions
//!
//! A `TreePos` names a place by its parent and its left sibling, both by
//! id. Resolving it for an edit walks right past siblings the editor could
//! not have seen (positioned after the edit ticket), follows merged-away
//! parents into the element that absorbed their children, and follows split
//! clones created after the edit, so that every replica lands on the same
//! place whatever order the edits arrive in.
//!
//! # Deletion
//!
//! A range delete removes every text and element whose start token lies
//! inside the range and that the editor had seen. An element whose end
//! token lies outside the range is dissolved: its surviving children move
//! into the parent of the range start. Children the editor had not seen
//! are removed with an element removed whole and survive a dissolved one.
//!
//! # Ordering
//!
//! `CrdtTree` keeps its operations in ticket order over a base state and
//! rebuilds when one arrives behind a later one, in the way an append-only
//! log is replayed. Replicas holding the same operations hold the same
//! tree whatever order they arrived in.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use rustc_hash::FxHashSet;
use serde_json::Map;
use serde_json::Value;
use tracing::debug;
use tracing::warn;

use crate::actor::ActorId;
use crate::crdt::index_tree::IndexTree;
use crate::crdt::index_tree::NodeIdx;
use crate::crdt::index_tree::NodeKind;
use crate::crdt::index_tree::Token;
use crate::crdt::index_tree::TokenKind;
use crate::crdt::index_tree::TreePos as IndexPos;
use crate::crdt::primitives::ticket::latest_created_at;
use crate::crdt::primitives::ticket::record_created_at;
use crate::crdt::primitives::CreatedAtMap;
use crate::crdt::primitives::NodeId;
use crate::crdt::primitives::TimeTicket;
use crate::crdt::rht::escape_xml;
use crate::crdt::rht::Rht;
use crate::error::Error;
use crate::error::Result;

/// Id of a tree node: creation ticket plus offset for text pieces.
pub type TreeNodeId = NodeId;

/// A place in the tree: right after `left_sibling_id` inside
/// `parent_id`, or first in the parent when both ids are equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TreePos {
    pub parent_id: TreeNodeId,
    pub left_sibling_id: TreeNodeId,
}

impl TreePos {
    pub fn new(parent_id: TreeNodeId, left_sibling_id: TreeNodeId) -> TreePos {
        return TreePos {
            parent_id,
            left_sibling_id,
        };
    }
}

/// Content to insert, with creation tickets supplied by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TreeContent {
    Text {
        created_at: TimeTicket,
        value: String,
    },
    Element {
        created_at: TimeTicket,
        tag: String,
        attributes: BTreeMap<String, String>,
        children: Vec<TreeContent>,
    },
}

impl TreeContent {
    pub fn text(created_at: TimeTicket, value: &str) -> TreeContent {
        return TreeContent::Text {
            created_at,
            value: value.to_string(),
        };
    }

    pub fn element(created_at: TimeTicket, tag: &str) -> TreeContent {
        return TreeContent::Element {
            created_at,
            tag: tag.to_string(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
        };
    }

    /// Builder: add an attribute. No effect on text.
    pub fn with_attribute(mut self, key: &str, value: &str) -> TreeContent {
        if let TreeContent::Element { attributes, .. } = &mut self {
            attributes.insert(key.to_string(), value.to_string());
        }
        return self;
    }

    /// Builder: append a child. No effect on text.
    pub fn with_child(mut self, child: TreeContent) -> TreeContent {
        if let TreeContent::Element { children, .. } = &mut self {
            children.push(child);
        }
        return self;
    }
}

/// Live projection of a node.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TreeNode {
    Text {
        value: String,
    },
    Element {
        tag: String,
        attributes: BTreeMap<String, String>,
        children: Vec<TreeNode>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TreeChangeKind {
    Content,
    Style,
    RemoveStyle,
}

/// A change to the visible tree, in flat indexes and paths.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TreeChange {
    pub kind: TreeChangeKind,
    pub actor: ActorId,
    pub from: usize,
    pub to: usize,
    pub from_path: Vec<usize>,
    pub to_path: Vec<usize>,
    /// Inserted nodes, for content changes.
    pub value: Option<Vec<TreeNode>>,
    pub split_level: usize,
    pub attributes: Option<BTreeMap<String, String>>,
    pub attributes_to_remove: Option<Vec<String>>,
}

impl TreeChange {
    fn content(actor: ActorId, from: usize, to: usize, from_path: Vec<usize>, to_path: Vec<usize>) -> TreeChange {
        return TreeChange {
            kind: TreeChangeKind::Content,
            actor,
            from,
            to,
            from_path,
            to_path,
            value: None,
            split_level: 0,
            attributes: None,
            attributes_to_remove: None,
        };
    }
}

/// Outcome of a tree edit.
#[derive(Clone, Debug, Default)]
pub struct TreeEdit {
    pub changes: Vec<TreeChange>,
    /// Latest creation ticket per actor among the removed nodes.
    pub created_at_map: CreatedAtMap,
}

/// Where the survivors of a dissolved element went.
#[derive(Clone, Debug)]
struct MergeRecord {
    target: TreeNodeId,
    /// Last child of the target before the survivors were appended.
    anchor: Option<TreeNodeId>,
    /// The dissolved element's children at the time, in order.
    order: Vec<TreeNodeId>,
}

#[derive(Clone, Debug)]
struct NodeMeta {
    id: TreeNodeId,
    removed_at: Option<TimeTicket>,
    attributes: Rht,
    ins_prev: Option<TreeNodeId>,
    ins_next: Option<TreeNodeId>,
    split_at: Option<TimeTicket>,
    merged: Option<MergeRecord>,
}

impl NodeMeta {
    fn new(id: TreeNodeId) -> NodeMeta {
        return NodeMeta {
            id,
            removed_at: None,
            attributes: Rht::new(),
            ins_prev: None,
            ins_next: None,
            split_at: None,
            merged: None,
        };
    }

    /// The ticket that orders this node among siblings inserted at the
    /// same place. A split clone sits where its split happened.
    fn positioned_at(&self) -> TimeTicket {
        return self.split_at.unwrap_or(self.id.created_at);
    }
}

/// The materialized tree: nodes, their ids, and the removed set.
#[derive(Clone, Debug)]
struct TreeState {
    index: IndexTree<NodeMeta>,
    by_id: BTreeMap<TreeNodeId, NodeIdx>,
    removed: BTreeSet<TreeNodeId>,
}

impl TreeState {
    fn new(root: &TreeContent) -> Result<TreeState> {
        let TreeContent::Element {
            created_at,
            tag,
            attributes,
            children,
        } = root
        else {
            return Err(Error::Unsupported("the root of a tree must be an element".to_string()));
        };

        let id = NodeId::new(*created_at, 0);
        let mut meta = NodeMeta::new(id);
        for (key, value) in attributes {
            meta.attributes.set(key, value, *created_at);
        }
        let index = IndexTree::new(tag, meta);
        let root_idx = index.root();

        let mut tree = TreeState {
            index,
            by_id: BTreeMap::new(),
            removed: BTreeSet::new(),
        };
        tree.by_id.insert(id, root_idx);
        for child in children {
            let child = tree.build(child)?;
            tree.index.append(root_idx, child)?;
        }
        return Ok(tree);
    }

    /// Allocate and register a detached subtree for `content`.
    fn build(&mut self, content: &TreeContent) -> Result<NodeIdx> {
        match content {
            TreeContent::Text { created_at, value } => {
                let id = NodeId::new(*created_at, 0);
                self.check_unused(&id)?;
                let idx = self.index.alloc(NodeKind::Text(value.clone()), NodeMeta::new(id));
                self.by_id.insert(id, idx);
                return Ok(idx);
            }
            TreeContent::Element {
                created_at,
                tag,
                attributes,
                children,
            } => {
                let id = NodeId::new(*created_at, 0);
                self.check_unused(&id)?;
                let mut meta = NodeMeta::new(id);
                for (key, value) in attributes {
                    meta.attributes.set(key, value, *created_at);
                }
                let idx = self.index.alloc(NodeKind::Element(tag.clone()), meta);
                self.by_id.insert(id, idx);
                for child in children {
                    let child = self.build(child)?;
                    self.index.append(idx, child)?;
                }
                return Ok(idx);
            }
        }
    }

    fn check_unused(&self, id: &TreeNodeId) -> Result<()> {
        if self.by_id.contains_key(id) {
            return Err(Error::InvalidPosition(format!("node {} already exists", id)));
        }
        return Ok(());
    }

    // =========================================================================
    // Node access
    // =========================================================================

    #[inline]
    fn meta(&self, idx: NodeIdx) -> &NodeMeta {
        return self.index.value(idx);
    }

    #[inline]
    fn meta_mut(&mut self, idx: NodeIdx) -> &mut NodeMeta {
        return self.index.value_mut(idx);
    }

    /// The node holding `id`: the piece of its insertion that starts at or
    /// before `id.offset`.
    fn find_floor(&self, id: &TreeNodeId) -> Option<NodeIdx> {
        let (found, idx) = self.by_id.range(..=*id).next_back()?;
        if !found.has_same_created_at(id) {
            return None;
        }
        return Some(*idx);
    }

    fn can_delete(&self, idx: NodeIdx, edited_at: &TimeTicket, latest: &TimeTicket) -> bool {
        let meta = self.meta(idx);
        if meta.id.created_at.after(latest) {
            return false;
        }
        return match meta.removed_at {
            None => true,
            Some(removed_at) => edited_at.after(&removed_at),
        };
    }

    fn can_style(&self, idx: NodeIdx, edited_at: &TimeTicket, latest: &TimeTicket) -> bool {
        if self.index.is_text(idx) {
            return false;
        }
        return self.can_delete(idx, edited_at, latest);
    }

    /// Tombstone a node. The latest removal ticket wins.
    fn remove_node(&mut self, idx: NodeIdx, removed_at: TimeTicket) {
        let meta = self.meta_mut(idx);
        if let Some(current) = meta.removed_at {
            if !removed_at.after(&current) {
                return;
            }
        }
        meta.removed_at = Some(removed_at);
        let id = meta.id;
        self.index.set_removed(idx);
        self.removed.insert(id);
    }

    /// Split a text node `offset` characters in, keeping the lineage
    /// links of its pieces in order.
    fn split_text(&mut self, idx: NodeIdx, offset: usize) -> Result<()> {
        let (id, removed_at, ins_next) = {
            let meta = self.meta(idx);
            (meta.id, meta.removed_at, meta.ins_next)
        };
        let right_id = id.split(offset);
        let mut right_meta = NodeMeta::new(right_id);
        right_meta.removed_at = removed_at;
        right_meta.ins_prev = Some(id);
        right_meta.ins_next = ins_next;

        let Some(right) = self.index.split_text(idx, offset, right_meta)? else {
            return Ok(());
        };
        if let Some(next) = ins_next.and_then(|next| self.by_id.get(&next).copied()) {
            self.meta_mut(next).ins_prev = Some(right_id);
        }
        self.meta_mut(idx).ins_next = Some(right_id);
        self.by_id.insert(right_id, right);
        if removed_at.is_some() {
            self.removed.insert(right_id);
        }
        return Ok(());
    }

    // =========================================================================
    // Position resolution
    // =========================================================================

    /// The parent and left sibling named by `pos`. At the start of a split
    /// text piece the left sibling is the piece before it.
    fn to_tree_node_pair(&self, pos: &TreePos) -> Result<(NodeIdx, NodeIdx)> {
        let parent = self
            .find_floor(&pos.parent_id)
            .ok_or_else(|| Error::NodeNotFound(pos.parent_id.to_string()))?;
        let mut left = self
            .find_floor(&pos.left_sibling_id)
            .ok_or_else(|| Error::NodeNotFound(pos.left_sibling_id.to_string()))?;

        let left_id = self.meta(left).id;
        if pos.left_sibling_id != pos.parent_id
            && self.index.is_text(left)
            && pos.left_sibling_id.offset > 0
            && pos.left_sibling_id.offset == left_id.offset
        {
            if let Some(prev_id) = self.meta(left).ins_prev {
                if let Some(&prev) = self.by_id.get(&prev_id) {
                    if prev_id.offset.checked_add(self.index.size(prev)) == Some(pos.left_sibling_id.offset) {
                        left = prev;
                    }
                }
            }
        }
        return Ok((parent, left));
    }

    /// Resolve `pos` for an edit stamped `edited_at`, splitting the text
    /// it points into. Returns the parent and the left sibling (the parent
    /// itself when the place is first).
    fn find_nodes_and_split_text(&mut self, pos: &TreePos, edited_at: &TimeTicket) -> Result<(NodeIdx, NodeIdx)> {
        let (parent, mut left) = self.to_tree_node_pair(pos)?;
        if self.index.is_text(left) {
            let left_offset = self.meta(left).id.offset;
            let offset = pos
                .left_sibling_id
                .offset
                .checked_sub(left_offset)
                .ok_or_else(|| Error::InvalidPosition(format!("{} is before its node", pos.left_sibling_id)))?;
            self.split_text(left, offset)?;
        }

        let mut parent = match left == parent {
            true => parent,
            false => self.index.parent(left).unwrap_or(parent),
        };

        let mut hops = 0;
        loop {
            hops += 1;
            if hops > self.by_id.len() + 1 {
                return Err(Error::InvalidPosition(format!("{} does not settle", pos.left_sibling_id)));
            }

            if self.index.is_removed(parent) {
                if let Some((target, target_left)) = self.redirect_merged(parent, left) {
                    parent = target;
                    left = target_left;
                    continue;
                }
            }

            let children = self.index.all_children(parent);
            let mut at = match left == parent {
                true => 0,
                false => self
                    .index
                    .child_position(parent, left)
                    .map(|position| position + 1)
                    .ok_or_else(|| Error::InvalidPosition(format!("{} is not under its parent", pos.left_sibling_id)))?,
            };
            while at < children.len() {
                let next = children[at];
                if !self.meta(next).positioned_at().after(edited_at) {
                    break;
                }
                left = next;
                at += 1;
            }

            // At the end of a parent that was split after this edit was
            // issued: the place continues at the front of the clone.
            if at == children.len() {
                let clone = self
                    .meta(parent)
                    .ins_next
                    .and_then(|next| self.by_id.get(&next).copied());
                if let Some(clone) = clone {
                    if self.meta(clone).split_at.is_some_and(|split_at| split_at.after(edited_at)) {
                        parent = clone;
                        left = clone;
                        continue;
                    }
                }
            }
            return Ok((parent, left));
        }
    }

    /// Map a place inside a dissolved element to the equivalent place in
    /// the element that absorbed its children.
    fn redirect_merged(&self, parent: NodeIdx, left: NodeIdx) -> Option<(NodeIdx, NodeIdx)> {
        let record = self.meta(parent).merged.as_ref()?;
        let target = *self.by_id.get(&record.target)?;

        if left != parent {
            // Text pieces split after the merge are found through lineage.
            let mut cursor = Some(left);
            let mut found = None;
            while let Some(node) = cursor {
                let id = self.meta(node).id;
                if let Some(at) = record.order.iter().position(|candidate| *candidate == id) {
                    found = Some(at);
                    break;
                }
                cursor = self
                    .meta(node)
                    .ins_prev
                    .filter(|prev| prev.has_same_created_at(&id))
                    .and_then(|prev| self.by_id.get(&prev).copied());
            }
            if let Some(at) = found {
                for id in record.order[..=at].iter().rev() {
                    if let Some(&node) = self.by_id.get(id) {
                        if self.index.parent(node) == Some(target) {
                            return Some((target, node));
                        }
                    }
                }
            }
        }

        let anchor = record
            .anchor
            .and_then(|id| self.by_id.get(&id).copied())
            .filter(|node| self.index.parent(*node) == Some(target))
            .unwrap_or(target);
        return Some((target, anchor));
    }

    /// The index position of a parent/left pair. Inside removed parents
    /// this is the place of the nearest live ancestor.
    fn to_tree_pos(&self, parent: NodeIdx, left: NodeIdx) -> Result<IndexPos> {
        if self.index.is_removed(parent) {
            let mut child = parent;
            let mut ancestor = self
                .index
                .parent(child)
                .ok_or_else(|| Error::InvalidPosition("removed root".to_string()))?;
            while self.index.is_removed(ancestor) {
                child = ancestor;
                ancestor = self
                    .index
                    .parent(child)
                    .ok_or_else(|| Error::InvalidPosition("removed root".to_string()))?;
            }
            return Ok(IndexPos {
                node: ancestor,
                offset: self.index.find_offset(ancestor, child)?,
            });
        }

        if parent == left {
            return Ok(IndexPos {
                node: parent,
                offset: 0,
            });
        }

        let mut offset = self.index.find_offset(parent, left)?;
        if !self.index.is_removed(left) {
            if self.index.is_text(left) {
                return Ok(IndexPos {
                    node: left,
                    offset: self.index.padded_size(left),
                });
            }
            offset += 1;
        }
        return Ok(IndexPos {
            node: parent,
            offset,
        });
    }

    /// Resolve a position without mutating the tree.
    fn resolve(&self, pos: &TreePos) -> Result<IndexPos> {
        let (parent, left) = self.to_tree_node_pair(pos)?;
        let parent = match left == parent {
            true => parent,
            false => self.index.parent(left).unwrap_or(parent),
        };
        if self.index.is_text(left) && !self.index.is_removed(left) && !self.index.is_removed(parent) {
            let offset = pos.left_sibling_id.offset.saturating_sub(self.meta(left).id.offset);
            if offset < self.index.size(left) {
                return Ok(IndexPos { node: left, offset });
            }
        }
        return self.to_tree_pos(parent, left);
    }

    fn from_tree_pos(&self, pos: &IndexPos) -> Result<TreePos> {
        let node = pos.node;
        if self.index.is_text(node) {
            let parent = self
                .index
                .parent(node)
                .ok_or_else(|| Error::InvalidPosition("detached text".to_string()))?;
            let parent_id = self.meta(parent).id;
            if pos.offset == 0 {
                let at = self.index.find_offset(parent, node)?;
                let left_sibling_id = match at.checked_sub(1).and_then(|prev| self.index.children(parent).nth(prev)) {
                    Some(prev) => self.end_id(prev),
                    None => parent_id,
                };
                return Ok(TreePos::new(parent_id, left_sibling_id));
            }
            return Ok(TreePos::new(parent_id, self.meta(node).id.split(pos.offset)));
        }

        let node_id = self.meta(node).id;
        if pos.offset == 0 {
            return Ok(TreePos::new(node_id, node_id));
        }
        let prev = self
            .index
            .children(node)
            .nth(pos.offset - 1)
            .ok_or_else(|| Error::IndexOutOfRange {
                index: pos.offset,
                len: self.index.children(node).count(),
            })?;
        return Ok(TreePos::new(node_id, self.end_id(prev)));
    }

    /// The id naming the place right after a node.
    fn end_id(&self, idx: NodeIdx) -> TreeNodeId {
        let id = self.meta(idx).id;
        if self.index.is_text(idx) {
            return id.split(self.index.size(idx));
        }
        return id;
    }

    fn to_index(&self, parent: NodeIdx, left: NodeIdx) -> Result<usize> {
        return self.index.index_of(&self.to_tree_pos(parent, left)?);
    }

    fn to_path(&self, parent: NodeIdx, left: NodeIdx) -> Result<Vec<usize>> {
        return self.index.tree_pos_to_path(&self.to_tree_pos(parent, left)?);
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Size of the root's content in flat index units.
    fn len(&self) -> usize {
        return self.index.size(self.index.root());
    }

    fn is_empty(&self) -> bool {
        return self.len() == 0;
    }

    /// Number of nodes, removed ones included.
    fn node_count(&self) -> usize {
        return self.by_id.len();
    }

    /// Position of a flat index.
    fn find_pos(&self, index: usize) -> Result<TreePos> {
        let pos = self.index.find_tree_pos(index, true)?;
        return self.from_tree_pos(&pos);
    }

    fn pos_to_index(&self, pos: &TreePos) -> Result<usize> {
        return self.index.index_of(&self.resolve(pos)?);
    }

    fn pos_to_path(&self, pos: &TreePos) -> Result<Vec<usize>> {
        return self.index.tree_pos_to_path(&self.resolve(pos)?);
    }

    fn path_to_pos(&self, path: &[usize]) -> Result<TreePos> {
        let pos = self.index.path_to_tree_pos(path)?;
        return self.from_tree_pos(&pos);
    }

    fn path_to_index(&self, path: &[usize]) -> Result<usize> {
        return self.index.index_of(&self.index.path_to_tree_pos(path)?);
    }

    fn index_to_path(&self, index: usize) -> Result<Vec<usize>> {
        return self.index.tree_pos_to_path(&self.index.find_tree_pos(index, true)?);
    }

    fn index_range_to_pos_range(&self, from: usize, to: usize) -> Result<(TreePos, TreePos)> {
        let from_pos = self.find_pos(from)?;
        if from == to {
            return Ok((from_pos, from_pos));
        }
        return Ok((from_pos, self.find_pos(to)?));
    }

    fn path_range_to_pos_range(&self, from: &[usize], to: &[usize]) -> Result<(TreePos, TreePos)> {
        return Ok((self.path_to_pos(from)?, self.path_to_pos(to)?));
    }

    fn pos_range_to_index_range(&self, from: &TreePos, to: &TreePos) -> Result<(usize, usize)> {
        return Ok((self.pos_to_index(from)?, self.pos_to_index(to)?));
    }

    fn pos_range_to_path_range(&self, from: &TreePos, to: &TreePos) -> Result<(Vec<usize>, Vec<usize>)> {
        return Ok((self.pos_to_path(from)?, self.pos_to_path(to)?));
    }

    // =========================================================================
    // Edit
    // =========================================================================

    /// Replace `[from, to)` with `contents`, splitting `split_level` levels
    /// of ancestors at `from` in between.
    ///
    /// `created_at_map` bounds what a remote editor had seen; `None` is a
    /// local edit that sees everything.
    fn edit(
        &mut self,
        from: &TreePos,
        to: &TreePos,
        contents: Option<&[TreeContent]>,
        split_level: usize,
        edited_at: TimeTicket,
        created_at_map: Option<&CreatedAtMap>,
    ) -> Result<TreeEdit> {
        let (from_parent, from_left) = self.find_nodes_and_split_text(from, &edited_at)?;
        let (to_parent, to_left) = self.find_nodes_and_split_text(to, &edited_at)?;

        let mut ancestor = from_parent;
        for _ in 0..split_level {
            ancestor = self
                .index
                .parent(ancestor)
                .ok_or_else(|| Error::Unsupported("cannot split the root element".to_string()))?;
        }

        let from_index = self.to_index(from_parent, from_left)?;
        let from_path = self.to_path(from_parent, from_left)?;
        // A concurrent merge can pull the end of the range in front of its
        // start; the range is then empty.
        let to_index = self.to_index(to_parent, to_left)?.max(from_index);
        let tokens = self.index.tokens_between(from_index, to_index)?;

        // 01. Pick what this editor may remove. Unseen children go with a
        // parent removed whole and survive a dissolved one.
        let mut removed_map = CreatedAtMap::default();
        let mut to_remove: Vec<NodeIdx> = Vec::new();
        let mut removed_whole: FxHashSet<NodeIdx> = FxHashSet::default();
        let mut to_dissolve: Vec<NodeIdx> = Vec::new();
        let mut removed_tokens: Vec<Token> = Vec::new();
        for token in tokens.iter() {
            let node = token.node;
            let parent_removed = self
                .index
                .parent(node)
                .is_some_and(|parent| removed_whole.contains(&parent));
            let created_at = self.meta(node).id.created_at;
            let latest = latest_created_at(created_at_map, &created_at.actor());
            if !parent_removed && !self.can_delete(node, &edited_at, &latest) {
                continue;
            }

            record_created_at(&mut removed_map, created_at);
            match token.kind {
                TokenKind::Start if token.unclosed => to_dissolve.push(node),
                TokenKind::Start => {
                    removed_whole.insert(node);
                }
                _ => {}
            }
            if token.kind != TokenKind::End {
                to_remove.push(node);
            }
            removed_tokens.push(*token);
        }
        let mut changes = self.deletion_changes(&removed_tokens, edited_at.actor())?;

        // 02. Remove, then move the survivors of dissolved elements,
        // innermost first.
        for node in to_remove.iter().copied() {
            self.remove_node(node, edited_at);
        }
        for element in to_dissolve.iter().rev().copied() {
            self.dissolve(element, from_parent)?;
        }

        // 03. Split ancestors.
        if split_level > 0 {
            self.split_elements(from_parent, from_left, split_level, &edited_at)?;
            let mut change = TreeChange::content(
                edited_at.actor(),
                from_index,
                from_index,
                from_path.clone(),
                from_path.clone(),
            );
            change.split_level = split_level;
            changes.push(change);
        }

        // 04. Insert.
        let contents = contents.unwrap_or(&[]);
        if !contents.is_empty() {
            let parent_removed = self.index.is_removed(from_parent);
            let mut left = from_left;
            let mut inserted = Vec::with_capacity(contents.len());
            for content in contents {
                let idx = self.build(content)?;
                self.index.insert_after(from_parent, idx, left)?;
                left = idx;
                if parent_removed {
                    for node in self.index.subtree(idx) {
                        self.remove_node(node, edited_at);
                    }
                } else {
                    inserted.push(self.to_tree_node(idx));
                }
            }

            if !inserted.is_empty() {
                match changes.last_mut() {
                    Some(last) if last.from == from_index => last.value = Some(inserted),
                    _ => {
                        let mut change = TreeChange::content(
                            edited_at.actor(),
                            from_index,
                            from_index,
                            from_path.clone(),
                            from_path,
                        );
                        change.value = Some(inserted);
                        changes.push(change);
                    }
                }
            }
        }

        debug!(
            edited_at = %edited_at,
            from = from_index,
            to = to_index,
            removed = to_remove.len(),
            split_level,
            "tree edit"
        );
        return Ok(TreeEdit {
            changes,
            created_at_map: removed_map,
        });
    }

    /// Contiguous runs of removed tokens, last run first.
    fn deletion_changes(&self, tokens: &[Token], actor: ActorId) -> Result<Vec<TreeChange>> {
        let mut runs: Vec<(usize, usize)> = Vec::new();
        for token in tokens {
            match runs.last_mut() {
                Some((_, end)) if *end == token.index => *end += token.len,
                _ => runs.push((token.index, token.index + token.len)),
            }
        }

        let mut changes = Vec::with_capacity(runs.len());
        for (from, to) in runs.into_iter().rev() {
            changes.push(TreeChange::content(
                actor,
                from,
                to,
                self.index_to_path(from)?,
                self.index_to_path(to)?,
            ));
        }
        return Ok(changes);
    }

    /// Move the live children of a removed element to the end of `target`
    /// and remember where they went.
    fn dissolve(&mut self, element: NodeIdx, target: NodeIdx) -> Result<()> {
        if !self.index.is_removed(element) || element == target {
            return Ok(());
        }
        let children: Vec<NodeIdx> = self.index.all_children(element).to_vec();
        let order: Vec<TreeNodeId> = children.iter().map(|child| self.meta(*child).id).collect();
        let anchor = self
            .index
            .all_children(target)
            .last()
            .map(|last| self.meta(*last).id);

        for child in children {
            if self.index.is_removed(child) {
                continue;
            }
            self.index.detach(child);
            self.index.append(target, child)?;
        }

        let target_id = self.meta(target).id;
        self.meta_mut(element).merged = Some(MergeRecord {
            target: target_id,
            anchor,
            order,
        });
        return Ok(());
    }

    /// Split `levels` ancestors starting at `parent`, right after `left`.
    fn split_elements(&mut self, parent: NodeIdx, left: NodeIdx, levels: usize, edited_at: &TimeTicket) -> Result<()> {
        let mut parent = parent;
        let mut left = left;
        for level in 0..levels {
            let grandparent = self
                .index
                .parent(parent)
                .ok_or_else(|| Error::Unsupported("cannot split the root element".to_string()))?;

            // The clone goes after `parent`, past siblings placed there by
            // edits later than this split.
            let siblings = self.index.all_children(grandparent);
            let mut clone_left = parent;
            let mut at = self
                .index
                .child_position(grandparent, parent)
                .map(|position| position + 1)
                .unwrap_or(siblings.len());
            while at < siblings.len() && self.meta(siblings[at]).positioned_at().after(edited_at) {
                clone_left = siblings[at];
                at += 1;
            }

            let position = match left == parent {
                true => 0,
                false => self
                    .index
                    .child_position(parent, left)
                    .map(|position| position + 1)
                    .ok_or_else(|| Error::InvalidPosition("split point is not under its parent".to_string()))?,
            };

            // Inserted nodes use small offsets of their ticket; clones count
            // down from the top so no two splits of one change collide.
            let clone_id = NodeId::new(*edited_at, usize::MAX - level);
            self.check_unused(&clone_id)?;

            let (parent_id, removed_at, attributes, ins_next) = {
                let meta = self.meta(parent);
                (meta.id, meta.removed_at, meta.attributes.clone(), meta.ins_next)
            };
            let mut meta = NodeMeta::new(clone_id);
            meta.removed_at = removed_at;
            meta.attributes = attributes;
            meta.ins_prev = Some(parent_id);
            meta.ins_next = ins_next;
            meta.split_at = Some(*edited_at);

            let clone = self.index.split_element(parent, position, meta, clone_left)?;
            if let Some(next) = ins_next.and_then(|next| self.by_id.get(&next).copied()) {
                self.meta_mut(next).ins_prev = Some(clone_id);
            }
            self.meta_mut(parent).ins_next = Some(clone_id);
            self.by_id.insert(clone_id, clone);
            if removed_at.is_some() {
                self.removed.insert(clone_id);
            }

            left = clone_left;
            parent = grandparent;
        }
        return Ok(());
    }

    // =========================================================================
    // Style
    // =========================================================================

    /// Set `attributes` on every element whose start lies in `[from, to)`.
    fn style(
        &mut self,
        from: &TreePos,
        to: &TreePos,
        attributes: &BTreeMap<String, String>,
        edited_at: TimeTicket,
        created_at_map: Option<&CreatedAtMap>,
    ) -> Result<TreeEdit> {
        let (styled, touched) = self.update_elements(from, to, &edited_at, created_at_map, |table| {
            let mut changed = false;
            for (key, value) in attributes {
                changed |= table.set(key, value, edited_at);
            }
            return changed;
        })?;

        let mut changes = Vec::with_capacity(styled.len());
        for node in styled {
            let mut change = self.element_change(node, edited_at.actor())?;
            change.kind = TreeChangeKind::Style;
            change.attributes = Some(attributes.clone());
            changes.push(change);
        }
        return Ok(TreeEdit {
            changes,
            created_at_map: touched,
        });
    }

    /// Remove `keys` from every element whose start lies in `[from, to)`.
    fn remove_style(
        &mut self,
        from: &TreePos,
        to: &TreePos,
        keys: &[String],
        edited_at: TimeTicket,
        created_at_map: Option<&CreatedAtMap>,
    ) -> Result<TreeEdit> {
        let (styled, touched) = self.update_elements(from, to, &edited_at, created_at_map, |table| {
            let mut changed = false;
            for key in keys {
                let had = table.has(key);
                changed |= table.remove(key, edited_at) && had;
            }
            return changed;
        })?;

        let mut changes = Vec::with_capacity(styled.len());
        for node in styled {
            let mut change = self.element_change(node, edited_at.actor())?;
            change.kind = TreeChangeKind::RemoveStyle;
            change.attributes_to_remove = Some(keys.to_vec());
            changes.push(change);
        }
        return Ok(TreeEdit {
            changes,
            created_at_map: touched,
        });
    }

    /// Apply `update` to the attributes of the elements in range that the
    /// editor had seen. Returns the elements whose attributes changed.
    fn update_elements<F>(
        &mut self,
        from: &TreePos,
        to: &TreePos,
        edited_at: &TimeTicket,
        created_at_map: Option<&CreatedAtMap>,
        mut update: F,
    ) -> Result<(Vec<NodeIdx>, CreatedAtMap)>
    where
        F: FnMut(&mut Rht) -> bool,
    {
        let (from_parent, from_left) = self.find_nodes_and_split_text(from, edited_at)?;
        let (to_parent, to_left) = self.find_nodes_and_split_text(to, edited_at)?;
        let from_index = self.to_index(from_parent, from_left)?;
        let to_index = self.to_index(to_parent, to_left)?.max(from_index);
        let tokens = self.index.tokens_between(from_index, to_index)?;

        let mut seen: FxHashSet<NodeIdx> = FxHashSet::default();
        let mut touched = CreatedAtMap::default();
        let mut updated = Vec::new();
        for token in tokens {
            let node = token.node;
            if self.index.is_text(node) || !seen.insert(node) {
                continue;
            }
            let created_at = self.meta(node).id.created_at;
            let latest = latest_created_at(created_at_map, &created_at.actor());
            if !self.can_style(node, edited_at, &latest) {
                continue;
            }
            record_created_at(&mut touched, created_at);
            if update(&mut self.meta_mut(node).attributes) {
                updated.push(node);
            }
        }
        return Ok((updated, touched));
    }

    /// A change spanning the open token of an element.
    fn element_change(&self, node: NodeIdx, actor: ActorId) -> Result<TreeChange> {
        let parent = self
            .index
            .parent(node)
            .ok_or_else(|| Error::Unsupported("the root element has no range".to_string()))?;
        let before = IndexPos {
            node: parent,
            offset: self.index.find_offset(parent, node)?,
        };
        let inside = IndexPos { node, offset: 0 };
        let from = self.index.index_of(&before)?;
        return Ok(TreeChange::content(
            actor,
            from,
            from + 1,
            self.index.tree_pos_to_path(&before)?,
            self.index.tree_pos_to_path(&inside)?,
        ));
    }

    // =========================================================================
    // Garbage collection
    // =========================================================================

    /// Number of removed nodes still held.
    fn garbage_len(&self) -> usize {
        return self.removed.len();
    }

    /// Free removed nodes (with their subtrees) whose removal is at or
    /// before `ticket`. Returns the number of nodes freed.
    fn purge_removed_nodes_before(&mut self, ticket: &TimeTicket) -> usize {
        let candidates: Vec<TreeNodeId> = self
            .removed
            .iter()
            .copied()
            .filter(|id| {
                self.by_id
                    .get(id)
                    .and_then(|idx| self.meta(*idx).removed_at)
                    .is_some_and(|removed_at| !removed_at.after(ticket))
            })
            .collect();

        let mut count = 0;
        for id in candidates {
            // Already freed with an ancestor.
            let Some(&idx) = self.by_id.get(&id) else {
                continue;
            };
            self.index.detach(idx);
            for node in self.index.subtree(idx) {
                let (node_id, prev, next) = {
                    let meta = self.meta(node);
                    (meta.id, meta.ins_prev, meta.ins_next)
                };
                if let Some(prev) = prev.and_then(|prev| self.by_id.get(&prev).copied()) {
                    self.meta_mut(prev).ins_next = next;
                }
                if let Some(next) = next.and_then(|next| self.by_id.get(&next).copied()) {
                    self.meta_mut(next).ins_prev = prev;
                }
                self.by_id.remove(&node_id);
                self.removed.remove(&node_id);
                count += 1;
            }
            self.index.free_subtree(idx);
        }

        debug!(ticket = %ticket, freed = count, "tree purge");
        return count;
    }

    // =========================================================================
    // Projections
    // =========================================================================

    /// Live projection of a node, adjacent text merged.
    fn to_tree_node(&self, idx: NodeIdx) -> TreeNode {
        match self.index.kind(idx) {
            NodeKind::Text(value) => {
                return TreeNode::Text { value: value.clone() };
            }
            NodeKind::Element(tag) => {
                let mut children: Vec<TreeNode> = Vec::new();
                for child in self.index.children(idx) {
                    let node = self.to_tree_node(child);
                    if let (Some(TreeNode::Text { value }), TreeNode::Text { value: next }) = (children.last_mut(), &node) {
                        value.push_str(next);
                        continue;
                    }
                    children.push(node);
                }
                return TreeNode::Element {
                    tag: tag.clone(),
                    attributes: self.meta(idx).attributes.to_map(),
                    children,
                };
            }
        }
    }

    /// The live tree.
    fn root(&self) -> TreeNode {
        return self.to_tree_node(self.index.root());
    }

    fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(self.index.root(), &mut out);
        return out;
    }

    fn write_xml(&self, idx: NodeIdx, out: &mut String) {
        match self.index.kind(idx) {
            NodeKind::Text(value) => out.push_str(&escape_xml(value)),
            NodeKind::Element(tag) => {
                out.push('<');
                out.push_str(tag);
                let attributes = &self.meta(idx).attributes;
                if !attributes.is_empty() {
                    out.push(' ');
                    out.push_str(&attributes.to_xml());
                }
                out.push('>');
                for child in self.index.children(idx) {
                    self.write_xml(child, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }

    /// `{"type":"p","children":[{"type":"text","value":"ab"}]}`, with
    /// `attributes` present only when the element has some.
    fn to_json(&self) -> String {
        return node_to_json(&self.root()).to_string();
    }
}

// =============================================================================
// Replicated tree
// =============================================================================

#[derive(Clone, Debug)]
enum TreeOp {
    Edit {
        from: TreePos,
        to: TreePos,
        contents: Option<Vec<TreeContent>>,
        split_level: usize,
    },
    Style {
        from: TreePos,
        to: TreePos,
        attributes: BTreeMap<String, String>,
    },
    RemoveStyle {
        from: TreePos,
        to: TreePos,
        keys: Vec<String>,
    },
}

/// An applied tree operation.
#[derive(Clone, Debug)]
struct LoggedOp {
    edited_at: TimeTicket,
    op: TreeOp,
    /// What the editor had seen. A local edit fills it in when it first
    /// applies.
    created_at_map: Option<CreatedAtMap>,
}

impl LoggedOp {
    fn apply(&self, state: &mut TreeState) -> Result<TreeEdit> {
        let created_at_map = self.created_at_map.as_ref();
        match &self.op {
            TreeOp::Edit {
                from,
                to,
                contents,
                split_level,
            } => {
                return state.edit(
                    from,
                    to,
                    contents.as_deref(),
                    *split_level,
                    self.edited_at,
                    created_at_map,
                );
            }
            TreeOp::Style { from, to, attributes } => {
                return state.style(from, to, attributes, self.edited_at, created_at_map);
            }
            TreeOp::RemoveStyle { from, to, keys } => {
                return state.remove_style(from, to, keys, self.edited_at, created_at_map);
            }
        }
    }

    fn stamp(&mut self, edit: &TreeEdit) {
        if self.created_at_map.is_none() {
            self.created_at_map = Some(edit.created_at_map.clone());
        }
    }
}

/// Replicated tree for XML-like documents.
///
/// Operations are logged in ticket order on top of a base state. One that
/// arrives behind an operation it is concurrent with is slotted into the
/// log and the state is rebuilt, so every replica ends up applying the same
/// operations in the same order. Collecting garbage folds the settled prefix
/// of the log into the base.
#[derive(Clone, Debug)]
pub struct CrdtTree {
    state: TreeState,
    base: TreeState,
    log: Vec<LoggedOp>,
}

impl CrdtTree {
    /// Build a tree from its root element.
    pub fn new(root: &TreeContent) -> Result<CrdtTree> {
        let state = TreeState::new(root)?;
        return Ok(CrdtTree {
            base: state.clone(),
            state,
            log: Vec::new(),
        });
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Replace `[from, to)` with `contents`, splitting `split_level` levels
    /// of ancestors at `from` in between.
    ///
    /// `created_at_map` bounds what a remote editor had seen; `None` is a
    /// local edit that sees everything. A local edit that fails leaves the
    /// tree as it was. A remote one that fails is kept as a no-op.
    pub fn edit(
        &mut self,
        from: &TreePos,
        to: &TreePos,
        contents: Option<&[TreeContent]>,
        split_level: usize,
        edited_at: TimeTicket,
        created_at_map: Option<&CreatedAtMap>,
    ) -> Result<TreeEdit> {
        return self.apply(LoggedOp {
            edited_at,
            op: TreeOp::Edit {
                from: *from,
                to: *to,
                contents: contents.map(|contents| contents.to_vec()),
                split_level,
            },
            created_at_map: created_at_map.cloned(),
        });
    }

    /// Resolve index positions against the current state and edit as the
    /// local replica.
    pub fn edit_by_index(
        &mut self,
        from: usize,
        to: usize,
        contents: Option<&[TreeContent]>,
        split_level: usize,
        edited_at: TimeTicket,
    ) -> Result<TreeEdit> {
        let (from_pos, to_pos) = self.index_range_to_pos_range(from, to)?;
        return self.edit(&from_pos, &to_pos, contents, split_level, edited_at, None);
    }

    /// Set `attributes` on every element whose start lies in `[from, to)`.
    pub fn style(
        &mut self,
        from: &TreePos,
        to: &TreePos,
        attributes: &BTreeMap<String, String>,
        edited_at: TimeTicket,
        created_at_map: Option<&CreatedAtMap>,
    ) -> Result<(Vec<TreeChange>, CreatedAtMap)> {
        let edit = self.apply(LoggedOp {
            edited_at,
            op: TreeOp::Style {
                from: *from,
                to: *to,
                attributes: attributes.clone(),
            },
            created_at_map: created_at_map.cloned(),
        })?;
        return Ok((edit.changes, edit.created_at_map));
    }

    /// Remove `keys` from every element whose start lies in `[from, to)`.
    pub fn remove_style(
        &mut self,
        from: &TreePos,
        to: &TreePos,
        keys: &[String],
        edited_at: TimeTicket,
        created_at_map: Option<&CreatedAtMap>,
    ) -> Result<(Vec<TreeChange>, CreatedAtMap)> {
        let edit = self.apply(LoggedOp {
            edited_at,
            op: TreeOp::RemoveStyle {
                from: *from,
                to: *to,
                keys: keys.to_vec(),
            },
            created_at_map: created_at_map.cloned(),
        })?;
        return Ok((edit.changes, edit.created_at_map));
    }

    fn apply(&mut self, mut logged: LoggedOp) -> Result<TreeEdit> {
        let edited_at = logged.edited_at;
        let in_order = self
            .log
            .last()
            .is_none_or(|last| edited_at.after(&last.edited_at));
        if !in_order {
            return self.apply_behind(logged);
        }

        match logged.apply(&mut self.state) {
            Ok(edit) => {
                logged.stamp(&edit);
                self.log.push(logged);
                return Ok(edit);
            }
            Err(error) => {
                // The failed operation may have split text on its way.
                self.state = self.replay();
                if logged.created_at_map.is_none() {
                    return Err(error);
                }
                warn!(edited_at = %edited_at, %error, "remote tree operation does not apply");
                self.log.push(logged);
                return Ok(TreeEdit::default());
            }
        }
    }

    /// Slot an operation in behind later ones and rebuild. Reports the whole
    /// content as replaced.
    fn apply_behind(&mut self, logged: LoggedOp) -> Result<TreeEdit> {
        let edited_at = logged.edited_at;
        let at = self.log.partition_point(|entry| entry.edited_at < edited_at);
        if self.log.get(at).is_some_and(|entry| entry.edited_at == edited_at) {
            debug!(edited_at = %edited_at, "tree operation already applied");
            return Ok(TreeEdit::default());
        }

        let len = self.state.len();
        let from_path = self.state.index_to_path(0)?;
        let to_path = self.state.index_to_path(len)?;
        self.log.insert(at, logged);
        self.state = self.replay();

        let Some(created_at_map) = self.log[at].created_at_map.clone() else {
            // Only a local operation is left unstamped, and only if it failed.
            self.log.remove(at);
            self.state = self.replay();
            return Err(Error::InvalidPosition(format!("tree operation {} does not apply", edited_at)));
        };

        let mut change = TreeChange::content(edited_at.actor(), 0, len, from_path, to_path);
        if let TreeNode::Element { children, .. } = self.state.root() {
            change.value = Some(children);
        }
        debug!(edited_at = %edited_at, later = self.log.len() - at - 1, "tree operation replayed");
        return Ok(TreeEdit {
            changes: vec![change],
            created_at_map,
        });
    }

    /// The base with every logged operation applied in ticket order.
    /// Operations that do not apply are skipped.
    fn replay(&mut self) -> TreeState {
        let mut state = self.base.clone();
        for logged in self.log.iter_mut() {
            let checkpoint = state.clone();
            match logged.apply(&mut state) {
                Ok(edit) => logged.stamp(&edit),
                Err(error) => {
                    debug!(edited_at = %logged.edited_at, %error, "skipped tree operation");
                    state = checkpoint;
                }
            }
        }
        return state;
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Size of the root's content in flat index units.
    pub fn len(&self) -> usize {
        return self.state.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.state.is_empty();
    }

    /// Number of nodes, removed ones included.
    pub fn node_count(&self) -> usize {
        return self.state.node_count();
    }

    /// Number of logged operations not yet folded into the base.
    pub fn pending_len(&self) -> usize {
        return self.log.len();
    }

    /// Position of a flat index.
    pub fn find_pos(&self, index: usize) -> Result<TreePos> {
        return self.state.find_pos(index);
    }

    pub fn pos_to_index(&self, pos: &TreePos) -> Result<usize> {
        return self.state.pos_to_index(pos);
    }

    pub fn pos_to_path(&self, pos: &TreePos) -> Result<Vec<usize>> {
        return self.state.pos_to_path(pos);
    }

    pub fn path_to_pos(&self, path: &[usize]) -> Result<TreePos> {
        return self.state.path_to_pos(path);
    }

    pub fn path_to_index(&self, path: &[usize]) -> Result<usize> {
        return self.state.path_to_index(path);
    }

    pub fn index_to_path(&self, index: usize) -> Result<Vec<usize>> {
        return self.state.index_to_path(index);
    }

    pub fn index_range_to_pos_range(&self, from: usize, to: usize) -> Result<(TreePos, TreePos)> {
        return self.state.index_range_to_pos_range(from, to);
    }

    pub fn path_range_to_pos_range(&self, from: &[usize], to: &[usize]) -> Result<(TreePos, TreePos)> {
        return self.state.path_range_to_pos_range(from, to);
    }

    pub fn pos_range_to_index_range(&self, from: &TreePos, to: &TreePos) -> Result<(usize, usize)> {
        return self.state.pos_range_to_index_range(from, to);
    }

    pub fn pos_range_to_path_range(&self, from: &TreePos, to: &TreePos) -> Result<(Vec<usize>, Vec<usize>)> {
        return self.state.pos_range_to_path_range(from, to);
    }

    // =========================================================================
    // Garbage collection
    // =========================================================================

    /// Number of removed nodes still held.
    pub fn garbage_len(&self) -> usize {
        return self.state.garbage_len();
    }

    /// Fold the operations at or before `ticket` into the base, then free
    /// removed nodes (with their subtrees) whose removal is at or before
    /// `ticket`. Returns the number of nodes freed.
    pub fn purge_removed_nodes_before(&mut self, ticket: &TimeTicket) -> usize {
        let settled = self.log.partition_point(|logged| !logged.edited_at.after(ticket));
        for logged in self.log.drain(..settled) {
            let checkpoint = self.base.clone();
            if logged.apply(&mut self.base).is_err() {
                self.base = checkpoint;
            }
        }
        self.base.purge_removed_nodes_before(ticket);
        return self.state.purge_removed_nodes_before(ticket);
    }

    // =========================================================================
    // Projections
    // =========================================================================

    /// The live tree.
    pub fn root(&self) -> TreeNode {
        return self.state.root();
    }

    pub fn to_xml(&self) -> String {
        return self.state.to_xml();
    }

    /// `{"type":"p","children":[{"type":"text","value":"ab"}]}`, with
    /// `attributes` present only when the element has some.
    pub fn to_json(&self) -> String {
        return self.state.to_json();
    }
}

fn node_to_json(node: &TreeNode) -> Value {
    let mut object = Map::new();
    match node {
        TreeNode::Text { value } => {
            object.insert("type".to_string(), Value::String("text".to_string()));
            object.insert("value".to_string(), Value::String(value.clone()));
        }
        TreeNode::Element {
            tag,
            attributes,
            children,
        } => {
            object.insert("type".to_string(), Value::String(tag.clone()));
            object.insert(
                "children".to_string(),
                Value::Array(children.iter().map(node_to_json).collect()),
            );
            if !attributes.is_empty() {
                let attributes = attributes
                    .iter()
                    .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                    .collect();
                object.insert("attributes".to_string(), Value::Object(attributes));
            }
        }
    }
    return Value::Object(object);
}

impl std::fmt::Display for CrdtTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return f.write_str(&self.to_xml());
    }
}
