//! Block-based RGA for text.
//!
//! # Structure
//!
//! A single insertion creates one node holding a run of content, identified
//! by `(created_at, 0)`. Later edits split runs at their boundaries; the
//! right piece of a split is a new node `(created_at, offset)` so positions
//! that refer into the original run still resolve. Split pieces of one
//! insertion are chained by `ins_prev`/`ins_next`, independent of where
//! concurrent inserts have landed between them.
//!
//! ```text
//! list:  head -> [A:0 "he"] -> [B:0 "XY"] -> [A:2 "llo"]
//! ins:           [A:0] <------------------> [A:2]
//! ```
//!
//! Nodes live in an arena and are linked in document order. A splay tree
//! indexes them by visible length (tombstones weigh 0), and a `BTreeMap`
//! keyed by id answers floor lookups ("which piece holds offset k of
//! insertion A?").
//!
//! # Deletion
//!
//! An edit only tombstones nodes the editing replica had seen: a node whose
//! creation ticket is later than the editor's recorded latest ticket for
//! that node's actor survives. Concurrent inserts inside a deleted range
//! therefore stay visible on every replica.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use smallvec::SmallVec;

use crate::actor::ActorId;
use crate::crdt::primitives::CreatedAtMap;
use crate::crdt::primitives::NodeId;
use crate::crdt::primitives::TimeTicket;
use crate::crdt::primitives::ticket::latest_created_at;
use crate::crdt::primitives::ticket::record_created_at;
use crate::crdt::splay_tree::SplayHandle;
use crate::crdt::splay_tree::SplayTree;
use crate::error::Error;
use crate::error::Result;

const HEAD: u32 = 0;

/// Content that can be stored in a split node.
pub trait SplitValue: Clone + Default {
    /// Content length in position units.
    fn len(&self) -> usize;

    /// Keep `[0, offset)` in `self` and return `[offset, len)`.
    fn split_off(&mut self, offset: usize) -> Self;
}

/// A position inside a split sequence: `relative_offset` units past the
/// start of node `id`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SplitPos {
    pub id: NodeId,
    pub relative_offset: usize,
}

impl SplitPos {
    pub fn new(id: NodeId, relative_offset: usize) -> SplitPos {
        return SplitPos { id, relative_offset };
    }

    /// The id this position would have if its run were split here.
    pub fn absolute_id(&self) -> NodeId {
        return self.id.split(self.relative_offset);
    }
}

/// A change to the visible sequence, in pre-edit indexes.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueChange<V> {
    pub actor: ActorId,
    pub from: usize,
    pub to: usize,
    pub value: Option<V>,
}

/// Outcome of an edit.
#[derive(Clone, Debug)]
pub struct SplitEdit<V> {
    /// Position right after the inserted content, or at the edit point.
    pub caret: SplitPos,
    /// Latest creation ticket per actor among the nodes this edit removed.
    pub created_at_map: CreatedAtMap,
    /// Changes in the order they should be applied.
    pub changes: Vec<ValueChange<V>>,
}

#[derive(Clone, Debug)]
struct SplitNode<V> {
    id: NodeId,
    value: V,
    removed_at: Option<TimeTicket>,
    prev: Option<u32>,
    next: Option<u32>,
    ins_prev: Option<u32>,
    ins_next: Option<u32>,
    handle: SplayHandle,
}

impl<V: SplitValue> SplitNode<V> {
    fn visible_len(&self) -> usize {
        if self.removed_at.is_some() {
            return 0;
        }
        return self.value.len();
    }

    /// A node may be deleted or styled by an edit that had seen it and that
    /// is later than any earlier removal.
    fn can_edit(&self, edited_at: &TimeTicket, latest: &TimeTicket) -> bool {
        if self.id.created_at.after(latest) {
            return false;
        }
        return match self.removed_at {
            None => true,
            Some(removed_at) => edited_at.after(&removed_at),
        };
    }
}

#[derive(Clone, Debug)]
pub struct RgaTreeSplit<V> {
    nodes: Vec<Option<SplitNode<V>>>,
    free: Vec<u32>,
    index: SplayTree<u32>,
    by_id: BTreeMap<NodeId, u32>,
    removed: BTreeSet<NodeId>,
}

impl<V: SplitValue> Default for RgaTreeSplit<V> {
    fn default() -> Self {
        return Self::new();
    }
}

impl<V: SplitValue> RgaTreeSplit<V> {
    pub fn new() -> RgaTreeSplit<V> {
        let head_id = NodeId::new(TimeTicket::INITIAL, 0);
        let mut index = SplayTree::new();
        let handle = index.insert(HEAD, 0);
        let mut by_id = BTreeMap::new();
        by_id.insert(head_id, HEAD);

        return RgaTreeSplit {
            nodes: vec![Some(SplitNode {
                id: head_id,
                value: V::default(),
                removed_at: None,
                prev: None,
                next: None,
                ins_prev: None,
                ins_next: None,
                handle,
            })],
            free: Vec::new(),
            index,
            by_id,
            removed: BTreeSet::new(),
        };
    }

    /// Visible length.
    pub fn len(&self) -> usize {
        return self.index.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.len() == 0;
    }

    /// Number of tombstoned nodes waiting for garbage collection.
    pub fn garbage_len(&self) -> usize {
        return self.removed.len();
    }

    #[inline]
    fn node(&self, idx: u32) -> &SplitNode<V> {
        return match &self.nodes[idx as usize] {
            Some(node) => node,
            None => unreachable!("dangling split index {}", idx),
        };
    }

    #[inline]
    fn node_mut(&mut self, idx: u32) -> &mut SplitNode<V> {
        return match &mut self.nodes[idx as usize] {
            Some(node) => node,
            None => unreachable!("dangling split index {}", idx),
        };
    }

    fn alloc(&mut self, node: SplitNode<V>) -> u32 {
        if let Some(idx) = self.free.pop() {
            self.nodes[idx as usize] = Some(node);
            return idx;
        }
        self.nodes.push(Some(node));
        return (self.nodes.len() - 1) as u32;
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// The piece of `id`'s insertion that contains `id.offset`.
    fn find_floor(&self, id: &NodeId) -> Option<u32> {
        let (found, idx) = self.by_id.range(..=*id).next_back()?;
        if !found.has_same_created_at(id) {
            return None;
        }
        return Some(*idx);
    }

    /// Like `find_floor`, but a position exactly on a split boundary
    /// resolves to the end of the left piece.
    fn find_floor_prefer_left(&self, id: &NodeId) -> Result<u32> {
        let idx = self
            .find_floor(id)
            .ok_or_else(|| Error::NodeNotFound(id.to_string()))?;
        let node = self.node(idx);
        if id.offset > 0 && node.id.offset == id.offset {
            if let Some(ins_prev) = node.ins_prev {
                let prev = self.node(ins_prev);
                if prev.id.offset + prev.value.len() == id.offset {
                    return Ok(ins_prev);
                }
            }
        }
        return Ok(idx);
    }

    /// Visible index right after `idx`.
    fn index_after(&self, idx: u32) -> Result<usize> {
        let node = self.node(idx);
        return Ok(self.index.index_of(node.handle)? + node.visible_len());
    }

    // =========================================================================
    // Structure
    // =========================================================================

    fn insert_after_node(&mut self, prev: u32, idx: u32) -> Result<()> {
        let next = self.node(prev).next;
        let len = self.node(idx).visible_len();
        let handle = self.index.insert_after(Some(self.node(prev).handle), idx, len)?;
        let id = self.node(idx).id;

        let node = self.node_mut(idx);
        node.prev = Some(prev);
        node.next = next;
        node.handle = handle;
        self.node_mut(prev).next = Some(idx);
        if let Some(next) = next {
            self.node_mut(next).prev = Some(idx);
        }
        self.by_id.insert(id, idx);
        return Ok(());
    }

    /// Split the node at `offset`, returning the node that starts there.
    fn split_node(&mut self, idx: u32, offset: usize) -> Result<Option<u32>> {
        let len = self.node(idx).value.len();
        if offset > len {
            return Err(Error::InvalidPosition(format!(
                "offset {} past end of {} (len {})",
                offset,
                self.node(idx).id,
                len
            )));
        }
        if offset == 0 {
            return Ok(Some(idx));
        }
        if offset == len {
            return Ok(self.node(idx).next);
        }

        let (right_value, id, removed_at, ins_next, handle) = {
            let node = self.node_mut(idx);
            let right = node.value.split_off(offset);
            (right, node.id.split(offset), node.removed_at, node.ins_next, node.handle)
        };
        let left_len = self.node(idx).visible_len();
        self.index.set_len(handle, left_len)?;

        let split = self.alloc(SplitNode {
            id,
            value: right_value,
            removed_at,
            prev: None,
            next: None,
            ins_prev: Some(idx),
            ins_next,
            handle,
        });
        self.insert_after_node(idx, split)?;
        if let Some(ins_next) = ins_next {
            self.node_mut(ins_next).ins_prev = Some(split);
        }
        self.node_mut(idx).ins_next = Some(split);
        if removed_at.is_some() {
            self.removed.insert(id);
        }
        return Ok(Some(split));
    }

    /// Split at `pos` and return the nodes on both sides of it, after
    /// skipping nodes inserted concurrently at the same place with a later
    /// ticket.
    fn find_node_with_split(&mut self, pos: &SplitPos, edited_at: &TimeTicket) -> Result<(u32, Option<u32>)> {
        let absolute = pos.absolute_id();
        let mut idx = self.find_floor_prefer_left(&absolute)?;
        let relative = absolute.offset - self.node(idx).id.offset;
        self.split_node(idx, relative)?;

        while let Some(next) = self.node(idx).next {
            if !self.node(next).id.created_at.after(edited_at) {
                break;
            }
            idx = next;
        }
        return Ok((idx, self.node(idx).next));
    }

    fn find_between(&self, from: Option<u32>, to: Option<u32>) -> SmallVec<[u32; 8]> {
        let mut nodes = SmallVec::new();
        let mut current = from;
        while let Some(idx) = current {
            if Some(idx) == to {
                break;
            }
            nodes.push(idx);
            current = self.node(idx).next;
        }
        return nodes;
    }

    // =========================================================================
    // Edit
    // =========================================================================

    /// Replace the content between `from` and `to` with `value`.
    ///
    /// `created_at_map` is the editor's latest seen creation ticket per
    /// actor; `None` marks a local edit that has seen everything.
    pub fn edit(
        &mut self,
        from: &SplitPos,
        to: &SplitPos,
        edited_at: TimeTicket,
        value: Option<V>,
        created_at_map: Option<&CreatedAtMap>,
    ) -> Result<SplitEdit<V>> {
        let (to_left, to_right) = self.find_node_with_split(to, &edited_at)?;
        let (from_left, from_right) = self.find_node_with_split(from, &edited_at)?;

        let candidates = self.find_between(from_right, to_right);
        let (mut changes, removed_map) = self.delete_nodes(&candidates, edited_at, created_at_map)?;

        let caret_id = match to_right {
            Some(idx) => self.node(idx).id,
            None => self.node(to_left).id,
        };
        let mut caret = SplitPos::new(caret_id, 0);

        if let Some(value) = value.filter(|v| v.len() > 0) {
            let index = self.index_after(from_left)?;
            let len = value.len();
            let inserted = self.alloc(SplitNode {
                id: NodeId::new(edited_at, 0),
                value: value.clone(),
                removed_at: None,
                prev: None,
                next: None,
                ins_prev: None,
                ins_next: None,
                handle: self.node(HEAD).handle,
            });
            self.insert_after_node(from_left, inserted)?;

            match changes.last_mut() {
                Some(last) if last.from == index => last.value = Some(value),
                _ => changes.push(ValueChange {
                    actor: edited_at.actor(),
                    from: index,
                    to: index,
                    value: Some(value),
                }),
            }
            caret = SplitPos::new(NodeId::new(edited_at, 0), len);
        }

        return Ok(SplitEdit {
            caret,
            created_at_map: removed_map,
            changes,
        });
    }

    fn delete_nodes(
        &mut self,
        candidates: &[u32],
        edited_at: TimeTicket,
        created_at_map: Option<&CreatedAtMap>,
    ) -> Result<(Vec<ValueChange<V>>, CreatedAtMap)> {
        let mut removed_map = CreatedAtMap::default();
        let (Some(&first), Some(&last)) = (candidates.first(), candidates.last()) else {
            return Ok((Vec::new(), removed_map));
        };

        // Nodes the editor may not delete split the range into pieces.
        let mut boundaries: SmallVec<[Option<u32>; 8]> = SmallVec::new();
        boundaries.push(self.node(first).prev);
        let mut to_delete: SmallVec<[u32; 8]> = SmallVec::new();
        for &idx in candidates {
            let node = self.node(idx);
            let latest = latest_created_at(created_at_map, &node.id.created_at.actor());
            if node.can_edit(&edited_at, &latest) {
                to_delete.push(idx);
            } else {
                boundaries.push(Some(idx));
            }
        }
        boundaries.push(self.node(last).next);

        let changes = self.make_changes(&boundaries, edited_at)?;

        for idx in to_delete {
            let (id, handle) = {
                let node = self.node_mut(idx);
                node.removed_at = Some(edited_at);
                (node.id, node.handle)
            };
            record_created_at(&mut removed_map, id.created_at);
            self.index.set_len(handle, 0)?;
            self.removed.insert(id);
        }
        return Ok((changes, removed_map));
    }

    fn make_changes(&self, boundaries: &[Option<u32>], edited_at: TimeTicket) -> Result<Vec<ValueChange<V>>> {
        let mut changes = Vec::new();
        for pair in boundaries.windows(2) {
            let Some(left) = pair[0] else {
                continue;
            };
            let right = pair[1];
            if self.node(left).next == right {
                continue;
            }
            let from = self.index_after(left)?;
            let to = match right {
                Some(right) => self.index.index_of(self.node(right).handle)?,
                None => self.len(),
            };
            if from < to {
                changes.push(ValueChange {
                    actor: edited_at.actor(),
                    from,
                    to,
                    value: None,
                });
            }
        }
        changes.reverse();
        return Ok(changes);
    }

    /// Apply `update` to every node between `from` and `to` that the editor
    /// had seen. Returns the latest creation tickets of the touched nodes
    /// and the visible ranges that were updated.
    pub fn update_between<F>(
        &mut self,
        from: &SplitPos,
        to: &SplitPos,
        edited_at: TimeTicket,
        created_at_map: Option<&CreatedAtMap>,
        mut update: F,
    ) -> Result<(CreatedAtMap, Vec<(usize, usize)>)>
    where
        F: FnMut(&mut V),
    {
        let (_, to_right) = self.find_node_with_split(to, &edited_at)?;
        let (_, from_right) = self.find_node_with_split(from, &edited_at)?;

        let mut touched_map = CreatedAtMap::default();
        let mut ranges = Vec::new();
        for idx in self.find_between(from_right, to_right) {
            let node = self.node(idx);
            let latest = latest_created_at(created_at_map, &node.id.created_at.actor());
            if !node.can_edit(&edited_at, &latest) {
                continue;
            }
            record_created_at(&mut touched_map, node.id.created_at);
            if node.removed_at.is_some() {
                continue;
            }
            let start = self.index.index_of(node.handle)?;
            ranges.push((start, start + node.value.len()));
            update(&mut self.node_mut(idx).value);
        }
        return Ok((touched_map, ranges));
    }

    // =========================================================================
    // Positions
    // =========================================================================

    /// Position of visible `index`. A boundary resolves to the end of the
    /// left node.
    pub fn index_to_pos(&mut self, index: usize) -> Result<SplitPos> {
        let (idx, offset) = self.index.find(index)?;
        return Ok(SplitPos::new(self.node(idx).id, offset));
    }

    /// Visible index of `pos`. A position inside a tombstone resolves to the
    /// tombstone's place.
    pub fn pos_to_index(&self, pos: &SplitPos, prefer_left: bool) -> Result<usize> {
        let absolute = pos.absolute_id();
        let idx = if prefer_left {
            self.find_floor_prefer_left(&absolute)?
        } else {
            self.find_floor(&absolute)
                .ok_or_else(|| Error::NodeNotFound(absolute.to_string()))?
        };
        let node = self.node(idx);
        let index = self.index.index_of(node.handle)?;
        if node.removed_at.is_some() {
            return Ok(index);
        }
        let offset = (absolute.offset - node.id.offset).min(node.value.len());
        return Ok(index + offset);
    }

    // =========================================================================
    // Garbage collection
    // =========================================================================

    /// Physically drop tombstones removed at or before `ticket`.
    pub fn purge_removed_nodes_before(&mut self, ticket: &TimeTicket) -> Result<usize> {
        let mut count = 0;
        let mut current = self.node(HEAD).next;
        let mut left = HEAD;

        while let Some(start) = current {
            if !self.is_purgeable(start, ticket) {
                left = start;
                current = self.node(start).next;
                continue;
            }

            // Collect a maximal run of purgeable nodes.
            let mut run: SmallVec<[u32; 8]> = SmallVec::new();
            let mut cursor = Some(start);
            while let Some(idx) = cursor {
                if !self.is_purgeable(idx, ticket) {
                    break;
                }
                run.push(idx);
                cursor = self.node(idx).next;
            }

            let right_handle = cursor.map(|idx| self.node(idx).handle);
            self.index.delete_range(self.node(left).handle, right_handle)?;
            self.node_mut(left).next = cursor;
            if let Some(right) = cursor {
                self.node_mut(right).prev = Some(left);
            }
            for idx in run.iter().copied() {
                self.purge_lineage(idx);
                count += 1;
            }
            current = cursor;
        }
        return Ok(count);
    }

    fn is_purgeable(&self, idx: u32, ticket: &TimeTicket) -> bool {
        return match self.node(idx).removed_at {
            Some(removed_at) => !removed_at.after(ticket),
            None => false,
        };
    }

    fn purge_lineage(&mut self, idx: u32) {
        let (id, ins_prev, ins_next) = {
            let node = self.node(idx);
            (node.id, node.ins_prev, node.ins_next)
        };
        if let Some(prev) = ins_prev {
            self.node_mut(prev).ins_next = ins_next;
        }
        if let Some(next) = ins_next {
            self.node_mut(next).ins_prev = ins_prev;
        }
        self.by_id.remove(&id);
        self.removed.remove(&id);
        self.nodes[idx as usize] = None;
        self.free.push(idx);
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Every node after the head in document order, tombstones included.
    pub fn iter(&self) -> SplitIter<'_, V> {
        return SplitIter {
            split: self,
            next: self.node(HEAD).next,
        };
    }
}

/// Iterator over `(id, value, removed_at)` of every node.
pub struct SplitIter<'a, V> {
    split: &'a RgaTreeSplit<V>,
    next: Option<u32>,
}

impl<'a, V: SplitValue> Iterator for SplitIter<'a, V> {
    type Item = (NodeId, &'a V, Option<TimeTicket>);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.next?;
        let node = self.split.node(idx);
        self.next = node.next;
        return Some((node.id, &node.value, node.removed_at));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl SplitValue for String {
        fn len(&self) -> usize {
            return self.chars().count();
        }

        fn split_off(&mut self, offset: usize) -> Self {
            let at = self
                .char_indices()
                .nth(offset)
                .map(|(at, _)| at)
                .unwrap_or(String::len(self));
            return String::split_off(self, at);
        }
    }

    fn actor(byte: u8) -> ActorId {
        return ActorId([byte; 12]);
    }

    fn ticket(lamport: u64, byte: u8) -> TimeTicket {
        return TimeTicket::new(lamport, 1, actor(byte));
    }

    fn text(split: &RgaTreeSplit<String>) -> String {
        return split
            .iter()
            .filter(|(_, _, removed)| removed.is_none())
            .map(|(_, value, _)| value.as_str())
            .collect();
    }

    fn edit(split: &mut RgaTreeSplit<String>, from: usize, to: usize, value: &str, at: TimeTicket) -> SplitEdit<String> {
        let from = split.index_to_pos(from).unwrap();
        let to = split.index_to_pos(to).unwrap();
        return split.edit(&from, &to, at, Some(value.to_string()), None).unwrap();
    }

    #[test]
    fn insert_and_delete() {
        let mut split = RgaTreeSplit::<String>::new();
        edit(&mut split, 0, 0, "hello", ticket(1, 1));
        edit(&mut split, 5, 5, " world", ticket(2, 1));
        assert_eq!(text(&split), "hello world");
        assert_eq!(split.len(), 11);

        let result = edit(&mut split, 2, 7, "", ticket(3, 1));
        assert_eq!(text(&split), "heorld");
        assert_eq!(result.changes.len(), 1);
        assert_eq!((result.changes[0].from, result.changes[0].to), (2, 7));
        assert_eq!(split.garbage_len(), 2);
    }

    #[test]
    fn replace_reports_single_change() {
        let mut split = RgaTreeSplit::<String>::new();
        edit(&mut split, 0, 0, "abcd", ticket(1, 1));
        let result = edit(&mut split, 1, 3, "XY", ticket(2, 1));
        assert_eq!(text(&split), "aXYd");
        assert_eq!(result.changes.len(), 1);
        let change = &result.changes[0];
        assert_eq!((change.from, change.to), (1, 3));
        assert_eq!(change.value.as_deref(), Some("XY"));
        assert_eq!(result.caret.relative_offset, 2);
    }

    #[test]
    fn concurrent_delete_keeps_unseen_insert() {
        let mut split = RgaTreeSplit::<String>::new();
        edit(&mut split, 0, 0, "abcd", ticket(1, 1));
        let from = split.index_to_pos(1).unwrap();
        let to = split.index_to_pos(3).unwrap();

        // Actor 2 inserts inside the range before actor 1's delete arrives.
        let inner = split.index_to_pos(2).unwrap();
        split
            .edit(&inner, &inner, ticket(2, 2), Some("Z".to_string()), None)
            .unwrap();
        assert_eq!(text(&split), "abZcd");

        // Actor 1 had only seen its own insert.
        let mut seen = CreatedAtMap::default();
        seen.insert(actor(1), ticket(1, 1));
        let result = split.edit(&from, &to, ticket(3, 1), None, Some(&seen)).unwrap();
        assert_eq!(text(&split), "aZd");
        assert_eq!(result.changes.len(), 2);
        assert_eq!(result.created_at_map.get(&actor(1)), Some(&ticket(1, 1)));
    }

    #[test]
    fn positions_round_trip() {
        let mut split = RgaTreeSplit::<String>::new();
        edit(&mut split, 0, 0, "abc", ticket(1, 1));
        edit(&mut split, 1, 1, "xy", ticket(2, 1));
        assert_eq!(text(&split), "axybc");
        for i in 0..=split.len() {
            let pos = split.index_to_pos(i).unwrap();
            assert_eq!(split.pos_to_index(&pos, true).unwrap(), i);
        }
    }

    #[test]
    fn purge_removes_runs_and_relinks() {
        let mut split = RgaTreeSplit::<String>::new();
        edit(&mut split, 0, 0, "abcdef", ticket(1, 1));
        edit(&mut split, 1, 3, "", ticket(2, 1));
        edit(&mut split, 2, 3, "", ticket(3, 1));
        assert_eq!(text(&split), "adf");
        assert_eq!(split.garbage_len(), 2);

        assert_eq!(split.purge_removed_nodes_before(&ticket(2, 1)).unwrap(), 1);
        assert_eq!(split.garbage_len(), 1);
        assert_eq!(split.purge_removed_nodes_before(&ticket(9, 1)).unwrap(), 1);
        assert_eq!(split.purge_removed_nodes_before(&ticket(9, 1)).unwrap(), 0);
        assert_eq!(text(&split), "adf");

        // The remaining pieces still accept edits at their boundaries.
        edit(&mut split, 1, 1, "X", ticket(10, 1));
        assert_eq!(text(&split), "aXdf");
        assert_eq!(split.len(), 4);
    }
}
