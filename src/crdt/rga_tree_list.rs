//! Replicated Growable Array over elements.
//!
//! Elements form a doubly linked list in an arena, headed by a sentinel
//! that is always a tombstone. A splay tree indexes the list by visible
//! position: live nodes weigh 1, tombstones weigh 0.
//!
//! Concurrent inserts after the same element converge because an insert
//! skips forward past every node positioned after its own ticket, so the
//! later-stamped insert always ends up closer to the reference node.
//!
//! Complexity:
//! - insert_after / move_after: O(log n) plus the skip over concurrent nodes
//! - get_by_index / remove_by_index: O(log n) amortized
//! - lookup by creation ticket: O(1)

use rustc_hash::FxHashMap;

use crate::crdt::element::Element;
use crate::crdt::primitive::Primitive;
use crate::crdt::primitives::TimeTicket;
use crate::crdt::splay_tree::SplayHandle;
use crate::crdt::splay_tree::SplayTree;
use crate::error::Error;
use crate::error::Result;

const HEAD: u32 = 0;

#[derive(Clone, Debug)]
struct ListNode {
    element: Element,
    prev: Option<u32>,
    next: Option<u32>,
    handle: SplayHandle,
}

#[derive(Clone, Debug)]
pub struct RgaTreeList {
    nodes: Vec<Option<ListNode>>,
    free: Vec<u32>,
    last: u32,
    by_created_at: FxHashMap<TimeTicket, u32>,
    index: SplayTree<u32>,
}

impl Default for RgaTreeList {
    fn default() -> Self {
        return Self::new();
    }
}

impl RgaTreeList {
    pub fn new() -> RgaTreeList {
        let mut head = Element::primitive(TimeTicket::INITIAL, Primitive::Null);
        head.set_removed_at(Some(TimeTicket::INITIAL));

        let mut index = SplayTree::new();
        let handle = index.insert(HEAD, 0);

        let mut by_created_at = FxHashMap::default();
        by_created_at.insert(TimeTicket::INITIAL, HEAD);

        return RgaTreeList {
            nodes: vec![Some(ListNode {
                element: head,
                prev: None,
                next: None,
                handle,
            })],
            free: Vec::new(),
            last: HEAD,
            by_created_at,
            index,
        };
    }

    /// Number of live elements.
    pub fn len(&self) -> usize {
        return self.index.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.len() == 0;
    }

    #[inline]
    fn node(&self, idx: u32) -> &ListNode {
        return match &self.nodes[idx as usize] {
            Some(node) => node,
            None => unreachable!("dangling list index {}", idx),
        };
    }

    #[inline]
    fn node_mut(&mut self, idx: u32) -> &mut ListNode {
        return match &mut self.nodes[idx as usize] {
            Some(node) => node,
            None => unreachable!("dangling list index {}", idx),
        };
    }

    fn find(&self, created_at: &TimeTicket) -> Result<u32> {
        return self
            .by_created_at
            .get(created_at)
            .copied()
            .ok_or(Error::ElementNotFound(*created_at));
    }

    fn weight(element: &Element) -> usize {
        if element.is_removed() {
            return 0;
        }
        return 1;
    }

    /// Starting at `created_at`, skip forward past nodes positioned after
    /// `executed_at`.
    fn find_next_before_executed_at(&self, created_at: &TimeTicket, executed_at: &TimeTicket) -> Result<u32> {
        let mut idx = self.find(created_at)?;
        while let Some(next) = self.node(idx).next {
            if !self.node(next).element.positioned_at().after(executed_at) {
                break;
            }
            idx = next;
        }
        return Ok(idx);
    }

    /// Link an arena node directly after `prev`, in both the list and the
    /// index.
    fn link_after(&mut self, prev: u32, idx: u32) -> Result<()> {
        let next = self.node(prev).next;
        let weight = Self::weight(&self.node(idx).element);
        let handle = self.index.insert_after(Some(self.node(prev).handle), idx, weight)?;

        let node = self.node_mut(idx);
        node.prev = Some(prev);
        node.next = next;
        node.handle = handle;
        self.node_mut(prev).next = Some(idx);
        match next {
            Some(next) => self.node_mut(next).prev = Some(idx),
            None => self.last = idx,
        }
        return Ok(());
    }

    /// Unlink an arena node from the list and the index, keeping its slot.
    fn unlink(&mut self, idx: u32) -> Result<()> {
        let (prev, next, handle) = {
            let node = self.node(idx);
            (node.prev, node.next, node.handle)
        };
        self.index.delete(handle)?;
        if let Some(prev) = prev {
            self.node_mut(prev).next = next;
        }
        match next {
            Some(next) => self.node_mut(next).prev = prev,
            None => self.last = prev.unwrap_or(HEAD),
        }
        let node = self.node_mut(idx);
        node.prev = None;
        node.next = None;
        return Ok(());
    }

    /// Insert `element` after the node created at `prev_created_at`.
    pub fn insert_after(
        &mut self,
        prev_created_at: &TimeTicket,
        element: Element,
        executed_at: TimeTicket,
    ) -> Result<()> {
        let prev = self.find_next_before_executed_at(prev_created_at, &executed_at)?;
        let created_at = element.created_at();

        let node = ListNode {
            element,
            prev: None,
            next: None,
            handle: self.node(HEAD).handle,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx as usize] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                (self.nodes.len() - 1) as u32
            }
        };
        self.by_created_at.insert(created_at, idx);
        return self.link_after(prev, idx);
    }

    /// Append `element` after the last node.
    pub fn push(&mut self, element: Element) -> Result<()> {
        let last = self.node(self.last).element.created_at();
        let executed_at = element.created_at();
        return self.insert_after(&last, element, executed_at);
    }

    /// Move the node created at `created_at` after `prev_created_at`.
    ///
    /// Ignored when the node was already moved at or after `executed_at`.
    pub fn move_after(
        &mut self,
        prev_created_at: &TimeTicket,
        created_at: &TimeTicket,
        executed_at: TimeTicket,
    ) -> Result<bool> {
        let prev = self.find(prev_created_at)?;
        let idx = self.find(created_at)?;
        if prev == idx {
            return Ok(false);
        }
        if let Some(moved_at) = self.node(idx).element.moved_at() {
            if !executed_at.after(&moved_at) {
                return Ok(false);
            }
        }

        self.unlink(idx)?;
        let prev = self.find_next_before_executed_at(prev_created_at, &executed_at)?;
        self.link_after(prev, idx)?;
        self.node_mut(idx).element.set_moved_at(executed_at);
        return Ok(true);
    }

    /// Tombstone the node created at `created_at`. Returns whether its
    /// removal ticket changed.
    pub fn remove(&mut self, created_at: &TimeTicket, executed_at: TimeTicket) -> Result<bool> {
        let idx = self.find(created_at)?;
        if idx == HEAD {
            return Err(Error::ElementNotFound(*created_at));
        }
        if !self.node_mut(idx).element.remove(executed_at) {
            return Ok(false);
        }
        let handle = self.node(idx).handle;
        self.index.set_len(handle, 0)?;
        return Ok(true);
    }

    /// Tombstone the live element at `index`. Returns its creation ticket.
    pub fn remove_by_index(&mut self, index: usize, executed_at: TimeTicket) -> Result<TimeTicket> {
        let created_at = self.get_by_index(index)?.created_at();
        self.remove(&created_at, executed_at)?;
        return Ok(created_at);
    }

    /// The live element at visible `index`.
    pub fn get_by_index(&mut self, index: usize) -> Result<&Element> {
        if index >= self.len() {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        let (mut idx, offset) = self.index.find(index)?;
        if offset > 0 || (index == 0 && idx == HEAD) || self.node(idx).element.is_removed() {
            loop {
                idx = self.node(idx).next.ok_or(Error::IndexOutOfRange {
                    index,
                    len: self.index.len(),
                })?;
                if !self.node(idx).element.is_removed() {
                    break;
                }
            }
        }
        return Ok(&self.node(idx).element);
    }

    pub fn get(&self, created_at: &TimeTicket) -> Option<&Element> {
        let idx = *self.by_created_at.get(created_at)?;
        if idx == HEAD {
            return None;
        }
        return Some(&self.node(idx).element);
    }

    pub fn get_mut(&mut self, created_at: &TimeTicket) -> Option<&mut Element> {
        let idx = *self.by_created_at.get(created_at)?;
        if idx == HEAD {
            return None;
        }
        return Some(&mut self.node_mut(idx).element);
    }

    /// Creation ticket of the nearest live node before `created_at`, or of
    /// the head.
    pub fn get_prev_created_at(&self, created_at: &TimeTicket) -> Result<TimeTicket> {
        let mut idx = self.find(created_at)?;
        loop {
            idx = match self.node(idx).prev {
                Some(prev) => prev,
                None => HEAD,
            };
            if idx == HEAD || !self.node(idx).element.is_removed() {
                break;
            }
        }
        return Ok(self.node(idx).element.created_at());
    }

    /// Creation ticket of the last node, live or not.
    pub fn last_created_at(&self) -> TimeTicket {
        return self.node(self.last).element.created_at();
    }

    /// Position of a node among the live elements before it.
    pub fn index_of(&self, created_at: &TimeTicket) -> Result<usize> {
        let idx = self.find(created_at)?;
        return self.index.index_of(self.node(idx).handle);
    }

    /// Physically drop a node. Only garbage collection calls this.
    pub fn delete(&mut self, created_at: &TimeTicket) -> Result<Element> {
        let idx = self.find(created_at)?;
        if idx == HEAD {
            return Err(Error::ElementNotFound(*created_at));
        }
        self.unlink(idx)?;
        self.by_created_at.remove(created_at);
        self.free.push(idx);
        return match self.nodes[idx as usize].take() {
            Some(node) => Ok(node.element),
            None => Err(Error::ElementNotFound(*created_at)),
        };
    }

    /// Every node after the head in list order, tombstones included.
    pub fn iter(&self) -> ListIter<'_> {
        return ListIter {
            list: self,
            next: self.node(HEAD).next,
        };
    }
}

pub struct ListIter<'a> {
    list: &'a RgaTreeList,
    next: Option<u32>,
}

impl<'a> Iterator for ListIter<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.next?;
        let node = self.list.node(idx);
        self.next = node.next;
        return Some(&node.element);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorId;

    fn ticket(lamport: u64, actor: u8) -> TimeTicket {
        return TimeTicket::new(lamport, 1, ActorId([actor; 12]));
    }

    fn values(list: &RgaTreeList) -> Vec<String> {
        return list
            .iter()
            .filter(|e| !e.is_removed())
            .map(|e| e.to_json())
            .collect();
    }

    #[test]
    fn push_and_index() {
        let mut list = RgaTreeList::new();
        for i in 1..=3 {
            list.push(Element::primitive(ticket(i, 1), i as i32)).unwrap();
        }
        assert_eq!(values(&list), vec!["1", "2", "3"]);
        assert_eq!(list.len(), 3);
        assert_eq!(list.get_by_index(0).unwrap().created_at(), ticket(1, 1));
        assert_eq!(list.get_by_index(2).unwrap().created_at(), ticket(3, 1));
        assert!(list.get_by_index(3).is_err());
        assert_eq!(list.last_created_at(), ticket(3, 1));
    }

    #[test]
    fn concurrent_inserts_after_same_node_converge() {
        let base = Element::primitive(ticket(1, 1), 0);
        let a = Element::primitive(ticket(2, 1), 1);
        let b = Element::primitive(ticket(2, 2), 2);

        let mut forward = RgaTreeList::new();
        forward.push(base.clone()).unwrap();
        forward.insert_after(&ticket(1, 1), a.clone(), ticket(2, 1)).unwrap();
        forward.insert_after(&ticket(1, 1), b.clone(), ticket(2, 2)).unwrap();

        let mut backward = RgaTreeList::new();
        backward.push(base).unwrap();
        backward.insert_after(&ticket(1, 1), b, ticket(2, 2)).unwrap();
        backward.insert_after(&ticket(1, 1), a, ticket(2, 1)).unwrap();

        // The later ticket sits closer to the reference node.
        assert_eq!(values(&forward), vec!["0", "2", "1"]);
        assert_eq!(values(&backward), values(&forward));
    }

    #[test]
    fn remove_skips_tombstones_in_index() {
        let mut list = RgaTreeList::new();
        for i in 1..=4 {
            list.push(Element::primitive(ticket(i, 1), i as i32)).unwrap();
        }
        assert!(list.remove(&ticket(2, 1), ticket(9, 1)).unwrap());
        assert!(!list.remove(&ticket(2, 1), ticket(8, 1)).unwrap());
        assert_eq!(list.len(), 3);
        assert_eq!(list.get_by_index(1).unwrap().created_at(), ticket(3, 1));
        assert_eq!(list.get_prev_created_at(&ticket(3, 1)).unwrap(), ticket(1, 1));
        assert_eq!(list.get_prev_created_at(&ticket(1, 1)).unwrap(), TimeTicket::INITIAL);

        let removed = list.remove_by_index(0, ticket(10, 1)).unwrap();
        assert_eq!(removed, ticket(1, 1));
        assert_eq!(values(&list), vec!["3", "4"]);
        assert_eq!(list.get_by_index(0).unwrap().created_at(), ticket(3, 1));
    }

    #[test]
    fn move_after_last_writer_wins() {
        let mut list = RgaTreeList::new();
        for i in 1..=3 {
            list.push(Element::primitive(ticket(i, 1), i as i32)).unwrap();
        }
        assert!(list.move_after(&ticket(3, 1), &ticket(1, 1), ticket(5, 1)).unwrap());
        assert_eq!(values(&list), vec!["2", "3", "1"]);

        // An older move loses.
        assert!(!list.move_after(&TimeTicket::INITIAL, &ticket(1, 1), ticket(4, 1)).unwrap());
        assert_eq!(values(&list), vec!["2", "3", "1"]);

        assert!(list.move_after(&TimeTicket::INITIAL, &ticket(1, 1), ticket(6, 1)).unwrap());
        assert_eq!(values(&list), vec!["1", "2", "3"]);
        assert_eq!(list.index_of(&ticket(3, 1)).unwrap(), 2);
    }

    #[test]
    fn delete_purges_node() {
        let mut list = RgaTreeList::new();
        list.push(Element::primitive(ticket(1, 1), 1)).unwrap();
        list.push(Element::primitive(ticket(2, 1), 2)).unwrap();
        list.remove(&ticket(2, 1), ticket(3, 1)).unwrap();
        list.delete(&ticket(2, 1)).unwrap();
        assert_eq!(list.last_created_at(), ticket(1, 1));
        assert!(list.get(&ticket(2, 1)).is_none());
        list.push(Element::primitive(ticket(4, 1), 4)).unwrap();
        assert_eq!(values(&list), vec!["1", "4"]);
        assert!(list.delete(&TimeTicket::INITIAL).is_err());
    }
}
