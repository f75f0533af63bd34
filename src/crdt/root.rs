//! Document root, element registry and garbage collection.
//!
//! The root owns the top-level object. Next to it, the registry records
//! for every element the creation ticket of its parent, so any element can
//! be reached from the root by walking that chain and descending through
//! containers. Two sets feed garbage collection: removed elements, and
//! text or tree elements that hold removed nodes.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::crdt::element::Element;
use crate::crdt::element::ElementValue;
use crate::crdt::object::CrdtObject;
use crate::crdt::primitives::TimeTicket;
use crate::error::Error;
use crate::error::Result;

#[derive(Clone, Debug)]
pub struct CrdtRoot {
    root: Element,
    /// Creation ticket to parent creation ticket. The root maps to `None`.
    parents: FxHashMap<TimeTicket, Option<TimeTicket>>,
    removed: BTreeSet<TimeTicket>,
    /// Text and tree elements holding removed nodes.
    garbage: BTreeSet<TimeTicket>,
}

impl Default for CrdtRoot {
    fn default() -> Self {
        return CrdtRoot::new();
    }
}

/// Escape the path separators in a key.
fn escape_path(segment: &str) -> String {
    return segment.replace('\\', "\\\\").replace('$', "\\$").replace('.', "\\.");
}

impl CrdtRoot {
    /// An empty document: a root object created at `TimeTicket::INITIAL`.
    pub fn new() -> CrdtRoot {
        let root = Element::object(TimeTicket::INITIAL);
        let mut parents = FxHashMap::default();
        parents.insert(root.created_at(), None);
        return CrdtRoot {
            root,
            parents,
            removed: BTreeSet::new(),
            garbage: BTreeSet::new(),
        };
    }

    pub fn root_element(&self) -> &Element {
        return &self.root;
    }

    pub fn object(&self) -> Result<&CrdtObject> {
        return self.root.as_object();
    }

    /// Creation tickets from the root's child down to `created_at`.
    fn ancestry(&self, created_at: &TimeTicket) -> Option<Vec<TimeTicket>> {
        let mut chain = Vec::new();
        let mut current = *created_at;
        while let Some(parent) = *self.parents.get(&current)? {
            chain.push(current);
            current = parent;
        }
        chain.reverse();
        return Some(chain);
    }

    pub fn find_by_created_at(&self, created_at: &TimeTicket) -> Option<&Element> {
        let chain = self.ancestry(created_at)?;
        let mut element = &self.root;
        for ticket in chain {
            element = element.as_container()?.child(&ticket)?;
        }
        return Some(element);
    }

    pub fn find_by_created_at_mut(&mut self, created_at: &TimeTicket) -> Option<&mut Element> {
        let chain = self.ancestry(created_at)?;
        let mut element = &mut self.root;
        for ticket in chain {
            element = element.as_container_mut()?.child_mut(&ticket)?;
        }
        return Some(element);
    }

    /// Like `find_by_created_at_mut`, failing with `ElementNotFound`.
    pub fn element_mut(&mut self, created_at: &TimeTicket) -> Result<&mut Element> {
        return self
            .find_by_created_at_mut(created_at)
            .ok_or(Error::ElementNotFound(*created_at));
    }

    /// JSONPath-like path of an element: `$.todos.0.title`.
    pub fn create_path(&self, created_at: &TimeTicket) -> Result<String> {
        let chain = self
            .ancestry(created_at)
            .ok_or(Error::ElementNotFound(*created_at))?;
        let mut path = String::from("$");
        let mut element = &self.root;
        for ticket in chain {
            let container = element.as_container().ok_or(Error::ElementNotFound(ticket))?;
            path.push('.');
            path.push_str(&escape_path(&container.sub_path_of(&ticket)?));
            element = container.child(&ticket).ok_or(Error::ElementNotFound(ticket))?;
        }
        return Ok(path);
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Register `element` and its descendants under `parent`.
    pub fn register_element(&mut self, element: &Element, parent: TimeTicket) {
        self.register_one(element, parent);
        element.descendants(&mut |child, parent| self.register_one(child, parent));
        debug!(created_at = %element.created_at(), parent = %parent, "register element");
    }

    fn register_one(&mut self, element: &Element, parent: TimeTicket) {
        let created_at = element.created_at();
        self.parents.insert(created_at, Some(parent));
        if element.is_removed() {
            self.removed.insert(created_at);
        }
        if element.has_node_garbage() {
            self.garbage.insert(created_at);
        }
    }

    pub fn register_removed_element(&mut self, created_at: TimeTicket) {
        self.removed.insert(created_at);
    }

    pub fn register_element_has_garbage(&mut self, created_at: TimeTicket) {
        self.garbage.insert(created_at);
    }

    /// Forget an element and its descendants. Returns how many were
    /// forgotten.
    pub fn deregister_element(&mut self, created_at: &TimeTicket) -> usize {
        let mut tickets = vec![*created_at];
        if let Some(element) = self.find_by_created_at(created_at) {
            element.descendants(&mut |child, _| tickets.push(child.created_at()));
        }

        let mut count = 0;
        for ticket in tickets {
            if self.parents.remove(&ticket).is_some() {
                count += 1;
            }
            self.removed.remove(&ticket);
            self.garbage.remove(&ticket);
        }
        return count;
    }

    /// Number of registered elements, the root included.
    pub fn element_map_len(&self) -> usize {
        return self.parents.len();
    }

    pub fn removed_element_len(&self) -> usize {
        return self.removed.len();
    }

    /// Elements and nodes that garbage collection could free: removed
    /// elements with their descendants, plus removed text and tree nodes.
    pub fn garbage_len(&self) -> usize {
        let mut seen: FxHashSet<TimeTicket> = FxHashSet::default();
        let mut count = 0;
        for created_at in self.removed.iter() {
            if seen.insert(*created_at) {
                count += 1;
            }
            if let Some(element) = self.find_by_created_at(created_at) {
                element.descendants(&mut |child, _| {
                    if seen.insert(child.created_at()) {
                        count += 1;
                    }
                });
            }
        }

        for created_at in self.garbage.iter() {
            count += match self.find_by_created_at(created_at).map(|element| element.value()) {
                Some(ElementValue::Text(text)) => text.garbage_len(),
                Some(ElementValue::Tree(tree)) => tree.garbage_len(),
                _ => 0,
            };
        }
        return count;
    }

    /// Physically free everything removed at or before `ticket`. Returns
    /// the number of elements and nodes freed.
    pub fn garbage_collect(&mut self, ticket: &TimeTicket) -> Result<usize> {
        let candidates: Vec<TimeTicket> = self
            .removed
            .iter()
            .copied()
            .filter(|created_at| {
                self.find_by_created_at(created_at)
                    .and_then(|element| element.removed_at())
                    .is_some_and(|removed_at| !removed_at.after(ticket))
            })
            .collect();

        let mut count = 0;
        for created_at in candidates {
            // Gone with an ancestor.
            let Some(parent) = self.parents.get(&created_at).copied() else {
                continue;
            };
            let parent = parent.ok_or_else(|| Error::Unsupported("the root cannot be collected".to_string()))?;
            count += self.deregister_element(&created_at);
            self.element_mut(&parent)?
                .as_container_mut()
                .ok_or(Error::ElementNotFound(parent))?
                .purge(&created_at)?;
        }

        let holders: Vec<TimeTicket> = self.garbage.iter().copied().collect();
        for created_at in holders {
            let (freed, remaining) = match self.find_by_created_at_mut(&created_at).map(|element| element.value_mut()) {
                Some(ElementValue::Text(text)) => (text.purge_removed_nodes_before(ticket)?, text.garbage_len()),
                Some(ElementValue::Tree(tree)) => (tree.purge_removed_nodes_before(ticket), tree.garbage_len()),
                _ => (0, 0),
            };
            count += freed;
            if remaining == 0 {
                self.garbage.remove(&created_at);
            }
        }

        debug!(ticket = %ticket, freed = count, "garbage collect");
        return Ok(count);
    }

    pub fn to_json(&self) -> String {
        return self.root.to_json();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorId;

    fn ticket(lamport: u64) -> TimeTicket {
        return TimeTicket::new(lamport, 1, ActorId([3; 12]));
    }

    /// `{"a.b":{"list":[1]}}`
    fn nested() -> CrdtRoot {
        let mut root = CrdtRoot::new();
        let mut object = Element::object(ticket(1));
        let mut array = Element::array(ticket(2));
        array
            .as_array_mut()
            .unwrap()
            .push(Element::primitive(ticket(3), 1))
            .unwrap();
        object.as_object_mut().unwrap().set("list", array);
        root.register_element(&object, TimeTicket::INITIAL);
        root.element_mut(&TimeTicket::INITIAL)
            .unwrap()
            .as_object_mut()
            .unwrap()
            .set("a.b", object);
        return root;
    }

    #[test]
    fn find_and_paths() {
        let root = nested();
        assert_eq!(root.element_map_len(), 4);
        assert_eq!(root.to_json(), "{\"a.b\":{\"list\":[1]}}");
        assert_eq!(root.find_by_created_at(&ticket(3)).unwrap().to_json(), "1");
        assert_eq!(root.create_path(&ticket(3)).unwrap(), "$.a\\.b.list.0");
        assert_eq!(root.create_path(&TimeTicket::INITIAL).unwrap(), "$");
        assert!(root.create_path(&ticket(9)).is_err());
    }

    #[test]
    fn collect_removed_subtree() {
        let mut root = nested();
        root.element_mut(&TimeTicket::INITIAL)
            .unwrap()
            .as_object_mut()
            .unwrap()
            .remove(&ticket(1), ticket(4))
            .unwrap();
        root.register_removed_element(ticket(1));
        assert_eq!(root.to_json(), "{}");
        assert_eq!(root.garbage_len(), 3);

        assert_eq!(root.garbage_collect(&ticket(3)).unwrap(), 0);
        assert_eq!(root.garbage_collect(&ticket(4)).unwrap(), 3);
        assert_eq!(root.garbage_collect(&ticket(4)).unwrap(), 0);
        assert_eq!(root.garbage_len(), 0);
        assert_eq!(root.element_map_len(), 1);
        assert!(root.find_by_created_at(&ticket(2)).is_none());
    }
}
