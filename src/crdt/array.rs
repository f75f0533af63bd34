//! Replicated arrays.

use crate::crdt::element::Container;
use crate::crdt::element::Element;
use crate::crdt::primitives::TimeTicket;
use crate::crdt::rga_tree_list::RgaTreeList;
use crate::error::Error;
use crate::error::Result;

#[derive(Clone, Debug, Default)]
pub struct CrdtArray {
    elements: RgaTreeList,
}

impl CrdtArray {
    pub fn new() -> CrdtArray {
        return CrdtArray {
            elements: RgaTreeList::new(),
        };
    }

    /// Insert `value` after the element created at `prev_created_at`
    /// (`TimeTicket::INITIAL` for the front).
    pub fn insert_after(
        &mut self,
        prev_created_at: &TimeTicket,
        value: Element,
        executed_at: TimeTicket,
    ) -> Result<()> {
        return self.elements.insert_after(prev_created_at, value, executed_at);
    }

    /// Append `value` at the end.
    pub fn push(&mut self, value: Element) -> Result<()> {
        return self.elements.push(value);
    }

    pub fn move_after(
        &mut self,
        prev_created_at: &TimeTicket,
        created_at: &TimeTicket,
        executed_at: TimeTicket,
    ) -> Result<bool> {
        return self.elements.move_after(prev_created_at, created_at, executed_at);
    }

    pub fn remove(&mut self, created_at: &TimeTicket, executed_at: TimeTicket) -> Result<bool> {
        return self.elements.remove(created_at, executed_at);
    }

    pub fn remove_by_index(&mut self, index: usize, executed_at: TimeTicket) -> Result<TimeTicket> {
        return self.elements.remove_by_index(index, executed_at);
    }

    /// An element by creation ticket, tombstones included.
    pub fn get(&self, created_at: &TimeTicket) -> Option<&Element> {
        return self.elements.get(created_at);
    }

    pub fn get_mut(&mut self, created_at: &TimeTicket) -> Option<&mut Element> {
        return self.elements.get_mut(created_at);
    }

    pub fn get_by_index(&mut self, index: usize) -> Result<&Element> {
        return self.elements.get_by_index(index);
    }

    pub fn get_prev_created_at(&self, created_at: &TimeTicket) -> Result<TimeTicket> {
        return self.elements.get_prev_created_at(created_at);
    }

    pub fn last_created_at(&self) -> TimeTicket {
        return self.elements.last_created_at();
    }

    /// Visible index of an element.
    pub fn index_of(&self, created_at: &TimeTicket) -> Result<usize> {
        return self.elements.index_of(created_at);
    }

    /// Number of live elements.
    pub fn len(&self) -> usize {
        return self.elements.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.elements.is_empty();
    }

    /// Live elements in order.
    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        return self.elements.iter().filter(|element| !element.is_removed());
    }

    pub fn to_json(&self) -> String {
        let items: Vec<String> = self.iter().map(|element| element.to_json()).collect();
        return format!("[{}]", items.join(","));
    }
}

impl Container for CrdtArray {
    fn sub_path_of(&self, created_at: &TimeTicket) -> Result<String> {
        if self.elements.get(created_at).is_none() {
            return Err(Error::ElementNotFound(*created_at));
        }
        return Ok(self.elements.index_of(created_at)?.to_string());
    }

    fn child(&self, created_at: &TimeTicket) -> Option<&Element> {
        return self.elements.get(created_at);
    }

    fn child_mut(&mut self, created_at: &TimeTicket) -> Option<&mut Element> {
        return self.elements.get_mut(created_at);
    }

    fn purge(&mut self, created_at: &TimeTicket) -> Result<Element> {
        return self.elements.delete(created_at);
    }

    fn children(&self) -> Vec<&Element> {
        return self.elements.iter().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorId;

    fn ticket(lamport: u64) -> TimeTicket {
        return TimeTicket::new(lamport, 1, ActorId([5; 12]));
    }

    #[test]
    fn json_and_paths() {
        let mut array = CrdtArray::new();
        array.push(Element::primitive(ticket(1), "a")).unwrap();
        array.push(Element::array(ticket(2))).unwrap();
        array
            .get_mut(&ticket(2))
            .unwrap()
            .as_array_mut()
            .unwrap()
            .push(Element::primitive(ticket(3), 1))
            .unwrap();
        assert_eq!(array.to_json(), "[\"a\",[1]]");
        assert_eq!(array.sub_path_of(&ticket(2)).unwrap(), "1");

        array.remove(&ticket(1), ticket(4)).unwrap();
        assert_eq!(array.to_json(), "[[1]]");
        assert_eq!(array.sub_path_of(&ticket(2)).unwrap(), "0");
        assert_eq!(array.children().len(), 2);
        assert!(array.sub_path_of(&ticket(9)).is_err());
    }
}
