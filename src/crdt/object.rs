//! Replicated objects: string keys to elements.

use crate::crdt::element::Container;
use crate::crdt::element::Element;
use crate::crdt::primitive::quote;
use crate::crdt::primitives::TimeTicket;
use crate::crdt::rht::ElementRht;
use crate::error::Result;

#[derive(Clone, Debug, Default)]
pub struct CrdtObject {
    members: ElementRht,
}

impl CrdtObject {
    pub fn new() -> CrdtObject {
        return CrdtObject {
            members: ElementRht::new(),
        };
    }

    /// Set a member. Returns the ticket of a member that became a tombstone.
    pub fn set(&mut self, key: &str, value: Element) -> Option<TimeTicket> {
        return self.members.set(key, value);
    }

    pub fn remove(&mut self, created_at: &TimeTicket, executed_at: TimeTicket) -> Result<bool> {
        return self.members.remove(created_at, executed_at);
    }

    pub fn remove_by_key(&mut self, key: &str, executed_at: TimeTicket) -> Result<Option<TimeTicket>> {
        return self.members.remove_by_key(key, executed_at);
    }

    pub fn get(&self, key: &str) -> Option<&Element> {
        return self.members.get(key);
    }

    pub fn get_by_created_at(&self, created_at: &TimeTicket) -> Option<&Element> {
        return self.members.get_by_created_at(created_at);
    }

    pub fn get_by_created_at_mut(&mut self, created_at: &TimeTicket) -> Option<&mut Element> {
        return self.members.get_by_created_at_mut(created_at);
    }

    pub fn has(&self, key: &str) -> bool {
        return self.members.has(key);
    }

    /// Live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        return self.members.iter().map(|(key, _)| key.to_string()).collect();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Element)> {
        return self.members.iter();
    }

    pub fn to_json(&self) -> String {
        let members: Vec<String> = self
            .members
            .iter()
            .map(|(key, element)| format!("{}:{}", quote(key), element.to_json()))
            .collect();
        return format!("{{{}}}", members.join(","));
    }
}

impl Container for CrdtObject {
    fn sub_path_of(&self, created_at: &TimeTicket) -> Result<String> {
        return self.members.sub_path_of(created_at);
    }

    fn child(&self, created_at: &TimeTicket) -> Option<&Element> {
        return self.members.get_by_created_at(created_at);
    }

    fn child_mut(&mut self, created_at: &TimeTicket) -> Option<&mut Element> {
        return self.members.get_by_created_at_mut(created_at);
    }

    fn purge(&mut self, created_at: &TimeTicket) -> Result<Element> {
        return self.members.delete(created_at);
    }

    fn children(&self) -> Vec<&Element> {
        return self.members.elements();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorId;

    fn ticket(lamport: u64) -> TimeTicket {
        return TimeTicket::new(lamport, 1, ActorId([3; 12]));
    }

    #[test]
    fn json_hides_tombstones_and_sorts_keys() {
        let mut object = CrdtObject::new();
        object.set("b", Element::primitive(ticket(1), 2));
        object.set("a", Element::primitive(ticket(2), "x"));
        object.set("c", Element::primitive(ticket(3), true));
        assert_eq!(object.to_json(), "{\"a\":\"x\",\"b\":2,\"c\":true}");

        object.remove_by_key("c", ticket(4)).unwrap();
        assert_eq!(object.to_json(), "{\"a\":\"x\",\"b\":2}");
        assert_eq!(object.keys(), vec!["a", "b"]);
        assert!(!object.has("c"));
        assert!(object.get_by_created_at(&ticket(3)).is_some());
    }

    #[test]
    fn nested_members() {
        let mut inner = Element::object(ticket(1));
        inner
            .as_object_mut()
            .unwrap()
            .set("k", Element::primitive(ticket(2), 1));

        let mut object = CrdtObject::new();
        object.set("inner", inner);
        assert_eq!(object.to_json(), "{\"inner\":{\"k\":1}}");
        assert_eq!(object.sub_path_of(&ticket(1)).unwrap(), "inner");
        assert_eq!(object.children().len(), 1);
    }

    #[test]
    fn purge_drops_member() {
        let mut object = CrdtObject::new();
        object.set("a", Element::primitive(ticket(1), 1));
        object.remove(&ticket(1), ticket(2)).unwrap();
        let purged = object.purge(&ticket(1)).unwrap();
        assert_eq!(purged.created_at(), ticket(1));
        assert!(object.children().is_empty());
        assert!(object.remove(&ticket(1), ticket(3)).is_err());
    }
}
