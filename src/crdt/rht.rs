//! Replicated hash tables.
//!
//! Two flavours share the same rule: concurrent writes to one key are
//! resolved by ticket, the later ticket wins, and nothing is physically
//! dropped until garbage collection.
//!
//! - `Rht` maps string keys to string values. Text runs and tree elements
//!   use it for their attributes.
//! - `ElementRht` maps string keys to elements. Objects use it for their
//!   members and keep every losing or removed element reachable by its
//!   creation ticket.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::crdt::element::Element;
use crate::crdt::primitive::quote;
use crate::crdt::primitives::TimeTicket;
use crate::error::Error;
use crate::error::Result;

// =============================================================================
// Rht
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
struct RhtNode {
    value: String,
    updated_at: TimeTicket,
    removed: bool,
}

/// A last-writer-wins string table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rht {
    nodes: BTreeMap<String, RhtNode>,
}

impl Rht {
    pub fn new() -> Rht {
        return Rht {
            nodes: BTreeMap::new(),
        };
    }

    /// Set `key` unless a later write is already recorded. Returns whether
    /// the write took effect.
    pub fn set(&mut self, key: &str, value: &str, executed_at: TimeTicket) -> bool {
        if let Some(node) = self.nodes.get(key) {
            if !executed_at.after(&node.updated_at) {
                return false;
            }
        }
        self.nodes.insert(
            key.to_string(),
            RhtNode {
                value: value.to_string(),
                updated_at: executed_at,
                removed: false,
            },
        );
        return true;
    }

    /// Remove `key`. The tombstone is kept so an older, late `set` cannot
    /// bring the key back.
    pub fn remove(&mut self, key: &str, executed_at: TimeTicket) -> bool {
        if let Some(node) = self.nodes.get(key) {
            if !executed_at.after(&node.updated_at) {
                return false;
            }
        }
        self.nodes.insert(
            key.to_string(),
            RhtNode {
                value: String::new(),
                updated_at: executed_at,
                removed: true,
            },
        );
        return true;
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        return self
            .nodes
            .get(key)
            .filter(|node| !node.removed)
            .map(|node| node.value.as_str());
    }

    pub fn has(&self, key: &str) -> bool {
        return self.get(key).is_some();
    }

    /// Live entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        return self
            .nodes
            .iter()
            .filter(|(_, node)| !node.removed)
            .map(|(key, node)| (key.as_str(), node.value.as_str()));
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        return self.iter().count();
    }

    pub fn is_empty(&self) -> bool {
        return self.len() == 0;
    }

    /// Live entries as an owned map.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        return self
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
    }

    pub fn to_json(&self) -> String {
        let members: Vec<String> = self
            .iter()
            .map(|(key, value)| format!("{}:{}", quote(key), quote(value)))
            .collect();
        return format!("{{{}}}", members.join(","));
    }

    /// Attributes in XML form: `a="1" b="2"`.
    pub fn to_xml(&self) -> String {
        let members: Vec<String> = self
            .iter()
            .map(|(key, value)| format!("{}=\"{}\"", key, escape_xml(value)))
            .collect();
        return members.join(" ");
    }
}

/// Escape markup characters for XML text and attribute values.
pub(crate) fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    return out;
}

// =============================================================================
// ElementRht
// =============================================================================

#[derive(Clone, Debug)]
struct ElementRhtNode {
    key: String,
    element: Element,
}

/// Keyed members of an object.
///
/// `by_key` points at the member currently holding each key: the one with
/// the greatest creation ticket. Every member, including losers and
/// tombstones, stays reachable through `by_created_at`.
#[derive(Clone, Debug, Default)]
pub struct ElementRht {
    by_key: BTreeMap<String, TimeTicket>,
    by_created_at: FxHashMap<TimeTicket, ElementRhtNode>,
}

impl ElementRht {
    pub fn new() -> ElementRht {
        return ElementRht {
            by_key: BTreeMap::new(),
            by_created_at: FxHashMap::default(),
        };
    }

    /// Put `value` under `key`.
    ///
    /// Of the current holder and `value`, the one created earlier is
    /// tombstoned with the other's creation ticket. Returns the creation
    /// ticket of the element that became a tombstone, if any.
    pub fn set(&mut self, key: &str, mut value: Element) -> Option<TimeTicket> {
        let created_at = value.created_at();
        let mut removed = None;

        match self.by_key.get(key).copied() {
            None => {
                self.by_key.insert(key.to_string(), created_at);
            }
            Some(holder) if created_at.after(&holder) => {
                if let Some(node) = self.by_created_at.get_mut(&holder) {
                    let was_removed = node.element.is_removed();
                    if node.element.remove(created_at) && !was_removed {
                        removed = Some(holder);
                    }
                }
                self.by_key.insert(key.to_string(), created_at);
            }
            Some(holder) => {
                if value.remove(holder) {
                    removed = Some(created_at);
                }
            }
        }

        self.by_created_at.insert(
            created_at,
            ElementRhtNode {
                key: key.to_string(),
                element: value,
            },
        );
        return removed;
    }

    /// Tombstone the member created at `created_at`. Returns whether its
    /// removal ticket changed.
    pub fn remove(&mut self, created_at: &TimeTicket, executed_at: TimeTicket) -> Result<bool> {
        let node = self
            .by_created_at
            .get_mut(created_at)
            .ok_or(Error::ElementNotFound(*created_at))?;
        return Ok(node.element.remove(executed_at));
    }

    /// Tombstone the member holding `key`. Returns its creation ticket if its
    /// removal ticket changed.
    pub fn remove_by_key(&mut self, key: &str, executed_at: TimeTicket) -> Result<Option<TimeTicket>> {
        let holder = self
            .by_key
            .get(key)
            .copied()
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))?;
        let node = self
            .by_created_at
            .get_mut(&holder)
            .ok_or(Error::ElementNotFound(holder))?;
        if node.element.remove(executed_at) {
            return Ok(Some(holder));
        }
        return Ok(None);
    }

    /// Physically drop a member. Only garbage collection calls this.
    pub fn delete(&mut self, created_at: &TimeTicket) -> Result<Element> {
        let node = self
            .by_created_at
            .remove(created_at)
            .ok_or(Error::ElementNotFound(*created_at))?;
        if self.by_key.get(&node.key) == Some(created_at) {
            self.by_key.remove(&node.key);
        }
        return Ok(node.element);
    }

    /// True if `key` is held by a live member.
    pub fn has(&self, key: &str) -> bool {
        return self.get(key).is_some();
    }

    /// The live member holding `key`.
    pub fn get(&self, key: &str) -> Option<&Element> {
        let holder = self.by_key.get(key)?;
        let node = self.by_created_at.get(holder)?;
        if node.element.is_removed() {
            return None;
        }
        return Some(&node.element);
    }

    pub fn get_by_created_at(&self, created_at: &TimeTicket) -> Option<&Element> {
        return self.by_created_at.get(created_at).map(|node| &node.element);
    }

    pub fn get_by_created_at_mut(&mut self, created_at: &TimeTicket) -> Option<&mut Element> {
        return self
            .by_created_at
            .get_mut(created_at)
            .map(|node| &mut node.element);
    }

    /// The key a member was set under.
    pub fn sub_path_of(&self, created_at: &TimeTicket) -> Result<String> {
        return self
            .by_created_at
            .get(created_at)
            .map(|node| node.key.clone())
            .ok_or(Error::ElementNotFound(*created_at));
    }

    /// Live members in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Element)> {
        return self.by_key.iter().filter_map(|(key, holder)| {
            let node = self.by_created_at.get(holder)?;
            if node.element.is_removed() {
                return None;
            }
            return Some((key.as_str(), &node.element));
        });
    }

    /// Every member, tombstones and losers included, in ticket order.
    pub fn elements(&self) -> Vec<&Element> {
        let mut all: Vec<&Element> = self.by_created_at.values().map(|n| &n.element).collect();
        all.sort_by_key(|element| element.created_at());
        return all;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorId;

    fn ticket(lamport: u64, actor: u8) -> TimeTicket {
        return TimeTicket::new(lamport, 1, ActorId([actor; 12]));
    }

    #[test]
    fn rht_last_writer_wins() {
        let mut rht = Rht::new();
        assert!(rht.set("bold", "true", ticket(2, 1)));
        assert!(!rht.set("bold", "false", ticket(1, 1)));
        assert_eq!(rht.get("bold"), Some("true"));
        assert!(rht.set("bold", "false", ticket(2, 2)));
        assert_eq!(rht.get("bold"), Some("false"));
    }

    #[test]
    fn rht_remove_blocks_older_set() {
        let mut rht = Rht::new();
        assert!(rht.remove("color", ticket(5, 1)));
        assert!(!rht.set("color", "red", ticket(4, 1)));
        assert!(!rht.has("color"));
        assert!(rht.set("color", "blue", ticket(6, 1)));
        assert_eq!(rht.to_json(), "{\"color\":\"blue\"}");
    }

    #[test]
    fn rht_projections_are_sorted() {
        let mut rht = Rht::new();
        rht.set("z", "1", ticket(1, 1));
        rht.set("a", "x\"y", ticket(1, 1));
        assert_eq!(rht.to_json(), "{\"a\":\"x\\\"y\",\"z\":\"1\"}");
        assert_eq!(rht.to_xml(), "a=\"x&quot;y\" z=\"1\"");
    }

    #[test]
    fn element_rht_concurrent_set_converges() {
        let early = Element::primitive(ticket(1, 1), 1);
        let late = Element::primitive(ticket(1, 2), 2);

        let mut forward = ElementRht::new();
        assert_eq!(forward.set("k", early.clone()), None);
        assert_eq!(forward.set("k", late.clone()), Some(ticket(1, 1)));

        let mut backward = ElementRht::new();
        assert_eq!(backward.set("k", late), None);
        assert_eq!(backward.set("k", early), Some(ticket(1, 1)));

        for rht in [&forward, &backward] {
            assert_eq!(rht.get("k").unwrap().created_at(), ticket(1, 2));
            let loser = rht.get_by_created_at(&ticket(1, 1)).unwrap();
            assert_eq!(loser.removed_at(), Some(ticket(1, 2)));
        }
    }

    #[test]
    fn element_rht_remove_and_delete() {
        let mut rht = ElementRht::new();
        rht.set("a", Element::primitive(ticket(1, 1), "x"));
        assert_eq!(rht.remove_by_key("a", ticket(2, 1)).unwrap(), Some(ticket(1, 1)));
        assert!(!rht.has("a"));
        assert_eq!(rht.sub_path_of(&ticket(1, 1)).unwrap(), "a");
        assert!(rht.remove_by_key("missing", ticket(3, 1)).is_err());

        let purged = rht.delete(&ticket(1, 1)).unwrap();
        assert!(purged.is_removed());
        assert!(rht.get_by_created_at(&ticket(1, 1)).is_none());
        assert!(rht.delete(&ticket(1, 1)).is_err());
        assert!(rht.elements().is_empty());
    }
}
