//! Operations: the mutation entry points as values.
//!
//! An `Operation` names its target by creation ticket and carries the
//! ticket it executes at, so the same value can be applied on every
//! replica. Executing an operation performs the container mutation and the
//! registry bookkeeping garbage collection relies on.
//!
//! Text and tree operations carry the editor's causal bound. A local
//! execution (bound `None`) sees everything and records the bound it
//! produced into the operation, ready to be sent to other replicas.

use std::collections::BTreeMap;

use tracing::trace;

use crate::crdt::element::Element;
use crate::crdt::element::ElementValue;
use crate::crdt::primitive::Primitive;
use crate::crdt::primitives::CreatedAtMap;
use crate::crdt::primitives::TimeTicket;
use crate::crdt::root::CrdtRoot;
use crate::crdt::text::TextChange;
use crate::crdt::text::TextPos;
use crate::crdt::tree::TreeChange;
use crate::crdt::tree::TreeContent;
use crate::crdt::tree::TreePos;
use crate::error::Error;
use crate::error::Result;

#[derive(Clone, Debug)]
pub enum Operation {
    /// Set a key of an object.
    Set {
        parent_created_at: TimeTicket,
        key: String,
        value: Element,
        executed_at: TimeTicket,
    },
    /// Insert into an array after `prev_created_at`.
    Add {
        parent_created_at: TimeTicket,
        prev_created_at: TimeTicket,
        value: Element,
        executed_at: TimeTicket,
    },
    /// Move an array element after `prev_created_at`.
    Move {
        parent_created_at: TimeTicket,
        prev_created_at: TimeTicket,
        created_at: TimeTicket,
        executed_at: TimeTicket,
    },
    /// Remove an element from an object or array.
    Remove {
        parent_created_at: TimeTicket,
        created_at: TimeTicket,
        executed_at: TimeTicket,
    },
    /// Increase the counter created at `parent_created_at`.
    Increase {
        parent_created_at: TimeTicket,
        value: Primitive,
        executed_at: TimeTicket,
    },
    Edit {
        parent_created_at: TimeTicket,
        from: TextPos,
        to: TextPos,
        content: String,
        attributes: Option<BTreeMap<String, String>>,
        created_at_map: Option<CreatedAtMap>,
        executed_at: TimeTicket,
    },
    Style {
        parent_created_at: TimeTicket,
        from: TextPos,
        to: TextPos,
        attributes: BTreeMap<String, String>,
        created_at_map: Option<CreatedAtMap>,
        executed_at: TimeTicket,
    },
    TreeEdit {
        parent_created_at: TimeTicket,
        from: TreePos,
        to: TreePos,
        contents: Option<Vec<TreeContent>>,
        split_level: usize,
        created_at_map: Option<CreatedAtMap>,
        executed_at: TimeTicket,
    },
    TreeStyle {
        parent_created_at: TimeTicket,
        from: TreePos,
        to: TreePos,
        attributes: BTreeMap<String, String>,
        created_at_map: Option<CreatedAtMap>,
        executed_at: TimeTicket,
    },
    TreeRemoveStyle {
        parent_created_at: TimeTicket,
        from: TreePos,
        to: TreePos,
        attributes_to_remove: Vec<String>,
        created_at_map: Option<CreatedAtMap>,
        executed_at: TimeTicket,
    },
}

/// What an executed operation did, addressed by path.
#[derive(Clone, Debug, PartialEq)]
pub enum OpInfo {
    Set { path: String, key: String },
    Add { path: String, index: usize },
    Move { path: String, index: usize },
    Remove { path: String, key: Option<String>, index: Option<usize> },
    Increase { path: String, value: Primitive },
    Edit { path: String, changes: Vec<TextChange> },
    Style { path: String, changes: Vec<TextChange> },
    TreeEdit { path: String, changes: Vec<TreeChange> },
    TreeStyle { path: String, changes: Vec<TreeChange> },
}

/// Keep the first bound: a replayed operation must not widen it.
fn stamp(slot: &mut Option<CreatedAtMap>, produced: CreatedAtMap) {
    if slot.is_none() {
        *slot = Some(produced);
    }
}

impl Operation {
    /// The container (or counter) the operation targets.
    pub fn parent_created_at(&self) -> TimeTicket {
        return match self {
            Operation::Set { parent_created_at, .. }
            | Operation::Add { parent_created_at, .. }
            | Operation::Move { parent_created_at, .. }
            | Operation::Remove { parent_created_at, .. }
            | Operation::Increase { parent_created_at, .. }
            | Operation::Edit { parent_created_at, .. }
            | Operation::Style { parent_created_at, .. }
            | Operation::TreeEdit { parent_created_at, .. }
            | Operation::TreeStyle { parent_created_at, .. }
            | Operation::TreeRemoveStyle { parent_created_at, .. } => *parent_created_at,
        };
    }

    pub fn executed_at(&self) -> TimeTicket {
        return match self {
            Operation::Set { executed_at, .. }
            | Operation::Add { executed_at, .. }
            | Operation::Move { executed_at, .. }
            | Operation::Remove { executed_at, .. }
            | Operation::Increase { executed_at, .. }
            | Operation::Edit { executed_at, .. }
            | Operation::Style { executed_at, .. }
            | Operation::TreeEdit { executed_at, .. }
            | Operation::TreeStyle { executed_at, .. }
            | Operation::TreeRemoveStyle { executed_at, .. } => *executed_at,
        };
    }

    /// Apply the operation to `root`.
    pub fn execute(&mut self, root: &mut CrdtRoot) -> Result<Vec<OpInfo>> {
        let parent_created_at = self.parent_created_at();
        match self {
            Operation::Set {
                key,
                value,
                executed_at,
                ..
            } => {
                let created_at = value.created_at();
                if root.find_by_created_at(&created_at).is_some() {
                    return Err(Error::DuplicateElement(created_at));
                }
                let object = root.element_mut(&parent_created_at)?.as_object_mut()?;
                let removed = object.set(key, value.clone());
                root.register_element(value, parent_created_at);
                if let Some(removed) = removed {
                    root.register_removed_element(removed);
                }
                if root
                    .find_by_created_at(&created_at)
                    .is_some_and(|element| element.is_removed() && removed != Some(created_at))
                {
                    root.register_removed_element(created_at);
                }
                trace!(key = %key, executed_at = %executed_at, "set");
                return Ok(vec![OpInfo::Set {
                    path: root.create_path(&parent_created_at)?,
                    key: key.clone(),
                }]);
            }

            Operation::Add {
                prev_created_at,
                value,
                executed_at,
                ..
            } => {
                let created_at = value.created_at();
                if root.find_by_created_at(&created_at).is_some() {
                    return Err(Error::DuplicateElement(created_at));
                }
                let array = root.element_mut(&parent_created_at)?.as_array_mut()?;
                array.insert_after(prev_created_at, value.clone(), *executed_at)?;
                let index = array.index_of(&created_at)?;
                root.register_element(value, parent_created_at);
                return Ok(vec![OpInfo::Add {
                    path: root.create_path(&parent_created_at)?,
                    index,
                }]);
            }

            Operation::Move {
                prev_created_at,
                created_at,
                executed_at,
                ..
            } => {
                let array = root.element_mut(&parent_created_at)?.as_array_mut()?;
                if !array.move_after(prev_created_at, created_at, *executed_at)? {
                    return Ok(Vec::new());
                }
                let index = array.index_of(created_at)?;
                return Ok(vec![OpInfo::Move {
                    path: root.create_path(&parent_created_at)?,
                    index,
                }]);
            }

            Operation::Remove {
                created_at,
                executed_at,
                ..
            } => {
                let parent = root.element_mut(&parent_created_at)?;
                let found = parent.type_name();
                let (key, index, removed) = match parent.value_mut() {
                    ElementValue::Object(object) => {
                        let key = object
                            .iter()
                            .find(|(_, element)| element.created_at() == *created_at)
                            .map(|(key, _)| key.to_string());
                        let removed = object.remove(created_at, *executed_at)?;
                        (key, None, removed)
                    }
                    ElementValue::Array(array) => {
                        let index = array
                            .get(created_at)
                            .filter(|element| !element.is_removed())
                            .map(|_| array.index_of(created_at))
                            .transpose()?;
                        let removed = array.remove(created_at, *executed_at)?;
                        (None, index, removed)
                    }
                    _ => {
                        return Err(Error::TypeMismatch {
                            expected: "object or array",
                            found,
                        });
                    }
                };
                if !removed {
                    return Ok(Vec::new());
                }
                root.register_removed_element(*created_at);
                return Ok(vec![OpInfo::Remove {
                    path: root.create_path(&parent_created_at)?,
                    key,
                    index,
                }]);
            }

            Operation::Increase { value, .. } => {
                root.element_mut(&parent_created_at)?
                    .as_counter_mut()?
                    .increase(value)?;
                return Ok(vec![OpInfo::Increase {
                    path: root.create_path(&parent_created_at)?,
                    value: value.clone(),
                }]);
            }

            Operation::Edit {
                from,
                to,
                content,
                attributes,
                created_at_map,
                executed_at,
                ..
            } => {
                let text = root.element_mut(&parent_created_at)?.as_text_mut()?;
                let result = text.edit(
                    from,
                    to,
                    content,
                    attributes.as_ref(),
                    *executed_at,
                    created_at_map.as_ref(),
                )?;
                let has_garbage = text.garbage_len() > 0;
                stamp(created_at_map, result.created_at_map);
                if has_garbage {
                    root.register_element_has_garbage(parent_created_at);
                }
                return Ok(vec![OpInfo::Edit {
                    path: root.create_path(&parent_created_at)?,
                    changes: result.changes,
                }]);
            }

            Operation::Style {
                from,
                to,
                attributes,
                created_at_map,
                executed_at,
                ..
            } => {
                let text = root.element_mut(&parent_created_at)?.as_text_mut()?;
                let (changes, touched) =
                    text.style(from, to, attributes, *executed_at, created_at_map.as_ref())?;
                stamp(created_at_map, touched);
                return Ok(vec![OpInfo::Style {
                    path: root.create_path(&parent_created_at)?,
                    changes,
                }]);
            }

            Operation::TreeEdit {
                from,
                to,
                contents,
                split_level,
                created_at_map,
                executed_at,
                ..
            } => {
                let tree = root.element_mut(&parent_created_at)?.as_tree_mut()?;
                let result = tree.edit(
                    from,
                    to,
                    contents.as_deref(),
                    *split_level,
                    *executed_at,
                    created_at_map.as_ref(),
                )?;
                let has_garbage = tree.garbage_len() > 0;
                stamp(created_at_map, result.created_at_map);
                if has_garbage {
                    root.register_element_has_garbage(parent_created_at);
                }
                return Ok(vec![OpInfo::TreeEdit {
                    path: root.create_path(&parent_created_at)?,
                    changes: result.changes,
                }]);
            }

            Operation::TreeStyle {
                from,
                to,
                attributes,
                created_at_map,
                executed_at,
                ..
            } => {
                let tree = root.element_mut(&parent_created_at)?.as_tree_mut()?;
                let (changes, touched) =
                    tree.style(from, to, attributes, *executed_at, created_at_map.as_ref())?;
                stamp(created_at_map, touched);
                return Ok(vec![OpInfo::TreeStyle {
                    path: root.create_path(&parent_created_at)?,
                    changes,
                }]);
            }

            Operation::TreeRemoveStyle {
                from,
                to,
                attributes_to_remove,
                created_at_map,
                executed_at,
                ..
            } => {
                let tree = root.element_mut(&parent_created_at)?.as_tree_mut()?;
                let (changes, touched) = tree.remove_style(
                    from,
                    to,
                    attributes_to_remove,
                    *executed_at,
                    created_at_map.as_ref(),
                )?;
                stamp(created_at_map, touched);
                return Ok(vec![OpInfo::TreeStyle {
                    path: root.create_path(&parent_created_at)?,
                    changes,
                }]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorId;
    use crate::crdt::counter::Counter;

    fn ticket(lamport: u64) -> TimeTicket {
        return TimeTicket::new(lamport, 1, ActorId([4; 12]));
    }

    fn set(key: &str, value: Element) -> Operation {
        let executed_at = value.created_at();
        return Operation::Set {
            parent_created_at: TimeTicket::INITIAL,
            key: key.to_string(),
            value,
            executed_at,
        };
    }

    #[test]
    fn set_add_and_remove() {
        let mut root = CrdtRoot::new();
        set("list", Element::array(ticket(1))).execute(&mut root).unwrap();
        let infos = Operation::Add {
            parent_created_at: ticket(1),
            prev_created_at: TimeTicket::INITIAL,
            value: Element::primitive(ticket(2), "x"),
            executed_at: ticket(2),
        }
        .execute(&mut root)
        .unwrap();
        assert_eq!(
            infos,
            vec![OpInfo::Add {
                path: "$.list".to_string(),
                index: 0,
            }]
        );
        assert_eq!(root.to_json(), "{\"list\":[\"x\"]}");

        let infos = Operation::Remove {
            parent_created_at: ticket(1),
            created_at: ticket(2),
            executed_at: ticket(3),
        }
        .execute(&mut root)
        .unwrap();
        assert_eq!(
            infos,
            vec![OpInfo::Remove {
                path: "$.list".to_string(),
                key: None,
                index: Some(0),
            }]
        );
        assert_eq!(root.removed_element_len(), 1);
        assert_eq!(root.to_json(), "{\"list\":[]}");
    }

    #[test]
    fn overwriting_a_key_registers_the_loser() {
        let mut root = CrdtRoot::new();
        set("k", Element::primitive(ticket(1), 1)).execute(&mut root).unwrap();
        set("k", Element::primitive(ticket(2), 2)).execute(&mut root).unwrap();
        assert_eq!(root.to_json(), "{\"k\":2}");
        assert_eq!(root.removed_element_len(), 1);

        // A late, older write loses and becomes garbage at once.
        set("k", Element::primitive(TimeTicket::new(1, 2, ActorId([4; 12])), 3))
            .execute(&mut root)
            .unwrap();
        assert_eq!(root.to_json(), "{\"k\":2}");
        assert_eq!(root.removed_element_len(), 2);
    }

    #[test]
    fn rejected_set_and_add_register_nothing() {
        let mut root = CrdtRoot::new();
        set("list", Element::array(ticket(1))).execute(&mut root).unwrap();
        let registered = root.element_map_len();

        let error = Operation::Set {
            parent_created_at: ticket(9),
            key: "k".to_string(),
            value: Element::primitive(ticket(2), 1),
            executed_at: ticket(2),
        }
        .execute(&mut root)
        .unwrap_err();
        assert_eq!(error, Error::ElementNotFound(ticket(9)));

        let error = Operation::Set {
            parent_created_at: ticket(1),
            key: "k".to_string(),
            value: Element::primitive(ticket(3), 1),
            executed_at: ticket(3),
        }
        .execute(&mut root);
        assert!(error.is_err());

        let error = Operation::Add {
            parent_created_at: ticket(1),
            prev_created_at: ticket(8),
            value: Element::primitive(ticket(4), 1),
            executed_at: ticket(4),
        }
        .execute(&mut root);
        assert!(error.is_err());
        assert_eq!(root.element_map_len(), registered);
        assert!(root.find_by_created_at(&ticket(2)).is_none());

        // A reused ticket keeps its place.
        let error = set("other", Element::primitive(ticket(1), 2))
            .execute(&mut root)
            .unwrap_err();
        assert_eq!(error, Error::DuplicateElement(ticket(1)));
        assert_eq!(root.create_path(&ticket(1)).unwrap(), "$.list");
        assert_eq!(root.to_json(), "{\"list\":[]}");
    }

    #[test]
    fn increase_counter() {
        let mut root = CrdtRoot::new();
        let counter = Counter::from_primitive(&Primitive::Integer(1)).unwrap();
        set("n", Element::counter(ticket(1), counter)).execute(&mut root).unwrap();
        Operation::Increase {
            parent_created_at: ticket(1),
            value: Primitive::Integer(2),
            executed_at: ticket(2),
        }
        .execute(&mut root)
        .unwrap();
        assert_eq!(root.to_json(), "{\"n\":3}");

        let error = Operation::Increase {
            parent_created_at: ticket(1),
            value: Primitive::String("x".to_string()),
            executed_at: ticket(3),
        }
        .execute(&mut root);
        assert!(error.is_err());
    }

    #[test]
    fn local_edit_stamps_its_bound() {
        let mut root = CrdtRoot::new();
        set("t", Element::text(ticket(1))).execute(&mut root).unwrap();
        let (from, to) = root
            .element_mut(&ticket(1))
            .unwrap()
            .as_text_mut()
            .unwrap()
            .index_range_to_pos_range(0, 0)
            .unwrap();
        let mut op = Operation::Edit {
            parent_created_at: ticket(1),
            from,
            to,
            content: "hi".to_string(),
            attributes: None,
            created_at_map: None,
            executed_at: ticket(2),
        };
        let infos = op.execute(&mut root).unwrap();
        assert_eq!(root.to_json(), "{\"t\":[{\"val\":\"hi\"}]}");
        assert!(matches!(&infos[0], OpInfo::Edit { path, .. } if path == "$.t"));
        assert!(matches!(op, Operation::Edit { created_at_map: Some(_), .. }));
    }
}
