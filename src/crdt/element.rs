//! The element/tombstone model shared by every replicated type.
//!
//! Every replicated value is an `Element`: a header with its creation
//! ticket (which doubles as its id), an optional move ticket and an optional
//! removal ticket, wrapped around a variant-specific payload. Deletion only
//! sets the removal ticket; the element stays in place as a tombstone until
//! garbage collection frees it.

use crate::crdt::array::CrdtArray;
use crate::crdt::counter::Counter;
use crate::crdt::object::CrdtObject;
use crate::crdt::primitive::Primitive;
use crate::crdt::primitives::TimeTicket;
use crate::crdt::text::CrdtText;
use crate::crdt::tree::CrdtTree;
use crate::error::Error;
use crate::error::Result;

/// Variant payload of an element.
#[derive(Clone, Debug)]
pub enum ElementValue {
    Primitive(Primitive),
    Counter(Counter),
    Object(CrdtObject),
    Array(CrdtArray),
    Text(CrdtText),
    Tree(CrdtTree),
}

/// A replicated value with its lifecycle header.
#[derive(Clone, Debug)]
pub struct Element {
    created_at: TimeTicket,
    moved_at: Option<TimeTicket>,
    removed_at: Option<TimeTicket>,
    value: ElementValue,
}

/// Capability of elements that own child elements.
pub trait Container {
    /// The path segment under which `created_at` lives in this container.
    fn sub_path_of(&self, created_at: &TimeTicket) -> Result<String>;

    /// A child by creation ticket, tombstones included.
    fn child(&self, created_at: &TimeTicket) -> Option<&Element>;

    fn child_mut(&mut self, created_at: &TimeTicket) -> Option<&mut Element>;

    /// Physically remove a child. Only garbage collection calls this.
    fn purge(&mut self, created_at: &TimeTicket) -> Result<Element>;

    /// Every direct child, tombstones included.
    fn children(&self) -> Vec<&Element>;
}

impl Element {
    pub fn new(created_at: TimeTicket, value: ElementValue) -> Element {
        return Element {
            created_at,
            moved_at: None,
            removed_at: None,
            value,
        };
    }

    pub fn primitive(created_at: TimeTicket, value: impl Into<Primitive>) -> Element {
        return Element::new(created_at, ElementValue::Primitive(value.into()));
    }

    pub fn counter(created_at: TimeTicket, value: Counter) -> Element {
        return Element::new(created_at, ElementValue::Counter(value));
    }

    /// An empty object.
    pub fn object(created_at: TimeTicket) -> Element {
        return Element::new(created_at, ElementValue::Object(CrdtObject::new()));
    }

    /// An empty array.
    pub fn array(created_at: TimeTicket) -> Element {
        return Element::new(created_at, ElementValue::Array(CrdtArray::new()));
    }

    /// An empty text.
    pub fn text(created_at: TimeTicket) -> Element {
        return Element::new(created_at, ElementValue::Text(CrdtText::new()));
    }

    pub fn tree(created_at: TimeTicket, tree: CrdtTree) -> Element {
        return Element::new(created_at, ElementValue::Tree(tree));
    }

    #[inline]
    pub fn created_at(&self) -> TimeTicket {
        return self.created_at;
    }

    #[inline]
    pub fn moved_at(&self) -> Option<TimeTicket> {
        return self.moved_at;
    }

    #[inline]
    pub fn removed_at(&self) -> Option<TimeTicket> {
        return self.removed_at;
    }

    #[inline]
    pub fn is_removed(&self) -> bool {
        return self.removed_at.is_some();
    }

    /// The ticket that decides this element's place among its siblings.
    pub fn positioned_at(&self) -> TimeTicket {
        return self.moved_at.unwrap_or(self.created_at);
    }

    /// Record a move. Only a strictly later move is accepted.
    pub fn set_moved_at(&mut self, moved_at: TimeTicket) -> bool {
        match self.moved_at {
            Some(current) if !moved_at.after(&current) => return false,
            _ => {
                self.moved_at = Some(moved_at);
                return true;
            }
        }
    }

    /// Tombstone the element.
    ///
    /// Succeeds only if `removed_at` is after the creation ticket and after
    /// any earlier removal, so the latest removal ticket wins.
    pub fn remove(&mut self, removed_at: TimeTicket) -> bool {
        if !removed_at.after(&self.created_at) {
            return false;
        }
        if let Some(current) = self.removed_at {
            if !removed_at.after(&current) {
                return false;
            }
        }
        self.removed_at = Some(removed_at);
        return true;
    }

    /// Overwrite the removal ticket, bypassing the ordering checks.
    pub(crate) fn set_removed_at(&mut self, removed_at: Option<TimeTicket>) {
        self.removed_at = removed_at;
    }

    pub fn value(&self) -> &ElementValue {
        return &self.value;
    }

    pub fn value_mut(&mut self) -> &mut ElementValue {
        return &mut self.value;
    }

    pub fn type_name(&self) -> &'static str {
        return match &self.value {
            ElementValue::Primitive(p) => p.type_name(),
            ElementValue::Counter(_) => "counter",
            ElementValue::Object(_) => "object",
            ElementValue::Array(_) => "array",
            ElementValue::Text(_) => "text",
            ElementValue::Tree(_) => "tree",
        };
    }

    pub fn to_json(&self) -> String {
        return match &self.value {
            ElementValue::Primitive(p) => p.to_json(),
            ElementValue::Counter(c) => c.to_json(),
            ElementValue::Object(o) => o.to_json(),
            ElementValue::Array(a) => a.to_json(),
            ElementValue::Text(t) => t.to_json(),
            ElementValue::Tree(t) => t.to_json(),
        };
    }

    // =========================================================================
    // Typed access
    // =========================================================================

    fn mismatch(&self, expected: &'static str) -> Error {
        return Error::TypeMismatch {
            expected,
            found: self.type_name(),
        };
    }

    pub fn as_primitive(&self) -> Result<&Primitive> {
        match &self.value {
            ElementValue::Primitive(p) => return Ok(p),
            _ => return Err(self.mismatch("primitive")),
        }
    }

    pub fn as_counter_mut(&mut self) -> Result<&mut Counter> {
        let found = self.type_name();
        match &mut self.value {
            ElementValue::Counter(c) => return Ok(c),
            _ => return Err(Error::TypeMismatch { expected: "counter", found }),
        }
    }

    pub fn as_object(&self) -> Result<&CrdtObject> {
        match &self.value {
            ElementValue::Object(o) => return Ok(o),
            _ => return Err(self.mismatch("object")),
        }
    }

    pub fn as_object_mut(&mut self) -> Result<&mut CrdtObject> {
        let found = self.type_name();
        match &mut self.value {
            ElementValue::Object(o) => return Ok(o),
            _ => return Err(Error::TypeMismatch { expected: "object", found }),
        }
    }

    pub fn as_array(&self) -> Result<&CrdtArray> {
        match &self.value {
            ElementValue::Array(a) => return Ok(a),
            _ => return Err(self.mismatch("array")),
        }
    }

    pub fn as_array_mut(&mut self) -> Result<&mut CrdtArray> {
        let found = self.type_name();
        match &mut self.value {
            ElementValue::Array(a) => return Ok(a),
            _ => return Err(Error::TypeMismatch { expected: "array", found }),
        }
    }

    pub fn as_text(&self) -> Result<&CrdtText> {
        match &self.value {
            ElementValue::Text(t) => return Ok(t),
            _ => return Err(self.mismatch("text")),
        }
    }

    pub fn as_text_mut(&mut self) -> Result<&mut CrdtText> {
        let found = self.type_name();
        match &mut self.value {
            ElementValue::Text(t) => return Ok(t),
            _ => return Err(Error::TypeMismatch { expected: "text", found }),
        }
    }

    pub fn as_tree(&self) -> Result<&CrdtTree> {
        match &self.value {
            ElementValue::Tree(t) => return Ok(t),
            _ => return Err(self.mismatch("tree")),
        }
    }

    pub fn as_tree_mut(&mut self) -> Result<&mut CrdtTree> {
        let found = self.type_name();
        match &mut self.value {
            ElementValue::Tree(t) => return Ok(t),
            _ => return Err(Error::TypeMismatch { expected: "tree", found }),
        }
    }

    pub fn as_container(&self) -> Option<&dyn Container> {
        return match &self.value {
            ElementValue::Object(o) => Some(o),
            ElementValue::Array(a) => Some(a),
            _ => None,
        };
    }

    pub fn as_container_mut(&mut self) -> Option<&mut dyn Container> {
        return match &mut self.value {
            ElementValue::Object(o) => Some(o),
            ElementValue::Array(a) => Some(a),
            _ => None,
        };
    }

    /// True for text and tree elements, which hold removed nodes internally.
    pub fn has_node_garbage(&self) -> bool {
        return match &self.value {
            ElementValue::Text(t) => t.garbage_len() > 0,
            ElementValue::Tree(t) => t.garbage_len() > 0,
            _ => false,
        };
    }

    /// Visit every descendant depth-first, with the ticket of its parent.
    pub fn descendants(&self, visit: &mut dyn FnMut(&Element, TimeTicket)) {
        let Some(container) = self.as_container() else {
            return;
        };
        for child in container.children() {
            visit(child, self.created_at);
            child.descendants(visit);
        }
    }
}
