//! Identifier for nodes that may be split.
//!
//! A single insertion into a text or tree creates one node identified by
//! its creation ticket. Later edits may split that node into pieces; each
//! piece keeps the creation ticket and records the offset, within the
//! original insertion, at which it starts.
//!
//! IDs are:
//! - Globally unique: (created_at, offset) pairs never repeat
//! - Totally ordered: by ticket, then offset
//! - Hashable: usable as map keys

use std::cmp::Ordering;

use super::ticket::TimeTicket;

/// Identifies a (possibly split) text run or tree node.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId {
    /// Ticket of the insertion that created the node.
    pub created_at: TimeTicket,
    /// Offset of this piece within the original insertion.
    pub offset: usize,
}

impl NodeId {
    /// Create a new node id.
    pub fn new(created_at: TimeTicket, offset: usize) -> NodeId {
        return NodeId { created_at, offset };
    }

    /// Id of the piece starting `offset` units into this one.
    pub fn split(&self, offset: usize) -> NodeId {
        return NodeId {
            created_at: self.created_at,
            offset: self.offset + offset,
        };
    }

    /// True if both ids come from the same insertion.
    pub fn has_same_created_at(&self, other: &NodeId) -> bool {
        return self.created_at == other.created_at;
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        return Some(self.cmp(other));
    }
}

impl Ord for NodeId {
    fn cmp(&self, other: &Self) -> Ordering {
        return self
            .created_at
            .cmp(&other.created_at)
            .then(self.offset.cmp(&other.offset));
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return write!(f, "NodeId({}/{})", self.created_at, self.offset);
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return write!(f, "{}/{}", self.created_at, self.offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorId;

    #[test]
    fn ordering_is_ticket_then_offset() {
        let early = TimeTicket::new(1, 1, ActorId([1; 12]));
        let late = TimeTicket::new(2, 1, ActorId([1; 12]));

        let a = NodeId::new(early, 5);
        let b = NodeId::new(late, 0);
        let c = NodeId::new(late, 3);

        assert!(a < b);
        assert!(b < c);
        assert_eq!(b.split(3), c);
        assert!(b.has_same_created_at(&c));
        assert!(!a.has_same_created_at(&c));
    }
}
