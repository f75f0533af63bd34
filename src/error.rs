//! Errors raised by the replicated data types.
//!
//! Every error is surfaced synchronously to the immediate caller. A failed
//! local tree edit leaves the tree as it was. A failed text edit may leave
//! the text partially mutated, so callers should treat that error as a
//! signal to reload the document from a snapshot.

use thiserror::Error;

use crate::crdt::primitives::TimeTicket;

/// Errors produced by the replicated data types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// An actor id could not be parsed.
    #[error("invalid actor id: {0:?}")]
    InvalidActorId(String),

    /// No element was created at the given ticket.
    #[error("element not found: {0}")]
    ElementNotFound(TimeTicket),

    /// An element was already created at the given ticket.
    #[error("element already exists: {0}")]
    DuplicateElement(TimeTicket),

    /// No node with the given id exists in a list, text, or tree.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// An object has no member with the given key.
    #[error("key not found: {0:?}")]
    KeyNotFound(String),

    /// A positional lookup went past the end of a sequence.
    #[error("index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// A position does not resolve to a place in the structure.
    #[error("invalid position: {0}")]
    InvalidPosition(String),

    /// A tree path does not resolve to a node.
    #[error("invalid path: {0:?}")]
    InvalidPath(Vec<usize>),

    /// An element had a different type than the operation required.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// The operation is not supported on the given operands.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
