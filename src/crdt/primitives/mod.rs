//! Shared primitives for the replicated data types.
//!
//! # Primitives
//!
//! ## Clocks
//! - `TimeTicket`: totally ordered (lamport, delimiter, actor) timestamp
//! - `LogicalClock`: issues tickets for one actor
//! - `CreatedAtMap`: per-actor causal bound carried by text and tree edits
//!
//! ## IDs
//! - `NodeId`: identifies a (possibly split) text run or tree node

pub mod id;
pub mod ticket;

pub use id::NodeId;
pub use ticket::CreatedAtMap;
pub use ticket::LogicalClock;
pub use ticket::TimeTicket;
pub use ticket::MAX_DELIMITER;
pub use ticket::MAX_LAMPORT;
