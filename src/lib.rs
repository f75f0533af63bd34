//! Tandem - replicated data types for collaborative documents.
//!
//! Replicas apply concurrent, causally unordered edits to shared objects,
//! arrays, counters, rich text and trees, and converge to the same state
//! without coordination. Every mutation carries a `TimeTicket` issued by
//! the caller; conflicts are resolved by comparing tickets.
//!
//! # Quick Start
//!
//! ```
//! use tandem::actor::ActorId;
//! use tandem::crdt::element::Element;
//! use tandem::crdt::primitives::LogicalClock;
//! use tandem::crdt::primitives::TimeTicket;
//! use tandem::crdt::root::CrdtRoot;
//! use tandem::operation::Operation;
//!
//! let mut clock = LogicalClock::new(ActorId::derive("alice"));
//! let mut root = CrdtRoot::new();
//!
//! let created_at = clock.tick();
//! let mut op = Operation::Set {
//!     parent_created_at: TimeTicket::INITIAL,
//!     key: "title".to_string(),
//!     value: Element::primitive(created_at, "hello"),
//!     executed_at: created_at,
//! };
//! op.execute(&mut root).unwrap();
//! assert_eq!(root.to_json(), r#"{"title":"hello"}"#);
//! ```

pub mod actor;
pub mod crdt;
pub mod error;
pub mod operation;

pub use error::Error;
pub use error::Result;
