//! Replicated data types.
//!
//! Leaf first:
//! - `primitives`: time tickets, clocks and node ids
//! - `splay_tree`, `index_tree`: positional indexes
//! - `rht`: replicated hash tables
//! - `element`: the element/tombstone model and its variants
//!   (`primitive`, `counter`, `object`, `array`, `text`, `tree`)
//! - `rga_tree_list`, `rga_tree_split`: the sequences behind arrays and text
//! - `root`: the document registry and garbage collection

pub mod array;
pub mod counter;
pub mod element;
pub mod index_tree;
pub mod object;
pub mod primitive;
pub mod primitives;
pub mod rga_tree_list;
pub mod rga_tree_split;
pub mod rht;
pub mod root;
pub mod splay_tree;
pub mod text;
pub mod tree;

pub use array::CrdtArray;
pub use counter::Counter;
pub use element::Element;
pub use element::ElementValue;
pub use object::CrdtObject;
pub use primitive::Primitive;
pub use root::CrdtRoot;
pub use text::CrdtText;
pub use tree::CrdtTree;
