//! # B+ Tree Index
//!
//! Disk-backed B+ tree over fixed-width `(key, value)` pairs, the core of
//! the crate. The tree maps each key to an ordered multiset of values and
//! keeps all data in leaf pages chained for forward scans; inner pages
//! route by the smallest pair of each subtree.
//!
//! ```text
//!                    [root: inner, in memory]
//!                    /          |           \
//!            [inner]        [inner]        [inner]
//!            /  |  \        /  |  \        /  |  \
//!        [leaf][leaf] ... chained in ascending pair order ... [leaf]
//!           |----->|----->|----->|----->|----->|----->| (NIL)
//! ```
//!
//! ## Rebalancing Strategy
//!
//! Both insert and erase rebalance lazily: structural changes (split,
//! merge) happen only after amortization — shifting entries to or from a
//! sibling — has been ruled out. The thresholds are derived from the node
//! capacity: siblings below two thirds full absorb an overflow, siblings
//! at or above two thirds donate to an underflow, and nodes at or below
//! one third trigger the erase-side rebalancing in the first place.
//!
//! ## Module Organization
//!
//! - `node`: page layout, head encoding, slot operations, searches
//! - `tree`: the algorithm (insert, erase, find, integrity check)
//! - `cursor`: forward iteration over the leaf chain
//! - `builder`: configuration and open

mod builder;
mod cursor;
mod node;
mod tree;

pub use builder::TreeBuilder;
pub use cursor::Cursor;
pub use node::{copy_slots, Head, Layout, NodeKind, NodeMut, NodeRef, SearchResult};
pub use tree::BPlusTree;
