//! # pairtree - Persistent B+ Tree Index
//!
//! `pairtree` is an embeddable, disk-backed B+ tree that maps composite
//! `(key, value)` pairs to an ordered multiset of values per key. It is
//! built to serve as the index layer of a larger storage engine: callers
//! insert and erase individual pairs and retrieve every value bound to a
//! key in ascending order.
//!
//! ## Quick Start
//!
//! ```ignore
//! use pairtree::BPlusTree;
//!
//! let mut tree: BPlusTree<u64, u32> = BPlusTree::builder("./data/index")
//!     .block_size(101)
//!     .cache_size(50)
//!     .open()?;
//!
//! tree.insert(&42, &7)?;
//! tree.insert(&42, &3)?;
//! assert_eq!(tree.find(&42)?, vec![3, 7]);
//! tree.close()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │      Public API (BPlusTree)          │
//! ├─────────────────────────────────────┤
//! │  Tree Algorithm (amortize / split /  │
//! │  merge, cursors, integrity checks)   │
//! ├─────────────────────────────────────┤
//! │  NodeFile (root slot, allocation,    │
//! │  recycling)                          │
//! ├──────────────────┬──────────────────┤
//! │  PageCache       │  FreeList        │
//! ├──────────────────┴──────────────────┤
//! │  PageIO (positional page reads and   │
//! │  writes, sidecar persistence)        │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! A store named `path` lives in two sibling files: `path.dat` holds the
//! node pages, `path.bin` is a small sidecar with the store geometry, the
//! free-page list, and the root page image. A store closes cleanly by
//! flushing dirty pages and rewriting the sidecar; reopening restores the
//! exact observable state.
//!
//! ## Concurrency
//!
//! A tree is a single-threaded structure: mutations take `&mut self` and
//! there is no internal parallelism. The storage layer is internally
//! synchronized only to make its interior mutability sound.
//!
//! ## Module Overview
//!
//! - [`btree`]: the B+ tree algorithm, cursors, builder
//! - [`storage`]: page I/O, free list, page cache, node file
//! - [`key`]: fixed-width key/value encoding trait and implementations
//! - [`config`]: tuning constants and derived thresholds

pub mod btree;
pub mod config;
pub mod key;
pub mod storage;

pub use btree::{BPlusTree, Cursor, SearchResult, TreeBuilder};
pub use key::{FixedKey, FixedStr};
