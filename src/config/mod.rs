//! Configuration constants for the tree and storage layers.
//!
//! Import from here rather than redefining values locally:
//!
//! ```ignore
//! use crate::config::{NODE_HEAD_LEN, NIL_PAGE};
//! ```

mod constants;

pub use constants::{
    amort_size, merge_size, DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_SIZE, DEFAULT_TABLE_SIZE,
    MIN_BLOCK_SIZE, MIN_CACHE_SIZE, NIL_PAGE, NODE_HEAD_LEN, PAGE_ALIGN,
};
