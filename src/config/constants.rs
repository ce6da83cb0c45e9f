//! # Configuration Constants
//!
//! Centralizes the tuning constants of the tree and its storage layer.
//! Values that depend on each other are co-located so a change to one is
//! visible next to the values it constrains.
//!
//! ## Dependency Graph
//!
//! ```text
//! block_size (builder knob, >= MIN_BLOCK_SIZE)
//!       │
//!       ├─> amort_size = block_size * 2 / 3
//!       │     Fill level below which a sibling accepts donated entries on
//!       │     insert, and at or above which it donates entries on erase.
//!       │
//!       ├─> merge_size = block_size / 3
//!       │     Fill level at or below which an erase triggers rebalancing.
//!       │
//!       └─> page size = round_up(node bytes, PAGE_ALIGN)
//!
//! cache_size (builder knob, >= MIN_CACHE_SIZE)
//!       │
//!       └─> Must cover the working set of one mutation: the descent path
//!           plus two siblings per level, i.e. at least 3 * tree height + 1.
//! ```
//!
//! ## Modifying Constants
//!
//! `amort_size` and `merge_size` form a tested pair. They are derived, not
//! exposed as independent knobs: raising one without the other can make a
//! freshly split node immediately eligible for merging and oscillate.

/// Alignment unit for node pages. Each page is the smallest multiple of
/// this that covers one node.
pub const PAGE_ALIGN: usize = 4096;

/// Size of the node header at the start of every page, and of the child
/// header embedded in every slot.
pub const NODE_HEAD_LEN: usize = 8;

/// Sentinel page index terminating the leaf sibling chain. Also the
/// largest index representable by the header encoding.
pub const NIL_PAGE: u32 = i32::MAX as u32;

/// Smallest supported node capacity. Below this the rebalancing
/// thresholds degenerate.
pub const MIN_BLOCK_SIZE: usize = 10;

/// Default number of pairs per node.
pub const DEFAULT_BLOCK_SIZE: usize = 101;

/// Smallest supported page cache capacity.
pub const MIN_CACHE_SIZE: usize = 8;

/// Default number of resident pages in the cache.
pub const DEFAULT_CACHE_SIZE: usize = 50;

/// Default bucket count for the cache's page-index table.
pub const DEFAULT_TABLE_SIZE: usize = 4095;

/// Fill level steering insert-time and erase-time amortization.
pub const fn amort_size(block_size: usize) -> usize {
    block_size * 2 / 3
}

/// Fill level at or below which erase rebalances a node.
pub const fn merge_size(block_size: usize) -> usize {
    block_size / 3
}

const _: () = assert!(
    merge_size(MIN_BLOCK_SIZE) < amort_size(MIN_BLOCK_SIZE),
    "merge threshold must stay below the amortization threshold"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_are_ordered() {
        for block in MIN_BLOCK_SIZE..=512 {
            assert!(merge_size(block) < amort_size(block));
            assert!(amort_size(block) <= block);
        }
    }

    #[test]
    fn default_block_size_is_valid() {
        assert!(DEFAULT_BLOCK_SIZE >= MIN_BLOCK_SIZE);
    }
}
