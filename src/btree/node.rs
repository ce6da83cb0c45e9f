//! # Node Layout and Slot Operations
//!
//! Every page holds one node: an 8-byte [`Head`] followed by an array of
//! fixed-width slots. A slot is a child header (same 8-byte shape as the
//! node head) plus one encoded `(key, value)` pair. Pages reserve
//! `block_size + 1` slots so a node can transiently hold one entry past
//! capacity while its parent decides between amortization and a split.
//!
//! ```text
//! Offset              Content
//! ------              -------
//! 0                   Head { state, count }
//! 8 + i * SLOT_LEN    slot i: child Head | key bytes | value bytes
//! ```
//!
//! ## Head Encoding
//!
//! `state` packs a page link and the node kind into one little-endian i32
//! using complement form: a non-negative value is an inner node whose link
//! is `state` itself, a negative value is a leaf whose link is `!state`.
//! For a node's own head the link is the next sibling in the leaf chain
//! (`NIL_PAGE` terminates it); for the child header inside a slot the link
//! is the child's page index. `count` is the number of occupied slots.
//!
//! In an inner node, slot `i` carries the smallest pair of the subtree
//! rooted at its child, so the slot array doubles as a routing table: the
//! first slot's pair is the subtree's lower bound. In a leaf, slots carry
//! real data in ascending pair order and the child header bytes are
//! unused.
//!
//! ## Views
//!
//! [`NodeRef`] and [`NodeMut`] are borrowed views over a page's bytes,
//! typed by the key and value encodings. All slot offsets are compile-time
//! arithmetic over `FixedKey::ENCODED_LEN`. Accessors bounds-check against
//! the page length, which permits the transient overflow slot while still
//! catching runaway indices.

use std::marker::PhantomData;

use eyre::{ensure, Result};
use zerocopy::little_endian::{I32, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{amort_size, merge_size, NIL_PAGE, NODE_HEAD_LEN, PAGE_ALIGN};
use crate::key::FixedKey;
use crate::storage::Geometry;

/// Role of a node, encoded in the sign of its head's `state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Inner,
    Leaf,
}

/// Node header, and also the child header embedded in every slot.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Head {
    state: I32,
    count: U32,
}

const _: () = assert!(size_of::<Head>() == NODE_HEAD_LEN);

impl Head {
    pub fn new(kind: NodeKind, link: u32, count: u32) -> Self {
        debug_assert!(link <= NIL_PAGE, "page link {} out of range", link);
        let state = match kind {
            NodeKind::Inner => link as i32,
            NodeKind::Leaf => !(link as i32),
        };
        Self {
            state: I32::new(state),
            count: U32::new(count),
        }
    }

    pub fn kind(&self) -> NodeKind {
        if self.is_inner() {
            NodeKind::Inner
        } else {
            NodeKind::Leaf
        }
    }

    pub fn is_inner(&self) -> bool {
        self.state.get() >= 0
    }

    pub fn is_leaf(&self) -> bool {
        !self.is_inner()
    }

    /// The encoded page link: child index in a slot header, next sibling
    /// in a node's own head.
    pub fn link(&self) -> u32 {
        let state = self.state.get();
        if state >= 0 {
            state as u32
        } else {
            !state as u32
        }
    }

    pub fn count(&self) -> usize {
        self.count.get() as usize
    }

    /// Replaces the link, preserving the node kind.
    pub fn set_link(&mut self, link: u32) {
        *self = Self::new(self.kind(), link, self.count.get());
    }

    pub fn set_count(&mut self, count: usize) {
        self.count = U32::new(count as u32);
    }

    pub fn read_from(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() >= NODE_HEAD_LEN,
            "buffer too small for Head: {} < {}",
            bytes.len(),
            NODE_HEAD_LEN
        );
        Head::read_from_bytes(&bytes[..NODE_HEAD_LEN])
            .map_err(|e| eyre::eyre!("failed to read Head: {:?}", e))
    }
}

/// Derived sizing for one store: slot and page widths plus the
/// rebalancing thresholds that go with `block_size`.
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub block_size: usize,
    pub slot_len: usize,
    pub page_bytes: usize,
    pub amort_size: usize,
    pub merge_size: usize,
}

impl Layout {
    pub fn new(pair_len: usize, block_size: usize) -> Self {
        let slot_len = NODE_HEAD_LEN + pair_len;
        let raw = NODE_HEAD_LEN + (block_size + 1) * slot_len;
        let page_bytes = raw.div_ceil(PAGE_ALIGN) * PAGE_ALIGN;
        Self {
            block_size,
            slot_len,
            page_bytes,
            amort_size: amort_size(block_size),
            merge_size: merge_size(block_size),
        }
    }

    pub fn for_pair<K: FixedKey, V: FixedKey>(block_size: usize) -> Self {
        Self::new(K::ENCODED_LEN + V::ENCODED_LEN, block_size)
    }

    pub fn geometry(&self) -> Geometry {
        Geometry {
            page_bytes: self.page_bytes,
            pair_len: self.slot_len - NODE_HEAD_LEN,
            block_size: self.block_size,
        }
    }
}

/// Result of an exact pair search over a slot range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    /// The pair exists at this slot.
    Found(usize),
    /// The pair is absent; this is its insertion position.
    NotFound(usize),
}

/// Read-only view of one node page.
#[derive(Debug)]
pub struct NodeRef<'a, K, V> {
    data: &'a [u8],
    _pair: PhantomData<(K, V)>,
}

/// Mutable view of one node page.
pub struct NodeMut<'a, K, V> {
    data: &'a mut [u8],
    _pair: PhantomData<(K, V)>,
}

impl<'a, K: FixedKey, V: FixedKey> NodeRef<'a, K, V> {
    pub const SLOT_LEN: usize = NODE_HEAD_LEN + K::ENCODED_LEN + V::ENCODED_LEN;

    pub fn new(data: &'a [u8]) -> Result<Self> {
        ensure!(
            data.len() >= NODE_HEAD_LEN + Self::SLOT_LEN,
            "page of {} bytes too small for a node",
            data.len()
        );
        Ok(Self {
            data,
            _pair: PhantomData,
        })
    }

    pub fn head(&self) -> Head {
        Head::read_from_bytes(&self.data[..NODE_HEAD_LEN]).expect("validated at construction")
    }

    pub fn count(&self) -> usize {
        self.head().count()
    }

    fn slot_offset(&self, index: usize) -> Result<usize> {
        let offset = NODE_HEAD_LEN + index * Self::SLOT_LEN;
        ensure!(
            offset + Self::SLOT_LEN <= self.data.len(),
            "slot index {} beyond page capacity",
            index
        );
        Ok(offset)
    }

    /// Child header of slot `index`. Meaningful only in inner nodes.
    pub fn child(&self, index: usize) -> Result<Head> {
        let offset = self.slot_offset(index)?;
        Head::read_from(&self.data[offset..])
    }

    pub fn key_at(&self, index: usize) -> Result<K> {
        let offset = self.slot_offset(index)? + NODE_HEAD_LEN;
        Ok(K::read_from(&self.data[offset..offset + K::ENCODED_LEN]))
    }

    pub fn value_at(&self, index: usize) -> Result<V> {
        let offset = self.slot_offset(index)? + NODE_HEAD_LEN + K::ENCODED_LEN;
        Ok(V::read_from(&self.data[offset..offset + V::ENCODED_LEN]))
    }

    pub fn pair_at(&self, index: usize) -> Result<(K, V)> {
        Ok((self.key_at(index)?, self.value_at(index)?))
    }

    /// Searches `[l, r)` for the exact pair `(key, val)` under the
    /// composite order, key first.
    pub fn binary_search(&self, key: &K, val: &V, mut l: usize, mut r: usize) -> Result<SearchResult> {
        while l != r {
            let mid = (l + r) / 2;
            let (mid_key, mid_val) = self.pair_at(mid)?;
            match key.cmp(&mid_key).then_with(|| val.cmp(&mid_val)) {
                std::cmp::Ordering::Greater => l = mid + 1,
                std::cmp::Ordering::Less => r = mid,
                std::cmp::Ordering::Equal => return Ok(SearchResult::Found(mid)),
            }
        }
        Ok(SearchResult::NotFound(l))
    }

    /// First slot in `[l, r)` whose key is not below `key`.
    pub fn lower_bound(&self, key: &K, mut l: usize, mut r: usize) -> Result<usize> {
        while l != r {
            let mid = (l + r) / 2;
            if *key > self.key_at(mid)? {
                l = mid + 1;
            } else {
                r = mid;
            }
        }
        Ok(l)
    }

    /// First slot in `[l, r)` whose key is above `key`.
    pub fn upper_bound(&self, key: &K, mut l: usize, mut r: usize) -> Result<usize> {
        while l != r {
            let mid = (l + r) / 2;
            if *key >= self.key_at(mid)? {
                l = mid + 1;
            } else {
                r = mid;
            }
        }
        Ok(l)
    }
}

impl<'a, K: FixedKey, V: FixedKey> NodeMut<'a, K, V> {
    pub const SLOT_LEN: usize = NODE_HEAD_LEN + K::ENCODED_LEN + V::ENCODED_LEN;

    pub fn new(data: &'a mut [u8]) -> Result<Self> {
        ensure!(
            data.len() >= NODE_HEAD_LEN + Self::SLOT_LEN,
            "page of {} bytes too small for a node",
            data.len()
        );
        Ok(Self {
            data,
            _pair: PhantomData,
        })
    }

    /// Read-only reborrow, for inspecting mid-mutation.
    pub fn as_ref(&self) -> NodeRef<'_, K, V> {
        NodeRef {
            data: self.data,
            _pair: PhantomData,
        }
    }

    pub fn head_mut(&mut self) -> &mut Head {
        Head::mut_from_bytes(&mut self.data[..NODE_HEAD_LEN]).expect("validated at construction")
    }

    pub fn set_head(&mut self, head: Head) {
        self.data[..NODE_HEAD_LEN].copy_from_slice(head.as_bytes());
    }

    pub fn set_count(&mut self, count: usize) {
        self.head_mut().set_count(count);
    }

    fn slot_offset(&self, index: usize) -> Result<usize> {
        let offset = NODE_HEAD_LEN + index * Self::SLOT_LEN;
        ensure!(
            offset + Self::SLOT_LEN <= self.data.len(),
            "slot index {} beyond page capacity",
            index
        );
        Ok(offset)
    }

    pub fn child_mut(&mut self, index: usize) -> Result<&mut Head> {
        let offset = self.slot_offset(index)?;
        Head::mut_from_bytes(&mut self.data[offset..offset + NODE_HEAD_LEN])
            .map_err(|e| eyre::eyre!("failed to read child Head: {:?}", e))
    }

    pub fn set_child(&mut self, index: usize, head: Head) -> Result<()> {
        let offset = self.slot_offset(index)?;
        self.data[offset..offset + NODE_HEAD_LEN].copy_from_slice(head.as_bytes());
        Ok(())
    }

    pub fn set_child_count(&mut self, index: usize, count: usize) -> Result<()> {
        self.child_mut(index)?.set_count(count);
        Ok(())
    }

    pub fn set_pair(&mut self, index: usize, key: &K, val: &V) -> Result<()> {
        let offset = self.slot_offset(index)? + NODE_HEAD_LEN;
        key.write_to(&mut self.data[offset..offset + K::ENCODED_LEN]);
        let offset = offset + K::ENCODED_LEN;
        val.write_to(&mut self.data[offset..offset + V::ENCODED_LEN]);
        Ok(())
    }

    pub fn write_slot(&mut self, index: usize, head: Head, key: &K, val: &V) -> Result<()> {
        self.set_child(index, head)?;
        self.set_pair(index, key, val)
    }

    /// Moves `n` whole slots from index `from` to index `to` within this
    /// node. Ranges may overlap.
    pub fn move_slots(&mut self, from: usize, to: usize, n: usize) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let src = self.slot_offset(from)?;
        self.slot_offset(from + n - 1)?;
        let dst = self.slot_offset(to)?;
        self.slot_offset(to + n - 1)?;
        self.data.copy_within(src..src + n * Self::SLOT_LEN, dst);
        Ok(())
    }
}

/// Copies `n` whole slots across pages, from `src` starting at `src_at`
/// into `dst` starting at `dst_at`.
pub fn copy_slots<K: FixedKey, V: FixedKey>(
    dst: &mut NodeMut<'_, K, V>,
    dst_at: usize,
    src: &NodeRef<'_, K, V>,
    src_at: usize,
    n: usize,
) -> Result<()> {
    if n == 0 {
        return Ok(());
    }
    let slot_len = NODE_HEAD_LEN + K::ENCODED_LEN + V::ENCODED_LEN;
    let src_off = src.slot_offset(src_at)?;
    src.slot_offset(src_at + n - 1)?;
    let dst_off = dst.slot_offset(dst_at)?;
    dst.slot_offset(dst_at + n - 1)?;
    dst.data[dst_off..dst_off + n * slot_len]
        .copy_from_slice(&src.data[src_off..src_off + n * slot_len]);
    Ok(())
}
