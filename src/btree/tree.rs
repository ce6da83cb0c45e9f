//! # B+ Tree Algorithm
//!
//! Ordered `(key, value)` pairs across fixed-capacity node pages, with
//! rebalancing that prefers amortization over structural change: an
//! overfull node first tries to shed entries into an underfull sibling
//! and only splits when both neighbors are too full to help; an underfull
//! node first tries to borrow from an overfull sibling and only merges
//! when both neighbors are too empty to donate. Splits and merges are the
//! fallback, so bulk loads and bulk deletes touch far fewer pages than a
//! split-always tree.
//!
//! ## Ordering
//!
//! The tree is keyed by the composite `(key, value)` pair: key order
//! first, value order second. A key therefore maps to a multiset of
//! values, retrieved in ascending value order, and an exact duplicate
//! pair is a no-op on insert.
//!
//! ## Recursion Shape
//!
//! Insert and erase descend recursively. Each frame resolves its node
//! through the cache, recurses into one child, and reports upward whether
//! the parent must adjust, handing back a visitor to the node it touched.
//! The parent mirrors the child's slot count, refreshes its routing pair
//! when the subtree minimum moved, and rebalances when the child left its
//! fill bounds. Trees are shallow (logarithmic in the node capacity), so
//! recursion depth is never a concern.
//!
//! ## Root Special Cases
//!
//! The root is an inner node held in memory for the store's lifetime.
//! The first insert materializes a single leaf under it; an overflowing
//! root is split into two inner children; an erase that leaves the root
//! with two mergeable inner children flattens them back into the root,
//! and the last child is recycled when it empties, returning the tree to
//! its freshly created state.

use std::marker::PhantomData;
use std::path::Path;

use eyre::{ensure, Result};

use crate::config::NIL_PAGE;
use crate::key::FixedKey;
use crate::storage::{NodeFile, Visitor, ROOT_PAGE_NO};

use super::builder::TreeBuilder;
use super::cursor::Cursor;
use super::node::{copy_slots, Head, Layout, NodeKind, NodeMut, NodeRef, SearchResult};

/// Persistent B+ tree mapping composite `(key, value)` pairs.
pub struct BPlusTree<K: FixedKey, V: FixedKey> {
    file: NodeFile,
    layout: Layout,
    _pair: PhantomData<(K, V)>,
}

impl<K: FixedKey, V: FixedKey> std::fmt::Debug for BPlusTree<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree").field("layout", &self.layout).finish()
    }
}

/// What an insert frame tells its parent.
enum InsertStep<'a> {
    /// Nothing changed (the pair already existed).
    Clean,
    /// The node gained an entry; the parent must mirror its count and
    /// may need to rebalance it.
    Grew(Visitor<'a>),
}

/// What an erase frame tells its parent.
enum EraseStep<'a> {
    /// Nothing the parent must react to.
    Clean,
    /// The node changed; the parent must mirror its count and refresh
    /// its routing pair if the subtree minimum moved.
    Touched(Visitor<'a>),
}

impl<K: FixedKey, V: FixedKey> BPlusTree<K, V> {
    /// Starts configuring a tree at `path` (`<path>.dat` / `<path>.bin`).
    pub fn builder(path: impl AsRef<Path>) -> TreeBuilder<K, V> {
        TreeBuilder::new(path.as_ref())
    }

    /// Opens the tree at `path` with default settings.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::builder(path).open()
    }

    pub(crate) fn from_parts(file: NodeFile, layout: Layout) -> Self {
        Self {
            file,
            layout,
            _pair: PhantomData,
        }
    }

    fn node<'v>(&self, vis: &'v Visitor<'_>) -> Result<NodeRef<'v, K, V>> {
        NodeRef::new(vis.page())
    }

    fn node_mut<'v>(&self, vis: &'v mut Visitor<'_>) -> Result<NodeMut<'v, K, V>> {
        NodeMut::new(vis.modify())
    }

    fn root_head(&self) -> Head {
        // INVARIANT: the root slot is page-sized and always holds a head.
        Head::read_from(self.file.root().page()).expect("root page holds a node head")
    }

    /// Whether the tree holds no pairs.
    pub fn is_empty(&self) -> bool {
        self.root_head().count() == 0
    }

    /// One past the largest page index ever allocated for this store.
    pub fn page_count(&self) -> u32 {
        self.file.page_count()
    }

    /// Writes all dirty state to disk.
    pub fn flush(&self) -> Result<()> {
        self.file.flush()
    }

    /// Flushes and consumes the tree. The checked form of `Drop`.
    pub fn close(self) -> Result<()> {
        self.file.flush()
    }

    /// Inserts `(key, val)`. Inserting a pair already present is a no-op.
    pub fn insert(&mut self, key: &K, val: &V) -> Result<()> {
        if self.is_empty() {
            return self.insert_root(key, val);
        }

        let grew = matches!(
            self.insert_at(self.root_head(), key, val)?,
            InsertStep::Grew(_)
        );
        if grew && self.root_head().count() > self.layout.block_size {
            self.split_root()?;
        }
        Ok(())
    }

    /// Erases `(key, val)`. Erasing an absent pair is a no-op.
    pub fn erase(&mut self, key: &K, val: &V) -> Result<()> {
        if !self.is_empty() {
            self.erase_at(self.root_head(), key, val)?;
        }
        Ok(())
    }

    /// All values bound to `key`, in ascending value order.
    pub fn find(&self, key: &K) -> Result<Vec<V>> {
        self.find_if(key, |_| true)
    }

    /// As `find`, keeping only values accepted by `pred`.
    pub fn find_if<F: FnMut(&V) -> bool>(&self, key: &K, mut pred: F) -> Result<Vec<V>> {
        let mut out = Vec::new();
        if self.is_empty() {
            return Ok(out);
        }

        let head = self.descend_to_leaf(key)?;
        let mut vis = self.file.get(head.link())?;
        let mut x = {
            let node = self.node(&vis)?;
            node.lower_bound(key, 0, node.count())?
        };

        loop {
            let next = {
                let node = self.node(&vis)?;
                let count = node.count();
                while x < count {
                    let (k, v) = node.pair_at(x)?;
                    if k != *key {
                        return Ok(out);
                    }
                    if pred(&v) {
                        out.push(v);
                    }
                    x += 1;
                }
                node.head().link()
            };

            if next == NIL_PAGE {
                return Ok(out);
            }
            vis = self.file.get(next)?;
            x = 0;
        }
    }

    /// Cursor positioned at the first pair whose key is not below `key`.
    pub fn cursor(&self, key: &K) -> Result<Cursor<'_, K, V>> {
        if self.is_empty() {
            return Ok(Cursor::exhausted(&self.file));
        }

        let head = self.descend_to_leaf(key)?;
        let vis = self.file.get(head.link())?;
        let x = {
            let node = self.node(&vis)?;
            node.lower_bound(key, 0, node.count())?
        };
        Cursor::new(&self.file, vis, x)
    }

    /// Walks inner levels toward the leaf that may contain `key`. Slot 0
    /// of each inner node acts as an implicit lower bound, so the routing
    /// search skips it.
    fn descend_to_leaf(&self, key: &K) -> Result<Head> {
        let mut head = self.root_head();
        while head.is_inner() {
            let vis = self.file.get(head.link())?;
            let node = self.node(&vis)?;
            let x = node.lower_bound(key, 1, node.count())? - 1;
            head = node.child(x)?;
        }
        Ok(head)
    }

    /// First insert into an empty tree: one leaf under the root.
    fn insert_root(&mut self, key: &K, val: &V) -> Result<()> {
        let mut leaf = self.file.allocate()?;
        let leaf_no = leaf.page_no();
        {
            let mut m = self.node_mut(&mut leaf)?;
            m.set_head(Head::new(NodeKind::Leaf, NIL_PAGE, 1));
            m.set_pair(0, key, val)?;
        }

        let mut root = self.file.root();
        let mut m = self.node_mut(&mut root)?;
        m.set_count(1);
        m.write_slot(0, Head::new(NodeKind::Leaf, leaf_no, 1), key, val)?;
        Ok(())
    }

    fn insert_at(&self, head: Head, key: &K, val: &V) -> Result<InsertStep<'_>> {
        if head.is_leaf() {
            return self.insert_leaf(head, key, val);
        }

        let mut this = self.file.get(head.link())?;
        let search = {
            let node = self.node(&this)?;
            ensure!(
                node.count() == head.count(),
                "recorded child count {} does not match node count {} at page {}",
                head.count(),
                node.count(),
                this.page_no()
            );
            let count = node.count();
            node.binary_search(key, val, 0, count)?
        };

        let x = match search {
            SearchResult::Found(_) => return Ok(InsertStep::Clean),
            SearchResult::NotFound(0) => {
                // New minimum of this subtree: adopt it as slot 0's
                // routing pair and descend there.
                self.node_mut(&mut this)?.set_pair(0, key, val)?;
                0
            }
            SearchResult::NotFound(x) => x - 1,
        };

        let child_head = self.node(&this)?.child(x)?;
        let mut child = match self.insert_at(child_head, key, val)? {
            InsertStep::Clean => return Ok(InsertStep::Clean),
            InsertStep::Grew(child) => child,
        };

        let child_count = self.node(&child)?.count();
        self.node_mut(&mut this)?.set_child_count(x, child_count)?;

        if child_count <= self.layout.block_size {
            return Ok(InsertStep::Clean);
        }
        if self.insert_amortize(&mut this, x, &mut child)? {
            return Ok(InsertStep::Clean);
        }

        self.split_child(&mut this, x, child)?;
        Ok(InsertStep::Grew(this))
    }

    fn insert_leaf(&self, head: Head, key: &K, val: &V) -> Result<InsertStep<'_>> {
        let mut this = self.file.get(head.link())?;
        let (count, search) = {
            let node = self.node(&this)?;
            ensure!(
                node.count() == head.count(),
                "recorded child count {} does not match leaf count {} at page {}",
                head.count(),
                node.count(),
                this.page_no()
            );
            let count = node.count();
            (count, node.binary_search(key, val, 0, count)?)
        };

        let x = match search {
            SearchResult::Found(_) => return Ok(InsertStep::Clean),
            SearchResult::NotFound(x) => x,
        };

        {
            let mut m = self.node_mut(&mut this)?;
            m.move_slots(x, x + 1, count - x)?;
            m.set_pair(x, key, val)?;
            m.set_count(count + 1);
        }
        Ok(InsertStep::Grew(this))
    }

    /// Tries to shed entries from the overfull child at slot `x` into a
    /// sibling below the amortization threshold, preferring the smaller
    /// of two eligible siblings.
    fn insert_amortize(
        &self,
        parent: &mut Visitor<'_>,
        x: usize,
        child: &mut Visitor<'_>,
    ) -> Result<bool> {
        let (pcount, left_head, right_head) = {
            let p = self.node(parent)?;
            let pcount = p.count();
            let left = if x > 0 { Some(p.child(x - 1)?) } else { None };
            let right = if x + 1 < pcount {
                Some(p.child(x + 1)?)
            } else {
                None
            };
            (pcount, left, right)
        };
        debug_assert!(x < pcount);

        let mut use_left =
            left_head.is_some_and(|h| h.count() < self.layout.amort_size);
        let mut use_right =
            right_head.is_some_and(|h| h.count() < self.layout.amort_size);
        if use_left && use_right {
            // Both eligible: hand entries to the smaller one.
            if left_head.unwrap().count() > right_head.unwrap().count() {
                use_left = false;
            } else {
                use_right = false;
            }
        }

        if use_left {
            let mut left = self.file.get(left_head.unwrap().link())?;
            self.donate_left(&mut left, child)?;

            let left_count = self.node(&left)?.count();
            let child_count = self.node(child)?.count();
            let (ck, cv) = self.node(child)?.pair_at(0)?;
            let mut m = self.node_mut(parent)?;
            m.set_child_count(x - 1, left_count)?;
            m.set_child_count(x, child_count)?;
            m.set_pair(x, &ck, &cv)?;
        } else if use_right {
            let mut right = self.file.get(right_head.unwrap().link())?;
            self.donate_right(child, &mut right)?;

            let child_count = self.node(child)?.count();
            let right_count = self.node(&right)?.count();
            let (rk, rv) = self.node(&right)?.pair_at(0)?;
            let mut m = self.node_mut(parent)?;
            m.set_child_count(x, child_count)?;
            m.set_child_count(x + 1, right_count)?;
            m.set_pair(x + 1, &rk, &rv)?;
        } else {
            return Ok(false);
        }
        Ok(true)
    }

    /// Moves half the surplus from `prev`'s tail into `next`'s front.
    fn donate_right(&self, prev: &mut Visitor<'_>, next: &mut Visitor<'_>) -> Result<()> {
        let pc = self.node(prev)?.count();
        let nc = self.node(next)?.count();
        let delta = (pc - nc) / 2;

        {
            let mut nm = self.node_mut(next)?;
            nm.move_slots(0, delta, nc)?;
            let prev_ref = self.node(prev)?;
            copy_slots(&mut nm, 0, &prev_ref, pc - delta, delta)?;
            nm.set_count(nc + delta);
        }
        self.node_mut(prev)?.set_count(pc - delta);
        Ok(())
    }

    /// Moves half the surplus from `next`'s front into `prev`'s tail.
    fn donate_left(&self, prev: &mut Visitor<'_>, next: &mut Visitor<'_>) -> Result<()> {
        let pc = self.node(prev)?.count();
        let nc = self.node(next)?.count();
        let delta = (nc - pc) / 2;

        {
            let mut pm = self.node_mut(prev)?;
            let next_ref = self.node(next)?;
            copy_slots(&mut pm, pc, &next_ref, 0, delta)?;
            pm.set_count(pc + delta);
        }
        {
            let mut nm = self.node_mut(next)?;
            nm.move_slots(delta, 0, nc - delta)?;
            nm.set_count(nc - delta);
        }
        Ok(())
    }

    /// Splits the overfull child at slot `x` in two, inserting the new
    /// right half as slot `x + 1`.
    fn split_child(
        &self,
        parent: &mut Visitor<'_>,
        x: usize,
        mut child: Visitor<'_>,
    ) -> Result<()> {
        let mut next = self.file.allocate()?;
        let next_no = next.page_no();

        let child_head = self.node(&child)?.head();
        let kind = child_head.kind();
        let cc = child_head.count();
        let nc = cc / 2;
        let pc = cc - nc;

        {
            let mut nm = self.node_mut(&mut next)?;
            // The new node inherits the sibling link, splicing it into
            // the chain right after the child.
            nm.set_head(Head::new(kind, child_head.link(), nc as u32));
            let child_ref = self.node(&child)?;
            copy_slots(&mut nm, 0, &child_ref, pc, nc)?;
        }
        self.node_mut(&mut child)?
            .set_head(Head::new(kind, next_no, pc as u32));

        let (nk, nv) = self.node(&next)?.pair_at(0)?;
        let pcount = self.node(parent)?.count();
        let mut pm = self.node_mut(parent)?;
        pm.set_child_count(x, pc)?;
        pm.move_slots(x + 1, x + 2, pcount - (x + 1))?;
        pm.write_slot(x + 1, Head::new(kind, next_no, nc as u32), &nk, &nv)?;
        pm.set_count(pcount + 1);
        Ok(())
    }

    /// Splits an overfull root into two inner children, leaving the root
    /// as a two-slot inner node.
    fn split_root(&mut self) -> Result<()> {
        let mut prev = self.file.allocate()?;
        let mut next = self.file.allocate()?;
        let prev_no = prev.page_no();
        let next_no = next.page_no();

        let mut root = self.file.root();
        let rc = self.node(&root)?.count();
        let pc = rc / 2;
        let nc = rc - pc;

        {
            let root_ref = self.node(&root)?;
            let mut pm = self.node_mut(&mut prev)?;
            pm.set_head(Head::new(NodeKind::Inner, next_no, pc as u32));
            copy_slots(&mut pm, 0, &root_ref, 0, pc)?;
        }
        {
            let root_ref = self.node(&root)?;
            let mut nm = self.node_mut(&mut next)?;
            nm.set_head(Head::new(NodeKind::Inner, NIL_PAGE, nc as u32));
            copy_slots(&mut nm, 0, &root_ref, pc, nc)?;
        }

        let (nk, nv) = self.node(&next)?.pair_at(0)?;
        let mut rm = self.node_mut(&mut root)?;
        rm.set_count(2);
        rm.set_child(0, Head::new(NodeKind::Inner, prev_no, pc as u32))?;
        rm.write_slot(1, Head::new(NodeKind::Inner, next_no, nc as u32), &nk, &nv)?;
        Ok(())
    }

    fn erase_at(&self, head: Head, key: &K, val: &V) -> Result<EraseStep<'_>> {
        if head.is_leaf() {
            return self.erase_leaf(head, key, val);
        }

        let mut this = self.file.get(head.link())?;
        let (count, search) = {
            let node = self.node(&this)?;
            ensure!(
                node.count() == head.count(),
                "recorded child count {} does not match node count {} at page {}",
                head.count(),
                node.count(),
                this.page_no()
            );
            let count = node.count();
            (count, node.binary_search(key, val, 0, count)?)
        };

        // An exact match on a routing pair means the pair being erased is
        // that subtree's minimum, which must be refreshed afterwards.
        let (x, flag) = match search {
            SearchResult::NotFound(0) => return Ok(EraseStep::Clean),
            SearchResult::Found(x) => (x, true),
            SearchResult::NotFound(x) => (x - 1, false),
        };

        let child_head = self.node(&this)?.child(x)?;
        let mut child = match self.erase_at(child_head, key, val)? {
            EraseStep::Clean => return Ok(EraseStep::Clean),
            EraseStep::Touched(child) => child,
        };

        let child_count = self.node(&child)?.count();
        let refreshed = if flag && child_count > 0 {
            Some(self.node(&child)?.pair_at(0)?)
        } else {
            None
        };
        {
            let mut m = self.node_mut(&mut this)?;
            m.set_child_count(x, child_count)?;
            if let Some((ck, cv)) = &refreshed {
                m.set_pair(x, ck, cv)?;
            }
        }

        if child_count > self.layout.merge_size {
            return Ok(if flag && x == 0 {
                EraseStep::Touched(this)
            } else {
                EraseStep::Clean
            });
        }
        if self.erase_amortize(&mut this, x, &mut child)? {
            return Ok(if flag && x == 0 {
                EraseStep::Touched(this)
            } else {
                EraseStep::Clean
            });
        }

        self.erase_merge(&mut this, x, child, count)?;
        Ok(EraseStep::Touched(this))
    }

    fn erase_leaf(&self, head: Head, key: &K, val: &V) -> Result<EraseStep<'_>> {
        let mut this = self.file.get(head.link())?;
        let (count, search) = {
            let node = self.node(&this)?;
            ensure!(
                node.count() == head.count(),
                "recorded child count {} does not match leaf count {} at page {}",
                head.count(),
                node.count(),
                this.page_no()
            );
            let count = node.count();
            (count, node.binary_search(key, val, 0, count)?)
        };

        let x = match search {
            SearchResult::Found(x) => x,
            SearchResult::NotFound(_) => return Ok(EraseStep::Clean),
        };

        {
            let mut m = self.node_mut(&mut this)?;
            m.move_slots(x + 1, x, count - x - 1)?;
            m.set_count(count - 1);
        }
        Ok(EraseStep::Touched(this))
    }

    /// Tries to refill the underfull child at slot `x` from a sibling at
    /// or above the amortization threshold, preferring the larger of two
    /// eligible donors.
    fn erase_amortize(
        &self,
        parent: &mut Visitor<'_>,
        x: usize,
        child: &mut Visitor<'_>,
    ) -> Result<bool> {
        let (pcount, left_head, right_head) = {
            let p = self.node(parent)?;
            let pcount = p.count();
            let left = if x > 0 { Some(p.child(x - 1)?) } else { None };
            let right = if x + 1 < pcount {
                Some(p.child(x + 1)?)
            } else {
                None
            };
            (pcount, left, right)
        };
        debug_assert!(x < pcount);

        let mut use_left =
            left_head.is_some_and(|h| h.count() >= self.layout.amort_size);
        let mut use_right =
            right_head.is_some_and(|h| h.count() >= self.layout.amort_size);
        if use_left && use_right {
            // Both eligible: borrow from the larger one.
            if left_head.unwrap().count() > right_head.unwrap().count() {
                use_right = false;
            } else {
                use_left = false;
            }
        }

        if use_left {
            let mut left = self.file.get(left_head.unwrap().link())?;
            self.donate_right(&mut left, child)?;

            let left_count = self.node(&left)?.count();
            let child_count = self.node(child)?.count();
            let (ck, cv) = self.node(child)?.pair_at(0)?;
            let mut m = self.node_mut(parent)?;
            m.set_child_count(x - 1, left_count)?;
            m.set_child_count(x, child_count)?;
            m.set_pair(x, &ck, &cv)?;
        } else if use_right {
            let mut right = self.file.get(right_head.unwrap().link())?;
            self.donate_left(child, &mut right)?;

            let child_count = self.node(child)?.count();
            let right_count = self.node(&right)?.count();
            let (rk, rv) = self.node(&right)?.pair_at(0)?;
            let mut m = self.node_mut(parent)?;
            m.set_child_count(x, child_count)?;
            m.set_child_count(x + 1, right_count)?;
            m.set_pair(x + 1, &rk, &rv)?;
        } else {
            return Ok(false);
        }
        Ok(true)
    }

    /// Merges the underfull child at slot `x` with a sibling, collapsing
    /// one slot of `parent`. Handles the root special cases.
    fn erase_merge(
        &self,
        parent: &mut Visitor<'_>,
        x: usize,
        child: Visitor<'_>,
        pcount: usize,
    ) -> Result<()> {
        // Two mergeable inner children under the root: flatten them into
        // the root instead, shrinking the tree by one level.
        if parent.is_root() && pcount == 2 && self.node(&child)?.head().is_inner() {
            return self.merge_root(parent, x, child);
        }

        // Last child of the root: keep it while it has entries, recycle
        // it once it empties.
        if pcount == 1 {
            if self.node(&child)?.count() == 0 {
                let child_no = child.page_no();
                drop(child);
                self.file.recycle(child_no)?;
                self.node_mut(parent)?.set_count(0);
            }
            return Ok(());
        }

        // Merge with the smaller of the adjacent siblings.
        let mut merge_right = x != pcount - 1;
        if merge_right && x != 0 {
            let p = self.node(parent)?;
            merge_right = p.child(x - 1)?.count() > p.child(x + 1)?.count();
        }

        if merge_right {
            let right_head = self.node(parent)?.child(x + 1)?;
            let mut prev = child;
            let next = self.file.get(right_head.link())?;
            self.merge_nodes(&mut prev, &next)?;

            let merged = self.node(&prev)?.count();
            let next_no = next.page_no();
            drop(next);
            self.file.recycle(next_no)?;

            let mut m = self.node_mut(parent)?;
            m.move_slots(x + 2, x + 1, pcount - x - 2)?;
            m.set_child_count(x, merged)?;
            m.set_count(pcount - 1);
        } else {
            let left_head = self.node(parent)?.child(x - 1)?;
            let mut prev = self.file.get(left_head.link())?;
            self.merge_nodes(&mut prev, &child)?;

            let merged = self.node(&prev)?.count();
            let child_no = child.page_no();
            drop(child);
            self.file.recycle(child_no)?;

            let mut m = self.node_mut(parent)?;
            m.move_slots(x + 1, x, pcount - x - 1)?;
            m.set_child_count(x - 1, merged)?;
            m.set_count(pcount - 1);
        }
        Ok(())
    }

    /// Concatenates `next` into `prev` and relinks the sibling chain.
    /// The caller recycles `next`.
    fn merge_nodes(&self, prev: &mut Visitor<'_>, next: &Visitor<'_>) -> Result<()> {
        let prev_head = self.node(prev)?.head();
        let next_head = self.node(next)?.head();
        let pc = prev_head.count();
        let nc = next_head.count();

        let mut pm = self.node_mut(prev)?;
        let next_ref = self.node(next)?;
        copy_slots(&mut pm, pc, &next_ref, 0, nc)?;
        pm.set_head(Head::new(
            prev_head.kind(),
            next_head.link(),
            (pc + nc) as u32,
        ));
        Ok(())
    }

    /// Pulls both children of a two-slot root up into the root itself,
    /// recycling the children.
    fn merge_root(&self, parent: &mut Visitor<'_>, x: usize, child: Visitor<'_>) -> Result<()> {
        let (h0, h1) = {
            let p = self.node(parent)?;
            (p.child(0)?, p.child(1)?)
        };

        let (prev, next) = if x == 0 {
            (child, self.file.get(h1.link())?)
        } else {
            (self.file.get(h0.link())?, child)
        };

        let pc = self.node(&prev)?.count();
        let nc = self.node(&next)?.count();
        {
            let mut rm = self.node_mut(parent)?;
            let prev_ref = self.node(&prev)?;
            copy_slots(&mut rm, 0, &prev_ref, 0, pc)?;
            let next_ref = self.node(&next)?;
            copy_slots(&mut rm, pc, &next_ref, 0, nc)?;
            rm.set_count(pc + nc);
        }

        let prev_no = prev.page_no();
        let next_no = next.page_no();
        drop(prev);
        drop(next);
        self.file.recycle(prev_no)?;
        self.file.recycle(next_no)?;
        Ok(())
    }

    /// Full structural integrity check: pair order, count and minimum
    /// mirrors, fill bounds, uniform leaf depth, and free-list/live-page
    /// disjointness. Intended for tests and tooling; walks every page.
    pub fn check(&self) -> Result<()> {
        let root_head = self.root_head();
        ensure!(root_head.is_inner(), "root must be an inner node");

        let mut live = Vec::new();
        if root_head.count() > 0 {
            let mut leaf_depth = None;
            self.check_subtree(root_head, 0, true, &mut live, &mut leaf_depth)?;
            self.check_leaf_chain()?;
        }

        let (high_water, free) = self.file.free_snapshot();
        let mut owned: Vec<u32> = live.iter().copied().chain(free.iter().copied()).collect();
        owned.sort_unstable();
        let expected: Vec<u32> = (1..high_water).collect();
        ensure!(
            owned == expected,
            "free list ({:?}) and live pages ({:?}) do not partition 1..{}",
            free,
            live,
            high_water
        );
        Ok(())
    }

    fn check_subtree(
        &self,
        head: Head,
        depth: usize,
        fill_exempt: bool,
        live: &mut Vec<u32>,
        leaf_depth: &mut Option<usize>,
    ) -> Result<(K, V)> {
        let vis = self.file.get(head.link())?;
        let node = self.node(&vis)?;
        let own = node.head();
        let count = own.count();

        ensure!(
            count == head.count(),
            "recorded count {} does not match node count {} at page {}",
            head.count(),
            count,
            vis.page_no()
        );
        ensure!(count > 0, "empty node at page {}", vis.page_no());

        let is_root = vis.page_no() == ROOT_PAGE_NO;
        if !is_root {
            ensure!(
                own.kind() == head.kind(),
                "node kind mismatch at page {}",
                vis.page_no()
            );
            ensure!(
                count <= self.layout.block_size,
                "node at page {} overfull: {}",
                vis.page_no(),
                count
            );
            if !fill_exempt {
                ensure!(
                    count > self.layout.merge_size,
                    "node at page {} underfull: {}",
                    vis.page_no(),
                    count
                );
            }
            live.push(vis.page_no());
        }

        if own.is_leaf() {
            match leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(d) => ensure!(*d == depth, "leaves at different depths"),
            }
            return node.pair_at(0);
        }

        let mut slots = Vec::with_capacity(count);
        for i in 0..count {
            slots.push((node.child(i)?, node.pair_at(i)?));
        }
        // Release this page before recursing so the walk never pins more
        // than one level at a time.
        drop(node);
        drop(vis);

        // The only child of a one-slot root may legally underflow.
        let child_exempt = is_root && count == 1;
        for (child_head, pair) in &slots {
            let min = self.check_subtree(*child_head, depth + 1, child_exempt, live, leaf_depth)?;
            ensure!(
                min == *pair,
                "routing pair {:?} does not match subtree minimum {:?}",
                pair,
                min
            );
        }
        Ok(slots[0].1.clone())
    }

    fn check_leaf_chain(&self) -> Result<()> {
        let mut head = self.root_head();
        while head.is_inner() {
            let vis = self.file.get(head.link())?;
            head = self.node(&vis)?.child(0)?;
        }

        let mut prev: Option<(K, V)> = None;
        let mut link = head.link();
        loop {
            let vis = self.file.get(link)?;
            let next = {
                let node = self.node(&vis)?;
                for i in 0..node.count() {
                    let pair = node.pair_at(i)?;
                    if let Some(p) = &prev {
                        ensure!(
                            *p < pair,
                            "leaf chain not strictly ascending at page {}",
                            vis.page_no()
                        );
                    }
                    prev = Some(pair);
                }
                node.head().link()
            };
            if next == NIL_PAGE {
                return Ok(());
            }
            link = next;
        }
    }
}

impl<K: FixedKey, V: FixedKey> Drop for BPlusTree<K, V> {
    fn drop(&mut self) {
        if let Err(e) = self.file.flush() {
            log::warn!("flush on drop failed: {:#}", e);
        }
    }
}
