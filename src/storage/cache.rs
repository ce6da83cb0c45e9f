//! # Write-Back Page Cache
//!
//! A bounded pool of resident node pages keyed by page index. The tree
//! never touches the page file directly: every page access goes through
//! here, and pages come back as pinned [`PageRef`] visitors.
//!
//! ## Eviction
//!
//! Eviction is SIEVE-style: each entry carries a `visited` flag set on
//! access, and a hand pointer sweeps the pool clearing flags until it
//! finds an unvisited entry. Frequently touched pages get a second chance;
//! one-shot pages leave quickly. Pinned entries are never victims, so a
//! visitor held across a fault cannot be invalidated. If every entry is
//! pinned the cache is undersized for the working set and the fault is
//! fatal — size the pool to at least three pages per tree level.
//!
//! Dirty victims are written back through [`PageIO`] before their slot is
//! reused; clean victims are dropped.
//!
//! ## Pin/Unpin Protocol
//!
//! 1. `get`/`install` return a pinned [`PageRef`] (pin count incremented)
//! 2. the caller reads via `data()` or writes via `data_mut()`
//! 3. dropping the `PageRef` unpins
//!
//! Pages with a positive pin count cannot be evicted. `data_mut` marks the
//! entry dirty; dirty pages are persisted on eviction or flush.
//!
//! ## Memory Layout
//!
//! ```text
//! CacheEntry {
//!     page_no:   u32
//!     visited:   AtomicBool   (eviction second-chance flag)
//!     dirty:     AtomicBool
//!     pin_count: AtomicU32
//!     data:      Box<[u8]>    (one page)
//! }
//! ```
//!
//! The index table is a `hashbrown` map pre-sized to the configured bucket
//! count, so steady-state lookups never rehash.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;
use parking_lot::RwLock;

use super::PageIO;

struct CacheEntry {
    page_no: u32,
    visited: AtomicBool,
    dirty: AtomicBool,
    pin_count: AtomicU32,
    data: Box<[u8]>,
}

impl CacheEntry {
    fn new(page_no: u32, page_bytes: usize) -> Self {
        Self {
            page_no,
            visited: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            pin_count: AtomicU32::new(0),
            data: vec![0u8; page_bytes].into_boxed_slice(),
        }
    }

    fn is_pinned(&self) -> bool {
        self.pin_count.load(Ordering::Acquire) > 0
    }

    fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    fn unpin(&self) {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin called on unpinned page");
    }

    fn mark_visited(&self) {
        self.visited.store(true, Ordering::Release);
    }

    fn clear_visited(&self) -> bool {
        self.visited.swap(false, Ordering::AcqRel)
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }
}

struct CacheInner {
    entries: Vec<CacheEntry>,
    index: HashMap<u32, usize>,
    hand: usize,
    capacity: usize,
    io: PageIO,
}

impl CacheInner {
    /// Selects an eviction victim with the SIEVE hand, writing it back if
    /// dirty, and removes it from the pool.
    fn evict_one(&mut self) -> Result<()> {
        if self.entries.is_empty() {
            bail!("cannot evict from an empty cache");
        }

        // Two full sweeps: the first may clear every visited flag, the
        // second must then find a victim unless everything is pinned.
        let mut remaining = self.entries.len() * 2;

        let victim = loop {
            if remaining == 0 {
                bail!(
                    "page cache full and all {} pages pinned; cache must hold \
                     at least three pages per tree level",
                    self.entries.len()
                );
            }
            remaining -= 1;

            let idx = self.hand;
            self.hand = (self.hand + 1) % self.entries.len();

            let entry = &self.entries[idx];
            if entry.is_pinned() || entry.clear_visited() {
                continue;
            }
            break idx;
        };

        if self.entries[victim].is_dirty() {
            let entry = &self.entries[victim];
            self.io.write_page(entry.page_no, &entry.data)?;
        }

        self.remove(victim);
        Ok(())
    }

    fn remove(&mut self, idx: usize) -> CacheEntry {
        let entry = self.entries.swap_remove(idx);
        self.index.remove(&entry.page_no);

        if idx < self.entries.len() {
            let moved = self.entries[idx].page_no;
            self.index.insert(moved, idx);
        }

        if self.hand >= self.entries.len() {
            self.hand = 0;
        }

        entry
    }

    fn insert(&mut self, entry: CacheEntry) -> usize {
        let page_no = entry.page_no;
        let idx = self.entries.len();
        self.entries.push(entry);
        self.index.insert(page_no, idx);
        idx
    }

    fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }
}

/// Bounded write-back cache of node pages.
pub struct PageCache {
    inner: RwLock<CacheInner>,
    page_bytes: usize,
}

impl PageCache {
    /// Creates a cache of `capacity` pages backed by `io`, with an index
    /// table pre-sized to `table_size` buckets.
    pub fn new(io: PageIO, capacity: usize, table_size: usize) -> Result<Self> {
        ensure!(capacity >= 2, "cache capacity {} too small", capacity);

        let page_bytes = io.page_bytes();
        Ok(Self {
            inner: RwLock::new(CacheInner {
                entries: Vec::with_capacity(capacity),
                index: HashMap::with_capacity(table_size.max(capacity)),
                hand: 0,
                capacity,
                io,
            }),
            page_bytes,
        })
    }

    pub fn page_bytes(&self) -> usize {
        self.page_bytes
    }

    /// Returns a pinned visitor for `page_no`, faulting it in from the
    /// page file on a miss.
    pub fn get(&self, page_no: u32) -> Result<PageRef<'_>> {
        {
            let guard = self.inner.read();
            if let Some(&idx) = guard.index.get(&page_no) {
                guard.entries[idx].pin();
                guard.entries[idx].mark_visited();
                return Ok(PageRef {
                    cache: self,
                    page_no,
                });
            }
        }

        let mut guard = self.inner.write();

        // Raced with another fault between the locks.
        if let Some(&idx) = guard.index.get(&page_no) {
            guard.entries[idx].pin();
            guard.entries[idx].mark_visited();
            return Ok(PageRef {
                cache: self,
                page_no,
            });
        }

        if guard.is_full() {
            guard.evict_one()?;
        }

        let mut entry = CacheEntry::new(page_no, self.page_bytes);
        guard.io.read_page(page_no, &mut entry.data)?;
        entry.pin();
        entry.mark_visited();
        guard.insert(entry);

        Ok(PageRef {
            cache: self,
            page_no,
        })
    }

    /// Installs a zeroed page for a freshly allocated index, pre-marked
    /// dirty so it reaches disk even if never touched again.
    pub fn install(&self, page_no: u32) -> Result<PageRef<'_>> {
        let mut guard = self.inner.write();

        ensure!(
            !guard.index.contains_key(&page_no),
            "page {} installed while already resident",
            page_no
        );

        if guard.is_full() {
            guard.evict_one()?;
        }

        let entry = CacheEntry::new(page_no, self.page_bytes);
        entry.pin();
        entry.mark_visited();
        entry.mark_dirty();
        guard.insert(entry);

        Ok(PageRef {
            cache: self,
            page_no,
        })
    }

    /// Drops a recycled page from the pool without writing it back.
    pub fn discard(&self, page_no: u32) {
        let mut guard = self.inner.write();
        if let Some(&idx) = guard.index.get(&page_no) {
            debug_assert!(
                !guard.entries[idx].is_pinned(),
                "discard of pinned page {}",
                page_no
            );
            guard.remove(idx);
        }
    }

    /// Writes back every dirty page. Returns the number written.
    pub fn flush(&self) -> Result<usize> {
        let mut guard = self.inner.write();
        let CacheInner { entries, io, .. } = &mut *guard;

        let mut flushed = 0;
        for entry in entries.iter() {
            if entry.is_dirty() {
                io.write_page(entry.page_no, &entry.data)?;
                entry.clear_dirty();
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Syncs the page file to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.inner.write().io.sync()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().capacity
    }

    fn data(&self, page_no: u32) -> Option<&[u8]> {
        let guard = self.inner.read();

        guard.index.get(&page_no).map(|&idx| {
            let entry = &guard.entries[idx];
            let ptr = entry.data.as_ptr();
            let len = entry.data.len();
            // SAFETY: entry.data is a boxed slice whose heap buffer never
            // moves, even when the entries vector reallocates or the entry
            // is relocated by swap_remove. The entry is pinned for as long
            // as the PageRef that calls this exists, so eviction cannot
            // free the buffer while the returned slice is live.
            unsafe { std::slice::from_raw_parts(ptr, len) }
        })
    }

    // SAFETY: returns a mutable slice while only holding a read lock. The
    // caller must guarantee exclusive access to this page's bytes; that is
    // upheld by PageRef::data_mut taking &mut self, and by the tree never
    // holding two visitors to the same page.
    #[allow(clippy::mut_from_ref)]
    unsafe fn data_mut_unchecked(&self, page_no: u32) -> Option<&mut [u8]> {
        let guard = self.inner.read();

        guard.index.get(&page_no).map(|&idx| {
            let entry = &guard.entries[idx];
            entry.mark_dirty();
            let ptr = entry.data.as_ptr() as *mut u8;
            let len = entry.data.len();
            // SAFETY: see data(); exclusivity is the caller's obligation.
            std::slice::from_raw_parts_mut(ptr, len)
        })
    }

    fn unpin(&self, page_no: u32) {
        let guard = self.inner.read();
        if let Some(&idx) = guard.index.get(&page_no) {
            guard.entries[idx].unpin();
        }
    }

    fn mark_dirty(&self, page_no: u32) {
        let guard = self.inner.read();
        if let Some(&idx) = guard.index.get(&page_no) {
            guard.entries[idx].mark_dirty();
        }
    }

    #[cfg(test)]
    fn is_dirty(&self, page_no: u32) -> bool {
        let guard = self.inner.read();
        guard
            .index
            .get(&page_no)
            .map(|&idx| guard.entries[idx].is_dirty())
            .unwrap_or(false)
    }
}

/// Pinned visitor into one resident page.
pub struct PageRef<'a> {
    cache: &'a PageCache,
    page_no: u32,
}

impl std::fmt::Debug for PageRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageRef").field("page_no", &self.page_no).finish()
    }
}

impl PageRef<'_> {
    pub fn page_no(&self) -> u32 {
        self.page_no
    }

    pub fn data(&self) -> &[u8] {
        // INVARIANT: a PageRef exists only while its page is pinned.
        self.cache.data(self.page_no).expect("page not resident")
    }

    /// Marks the page dirty and returns its bytes for mutation.
    pub fn data_mut(&mut self) -> &mut [u8] {
        // SAFETY: &mut self gives this PageRef exclusive access, the page
        // is pinned, and pinned pages are never evicted.
        unsafe {
            self.cache
                .data_mut_unchecked(self.page_no)
                .expect("page not resident")
        }
    }

    pub fn mark_dirty(&self) {
        self.cache.mark_dirty(self.page_no);
    }
}

impl Drop for PageRef<'_> {
    fn drop(&mut self) {
        self.cache.unpin(self.page_no);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PageIO;

    fn test_cache(capacity: usize) -> (tempfile::TempDir, PageCache) {
        let dir = tempfile::tempdir().unwrap();
        let io = PageIO::open(&dir.path().join("pages.dat"), 4096).unwrap();
        let cache = PageCache::new(io, capacity, 64).unwrap();
        (dir, cache)
    }

    #[test]
    fn install_then_get() {
        let (_dir, cache) = test_cache(4);

        {
            let mut page = cache.install(1).unwrap();
            page.data_mut()[0] = 42;
        }

        let page = cache.get(1).unwrap();
        assert_eq!(page.data()[0], 42);
    }

    #[test]
    fn install_marks_dirty() {
        let (_dir, cache) = test_cache(4);
        let page = cache.install(1).unwrap();
        drop(page);
        assert!(cache.is_dirty(1));
    }

    #[test]
    fn eviction_writes_back_and_get_reloads() {
        let (_dir, cache) = test_cache(2);

        {
            let mut page = cache.install(1).unwrap();
            page.data_mut()[10] = 7;
        }

        // Fill past capacity so page 1 is evicted and written back.
        drop(cache.install(2).unwrap());
        drop(cache.install(3).unwrap());
        assert_eq!(cache.len(), 2);

        let page = cache.get(1).unwrap();
        assert_eq!(page.data()[10], 7);
    }

    #[test]
    fn pinned_pages_survive_eviction_pressure() {
        let (_dir, cache) = test_cache(2);

        let mut pinned = cache.install(1).unwrap();
        pinned.data_mut()[0] = 9;

        drop(cache.install(2).unwrap());
        drop(cache.install(3).unwrap());

        // Still resident and untouched.
        assert_eq!(pinned.data()[0], 9);
    }

    #[test]
    fn all_pinned_cache_faults() {
        let (_dir, cache) = test_cache(2);

        let _a = cache.install(1).unwrap();
        let _b = cache.install(2).unwrap();

        let err = cache.install(3).unwrap_err();
        assert!(err.to_string().contains("pinned"));
    }

    #[test]
    fn discard_drops_without_writeback() {
        let (_dir, cache) = test_cache(4);

        {
            let mut page = cache.install(1).unwrap();
            page.data_mut()[0] = 1;
        }
        cache.discard(1);
        assert_eq!(cache.len(), 0);

        // Never written: a read back from the file must fail.
        assert!(cache.get(1).is_err());
    }

    #[test]
    fn flush_persists_dirty_pages() {
        let (_dir, cache) = test_cache(4);

        for page_no in 1..=3 {
            let mut page = cache.install(page_no).unwrap();
            page.data_mut()[0] = page_no as u8;
        }

        assert_eq!(cache.flush().unwrap(), 3);
        assert_eq!(cache.flush().unwrap(), 0);

        for page_no in 1..=3u32 {
            assert!(!cache.is_dirty(page_no));
        }
    }

    #[test]
    fn get_after_flush_and_discard_reads_from_disk() {
        let (_dir, cache) = test_cache(4);

        {
            let mut page = cache.install(5).unwrap();
            page.data_mut()[100] = 0xEE;
        }
        cache.flush().unwrap();
        cache.discard(5);

        let page = cache.get(5).unwrap();
        assert_eq!(page.data()[100], 0xEE);
    }

    #[test]
    fn visitors_to_distinct_pages_coexist() {
        let (_dir, cache) = test_cache(4);

        let mut a = cache.install(1).unwrap();
        let mut b = cache.install(2).unwrap();

        a.data_mut()[0] = 1;
        b.data_mut()[0] = 2;

        assert_eq!(a.data()[0], 1);
        assert_eq!(b.data()[0], 2);
    }
}
