//! # Node File
//!
//! Composes the page file, the free list, and the page cache into the
//! allocation-aware store the tree operates on, and holds the root page
//! in a dedicated in-memory slot outside the cache.
//!
//! ## Root Slot
//!
//! The root is logically page 0 but never occupies the page file: it is
//! resident for the lifetime of the store and persisted inside the
//! sidecar. Keeping it out of the cache means it can never be evicted and
//! every descent starts without a fault. A fresh store's root is a zeroed
//! page, which decodes as an empty inner node.
//!
//! ## Visitors
//!
//! [`Visitor`] is the one handle type for both worlds: it wraps either the
//! root slot or a pinned cache page. `page()` reads, `modify()` marks the
//! underlying page dirty and hands out its bytes. The tree algorithm holds
//! at most a parent and two children at once, plus the root.
//!
//! ## Flush
//!
//! `flush` writes back all dirty cache pages, syncs the page file, and
//! rewrites the sidecar when the root page or the free list changed since
//! the last flush.

use std::cell::UnsafeCell;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use eyre::{ensure, Result};
use parking_lot::Mutex;

use super::cache::{PageCache, PageRef};
use super::freelist::FreeList;
use super::io::{self, PageIO};
use super::Geometry;

/// Logical index of the root page. Never allocated from the page file.
pub const ROOT_PAGE_NO: u32 = 0;

struct RootSlot {
    data: UnsafeCell<Box<[u8]>>,
    dirty: AtomicBool,
}

/// Paged node store: cache + free list + in-memory root.
pub struct NodeFile {
    cache: PageCache,
    free: Mutex<FreeList>,
    root: RootSlot,
    sidecar_path: PathBuf,
    geometry: Geometry,
}

impl NodeFile {
    /// Opens the store at `dat_path`/`bin_path`. A missing sidecar means a
    /// fresh store; an existing one is validated against `geometry` and
    /// restored.
    pub fn open(
        dat_path: &Path,
        bin_path: &Path,
        geometry: Geometry,
        cache_size: usize,
        table_size: usize,
    ) -> Result<Self> {
        let page_io = PageIO::open(dat_path, geometry.page_bytes)?;
        let cache = PageCache::new(page_io, cache_size, table_size)?;

        let (free, root) = match io::read_sidecar(bin_path, geometry)? {
            Some(state) => {
                log::debug!(
                    "opened store {} ({} pages, {} free)",
                    dat_path.display(),
                    state.high_water,
                    state.free_list.len()
                );
                (
                    FreeList::from_state(state.high_water, state.free_list),
                    RootSlot {
                        data: UnsafeCell::new(state.root.into_boxed_slice()),
                        dirty: AtomicBool::new(false),
                    },
                )
            }
            None => {
                log::debug!("initializing fresh store at {}", dat_path.display());
                (
                    FreeList::new(),
                    RootSlot {
                        // A zeroed page decodes as an empty inner node.
                        data: UnsafeCell::new(
                            vec![0u8; geometry.page_bytes].into_boxed_slice(),
                        ),
                        dirty: AtomicBool::new(true),
                    },
                )
            }
        };

        Ok(Self {
            cache,
            free: Mutex::new(free),
            root,
            sidecar_path: bin_path.to_path_buf(),
            geometry,
        })
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Returns a visitor for `page_no`; index 0 resolves to the root slot.
    pub fn get(&self, page_no: u32) -> Result<Visitor<'_>> {
        if page_no == ROOT_PAGE_NO {
            return Ok(Visitor {
                file: self,
                slot: Slot::Root,
            });
        }
        Ok(Visitor {
            file: self,
            slot: Slot::Page(self.cache.get(page_no)?),
        })
    }

    /// The root visitor. Always resident, never faults.
    pub fn root(&self) -> Visitor<'_> {
        Visitor {
            file: self,
            slot: Slot::Root,
        }
    }

    /// Allocates a page index (recycled first, fresh otherwise) and
    /// installs a zeroed page for it, returned already dirty.
    pub fn allocate(&self) -> Result<Visitor<'_>> {
        let page_no = {
            let mut free = self.free.lock();
            free.pop().unwrap_or_else(|| free.bump())
        };

        Ok(Visitor {
            file: self,
            slot: Slot::Page(self.cache.install(page_no)?),
        })
    }

    /// Returns `page_no` to the free list and drops its cached page
    /// without writeback. Any visitor to it must be dropped first.
    pub fn recycle(&self, page_no: u32) -> Result<()> {
        ensure!(page_no != ROOT_PAGE_NO, "root page cannot be recycled");

        self.cache.discard(page_no);
        self.free.lock().push(page_no);
        Ok(())
    }

    /// High-water mark: one past the largest page index ever allocated.
    pub fn page_count(&self) -> u32 {
        self.free.lock().high_water()
    }

    /// Current free-list contents, for integrity checking.
    pub fn free_snapshot(&self) -> (u32, Vec<u32>) {
        let free = self.free.lock();
        (free.high_water(), free.free_pages().to_vec())
    }

    /// Writes back dirty pages, syncs the page file, and rewrites the
    /// sidecar if the root or the free list changed.
    pub fn flush(&self) -> Result<()> {
        let flushed = self.cache.flush()?;
        if flushed > 0 {
            self.cache.sync()?;
        }

        let mut free = self.free.lock();
        let root_dirty = self.root.dirty.load(Ordering::Acquire);
        if root_dirty || free.is_dirty() {
            io::write_sidecar(
                &self.sidecar_path,
                self.geometry,
                free.high_water(),
                free.free_pages(),
                self.root_bytes(),
            )?;
            free.mark_clean();
            self.root.dirty.store(false, Ordering::Release);
        }

        log::debug!(
            "flushed store {} ({} pages written)",
            self.sidecar_path.display(),
            flushed
        );
        Ok(())
    }

    fn root_bytes(&self) -> &[u8] {
        // SAFETY: the buffer behind the UnsafeCell is a boxed slice that
        // never moves or resizes. Mutation happens only through a root
        // Visitor's modify(), and callers here never overlap one.
        unsafe { &**self.root.data.get() }
    }

    // SAFETY: exclusive access is the caller's obligation; upheld by
    // Visitor::modify taking &mut self and the tree holding at most one
    // root visitor at a time.
    #[allow(clippy::mut_from_ref)]
    unsafe fn root_bytes_mut(&self) -> &mut [u8] {
        self.root.dirty.store(true, Ordering::Release);
        &mut **self.root.data.get()
    }
}

enum Slot<'a> {
    Root,
    Page(PageRef<'a>),
}

/// Borrowing handle to one resident node page: read access plus a
/// `modify` action that marks the page dirty.
pub struct Visitor<'a> {
    file: &'a NodeFile,
    slot: Slot<'a>,
}

impl Visitor<'_> {
    pub fn page_no(&self) -> u32 {
        match &self.slot {
            Slot::Root => ROOT_PAGE_NO,
            Slot::Page(page) => page.page_no(),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self.slot, Slot::Root)
    }

    /// Read access to the page bytes.
    pub fn page(&self) -> &[u8] {
        match &self.slot {
            Slot::Root => self.file.root_bytes(),
            Slot::Page(page) => page.data(),
        }
    }

    /// Marks the page dirty and returns its bytes for mutation.
    pub fn modify(&mut self) -> &mut [u8] {
        match &mut self.slot {
            // SAFETY: &mut self makes this visitor the only path to the
            // root bytes for the duration of the borrow.
            Slot::Root => unsafe { self.file.root_bytes_mut() },
            Slot::Page(page) => page.data_mut(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEOMETRY: Geometry = Geometry {
        page_bytes: 4096,
        pair_len: 12,
        block_size: 16,
    };

    fn open_store(dir: &tempfile::TempDir) -> NodeFile {
        NodeFile::open(
            &dir.path().join("store.dat"),
            &dir.path().join("store.bin"),
            GEOMETRY,
            8,
            64,
        )
        .unwrap()
    }

    #[test]
    fn fresh_store_has_zeroed_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = open_store(&dir);

        let root = file.root();
        assert_eq!(root.page_no(), ROOT_PAGE_NO);
        assert!(root.is_root());
        assert!(root.page().iter().all(|&b| b == 0));
        assert_eq!(file.page_count(), 1);
    }

    #[test]
    fn allocate_numbers_pages_from_one() {
        let dir = tempfile::tempdir().unwrap();
        let file = open_store(&dir);

        let a = file.allocate().unwrap();
        let b = file.allocate().unwrap();
        assert_eq!(a.page_no(), 1);
        assert_eq!(b.page_no(), 2);
        assert_eq!(file.page_count(), 3);
    }

    #[test]
    fn recycle_feeds_allocation() {
        let dir = tempfile::tempdir().unwrap();
        let file = open_store(&dir);

        let a = file.allocate().unwrap();
        let a_no = a.page_no();
        drop(a);
        file.recycle(a_no).unwrap();

        let b = file.allocate().unwrap();
        assert_eq!(b.page_no(), a_no);
        assert_eq!(file.page_count(), 2);
    }

    #[test]
    fn recycle_of_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = open_store(&dir);
        assert!(file.recycle(ROOT_PAGE_NO).is_err());
    }

    #[test]
    fn root_modifications_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let file = open_store(&dir);
            let mut root = file.root();
            root.modify()[100] = 0x5A;
            file.flush().unwrap();
        }

        let file = open_store(&dir);
        assert_eq!(file.root().page()[100], 0x5A);
    }

    #[test]
    fn allocated_pages_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let file = open_store(&dir);
            let mut page = file.allocate().unwrap();
            page.modify()[0] = 0x77;
            drop(page);
            file.flush().unwrap();
        }

        let file = open_store(&dir);
        assert_eq!(file.page_count(), 2);
        let page = file.get(1).unwrap();
        assert_eq!(page.page()[0], 0x77);
    }

    #[test]
    fn free_list_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let file = open_store(&dir);
            for _ in 0..3 {
                file.allocate().unwrap();
            }
            file.recycle(2).unwrap();
            file.flush().unwrap();
        }

        let file = open_store(&dir);
        let (high_water, free) = file.free_snapshot();
        assert_eq!(high_water, 4);
        assert_eq!(free, vec![2]);

        let page = file.allocate().unwrap();
        assert_eq!(page.page_no(), 2);
    }

    #[test]
    fn geometry_mismatch_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let file = open_store(&dir);
            file.flush().unwrap();
        }

        let other = Geometry {
            pair_len: 20,
            ..GEOMETRY
        };
        let result = NodeFile::open(
            &dir.path().join("store.dat"),
            &dir.path().join("store.bin"),
            other,
            8,
            64,
        );
        assert!(result.is_err());
    }

    #[test]
    fn flush_without_changes_skips_sidecar_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        {
            let file = open_store(&dir);
            file.flush().unwrap();
        }

        let bin = dir.path().join("store.bin");
        let before = std::fs::metadata(&bin).unwrap().modified().unwrap();

        let file = open_store(&dir);
        file.flush().unwrap();
        drop(file);

        let after = std::fs::metadata(&bin).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }
}
