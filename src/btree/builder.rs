//! Builder for configuring and opening a tree.
//!
//! ```ignore
//! let tree: BPlusTree<u64, u32> = BPlusTree::builder("./data/index")
//!     .block_size(101)
//!     .cache_size(50)
//!     .open()?;
//! ```
//!
//! The block size is part of the on-disk geometry: reopening a store with
//! a different block size (or key/value widths) fails validation rather
//! than corrupting it.

use std::ffi::OsString;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};

use crate::config::{
    DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_SIZE, DEFAULT_TABLE_SIZE, MIN_BLOCK_SIZE, MIN_CACHE_SIZE,
};
use crate::key::FixedKey;
use crate::storage::NodeFile;

use super::node::Layout;
use super::tree::BPlusTree;

/// Fluent configuration for a [`BPlusTree`].
pub struct TreeBuilder<K, V> {
    path: PathBuf,
    block_size: usize,
    cache_size: usize,
    table_size: usize,
    _pair: PhantomData<(K, V)>,
}

impl<K: FixedKey, V: FixedKey> TreeBuilder<K, V> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_size: DEFAULT_BLOCK_SIZE,
            cache_size: DEFAULT_CACHE_SIZE,
            table_size: DEFAULT_TABLE_SIZE,
            _pair: PhantomData,
        }
    }

    /// Pairs per node. Part of the persistent geometry.
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Resident pages in the cache. Must cover the working set of one
    /// mutation: at least three pages per tree level.
    pub fn cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    /// Bucket count for the cache's page-index table.
    pub fn table_size(mut self, table_size: usize) -> Self {
        self.table_size = table_size;
        self
    }

    /// Validates the configuration and opens the store.
    pub fn open(self) -> Result<BPlusTree<K, V>> {
        ensure!(
            self.block_size >= MIN_BLOCK_SIZE,
            "block size {} below minimum {}",
            self.block_size,
            MIN_BLOCK_SIZE
        );
        ensure!(
            self.cache_size >= MIN_CACHE_SIZE,
            "cache size {} below minimum {}",
            self.cache_size,
            MIN_CACHE_SIZE
        );

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .wrap_err_with(|| format!("failed to create {}", dir.display()))?;
            }
        }

        let layout = Layout::for_pair::<K, V>(self.block_size);
        let dat = with_suffix(&self.path, ".dat");
        let bin = with_suffix(&self.path, ".bin");

        let file = NodeFile::open(
            Path::new(&dat),
            Path::new(&bin),
            layout.geometry(),
            self.cache_size,
            self.table_size,
        )?;
        Ok(BPlusTree::from_parts(file, layout))
    }
}

fn with_suffix(path: &Path, suffix: &str) -> OsString {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_tiny_block_size() {
        let dir = tempfile::tempdir().unwrap();
        let result = TreeBuilder::<u32, u32>::new(dir.path().join("t"))
            .block_size(4)
            .open();
        assert!(result.unwrap_err().to_string().contains("block size"));
    }

    #[test]
    fn rejects_tiny_cache() {
        let dir = tempfile::tempdir().unwrap();
        let result = TreeBuilder::<u32, u32>::new(dir.path().join("t"))
            .cache_size(1)
            .open();
        assert!(result.unwrap_err().to_string().contains("cache size"));
    }

    #[test]
    fn creates_both_store_files() {
        let dir = tempfile::tempdir().unwrap();
        let tree = TreeBuilder::<u32, u32>::new(dir.path().join("sub/t"))
            .block_size(16)
            .open()
            .unwrap();
        tree.close().unwrap();

        assert!(dir.path().join("sub/t.dat").exists());
        assert!(dir.path().join("sub/t.bin").exists());
    }

    #[test]
    fn reopen_with_other_block_size_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t");
        {
            let tree = TreeBuilder::<u32, u32>::new(&path)
                .block_size(16)
                .open()
                .unwrap();
            tree.close().unwrap();
        }

        let result = TreeBuilder::<u32, u32>::new(&path).block_size(32).open();
        assert!(result.is_err());
    }
}
