//! Forward cursor over the leaf chain.
//!
//! A cursor is a `(leaf visitor, slot index)` pair. Advancing steps
//! through the current leaf's slots and follows the sibling chain to the
//! next leaf when they run out; at the end of the chain the cursor
//! becomes exhausted and stays that way. The visitor pins the current
//! leaf, so a live cursor never has its page evicted under it.

use std::marker::PhantomData;

use eyre::{ensure, Result};

use crate::config::NIL_PAGE;
use crate::key::FixedKey;
use crate::storage::{NodeFile, Visitor};

use super::node::NodeRef;

/// Forward cursor positioned on one leaf slot, or exhausted.
pub struct Cursor<'a, K: FixedKey, V: FixedKey> {
    file: &'a NodeFile,
    state: Option<(Visitor<'a>, usize)>,
    _pair: PhantomData<(K, V)>,
}

impl<'a, K: FixedKey, V: FixedKey> Cursor<'a, K, V> {
    pub(crate) fn exhausted(file: &'a NodeFile) -> Self {
        Self {
            file,
            state: None,
            _pair: PhantomData,
        }
    }

    /// Positions a cursor at slot `index` of the leaf behind `vis`,
    /// stepping to the next leaf when `index` is one past the end.
    pub(crate) fn new(file: &'a NodeFile, vis: Visitor<'a>, index: usize) -> Result<Self> {
        let count = {
            let node: NodeRef<'_, K, V> = NodeRef::new(vis.page())?;
            node.count()
        };

        let mut cursor = Self {
            file,
            state: Some((vis, index)),
            _pair: PhantomData,
        };
        if index >= count {
            if let Some((vis, _)) = cursor.state.take() {
                cursor.state = Some((vis, count.saturating_sub(1)));
            }
            cursor.advance()?;
        }
        Ok(cursor)
    }

    /// Whether the cursor points at a pair.
    pub fn valid(&self) -> bool {
        self.state.is_some()
    }

    /// The pair under the cursor.
    pub fn pair(&self) -> Result<(K, V)> {
        let (vis, index) = self
            .state
            .as_ref()
            .ok_or_else(|| eyre::eyre!("cursor is exhausted"))?;
        let node: NodeRef<'_, K, V> = NodeRef::new(vis.page())?;
        ensure!(*index < node.count(), "cursor slot out of range");
        node.pair_at(*index)
    }

    pub fn key(&self) -> Result<K> {
        Ok(self.pair()?.0)
    }

    pub fn value(&self) -> Result<V> {
        Ok(self.pair()?.1)
    }

    /// Steps to the next pair, following the leaf chain. On an exhausted
    /// cursor this is a no-op.
    pub fn advance(&mut self) -> Result<()> {
        let Some((vis, index)) = self.state.take() else {
            return Ok(());
        };
        let index = index + 1;

        let (count, next) = {
            let node: NodeRef<'_, K, V> = NodeRef::new(vis.page())?;
            (node.count(), node.head().link())
        };

        if index < count {
            self.state = Some((vis, index));
        } else if next != NIL_PAGE {
            drop(vis);
            self.state = Some((self.file.get(next)?, 0));
        }
        Ok(())
    }
}
