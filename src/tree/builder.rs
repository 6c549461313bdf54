//! Fluent API for ingesting block trees into a store.

use crate::store::RecordStore;
use crate::types::{BlockHash, BlockId, NewBlock, SpaceId, TreeResult, DEFAULT_SPACE};

/// Fluent builder that ingests unindexed blocks into one space of a store.
pub struct TreeBuilder<'s, S: RecordStore> {
    store: &'s S,
    space: SpaceId,
    ids: Vec<BlockId>,
}

impl<'s, S: RecordStore> TreeBuilder<'s, S> {
    /// Ingest into the default space.
    pub fn new(store: &'s S) -> Self {
        Self::in_space(store, DEFAULT_SPACE)
    }

    /// Ingest into `space`.
    pub fn in_space(store: &'s S, space: SpaceId) -> Self {
        Self {
            store,
            space,
            ids: Vec::new(),
        }
    }

    /// Add a block without a parent.
    pub fn genesis(&mut self, hash: impl Into<BlockHash>) -> TreeResult<&mut Self> {
        self.push(NewBlock::genesis(hash, self.space))
    }

    /// Add a block extending `parent`.
    pub fn child(
        &mut self,
        hash: impl Into<BlockHash>,
        parent: impl Into<BlockHash>,
    ) -> TreeResult<&mut Self> {
        self.push(NewBlock::child(hash, parent, self.space))
    }

    /// Add a linear run `prefix1`, `prefix2`, … of `len` blocks on top of `parent`.
    pub fn chain(
        &mut self,
        parent: impl Into<BlockHash>,
        prefix: &str,
        len: usize,
    ) -> TreeResult<&mut Self> {
        let mut parent: BlockHash = parent.into();
        for i in 1..=len {
            let hash = BlockHash::new(format!("{prefix}{i}"));
            self.push(NewBlock::child(hash.clone(), parent, self.space))?;
            parent = hash;
        }
        Ok(self)
    }

    /// Ids assigned so far, in ingestion order.
    pub fn ids(&self) -> &[BlockId] {
        &self.ids
    }

    fn push(&mut self, block: NewBlock) -> TreeResult<&mut Self> {
        let id = self.store.insert(block)?;
        self.ids.push(id);
        Ok(self)
    }
}
