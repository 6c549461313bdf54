//! Record stores holding block rows and their nested-set columns.
//!
//! Every mutation of interval bounds happens inside a unit of work opened with
//! [`RecordStore::unit`]: it either commits as a whole or leaves no trace, and
//! no reader ever observes a half-renumbered space.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::types::{Block, BlockHash, BlockId, NewBlock, Position, SpaceId, TreeResult};

/// Operations available inside one atomic unit of work.
pub trait StoreUnit {
    /// Fetch any block (indexed or not) by id.
    fn fetch_block(&mut self, id: BlockId) -> TreeResult<Option<Block>>;

    /// Fetch an indexed block of `space` by hash.
    fn fetch_indexed_by_hash(&mut self, space: SpaceId, hash: &BlockHash)
        -> TreeResult<Option<Block>>;

    /// Fetch the depth-0 block of `space`.
    fn fetch_root(&mut self, space: SpaceId) -> TreeResult<Option<Block>>;

    /// Whether some block at `depth` has an interval inside `[left, right]`.
    fn has_child_at_depth(
        &mut self,
        space: SpaceId,
        left: u64,
        right: u64,
        depth: u32,
    ) -> TreeResult<bool>;

    /// Add `delta` to every `left >= threshold` in `space`.
    fn shift_left_bounds(&mut self, space: SpaceId, threshold: u64, delta: u64) -> TreeResult<()>;

    /// Add `delta` to every `right >= threshold` in `space`.
    fn shift_right_bounds(&mut self, space: SpaceId, threshold: u64, delta: u64)
        -> TreeResult<()>;

    /// Add `delta` to `right` of every row with `right == bound` and `depth <= max_depth`.
    fn stretch_enclosing(
        &mut self,
        space: SpaceId,
        bound: u64,
        max_depth: u32,
        delta: u64,
    ) -> TreeResult<()>;

    /// Store the position of a block.
    fn write_indexed(&mut self, space: SpaceId, id: BlockId, position: Position)
        -> TreeResult<()>;

    /// Move every row of `from` into `to`, adding `depth_delta` to depths and
    /// `offset` to both bounds of indexed rows.
    fn relocate_space(
        &mut self,
        from: SpaceId,
        to: SpaceId,
        depth_delta: u32,
        offset: i64,
    ) -> TreeResult<()>;
}

/// A persistent home for block rows.
pub trait RecordStore: Send + Sync {
    /// Ingest an unindexed block and return its surrogate id.
    fn insert(&self, block: NewBlock) -> TreeResult<BlockId>;

    /// Unindexed rows of `space`, ascending id.
    fn fetch_unindexed(&self, space: SpaceId) -> TreeResult<Vec<Block>>;

    /// Indexed rows of `space`, ascending depth then left bound.
    fn fetch_indexed(&self, space: SpaceId) -> TreeResult<Vec<Block>>;

    /// An indexed block of `space` by hash.
    fn fetch_indexed_by_hash(&self, space: SpaceId, hash: &BlockHash) -> TreeResult<Option<Block>>;

    /// The root of `space`, if one has been planted.
    fn fetch_root(&self, space: SpaceId) -> TreeResult<Option<Block>>;

    /// All spaces holding at least one row, ascending.
    fn spaces(&self) -> TreeResult<Vec<SpaceId>>;

    /// Run `work` as one atomic unit holding the write scope of `spaces`.
    ///
    /// Returning `Err` from `work` discards every mutation it made.
    fn unit<T, F>(&self, spaces: &[SpaceId], work: F) -> TreeResult<T>
    where
        F: FnOnce(&mut dyn StoreUnit) -> TreeResult<T>;
}

/// Apply a signed offset to a bound, refusing to go negative.
pub(crate) fn offset_bound(bound: u64, offset: i64) -> TreeResult<u64> {
    bound.checked_add_signed(offset).ok_or_else(|| {
        crate::types::TreeError::invariant(format!("bound {bound} shifted by {offset} underflows"))
    })
}
