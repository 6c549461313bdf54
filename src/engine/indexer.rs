//! Tree indexer: attaches blocks to the nested-set encoding of their space.

use log::debug;

use crate::store::{RecordStore, StoreUnit};
use crate::types::{Block, BlockHash, BlockId, Position, SpaceId, TreeError, TreeResult};

/// Outcome of a successful `attach`, `plant` or `graft`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    /// The block that received a position (the branch root for a graft).
    pub block_id: BlockId,
    /// Its position after the unit committed.
    pub position: Position,
    /// Whether bounds of other rows were shifted to make room.
    pub renumbered: bool,
}

/// Indexes blocks into a record store.
///
/// Every call runs as one unit of work of the store, scoped to the spaces it
/// touches, so concurrent callers on the same space are serialized and a
/// failure leaves no partial renumbering behind.
pub struct TreeIndexer<'s, S: RecordStore> {
    store: &'s S,
}

impl<'s, S: RecordStore> TreeIndexer<'s, S> {
    /// Create an indexer over `store`.
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &'s S {
        self.store
    }

    /// Index one unindexed block under its parent.
    ///
    /// Genesis blocks (no parent hash) are planted as the root of their space.
    /// A parent that is not indexed in the block's space yields
    /// [`TreeError::UnknownParent`] and leaves every row untouched.
    pub fn attach(&self, block: &Block) -> TreeResult<Attachment> {
        let space = block.space;
        let attachment = self.store.unit(&[space], |unit| {
            let current = unit
                .fetch_block(block.id)?
                .ok_or_else(|| TreeError::BlockNotFound(block.hash.to_string()))?;
            if current.is_indexed() {
                return Err(TreeError::AlreadyIndexed(current.id));
            }

            let Some(parent_hash) = current.parent_hash.as_ref() else {
                return plant_in(unit, &current);
            };
            let parent = unit
                .fetch_indexed_by_hash(space, parent_hash)?
                .ok_or_else(|| TreeError::UnknownParent {
                    hash: current.hash.clone(),
                    parent: parent_hash.clone(),
                })?;
            let parent_pos = parent.indexed_position()?;

            let (left, renumbered) = reserve_slot(unit, space, parent_pos, 1)?;
            let position = Position::new(parent_pos.depth + 1, left, left);
            unit.write_indexed(space, current.id, position)?;
            Ok(Attachment {
                block_id: current.id,
                position,
                renumbered,
            })
        })?;
        debug!(
            "attached {} in space {} at {}",
            block.hash, space, attachment.position
        );
        Ok(attachment)
    }

    /// Index `block` as the root of its space, whatever its parent hash says.
    ///
    /// Used for genesis blocks and for provisional roots of detached branches
    /// that are later joined with [`TreeIndexer::graft`].
    pub fn plant(&self, block: &Block) -> TreeResult<Attachment> {
        let attachment = self.store.unit(&[block.space], |unit| {
            let current = unit
                .fetch_block(block.id)?
                .ok_or_else(|| TreeError::BlockNotFound(block.hash.to_string()))?;
            if current.is_indexed() {
                return Err(TreeError::AlreadyIndexed(current.id));
            }
            plant_in(unit, &current)
        })?;
        debug!("planted {} as root of space {}", block.hash, block.space);
        Ok(attachment)
    }

    /// Join the whole tree of `branch` under the parent of its root, which
    /// must be indexed in `target`. All rows of `branch` move to `target`.
    pub fn graft(&self, branch: SpaceId, target: SpaceId) -> TreeResult<Attachment> {
        if branch == target {
            return Err(TreeError::invariant(format!(
                "cannot graft space {branch} onto itself"
            )));
        }
        let attachment = self.store.unit(&[branch, target], |unit| {
            let root = unit
                .fetch_root(branch)?
                .ok_or_else(|| TreeError::BlockNotFound(format!("root of space {branch}")))?;
            let root_pos = root.indexed_position()?;
            let parent_hash = root.parent_hash.clone().ok_or_else(|| {
                TreeError::invariant(format!("root {} of space {branch} is a genesis block", root.hash))
            })?;
            let parent = unit
                .fetch_indexed_by_hash(target, &parent_hash)?
                .ok_or_else(|| TreeError::UnknownParent {
                    hash: root.hash.clone(),
                    parent: parent_hash.clone(),
                })?;
            let parent_pos = parent.indexed_position()?;

            let (left, renumbered) = reserve_slot(unit, target, parent_pos, root_pos.width())?;
            let offset = left as i64 - root_pos.left as i64;
            unit.relocate_space(branch, target, parent_pos.depth + 1, offset)?;
            Ok(Attachment {
                block_id: root.id,
                position: Position::new(
                    parent_pos.depth + 1,
                    left,
                    left + root_pos.width() - 1,
                ),
                renumbered,
            })
        })?;
        debug!(
            "grafted space {} into space {} at {}",
            branch, target, attachment.position
        );
        Ok(attachment)
    }

    /// Whether `ancestor` is a strict ancestor of `descendant` in `space`,
    /// answered from the two stored positions alone.
    pub fn is_ancestor(
        &self,
        space: SpaceId,
        ancestor: &BlockHash,
        descendant: &BlockHash,
    ) -> TreeResult<bool> {
        let a = self.indexed_position(space, ancestor)?;
        let d = self.indexed_position(space, descendant)?;
        Ok(a.is_ancestor_of(&d))
    }

    fn indexed_position(&self, space: SpaceId, hash: &BlockHash) -> TreeResult<Position> {
        self.store
            .fetch_indexed_by_hash(space, hash)?
            .ok_or_else(|| TreeError::BlockNotFound(hash.to_string()))?
            .indexed_position()
    }
}

fn plant_in(unit: &mut dyn StoreUnit, block: &Block) -> TreeResult<Attachment> {
    if let Some(root) = unit.fetch_root(block.space)? {
        return Err(TreeError::invariant(format!(
            "space {} already has root {}",
            block.space, root.hash
        )));
    }
    let position = Position::root();
    unit.write_indexed(block.space, block.id, position)?;
    Ok(Attachment {
        block_id: block.id,
        position,
        renumbered: false,
    })
}

/// Open `width` slots for a new rightmost child subtree of `parent` and
/// return the left bound it should take.
///
/// A childless parent lends its own slot to the first child, so only
/// `width - 1` extra slots are needed. Otherwise the subtree goes right after
/// the parent's current closing bound `p`: every bound above `p` moves up by
/// `width`, and the parent plus any ancestor closing exactly at `p` stretch
/// to cover the new slots. Bounds below `p`, and descendants of the parent
/// closing at `p`, never move.
fn reserve_slot(
    unit: &mut dyn StoreUnit,
    space: SpaceId,
    parent: Position,
    width: u64,
) -> TreeResult<(u64, bool)> {
    let p = parent.right;
    let has_children = unit.has_child_at_depth(space, parent.left, parent.right, parent.depth + 1)?;
    let (left, extra) = if has_children {
        (p + 1, width)
    } else {
        (p, width - 1)
    };
    if extra == 0 {
        return Ok((left, false));
    }
    unit.shift_left_bounds(space, p + 1, extra)?;
    unit.shift_right_bounds(space, p + 1, extra)?;
    unit.stretch_enclosing(space, p, parent.depth, extra)?;
    Ok((left, true))
}
