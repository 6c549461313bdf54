//! Queries answered from interval positions of a materialized tree.

use serde::Serialize;

use crate::types::{Block, BlockHash, TreeResult};

use super::BlockTree;

/// Shape summary of a tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    /// Number of blocks.
    pub blocks: usize,
    /// Depth of the deepest block.
    pub max_depth: u32,
    /// Blocks without children.
    pub leaves: usize,
    /// Blocks with more than one child.
    pub forks: usize,
}

impl BlockTree {
    /// Whether `ancestor` strictly precedes `descendant` on one chain.
    pub fn is_ancestor(&self, ancestor: &BlockHash, descendant: &BlockHash) -> TreeResult<bool> {
        let a = self.nodes[self.index_of(ancestor)?].position;
        let d = self.nodes[self.index_of(descendant)?].position;
        Ok(a.is_ancestor_of(&d))
    }

    /// The block directly below which `hash` sits, `None` for the root.
    pub fn parent(&self, hash: &BlockHash) -> TreeResult<Option<&Block>> {
        let idx = self.index_of(hash)?;
        Ok(self.nodes[idx].parent.map(|p| &self.nodes[p].block))
    }

    /// Immediate children of `hash`, in left-bound order.
    pub fn children(&self, hash: &BlockHash) -> TreeResult<Vec<&Block>> {
        let idx = self.index_of(hash)?;
        Ok(self.nodes[idx]
            .children
            .iter()
            .map(|&c| &self.nodes[c].block)
            .collect())
    }

    /// Blocks from the root down to `hash`, inclusive.
    pub fn chain(&self, hash: &BlockHash) -> TreeResult<Vec<&Block>> {
        let mut idx = Some(self.index_of(hash)?);
        let mut chain = Vec::new();
        while let Some(i) = idx {
            chain.push(&self.nodes[i].block);
            idx = self.nodes[i].parent;
        }
        chain.reverse();
        Ok(chain)
    }

    /// Every strict descendant of `hash`, by depth then left bound.
    pub fn descendants(&self, hash: &BlockHash) -> TreeResult<Vec<&Block>> {
        let pos = self.nodes[self.index_of(hash)?].position;
        Ok(self
            .nodes
            .iter()
            .filter(|n| pos.is_ancestor_of(&n.position))
            .map(|n| &n.block)
            .collect())
    }

    /// Blocks without children, in left-bound order.
    pub fn leaves(&self) -> Vec<&Block> {
        let mut leaves: Vec<_> = self.nodes.iter().filter(|n| n.is_leaf()).collect();
        leaves.sort_by_key(|n| n.position.left);
        leaves.into_iter().map(|n| &n.block).collect()
    }

    /// The tips of the longest chains.
    pub fn deepest_leaves(&self) -> Vec<&Block> {
        let Some(max_depth) = self.nodes.last().map(|n| n.position.depth) else {
            return Vec::new();
        };
        self.nodes
            .iter()
            .filter(|n| n.position.depth == max_depth)
            .map(|n| &n.block)
            .collect()
    }

    /// Count blocks, leaves and forks.
    pub fn stats(&self) -> TreeStats {
        TreeStats {
            blocks: self.nodes.len(),
            max_depth: self.nodes.last().map(|n| n.position.depth).unwrap_or(0),
            leaves: self.nodes.iter().filter(|n| n.is_leaf()).count(),
            forks: self.nodes.iter().filter(|n| n.child_count() > 1).count(),
        }
    }
}
