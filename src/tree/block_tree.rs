//! In-memory block tree rebuilt from interval-tagged rows.

use std::collections::HashMap;
use std::ops::Range;

use crate::store::RecordStore;
use crate::types::{Block, BlockHash, Position, SpaceId, TreeError, TreeResult};

/// One block of a materialized tree with its derived links.
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// The stored row.
    pub block: Block,
    /// Its nested-set position.
    pub position: Position,
    pub(crate) parent: Option<usize>,
    pub(crate) children: Vec<usize>,
}

impl TreeNode {
    /// Whether the node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of immediate children.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }
}

/// A forest partition rebuilt purely from `(depth, left, right)`.
///
/// Parent/child edges are derived from interval containment; `parent_hash`
/// is not consulted while building, which makes the tree a check on the
/// encoding (see [`BlockTree::verify_parentage`]).
#[derive(Debug, Clone, Default)]
pub struct BlockTree {
    space: Option<SpaceId>,
    /// Sorted by depth, then left bound.
    pub(crate) nodes: Vec<TreeNode>,
    pub(crate) root: Option<usize>,
    by_hash: HashMap<BlockHash, usize>,
}

impl BlockTree {
    /// Load and materialize every indexed row of `space`.
    pub fn load<S: RecordStore>(store: &S, space: SpaceId) -> TreeResult<Self> {
        let mut tree = Self::materialize(store.fetch_indexed(space)?)?;
        tree.space = Some(space);
        Ok(tree)
    }

    /// Build a tree from indexed rows of a single space.
    ///
    /// Pass one buckets rows by depth and checks that intervals at one depth
    /// are disjoint. Pass two links each row to the enclosing row one level
    /// up, found by binary search over the sorted parent bucket.
    pub fn materialize(rows: Vec<Block>) -> TreeResult<Self> {
        let mut rows = rows
            .into_iter()
            .map(|b| {
                let p = b.indexed_position()?;
                Ok((b, p))
            })
            .collect::<TreeResult<Vec<_>>>()?;
        rows.sort_by_key(|(_, p)| (p.depth, p.left));

        let space = rows.first().map(|(b, _)| b.space);
        let mut nodes: Vec<TreeNode> = Vec::with_capacity(rows.len());
        let mut by_hash = HashMap::with_capacity(rows.len());
        let mut buckets: Vec<Range<usize>> = Vec::new();

        for (block, position) in rows {
            if Some(block.space) != space {
                return Err(TreeError::invariant(format!(
                    "block {} belongs to space {}, not {:?}",
                    block.hash, block.space, space
                )));
            }
            let idx = nodes.len();
            let depth = position.depth as usize;
            if depth == buckets.len() {
                buckets.push(idx..idx);
            } else if depth > buckets.len() {
                return Err(TreeError::invariant(format!(
                    "block {} at depth {} has no blocks above it",
                    block.hash, depth
                )));
            }
            if let Some(prev) = nodes.get(buckets[depth].start..idx).and_then(|b| b.last()) {
                if prev.position.overlaps(&position) {
                    return Err(TreeError::invariant(format!(
                        "blocks {} {} and {} {} overlap at the same depth",
                        prev.block.hash, prev.position, block.hash, position
                    )));
                }
            }
            if by_hash.insert(block.hash.clone(), idx).is_some() {
                return Err(TreeError::invariant(format!(
                    "block {} appears twice",
                    block.hash
                )));
            }
            buckets[depth].end = idx + 1;
            nodes.push(TreeNode {
                block,
                position,
                parent: None,
                children: Vec::new(),
            });
        }

        let root = match buckets.first() {
            None => None,
            Some(level) if level.len() == 1 => Some(level.start),
            Some(level) => {
                return Err(TreeError::invariant(format!(
                    "space {:?} has {} roots",
                    space,
                    level.len()
                )))
            }
        };

        for depth in 1..buckets.len() {
            let parents = buckets[depth - 1].clone();
            for child in buckets[depth].clone() {
                let pos = nodes[child].position;
                let slot = nodes[parents.clone()].partition_point(|n| n.position.left <= pos.left);
                let parent = parents.start + slot.checked_sub(1).ok_or_else(|| unenclosed(&nodes[child]))?;
                if !nodes[parent].position.encloses(&pos) {
                    return Err(unenclosed(&nodes[child]));
                }
                nodes[child].parent = Some(parent);
                nodes[parent].children.push(child);
            }
        }

        Ok(Self {
            space,
            nodes,
            root,
            by_hash,
        })
    }

    /// Space the rows came from, `None` for an empty tree.
    pub fn space(&self) -> Option<SpaceId> {
        self.space
    }

    /// Number of blocks.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The depth-0 block.
    pub fn root(&self) -> Option<&TreeNode> {
        self.root.map(|i| &self.nodes[i])
    }

    /// Look up a node by block hash.
    pub fn get(&self, hash: &BlockHash) -> Option<&TreeNode> {
        self.by_hash.get(hash).map(|&i| &self.nodes[i])
    }

    /// All nodes, sorted by depth then left bound.
    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    /// Check that every derived edge matches the `parent_hash` recorded at
    /// ingestion.
    pub fn verify_parentage(&self) -> TreeResult<()> {
        for node in &self.nodes {
            match node.parent {
                Some(parent) => {
                    let expected = &self.nodes[parent].block.hash;
                    if node.block.parent_hash.as_ref() != Some(expected) {
                        return Err(TreeError::invariant(format!(
                            "block {} sits under {} but records parent {:?}",
                            node.block.hash,
                            expected,
                            node.block.parent_hash.as_ref().map(BlockHash::as_str)
                        )));
                    }
                }
                None => {
                    if let Some(recorded) = &node.block.parent_hash {
                        if self.by_hash.contains_key(recorded) {
                            return Err(TreeError::invariant(format!(
                                "root {} records parent {} inside its own tree",
                                node.block.hash, recorded
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn index_of(&self, hash: &BlockHash) -> TreeResult<usize> {
        self.by_hash
            .get(hash)
            .copied()
            .ok_or_else(|| TreeError::BlockNotFound(hash.to_string()))
    }
}

fn unenclosed(node: &TreeNode) -> TreeError {
    TreeError::invariant(format!(
        "block {} {} has no enclosing parent one level up",
        node.block.hash, node.position
    ))
}
