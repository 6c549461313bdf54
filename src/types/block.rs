//! Block rows and their nested-set positions.

use serde::{Deserialize, Serialize};

/// Surrogate key assigned by the record store.
pub type BlockId = u64;

/// Partition tag: each space holds one independent tree.
pub type SpaceId = u32;

/// Content identifier of a block. Opaque to the index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHash(String);

impl BlockHash {
    /// Wrap a hash string.
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// The hash as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BlockHash {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for BlockHash {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Nested-set coordinates of an indexed block.
///
/// `B` descends from `A` iff `A.left <= B.left && B.right <= A.right && A.depth < B.depth`.
/// A block with a single child shares its slot with that child, so only the
/// depth separates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Edges from the root of the space.
    pub depth: u32,
    /// Opening bound.
    pub left: u64,
    /// Closing bound (inclusive).
    pub right: u64,
}

impl Position {
    /// Create a position. Panics in debug builds if `left > right`.
    pub fn new(depth: u32, left: u64, right: u64) -> Self {
        debug_assert!(left <= right, "inverted span [{left}, {right}]");
        Self { depth, left, right }
    }

    /// The position of a freshly planted root.
    pub fn root() -> Self {
        Self::new(0, 0, 0)
    }

    /// Whether `other`'s interval lies inside this one (depth not considered).
    pub fn encloses(&self, other: &Position) -> bool {
        self.left <= other.left && other.right <= self.right
    }

    /// Whether `other` is a strict descendant of the block at this position.
    pub fn is_ancestor_of(&self, other: &Position) -> bool {
        self.encloses(other) && self.depth < other.depth
    }

    /// Whether `other` sits exactly one level below and inside this interval.
    pub fn is_parent_of(&self, other: &Position) -> bool {
        self.encloses(other) && self.depth + 1 == other.depth
    }

    /// Whether two intervals share at least one slot.
    pub fn overlaps(&self, other: &Position) -> bool {
        self.left <= other.right && other.left <= self.right
    }

    /// Number of slots covered by the interval.
    pub fn width(&self) -> u64 {
        self.right - self.left + 1
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "depth={} [{}, {}]", self.depth, self.left, self.right)
    }
}

/// A block row as held by the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Surrogate key, stable across re-indexing and grafting.
    pub id: BlockId,
    /// Unique content identifier.
    pub hash: BlockHash,
    /// Hash of the block this one extends; `None` for a genesis block.
    pub parent_hash: Option<BlockHash>,
    /// Space (tree partition) the block belongs to.
    pub space: SpaceId,
    /// Nested-set coordinates; `None` while unindexed.
    pub position: Option<Position>,
}

impl Block {
    /// Whether the block has been assigned a position.
    pub fn is_indexed(&self) -> bool {
        self.position.is_some()
    }

    /// Position of an indexed block, or an invariant error naming it.
    pub fn indexed_position(&self) -> super::TreeResult<Position> {
        self.position.ok_or_else(|| {
            super::TreeError::invariant(format!("block {} has no position", self.hash))
        })
    }
}

/// A block as handed over by ingestion, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBlock {
    pub hash: BlockHash,
    #[serde(default)]
    pub parent_hash: Option<BlockHash>,
    #[serde(default)]
    pub space: SpaceId,
}

impl NewBlock {
    /// A genesis block in `space`.
    pub fn genesis(hash: impl Into<BlockHash>, space: SpaceId) -> Self {
        Self {
            hash: hash.into(),
            parent_hash: None,
            space,
        }
    }

    /// A block extending `parent` in `space`.
    pub fn child(hash: impl Into<BlockHash>, parent: impl Into<BlockHash>, space: SpaceId) -> Self {
        Self {
            hash: hash.into(),
            parent_hash: Some(parent.into()),
            space,
        }
    }
}
