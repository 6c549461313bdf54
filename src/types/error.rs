//! Error types for the blockspan library.

use thiserror::Error;

use super::block::{BlockHash, BlockId};

/// All errors that can occur while indexing or materializing a block tree.
#[derive(Error, Debug)]
pub enum TreeError {
    /// The block's parent is not indexed in the block's space (yet).
    #[error("Parent {parent} of block {hash} is not indexed")]
    UnknownParent { hash: BlockHash, parent: BlockHash },

    /// `attach` was called on a block that already has a position.
    #[error("Block {0} is already indexed")]
    AlreadyIndexed(BlockId),

    /// The interval encoding is broken (store corruption or a concurrency fault).
    #[error("Nested-set invariant violated: {0}")]
    InvariantViolation(String),

    /// The persistence layer could not complete the unit of work.
    #[error("Record store unavailable: {0}")]
    StoreUnavailable(String),

    /// No block with this hash or id exists where it was expected.
    #[error("Block {0} not found")]
    BlockNotFound(String),

    /// A block with this hash was already ingested.
    #[error("Duplicate block hash: {0}")]
    DuplicateHash(BlockHash),

    /// The block was classified as a permanent orphan.
    #[error("Block {0} is an orphan")]
    Orphan(BlockHash),

    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be read or parsed.
    #[error("Config error: {0}")]
    Config(String),
}

impl TreeError {
    /// Whether repeating the identical call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UnknownParent { .. } | Self::StoreUnavailable(_) | Self::Sql(_) | Self::Io(_)
        )
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }
}

/// Convenience result type for blockspan operations.
pub type TreeResult<T> = Result<T, TreeError>;
