//! All data types for the blockspan library.

pub mod block;
pub mod error;

pub use block::{Block, BlockHash, BlockId, NewBlock, Position, SpaceId};
pub use error::{TreeError, TreeResult};

/// Space used when ingestion does not say otherwise.
pub const DEFAULT_SPACE: SpaceId = 0;

/// Unknown-parent attempts before a block is classified as an orphan.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Maximum number of blocks kept pending per space before the oldest are dropped as orphans.
pub const DEFAULT_ORPHAN_POOL_SIZE: usize = 1024;

/// Spaces of indentation per depth level when rendering.
pub const DEFAULT_INDENT: usize = 2;
