//! blockspan: nested-set indexing of block trees.
//!
//! Blocks are stored as rows tagged with a space (one independent tree per
//! space) and, once indexed, a `(depth, left, right)` position. Ancestry is
//! then an interval test instead of a walk over parent pointers.
//!
//! [`TreeIndexer`] attaches blocks one atomic unit at a time and [`Organizer`]
//! feeds it pending blocks in parent-first order. [`BlockTree`] rebuilds a
//! space from its interval rows for rendering and queries.

pub mod cli;
pub mod config;
pub mod engine;
pub mod store;
pub mod tree;
pub mod types;

// Re-export commonly used types at the crate root
pub use config::Config;
pub use engine::{Attachment, OrganizeReport, Organizer, OrganizerParams, TreeIndexer};
pub use store::{MemoryStore, RecordStore, SqliteStore, StoreUnit};
pub use tree::{BlockTree, Render, RenderRow, TreeBuilder, TreeNode, TreeStats};
pub use types::{
    Block, BlockHash, BlockId, NewBlock, Position, SpaceId, TreeError, TreeResult, DEFAULT_SPACE,
};
