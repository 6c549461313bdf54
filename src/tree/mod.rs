//! Block trees materialized from interval rows.

pub mod block_tree;
pub mod builder;
pub mod query;
pub mod render;

pub use block_tree::{BlockTree, TreeNode};
pub use builder::TreeBuilder;
pub use query::TreeStats;
pub use render::{Render, RenderRow};
