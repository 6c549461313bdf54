//! High-level operations: the tree indexer and the organizer driving it.

pub mod indexer;
pub mod organizer;

pub use indexer::{Attachment, TreeIndexer};
pub use organizer::{OrganizeReport, Organizer, OrganizerParams};
