//! Command implementations behind the `bspan` binary.

pub mod commands;
