//! Depth-first rendering of a materialized tree.

use std::fmt::Write as _;

use serde::Serialize;

use crate::types::{BlockHash, DEFAULT_INDENT};

use super::BlockTree;

/// One emitted line of a rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RenderRow<'t> {
    pub hash: &'t BlockHash,
    pub depth: u32,
    pub left: u64,
    pub right: u64,
}

/// Lazy pre-order walk from the root; children in left-bound order.
pub struct Render<'t> {
    tree: &'t BlockTree,
    stack: Vec<usize>,
}

impl<'t> Iterator for Render<'t> {
    type Item = RenderRow<'t>;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.stack.pop()?;
        let node = &self.tree.nodes[idx];
        self.stack.extend(node.children.iter().rev().copied());
        Some(RenderRow {
            hash: &node.block.hash,
            depth: node.position.depth,
            left: node.position.left,
            right: node.position.right,
        })
    }
}

impl BlockTree {
    /// Walk the tree in pre-order. Restartable and side-effect free.
    pub fn render(&self) -> Render<'_> {
        Render {
            tree: self,
            stack: self.root.into_iter().collect(),
        }
    }

    /// Render one line per block, indented `indent` spaces per depth level.
    pub fn render_text(&self, indent: usize) -> String {
        let mut out = String::new();
        for row in self.render() {
            let pad = row.depth as usize * indent;
            // Writing to a String cannot fail.
            let _ = writeln!(out, "{:pad$}{} [{}, {}]", "", row.hash, row.left, row.right);
        }
        out
    }
}

impl std::fmt::Display for BlockTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render_text(DEFAULT_INDENT))
    }
}
