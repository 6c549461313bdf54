//! CLI command implementations.

use std::path::Path;

use crate::engine::{Organizer, OrganizerParams, TreeIndexer};
use crate::store::{RecordStore, SqliteStore};
use crate::tree::BlockTree;
use crate::types::{Block, BlockHash, NewBlock, SpaceId, TreeResult};

fn print_json(value: &serde_json::Value, pretty: bool) {
    let text = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    println!("{}", text.unwrap_or_default());
}

fn selected_spaces(store: &SqliteStore, space: Option<SpaceId>) -> TreeResult<Vec<SpaceId>> {
    match space {
        Some(space) => Ok(vec![space]),
        None => store.spaces(),
    }
}

/// Create the database file and schema.
pub fn cmd_init(db: &Path) -> TreeResult<()> {
    SqliteStore::open(db)?;
    println!("Initialized {}", db.display());
    Ok(())
}

/// Ingest one unindexed block.
pub fn cmd_add(
    db: &Path,
    hash: &str,
    parent: Option<&str>,
    space: SpaceId,
    json: bool,
) -> TreeResult<()> {
    let store = SqliteStore::open(db)?;
    let block = NewBlock {
        hash: BlockHash::from(hash),
        parent_hash: parent.map(BlockHash::from),
        space,
    };
    let id = store.insert(block)?;
    if json {
        print_json(&serde_json::json!({"id": id, "hash": hash, "space": space}), false);
    } else {
        println!("Added block #{} ({}) to space {}", id, hash, space);
    }
    Ok(())
}

/// Ingest blocks from a JSON array of `{hash, parent_hash, space}` objects.
pub fn cmd_import(db: &Path, json_file: &Path, json: bool) -> TreeResult<()> {
    let store = SqliteStore::open(db)?;
    let content = std::fs::read_to_string(json_file)?;
    let blocks: Vec<NewBlock> = serde_json::from_str(&content)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let count = blocks.len();
    for block in blocks {
        store.insert(block)?;
    }
    if json {
        print_json(&serde_json::json!({"imported": count}), false);
    } else {
        println!("Imported {} blocks from {}", count, json_file.display());
    }
    Ok(())
}

/// Attach every pending block whose ancestry is indexed.
pub fn cmd_organize(
    db: &Path,
    space: Option<SpaceId>,
    params: OrganizerParams,
    abandon: &[String],
    json: bool,
) -> TreeResult<()> {
    let store = SqliteStore::open(db)?;
    let mut organizer = Organizer::with_params(&store, params);
    for hash in abandon {
        organizer.abandon(hash.as_str());
    }
    let report = match space {
        Some(space) => organizer.organize(space)?,
        None => organizer.organize_all()?,
    };
    if json {
        print_json(
            &serde_json::json!({
                "attached": report.attached,
                "deferred": report.deferred,
                "orphaned": report.orphaned,
                "joined": report.joined,
            }),
            false,
        );
    } else {
        println!("Attached: {}", report.attached.len());
        println!("Deferred: {}", report.deferred.len());
        println!("Orphaned: {}", report.orphaned.len());
        for joined in &report.joined {
            println!("Joined space {} into space {}", joined, params.main_space);
        }
    }
    Ok(())
}

/// Graft detached branch spaces into `target`.
pub fn cmd_join(db: &Path, target: SpaceId, json: bool) -> TreeResult<()> {
    let store = SqliteStore::open(db)?;
    let mut organizer = Organizer::new(&store);
    let joined = organizer.join_branches(target)?;
    if json {
        print_json(&serde_json::json!({"target": target, "joined": joined}), false);
    } else if joined.is_empty() {
        println!("No branches to join into space {}", target);
    } else {
        for space in joined {
            println!("Joined space {} into space {}", space, target);
        }
    }
    Ok(())
}

/// Print the indented tree of one or every space.
pub fn cmd_render(db: &Path, space: Option<SpaceId>, indent: usize, json: bool) -> TreeResult<()> {
    let store = SqliteStore::open(db)?;
    for space in selected_spaces(&store, space)? {
        let tree = BlockTree::load(&store, space)?;
        if json {
            let rows: Vec<_> = tree.render().collect();
            print_json(&serde_json::json!({"space": space, "rows": rows}), false);
        } else {
            println!("Space {}:", space);
            print!("{}", tree.render_text(indent));
        }
    }
    Ok(())
}

/// Rebuild each tree from intervals and compare with recorded parents.
pub fn cmd_verify(db: &Path, space: Option<SpaceId>, json: bool) -> TreeResult<()> {
    let store = SqliteStore::open(db)?;
    let mut checked = Vec::new();
    for space in selected_spaces(&store, space)? {
        let tree = BlockTree::load(&store, space)?;
        tree.verify_parentage()?;
        checked.push((space, tree.len()));
    }
    if json {
        let spaces: Vec<_> = checked
            .iter()
            .map(|(space, blocks)| serde_json::json!({"space": space, "blocks": blocks}))
            .collect();
        print_json(&serde_json::json!({"ok": true, "spaces": spaces}), false);
    } else {
        for (space, blocks) in checked {
            println!("Space {}: {} blocks OK", space, blocks);
        }
    }
    Ok(())
}

/// Test ancestry of two blocks from their stored positions.
pub fn cmd_ancestor(
    db: &Path,
    space: SpaceId,
    ancestor: &str,
    descendant: &str,
    json: bool,
) -> TreeResult<()> {
    let store = SqliteStore::open(db)?;
    let indexer = TreeIndexer::new(&store);
    let result = indexer.is_ancestor(space, &ancestor.into(), &descendant.into())?;
    if json {
        print_json(
            &serde_json::json!({"ancestor": ancestor, "descendant": descendant, "result": result}),
            false,
        );
    } else if result {
        println!("{} is an ancestor of {}", ancestor, descendant);
    } else {
        println!("{} is not an ancestor of {}", ancestor, descendant);
    }
    Ok(())
}

fn print_blocks(blocks: &[&Block], json: bool) {
    if json {
        print_json(&serde_json::json!(blocks), false);
        return;
    }
    for block in blocks {
        match block.position {
            Some(p) => println!("{} {}", block.hash, p),
            None => println!("{} (unindexed)", block.hash),
        }
    }
}

/// List the tips of the longest chains.
pub fn cmd_deepest(db: &Path, space: SpaceId, json: bool) -> TreeResult<()> {
    let store = SqliteStore::open(db)?;
    let tree = BlockTree::load(&store, space)?;
    print_blocks(&tree.deepest_leaves(), json);
    Ok(())
}

/// List the blocks from the root down to `hash`.
pub fn cmd_chain(db: &Path, space: SpaceId, hash: &str, json: bool) -> TreeResult<()> {
    let store = SqliteStore::open(db)?;
    let tree = BlockTree::load(&store, space)?;
    print_blocks(&tree.chain(&hash.into())?, json);
    Ok(())
}

/// Shape statistics for one or every space.
pub fn cmd_stats(db: &Path, space: Option<SpaceId>, json: bool) -> TreeResult<()> {
    let store = SqliteStore::open(db)?;
    for space in selected_spaces(&store, space)? {
        let tree = BlockTree::load(&store, space)?;
        let stats = tree.stats();
        let pending = store.fetch_unindexed(space)?.len();
        if json {
            print_json(
                &serde_json::json!({"space": space, "stats": stats, "pending": pending}),
                false,
            );
        } else {
            println!("Space {}:", space);
            println!("  Blocks: {}", stats.blocks);
            println!("  Pending: {}", pending);
            println!("  Max depth: {}", stats.max_depth);
            println!("  Leaves: {}", stats.leaves);
            println!("  Forks: {}", stats.forks);
        }
    }
    Ok(())
}

/// Dump every row (indexed or not) as JSON.
pub fn cmd_export(db: &Path, space: Option<SpaceId>, pretty: bool) -> TreeResult<()> {
    let store = SqliteStore::open(db)?;
    let mut blocks: Vec<Block> = Vec::new();
    for space in selected_spaces(&store, space)? {
        blocks.extend(store.fetch_indexed(space)?);
        blocks.extend(store.fetch_unindexed(space)?);
    }
    blocks.sort_by_key(|b| b.id);
    print_json(&serde_json::json!({"blocks": blocks}), pretty);
    Ok(())
}
