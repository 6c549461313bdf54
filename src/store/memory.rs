//! In-memory record store with one writer lock per space.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::types::{
    Block, BlockHash, BlockId, NewBlock, Position, SpaceId, TreeError, TreeResult,
};

use super::{offset_bound, RecordStore, StoreUnit};

/// Rows of one space, keyed by block id, with a hash index over the indexed
/// rows.
#[derive(Debug, Default)]
struct SpaceTable {
    rows: BTreeMap<BlockId, Block>,
    indexed: HashMap<BlockHash, BlockId>,
}

impl SpaceTable {
    fn indexed_by_hash(&self, hash: &BlockHash) -> Option<&Block> {
        self.indexed.get(hash).and_then(|id| self.rows.get(id))
    }

    fn root(&self, space: SpaceId) -> TreeResult<Option<&Block>> {
        let mut roots = self
            .rows
            .values()
            .filter(|b| matches!(b.position, Some(p) if p.depth == 0));
        let root = roots.next();
        if roots.next().is_some() {
            return Err(TreeError::invariant(format!(
                "space {space} has more than one root"
            )));
        }
        Ok(root)
    }

    fn insert_row(&mut self, block: Block) {
        if block.is_indexed() {
            self.indexed.insert(block.hash.clone(), block.id);
        }
        self.rows.insert(block.id, block);
    }

    fn remove_row(&mut self, id: BlockId) -> Option<Block> {
        let block = self.rows.remove(&id)?;
        self.indexed.remove(&block.hash);
        Some(block)
    }

    fn take_rows(&mut self) -> BTreeMap<BlockId, Block> {
        self.indexed.clear();
        std::mem::take(&mut self.rows)
    }

    /// Replace the position of row `id` and return the previous one, or
    /// `None` when the row does not exist.
    fn set_position(&mut self, id: BlockId, position: Option<Position>) -> Option<Option<Position>> {
        let row = self.rows.get_mut(&id)?;
        let previous = std::mem::replace(&mut row.position, position);
        if position.is_some() {
            self.indexed.insert(row.hash.clone(), id);
        } else {
            self.indexed.remove(&row.hash);
        }
        Some(previous)
    }
}

/// Hash registry and id allocator shared by all spaces.
#[derive(Debug, Default)]
struct Registry {
    next_id: BlockId,
    hashes: HashSet<BlockHash>,
}

/// A record store kept entirely in memory.
///
/// Each space has its own mutex. A unit of work holds the mutexes of its
/// spaces and mutates their tables in place, logging the prior state of every
/// row it touches. A failed unit replays the log backwards before releasing
/// the locks, so readers observe a space either before or after a unit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    spaces: RwLock<BTreeMap<SpaceId, Arc<Mutex<SpaceTable>>>>,
    registry: Mutex<Registry>,
}

fn poisoned<T>(_: T) -> TreeError {
    TreeError::StoreUnavailable("memory store lock poisoned".to_string())
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of rows across all spaces.
    pub fn len(&self) -> TreeResult<usize> {
        Ok(self.registry.lock().map_err(poisoned)?.hashes.len())
    }

    /// Whether the store holds no rows.
    pub fn is_empty(&self) -> TreeResult<bool> {
        Ok(self.len()? == 0)
    }

    fn table(&self, space: SpaceId) -> TreeResult<Arc<Mutex<SpaceTable>>> {
        if let Some(table) = self.spaces.read().map_err(poisoned)?.get(&space) {
            return Ok(Arc::clone(table));
        }
        let mut spaces = self.spaces.write().map_err(poisoned)?;
        Ok(Arc::clone(spaces.entry(space).or_default()))
    }

    fn read<T>(&self, space: SpaceId, f: impl FnOnce(&SpaceTable) -> TreeResult<T>) -> TreeResult<T> {
        let table = self.table(space)?;
        let guard = table.lock().map_err(poisoned)?;
        f(&guard)
    }
}

impl RecordStore for MemoryStore {
    fn insert(&self, block: NewBlock) -> TreeResult<BlockId> {
        let table = self.table(block.space)?;
        let mut registry = self.registry.lock().map_err(poisoned)?;
        if registry.hashes.contains(&block.hash) {
            return Err(TreeError::DuplicateHash(block.hash));
        }
        let mut rows = table.lock().map_err(poisoned)?;

        let id = registry.next_id;
        registry.next_id += 1;
        registry.hashes.insert(block.hash.clone());
        rows.insert_row(Block {
            id,
            hash: block.hash,
            parent_hash: block.parent_hash,
            space: block.space,
            position: None,
        });
        Ok(id)
    }

    fn fetch_unindexed(&self, space: SpaceId) -> TreeResult<Vec<Block>> {
        self.read(space, |t| {
            Ok(t.rows.values().filter(|b| !b.is_indexed()).cloned().collect())
        })
    }

    fn fetch_indexed(&self, space: SpaceId) -> TreeResult<Vec<Block>> {
        self.read(space, |t| {
            let mut rows: Vec<Block> = t.rows.values().filter(|b| b.is_indexed()).cloned().collect();
            rows.sort_by_key(|b| b.position.map(|p| (p.depth, p.left)));
            Ok(rows)
        })
    }

    fn fetch_indexed_by_hash(&self, space: SpaceId, hash: &BlockHash) -> TreeResult<Option<Block>> {
        self.read(space, |t| Ok(t.indexed_by_hash(hash).cloned()))
    }

    fn fetch_root(&self, space: SpaceId) -> TreeResult<Option<Block>> {
        self.read(space, |t| Ok(t.root(space)?.cloned()))
    }

    fn spaces(&self) -> TreeResult<Vec<SpaceId>> {
        let spaces = self.spaces.read().map_err(poisoned)?;
        let mut out = Vec::with_capacity(spaces.len());
        for (&space, table) in spaces.iter() {
            if !table.lock().map_err(poisoned)?.rows.is_empty() {
                out.push(space);
            }
        }
        Ok(out)
    }

    fn unit<T, F>(&self, spaces: &[SpaceId], work: F) -> TreeResult<T>
    where
        F: FnOnce(&mut dyn StoreUnit) -> TreeResult<T>,
    {
        // Ascending lock order keeps multi-space units deadlock free.
        let mut scope = spaces.to_vec();
        scope.sort_unstable();
        scope.dedup();

        let tables = scope
            .iter()
            .map(|&space| Ok((space, self.table(space)?)))
            .collect::<TreeResult<Vec<_>>>()?;
        let mut guards: Vec<(SpaceId, MutexGuard<'_, SpaceTable>)> = Vec::with_capacity(tables.len());
        for (space, table) in &tables {
            guards.push((*space, table.lock().map_err(poisoned)?));
        }

        let mut unit = MemoryUnit {
            tables: guards
                .iter_mut()
                .map(|(space, guard)| (*space, &mut **guard))
                .collect(),
            undo: Vec::new(),
        };
        match work(&mut unit) {
            Ok(out) => Ok(out),
            Err(e) => {
                unit.rollback();
                Err(e)
            }
        }
    }
}

/// Prior state of rows touched by a unit.
enum Undo {
    Position {
        space: SpaceId,
        id: BlockId,
        previous: Option<Position>,
    },
    Relocated {
        from: SpaceId,
        to: SpaceId,
        rows: BTreeMap<BlockId, Block>,
    },
}

fn not_locked(space: SpaceId) -> TreeError {
    TreeError::invariant(format!("space {space} is not locked by this unit"))
}

/// The locked tables of one unit and the log needed to undo its writes.
struct MemoryUnit<'g> {
    tables: BTreeMap<SpaceId, &'g mut SpaceTable>,
    undo: Vec<Undo>,
}

impl MemoryUnit<'_> {
    fn table(&self, space: SpaceId) -> TreeResult<&SpaceTable> {
        self.tables
            .get(&space)
            .map(|t| &**t)
            .ok_or_else(|| not_locked(space))
    }

    /// Apply `adjust` to every position of `space`, logging the rows it
    /// reports as changed.
    fn adjust_positions(
        &mut self,
        space: SpaceId,
        mut adjust: impl FnMut(&mut Position) -> bool,
    ) -> TreeResult<()> {
        let table = self.tables.get_mut(&space).ok_or_else(|| not_locked(space))?;
        for (&id, block) in table.rows.iter_mut() {
            if let Some(p) = block.position.as_mut() {
                let previous = *p;
                if adjust(p) {
                    self.undo.push(Undo::Position {
                        space,
                        id,
                        previous: Some(previous),
                    });
                }
            }
        }
        Ok(())
    }

    fn rollback(&mut self) {
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::Position {
                    space,
                    id,
                    previous,
                } => {
                    if let Some(table) = self.tables.get_mut(&space) {
                        table.set_position(id, previous);
                    }
                }
                Undo::Relocated { from, to, rows } => {
                    if let Some(table) = self.tables.get_mut(&to) {
                        for id in rows.keys() {
                            table.remove_row(*id);
                        }
                    }
                    if let Some(table) = self.tables.get_mut(&from) {
                        for block in rows.into_values() {
                            table.insert_row(block);
                        }
                    }
                }
            }
        }
    }
}

impl StoreUnit for MemoryUnit<'_> {
    fn fetch_block(&mut self, id: BlockId) -> TreeResult<Option<Block>> {
        Ok(self
            .tables
            .values()
            .find_map(|t| t.rows.get(&id))
            .cloned())
    }

    fn fetch_indexed_by_hash(
        &mut self,
        space: SpaceId,
        hash: &BlockHash,
    ) -> TreeResult<Option<Block>> {
        Ok(self.table(space)?.indexed_by_hash(hash).cloned())
    }

    fn fetch_root(&mut self, space: SpaceId) -> TreeResult<Option<Block>> {
        Ok(self.table(space)?.root(space)?.cloned())
    }

    fn has_child_at_depth(
        &mut self,
        space: SpaceId,
        left: u64,
        right: u64,
        depth: u32,
    ) -> TreeResult<bool> {
        let span = Position::new(depth, left, right);
        Ok(self
            .table(space)?
            .rows
            .values()
            .filter_map(|b| b.position)
            .any(|p| p.depth == depth && span.encloses(&p)))
    }

    fn shift_left_bounds(&mut self, space: SpaceId, threshold: u64, delta: u64) -> TreeResult<()> {
        self.adjust_positions(space, |p| {
            let hit = p.left >= threshold;
            if hit {
                p.left += delta;
            }
            hit
        })
    }

    fn shift_right_bounds(&mut self, space: SpaceId, threshold: u64, delta: u64) -> TreeResult<()> {
        self.adjust_positions(space, |p| {
            let hit = p.right >= threshold;
            if hit {
                p.right += delta;
            }
            hit
        })
    }

    fn stretch_enclosing(
        &mut self,
        space: SpaceId,
        bound: u64,
        max_depth: u32,
        delta: u64,
    ) -> TreeResult<()> {
        self.adjust_positions(space, |p| {
            let hit = p.right == bound && p.depth <= max_depth;
            if hit {
                p.right += delta;
            }
            hit
        })
    }

    fn write_indexed(&mut self, space: SpaceId, id: BlockId, position: Position) -> TreeResult<()> {
        let table = self.tables.get_mut(&space).ok_or_else(|| not_locked(space))?;
        let previous = table
            .set_position(id, Some(position))
            .ok_or_else(|| TreeError::BlockNotFound(format!("#{id} in space {space}")))?;
        self.undo.push(Undo::Position {
            space,
            id,
            previous,
        });
        Ok(())
    }

    fn relocate_space(
        &mut self,
        from: SpaceId,
        to: SpaceId,
        depth_delta: u32,
        offset: i64,
    ) -> TreeResult<()> {
        self.table(to)?;
        // Compute every moved row first so an underflow leaves both spaces as
        // they were.
        let mut moved = Vec::new();
        for block in self.table(from)?.rows.values() {
            let mut block = block.clone();
            block.space = to;
            if let Some(p) = block.position.as_mut() {
                p.depth += depth_delta;
                p.left = offset_bound(p.left, offset)?;
                p.right = offset_bound(p.right, offset)?;
            }
            moved.push(block);
        }

        let rows = self
            .tables
            .get_mut(&from)
            .ok_or_else(|| not_locked(from))?
            .take_rows();
        let target = self.tables.get_mut(&to).ok_or_else(|| not_locked(to))?;
        for block in moved {
            target.insert_row(block);
        }
        self.undo.push(Undo::Relocated { from, to, rows });
        Ok(())
    }
}
