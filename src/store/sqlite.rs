//! SQLite-backed record store.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::types::{
    Block, BlockHash, BlockId, NewBlock, Position, SpaceId, TreeError, TreeResult,
};

use super::{RecordStore, StoreUnit};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS blocks (
        block_id INTEGER PRIMARY KEY AUTOINCREMENT,
        block_hash TEXT NOT NULL UNIQUE,
        prev_block_hash TEXT,
        space INTEGER NOT NULL,
        depth INTEGER,
        span_left INTEGER,
        span_right INTEGER
    );

    CREATE INDEX IF NOT EXISTS blocks_space_span ON blocks (space, span_left, span_right);
    CREATE INDEX IF NOT EXISTS blocks_space_depth ON blocks (space, depth);
"#;

const BLOCK_COLUMNS: &str =
    "block_id, block_hash, prev_block_hash, space, depth, span_left, span_right";

/// Record store persisting blocks in a single SQLite table.
///
/// Units of work run as `IMMEDIATE` transactions on one connection, so all
/// writers are serialized; dropping an uncommitted transaction rolls it back.
#[derive(Debug)]
pub struct SqliteStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> TreeResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self {
            path: Some(path),
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> TreeResult<Self> {
        let store = Self {
            path: None,
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Database file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn migrate(&self) -> TreeResult<()> {
        self.lock()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn lock(&self) -> TreeResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TreeError::StoreUnavailable("sqlite connection lock poisoned".to_string()))
    }
}

fn block_from_row(row: &Row<'_>) -> rusqlite::Result<Block> {
    let depth: Option<i64> = row.get(4)?;
    let left: Option<i64> = row.get(5)?;
    let right: Option<i64> = row.get(6)?;
    let position = match (depth, left, right) {
        (Some(depth), Some(left), Some(right)) => Some(Position {
            depth: depth as u32,
            left: left as u64,
            right: right as u64,
        }),
        _ => None,
    };
    Ok(Block {
        id: row.get::<_, i64>(0)? as BlockId,
        hash: BlockHash::new(row.get::<_, String>(1)?),
        parent_hash: row.get::<_, Option<String>>(2)?.map(BlockHash::new),
        space: row.get::<_, i64>(3)? as SpaceId,
        position,
    })
}

fn query_blocks(conn: &Connection, sql: &str, args: impl rusqlite::Params) -> TreeResult<Vec<Block>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(args, block_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn indexed_by_hash(conn: &Connection, space: SpaceId, hash: &BlockHash) -> TreeResult<Option<Block>> {
    let sql = format!(
        "SELECT {BLOCK_COLUMNS} FROM blocks WHERE space = ?1 AND block_hash = ?2 AND depth IS NOT NULL"
    );
    Ok(conn
        .query_row(&sql, params![space, hash.as_str()], block_from_row)
        .optional()?)
}

fn root_of(conn: &Connection, space: SpaceId) -> TreeResult<Option<Block>> {
    let sql = format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE space = ?1 AND depth = 0");
    let mut roots = query_blocks(conn, &sql, params![space])?;
    if roots.len() > 1 {
        return Err(TreeError::invariant(format!(
            "space {space} has {} roots",
            roots.len()
        )));
    }
    Ok(roots.pop())
}

impl RecordStore for SqliteStore {
    fn insert(&self, block: NewBlock) -> TreeResult<BlockId> {
        let conn = self.lock()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM blocks WHERE block_hash = ?1)",
            params![block.hash.as_str()],
            |row| row.get(0),
        )?;
        if exists {
            return Err(TreeError::DuplicateHash(block.hash));
        }
        conn.execute(
            "INSERT INTO blocks (block_hash, prev_block_hash, space) VALUES (?1, ?2, ?3)",
            params![
                block.hash.as_str(),
                block.parent_hash.as_ref().map(BlockHash::as_str),
                block.space
            ],
        )?;
        Ok(conn.last_insert_rowid() as BlockId)
    }

    fn fetch_unindexed(&self, space: SpaceId) -> TreeResult<Vec<Block>> {
        let sql = format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks WHERE space = ?1 AND depth IS NULL ORDER BY block_id"
        );
        let conn = self.lock()?;
        query_blocks(&conn, &sql, params![space])
    }

    fn fetch_indexed(&self, space: SpaceId) -> TreeResult<Vec<Block>> {
        let sql = format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks WHERE space = ?1 AND depth IS NOT NULL \
             ORDER BY depth, span_left"
        );
        let conn = self.lock()?;
        query_blocks(&conn, &sql, params![space])
    }

    fn fetch_indexed_by_hash(&self, space: SpaceId, hash: &BlockHash) -> TreeResult<Option<Block>> {
        let conn = self.lock()?;
        indexed_by_hash(&conn, space, hash)
    }

    fn fetch_root(&self, space: SpaceId) -> TreeResult<Option<Block>> {
        let conn = self.lock()?;
        root_of(&conn, space)
    }

    fn spaces(&self) -> TreeResult<Vec<SpaceId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT DISTINCT space FROM blocks ORDER BY space")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        Ok(rows
            .map(|r| r.map(|s| s as SpaceId))
            .collect::<Result<Vec<_>, _>>()?)
    }

    fn unit<T, F>(&self, spaces: &[SpaceId], work: F) -> TreeResult<T>
    where
        F: FnOnce(&mut dyn StoreUnit) -> TreeResult<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = {
            let mut unit = SqliteUnit {
                conn: &tx,
                scope: spaces,
            };
            work(&mut unit)?
        };
        tx.commit()?;
        Ok(out)
    }
}

/// Statements issued inside one open transaction.
struct SqliteUnit<'a> {
    conn: &'a Connection,
    scope: &'a [SpaceId],
}

impl SqliteUnit<'_> {
    fn check_scope(&self, space: SpaceId) -> TreeResult<()> {
        if self.scope.contains(&space) {
            Ok(())
        } else {
            Err(TreeError::invariant(format!(
                "space {space} is not locked by this unit"
            )))
        }
    }
}

impl StoreUnit for SqliteUnit<'_> {
    fn fetch_block(&mut self, id: BlockId) -> TreeResult<Option<Block>> {
        let sql = format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE block_id = ?1");
        let block = self
            .conn
            .query_row(&sql, params![id as i64], block_from_row)
            .optional()?;
        // Rows outside the unit's spaces are invisible to it.
        Ok(block.filter(|b| self.scope.contains(&b.space)))
    }

    fn fetch_indexed_by_hash(
        &mut self,
        space: SpaceId,
        hash: &BlockHash,
    ) -> TreeResult<Option<Block>> {
        self.check_scope(space)?;
        indexed_by_hash(self.conn, space, hash)
    }

    fn fetch_root(&mut self, space: SpaceId) -> TreeResult<Option<Block>> {
        self.check_scope(space)?;
        root_of(self.conn, space)
    }

    fn has_child_at_depth(
        &mut self,
        space: SpaceId,
        left: u64,
        right: u64,
        depth: u32,
    ) -> TreeResult<bool> {
        self.check_scope(space)?;
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM blocks \
             WHERE space = ?1 AND depth = ?2 AND span_left >= ?3 AND span_right <= ?4)",
            params![space, depth, left as i64, right as i64],
            |row| row.get(0),
        )?)
    }

    fn shift_left_bounds(&mut self, space: SpaceId, threshold: u64, delta: u64) -> TreeResult<()> {
        self.check_scope(space)?;
        self.conn.execute(
            "UPDATE blocks SET span_left = span_left + ?3 WHERE space = ?1 AND span_left >= ?2",
            params![space, threshold as i64, delta as i64],
        )?;
        Ok(())
    }

    fn shift_right_bounds(&mut self, space: SpaceId, threshold: u64, delta: u64) -> TreeResult<()> {
        self.check_scope(space)?;
        self.conn.execute(
            "UPDATE blocks SET span_right = span_right + ?3 WHERE space = ?1 AND span_right >= ?2",
            params![space, threshold as i64, delta as i64],
        )?;
        Ok(())
    }

    fn stretch_enclosing(
        &mut self,
        space: SpaceId,
        bound: u64,
        max_depth: u32,
        delta: u64,
    ) -> TreeResult<()> {
        self.check_scope(space)?;
        self.conn.execute(
            "UPDATE blocks SET span_right = span_right + ?4 \
             WHERE space = ?1 AND span_right = ?2 AND depth <= ?3",
            params![space, bound as i64, max_depth, delta as i64],
        )?;
        Ok(())
    }

    fn write_indexed(&mut self, space: SpaceId, id: BlockId, position: Position) -> TreeResult<()> {
        self.check_scope(space)?;
        let changed = self.conn.execute(
            "UPDATE blocks SET depth = ?3, span_left = ?4, span_right = ?5 \
             WHERE space = ?1 AND block_id = ?2",
            params![
                space,
                id as i64,
                position.depth,
                position.left as i64,
                position.right as i64
            ],
        )?;
        if changed == 0 {
            return Err(TreeError::BlockNotFound(format!("#{id} in space {space}")));
        }
        Ok(())
    }

    fn relocate_space(
        &mut self,
        from: SpaceId,
        to: SpaceId,
        depth_delta: u32,
        offset: i64,
    ) -> TreeResult<()> {
        self.check_scope(from)?;
        self.check_scope(to)?;
        let underflow: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM blocks WHERE space = ?1 AND span_left + ?2 < 0)",
            params![from, offset],
            |row| row.get(0),
        )?;
        if underflow {
            return Err(TreeError::invariant(format!(
                "relocating space {from} by {offset} underflows"
            )));
        }
        self.conn.execute(
            "UPDATE blocks SET space = ?2, depth = depth + ?3, \
             span_left = span_left + ?4, span_right = span_right + ?4 \
             WHERE space = ?1",
            params![from, to, depth_delta, offset],
        )?;
        Ok(())
    }
}
