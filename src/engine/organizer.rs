//! Organizer: drives `attach` over pending blocks and keeps retry bookkeeping.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use log::{debug, info, warn};

use crate::store::RecordStore;
use crate::types::{
    Block, BlockHash, BlockId, SpaceId, TreeError, TreeResult, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_ORPHAN_POOL_SIZE, DEFAULT_SPACE,
};

use super::indexer::{Attachment, TreeIndexer};

/// Outcome of one organizing pass over a space.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OrganizeReport {
    /// Blocks that received a position, in attach order.
    pub attached: Vec<BlockId>,
    /// Blocks left pending for a later pass.
    pub deferred: Vec<BlockId>,
    /// Blocks newly classified as permanent orphans.
    pub orphaned: Vec<BlockId>,
    /// Branch spaces grafted into the main space.
    pub joined: Vec<SpaceId>,
}

impl OrganizeReport {
    fn merge(&mut self, other: OrganizeReport) {
        self.attached.extend(other.attached);
        self.deferred.extend(other.deferred);
        self.orphaned.extend(other.orphaned);
        self.joined.extend(other.joined);
    }

    /// Whether the pass changed nothing.
    pub fn is_idle(&self) -> bool {
        self.attached.is_empty() && self.orphaned.is_empty() && self.joined.is_empty()
    }
}

/// Retry policy for blocks whose parent is not indexed yet.
#[derive(Debug, Clone, Copy)]
pub struct OrganizerParams {
    /// Unknown-parent failures before a block becomes an orphan.
    pub max_attempts: u32,
    /// Pending blocks kept per space; the oldest beyond this become orphans.
    pub orphan_pool_size: usize,
    /// The space holding the main tree. Every other space is a branch space:
    /// its first block with an unknown parent is planted as a provisional
    /// root, and the branch is grafted here once that parent is indexed.
    pub main_space: SpaceId,
}

impl Default for OrganizerParams {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            orphan_pool_size: DEFAULT_ORPHAN_POOL_SIZE,
            main_space: DEFAULT_SPACE,
        }
    }
}

/// Why a pending block is not tried in this pass.
enum Stall {
    Deferred,
    Orphaned,
}

/// Feeds unindexed blocks to a [`TreeIndexer`] in parent-first order.
///
/// Attempt counts and orphan classifications live in the organizer, so one
/// instance should drive a store across passes.
pub struct Organizer<'s, S: RecordStore> {
    indexer: TreeIndexer<'s, S>,
    params: OrganizerParams,
    attempts: HashMap<BlockId, u32>,
    orphans: BTreeSet<BlockId>,
    abandoned: HashSet<BlockHash>,
}

impl<'s, S: RecordStore> Organizer<'s, S> {
    /// Create an organizer with default retry policy.
    pub fn new(store: &'s S) -> Self {
        Self::with_params(store, OrganizerParams::default())
    }

    /// Create an organizer with an explicit retry policy.
    pub fn with_params(store: &'s S, params: OrganizerParams) -> Self {
        Self {
            indexer: TreeIndexer::new(store),
            params,
            attempts: HashMap::new(),
            orphans: BTreeSet::new(),
            abandoned: HashSet::new(),
        }
    }

    /// The indexer used for attachments.
    pub fn indexer(&self) -> &TreeIndexer<'s, S> {
        &self.indexer
    }

    /// Ids of every block classified as an orphan so far.
    pub fn orphans(&self) -> &BTreeSet<BlockId> {
        &self.orphans
    }

    /// Whether `id` was classified as an orphan.
    pub fn is_orphan(&self, id: BlockId) -> bool {
        self.orphans.contains(&id)
    }

    /// Unknown-parent failures recorded for `id`.
    pub fn attempts(&self, id: BlockId) -> u32 {
        self.attempts.get(&id).copied().unwrap_or(0)
    }

    /// Declare that `hash` will never be indexed. Blocks waiting on it, and
    /// their pending descendants, become orphans on the next pass.
    pub fn abandon(&mut self, hash: impl Into<BlockHash>) {
        self.abandoned.insert(hash.into());
    }

    /// Attach one block as soon as it arrives, with the retry bookkeeping of
    /// a pass.
    ///
    /// A block already classified as an orphan, one whose parent was
    /// abandoned, or one reaching `max_attempts` here yields
    /// [`TreeError::Orphan`]. Other unknown-parent failures come back as is.
    pub fn submit(&mut self, block: &Block) -> TreeResult<Attachment> {
        let abandoned = block
            .parent_hash
            .as_ref()
            .is_some_and(|parent| self.abandoned.contains(parent));
        if abandoned && !self.orphans.contains(&block.id) {
            let mut report = OrganizeReport::default();
            self.classify_orphan(block, &mut report);
        }
        if self.orphans.contains(&block.id) {
            return Err(TreeError::Orphan(block.hash.clone()));
        }
        let attached = match self.indexer.attach(block) {
            Err(e @ TreeError::UnknownParent { .. }) => match self.plant_branch_root(block)? {
                Some(attachment) => Ok(attachment),
                None => Err(e),
            },
            other => other,
        };
        match attached {
            Ok(attachment) => {
                self.attempts.remove(&block.id);
                Ok(attachment)
            }
            Err(e @ TreeError::UnknownParent { .. }) => {
                let attempts = self.attempts.entry(block.id).or_insert(0);
                *attempts += 1;
                if *attempts < self.params.max_attempts {
                    return Err(e);
                }
                let mut report = OrganizeReport::default();
                self.classify_orphan(block, &mut report);
                Err(TreeError::Orphan(block.hash.clone()))
            }
            Err(e) => Err(e),
        }
    }

    /// Run one pass over every space of the store, then graft every branch
    /// whose parent is now indexed into the main space.
    pub fn organize_all(&mut self) -> TreeResult<OrganizeReport> {
        let mut report = OrganizeReport::default();
        for space in self.indexer.store().spaces()? {
            report.merge(self.organize(space)?);
        }
        report.joined = self.join_branches(self.params.main_space)?;
        Ok(report)
    }

    /// Attach every pending block of `space` whose ancestry is indexed.
    pub fn organize(&mut self, space: SpaceId) -> TreeResult<OrganizeReport> {
        let pending: Vec<Block> = self
            .indexer
            .store()
            .fetch_unindexed(space)?
            .into_iter()
            .filter(|b| !self.orphans.contains(&b.id))
            .collect();
        let mut report = OrganizeReport::default();
        if pending.is_empty() {
            return Ok(report);
        }

        // Blocks whose parent is itself pending wait for it; the rest start
        // in the queue.
        let pending_hashes: HashSet<BlockHash> = pending.iter().map(|b| b.hash.clone()).collect();
        let mut waiting: HashMap<BlockHash, Vec<Block>> = HashMap::new();
        let mut queue: VecDeque<Block> = VecDeque::new();
        for block in pending {
            match &block.parent_hash {
                Some(parent) if pending_hashes.contains(parent) => {
                    waiting.entry(parent.clone()).or_default().push(block)
                }
                _ => queue.push_back(block),
            }
        }

        while let Some(block) = queue.pop_front() {
            let abandoned = block
                .parent_hash
                .as_ref()
                .is_some_and(|parent| self.abandoned.contains(parent));
            if abandoned {
                self.stall(block, Stall::Orphaned, &mut waiting, &mut report);
                continue;
            }
            let attached = match self.indexer.attach(&block) {
                Ok(_) => true,
                Err(TreeError::UnknownParent { .. }) => self.plant_branch_root(&block)?.is_some(),
                Err(e) => return Err(e),
            };
            if attached {
                self.attempts.remove(&block.id);
                report.attached.push(block.id);
                if let Some(children) = waiting.remove(&block.hash) {
                    queue.extend(children);
                }
            } else {
                let attempts = self.attempts.entry(block.id).or_insert(0);
                *attempts += 1;
                let stall = if *attempts >= self.params.max_attempts {
                    Stall::Orphaned
                } else {
                    Stall::Deferred
                };
                self.stall(block, stall, &mut waiting, &mut report);
            }
        }

        // Whatever still waits sits on a parent cycle and can never attach.
        let stuck: Vec<Block> = waiting.drain().flat_map(|(_, blocks)| blocks).collect();
        for block in stuck {
            warn!("block {} waits on a parent cycle", block.hash);
            self.classify_orphan(&block, &mut report);
        }

        self.enforce_pool_bound(&mut report);
        report.deferred.sort_unstable();
        info!(
            "space {}: {} attached, {} deferred, {} orphaned",
            space,
            report.attached.len(),
            report.deferred.len(),
            report.orphaned.len()
        );
        Ok(report)
    }

    /// Graft every other space whose root extends a block indexed in `target`.
    ///
    /// Rounds repeat until one joins nothing, so a branch rooted on another
    /// branch follows it in.
    pub fn join_branches(&mut self, target: SpaceId) -> TreeResult<Vec<SpaceId>> {
        let store = self.indexer.store();
        let mut joined = Vec::new();
        loop {
            let mut progressed = false;
            for space in store.spaces()? {
                if space == target {
                    continue;
                }
                let Some(root) = store.fetch_root(space)? else {
                    continue;
                };
                let Some(parent) = root.parent_hash.as_ref() else {
                    continue;
                };
                if store.fetch_indexed_by_hash(target, parent)?.is_none() {
                    continue;
                }
                self.indexer.graft(space, target)?;
                info!("joined branch space {} into space {}", space, target);
                joined.push(space);
                progressed = true;
            }
            if !progressed {
                return Ok(joined);
            }
        }
    }

    /// Plant `block` as the provisional root of its branch space when that
    /// space has none yet. Returns `None` for the main space or a space that
    /// already has a root.
    fn plant_branch_root(&self, block: &Block) -> TreeResult<Option<Attachment>> {
        if block.space == self.params.main_space
            || self.indexer.store().fetch_root(block.space)?.is_some()
        {
            return Ok(None);
        }
        let attachment = self.indexer.plant(block)?;
        info!(
            "planted {} as provisional root of branch space {}",
            block.hash, block.space
        );
        Ok(Some(attachment))
    }

    /// Mark `block` deferred or orphaned, and carry every block waiting on it
    /// along with the same fate.
    fn stall(
        &mut self,
        block: Block,
        stall: Stall,
        waiting: &mut HashMap<BlockHash, Vec<Block>>,
        report: &mut OrganizeReport,
    ) {
        let mut stack = vec![block];
        while let Some(block) = stack.pop() {
            if let Some(children) = waiting.remove(&block.hash) {
                stack.extend(children);
            }
            match stall {
                Stall::Deferred => {
                    debug!("deferring {}: parent not indexed", block.hash);
                    report.deferred.push(block.id);
                }
                Stall::Orphaned => self.classify_orphan(&block, report),
            }
        }
    }

    fn classify_orphan(&mut self, block: &Block, report: &mut OrganizeReport) {
        warn!(
            "block {} classified as orphan after {} attempts",
            block.hash,
            self.attempts(block.id)
        );
        self.attempts.remove(&block.id);
        self.orphans.insert(block.id);
        report.orphaned.push(block.id);
    }

    /// Keep at most `orphan_pool_size` blocks pending; the oldest go first.
    fn enforce_pool_bound(&mut self, report: &mut OrganizeReport) {
        let limit = self.params.orphan_pool_size;
        if report.deferred.len() <= limit {
            return;
        }
        report.deferred.sort_unstable();
        let excess = report.deferred.len() - limit;
        let evicted: Vec<BlockId> = report.deferred.drain(..excess).collect();
        for id in evicted {
            warn!("pending pool full, dropping block #{} as orphan", id);
            self.attempts.remove(&id);
            self.orphans.insert(id);
            report.orphaned.push(id);
        }
    }
}
