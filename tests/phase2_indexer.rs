//! Phase 2 tests: tree indexer (attach, plant, graft, ancestry).

use std::collections::BTreeMap;

use blockspan::engine::TreeIndexer;
use blockspan::store::{MemoryStore, RecordStore};
use blockspan::tree::BlockTree;
use blockspan::types::{Block, BlockHash, NewBlock, Position, SpaceId, TreeError};

// ==================== Helpers ====================

/// Ingest a block and return its unindexed row.
fn ingest<S: RecordStore>(store: &S, block: NewBlock) -> Block {
    let space = block.space;
    let id = store.insert(block).unwrap();
    store
        .fetch_unindexed(space)
        .unwrap()
        .into_iter()
        .find(|b| b.id == id)
        .unwrap()
}

/// Ingest and attach in one go.
fn add<S: RecordStore>(store: &S, hash: &str, parent: Option<&str>, space: SpaceId) -> Position {
    let block = match parent {
        Some(p) => NewBlock::child(hash, p, space),
        None => NewBlock::genesis(hash, space),
    };
    let block = ingest(store, block);
    TreeIndexer::new(store).attach(&block).unwrap().position
}

/// Every indexed position of a space keyed by hash.
fn positions<S: RecordStore>(store: &S, space: SpaceId) -> BTreeMap<String, Position> {
    store
        .fetch_indexed(space)
        .unwrap()
        .into_iter()
        .map(|b| (b.hash.to_string(), b.position.unwrap()))
        .collect()
}

fn pos(depth: u32, left: u64, right: u64) -> Position {
    Position::new(depth, left, right)
}

// ==================== Attach Tests ====================

#[test]
fn test_attach_genesis_plants_root() {
    let store = MemoryStore::new();
    let block = ingest(&store, NewBlock::genesis("R", 0));
    let attachment = TreeIndexer::new(&store).attach(&block).unwrap();

    assert_eq!(attachment.block_id, block.id);
    assert_eq!(attachment.position, Position::root());
    assert!(!attachment.renumbered);
    assert_eq!(store.fetch_root(0).unwrap().unwrap().hash, BlockHash::from("R"));
}

#[test]
fn test_attach_root_then_two_children() {
    let store = MemoryStore::new();
    add(&store, "R", None, 0);

    assert_eq!(add(&store, "A", Some("R"), 0), pos(1, 0, 0));
    assert_eq!(positions(&store, 0)["R"], pos(0, 0, 0));

    assert_eq!(add(&store, "B", Some("R"), 0), pos(1, 1, 1));
    let all = positions(&store, 0);
    assert_eq!(all["R"], pos(0, 0, 1));
    assert_eq!(all["A"], pos(1, 0, 0));
    assert_eq!(all["B"], pos(1, 1, 1));
}

#[test]
fn test_attach_leaf_parent_touches_nothing_else() {
    let store = MemoryStore::new();
    add(&store, "R", None, 0);
    add(&store, "A", Some("R"), 0);
    add(&store, "B", Some("R"), 0);
    let before = positions(&store, 0);

    let block = ingest(&store, NewBlock::child("C", "B", 0));
    let attachment = TreeIndexer::new(&store).attach(&block).unwrap();

    assert!(!attachment.renumbered);
    assert_eq!(attachment.position, pos(2, 1, 1));
    let mut after = positions(&store, 0);
    after.remove("C");
    assert_eq!(before, after);
}

#[test]
fn test_attach_branching_shifts_exactly_the_right_rows() {
    let store = MemoryStore::new();
    add(&store, "R", None, 0);
    add(&store, "A", Some("R"), 0);
    add(&store, "C", Some("A"), 0);
    add(&store, "B", Some("R"), 0);
    let before = positions(&store, 0);
    assert_eq!(before["R"], pos(0, 0, 1));
    assert_eq!(before["A"], pos(1, 0, 0));
    assert_eq!(before["C"], pos(2, 0, 0));
    assert_eq!(before["B"], pos(1, 1, 1));

    // A already has a child, so D opens a new slot right after it.
    let block = ingest(&store, NewBlock::child("D", "A", 0));
    let attachment = TreeIndexer::new(&store).attach(&block).unwrap();
    assert!(attachment.renumbered);
    assert_eq!(attachment.position, pos(2, 1, 1));

    let after = positions(&store, 0);
    assert_eq!(after["R"], pos(0, 0, 2));
    assert_eq!(after["A"], pos(1, 0, 1));
    assert_eq!(after["C"], pos(2, 0, 0));
    assert_eq!(after["D"], pos(2, 1, 1));
    assert_eq!(after["B"], pos(1, 2, 2));

    BlockTree::load(&store, 0).unwrap().verify_parentage().unwrap();
}

#[test]
fn test_attach_deep_fork_keeps_descendants_of_parent() {
    let store = MemoryStore::new();
    add(&store, "R", None, 0);
    for (h, p) in [("A", "R"), ("B", "A"), ("C", "B"), ("X", "A")] {
        add(&store, h, Some(p), 0);
    }
    let all = positions(&store, 0);
    // B and C close at A's old bound and must not stretch.
    assert_eq!(all["A"], pos(1, 0, 1));
    assert_eq!(all["B"], pos(2, 0, 0));
    assert_eq!(all["C"], pos(3, 0, 0));
    assert_eq!(all["X"], pos(2, 1, 1));
    assert_eq!(all["R"], pos(0, 0, 1));
}

#[test]
fn test_attach_unknown_parent_leaves_rows_unchanged() {
    let store = MemoryStore::new();
    add(&store, "R", None, 0);
    add(&store, "A", Some("R"), 0);
    let before = positions(&store, 0);

    let orphan = ingest(&store, NewBlock::child("Z", "missing", 0));
    let err = TreeIndexer::new(&store).attach(&orphan).unwrap_err();
    match err {
        TreeError::UnknownParent { hash, parent } => {
            assert_eq!(hash, BlockHash::from("Z"));
            assert_eq!(parent, BlockHash::from("missing"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(positions(&store, 0), before);
    assert_eq!(store.fetch_unindexed(0).unwrap().len(), 1);
}

#[test]
fn test_attach_parent_in_other_space_is_unknown() {
    let store = MemoryStore::new();
    add(&store, "R", None, 0);
    let block = ingest(&store, NewBlock::child("A", "R", 1));
    let err = TreeIndexer::new(&store).attach(&block).unwrap_err();
    assert!(matches!(err, TreeError::UnknownParent { .. }));
}

#[test]
fn test_attach_twice_is_already_indexed() {
    let store = MemoryStore::new();
    let root = ingest(&store, NewBlock::genesis("R", 0));
    let indexer = TreeIndexer::new(&store);
    indexer.attach(&root).unwrap();
    let err = indexer.attach(&root).unwrap_err();
    assert!(matches!(err, TreeError::AlreadyIndexed(id) if id == root.id));
}

#[test]
fn test_attach_missing_block() {
    let store = MemoryStore::new();
    let ghost = Block {
        id: 99,
        hash: "ghost".into(),
        parent_hash: None,
        space: 0,
        position: None,
    };
    let err = TreeIndexer::new(&store).attach(&ghost).unwrap_err();
    assert!(matches!(err, TreeError::BlockNotFound(_)));
}

#[test]
fn test_second_genesis_in_space_rejected() {
    let store = MemoryStore::new();
    add(&store, "R", None, 0);
    let other = ingest(&store, NewBlock::genesis("R2", 0));
    let err = TreeIndexer::new(&store).attach(&other).unwrap_err();
    assert!(matches!(err, TreeError::InvariantViolation(_)));
    assert!(!store.fetch_unindexed(0).unwrap().is_empty());
}

#[test]
fn test_spaces_are_independent() {
    let store = MemoryStore::new();
    add(&store, "R0", None, 0);
    add(&store, "R1", None, 1);
    add(&store, "A0", Some("R0"), 0);
    add(&store, "A1", Some("R1"), 1);
    add(&store, "B1", Some("R1"), 1);

    assert_eq!(positions(&store, 0)["R0"], pos(0, 0, 0));
    assert_eq!(positions(&store, 1)["R1"], pos(0, 0, 1));
    assert_eq!(store.spaces().unwrap(), vec![0, 1]);
}

#[test]
fn test_duplicate_hash_rejected() {
    let store = MemoryStore::new();
    store.insert(NewBlock::genesis("R", 0)).unwrap();
    let err = store.insert(NewBlock::genesis("R", 1)).unwrap_err();
    assert!(matches!(err, TreeError::DuplicateHash(_)));
    assert_eq!(store.len().unwrap(), 1);
}

// ==================== Plant Tests ====================

#[test]
fn test_plant_block_with_parent_as_root() {
    let store = MemoryStore::new();
    let branch = ingest(&store, NewBlock::child("X", "elsewhere", 5));
    let attachment = TreeIndexer::new(&store).plant(&branch).unwrap();
    assert_eq!(attachment.position, Position::root());
    assert_eq!(store.fetch_root(5).unwrap().unwrap().hash, BlockHash::from("X"));
}

#[test]
fn test_plant_into_occupied_space() {
    let store = MemoryStore::new();
    add(&store, "R", None, 0);
    let other = ingest(&store, NewBlock::child("X", "R", 0));
    let err = TreeIndexer::new(&store).plant(&other).unwrap_err();
    assert!(matches!(err, TreeError::InvariantViolation(_)));
}

// ==================== Graft Tests ====================

/// Plant a detached branch X(Y, Z) in `space` whose root extends `parent`.
fn plant_branch(store: &MemoryStore, space: SpaceId, parent: &str) {
    let root = ingest(store, NewBlock::child("X", parent, space));
    TreeIndexer::new(store).plant(&root).unwrap();
    add(store, "Y", Some("X"), space);
    add(store, "Z", Some("X"), space);
}

#[test]
fn test_graft_under_leaf_parent() {
    let store = MemoryStore::new();
    add(&store, "R", None, 0);
    add(&store, "A", Some("R"), 0);
    plant_branch(&store, 1, "A");

    let attachment = TreeIndexer::new(&store).graft(1, 0).unwrap();
    assert_eq!(attachment.position, pos(2, 0, 1));
    assert!(attachment.renumbered);

    let all = positions(&store, 0);
    assert_eq!(all["R"], pos(0, 0, 1));
    assert_eq!(all["A"], pos(1, 0, 1));
    assert_eq!(all["X"], pos(2, 0, 1));
    assert_eq!(all["Y"], pos(3, 0, 0));
    assert_eq!(all["Z"], pos(3, 1, 1));
    assert!(store.fetch_indexed(1).unwrap().is_empty());

    let tree = BlockTree::load(&store, 0).unwrap();
    tree.verify_parentage().unwrap();
    assert!(tree.is_ancestor(&"R".into(), &"Z".into()).unwrap());
}

#[test]
fn test_graft_beside_existing_children() {
    let store = MemoryStore::new();
    add(&store, "R", None, 0);
    add(&store, "A", Some("R"), 0);
    add(&store, "B", Some("A"), 0);
    plant_branch(&store, 3, "R");

    let attachment = TreeIndexer::new(&store).graft(3, 0).unwrap();
    assert_eq!(attachment.position, pos(1, 1, 2));

    let all = positions(&store, 0);
    assert_eq!(all["R"], pos(0, 0, 2));
    assert_eq!(all["A"], pos(1, 0, 0));
    assert_eq!(all["B"], pos(2, 0, 0));
    assert_eq!(all["X"], pos(1, 1, 2));
    assert_eq!(all["Y"], pos(2, 1, 1));
    assert_eq!(all["Z"], pos(2, 2, 2));
    BlockTree::load(&store, 0).unwrap().verify_parentage().unwrap();
}

#[test]
fn test_graft_unknown_parent_changes_nothing() {
    let store = MemoryStore::new();
    add(&store, "R", None, 0);
    plant_branch(&store, 1, "nowhere");
    let target_before = positions(&store, 0);
    let branch_before = positions(&store, 1);

    let err = TreeIndexer::new(&store).graft(1, 0).unwrap_err();
    assert!(matches!(err, TreeError::UnknownParent { .. }));
    assert_eq!(positions(&store, 0), target_before);
    assert_eq!(positions(&store, 1), branch_before);
}

#[test]
fn test_graft_onto_itself_rejected() {
    let store = MemoryStore::new();
    add(&store, "R", None, 0);
    let err = TreeIndexer::new(&store).graft(0, 0).unwrap_err();
    assert!(matches!(err, TreeError::InvariantViolation(_)));
}

#[test]
fn test_graft_genesis_root_rejected() {
    let store = MemoryStore::new();
    add(&store, "R", None, 0);
    add(&store, "S", None, 1);
    let err = TreeIndexer::new(&store).graft(1, 0).unwrap_err();
    assert!(matches!(err, TreeError::InvariantViolation(_)));
}

// ==================== Ancestry Tests ====================

#[test]
fn test_is_ancestor_from_positions() {
    let store = MemoryStore::new();
    add(&store, "R", None, 0);
    add(&store, "A", Some("R"), 0);
    add(&store, "B", Some("R"), 0);
    add(&store, "C", Some("A"), 0);
    let indexer = TreeIndexer::new(&store);

    assert!(indexer.is_ancestor(0, &"R".into(), &"C".into()).unwrap());
    assert!(indexer.is_ancestor(0, &"A".into(), &"C".into()).unwrap());
    assert!(!indexer.is_ancestor(0, &"B".into(), &"C".into()).unwrap());
    assert!(!indexer.is_ancestor(0, &"C".into(), &"A".into()).unwrap());
    assert!(!indexer.is_ancestor(0, &"A".into(), &"A".into()).unwrap());
}

#[test]
fn test_is_ancestor_unknown_hash() {
    let store = MemoryStore::new();
    add(&store, "R", None, 0);
    let err = TreeIndexer::new(&store)
        .is_ancestor(0, &"R".into(), &"nope".into())
        .unwrap_err();
    assert!(matches!(err, TreeError::BlockNotFound(_)));
}
