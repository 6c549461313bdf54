//! Phase 1 tests: block types, positions, errors and configuration.

use std::path::{Path, PathBuf};

use blockspan::config::{parse_config, resolve_db_path, Config, LogLevel, DEFAULT_DB_FILE};
use blockspan::engine::OrganizerParams;
use blockspan::types::{
    Block, BlockHash, NewBlock, Position, TreeError, DEFAULT_INDENT, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_ORPHAN_POOL_SIZE, DEFAULT_SPACE,
};

// ==================== Position Tests ====================

#[test]
fn test_position_root() {
    let root = Position::root();
    assert_eq!(root, Position::new(0, 0, 0));
    assert_eq!(root.width(), 1);
}

#[test]
fn test_position_ancestry_requires_depth() {
    let r = Position::new(0, 0, 1);
    let a = Position::new(1, 0, 0);
    let b = Position::new(1, 1, 1);

    assert!(r.is_ancestor_of(&a));
    assert!(r.is_ancestor_of(&b));
    assert!(!a.is_ancestor_of(&b));
    assert!(!b.is_ancestor_of(&a));
    // Same interval, same depth: not an ancestor of itself.
    assert!(!r.is_ancestor_of(&r));
}

#[test]
fn test_position_shared_slot() {
    // A first child shares its parent's slot; depth tells them apart.
    let parent = Position::new(2, 5, 5);
    let child = Position::new(3, 5, 5);
    assert!(parent.is_ancestor_of(&child));
    assert!(parent.is_parent_of(&child));
    assert!(!child.is_ancestor_of(&parent));
}

#[test]
fn test_position_parent_is_one_level() {
    let root = Position::new(0, 0, 4);
    let grandchild = Position::new(2, 1, 1);
    assert!(root.is_ancestor_of(&grandchild));
    assert!(!root.is_parent_of(&grandchild));
}

#[test]
fn test_position_overlaps() {
    let a = Position::new(1, 0, 2);
    assert!(a.overlaps(&Position::new(1, 2, 3)));
    assert!(!a.overlaps(&Position::new(1, 3, 4)));
    assert!(a.encloses(&Position::new(4, 1, 2)));
    assert!(!a.encloses(&Position::new(4, 1, 3)));
}

#[test]
fn test_position_display() {
    assert_eq!(Position::new(2, 3, 7).to_string(), "depth=2 [3, 7]");
    assert_eq!(Position::new(2, 3, 7).width(), 5);
}

// ==================== Block Tests ====================

#[test]
fn test_block_hash_conversions() {
    let a = BlockHash::from("abc");
    let b = BlockHash::new(String::from("abc"));
    assert_eq!(a, b);
    assert_eq!(a.as_str(), "abc");
    assert_eq!(a.to_string(), "abc");
}

#[test]
fn test_new_block_constructors() {
    let g = NewBlock::genesis("g", 3);
    assert_eq!(g.parent_hash, None);
    assert_eq!(g.space, 3);

    let c = NewBlock::child("c", "g", 3);
    assert_eq!(c.parent_hash, Some(BlockHash::from("g")));
}

#[test]
fn test_new_block_json_defaults() {
    let blocks: Vec<NewBlock> = serde_json::from_str(
        r#"[{"hash": "g"}, {"hash": "a", "parent_hash": "g", "space": 2}]"#,
    )
    .unwrap();
    assert_eq!(blocks[0].space, DEFAULT_SPACE);
    assert_eq!(blocks[0].parent_hash, None);
    assert_eq!(blocks[1].parent_hash, Some(BlockHash::from("g")));
    assert_eq!(blocks[1].space, 2);
}

#[test]
fn test_block_indexed_position() {
    let mut block = Block {
        id: 7,
        hash: "x".into(),
        parent_hash: None,
        space: 0,
        position: None,
    };
    assert!(!block.is_indexed());
    assert!(matches!(
        block.indexed_position(),
        Err(TreeError::InvariantViolation(_))
    ));

    block.position = Some(Position::root());
    assert!(block.is_indexed());
    assert_eq!(block.indexed_position().unwrap(), Position::root());
}

#[test]
fn test_block_serializes_hash_as_string() {
    let block = Block {
        id: 1,
        hash: "h1".into(),
        parent_hash: Some("h0".into()),
        space: 0,
        position: Some(Position::new(1, 0, 0)),
    };
    let value = serde_json::to_value(&block).unwrap();
    assert_eq!(value["hash"], "h1");
    assert_eq!(value["parent_hash"], "h0");
    assert_eq!(value["position"]["depth"], 1);
}

// ==================== Error Tests ====================

#[test]
fn test_error_retryable() {
    let unknown = TreeError::UnknownParent {
        hash: "b".into(),
        parent: "a".into(),
    };
    assert!(unknown.is_retryable());
    assert!(TreeError::StoreUnavailable("busy".into()).is_retryable());
    assert!(!TreeError::AlreadyIndexed(1).is_retryable());
    assert!(!TreeError::InvariantViolation("x".into()).is_retryable());
}

#[test]
fn test_error_messages() {
    let unknown = TreeError::UnknownParent {
        hash: "b".into(),
        parent: "a".into(),
    };
    assert_eq!(unknown.to_string(), "Parent a of block b is not indexed");
    assert_eq!(
        TreeError::AlreadyIndexed(4).to_string(),
        "Block 4 is already indexed"
    );
    assert_eq!(
        TreeError::DuplicateHash("h".into()).to_string(),
        "Duplicate block hash: h"
    );
}

// ==================== Config Tests ====================

#[test]
fn test_config_defaults() {
    let config = Config::default();
    assert_eq!(config.store.path, None);
    assert_eq!(config.organizer.max_attempts, DEFAULT_MAX_ATTEMPTS);
    assert_eq!(config.organizer.orphan_pool_size, DEFAULT_ORPHAN_POOL_SIZE);
    assert_eq!(config.organizer.main_space, DEFAULT_SPACE);
    assert_eq!(config.render.indent, DEFAULT_INDENT);
    assert_eq!(config.log_level, LogLevel::Warn);
}

#[test]
fn test_parse_config_partial() {
    let config = parse_config(
        r#"
        log_level = "debug"

        [organizer]
        max_attempts = 5
        "#,
    )
    .unwrap();
    assert_eq!(config.log_level, LogLevel::Debug);
    assert_eq!(config.organizer.max_attempts, 5);
    assert_eq!(config.organizer.orphan_pool_size, DEFAULT_ORPHAN_POOL_SIZE);
    assert_eq!(config.render.indent, DEFAULT_INDENT);
}

#[test]
fn test_parse_config_full() {
    let config = parse_config(
        r#"
        [store]
        path = "/var/lib/bspan/tree.db"

        [organizer]
        max_attempts = 2
        orphan_pool_size = 16
        main_space = 7

        [render]
        indent = 4
        "#,
    )
    .unwrap();
    assert_eq!(
        config.store.path.as_deref(),
        Some(Path::new("/var/lib/bspan/tree.db"))
    );
    assert_eq!(config.organizer.orphan_pool_size, 16);
    assert_eq!(config.render.indent, 4);

    let params = OrganizerParams::from(config.organizer);
    assert_eq!(params.max_attempts, 2);
    assert_eq!(params.orphan_pool_size, 16);
    assert_eq!(params.main_space, 7);
}

#[test]
fn test_parse_config_rejects_bad_level() {
    let err = parse_config(r#"log_level = "loud""#).unwrap_err();
    assert!(matches!(err, TreeError::Config(_)));
}

#[test]
fn test_organizer_params_floor_attempts() {
    let config = parse_config("[organizer]\nmax_attempts = 0\n").unwrap();
    assert_eq!(OrganizerParams::from(config.organizer).max_attempts, 1);
}

#[test]
fn test_log_level_filter() {
    assert_eq!(log::LevelFilter::from(LogLevel::Trace), log::LevelFilter::Trace);
    assert_eq!(log::LevelFilter::from(LogLevel::Error), log::LevelFilter::Error);
}

#[test]
fn test_resolve_db_path_priority() {
    let mut config = Config::default();
    config.store.path = Some(PathBuf::from("from-config.db"));

    // The explicit path always wins, whatever the environment says.
    let explicit = resolve_db_path(Some(Path::new("cli.db")), &config);
    assert_eq!(explicit, PathBuf::from("cli.db"));

    if std::env::var_os("BSPAN_DB").is_none() {
        assert_eq!(
            resolve_db_path(None, &config),
            PathBuf::from("from-config.db")
        );
        assert_eq!(
            resolve_db_path(None, &Config::default()),
            PathBuf::from(DEFAULT_DB_FILE)
        );
    }
}
