//! Configuration loading from file, environment, and CLI arguments.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::OrganizerParams;
use crate::types::{
    SpaceId, TreeError, TreeResult, DEFAULT_INDENT, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_ORPHAN_POOL_SIZE, DEFAULT_SPACE,
};

/// Environment variable naming the database file.
pub const DB_ENV_VAR: &str = "BSPAN_DB";

/// Database file used when nothing else names one.
pub const DEFAULT_DB_FILE: &str = "blockspan.db";

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub organizer: OrganizerConfig,
    pub render: RenderConfig,
    /// Log level for the `bspan` binary ("error", "warn", "info", "debug", "trace").
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizerConfig {
    /// Unknown-parent failures before a block becomes an orphan.
    pub max_attempts: u32,
    /// Pending blocks kept per space.
    pub orphan_pool_size: usize,
    /// Space that detached branches are joined into.
    pub main_space: SpaceId,
}

impl Default for OrganizerConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            orphan_pool_size: DEFAULT_ORPHAN_POOL_SIZE,
            main_space: DEFAULT_SPACE,
        }
    }
}

impl From<OrganizerConfig> for OrganizerParams {
    fn from(cfg: OrganizerConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            orphan_pool_size: cfg.orphan_pool_size,
            main_space: cfg.main_space,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Spaces per depth level.
    pub indent: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            indent: DEFAULT_INDENT,
        }
    }
}

/// Log verbosity accepted in config files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> TreeResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        TreeError::Config(format!("failed to read config file {}: {e}", path.display()))
    })?;
    parse_config(&content)
}

/// Parse configuration from TOML text.
pub fn parse_config(content: &str) -> TreeResult<Config> {
    toml::from_str(content).map_err(|e| TreeError::Config(format!("failed to parse config: {e}")))
}

/// Resolve the database path using priority order:
/// 1. Explicit path (CLI arg)
/// 2. `BSPAN_DB` environment variable
/// 3. `store.path` from the config file
/// 4. `blockspan.db` in the current directory
pub fn resolve_db_path(explicit: Option<&Path>, config: &Config) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(env_path) = std::env::var(DB_ENV_VAR) {
        if !env_path.is_empty() {
            return PathBuf::from(env_path);
        }
    }
    if let Some(path) = &config.store.path {
        return path.clone();
    }
    PathBuf::from(DEFAULT_DB_FILE)
}
