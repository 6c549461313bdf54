//! CLI entry point for the `bspan` command-line tool.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use blockspan::cli::commands;
use blockspan::config::{self, Config};
use blockspan::engine::OrganizerParams;
use blockspan::types::{SpaceId, TreeError, DEFAULT_SPACE};

#[derive(Parser)]
#[command(
    name = "bspan",
    about = "bspan: nested-set block tree index over SQLite"
)]
struct Cli {
    /// Database file (overrides BSPAN_DB and the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format: "text" (default) or "json"
    #[arg(long, global = true, default_value = "text")]
    format: String,

    /// Enable debug logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and schema
    Init,
    /// Ingest one unindexed block
    Add {
        /// Block hash
        hash: String,
        /// Hash of the block it extends (omit for genesis)
        #[arg(long)]
        parent: Option<String>,
        /// Space (tree partition)
        #[arg(long, default_value_t = DEFAULT_SPACE)]
        space: SpaceId,
    },
    /// Ingest blocks from a JSON array
    Import {
        /// Path to the JSON file
        json_file: PathBuf,
    },
    /// Attach pending blocks to their trees
    Organize {
        /// Only this space (default: every space)
        #[arg(long)]
        space: Option<SpaceId>,
        /// Unknown-parent attempts before a block is an orphan
        #[arg(long)]
        max_attempts: Option<u32>,
        /// Parent hashes that will never arrive
        #[arg(long)]
        abandon: Vec<String>,
    },
    /// Graft detached branch spaces into a target space
    Join {
        /// Space receiving the branches
        target: SpaceId,
    },
    /// Print the indented tree
    Render {
        /// Only this space (default: every space)
        #[arg(long)]
        space: Option<SpaceId>,
        /// Spaces per depth level
        #[arg(long)]
        indent: Option<usize>,
    },
    /// Check intervals against recorded parents
    Verify {
        /// Only this space (default: every space)
        #[arg(long)]
        space: Option<SpaceId>,
    },
    /// Test whether one block is an ancestor of another
    Ancestor {
        /// Candidate ancestor hash
        ancestor: String,
        /// Candidate descendant hash
        descendant: String,
        #[arg(long, default_value_t = DEFAULT_SPACE)]
        space: SpaceId,
    },
    /// List the tips of the longest chains
    Deepest {
        #[arg(long, default_value_t = DEFAULT_SPACE)]
        space: SpaceId,
    },
    /// List blocks from the root to a block
    Chain {
        /// Block hash
        hash: String,
        #[arg(long, default_value_t = DEFAULT_SPACE)]
        space: SpaceId,
    },
    /// Shape statistics
    Stats {
        /// Only this space (default: every space)
        #[arg(long)]
        space: Option<SpaceId>,
    },
    /// Export all rows as JSON
    Export {
        /// Only this space (default: every space)
        #[arg(long)]
        space: Option<SpaceId>,
        /// Pretty-print JSON
        #[arg(long)]
        pretty: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let json = cli.format == "json";

    let config = match &cli.config {
        Some(path) => config::load_config(path),
        None => Ok(Config::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(5);
        }
    };

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        config.log_level.into()
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let db = config::resolve_db_path(cli.db.as_deref(), &config);

    let result = match cli.command {
        Commands::Init => commands::cmd_init(&db),
        Commands::Add {
            hash,
            parent,
            space,
        } => commands::cmd_add(&db, &hash, parent.as_deref(), space, json),
        Commands::Import { json_file } => commands::cmd_import(&db, &json_file, json),
        Commands::Organize {
            space,
            max_attempts,
            abandon,
        } => {
            let mut params = OrganizerParams::from(config.organizer);
            if let Some(max) = max_attempts {
                params.max_attempts = max.max(1);
            }
            commands::cmd_organize(&db, space, params, &abandon, json)
        }
        Commands::Join { target } => commands::cmd_join(&db, target, json),
        Commands::Render { space, indent } => {
            commands::cmd_render(&db, space, indent.unwrap_or(config.render.indent), json)
        }
        Commands::Verify { space } => commands::cmd_verify(&db, space, json),
        Commands::Ancestor {
            ancestor,
            descendant,
            space,
        } => commands::cmd_ancestor(&db, space, &ancestor, &descendant, json),
        Commands::Deepest { space } => commands::cmd_deepest(&db, space, json),
        Commands::Chain { hash, space } => commands::cmd_chain(&db, space, &hash, json),
        Commands::Stats { space } => commands::cmd_stats(&db, space, json),
        Commands::Export { space, pretty } => commands::cmd_export(&db, space, pretty),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        let code = match &e {
            TreeError::Io(_) | TreeError::Sql(_) | TreeError::StoreUnavailable(_) => 1,
            TreeError::InvariantViolation(_) => 2,
            TreeError::AlreadyIndexed(_) => 3,
            TreeError::BlockNotFound(_) | TreeError::UnknownParent { .. } => 4,
            _ => 5,
        };
        process::exit(code);
    }
}
