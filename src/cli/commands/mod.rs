//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod batches;
mod config_cmd;
mod init;
mod load;
mod locks;
mod pipeline;
mod source;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings, SettingsOptions};

#[derive(Parser)]
#[command(name = "gaz")]
#[command(about = "Staging ingestion and consolidation for a UK property master gazetteer")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory holding the default SQLite database
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Database URL or SQLite path (DATABASE_URL takes precedence)
    #[arg(long, global = true)]
    database: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory, apply migrations and store the registry
    Init,

    /// Apply pending schema migrations
    Migrate {
        /// Only list pending migrations; fail if there are any
        #[arg(long)]
        check: bool,
    },

    /// Inspect and persist the source registry
    Sources {
        #[command(subcommand)]
        command: SourceCommands,
    },

    /// Load a delimited extract into its staging table
    Load {
        /// File to load
        file: PathBuf,
        /// Source name (detected from the file name if omitted)
        #[arg(short, long)]
        source: Option<String>,
        /// Name of the client performing the upload
        #[arg(long)]
        client: String,
        /// Uploading user (default: user@host)
        #[arg(long)]
        upload_user: Option<String>,
        /// Session id grouping several loads (default: random)
        #[arg(long)]
        session_id: Option<String>,
        /// Batch id (default: random)
        #[arg(long)]
        batch_id: Option<String>,
        /// Field delimiter overriding the source's
        #[arg(long)]
        delimiter: Option<char>,
    },

    /// Inspect and purge staging batches
    Batches {
        #[command(subcommand)]
        command: BatchCommands,
    },

    /// Regenerate spatial link tables
    Link {
        /// Link kinds to rebuild (postcode, place_name, map_feature, admin_area); default all
        #[arg(short, long, value_delimiter = ',')]
        kind: Vec<String>,
    },

    /// Consolidate visible staging rows into the master gazetteer
    Merge,

    /// Recompute data-quality scores of active master rows
    Score,

    /// Group duplicate master rows and pick a preferred record per group
    Dedupe,

    /// Link, merge, score and dedupe in one go
    Run,

    /// Show pipeline status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage run locks
    Locks {
        #[command(subcommand)]
        command: LockCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum SourceCommands {
    /// List registry sources and whether the stored copy matches
    List,
    /// Write the registry to the database
    Sync {
        /// Replace stored definitions even if batches reference them
        #[arg(long)]
        update: bool,
    },
}

#[derive(Subcommand)]
enum BatchCommands {
    /// List batches, newest first
    List {
        /// Only batches of this source
        #[arg(short, long)]
        source: Option<String>,
        /// Only batches in this status
        #[arg(long)]
        status: Option<String>,
        /// Maximum number of batches to show
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },
    /// Show one batch with its counters and verification report
    Show {
        batch_id: String,
    },
    /// Delete failed and stale batches together with their staging rows
    Purge {
        /// Specific batches to purge instead of the stale set
        batch_ids: Vec<String>,
        /// Age in hours after which received/loaded batches count as stale
        #[arg(long, default_value = "24")]
        older_than_hours: i64,
        /// Allow purging verified or merged batches named explicitly
        #[arg(long)]
        force: bool,
        /// Only list what would be purged
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum LockCommands {
    /// List held run locks
    List,
    /// Clear a lock left behind by a crashed run
    Release {
        name: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration and its hash
    Show,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = SettingsOptions {
        config_path: cli.config,
        database: cli.database,
        data_dir: cli.data_dir,
    };
    let (settings, config) = load_settings(options).await?;

    match cli.command {
        Commands::Init => init::cmd_init(&settings, &config).await,
        Commands::Migrate { check } => init::cmd_migrate(&settings, &config, check).await,
        Commands::Sources { command } => match command {
            SourceCommands::List => source::cmd_source_list(&settings, &config).await,
            SourceCommands::Sync { update } => {
                source::cmd_source_sync(&settings, &config, update).await
            }
        },
        Commands::Load {
            file,
            source,
            client,
            upload_user,
            session_id,
            batch_id,
            delimiter,
        } => {
            let options = crate::staging::LoadOptions {
                client_name: client,
                upload_user,
                session_id,
                batch_id,
                delimiter,
            };
            load::cmd_load(&settings, &config, &file, source.as_deref(), options).await
        }
        Commands::Batches { command } => match command {
            BatchCommands::List {
                source,
                status,
                limit,
            } => batches::cmd_batch_list(&settings, &config, source, status.as_deref(), limit).await,
            BatchCommands::Show { batch_id } => {
                batches::cmd_batch_show(&settings, &config, &batch_id).await
            }
            BatchCommands::Purge {
                batch_ids,
                older_than_hours,
                force,
                dry_run,
            } => {
                batches::cmd_batch_purge(
                    &settings,
                    &config,
                    &batch_ids,
                    older_than_hours,
                    force,
                    dry_run,
                )
                .await
            }
        },
        Commands::Link { kind } => pipeline::cmd_link(&settings, &config, &kind).await,
        Commands::Merge => pipeline::cmd_merge(&settings, &config).await,
        Commands::Score => pipeline::cmd_score(&settings, &config).await,
        Commands::Dedupe => pipeline::cmd_dedupe(&settings, &config).await,
        Commands::Run => pipeline::cmd_run(&settings, &config).await,
        Commands::Status { json } => status::cmd_status(&settings, &config, json).await,
        Commands::Locks { command } => match command {
            LockCommands::List => locks::cmd_lock_list(&settings, &config).await,
            LockCommands::Release { name } => {
                locks::cmd_lock_release(&settings, &config, &name).await
            }
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => config_cmd::cmd_config_show(&settings, &config),
        },
    }
}
