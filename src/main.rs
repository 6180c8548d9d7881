//! # Thread Digest CLI (`digest`)
//!
//! ## Usage
//!
//! ```bash
//! digest --config ./config/digest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `digest init` | Create the SQLite database and run schema migrations |
//! | `digest sources` | Show configured collections and credential status |
//! | `digest scrape` | Run the ingestion-and-summarization pipeline |
//! | `digest cluster` | Assign topic clusters to summarized items |
//! | `digest sentiment` | Score sentiment of summarized items |
//! | `digest stats` | Database overview |
//! | `digest get <id>` | Print one item as JSON |
//! | `digest serve` | Start the dashboard |
//!
//! Logs go to stderr (`RUST_LOG` controls the level, default `info`);
//! command output goes to stdout.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt as tfmt, EnvFilter};

use thread_digest::{cluster, config, get, ingest, migrate, sentiment, server, sources, stats};

/// Thread Digest: batch summarization, topic clustering and sentiment for
/// online discussions.
#[derive(Parser)]
#[command(
    name = "digest",
    about = "Thread Digest — summarize, cluster and score online discussions",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/digest.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the items/comments tables.
    /// Safe to run repeatedly.
    Init,

    /// Show configured collections, listing mode and credential status.
    Sources,

    /// Scrape, summarize and store new discussions.
    Scrape {
        /// Collection to scrape (repeatable). Overrides `[source].collections`.
        #[arg(long = "collection")]
        collections: Vec<String>,

        /// Maximum number of posts to list per collection.
        #[arg(long)]
        limit: Option<usize>,

        /// List, deduplicate and fetch only. No LLM calls, no writes.
        #[arg(long)]
        dry_run: bool,
    },

    /// Assign topic clusters to summarized items.
    Cluster {
        /// Clear every existing label and cluster all items from scratch.
        #[arg(long)]
        recluster: bool,
    },

    /// Score sentiment for summarized items that have none yet.
    Sentiment,

    /// Show item, comment and analysis coverage.
    Stats,

    /// Print one stored item with its comments as JSON.
    Get {
        /// Item id.
        id: String,
    },

    /// Start the read-only dashboard.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Scrape {
            collections,
            limit,
            dry_run,
        } => {
            ingest::run_scrape(&cfg, collections, limit, dry_run).await?;
        }
        Commands::Cluster { recluster } => {
            cluster::run_cluster(&cfg, recluster).await?;
        }
        Commands::Sentiment => {
            sentiment::run_sentiment(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
