//! # Scrape Store CLI (`scrapedb`)
//!
//! Maintenance and inspection front end for the scraper metadata store.
//!
//! ## Usage
//!
//! ```bash
//! scrapedb --config ./config/scrape.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scrapedb init` | Create the SQLite database and run schema migrations |
//! | `scrapedb stats` | Row counts, orphan counts and delete-queue backlog |
//! | `scrapedb import <json>` | Import a batch of scraped movies and shows |
//! | `scrapedb show <kind> <id>` | Print a full record as JSON |
//! | `scrapedb aggregate <kind> <id> <dimension>` | Print one aggregation string |
//! | `scrapedb delete <kind> <id>` | Delete a media row with its cascade |
//! | `scrapedb release <file-id>` | Detach a scanned file from its entity |
//! | `scrapedb sweep [dimension]` | Remove orphaned catalog entities |
//! | `scrapedb recount` | Recompute advisory usage counts |
//! | `scrapedb reap` | Delete queued files that nothing references |
//! | `scrapedb reset --yes` | Drop every table and rebuild the schema |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use scrape_store::config;
use scrape_store::delete_queue::FsRemover;
use scrape_store::import;
use scrape_store::migrate;
use scrape_store::models::{DimensionKind, MediaKind, MediaRef};
use scrape_store::stats;
use scrape_store::store::Store;

/// Scrape Store CLI: inspect and maintain a local video-library metadata
/// cache.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/scrape.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "scrapedb",
    about = "Scrape Store: metadata cache for a local video library",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/scrape.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and applies every pending
    /// migration. Safe to run repeatedly.
    Init,

    /// Show database statistics.
    Stats,

    /// Import scraped movies and shows from a JSON batch file.
    ///
    /// The whole batch is written in one transaction.
    Import {
        /// Path to the batch file.
        path: PathBuf,
    },

    /// Print the full record of a movie, show or episode as JSON.
    Show {
        /// `movie`, `show` or `episode`.
        kind: MediaKind,
        id: i64,
    },

    /// Print the aggregation string of one dimension kind.
    Aggregate {
        kind: MediaKind,
        id: i64,
        /// Dimension kind, e.g. `actor` or `genres`.
        dimension: DimensionKind,
    },

    /// Delete a movie, show or episode with its full cascade.
    Delete { kind: MediaKind, id: i64 },

    /// Delete whatever is attached to a scanned file and mark it unscraped.
    Release {
        /// Scanned file id.
        file_id: i64,
    },

    /// Remove catalog entities that nothing references.
    ///
    /// Without an argument every dimension kind is swept and empty shows
    /// are removed.
    Sweep {
        /// A single dimension kind, or `all`.
        #[arg(default_value = "all")]
        dimension: String,
    },

    /// Recompute the advisory usage counts of every catalog entity.
    Recount,

    /// Delete files on the delete queue that no row references anymore.
    Reap {
        /// Report what would be removed without touching anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Drop all tables and recreate the schema. Destroys every row.
    Reset {
        /// Required confirmation.
        #[arg(long)]
        yes: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = Store::open(&cfg).await?;
            let version = migrate::current_version(&mut *store.pool().acquire().await?).await?;
            store.close().await;
            println!("Database initialized at schema v{}.", version);
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Import { path } => {
            import::run_import(&cfg, &path).await?;
        }
        Commands::Show { kind, id } => {
            let store = Store::open(&cfg).await?;
            let record = store.full_record(MediaRef { kind, id }).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            store.close().await;
        }
        Commands::Aggregate {
            kind,
            id,
            dimension,
        } => {
            let store = Store::open(&cfg).await?;
            let text = store.aggregate(MediaRef { kind, id }, dimension).await?;
            println!("{}", text);
            store.close().await;
        }
        Commands::Delete { kind, id } => {
            let store = Store::open(&cfg).await?;
            let mut session = store.begin().await?;
            let outcome = session.delete(MediaRef { kind, id }).await?;
            session.commit().await?;
            store.close().await;

            println!(
                "Deleted {}",
                outcome
                    .deleted
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            for (kind, ids) in &outcome.reclaimed {
                println!("  reclaimed {} {}", ids.len(), kind.table());
            }
            if !outcome.queued.is_empty() {
                println!("  queued {} file(s) for deletion", outcome.queued.len());
            }
        }
        Commands::Release { file_id } => {
            let store = Store::open(&cfg).await?;
            let mut session = store.begin().await?;
            let outcome = session.release_file(file_id).await?;
            session.commit().await?;
            store.close().await;

            match outcome {
                Some(outcome) => println!(
                    "Released file {} ({} row(s) deleted)",
                    file_id,
                    outcome.deleted.len()
                ),
                None => println!("File {} had no entity attached.", file_id),
            }
        }
        Commands::Sweep { dimension } => {
            let store = Store::open(&cfg).await?;
            let mut session = store.begin().await?;
            if dimension == "all" {
                let removed = session.sweep_all().await?;
                let shows = session.sweep_empty_shows().await?;
                session.commit().await?;
                for kind in DimensionKind::ALL {
                    let n = removed.get(&kind).map_or(0, |ids| ids.len());
                    println!("  {:<14} {}", kind.table(), n);
                }
                println!("  {:<14} {}", "empty shows", shows.len());
            } else {
                let kind: DimensionKind = dimension
                    .parse()
                    .with_context(|| format!("Invalid sweep target '{}'", dimension))?;
                let removed = session.sweep_orphans(kind).await?;
                session.commit().await?;
                println!("  {:<14} {}", kind.table(), removed.len());
            }
            store.close().await;
        }
        Commands::Recount => {
            let store = Store::open(&cfg).await?;
            let mut session = store.begin().await?;
            let updated = session.recount_usage().await?;
            session.commit().await?;
            store.close().await;
            println!("Recounted {} catalog entries.", updated);
        }
        Commands::Reap { dry_run } => {
            let store = Store::open(&cfg).await?;
            let report = store.reap(&FsRemover, dry_run).await?;
            store.close().await;

            let verb = if dry_run { "Would remove" } else { "Removed" };
            println!("{} {} file(s)", verb, report.removed.len());
            for path in &report.removed {
                println!("  {}", path);
            }
            if !report.kept.is_empty() {
                println!("Kept {} file(s) still in use", report.kept.len());
            }
            for (path, error) in &report.failed {
                println!("  failed: {} ({})", path, error);
            }
            if !report.failed.is_empty() {
                bail!("{} file(s) could not be removed", report.failed.len());
            }
        }
        Commands::Reset { yes } => {
            if !yes {
                bail!("Refusing to reset without --yes; this deletes every row.");
            }
            let pool = scrape_store::db::connect(&cfg).await?;
            migrate::reset(&pool).await?;
            let version = migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database reset to schema v{}.", version);
        }
    }

    Ok(())
}
