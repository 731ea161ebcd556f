//! Database statistics and health overview.
//!
//! Row counts per media kind and catalog kind, how many catalog entities
//! are currently orphaned, and the delete-queue backlog. Used by
//! `scrapedb stats` to check that imports and maintenance runs did what
//! was expected.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqliteConnection;

use crate::catalog;
use crate::config::Config;
use crate::delete_queue;
use crate::media;
use crate::migrate;
use crate::models::{DimensionKind, MediaKind};
use crate::orphans;
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct DimensionStats {
    pub kind: DimensionKind,
    pub entities: i64,
    pub orphans: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub schema_version: i64,
    pub scanned_files: i64,
    pub unscraped_files: i64,
    pub media: Vec<(MediaKind, i64)>,
    pub dimensions: Vec<DimensionStats>,
    pub queued_deletes: usize,
    /// Oldest delete-queue entry, unix seconds.
    pub oldest_queued: Option<i64>,
}

pub async fn gather(conn: &mut SqliteConnection) -> crate::error::Result<StoreStats> {
    let schema_version = migrate::current_version(conn).await?;

    let scanned_files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scanned_files")
        .fetch_one(&mut *conn)
        .await?;
    let unscraped_files: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM scanned_files WHERE scraper_id = 0")
            .fetch_one(&mut *conn)
            .await?;

    let mut media_counts = Vec::new();
    for kind in MediaKind::ALL {
        media_counts.push((kind, media::count(conn, kind).await?));
    }

    let mut dimensions = Vec::new();
    for kind in DimensionKind::ALL {
        dimensions.push(DimensionStats {
            kind,
            entities: catalog::count(conn, kind).await?,
            orphans: orphans::find_orphans(conn, kind).await?.len(),
        });
    }

    let queue = delete_queue::pending(conn).await?;

    Ok(StoreStats {
        schema_version,
        scanned_files,
        unscraped_files,
        media: media_counts,
        dimensions,
        queued_deletes: queue.len(),
        oldest_queued: queue.iter().map(|e| e.enqueued_at).min(),
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = Store::open(config).await?;
    let stats = {
        let mut conn = store.pool().acquire().await?;
        gather(&mut conn).await?
    };

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Scrape Store — Database Stats");
    println!("=============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Schema:      v{}", stats.schema_version);
    println!();
    println!(
        "  Files:       {} ({} unscraped)",
        stats.scanned_files, stats.unscraped_files
    );
    for (kind, n) in &stats.media {
        println!("  {:<12} {}", format!("{}s:", kind), n);
    }

    println!();
    println!("  {:<14} {:>8} {:>8}", "CATALOG", "ENTRIES", "ORPHANS");
    println!("  {}", "-".repeat(32));
    for d in &stats.dimensions {
        println!("  {:<14} {:>8} {:>8}", d.kind.table(), d.entities, d.orphans);
    }

    println!();
    match stats.oldest_queued {
        Some(ts) => println!(
            "  Delete queue: {} entr{} (oldest {})",
            stats.queued_deletes,
            if stats.queued_deletes == 1 { "y" } else { "ies" },
            format_ts_relative(ts)
        ),
        None => println!("  Delete queue: empty"),
    }
    println!();

    store.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_relative_timestamps() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
    }
}
