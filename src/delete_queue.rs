//! Reference-counted ledger of files waiting to be deleted from disk.
//!
//! Store operations only ever write entries; physical deletion happens in
//! [`reap`], which must run outside any write transaction because it does
//! file I/O. Each entry records how many live rows still referenced the
//! path when it was queued, and `reap` re-checks that count before touching
//! the file.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteEntry {
    pub id: i64,
    pub path: String,
    pub use_count: i64,
    pub enqueued_at: i64,
}

/// Live references to `path` across media covers and image files.
pub async fn path_use_count(conn: &mut SqliteConnection, path: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT
            (SELECT COUNT(*) FROM movies WHERE cover = ?)
          + (SELECT COUNT(*) FROM shows WHERE cover = ?)
          + (SELECT COUNT(*) FROM episodes WHERE cover = ?)
          + (SELECT COUNT(*) FROM movie_images WHERE large_file = ? OR thumb_file = ?)
          + (SELECT COUNT(*) FROM show_images WHERE large_file = ? OR thumb_file = ?)
        "#,
    )
    .bind(path)
    .bind(path)
    .bind(path)
    .bind(path)
    .bind(path)
    .bind(path)
    .bind(path)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}

/// Queue `path` with its current use count. Call after the referencing row
/// is gone so the count covers only the remaining references.
pub async fn enqueue(conn: &mut SqliteConnection, path: &str) -> Result<DeleteEntry> {
    let use_count = path_use_count(conn, path).await?;
    let enqueued_at = chrono::Utc::now().timestamp();

    let id = sqlx::query("INSERT INTO delete_queue (path, use_count, enqueued_at) VALUES (?, ?, ?)")
        .bind(path)
        .bind(use_count)
        .bind(enqueued_at)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

    tracing::debug!(path, use_count, "queued file for deletion");
    Ok(DeleteEntry {
        id,
        path: path.to_string(),
        use_count,
        enqueued_at,
    })
}

pub async fn pending(conn: &mut SqliteConnection) -> Result<Vec<DeleteEntry>> {
    let rows = sqlx::query("SELECT id, path, use_count, enqueued_at FROM delete_queue ORDER BY id")
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows
        .iter()
        .map(|row| DeleteEntry {
            id: row.get("id"),
            path: row.get("path"),
            use_count: row.get("use_count"),
            enqueued_at: row.get("enqueued_at"),
        })
        .collect())
}

/// Removes files on behalf of [`reap`].
#[async_trait]
pub trait FileRemover: Send + Sync {
    async fn remove(&self, path: &Path) -> std::io::Result<()>;
}

/// Deletes from the local filesystem. A file that is already gone counts
/// as removed.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsRemover;

#[async_trait]
impl FileRemover for FsRemover {
    async fn remove(&self, path: &Path) -> std::io::Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ReapReport {
    /// Paths deleted from disk.
    pub removed: Vec<String>,
    /// Paths dropped from the queue because something still uses them.
    pub kept: Vec<String>,
    /// Paths whose removal failed; their entries stay queued.
    pub failed: Vec<(String, String)>,
}

/// Drain the queue: delete unreferenced files, drop entries for files that
/// are still in use.
///
/// Every statement runs in autocommit mode; no write transaction is held
/// while the remover does I/O. With `dry_run` nothing is removed or
/// dequeued and the report shows what would happen.
pub async fn reap(pool: &SqlitePool, remover: &dyn FileRemover, dry_run: bool) -> Result<ReapReport> {
    let mut conn = pool.acquire().await?;
    let entries = pending(&mut conn).await?;

    // One decision per path, however many times it was queued.
    let mut by_path: BTreeMap<String, usize> = BTreeMap::new();
    for entry in &entries {
        *by_path.entry(entry.path.clone()).or_default() += 1;
    }

    let mut report = ReapReport::default();
    for path in by_path.into_keys() {
        let live = path_use_count(&mut conn, &path).await?;
        if live > 0 {
            if !dry_run {
                dequeue_path(&mut conn, &path).await?;
            }
            report.kept.push(path);
            continue;
        }

        if dry_run {
            report.removed.push(path);
            continue;
        }

        match remover.remove(Path::new(&path)).await {
            Ok(()) => {
                dequeue_path(&mut conn, &path).await?;
                report.removed.push(path);
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "failed to remove queued file");
                report.failed.push((path, e.to_string()));
            }
        }
    }

    tracing::info!(
        removed = report.removed.len(),
        kept = report.kept.len(),
        failed = report.failed.len(),
        dry_run,
        "reaped delete queue"
    );
    Ok(report)
}

async fn dequeue_path(conn: &mut SqliteConnection, path: &str) -> Result<()> {
    sqlx::query("DELETE FROM delete_queue WHERE path = ?")
        .bind(path)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
