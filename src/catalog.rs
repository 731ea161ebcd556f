//! Dimension catalog: deduplicated lookup entities keyed by exact name.
//!
//! Every function takes the caller's connection, so it runs inside whatever
//! transaction the caller has open. Names are matched byte for byte; no case
//! folding or whitespace trimming is applied, so `"Heat"` and `"heat"` are
//! two different entities.

use sqlx::{Row, SqliteConnection};

use crate::error::{Result, StoreError};
use crate::models::{Dimension, DimensionKind};
use crate::relation;

/// Return the id of the `kind` row named `name`, creating it if needed.
pub async fn intern(conn: &mut SqliteConnection, kind: DimensionKind, name: &str) -> Result<i64> {
    if name.is_empty() {
        return Err(StoreError::InvalidInput(format!(
            "{} name must not be empty",
            kind
        )));
    }

    if let Some(id) = find(conn, kind, name).await? {
        return Ok(id);
    }

    let id = sqlx::query(&format!("INSERT INTO {} (name) VALUES (?)", kind.table()))
        .bind(name)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

    tracing::debug!(%kind, id, name, "interned new dimension");
    Ok(id)
}

pub async fn find(conn: &mut SqliteConnection, kind: DimensionKind, name: &str) -> Result<Option<i64>> {
    let id = sqlx::query_scalar(&format!("SELECT id FROM {} WHERE name = ?", kind.table()))
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(id)
}

pub async fn get(conn: &mut SqliteConnection, kind: DimensionKind, id: i64) -> Result<Option<Dimension>> {
    let row = sqlx::query(&format!(
        "SELECT id, name, usage_count FROM {} WHERE id = ?",
        kind.table()
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|row| Dimension {
        id: row.get("id"),
        kind,
        name: row.get("name"),
        usage_count: row.get("usage_count"),
    }))
}

/// All rows of `kind`, ordered by id.
pub async fn list(conn: &mut SqliteConnection, kind: DimensionKind) -> Result<Vec<Dimension>> {
    let rows = sqlx::query(&format!(
        "SELECT id, name, usage_count FROM {} ORDER BY id",
        kind.table()
    ))
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .iter()
        .map(|row| Dimension {
            id: row.get("id"),
            kind,
            name: row.get("name"),
            usage_count: row.get("usage_count"),
        })
        .collect())
}

pub async fn count(conn: &mut SqliteConnection, kind: DimensionKind) -> Result<i64> {
    let n = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", kind.table()))
        .fetch_one(&mut *conn)
        .await?;
    Ok(n)
}

/// Delete one catalog row directly.
///
/// Refused with [`StoreError::ReferentialIntegrity`] while any media row
/// still links to it; callers are expected to go through orphan reclamation.
pub async fn delete(conn: &mut SqliteConnection, kind: DimensionKind, id: i64) -> Result<()> {
    let edges = relation::edge_count(conn, kind, id).await?;
    if edges > 0 {
        return Err(StoreError::ReferentialIntegrity { kind, id, edges });
    }

    let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", kind.table()))
        .bind(id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("{} {}", kind, id)));
    }
    Ok(())
}

/// Recompute `usage_count` for every row of `kind` from the edge tables.
///
/// The counter is advisory: nothing else keeps it current. Returns the
/// number of rows whose value changed.
pub async fn recount_usage(conn: &mut SqliteConnection, kind: DimensionKind) -> Result<u64> {
    let counts: Vec<String> = kind
        .partitions()
        .filter_map(|media| crate::models::edge_table(media, kind))
        .map(|edge| {
            format!(
                "(SELECT COUNT(*) FROM {edge} e WHERE e.dimension_id = {table}.id)",
                table = kind.table()
            )
        })
        .collect();
    let total = if counts.is_empty() {
        "0".to_string()
    } else {
        counts.join(" + ")
    };

    let result = sqlx::query(&format!(
        "UPDATE {table} SET usage_count = {total} WHERE usage_count != {total}",
        table = kind.table()
    ))
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}
