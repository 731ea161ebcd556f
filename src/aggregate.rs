//! Aggregation views: per-media display strings built from current edges.
//!
//! Nothing here is cached; every call reads the relation store. The
//! `cached_*` columns on media rows are written by [`refresh_cached`], which
//! only the importer calls.

use std::collections::BTreeMap;

use sqlx::SqliteConnection;

use crate::error::Result;
use crate::models::{supported_dimensions, DimensionKind, Edge, MediaRef};
use crate::relation;

/// Render edges as `"A, B"`, or `"A (role), B (role)"` for actors.
pub fn format_edges(kind: DimensionKind, edges: &[Edge]) -> String {
    edges
        .iter()
        .map(|edge| match edge.role.as_deref() {
            Some(role) if kind.has_attribute() && !role.is_empty() => {
                format!("{} ({})", edge.name, role)
            }
            _ => edge.name.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub async fn aggregate(
    conn: &mut SqliteConnection,
    media: MediaRef,
    kind: DimensionKind,
) -> Result<String> {
    let edges = relation::edges(conn, media, kind).await?;
    Ok(format_edges(kind, &edges))
}

/// Aggregation string for every kind `media` supports.
pub async fn aggregate_all(
    conn: &mut SqliteConnection,
    media: MediaRef,
) -> Result<BTreeMap<DimensionKind, String>> {
    let mut out = BTreeMap::new();
    for kind in supported_dimensions(media.kind) {
        out.insert(kind, aggregate(conn, media, kind).await?);
    }
    Ok(out)
}

/// Write fresh aggregation strings into the media row's cache columns.
/// Empty listings are stored as NULL.
pub async fn refresh_cached(conn: &mut SqliteConnection, media: MediaRef) -> Result<()> {
    for (kind, text) in aggregate_all(conn, media).await? {
        let value = (!text.is_empty()).then_some(text);
        sqlx::query(&format!(
            "UPDATE {} SET {} = ? WHERE id = ?",
            media.kind.table(),
            kind.cache_column()
        ))
        .bind(value)
        .bind(media.id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}
