//! Relation store: many-to-many edges between media rows and catalog rows.
//!
//! There is one edge table per supported (media kind, dimension kind) pair,
//! named `{media}_{dimension table}` (e.g. `movie_actors`). Each edge has an
//! explicit `seq` that fixes display order; actor edges also carry a role.

use serde::Deserialize;
use sqlx::{Row, SqliteConnection};

use crate::catalog;
use crate::error::{Result, StoreError};
use crate::models::{edge_table, DimensionKind, Edge, MediaKind, MediaRef};

/// What happens when a media row is linked to the same entity twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPolicy {
    /// Keep the edge and its position, overwrite the role.
    #[default]
    Replace,
    /// Refuse with [`StoreError::DuplicateRelation`].
    InsertOnce,
    /// Actor edges on shows replace, everything else is insert-once.
    Legacy,
}

impl LinkPolicy {
    pub fn replaces(self, media: MediaKind, kind: DimensionKind) -> bool {
        match self {
            LinkPolicy::Replace => true,
            LinkPolicy::InsertOnce => false,
            LinkPolicy::Legacy => media == MediaKind::Show && kind == DimensionKind::Actor,
        }
    }
}

fn table_for(media: MediaKind, kind: DimensionKind) -> Result<String> {
    edge_table(media, kind).ok_or(StoreError::UnsupportedRelation(kind, media))
}

pub(crate) async fn ensure_media(conn: &mut SqliteConnection, media: MediaRef) -> Result<()> {
    let exists: Option<i64> =
        sqlx::query_scalar(&format!("SELECT id FROM {} WHERE id = ?", media.kind.table()))
            .bind(media.id)
            .fetch_optional(&mut *conn)
            .await?;
    match exists {
        Some(_) => Ok(()),
        None => Err(StoreError::NotFound(media.to_string())),
    }
}

/// Link `media` to the `kind` entity called `name`, creating the entity if
/// it does not exist yet. Returns the entity id.
///
/// `role` is only stored for kinds that carry an attribute (actors).
pub async fn link(
    conn: &mut SqliteConnection,
    policy: LinkPolicy,
    media: MediaRef,
    kind: DimensionKind,
    name: &str,
    role: Option<&str>,
) -> Result<i64> {
    let table = table_for(media.kind, kind)?;
    ensure_media(conn, media).await?;
    let role = if kind.has_attribute() { role } else { None };

    let dimension_id = catalog::intern(conn, kind, name).await?;

    let existing: Option<i64> = sqlx::query_scalar(&format!(
        "SELECT seq FROM {table} WHERE media_id = ? AND dimension_id = ?"
    ))
    .bind(media.id)
    .bind(dimension_id)
    .fetch_optional(&mut *conn)
    .await?;

    if existing.is_some() {
        if !policy.replaces(media.kind, kind) {
            return Err(StoreError::DuplicateRelation {
                media,
                kind,
                dimension_id,
            });
        }
        if kind.has_attribute() {
            sqlx::query(&format!(
                "UPDATE {table} SET role = ? WHERE media_id = ? AND dimension_id = ?"
            ))
            .bind(role)
            .bind(media.id)
            .bind(dimension_id)
            .execute(&mut *conn)
            .await?;
        }
        return Ok(dimension_id);
    }

    let seq: i64 = sqlx::query_scalar(&format!(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM {table} WHERE media_id = ?"
    ))
    .bind(media.id)
    .fetch_one(&mut *conn)
    .await?;

    if kind.has_attribute() {
        sqlx::query(&format!(
            "INSERT INTO {table} (media_id, dimension_id, role, seq) VALUES (?, ?, ?, ?)"
        ))
        .bind(media.id)
        .bind(dimension_id)
        .bind(role)
        .bind(seq)
        .execute(&mut *conn)
        .await?;
    } else {
        sqlx::query(&format!(
            "INSERT INTO {table} (media_id, dimension_id, seq) VALUES (?, ?, ?)"
        ))
        .bind(media.id)
        .bind(dimension_id)
        .bind(seq)
        .execute(&mut *conn)
        .await?;
    }

    tracing::debug!(%media, %kind, dimension_id, seq, "linked");
    Ok(dimension_id)
}

/// Remove one edge. Returns whether it existed. The entity itself stays in
/// the catalog until reclaimed.
pub async fn unlink(
    conn: &mut SqliteConnection,
    media: MediaRef,
    kind: DimensionKind,
    dimension_id: i64,
) -> Result<bool> {
    let table = table_for(media.kind, kind)?;
    let result = sqlx::query(&format!(
        "DELETE FROM {table} WHERE media_id = ? AND dimension_id = ?"
    ))
    .bind(media.id)
    .bind(dimension_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Edges of `media` for `kind`, in link order. Empty for unsupported pairs.
pub async fn edges(
    conn: &mut SqliteConnection,
    media: MediaRef,
    kind: DimensionKind,
) -> Result<Vec<Edge>> {
    let Some(table) = edge_table(media.kind, kind) else {
        return Ok(Vec::new());
    };
    let role = if kind.has_attribute() {
        "e.role"
    } else {
        "NULL"
    };

    let rows = sqlx::query(&format!(
        r#"
        SELECT e.dimension_id, d.name, {role} AS role, e.seq
        FROM {table} e
        JOIN {dim} d ON d.id = e.dimension_id
        WHERE e.media_id = ?
        ORDER BY e.seq ASC
        "#,
        dim = kind.table()
    ))
    .bind(media.id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .iter()
        .map(|row| Edge {
            dimension_id: row.get("dimension_id"),
            name: row.get("name"),
            role: row.get("role"),
            seq: row.get("seq"),
        })
        .collect())
}

/// Ids of every `kind` entity linked to `media`.
pub async fn dimension_ids(
    conn: &mut SqliteConnection,
    media: MediaRef,
    kind: DimensionKind,
) -> Result<Vec<i64>> {
    let Some(table) = edge_table(media.kind, kind) else {
        return Ok(Vec::new());
    };
    let ids = sqlx::query_scalar(&format!(
        "SELECT dimension_id FROM {table} WHERE media_id = ? ORDER BY seq"
    ))
    .bind(media.id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

/// Number of edges pointing at one entity, across every media kind.
pub async fn edge_count(
    conn: &mut SqliteConnection,
    kind: DimensionKind,
    dimension_id: i64,
) -> Result<i64> {
    let mut total = 0;
    for media in kind.partitions() {
        let table = table_for(media, kind)?;
        let n: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE dimension_id = ?"))
                .bind(dimension_id)
                .fetch_one(&mut *conn)
                .await?;
        total += n;
    }
    Ok(total)
}
